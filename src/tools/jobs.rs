//! Typed schema of the `search_jobs` tool.
//!
//! Arguments: `{ q: string, location: string, limit: integer }`.
//! Output: a list of [`JobRecord`]s, either bare or wrapped under `result`
//! (servers that derive an output schema from a list return type wrap it).
//!
//! Record content is passed through untouched. The server truncates
//! `description` to 600 characters; the client never re-truncates.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::errors::ToolError;
use crate::tools::protocol::ToolCall;

/// Tool name of the job search.
pub const SEARCH_JOBS: &str = "search_jobs";

/// Default number of listings requested by the chat flow.
pub const DEFAULT_LIMIT: u32 = 8;

/// Arguments of a `search_jobs` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchJobsArgs {
    /// Free-text query.
    pub q: String,
    /// Case-insensitive location filter; empty means anywhere.
    #[serde(default)]
    pub location: String,
    /// Maximum number of listings to consider.
    pub limit: u32,
}

impl SearchJobsArgs {
    /// Build arguments for a search.
    #[must_use]
    pub fn new(q: impl Into<String>, location: impl Into<String>, limit: u32) -> Self {
        Self {
            q: q.into(),
            location: location.into(),
            limit,
        }
    }

    /// Arguments as the JSON object sent on the wire.
    #[must_use]
    pub fn to_arguments(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("q".into(), Value::String(self.q.clone()));
        map.insert("location".into(), Value::String(self.location.clone()));
        map.insert("limit".into(), Value::from(self.limit));
        map
    }

    /// Build the [`ToolCall`] for these arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ToolErrorKind::InvalidCall`](crate::errors::ToolErrorKind::InvalidCall)
    /// when the query is blank.
    pub fn to_call(&self) -> Result<ToolCall, ToolError> {
        let call = ToolCall::new(SEARCH_JOBS, self.to_arguments())?;
        call.validate()?;
        Ok(call)
    }
}

/// Validate raw `search_jobs` arguments.
///
/// `q` is required and must be a non-blank string; `location` must be a
/// string and `limit` a non-negative integer when present. Unknown keys
/// are rejected.
///
/// # Errors
///
/// Returns [`ToolErrorKind::InvalidCall`](crate::errors::ToolErrorKind::InvalidCall)
/// describing the first violation.
pub fn validate_search_jobs_args(args: &Map<String, Value>) -> Result<(), ToolError> {
    match args.get("q") {
        Some(Value::String(q)) if !q.trim().is_empty() => {}
        Some(Value::String(_)) => {
            return Err(ToolError::invalid_call("search_jobs: `q` must not be blank"))
        }
        Some(_) => return Err(ToolError::invalid_call("search_jobs: `q` must be a string")),
        None => return Err(ToolError::invalid_call("search_jobs: `q` is required")),
    }

    if let Some(location) = args.get("location") {
        if !location.is_string() {
            return Err(ToolError::invalid_call(
                "search_jobs: `location` must be a string",
            ));
        }
    }

    if let Some(limit) = args.get("limit") {
        if limit.as_u64().is_none() {
            return Err(ToolError::invalid_call(
                "search_jobs: `limit` must be a non-negative integer",
            ));
        }
    }

    if let Some(unknown) = args
        .keys()
        .find(|key| !matches!(key.as_str(), "q" | "location" | "limit"))
    {
        return Err(ToolError::invalid_call(format!(
            "search_jobs: unknown argument `{unknown}`"
        )));
    }

    Ok(())
}

/// One job listing returned by `search_jobs`.
///
/// Every field tolerates `null`, since upstream listings are sparse.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job title.
    #[serde(default)]
    pub title: Option<String>,
    /// Hiring company.
    #[serde(default)]
    pub company: Option<String>,
    /// Listing URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Required candidate location.
    #[serde(default)]
    pub location: Option<String>,
    /// Free-form tags.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
    /// Employment type (`full_time`, `contract`, ...).
    #[serde(default)]
    pub job_type: Option<String>,
    /// Publication timestamp as reported upstream.
    #[serde(default)]
    pub published_at: Option<String>,
    /// Salary text, often empty.
    #[serde(default)]
    pub salary: Option<String>,
    /// Listing description, already truncated by the server.
    #[serde(default)]
    pub description: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decode the structured value of a `search_jobs` result.
///
/// # Errors
///
/// Returns [`ToolErrorKind::MalformedResponse`](crate::errors::ToolErrorKind::MalformedResponse)
/// when the value is neither a list of records nor an object wrapping one
/// under `result`.
pub fn job_records(value: &Value) -> Result<Vec<JobRecord>, ToolError> {
    let list = match value {
        Value::Array(_) => value,
        Value::Object(map) => map
            .get("result")
            .filter(|inner| inner.is_array())
            .ok_or_else(|| ToolError::malformed("search_jobs result has no `result` list"))?,
        _ => {
            return Err(ToolError::malformed(
                "search_jobs result must be a list of jobs",
            ))
        }
    };

    serde_json::from_value(list.clone())
        .map_err(|e| ToolError::malformed(format!("invalid job record: {e}")))
}
