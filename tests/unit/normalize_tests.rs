use serde_json::json;

use job_coach::tools::{normalize, ContentBlock, NormalizedValue, ToolResult};

#[test]
fn structured_value_wins_over_content() {
    let result = ToolResult {
        structured: Some(json!([{ "title": "Engineer" }])),
        content: vec![ContentBlock::text("ignored")],
    };

    let normalized = normalize(result);

    assert!(normalized.is_structured());
    assert_eq!(normalized.into_json(), json!([{ "title": "Engineer" }]));
}

#[test]
fn empty_structured_value_is_still_used() {
    let result = ToolResult {
        structured: Some(json!([])),
        content: vec![ContentBlock::text("[]")],
    };

    assert_eq!(normalize(result), NormalizedValue::Structured(json!([])));
}

#[test]
fn content_blocks_fall_back_in_order() {
    let result = ToolResult {
        structured: None,
        content: vec![ContentBlock::text("A"), ContentBlock::text("B")],
    };

    assert_eq!(normalize(result).into_json(), json!({ "content": ["A", "B"] }));
}

#[test]
fn non_text_blocks_contribute_empty_strings() {
    let result = ToolResult {
        structured: None,
        content: vec![
            ContentBlock::text("first"),
            ContentBlock {
                kind: "image".into(),
                text: None,
            },
        ],
    };

    assert_eq!(
        normalize(result).into_json(),
        json!({ "content": ["first", ""] })
    );
}

#[test]
fn fallback_serializes_as_content_object() {
    let value = NormalizedValue::Fallback {
        content: vec!["A".into()],
    };
    assert_eq!(serde_json::to_value(&value).unwrap(), json!({ "content": ["A"] }));
}
