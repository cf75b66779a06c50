#![forbid(unsafe_code)]

//! Career-coach chat backend with live job search through a stdio tool server.

pub mod chat;
pub mod completion;
pub mod config;
pub mod errors;
pub mod extract;
pub mod http;
pub mod tools;

pub use config::GlobalConfig;
pub use errors::{AppError, Result, ToolError, ToolErrorKind};
