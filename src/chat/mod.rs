//! Chat flow: message assembly, job-search enrichment, completion.

pub mod orchestrator;

pub use orchestrator::{ChatOrchestrator, ChatReply, ChatRequest, ResumeAnalysis};
