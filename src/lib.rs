//! ticket-triage — support-mail classification and ingestion pipeline.

pub mod classify;
pub mod config;
pub mod error;
pub mod extract;
pub mod ledger;
pub mod llm;
pub mod normalize;
pub mod notify;
pub mod pipeline;
pub mod sink;
pub mod source;
