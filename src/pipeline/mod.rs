//! Ingestion pipeline — normalize, dedup, classify, emit, report.

pub mod runner;
pub mod scheduler;
pub mod types;

pub use runner::IngestionPipeline;
pub use scheduler::{CycleRunner, spawn_cycle_loop};
pub use types::{
    AttachmentMeta, InboundMessage, MessageOutcome, OutcomeStatus, PipelineReport, RunOptions,
    TicketRecord, TicketStatus,
};
