//! Queue-side ingestion: deduplicate raw events, stage their payloads and hand
//! them to the downstream processing task.
pub mod config;
pub mod consumer;
pub mod error;
pub mod message;
pub mod retry;
pub mod scheduler;
pub mod source;
pub mod task;
