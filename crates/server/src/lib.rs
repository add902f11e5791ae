//! Archival service for archivist.
//!
//! This crate wires the node store, blockstore and read cache into:
//! - Chunk resolution with blockstore fallback
//! - Archival tracking from ledger confirmations to pruned payloads
//! - An in-process task dispatcher with bounded retries
//! - The internal HTTP API used by the upload pipeline and chain follower

pub mod archival;
pub mod cache;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod resolver;
pub mod routes;
pub mod state;

pub use archival::{ArchivalTracker, ArchivedEntry, ProcessSummary, PublishReceipt};
pub use dispatcher::{TaskPublisher, TaskQueue, WorkerPool};
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
