// src/engine/mod.rs

//! Execution engine for ferryman.
//!
//! One [`Supervisor`] per record kind ties together:
//! - the pure lifecycle rules in [`lifecycle`]
//! - the live worker registry ([`registry`])
//! - exponential-backoff retries ([`retry`])
//! - process-group control for stop / pause / resume (`signals`)
//! - dry-run previews that gate operations behind approval (`preview`)
//! - zombie reconciliation at startup and on demand (`reconcile`)

use std::sync::Arc;

use crate::store::Progress;

/// Invoked synchronously with the record ID and the merged progress after
/// every persisted progress update.
pub type ProgressCallback = Arc<dyn Fn(&str, &Progress) + Send + Sync>;

pub mod lifecycle;
pub mod registry;
pub mod retry;
pub mod supervisor;

mod preview;
mod reconcile;
mod signals;

pub use lifecycle::{Settlement, can_transition, settle, settle_preview};
pub use preview::PreviewReport;
pub use registry::LiveRegistry;
pub use retry::{RetryTask, RetryTimer, TokioRetryTimer, backoff_delay};
pub use supervisor::{Supervisor, SupervisorBuilder, SupervisorSettings};
