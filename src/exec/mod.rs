// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`command`] turns a record into the argv of `rsync` / `rclone`.
//! - [`task_runner`] spawns one attempt and streams its output as events.
//! - [`controller`] signals process groups (stop, kill, pause, resume).
//! - [`progress`] extracts progress figures from output lines.
//! - [`job_log`] appends to the per-record log file.

pub mod command;
pub mod controller;
pub mod job_log;
pub mod progress;
pub mod task_runner;

pub use command::{CommandBuilder, RcloneCommandBuilder, RsyncCommandBuilder};
pub use controller::{ProcessController, SignalController, SignalOutcome};
pub use job_log::JobLog;
pub use task_runner::{AttemptOutcome, ExecEvent, run_process};
