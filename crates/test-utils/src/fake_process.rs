//! Stand-ins for the external tools and timers used by the supervisor.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ferryman::engine::RetryTimer;
use ferryman::errors::{FerrymanError, Result};
use ferryman::exec::{CommandBuilder, ProcessController, SignalController, SignalOutcome};
use ferryman::store::Record;
use tracing::debug;

/// Runs a fixed shell script instead of rsync/rclone.
///
/// `{source}` and `{destination}` in the script are replaced with the
/// record's paths. Every built argv is recorded.
#[derive(Debug, Clone)]
pub struct ScriptCommandBuilder {
    script: String,
    built: Arc<Mutex<Vec<Vec<String>>>>,
}

impl ScriptCommandBuilder {
    pub fn new(script: &str) -> Self {
        Self {
            script: script.to_string(),
            built: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of attempts that reached the command-building step.
    pub fn build_count(&self) -> usize {
        self.built.lock().unwrap().len()
    }

    pub fn built(&self) -> Vec<Vec<String>> {
        self.built.lock().unwrap().clone()
    }
}

impl CommandBuilder for ScriptCommandBuilder {
    fn build(&self, record: &Record) -> Result<Vec<String>> {
        let script = self
            .script
            .replace("{source}", &record.source)
            .replace("{destination}", &record.destination);
        let argv = vec!["sh".to_string(), "-c".to_string(), script];
        debug!(id = %record.id, ?argv, "fake command built");
        self.built.lock().unwrap().push(argv.clone());
        Ok(argv)
    }
}

/// Retry timer that records the requested backoff but only waits a few
/// milliseconds.
#[derive(Debug, Clone, Default)]
pub struct InstantRetryTimer {
    requested: Arc<Mutex<Vec<Duration>>>,
}

impl InstantRetryTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requested(&self) -> Vec<Duration> {
        self.requested.lock().unwrap().clone()
    }
}

impl RetryTimer for InstantRetryTimer {
    fn sleep(&self, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
        self.requested.lock().unwrap().push(delay);
        Box::pin(tokio::time::sleep(Duration::from_millis(20)))
    }
}

/// Real stop/kill, but reports suspension as unsupported, the way platforms
/// without group suspension do.
#[derive(Debug, Default, Clone, Copy)]
pub struct PauselessController;

impl ProcessController for PauselessController {
    fn terminate(&self, pgid: u32) -> Result<SignalOutcome> {
        SignalController.terminate(pgid)
    }

    fn kill(&self, pgid: u32) -> Result<SignalOutcome> {
        SignalController.kill(pgid)
    }

    fn suspend(&self, _pgid: u32) -> Result<SignalOutcome> {
        Err(FerrymanError::Unsupported("suspend".to_string()))
    }

    fn resume(&self, _pgid: u32) -> Result<SignalOutcome> {
        Err(FerrymanError::Unsupported("resume".to_string()))
    }

    fn supports_pause(&self) -> bool {
        false
    }
}
