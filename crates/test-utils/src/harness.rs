//! A supervisor wired to scratch storage and the fakes in `fake_process`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ferryman::engine::{Supervisor, SupervisorSettings};
use ferryman::exec::ProcessController;
use ferryman::store::{RecordStore, StoreOptions};
use ferryman::types::RecordKind;
use tempfile::TempDir;

use crate::fake_process::{InstantRetryTimer, ScriptCommandBuilder};

pub const POLL: Duration = Duration::from_millis(20);

pub struct Harness {
    pub dir: TempDir,
    pub supervisor: Supervisor,
    pub script: ScriptCommandBuilder,
    pub timer: InstantRetryTimer,
}

impl Harness {
    pub fn store(&self) -> &Arc<RecordStore> {
        self.supervisor.store()
    }
}

pub struct HarnessBuilder {
    kind: RecordKind,
    script: String,
    settings: SupervisorSettings,
    controller: Option<Arc<dyn ProcessController>>,
    real_timer: bool,
}

impl HarnessBuilder {
    pub fn new(kind: RecordKind, script: &str) -> Self {
        Self {
            kind,
            script: script.to_string(),
            settings: SupervisorSettings::for_kind(kind),
            controller: None,
            real_timer: false,
        }
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.settings.stop_timeout = timeout;
        self
    }

    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.settings.join_timeout = timeout;
        self
    }

    pub fn preview_timeout(mut self, timeout: Duration) -> Self {
        self.settings.preview_timeout = timeout;
        self
    }

    pub fn zombie_grace(mut self, grace: Duration) -> Self {
        self.settings.zombie_grace = grace;
        self
    }

    pub fn controller(mut self, controller: Arc<dyn ProcessController>) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Sleep out the full backoff instead of skipping it.
    pub fn real_timer(mut self) -> Self {
        self.real_timer = true;
        self
    }

    pub fn build(self) -> Harness {
        let dir = tempfile::tempdir().expect("Failed to create scratch dir");
        let (supervisor, script, timer) = self.build_in(dir.path());
        Harness {
            dir,
            supervisor,
            script,
            timer,
        }
    }

    fn build_in(self, root: &Path) -> (Supervisor, ScriptCommandBuilder, InstantRetryTimer) {
        let store = RecordStore::open(
            self.kind,
            root.join("data").join("records.json"),
            StoreOptions::for_kind(self.kind),
        )
        .expect("Failed to open scratch store");

        let script = ScriptCommandBuilder::new(&self.script);
        let timer = InstantRetryTimer::new();

        let mut builder = Supervisor::builder(Arc::new(store), root.join("logs"))
            .command_builder(Arc::new(script.clone()))
            .settings(self.settings);
        if !self.real_timer {
            builder = builder.retry_timer(Arc::new(timer.clone()));
        }
        if let Some(controller) = self.controller {
            builder = builder.controller(controller);
        }

        (builder.build(), script, timer)
    }
}

/// Poll `condition` every [`POLL`] until it holds. Pair with `with_timeout`.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::time::sleep(POLL).await;
    }
}
