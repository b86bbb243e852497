//! Updater capability and implementations.
//!
//! The fetcher never applies an update itself. It hands the service name and
//! image reference to an [`Updater`], which returns an [`UpdateHandle`]
//! immediately and reports the outcome on it later.
//!
//! Implementations provided:
//! - [`MockUpdater`]: records calls, used for tests and dry runs
//! - [`CommandUpdater`]: runs an external command per update

use std::process::Stdio;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn, Instrument, Span};

/// Placeholder for the service name in command templates.
pub const SERVICE_PLACEHOLDER: &str = "{service}";

/// Placeholder for the image reference in command templates.
pub const VERSION_PLACEHOLDER: &str = "{version}";

/// Failure reported by an updater.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpdateError {
    /// The updater ran and the update did not succeed.
    #[error("update failed: {0}")]
    Failed(String),

    /// The updater dropped the handle without reporting.
    #[error("updater abandoned the update without reporting an outcome")]
    Abandoned,
}

/// Sending half of an update's completion signal.
#[derive(Debug)]
pub struct UpdateReporter(oneshot::Sender<Result<(), UpdateError>>);

impl UpdateReporter {
    /// Report the outcome. Ignored if nobody is listening anymore.
    pub fn report(self, outcome: Result<(), UpdateError>) {
        let _ = self.0.send(outcome);
    }
}

/// Receiving half of an update's completion signal.
#[derive(Debug)]
pub struct UpdateHandle(oneshot::Receiver<Result<(), UpdateError>>);

impl UpdateHandle {
    /// Create a linked reporter/handle pair.
    pub fn channel() -> (UpdateReporter, UpdateHandle) {
        let (tx, rx) = oneshot::channel();
        (UpdateReporter(tx), UpdateHandle(rx))
    }

    /// A handle that already carries its outcome.
    pub fn ready(outcome: Result<(), UpdateError>) -> Self {
        let (reporter, handle) = Self::channel();
        reporter.report(outcome);
        handle
    }

    /// Wait for the outcome.
    pub async fn outcome(self) -> Result<(), UpdateError> {
        self.0.await.unwrap_or(Err(UpdateError::Abandoned))
    }
}

/// Applies an image update to a running service.
pub trait Updater: Send + Sync {
    /// Start updating `service` to `version` and return without waiting.
    ///
    /// `span` is the caller's logging context; implementations should record
    /// their events inside it.
    fn update(&self, service: &str, version: &str, span: Span) -> UpdateHandle;
}

/// A recorded call to [`MockUpdater::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCall {
    pub service: String,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockBehavior {
    Succeed,
    Fail,
    Hang,
}

/// Updater that only records and logs.
pub struct MockUpdater {
    behavior: MockBehavior,
    calls: Mutex<Vec<UpdateCall>>,
    /// Reporters held open by `hanging()` so their handles never complete.
    pending: Mutex<Vec<UpdateReporter>>,
}

impl MockUpdater {
    /// Create a mock updater whose updates succeed.
    pub fn new() -> Self {
        Self::with_behavior(MockBehavior::Succeed)
    }

    /// Create a mock updater whose updates all fail.
    pub fn failing() -> Self {
        Self::with_behavior(MockBehavior::Fail)
    }

    /// Create a mock updater whose updates never complete.
    pub fn hanging() -> Self {
        Self::with_behavior(MockBehavior::Hang)
    }

    fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// All calls received so far, oldest first.
    pub fn calls(&self) -> Vec<UpdateCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for MockUpdater {
    fn default() -> Self {
        Self::new()
    }
}

impl Updater for MockUpdater {
    fn update(&self, service: &str, version: &str, span: Span) -> UpdateHandle {
        let _entered = span.enter();
        info!(service, version, "[MOCK] Updating service");

        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(UpdateCall {
                service: service.to_string(),
                version: version.to_string(),
            });

        match self.behavior {
            MockBehavior::Succeed => UpdateHandle::ready(Ok(())),
            MockBehavior::Fail => UpdateHandle::ready(Err(UpdateError::Failed(
                "mock updater configured to fail".to_string(),
            ))),
            MockBehavior::Hang => {
                let (reporter, handle) = UpdateHandle::channel();
                self.pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(reporter);
                handle
            }
        }
    }
}

/// Updater that runs an external command, e.g.
/// `docker service update --image {version} {service}`.
///
/// Each update runs on its own tokio task, so `update` must be called from
/// within a runtime. A non-zero exit status is reported as
/// [`UpdateError::Failed`] with the command's stderr.
#[derive(Debug, Clone)]
pub struct CommandUpdater {
    argv: Vec<String>,
}

impl CommandUpdater {
    /// Create an updater from an argv template.
    pub fn new(argv: Vec<String>) -> Result<Self, UpdateError> {
        if argv.is_empty() {
            return Err(UpdateError::Failed("update command is empty".to_string()));
        }
        Ok(Self { argv })
    }

    /// Split a whitespace-separated command template into argv.
    pub fn from_template(template: &str) -> Result<Self, UpdateError> {
        Self::new(template.split_whitespace().map(str::to_string).collect())
    }

    /// The argv for one update with placeholders filled in.
    pub fn render(&self, service: &str, version: &str) -> Vec<String> {
        self.argv
            .iter()
            .map(|arg| {
                arg.replace(SERVICE_PLACEHOLDER, service)
                    .replace(VERSION_PLACEHOLDER, version)
            })
            .collect()
    }
}

impl Updater for CommandUpdater {
    fn update(&self, service: &str, version: &str, span: Span) -> UpdateHandle {
        let argv = self.render(service, version);
        let (reporter, handle) = UpdateHandle::channel();

        tokio::spawn(
            async move {
                reporter.report(run_command(&argv).await);
            }
            .instrument(span),
        );

        handle
    }
}

async fn run_command(argv: &[String]) -> Result<(), UpdateError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(UpdateError::Failed("update command is empty".to_string()));
    };

    info!(program = %program, args = ?args, "Running update command");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| UpdateError::Failed(format!("failed to spawn {program}: {e}")))?;

    if output.status.success() {
        debug!(program = %program, "Update command succeeded");
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(program = %program, status = %output.status, stderr = %stderr, "Update command failed");
        Err(UpdateError::Failed(format!(
            "{program} exited with {}: {stderr}",
            output.status
        )))
    }
}
