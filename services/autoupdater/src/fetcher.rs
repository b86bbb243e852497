//! Active fetcher: polls a registry tag and triggers updates on new digests.
//!
//! Lifecycle:
//!
//! ```text
//! Idle ──start()──▶ Running ──stop()──▶ Stopped
//! ```
//!
//! Each tick fetches a fresh token, resolves the tag's config digest and
//! compares it with the last digest seen. A different, non-empty digest is
//! recorded and handed to the [`Updater`]. The very first digest a fetcher
//! sees counts as different, so every new fetcher updates its service once on
//! its first successful tick.
//!
//! Token and resolve failures are logged and the tick is skipped; nothing
//! short of [`ActiveFetcher::stop`] ends the loop. Update outcomes are
//! observed on a separate task and never roll back the recorded digest, so a
//! failed update is not retried until the digest changes again.
//!
//! ## Timing
//!
//! The first tick runs as soon as [`ActiveFetcher::start`] is called. Later
//! ticks start one interval after the previous tick started. Calling
//! [`ActiveFetcher::set_interval`] while running re-arms the pending sleep
//! against the new interval right away. `stop()` is honoured between ticks
//! and never cancels a tick in progress.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use autoupdater_registry::{FetchTarget, RegistryClient, RegistryError};
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::updater::Updater;

/// Polling interval used until [`ActiveFetcher::set_interval`] is called.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Lifecycle state of a fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherState {
    /// Constructed, not started.
    Idle,
    /// Polling loop active.
    Running,
    /// Loop exited. Terminal.
    Stopped,
}

impl fmt::Display for FetcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FetcherState::Idle => "idle",
            FetcherState::Running => "running",
            FetcherState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Errors returned to the caller of the fetcher.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetcherError {
    #[error("fetcher can only be started once (current state: {0})")]
    NotIdle(FetcherState),
}

/// Stand-in deadline for intervals too large to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// When the tick after one started at `tick_started` is due.
fn next_deadline(tick_started: Instant, interval: Duration) -> Instant {
    tick_started
        .checked_add(interval)
        .unwrap_or_else(|| tick_started + FAR_FUTURE)
}

/// Result of a single tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    Unchanged,
    Updated { digest: String },
    AuthFailed(RegistryError),
    ResolveFailed(RegistryError),
}

/// Mutable state owned by one fetcher.
struct PollState {
    /// Empty until the first successful resolution; never reset to empty.
    last_digest: RwLock<String>,
    interval: watch::Sender<Duration>,
    state: watch::Sender<FetcherState>,
}

/// Watches one `repository:tag` for one service.
pub struct ActiveFetcher {
    target: FetchTarget,
    registry: RegistryClient,
    updater: Arc<dyn Updater>,
    span: Span,
    poll: PollState,
}

impl ActiveFetcher {
    /// Create an idle fetcher.
    pub fn new(target: FetchTarget, registry: RegistryClient, updater: Arc<dyn Updater>) -> Self {
        let span = info_span!(
            "fetcher",
            service = %target.service(),
            image = %target.version_ref()
        );

        Self {
            target,
            registry,
            updater,
            span,
            poll: PollState {
                last_digest: RwLock::new(String::new()),
                interval: watch::Sender::new(DEFAULT_POLL_INTERVAL),
                state: watch::Sender::new(FetcherState::Idle),
            },
        }
    }

    /// Log inside `span` instead of the default `fetcher` span. The span is
    /// also handed to the updater.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn target(&self) -> &FetchTarget {
        &self.target
    }

    pub fn state(&self) -> FetcherState {
        *self.poll.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<FetcherState> {
        self.poll.state.subscribe()
    }

    pub fn interval(&self) -> Duration {
        *self.poll.interval.borrow()
    }

    /// Set the polling period. Allowed in any state; a running loop picks it
    /// up immediately. A zero interval is ignored.
    pub fn set_interval(&self, interval: Duration) {
        if interval.is_zero() {
            warn!(parent: &self.span, "Ignoring zero polling interval");
            return;
        }
        self.poll.interval.send_replace(interval);
    }

    /// Last digest seen, empty before the first successful tick.
    pub async fn last_digest(&self) -> String {
        self.poll.last_digest.read().await.clone()
    }

    /// Run the polling loop until [`stop`](Self::stop) is called.
    ///
    /// Does not return while running; spawn it on its own task to poll in the
    /// background. Fails if the fetcher is not `Idle`.
    pub async fn start(&self) -> Result<(), FetcherError> {
        let mut current = FetcherState::Idle;
        let started = self.poll.state.send_if_modified(|state| {
            current = *state;
            if *state == FetcherState::Idle {
                *state = FetcherState::Running;
                true
            } else {
                false
            }
        });

        if !started {
            return Err(FetcherError::NotIdle(current));
        }

        self.run().instrument(self.span.clone()).await;
        Ok(())
    }

    /// Ask the loop to exit before its next tick. No-op unless running.
    pub fn stop(&self) {
        let stopped = self.poll.state.send_if_modified(|state| {
            if *state == FetcherState::Running {
                *state = FetcherState::Stopped;
                true
            } else {
                false
            }
        });

        if stopped {
            info!(parent: &self.span, "Stop requested");
        }
    }

    async fn run(&self) {
        let mut state_rx = self.poll.state.subscribe();
        let mut interval_rx = self.poll.interval.subscribe();

        info!(
            interval_secs = self.interval().as_secs(),
            manifest_url = %self.target.manifest_url(),
            "Starting active fetcher"
        );

        'poll: loop {
            let state = *state_rx.borrow_and_update();
            if state == FetcherState::Stopped {
                break;
            }

            let tick_started = Instant::now();
            let outcome = self.tick().await;
            debug!(outcome = ?outcome, "Tick complete");

            loop {
                let deadline = next_deadline(tick_started, *interval_rx.borrow_and_update());
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    changed = interval_rx.changed() => {
                        if changed.is_err() {
                            break 'poll;
                        }
                        debug!(
                            interval_ms = self.interval().as_millis() as u64,
                            "Polling interval changed"
                        );
                    }
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break 'poll;
                        }
                        let state = *state_rx.borrow_and_update();
                        if state == FetcherState::Stopped {
                            break 'poll;
                        }
                    }
                }
            }
        }

        info!("Active fetcher stopped");
    }

    /// One poll-resolve-compare cycle.
    pub(crate) async fn tick(&self) -> TickOutcome {
        let token = match self.registry.fetch_token(&self.target).await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to fetch registry token, will retry");
                return TickOutcome::AuthFailed(e);
            }
        };

        let digest = match self.registry.resolve_digest(&self.target, &token).await {
            Ok(digest) => digest,
            Err(e) => {
                warn!(error = %e, "Failed to resolve image digest, will retry");
                return TickOutcome::ResolveFailed(e);
            }
        };

        if digest.is_empty() {
            warn!("Registry returned an empty digest, treating as unchanged");
            return TickOutcome::Unchanged;
        }

        {
            let mut last = self.poll.last_digest.write().await;
            if *last == digest {
                debug!(digest = %digest, "Digest unchanged");
                return TickOutcome::Unchanged;
            }

            info!(previous = %last, digest = %digest, "New image digest detected");
            *last = digest.clone();
        }

        self.trigger_update(&digest);
        TickOutcome::Updated { digest }
    }

    /// Hand the update to the updater and observe its outcome on a separate
    /// task.
    fn trigger_update(&self, digest: &str) {
        let version = self.target.version_ref();
        let handle = self
            .updater
            .update(self.target.service(), &version, self.span.clone());

        let digest = digest.to_string();
        tokio::spawn(
            async move {
                match handle.outcome().await {
                    Ok(()) => {
                        info!(version = %version, digest = %digest, "Service update completed");
                    }
                    Err(e) => {
                        error!(
                            error = %e,
                            version = %version,
                            digest = %digest,
                            "Service update failed"
                        );
                    }
                }
            }
            .instrument(self.span.clone()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoupdater_registry::RegistryConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::updater::{MockUpdater, UpdateCall};

    fn manifest(digest: &str) -> String {
        format!(
            r#"{{"schemaVersion":2,"config":{{"mediaType":"application/vnd.docker.container.image.v1+json","size":7619,"digest":"{digest}"}}}}"#
        )
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/token/lib/img"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"token":"T1"}"#))
            .mount(server)
            .await;
    }

    async fn mount_manifest(server: &MockServer, digest: &str) {
        server.reset().await;
        mount_token(server).await;
        Mock::given(method("GET"))
            .and(path("/v2/lib/img/manifests/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_string(manifest(digest)))
            .mount(server)
            .await;
    }

    fn test_fetcher(server: &MockServer, updater: Arc<MockUpdater>) -> ActiveFetcher {
        let target = FetchTarget::new("lib/img", "latest", "svc")
            .with_registry_url(server.uri())
            .with_token_template(format!("{}/token/{{scope}}", server.uri()));
        let registry = RegistryClient::new(RegistryConfig::default()).unwrap();
        ActiveFetcher::new(target, registry, updater)
    }

    fn expected_call() -> UpdateCall {
        UpdateCall {
            service: "svc".to_string(),
            version: "lib/img:latest".to_string(),
        }
    }

    #[tokio::test]
    async fn test_first_digest_triggers_update() {
        let server = MockServer::start().await;
        mount_manifest(&server, "sha256:AAA").await;
        let updater = Arc::new(MockUpdater::new());
        let fetcher = test_fetcher(&server, updater.clone());

        assert_eq!(fetcher.last_digest().await, "");
        let outcome = fetcher.tick().await;

        assert_eq!(
            outcome,
            TickOutcome::Updated {
                digest: "sha256:AAA".to_string()
            }
        );
        assert_eq!(fetcher.last_digest().await, "sha256:AAA");
        assert_eq!(updater.calls(), vec![expected_call()]);
    }

    #[tokio::test]
    async fn test_same_digest_updates_once() {
        let server = MockServer::start().await;
        mount_manifest(&server, "sha256:AAA").await;
        let updater = Arc::new(MockUpdater::new());
        let fetcher = test_fetcher(&server, updater.clone());

        fetcher.tick().await;
        assert_eq!(fetcher.tick().await, TickOutcome::Unchanged);
        assert_eq!(updater.call_count(), 1);
    }

    #[tokio::test]
    async fn test_changed_digest_updates_again() {
        let server = MockServer::start().await;
        mount_manifest(&server, "sha256:AAA").await;
        let updater = Arc::new(MockUpdater::new());
        let fetcher = test_fetcher(&server, updater.clone());

        fetcher.tick().await;
        mount_manifest(&server, "sha256:BBB").await;
        fetcher.tick().await;

        assert_eq!(fetcher.last_digest().await, "sha256:BBB");
        assert_eq!(updater.calls(), vec![expected_call(), expected_call()]);
    }

    #[tokio::test]
    async fn test_token_failure_leaves_state_untouched() {
        let server = MockServer::start().await;
        mount_manifest(&server, "sha256:AAA").await;
        let updater = Arc::new(MockUpdater::new());
        let fetcher = test_fetcher(&server, updater.clone());
        fetcher.tick().await;

        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/token/lib/img"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let outcome = fetcher.tick().await;
        assert!(matches!(outcome, TickOutcome::AuthFailed(_)));
        assert_eq!(fetcher.last_digest().await, "sha256:AAA");
        assert_eq!(updater.call_count(), 1);
    }

    #[tokio::test]
    async fn test_resolve_failure_leaves_state_untouched() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/v2/lib/img/manifests/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"config":{}}"#))
            .mount(&server)
            .await;
        let updater = Arc::new(MockUpdater::new());
        let fetcher = test_fetcher(&server, updater.clone());

        let outcome = fetcher.tick().await;
        assert!(matches!(outcome, TickOutcome::ResolveFailed(_)));
        assert_eq!(fetcher.last_digest().await, "");
        assert_eq!(updater.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_digest_is_unchanged() {
        let server = MockServer::start().await;
        mount_manifest(&server, "").await;
        let updater = Arc::new(MockUpdater::new());
        let fetcher = test_fetcher(&server, updater.clone());

        assert_eq!(fetcher.tick().await, TickOutcome::Unchanged);

        mount_manifest(&server, "sha256:AAA").await;
        fetcher.tick().await;
        mount_manifest(&server, "").await;
        assert_eq!(fetcher.tick().await, TickOutcome::Unchanged);

        assert_eq!(fetcher.last_digest().await, "sha256:AAA");
        assert_eq!(updater.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_update_keeps_digest() {
        let server = MockServer::start().await;
        mount_manifest(&server, "sha256:AAA").await;
        let updater = Arc::new(MockUpdater::failing());
        let fetcher = test_fetcher(&server, updater.clone());

        fetcher.tick().await;
        tokio::task::yield_now().await;
        assert_eq!(fetcher.tick().await, TickOutcome::Unchanged);

        assert_eq!(fetcher.last_digest().await, "sha256:AAA");
        assert_eq!(updater.call_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_span() {
        let server = MockServer::start().await;
        mount_manifest(&server, "sha256:AAA").await;
        let updater = Arc::new(MockUpdater::new());
        let fetcher =
            test_fetcher(&server, updater.clone()).with_span(info_span!("watch", service = "svc"));

        fetcher.tick().await;
        assert_eq!(updater.calls(), vec![expected_call()]);
    }

    #[tokio::test]
    async fn test_stop_is_noop_when_idle() {
        let server = MockServer::start().await;
        let fetcher = test_fetcher(&server, Arc::new(MockUpdater::new()));

        fetcher.stop();
        assert_eq!(fetcher.state(), FetcherState::Idle);
    }

    #[tokio::test]
    async fn test_set_interval() {
        let server = MockServer::start().await;
        let fetcher = test_fetcher(&server, Arc::new(MockUpdater::new()));
        assert_eq!(fetcher.interval(), DEFAULT_POLL_INTERVAL);

        fetcher.set_interval(Duration::from_secs(5));
        assert_eq!(fetcher.interval(), Duration::from_secs(5));

        fetcher.set_interval(Duration::ZERO);
        assert_eq!(fetcher.interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_next_deadline_saturates() {
        let now = Instant::now();
        assert_eq!(
            next_deadline(now, Duration::from_secs(5)),
            now + Duration::from_secs(5)
        );
        assert_eq!(next_deadline(now, Duration::MAX), now + FAR_FUTURE);
        assert_eq!(
            next_deadline(now, Duration::from_secs(u64::MAX)),
            now + FAR_FUTURE
        );
    }

    #[test]
    fn test_state_display() {
        assert_eq!(FetcherState::Idle.to_string(), "idle");
        assert_eq!(
            FetcherError::NotIdle(FetcherState::Stopped).to_string(),
            "fetcher can only be started once (current state: stopped)"
        );
    }
}
