//! Debounced re-execution on every edit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::playground::executor::Playground;
use crate::playground::loader::{HttpFetcher, ModuleFetcher};
use crate::playground::output::OutputLine;

/// Where a [`LiveSession`] is in its edit cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    /// No edit is waiting and nothing is running.
    #[default]
    Idle,
    /// An edit is waiting for the debounce interval to pass.
    Pending,
    /// The latest edit is being executed.
    Running,
}

/// Re-runs the source after each edit once typing pauses.
///
/// Only the newest edit is ever executed to completion; its output replaces
/// the previous output in one step. Must be used inside a tokio runtime.
#[derive(Debug)]
pub struct LiveSession<F = HttpFetcher> {
    playground: Arc<Playground<F>>,
    pending: Mutex<Option<JoinHandle<()>>>,
    generation: Arc<AtomicU64>,
    output: Arc<watch::Sender<Vec<OutputLine>>>,
    state: Arc<watch::Sender<RunState>>,
}

impl<F: ModuleFetcher + 'static> LiveSession<F> {
    /// Create an idle session with empty output.
    pub fn new(playground: Playground<F>) -> Self {
        let (output, _) = watch::channel(Vec::new());
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            playground: Arc::new(playground),
            pending: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
            output: Arc::new(output),
            state: Arc::new(state),
        }
    }

    /// Record an edit, superseding any edit still waiting or running.
    pub fn edit(&self, source: impl Into<String>) {
        let source = source.into();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        self.state.send_replace(RunState::Pending);
        trace!(generation, "edit scheduled");

        let playground = Arc::clone(&self.playground);
        let latest = Arc::clone(&self.generation);
        let output = Arc::clone(&self.output);
        let state = Arc::clone(&self.state);
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(playground.config().debounce).await;
            if latest.load(Ordering::SeqCst) != generation {
                return;
            }
            state.send_replace(RunState::Running);
            let lines = playground.execute(&source).await;
            if latest.load(Ordering::SeqCst) != generation {
                debug!(generation, "discarding superseded run");
                return;
            }
            state.send_replace(RunState::Idle);
            output.send_replace(lines);
        }));
    }

    /// Receiver notified each time a run's output is published.
    pub fn subscribe(&self) -> watch::Receiver<Vec<OutputLine>> {
        self.output.subscribe()
    }

    /// Receiver of run state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// The current run state.
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Output of the most recent completed run.
    pub fn output(&self) -> Vec<OutputLine> {
        self.output.borrow().clone()
    }

    /// The playground runs are executed on.
    pub fn playground(&self) -> &Playground<F> {
        &self.playground
    }
}

impl<F> Drop for LiveSession<F> {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = pending.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playground::config::PlaygroundConfig;
    use crate::playground::limits::ExecutionLimits;
    use std::time::Duration;

    struct NoNetwork;

    impl ModuleFetcher for NoNetwork {
        async fn fetch(&self, url: &str) -> anyhow::Result<String> {
            anyhow::bail!("network disabled for {url}")
        }
    }

    fn session() -> LiveSession<NoNetwork> {
        let config = PlaygroundConfig::builder()
            .debounce(Duration::from_millis(20))
            .build();
        LiveSession::new(Playground::with_fetcher(config, NoNetwork))
    }

    #[tokio::test]
    async fn test_new_session_is_idle() {
        let session = session();
        assert_eq!(session.state(), RunState::Idle);
        assert!(session.output().is_empty());
    }

    #[tokio::test]
    async fn test_edit_publishes_output() {
        let session = session();
        let mut output = session.subscribe();
        session.edit("'hello'");
        assert_eq!(session.state(), RunState::Pending);

        output.changed().await.unwrap();
        let lines = output.borrow_and_update().clone();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].data[0].parsed().unwrap(), "hello");
        assert_eq!(session.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn test_only_last_edit_runs() {
        let session = session();
        let mut output = session.subscribe();
        session.edit("console.log('first')");
        session.edit("console.log('second')");
        session.edit("console.log('third')");

        output.changed().await.unwrap();
        let lines = output.borrow_and_update().clone();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].data[0].parsed().unwrap(), "third");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!output.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_running_edit_is_superseded() {
        let limits = ExecutionLimits {
            timeout: Duration::from_secs(5),
            max_iterations: u64::MAX / 8,
            max_depth: 80,
            max_array_size: 1_000,
        };
        let config = PlaygroundConfig::builder()
            .debounce(Duration::from_millis(20))
            .limits(limits)
            .build();
        let session = LiveSession::new(Playground::with_fetcher(config, NoNetwork));
        let mut output = session.subscribe();
        let mut state = session.subscribe_state();

        session.edit(
            "console.log('slow');\nconst end = Date.now() + 300;\nwhile (Date.now() < end) {}",
        );
        state
            .wait_for(|state| *state == RunState::Running)
            .await
            .unwrap();
        session.edit("console.log('fast')");

        output.changed().await.unwrap();
        let lines = output.borrow_and_update().clone();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].data[0].parsed().unwrap(), "fast");

        // Outlive the slow run; its output must never be published.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!output.has_changed().unwrap());
        assert_eq!(session.output()[0].data[0].parsed().unwrap(), "fast");
    }
}
