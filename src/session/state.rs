//! A session: one sandbox root, one policy, at most one live run.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::{debug, info};

use super::{RunId, SessionId};
use crate::approval::ApprovalBatch;
use crate::config::{RunConfig, Settings};
use crate::permissions::PermissionPolicy;
use crate::provider::ModelProvider;
use crate::run::{Dispatcher, RunController, RunHandle, RunOutcome, RunShared, RunState};
use crate::security::PathBoundary;
use crate::tools::{BuiltinExecutor, Decision, ToolExecutor};
use crate::{Error, Result};

struct SessionInner {
    id: SessionId,
    boundary: PathBoundary,
    policy: Arc<PermissionPolicy>,
    run_config: RunConfig,
    executor: Arc<dyn ToolExecutor>,
    provider: Arc<dyn ModelProvider>,
    active: Mutex<Option<RunId>>,
    runs: DashMap<RunId, Arc<RunShared>>,
}

/// Cheap to clone; clones share runs and configuration.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("boundary", &self.inner.boundary.root())
            .field("runs", &self.inner.runs.len())
            .finish()
    }
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn boundary(&self) -> &PathBoundary {
        &self.inner.boundary
    }

    pub fn policy(&self) -> &PermissionPolicy {
        &self.inner.policy
    }

    pub fn run_config(&self) -> &RunConfig {
        &self.inner.run_config
    }

    /// Starts a run for `prompt` on the current tokio runtime.
    ///
    /// Fails with [`Error::RunInProgress`] while an earlier run is live.
    pub fn submit(&self, prompt: impl Into<String>) -> Result<RunHandle> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::invalid_state("submit requires a tokio runtime"));
        }

        let mut active = self.inner.active.lock().unwrap_or_else(|e| e.into_inner());
        // A cancelled run stays live until its driver has sealed the outcome.
        if let Some(run_id) = *active
            && let Some(run) = self.inner.runs.get(&run_id)
            && run.outcome().is_none()
        {
            return Err(Error::RunInProgress { run_id });
        }

        let run_id = RunId::new();
        let shared = Arc::new(RunShared::new(run_id, self.inner.id));
        self.inner.runs.insert(run_id, Arc::clone(&shared));
        *active = Some(run_id);
        drop(active);

        let dispatcher = Dispatcher::new(
            self.inner.boundary.clone(),
            Arc::clone(&self.inner.policy),
            Arc::clone(&self.inner.executor),
            self.inner.run_config.clone(),
            shared.cancel_token().clone(),
        );
        info!(session_id = %self.inner.id, run_id = %run_id, "Run submitted");
        Ok(RunController::spawn(
            shared,
            Arc::clone(&self.inner.provider),
            dispatcher,
            self.inner.run_config.clone(),
            prompt.into(),
        ))
    }

    fn run(&self, run_id: RunId) -> Result<Arc<RunShared>> {
        self.inner
            .runs
            .get(&run_id)
            .map(|run| Arc::clone(run.value()))
            .ok_or(Error::UnknownRun(run_id))
    }

    /// The live run, if any. A run stays live until its outcome is sealed,
    /// even after it was cancelled.
    pub fn active_run(&self) -> Option<RunId> {
        let active = *self.inner.active.lock().unwrap_or_else(|e| e.into_inner());
        active.filter(|id| self.run(*id).is_ok_and(|run| run.outcome().is_none()))
    }

    pub fn decide(&self, run_id: RunId, call_id: &str, decision: Decision) -> Result<()> {
        self.run(run_id)?.decide(call_id, decision)
    }

    pub fn approve_all(&self, run_id: RunId) -> Result<usize> {
        self.run(run_id)?.approve_all()
    }

    pub fn reject_all(&self, run_id: RunId, reason: &str) -> Result<usize> {
        self.run(run_id)?.reject_all(reason)
    }

    /// Cancels the run. Returns false if it had already ended.
    pub fn cancel(&self, run_id: RunId) -> Result<bool> {
        let cancelled = self.run(run_id)?.cancel();
        if cancelled {
            debug!(session_id = %self.inner.id, run_id = %run_id, "Cancel requested");
        }
        Ok(cancelled)
    }

    pub fn run_state(&self, run_id: RunId) -> Result<RunState> {
        Ok(self.run(run_id)?.state())
    }

    pub fn pending_batch(&self, run_id: RunId) -> Result<Option<ApprovalBatch>> {
        Ok(self.run(run_id)?.pending_batch())
    }

    /// Outcome of a finished run; `None` while it is still going.
    pub fn outcome(&self, run_id: RunId) -> Result<Option<RunOutcome>> {
        Ok(self.run(run_id)?.outcome())
    }

    /// Drops a finished run from the session. Live runs are kept.
    pub fn forget(&self, run_id: RunId) -> Result<()> {
        if self.run(run_id)?.outcome().is_none() {
            return Err(Error::invalid_state(format!("run {} is still live", run_id)));
        }
        self.inner.runs.remove(&run_id);
        debug!(session_id = %self.inner.id, run_id = %run_id, "Run forgotten");
        Ok(())
    }

    /// Ids of every run this session still holds.
    pub fn runs(&self) -> Vec<RunId> {
        self.inner.runs.iter().map(|entry| *entry.key()).collect()
    }
}

#[derive(Default)]
pub struct SessionBuilder {
    working_dir: Option<PathBuf>,
    policy: Option<PermissionPolicy>,
    run_config: Option<RunConfig>,
    settings: Option<Settings>,
    provider: Option<Arc<dyn ModelProvider>>,
    executor: Option<Arc<dyn ToolExecutor>>,
}

impl SessionBuilder {
    /// Sandbox root. Defaults to the process working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn policy(mut self, policy: PermissionPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn run_config(mut self, config: RunConfig) -> Self {
        self.run_config = Some(config);
        self
    }

    /// Loaded settings. An explicit policy or run config takes precedence.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> Result<Session> {
        let provider = self
            .provider
            .ok_or_else(|| Error::Config("a model provider is required".into()))?;

        let working_dir = match self.working_dir {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        let boundary = PathBoundary::new(&working_dir)?;

        let policy = match (self.policy, &self.settings) {
            (Some(policy), _) => policy,
            (None, Some(settings)) => settings.to_policy()?,
            (None, None) => PermissionPolicy::default(),
        };
        let run_config = match (self.run_config, &self.settings) {
            (Some(config), _) => config,
            (None, Some(settings)) => settings.to_run_config()?,
            (None, None) => RunConfig::default(),
        };

        let id = SessionId::new();
        debug!(
            session_id = %id,
            boundary = %boundary.root().display(),
            mode = %policy.mode,
            "Session created"
        );

        Ok(Session {
            inner: Arc::new(SessionInner {
                id,
                boundary,
                policy: Arc::new(policy),
                run_config,
                executor: self
                    .executor
                    .unwrap_or_else(|| Arc::new(BuiltinExecutor::new())),
                provider,
                active: Mutex::new(None),
                runs: DashMap::new(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::approval::AutoApprover;
    use crate::provider::{ScriptedProvider, ScriptedTurn};
    use crate::run::{RunEvent, RunStatus};
    use crate::tools::{ExecutionContext, ToolParams, ToolResult};
    use tempfile::tempdir;

    fn session(dir: &std::path::Path, turns: Vec<ScriptedTurn>) -> Session {
        Session::builder()
            .working_dir(dir)
            .provider(Arc::new(ScriptedProvider::new(turns)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_provider() {
        let dir = tempdir().unwrap();
        let err = Session::builder().working_dir(dir.path()).build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_build_rejects_missing_root() {
        let dir = tempdir().unwrap();
        let err = Session::builder()
            .working_dir(dir.path().join("nope"))
            .provider(Arc::new(ScriptedProvider::new(vec![])))
            .build()
            .unwrap_err();
        assert!(!matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_settings_feed_policy() {
        let dir = tempdir().unwrap();
        let mut settings = Settings::default();
        settings.run.max_rounds = Some(3);
        let session = Session::builder()
            .working_dir(dir.path())
            .settings(settings)
            .provider(Arc::new(ScriptedProvider::new(vec![])))
            .build()
            .unwrap();
        assert_eq!(session.run_config().max_rounds, 3);
        assert!(!session.policy().blocklist.is_empty());
    }

    #[test]
    fn test_submit_outside_runtime() {
        let dir = tempdir().unwrap();
        let session = session(dir.path(), vec![ScriptedTurn::new().end_turn()]);
        assert!(matches!(
            session.submit("hi"),
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_one_live_run() {
        let dir = tempdir().unwrap();
        let session = session(
            dir.path(),
            vec![
                ScriptedTurn::new()
                    .tool("c1", ToolParams::write("a.txt", "x"))
                    .awaiting_results(),
                ScriptedTurn::new().end_turn(),
            ],
        );

        let mut first = session.submit("one").unwrap();
        while let Some(event) = first.next_event().await {
            if matches!(event, RunEvent::ApprovalRequested { .. }) {
                break;
            }
        }
        assert_eq!(session.active_run(), Some(first.id()));
        assert!(matches!(
            session.submit("two"),
            Err(Error::RunInProgress { run_id }) if run_id == first.id()
        ));

        session.approve_all(first.id()).unwrap();
        let outcome = first.wait().await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(session.active_run(), None);

        let second = session.submit("two").unwrap();
        let (_, outcome) = second.drive(&AutoApprover::approve_all()).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(session.runs().len(), 2);
    }

    struct Slow {
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ToolExecutor for Slow {
        async fn execute(&self, _: &ToolParams, _: &ExecutionContext) -> ToolResult {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(300)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            ToolResult::Empty
        }
    }

    #[tokio::test]
    async fn test_cancelled_run_stays_live_until_execution_ends() {
        let dir = tempdir().unwrap();
        let peak = Arc::new(AtomicUsize::new(0));
        let session = Session::builder()
            .working_dir(dir.path())
            .provider(Arc::new(ScriptedProvider::new(vec![
                ScriptedTurn::new()
                    .tool("r", ToolParams::read("a.txt"))
                    .end_turn(),
            ])))
            .executor(Arc::new(Slow {
                in_flight: Arc::default(),
                peak: Arc::clone(&peak),
            }))
            .build()
            .unwrap();

        let first = session.submit("one").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(session.cancel(first.id()).unwrap());
        assert_eq!(session.run_state(first.id()).unwrap(), RunState::Cancelled);
        assert_eq!(session.active_run(), Some(first.id()));
        assert!(matches!(
            session.submit("two"),
            Err(Error::RunInProgress { run_id }) if run_id == first.id()
        ));
        assert!(matches!(session.forget(first.id()), Err(Error::InvalidState(_))));

        let outcome = first.wait().await.unwrap();
        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert_eq!(session.active_run(), None);

        let second = session.submit("two").unwrap();
        second.wait().await.unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_forget_finished_run() {
        let dir = tempdir().unwrap();
        let session = session(dir.path(), vec![ScriptedTurn::new().end_turn()]);
        let handle = session.submit("hi").unwrap();
        let run_id = handle.id();
        handle.wait().await.unwrap();

        session.forget(run_id).unwrap();
        assert!(session.runs().is_empty());
        assert!(matches!(session.outcome(run_id), Err(Error::UnknownRun(_))));
        assert!(matches!(session.forget(run_id), Err(Error::UnknownRun(_))));
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let dir = tempdir().unwrap();
        let session = session(dir.path(), vec![]);
        let ghost = RunId::new();
        assert!(matches!(session.run_state(ghost), Err(Error::UnknownRun(id)) if id == ghost));
        assert!(matches!(session.cancel(ghost), Err(Error::UnknownRun(_))));
    }
}
