use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::handle::CancelToken;
use crate::asset::AssetProcessor;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::health::HealthChecker;
use crate::inventory::AssetInventory;
use crate::notification::{EventType, ExecutionEvent, Notifier};
use crate::plan::{Execution, ExecutionPhase, ExecutionPlan, ExecutionStatus, RollbackStrategy};
use crate::platform::PlatformRegistry;
use crate::store::{AuditEntry, ExecutionRecord, ExecutionStore};
use crate::tool::ToolRegistry;
use crate::utils::parse_duration;

/// Top-level orchestrator.
///
/// Accepts an approved execution plan, materializes durable execution
/// state, and drives phases sequentially on a dedicated background task
/// bounded by a hard ceiling. Cheap to clone; all state lives behind one
/// shared inner.
#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
}

pub(super) struct EngineInner {
    pub(super) config: EngineConfig,
    /// id -> execution. The background task is an execution's sole
    /// writer; readers take snapshots through the same lock.
    executions: RwLock<HashMap<String, Execution>>,
    /// id -> cancellation handle, removed when the background task ends.
    tokens: RwLock<HashMap<String, CancelToken>>,
    tools: Arc<ToolRegistry>,
    store: Arc<dyn ExecutionStore>,
    health: HealthChecker,
    pub(super) processor: AssetProcessor,
    notifier: Notifier,
}

impl ExecutionEngine {
    pub fn new(
        config: EngineConfig,
        platforms: Arc<PlatformRegistry>,
        tools: Arc<ToolRegistry>,
        inventory: Arc<dyn AssetInventory>,
        store: Arc<dyn ExecutionStore>,
    ) -> Self {
        Self::with_logs_dir(config, platforms, tools, inventory, store, None)
    }

    pub fn with_logs_dir(
        config: EngineConfig,
        platforms: Arc<PlatformRegistry>,
        tools: Arc<ToolRegistry>,
        inventory: Arc<dyn AssetInventory>,
        store: Arc<dyn ExecutionStore>,
        logs_dir: Option<PathBuf>,
    ) -> Self {
        let health = HealthChecker::new(config.health.clone());
        let processor = AssetProcessor::new(
            platforms,
            inventory,
            health.clone(),
            config.engine.clone(),
        );
        let notifier = Notifier::new(config.notification.clone(), logs_dir);

        Self {
            inner: Arc::new(EngineInner {
                config,
                executions: RwLock::new(HashMap::new()),
                tokens: RwLock::new(HashMap::new()),
                tools,
                store,
                health,
                processor,
                notifier,
            }),
        }
    }

    /// Submits an approved plan for execution.
    ///
    /// The plan is assumed pre-validated upstream; only shape is checked
    /// here. Returns immediately with the initial snapshot; progress is
    /// observed via `get_execution`. The background task is force-failed
    /// once the configured hard ceiling elapses.
    pub async fn execute(&self, plan: ExecutionPlan) -> Result<Execution> {
        if plan.phases.is_empty() {
            return Err(EngineError::InvalidInput(
                "execution plan has no phases".into(),
            ));
        }

        let execution = Execution::from_plan(&plan, plan.user_id.clone());
        let id = execution.id.clone();
        let token = CancelToken::new();

        {
            self.inner
                .executions
                .write()
                .await
                .insert(id.clone(), execution.clone());
            self.inner.tokens.write().await.insert(id.clone(), token.clone());
        }

        // Submission is only acknowledged once durable state exists.
        let record = ExecutionRecord::from_execution(
            &execution,
            vec![AuditEntry::new(
                "execution.created",
                format!("plan {} submitted by {}", plan.plan_id, execution.initiated_by),
            )],
        );
        if let Err(e) = self.inner.store.upsert(record).await {
            self.inner.executions.write().await.remove(&id);
            self.inner.tokens.write().await.remove(&id);
            return Err(e);
        }

        info!(
            execution_id = %id,
            plan_id = %plan.plan_id,
            phases = execution.total_phases(),
            "Execution submitted"
        );

        let inner = Arc::clone(&self.inner);
        let task_token = token.clone();
        let task_id = id.clone();
        let ceiling = Duration::from_secs(self.inner.config.engine.execution_timeout_secs);

        tokio::spawn(async move {
            let run = AssertUnwindSafe(inner.run_execution(&task_id, &plan, &task_token))
                .catch_unwind();

            tokio::select! {
                _ = task_token.cancelled() => {
                    inner.finalize_cancelled(&task_id).await;
                }
                outcome = tokio::time::timeout(ceiling, run) => match outcome {
                    Err(_) => inner.finalize_timeout(&task_id, ceiling).await,
                    Ok(Err(panic)) => inner.finalize_panic(&task_id, panic).await,
                    Ok(Ok(())) => {}
                }
            }

            inner.tokens.write().await.remove(&task_id);
        });

        Ok(execution)
    }

    /// Consistent snapshot of a live execution.
    pub async fn get_execution(&self, execution_id: &str) -> Result<Execution> {
        self.inner
            .executions
            .read()
            .await
            .get(execution_id)
            .cloned()
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))
    }

    pub async fn list_executions(&self) -> Vec<Execution> {
        let mut executions: Vec<Execution> =
            self.inner.executions.read().await.values().cloned().collect();
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        executions
    }

    /// Reloads an execution from the durable store. Phase progress comes
    /// back from the persisted name lists; per-asset detail is not
    /// preserved across a reload.
    pub async fn load_execution(&self, execution_id: &str) -> Result<Execution> {
        let record = self
            .inner
            .store
            .load(execution_id)
            .await?
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))?;
        record.to_execution()
    }

    /// Flips the status flag; the background loop observes the pause at
    /// the next phase boundary, never mid-phase.
    pub async fn pause(&self, execution_id: &str) -> Result<Execution> {
        let snapshot = self
            .inner
            .update_checked(execution_id, |e| {
                e.transition(ExecutionStatus::Paused, "Pause requested")
            })
            .await?;

        self.inner
            .persist(&snapshot, vec![AuditEntry::new("execution.paused", "")])
            .await;
        self.inner
            .notifier
            .notify(
                &ExecutionEvent::new(EventType::ExecutionPaused, execution_id)
                    .with_status(snapshot.status.as_str()),
            )
            .await;

        info!(execution_id, "Execution paused");
        Ok(snapshot)
    }

    pub async fn resume(&self, execution_id: &str) -> Result<Execution> {
        let snapshot = self
            .inner
            .update_checked(execution_id, |e| {
                e.transition(ExecutionStatus::Running, "Resume requested")
            })
            .await?;

        self.inner
            .persist(&snapshot, vec![AuditEntry::new("execution.resumed", "")])
            .await;
        self.inner
            .notifier
            .notify(
                &ExecutionEvent::new(EventType::ExecutionResumed, execution_id)
                    .with_status(snapshot.status.as_str()),
            )
            .await;

        info!(execution_id, "Execution resumed");
        Ok(snapshot)
    }

    /// Cancels a running or paused execution.
    ///
    /// Marks the execution cancelled, then fires its cancellation token
    /// so every suspension point in the background task returns promptly.
    /// Cancelling an execution in any other state is an error and leaves
    /// its stored status untouched.
    pub async fn cancel(&self, execution_id: &str) -> Result<Execution> {
        let snapshot = self
            .inner
            .update_checked(execution_id, |e| {
                if !e.status.can_cancel() {
                    return Err(EngineError::InvalidExecutionState {
                        expected: "running or paused".into(),
                        actual: e.status.to_string(),
                    });
                }
                e.transition(ExecutionStatus::Cancelled, "Cancellation requested")?;
                e.completed_at = Some(Utc::now());
                Ok(())
            })
            .await?;

        if let Some(token) = self.inner.tokens.read().await.get(execution_id) {
            token.cancel();
        }

        self.inner
            .persist(
                &snapshot,
                vec![AuditEntry::new("execution.cancelled", "requested by caller")],
            )
            .await;
        self.inner
            .notifier
            .notify(
                &ExecutionEvent::new(EventType::ExecutionCancelled, execution_id)
                    .with_status(snapshot.status.as_str()),
            )
            .await;

        info!(execution_id, "Execution cancelled");
        Ok(snapshot)
    }
}

impl EngineInner {
    async fn snapshot(&self, id: &str) -> Option<Execution> {
        self.executions.read().await.get(id).cloned()
    }

    /// Applies a mutation under the registry write lock and returns the
    /// resulting snapshot for persistence.
    pub(super) async fn update<F>(&self, id: &str, f: F) -> Option<Execution>
    where
        F: FnOnce(&mut Execution),
    {
        let mut map = self.executions.write().await;
        let execution = map.get_mut(id)?;
        f(execution);
        Some(execution.clone())
    }

    async fn update_checked<F>(&self, id: &str, f: F) -> Result<Execution>
    where
        F: FnOnce(&mut Execution) -> Result<()>,
    {
        let mut map = self.executions.write().await;
        let execution = map
            .get_mut(id)
            .ok_or_else(|| EngineError::ExecutionNotFound(id.to_string()))?;
        f(execution)?;
        Ok(execution.clone())
    }

    /// Upserts the durable row. Background persistence failures are
    /// logged, not fatal: a store outage must not abort a remediation
    /// already in flight.
    pub(super) async fn persist(&self, execution: &Execution, audit: Vec<AuditEntry>) {
        let record = ExecutionRecord::from_execution(execution, audit);
        if let Err(e) = self.store.upsert(record).await {
            warn!(execution_id = %execution.id, error = %e, "Failed to persist execution state");
        }
    }

    async fn run_execution(&self, id: &str, plan: &ExecutionPlan, token: &CancelToken) {
        let Some(snapshot) = self
            .update(id, |e| {
                if let Err(err) = e.transition(ExecutionStatus::Running, "Execution started") {
                    debug!(execution_id = %e.id, error = %err, "Skipping start transition");
                    return;
                }
                e.started_at = Some(Utc::now());
            })
            .await
        else {
            return;
        };

        if snapshot.status != ExecutionStatus::Running {
            return;
        }

        self.persist(&snapshot, vec![AuditEntry::new("execution.started", "")])
            .await;
        self.notifier
            .notify(
                &ExecutionEvent::new(EventType::ExecutionStarted, id)
                    .with_status(snapshot.status.as_str()),
            )
            .await;

        let total = plan.phases.len();
        for (index, phase) in plan.phases.iter().enumerate() {
            if token.is_cancelled() {
                return;
            }
            if !self.wait_while_paused(id, token).await {
                return;
            }

            let Some(snapshot) = self
                .update(id, |e| {
                    e.advance_to_phase(index);
                    e.phases[index].start();
                })
                .await
            else {
                return;
            };
            self.persist(
                &snapshot,
                vec![AuditEntry::new("phase.started", phase.name.clone())],
            )
            .await;
            self.notifier
                .notify(&ExecutionEvent::new(EventType::PhaseStarted, id).with_phase(&phase.name))
                .await;
            info!(execution_id = %id, phase = %phase.name, "Phase started");

            match self.run_phase(id, index, phase, token).await {
                Ok(()) => {
                    let Some(snapshot) = self.update(id, |e| e.phases[index].complete()).await
                    else {
                        return;
                    };
                    let progress = snapshot.progress();
                    self.persist(
                        &snapshot,
                        vec![AuditEntry::new("phase.completed", phase.name.clone())],
                    )
                    .await;
                    self.notifier
                        .notify(
                            &ExecutionEvent::new(EventType::PhaseCompleted, id)
                                .with_phase(&phase.name)
                                .with_progress(progress.completed, progress.total),
                        )
                        .await;
                    info!(execution_id = %id, phase = %phase.name, "Phase completed");

                    if index + 1 < total
                        && let Some(wait) = &phase.wait_after
                    {
                        if !self.wait_between_phases(id, index, wait, token).await {
                            return;
                        }
                    }
                }
                Err(EngineError::Cancelled) => return,
                Err(e) => {
                    let Some(snapshot) = self
                        .update(id, |exec| exec.phases[index].fail(e.to_string()))
                        .await
                    else {
                        return;
                    };
                    self.persist(
                        &snapshot,
                        vec![AuditEntry::new(
                            "phase.failed",
                            format!("{}: {}", phase.name, e),
                        )],
                    )
                    .await;
                    self.notifier
                        .notify(
                            &ExecutionEvent::new(EventType::PhaseFailed, id)
                                .with_phase(&phase.name)
                                .with_message(e.to_string()),
                        )
                        .await;
                    warn!(execution_id = %id, phase = %phase.name, error = %e, "Phase failed");

                    if self.handle_phase_failure(id, plan, phase, &e, token).await {
                        continue;
                    }
                    return;
                }
            }
        }

        let Some(snapshot) = self
            .update(id, |e| {
                if let Err(err) = e.transition(ExecutionStatus::Completed, "All phases completed")
                {
                    debug!(execution_id = %e.id, error = %err, "Skipping completion transition");
                    return;
                }
                e.completed_at = Some(Utc::now());
            })
            .await
        else {
            return;
        };

        let progress = snapshot.progress();
        self.persist(&snapshot, vec![AuditEntry::new("execution.completed", "")])
            .await;
        self.notifier
            .notify(
                &ExecutionEvent::new(EventType::ExecutionCompleted, id)
                    .with_status(snapshot.status.as_str())
                    .with_progress(progress.completed, progress.total),
            )
            .await;
        info!(execution_id = %id, "Execution completed");
    }

    /// Applies the phase failure policy. Returns true when the loop
    /// should continue to the next phase.
    async fn handle_phase_failure(
        &self,
        id: &str,
        plan: &ExecutionPlan,
        phase: &ExecutionPhase,
        failure: &EngineError,
        token: &CancelToken,
    ) -> bool {
        let armed = phase
            .rollback_trigger
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());

        match &plan.rollback {
            Some(rollback) if armed && rollback.strategy == RollbackStrategy::Auto => {
                let trigger = phase.rollback_trigger.clone().unwrap_or_default();
                if let Some(snapshot) = self
                    .update(id, |e| e.error = Some(failure.to_string()))
                    .await
                {
                    self.persist(
                        &snapshot,
                        vec![AuditEntry::new(
                            "rollback.triggered",
                            format!("phase {} trigger: {}", phase.name, trigger),
                        )],
                    )
                    .await;
                }

                self.run_rollback(id, rollback, token).await;

                let Some(snapshot) = self
                    .update(id, |e| {
                        if let Err(err) = e.transition(
                            ExecutionStatus::RolledBack,
                            "Auto-rollback after phase failure",
                        ) {
                            debug!(execution_id = %e.id, error = %err, "Skipping rollback transition");
                            return;
                        }
                        e.completed_at = Some(Utc::now());
                    })
                    .await
                else {
                    return false;
                };
                self.persist(
                    &snapshot,
                    vec![AuditEntry::new("execution.rolled_back", "")],
                )
                .await;
                self.notifier
                    .notify(
                        &ExecutionEvent::new(EventType::ExecutionRolledBack, id)
                            .with_status(snapshot.status.as_str())
                            .with_message(failure.to_string()),
                    )
                    .await;
                info!(execution_id = %id, "Execution rolled back");
                false
            }
            _ if phase.continue_on_fail => {
                info!(
                    execution_id = %id,
                    phase = %phase.name,
                    "Phase permitted to fail; continuing"
                );
                true
            }
            _ => {
                let Some(snapshot) = self
                    .update(id, |e| {
                        e.error = Some(failure.to_string());
                        if let Err(err) =
                            e.transition(ExecutionStatus::Failed, "Phase failed")
                        {
                            debug!(execution_id = %e.id, error = %err, "Skipping failed transition");
                            return;
                        }
                        e.completed_at = Some(Utc::now());
                    })
                    .await
                else {
                    return false;
                };
                self.persist(
                    &snapshot,
                    vec![AuditEntry::new("execution.failed", failure.to_string())],
                )
                .await;
                self.notifier
                    .notify(
                        &ExecutionEvent::new(EventType::ExecutionFailed, id)
                            .with_status(snapshot.status.as_str())
                            .with_message(failure.to_string()),
                    )
                    .await;
                false
            }
        }
    }

    async fn run_phase(
        &self,
        id: &str,
        index: usize,
        phase: &ExecutionPhase,
        token: &CancelToken,
    ) -> Result<()> {
        // Declarative tool actions run before any asset is touched.
        for tool_action in &phase.tool_actions {
            debug!(
                execution_id = %id,
                phase = %phase.name,
                tool = %tool_action.name,
                "Running tool action"
            );
            self.tools
                .invoke(&tool_action.name, &tool_action.params)
                .await?;
        }

        // Assets run strictly sequentially; the first failure stops the
        // phase and leaves the remaining assets pending.
        for (asset_index, asset) in phase.assets.iter().enumerate() {
            if token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            if let Some(snapshot) = self
                .update(id, |e| e.phases[index].assets[asset_index].start())
                .await
            {
                self.persist(&snapshot, Vec::new()).await;
            }

            match self
                .processor
                .process_asset(asset, phase.action, &phase.params)
                .await
            {
                Ok(result) if result.success => {
                    if let Some(snapshot) = self
                        .update(id, |e| {
                            e.phases[index].assets[asset_index].complete(result.output.clone())
                        })
                        .await
                    {
                        self.persist(&snapshot, Vec::new()).await;
                    }
                }
                Ok(result) => {
                    let message = result
                        .error
                        .clone()
                        .unwrap_or_else(|| "asset action failed".to_string());
                    if let Some(snapshot) = self
                        .update(id, |e| {
                            e.phases[index].assets[asset_index].fail(message.clone())
                        })
                        .await
                    {
                        self.persist(&snapshot, Vec::new()).await;
                    }
                    return Err(EngineError::Platform(format!(
                        "asset {}: {}",
                        asset.id, message
                    )));
                }
                Err(e) => {
                    if let Some(snapshot) = self
                        .update(id, |exec| {
                            exec.phases[index].assets[asset_index].fail(e.to_string())
                        })
                        .await
                    {
                        self.persist(&snapshot, Vec::new()).await;
                    }
                    return Err(e);
                }
            }
        }

        // Health gates: each check retries internally; the first
        // exhausted gate fails the phase.
        for check in &phase.health_checks {
            match self.health.check_with_retry(check).await {
                Ok(result) => {
                    self.update(id, |e| {
                        e.phases[index].record_metric(
                            format!("check:{}", check.name),
                            serde_json::json!({ "success": true, "attempts": result.attempts }),
                        );
                    })
                    .await;
                }
                Err(e) => {
                    if let Some(snapshot) = self
                        .update(id, |exec| {
                            exec.phases[index].record_metric(
                                format!("check:{}", check.name),
                                serde_json::json!({ "success": false }),
                            );
                            let failures = exec.phases[index]
                                .metrics
                                .get("health_check_failures")
                                .and_then(|v| v.as_u64())
                                .unwrap_or(0);
                            exec.phases[index].record_metric(
                                "health_check_failures",
                                serde_json::Value::from(failures + 1),
                            );
                        })
                        .await
                    {
                        self.persist(&snapshot, Vec::new()).await;
                    }
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Records the wake-up time, persists, and sleeps interruptibly.
    /// Returns false when cancellation cut the wait short.
    async fn wait_between_phases(
        &self,
        id: &str,
        index: usize,
        wait: &str,
        token: &CancelToken,
    ) -> bool {
        let duration = match parse_duration(wait) {
            Ok(d) => d,
            Err(e) => {
                warn!(execution_id = %id, wait, error = %e, "Invalid wait duration; skipping wait");
                return true;
            }
        };

        let wake_at = Utc::now()
            + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        if let Some(snapshot) = self
            .update(id, |e| e.phases[index].wait_until = Some(wake_at))
            .await
        {
            self.persist(&snapshot, Vec::new()).await;
        }
        debug!(execution_id = %id, wait, "Waiting before next phase");

        if !token.sleep(duration).await {
            return false;
        }

        if let Some(snapshot) = self
            .update(id, |e| e.phases[index].wait_until = None)
            .await
        {
            self.persist(&snapshot, Vec::new()).await;
        }
        true
    }

    /// Pause takes effect only here, at the phase boundary; mid-phase
    /// work is never interrupted by a pause request. Returns false when
    /// the execution left the running/paused pair.
    async fn wait_while_paused(&self, id: &str, token: &CancelToken) -> bool {
        loop {
            let status = match self.snapshot(id).await {
                Some(execution) => execution.status,
                None => return false,
            };
            match status {
                ExecutionStatus::Running => return true,
                ExecutionStatus::Paused => {
                    let poll = Duration::from_millis(self.config.engine.pause_poll_ms);
                    if !token.sleep(poll).await {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }

    /// Best-effort final write after the token tore the task down. The
    /// execution's own work is gone; this uses a fresh, short-lived path.
    async fn finalize_cancelled(&self, id: &str) {
        let Some(snapshot) = self
            .update(id, |e| {
                if !e.status.is_terminal() {
                    if let Err(err) =
                        e.transition(ExecutionStatus::Cancelled, "Cancellation observed")
                    {
                        debug!(execution_id = %e.id, error = %err, "Forcing cancelled status");
                        e.status = ExecutionStatus::Cancelled;
                    }
                    e.completed_at = Some(Utc::now());
                }
            })
            .await
        else {
            return;
        };

        self.persist(
            &snapshot,
            vec![AuditEntry::new(
                "execution.cancelled",
                "background task torn down",
            )],
        )
        .await;
        debug!(execution_id = %id, "Cancelled execution finalized");
    }

    async fn finalize_timeout(&self, id: &str, ceiling: Duration) {
        let message = format!("execution timed out after {}s", ceiling.as_secs());
        let Some(snapshot) = self
            .update(id, |e| {
                if e.status.is_terminal() {
                    return;
                }
                e.error = Some(message.clone());
                if let Err(err) =
                    e.transition(ExecutionStatus::Failed, "Hard execution ceiling reached")
                {
                    debug!(execution_id = %e.id, error = %err, "Forcing failed status");
                    e.status = ExecutionStatus::Failed;
                }
                e.completed_at = Some(Utc::now());
            })
            .await
        else {
            return;
        };

        self.persist(
            &snapshot,
            vec![AuditEntry::new("execution.timeout", message.clone())],
        )
        .await;
        self.notifier
            .notify(
                &ExecutionEvent::new(EventType::ExecutionFailed, id)
                    .with_status(snapshot.status.as_str())
                    .with_message(message),
            )
            .await;
        error!(execution_id = %id, "Execution force-failed after hard timeout");
    }

    /// A panic inside one execution degrades that execution to failed
    /// and never takes down sibling executions.
    async fn finalize_panic(&self, id: &str, panic: Box<dyn std::any::Any + Send>) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        let message = format!("panic during execution: {}", message);

        let Some(snapshot) = self
            .update(id, |e| {
                if e.status.is_terminal() {
                    return;
                }
                e.error = Some(message.clone());
                if let Err(err) = e.transition(ExecutionStatus::Failed, "Panic recovered") {
                    debug!(execution_id = %e.id, error = %err, "Forcing failed status");
                    e.status = ExecutionStatus::Failed;
                }
                e.completed_at = Some(Utc::now());
            })
            .await
        else {
            return;
        };

        self.persist(
            &snapshot,
            vec![AuditEntry::new("execution.panicked", message.clone())],
        )
        .await;
        self.notifier
            .notify(
                &ExecutionEvent::new(EventType::ExecutionFailed, id)
                    .with_status(snapshot.status.as_str())
                    .with_message(message.clone()),
            )
            .await;
        error!(execution_id = %id, error = %message, "Execution failed after panic");
    }
}
