//! Reverse-order rollback coordination.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::engine::EngineInner;
use super::handle::CancelToken;
use crate::plan::{PhaseStatus, RollbackPlan};
use crate::store::AuditEntry;
use crate::utils::parse_duration;

impl EngineInner {
    /// Walks the rollback plan's phases in reverse order, re-invoking the
    /// asset processor per asset with continue-on-error semantics.
    /// Best-effort throughout: a failing compensation is logged and the
    /// walk keeps going. The whole pass is bounded by the rollback
    /// timeout.
    pub(super) async fn run_rollback(&self, id: &str, rollback: &RollbackPlan, token: &CancelToken) {
        let timeout = rollback
            .timeout
            .as_deref()
            .and_then(|raw| parse_duration(raw).ok())
            .unwrap_or_else(|| Duration::from_secs(self.config.engine.rollback_timeout_secs));

        info!(
            execution_id = %id,
            phases = rollback.phases.len(),
            timeout_secs = timeout.as_secs(),
            "Starting rollback"
        );

        if tokio::time::timeout(timeout, self.rollback_pass(id, rollback, token))
            .await
            .is_err()
        {
            warn!(
                execution_id = %id,
                timeout_secs = timeout.as_secs(),
                "Rollback pass timed out"
            );
        }
    }

    async fn rollback_pass(&self, id: &str, rollback: &RollbackPlan, token: &CancelToken) {
        for phase in rollback.phases.iter().rev() {
            if token.is_cancelled() {
                warn!(execution_id = %id, "Rollback interrupted by cancellation");
                return;
            }

            debug!(execution_id = %id, phase = %phase.name, "Rolling back phase");

            for asset in &phase.assets {
                match self
                    .processor
                    .process_asset(asset, phase.action, &phase.params)
                    .await
                {
                    Ok(result) if result.success => {
                        debug!(
                            execution_id = %id,
                            asset_id = %asset.id,
                            "Rollback action completed"
                        );
                    }
                    Ok(result) => {
                        warn!(
                            execution_id = %id,
                            asset_id = %asset.id,
                            error = ?result.error,
                            "Rollback action failed; continuing"
                        );
                    }
                    Err(e) => {
                        warn!(
                            execution_id = %id,
                            asset_id = %asset.id,
                            error = %e,
                            "Rollback action failed; continuing"
                        );
                    }
                }
            }

            // Reflect the compensation on the matching forward phase.
            if let Some(snapshot) = self
                .update(id, |e| {
                    if let Some(forward) = e.phases.iter_mut().find(|p| {
                        p.name == phase.name
                            && matches!(p.status, PhaseStatus::Completed | PhaseStatus::Failed)
                    }) {
                        forward.mark_rolled_back();
                    }
                })
                .await
            {
                self.persist(
                    &snapshot,
                    vec![AuditEntry::new("rollback.phase", phase.name.clone())],
                )
                .await;
            }
        }
    }
}
