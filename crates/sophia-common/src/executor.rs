//! The auto-execute batch. One run claims every eligible item per workspace
//! under the policy snapshot taken at the start, dispatches each claimed
//! effect, and records per-item results. Item failures never abort the rest
//! of the batch and never revert a claim.

use metrics::counter;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::dispatch::{EffectDispatcher, EffectRequest};
use crate::db::{
    self, ApprovalStorageError, CandidateStorageError, PgPool, SettingsStorageError,
};
use crate::model::{ApprovalItem, AutoExecuteSettings, ClaimOutcome};
use crate::run_id;

/// Infrastructure faults that abort the run before any item is claimed, or
/// between items without undoing claims already made.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Approvals(#[from] ApprovalStorageError),
    #[error(transparent)]
    Settings(#[from] SettingsStorageError),
    #[error(transparent)]
    Candidates(#[from] CandidateStorageError),
    #[error("workspace {0} has no auto-execute policy and no threshold override was given")]
    WorkspaceNotConfigured(String),
}

#[derive(Debug, Clone, Default)]
pub struct AutoExecuteOptions {
    /// Explicit workspaces to run, or every workspace with claimable items.
    /// An explicit list is a manual trigger and runs even where the policy
    /// is disabled; the discovery path skips disabled workspaces.
    pub workspaces: Option<Vec<String>>,
    /// Replaces the stored confidence threshold for this run only.
    pub threshold_override: Option<i32>,
    /// Also claim human-approved items waiting for execution.
    pub include_approved: bool,
    /// Cap on items claimed per workspace per run; 0 means the default.
    pub batch_limit: i64,
}

impl AutoExecuteOptions {
    fn effective_batch_limit(&self) -> i64 {
        if self.batch_limit > 0 {
            self.batch_limit
        } else {
            50
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WorkspaceReport {
    pub workspace_id: String,
    pub skipped_disabled: bool,
    pub considered: usize,
    pub executed: usize,
    pub failed: usize,
    pub already_moved: usize,
}

#[derive(Debug, Serialize)]
pub struct AutoExecuteReport {
    pub batch_id: String,
    pub workspaces: Vec<WorkspaceReport>,
}

impl AutoExecuteReport {
    pub fn total_executed(&self) -> usize {
        self.workspaces.iter().map(|w| w.executed).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.workspaces.iter().map(|w| w.failed).sum()
    }
}

struct PolicySnapshot {
    settings: AutoExecuteSettings,
    manual: bool,
}

impl PolicySnapshot {
    fn threshold(&self, options: &AutoExecuteOptions) -> i32 {
        options
            .threshold_override
            .unwrap_or(self.settings.confidence_threshold)
    }

    fn runnable(&self) -> bool {
        self.manual || self.settings.enabled
    }
}

/// Take the settings snapshot for every target workspace. Any storage fault
/// here aborts the run with nothing claimed.
async fn snapshot_policies(
    pool: &PgPool,
    options: &AutoExecuteOptions,
) -> Result<Vec<PolicySnapshot>, ExecutorError> {
    let (targets, manual) = match &options.workspaces {
        Some(explicit) => (explicit.clone(), true),
        None => (db::workspaces_with_claimable_items(pool).await?, false),
    };

    let mut snapshots = Vec::with_capacity(targets.len());
    for workspace_id in targets {
        let stored = db::get_settings(pool, &workspace_id).await?;
        if manual && stored.is_none() && options.threshold_override.is_none() {
            return Err(ExecutorError::WorkspaceNotConfigured(workspace_id));
        }
        snapshots.push(PolicySnapshot {
            settings: stored.unwrap_or_else(|| {
                crate::model::AutoExecuteSettings::defaults(&workspace_id)
            }),
            manual,
        });
    }
    Ok(snapshots)
}

/// Resolve the content the effect should carry: the chosen variant's text
/// for content-bearing actions, nothing for bookkeeping actions.
async fn resolve_content(
    pool: &PgPool,
    item: &ApprovalItem,
) -> Result<Option<String>, ExecutorError> {
    if !item.action_type.requires_content() {
        return Ok(None);
    }

    let candidate = db::get_candidate(pool, &item.candidate_id).await?;
    Ok(candidate.and_then(|c| {
        let index = item.chosen_variant.unwrap_or(0) as usize;
        c.variants.get(index).map(|v| v.content.clone())
    }))
}

async fn execute_item<D: EffectDispatcher>(
    pool: &PgPool,
    dispatcher: &D,
    item: &ApprovalItem,
    executed_by: &str,
) -> Result<Option<bool>, ExecutorError> {
    let claim = db::claim_for_execution(pool, item.id, executed_by).await?;
    let claimed = match claim {
        ClaimOutcome::Claimed(claimed) => claimed,
        ClaimOutcome::AlreadyMoved(status) => {
            info!(
                item_id = item.id,
                status = status.as_str(),
                "item moved before the claim; skipping"
            );
            return Ok(None);
        }
    };

    let content = resolve_content(pool, &claimed).await?;
    let candidate = db::get_candidate(pool, &claimed.candidate_id).await?;
    let request = EffectRequest {
        approval_item_id: claimed.id,
        candidate_id: claimed.candidate_id.clone(),
        workspace_id: claimed.workspace_id.clone(),
        action_type: claimed.action_type,
        channel: claimed.channel,
        target_contact_id: candidate
            .as_ref()
            .map(|c| c.target_contact_id.clone())
            .unwrap_or_default(),
        target_campaign_id: candidate.and_then(|c| c.target_campaign_id),
        scheduled_step_id: claimed.scheduled_step_id.clone(),
        content,
    };

    match dispatcher.dispatch(&request).await {
        Ok(()) => {
            db::record_execution_result(pool, claimed.id, None).await?;
            counter!("sophia_executor_effects_total", "result" => "ok").increment(1);
            Ok(Some(true))
        }
        Err(err) => {
            warn!(
                item_id = claimed.id,
                workspace_id = %claimed.workspace_id,
                error = %err,
                retryable = err.is_retryable(),
                "effect dispatch failed; claim stands"
            );
            db::record_execution_result(pool, claimed.id, Some(&err.to_string())).await?;
            counter!("sophia_executor_effects_total", "result" => "error").increment(1);
            Ok(Some(false))
        }
    }
}

/// Run one auto-execute batch. Eligibility and ordering are fixed by the
/// snapshot and the store's batch order, so two runs over the same state
/// visit items identically.
#[instrument(skip(pool, dispatcher, options))]
pub async fn run_auto_execute<D: EffectDispatcher>(
    pool: &PgPool,
    dispatcher: &D,
    options: &AutoExecuteOptions,
) -> Result<AutoExecuteReport, ExecutorError> {
    let batch_id = run_id::generate();
    let executed_by = format!("sophia-executor/{}", run_id::get());
    let snapshots = snapshot_policies(pool, options).await?;

    let mut reports = Vec::with_capacity(snapshots.len());
    for snapshot in snapshots {
        let workspace_id = snapshot.settings.workspace_id.clone();
        if !snapshot.runnable() {
            info!(workspace_id = %workspace_id, "auto-execute disabled; skipping");
            reports.push(WorkspaceReport {
                workspace_id,
                skipped_disabled: true,
                considered: 0,
                executed: 0,
                failed: 0,
                already_moved: 0,
            });
            continue;
        }

        let items = db::eligible_for_auto_execute(
            pool,
            &workspace_id,
            snapshot.threshold(options),
            options.include_approved,
            options.effective_batch_limit(),
        )
        .await?;

        let mut report = WorkspaceReport {
            workspace_id,
            skipped_disabled: false,
            considered: items.len(),
            executed: 0,
            failed: 0,
            already_moved: 0,
        };

        for item in &items {
            // A re-check against the item's own state happens inside the
            // claim; only infra errors propagate out of the loop.
            match execute_item(pool, dispatcher, item, &executed_by).await? {
                Some(true) => report.executed += 1,
                Some(false) => report.failed += 1,
                None => report.already_moved += 1,
            }
        }

        info!(
            workspace_id = %report.workspace_id,
            batch_id = %batch_id,
            considered = report.considered,
            executed = report.executed,
            failed = report.failed,
            already_moved = report.already_moved,
            "auto-execute batch finished for workspace"
        );
        reports.push(report);
    }

    counter!("sophia_executor_batches_total").increment(1);
    Ok(AutoExecuteReport {
        batch_id,
        workspaces: reports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_limit_defaults_when_unset() {
        let options = AutoExecuteOptions::default();
        assert_eq!(options.effective_batch_limit(), 50);

        let options = AutoExecuteOptions {
            batch_limit: 10,
            ..Default::default()
        };
        assert_eq!(options.effective_batch_limit(), 10);
    }

    #[test]
    fn override_replaces_the_stored_threshold() {
        let snapshot = PolicySnapshot {
            settings: AutoExecuteSettings::defaults("ws-1"),
            manual: false,
        };

        assert_eq!(snapshot.threshold(&AutoExecuteOptions::default()), 80);
        let options = AutoExecuteOptions {
            threshold_override: Some(95),
            ..Default::default()
        };
        assert_eq!(snapshot.threshold(&options), 95);
    }

    #[test]
    fn manual_runs_ignore_the_enabled_flag() {
        let disabled = PolicySnapshot {
            settings: AutoExecuteSettings::defaults("ws-1"),
            manual: false,
        };
        assert!(!disabled.runnable());

        let manual = PolicySnapshot {
            settings: AutoExecuteSettings::defaults("ws-1"),
            manual: true,
        };
        assert!(manual.runnable());
    }
}
