use deadpool_postgres::PoolError;
use thiserror::Error;
use tokio_postgres::Error as PgError;
use tracing::{info, instrument};

use crate::db::{DbPoolError, PgPool};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("failed to run migration: {0}")]
    Postgres(#[from] PgError),
    #[error("failed to build pool: {0}")]
    PoolBuild(#[from] DbPoolError),
}

struct Migration {
    id: i32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        id: 1,
        description: "candidate intake, approval workflow and learning tables",
        sql: r#"
CREATE TABLE IF NOT EXISTS sophia.action_candidates (
    candidate_id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    action_type TEXT NOT NULL,
    channel TEXT NOT NULL,
    target_contact_id TEXT NOT NULL,
    target_campaign_id TEXT,
    variants JSONB NOT NULL DEFAULT '[]'::jsonb,
    raw_confidence INTEGER NOT NULL,
    reasoning TEXT NOT NULL DEFAULT '',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT chk_raw_confidence_range
        CHECK (raw_confidence >= 0 AND raw_confidence <= 100)
);

CREATE INDEX IF NOT EXISTS idx_action_candidates_workspace
    ON sophia.action_candidates(workspace_id, created_at DESC);

CREATE TABLE IF NOT EXISTS sophia.approval_items (
    id BIGSERIAL PRIMARY KEY,
    candidate_id TEXT NOT NULL UNIQUE
        REFERENCES sophia.action_candidates(candidate_id),
    workspace_id TEXT NOT NULL,
    action_type TEXT NOT NULL,
    channel TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    decision_type TEXT NOT NULL,
    priority INTEGER NOT NULL,
    biased_confidence INTEGER NOT NULL,
    reasoning TEXT NOT NULL DEFAULT '',
    chosen_variant INTEGER,
    scheduled_step_id TEXT,
    approved_by TEXT,
    approved_at TIMESTAMPTZ,
    override_reason TEXT,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    executed_by TEXT,
    executed_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT chk_biased_confidence_range
        CHECK (biased_confidence >= 0 AND biased_confidence <= 100),
    CONSTRAINT chk_attempt_count CHECK (attempt_count >= 0)
);

CREATE INDEX IF NOT EXISTS idx_approval_items_pending
    ON sophia.approval_items(workspace_id, priority DESC, biased_confidence DESC, created_at, id)
    WHERE status = 'pending';
CREATE INDEX IF NOT EXISTS idx_approval_items_workspace_status
    ON sophia.approval_items(workspace_id, status, created_at DESC);

CREATE TABLE IF NOT EXISTS sophia.learning_outcomes (
    id BIGSERIAL PRIMARY KEY,
    approval_item_id BIGINT NOT NULL REFERENCES sophia.approval_items(id),
    workspace_id TEXT NOT NULL,
    action_type TEXT NOT NULL,
    channel TEXT NOT NULL,
    original_decision TEXT NOT NULL,
    user_decision TEXT NOT NULL,
    sophia_confidence INTEGER NOT NULL,
    sophia_reasoning TEXT NOT NULL DEFAULT '',
    user_feedback TEXT,
    applied_to_future BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_learning_outcomes_group
    ON sophia.learning_outcomes(workspace_id, action_type, channel);
CREATE INDEX IF NOT EXISTS idx_learning_outcomes_unapplied
    ON sophia.learning_outcomes(workspace_id, created_at)
    WHERE applied_to_future = FALSE;

CREATE TABLE IF NOT EXISTS sophia.auto_execute_settings (
    workspace_id TEXT PRIMARY KEY,
    enabled BOOLEAN NOT NULL DEFAULT FALSE,
    confidence_threshold INTEGER NOT NULL DEFAULT 80,
    schedule_interval TEXT NOT NULL DEFAULT 'off',
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT chk_confidence_threshold_range
        CHECK (confidence_threshold >= 0 AND confidence_threshold <= 100)
);
"#,
    },
    Migration {
        id: 2,
        description: "alerts, recommendations and revenue attribution tables",
        sql: r#"
CREATE TABLE IF NOT EXISTS sophia.alerts (
    id BIGSERIAL PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    severity TEXT NOT NULL,
    dedupe_key TEXT NOT NULL,
    message TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    dismissed_at TIMESTAMPTZ,
    dismissed_by TEXT
);

-- One open alert per condition per workspace; dismissed rows stay as history.
CREATE UNIQUE INDEX IF NOT EXISTS uq_alerts_open
    ON sophia.alerts(workspace_id, dedupe_key)
    WHERE dismissed_at IS NULL;

CREATE TABLE IF NOT EXISTS sophia.recommendations (
    id BIGSERIAL PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    priority INTEGER NOT NULL,
    confidence INTEGER NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    reason TEXT NOT NULL,
    action_label TEXT NOT NULL,
    potential_impact TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    executed_at TIMESTAMPTZ,
    dismissed_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_recommendations_open
    ON sophia.recommendations(workspace_id, kind)
    WHERE status = 'pending';

CREATE TABLE IF NOT EXISTS sophia.touchpoints (
    id BIGSERIAL PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    deal_id TEXT NOT NULL,
    contact_id TEXT NOT NULL,
    channel TEXT NOT NULL,
    occurred_at TIMESTAMPTZ NOT NULL,
    autonomous BOOLEAN NOT NULL DEFAULT FALSE,
    approval_item_id BIGINT REFERENCES sophia.approval_items(id)
);

CREATE INDEX IF NOT EXISTS idx_touchpoints_deal
    ON sophia.touchpoints(workspace_id, deal_id, occurred_at);

CREATE TABLE IF NOT EXISTS sophia.revenue_attributions (
    id BIGSERIAL PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    deal_id TEXT NOT NULL UNIQUE,
    contact_id TEXT NOT NULL,
    deal_value_cents BIGINT NOT NULL,
    autonomous_majority BOOLEAN NOT NULL,
    touchpoints JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT chk_deal_value CHECK (deal_value_cents >= 0)
);
"#,
    },
    Migration {
        id: 3,
        description: "scheduled step id on candidate intake",
        sql: r#"
ALTER TABLE sophia.action_candidates
    ADD COLUMN IF NOT EXISTS scheduled_step_id TEXT;
"#,
    },
];

#[instrument(skip(pool))]
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrationError> {
    let mut client = pool.get().await?;
    client
        .batch_execute(
            "CREATE SCHEMA IF NOT EXISTS sophia;
             CREATE TABLE IF NOT EXISTS sophia.schema_migrations (
                id INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
             );",
        )
        .await?;

    for migration in MIGRATIONS {
        let already_applied: bool = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM sophia.schema_migrations WHERE id = $1)",
                &[&migration.id],
            )
            .await?
            .get(0);

        if already_applied {
            continue;
        }

        let tx = client.transaction().await?;
        tx.batch_execute(migration.sql).await?;
        tx.execute(
            "INSERT INTO sophia.schema_migrations (id, description) VALUES ($1, $2)",
            &[&migration.id, &migration.description],
        )
        .await?;
        tx.commit().await?;

        info!(
            id = migration.id,
            description = migration.description,
            "applied migration"
        );
    }

    Ok(())
}
