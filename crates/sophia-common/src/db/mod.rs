pub mod alerts;
pub mod approval_items;
pub mod candidates;
pub mod learning_outcomes;
pub mod migrations;
pub mod pool;
pub mod recommendations;
pub mod revenue;
pub mod settings;

// Keep re-exports unique so downstream crates see a single symbol per helper.
pub use alerts::{
    AlertStorageError, dismiss_alert, gather_signals, list_open_alerts, record_alerts,
};
pub use approval_items::{
    ApprovalFilter, ApprovalListResponse, ApprovalStorageError, Pagination, approve_item,
    claim_for_execution, create_approval, eligible_for_auto_execute, execution_stats, get_item,
    list_items, override_item, pending_backlog, record_execution_result, reject_item,
    workspaces_with_claimable_items,
};
pub use candidates::{CandidateStorageError, get_candidate, last_candidate_at};
pub use learning_outcomes::{
    OutcomeStorageError, group_stats, mark_applied, recent_outcomes, totals,
};
pub use migrations::{MigrationError, run_migrations};
pub use pool::{DbPoolError, PgPool, create_pool_from_env, create_pool_from_url};
pub use recommendations::{
    RecommendationStorageError, dismiss_recommendation, execute_recommendation,
    get_recommendation, list_pending_recommendations, record_recommendations,
};
pub use revenue::{
    RevenueStorageError, deal_touchpoints, get_attribution, list_attributions, record_touchpoint,
    revenue_summary, upsert_attribution,
};
pub use settings::{
    SettingsStorageError, effective_settings, get_settings, list_settings, upsert_settings,
};
