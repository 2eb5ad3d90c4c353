//! Learning feedback loop: turns accumulated decision outcomes into
//! bounded confidence-bias adjustments and human-readable patterns.
//!
//! The derivation is deliberately conservative: a group needs a minimum
//! sample size before it contributes at all, the deviation from the
//! neutral baseline must clear a margin, and the resulting bias is clamped
//! to ±15 points so a hot streak can never swing future scoring on its own.

use std::collections::HashMap;

use serde::Serialize;

use crate::model::{ActionType, Channel};

pub const MAX_BIAS_POINTS: f64 = 15.0;
const NEUTRAL_BASELINE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearningConfig {
    /// Groups smaller than this contribute no bias.
    pub min_samples: i64,
    /// Deviation from the 0.5 baseline must exceed this to count.
    pub margin: f64,
    /// Points of bias per unit of deviation.
    pub scale: f64,
    /// Cap on the revenue-derived secondary adjustment.
    pub revenue_nudge_cap: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_samples: 5,
            margin: 0.15,
            scale: 30.0,
            revenue_nudge_cap: 3.0,
        }
    }
}

impl LearningConfig {
    pub fn from_env() -> Self {
        fn parse<T: std::str::FromStr>(key: &str, default: T) -> T {
            std::env::var(key)
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(default)
        }

        let defaults = Self::default();
        Self {
            min_samples: parse("SOPHIA_LEARNING_MIN_SAMPLES", defaults.min_samples),
            margin: parse("SOPHIA_LEARNING_MARGIN", defaults.margin),
            scale: parse("SOPHIA_LEARNING_SCALE", defaults.scale),
            revenue_nudge_cap: parse(
                "SOPHIA_LEARNING_REVENUE_NUDGE_CAP",
                defaults.revenue_nudge_cap,
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BiasKey {
    workspace_id: String,
    action_type: ActionType,
    channel: Channel,
}

/// Signed confidence adjustments per (workspace, action type, channel).
/// Absent entries read as 0. Entries are clamped to ±15 on insert, so a
/// consumer can never observe an out-of-bounds bias.
#[derive(Debug, Clone, Default)]
pub struct BiasTable {
    entries: HashMap<BiasKey, f64>,
}

impl BiasTable {
    pub fn get(&self, workspace_id: &str, action_type: ActionType, channel: Channel) -> f64 {
        self.entries
            .get(&BiasKey {
                workspace_id: workspace_id.to_string(),
                action_type,
                channel,
            })
            .copied()
            .unwrap_or(0.0)
    }

    pub fn set(&mut self, workspace_id: &str, action_type: ActionType, channel: Channel, bias: f64) {
        self.entries.insert(
            BiasKey {
                workspace_id: workspace_id.to_string(),
                action_type,
                channel,
            },
            bias.clamp(-MAX_BIAS_POINTS, MAX_BIAS_POINTS),
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializable view of the table, in a stable order for the insight
    /// surface.
    pub fn entries(&self) -> Vec<BiasEntry> {
        let mut entries: Vec<BiasEntry> = self
            .entries
            .iter()
            .map(|(key, bias)| BiasEntry {
                workspace_id: key.workspace_id.clone(),
                action_type: key.action_type,
                channel: key.channel,
                bias: *bias,
            })
            .collect();
        entries.sort_by(|a, b| {
            (a.workspace_id.as_str(), a.action_type.as_str(), a.channel.as_str())
                .cmp(&(b.workspace_id.as_str(), b.action_type.as_str(), b.channel.as_str()))
        });
        entries
    }

    /// Nudge an existing entry (or create one) by a bounded secondary
    /// signal, keeping the total inside ±15.
    pub fn nudge(
        &mut self,
        workspace_id: &str,
        action_type: ActionType,
        channel: Channel,
        delta: f64,
    ) {
        let current = self.get(workspace_id, action_type, channel);
        self.set(workspace_id, action_type, channel, current + delta);
    }
}

/// Aggregated outcome counts for one (workspace, action type, channel)
/// group, as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupStats {
    pub workspace_id: String,
    pub action_type: ActionType,
    pub channel: Channel,
    pub total: i64,
    pub approvals: i64,
}

impl GroupStats {
    pub fn approval_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.approvals as f64 / self.total as f64
        }
    }
}

/// One bias table row as it leaves the service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BiasEntry {
    pub workspace_id: String,
    pub action_type: ActionType,
    pub channel: Channel,
    pub bias: f64,
}

/// A human-readable derivation result, surfaced through insights.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pattern {
    pub workspace_id: String,
    pub action_type: ActionType,
    pub channel: Channel,
    pub total: i64,
    pub approval_rate: f64,
    pub bias: f64,
}

/// The reporting surface for one workspace (or all of them).
#[derive(Debug, Clone, Serialize)]
pub struct Insights {
    pub total_decisions: i64,
    pub approval_rate: f64,
    pub patterns: Vec<Pattern>,
    pub bias_table: Vec<BiasEntry>,
}

/// Derive the bias table and pattern list from group statistics.
pub fn derive_bias_table(groups: &[GroupStats], config: &LearningConfig) -> (BiasTable, Vec<Pattern>) {
    let mut table = BiasTable::default();
    let mut patterns = Vec::new();

    for group in groups {
        if group.total < config.min_samples {
            continue;
        }

        let rate = group.approval_rate();
        let deviation = rate - NEUTRAL_BASELINE;
        if deviation.abs() <= config.margin {
            continue;
        }

        let bias = (deviation * config.scale).clamp(-MAX_BIAS_POINTS, MAX_BIAS_POINTS);
        table.set(&group.workspace_id, group.action_type, group.channel, bias);
        patterns.push(Pattern {
            workspace_id: group.workspace_id.clone(),
            action_type: group.action_type,
            channel: group.channel,
            total: group.total,
            approval_rate: rate,
            bias,
        });
    }

    (table, patterns)
}

/// Overall approval rate; 0 on an empty workspace rather than NaN.
pub fn approval_rate(total: i64, approvals: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (approvals as f64 / total as f64).clamp(0.0, 1.0)
    }
}

/// Fold the revenue signal in as a slow secondary input: channels whose
/// attributed revenue is mostly autonomous earn a small positive nudge,
/// capped well below the primary derivation.
pub fn fold_revenue_signal(
    table: &mut BiasTable,
    workspace_id: &str,
    channel_autonomous_share: &[(Channel, f64)],
    config: &LearningConfig,
) {
    for (channel, share) in channel_autonomous_share {
        let delta = ((share - NEUTRAL_BASELINE) * 2.0 * config.revenue_nudge_cap)
            .clamp(-config.revenue_nudge_cap, config.revenue_nudge_cap);
        if delta == 0.0 {
            continue;
        }
        for action_type in [ActionType::SendFollowUp, ActionType::ScheduleMeeting] {
            table.nudge(workspace_id, action_type, *channel, delta);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(total: i64, approvals: i64) -> GroupStats {
        GroupStats {
            workspace_id: "ws-1".into(),
            action_type: ActionType::SendFollowUp,
            channel: Channel::Email,
            total,
            approvals,
        }
    }

    #[test]
    fn small_groups_produce_no_bias() {
        let (table, patterns) =
            derive_bias_table(&[group(4, 4)], &LearningConfig::default());
        assert!(table.is_empty());
        assert!(patterns.is_empty());
    }

    #[test]
    fn deviation_within_margin_is_ignored() {
        // 0.6 deviates by 0.1, inside the 0.15 margin.
        let (table, _) = derive_bias_table(&[group(10, 6)], &LearningConfig::default());
        assert_eq!(table.get("ws-1", ActionType::SendFollowUp, Channel::Email), 0.0);
    }

    #[test]
    fn strong_approval_history_earns_positive_bias() {
        // 9/10 approvals: deviation 0.4, scaled by 30 then clamped to 12.
        let (table, patterns) = derive_bias_table(&[group(10, 9)], &LearningConfig::default());
        let bias = table.get("ws-1", ActionType::SendFollowUp, Channel::Email);
        assert!((bias - 12.0).abs() < 1e-9);
        assert_eq!(patterns.len(), 1);
        assert!((patterns[0].approval_rate - 0.9).abs() < 1e-9);
    }

    #[test]
    fn bias_is_clamped_to_fifteen_points() {
        // 20/20 approvals: deviation 0.5 scaled to 15, exactly the cap.
        let (table, _) = derive_bias_table(&[group(20, 20)], &LearningConfig::default());
        assert_eq!(table.get("ws-1", ActionType::SendFollowUp, Channel::Email), 15.0);

        // All rejections clamp at the negative cap.
        let (table, _) = derive_bias_table(&[group(20, 0)], &LearningConfig::default());
        assert_eq!(
            table.get("ws-1", ActionType::SendFollowUp, Channel::Email),
            -15.0
        );
    }

    #[test]
    fn repeated_nudges_cannot_escape_the_cap() {
        let mut table = BiasTable::default();
        for _ in 0..100 {
            table.nudge("ws-1", ActionType::SendFollowUp, Channel::Email, 5.0);
        }
        assert_eq!(table.get("ws-1", ActionType::SendFollowUp, Channel::Email), 15.0);
    }

    #[test]
    fn table_entries_surface_every_row_in_stable_order() {
        let mut table = BiasTable::default();
        table.set("ws-1", ActionType::SendFollowUp, Channel::Email, -3.0);
        table.set("ws-1", ActionType::ScheduleMeeting, Channel::Email, 6.0);

        let entries = table.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action_type, ActionType::ScheduleMeeting);
        assert_eq!(entries[0].bias, 6.0);
        assert_eq!(entries[1].action_type, ActionType::SendFollowUp);
        assert_eq!(entries[1].bias, -3.0);
    }

    #[test]
    fn approval_rate_of_empty_workspace_is_zero() {
        assert_eq!(approval_rate(0, 0), 0.0);
        assert_eq!(approval_rate(4, 2), 0.5);
    }

    #[test]
    fn revenue_signal_is_a_small_nudge() {
        let mut table = BiasTable::default();
        let config = LearningConfig::default();

        fold_revenue_signal(
            &mut table,
            "ws-1",
            &[(Channel::Email, 1.0)],
            &config,
        );

        let bias = table.get("ws-1", ActionType::SendFollowUp, Channel::Email);
        assert_eq!(bias, config.revenue_nudge_cap);
        assert!(bias <= MAX_BIAS_POINTS);
    }
}
