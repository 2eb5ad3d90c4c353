//! Recommendation derivation. Pure rules over insights and the current
//! auto-execute policy; persistence and the execute/dismiss lifecycle live
//! in `db::recommendations`.

use std::collections::HashMap;

use crate::learning::GroupStats;
use crate::model::{
    AutoExecuteSettings, Channel, RecommendationDraft, RecommendationKind,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecommendConfig {
    /// Overall approval rate needed to suggest enabling auto-execution.
    pub enable_rate: f64,
    /// Decisions needed before any suggestion is made.
    pub min_decisions: i64,
    /// Approval-rate gap between channels that suggests a switch.
    pub channel_gap: f64,
    /// Per-channel sample needed for the channel comparison.
    pub min_channel_samples: i64,
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            enable_rate: 0.8,
            min_decisions: 10,
            channel_gap: 0.3,
            min_channel_samples: 5,
        }
    }
}

impl RecommendConfig {
    pub fn from_env() -> Self {
        fn parse<T: std::str::FromStr>(key: &str, default: T) -> T {
            std::env::var(key)
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(default)
        }

        let defaults = Self::default();
        Self {
            enable_rate: parse("SOPHIA_RECOMMEND_ENABLE_RATE", defaults.enable_rate),
            min_decisions: parse("SOPHIA_RECOMMEND_MIN_DECISIONS", defaults.min_decisions),
            channel_gap: parse("SOPHIA_RECOMMEND_CHANNEL_GAP", defaults.channel_gap),
            min_channel_samples: parse(
                "SOPHIA_RECOMMEND_MIN_CHANNEL_SAMPLES",
                defaults.min_channel_samples,
            ),
        }
    }
}

/// Derive recommendation drafts for one workspace from its outcome groups
/// and current settings. The store skips drafts whose kind already has an
/// open recommendation, so repeated derivation does not stack duplicates.
pub fn derive_recommendations(
    settings: &AutoExecuteSettings,
    groups: &[GroupStats],
    config: &RecommendConfig,
) -> Vec<RecommendationDraft> {
    let mut drafts = Vec::new();

    let total: i64 = groups.iter().map(|g| g.total).sum();
    let approvals: i64 = groups.iter().map(|g| g.approvals).sum();
    if total < config.min_decisions {
        return drafts;
    }
    let rate = approvals as f64 / total as f64;

    if !settings.enabled && rate >= config.enable_rate {
        drafts.push(RecommendationDraft {
            kind: RecommendationKind::EnableAutoExecute,
            priority: 80,
            confidence: (rate * 100.0).round() as i32,
            title: "Enable auto-execution".into(),
            description: format!(
                "{:.0}% of {} recent proposals were approved; auto-execution is off",
                rate * 100.0,
                total
            ),
            reason: "approval rate consistently above the enable threshold".into(),
            action_label: "Enable auto-execute".into(),
            potential_impact: "removes manual review for high-confidence actions".into(),
        });
    }

    if settings.enabled {
        if rate >= config.enable_rate && settings.confidence_threshold > 60 {
            drafts.push(RecommendationDraft {
                kind: RecommendationKind::LowerThreshold,
                priority: 60,
                confidence: (rate * 100.0).round() as i32,
                title: format!(
                    "Lower the confidence threshold from {}",
                    settings.confidence_threshold
                ),
                description: format!(
                    "approvals run at {:.0}%; a lower threshold would automate more of them",
                    rate * 100.0
                ),
                reason: "humans rarely disagree with the engine at the current threshold".into(),
                action_label: "Lower threshold by 5".into(),
                potential_impact: "more actions execute without waiting on review".into(),
            });
        } else if rate < 0.5 {
            drafts.push(RecommendationDraft {
                kind: RecommendationKind::RaiseThreshold,
                priority: 85,
                confidence: ((1.0 - rate) * 100.0).round() as i32,
                title: format!(
                    "Raise the confidence threshold from {}",
                    settings.confidence_threshold
                ),
                description: format!(
                    "only {:.0}% of recent proposals were approved",
                    rate * 100.0
                ),
                reason: "low approval rate suggests the threshold admits weak proposals".into(),
                action_label: "Raise threshold by 5".into(),
                potential_impact: "fewer questionable actions execute autonomously".into(),
            });
        }
    }

    if let Some((strong, weak, gap)) = channel_imbalance(groups, config) {
        drafts.push(RecommendationDraft {
            kind: RecommendationKind::ChannelSwitch,
            priority: 55,
            confidence: (gap * 100.0).round().min(95.0) as i32,
            title: format!("Shift outreach from {} to {}", weak, strong),
            description: format!(
                "{} approvals outpace {} by {:.0} points",
                strong,
                weak,
                gap * 100.0
            ),
            reason: "one channel's outcomes consistently dominate another's".into(),
            action_label: format!("Switch affected contacts to {}", strong),
            potential_impact: "higher acceptance on the stronger channel".into(),
        });
    }

    drafts
}

/// Find the strongest and weakest channels by approval rate; report them
/// when the gap is wide enough to act on.
fn channel_imbalance(
    groups: &[GroupStats],
    config: &RecommendConfig,
) -> Option<(Channel, Channel, f64)> {
    let mut per_channel: HashMap<Channel, (i64, i64)> = HashMap::new();
    for group in groups {
        let entry = per_channel.entry(group.channel).or_default();
        entry.0 += group.total;
        entry.1 += group.approvals;
    }

    let rates: Vec<(Channel, f64)> = per_channel
        .into_iter()
        .filter(|(_, (total, _))| *total >= config.min_channel_samples)
        .map(|(channel, (total, approvals))| (channel, approvals as f64 / total as f64))
        .collect();

    let strongest = rates
        .iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;
    let weakest = rates
        .iter()
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;

    let gap = strongest.1 - weakest.1;
    if strongest.0 != weakest.0 && gap >= config.channel_gap {
        Some((strongest.0, weakest.0, gap))
    } else {
        None
    }
}

/// Apply an executed settings-kind recommendation to the workspace policy.
/// Channel recommendations carry no contact to act on, so executing one is
/// an acknowledgment and does not touch settings.
pub fn apply_to_settings(kind: RecommendationKind, settings: &mut AutoExecuteSettings) -> bool {
    match kind {
        RecommendationKind::EnableAutoExecute => {
            settings.enabled = true;
            true
        }
        RecommendationKind::LowerThreshold => {
            settings.confidence_threshold = (settings.confidence_threshold - 5).max(50);
            true
        }
        RecommendationKind::RaiseThreshold => {
            settings.confidence_threshold = (settings.confidence_threshold + 5).min(100);
            true
        }
        RecommendationKind::ChannelSwitch => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActionType;

    fn group(channel: Channel, total: i64, approvals: i64) -> GroupStats {
        GroupStats {
            workspace_id: "ws-1".into(),
            action_type: ActionType::SendFollowUp,
            channel,
            total,
            approvals,
        }
    }

    #[test]
    fn quiet_workspace_gets_no_recommendations() {
        let settings = AutoExecuteSettings::defaults("ws-1");
        let drafts = derive_recommendations(
            &settings,
            &[group(Channel::Email, 3, 3)],
            &RecommendConfig::default(),
        );
        assert!(drafts.is_empty());
    }

    #[test]
    fn high_approval_rate_suggests_enabling_auto_execute() {
        let settings = AutoExecuteSettings::defaults("ws-1");
        let drafts = derive_recommendations(
            &settings,
            &[group(Channel::Email, 20, 18)],
            &RecommendConfig::default(),
        );

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].kind, RecommendationKind::EnableAutoExecute);
        assert_eq!(drafts[0].confidence, 90);
    }

    #[test]
    fn low_approval_rate_suggests_raising_the_threshold() {
        let mut settings = AutoExecuteSettings::defaults("ws-1");
        settings.enabled = true;

        let drafts = derive_recommendations(
            &settings,
            &[group(Channel::Email, 20, 6)],
            &RecommendConfig::default(),
        );

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].kind, RecommendationKind::RaiseThreshold);
    }

    #[test]
    fn channel_gap_suggests_a_switch() {
        let mut settings = AutoExecuteSettings::defaults("ws-1");
        settings.enabled = true;

        let drafts = derive_recommendations(
            &settings,
            &[
                group(Channel::Email, 10, 9),
                group(Channel::Sms, 10, 2),
            ],
            &RecommendConfig::default(),
        );

        let switch = drafts
            .iter()
            .find(|d| d.kind == RecommendationKind::ChannelSwitch)
            .expect("channel switch draft");
        assert!(switch.title.contains("email"));
        assert!(switch.title.contains("sms"));
    }

    #[test]
    fn settings_kinds_apply_with_bounds() {
        let mut settings = AutoExecuteSettings::defaults("ws-1");
        assert!(apply_to_settings(
            RecommendationKind::EnableAutoExecute,
            &mut settings
        ));
        assert!(settings.enabled);

        settings.confidence_threshold = 52;
        apply_to_settings(RecommendationKind::LowerThreshold, &mut settings);
        assert_eq!(settings.confidence_threshold, 50);

        settings.confidence_threshold = 98;
        apply_to_settings(RecommendationKind::RaiseThreshold, &mut settings);
        assert_eq!(settings.confidence_threshold, 100);

        assert!(!apply_to_settings(
            RecommendationKind::ChannelSwitch,
            &mut settings
        ));
    }
}
