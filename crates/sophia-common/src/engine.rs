//! Pure decision engine: applies learned bias to a candidate's raw
//! confidence and classifies the resulting decision. No side effects; the
//! same candidate and bias table always produce the same decision.

use crate::learning::BiasTable;
use crate::model::{ActionCandidate, DecisionType, InvalidCandidate};

/// Confidence bands that map biased confidence to a decision class.
/// Tunable via env so operators can widen the review band without a deploy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// At or above this, the engine recommends autonomous execution.
    pub auto_band: i32,
    /// Below this, the engine recommends escalation to a human.
    pub escalate_band: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_band: 85,
            escalate_band: 40,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            auto_band: std::env::var("SOPHIA_ENGINE_AUTO_BAND")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.auto_band),
            escalate_band: std::env::var("SOPHIA_ENGINE_ESCALATE_BAND")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.escalate_band),
        }
    }
}

/// The engine's verdict for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub biased_confidence: i32,
    pub decision_type: DecisionType,
    /// Index into the candidate's variant list, when it has any.
    pub chosen_variant: Option<i32>,
    pub reasoning: String,
}

/// Evaluate a candidate against the current bias table.
///
/// biased = clamp(raw + bias, 0, 100); the bias itself is already bounded
/// to ±15 by the learning loop, but the clamp here is what the store
/// invariant relies on, so it is applied unconditionally.
pub fn evaluate(
    candidate: &ActionCandidate,
    bias: &BiasTable,
    config: &EngineConfig,
) -> Result<Decision, InvalidCandidate> {
    candidate.validate()?;

    let adjustment = bias.get(
        &candidate.workspace_id,
        candidate.action_type,
        candidate.channel,
    );
    let biased_confidence =
        ((candidate.raw_confidence as f64 + adjustment).round() as i32).clamp(0, 100);

    let decision_type = if biased_confidence >= config.auto_band {
        DecisionType::AutoExecute
    } else if biased_confidence < config.escalate_band {
        DecisionType::Escalate
    } else {
        DecisionType::Review
    };

    let chosen_variant = choose_variant(candidate);

    let reasoning = if adjustment == 0.0 {
        candidate.reasoning.clone()
    } else {
        format!(
            "{} (confidence adjusted {:+.1} from {} workspace outcomes)",
            candidate.reasoning,
            adjustment,
            candidate.action_type.as_str()
        )
    };

    Ok(Decision {
        biased_confidence,
        decision_type,
        chosen_variant,
        reasoning,
    })
}

/// Variant tie-break: the producer's preferred flag wins; otherwise the
/// first-listed variant. Deterministic by construction.
fn choose_variant(candidate: &ActionCandidate) -> Option<i32> {
    if candidate.variants.is_empty() {
        return None;
    }

    let preferred = candidate
        .variants
        .iter()
        .position(|variant| variant.preferred);

    Some(preferred.unwrap_or(0) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActionType, Channel, ResponseVariant};

    fn candidate(raw: i32) -> ActionCandidate {
        let mut c = ActionCandidate::new(
            "cand-1",
            "ws-1",
            ActionType::SendFollowUp,
            Channel::Email,
            "contact-1",
            raw,
            "replied positively last week",
        );
        c.variants.push(ResponseVariant {
            content: "variant a".into(),
            preferred: false,
        });
        c.variants.push(ResponseVariant {
            content: "variant b".into(),
            preferred: false,
        });
        c
    }

    #[test]
    fn no_bias_means_raw_confidence() {
        let decision = evaluate(&candidate(72), &BiasTable::default(), &EngineConfig::default())
            .unwrap();
        assert_eq!(decision.biased_confidence, 72);
        assert_eq!(decision.decision_type, DecisionType::Review);
    }

    #[test]
    fn bias_shifts_confidence_within_bounds() {
        let mut bias = BiasTable::default();
        bias.set("ws-1", ActionType::SendFollowUp, Channel::Email, 12.0);

        let decision =
            evaluate(&candidate(80), &bias, &EngineConfig::default()).unwrap();

        assert_eq!(decision.biased_confidence, 92);
        assert_eq!(decision.decision_type, DecisionType::AutoExecute);
        assert!(decision.reasoning.contains("+12.0"));
    }

    #[test]
    fn biased_confidence_is_clamped_to_percent_range() {
        let mut bias = BiasTable::default();
        bias.set("ws-1", ActionType::SendFollowUp, Channel::Email, 15.0);
        let high = evaluate(&candidate(95), &bias, &EngineConfig::default()).unwrap();
        assert_eq!(high.biased_confidence, 100);

        bias.set("ws-1", ActionType::SendFollowUp, Channel::Email, -15.0);
        let low = evaluate(&candidate(5), &bias, &EngineConfig::default()).unwrap();
        assert_eq!(low.biased_confidence, 0);
        assert_eq!(low.decision_type, DecisionType::Escalate);
    }

    #[test]
    fn preferred_variant_wins_else_first_listed() {
        let mut c = candidate(70);
        let decision = evaluate(&c, &BiasTable::default(), &EngineConfig::default()).unwrap();
        assert_eq!(decision.chosen_variant, Some(0));

        c.variants[1].preferred = true;
        let decision = evaluate(&c, &BiasTable::default(), &EngineConfig::default()).unwrap();
        assert_eq!(decision.chosen_variant, Some(1));
    }

    #[test]
    fn identical_inputs_yield_identical_decisions() {
        let c = candidate(64);
        let bias = BiasTable::default();
        let config = EngineConfig::default();

        let first = evaluate(&c, &bias, &config).unwrap();
        let second = evaluate(&c, &bias, &config).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn invalid_candidates_are_rejected_before_scoring() {
        let mut c = candidate(70);
        c.raw_confidence = 130;
        let err = evaluate(&c, &BiasTable::default(), &EngineConfig::default()).unwrap_err();
        assert_eq!(err, InvalidCandidate::ConfidenceOutOfRange(130));
    }

    #[test]
    fn bias_from_another_workspace_does_not_leak() {
        let mut bias = BiasTable::default();
        bias.set("ws-other", ActionType::SendFollowUp, Channel::Email, 15.0);

        let decision = evaluate(&candidate(70), &bias, &EngineConfig::default()).unwrap();

        assert_eq!(decision.biased_confidence, 70);
    }
}
