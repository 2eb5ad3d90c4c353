use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::candidate::{ActionCandidate, ActionType, Channel};
use crate::model::outcome::{LearningOutcome, NewOutcome, UserDecision};

/// Lifecycle of an approval item. `Executed`, `Rejected` and `Overridden`
/// are terminal; once an item leaves `Pending` it never returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Executed,
    Rejected,
    Overridden,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Executed => "executed",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Overridden => "overridden",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "executed" => Some(ApprovalStatus::Executed),
            "rejected" => Some(ApprovalStatus::Rejected),
            "overridden" => Some(ApprovalStatus::Overridden),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApprovalStatus::Executed | ApprovalStatus::Rejected | ApprovalStatus::Overridden
        )
    }

    /// The full transition table. Anything not listed here is forbidden,
    /// which is what keeps the graph free of backward edges.
    pub fn can_transition_to(&self, next: ApprovalStatus) -> bool {
        use ApprovalStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Executed)
                | (Pending, Overridden)
                | (Approved, Executed)
                | (Approved, Overridden)
        )
    }
}

/// What the engine recommended for a candidate, also the priority class
/// used to order auto-execute batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    AutoExecute,
    Review,
    Escalate,
}

impl DecisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionType::AutoExecute => "auto_execute",
            DecisionType::Review => "review",
            DecisionType::Escalate => "escalate",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auto_execute" => Some(DecisionType::AutoExecute),
            "review" => Some(DecisionType::Review),
            "escalate" => Some(DecisionType::Escalate),
            _ => None,
        }
    }

    /// Batch ordering weight; higher runs first.
    pub fn priority(&self) -> i32 {
        match self {
            DecisionType::AutoExecute => 80,
            DecisionType::Review => 50,
            DecisionType::Escalate => 20,
        }
    }
}

/// The stateful unit tracked through the workflow, one per candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalItem {
    pub id: i64,
    pub candidate_id: String,
    pub workspace_id: String,
    pub action_type: ActionType,
    pub channel: Channel,
    pub status: ApprovalStatus,
    pub decision_type: DecisionType,
    pub priority: i32,
    pub biased_confidence: i32,
    pub reasoning: String,
    pub chosen_variant: Option<i32>,
    pub scheduled_step_id: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub override_reason: Option<String>,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    pub executed_by: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of `claim_for_execution`: either this caller won the item, or a
/// concurrent actor moved it first. The latter is a normal outcome, not an
/// error.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(Box<ApprovalItem>),
    AlreadyMoved(ApprovalStatus),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("approval item already exists for candidate {0}")]
    DuplicateCandidate(String),
    #[error("approval item {0} not found")]
    NotFound(i64),
}

/// In-memory counterpart of the `sophia.approval_items` table. The SQL
/// store implements the same transition table; this one is the unit-test
/// surface for the state machine and its learning-outcome side writes.
#[derive(Default)]
pub struct ApprovalLedger {
    pub items: Vec<ApprovalItem>,
    pub outcomes: Vec<LearningOutcome>,
    next_item_id: i64,
    next_outcome_id: i64,
}

impl ApprovalLedger {
    pub fn create(
        &mut self,
        candidate: &ActionCandidate,
        decision_type: DecisionType,
        biased_confidence: i32,
        chosen_variant: Option<i32>,
    ) -> Result<i64, LedgerError> {
        if self
            .items
            .iter()
            .any(|item| item.candidate_id == candidate.candidate_id)
        {
            return Err(LedgerError::DuplicateCandidate(
                candidate.candidate_id.clone(),
            ));
        }

        let now = Utc::now();
        self.next_item_id += 1;
        self.items.push(ApprovalItem {
            id: self.next_item_id,
            candidate_id: candidate.candidate_id.clone(),
            workspace_id: candidate.workspace_id.clone(),
            action_type: candidate.action_type,
            channel: candidate.channel,
            status: ApprovalStatus::Pending,
            decision_type,
            priority: decision_type.priority(),
            biased_confidence: biased_confidence.clamp(0, 100),
            reasoning: candidate.reasoning.clone(),
            chosen_variant,
            scheduled_step_id: candidate.scheduled_step_id.clone(),
            approved_by: None,
            approved_at: None,
            override_reason: None,
            attempt_count: 0,
            last_error: None,
            executed_by: None,
            executed_at: None,
            created_at: now,
            updated_at: now,
        });

        Ok(self.next_item_id)
    }

    pub fn get(&self, id: i64) -> Option<&ApprovalItem> {
        self.items.iter().find(|item| item.id == id)
    }

    fn index_of(&self, id: i64) -> Result<usize, LedgerError> {
        self.items
            .iter()
            .position(|item| item.id == id)
            .ok_or(LedgerError::NotFound(id))
    }

    fn record_outcome(&mut self, item: &ApprovalItem, outcome: NewOutcome) {
        self.next_outcome_id += 1;
        self.outcomes.push(LearningOutcome {
            id: self.next_outcome_id,
            approval_item_id: item.id,
            workspace_id: item.workspace_id.clone(),
            action_type: item.action_type,
            channel: item.channel,
            original_decision: item.decision_type,
            user_decision: outcome.user_decision,
            sophia_confidence: item.biased_confidence,
            sophia_reasoning: item.reasoning.clone(),
            user_feedback: outcome.user_feedback,
            applied_to_future: false,
            created_at: Utc::now(),
        });
    }

    /// Idempotent: approving anything no longer pending returns the current
    /// status unchanged and writes nothing.
    pub fn approve(
        &mut self,
        id: i64,
        approver: &str,
        chosen_variant: Option<i32>,
    ) -> Result<ApprovalStatus, LedgerError> {
        let idx = self.index_of(id)?;
        if self.items[idx].status != ApprovalStatus::Pending {
            return Ok(self.items[idx].status);
        }

        let modified = chosen_variant.is_some() && chosen_variant != self.items[idx].chosen_variant;
        let now = Utc::now();
        {
            let item = &mut self.items[idx];
            item.status = ApprovalStatus::Approved;
            item.approved_by = Some(approver.to_string());
            item.approved_at = Some(now);
            if let Some(variant) = chosen_variant {
                item.chosen_variant = Some(variant);
            }
            item.updated_at = now;
        }

        let item = self.items[idx].clone();
        self.record_outcome(
            &item,
            NewOutcome {
                user_decision: if modified {
                    UserDecision::Modified
                } else {
                    UserDecision::Approved
                },
                user_feedback: None,
            },
        );

        Ok(ApprovalStatus::Approved)
    }

    pub fn reject(&mut self, id: i64) -> Result<ApprovalStatus, LedgerError> {
        let idx = self.index_of(id)?;
        if self.items[idx].status != ApprovalStatus::Pending {
            return Ok(self.items[idx].status);
        }

        let now = Utc::now();
        {
            let item = &mut self.items[idx];
            item.status = ApprovalStatus::Rejected;
            item.updated_at = now;
        }

        let item = self.items[idx].clone();
        self.record_outcome(
            &item,
            NewOutcome {
                user_decision: UserDecision::Rejected,
                user_feedback: None,
            },
        );

        Ok(ApprovalStatus::Rejected)
    }

    /// Human skip with a reason; legal from any non-terminal state.
    pub fn override_item(&mut self, id: i64, reason: &str) -> Result<ApprovalStatus, LedgerError> {
        let idx = self.index_of(id)?;
        if self.items[idx].status.is_terminal() {
            return Ok(self.items[idx].status);
        }

        let now = Utc::now();
        {
            let item = &mut self.items[idx];
            item.status = ApprovalStatus::Overridden;
            item.override_reason = Some(reason.to_string());
            item.updated_at = now;
        }

        let item = self.items[idx].clone();
        self.record_outcome(
            &item,
            NewOutcome {
                user_decision: UserDecision::Modified,
                user_feedback: Some(reason.to_string()),
            },
        );

        Ok(ApprovalStatus::Overridden)
    }

    /// The atomic conditional transition: pending or approved becomes
    /// executed, anything else reports where the item already went. A claim
    /// from `pending` is an autonomous decision and writes the learning
    /// outcome; a claim from `approved` was already recorded at approval.
    pub fn claim_for_execution(
        &mut self,
        id: i64,
        executed_by: &str,
    ) -> Result<ClaimOutcome, LedgerError> {
        let idx = self.index_of(id)?;
        let previous = self.items[idx].status;

        if !previous.can_transition_to(ApprovalStatus::Executed) {
            return Ok(ClaimOutcome::AlreadyMoved(previous));
        }

        let now = Utc::now();
        {
            let item = &mut self.items[idx];
            item.status = ApprovalStatus::Executed;
            item.executed_by = Some(executed_by.to_string());
            item.executed_at = Some(now);
            item.updated_at = now;
        }

        let item = self.items[idx].clone();
        if previous == ApprovalStatus::Pending {
            self.record_outcome(
                &item,
                NewOutcome {
                    user_decision: UserDecision::AutoExecuted,
                    user_feedback: None,
                },
            );
        }

        Ok(ClaimOutcome::Claimed(Box::new(item)))
    }

    /// Record the result of the side-effect call after a successful claim.
    /// Failures never revert the claim; the item stays executed with the
    /// error on it for manual inspection.
    pub fn record_execution_result(
        &mut self,
        id: i64,
        result: Result<(), &str>,
    ) -> Result<(), LedgerError> {
        let idx = self.index_of(id)?;
        let item = &mut self.items[idx];
        item.attempt_count += 1;
        match result {
            Ok(()) => item.last_error = None,
            Err(message) => item.last_error = Some(message.to_string()),
        }
        item.updated_at = Utc::now();
        Ok(())
    }

    /// In-memory mirror of the store's claimable-items query: any pending
    /// item at or above the effective threshold, plus approved items when
    /// asked, in the batch order (priority, then confidence, then age,
    /// then id). The engine's band only sets priority; it never vetoes a
    /// claim the threshold allows.
    pub fn eligible_for_auto_execute(
        &self,
        workspace_id: &str,
        threshold: i32,
        include_approved: bool,
    ) -> Vec<i64> {
        let mut eligible: Vec<&ApprovalItem> = self
            .items
            .iter()
            .filter(|item| item.workspace_id == workspace_id)
            .filter(|item| match item.status {
                ApprovalStatus::Pending => item.biased_confidence >= threshold,
                ApprovalStatus::Approved => include_approved,
                _ => false,
            })
            .collect();
        eligible.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.biased_confidence.cmp(&a.biased_confidence))
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        eligible.into_iter().map(|item| item.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::candidate::ResponseVariant;

    fn candidate(candidate_id: &str) -> ActionCandidate {
        let mut c = ActionCandidate::new(
            candidate_id,
            "ws-1",
            ActionType::SendFollowUp,
            Channel::Email,
            "contact-1",
            90,
            "warm lead",
        );
        c.variants.push(ResponseVariant {
            content: "hello".into(),
            preferred: true,
        });
        c
    }

    fn ledger_with_item() -> (ApprovalLedger, i64) {
        let mut ledger = ApprovalLedger::default();
        let id = ledger
            .create(&candidate("cand-1"), DecisionType::AutoExecute, 90, Some(0))
            .unwrap();
        (ledger, id)
    }

    #[test]
    fn one_item_per_candidate() {
        let (mut ledger, _) = ledger_with_item();
        let err = ledger
            .create(&candidate("cand-1"), DecisionType::Review, 60, None)
            .unwrap_err();
        assert_eq!(err, LedgerError::DuplicateCandidate("cand-1".into()));
        assert_eq!(ledger.items.len(), 1);
    }

    #[test]
    fn sequence_step_follows_the_candidate_onto_the_item() {
        let mut ledger = ApprovalLedger::default();
        let mut c = candidate("cand-step");
        c.scheduled_step_id = Some("step-9".into());

        let id = ledger
            .create(&c, DecisionType::AutoExecute, 90, Some(0))
            .unwrap();

        assert_eq!(
            ledger.get(id).unwrap().scheduled_step_id.as_deref(),
            Some("step-9")
        );
    }

    #[test]
    fn approve_twice_is_one_transition_and_one_outcome() {
        let (mut ledger, id) = ledger_with_item();

        assert_eq!(ledger.approve(id, "amy", None), Ok(ApprovalStatus::Approved));
        assert_eq!(ledger.approve(id, "amy", None), Ok(ApprovalStatus::Approved));

        assert_eq!(ledger.outcomes.len(), 1);
        assert_eq!(ledger.outcomes[0].user_decision, UserDecision::Approved);
        assert_eq!(ledger.get(id).unwrap().approved_by.as_deref(), Some("amy"));
    }

    #[test]
    fn approving_with_a_different_variant_is_recorded_as_modified() {
        let (mut ledger, id) = ledger_with_item();

        ledger.approve(id, "amy", Some(2)).unwrap();

        assert_eq!(ledger.outcomes[0].user_decision, UserDecision::Modified);
        assert_eq!(ledger.get(id).unwrap().chosen_variant, Some(2));
    }

    #[test]
    fn reject_is_terminal_and_idempotent() {
        let (mut ledger, id) = ledger_with_item();

        assert_eq!(ledger.reject(id), Ok(ApprovalStatus::Rejected));
        assert_eq!(ledger.reject(id), Ok(ApprovalStatus::Rejected));
        assert_eq!(ledger.approve(id, "amy", None), Ok(ApprovalStatus::Rejected));

        assert_eq!(ledger.outcomes.len(), 1);
        assert_eq!(ledger.outcomes[0].user_decision, UserDecision::Rejected);
    }

    #[test]
    fn override_records_the_reason() {
        let (mut ledger, id) = ledger_with_item();
        ledger.approve(id, "amy", None).unwrap();

        let status = ledger.override_item(id, "campaign paused").unwrap();

        assert_eq!(status, ApprovalStatus::Overridden);
        let item = ledger.get(id).unwrap();
        assert_eq!(item.override_reason.as_deref(), Some("campaign paused"));
        // approve + override
        assert_eq!(ledger.outcomes.len(), 2);
        assert_eq!(
            ledger.outcomes[1].user_feedback.as_deref(),
            Some("campaign paused")
        );
    }

    #[test]
    fn claim_wins_exactly_once() {
        let (mut ledger, id) = ledger_with_item();

        let first = ledger.claim_for_execution(id, "executor-a").unwrap();
        let second = ledger.claim_for_execution(id, "executor-b").unwrap();

        assert!(matches!(first, ClaimOutcome::Claimed(_)));
        assert_eq!(
            second,
            ClaimOutcome::AlreadyMoved(ApprovalStatus::Executed)
        );
        assert_eq!(
            ledger.get(id).unwrap().executed_by.as_deref(),
            Some("executor-a")
        );
        // Exactly one auto_executed outcome from the claim race.
        assert_eq!(ledger.outcomes.len(), 1);
        assert_eq!(ledger.outcomes[0].user_decision, UserDecision::AutoExecuted);
    }

    #[test]
    fn human_decision_before_the_claim_cancels_auto_execution() {
        let (mut ledger, id) = ledger_with_item();
        ledger.reject(id).unwrap();

        let claim = ledger.claim_for_execution(id, "executor").unwrap();

        assert_eq!(claim, ClaimOutcome::AlreadyMoved(ApprovalStatus::Rejected));
        assert_eq!(ledger.get(id).unwrap().status, ApprovalStatus::Rejected);
    }

    #[test]
    fn claim_from_approved_does_not_duplicate_the_outcome() {
        let (mut ledger, id) = ledger_with_item();
        ledger.approve(id, "amy", None).unwrap();

        let claim = ledger.claim_for_execution(id, "executor").unwrap();

        assert!(matches!(claim, ClaimOutcome::Claimed(_)));
        assert_eq!(ledger.outcomes.len(), 1);
        assert_eq!(ledger.outcomes[0].user_decision, UserDecision::Approved);
    }

    #[test]
    fn execution_failure_is_recorded_without_reverting() {
        let (mut ledger, id) = ledger_with_item();
        ledger.claim_for_execution(id, "executor").unwrap();

        ledger
            .record_execution_result(id, Err("smtp timeout"))
            .unwrap();

        let item = ledger.get(id).unwrap();
        assert_eq!(item.status, ApprovalStatus::Executed);
        assert_eq!(item.attempt_count, 1);
        assert_eq!(item.last_error.as_deref(), Some("smtp timeout"));
    }

    #[test]
    fn threshold_selects_pending_items_whatever_their_band() {
        let mut ledger = ApprovalLedger::default();
        let high = ledger
            .create(&candidate("cand-92"), DecisionType::AutoExecute, 92, Some(0))
            .unwrap();
        let review = ledger
            .create(&candidate("cand-82"), DecisionType::Review, 82, None)
            .unwrap();
        let low = ledger
            .create(&candidate("cand-60"), DecisionType::Review, 60, None)
            .unwrap();

        let eligible = ledger.eligible_for_auto_execute("ws-1", 80, false);

        // 92 and the review-band 82 both clear the workspace threshold;
        // 60 stays behind for a human.
        assert_eq!(eligible, vec![high, review]);
        assert!(!eligible.contains(&low));
    }

    #[test]
    fn approved_items_skip_the_threshold_when_included() {
        let mut ledger = ApprovalLedger::default();
        let approved = ledger
            .create(&candidate("cand-a"), DecisionType::Review, 55, None)
            .unwrap();
        ledger.approve(approved, "amy", None).unwrap();

        assert!(ledger.eligible_for_auto_execute("ws-1", 80, false).is_empty());
        assert_eq!(
            ledger.eligible_for_auto_execute("ws-1", 80, true),
            vec![approved]
        );
    }

    #[test]
    fn no_backward_edges_exist() {
        use ApprovalStatus::*;
        for from in [Approved, Executed, Rejected, Overridden] {
            assert!(!from.can_transition_to(Pending));
        }
        for terminal in [Executed, Rejected, Overridden] {
            for next in [Pending, Approved, Executed, Rejected, Overridden] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn confidence_is_clamped_on_create() {
        let mut ledger = ApprovalLedger::default();
        let id = ledger
            .create(&candidate("cand-hot"), DecisionType::AutoExecute, 180, None)
            .unwrap();
        assert_eq!(ledger.get(id).unwrap().biased_confidence, 100);
    }
}
