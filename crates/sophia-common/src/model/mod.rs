pub mod alert;
pub mod approval;
pub mod candidate;
pub mod outcome;
pub mod recommendation;
pub mod settings;

pub use alert::{Alert, AlertDraft, AlertSeverity};
pub use approval::{
    ApprovalItem, ApprovalLedger, ApprovalStatus, ClaimOutcome, DecisionType, LedgerError,
};
pub use candidate::{ActionCandidate, ActionType, Channel, InvalidCandidate, ResponseVariant};
pub use outcome::{LearningOutcome, NewOutcome, UserDecision};
pub use recommendation::{
    Recommendation, RecommendationDraft, RecommendationKind, RecommendationStatus,
};
pub use settings::{AutoExecuteSettings, ScheduleInterval};
