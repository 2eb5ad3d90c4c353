pub mod alerts;
pub mod approvals;
pub mod candidates;
pub mod executor;
pub mod health;
pub mod learning;
pub mod recommendations;
pub mod reports;
pub mod revenue;
pub mod settings;
