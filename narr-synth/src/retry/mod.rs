//! Retry and fallback strategy
//!
//! Validation failures and transient engine failures share one path: the
//! failure is mapped to a [`RemediationTrigger`](narr_common::model::RemediationTrigger)
//! and the planner picks the next attempt from the engine's remediation table.

mod planner;

pub use planner::{AttemptPlan, AttemptTally, RetryDecision, RetryPlanner};
