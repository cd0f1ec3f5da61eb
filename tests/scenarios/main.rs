//! Scenario tests for the service runtime, driven through mock collaborators

mod helpers;

mod health_check;
mod retry_behavior;
mod scheduling;
mod session_semantics;
mod unit_of_work;
