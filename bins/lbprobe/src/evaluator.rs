//! Test Evaluator - Outcome Classification
//!
//! **Core Responsibility:**
//! Compare what the API did against what the test case expected and assign a status.
//!
//! **Critical Properties:**
//! - Knows nothing about HTTP transport
//! - Knows nothing about threads, processes or schedulers
//! - Pure function: (test case, observed outcome) → ExecutionResult
//!
//! **Classification Rules:**
//! - call succeeded, SUCCESS expected → SUCCEEDED
//! - call rejected (auth, HTTP status or unapplied update), FAILURE expected → SUCCEEDED
//! - call succeeded, FAILURE expected → FAILED
//! - call rejected, SUCCESS expected → FAILED
//! - timeout, connection failure or malformed reply → ERRORED, whatever was expected

use crate::client::ClientError;
use lbprobe_common::types::{ExecutionResult, ExpectedOutcome, TestCase};
use std::time::Duration;

pub fn evaluate(case: &TestCase, observed: Result<(), ClientError>, duration: Duration) -> ExecutionResult {
    match (observed, case.expected_outcome) {
        (Ok(()), ExpectedOutcome::Success) => ExecutionResult::succeeded(&case.id, duration),
        (Ok(()), ExpectedOutcome::Failure) => ExecutionResult::failed(
            &case.id,
            duration,
            format!("expected {} to be rejected, but it succeeded", case.operation),
        ),
        (Err(e), ExpectedOutcome::Failure) if e.is_rejection() => ExecutionResult::succeeded(&case.id, duration),
        (Err(e), ExpectedOutcome::Success) if e.is_rejection() => {
            ExecutionResult::failed(&case.id, duration, format!("{} failed: {}", case.operation, e))
        }
        (Err(e), _) => ExecutionResult::errored(&case.id, duration, format!("{} errored: {}", case.operation, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::PoolState;
    use lbprobe_common::types::{Operation, TestStatus};

    /// Helper to create a test case
    fn make_test_case(operation: Operation, expected_outcome: ExpectedOutcome) -> TestCase {
        TestCase {
            id: "t-1".to_string(),
            name: "case".to_string(),
            operation,
            target_virtual_service: "vs-web".to_string(),
            expected_outcome,
            credentials: None,
        }
    }

    fn status_of(expected: ExpectedOutcome, observed: Result<(), ClientError>) -> TestStatus {
        let case = make_test_case(Operation::EnablePool, expected);
        evaluate(&case, observed, Duration::from_millis(7)).status
    }

    #[test]
    fn test_success_as_expected() {
        let case = make_test_case(Operation::Login, ExpectedOutcome::Success);
        let result = evaluate(&case, Ok(()), Duration::from_millis(42));

        assert_eq!(result.status, TestStatus::Succeeded);
        assert_eq!(result.test_id, "t-1");
        assert_eq!(result.duration, Duration::from_millis(42));
        assert!(result.detail.is_none());
    }

    #[test]
    fn test_rejection_when_success_expected() {
        let case = make_test_case(Operation::EnablePool, ExpectedOutcome::Success);
        let result = evaluate(&case, Err(ClientError::Api { status: 500 }), Duration::ZERO);

        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.detail.as_deref(), Some("enable_pool failed: API returned HTTP 500"));
    }

    #[test]
    fn test_negative_cases() {
        assert_eq!(
            status_of(ExpectedOutcome::Failure, Err(ClientError::Auth { status: 401 })),
            TestStatus::Succeeded
        );
        assert_eq!(
            status_of(ExpectedOutcome::Failure, Err(ClientError::Api { status: 404 })),
            TestStatus::Succeeded
        );
        assert_eq!(status_of(ExpectedOutcome::Failure, Ok(())), TestStatus::Failed);
    }

    #[test]
    fn test_unapplied_update_counts_as_rejection() {
        let mismatch = || ClientError::Mismatch {
            pool: "vs-web".into(),
            observed: PoolState::Enabled,
        };
        assert_eq!(status_of(ExpectedOutcome::Success, Err(mismatch())), TestStatus::Failed);
        assert_eq!(status_of(ExpectedOutcome::Failure, Err(mismatch())), TestStatus::Succeeded);
    }

    #[test]
    fn test_transport_problems_are_errors() {
        for expected in [ExpectedOutcome::Success, ExpectedOutcome::Failure] {
            assert_eq!(
                status_of(expected, Err(ClientError::Timeout("deadline".into()))),
                TestStatus::Errored
            );
            assert_eq!(
                status_of(expected, Err(ClientError::Malformed("no token".into()))),
                TestStatus::Errored
            );
        }
    }
}
