//! Single-test execution wrapper.

use super::TestResult;
use crate::klog::{KlogLevel, log_args};

/// Run one test function, logging its name and outcome.
pub fn run_single_test<F>(name: &str, test_fn: F) -> TestResult
where
    F: FnOnce() -> TestResult,
{
    let result = test_fn();
    match result {
        TestResult::Pass => {
            log_args(KlogLevel::Debug, format_args!("  [ok]   {name}"));
        }
        TestResult::Skipped => {
            log_args(KlogLevel::Debug, format_args!("  [skip] {name}"));
        }
        TestResult::Fail | TestResult::Panic => {
            log_args(KlogLevel::Info, format_args!("  [FAIL] {name}"));
        }
    }
    result
}
