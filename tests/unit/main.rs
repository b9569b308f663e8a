//! Unit test suite entry point.

mod backoff_tests;
mod merge_policy_tests;
