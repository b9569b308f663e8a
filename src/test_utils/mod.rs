//! Shared test utilities for outpost.

pub mod fixtures;
pub mod logging;
pub mod mock_remote;

/// Table-driven test case.
#[derive(Debug, Clone)]
pub struct TestCase<I, E> {
    pub name: &'static str,
    pub input: I,
    pub expected: E,
}

/// Run table-driven cases, reporting the failing case by name and input.
pub fn run_table_tests<I, E, F>(cases: Vec<TestCase<I, E>>, test_fn: F)
where
    I: std::fmt::Debug,
    E: std::fmt::Debug + PartialEq,
    F: Fn(&I) -> E,
{
    for case in cases {
        let actual = test_fn(&case.input);
        assert_eq!(
            actual, case.expected,
            "case '{}' failed for input {:?}",
            case.name, case.input
        );
    }
}
