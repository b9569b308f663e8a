//! Backoff schedule tables across policy shapes.

use std::time::Duration;

use outpost::config::RetryConfig;
use outpost::retry::RetryPolicy;
use outpost::test_utils::{TestCase, run_table_tests};

fn policy(base_ms: u64, max_ms: u64, multiplier: f64) -> RetryPolicy {
    RetryPolicy {
        max_attempts: 10,
        base_delay: Duration::from_millis(base_ms),
        max_delay: Duration::from_millis(max_ms),
        multiplier,
        request_timeout: Duration::from_secs(10),
    }
}

#[test]
fn doubling_schedule_reaches_the_cap() {
    run_table_tests(
        vec![
            TestCase {
                name: "first failure waits the base delay",
                input: 1u32,
                expected: 1_000u64,
            },
            TestCase {
                name: "second failure doubles",
                input: 2,
                expected: 2_000,
            },
            TestCase {
                name: "third failure doubles again",
                input: 3,
                expected: 4_000,
            },
            TestCase {
                name: "fifth failure is still below the cap",
                input: 5,
                expected: 16_000,
            },
            TestCase {
                name: "sixth failure hits the cap",
                input: 6,
                expected: 30_000,
            },
            TestCase {
                name: "far past the cap stays capped",
                input: 60,
                expected: 30_000,
            },
        ],
        |attempt| policy(1_000, 30_000, 2.0).delay_after(*attempt).as_millis() as u64,
    );
}

#[test]
fn multiplier_one_is_a_constant_schedule() {
    run_table_tests(
        vec![
            TestCase {
                name: "attempt 1",
                input: 1u32,
                expected: 500u64,
            },
            TestCase {
                name: "attempt 4",
                input: 4,
                expected: 500,
            },
            TestCase {
                name: "attempt 20",
                input: 20,
                expected: 500,
            },
        ],
        |attempt| policy(500, 30_000, 1.0).delay_after(*attempt).as_millis() as u64,
    );
}

#[test]
fn base_above_cap_is_capped_from_the_start() {
    let policy = policy(5_000, 2_000, 2.0);
    assert_eq!(policy.delay_after(1), Duration::from_millis(2_000));
    assert_eq!(policy.delay_after(2), Duration::from_millis(2_000));
}

#[test]
fn default_budget_sleeps_exactly_twice() {
    // Three attempts mean two sleeps; with the shipped defaults those are
    // 1s and 2s.
    let policy = RetryPolicy::default();
    assert_eq!(policy.max_attempts, 3);
    assert_eq!(policy.delay_after(1), Duration::from_secs(1));
    assert_eq!(policy.delay_after(2), Duration::from_secs(2));
}

#[test]
fn zero_attempt_config_is_clamped_to_one() {
    let config = RetryConfig {
        max_attempts: 0,
        ..RetryConfig::default()
    };
    assert_eq!(RetryPolicy::from(&config).max_attempts, 1);
}
