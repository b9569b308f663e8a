use std::time::Duration;

use proptest::prelude::*;

use outpost::retry::RetryPolicy;

fn arb_policy() -> impl Strategy<Value = RetryPolicy> {
    (1u64..5000u64, 1u64..60_000u64, 1.0f64..4.0f64, 1u32..10u32).prop_map(
        |(base_ms, max_ms, multiplier, max_attempts)| RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier,
            request_timeout: Duration::from_secs(5),
        },
    )
}

proptest! {
    #[test]
    fn test_delay_never_exceeds_the_cap(policy in arb_policy(), attempt in 1u32..50u32) {
        prop_assert!(policy.delay_after(attempt) <= policy.max_delay);
    }

    #[test]
    fn test_schedule_is_monotone(policy in arb_policy(), attempt in 1u32..49u32) {
        // Multipliers of at least 1 can only grow the delay until the cap.
        prop_assert!(policy.delay_after(attempt) <= policy.delay_after(attempt + 1));
    }

    #[test]
    fn test_first_delay_is_the_base_or_the_cap(policy in arb_policy()) {
        let expected = policy.base_delay.min(policy.max_delay);
        prop_assert_eq!(policy.delay_after(1), expected);
    }

    #[test]
    fn test_schedule_has_no_jitter(policy in arb_policy(), attempt in 1u32..50u32) {
        prop_assert_eq!(policy.delay_after(attempt), policy.delay_after(attempt));
    }
}
