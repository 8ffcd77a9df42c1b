// tests/property/retry_test.rs

//! Backoff delays stay inside `[base_delay, base_delay + max_jitter)`.

use proptest::prelude::*;
use std::time::Duration;
use zksession::config::RetryConfig;
use zksession::core::retry::RetryPolicy;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_backoff_within_bounds(
        base_ms in 0u64..5_000,
        jitter_ms in 0u64..5_000,
        capacity in 1usize..64,
    ) {
        let config = RetryConfig {
            base_delay: Duration::from_millis(base_ms),
            max_jitter: Duration::from_millis(jitter_ms),
            fail_fast_on_permanent: true,
        };
        let policy = RetryPolicy::new(capacity, config);
        prop_assert_eq!(policy.capacity(), capacity);
        prop_assert_eq!(policy.available_permits(), capacity);

        for _ in 0..16 {
            let delay = policy.backoff_delay();
            prop_assert!(delay >= Duration::from_millis(base_ms));
            if jitter_ms == 0 {
                prop_assert_eq!(delay, Duration::from_millis(base_ms));
            } else {
                prop_assert!(delay < Duration::from_millis(base_ms + jitter_ms));
            }
        }
    }
}
