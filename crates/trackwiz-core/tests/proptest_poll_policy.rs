//! Property-based tests for poll timing and frame viewport mapping.

use std::time::Duration;

use proptest::prelude::*;

use trackwiz_core::poll::PollPolicy;
use trackwiz_core::view::{DISPLAY_MAX_HEIGHT, DISPLAY_MAX_WIDTH, FrameViewport};

// =============================================================================
// Strategies
// =============================================================================

fn arb_policy() -> impl Strategy<Value = PollPolicy> {
    (1u64..5_000, 0u64..60_000, 1.0f64..4.0).prop_map(|(interval, extra, factor)| {
        PollPolicy::new(
            Duration::from_millis(interval),
            Duration::from_millis(interval + extra),
            factor,
            None,
            None,
        )
    })
}

// =============================================================================
// Poll policy
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Delays start at the interval, never shrink and never pass the cap.
    #[test]
    fn delays_are_monotone_and_capped(policy in arb_policy(), attempts in 1u32..64) {
        prop_assert_eq!(policy.delay_for_attempt(0), policy.interval);
        let mut previous = Duration::ZERO;
        for attempt in 0..attempts {
            let delay = policy.delay_for_attempt(attempt);
            prop_assert!(delay >= previous, "attempt {} shrank", attempt);
            prop_assert!(delay <= policy.max_interval);
            previous = delay;
        }
    }

    /// An attempt bound is reached exactly at the configured count.
    #[test]
    fn attempt_bound_is_exact(max in 1u32..1000, attempts in 0u32..2000) {
        let policy = PollPolicy::new(
            Duration::from_millis(10),
            Duration::from_millis(10),
            1.0,
            Some(max),
            None,
        );
        prop_assert_eq!(policy.is_exhausted(attempts, Duration::ZERO), attempts >= max);
    }
}

// =============================================================================
// Viewport
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// The fitted frame fills the box along one axis and fits along both.
    #[test]
    fn fitted_frame_fits_box(w in 1u32..8000, h in 1u32..8000) {
        let viewport = FrameViewport::fit(w, h).expect("non-empty frame");
        let (dw, dh) = viewport.display_size();
        prop_assert!(dw <= DISPLAY_MAX_WIDTH && dh <= DISPLAY_MAX_HEIGHT);
        prop_assert!(dw == DISPLAY_MAX_WIDTH || dh == DISPLAY_MAX_HEIGHT);
    }

    /// Mapping a frame pixel to the display and back lands within one
    /// display pixel's worth of frame pixels.
    #[test]
    fn display_mapping_roundtrips(w in 16u32..4000, h in 16u32..4000, fx in 0.0f64..1.0, fy in 0.0f64..1.0) {
        let viewport = FrameViewport::fit(w, h).expect("non-empty frame");
        let x = ((w - 1) as f64 * fx) as u32;
        let y = ((h - 1) as f64 * fy) as u32;
        let (dx, dy) = viewport.to_display(x, y);
        let (bx, by) = viewport.to_frame(dx, dy).expect("inside the image");
        let tolerance = (1.0 / viewport.scale).ceil() as u32;
        prop_assert!(bx.abs_diff(x) <= tolerance, "x {} -> {}", x, bx);
        prop_assert!(by.abs_diff(y) <= tolerance, "y {} -> {}", y, by);
    }
}
