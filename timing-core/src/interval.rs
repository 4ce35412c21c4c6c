//! A half-open/closed numeric range used to clamp a timing object's position.

/// A range over `f64`, with each bound independently present-or-absent and independently
/// inclusive-or-exclusive.
///
/// Absence of a bound is tracked explicitly (`Option<f64>`), never by a sentinel numeric value,
/// so that a bound of `0.0` is never confused with "no bound" — a prior JavaScript
/// implementation's `covers` used a falsy-numeric check that misfired when a bound was
/// legitimately `0`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Interval {
    low: Option<f64>,
    high: Option<f64>,
    low_inclusive: bool,
    high_inclusive: bool,
}

impl Interval {
    /// Build an interval. If both bounds are present and `low > high`, they are swapped,
    /// preserving which inclusivity flag travels with which original bound's value.
    pub fn new(
        low: Option<f64>,
        high: Option<f64>,
        low_inclusive: bool,
        high_inclusive: bool,
    ) -> Self {
        match (low, high) {
            (Some(l), Some(h)) if l > h => Interval {
                low: Some(h),
                high: Some(l),
                low_inclusive: high_inclusive,
                high_inclusive: low_inclusive,
            },
            _ => Interval {
                low,
                high,
                low_inclusive,
                high_inclusive,
            },
        }
    }

    /// A closed interval `[low, high]`.
    pub fn closed(low: f64, high: f64) -> Self {
        Interval::new(Some(low), Some(high), true, true)
    }

    /// The unbounded interval, `(-inf, +inf)`.
    pub fn unbounded() -> Self {
        Interval::new(None, None, true, true)
    }

    pub fn low(&self) -> Option<f64> {
        self.low
    }

    pub fn high(&self) -> Option<f64> {
        self.high
    }

    pub fn low_inclusive(&self) -> bool {
        self.low_inclusive
    }

    pub fn high_inclusive(&self) -> bool {
        self.high_inclusive
    }

    /// Whether `x` lies within this interval, respecting each side's inclusivity. A side with
    /// no bound never excludes `x`.
    pub fn covers(&self, x: f64) -> bool {
        let low_ok = match self.low {
            None => true,
            Some(l) if self.low_inclusive => x >= l,
            Some(l) => x > l,
        };
        let high_ok = match self.high {
            None => true,
            Some(h) if self.high_inclusive => x <= h,
            Some(h) => x < h,
        };
        low_ok && high_ok
    }

    /// Pin `x` into `[low, high]`. Both ends are treated as inclusive for clamping purposes
    /// regardless of this interval's own inclusivity flags: a clamped value must land *in* the
    /// interval to be useful, and an open bound has no representable closest interior point.
    /// A side with no bound leaves `x` unconstrained on that side.
    pub fn clamp(&self, x: f64) -> f64 {
        let x = match self.low {
            Some(l) if x < l => l,
            _ => x,
        };
        match self.high {
            Some(h) if x > h => h,
            _ => x,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn invariant_constructor_swaps_out_of_order_bounds() {
        let interval = Interval::new(Some(10.0), Some(-5.0), true, false);
        assert_eq!(interval.low(), Some(-5.0));
        assert_eq!(interval.high(), Some(10.0));
        // inclusivity travels with the value, not the position it was passed in
        assert!(interval.low_inclusive());
        assert!(!interval.high_inclusive());
    }

    #[rstest]
    #[case(Some(0.0), Some(10.0), true, true, 0.0, true)]
    #[case(Some(0.0), Some(10.0), false, true, 0.0, false)]
    #[case(Some(0.0), Some(10.0), true, true, 10.0, true)]
    #[case(Some(0.0), Some(10.0), true, false, 10.0, false)]
    #[case(None, Some(10.0), true, true, -1e9, true)]
    #[case(Some(0.0), None, true, true, 1e9, true)]
    fn covers_respects_inclusivity_and_unbounded_sides(
        #[case] low: Option<f64>,
        #[case] high: Option<f64>,
        #[case] low_inclusive: bool,
        #[case] high_inclusive: bool,
        #[case] x: f64,
        #[case] expected: bool,
    ) {
        let interval = Interval::new(low, high, low_inclusive, high_inclusive);
        assert_eq!(interval.covers(x), expected);
    }

    #[test]
    fn covers_zero_bound_is_not_confused_with_unbounded() {
        // The original JS falsy-numeric bug: a lower bound of exactly 0.0 must still exclude
        // negative numbers, not be silently treated as "no lower bound".
        let interval = Interval::new(Some(0.0), None, true, true);
        assert!(!interval.covers(-0.5));
        assert!(interval.covers(0.0));
        assert!(interval.covers(100.0));
    }

    #[test]
    fn clamp_pins_into_bounds() {
        let interval = Interval::closed(0.0, 10.0);
        assert_eq!(interval.clamp(-5.0), 0.0);
        assert_eq!(interval.clamp(15.0), 10.0);
        assert_eq!(interval.clamp(4.0), 4.0);
    }

    #[test]
    fn clamp_on_unbounded_side_leaves_value_unconstrained() {
        let interval = Interval::new(Some(0.0), None, true, true);
        assert_eq!(interval.clamp(1e12), 1e12);
        assert_eq!(interval.clamp(-1.0), 0.0);
    }
}
