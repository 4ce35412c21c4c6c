//! The state vector: the immutable 4-tuple (position, velocity, acceleration, timestamp)
//! that a timing resource extrapolates to answer "where are we now".

use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Tolerance used when comparing floating point quantities derived from a [`StateVector`].
///
/// Two positions, velocities or accelerations within this tolerance of each other are
/// considered equal. This keeps [`StateVector::compare_to`] well-behaved in the presence of
/// the rounding error that accumulates from repeated extrapolation.
pub const EPSILON: f64 = 1e-9;

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= EPSILON
}

/// Sign of motion at a point in time, derived from velocity and, when velocity is
/// (tolerance-)zero, from acceleration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Backwards,
    Stationary,
    Forwards,
}

/// An immutable description of one-dimensional motion: a position, velocity and acceleration
/// valid as of `timestamp`.
///
/// `timestamp` lives in whatever clock frame the caller is working in (local wall clock or the
/// server's reference clock) — the type itself does not know or care which. Callers must keep
/// track of which frame a given `StateVector` was stamped in; mixing frames when comparing or
/// extrapolating silently produces a vector with no useful meaning.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct StateVector {
    pub position: f64,
    pub velocity: f64,
    pub acceleration: f64,
    pub timestamp: f64,
}

impl StateVector {
    /// Build a vector, defaulting any missing field to zero and a missing timestamp to
    /// "now" (as seconds since the Unix epoch in whatever clock frame the caller intends).
    pub fn new(
        position: f64,
        velocity: f64,
        acceleration: f64,
        timestamp: Option<f64>,
    ) -> Self {
        StateVector {
            position,
            velocity,
            acceleration,
            timestamp: timestamp.unwrap_or_else(now_seconds),
        }
    }

    /// The vector at rest at the origin, stamped "now".
    pub fn zero() -> Self {
        StateVector::new(0.0, 0.0, 0.0, None)
    }

    /// Extrapolated position at reference time `t`.
    pub fn compute_position(&self, t: f64) -> f64 {
        let dt = t - self.timestamp;
        self.position + self.velocity * dt + 0.5 * self.acceleration * dt * dt
    }

    /// Extrapolated velocity at reference time `t`.
    pub fn compute_velocity(&self, t: f64) -> f64 {
        let dt = t - self.timestamp;
        self.velocity + self.acceleration * dt
    }

    /// Acceleration is constant in this motion model; `t` is accepted for symmetry with
    /// [`StateVector::compute_position`] and [`StateVector::compute_velocity`].
    pub fn compute_acceleration(&self, _t: f64) -> f64 {
        self.acceleration
    }

    /// Return the vector re-stamped at `t`, i.e. `StateVector { position: compute_position(t), ... }`.
    pub fn extrapolate(&self, t: f64) -> StateVector {
        StateVector {
            position: self.compute_position(t),
            velocity: self.compute_velocity(t),
            acceleration: self.acceleration,
            timestamp: t,
        }
    }

    /// Direction of travel at `self.timestamp`: the sign of velocity, or of acceleration when
    /// velocity is within [`EPSILON`] of zero.
    pub fn direction(&self) -> Direction {
        if self.velocity > EPSILON {
            Direction::Forwards
        } else if self.velocity < -EPSILON {
            Direction::Backwards
        } else if self.acceleration > EPSILON {
            Direction::Forwards
        } else if self.acceleration < -EPSILON {
            Direction::Backwards
        } else {
            Direction::Stationary
        }
    }

    /// Whether this vector describes motion (non-stationary `direction()`).
    pub fn is_moving(&self) -> bool {
        self.direction() != Direction::Stationary
    }

    /// Compare `self` against `other` at `self.timestamp`: extrapolate `other` forward (or
    /// backward) to `self.timestamp`, then lexicographically compare (position, velocity,
    /// acceleration) within [`EPSILON`]. Never panics.
    pub fn compare_to(&self, other: &StateVector) -> Ordering {
        let other_here = other.extrapolate(self.timestamp);

        if !approx_eq(self.position, other_here.position) {
            return self
                .position
                .partial_cmp(&other_here.position)
                .unwrap_or(Ordering::Equal);
        }
        if !approx_eq(self.velocity, other_here.velocity) {
            return self
                .velocity
                .partial_cmp(&other_here.velocity)
                .unwrap_or(Ordering::Equal);
        }
        if !approx_eq(self.acceleration, other_here.acceleration) {
            return self
                .acceleration
                .partial_cmp(&other_here.acceleration)
                .unwrap_or(Ordering::Equal);
        }
        Ordering::Equal
    }

    /// Whether two vectors describe the same motion at `self.timestamp`, within tolerance.
    pub fn equivalent(&self, other: &StateVector) -> bool {
        self.compare_to(other) == Ordering::Equal
    }
}

impl fmt::Display for StateVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StateVector(p={:.6}, v={:.6}, a={:.6}, t={:.6})",
            self.position, self.velocity, self.acceleration, self.timestamp
        )
    }
}

/// Seconds since the Unix epoch, as an `f64`. Used as the default timestamp when constructing a
/// [`StateVector`] without an explicit one.
pub fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn s1_motion_math() {
        let v = StateVector::new(100.0, 10.0, 2.0, Some(1000.0));
        assert!(approx_eq(v.compute_position(1002.0), 124.0));
        assert!(approx_eq(v.compute_velocity(1002.0), 14.0));
        assert!(approx_eq(v.compute_acceleration(1002.0), 2.0));
    }

    #[rstest]
    #[case(0.0, 0.0, 0.0, 0.0)]
    #[case(5.0, -3.0, 1.5, 42.0)]
    #[case(-7.2, 0.0, -0.001, 1000.5)]
    fn invariant_roundtrip_stable(
        #[case] p: f64,
        #[case] v: f64,
        #[case] a: f64,
        #[case] t: f64,
    ) {
        let vector = StateVector::new(p, v, a, Some(t));
        assert_eq!(vector.compute_position(t), p);
        assert_eq!(vector.compute_velocity(t), v);
    }

    #[test]
    fn invariant_acceleration_is_constant() {
        let vector = StateVector::new(1.0, 2.0, 3.0, Some(0.0));
        for t in [-100.0, 0.0, 0.5, 1e6] {
            assert_eq!(vector.compute_acceleration(t), 3.0);
        }
    }

    #[test]
    fn invariant_extrapolation_composes() {
        let vector = StateVector::new(3.0, -1.5, 0.25, Some(10.0));
        let direct = vector.compute_position(50.0);
        let via_intermediate = vector.extrapolate(27.0).compute_position(50.0);
        assert!((direct - via_intermediate).abs() <= 1e-9);
    }

    #[test]
    fn compare_to_is_zero_for_extrapolated_self() {
        let vector = StateVector::new(3.0, -1.5, 0.25, Some(10.0));
        let later = vector.extrapolate(40.0);
        assert_eq!(later.compare_to(&vector), Ordering::Equal);
        assert!(later.equivalent(&vector));
    }

    #[test]
    fn compare_to_orders_by_position_first() {
        let a = StateVector::new(5.0, 0.0, 0.0, Some(0.0));
        let b = StateVector::new(1.0, 0.0, 0.0, Some(0.0));
        assert_eq!(a.compare_to(&b), Ordering::Greater);
        assert_eq!(b.compare_to(&a), Ordering::Less);
    }

    #[test]
    fn compare_to_never_panics_on_extreme_values() {
        let a = StateVector::new(f64::MAX, f64::MIN, f64::MAX, Some(0.0));
        let b = StateVector::new(f64::MIN, f64::MAX, f64::MIN, Some(1.0));
        let _ = a.compare_to(&b);
        let _ = b.compare_to(&a);
    }

    #[test]
    fn direction_prefers_velocity_sign() {
        assert_eq!(
            StateVector::new(0.0, 2.0, -5.0, Some(0.0)).direction(),
            Direction::Forwards
        );
        assert_eq!(
            StateVector::new(0.0, -2.0, 5.0, Some(0.0)).direction(),
            Direction::Backwards
        );
    }

    #[test]
    fn direction_falls_back_to_acceleration_when_at_rest() {
        assert_eq!(
            StateVector::new(0.0, 0.0, 3.0, Some(0.0)).direction(),
            Direction::Forwards
        );
        assert_eq!(
            StateVector::new(0.0, 0.0, -3.0, Some(0.0)).direction(),
            Direction::Backwards
        );
        assert_eq!(
            StateVector::new(0.0, 0.0, 0.0, Some(0.0)).direction(),
            Direction::Stationary
        );
    }

    #[test]
    fn is_moving_matches_direction() {
        assert!(!StateVector::zero().is_moving());
        assert!(StateVector::new(0.0, 1.0, 0.0, None).is_moving());
    }
}
