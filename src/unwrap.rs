//! Phase unwrapping

use std::f64::consts::PI;

/// The angular domain unwrapping is done in
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AngleUnit {
    Radians,
    Degrees,
}

impl AngleUnit {
    /// Half a turn, the wrap threshold
    pub fn half_turn(self) -> f64 {
        match self {
            AngleUnit::Radians => PI,
            AngleUnit::Degrees => 180.0,
        }
    }

    pub fn full_turn(self) -> f64 {
        2.0 * self.half_turn()
    }

    pub fn from_radians(self, angle: f64) -> f64 {
        match self {
            AngleUnit::Radians => angle,
            AngleUnit::Degrees => angle.to_degrees(),
        }
    }
}

/// Phase unwrapper.
///
/// Holds the previous unwrapped value (0 at start) and shifts every new raw
/// angle by whole turns so it lands within half a turn of it. An angle exactly
/// half a turn away is left alone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Unwrapper {
    unit: AngleUnit,
    previous: f64,
}

impl Unwrapper {
    pub fn new(unit: AngleUnit) -> Self {
        Self {
            unit,
            previous: 0.0,
        }
    }

    /// Unwrap a new raw angle (in this unwrapper's unit) and update the state.
    ///
    /// A non-finite angle is passed through without touching the state.
    pub fn update(&mut self, angle: f64) -> f64 {
        if !angle.is_finite() {
            return angle;
        }
        let half = self.unit.half_turn();
        let mut unwrapped = angle;
        if (angle - self.previous).abs() > half {
            let turn = self.unit.full_turn();
            unwrapped += ((self.previous - angle) / turn).round() * turn;
        }
        self.previous = unwrapped;
        unwrapped
    }

    pub fn previous(&self) -> f64 {
        self.previous
    }

    pub fn unit(&self) -> AngleUnit {
        self.unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    #[test]
    fn test_identity_without_wraps() {
        let mut uw = Unwrapper::new(AngleUnit::Radians);
        for raw in [0.0, 0.5, 1.2, 2.9, 1.0, -1.5, -3.0, -0.2] {
            assert_eq!(raw, uw.update(raw));
        }
    }

    #[test]
    fn test_degree_scenario() {
        let mut uw = Unwrapper::new(AngleUnit::Degrees);
        let raw = [0.0, -90.0, -180.0, 90.0, 0.0, -90.0, -180.0, 90.0];
        let out: Vec<f64> = raw.iter().map(|&a| uw.update(a)).collect();
        assert_eq!(
            vec![0.0, -90.0, -180.0, -270.0, -360.0, -450.0, -540.0, -630.0],
            out
        );
    }

    #[test]
    fn test_boundary_not_wrapped() {
        let mut uw = Unwrapper::new(AngleUnit::Degrees);
        assert_eq!(-180.0, uw.update(-180.0));
        assert_eq!(0.0, uw.update(0.0));
        assert_eq!(180.0, uw.update(180.0));
    }

    #[test]
    fn test_large_jump_is_whole_turns() {
        let mut uw = Unwrapper::new(AngleUnit::Radians);
        // Drive the state far away one small step at a time
        let mut raw = 0.0f64;
        for _ in 0..1000 {
            raw = (raw + 0.5 + PI).rem_euclid(2.0 * PI) - PI;
            uw.update(raw);
        }
        assert!((uw.previous() - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_output_within_half_turn() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for unit in [AngleUnit::Radians, AngleUnit::Degrees] {
            let half = unit.half_turn();
            let mut uw = Unwrapper::new(unit);
            for _ in 0..10_000 {
                let p = uw.previous();
                let raw = rng.gen_range(-half..half);
                let out = uw.update(raw);
                assert!(out >= p - half - 1e-9 && out <= p + half + 1e-9);
                let turns = (out - raw) / unit.full_turn();
                assert!((turns - turns.round()).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_nan_leaves_state_alone() {
        let mut uw = Unwrapper::new(AngleUnit::Radians);
        uw.update(1.0);
        assert!(uw.update(f64::NAN).is_nan());
        assert_eq!(1.0, uw.previous());
    }
}
