//! Conversion of raw register samples into physical units
//!
//! Every instrument variant is described by a [`Layout`]: how many raw
//! channels it reads, where the interferometer phase comes from, and the
//! ordered list of fields that make up one record on the wire. The record
//! always starts with the sample counter.
//!
//! # Units
//! * Phase fields carry optical path difference in picometres,
//!   `unwrapped / turn * wavelength`.
//! * Ratio fields carry QPD spot position in nanometres,
//!   `displacement / intensity * 1.11e3 um`.
//! * Raw fields pass the ADC count through untouched.
//!
//! # Numeric policy
//! A ratio with a zero denominator, or any NaN, becomes [`INVALID`]. Finite
//! values outside the `i32` range saturate to `i32::MAX` or `i32::MIN + 1`,
//! so [`INVALID`] is never produced by saturation. Conversion truncates
//! toward zero.

use num_traits::ToPrimitive;
use thiserror::Error;

use crate::{
    capture::RawSample,
    complex::Quadrature,
    unwrap::{AngleUnit, Unwrapper},
};

/// Marker for a value that could not be computed
pub const INVALID: i32 = i32::MIN;

/// FPGA CORDIC phase output, pi is 26353586 counts (2^23 - 1 per radian)
pub const CORDIC_COUNTS_PER_RADIAN: f64 = 8_388_607.0;
/// QPD position scale, 1.11e3 um full ratio, in nm
pub const QPD_POSITION_SCALE_NM: f64 = 1.11e6;
/// HeNe laser, 632.8 nm
pub const HENE_WAVELENGTH_PM: f64 = 632_800.0;
/// Metrology laser, 1550 nm
pub const METROLOGY_WAVELENGTH_PM: f64 = 1_550_000.0;

#[derive(Error, Debug, PartialEq)]
pub enum LayoutError {
    #[error("Field '{field}' reads raw channel {channel}, but only {channels} are captured")]
    ChannelOutOfRange {
        field: &'static str,
        channel: usize,
        channels: usize,
    },
    #[error("Phase source reads raw channel {channel}, but only {channels} are captured")]
    PhaseOutOfRange { channel: usize, channels: usize },
    #[error("Wavelength must be positive and finite, got {0} pm")]
    Wavelength(f64),
    #[error("Layout has no fields")]
    Empty,
}

/// Where the interferometer phase is taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseSource {
    /// `atan2(y, x)` of a quadrature pair
    Quadrature { x: usize, y: usize },
    /// A channel already carrying the angle in CORDIC fixed point
    Cordic { channel: usize },
}

impl PhaseSource {
    fn channels(&self) -> [usize; 2] {
        match *self {
            PhaseSource::Quadrature { x, y } => [x, y],
            PhaseSource::Cordic { channel } => [channel, channel],
        }
    }

    fn radians(&self, raw: &[i32]) -> f64 {
        match *self {
            PhaseSource::Quadrature { x, y } => Quadrature::new(raw[x], raw[y]).arg(),
            PhaseSource::Cordic { channel } => raw[channel] as f64 / CORDIC_COUNTS_PER_RADIAN,
        }
    }
}

/// One output field of a record
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field {
    /// ADC value passed through
    Raw(usize),
    /// Unwrapped interferometer phase as optical path difference
    Phase,
    /// `raw[num] / raw[den] * scale`
    Ratio { num: usize, den: usize, scale: f64 },
}

/// The instruments this software has been deployed on
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instrument {
    /// Full metrology FPGA: shear, pointing, OPD and science beam
    Metrology,
    /// Bare quadrature pair from the HeNe test bench
    PhaseOnly,
}

impl Instrument {
    pub fn layout(self) -> Layout {
        match self {
            Instrument::Metrology => Layout::metrology(),
            Instrument::PhaseOnly => Layout::phase_only(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    /// Number of raw data channels
    pub raw_channels: usize,
    /// Logical channels per GPIO bank (1 or 2)
    pub bank_width: usize,
    pub phase: PhaseSource,
    /// Report `-angle` instead of `angle`
    pub negate_phase: bool,
    pub unit: AngleUnit,
    pub wavelength_pm: f64,
    /// Record fields after the counter, in wire order
    pub fields: Vec<(&'static str, Field)>,
}

impl Layout {
    /// Two single-channel banks carrying X and Y, phase as `-atan2(y, x)` in degrees
    pub fn phase_only() -> Self {
        Self {
            raw_channels: 2,
            bank_width: 1,
            phase: PhaseSource::Quadrature { x: 0, y: 1 },
            negate_phase: true,
            unit: AngleUnit::Degrees,
            wavelength_pm: HENE_WAVELENGTH_PM,
            fields: vec![("opd", Field::Phase)],
        }
    }

    /// The 26 channel metrology FPGA, 22 field record
    pub fn metrology() -> Self {
        let qpd = |num, den| Field::Ratio {
            num,
            den,
            scale: QPD_POSITION_SCALE_NM,
        };
        // Raw channel map
        // 0..=3 adc_shear, 4..=7 adc_point, 8 adc_sine_ref, 9 adc_opd_ref,
        // 10 phi_opd, 11 r_opd, 12..=17 shear x1 x2 y1 y2 i1 i2,
        // 18..=23 point x1 x2 y1 y2 i1 i2, 24 adc_sci_null, 25 adc_sci_mod
        Self {
            raw_channels: 26,
            bank_width: 2,
            phase: PhaseSource::Cordic { channel: 10 },
            negate_phase: false,
            unit: AngleUnit::Radians,
            wavelength_pm: METROLOGY_WAVELENGTH_PM,
            fields: vec![
                ("adc_shear1", Field::Raw(0)),
                ("adc_shear2", Field::Raw(1)),
                ("adc_shear3", Field::Raw(2)),
                ("adc_shear4", Field::Raw(3)),
                ("adc_point1", Field::Raw(4)),
                ("adc_point2", Field::Raw(5)),
                ("adc_point3", Field::Raw(6)),
                ("adc_point4", Field::Raw(7)),
                ("adc_sine_ref", Field::Raw(8)),
                ("adc_opd_ref", Field::Raw(9)),
                ("phi_opd", Field::Phase),
                ("shear_x1", qpd(12, 16)),
                ("shear_x2", qpd(13, 17)),
                ("shear_y1", qpd(14, 16)),
                ("shear_y2", qpd(15, 17)),
                ("point_x1", qpd(18, 22)),
                ("point_x2", qpd(19, 23)),
                ("point_y1", qpd(20, 22)),
                ("point_y2", qpd(21, 23)),
                ("adc_sci_null", Field::Raw(24)),
                ("adc_sci_mod", Field::Raw(25)),
            ],
        }
    }

    /// Number of `i32` per record, counter included
    pub fn width(&self) -> usize {
        self.fields.len() + 1
    }

    /// Field names in wire order, counter included
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        std::iter::once("counter").chain(self.fields.iter().map(|(name, _)| *name))
    }

    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.fields.is_empty() {
            return Err(LayoutError::Empty);
        }
        if !(self.wavelength_pm.is_finite() && self.wavelength_pm > 0.0) {
            return Err(LayoutError::Wavelength(self.wavelength_pm));
        }
        let channels = self.raw_channels;
        for channel in self.phase.channels() {
            if channel >= channels {
                return Err(LayoutError::PhaseOutOfRange { channel, channels });
            }
        }
        for (field, kind) in &self.fields {
            let used = match *kind {
                Field::Raw(c) => [c, c],
                Field::Phase => continue,
                Field::Ratio { num, den, .. } => [num, den],
            };
            if let Some(&channel) = used.iter().find(|&&c| c >= channels) {
                return Err(LayoutError::ChannelOutOfRange {
                    field: *field,
                    channel,
                    channels,
                });
            }
        }
        Ok(())
    }

    fn has_phase(&self) -> bool {
        self.fields.iter().any(|(_, f)| *f == Field::Phase)
    }
}

/// One processed sample, `[counter, fields...]`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<i32>,
}

impl Record {
    pub fn with_width(width: usize) -> Self {
        Self {
            fields: Vec::with_capacity(width),
        }
    }

    pub fn from_slice(fields: &[i32]) -> Self {
        Self {
            fields: fields.to_vec(),
        }
    }

    pub fn counter(&self) -> Option<i32> {
        self.fields.first().copied()
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Convert to a fixed-point integer following the module's numeric policy
pub fn to_fixed(value: f64) -> i32 {
    if value.is_nan() {
        return INVALID;
    }
    let saturated = if value > 0.0 { i32::MAX } else { i32::MIN + 1 };
    value.to_i32().unwrap_or(saturated).max(i32::MIN + 1)
}

/// `num / den * scale`, [`INVALID`] for a zero denominator
pub fn ratio(num: i32, den: i32, scale: f64) -> i32 {
    if den == 0 {
        return INVALID;
    }
    to_fixed(num as f64 / den as f64 * scale)
}

/// Turns raw samples into records, carrying the unwrap state between samples
pub struct Processor {
    layout: Layout,
    unwrapper: Unwrapper,
    has_phase: bool,
}

impl Processor {
    pub fn new(layout: Layout) -> Result<Self, LayoutError> {
        layout.validate()?;
        Ok(Self {
            unwrapper: Unwrapper::new(layout.unit),
            has_phase: layout.has_phase(),
            layout,
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn unwrapper(&self) -> &Unwrapper {
        &self.unwrapper
    }

    /// Unwrapped phase of `sample` in the layout's unit. Advances the unwrap state.
    pub fn unwrap_phase(&mut self, sample: &RawSample) -> f64 {
        let mut radians = self.layout.phase.radians(&sample.channels);
        if self.layout.negate_phase {
            radians = -radians;
        }
        self.unwrapper.update(self.layout.unit.from_radians(radians))
    }

    /// Fill `record` from `sample`. Returns how many fields came out [`INVALID`].
    pub fn process(&mut self, sample: &RawSample, record: &mut Record) -> usize {
        debug_assert_eq!(sample.channels.len(), self.layout.raw_channels);
        // The phase is unwrapped exactly once per consumed sample
        let opd = if self.has_phase {
            let phase = self.unwrap_phase(sample);
            to_fixed(phase / self.layout.unit.full_turn() * self.layout.wavelength_pm)
        } else {
            INVALID
        };
        let raw = &sample.channels;
        record.fields.clear();
        record.fields.push(sample.counter);
        let mut invalid = 0;
        for (_, field) in &self.layout.fields {
            let value = match *field {
                Field::Raw(c) => raw[c],
                Field::Phase => opd,
                Field::Ratio { num, den, scale } => {
                    let v = ratio(raw[num], raw[den], scale);
                    if v == INVALID {
                        invalid += 1;
                    }
                    v
                }
            };
            record.fields.push(value);
        }
        if self.has_phase && opd == INVALID {
            invalid += 1;
        }
        invalid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(counter: i32, channels: &[i32]) -> RawSample {
        RawSample {
            counter,
            channels: channels.to_vec(),
        }
    }

    #[test]
    fn test_phase_only_scenario() {
        let mut p = Processor::new(Layout::phase_only()).unwrap();
        let mut record = Record::default();
        let pairs = [(100, 0), (0, 100), (-100, 0), (0, -100)];
        let mut phases = vec![];
        let mut opds = vec![];
        for (i, (x, y)) in pairs.iter().cycle().take(8).enumerate() {
            let invalid = p.process(&sample(i as i32, &[*x, *y]), &mut record);
            assert_eq!(0, invalid);
            assert_eq!(2, record.len());
            assert_eq!(Some(i as i32), record.counter());
            phases.push(p.unwrapper().previous());
            opds.push(record.as_slice()[1]);
        }
        assert_eq!(
            vec![0.0, -90.0, -180.0, -270.0, -360.0, -450.0, -540.0, -630.0],
            phases
        );
        assert_eq!(
            vec![0, -158200, -316400, -474600, -632800, -791000, -949200, -1107400],
            opds
        );
    }

    #[test]
    fn test_identity_for_small_phases() {
        let mut layout = Layout::phase_only();
        layout.negate_phase = false;
        layout.unit = AngleUnit::Radians;
        let mut p = Processor::new(layout).unwrap();
        for (x, y) in [(100, 10), (100, 50), (50, 100), (-100, 50), (100, -20)] {
            let s = sample(0, &[x, y]);
            let raw = Quadrature::new(x, y).arg();
            assert_eq!(raw, p.unwrap_phase(&s));
        }
    }

    fn metrology_raw() -> Vec<i32> {
        let mut raw: Vec<i32> = (0..26).map(|i| 1000 + i).collect();
        // Shear and pointing: displacement / intensity
        raw[12] = 500;
        raw[13] = -250;
        raw[14] = 0;
        raw[15] = 1000;
        raw[16] = 1000;
        raw[17] = 1000;
        raw[18] = 100;
        raw[19] = 200;
        raw[20] = 300;
        raw[21] = 400;
        raw[22] = 1000;
        raw[23] = 2000;
        raw[10] = 0;
        raw
    }

    #[test]
    fn test_metrology_record_layout() {
        let layout = Layout::metrology();
        assert_eq!(22, layout.width());
        let names: Vec<_> = layout.names().collect();
        assert_eq!("counter", names[0]);
        assert_eq!("phi_opd", names[11]);
        assert_eq!("adc_sci_mod", names[21]);

        let mut p = Processor::new(layout).unwrap();
        let mut record = Record::default();
        let invalid = p.process(&sample(42, &metrology_raw()), &mut record);
        assert_eq!(0, invalid);
        let r = record.as_slice();
        assert_eq!(42, r[0]);
        // ADC pass-through
        assert_eq!(&[1000, 1001, 1002, 1003, 1004, 1005, 1006, 1007, 1008, 1009], &r[1..11]);
        assert_eq!(0, r[11]);
        // Shear, in nm
        assert_eq!(&[555_000, -277_500, 0, 1_110_000], &r[12..16]);
        // Pointing
        assert_eq!(&[111_000, 111_000, 333_000, 222_000], &r[16..20]);
        assert_eq!(&[1024, 1025], &r[20..22]);
    }

    #[test]
    fn test_cordic_phase_unwraps_in_radians() {
        let mut p = Processor::new(Layout::metrology()).unwrap();
        let mut record = Record::default();
        let mut raw = metrology_raw();
        // Half a turn, then just past -half a turn: continues upward
        let pi = (std::f64::consts::PI * CORDIC_COUNTS_PER_RADIAN) as i32;
        raw[10] = pi / 2;
        p.process(&sample(1, &raw), &mut record);
        assert!((record.as_slice()[11] - 387_500).abs() <= 1);
        raw[10] = pi - 10;
        p.process(&sample(2, &raw), &mut record);
        raw[10] = -pi + 10;
        p.process(&sample(3, &raw), &mut record);
        let opd = record.as_slice()[11];
        assert!((opd - 775_000).abs() <= 1, "{opd}");
    }

    #[test]
    fn test_zero_intensity_is_invalid() {
        let mut p = Processor::new(Layout::metrology()).unwrap();
        let mut record = Record::default();
        let mut raw = metrology_raw();
        raw[14] = 0;
        raw[16] = 0;
        let invalid = p.process(&sample(1, &raw), &mut record);
        // shear_x1 and shear_y1 share the zero intensity
        assert_eq!(2, invalid);
        assert_eq!(INVALID, record.as_slice()[12]);
        assert_eq!(INVALID, record.as_slice()[14]);
        assert_eq!(ratio(0, 0, QPD_POSITION_SCALE_NM), INVALID);
    }

    #[test]
    fn test_fixed_point_policy() {
        assert_eq!(INVALID, to_fixed(f64::NAN));
        assert_eq!(i32::MAX, to_fixed(f64::INFINITY));
        assert_eq!(i32::MIN + 1, to_fixed(f64::NEG_INFINITY));
        assert_eq!(i32::MAX, to_fixed(1e12));
        assert_eq!(i32::MIN + 1, to_fixed(-1e12));
        assert_eq!(i32::MIN + 1, to_fixed(i32::MIN as f64));
        assert_eq!(1, to_fixed(1.9));
        assert_eq!(-1, to_fixed(-1.9));
        // Huge ratio saturates rather than becoming the sentinel
        assert_eq!(i32::MIN + 1, ratio(-i32::MAX, 1, QPD_POSITION_SCALE_NM));
    }

    #[test]
    fn test_layout_validation() {
        let mut layout = Layout::phase_only();
        layout.phase = PhaseSource::Quadrature { x: 0, y: 2 };
        assert_eq!(
            Err(LayoutError::PhaseOutOfRange {
                channel: 2,
                channels: 2
            }),
            layout.validate()
        );
        let mut layout = Layout::metrology();
        layout.raw_channels = 24;
        assert!(matches!(
            layout.validate(),
            Err(LayoutError::ChannelOutOfRange {
                field: "adc_sci_null",
                ..
            })
        ));
        let mut layout = Layout::phase_only();
        layout.wavelength_pm = 0.0;
        assert!(Processor::new(layout).is_err());
    }
}
