//! Struct bridge between Rust records and SESWrapper native structs
//!
//! Each record is declared once with its native counterpart and the field
//! mapping. The `struct_bridge!` macro generates the Rust struct, the field
//! table and both directions of the scalar copy.

use super::error::{SesError, SesResult};
use super::ffi;
use serde::{Deserialize, Serialize};

/// Description of one mapped field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructField {
    /// Rust field name
    pub name: &'static str,
    /// Native field name in the vendor header
    pub c_name: &'static str,
    /// Native field type in the vendor header
    pub c_type: &'static str,
}

/// A Rust record with a native mirror struct
pub trait CBridge: Sized {
    /// Native struct passed to the library
    type Raw: Copy + Default;

    /// Native struct name in the vendor header
    const STRUCT_NAME: &'static str;

    /// Field mapping, in native declaration order
    const FIELDS: &'static [StructField];

    /// Copy all fields into a native struct
    fn into_c(&self) -> Self::Raw;

    /// Build a record from a native struct
    fn from_c(raw: &Self::Raw) -> Self;

    /// Look up a field by its Rust name
    fn field(name: &str) -> Option<&'static StructField> {
        Self::FIELDS.iter().find(|f| f.name == name)
    }
}

/// Scalar conversion between a Rust field type and its native representation
pub trait CScalar<C>: Sized {
    fn into_native(self) -> C;
    fn from_native(value: C) -> Self;
}

impl CScalar<ffi::WrpBool> for bool {
    fn into_native(self) -> ffi::WrpBool {
        u8::from(self)
    }

    fn from_native(value: ffi::WrpBool) -> Self {
        value != 0
    }
}

impl CScalar<i32> for i32 {
    fn into_native(self) -> i32 {
        self
    }

    fn from_native(value: i32) -> Self {
        value
    }
}

impl CScalar<f64> for f64 {
    fn into_native(self) -> f64 {
        self
    }

    fn from_native(value: f64) -> Self {
        value
    }
}

macro_rules! struct_bridge {
    (
        $(#[$meta:meta])*
        pub struct $name:ident => $raw:ident {
            $(
                $(#[$fmeta:meta])*
                pub $field:ident: $ty:ty => $cfield:ident: $cty:literal
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct $name {
            $(
                $(#[$fmeta])*
                pub $field: $ty,
            )*
        }

        impl CBridge for $name {
            type Raw = ffi::$raw;

            const STRUCT_NAME: &'static str = stringify!($raw);

            const FIELDS: &'static [StructField] = &[
                $(
                    StructField {
                        name: stringify!($field),
                        c_name: stringify!($cfield),
                        c_type: $cty,
                    },
                )*
            ];

            fn into_c(&self) -> Self::Raw {
                ffi::$raw {
                    $( $cfield: <$ty as CScalar<_>>::into_native(self.$field), )*
                }
            }

            fn from_c(raw: &Self::Raw) -> Self {
                Self {
                    $( $field: <$ty as CScalar<_>>::from_native(raw.$cfield), )*
                }
            }
        }
    };
}

struct_bridge! {
    /// Detector capabilities reported by the library
    pub struct DetectorInfo => DetectorInfo {
        pub is_timer_controlled: bool => timerControlled_: "unsigned char",
        pub n_x_channels: i32 => xChannels_: "int",
        pub n_y_channels: i32 => yChannels_: "int",
        pub max_slices: i32 => maxSlices_: "int",
        pub max_channels: i32 => maxChannels_: "int",
        pub frame_rate: i32 => frameRate_: "int",
        pub is_adc_present: bool => adcPresent_: "unsigned char",
        pub is_disc_present: bool => discPresent_: "unsigned char",
    }
}

struct_bridge! {
    /// Region of interest on the detector
    pub struct DetectorRegion => DetectorRegion {
        pub first_x_channel: i32 => firstXChannel_: "int",
        pub last_x_channel: i32 => lastXChannel_: "int",
        pub first_y_channel: i32 => firstYChannel_: "int",
        pub last_y_channel: i32 => lastYChannel_: "int",
        pub n_slices: i32 => slices_: "int",
        pub is_adc_mode: bool => adcMode_: "unsigned char",
    }
}

struct_bridge! {
    /// Energy region swept (or held) by the analyzer
    pub struct AnalyzerRegion => AnalyzerRegion {
        pub is_fixed: bool => fixed_: "unsigned char",
        pub high_energy: f64 => highEnergy_: "double",
        pub low_energy: f64 => lowEnergy_: "double",
        pub center_energy: f64 => centerEnergy_: "double",
        pub energy_step: f64 => energyStep_: "double",
        /// Dwell time per step in milliseconds
        pub dwell_ms: i32 => dwellTime_: "int",
    }
}

impl DetectorRegion {
    /// Region covering the whole detector as a single ADC-mode slice
    pub fn full(info: &DetectorInfo) -> Self {
        Self {
            first_x_channel: 0,
            last_x_channel: info.n_x_channels - 1,
            first_y_channel: 0,
            last_y_channel: info.n_y_channels - 1,
            n_slices: 1,
            is_adc_mode: true,
        }
    }

    /// Number of x channels in the region
    pub fn x_width(&self) -> i32 {
        self.last_x_channel - self.first_x_channel + 1
    }
}

impl AnalyzerRegion {
    /// Fixed-mode region centered on a kinetic energy
    pub fn fixed(center_energy: f64, dwell_ms: i32) -> Self {
        Self {
            is_fixed: true,
            center_energy,
            dwell_ms,
            ..Default::default()
        }
    }

    /// Swept-mode region from `low_energy` to `high_energy`
    pub fn swept(low_energy: f64, high_energy: f64, energy_step: f64, dwell_ms: i32) -> Self {
        Self {
            is_fixed: false,
            low_energy,
            high_energy,
            energy_step,
            dwell_ms,
            ..Default::default()
        }
    }

    /// Reject regions the library cannot execute
    pub fn validate(&self) -> SesResult<()> {
        if self.dwell_ms <= 0 {
            return Err(SesError::invalid_region(format!(
                "dwell time must be positive, got {} ms",
                self.dwell_ms
            )));
        }
        if self.is_fixed {
            if !self.center_energy.is_finite() {
                return Err(SesError::invalid_region("center energy is not finite"));
            }
            return Ok(());
        }
        if !(self.low_energy.is_finite() && self.high_energy.is_finite()) {
            return Err(SesError::invalid_region("energy bounds are not finite"));
        }
        if self.low_energy >= self.high_energy {
            return Err(SesError::invalid_region(format!(
                "low energy {} must be below high energy {}",
                self.low_energy, self.high_energy
            )));
        }
        if !(self.energy_step > 0.0) {
            return Err(SesError::invalid_region(format!(
                "energy step must be positive, got {}",
                self.energy_step
            )));
        }
        Ok(())
    }

    /// Number of energy steps in a swept region
    pub fn swept_steps(&self) -> Option<usize> {
        if self.is_fixed || !(self.energy_step > 0.0) {
            return None;
        }
        let span = self.high_energy - self.low_energy;
        Some((span / self.energy_step).round() as usize + 1)
    }
}
