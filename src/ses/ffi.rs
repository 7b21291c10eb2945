//! Raw SESWrapper declarations
//!
//! Native struct layouts and entry point signatures mirror `seswrapper.h`.
//! Every entry point is `int __stdcall`, which is `extern "system"` in Rust
//! (stdcall on 32-bit Windows, the platform C convention elsewhere).

#![allow(non_snake_case)]

use std::os::raw::{c_char, c_double, c_int, c_uchar, c_void};

/// Vendor boolean (`_bool` in the header)
pub type WrpBool = c_uchar;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct DetectorInfo {
    pub timerControlled_: WrpBool,
    pub xChannels_: c_int,
    pub yChannels_: c_int,
    pub maxSlices_: c_int,
    pub maxChannels_: c_int,
    pub frameRate_: c_int,
    pub adcPresent_: WrpBool,
    pub discPresent_: WrpBool,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct DetectorRegion {
    pub firstXChannel_: c_int,
    pub lastXChannel_: c_int,
    pub firstYChannel_: c_int,
    pub lastYChannel_: c_int,
    pub slices_: c_int,
    pub adcMode_: WrpBool,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct AnalyzerRegion {
    pub fixed_: WrpBool,
    pub highEnergy_: c_double,
    pub lowEnergy_: c_double,
    pub centerEnergy_: c_double,
    pub energyStep_: c_double,
    pub dwellTime_: c_int,
}

pub type FnNoArgs = unsafe extern "system" fn() -> c_int;
pub type FnInitialize = unsafe extern "system" fn(reserved: *mut c_void) -> c_int;
pub type FnGetProperty = unsafe extern "system" fn(
    property: *const c_char,
    index: c_int,
    value: *mut c_void,
    size: *mut c_int,
) -> c_int;
pub type FnGetPropertyBool = unsafe extern "system" fn(
    property: *const c_char,
    index: c_int,
    value: *mut WrpBool,
    size: *mut c_int,
) -> c_int;
pub type FnGetPropertyInteger = unsafe extern "system" fn(
    property: *const c_char,
    index: c_int,
    value: *mut c_int,
    size: *mut c_int,
) -> c_int;
pub type FnGetPropertyDouble = unsafe extern "system" fn(
    property: *const c_char,
    index: c_int,
    value: *mut c_double,
    size: *mut c_int,
) -> c_int;
pub type FnGetPropertyString = unsafe extern "system" fn(
    property: *const c_char,
    index: c_int,
    value: *mut c_char,
    size: *mut c_int,
) -> c_int;
pub type FnGetDetectorInfo = unsafe extern "system" fn(value: *mut DetectorInfo) -> c_int;
pub type FnGetDetectorRegion = unsafe extern "system" fn(value: *mut DetectorRegion) -> c_int;
pub type FnSetProperty =
    unsafe extern "system" fn(property: *const c_char, index: c_int, value: *const c_void) -> c_int;
pub type FnSetPropertyBool =
    unsafe extern "system" fn(property: *const c_char, index: c_int, value: *const WrpBool) -> c_int;
pub type FnSetPropertyInteger =
    unsafe extern "system" fn(property: *const c_char, index: c_int, value: *const c_int) -> c_int;
pub type FnSetPropertyDouble =
    unsafe extern "system" fn(property: *const c_char, index: c_int, value: *const c_double) -> c_int;
pub type FnSetPropertyString =
    unsafe extern "system" fn(property: *const c_char, index: c_int, value: *const c_char) -> c_int;
pub type FnSetDetectorRegion = unsafe extern "system" fn(region: *mut DetectorRegion) -> c_int;
pub type FnSetAnalyzerRegion = unsafe extern "system" fn(region: *mut AnalyzerRegion) -> c_int;
pub type FnValidate = unsafe extern "system" fn(
    element_set: *const c_char,
    lens_mode: *const c_char,
    pass_energy: c_double,
    kinetic_energy: c_double,
) -> c_int;
pub type FnLoadInstrument = unsafe extern "system" fn(file_name: *const c_char) -> c_int;
pub type FnGetEnergy = unsafe extern "system" fn(energy: *mut c_double) -> c_int;
pub type FnSetEnergy = unsafe extern "system" fn(energy: c_double) -> c_int;
pub type FnGetElementVoltage =
    unsafe extern "system" fn(element: *const c_char, voltage: *mut c_double) -> c_int;
pub type FnSetElementVoltage =
    unsafe extern "system" fn(element: *const c_char, voltage: c_double) -> c_int;
pub type FnCheckAnalyzerRegion = unsafe extern "system" fn(
    region: *mut AnalyzerRegion,
    steps: *mut c_int,
    time_ms: *mut c_double,
    energy_step: *mut c_double,
) -> c_int;
pub type FnInitAcquisition =
    unsafe extern "system" fn(block_point_ready: WrpBool, block_region_ready: WrpBool) -> c_int;
pub type FnGetStatus = unsafe extern "system" fn(status: *mut c_int) -> c_int;
pub type FnGetAcquiredDataInteger = unsafe extern "system" fn(
    parameter: *const c_char,
    index: c_int,
    data: *mut c_int,
    size: *mut c_int,
) -> c_int;
pub type FnGetAcquiredDataDouble = unsafe extern "system" fn(
    parameter: *const c_char,
    index: c_int,
    data: *mut c_double,
    size: *mut c_int,
) -> c_int;
pub type FnGetAcquiredDataString = unsafe extern "system" fn(
    parameter: *const c_char,
    index: c_int,
    data: *mut c_char,
    size: *mut c_int,
) -> c_int;
pub type FnGetAcquiredDataVectorDouble = FnGetAcquiredDataDouble;
pub type FnGetAcquiredDataVectorInt32 = FnGetAcquiredDataInteger;
pub type FnWait = unsafe extern "system" fn(timeout_ms: c_int) -> c_int;

/// Function table resolved from the vendor library
///
/// One entry per exported `WRP_*` symbol. The pointers stay valid for as long
/// as the owning [`super::loader::SesLibrary`] is alive.
#[derive(Clone, Copy)]
pub struct SesFunctions {
    pub initialize: FnInitialize,
    pub finalize: FnNoArgs,
    pub get_property: FnGetProperty,
    pub get_property_bool: FnGetPropertyBool,
    pub get_property_integer: FnGetPropertyInteger,
    pub get_property_double: FnGetPropertyDouble,
    pub get_property_string: FnGetPropertyString,
    pub get_detector_info: FnGetDetectorInfo,
    pub get_detector_region: FnGetDetectorRegion,
    pub set_property: FnSetProperty,
    pub set_property_bool: FnSetPropertyBool,
    pub set_property_integer: FnSetPropertyInteger,
    pub set_property_double: FnSetPropertyDouble,
    pub set_property_string: FnSetPropertyString,
    pub set_detector_region: FnSetDetectorRegion,
    pub set_analyzer_region: FnSetAnalyzerRegion,
    pub validate: FnValidate,
    pub reset_hw: FnNoArgs,
    pub test_hw: FnNoArgs,
    pub load_instrument: FnLoadInstrument,
    pub zero_supplies: FnNoArgs,
    pub get_binding_energy: FnGetEnergy,
    pub set_binding_energy: FnSetEnergy,
    pub get_kinetic_energy: FnGetEnergy,
    pub set_kinetic_energy: FnSetEnergy,
    pub get_excitation_energy: FnGetEnergy,
    pub set_excitation_energy: FnSetEnergy,
    pub get_element_voltage: FnGetElementVoltage,
    pub set_element_voltage: FnSetElementVoltage,
    pub check_analyzer_region: FnCheckAnalyzerRegion,
    pub init_acquisition: FnInitAcquisition,
    pub start_acquisition: FnNoArgs,
    pub stop_acquisition: FnNoArgs,
    pub get_status: FnGetStatus,
    pub get_acquired_data_integer: FnGetAcquiredDataInteger,
    pub get_acquired_data_double: FnGetAcquiredDataDouble,
    pub get_acquired_data_string: FnGetAcquiredDataString,
    pub get_acquired_data_vector_double: FnGetAcquiredDataVectorDouble,
    pub get_acquired_data_vector_int32: FnGetAcquiredDataVectorInt32,
    pub wait_for_point_ready: FnWait,
    pub wait_for_region_ready: FnWait,
    pub continue_acquisition: FnNoArgs,
}
