//! Emulated SESWrapper library
//!
//! Provides an in-process implementation of every `WRP_*` entry point so the
//! bindings and the acquisition sequence can run without analyzer hardware.
//! The function table points at `extern "system"` functions defined here, so
//! calls go through exactly the same marshalling code as the vendor DLL.
//!
//! State is kept per thread: each thread (and therefore each test) talks to
//! its own emulated instrument. Spectra are a Gaussian peak on a flat
//! background with Gaussian counting noise, accumulated per sweep.

use crate::ses::ffi::{self, SesFunctions, WrpBool};
use crate::ses::loader::SesLibrary;
use crate::ses::DetectorInfo;
use crate::ses::CBridge;
use rand_distr::{Distribution, Normal};
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::CStr;
use std::os::raw::{c_char, c_double, c_int, c_void};
use std::path::Path;
use tracing::debug;

/// Status codes returned by the emulated library
pub mod codes {
    pub const SUCCESS: i32 = 0;
    pub const NOT_INITIALIZED: i32 = 1;
    pub const INVALID_ARGUMENT: i32 = 2;
    pub const UNKNOWN_PARAMETER: i32 = 3;
    pub const TYPE_MISMATCH: i32 = 4;
    pub const BUFFER_TOO_SMALL: i32 = 5;
    pub const INVALID_STATE: i32 = 6;
    pub const FILE_NOT_FOUND: i32 = 7;
}

/// Values reported by `WRP_GetStatus`
pub mod status {
    pub const IDLE: i32 = 0;
    pub const READY: i32 = 1;
    pub const REGION_READY: i32 = 2;
}

/// Path reported as the origin of the emulated library
pub const EMULATOR_PATH: &str = "emulator://SESWrapper";

const ELEMENT_SETS: &[&str] = &["High Pass", "Low Pass"];
const LENS_MODES: &[&str] = &["Transmission", "Angular30", "Angular45"];
const ELEMENTS: &[&str] = &["L1", "L2", "L3", "L4"];

/// Peak count rate at the center of the emulated line (counts per second)
const PEAK_RATE: f64 = 2000.0;
/// Flat background count rate (counts per second)
const BACKGROUND_RATE: f64 = 40.0;
/// Fraction of the pass energy imaged on the detector in fixed mode
const FIXED_WINDOW_FRACTION: f64 = 0.1;
/// Largest number of energy steps a swept region may have
pub const MAX_SWEEP_STEPS: c_int = 1_000_000;

#[derive(Debug, Clone, PartialEq)]
enum PropertyValue {
    Bool(bool),
    Int(i32),
    Double(f64),
    Str(String),
}

#[derive(Debug)]
struct Acquisition {
    channels: usize,
    energies: Vec<f64>,
    spectrum: Vec<f64>,
    dwell_ms: i32,
    iterations: i32,
    region_ready: bool,
}

#[derive(Debug)]
struct EmulatorState {
    initialized: bool,
    instrument: Option<String>,
    properties: HashMap<String, PropertyValue>,
    detector_info: ffi::DetectorInfo,
    detector_region: ffi::DetectorRegion,
    analyzer_region: Option<ffi::AnalyzerRegion>,
    excitation_energy: f64,
    kinetic_energy: f64,
    element_voltages: HashMap<String, f64>,
    acquisition: Option<Acquisition>,
    calls: Vec<&'static str>,
    failures: HashMap<&'static str, i32>,
}

impl Default for EmulatorState {
    fn default() -> Self {
        let properties = [
            ("lib_description", PropertyValue::Str("SES wrapper emulator".to_string())),
            ("lib_version", PropertyValue::Str(env!("CARGO_PKG_VERSION").to_string())),
            ("lib_working_dir", PropertyValue::Str(String::new())),
            ("instrument_library", PropertyValue::Str(String::new())),
            ("element_set", PropertyValue::Str(ELEMENT_SETS[0].to_string())),
            ("lens_mode", PropertyValue::Str(LENS_MODES[0].to_string())),
            ("pass_energy", PropertyValue::Double(2.0)),
            ("detector_slices", PropertyValue::Int(1)),
            ("use_external_io", PropertyValue::Bool(false)),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();

        let detector_info = ffi::DetectorInfo {
            timerControlled_: 1,
            xChannels_: 1000,
            yChannels_: 900,
            maxSlices_: 900,
            maxChannels_: 1000,
            frameRate_: 25,
            adcPresent_: 1,
            discPresent_: 0,
        };
        let detector_region = ffi::DetectorRegion {
            firstXChannel_: 0,
            lastXChannel_: detector_info.xChannels_ - 1,
            firstYChannel_: 0,
            lastYChannel_: detector_info.yChannels_ - 1,
            slices_: 1,
            adcMode_: 1,
        };

        Self {
            initialized: false,
            instrument: None,
            properties,
            detector_info,
            detector_region,
            analyzer_region: None,
            excitation_energy: 0.0,
            kinetic_energy: 0.0,
            element_voltages: ELEMENTS.iter().map(|e| (e.to_string(), 0.0)).collect(),
            acquisition: None,
            calls: Vec::new(),
            failures: HashMap::new(),
        }
    }
}

impl EmulatorState {
    fn require_init(&self) -> Result<(), c_int> {
        if self.initialized {
            Ok(())
        } else {
            Err(codes::NOT_INITIALIZED)
        }
    }

    fn acquisition(&mut self) -> Result<&mut Acquisition, c_int> {
        self.require_init()?;
        self.acquisition.as_mut().ok_or(codes::INVALID_STATE)
    }

    fn property(&self, name: &str) -> Result<&PropertyValue, c_int> {
        self.properties.get(name).ok_or(codes::UNKNOWN_PARAMETER)
    }

    fn pass_energy(&self) -> f64 {
        match self.properties.get("pass_energy") {
            Some(PropertyValue::Double(value)) => *value,
            _ => 0.0,
        }
    }

    fn string_property(&self, name: &str) -> String {
        match self.properties.get(name) {
            Some(PropertyValue::Str(value)) => value.clone(),
            _ => String::new(),
        }
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), c_int> {
        let slot = self.properties.get_mut(name).ok_or(codes::UNKNOWN_PARAMETER)?;
        if std::mem::discriminant(slot) != std::mem::discriminant(&value) {
            return Err(codes::TYPE_MISMATCH);
        }
        match (name, &value) {
            ("element_set", PropertyValue::Str(v)) if !ELEMENT_SETS.contains(&v.as_str()) => {
                return Err(codes::INVALID_ARGUMENT)
            }
            ("lens_mode", PropertyValue::Str(v)) if !LENS_MODES.contains(&v.as_str()) => {
                return Err(codes::INVALID_ARGUMENT)
            }
            ("pass_energy", PropertyValue::Double(v)) if !(*v > 0.0) => {
                return Err(codes::INVALID_ARGUMENT)
            }
            _ => {}
        }
        *slot = value;
        Ok(())
    }
}

thread_local! {
    static STATE: RefCell<EmulatorState> = RefCell::new(EmulatorState::default());
}

/// Run one emulated entry point: log the call, honor injected failures,
/// then apply `f` to the state.
fn dispatch<F>(function: &'static str, f: F) -> c_int
where
    F: FnOnce(&mut EmulatorState) -> Result<(), c_int>,
{
    STATE.with(|state| {
        let mut state = state.borrow_mut();
        state.calls.push(function);
        if let Some(code) = state.failures.remove(function) {
            debug!(function, code, "Emulator returning injected failure");
            return code;
        }
        match f(&mut state) {
            Ok(()) => codes::SUCCESS,
            Err(code) => code,
        }
    })
}

// =============================================================================
// Public control surface
// =============================================================================

/// Function table of the emulated library
pub fn functions() -> SesFunctions {
    SesFunctions {
        initialize: wrp_initialize,
        finalize: wrp_finalize,
        get_property: wrp_get_property,
        get_property_bool: wrp_get_property_bool,
        get_property_integer: wrp_get_property_integer,
        get_property_double: wrp_get_property_double,
        get_property_string: wrp_get_property_string,
        get_detector_info: wrp_get_detector_info,
        get_detector_region: wrp_get_detector_region,
        set_property: wrp_set_property,
        set_property_bool: wrp_set_property_bool,
        set_property_integer: wrp_set_property_integer,
        set_property_double: wrp_set_property_double,
        set_property_string: wrp_set_property_string,
        set_detector_region: wrp_set_detector_region,
        set_analyzer_region: wrp_set_analyzer_region,
        validate: wrp_validate,
        reset_hw: wrp_reset_hw,
        test_hw: wrp_test_hw,
        load_instrument: wrp_load_instrument,
        zero_supplies: wrp_zero_supplies,
        get_binding_energy: wrp_get_binding_energy,
        set_binding_energy: wrp_set_binding_energy,
        get_kinetic_energy: wrp_get_kinetic_energy,
        set_kinetic_energy: wrp_set_kinetic_energy,
        get_excitation_energy: wrp_get_excitation_energy,
        set_excitation_energy: wrp_set_excitation_energy,
        get_element_voltage: wrp_get_element_voltage,
        set_element_voltage: wrp_set_element_voltage,
        check_analyzer_region: wrp_check_analyzer_region,
        init_acquisition: wrp_init_acquisition,
        start_acquisition: wrp_start_acquisition,
        stop_acquisition: wrp_stop_acquisition,
        get_status: wrp_get_status,
        get_acquired_data_integer: wrp_get_acquired_data_integer,
        get_acquired_data_double: wrp_get_acquired_data_double,
        get_acquired_data_string: wrp_get_acquired_data_string,
        get_acquired_data_vector_double: wrp_get_acquired_data_vector_double,
        get_acquired_data_vector_int32: wrp_get_acquired_data_vector_int32,
        wait_for_point_ready: wrp_wait_for_point_ready,
        wait_for_region_ready: wrp_wait_for_region_ready,
        continue_acquisition: wrp_continue_acquisition,
    }
}

/// Emulated library
pub fn library() -> SesLibrary {
    library_at(EMULATOR_PATH)
}

/// Emulated library reporting `origin` as its path
pub fn library_at(origin: impl AsRef<Path>) -> SesLibrary {
    SesLibrary::from_functions(functions(), origin.as_ref())
}

/// Reset this thread's emulated instrument to power-on state
pub fn reset() {
    STATE.with(|state| *state.borrow_mut() = EmulatorState::default());
}

/// Entry points called on this thread since the last reset, in order
pub fn calls() -> Vec<&'static str> {
    STATE.with(|state| state.borrow().calls.clone())
}

/// Forget the recorded calls
pub fn clear_calls() {
    STATE.with(|state| state.borrow_mut().calls.clear());
}

/// Make the next call to `function` return `code` without side effects
pub fn fail_next(function: &'static str, code: i32) {
    STATE.with(|state| {
        state.borrow_mut().failures.insert(function, code);
    });
}

/// Replace the detector description reported by `WRP_GetDetectorInfo`
///
/// The detector region is reset to cover the new detector.
pub fn set_detector_info(info: &DetectorInfo) {
    STATE.with(|state| {
        let mut state = state.borrow_mut();
        state.detector_info = info.into_c();
        state.detector_region = ffi::DetectorRegion {
            firstXChannel_: 0,
            lastXChannel_: info.n_x_channels - 1,
            firstYChannel_: 0,
            lastYChannel_: info.n_y_channels - 1,
            slices_: 1,
            adcMode_: 1,
        };
    });
}

/// Whether `WRP_Initialize` has run without a matching `WRP_Finalize`
pub fn is_initialized() -> bool {
    STATE.with(|state| state.borrow().initialized)
}

/// Instrument file loaded by `WRP_LoadInstrument`
pub fn instrument() -> Option<String> {
    STATE.with(|state| state.borrow().instrument.clone())
}

// =============================================================================
// Pointer helpers
// =============================================================================

unsafe fn read_cstr(ptr: *const c_char) -> Result<String, c_int> {
    if ptr.is_null() {
        return Err(codes::INVALID_ARGUMENT);
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(str::to_string)
        .map_err(|_| codes::INVALID_ARGUMENT)
}

unsafe fn write_out<T>(ptr: *mut T, value: T) -> Result<(), c_int> {
    if ptr.is_null() {
        return Err(codes::INVALID_ARGUMENT);
    }
    ptr.write(value);
    Ok(())
}

unsafe fn read_in<T: Copy>(ptr: *const T) -> Result<T, c_int> {
    if ptr.is_null() {
        return Err(codes::INVALID_ARGUMENT);
    }
    Ok(ptr.read())
}

/// String output: a null buffer only reports the length through `size`,
/// otherwise up to `*size - 1` bytes are copied and NUL terminated.
unsafe fn write_string(text: &str, buffer: *mut c_char, size: *mut c_int) -> Result<(), c_int> {
    if size.is_null() {
        return Err(codes::INVALID_ARGUMENT);
    }
    let len = c_int::try_from(text.len()).map_err(|_| codes::INVALID_ARGUMENT)?;
    if buffer.is_null() {
        size.write(len);
        return Ok(());
    }
    let capacity = usize::try_from(size.read()).map_err(|_| codes::INVALID_ARGUMENT)?;
    if capacity <= text.len() {
        return Err(codes::BUFFER_TOO_SMALL);
    }
    std::ptr::copy_nonoverlapping(text.as_ptr() as *const c_char, buffer, text.len());
    buffer.add(text.len()).write(0);
    size.write(len);
    Ok(())
}

/// Vector output: capacity comes in through `size`, the count written goes out.
/// A null buffer only reports the full length.
unsafe fn write_vector<T: Copy>(values: &[T], data: *mut T, size: *mut c_int) -> Result<(), c_int> {
    if size.is_null() {
        return Err(codes::INVALID_ARGUMENT);
    }
    if data.is_null() {
        size.write(c_int::try_from(values.len()).map_err(|_| codes::INVALID_ARGUMENT)?);
        return Ok(());
    }
    let capacity = usize::try_from(size.read()).map_err(|_| codes::INVALID_ARGUMENT)?;
    let count = values.len().min(capacity);
    std::ptr::copy_nonoverlapping(values.as_ptr(), data, count);
    size.write(count as c_int);
    Ok(())
}

// =============================================================================
// Lifecycle
// =============================================================================

unsafe extern "system" fn wrp_initialize(_reserved: *mut c_void) -> c_int {
    dispatch("WRP_Initialize", |s| {
        s.initialized = true;
        Ok(())
    })
}

unsafe extern "system" fn wrp_finalize() -> c_int {
    dispatch("WRP_Finalize", |s| {
        s.require_init()?;
        s.initialized = false;
        s.acquisition = None;
        Ok(())
    })
}

unsafe extern "system" fn wrp_reset_hw() -> c_int {
    dispatch("WRP_ResetHW", |s| {
        s.require_init()?;
        s.acquisition = None;
        Ok(())
    })
}

unsafe extern "system" fn wrp_test_hw() -> c_int {
    dispatch("WRP_TestHW", |s| s.require_init())
}

unsafe extern "system" fn wrp_load_instrument(file_name: *const c_char) -> c_int {
    dispatch("WRP_LoadInstrument", |s| {
        s.require_init()?;
        let file_name = read_cstr(file_name)?;
        if !Path::new(&file_name).is_file() {
            return Err(codes::FILE_NOT_FOUND);
        }
        s.instrument = Some(file_name);
        Ok(())
    })
}

unsafe extern "system" fn wrp_zero_supplies() -> c_int {
    dispatch("WRP_ZeroSupplies", |s| {
        s.require_init()?;
        s.kinetic_energy = 0.0;
        s.element_voltages.values_mut().for_each(|v| *v = 0.0);
        Ok(())
    })
}

// =============================================================================
// Properties
// =============================================================================

unsafe extern "system" fn wrp_get_property(
    property: *const c_char,
    _index: c_int,
    value: *mut c_void,
    size: *mut c_int,
) -> c_int {
    dispatch("WRP_GetProperty", |s| {
        let name = read_cstr(property)?;
        let bytes = match s.property(&name)? {
            PropertyValue::Bool(v) => vec![u8::from(*v)],
            PropertyValue::Int(v) => v.to_ne_bytes().to_vec(),
            PropertyValue::Double(v) => v.to_ne_bytes().to_vec(),
            PropertyValue::Str(v) => {
                let mut bytes = v.as_bytes().to_vec();
                bytes.push(0);
                bytes
            }
        };
        write_vector(&bytes, value as *mut u8, size)?;
        if (size.read() as usize) < bytes.len() {
            return Err(codes::BUFFER_TOO_SMALL);
        }
        Ok(())
    })
}

unsafe extern "system" fn wrp_get_property_bool(
    property: *const c_char,
    _index: c_int,
    value: *mut WrpBool,
    _size: *mut c_int,
) -> c_int {
    dispatch("WRP_GetPropertyBool", |s| {
        match s.property(&read_cstr(property)?)? {
            PropertyValue::Bool(v) => write_out(value, WrpBool::from(*v)),
            _ => Err(codes::TYPE_MISMATCH),
        }
    })
}

unsafe extern "system" fn wrp_get_property_integer(
    property: *const c_char,
    _index: c_int,
    value: *mut c_int,
    _size: *mut c_int,
) -> c_int {
    dispatch("WRP_GetPropertyInteger", |s| {
        match s.property(&read_cstr(property)?)? {
            PropertyValue::Int(v) => write_out(value, *v),
            _ => Err(codes::TYPE_MISMATCH),
        }
    })
}

unsafe extern "system" fn wrp_get_property_double(
    property: *const c_char,
    _index: c_int,
    value: *mut c_double,
    _size: *mut c_int,
) -> c_int {
    dispatch("WRP_GetPropertyDouble", |s| {
        match s.property(&read_cstr(property)?)? {
            PropertyValue::Double(v) => write_out(value, *v),
            _ => Err(codes::TYPE_MISMATCH),
        }
    })
}

unsafe extern "system" fn wrp_get_property_string(
    property: *const c_char,
    _index: c_int,
    value: *mut c_char,
    size: *mut c_int,
) -> c_int {
    dispatch("WRP_GetPropertyString", |s| {
        match s.property(&read_cstr(property)?)? {
            PropertyValue::Str(v) => write_string(v, value, size),
            _ => Err(codes::TYPE_MISMATCH),
        }
    })
}

unsafe extern "system" fn wrp_set_property(
    property: *const c_char,
    _index: c_int,
    value: *const c_void,
) -> c_int {
    dispatch("WRP_SetProperty", |s| {
        let name = read_cstr(property)?;
        let new_value = match s.property(&name)? {
            PropertyValue::Bool(_) => PropertyValue::Bool(read_in(value as *const u8)? != 0),
            PropertyValue::Int(_) => PropertyValue::Int(read_in(value as *const [u8; 4]).map(i32::from_ne_bytes)?),
            PropertyValue::Double(_) => PropertyValue::Double(read_in(value as *const [u8; 8]).map(f64::from_ne_bytes)?),
            PropertyValue::Str(_) => PropertyValue::Str(read_cstr(value as *const c_char)?),
        };
        s.set_property(&name, new_value)
    })
}

unsafe extern "system" fn wrp_set_property_bool(
    property: *const c_char,
    _index: c_int,
    value: *const WrpBool,
) -> c_int {
    dispatch("WRP_SetPropertyBool", |s| {
        let value = read_in(value)? != 0;
        s.set_property(&read_cstr(property)?, PropertyValue::Bool(value))
    })
}

unsafe extern "system" fn wrp_set_property_integer(
    property: *const c_char,
    _index: c_int,
    value: *const c_int,
) -> c_int {
    dispatch("WRP_SetPropertyInteger", |s| {
        let value = read_in(value)?;
        s.set_property(&read_cstr(property)?, PropertyValue::Int(value))
    })
}

unsafe extern "system" fn wrp_set_property_double(
    property: *const c_char,
    _index: c_int,
    value: *const c_double,
) -> c_int {
    dispatch("WRP_SetPropertyDouble", |s| {
        let value = read_in(value)?;
        s.set_property(&read_cstr(property)?, PropertyValue::Double(value))
    })
}

unsafe extern "system" fn wrp_set_property_string(
    property: *const c_char,
    _index: c_int,
    value: *const c_char,
) -> c_int {
    dispatch("WRP_SetPropertyString", |s| {
        let value = read_cstr(value)?;
        s.set_property(&read_cstr(property)?, PropertyValue::Str(value))
    })
}

// =============================================================================
// Detector and analyzer regions
// =============================================================================

unsafe extern "system" fn wrp_get_detector_info(value: *mut ffi::DetectorInfo) -> c_int {
    dispatch("WRP_GetDetectorInfo", |s| {
        s.require_init()?;
        write_out(value, s.detector_info)
    })
}

unsafe extern "system" fn wrp_get_detector_region(value: *mut ffi::DetectorRegion) -> c_int {
    dispatch("WRP_GetDetectorRegion", |s| {
        s.require_init()?;
        write_out(value, s.detector_region)
    })
}

unsafe extern "system" fn wrp_set_detector_region(region: *mut ffi::DetectorRegion) -> c_int {
    dispatch("WRP_SetDetectorRegion", |s| {
        s.require_init()?;
        let region = read_in(region as *const ffi::DetectorRegion)?;
        let info = s.detector_info;
        let x_ok = 0 <= region.firstXChannel_
            && region.firstXChannel_ <= region.lastXChannel_
            && region.lastXChannel_ < info.xChannels_;
        let y_ok = 0 <= region.firstYChannel_
            && region.firstYChannel_ <= region.lastYChannel_
            && region.lastYChannel_ < info.yChannels_;
        let slices_ok = 1 <= region.slices_ && region.slices_ <= info.maxSlices_;
        if !(x_ok && y_ok && slices_ok) {
            return Err(codes::INVALID_ARGUMENT);
        }
        s.detector_region = region;
        Ok(())
    })
}

unsafe extern "system" fn wrp_set_analyzer_region(region: *mut ffi::AnalyzerRegion) -> c_int {
    dispatch("WRP_SetAnalyzerRegion", |s| {
        s.require_init()?;
        let region = read_in(region as *const ffi::AnalyzerRegion)?;
        if region.dwellTime_ <= 0 {
            return Err(codes::INVALID_ARGUMENT);
        }
        s.analyzer_region = Some(region);
        Ok(())
    })
}

fn region_steps(region: &ffi::AnalyzerRegion) -> Result<c_int, c_int> {
    if region.fixed_ != 0 {
        return Ok(1);
    }
    if !(region.energyStep_ > 0.0) || region.highEnergy_ <= region.lowEnergy_ {
        return Err(codes::INVALID_ARGUMENT);
    }
    let intervals = ((region.highEnergy_ - region.lowEnergy_) / region.energyStep_).round();
    if !intervals.is_finite() || intervals >= f64::from(MAX_SWEEP_STEPS) {
        return Err(codes::INVALID_ARGUMENT);
    }
    (intervals as c_int)
        .checked_add(1)
        .ok_or(codes::INVALID_ARGUMENT)
}

unsafe extern "system" fn wrp_check_analyzer_region(
    region: *mut ffi::AnalyzerRegion,
    steps: *mut c_int,
    time_ms: *mut c_double,
    energy_step: *mut c_double,
) -> c_int {
    dispatch("WRP_CheckAnalyzerRegion", |s| {
        s.require_init()?;
        let region = read_in(region as *const ffi::AnalyzerRegion)?;
        let n = region_steps(&region)?;
        write_out(steps, n)?;
        write_out(time_ms, f64::from(n) * f64::from(region.dwellTime_))?;
        write_out(energy_step, region.energyStep_)
    })
}

unsafe extern "system" fn wrp_validate(
    element_set: *const c_char,
    lens_mode: *const c_char,
    pass_energy: c_double,
    kinetic_energy: c_double,
) -> c_int {
    dispatch("WRP_Validate", |s| {
        s.require_init()?;
        let element_set = read_cstr(element_set)?;
        let lens_mode = read_cstr(lens_mode)?;
        let valid = ELEMENT_SETS.contains(&element_set.as_str())
            && LENS_MODES.contains(&lens_mode.as_str())
            && pass_energy > 0.0
            && kinetic_energy >= 0.0;
        if valid {
            Ok(())
        } else {
            Err(codes::INVALID_ARGUMENT)
        }
    })
}

// =============================================================================
// Energies and voltages
// =============================================================================

unsafe extern "system" fn wrp_get_binding_energy(energy: *mut c_double) -> c_int {
    dispatch("WRP_GetBindingEnergy", |s| {
        s.require_init()?;
        write_out(energy, s.excitation_energy - s.kinetic_energy)
    })
}

unsafe extern "system" fn wrp_set_binding_energy(energy: c_double) -> c_int {
    dispatch("WRP_SetBindingEnergy", |s| {
        s.require_init()?;
        s.kinetic_energy = s.excitation_energy - energy;
        Ok(())
    })
}

unsafe extern "system" fn wrp_get_kinetic_energy(energy: *mut c_double) -> c_int {
    dispatch("WRP_GetKineticEnergy", |s| {
        s.require_init()?;
        write_out(energy, s.kinetic_energy)
    })
}

unsafe extern "system" fn wrp_set_kinetic_energy(energy: c_double) -> c_int {
    dispatch("WRP_SetKineticEnergy", |s| {
        s.require_init()?;
        if energy < 0.0 {
            return Err(codes::INVALID_ARGUMENT);
        }
        s.kinetic_energy = energy;
        Ok(())
    })
}

unsafe extern "system" fn wrp_get_excitation_energy(energy: *mut c_double) -> c_int {
    dispatch("WRP_GetExcitationEnergy", |s| {
        s.require_init()?;
        write_out(energy, s.excitation_energy)
    })
}

unsafe extern "system" fn wrp_set_excitation_energy(energy: c_double) -> c_int {
    dispatch("WRP_SetExcitationEnergy", |s| {
        s.require_init()?;
        s.excitation_energy = energy;
        Ok(())
    })
}

unsafe extern "system" fn wrp_get_element_voltage(
    element: *const c_char,
    voltage: *mut c_double,
) -> c_int {
    dispatch("WRP_GetElementVoltage", |s| {
        s.require_init()?;
        let element = read_cstr(element)?;
        let value = *s.element_voltages.get(&element).ok_or(codes::UNKNOWN_PARAMETER)?;
        write_out(voltage, value)
    })
}

unsafe extern "system" fn wrp_set_element_voltage(element: *const c_char, voltage: c_double) -> c_int {
    dispatch("WRP_SetElementVoltage", |s| {
        s.require_init()?;
        let element = read_cstr(element)?;
        let slot = s
            .element_voltages
            .get_mut(&element)
            .ok_or(codes::UNKNOWN_PARAMETER)?;
        *slot = voltage;
        Ok(())
    })
}

// =============================================================================
// Acquisition
// =============================================================================

unsafe extern "system" fn wrp_init_acquisition(
    _block_point_ready: WrpBool,
    _block_region_ready: WrpBool,
) -> c_int {
    dispatch("WRP_InitAcquisition", |s| {
        s.require_init()?;
        let region = s.analyzer_region.ok_or(codes::INVALID_STATE)?;

        let energies: Vec<f64> = if region.fixed_ != 0 {
            let channels = (s.detector_region.lastXChannel_ - s.detector_region.firstXChannel_ + 1)
                .max(1) as usize;
            let window = s.pass_energy() * FIXED_WINDOW_FRACTION;
            let low = region.centerEnergy_ - window / 2.0;
            let pitch = if channels > 1 {
                window / (channels - 1) as f64
            } else {
                0.0
            };
            (0..channels).map(|i| low + i as f64 * pitch).collect()
        } else {
            let steps = region_steps(&region)? as usize;
            (0..steps)
                .map(|i| region.lowEnergy_ + i as f64 * region.energyStep_)
                .collect()
        };

        s.acquisition = Some(Acquisition {
            channels: energies.len(),
            spectrum: vec![0.0; energies.len()],
            energies,
            dwell_ms: region.dwellTime_,
            iterations: 0,
            region_ready: false,
        });
        Ok(())
    })
}

/// One sweep of counts: Gaussian line centered on the energy window
fn sweep(energies: &[f64], dwell_ms: i32) -> Vec<f64> {
    let (first, last) = match (energies.first(), energies.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return Vec::new(),
    };
    let center = (first + last) / 2.0;
    let sigma = ((last - first) / 10.0).max(f64::EPSILON);
    let seconds = f64::from(dwell_ms) / 1000.0;
    let mut rng = rand::thread_rng();

    energies
        .iter()
        .map(|&e| {
            let z = (e - center) / sigma;
            let mean = (PEAK_RATE * (-0.5 * z * z).exp() + BACKGROUND_RATE) * seconds;
            let noise = Normal::new(0.0, mean.sqrt().max(f64::MIN_POSITIVE))
                .map(|n| n.sample(&mut rng))
                .unwrap_or(0.0);
            (mean + noise).max(0.0)
        })
        .collect()
}

unsafe extern "system" fn wrp_start_acquisition() -> c_int {
    dispatch("WRP_StartAcquisition", |s| {
        let acq = s.acquisition()?;
        if acq.region_ready {
            return Err(codes::INVALID_STATE);
        }
        let counts = sweep(&acq.energies, acq.dwell_ms);
        acq.spectrum
            .iter_mut()
            .zip(counts)
            .for_each(|(total, c)| *total += c);
        acq.iterations += 1;
        acq.region_ready = true;
        Ok(())
    })
}

unsafe extern "system" fn wrp_stop_acquisition() -> c_int {
    dispatch("WRP_StopAcquisition", |s| {
        s.acquisition()?.region_ready = false;
        Ok(())
    })
}

unsafe extern "system" fn wrp_continue_acquisition() -> c_int {
    dispatch("WRP_ContinueAcquisition", |s| {
        let acq = s.acquisition()?;
        if !acq.region_ready {
            return Err(codes::INVALID_STATE);
        }
        acq.region_ready = false;
        Ok(())
    })
}

unsafe extern "system" fn wrp_get_status(out: *mut c_int) -> c_int {
    dispatch("WRP_GetStatus", |s| {
        s.require_init()?;
        let value = match &s.acquisition {
            None => status::IDLE,
            Some(acq) if acq.region_ready => status::REGION_READY,
            Some(_) => status::READY,
        };
        write_out(out, value)
    })
}

unsafe extern "system" fn wrp_wait_for_point_ready(_timeout_ms: c_int) -> c_int {
    dispatch("WRP_WaitForPointReady", |s| {
        if s.acquisition()?.region_ready {
            Ok(())
        } else {
            Err(codes::INVALID_STATE)
        }
    })
}

unsafe extern "system" fn wrp_wait_for_region_ready(_timeout_ms: c_int) -> c_int {
    dispatch("WRP_WaitForRegionReady", |s| {
        if s.acquisition()?.region_ready {
            Ok(())
        } else {
            Err(codes::INVALID_STATE)
        }
    })
}

// =============================================================================
// Acquired data
// =============================================================================

unsafe extern "system" fn wrp_get_acquired_data_integer(
    parameter: *const c_char,
    _index: c_int,
    data: *mut c_int,
    _size: *mut c_int,
) -> c_int {
    dispatch("WRP_GetAcquiredDataInteger", |s| {
        let name = read_cstr(parameter)?;
        let acq = s.acquisition()?;
        let value = match name.as_str() {
            "acq_channels" => acq.channels as c_int,
            "acq_iterations" => acq.iterations,
            "acq_slices" => 1,
            _ => return Err(codes::UNKNOWN_PARAMETER),
        };
        write_out(data, value)
    })
}

unsafe extern "system" fn wrp_get_acquired_data_double(
    parameter: *const c_char,
    _index: c_int,
    data: *mut c_double,
    _size: *mut c_int,
) -> c_int {
    dispatch("WRP_GetAcquiredDataDouble", |s| {
        let name = read_cstr(parameter)?;
        let acq = s.acquisition()?;
        let value = match name.as_str() {
            "acq_elapsed_time" => f64::from(acq.iterations) * f64::from(acq.dwell_ms),
            _ => return Err(codes::UNKNOWN_PARAMETER),
        };
        write_out(data, value)
    })
}

unsafe extern "system" fn wrp_get_acquired_data_string(
    parameter: *const c_char,
    _index: c_int,
    data: *mut c_char,
    size: *mut c_int,
) -> c_int {
    dispatch("WRP_GetAcquiredDataString", |s| {
        let name = read_cstr(parameter)?;
        s.acquisition()?;
        let value = match name.as_str() {
            "acq_channel_unit" => "eV".to_string(),
            "acq_intensity_unit" => "counts".to_string(),
            "acq_lens_mode" => s.string_property("lens_mode"),
            _ => return Err(codes::UNKNOWN_PARAMETER),
        };
        write_string(&value, data, size)
    })
}

unsafe extern "system" fn wrp_get_acquired_data_vector_double(
    parameter: *const c_char,
    _index: c_int,
    data: *mut c_double,
    size: *mut c_int,
) -> c_int {
    dispatch("WRP_GetAcquiredDataVectorDouble", |s| {
        let name = read_cstr(parameter)?;
        let acq = s.acquisition()?;
        match name.as_str() {
            "acq_spectrum" => write_vector(&acq.spectrum, data, size),
            "acq_channel_scale" => write_vector(&acq.energies, data, size),
            _ => Err(codes::UNKNOWN_PARAMETER),
        }
    })
}

unsafe extern "system" fn wrp_get_acquired_data_vector_int32(
    parameter: *const c_char,
    _index: c_int,
    data: *mut c_int,
    size: *mut c_int,
) -> c_int {
    dispatch("WRP_GetAcquiredDataVectorInt32", |s| {
        let name = read_cstr(parameter)?;
        let acq = s.acquisition()?;
        match name.as_str() {
            "acq_spectrum" => {
                let counts: Vec<c_int> = acq.spectrum.iter().map(|&c| c.round() as c_int).collect();
                write_vector(&counts, data, size)
            }
            _ => Err(codes::UNKNOWN_PARAMETER),
        }
    })
}
