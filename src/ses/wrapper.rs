//! Safe wrapper over the SESWrapper entry points
//!
//! [`SesWrapper`] exposes one method per `WRP_*` function. Arguments are
//! marshalled into native form, the status code goes through
//! [`SesError::check`] and outputs come back as Rust values.

use super::bridge::{AnalyzerRegion, CBridge, DetectorInfo, DetectorRegion};
use super::error::{SesError, SesResult};
use super::ffi::{self, SesFunctions, WrpBool};
use super::loader::{LibraryCache, SesLibrary};
use serde::{Deserialize, Serialize};
use std::ffi::CString;
use std::os::raw::{c_char, c_double, c_int, c_void};
use std::path::Path;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Property index addressing the active setting rather than a list entry
pub const CURRENT_INDEX: i32 = -1;

/// Acquired data parameter holding the channel count of the current region
pub const ACQ_CHANNELS: &str = "acq_channels";

/// Acquired data parameter holding the integrated spectrum
pub const ACQ_SPECTRUM: &str = "acq_spectrum";

/// Acquired data parameter holding the kinetic energy of each channel
pub const ACQ_CHANNEL_SCALE: &str = "acq_channel_scale";

/// Call an entry point and run its status through the error adapter
macro_rules! wrp {
    ($self:ident, $symbol:literal, $field:ident($($arg:expr),* $(,)?)) => {{
        // Safety: every pointer argument refers to a live local or buffer
        // sized as the entry point expects.
        let code = unsafe { ($self.functions().$field)($($arg),*) };
        $self.check($symbol, code)
    }};
}

/// Result of `WRP_CheckAnalyzerRegion`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionCheck {
    /// Number of energy steps
    pub steps: i32,
    /// Estimated acquisition time in milliseconds
    pub time_ms: f64,
    /// Energy step the analyzer will actually use
    pub energy_step: f64,
}

/// Safe handle to the SES wrapper library
#[derive(Debug, Clone)]
pub struct SesWrapper {
    library: Arc<SesLibrary>,
}

impl SesWrapper {
    /// Open the library at `path` through the process-wide cache
    ///
    /// # Example
    /// ```no_run
    /// use seswrapper_rs::ses::SesWrapper;
    /// let wrapper = SesWrapper::open("C:/SES/SESWrapper.dll").unwrap();
    /// wrapper.initialize().unwrap();
    /// ```
    pub fn open(path: impl AsRef<Path>) -> SesResult<Self> {
        let library = LibraryCache::global().open(path)?;
        Ok(Self { library })
    }

    /// Wrap an already loaded library
    pub fn with_library(library: Arc<SesLibrary>) -> Self {
        Self { library }
    }

    /// The underlying library
    pub fn library(&self) -> &Arc<SesLibrary> {
        &self.library
    }

    fn functions(&self) -> &SesFunctions {
        self.library.functions()
    }

    fn check(&self, function: &'static str, code: c_int) -> SesResult<()> {
        debug!(function, code, "SES call");
        SesError::check(function, code)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn initialize(&self) -> SesResult<()> {
        wrp!(self, "WRP_Initialize", initialize(ptr::null_mut()))
    }

    pub fn finalize(&self) -> SesResult<()> {
        wrp!(self, "WRP_Finalize", finalize())
    }

    pub fn reset_hardware(&self) -> SesResult<()> {
        wrp!(self, "WRP_ResetHW", reset_hw())
    }

    pub fn test_hardware(&self) -> SesResult<()> {
        wrp!(self, "WRP_TestHW", test_hw())
    }

    /// Load an instrument configuration file
    pub fn load_instrument(&self, file_name: impl AsRef<Path>) -> SesResult<()> {
        let file_name = path_to_cstring(file_name.as_ref())?;
        wrp!(self, "WRP_LoadInstrument", load_instrument(file_name.as_ptr()))
    }

    /// Set all supplies to zero
    pub fn zero_supplies(&self) -> SesResult<()> {
        wrp!(self, "WRP_ZeroSupplies", zero_supplies())
    }

    // =========================================================================
    // Properties
    // =========================================================================

    pub fn get_property_bool(&self, property: &str, index: i32) -> SesResult<bool> {
        let name = CString::new(property)?;
        let mut value: WrpBool = 0;
        let mut size = std::mem::size_of::<WrpBool>() as c_int;
        wrp!(
            self,
            "WRP_GetPropertyBool",
            get_property_bool(name.as_ptr(), index, &mut value, &mut size)
        )?;
        Ok(value != 0)
    }

    pub fn get_property_int(&self, property: &str, index: i32) -> SesResult<i32> {
        let name = CString::new(property)?;
        let mut value: c_int = 0;
        let mut size = std::mem::size_of::<c_int>() as c_int;
        wrp!(
            self,
            "WRP_GetPropertyInteger",
            get_property_integer(name.as_ptr(), index, &mut value, &mut size)
        )?;
        Ok(value)
    }

    pub fn get_property_double(&self, property: &str, index: i32) -> SesResult<f64> {
        let name = CString::new(property)?;
        let mut value: c_double = 0.0;
        let mut size = std::mem::size_of::<c_double>() as c_int;
        wrp!(
            self,
            "WRP_GetPropertyDouble",
            get_property_double(name.as_ptr(), index, &mut value, &mut size)
        )?;
        Ok(value)
    }

    pub fn get_property_string(&self, property: &str, index: i32) -> SesResult<String> {
        let name = CString::new(property)?;
        self.fetch_string("WRP_GetPropertyString", |buffer, size| unsafe {
            (self.functions().get_property_string)(name.as_ptr(), index, buffer, size)
        })
    }

    /// Read a property into an untyped buffer, returning the bytes written
    ///
    /// # Safety
    /// `buffer` must be large enough for the property's native type; the
    /// library does not always honor the size it is given.
    pub unsafe fn get_property_raw(
        &self,
        property: &str,
        index: i32,
        buffer: &mut [u8],
    ) -> SesResult<usize> {
        let name = CString::new(property)?;
        let mut size = c_int::try_from(buffer.len())
            .map_err(|_| SesError::invalid_request("property buffer too large"))?;
        wrp!(
            self,
            "WRP_GetProperty",
            get_property(
                name.as_ptr(),
                index,
                buffer.as_mut_ptr() as *mut c_void,
                &mut size
            )
        )?;
        usize::try_from(size)
            .ok()
            .filter(|&written| written <= buffer.len())
            .ok_or(SesError::InvalidSize {
                function: "WRP_GetProperty",
                size,
            })
    }

    pub fn set_property_bool(&self, property: &str, value: bool, index: i32) -> SesResult<()> {
        let name = CString::new(property)?;
        let value = WrpBool::from(value);
        wrp!(self, "WRP_SetPropertyBool", set_property_bool(name.as_ptr(), index, &value))
    }

    pub fn set_property_int(&self, property: &str, value: i32, index: i32) -> SesResult<()> {
        let name = CString::new(property)?;
        wrp!(self, "WRP_SetPropertyInteger", set_property_integer(name.as_ptr(), index, &value))
    }

    pub fn set_property_double(&self, property: &str, value: f64, index: i32) -> SesResult<()> {
        let name = CString::new(property)?;
        wrp!(self, "WRP_SetPropertyDouble", set_property_double(name.as_ptr(), index, &value))
    }

    pub fn set_property_string(&self, property: &str, value: &str, index: i32) -> SesResult<()> {
        let name = CString::new(property)?;
        let value = CString::new(value)?;
        wrp!(
            self,
            "WRP_SetPropertyString",
            set_property_string(name.as_ptr(), index, value.as_ptr())
        )
    }

    /// Write a property from an untyped buffer
    ///
    /// # Safety
    /// `value` must hold the property's native representation.
    pub unsafe fn set_property_raw(&self, property: &str, index: i32, value: &[u8]) -> SesResult<()> {
        let name = CString::new(property)?;
        wrp!(
            self,
            "WRP_SetProperty",
            set_property(name.as_ptr(), index, value.as_ptr() as *const c_void)
        )
    }

    pub fn pass_energy(&self) -> SesResult<f64> {
        self.get_property_double("pass_energy", 0)
    }

    pub fn set_pass_energy(&self, pass_energy: f64) -> SesResult<()> {
        self.set_property_double("pass_energy", pass_energy, CURRENT_INDEX)
    }

    pub fn set_element_set(&self, element_set: &str) -> SesResult<()> {
        self.set_property_string("element_set", element_set, CURRENT_INDEX)
    }

    pub fn set_lens_mode(&self, lens_mode: &str) -> SesResult<()> {
        self.set_property_string("lens_mode", lens_mode, CURRENT_INDEX)
    }

    // =========================================================================
    // Detector and analyzer regions
    // =========================================================================

    pub fn detector_info(&self) -> SesResult<DetectorInfo> {
        let mut raw = ffi::DetectorInfo::default();
        wrp!(self, "WRP_GetDetectorInfo", get_detector_info(&mut raw))?;
        Ok(DetectorInfo::from_c(&raw))
    }

    pub fn detector_region(&self) -> SesResult<DetectorRegion> {
        let mut raw = ffi::DetectorRegion::default();
        wrp!(self, "WRP_GetDetectorRegion", get_detector_region(&mut raw))?;
        Ok(DetectorRegion::from_c(&raw))
    }

    pub fn set_detector_region(&self, region: &DetectorRegion) -> SesResult<()> {
        let mut raw = region.into_c();
        wrp!(self, "WRP_SetDetectorRegion", set_detector_region(&mut raw))
    }

    pub fn set_analyzer_region(&self, region: &AnalyzerRegion) -> SesResult<()> {
        region.validate()?;
        let mut raw = region.into_c();
        wrp!(self, "WRP_SetAnalyzerRegion", set_analyzer_region(&mut raw))
    }

    /// Ask the library how it would execute `region`
    pub fn check_analyzer_region(&self, region: &AnalyzerRegion) -> SesResult<RegionCheck> {
        let mut raw = region.into_c();
        let mut steps: c_int = 0;
        let mut time_ms: c_double = 0.0;
        let mut energy_step: c_double = 0.0;
        wrp!(
            self,
            "WRP_CheckAnalyzerRegion",
            check_analyzer_region(&mut raw, &mut steps, &mut time_ms, &mut energy_step)
        )?;
        Ok(RegionCheck {
            steps,
            time_ms,
            energy_step,
        })
    }

    /// Check that a lens mode / pass energy / kinetic energy combination is valid
    pub fn validate(
        &self,
        element_set: &str,
        lens_mode: &str,
        pass_energy: f64,
        kinetic_energy: f64,
    ) -> SesResult<()> {
        let element_set = CString::new(element_set)?;
        let lens_mode = CString::new(lens_mode)?;
        wrp!(
            self,
            "WRP_Validate",
            validate(element_set.as_ptr(), lens_mode.as_ptr(), pass_energy, kinetic_energy)
        )
    }

    // =========================================================================
    // Energies and voltages
    // =========================================================================

    pub fn binding_energy(&self) -> SesResult<f64> {
        let mut energy: c_double = 0.0;
        wrp!(self, "WRP_GetBindingEnergy", get_binding_energy(&mut energy))?;
        Ok(energy)
    }

    pub fn set_binding_energy(&self, energy: f64) -> SesResult<()> {
        wrp!(self, "WRP_SetBindingEnergy", set_binding_energy(energy))
    }

    pub fn kinetic_energy(&self) -> SesResult<f64> {
        let mut energy: c_double = 0.0;
        wrp!(self, "WRP_GetKineticEnergy", get_kinetic_energy(&mut energy))?;
        Ok(energy)
    }

    pub fn set_kinetic_energy(&self, energy: f64) -> SesResult<()> {
        wrp!(self, "WRP_SetKineticEnergy", set_kinetic_energy(energy))
    }

    pub fn excitation_energy(&self) -> SesResult<f64> {
        let mut energy: c_double = 0.0;
        wrp!(self, "WRP_GetExcitationEnergy", get_excitation_energy(&mut energy))?;
        Ok(energy)
    }

    pub fn set_excitation_energy(&self, energy: f64) -> SesResult<()> {
        wrp!(self, "WRP_SetExcitationEnergy", set_excitation_energy(energy))
    }

    pub fn element_voltage(&self, element: &str) -> SesResult<f64> {
        let element = CString::new(element)?;
        let mut voltage: c_double = 0.0;
        wrp!(self, "WRP_GetElementVoltage", get_element_voltage(element.as_ptr(), &mut voltage))?;
        Ok(voltage)
    }

    pub fn set_element_voltage(&self, element: &str, voltage: f64) -> SesResult<()> {
        let element = CString::new(element)?;
        wrp!(self, "WRP_SetElementVoltage", set_element_voltage(element.as_ptr(), voltage))
    }

    // =========================================================================
    // Acquisition
    // =========================================================================

    /// Prepare an acquisition of the current analyzer region
    ///
    /// The flags make `WRP_StartAcquisition` block until a point or the whole
    /// region is ready.
    pub fn init_acquisition(&self, block_point_ready: bool, block_region_ready: bool) -> SesResult<()> {
        wrp!(
            self,
            "WRP_InitAcquisition",
            init_acquisition(WrpBool::from(block_point_ready), WrpBool::from(block_region_ready))
        )
    }

    pub fn start_acquisition(&self) -> SesResult<()> {
        wrp!(self, "WRP_StartAcquisition", start_acquisition())
    }

    pub fn stop_acquisition(&self) -> SesResult<()> {
        wrp!(self, "WRP_StopAcquisition", stop_acquisition())
    }

    pub fn continue_acquisition(&self) -> SesResult<()> {
        wrp!(self, "WRP_ContinueAcquisition", continue_acquisition())
    }

    /// Raw acquisition status as reported by the library
    pub fn status(&self) -> SesResult<i32> {
        let mut status: c_int = 0;
        wrp!(self, "WRP_GetStatus", get_status(&mut status))?;
        Ok(status)
    }

    /// Wait for the next point; `None` waits forever
    pub fn wait_for_point_ready(&self, timeout: Option<Duration>) -> SesResult<()> {
        wrp!(self, "WRP_WaitForPointReady", wait_for_point_ready(timeout_ms(timeout)))
    }

    /// Wait for the region to complete; `None` waits forever
    pub fn wait_for_region_ready(&self, timeout: Option<Duration>) -> SesResult<()> {
        wrp!(self, "WRP_WaitForRegionReady", wait_for_region_ready(timeout_ms(timeout)))
    }

    pub fn block_on_region(&self) -> SesResult<()> {
        self.wait_for_region_ready(None)
    }

    // =========================================================================
    // Acquired data
    // =========================================================================

    pub fn acquired_int(&self, parameter: &str, index: i32) -> SesResult<i32> {
        let name = CString::new(parameter)?;
        let mut value: c_int = 0;
        let mut size = std::mem::size_of::<c_int>() as c_int;
        wrp!(
            self,
            "WRP_GetAcquiredDataInteger",
            get_acquired_data_integer(name.as_ptr(), index, &mut value, &mut size)
        )?;
        Ok(value)
    }

    pub fn acquired_double(&self, parameter: &str, index: i32) -> SesResult<f64> {
        let name = CString::new(parameter)?;
        let mut value: c_double = 0.0;
        let mut size = std::mem::size_of::<c_double>() as c_int;
        wrp!(
            self,
            "WRP_GetAcquiredDataDouble",
            get_acquired_data_double(name.as_ptr(), index, &mut value, &mut size)
        )?;
        Ok(value)
    }

    pub fn acquired_string(&self, parameter: &str, index: i32) -> SesResult<String> {
        let name = CString::new(parameter)?;
        self.fetch_string("WRP_GetAcquiredDataString", |buffer, size| unsafe {
            (self.functions().get_acquired_data_string)(name.as_ptr(), index, buffer, size)
        })
    }

    /// Read up to `capacity` doubles of a vector parameter
    pub fn acquired_vector_double(
        &self,
        parameter: &str,
        index: i32,
        capacity: usize,
    ) -> SesResult<Vec<f64>> {
        let name = CString::new(parameter)?;
        self.fetch_vector("WRP_GetAcquiredDataVectorDouble", capacity, |data, size| unsafe {
            (self.functions().get_acquired_data_vector_double)(name.as_ptr(), index, data, size)
        })
    }

    /// Read up to `capacity` integers of a vector parameter
    pub fn acquired_vector_int32(
        &self,
        parameter: &str,
        index: i32,
        capacity: usize,
    ) -> SesResult<Vec<i32>> {
        let name = CString::new(parameter)?;
        self.fetch_vector("WRP_GetAcquiredDataVectorInt32", capacity, |data, size| unsafe {
            (self.functions().get_acquired_data_vector_int32)(name.as_ptr(), index, data, size)
        })
    }

    /// Number of channels in the initialized acquisition
    pub fn n_channels(&self) -> SesResult<usize> {
        let channels = self.acquired_int(ACQ_CHANNELS, 0)?;
        usize::try_from(channels).map_err(|_| SesError::InvalidSize {
            function: "WRP_GetAcquiredDataInteger",
            size: channels,
        })
    }

    /// Integrated spectrum of the current acquisition
    pub fn spectrum(&self, n_channels: usize) -> SesResult<Vec<f64>> {
        self.acquired_vector_double(ACQ_SPECTRUM, 0, n_channels)
    }

    // =========================================================================
    // Marshalling helpers
    // =========================================================================

    /// Two-call string read: query the size with a null buffer, then fetch
    fn fetch_string<F>(&self, function: &'static str, mut call: F) -> SesResult<String>
    where
        F: FnMut(*mut c_char, *mut c_int) -> c_int,
    {
        let mut size: c_int = 0;
        self.check(function, call(ptr::null_mut(), &mut size))?;
        let len = usize::try_from(size).map_err(|_| SesError::InvalidSize { function, size })?;

        let mut buffer: Vec<c_char> = vec![0; len + 1];
        let mut capacity = c_int::try_from(buffer.len())
            .map_err(|_| SesError::InvalidSize { function, size })?;
        self.check(function, call(buffer.as_mut_ptr(), &mut capacity))?;

        let bytes: Vec<u8> = buffer
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        String::from_utf8(bytes).map_err(|_| SesError::InvalidUtf8 { function })
    }

    /// Vector read: capacity goes in through `size`, the count written comes back
    fn fetch_vector<T, F>(&self, function: &'static str, capacity: usize, call: F) -> SesResult<Vec<T>>
    where
        T: Copy + Default,
        F: FnOnce(*mut T, *mut c_int) -> c_int,
    {
        let mut size = c_int::try_from(capacity)
            .map_err(|_| SesError::invalid_request(format!("capacity {capacity} too large")))?;
        let mut data = vec![T::default(); capacity];
        self.check(function, call(data.as_mut_ptr(), &mut size))?;

        let written = usize::try_from(size)
            .ok()
            .filter(|&n| n <= capacity)
            .ok_or(SesError::InvalidSize { function, size })?;
        data.truncate(written);
        Ok(data)
    }
}

fn path_to_cstring(path: &Path) -> SesResult<CString> {
    Ok(CString::new(path.to_string_lossy().as_bytes())?)
}

fn timeout_ms(timeout: Option<Duration>) -> c_int {
    match timeout {
        None => -1,
        Some(duration) => c_int::try_from(duration.as_millis()).unwrap_or(c_int::MAX),
    }
}
