//! Loading of the SESWrapper shared library
//!
//! The vendor library keeps global state, so a process should only ever load
//! one copy. [`LibraryCache`] remembers the first library opened and hands it
//! back on every later request.

use super::error::{SesError, SesResult};
use super::ffi::SesFunctions;
use libloading::Library;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// A loaded SESWrapper library and its resolved entry points
pub struct SesLibrary {
    functions: SesFunctions,
    origin: PathBuf,
    // Keeps the code behind `functions` mapped. `None` for in-process tables.
    _library: Option<Library>,
}

fn resolve_symbol<T: Copy>(library: &Library, path: &Path, symbol: &'static str) -> SesResult<T> {
    // Safety: `T` is the entry point type declared in `ffi` for this symbol.
    let resolved = unsafe { library.get::<T>(symbol.as_bytes()) };
    resolved
        .map(|s| *s)
        .map_err(|source| SesError::MissingSymbol {
            path: path.to_path_buf(),
            symbol,
            source,
        })
}

macro_rules! resolve {
    ($lib:expr, $path:expr, { $($field:ident => $symbol:literal),* $(,)? }) => {
        SesFunctions {
            $( $field: resolve_symbol(&$lib, $path, $symbol)?, )*
        }
    };
}

impl SesLibrary {
    /// Load the library at `path` and resolve every `WRP_*` entry point
    pub fn load(path: impl AsRef<Path>) -> SesResult<Self> {
        let path = path.as_ref();
        // Safety: loading runs the library's initializers; the SES wrapper has
        // no load-time requirements beyond its own dependencies being present.
        let library = unsafe { Library::new(path) }.map_err(|source| SesError::Load {
            path: path.to_path_buf(),
            source,
        })?;

        let functions = resolve!(library, path, {
            initialize => "WRP_Initialize",
            finalize => "WRP_Finalize",
            get_property => "WRP_GetProperty",
            get_property_bool => "WRP_GetPropertyBool",
            get_property_integer => "WRP_GetPropertyInteger",
            get_property_double => "WRP_GetPropertyDouble",
            get_property_string => "WRP_GetPropertyString",
            get_detector_info => "WRP_GetDetectorInfo",
            get_detector_region => "WRP_GetDetectorRegion",
            set_property => "WRP_SetProperty",
            set_property_bool => "WRP_SetPropertyBool",
            set_property_integer => "WRP_SetPropertyInteger",
            set_property_double => "WRP_SetPropertyDouble",
            set_property_string => "WRP_SetPropertyString",
            set_detector_region => "WRP_SetDetectorRegion",
            set_analyzer_region => "WRP_SetAnalyzerRegion",
            validate => "WRP_Validate",
            reset_hw => "WRP_ResetHW",
            test_hw => "WRP_TestHW",
            load_instrument => "WRP_LoadInstrument",
            zero_supplies => "WRP_ZeroSupplies",
            get_binding_energy => "WRP_GetBindingEnergy",
            set_binding_energy => "WRP_SetBindingEnergy",
            get_kinetic_energy => "WRP_GetKineticEnergy",
            set_kinetic_energy => "WRP_SetKineticEnergy",
            get_excitation_energy => "WRP_GetExcitationEnergy",
            set_excitation_energy => "WRP_SetExcitationEnergy",
            get_element_voltage => "WRP_GetElementVoltage",
            set_element_voltage => "WRP_SetElementVoltage",
            check_analyzer_region => "WRP_CheckAnalyzerRegion",
            init_acquisition => "WRP_InitAcquisition",
            start_acquisition => "WRP_StartAcquisition",
            stop_acquisition => "WRP_StopAcquisition",
            get_status => "WRP_GetStatus",
            get_acquired_data_integer => "WRP_GetAcquiredDataInteger",
            get_acquired_data_double => "WRP_GetAcquiredDataDouble",
            get_acquired_data_string => "WRP_GetAcquiredDataString",
            get_acquired_data_vector_double => "WRP_GetAcquiredDataVectorDouble",
            get_acquired_data_vector_int32 => "WRP_GetAcquiredDataVectorInt32",
            wait_for_point_ready => "WRP_WaitForPointReady",
            wait_for_region_ready => "WRP_WaitForRegionReady",
            continue_acquisition => "WRP_ContinueAcquisition",
        });

        info!(path = %path.display(), "Loaded SES library");

        Ok(Self {
            functions,
            origin: path.to_path_buf(),
            _library: Some(library),
        })
    }

    /// Wrap a function table that lives in this process
    ///
    /// Used by the emulator; the table must point at functions that stay valid
    /// for the life of the program.
    pub fn from_functions(functions: SesFunctions, origin: impl Into<PathBuf>) -> Self {
        Self {
            functions,
            origin: origin.into(),
            _library: None,
        }
    }

    /// Resolved entry points
    pub fn functions(&self) -> &SesFunctions {
        &self.functions
    }

    /// Path the library was loaded from
    pub fn origin(&self) -> &Path {
        &self.origin
    }
}

impl std::fmt::Debug for SesLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SesLibrary")
            .field("origin", &self.origin)
            .field("in_process", &self._library.is_none())
            .finish()
    }
}

/// Single-slot cache of the loaded library
pub struct LibraryCache {
    slot: Mutex<Option<(PathBuf, Arc<SesLibrary>)>>,
}

static GLOBAL_CACHE: LibraryCache = LibraryCache::new();

impl LibraryCache {
    pub const fn new() -> Self {
        Self {
            slot: parking_lot::const_mutex(None),
        }
    }

    /// Process-wide cache used by [`super::SesWrapper::open`]
    pub fn global() -> &'static LibraryCache {
        &GLOBAL_CACHE
    }

    /// Open the library at `path`, or return the one already cached
    pub fn open(&self, path: impl AsRef<Path>) -> SesResult<Arc<SesLibrary>> {
        self.open_with(path, |p| SesLibrary::load(p))
    }

    /// Like [`LibraryCache::open`] with a caller-supplied loader
    ///
    /// The loader only runs when the cache is empty.
    pub fn open_with<P, F>(&self, path: P, loader: F) -> SesResult<Arc<SesLibrary>>
    where
        P: AsRef<Path>,
        F: FnOnce(&Path) -> SesResult<SesLibrary>,
    {
        let path = path.as_ref();
        let mut slot = self.slot.lock();

        if let Some((loaded_path, library)) = slot.as_ref() {
            if loaded_path != path {
                warn!(
                    requested = %path.display(),
                    loaded = %loaded_path.display(),
                    "SES library requested from a different location after initial load, returning the cached library"
                );
            }
            return Ok(Arc::clone(library));
        }

        let library = Arc::new(loader(path)?);
        *slot = Some((path.to_path_buf(), Arc::clone(&library)));
        Ok(library)
    }

    /// Path of the cached library, if any
    pub fn loaded_path(&self) -> Option<PathBuf> {
        self.slot.lock().as_ref().map(|(path, _)| path.clone())
    }

    /// Forget the cached library
    ///
    /// The library stays mapped until every wrapper holding it is dropped.
    pub fn clear(&self) {
        *self.slot.lock() = None;
    }
}

impl Default for LibraryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator;
    use std::cell::Cell;

    #[test]
    fn missing_library_is_load_error() {
        let err = SesLibrary::load("/nonexistent/SESWrapper.dll").unwrap_err();
        assert!(matches!(err, SesError::Load { .. }));
        assert!(err.to_string().contains("SESWrapper.dll"));
    }

    #[test]
    fn load_failure_leaves_cache_empty() {
        let cache = LibraryCache::new();
        assert!(cache.open("/nonexistent/SESWrapper.dll").is_err());
        assert!(cache.loaded_path().is_none());
    }

    #[test]
    fn same_path_returns_cached_library() {
        let cache = LibraryCache::new();
        let loads = Cell::new(0);
        let loader = |path: &Path| {
            loads.set(loads.get() + 1);
            Ok(emulator::library_at(path))
        };

        let first = cache.open_with("emulated/SESWrapper.dll", loader).unwrap();
        let second = cache
            .open_with("emulated/SESWrapper.dll", |path: &Path| {
                loads.set(loads.get() + 1);
                Ok(emulator::library_at(path))
            })
            .unwrap();

        assert_eq!(loads.get(), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn different_path_returns_original_library() {
        let cache = LibraryCache::new();
        let first = cache
            .open_with("first/SESWrapper.dll", |p: &Path| Ok(emulator::library_at(p)))
            .unwrap();
        let second = cache
            .open_with("second/SESWrapper.dll", |_: &Path| {
                Err(SesError::invalid_request("loader must not run"))
            })
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.origin(), Path::new("first/SESWrapper.dll"));
        assert_eq!(cache.loaded_path(), Some(PathBuf::from("first/SESWrapper.dll")));
    }

    #[test]
    fn clear_allows_reload() {
        let cache = LibraryCache::new();
        cache
            .open_with("first/SESWrapper.dll", |p: &Path| Ok(emulator::library_at(p)))
            .unwrap();
        cache.clear();
        let reloaded = cache
            .open_with("second/SESWrapper.dll", |p: &Path| Ok(emulator::library_at(p)))
            .unwrap();
        assert_eq!(reloaded.origin(), Path::new("second/SESWrapper.dll"));
    }

    // The only test touching the process-wide cache
    #[test]
    fn global_cache_backs_wrapper_open() {
        let cache = LibraryCache::global();
        cache.clear();
        let seeded = cache
            .open_with("seeded/SESWrapper.dll", |p: &Path| Ok(emulator::library_at(p)))
            .unwrap();

        let wrapper = crate::ses::SesWrapper::open("elsewhere/SESWrapper.dll").unwrap();
        assert!(Arc::ptr_eq(wrapper.library(), &seeded));
        assert_eq!(wrapper.library().origin(), Path::new("seeded/SESWrapper.dll"));

        cache.clear();
        assert!(cache.loaded_path().is_none());
        assert!(crate::ses::SesWrapper::open("/nonexistent/SESWrapper.dll").is_err());
    }
}
