//! SESWrapper bindings
//!
//! Safe Rust access to the Scienta SES wrapper library that drives the
//! electron analyzer.

pub mod bridge;
pub mod error;
pub mod ffi;
pub mod loader;
pub mod wrapper;

// Re-exports for convenience
pub use bridge::{AnalyzerRegion, CBridge, DetectorInfo, DetectorRegion, StructField};
pub use error::{SesError, SesResult};
pub use loader::{LibraryCache, SesLibrary};
pub use wrapper::{RegionCheck, SesWrapper, CURRENT_INDEX};
