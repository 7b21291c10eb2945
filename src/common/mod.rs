//! Shared pieces of the command line tools

pub mod cli;
pub use cli::{AcquireArgs, CommonArgs, InfoArgs};
