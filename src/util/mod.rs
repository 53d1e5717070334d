//! Utility functions and helpers.

mod logging;

pub use logging::init_logging;
