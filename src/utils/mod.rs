//! Utility modules for the code generator.
//!
//! This module contains common utilities used throughout the codebase:
//! - Error types
//! - Exact-decimal float printing for generated headers

pub mod errors;
pub mod numfmt;

// Re-exports
pub use errors::*;
pub use numfmt::{c_float_literal, precise_f32, precise_f64};
