//! Data management module
//!
//! Candle types, the SQLite-backed cache, coverage arithmetic and the
//! integrity validator.

pub mod candle;
pub mod coverage;
pub mod storage;
pub mod validator;

pub use candle::*;
pub use coverage::{CoverageRange, TimeRange};
pub use storage::*;
pub use validator::*;
