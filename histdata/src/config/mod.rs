//! Configuration module

pub mod history;
pub mod retry;

pub use history::*;
pub use retry::*;
