//! Utility module

pub mod logger;
pub mod timer;
