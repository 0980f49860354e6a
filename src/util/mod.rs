//! Utilities

pub mod time;
