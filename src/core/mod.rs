//! Core module - Output model and shared utilities
//!
//! This module provides:
//! - Unified result model (ResultItem)
//! - Rendering functions for different output formats
//! - Hashing and text helpers

pub mod model;
pub mod render;
pub mod util;
