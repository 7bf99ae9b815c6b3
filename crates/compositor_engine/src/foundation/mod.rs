//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the engine:
//! - Screen-space geometry
//! - Logging utilities

pub mod geometry;
pub mod logging;
