//! Data models for the application
//!
//! This module contains all data structures used throughout the application,
//! organized by domain. Each sub-module represents a specific feature area.

mod aip;
mod deletion_request;
mod location;
mod workflow;

// Re-export all models for convenient imports
pub use aip::*;
pub use deletion_request::*;
pub use location::*;
pub use workflow::*;
