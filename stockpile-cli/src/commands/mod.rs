//! CLI command implementations.
//!
//! - [`fetch`] - Download resources into local storage
//! - [`list`] - Show stored resources
//! - [`rm`] - Delete stored resources
//! - [`mv`] - Move stored resources between tiers
//! - [`view`] - Decode stored images
//! - [`config`] - Configuration file management

pub mod config;
pub mod fetch;
pub mod list;
pub mod mv;
pub mod rm;
pub mod view;
