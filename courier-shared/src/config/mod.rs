//! # Configuration
//!
//! Sectioned configuration for the Courier server and tooling, with
//! profile-based defaults, optional file loading, and environment overrides.

pub mod server;

pub use server::{Config, LogFormat, Profile};
