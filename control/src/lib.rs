//! Proxifier Control Plane Library
//!
//! Exposes the Service watcher, reconciler and configuration for the binary
//! and for tests.

pub mod apis;
pub mod config;
pub mod error;
