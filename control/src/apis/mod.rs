//! Kubernetes API integrations
//!
//! This module contains the Service watcher, its reconciler and the
//! controller metrics.

pub mod metrics;
pub mod service;
