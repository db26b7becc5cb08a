//! LoadBalancer Service support
//!
//! Assigns a hostname to LoadBalancer Services without an address:
//! - client: ServiceApi capability (Kubernetes and in-memory implementations)
//! - reconciler: two-phase state machine (annotation, then status)
//! - watcher: event loop feeding the reconciler

pub mod client;
pub mod memory;
pub mod reconciler;
pub mod watcher;
