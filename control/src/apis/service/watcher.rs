//! Service watcher
//!
//! Feeds Service notifications to the [`Reconciler`], one at a time.
//!
//! ## Usage
//!
//! ```ignore
//! use control::apis::service::client::KubeServiceApi;
//! use control::apis::service::reconciler::Reconciler;
//! use control::apis::service::watcher::ServiceWatcher;
//! use kube::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::try_default().await?;
//!     let reconciler = Reconciler::new(KubeServiceApi::new(client), "example.org");
//!
//!     // Runs until the watch stream ends
//!     ServiceWatcher::new(reconciler).run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Event handling
//!
//! - Added / Modified: reconcile
//! - Deleted: ignored
//! - Other (sync markers): skipped
//! - stream errors and reconcile failures: logged, the loop continues

use super::client::{service_identity, ServiceApi, WatchEvent};
use super::reconciler::Reconciler;
use crate::apis::metrics::record_watch_event;
use crate::error::ApiError;
use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};

/// Counters for one run of the watch loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    /// Notifications read from the stream (errors included)
    pub events: usize,
    /// Successful reconciliations
    pub reconciled: usize,
    /// Failed reconciliations
    pub failed: usize,
    /// Notifications that did not trigger a reconciliation
    pub skipped: usize,
}

/// Service watcher
pub struct ServiceWatcher<A> {
    reconciler: Reconciler<A>,
}

impl<A: ServiceApi> ServiceWatcher<A> {
    pub fn new(reconciler: Reconciler<A>) -> Self {
        Self { reconciler }
    }

    pub fn reconciler(&self) -> &Reconciler<A> {
        &self.reconciler
    }

    /// Subscribe and process notifications until the stream ends
    ///
    /// Only a failure to subscribe is returned; everything after that is
    /// handled per event.
    pub async fn run(&self) -> Result<WatchSummary, ApiError> {
        let stream = self.reconciler.api().watch().await?;

        info!(
            "Watching services (root domain: {})",
            self.reconciler.root_domain()
        );

        let summary = self.process(stream).await;

        info!(
            "Service watch stream ended after {} events ({} reconciled, {} failed, {} skipped)",
            summary.events, summary.reconciled, summary.failed, summary.skipped
        );
        Ok(summary)
    }

    /// Process notifications sequentially
    pub async fn process<S>(&self, stream: S) -> WatchSummary
    where
        S: Stream<Item = Result<WatchEvent, ApiError>>,
    {
        futures::pin_mut!(stream);

        let mut summary = WatchSummary::default();

        while let Some(event) = stream.next().await {
            summary.events += 1;

            record_watch_event(event_kind(&event));

            match event {
                Ok(WatchEvent::Added(service)) | Ok(WatchEvent::Modified(service)) => {
                    let (namespace, name) = service_identity(&service);

                    match self.reconciler.reconcile(service).await {
                        Ok(outcome) => {
                            debug!(
                                "Reconciled service {}/{}: {:?}",
                                namespace, name, outcome
                            );
                            summary.reconciled += 1;
                        }
                        Err(e) => {
                            warn!("Failed to reconcile service {}/{}: {}", namespace, name, e);
                            summary.failed += 1;
                        }
                    }
                }
                Ok(WatchEvent::Deleted(service)) => {
                    let (namespace, name) = service_identity(&service);
                    debug!("Service deleted: {}/{}", namespace, name);
                    summary.skipped += 1;
                }
                Ok(WatchEvent::Other(description)) => {
                    debug!("Got a non-service notification ({}), skipping", description);
                    summary.skipped += 1;
                }
                Err(e) => {
                    warn!("Service watcher error: {}", e);
                    summary.skipped += 1;
                }
            }
        }

        summary
    }
}

/// Metric label of a notification
fn event_kind(event: &Result<WatchEvent, ApiError>) -> &'static str {
    match event {
        Ok(WatchEvent::Added(_)) => "added",
        Ok(WatchEvent::Modified(_)) => "modified",
        Ok(WatchEvent::Deleted(_)) => "deleted",
        Ok(WatchEvent::Other(_)) => "other",
        Err(_) => "error",
    }
}
