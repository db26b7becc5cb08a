//! Service API capability
//!
//! The reconciler and watcher only talk to the cluster through
//! [`ServiceApi`], so they run unchanged against the API server
//! ([`KubeServiceApi`]) or an in-memory store
//! ([`InMemoryServiceApi`](super::memory::InMemoryServiceApi)).

use crate::error::ApiError;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, ListParams, PostParams};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, ResourceExt};
use std::future::Future;
use tracing::debug;

/// Stream of Service notifications; ends when the transport closes it
pub type WatchStream = BoxStream<'static, Result<WatchEvent, ApiError>>;

/// A Service change notification
///
/// Anything that does not carry a Service arrives as `Other`, so consumers
/// never inspect object types themselves.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Added(Service),
    Modified(Service),
    Deleted(Service),
    Other(&'static str),
}

impl From<watcher::Event<Service>> for WatchEvent {
    fn from(event: watcher::Event<Service>) -> Self {
        match event {
            watcher::Event::InitApply(service) => WatchEvent::Added(service),
            watcher::Event::Apply(service) => WatchEvent::Modified(service),
            watcher::Event::Delete(service) => WatchEvent::Deleted(service),
            watcher::Event::Init => WatchEvent::Other("init"),
            watcher::Event::InitDone => WatchEvent::Other("init done"),
        }
    }
}

/// Adapt runtime watcher events into a [`WatchStream`]
///
/// Errors are passed through, then the next poll waits out an exponential
/// backoff, so an unreachable API server is not re-listed in a tight loop.
pub fn service_events<S>(events: S) -> WatchStream
where
    S: Stream<Item = Result<watcher::Event<Service>, watcher::Error>> + Send + 'static,
{
    events
        .default_backoff()
        .map(|event| event.map(WatchEvent::from).map_err(ApiError::from))
        .boxed()
}

/// Cluster operations needed by the Service controller
pub trait ServiceApi: Send + Sync {
    /// Watch Services in all namespaces, without label or field filters
    ///
    /// An error means the subscription could not be established.
    fn watch(&self) -> impl Future<Output = Result<WatchStream, ApiError>> + Send;

    /// Fetch the current state of a Service (None if it no longer exists)
    fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<Service>, ApiError>> + Send;

    /// Replace the whole Service object
    fn replace(&self, service: &Service)
        -> impl Future<Output = Result<Service, ApiError>> + Send;

    /// Replace the Service status subresource
    fn replace_status(
        &self,
        service: &Service,
    ) -> impl Future<Output = Result<Service, ApiError>> + Send;
}

/// Namespace and name of a Service
///
/// Services without a namespace are treated as living in `default`.
pub fn service_identity(service: &Service) -> (String, String) {
    (
        service.namespace().unwrap_or_else(|| "default".to_string()),
        service.name_any(),
    )
}

/// [`ServiceApi`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeServiceApi {
    client: Client,
}

impl KubeServiceApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl ServiceApi for KubeServiceApi {
    async fn watch(&self) -> Result<WatchStream, ApiError> {
        let api: Api<Service> = Api::all(self.client.clone());

        // The runtime watcher is lazy; list once so an unreachable API server
        // or a missing RBAC grant fails here instead of inside the stream.
        api.list(&ListParams::default().limit(1))
            .await
            .map_err(|e| ApiError::WatchUnavailable(e.to_string()))?;
        debug!("Service list probe succeeded");

        Ok(service_events(watcher(api, WatcherConfig::default())))
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Service>, ApiError> {
        Ok(self.namespaced(namespace).get_opt(name).await?)
    }

    async fn replace(&self, service: &Service) -> Result<Service, ApiError> {
        let (namespace, name) = service_identity(service);
        self.namespaced(&namespace)
            .replace(&name, &PostParams::default(), service)
            .await
            .map_err(classify)
    }

    async fn replace_status(&self, service: &Service) -> Result<Service, ApiError> {
        let (namespace, name) = service_identity(service);
        let data = serde_json::to_vec(service)
            .map_err(|e| ApiError::Rejected(format!("unable to serialize Service: {}", e)))?;
        self.namespaced(&namespace)
            .replace_status(&name, &PostParams::default(), data)
            .await
            .map_err(classify)
    }
}

/// Map HTTP 409 to [`ApiError::Conflict`]
fn classify(error: kube::Error) -> ApiError {
    match error {
        kube::Error::Api(ref response) if response.code == 409 => {
            ApiError::Conflict(response.message.clone())
        }
        other => ApiError::Kubernetes(other),
    }
}
