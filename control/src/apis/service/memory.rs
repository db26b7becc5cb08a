//! In-memory Service store
//!
//! Implements [`ServiceApi`] over a map, with API-server-like semantics:
//! - every write bumps `metadata.resourceVersion`
//! - a write carrying a stale resourceVersion is a conflict
//! - `replace` keeps the stored status, `replace_status` keeps everything else
//! - every write is echoed on the watch stream as `Modified`
//!
//! Used by tests and for exercising the controller without a cluster.

use super::client::{service_identity, ServiceApi, WatchEvent, WatchStream};
use crate::error::ApiError;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

type Key = (String, String);
type EventResult = Result<WatchEvent, ApiError>;

/// Kind of write performed against the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Replace,
    ReplaceStatus,
}

/// Failure to inject into the next write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedFailure {
    Conflict,
    Rejected(String),
}

struct State {
    services: BTreeMap<Key, Service>,
    resource_version: u64,
    writes: Vec<(WriteKind, Service)>,
    failures: VecDeque<InjectedFailure>,
    sender: Option<UnboundedSender<EventResult>>,
    receiver: Option<UnboundedReceiver<EventResult>>,
    watch_unavailable: bool,
}

impl State {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn emit(&self, event: EventResult) {
        if let Some(sender) = &self.sender {
            // Receiver may have been dropped by a finished watcher
            let _ = sender.unbounded_send(event);
        }
    }
}

/// In-memory [`ServiceApi`]; clones share the same store
#[derive(Clone)]
pub struct InMemoryServiceApi {
    state: Arc<Mutex<State>>,
}

impl Default for InMemoryServiceApi {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryServiceApi {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            state: Arc::new(Mutex::new(State {
                services: BTreeMap::new(),
                resource_version: 0,
                writes: Vec::new(),
                failures: VecDeque::new(),
                sender: Some(sender),
                receiver: Some(receiver),
                watch_unavailable: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a Service and emit `Added`
    pub fn create(&self, mut service: Service) -> Service {
        let mut state = self.lock();
        service.metadata.resource_version = Some(state.next_version());
        state
            .services
            .insert(service_identity(&service), service.clone());
        state.emit(Ok(WatchEvent::Added(service.clone())));
        service
    }

    /// Change a stored Service the way another writer would, emitting `Modified`
    pub fn modify<F>(&self, namespace: &str, name: &str, change: F) -> Option<Service>
    where
        F: FnOnce(&mut Service),
    {
        let mut state = self.lock();
        let version = state.next_version();
        let key = (namespace.to_string(), name.to_string());
        let service = state.services.get_mut(&key)?;
        change(service);
        service.metadata.resource_version = Some(version);
        let service = service.clone();
        state.emit(Ok(WatchEvent::Modified(service.clone())));
        Some(service)
    }

    /// Remove a stored Service, emitting `Deleted`
    pub fn delete(&self, namespace: &str, name: &str) -> Option<Service> {
        let mut state = self.lock();
        let removed = state
            .services
            .remove(&(namespace.to_string(), name.to_string()))?;
        state.emit(Ok(WatchEvent::Deleted(removed.clone())));
        Some(removed)
    }

    /// Push an arbitrary item onto the watch stream
    pub fn push_event(&self, event: Result<WatchEvent, ApiError>) {
        self.lock().emit(event);
    }

    /// End the watch stream once queued events are consumed
    pub fn close_watch(&self) {
        self.lock().sender = None;
    }

    /// Make `watch()` fail
    pub fn refuse_watch(&self) {
        self.lock().watch_unavailable = true;
    }

    /// Fail the next write with `failure` (queued, one per write)
    pub fn fail_next_write(&self, failure: InjectedFailure) {
        self.lock().failures.push_back(failure);
    }

    /// Current stored state of a Service
    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.lock()
            .services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Successful writes, in order
    pub fn writes(&self) -> Vec<(WriteKind, Service)> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    fn write(&self, kind: WriteKind, incoming: &Service) -> Result<Service, ApiError> {
        let mut state = self.lock();
        let key = service_identity(incoming);

        if let Some(failure) = state.failures.pop_front() {
            return Err(match failure {
                InjectedFailure::Conflict => {
                    ApiError::Conflict(format!("{}/{} has been modified", key.0, key.1))
                }
                InjectedFailure::Rejected(reason) => ApiError::Rejected(reason),
            });
        }

        let stored = state
            .services
            .get(&key)
            .cloned()
            .ok_or_else(|| ApiError::Rejected(format!("{}/{} not found", key.0, key.1)))?;

        if incoming.metadata.resource_version.is_some()
            && incoming.metadata.resource_version != stored.metadata.resource_version
        {
            return Err(ApiError::Conflict(format!(
                "{}/{} has been modified (resourceVersion {:?}, stored {:?})",
                key.0, key.1, incoming.metadata.resource_version, stored.metadata.resource_version
            )));
        }

        let mut updated = match kind {
            WriteKind::Replace => Service {
                status: stored.status.clone(),
                ..incoming.clone()
            },
            WriteKind::ReplaceStatus => Service {
                status: incoming.status.clone(),
                ..stored
            },
        };
        updated.metadata.resource_version = Some(state.next_version());

        state.services.insert(key, updated.clone());
        state.writes.push((kind, updated.clone()));
        state.emit(Ok(WatchEvent::Modified(updated.clone())));

        Ok(updated)
    }
}

impl ServiceApi for InMemoryServiceApi {
    async fn watch(&self) -> Result<WatchStream, ApiError> {
        let mut state = self.lock();
        if state.watch_unavailable {
            return Err(ApiError::WatchUnavailable(
                "services is forbidden".to_string(),
            ));
        }
        let receiver = state
            .receiver
            .take()
            .ok_or_else(|| ApiError::WatchUnavailable("already watching".to_string()))?;
        Ok(receiver.boxed())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Service>, ApiError> {
        Ok(self.service(namespace, name))
    }

    async fn replace(&self, service: &Service) -> Result<Service, ApiError> {
        self.write(WriteKind::Replace, service)
    }

    async fn replace_status(&self, service: &Service) -> Result<Service, ApiError> {
        self.write(WriteKind::ReplaceStatus, service)
    }
}
