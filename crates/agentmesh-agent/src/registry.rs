//! Capability registry with single-flight lazy discovery.
//!
//! Static capabilities are registered at construction. Capabilities from tool
//! servers are appended by [`CapabilityRegistry::ensure_discovered`], which
//! runs the discovery function at most once no matter how many requests hit a
//! cold registry at the same time.
//!
//! The lock is never held across an `.await`: callers that find discovery in
//! progress wait on a `watch` channel the leader completes.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use agentmesh_core::config::DiscoveryFailurePolicy;
use agentmesh_core::error::{DiscoveryError, RegistryError};
use agentmesh_core::types::ToolDefinition;

use crate::capability::Capability;

/// Outcome broadcast by the discovery leader. `None` while in flight.
type Outcome = Option<Result<(), DiscoveryError>>;

/// Observable discovery state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscoveryState {
    NotStarted,
    InProgress,
    Done,
    /// Discovery failed under [`DiscoveryFailurePolicy::Fatal`].
    Failed,
}

enum Phase {
    NotStarted,
    InProgress(watch::Receiver<Outcome>),
    Done,
    Failed(DiscoveryError),
}

struct Inner {
    capabilities: Vec<Arc<Capability>>,
    phase: Phase,
}

impl Inner {
    fn contains(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c.name() == name)
    }
}

// ─────────────────────────────────────────────
// CapabilityRegistry
// ─────────────────────────────────────────────

/// Ordered set of uniquely named capabilities.
pub struct CapabilityRegistry {
    inner: Mutex<Inner>,
    policy: DiscoveryFailurePolicy,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    pub fn new(policy: DiscoveryFailurePolicy) -> Self {
        Self {
            inner: Mutex::new(Inner {
                capabilities: Vec::new(),
                phase: Phase::NotStarted,
            }),
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a capability. Fails if the name is taken.
    pub fn register(&self, capability: Capability) -> Result<(), RegistryError> {
        let mut inner = self.lock();
        if inner.contains(capability.name()) {
            return Err(RegistryError::DuplicateCapability(capability.name().to_string()));
        }
        info!(capability = capability.name(), kind = capability.kind_label(), "registered capability");
        inner.capabilities.push(Arc::new(capability));
        Ok(())
    }

    /// Look up a capability by exact name.
    pub fn find(&self, name: &str) -> Result<Arc<Capability>, RegistryError> {
        self.lock()
            .capabilities
            .iter()
            .find(|c| c.name() == name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownCapability(name.to_string()))
    }

    /// Current capabilities in registration order.
    pub fn list(&self) -> Vec<Arc<Capability>> {
        self.lock().capabilities.clone()
    }

    /// Model-facing definitions in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.lock().capabilities.iter().map(|c| c.definition()).collect()
    }

    /// Capability names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.lock()
            .capabilities
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().capabilities.is_empty()
    }

    pub fn state(&self) -> DiscoveryState {
        match self.lock().phase {
            Phase::NotStarted => DiscoveryState::NotStarted,
            Phase::InProgress(_) => DiscoveryState::InProgress,
            Phase::Done => DiscoveryState::Done,
            Phase::Failed(_) => DiscoveryState::Failed,
        }
    }

    /// Run `discover` once for the lifetime of the registry.
    ///
    /// The first caller runs it; concurrent callers wait for that same run and
    /// share its outcome; later callers return immediately. If the running
    /// caller is cancelled, one of the waiters takes over.
    pub async fn ensure_discovered<F, Fut>(&self, discover: F) -> Result<(), RegistryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Capability>, DiscoveryError>>,
    {
        let sender = loop {
            let mut receiver = {
                let mut inner = self.lock();
                let in_flight = match &inner.phase {
                    Phase::Done => return Ok(()),
                    Phase::Failed(e) => return Err(e.clone().into()),
                    Phase::InProgress(rx) => Some(rx.clone()),
                    Phase::NotStarted => None,
                };
                match in_flight {
                    Some(rx) => rx,
                    None => {
                        let (tx, rx) = watch::channel(None);
                        inner.phase = Phase::InProgress(rx);
                        break tx;
                    }
                }
            };

            debug!("capability discovery in progress; waiting");
            let outcome = receiver
                .wait_for(Option::is_some)
                .await
                .map(|outcome| (*outcome).clone());
            match outcome {
                Ok(Some(Ok(()))) => return Ok(()),
                Ok(Some(Err(e))) => return Err(e.into()),
                // Leader went away without an outcome; compete again.
                Ok(None) | Err(_) => continue,
            }
        };

        info!("starting capability discovery");
        let leader = Leader {
            registry: self,
            sender: Some(sender),
        };
        let result = discover().await;
        leader.finish(result)
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new(DiscoveryFailurePolicy::default())
    }
}

// ─────────────────────────────────────────────
// Leader guard
// ─────────────────────────────────────────────

/// Held by the caller running discovery. Dropping it unfinished (the
/// caller's future was cancelled) resets the registry to `NotStarted`.
struct Leader<'a> {
    registry: &'a CapabilityRegistry,
    sender: Option<watch::Sender<Outcome>>,
}

impl Leader<'_> {
    fn finish(
        mut self,
        result: Result<Vec<Capability>, DiscoveryError>,
    ) -> Result<(), RegistryError> {
        let Some(sender) = self.sender.take() else {
            return Ok(());
        };
        let mut inner = self.registry.lock();
        match result {
            Ok(discovered) => {
                let mut added = 0usize;
                for capability in discovered {
                    if inner.contains(capability.name()) {
                        warn!(capability = capability.name(), "skipping discovered capability with duplicate name");
                        continue;
                    }
                    inner.capabilities.push(Arc::new(capability));
                    added += 1;
                }
                inner.phase = Phase::Done;
                drop(inner);
                sender.send_replace(Some(Ok(())));
                info!(added, "capability discovery complete");
                Ok(())
            }
            Err(e) => {
                inner.phase = match self.registry.policy {
                    DiscoveryFailurePolicy::Retry => Phase::NotStarted,
                    DiscoveryFailurePolicy::Fatal => Phase::Failed(e.clone()),
                };
                drop(inner);
                sender.send_replace(Some(Err(e.clone())));
                warn!(error = %e, policy = ?self.registry.policy, "capability discovery failed");
                Err(e.into())
            }
        }
    }
}

impl Drop for Leader<'_> {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            warn!("capability discovery cancelled; resetting");
            self.registry.lock().phase = Phase::NotStarted;
            // Waiters observe the closed channel and retry.
            drop(sender);
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
