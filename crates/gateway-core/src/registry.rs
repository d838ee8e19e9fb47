//! Backend registry.
//!
//! The registry is an immutable, versioned snapshot of every backend and the
//! agent-type routing table. Readers grab an `Arc` of the current snapshot and
//! keep a consistent view for as long as they hold it; updates build a whole
//! new snapshot and swap it in atomically.

use crate::backend::{BackendInstance, ExternalBackend};
use crate::error::GatewayError;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Routing entry for one agent type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRoute {
    /// Agent type key
    pub agent_type: String,
    /// Preferred local model, served by one or more instances
    pub model: Option<String>,
    /// External backend ids tried before local instances, in order
    pub external: Vec<String>,
}

impl AgentRoute {
    /// Route to a local model only
    #[must_use]
    pub fn local(agent_type: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            model: Some(model.into()),
            external: Vec::new(),
        }
    }

    /// Add an external backend ahead of the local model
    #[must_use]
    pub fn with_external(mut self, backend_id: impl Into<String>) -> Self {
        self.external.push(backend_id.into());
        self
    }
}

/// Resolution of an agent type against a snapshot
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    /// Key shared by all tasks that batch together
    pub group_key: String,
    /// Local model, if any
    pub model: Option<String>,
    /// Enabled external backends, in order
    pub external: Vec<Arc<ExternalBackend>>,
    /// Concurrent calls the group can absorb: the model's instance capacity,
    /// or the external backends' limits when there is no local model
    pub capacity: u32,
}

/// Immutable registry contents
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    version: u64,
    instances: HashMap<String, Arc<BackendInstance>>,
    external: HashMap<String, Arc<ExternalBackend>>,
    agents: HashMap<String, AgentRoute>,
}

impl RegistrySnapshot {
    /// Start building a snapshot
    #[must_use]
    pub fn builder() -> RegistrySnapshotBuilder {
        RegistrySnapshotBuilder::default()
    }

    /// Monotonic version, bumped on every publish
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Look up an agent route
    #[must_use]
    pub fn agent(&self, agent_type: &str) -> Option<&AgentRoute> {
        self.agents.get(agent_type)
    }

    /// Whether `agent_type` is routable
    #[must_use]
    pub fn has_agent(&self, agent_type: &str) -> bool {
        self.agents.contains_key(agent_type)
    }

    /// All agent types, sorted
    #[must_use]
    pub fn agent_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.agents.keys().cloned().collect();
        types.sort();
        types
    }

    /// Look up an instance by id
    #[must_use]
    pub fn instance(&self, id: &str) -> Option<Arc<BackendInstance>> {
        self.instances.get(id).cloned()
    }

    /// All local instances, sorted by id
    #[must_use]
    pub fn instances(&self) -> Vec<Arc<BackendInstance>> {
        let mut all: Vec<_> = self.instances.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Instances serving `model`, sorted by id
    #[must_use]
    pub fn instances_for_model(&self, model: &str) -> Vec<Arc<BackendInstance>> {
        let mut matching: Vec<_> = self
            .instances
            .values()
            .filter(|i| i.model_name == model)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        matching
    }

    /// Sum of `max_concurrency` across the instances serving `model`
    #[must_use]
    pub fn model_capacity(&self, model: &str) -> u32 {
        self.instances
            .values()
            .filter(|i| i.model_name == model)
            .map(|i| i.max_concurrency)
            .sum()
    }

    /// Look up an external backend by id
    #[must_use]
    pub fn external_backend(&self, id: &str) -> Option<Arc<ExternalBackend>> {
        self.external.get(id).cloned()
    }

    /// All external backends, sorted by id
    #[must_use]
    pub fn external_backends(&self) -> Vec<Arc<ExternalBackend>> {
        let mut all: Vec<_> = self.external.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Distinct GPU ids referenced by local instances
    #[must_use]
    pub fn gpu_ids(&self) -> BTreeSet<u32> {
        self.instances.values().map(|i| i.gpu_id).collect()
    }

    /// Resolve an agent type to its batching group and candidates
    #[must_use]
    pub fn resolve(&self, agent_type: &str) -> Option<ResolvedRoute> {
        let route = self.agents.get(agent_type)?;
        let external: Vec<_> = route
            .external
            .iter()
            .filter_map(|id| self.external.get(id))
            .filter(|b| b.enabled)
            .cloned()
            .collect();
        let group_key = match &route.model {
            Some(model) => format!("model:{model}"),
            None => format!("external:{agent_type}"),
        };
        let capacity = match &route.model {
            Some(model) => self.model_capacity(model),
            None => external.iter().map(|b| b.max_concurrency).sum(),
        };
        Some(ResolvedRoute {
            group_key,
            model: route.model.clone(),
            external,
            capacity,
        })
    }
}

/// Builder for [`RegistrySnapshot`]
#[derive(Debug, Default)]
pub struct RegistrySnapshotBuilder {
    instances: Vec<BackendInstance>,
    external: Vec<ExternalBackend>,
    agents: Vec<AgentRoute>,
}

impl RegistrySnapshotBuilder {
    /// Add a local instance
    #[must_use]
    pub fn instance(mut self, instance: BackendInstance) -> Self {
        self.instances.push(instance);
        self
    }

    /// Add an external backend
    #[must_use]
    pub fn external(mut self, backend: ExternalBackend) -> Self {
        self.external.push(backend);
        self
    }

    /// Add an agent route
    #[must_use]
    pub fn agent(mut self, route: AgentRoute) -> Self {
        self.agents.push(route);
        self
    }

    /// Validate and build
    ///
    /// # Errors
    /// Returns a configuration error on duplicate ids, dangling references,
    /// zero concurrency, or agents with no candidate backend
    pub fn build(self) -> Result<RegistrySnapshot, GatewayError> {
        let mut instances = HashMap::new();
        for instance in self.instances {
            if instance.max_concurrency == 0 {
                return Err(GatewayError::configuration(format!(
                    "backend {} has max_concurrency 0",
                    instance.id
                )));
            }
            let id = instance.id.clone();
            if instances.insert(id.clone(), Arc::new(instance)).is_some() {
                return Err(GatewayError::configuration(format!(
                    "duplicate backend id {id}"
                )));
            }
        }

        let mut external = HashMap::new();
        for backend in self.external {
            let id = backend.id.clone();
            if instances.contains_key(&id) || external.insert(id.clone(), Arc::new(backend)).is_some() {
                return Err(GatewayError::configuration(format!(
                    "duplicate backend id {id}"
                )));
            }
        }

        let mut agents = HashMap::new();
        for route in self.agents {
            for id in &route.external {
                if !external.contains_key(id) {
                    return Err(GatewayError::configuration(format!(
                        "agent {} references unknown external backend {id}",
                        route.agent_type
                    )));
                }
            }
            if let Some(model) = &route.model {
                if !instances.values().any(|i: &Arc<BackendInstance>| &i.model_name == model) {
                    return Err(GatewayError::configuration(format!(
                        "agent {} prefers model {model} but no instance serves it",
                        route.agent_type
                    )));
                }
            } else if route.external.is_empty() {
                return Err(GatewayError::configuration(format!(
                    "agent {} has no model and no external backends",
                    route.agent_type
                )));
            }
            let key = route.agent_type.clone();
            if agents.insert(key.clone(), route).is_some() {
                return Err(GatewayError::configuration(format!(
                    "duplicate agent type {key}"
                )));
            }
        }

        Ok(RegistrySnapshot {
            version: 0,
            instances,
            external,
            agents,
        })
    }
}

/// Shared handle to the current registry snapshot
#[derive(Debug)]
pub struct BackendRegistry {
    current: ArcSwap<RegistrySnapshot>,
    publish_lock: Mutex<()>,
}

impl BackendRegistry {
    /// Create a registry from an initial snapshot (version 1)
    #[must_use]
    pub fn new(mut snapshot: RegistrySnapshot) -> Self {
        snapshot.version = 1;
        Self {
            current: ArcSwap::from_pointee(snapshot),
            publish_lock: Mutex::new(()),
        }
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Swap in a new snapshot, returning its version
    pub fn publish(&self, mut snapshot: RegistrySnapshot) -> u64 {
        let _guard = self.publish_lock.lock();
        let version = self.current.load().version + 1;
        snapshot.version = version;
        self.current.store(Arc::new(snapshot));
        version
    }
}
