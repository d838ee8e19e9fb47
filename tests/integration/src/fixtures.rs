//! Gateway configuration and request fixtures

use serde_json::{json, Value};
use std::fmt::Write as _;

/// One local instance entry
#[derive(Debug, Clone)]
struct InstanceFixture {
    id: String,
    model: String,
    base_url: String,
    gpu_id: u32,
    max_concurrency: u32,
}

/// One external backend entry
#[derive(Debug, Clone)]
struct ExternalFixture {
    id: String,
    model: String,
    base_url: String,
}

/// One agent entry
#[derive(Debug, Clone)]
struct AgentFixture {
    agent_type: String,
    model: Option<String>,
    external: Vec<String>,
}

/// Builder for a gateway YAML document with test-friendly timings
#[derive(Debug, Clone)]
pub struct ConfigFixture {
    queue_max_depth: usize,
    batch_size: usize,
    result_ttl_ms: u64,
    default_timeout_secs: u64,
    max_retries: u32,
    gpus: Vec<u32>,
    instances: Vec<InstanceFixture>,
    external: Vec<ExternalFixture>,
    agents: Vec<AgentFixture>,
}

impl Default for ConfigFixture {
    fn default() -> Self {
        Self {
            queue_max_depth: 64,
            batch_size: 4,
            result_ttl_ms: 60_000,
            default_timeout_secs: 30,
            max_retries: 2,
            gpus: vec![0],
            instances: Vec::new(),
            external: Vec::new(),
            agents: Vec::new(),
        }
    }
}

impl ConfigFixture {
    /// Start an empty fixture
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue capacity
    #[must_use]
    pub fn queue_max_depth(mut self, depth: usize) -> Self {
        self.queue_max_depth = depth;
        self
    }

    /// Set the batch size
    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set how long terminal tasks are retained
    #[must_use]
    pub fn result_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.result_ttl_ms = ttl_ms;
        self
    }

    /// Set the default task timeout
    #[must_use]
    pub fn default_timeout_secs(mut self, secs: u64) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    /// Set retries per candidate
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Declare the GPUs the static source reports (all idle)
    #[must_use]
    pub fn gpus(mut self, gpu_ids: &[u32]) -> Self {
        self.gpus = gpu_ids.to_vec();
        self
    }

    /// Add a local instance
    #[must_use]
    pub fn instance(
        mut self,
        id: &str,
        model: &str,
        base_url: &str,
        gpu_id: u32,
        max_concurrency: u32,
    ) -> Self {
        self.instances.push(InstanceFixture {
            id: id.to_string(),
            model: model.to_string(),
            base_url: base_url.to_string(),
            gpu_id,
            max_concurrency,
        });
        self
    }

    /// Add an external backend
    #[must_use]
    pub fn external(mut self, id: &str, model: &str, base_url: &str) -> Self {
        self.external.push(ExternalFixture {
            id: id.to_string(),
            model: model.to_string(),
            base_url: base_url.to_string(),
        });
        self
    }

    /// Add an agent served by a local model
    #[must_use]
    pub fn agent(mut self, agent_type: &str, model: &str) -> Self {
        self.agents.push(AgentFixture {
            agent_type: agent_type.to_string(),
            model: Some(model.to_string()),
            external: Vec::new(),
        });
        self
    }

    /// Add an agent that tries `external` before its local model
    #[must_use]
    pub fn agent_with_fallback(
        mut self,
        agent_type: &str,
        external: &[&str],
        model: Option<&str>,
    ) -> Self {
        self.agents.push(AgentFixture {
            agent_type: agent_type.to_string(),
            model: model.map(str::to_string),
            external: external.iter().map(|s| (*s).to_string()).collect(),
        });
        self
    }

    /// Render the YAML document
    pub fn to_yaml(&self) -> String {
        let mut yaml = format!(
            r"server:
  host: 127.0.0.1
  request_timeout: 60s
  shutdown_timeout: 2s
scheduler:
  queue_max_depth: {queue}
  batch_size: {batch}
  batch_timeout: 10ms
  max_wait: 5s
  result_ttl: {ttl}ms
  default_timeout: {timeout}s
  dispatch_interval: 2ms
router:
  max_retries: {retries}
  base_delay: 5ms
  max_delay: 20ms
  multiplier: 2.0
  jitter: 0.0
  call_timeout: 10s
load_balancer:
  max_memory_percent: 90.0
  critical_temperature_celsius: 85.0
orchestrator:
  default_timeout: 30s
telemetry:
  gpu_source: static
  poll_interval: 20ms
  probe_interval: 50ms
  degraded_after_failures: 100
",
            queue = self.queue_max_depth,
            batch = self.batch_size,
            ttl = self.result_ttl_ms,
            timeout = self.default_timeout_secs,
            retries = self.max_retries,
        );

        yaml.push_str("  static_gpus:\n");
        for gpu in &self.gpus {
            let _ = writeln!(
                yaml,
                "    - {{ gpu_id: {gpu}, memory_used_mb: 1000, memory_total_mb: 80000, utilization_percent: 10.0, temperature_celsius: 50.0 }}"
            );
        }

        yaml.push_str("backends:\n");
        for i in &self.instances {
            let _ = writeln!(
                yaml,
                "  - {{ id: {}, model: {}, base_url: \"{}\", gpu_id: {}, max_concurrency: {} }}",
                i.id, i.model, i.base_url, i.gpu_id, i.max_concurrency
            );
        }
        if self.instances.is_empty() {
            yaml.push_str("  []\n");
        }

        yaml.push_str("external_backends:\n");
        for e in &self.external {
            let _ = writeln!(
                yaml,
                "  - {{ id: {}, model: {}, base_url: \"{}\" }}",
                e.id, e.model, e.base_url
            );
        }
        if self.external.is_empty() {
            yaml.push_str("  []\n");
        }

        yaml.push_str("agents:\n");
        for a in &self.agents {
            let _ = writeln!(yaml, "  - agent_type: {}", a.agent_type);
            if let Some(model) = &a.model {
                let _ = writeln!(yaml, "    model: {model}");
            }
            if !a.external.is_empty() {
                let _ = writeln!(yaml, "    external: [{}]", a.external.join(", "));
            }
        }
        if self.agents.is_empty() {
            yaml.push_str("  []\n");
        }
        yaml
    }
}

/// Task submission body
pub fn task_body(agent_type: &str, prompt: &str) -> Value {
    json!({
        "agent_type": agent_type,
        "messages": [{"role": "user", "content": prompt}],
    })
}

/// Task submission body with a caller chosen id and dependencies
pub fn task_body_with_id(
    id: &str,
    agent_type: &str,
    prompt: &str,
    dependencies: &[&str],
) -> Value {
    json!({
        "id": id,
        "agent_type": agent_type,
        "messages": [{"role": "user", "content": prompt}],
        "dependencies": dependencies,
    })
}

/// Workflow submission body
pub fn workflow_body(id: &str, tasks: Vec<Value>) -> Value {
    json!({
        "id": id,
        "workflow_type": "test",
        "tasks": tasks,
        "context": {"case": id},
    })
}
