//! Services manager for long-running and background services.
//!
//! Services register with the manager and are started/stopped together.
//! Start order respects [dependencies](Service::dependencies); a service is only
//! started after all of its dependencies, and stopped before them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Health status of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Result of a service health check.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ServiceHealth {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// A service that can be started, stopped and health-checked by the manager.
///
/// Use [tracing] for lifecycle logging and include the service name
/// (e.g. `tracing::info!(service = %self.name(), "Started")`).
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Unique name for logging and lookup (e.g. "database", "scheduler").
    fn name(&self) -> &str;

    /// Names of services that must be started before this one. Cycles are an error.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Start background tasks or connections.
    async fn start(&self) -> Result<()>;

    /// Stop background tasks and release resources.
    async fn stop(&self) -> Result<()>;

    /// Report current health. Used by the readiness endpoint.
    async fn health(&self) -> Result<ServiceHealth> {
        Ok(ServiceHealth::healthy())
    }
}

/// Registry and lifecycle controller for services.
#[derive(Default)]
pub struct ServicesManager {
    services: RwLock<HashMap<String, Arc<dyn Service>>>,
    started: RwLock<HashSet<String>>,
}

impl ServicesManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute start order from dependencies (topological order). Returns an error on unknown deps or cycles.
    async fn start_order(&self) -> Result<Vec<String>> {
        let guard = self.services.read().await;
        let mut deps: HashMap<String, Vec<String>> = HashMap::new();
        for (name, svc) in guard.iter() {
            let d = svc.dependencies();
            for dep in &d {
                if !guard.contains_key(dep) {
                    anyhow::bail!(
                        "Service {} depends on {} which is not registered",
                        name,
                        dep
                    );
                }
            }
            deps.insert(name.clone(), d);
        }
        drop(guard);

        // Kahn's algorithm, sorted so equal-rank services start in name order
        let mut in_degree: HashMap<&str, usize> =
            deps.iter().map(|(name, d)| (name.as_str(), d.len())).collect();
        let mut dependent_on: HashMap<&str, Vec<&str>> = HashMap::new();
        for (name, d) in &deps {
            for dep in d {
                dependent_on.entry(dep.as_str()).or_default().push(name.as_str());
            }
        }

        let mut queue: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        queue.sort_unstable_by(|a, b| b.cmp(a));

        let mut order = Vec::with_capacity(deps.len());
        while let Some(n) = queue.pop() {
            order.push(n.to_string());
            for s in dependent_on.get(n).map(Vec::as_slice).unwrap_or_default() {
                if let Some(deg) = in_degree.get_mut(s) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push(*s);
                    }
                }
            }
        }
        if order.len() != deps.len() {
            anyhow::bail!("Service dependency cycle detected");
        }
        Ok(order)
    }

    /// Register a service. Does not start it. If a service with the same name
    /// exists, it is replaced (the previous instance is not stopped).
    pub async fn register(&self, service: Arc<dyn Service>) {
        let name = service.name().to_string();
        let mut guard = self.services.write().await;
        if guard.insert(name.clone(), service).is_some() {
            warn!(service = %name, "Service '{}' reregistered, overwriting previous", name);
        } else {
            info!(service = %name, "Service '{}' registered", name);
        }
    }

    /// Start all registered services in dependency order (dependencies first).
    pub async fn start_all(&self) -> Result<()> {
        let order = self.start_order().await?;
        for name in &order {
            let svc = self.services.read().await.get(name).cloned();
            if let Some(s) = svc {
                if let Err(e) = s.start().await {
                    warn!(service = %name, error = %e, "Service '{}' start failed", name);
                    return Err(e).context(format!("failed to start service {}", name));
                }
                self.started.write().await.insert(name.clone());
                info!(service = %name, "Service '{}' started", name);
            }
        }
        Ok(())
    }

    /// Stop all started services in reverse dependency order (dependents first).
    pub async fn stop_all(&self) -> Result<()> {
        let order = self.start_order().await?;
        for name in order.into_iter().rev() {
            if !self.started.read().await.contains(&name) {
                continue;
            }
            let svc = self.services.read().await.get(&name).cloned();
            if let Some(s) = svc {
                if let Err(e) = s.stop().await {
                    warn!(service = %name, error = %e, "Service '{}' stop failed", name);
                } else {
                    info!(service = %name, "Service '{}' stopped", name);
                }
                self.started.write().await.remove(&name);
            }
        }
        Ok(())
    }

    /// Health check for all registered services. Services that are not started
    /// or whose check fails are reported as [Unhealthy](HealthStatus::Unhealthy).
    pub async fn health_all(&self) -> HashMap<String, ServiceHealth> {
        let services: Vec<(String, Arc<dyn Service>)> = self
            .services
            .read()
            .await
            .iter()
            .map(|(n, s)| (n.clone(), s.clone()))
            .collect();

        let mut out = HashMap::new();
        for (name, svc) in services {
            let health = if !self.is_started(&name).await {
                ServiceHealth::unhealthy("not started")
            } else {
                match svc.health().await {
                    Ok(h) => h,
                    Err(e) => ServiceHealth::unhealthy(e.to_string()),
                }
            };
            out.insert(name, health);
        }
        out
    }

    /// Return whether the given service is currently started (tracked by the manager).
    pub async fn is_started(&self, name: &str) -> bool {
        self.started.read().await.contains(name)
    }
}
