//! Provider registry
//!
//! Holds adapter factories until `start_all`, drives lifecycle for every
//! enabled provider, and aggregates health. Explicitly constructed and
//! passed down; there is no global instance.

use crate::error::{Error, ProviderError, Result};
use crate::provider::adapter::ProviderAdapter;
use crate::types::{HealthReport, HealthState, ProviderSettings};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Builds an adapter instance from its settings when the registry starts it
pub type AdapterFactory =
    Box<dyn Fn(&ProviderSettings) -> Result<Arc<dyn ProviderAdapter>> + Send + Sync>;

struct Registration {
    factory: AdapterFactory,
    settings: ProviderSettings,
    instance: Option<Arc<dyn ProviderAdapter>>,
}

/// Per-provider outcomes of a `start_all`/`stop_all` sweep
#[derive(Debug, Default)]
pub struct LifecycleReport {
    pub succeeded: Vec<String>,
    pub failed: BTreeMap<String, String>,
    pub skipped_disabled: Vec<String>,
}

impl LifecycleReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Registry of configured provider adapters
pub struct ProviderRegistry {
    providers: RwLock<BTreeMap<String, Registration>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a factory. The adapter is not constructed until
    /// `start_all` runs for an enabled provider.
    pub async fn register(
        &self,
        id: impl Into<String>,
        factory: AdapterFactory,
        settings: ProviderSettings,
    ) -> Result<()> {
        let id = id.into();
        let mut providers = self.providers.write().await;
        if providers.contains_key(&id) {
            return Err(Error::Provider(ProviderError::AlreadyRegistered(id)));
        }
        info!("Registered provider {} (enabled: {})", id, settings.enabled);
        providers.insert(
            id,
            Registration {
                factory,
                settings,
                instance: None,
            },
        );
        Ok(())
    }

    /// Construct and start every enabled provider, collecting per-provider
    /// failures without aborting siblings.
    pub async fn start_all(&self) -> LifecycleReport {
        let mut report = LifecycleReport::default();
        let mut providers = self.providers.write().await;

        for (id, registration) in providers.iter_mut() {
            if !registration.settings.enabled {
                report.skipped_disabled.push(id.clone());
                continue;
            }

            let adapter = match &registration.instance {
                Some(existing) => Arc::clone(existing),
                None => match (registration.factory)(&registration.settings) {
                    Ok(adapter) => {
                        registration.instance = Some(Arc::clone(&adapter));
                        adapter
                    }
                    Err(e) => {
                        error!("Provider {} factory failed: {}", id, e);
                        report.failed.insert(id.clone(), e.to_string());
                        continue;
                    }
                },
            };

            match adapter.start().await {
                Ok(()) => report.succeeded.push(id.clone()),
                Err(e) => {
                    error!("Provider {} failed to start: {}", id, e);
                    report.failed.insert(id.clone(), e.to_string());
                }
            }
        }

        report
    }

    /// Stop every started provider, collecting failures
    pub async fn stop_all(&self) -> LifecycleReport {
        let mut report = LifecycleReport::default();
        let providers = self.providers.read().await;

        for (id, registration) in providers.iter() {
            let Some(adapter) = &registration.instance else {
                continue;
            };
            match adapter.stop().await {
                Ok(()) => report.succeeded.push(id.clone()),
                Err(e) => {
                    warn!("Provider {} failed to stop: {}", id, e);
                    report.failed.insert(id.clone(), e.to_string());
                }
            }
        }

        report
    }

    /// Health per provider id, probed concurrently so one slow provider
    /// does not stall the sweep. Disabled providers report `Disabled`
    /// without the adapter being constructed or invoked.
    pub async fn health_all(&self) -> BTreeMap<String, HealthReport> {
        let probes: Vec<(String, Option<Arc<dyn ProviderAdapter>>, bool)> = {
            let providers = self.providers.read().await;
            providers
                .iter()
                .map(|(id, r)| (id.clone(), r.instance.clone(), r.settings.enabled))
                .collect()
        };

        let reports = futures::future::join_all(probes.into_iter().map(
            |(id, instance, enabled)| async move {
                let report = if !enabled {
                    HealthReport::new(HealthState::Disabled, "provider disabled")
                } else {
                    match instance {
                        Some(adapter) => adapter.health().await,
                        None => HealthReport::new(HealthState::Unknown, "provider not started"),
                    }
                };
                (id, report)
            },
        ))
        .await;

        reports.into_iter().collect()
    }

    /// Started adapter by id, for routing prompt/approval traffic
    pub async fn get(&self, id: &str) -> Option<Arc<dyn ProviderAdapter>> {
        let providers = self.providers.read().await;
        providers.get(id).and_then(|r| r.instance.clone())
    }

    pub async fn provider_ids(&self) -> Vec<String> {
        self.providers.read().await.keys().cloned().collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
