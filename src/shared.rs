//! The registry directory.
//!
//! [`SharedMetricRegistries`] owns one [`MetricRegistry`] per scope, all backed
//! by a single shared meter store. Cloning it is cheap and every clone sees the
//! same registries.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::MetricsConfig;
use crate::distribution::DistributionConfig;
use crate::error::Result;
use crate::export::{BackendCapabilities, PrometheusExporter};
use crate::gate::VisibilityGate;
use crate::registry::{MetricRegistry, APPLICATION_SCOPE, BASE_SCOPE, VENDOR_SCOPE};
use crate::store::MeterStore;
use crate::tags::{parse_global_tags, Tags};

/// Settings resolved once from [`MetricsConfig`] and shared by every registry.
#[derive(Debug, Clone, Default)]
pub struct RegistrySettings {
    global_tags: Tags,
    app_name: Option<String>,
    distribution: DistributionConfig,
    capabilities: BackendCapabilities,
}

impl RegistrySettings {
    pub fn from_config(config: &MetricsConfig) -> Result<Self> {
        let global_tags = match config.tags.as_deref() {
            Some(raw) => parse_global_tags(raw)?,
            None => Tags::new(),
        };
        Ok(Self {
            global_tags,
            app_name: config.effective_app_name().map(str::to_string),
            distribution: DistributionConfig::from_config(config)?,
            capabilities: BackendCapabilities::from_config(config),
        })
    }

    /// Tags attached to every exported meter.
    pub fn global_tags(&self) -> &Tags {
        &self.global_tags
    }

    pub fn app_name(&self) -> Option<&str> {
        self.app_name.as_deref()
    }

    pub fn distribution(&self) -> &DistributionConfig {
        &self.distribution
    }

    pub fn capabilities(&self) -> &BackendCapabilities {
        &self.capabilities
    }
}

struct SharedInner {
    registries: RwLock<HashMap<String, Arc<MetricRegistry>>>,
    store: Arc<MeterStore>,
    gates: VisibilityGate,
    settings: Arc<RegistrySettings>,
}

/// Directory of scoped registries.
///
/// # Example
///
/// ```ignore
/// use strata_metrics::SharedMetricRegistries;
///
/// let registries = SharedMetricRegistries::new();
/// registries.application().counter("requests")?.inc();
///
/// let text = registries.exporter()?.export_all_scopes()?.body;
/// ```
#[derive(Clone)]
pub struct SharedMetricRegistries {
    inner: Arc<SharedInner>,
}

impl Default for SharedMetricRegistries {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedMetricRegistries {
    /// Registries with the default configuration.
    pub fn new() -> Self {
        Self::with_settings(RegistrySettings::default())
    }

    pub fn from_config(config: MetricsConfig) -> Result<Self> {
        let settings = RegistrySettings::from_config(&config)?;
        info!(
            backend = %settings.capabilities().primary(),
            global_tags = %settings.global_tags(),
            app_name = ?settings.app_name(),
            "metric registries configured"
        );
        Ok(Self::with_settings(settings))
    }

    pub fn with_settings(settings: RegistrySettings) -> Self {
        Self {
            inner: Arc::new(SharedInner {
                registries: RwLock::new(HashMap::new()),
                store: Arc::new(MeterStore::new()),
                gates: VisibilityGate::new(),
                settings: Arc::new(settings),
            }),
        }
    }

    /// The registry for `scope`, created on first use.
    ///
    /// Every call for the same scope returns the same registry, including
    /// concurrent first calls. The base registry binds platform metrics once.
    pub fn get_or_create(&self, scope: &str) -> Arc<MetricRegistry> {
        let registry = self.get_or_create_inner(scope);
        if scope == BASE_SCOPE {
            registry.bind_platform_metrics();
        }
        registry
    }

    fn get_or_create_inner(&self, scope: &str) -> Arc<MetricRegistry> {
        // Fast path: read lock
        if let Some(registry) = self.inner.registries.read().get(scope) {
            return Arc::clone(registry);
        }

        // Slow path: write lock
        let mut registries = self.inner.registries.write();
        if let Some(registry) = registries.get(scope) {
            return Arc::clone(registry);
        }
        let registry = Arc::new(MetricRegistry::new(
            scope,
            Arc::clone(&self.inner.settings),
            Arc::clone(&self.inner.store),
            self.inner.gates.scope_gate(scope),
        ));
        registries.insert(scope.to_string(), Arc::clone(&registry));
        info!(scope, "created metric registry");
        registry
    }

    pub fn application(&self) -> Arc<MetricRegistry> {
        self.get_or_create(APPLICATION_SCOPE)
    }

    pub fn base(&self) -> Arc<MetricRegistry> {
        self.get_or_create(BASE_SCOPE)
    }

    pub fn vendor(&self) -> Arc<MetricRegistry> {
        self.get_or_create(VENDOR_SCOPE)
    }

    /// The registry for `scope` if it exists. Never creates one.
    pub fn registry(&self, scope: &str) -> Option<Arc<MetricRegistry>> {
        self.inner.registries.read().get(scope).cloned()
    }

    pub fn exists(&self, scope: &str) -> bool {
        self.inner.registries.read().contains_key(scope)
    }

    /// Existing scopes, sorted.
    pub fn scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self.inner.registries.read().keys().cloned().collect();
        scopes.sort();
        scopes
    }

    /// Drop the registry for `scope` along with its meters.
    ///
    /// Adapters still held by callers keep working in memory but are no longer
    /// exported. A registry handle held across the drop refuses new
    /// registrations with [`ScopeDropped`](crate::MetricsError::ScopeDropped).
    /// Getting the scope again creates a fresh, empty registry.
    pub fn drop_scope(&self, scope: &str) -> bool {
        let mut registries = self.inner.registries.write();
        let Some(registry) = registries.remove(scope) else {
            return false;
        };
        registry.clear();
        self.inner.store.detach(scope);
        debug!(scope, "dropped metric registry");
        true
    }

    /// Drop every registry.
    pub fn drop_all(&self) {
        for scope in self.scopes() {
            self.drop_scope(&scope);
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.inner.settings
    }

    /// An exporter over these registries. Fails if no exporting backend is available.
    pub fn exporter(&self) -> Result<PrometheusExporter> {
        self.inner.settings.capabilities().require_export()?;
        Ok(PrometheusExporter::new(self.clone()))
    }
}

impl std::fmt::Debug for SharedMetricRegistries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMetricRegistries")
            .field("scopes", &self.scopes())
            .finish()
    }
}
