use super::{FnOrchestration, OrchestrationHandler};
use crate::OrchestrationContext;
use crate::codec::Codec;
use crate::error::{RegistryError, ResolutionError};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// One registration: an orchestration name, an optional version, whether it is
/// the designated latest version, and the handler that runs it.
#[derive(Clone)]
pub struct OrchestrationFactory {
    name: String,
    version: Option<String>,
    is_latest: bool,
    handler: Arc<dyn OrchestrationHandler>,
}

impl OrchestrationFactory {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(OrchestrationContext, String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String, String>> + Send + 'static,
    {
        Self::from_handler(name, Arc::new(FnOrchestration(f)))
    }

    pub fn from_handler(name: impl Into<String>, handler: Arc<dyn OrchestrationHandler>) -> Self {
        Self {
            name: name.into(),
            version: None,
            is_latest: false,
            handler,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Mark this factory as the version used when callers name no version.
    pub fn latest(mut self) -> Self {
        self.is_latest = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn is_latest(&self) -> bool {
        self.is_latest
    }

    pub fn handler(&self) -> Arc<dyn OrchestrationHandler> {
        self.handler.clone()
    }
}

#[derive(Default)]
struct RegistryInner {
    unversioned: HashMap<String, Arc<dyn OrchestrationHandler>>,
    versioned: HashMap<String, BTreeMap<String, Arc<dyn OrchestrationHandler>>>,
    latest: HashMap<String, String>,
}

/// Immutable mapping from orchestration name (and version) to handler. Built
/// once at worker startup and shared by reference afterwards.
#[derive(Clone, Default)]
pub struct OrchestrationRegistry {
    inner: Arc<RegistryInner>,
}

impl OrchestrationRegistry {
    pub fn builder() -> OrchestrationRegistryBuilder {
        OrchestrationRegistryBuilder {
            inner: RegistryInner::default(),
            errors: Vec::new(),
        }
    }

    /// Resolve a handler. An unversioned registration wins outright; otherwise
    /// `version` selects an exact version and `None` selects the latest.
    pub fn resolve(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<Arc<dyn OrchestrationHandler>, ResolutionError> {
        if let Some(h) = self.inner.unversioned.get(name) {
            return Ok(h.clone());
        }
        let concrete = self.resolve_version(name, version)?;
        concrete
            .and_then(|v| self.resolve_exact(name, &v))
            .ok_or_else(|| ResolutionError::NotFound { name: name.to_string() })
    }

    /// The version `resolve` would run: `None` for an unversioned registration.
    pub fn resolve_version(&self, name: &str, version: Option<&str>) -> Result<Option<String>, ResolutionError> {
        if self.inner.unversioned.contains_key(name) {
            return Ok(None);
        }
        let Some(versions) = self.inner.versioned.get(name) else {
            return Err(ResolutionError::NotFound { name: name.to_string() });
        };
        match version {
            Some(v) if versions.contains_key(v) => Ok(Some(v.to_string())),
            Some(v) => Err(ResolutionError::VersionNotRegistered {
                name: name.to_string(),
                version: v.to_string(),
            }),
            None => self
                .inner
                .latest
                .get(name)
                .map(|v| Some(v.clone()))
                .ok_or_else(|| ResolutionError::NoLatestVersion { name: name.to_string() }),
        }
    }

    /// Convenience lookup with no version; `None` when nothing is runnable.
    pub fn get(&self, name: &str) -> Option<Arc<dyn OrchestrationHandler>> {
        self.resolve(name, None).ok()
    }

    pub fn resolve_exact(&self, name: &str, version: &str) -> Option<Arc<dyn OrchestrationHandler>> {
        self.inner.versioned.get(name)?.get(version).cloned()
    }

    pub fn latest_version(&self, name: &str) -> Option<String> {
        self.inner.latest.get(name).cloned()
    }

    pub fn list_orchestration_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .unversioned
            .keys()
            .chain(self.inner.versioned.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn list_orchestration_versions(&self, name: &str) -> Vec<String> {
        self.inner
            .versioned
            .get(name)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Collects registrations; `build` fails on the first registration error so a
/// misconfigured worker never starts.
pub struct OrchestrationRegistryBuilder {
    inner: RegistryInner,
    errors: Vec<RegistryError>,
}

impl OrchestrationRegistryBuilder {
    /// Register a factory, reporting the error immediately.
    pub fn try_add(&mut self, factory: OrchestrationFactory) -> Result<(), RegistryError> {
        let OrchestrationFactory {
            name,
            version,
            is_latest,
            handler,
        } = factory;
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        let Some(version) = version else {
            if self.inner.unversioned.contains_key(&name) {
                return Err(RegistryError::DuplicateOrchestration { name });
            }
            if self.inner.versioned.contains_key(&name) {
                return Err(RegistryError::MixedVersioning { name });
            }
            if is_latest {
                warn!(name = %name, "latest flag ignored on unversioned orchestration");
            }
            debug!(name = %name, "registered orchestration");
            self.inner.unversioned.insert(name, handler);
            return Ok(());
        };
        if self.inner.unversioned.contains_key(&name) {
            return Err(RegistryError::MixedVersioning { name });
        }
        if self
            .inner
            .versioned
            .get(&name)
            .is_some_and(|m| m.contains_key(&version))
        {
            return Err(RegistryError::DuplicateVersion { name, version });
        }
        if is_latest && let Some(existing) = self.inner.latest.get(&name) {
            return Err(RegistryError::DuplicateLatest {
                existing: existing.clone(),
                attempted: version,
                name,
            });
        }
        debug!(name = %name, version = %version, is_latest, "registered orchestration version");
        if is_latest {
            self.inner.latest.insert(name.clone(), version.clone());
        }
        self.inner.versioned.entry(name).or_default().insert(version, handler);
        Ok(())
    }

    /// Chaining form of `try_add`; errors surface from `build`.
    pub fn add(mut self, factory: OrchestrationFactory) -> Self {
        if let Err(e) = self.try_add(factory) {
            error!(error = %e, "orchestration registration rejected");
            self.errors.push(e);
        }
        self
    }

    pub fn register<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(OrchestrationContext, String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String, String>> + Send + 'static,
    {
        self.add(OrchestrationFactory::new(name, f))
    }

    pub fn register_typed<In, Out, F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        In: serde::de::DeserializeOwned + Send + 'static,
        Out: serde::Serialize + Send + 'static,
        F: Fn(OrchestrationContext, In) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = Result<Out, String>> + Send + 'static,
    {
        let wrapper = move |ctx: OrchestrationContext, input_s: String| {
            let f_inner = f.clone();
            async move {
                let input: In = crate::codec::Json::decode(&input_s)?;
                let out: Out = f_inner(ctx, input).await?;
                crate::codec::Json::encode(&out)
            }
        };
        self.add(OrchestrationFactory::new(name, wrapper))
    }

    /// Register a version that is only selected when requested explicitly.
    pub fn register_versioned<F, Fut>(self, name: impl Into<String>, version: impl Into<String>, f: F) -> Self
    where
        F: Fn(OrchestrationContext, String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String, String>> + Send + 'static,
    {
        self.add(OrchestrationFactory::new(name, f).with_version(version))
    }

    /// Register a version and mark it latest for its name.
    pub fn register_latest<F, Fut>(self, name: impl Into<String>, version: impl Into<String>, f: F) -> Self
    where
        F: Fn(OrchestrationContext, String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String, String>> + Send + 'static,
    {
        self.add(OrchestrationFactory::new(name, f).with_version(version).latest())
    }

    pub fn build(self) -> Result<OrchestrationRegistry, RegistryError> {
        match self.errors.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(OrchestrationRegistry {
                inner: Arc::new(self.inner),
            }),
        }
    }
}
