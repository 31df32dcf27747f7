//! Plugin registry
//!
//! Maps plugin names to factories. A registry is assembled once at startup
//! (optionally installed as the process-wide instance) and only read from
//! afterwards, so lookups need no locking.

use crate::error::RegistryError;
use crate::plugin::{ActivityPlugin, DefaultPlugin, HintPlugin, PluginSettings};
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Factory function type for creating plugins
pub type PluginFactory = Arc<dyn Fn(&PluginSettings) -> Arc<dyn HintPlugin> + Send + Sync>;

/// Immutable name → factory table
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginRegistry {
    pub fn builder() -> PluginRegistryBuilder {
        PluginRegistryBuilder::default()
    }

    /// Registry holding only the built-in plugins
    pub fn with_builtins() -> Self {
        Self::builder().with_builtins().build()
    }

    pub fn get(&self, name: &str) -> Option<&PluginFactory> {
        self.factories.get(name)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}

/// Collects factories before the registry is frozen
#[derive(Default)]
pub struct PluginRegistryBuilder {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginRegistryBuilder {
    /// Register a factory; a later registration under the same name replaces it
    pub fn register(mut self, name: impl Into<String>, factory: PluginFactory) -> Self {
        self.factories.insert(name.into(), factory);
        self
    }

    pub fn with_builtins(self) -> Self {
        self.register(
            ActivityPlugin::NAME,
            Arc::new(|settings: &PluginSettings| {
                Arc::new(ActivityPlugin::new(settings.clone())) as Arc<dyn HintPlugin>
            }),
        )
        .register(
            DefaultPlugin::NAME,
            Arc::new(|_: &PluginSettings| Arc::new(DefaultPlugin) as Arc<dyn HintPlugin>),
        )
    }

    pub fn build(self) -> PluginRegistry {
        PluginRegistry {
            factories: self.factories,
        }
    }
}

static GLOBAL_REGISTRY: OnceCell<Arc<PluginRegistry>> = OnceCell::new();

/// Install the process-wide registry
///
/// Must happen before the first call to [`global`]; fails if a registry is
/// already in place.
pub fn install(registry: PluginRegistry) -> Result<Arc<PluginRegistry>, RegistryError> {
    let registry = Arc::new(registry);
    GLOBAL_REGISTRY
        .set(registry.clone())
        .map_err(|_| RegistryError::AlreadyInstalled)?;
    Ok(registry)
}

/// The process-wide registry; built-ins only if nothing was installed
pub fn global() -> Arc<PluginRegistry> {
    GLOBAL_REGISTRY
        .get_or_init(|| Arc::new(PluginRegistry::with_builtins()))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::HintFragment;
    use conveyor_core_pathfinder::Hop;

    struct Named(&'static str);

    impl HintPlugin for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn hints(&self, _hop: &Hop) -> HintFragment {
            HintFragment::new()
        }
    }

    #[test]
    fn test_builtins_registered() {
        let registry = PluginRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["activity", "def"]);
        assert!(!registry.is_registered("test"));
    }

    #[test]
    fn test_later_registration_replaces() {
        let registry = PluginRegistry::builder()
            .register("x", Arc::new(|_: &PluginSettings| Arc::new(Named("first")) as Arc<dyn HintPlugin>))
            .register("x", Arc::new(|_: &PluginSettings| Arc::new(Named("second")) as Arc<dyn HintPlugin>))
            .build();

        let plugin = (registry.get("x").unwrap())(&PluginSettings::default());
        assert_eq!(plugin.name(), "second");
    }

    #[test]
    fn test_global_install_once() {
        // First access freezes the global registry; installing afterwards fails
        let global = global();
        assert!(global.is_registered("activity"));
        assert_eq!(
            install(PluginRegistry::with_builtins()).unwrap_err(),
            RegistryError::AlreadyInstalled
        );
    }
}
