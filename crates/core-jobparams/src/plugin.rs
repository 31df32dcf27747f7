//! Hint generator plugins
//!
//! A plugin is a pure function from a hop to a small JSON fragment. The
//! pipeline merges the fragments of all configured plugins into the
//! metadata block the plugin targets.

use conveyor_core_pathfinder::Hop;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// JSON object produced by a plugin
pub type HintFragment = Map<String, Value>;

/// Metadata block a plugin contributes to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HintTarget {
    /// `archive_metadata`, attached when the hop writes to tape
    #[default]
    Archive,
    /// `staging_metadata`, attached when the hop reads from tape
    Staging,
}

/// A named hint generator
pub trait HintPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn target(&self) -> HintTarget {
        HintTarget::Archive
    }

    fn hints(&self, hop: &Hop) -> HintFragment;
}

/// Settings handed to plugin factories when a pipeline is built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    /// Activity → archive priority
    pub priority_map: BTreeMap<String, i64>,
    /// Priority for activities missing from `priority_map`
    pub default_priority: i64,
}

impl PluginSettings {
    pub const DEFAULT_PRIORITY: i64 = 20;

    pub fn priority_for(&self, activity: &str) -> i64 {
        self.priority_map
            .get(activity)
            .copied()
            .unwrap_or(self.default_priority)
    }
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            priority_map: BTreeMap::new(),
            default_priority: Self::DEFAULT_PRIORITY,
        }
    }
}

/// Emits `scheduling_hints.priority` from the hop's activity
pub struct ActivityPlugin {
    settings: PluginSettings,
}

impl ActivityPlugin {
    pub const NAME: &'static str = "activity";

    pub fn new(settings: PluginSettings) -> Self {
        Self { settings }
    }
}

impl HintPlugin for ActivityPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn hints(&self, hop: &Hop) -> HintFragment {
        let priority = self.settings.priority_for(&hop.activity);
        let mut fragment = HintFragment::new();
        fragment.insert("scheduling_hints".to_string(), json!({ "priority": priority }));
        fragment
    }
}

/// Contributes nothing; selecting it keeps the archive block present
pub struct DefaultPlugin;

impl DefaultPlugin {
    pub const NAME: &'static str = "def";
}

impl HintPlugin for DefaultPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn hints(&self, _hop: &Hop) -> HintFragment {
        HintFragment::new()
    }
}
