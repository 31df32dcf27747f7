//! Metadata assembly
//!
//! Which blocks a hop carries is decided once from the endpoint kinds
//! ([`MetadataKind`]); the configured plugins then fill the blocks. Only
//! `archive_metadata` is capped: its compact JSON encoding must fit the byte
//! limit before anything is attached to the job.

use crate::error::{JobParamsError, PipelineError};
use crate::plugin::{HintFragment, HintPlugin, HintTarget, PluginSettings};
use crate::registry::PluginRegistry;
use conveyor_core_pathfinder::Hop;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Metadata blocks a hop is eligible for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataKind {
    None,
    /// Destination is tape
    Archive,
    /// Source is tape
    Staging,
    Both,
}

impl MetadataKind {
    pub fn for_hop(hop: &Hop) -> Self {
        match (hop.source.is_tape(), hop.destination.is_tape()) {
            (false, false) => MetadataKind::None,
            (false, true) => MetadataKind::Archive,
            (true, false) => MetadataKind::Staging,
            (true, true) => MetadataKind::Both,
        }
    }

    pub fn archive(self) -> bool {
        matches!(self, MetadataKind::Archive | MetadataKind::Both)
    }

    pub fn staging(self) -> bool {
        matches!(self, MetadataKind::Staging | MetadataKind::Both)
    }
}

/// Assembled metadata for one hop; `None` means the key is omitted
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HopMetadata {
    pub archive: Option<Value>,
    pub staging: Option<Value>,
}

/// Ordered plugin chain plus the size cap
#[derive(Clone)]
pub struct MetadataPipeline {
    plugins: Vec<Arc<dyn HintPlugin>>,
    byte_limit: usize,
}

impl MetadataPipeline {
    pub const ARCHIVE_BLOCK: &'static str = "archive_metadata";
    pub const DEFAULT_BYTE_LIMIT: usize = 4096;

    /// Instantiate the named plugins in order
    ///
    /// Every name must be registered; the first unknown one aborts
    /// construction.
    pub fn new<S: AsRef<str>>(
        registry: &PluginRegistry,
        names: &[S],
        settings: &PluginSettings,
        byte_limit: usize,
    ) -> Result<Self, PipelineError> {
        let plugins = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                registry
                    .get(name)
                    .map(|factory| factory(settings))
                    .ok_or_else(|| PipelineError::UnknownPlugin {
                        name: name.to_string(),
                        available: registry.names(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            plugins = ?plugins.iter().map(|p| p.name().to_string()).collect::<Vec<_>>(),
            byte_limit,
            "Metadata pipeline ready"
        );

        Ok(Self {
            plugins,
            byte_limit,
        })
    }

    /// Pipeline with no plugins
    pub fn empty(byte_limit: usize) -> Self {
        Self {
            plugins: Vec::new(),
            byte_limit,
        }
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn byte_limit(&self) -> usize {
        self.byte_limit
    }

    /// Build the metadata blocks for `hop`
    ///
    /// `archive_metadata` needs a tape destination and at least one
    /// archive-target plugin. `staging_metadata` is present for every tape
    /// source and names the hop's activity under `default`. An archive block
    /// over the byte limit fails the whole hop; the staging block is never
    /// size-checked.
    pub fn assemble(&self, hop: &Hop) -> Result<HopMetadata, JobParamsError> {
        let kind = MetadataKind::for_hop(hop);
        let mut metadata = HopMetadata::default();

        if kind.archive() {
            let archive_plugins: Vec<&Arc<dyn HintPlugin>> = self
                .plugins
                .iter()
                .filter(|p| p.target() == HintTarget::Archive)
                .collect();

            if !archive_plugins.is_empty() {
                let mut block = HintFragment::new();
                for plugin in archive_plugins {
                    merge_fragment(&mut block, plugin.hints(hop));
                }
                let block = Value::Object(block);
                self.check_size(Self::ARCHIVE_BLOCK, &block)?;
                metadata.archive = Some(block);
            }
        }

        if kind.staging() {
            let mut block = HintFragment::new();
            block.insert("default".to_string(), json!({ "activity": hop.activity }));
            for plugin in self.plugins.iter().filter(|p| p.target() == HintTarget::Staging) {
                merge_fragment(&mut block, plugin.hints(hop));
            }
            metadata.staging = Some(Value::Object(block));
        }

        Ok(metadata)
    }

    fn check_size(&self, block: &'static str, value: &Value) -> Result<(), JobParamsError> {
        let size = serde_json::to_vec(value)
            .map_err(|source| JobParamsError::Serialize { block, source })?
            .len();

        if size > self.byte_limit {
            return Err(JobParamsError::MetadataTooLarge {
                block,
                size,
                limit: self.byte_limit,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for MetadataPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataPipeline")
            .field("plugins", &self.plugin_names())
            .field("byte_limit", &self.byte_limit)
            .finish()
    }
}

/// Deep merge: nested objects combine, any other value is replaced
fn merge_fragment(into: &mut HintFragment, fragment: HintFragment) {
    for (key, value) in fragment {
        match value {
            Value::Object(incoming) => {
                if let Some(Value::Object(existing)) = into.get_mut(&key) {
                    merge_fragment(existing, incoming);
                } else {
                    into.insert(key, Value::Object(incoming));
                }
            }
            value => {
                into.insert(key, value);
            }
        }
    }
}
