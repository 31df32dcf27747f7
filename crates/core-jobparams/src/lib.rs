//! Core-JobParams: Job Parameter Assembly
//!
//! Produces the payload the external transfer service receives for each
//! hop of a transfer path, including the optional tape hint blocks:
//!
//! - `archive_metadata` for hops writing to tape, filled by the configured
//!   hint plugins (e.g. `scheduling_hints`, `collocation_hints`)
//! - `staging_metadata` for hops reading from tape
//!
//! Plugins are looked up by name in a [`PluginRegistry`] when the
//! [`MetadataPipeline`] is built, so a misspelt plugin name fails at
//! startup rather than during submission.

pub mod error;
pub mod params;
pub mod pipeline;
pub mod plugin;
pub mod registry;

pub use error::{JobParamsError, PipelineError, RegistryError};
pub use params::{JobDefaults, JobParams, JobParamsBuilder};
pub use pipeline::{HopMetadata, MetadataKind, MetadataPipeline};
pub use plugin::{ActivityPlugin, DefaultPlugin, HintFragment, HintPlugin, HintTarget, PluginSettings};
pub use registry::{PluginFactory, PluginRegistry, PluginRegistryBuilder};
