//! Inventory of Slurm compute nodes.
//!
//! The [`notifier::Notifier`] produces refresh signals on a fixed interval and when the Slurm
//! configuration changes. The [`exporter::Exporter`] reacts to each signal by running the
//! inventory command, turning its output into [`record::NodeRecord`]s and merging them into
//! the [`registry::ResourceRegistry`], which is read by the rest of the adapter.

pub mod config;
pub mod exporter;
pub mod inventory;
pub mod notifier;
pub mod parser;
pub mod record;
pub mod registry;
pub mod state;

pub use config::ExporterConfig;
pub use exporter::{ExporterHandle, start_exporter};
pub use record::NodeRecord;
pub use registry::{ResourceRegistry, UpdatePolicy};
