//! Application options

use std::path::PathBuf;

use crate::storage::layout::{ProjectLayout, StorageLayout};
use crate::swap::GateSettings;

/// What a single invocation does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Roll a new version of the primary application
    Deploy,

    /// Deploy the checked out commit as a preview environment
    Preview { hash: Option<String> },

    /// Print the preview environments table
    PreviewList,

    /// Tear down one preview environment
    PreviewRemove { hash: String },
}

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Project directory holding the sources and the app record
    pub project_dir: PathBuf,

    /// Operator storage (settings, logs, control sockets)
    pub storage: StorageLayout,

    /// Health gate budget for the blue-green swap
    pub gate: GateSettings,

    /// Colour and glyphs in the live display
    pub styled: bool,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            storage: StorageLayout::default(),
            gate: GateSettings::default(),
            styled: true,
        }
    }
}

impl AppOptions {
    pub fn project(&self) -> ProjectLayout {
        ProjectLayout::new(&self.project_dir)
    }
}
