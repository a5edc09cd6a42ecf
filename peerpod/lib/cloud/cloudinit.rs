//! A minimal cloud-init document used to ship configuration files to a new instance.

use getset::Getters;
use serde::{Deserialize, Serialize};

use crate::PeerpodResult;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The header every cloud-init user-data document starts with.
pub const CLOUD_CONFIG_HEADER: &str = "#cloud-config";

/// The permissions given to written files unless overridden.
const DEFAULT_FILE_PERMISSIONS: &str = "0600";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A cloud-init `#cloud-config` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct CloudConfig {
    /// The files written on first boot.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    write_files: Vec<WriteFile>,
}

/// A file written by cloud-init on first boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct WriteFile {
    /// The absolute guest path.
    path: String,

    /// The file contents.
    content: String,

    /// The octal file mode.
    permissions: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CloudConfig {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file, replacing any earlier file with the same path.
    pub fn add_file(&mut self, path: impl Into<String>, content: impl Into<String>) -> &mut Self {
        let path = path.into();
        self.write_files.retain(|file| file.path != path);
        self.write_files.push(WriteFile {
            path,
            content: content.into(),
            permissions: DEFAULT_FILE_PERMISSIONS.to_string(),
        });
        self
    }

    /// Returns the file written at `path`, if any.
    pub fn file(&self, path: &str) -> Option<&WriteFile> {
        self.write_files.iter().find(|file| file.path == path)
    }

    /// Renders the user-data document.
    pub fn generate(&self) -> PeerpodResult<String> {
        let body = serde_yaml::to_string(self)?;
        Ok(format!("{CLOUD_CONFIG_HEADER}\n{body}"))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
