//! Settings file management

use std::path::PathBuf;
use std::sync::Arc;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::errors::DockhandError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Operator settings shared by every application on the host
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Address of the target host
    pub server_address: String,

    /// Remote user the deployments run as
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,

    /// Remote ssh port
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Identity file, when the ssh agent should not pick one
    #[serde(default)]
    pub identity_file: Option<PathBuf>,

    /// Age public key env files are encrypted to
    #[serde(default)]
    pub public_key: String,

    /// Age secret key exported on the host when encrypted env files are used
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub secret_key: Option<Arc<SecretString>>,

    /// Compose project every service is grouped under
    #[serde(default = "default_project")]
    pub project: String,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

fn default_ssh_user() -> String {
    "dockhand".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_project() -> String {
    "dockhand".to_string()
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<Arc<SecretString>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .filter(|s| !s.is_empty())
        .map(|s| Arc::new(SecretString::from(s))))
}

impl Settings {
    /// Load and validate settings
    pub async fn load(file: &File) -> Result<Self, DockhandError> {
        if !file.exists().await {
            return Err(DockhandError::ConfigError(format!(
                "settings not found at {}",
                file.path().display()
            )));
        }

        let settings: Settings = file.read_json().await?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), DockhandError> {
        if self.server_address.trim().is_empty() {
            return Err(DockhandError::ConfigError(
                "server_address is empty".to_string(),
            ));
        }
        if self.project.trim().is_empty() {
            return Err(DockhandError::ConfigError("project is empty".to_string()));
        }
        Ok(())
    }
}
