//! Per-application deployment record
//!
//! One YAML file per project directory. It is read once when a run starts and
//! written once when a run finishes successfully; a failed run never writes it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::info;

use crate::errors::DockhandError;
use crate::filesys::file::File;

/// Monotonic deployment counter, rendered as `V<n>`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(pub u64);

impl Version {
    /// The version a successful deployment moves to
    pub fn next(self) -> Result<Version, DockhandError> {
        self.0
            .checked_add(1)
            .map(Version)
            .ok_or_else(|| DockhandError::Precondition(format!("version counter {self} is exhausted")))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.0)
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .trim()
            .strip_prefix('V')
            .or_else(|| s.trim().strip_prefix('v'))
            .ok_or_else(|| format!("Invalid version (expected V<n>): {}", s))?;
        digits
            .parse::<u64>()
            .map(Version)
            .map_err(|_| format!("Invalid version (expected V<n>): {}", s))
    }
}

impl Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Env file tracked for the application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Env file path, relative to the project directory
    #[serde(default)]
    pub file: String,

    /// Content checksum of the env file when it was last encrypted
    #[serde(default)]
    pub hash: String,
}

impl EnvConfig {
    pub fn is_empty(&self) -> bool {
        self.file.is_empty()
    }
}

/// A commit-addressed deployment living next to the primary one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewEnvironment {
    /// Routed host name (no scheme)
    pub url: String,

    /// Image reference the preview runs
    pub image: String,

    /// RFC 3339 creation time
    pub created_at: String,
}

/// The persisted record of one application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRecord {
    /// Application (and primary service) name
    pub name: String,

    /// Version of the currently live deployment
    pub version: Version,

    /// Image reference of the currently live deployment
    #[serde(default)]
    pub image: String,

    /// Primary domain (no scheme)
    pub url: String,

    /// Port the application listens on inside its container
    pub port: u16,

    /// When the application was first launched
    #[serde(default)]
    pub created_at: String,

    /// Tracked env file
    #[serde(default, skip_serializing_if = "EnvConfig::is_empty")]
    pub env: EnvConfig,

    /// Preview environments keyed by short commit hash
    #[serde(default, alias = "previewEnvs")]
    pub preview_environments: BTreeMap<String, PreviewEnvironment>,
}

impl AppRecord {
    /// Whether the application declares an env file
    pub fn has_env_file(&self) -> bool {
        !self.env.is_empty()
    }

    /// Image repository name used for every tag of this application
    pub fn image_repository(&self) -> &str {
        &self.name
    }

    /// Directory holding the application on the remote host
    pub fn remote_dir(&self) -> String {
        self.name.clone()
    }

    /// Service name of a preview environment
    pub fn preview_service(&self, hash: &str) -> String {
        format!("{}-{}", self.name, hash)
    }

    /// Remote directory of a preview environment
    pub fn preview_dir(&self, hash: &str) -> String {
        format!("{}/preview/{}", self.name, hash)
    }

    /// Routed host name of a preview environment
    pub fn preview_host(&self, hash: &str) -> String {
        format!("{}.{}", hash, self.url)
    }

    /// Image reference of a preview environment
    pub fn preview_image(&self, hash: &str) -> String {
        format!("{}:{}", self.image_repository(), hash)
    }

    /// The name and domain end up in service names and routing rules
    pub fn validate(&self) -> Result<(), DockhandError> {
        let valid_name = !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if !valid_name {
            return Err(DockhandError::Precondition(format!(
                "invalid app name {:?}: use lowercase letters, digits, - and _",
                self.name
            )));
        }

        match url::Host::parse(&self.url) {
            Ok(url::Host::Domain(_)) => Ok(()),
            Ok(_) => Err(DockhandError::Precondition(format!(
                "app url {} must be a domain name",
                self.url
            ))),
            Err(e) => Err(DockhandError::Precondition(format!(
                "app url {:?} is not a bare domain ({e}); drop any scheme or path",
                self.url
            ))),
        }
    }
}

/// Reads and writes the application record file
#[derive(Debug, Clone)]
pub struct AppRecordStore {
    file: File,
}

impl AppRecordStore {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Load the record; a missing record is a precondition failure
    pub async fn load(&self) -> Result<AppRecord, DockhandError> {
        if !self.file.exists().await {
            return Err(DockhandError::Precondition(format!(
                "no app record at {}; launch the application first",
                self.file.path().display()
            )));
        }

        let record: AppRecord = self.file.read_yaml().await?;
        record.validate()?;
        Ok(record)
    }

    /// Replace the record on disk
    pub async fn save(&self, record: &AppRecord) -> Result<(), DockhandError> {
        self.file.write_yaml(record).await?;
        info!(
            "Saved app record {} at {} ({})",
            record.name,
            record.version,
            self.file.path().display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = r#"
name: api
version: V3
image: api:V3
url: api.example.com
port: 8080
createdAt: "2024-06-01T10:00:00Z"
env:
  file: .env
  hash: abc
previewEnvs:
  abc1234:
    url: abc1234.api.example.com
    image: api:abc1234
    createdAt: "2024-06-02T10:00:00Z"
"#;

    #[test]
    fn test_version_parse_and_next() {
        let version: Version = "V3".parse().unwrap();
        assert_eq!(version, Version(3));
        assert_eq!(version.next().unwrap().to_string(), "V4");
        assert!(matches!(
            Version(u64::MAX).next(),
            Err(DockhandError::Precondition(_))
        ));
        assert_eq!("V12".parse::<Version>().unwrap(), Version(12));
        assert!("3".parse::<Version>().is_err());
        assert!("Vx".parse::<Version>().is_err());
    }

    #[test]
    fn test_record_parses_legacy_preview_key() {
        let record: AppRecord = serde_yaml_ng::from_str(RECORD).unwrap();
        assert_eq!(record.version, Version(3));
        assert!(record.has_env_file());
        assert_eq!(
            record.preview_environments["abc1234"].image,
            "api:abc1234"
        );
    }

    #[test]
    fn test_record_serializes_preview_environments() {
        let record: AppRecord = serde_yaml_ng::from_str(RECORD).unwrap();
        let yaml = serde_yaml_ng::to_string(&record).unwrap();
        assert!(yaml.contains("previewEnvironments:"));
        assert!(yaml.contains("version: V3"));
        assert!(yaml.contains("createdAt:"));
    }

    #[test]
    fn test_env_omitted_when_empty() {
        let mut record: AppRecord = serde_yaml_ng::from_str(RECORD).unwrap();
        record.env = EnvConfig::default();
        let yaml = serde_yaml_ng::to_string(&record).unwrap();
        assert!(!yaml.contains("env:"));
    }

    #[test]
    fn test_preview_naming() {
        let record: AppRecord = serde_yaml_ng::from_str(RECORD).unwrap();
        assert_eq!(record.preview_service("abc1234"), "api-abc1234");
        assert_eq!(record.preview_dir("abc1234"), "api/preview/abc1234");
        assert_eq!(record.preview_host("abc1234"), "abc1234.api.example.com");
        assert_eq!(record.preview_image("abc1234"), "api:abc1234");
    }

    #[test]
    fn test_validate() {
        let mut record: AppRecord = serde_yaml_ng::from_str(RECORD).unwrap();
        assert!(record.validate().is_ok());

        record.url = "https://api.example.com".to_string();
        assert!(record.validate().is_err());

        record.url = "203.0.113.7".to_string();
        assert!(record.validate().is_err());

        record.url = "api.example.com".to_string();
        record.name = "My App".to_string();
        assert!(record.validate().is_err());
    }

    #[tokio::test]
    async fn test_missing_record_is_precondition() {
        let store = AppRecordStore::new(File::new("/nonexistent/dockhand.yml"));
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, DockhandError::Precondition(_)));
    }
}
