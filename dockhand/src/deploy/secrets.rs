//! Env file encryption and transfer

use std::path::Path;

use tracing::{info, warn};

use crate::errors::DockhandError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::pipeline::EventSink;
use crate::remote::FileTransfer;
use crate::swap::ENCRYPTED_ENV_FILE;
use crate::tooling::SecretEncryptor;
use crate::utils::sha256_hash;

/// Result of the secrets stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvSync {
    /// The application has no env file
    NotDeclared,

    /// Checksum matches the recorded one; nothing was encrypted or sent
    Unchanged,

    /// Encrypted and uploaded; the record should store `hash`
    Updated { hash: String },
}

/// Content checksum of an env file
pub async fn env_checksum(file: &File) -> Result<String, DockhandError> {
    let content = file.read_bytes().await.map_err(|e| {
        DockhandError::SecretsError(format!("cannot read {}: {e}", file.path().display()))
    })?;
    Ok(sha256_hash(&content))
}

/// Variable names declared in an env file, in order
pub fn env_keys(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| {
            let l = l.strip_prefix("export ").unwrap_or(l);
            l.split_once('=').map(|(k, _)| k.trim().to_string())
        })
        .filter(|k| !k.is_empty())
        .collect()
}

/// Encrypt `env_file` and upload it as `<remote_dir>/encrypted.env`
///
/// The plaintext never leaves this machine; the encrypted copy is staged in
/// a temporary directory that is removed on every path.
pub async fn encrypt_and_upload(
    encryptor: &dyn SecretEncryptor,
    transfer: &dyn FileTransfer,
    env_file: &Path,
    public_key: &str,
    remote_dir: &str,
) -> Result<(), DockhandError> {
    let staging = Dir::create_temp_dir("dockhand-env").await?;
    let encrypted = staging.file(ENCRYPTED_ENV_FILE);

    let result = async {
        encryptor
            .encrypt(env_file, public_key, encrypted.path())
            .await
            .map_err(|e| DockhandError::SecretsError(e.to_string()))?;
        transfer
            .upload(
                encrypted.path(),
                &format!("{}/{}", remote_dir, ENCRYPTED_ENV_FILE),
            )
            .await
            .map_err(|e| DockhandError::SecretsError(e.to_string()))
    }
    .await;

    if let Err(e) = staging.delete().await {
        warn!("Failed to remove {}: {}", staging.path().display(), e);
    }
    result
}

/// Re-encrypt and upload the env file only when its checksum changed
pub async fn sync_env_file(
    encryptor: &dyn SecretEncryptor,
    transfer: &dyn FileTransfer,
    project_dir: &Path,
    env: &crate::storage::app_record::EnvConfig,
    public_key: &str,
    remote_dir: &str,
    sink: &EventSink,
) -> Result<EnvSync, DockhandError> {
    if env.is_empty() {
        sink.log("No env file declared");
        return Ok(EnvSync::NotDeclared);
    }

    let file = File::new(project_dir.join(&env.file));
    let hash = env_checksum(&file).await?;
    if hash == env.hash {
        info!("{} unchanged, skipping encryption", env.file);
        sink.log(format!("{} unchanged", env.file));
        return Ok(EnvSync::Unchanged);
    }

    sink.log(format!("{} changed, encrypting", env.file));
    encrypt_and_upload(encryptor, transfer, file.path(), public_key, remote_dir).await?;
    sink.log(format!("Uploaded {}", ENCRYPTED_ENV_FILE));
    Ok(EnvSync::Updated { hash })
}
