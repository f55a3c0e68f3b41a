//! sops/age encryption of env files

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::tooling::process::run_quiet;
use crate::tooling::{SecretEncryptor, ToolError};

#[derive(Debug, Clone)]
pub struct SopsEncryptor {
    program: String,
}

impl SopsEncryptor {
    pub fn new() -> Self {
        Self {
            program: "sops".to_string(),
        }
    }

    fn encrypt_command(&self, input: &Path, public_key: &str, output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("encrypt")
            .arg("--age")
            .arg(public_key)
            .arg("--input-type")
            .arg("dotenv")
            .arg("--output-type")
            .arg("dotenv")
            .arg("--output")
            .arg(output)
            .arg(input);
        cmd
    }
}

impl Default for SopsEncryptor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretEncryptor for SopsEncryptor {
    async fn encrypt(
        &self,
        input: &Path,
        public_key: &str,
        output: &Path,
    ) -> Result<(), ToolError> {
        if public_key.trim().is_empty() {
            return Err(ToolError::Io(
                "no public key configured for env file encryption".to_string(),
            ));
        }
        info!("Encrypting {} to {}", input.display(), output.display());
        run_quiet(self.encrypt_command(input, public_key, output)).await?;
        Ok(())
    }
}
