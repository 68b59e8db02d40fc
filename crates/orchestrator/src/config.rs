//! Configuration for a Delve deployment.
//!
//! # File security
//!
//! - Config file permission validation on Unix systems
//! - Rejects world-readable files containing API keys
//! - Warns about API keys stored in config files

use std::path::{Path, PathBuf};

use delve_agents::GatewayConfig;
use delve_llm::LlmConfig;
use delve_memory::MemoryConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Top-level configuration, one section per subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelveConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub research: ResearchConfig,

    #[serde(default)]
    pub recorder: RecorderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Upper bound on plan sections
    #[serde(default = "default_max_sections")]
    pub max_sections: usize,

    /// Researchers running at once
    #[serde(default = "default_max_concurrent_researchers")]
    pub max_concurrent_researchers: usize,

    /// Hits kept from each tool per section
    #[serde(default = "default_evidence_per_tool")]
    pub evidence_per_tool: usize,
}

fn default_max_sections() -> usize {
    10
}

fn default_max_concurrent_researchers() -> usize {
    4
}

fn default_evidence_per_tool() -> usize {
    5
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_sections: default_max_sections(),
            max_concurrent_researchers: default_max_concurrent_researchers(),
            evidence_per_tool: default_evidence_per_tool(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// JSON-lines chain-of-thought log; kept in memory when unset
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

impl DelveConfig {
    /// Load configuration from a TOML file.
    ///
    /// On Unix systems the file must be a regular file, must not be
    /// world-writable, and must not be world-readable if it holds an API key.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        #[cfg(unix)]
        validate_config_file_permissions(path)?;

        let config = Self::from_file_unchecked(path)?;

        if config.llm.api_key.is_some() {
            warn!(
                "API key found in config file '{}'. For better security, \
                 use the OPENAI_API_KEY environment variable instead.",
                path.display()
            );
        }

        Ok(config)
    }

    /// Load configuration from a TOML file without permission checks.
    pub fn from_file_unchecked(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// The model API key, from config first, then the environment.
    ///
    /// Only the `openai` provider reads `OPENAI_API_KEY`; local providers
    /// need no key.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.llm.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }

        match self.llm.provider.as_str() {
            "openai" => std::env::var("OPENAI_API_KEY").ok(),
            _ => None,
        }
    }
}

/// Reject config files that are unsafe to read secrets from.
#[cfg(unix)]
fn validate_config_file_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::symlink_metadata(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

    if !metadata.is_file() {
        anyhow::bail!(
            "Config path '{}' is not a regular file. Symlinks and directories are not allowed.",
            path.display()
        );
    }

    let permission_bits = metadata.permissions().mode() & 0o777;

    if permission_bits & 0o002 != 0 {
        anyhow::bail!(
            "Config file '{}' is world-writable (mode {:04o}). Fix with: chmod o-w {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    let content = std::fs::read_to_string(path)?;
    let has_api_key = content.contains("api_key")
        && (content.contains("sk-") || content.contains("key ="));

    if has_api_key && permission_bits & 0o004 != 0 {
        anyhow::bail!(
            "Config file '{}' contains an API key but is world-readable (mode {:04o}). \
             Fix with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    if has_api_key && permission_bits & 0o040 != 0 {
        warn!(
            "Config file '{}' contains an API key and is group-readable (mode {:04o}). \
             Consider restricting access with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    Ok(())
}
