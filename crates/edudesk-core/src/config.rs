use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};

use crate::error::{EdudeskError, EdudeskResult};

/// PBKDF2 iteration count used when the config omits or mangles it.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;

/// Top-level configuration (loaded from edudesk.toml)
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EdudeskConfig {
    /// Warn if the config file is world-readable (default: true)
    #[serde(default = "default_true")]
    pub config_file_mode_check: bool,
    pub crypto: CryptoConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub log: LogConfig,
}

fn default_true() -> bool {
    true
}

impl Default for EdudeskConfig {
    fn default() -> Self {
        Self {
            config_file_mode_check: true,
            crypto: CryptoConfig::default(),
            auth: AuthConfig::default(),
            storage: StorageConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// Master key and KDF settings
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// 32-byte master key, hex-encoded. No default: protect/reveal refuse to run without it.
    #[serde(skip_serializing, deserialize_with = "secret_opt")]
    pub master_key_hex: Option<SecretString>,
    /// PBKDF2-HMAC-SHA256 iterations (default: 100000; non-positive or non-integer values fall back)
    #[serde(deserialize_with = "lenient_iterations")]
    pub pbkdf2_iterations: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            master_key_hex: None,
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
        }
    }
}

impl CryptoConfig {
    /// The configured master key hex, or a configuration error if it is absent.
    pub fn master_key_hex(&self) -> EdudeskResult<&str> {
        match &self.master_key_hex {
            Some(hex) if !hex.expose_secret().trim().is_empty() => Ok(hex.expose_secret().trim()),
            _ => Err(EdudeskError::Configuration(
                "crypto.master_key_hex is missing".into(),
            )),
        }
    }
}

/// Password verifier scheme for newly registered credentials
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordScheme {
    /// Self-contained Argon2id PHC string (interactive profile)
    #[default]
    Argon2id,
    /// Separate salt / hash / iteration columns, PBKDF2-HMAC-SHA256
    Pbkdf2,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub scheme: PasswordScheme,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding files/, metadata/ and assignments/
    pub root: PathBuf,
    /// JSON record store (users, submissions, materials); relative to `root` unless absolute
    pub records_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("storage"),
            records_file: PathBuf::from("records.json"),
        }
    }
}

impl StorageConfig {
    pub fn records_path(&self) -> PathBuf {
        if self.records_file.is_absolute() {
            self.records_file.clone()
        } else {
            self.root.join(&self.records_file)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Shape of the original `config/config.json` files.
#[derive(Debug, Deserialize)]
struct LegacyJsonConfig {
    #[serde(default, deserialize_with = "secret_opt")]
    master_key_hex: Option<SecretString>,
    #[serde(default = "default_iterations", deserialize_with = "lenient_iterations")]
    pbkdf2_iterations: u32,
    storage_root: Option<PathBuf>,
}

fn default_iterations() -> u32 {
    DEFAULT_PBKDF2_ITERATIONS
}

fn secret_opt<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

fn lenient_iterations<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Other(serde::de::IgnoredAny),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Int(n) if n > 0 && n <= i64::from(u32::MAX) => n as u32,
        Raw::Int(n) => {
            tracing::warn!(value = n, "pbkdf2_iterations out of range, using default");
            DEFAULT_PBKDF2_ITERATIONS
        }
        Raw::Other(_) => {
            tracing::warn!("pbkdf2_iterations is not an integer, using default");
            DEFAULT_PBKDF2_ITERATIONS
        }
    })
}

impl EdudeskConfig {
    /// Load configuration from `path`.
    ///
    /// `.json` files are read in the original flat layout (`master_key_hex`,
    /// `pbkdf2_iterations`, `storage_root`); anything else is TOML. A missing
    /// file is a configuration error since the master key has no default.
    pub fn load(path: &Path) -> EdudeskResult<Self> {
        if !path.exists() {
            return Err(EdudeskError::Configuration(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| EdudeskError::io(path, e))?;

        let config = if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_legacy_json(&content)
        } else {
            Self::from_toml_str(&content)
        }
        .map_err(|e| match e {
            EdudeskError::Configuration(msg) => {
                EdudeskError::Configuration(format!("{}: {msg}", path.display()))
            }
            other => other,
        })?;

        if config.config_file_mode_check {
            warn_if_world_readable(path);
        }
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> EdudeskResult<Self> {
        toml::from_str(content).map_err(|e| EdudeskError::Configuration(format!("parsing: {e}")))
    }

    pub fn from_legacy_json(content: &str) -> EdudeskResult<Self> {
        let legacy: LegacyJsonConfig = serde_json::from_str(content)
            .map_err(|e| EdudeskError::Configuration(format!("parsing: {e}")))?;

        let mut config = Self::default();
        config.crypto.master_key_hex = legacy.master_key_hex;
        config.crypto.pbkdf2_iterations = legacy.pbkdf2_iterations;
        if let Some(root) = legacy.storage_root {
            config.storage.root = root;
        }
        Ok(config)
    }
}

#[cfg(unix)]
fn warn_if_world_readable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(meta) = std::fs::metadata(path) {
        if meta.permissions().mode() & 0o004 != 0 {
            tracing::warn!(
                path = %path.display(),
                "config file is world-readable and holds the master key"
            );
        }
    }
}

#[cfg(not(unix))]
fn warn_if_world_readable(_path: &Path) {}
