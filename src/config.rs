//! Run configuration.
//!
//! Loaded from YAML and/or filled in from command line flags:
//!
//! ```yaml
//! key_seed: XVBovsmzhP9gRIZxWfFta3VVRPzVEWmJsazEJ46I
//! key_id: 8d080fae-2b52-4427-9f2c-f2ea93141b45
//! input_dir: /media/source
//! output_dir: /media/source/decrypted
//! decrypter:
//!   path: /opt/bento4/bin/mp4decrypt
//!   timeout_secs: 600
//! ```
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

use crate::decrypter::Decrypter;
use crate::error::{Error, Result};
use crate::key::{parse_key_id, ContentKey, KeySeed};

/// Name of the output directory created inside the input directory when no
/// output directory is configured.
pub const DEFAULT_OUTPUT_DIR_NAME: &str = "decrypted";

/// Settings for one decryption run.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Base64 PlayReady key seed.
    pub key_seed: Option<String>,
    /// Key id of the asset as GUID text.
    pub key_id: Option<String>,
    /// Directory holding the protected asset.
    pub input_dir: Option<PathBuf>,
    /// Destination directory, defaults to `<input_dir>/decrypted`.
    pub output_dir: Option<PathBuf>,
    pub decrypter: DecrypterConfig,
}

/// How to run the external decrypt tool.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecrypterConfig {
    /// Tool path; `mp4decrypt` is searched on `PATH` when unset.
    pub path: Option<PathBuf>,
    /// Extra arguments placed before the key arguments.
    pub args: Vec<String>,
    /// Per-file wait limit in seconds; unset waits indefinitely.
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// Load a YAML configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| Error::fs(path, e))?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    pub fn key_id(&self) -> Result<Uuid> {
        let key_id = self
            .key_id
            .as_deref()
            .ok_or_else(|| Error::InvalidKeyIdentifier("no key id configured".to_string()))?;
        parse_key_id(key_id)
    }

    /// Decode the seed and derive the content key.
    pub fn content_key(&self) -> Result<ContentKey> {
        let key_seed = self
            .key_seed
            .as_deref()
            .ok_or_else(|| Error::InvalidKeySeed("no key seed configured".to_string()))?;
        let seed = KeySeed::from_base64(key_seed)?;
        Ok(seed.derive(&self.key_id()?))
    }

    pub fn input_dir(&self) -> Result<&Path> {
        self.input_dir
            .as_deref()
            .ok_or_else(|| Error::Config("no input directory configured".to_string()))
    }

    pub fn output_dir(&self) -> Result<PathBuf> {
        match &self.output_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(self.input_dir()?.join(DEFAULT_OUTPUT_DIR_NAME)),
        }
    }

    /// Build the decrypter, locating the tool on `PATH` if needed.
    pub fn decrypter(&self) -> Result<Decrypter> {
        let decrypter = match &self.decrypter.path {
            Some(path) => Decrypter::new(path),
            None => Decrypter::locate()?,
        };
        Ok(decrypter
            .with_leading_args(&self.decrypter.args)
            .with_timeout(self.decrypter.timeout_secs.map(Duration::from_secs)))
    }
}
