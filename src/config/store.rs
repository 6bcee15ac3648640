//! Persistence for named [`PipelineConfig`]s.
//!
//! Stores only ever hold configs that passed [`PipelineConfig::validate`].

use super::PipelineConfig;
use crate::error::{PipelineError, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// CRUD over named pipeline configs.
pub trait ConfigStore: Send + Sync {
    /// Validate and store `config` under its name, replacing any previous one.
    fn save(&self, config: &PipelineConfig) -> Result<()>;

    fn load(&self, name: &str) -> Result<PipelineConfig>;

    /// Stored names, sorted.
    fn list(&self) -> Result<Vec<String>>;

    fn delete(&self, name: &str) -> Result<()>;

    /// Parse a JSON config and save it. Nothing is stored if it is invalid.
    fn import(&self, json: &str) -> Result<PipelineConfig> {
        let config = PipelineConfig::from_json(json)?;
        self.save(&config)?;
        Ok(config)
    }

    /// The stored config as pretty JSON.
    fn export(&self, name: &str) -> Result<String> {
        self.load(name)?.to_json()
    }
}

fn not_found(name: &str) -> PipelineError {
    PipelineError::NotFound(format!("pipeline config '{}'", name))
}

/// A process-local store.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    configs: RwLock<BTreeMap<String, PipelineConfig>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn save(&self, config: &PipelineConfig) -> Result<()> {
        config.validate()?;
        self.configs
            .write()
            .insert(config.name.clone(), config.clone());
        Ok(())
    }

    fn load(&self, name: &str) -> Result<PipelineConfig> {
        self.configs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.configs.read().keys().cloned().collect())
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.configs
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }
}

/// One `<name>.json` file per config in a directory.
///
/// Names are restricted to ASCII letters, digits, `-`, `_`, and `.` (not
/// leading) so they map to file names one to one.
#[derive(Debug, Clone)]
pub struct DirConfigStore {
    dir: PathBuf,
}

impl DirConfigStore {
    /// Open `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(PipelineError::InvalidConfig(format!(
                "'{}' cannot be used as a stored config name",
                name
            )));
        }
        Ok(self.dir.join(format!("{}.json", name)))
    }
}

impl ConfigStore for DirConfigStore {
    fn save(&self, config: &PipelineConfig) -> Result<()> {
        config.validate()?;
        let path = self.path_for(&config.name)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, config.to_json()?)?;
        std::fs::rename(&tmp, &path)?;
        tracing::debug!(config = %config.name, path = %path.display(), "saved pipeline config");
        Ok(())
    }

    fn load(&self, name: &str) -> Result<PipelineConfig> {
        let path = self.path_for(name)?;
        match std::fs::read_to_string(&path) {
            Ok(json) => PipelineConfig::from_json(&json),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found(name)),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn delete(&self, name: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(name)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found(name)),
            Err(e) => Err(e.into()),
        }
    }
}
