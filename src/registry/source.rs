use std::collections::HashMap;
use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Ruleset;
use crate::engine::operators;

/// Errors from loading compiled rulesets.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("ruleset not found: {country}/{key} v{version}")]
    NotFound {
        country: String,
        key: String,
        version: u64,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Reference to one ruleset version, as used by bulk load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesetRef {
    #[serde(default = "super::default_country")]
    pub country: String,
    pub key: String,
    pub version: u64,
}

/// External loader for compiled rulesets.
///
/// Compilation itself happens upstream; this trait only fetches and
/// validates already-compiled documents.
#[async_trait]
pub trait RulesetSource: Send + Sync {
    async fn load(&self, country: &str, key: &str, version: u64) -> Result<Ruleset, SourceError>;

    /// Enumerate the newest version of every ruleset the source holds,
    /// for startup bulk-load.
    async fn discover(&self) -> Result<Vec<RulesetRef>, SourceError>;

    /// Whether the backing storage is reachable (health probe).
    async fn available(&self) -> bool;
}

/// Validate a loaded ruleset document before it can be registered.
pub fn validate_ruleset(ruleset: &Ruleset) -> Result<(), SourceError> {
    if ruleset.key.is_empty() {
        return Err(SourceError::Validation("ruleset key cannot be empty".to_string()));
    }
    if ruleset.version == 0 {
        return Err(SourceError::Validation("ruleset version must be positive".to_string()));
    }

    let mut seen_ids = HashSet::new();
    for rule in &ruleset.rules {
        if !seen_ids.insert(&rule.id) {
            return Err(SourceError::Validation(format!("duplicate rule id: {}", rule.id)));
        }

        for condition in &rule.conditions {
            operators::validate(condition).map_err(|e| {
                SourceError::Validation(format!("rule {}: {}", rule.id, e))
            })?;
        }

        if let Some(velocity) = &rule.velocity {
            if velocity.window_seconds == 0 || velocity.threshold == 0 {
                return Err(SourceError::Validation(format!(
                    "rule {}: velocity window and threshold must be positive",
                    rule.id
                )));
            }
        }
    }
    Ok(())
}

/// File-based source reading `{root}/{country}/{key}/v{version}.yaml`.
pub struct FileRulesetSource {
    root: PathBuf,
}

impl FileRulesetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileRulesetSource { root: root.into() }
    }

    fn path_for(&self, country: &str, key: &str, version: u64) -> PathBuf {
        self.root
            .join(country.to_lowercase())
            .join(key)
            .join(format!("v{}.yaml", version))
    }
}

#[async_trait]
impl RulesetSource for FileRulesetSource {
    async fn load(&self, country: &str, key: &str, version: u64) -> Result<Ruleset, SourceError> {
        let path = self.path_for(country, key, version);
        if !path.is_file() {
            return Err(SourceError::NotFound {
                country: country.to_string(),
                key: key.to_string(),
                version,
            });
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let ruleset: Ruleset = serde_yaml::from_str(&content)?;

        if ruleset.key != key {
            return Err(SourceError::Validation(format!(
                "document key {:?} does not match requested {:?}",
                ruleset.key, key
            )));
        }
        if ruleset.version != version {
            return Err(SourceError::Validation(format!(
                "document version {} does not match requested {}",
                ruleset.version, version
            )));
        }
        validate_ruleset(&ruleset)?;

        Ok(ruleset)
    }

    async fn discover(&self) -> Result<Vec<RulesetRef>, SourceError> {
        let mut newest: HashMap<(String, String), u64> = HashMap::new();

        let mut countries = tokio::fs::read_dir(&self.root).await?;
        while let Some(country_dir) = countries.next_entry().await? {
            if !country_dir.file_type().await?.is_dir() {
                continue;
            }
            let country = country_dir.file_name().to_string_lossy().to_string();

            let mut keys = tokio::fs::read_dir(country_dir.path()).await?;
            while let Some(key_dir) = keys.next_entry().await? {
                if !key_dir.file_type().await?.is_dir() {
                    continue;
                }
                let key = key_dir.file_name().to_string_lossy().to_string();

                let mut versions = tokio::fs::read_dir(key_dir.path()).await?;
                while let Some(file) = versions.next_entry().await? {
                    let name = file.file_name().to_string_lossy().to_string();
                    let Some(version) = name
                        .strip_prefix('v')
                        .and_then(|n| n.strip_suffix(".yaml"))
                        .and_then(|n| n.parse::<u64>().ok())
                    else {
                        continue;
                    };

                    let slot = newest.entry((country.clone(), key.clone())).or_insert(0);
                    if version > *slot {
                        *slot = version;
                    }
                }
            }
        }

        let mut refs: Vec<RulesetRef> = newest
            .into_iter()
            .map(|((country, key), version)| RulesetRef { country, key, version })
            .collect();
        refs.sort_by(|a, b| (&a.country, &a.key).cmp(&(&b.country, &b.key)));
        Ok(refs)
    }

    async fn available(&self) -> bool {
        self.root.is_dir()
    }
}

/// In-memory source for tests.
#[derive(Default)]
pub struct MemoryRulesetSource {
    rulesets: Mutex<HashMap<(String, String, u64), Ruleset>>,
}

impl MemoryRulesetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ruleset: Ruleset) {
        self.rulesets.lock().insert(
            (
                ruleset.country.to_lowercase(),
                ruleset.key.clone(),
                ruleset.version,
            ),
            ruleset,
        );
    }
}

#[async_trait]
impl RulesetSource for MemoryRulesetSource {
    async fn load(&self, country: &str, key: &str, version: u64) -> Result<Ruleset, SourceError> {
        self.rulesets
            .lock()
            .get(&(country.to_lowercase(), key.to_string(), version))
            .cloned()
            .ok_or_else(|| SourceError::NotFound {
                country: country.to_string(),
                key: key.to_string(),
                version,
            })
    }

    async fn discover(&self) -> Result<Vec<RulesetRef>, SourceError> {
        let mut newest: HashMap<(String, String), u64> = HashMap::new();
        for (country, key, version) in self.rulesets.lock().keys() {
            let slot = newest.entry((country.clone(), key.clone())).or_insert(0);
            if *version > *slot {
                *slot = *version;
            }
        }
        Ok(newest
            .into_iter()
            .map(|((country, key), version)| RulesetRef { country, key, version })
            .collect())
    }

    async fn available(&self) -> bool {
        true
    }
}
