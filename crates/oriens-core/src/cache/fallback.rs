use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::models::{LedgerRecord, PreferenceRecord, Project, ProjectId, TagRecord};

const PREFERENCES: &str = "preferences";
const AGGREGATE: &str = "ledger_aggregate";
const TAGS: &str = "tags";

/// Value wrapped with the time it was written, for "last synced" displays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        let now = Utc::now();
        (now - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

/// Durable last-known values for one user, stored as JSON files.
///
/// Values written through [`FallbackStore::save_value`] are a pure function of
/// the value, so restoring a previous value restores the previous bytes.
#[derive(Debug, Clone)]
pub struct FallbackStore {
    dir: PathBuf,
}

impl FallbackStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create fallback directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    pub fn load_value<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.path(name);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read fallback file: {}", name))?;
        let value = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse fallback file: {}", name))?;
        Ok(Some(value))
    }

    pub fn save_value<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let contents = serde_json::to_string_pretty(value)?;
        std::fs::write(self.path(name), contents)
            .with_context(|| format!("Failed to write fallback file: {}", name))?;
        debug!(file = name, "Fallback value saved");
        Ok(())
    }

    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<CachedData<T>>> {
        self.load_value(name)
    }

    pub fn save<T: Serialize>(&self, name: &str, data: &T) -> Result<()> {
        self.save_value(name, &CachedData::new(data))
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let path = self.path(name);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove fallback file: {}", name))?;
        }
        Ok(())
    }

    // ===== Preferences =====

    pub fn load_preferences(&self) -> Result<Option<PreferenceRecord>> {
        self.load_value(PREFERENCES)
    }

    pub fn save_preferences(&self, preferences: &PreferenceRecord) -> Result<()> {
        self.save_value(PREFERENCES, preferences)
    }

    pub fn clear_preferences(&self) -> Result<()> {
        self.remove(PREFERENCES)
    }

    // ===== Ledger aggregate (chart window) =====

    pub fn load_aggregate(&self) -> Result<Option<Vec<LedgerRecord>>> {
        self.load_value(AGGREGATE)
    }

    pub fn save_aggregate(&self, records: &[LedgerRecord]) -> Result<()> {
        self.save_value(AGGREGATE, records)
    }

    // ===== Tags =====

    pub fn load_tags(&self) -> Result<Option<CachedData<Vec<TagRecord>>>> {
        self.load(TAGS)
    }

    pub fn save_tags(&self, tags: &[TagRecord]) -> Result<()> {
        self.save(TAGS, &tags)
    }

    // ===== Projects =====

    pub fn load_project(&self, id: ProjectId) -> Result<Option<Project>> {
        self.load_value(&format!("project_{}", id))
    }

    pub fn save_project(&self, project: &Project) -> Result<()> {
        self.save_value(&format!("project_{}", project.id), project)
    }

    /// Age of the tag list, the slowest-changing value the store holds.
    pub fn tags_age(&self) -> Option<String> {
        match self.load_tags() {
            Ok(Some(cached)) => Some(cached.age_display()),
            Ok(None) => None,
            Err(e) => {
                debug!(error = %e, "Failed to load tags for age display");
                None
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
