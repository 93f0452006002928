use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use color_eyre::{Result, eyre::Context};
use log::{debug, error, info};
use serde::{Deserialize, Deserializer, Serialize};

use crate::source::ProductId;

/// Last state seen for one product, the baseline for change detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub last_price: u64,
    pub last_discount: u8,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub last_notification: Option<NaiveDateTime>,
    pub name: String,
    #[serde(default, alias = "last_update", deserialize_with = "blank_as_none")]
    pub last_checked: Option<NaiveDateTime>,
}

// older history files write "" for "never"
fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

pub type History = BTreeMap<ProductId, HistoryRecord>;

pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Absent or unparsable history starts the run from scratch.
    pub fn load(&self) -> History {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No history at {}, starting empty", self.path.display());
                return History::new();
            }
            Err(e) => {
                error!("Failed to read history {}: {e}", self.path.display());
                return History::new();
            }
        };

        serde_json::from_str(&raw).unwrap_or_else(|e| {
            error!("Corrupt history {}: {e}", self.path.display());
            History::new()
        })
    }

    pub fn save(&self, history: &History) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(history)?)
            .wrap_err_with(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .wrap_err_with(|| format!("failed to replace {}", self.path.display()))?;
        info!("Saved history for {} products", history.len());
        Ok(())
    }
}
