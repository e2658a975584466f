use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Progress across seed runs. Callers load it, pass it through each source,
/// and persist whatever comes back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default)]
    pub completed_sources: BTreeSet<String>,
    #[serde(default)]
    pub leaves_seeded: u64,
    #[serde(default)]
    pub updated_at_unix: u64,
}

impl Checkpoint {
    pub fn is_complete(&self, source: &str) -> bool {
        self.completed_sources.contains(source)
    }

    pub fn record_source(mut self, source: &str, leaves: usize) -> Self {
        self.completed_sources.insert(source.to_string());
        self.leaves_seeded = self.leaves_seeded.saturating_add(leaves as u64);
        self.updated_at_unix = unix_now();
        self
    }
}

pub fn load_checkpoint(path: &Path) -> Result<Checkpoint> {
    if !path.exists() {
        return Ok(Checkpoint::default());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn save_checkpoint(path: &Path, checkpoint: &Checkpoint) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let rendered =
        serde_json::to_string_pretty(checkpoint).context("failed to serialize checkpoint")?;
    fs::write(path, rendered).with_context(|| format!("failed to write {}", path.display()))
}

pub fn reset_checkpoint(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(path).with_context(|| format!("failed to remove {}", path.display()))?;
    Ok(true)
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_secs())
        .unwrap_or(0)
}
