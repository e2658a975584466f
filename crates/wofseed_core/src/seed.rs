use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::checkpoint::unix_now;
use crate::hierarchy::{Hierarchy, HierarchyNode, WalkEvent};

pub const METADATA_FILENAME: &str = "metadata.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LeafOutcome {
    pub written: usize,
    pub existing: usize,
}

/// Receiver for walk events. Implementations decide what a folder and a
/// seeded leaf mean (directories on disk, a printed plan, remote commits).
pub trait SeedSink {
    fn create_folder(&mut self, path: &str, node: &HierarchyNode) -> Result<()>;
    fn seed_leaf(&mut self, path: &str, node: &HierarchyNode) -> Result<LeafOutcome>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub folders: usize,
    pub leaves: usize,
    pub files_written: usize,
    pub files_existing: usize,
}

pub fn seed_hierarchy(hierarchy: &Hierarchy, sink: &mut dyn SeedSink) -> Result<SeedReport> {
    let mut report = SeedReport::default();
    for event in hierarchy.walk() {
        match event {
            WalkEvent::Folder { path, node } => {
                sink.create_folder(&path, node)?;
                report.folders += 1;
            }
            WalkEvent::Leaf { path, node } => {
                let outcome = sink.seed_leaf(&path, node)?;
                report.leaves += 1;
                report.files_written += outcome.written;
                report.files_existing += outcome.existing;
            }
        }
    }
    info!(
        folders = report.folders,
        leaves = report.leaves,
        written = report.files_written,
        existing = report.files_existing,
        "seeded hierarchy"
    );
    Ok(report)
}

/// Writes folders under `root` and placeholder documents into each leaf.
/// Files that already exist are left untouched.
#[derive(Debug, Clone)]
pub struct LocalSink {
    root: PathBuf,
    leaf_files: Vec<String>,
}

impl LocalSink {
    pub fn new(root: impl Into<PathBuf>, leaf_files: Vec<String>) -> Self {
        Self {
            root: root.into(),
            leaf_files,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn leaf_document(file_name: &str, path: &str, node: &HierarchyNode) -> Result<String> {
        if file_name != METADATA_FILENAME {
            return Ok("[]\n".to_string());
        }
        let metadata = json!({
            "id": node.id,
            "parent_id": node.parent_id,
            "placetype": node.placetype,
            "name": node.name,
            "path": path,
            "seeded_at_unix": unix_now(),
        });
        let mut rendered =
            serde_json::to_string_pretty(&metadata).context("failed to serialize leaf metadata")?;
        rendered.push('\n');
        Ok(rendered)
    }
}

impl SeedSink for LocalSink {
    fn create_folder(&mut self, path: &str, _node: &HierarchyNode) -> Result<()> {
        let dir = self.root.join(path);
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))
    }

    fn seed_leaf(&mut self, path: &str, node: &HierarchyNode) -> Result<LeafOutcome> {
        let dir = self.root.join(path);
        let mut outcome = LeafOutcome::default();
        for file_name in &self.leaf_files {
            let file_path = dir.join(file_name);
            let mut file = match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&file_path)
            {
                Ok(file) => file,
                Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                    debug!(path = %file_path.display(), "leaf file already present");
                    outcome.existing += 1;
                    continue;
                }
                Err(error) => {
                    return Err(error)
                        .with_context(|| format!("failed to create {}", file_path.display()));
                }
            };
            let content = Self::leaf_document(file_name, path, node)?;
            file.write_all(content.as_bytes())
                .with_context(|| format!("failed to write {}", file_path.display()))?;
            outcome.written += 1;
        }
        Ok(outcome)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannedKind {
    Folder,
    Leaf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedEvent {
    pub kind: PlannedKind,
    pub path: String,
    pub id: String,
}

/// Records events without side effects, for dry runs and `tree` output.
#[derive(Debug, Clone, Default)]
pub struct PlanSink {
    pub events: Vec<PlannedEvent>,
    pub leaf_files: usize,
}

impl PlanSink {
    pub fn new(leaf_files: usize) -> Self {
        Self {
            events: Vec::new(),
            leaf_files,
        }
    }
}

impl SeedSink for PlanSink {
    fn create_folder(&mut self, path: &str, node: &HierarchyNode) -> Result<()> {
        self.events.push(PlannedEvent {
            kind: PlannedKind::Folder,
            path: path.to_string(),
            id: node.id.clone(),
        });
        Ok(())
    }

    fn seed_leaf(&mut self, path: &str, node: &HierarchyNode) -> Result<LeafOutcome> {
        self.events.push(PlannedEvent {
            kind: PlannedKind::Leaf,
            path: path.to_string(),
            id: node.id.clone(),
        });
        Ok(LeafOutcome {
            written: self.leaf_files,
            existing: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::Value;
    use tempfile::tempdir;

    use super::{LocalSink, PlanSink, PlannedKind, seed_hierarchy};
    use crate::config::DEFAULT_LEAF_FILES;
    use crate::hierarchy::{Hierarchy, HierarchyConfig, build_hierarchy};
    use crate::record::CanonicalRecord;

    fn sample() -> Hierarchy {
        let records = vec![
            CanonicalRecord {
                id: "1".to_string(),
                parent_id: None,
                placetype: "country".to_string(),
                name: "Testland".to_string(),
            },
            CanonicalRecord {
                id: "2".to_string(),
                parent_id: Some("1".to_string()),
                placetype: "region".to_string(),
                name: "São Norte".to_string(),
            },
        ];
        build_hierarchy(records, &HierarchyConfig::default()).expect("build")
    }

    fn leaf_files() -> Vec<String> {
        DEFAULT_LEAF_FILES
            .iter()
            .map(|item| (*item).to_string())
            .collect()
    }

    #[test]
    fn local_sink_creates_folders_and_leaf_documents() {
        let temp = tempdir().expect("tempdir");
        let hierarchy = sample();
        let mut sink = LocalSink::new(temp.path().join("out"), leaf_files());

        let report = seed_hierarchy(&hierarchy, &mut sink).expect("seed");
        assert_eq!(report.folders, 2);
        assert_eq!(report.leaves, 1);
        assert_eq!(report.files_written, 3);

        let leaf = sink.root().join("Testland").join("Sao_Norte");
        assert_eq!(
            fs::read_to_string(leaf.join("buyers.json")).expect("buyers"),
            "[]\n"
        );
        let metadata: Value = serde_json::from_str(
            &fs::read_to_string(leaf.join("metadata.json")).expect("metadata"),
        )
        .expect("parse metadata");
        assert_eq!(metadata["id"], "2");
        assert_eq!(metadata["parent_id"], "1");
        assert_eq!(metadata["path"], "Testland/Sao_Norte");
        assert!(!sink.root().join("Testland").join("buyers.json").exists());
    }

    #[test]
    fn local_sink_never_overwrites_existing_leaf_files() {
        let temp = tempdir().expect("tempdir");
        let hierarchy = sample();
        let leaf = temp.path().join("Testland").join("Sao_Norte");
        fs::create_dir_all(&leaf).expect("leaf dir");
        fs::write(leaf.join("buyers.json"), "[{\"keep\":true}]").expect("seed buyers");

        let mut sink = LocalSink::new(temp.path(), leaf_files());
        let report = seed_hierarchy(&hierarchy, &mut sink).expect("seed");
        assert_eq!(report.files_written, 2);
        assert_eq!(report.files_existing, 1);
        assert_eq!(
            fs::read_to_string(leaf.join("buyers.json")).expect("buyers"),
            "[{\"keep\":true}]"
        );

        let rerun = seed_hierarchy(&hierarchy, &mut sink).expect("rerun");
        assert_eq!(rerun.files_written, 0);
        assert_eq!(rerun.files_existing, 3);
    }

    #[test]
    fn same_named_places_seed_separate_leaves() {
        let temp = tempdir().expect("tempdir");
        let records = [("1", None, "country", "US"), ("2", Some("1"), "region", "Ohio")]
            .into_iter()
            .chain([
                ("3", Some("2"), "locality", "Springfield"),
                ("4", Some("2"), "locality", "Springfield"),
            ])
            .map(|(id, parent, placetype, name)| CanonicalRecord {
                id: id.to_string(),
                parent_id: parent.map(ToString::to_string),
                placetype: placetype.to_string(),
                name: name.to_string(),
            })
            .collect::<Vec<_>>();
        let hierarchy = build_hierarchy(records, &HierarchyConfig::default()).expect("build");
        let mut sink = LocalSink::new(temp.path(), leaf_files());

        let report = seed_hierarchy(&hierarchy, &mut sink).expect("seed");
        assert_eq!(report.leaves, 2);
        assert_eq!(report.files_written, 6);
        assert_eq!(report.files_existing, 0);

        let ohio = temp.path().join("US").join("Ohio");
        for (folder, id) in [("Springfield", "3"), ("Springfield_4", "4")] {
            let metadata: Value = serde_json::from_str(
                &fs::read_to_string(ohio.join(folder).join("metadata.json")).expect("metadata"),
            )
            .expect("parse metadata");
            assert_eq!(metadata["id"], id);
        }
    }

    #[test]
    fn plan_sink_records_events_without_touching_disk() {
        let hierarchy = sample();
        let mut sink = PlanSink::new(3);
        let report = seed_hierarchy(&hierarchy, &mut sink).expect("plan");
        assert_eq!(report.files_written, 3);
        let kinds = sink
            .events
            .iter()
            .map(|event| (event.kind.clone(), event.path.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                (PlannedKind::Folder, "Testland"),
                (PlannedKind::Folder, "Testland/Sao_Norte"),
                (PlannedKind::Leaf, "Testland/Sao_Norte"),
            ]
        );
    }
}
