use anyhow::{Context, Result};
use serde::Serialize;

use crate::checkpoint::Checkpoint;
use crate::hierarchy::{BuildReport, Hierarchy, HierarchyConfig, build_hierarchy};
use crate::seed::{SeedReport, SeedSink, seed_hierarchy};
use crate::source::SourceBatch;

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub label: String,
    pub documents: usize,
    pub skipped_files: usize,
    pub records: usize,
    pub build: BuildReport,
    pub seed: Option<SeedReport>,
}

/// Normalize every document in a batch and build its hierarchy.
pub fn build_from_batch(
    batch: &SourceBatch,
    config: &HierarchyConfig,
) -> Result<(Hierarchy, SourceReport)> {
    let records = batch.records(config.allowed_placetypes());
    let record_count = records.len();
    let hierarchy = build_hierarchy(records, config)
        .with_context(|| format!("cannot build hierarchy for {}", batch.label))?;
    let report = SourceReport {
        label: batch.label.clone(),
        documents: batch.documents.len(),
        skipped_files: batch.skipped.len(),
        records: record_count,
        build: hierarchy.report().clone(),
        seed: None,
    };
    Ok((hierarchy, report))
}

/// Build, walk and seed one batch, then fold the result into the checkpoint.
pub fn seed_batch(
    batch: &SourceBatch,
    config: &HierarchyConfig,
    sink: &mut dyn SeedSink,
    checkpoint: Checkpoint,
) -> Result<(SourceReport, Checkpoint)> {
    let (hierarchy, mut report) = build_from_batch(batch, config)?;
    let seeded = seed_hierarchy(&hierarchy, sink)
        .with_context(|| format!("failed to seed {}", batch.label))?;
    let checkpoint = checkpoint.record_source(&batch.label, seeded.leaves);
    report.seed = Some(seeded);
    Ok((report, checkpoint))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{build_from_batch, seed_batch};
    use crate::checkpoint::Checkpoint;
    use crate::hierarchy::{DuplicatePolicy, HierarchyConfig};
    use crate::seed::PlanSink;
    use crate::source::SourceBatch;

    fn batch() -> SourceBatch {
        SourceBatch {
            label: "whosonfirst-data-admin-tl".to_string(),
            documents: vec![
                json!({"type": "Feature", "properties": {"wof:id": 1, "wof:placetype": "country", "wof:name": "Testland"}}),
                json!({"type": "Feature", "properties": {"wof:id": 2, "wof:parent_id": 1, "wof:placetype": "region", "wof:name": "North"}}),
                json!({"type": "Feature", "properties": {"wof:id": 3, "wof:parent_id": 2, "wof:placetype": "venue", "wof:name": "Cafe"}}),
            ],
            skipped: Vec::new(),
        }
    }

    #[test]
    fn build_from_batch_drops_unknown_placetypes_before_building() {
        let (hierarchy, report) =
            build_from_batch(&batch(), &HierarchyConfig::default()).expect("build");
        assert_eq!(report.documents, 3);
        assert_eq!(report.records, 2);
        assert_eq!(hierarchy.roots(), ["1".to_string()]);
    }

    #[test]
    fn seed_batch_records_progress_in_returned_checkpoint() {
        let mut sink = PlanSink::new(3);
        let (report, checkpoint) = seed_batch(
            &batch(),
            &HierarchyConfig::default(),
            &mut sink,
            Checkpoint::default(),
        )
        .expect("seed");
        assert_eq!(report.seed.as_ref().map(|seed| seed.leaves), Some(1));
        assert!(checkpoint.is_complete("whosonfirst-data-admin-tl"));
        assert_eq!(checkpoint.leaves_seeded, 1);
    }

    #[test]
    fn strict_duplicates_surface_as_errors() {
        let mut duplicated = batch();
        duplicated.documents.push(duplicated.documents[0].clone());
        let config = HierarchyConfig {
            duplicates: DuplicatePolicy::Reject,
            ..HierarchyConfig::default()
        };
        let error = build_from_batch(&duplicated, &config).expect_err("must fail");
        assert!(format!("{error:#}").contains("duplicate record id `1`"));
    }
}
