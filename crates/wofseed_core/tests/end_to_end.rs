use std::fs;
use std::path::Path;

use tempfile::tempdir;
use wofseed_core::checkpoint::{Checkpoint, load_checkpoint, save_checkpoint};
use wofseed_core::config::SeedConfig;
use wofseed_core::pipeline::seed_batch;
use wofseed_core::seed::LocalSink;
use wofseed_core::source::{FetchOptions, scan_directory};

fn write_feature(root: &Path, relative: &str, properties: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(
        path,
        format!(r#"{{"type":"Feature","properties":{properties},"geometry":null}}"#),
    )
    .expect("write feature");
}

#[test]
fn directory_scan_builds_walks_and_seeds_leaf_folders() {
    let temp = tempdir().expect("tempdir");
    let data = temp.path().join("whosonfirst-data-admin-tl");
    write_feature(
        &data,
        "data/1.geojson",
        r#"{"wof:id":1,"wof:parent_id":-1,"wof:placetype":"country","wof:name":"Testland"}"#,
    );
    write_feature(
        &data,
        "data/2.geojson",
        r#"{"wof:id":2,"wof:parent_id":1,"wof:placetype":"region","wof:name":"North"}"#,
    );
    write_feature(
        &data,
        "data/3.geojson",
        r#"{"wof:id":"3","wof:parent_id":"2","wof:placetype":"locality","wof:name":"Northtown"}"#,
    );
    write_feature(
        &data,
        "data/4.geojson",
        r#"{"wof:id":4,"wof:parent_id":1,"wof:placetype":"locality","wof:name":"Skipped"}"#,
    );
    fs::write(data.join("data/5.geojson"), "{ broken").expect("write broken");

    let config = SeedConfig::default();
    let batch = scan_directory(&data, &FetchOptions::default()).expect("scan");
    assert_eq!(batch.skipped.len(), 1);

    let output = temp.path().join("seeded");
    let mut sink = LocalSink::new(&output, config.leaf_files());
    let (report, checkpoint) = seed_batch(
        &batch,
        &config.hierarchy_config(),
        &mut sink,
        Checkpoint::default(),
    )
    .expect("seed");

    assert_eq!(report.records, 4);
    assert_eq!(report.build.roots, 1);
    assert_eq!(report.build.disallowed_transitions, 1);
    let seeded = report.seed.expect("seed report");
    assert_eq!(seeded.folders, 3);
    assert_eq!(seeded.leaves, 1);

    let leaf = output.join("Testland/North/Northtown");
    for file in ["buyers.json", "properties.json", "metadata.json"] {
        assert!(leaf.join(file).is_file(), "missing {file}");
    }
    assert!(!output.join("Testland/North/buyers.json").exists());
    assert!(!output.join("Testland/Skipped").exists());

    let checkpoint_path = temp.path().join(".wofseed/checkpoint.json");
    save_checkpoint(&checkpoint_path, &checkpoint).expect("save checkpoint");
    let reloaded = load_checkpoint(&checkpoint_path).expect("load checkpoint");
    assert!(reloaded.is_complete("whosonfirst-data-admin-tl"));
}
