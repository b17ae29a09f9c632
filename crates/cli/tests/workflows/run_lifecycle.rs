//! Run lifecycle: dry run, real run, inspect, list, resume

use crate::common::TestLake;
use anyhow::Result;

#[test]
fn test_dry_run_reports_without_deleting() -> Result<()> {
    let lake = TestLake::new()?;

    let result = lake.run(&["--retain", "7d", "--dry-run", "--json"]).assert_success()?;
    let report = result.json()?;

    assert_eq!(report["phase"], "COMPLETED");
    assert_eq!(report["dry_run"], true);
    assert_eq!(report["would_delete"], 3);
    assert_eq!(report["deleted"], 0);
    for file in ["metadata/v1.json", "data/a.parquet", "data/stray.parquet"] {
        assert!(lake.exists(file), "dry run removed {}", file);
    }

    println!("✓ Dry run completed in {:?}", result.duration);
    Ok(())
}

#[test]
fn test_run_deletes_unreachable_files() -> Result<()> {
    let lake = TestLake::new()?;

    let report = lake.run(&["--retain", "7d", "--json"]).assert_success()?.json()?;

    assert_eq!(report["phase"], "COMPLETED");
    assert_eq!(report["deleted"], 3);
    assert_eq!(report["delete_failed"], 0);
    assert!(lake.exists("metadata/v2.json"));
    assert!(lake.exists("data/b.parquet"));
    assert!(!lake.exists("metadata/v1.json"));
    assert!(!lake.exists("data/a.parquet"));
    assert!(!lake.exists("data/stray.parquet"));

    // Nothing left to collect
    let second = lake.run(&["--retain", "7d", "--json"]).assert_success()?.json()?;
    assert_eq!(second["deleted"], 0);
    assert_eq!(second["files_retained"], 2);
    Ok(())
}

#[test]
fn test_long_retention_keeps_history() -> Result<()> {
    let lake = TestLake::new()?;

    let report = lake.run(&["--retain", "30d", "--json"]).assert_success()?.json()?;

    assert_eq!(report["deleted"], 1);
    assert!(lake.exists("metadata/v1.json"));
    assert!(lake.exists("data/a.parquet"));
    assert!(!lake.exists("data/stray.parquet"));
    Ok(())
}

#[test]
fn test_inspect_and_list_show_recorded_run() -> Result<()> {
    let lake = TestLake::new()?;

    let started = lake.run(&["--retain", "7d", "--dry-run"]).assert_success()?;
    assert!(started.contains_stdout("GC Dry Run"));
    let run_id = started.parse_run_id().expect("run id in output");

    let listed = lake.lakesweep(&["list"]).assert_success()?;
    assert_eq!(listed.parse_run_ids(), vec![run_id.clone()]);
    assert!(listed.contains_stdout("dry-run"));

    let inspected = lake.lakesweep(&["inspect", &run_id, "--json"]).assert_success()?.json()?;
    assert_eq!(inspected["run_id"], run_id.as_str());
    assert_eq!(inspected["would_delete"], 3);

    // Prefix and "latest" resolve to the same run
    let by_prefix = lake.lakesweep(&["inspect", &run_id[..12], "--json"]).assert_success()?.json()?;
    assert_eq!(by_prefix["run_id"], run_id.as_str());
    let latest = lake.lakesweep(&["inspect", "latest", "--failures"]).assert_success()?;
    assert!(latest.contains_stdout("No failures recorded"));
    Ok(())
}

#[test]
fn test_list_without_runs() -> Result<()> {
    let lake = TestLake::new()?;

    let result = lake.lakesweep(&["list"]).assert_success()?;
    assert!(result.contains_stdout("No runs recorded yet"));
    Ok(())
}

#[test]
fn test_inspect_unknown_run_fails() -> Result<()> {
    let lake = TestLake::new()?;

    let result = lake.lakesweep(&["inspect", "01HXKJ7NVQW3Y2YMZK5VFZX3G8"]).assert_failure()?;
    assert!(result.contains_stderr("Run not found"));
    Ok(())
}

#[test]
fn test_resume_completed_run_is_rejected() -> Result<()> {
    let lake = TestLake::new()?;

    let report = lake.run(&["--retain", "7d", "--json"]).assert_success()?.json()?;
    let run_id = report["run_id"].as_str().expect("run id").to_string();

    let catalog = lake.catalog_path().display().to_string();
    let result = lake
        .lakesweep(&["resume", &run_id, "--catalog", &catalog])
        .assert_failure()?;
    assert!(result.contains_stderr("already completed"));
    Ok(())
}

#[test]
fn test_missing_catalog_export_fails() -> Result<()> {
    let lake = TestLake::new()?;

    let result = lake
        .lakesweep(&["run", "--catalog", "does-not-exist.json", "--retain", "7d"])
        .assert_failure()?;
    assert!(result.contains_stderr("catalog export"));
    Ok(())
}
