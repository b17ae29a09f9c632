//! Sweep edge cases: grace window, unsweepable locations, strict exit codes

use crate::common::TestLake;
use anyhow::Result;

#[test]
fn test_fresh_orphan_survives_grace_window() -> Result<()> {
    let lake = TestLake::new()?;
    lake.write_data("data/in-flight.parquet", 0)?;

    let report = lake.run(&["--retain", "7d", "--json"]).assert_success()?.json()?;

    assert_eq!(report["deleted"], 3);
    assert_eq!(report["skipped_race"], 1);
    assert!(lake.exists("data/in-flight.parquet"));

    // A zero grace window no longer protects it
    let report = lake
        .run(&["--retain", "7d", "--grace", "0s", "--json"])
        .assert_success()?
        .json()?;
    assert_eq!(report["deleted"], 1);
    assert!(!lake.exists("data/in-flight.parquet"));
    Ok(())
}

#[test]
fn test_unsweepable_location_is_reported() -> Result<()> {
    let lake = TestLake::new()?;

    let report = lake
        .run(&["--retain", "7d", "--extra-location", "gs://bucket/dropped/", "--json"])
        .assert_success()?
        .json()?;

    // The failing location does not stop the table location from being swept
    assert_eq!(report["deleted"], 3);
    let failed = report["failed_locations"].as_array().expect("failed locations");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["location"], "gs://bucket/dropped/");
    Ok(())
}

#[test]
fn test_strict_exit_code_on_failed_location() -> Result<()> {
    let lake = TestLake::new()?;

    let result = lake
        .run(&["--retain", "7d", "--extra-location", "gs://bucket/dropped/", "--strict"])
        .assert_exit(2)?;
    assert!(result.contains_stdout("problem(s) recorded"));

    let failures = lake.lakesweep(&["inspect", "latest", "--failures"]).assert_success()?;
    assert!(failures.contains_stdout("Locations not swept"));
    assert!(failures.contains_stdout("gs://bucket/dropped/"));
    Ok(())
}

#[test]
fn test_extra_location_without_live_files_is_swept() -> Result<()> {
    let lake = TestLake::new()?;
    let dropped = lake.root().join("lake").join("dropped");
    std::fs::create_dir_all(&dropped)?;
    std::fs::write(dropped.join("old.parquet"), b"PAR1")?;
    filetime::set_file_mtime(
        dropped.join("old.parquet"),
        filetime::FileTime::from_unix_time(chrono::Utc::now().timestamp() - 86_400 * 2, 0),
    )?;

    let extra = format!("file://{}/", dropped.display());
    let report = lake
        .run(&["--retain", "7d", "--extra-location", &extra, "--json"])
        .assert_success()?
        .json()?;

    assert_eq!(report["deleted"], 4);
    assert_eq!(report["locations_swept"], 2);
    assert!(!dropped.join("old.parquet").exists());
    Ok(())
}

#[test]
fn test_conflicting_cutoff_flags_rejected() -> Result<()> {
    let lake = TestLake::new()?;

    let result = lake
        .run(&["--retain", "7d", "--cutoff", "2024-01-01T00:00:00Z"])
        .assert_failure()?;
    assert_eq!(result.exit_code, 2);
    assert!(result.contains_stderr("cannot be used with"));
    Ok(())
}
