//! `lakesweep config` subcommands

use crate::common::TestLake;
use crate::lakesweep;
use anyhow::Result;

#[test]
fn test_config_get_and_set() -> Result<()> {
    let lake = TestLake::new()?;

    let grace = lake.lakesweep(&["config", "get", "gc.grace"]).assert_success()?;
    assert_eq!(grace.stdout.trim(), "3h");

    lake.lakesweep(&["config", "set", "concurrency.page_size", "250"]).assert_success()?;
    let page = lake.lakesweep(&["config", "get", "concurrency.page_size"]).assert_success()?;
    assert_eq!(page.stdout.trim(), "250");

    // The repository path written by the fixture survives the rewrite
    let saved = std::fs::read_to_string(lake.config_path())?;
    assert!(saved.contains("repository"));
    assert!(saved.contains("page_size = 250"));
    Ok(())
}

#[test]
fn test_config_set_rejects_invalid_values() -> Result<()> {
    let lake = TestLake::new()?;

    lake.lakesweep(&["config", "set", "concurrency.page_size", "0"]).assert_failure()?;
    lake.lakesweep(&["config", "set", "gc.grace", "soon"]).assert_failure()?;
    lake.lakesweep(&["config", "set", "gc.unknown", "1"]).assert_failure()?;

    let page = lake.lakesweep(&["config", "get", "concurrency.page_size"]).assert_success()?;
    assert_eq!(page.stdout.trim(), "1000");
    Ok(())
}

#[test]
fn test_config_list_shows_sections() -> Result<()> {
    let lake = TestLake::new()?;

    let result = lake.lakesweep(&["config", "list"]).assert_success()?;
    for section in ["[gc]", "[concurrency]", "[retry]", "[repository]", "[logging]"] {
        assert!(result.contains_stdout(section), "missing {}", section);
    }
    assert!(result.contains_stdout("repository"));
    Ok(())
}

#[test]
fn test_config_path_create() -> Result<()> {
    let lake = TestLake::new()?;
    let path = lake.root().join("nested").join("config.toml");
    let path_str = path.display().to_string();

    let mut shown = lake.lakesweep(&["config", "path"]);
    shown.env("LAKESWEEP_CONFIG", &path_str);
    let result = shown.assert_success()?;
    assert!(result.contains_stdout("does not exist"));

    let mut create = lake.lakesweep(&["config", "path", "--create"]);
    create.env("LAKESWEEP_CONFIG", &path_str);
    create.assert_success()?;
    assert!(path.exists());
    Ok(())
}

#[test]
fn test_broken_config_still_allows_config_commands() -> Result<()> {
    let lake = TestLake::new()?;
    std::fs::write(lake.config_path(), "[concurrency]\npage_size = \"lots\"\n")?;

    lake.lakesweep(&["config", "path"]).assert_success()?;
    lake.lakesweep(&["list"]).assert_failure()?;
    Ok(())
}

#[test]
fn test_config_example() -> Result<()> {
    let dir = tempfile::tempdir()?;

    let result = lakesweep!(dir.path(), "config", "example").assert_success()?;
    assert!(result.contains_stdout("[gc]"));
    assert!(result.contains_stdout("grace = \"3h\""));
    Ok(())
}
