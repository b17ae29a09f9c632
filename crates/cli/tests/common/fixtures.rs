//! On-disk lake fixtures
//!
//! Builds a `file://` table with JSON metadata documents, a catalog export
//! pointing at them, and a config file whose checkpoint repository lives
//! inside the same temporary directory.

use super::cli::LakesweepCommand;
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use filetime::FileTime;
use serde_json::json;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A single-table lake with two commits on `main`
///
/// ```text
/// c1 (20 days ago)  t1 -> metadata/v1.json  {data/a.parquet}
/// c2 (1 day ago)    t1 -> metadata/v2.json  {data/b.parquet}
/// ```
///
/// Storage also holds `data/stray.parquet`, referenced by nothing. Every
/// file is backdated two days so it sits outside the default grace window.
pub struct TestLake {
    dir: TempDir,
}

impl TestLake {
    pub fn new() -> Result<Self> {
        let lake = Self {
            dir: tempfile::tempdir().context("Failed to create temp dir")?,
        };

        let table = lake.table_dir();
        std::fs::create_dir_all(table.join("metadata"))?;
        std::fs::create_dir_all(table.join("data"))?;

        let location = lake.location();
        lake.write_document(
            "metadata/v1.json",
            json!({"location": location, "files": ["data/a.parquet"]}),
        )?;
        lake.write_document(
            "metadata/v2.json",
            json!({"location": location, "files": ["data/b.parquet"]}),
        )?;
        for data in ["data/a.parquet", "data/b.parquet", "data/stray.parquet"] {
            lake.write_data(data, 2)?;
        }

        let now = Utc::now();
        let catalog = json!({
            "references": [{"name": "main", "kind": "branch", "head": "c2"}],
            "commits": [
                {
                    "id": "c1",
                    "parents": [],
                    "timestamp": (now - Duration::days(20)).to_rfc3339(),
                    "mutations": [{"op": "put", "content": "t1", "snapshot": lake.snapshot("v1")}]
                },
                {
                    "id": "c2",
                    "parents": ["c1"],
                    "timestamp": (now - Duration::days(1)).to_rfc3339(),
                    "mutations": [{"op": "put", "content": "t1", "snapshot": lake.snapshot("v2")}]
                }
            ]
        });
        std::fs::write(lake.catalog_path(), serde_json::to_string_pretty(&catalog)?)?;

        let config = format!(
            "[repository]\npath = {:?}\n\n[logging]\nlevel = \"error\"\n",
            lake.root().join("repository")
        );
        std::fs::write(lake.config_path(), config)?;

        Ok(lake)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn table_dir(&self) -> PathBuf {
        self.root().join("lake").join("t1")
    }

    /// Table location URI, ending in `/`
    pub fn location(&self) -> String {
        format!("file://{}/", self.table_dir().display())
    }

    pub fn snapshot(&self, version: &str) -> String {
        format!("{}metadata/{}.json", self.location(), version)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.root().join("catalog.json")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root().join("config.toml")
    }

    /// Whether a table-relative file still exists
    pub fn exists(&self, relative: &str) -> bool {
        self.table_dir().join(relative).exists()
    }

    /// Write a data file last modified `days_old` days ago (0 = now)
    pub fn write_data(&self, relative: &str, days_old: i64) -> Result<()> {
        let path = self.table_dir().join(relative);
        std::fs::write(&path, b"PAR1")?;
        if days_old > 0 {
            backdate(&path, days_old)?;
        }
        Ok(())
    }

    fn write_document(&self, relative: &str, document: serde_json::Value) -> Result<()> {
        let path = self.table_dir().join(relative);
        std::fs::write(&path, serde_json::to_vec(&document)?)?;
        backdate(&path, 2)
    }

    /// A `lakesweep` command pointed at this lake's config
    pub fn lakesweep(&self, args: &[&str]) -> LakesweepCommand {
        let mut cmd = LakesweepCommand::new(self.root());
        cmd.env("LAKESWEEP_CONFIG", &self.config_path().display().to_string());
        cmd.args(args);
        cmd
    }

    /// `lakesweep run --catalog <export> <args>`
    pub fn run(&self, args: &[&str]) -> LakesweepCommand {
        let catalog = self.catalog_path().display().to_string();
        let mut cmd = self.lakesweep(&["run", "--catalog", &catalog]);
        cmd.args(args);
        cmd
    }
}

fn backdate(path: &Path, days: i64) -> Result<()> {
    let at = Utc::now() - Duration::days(days);
    let time = FileTime::from_unix_time(at.timestamp(), 0);
    filetime::set_file_mtime(path, time)
        .with_context(|| format!("Failed to backdate {}", path.display()))
}
