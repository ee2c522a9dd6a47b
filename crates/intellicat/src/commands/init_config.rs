//! `intellicat init-config`: write a default configuration file.

use std::path::{Path, PathBuf};

use anyhow::Result;
use colored::Colorize;

use crate::config::AppConfig;
use crate::error::AppError;

pub async fn execute(path: Option<PathBuf>, config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = path
        .or_else(|| config_path.map(Path::to_path_buf))
        .unwrap_or_else(AppConfig::config_path);

    if path.exists() && !force {
        return Err(AppError::ConfigExists(path).into());
    }

    AppConfig::default().save(&path)?;
    println!("{} Wrote {}", "✓".green(), path.display());
    println!("  Set {} to main or secondary before running.", "node.role".bold());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_writes_loadable_defaults() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("intellicat").join("config.toml");

        execute(Some(path.clone()), None, false).await.unwrap();
        let loaded = AppConfig::load(Some(&path)).unwrap();
        assert!(loaded.node.role.is_none());
        assert_eq!(loaded.node.schedule.max_cycles_per_hour, 4);
    }

    #[tokio::test]
    async fn test_refuses_overwrite_without_force() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "# keep me\n").unwrap();

        let err = execute(Some(path.clone()), None, false).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# keep me\n");

        execute(Some(path.clone()), None, true).await.unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("[node"));
    }
}
