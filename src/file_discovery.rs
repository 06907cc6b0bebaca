use crate::config::Config;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: PathBuf,
    pub size: u64,
    pub extension: Option<String>,
}

/// Lists the candidate modules directly inside the target directory.
pub struct FileDiscovery {
    config: Config,
}

impl FileDiscovery {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn discover_files(&self) -> crate::Result<Vec<FileInfo>> {
        let root = &self.config.target_directory;
        if !root.is_dir() {
            anyhow::bail!("Directory does not exist: {}", root.display());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to list {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(file_info) = self.process_file(entry.path())? {
                files.push(file_info);
            }
        }

        Ok(files)
    }

    fn process_file(&self, path: &Path) -> crate::Result<Option<FileInfo>> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|s| s.to_lowercase());

        let wanted = extension
            .as_ref()
            .map(|ext| self.config.file_extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false);
        if !wanted {
            return Ok(None);
        }

        let metadata = std::fs::metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?;

        Ok(Some(FileInfo {
            path: path.to_path_buf(),
            size: metadata.len(),
            extension,
        }))
    }

    pub fn get_stats(&self, files: &[FileInfo]) -> FileStats {
        let mut stats = FileStats::default();

        for file in files {
            stats.total_files += 1;
            stats.total_size += file.size;

            if let Some(ref ext) = file.extension {
                *stats.extensions.entry(ext.clone()).or_insert(0) += 1;
            }
        }

        stats
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct FileStats {
    pub total_files: usize,
    pub total_size: u64,
    pub extensions: std::collections::BTreeMap<String, usize>,
}

impl FileStats {
    pub fn log_summary(&self) {
        tracing::info!(
            files = self.total_files,
            size_mb = %format!("{:.2}", self.total_size as f64 / (1024.0 * 1024.0)),
            "discovered candidate modules"
        );
        for (ext, count) in &self.extensions {
            tracing::debug!("  .{}: {} files", ext, count);
        }
    }
}
