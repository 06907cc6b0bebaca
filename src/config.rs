use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{env, path::Path, path::PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub target_directory: PathBuf,
    pub file_extensions: Vec<String>,
    pub exclusions: Vec<String>,
    pub ignores: Vec<String>,
    pub expected_roots: Vec<String>,
    pub check_version: bool,
    pub workers: usize,
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub enabled: bool,
    pub gac_roots: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_directory: PathBuf::from("."),
            file_extensions: vec!["dll".to_string(), "exe".to_string()],
            exclusions: Vec::new(),
            ignores: Vec::new(),
            expected_roots: Vec::new(),
            check_version: true,
            workers: 0,
            registry: RegistryConfig::default(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            gac_roots: Vec::new(),
        }
    }
}

impl Config {
    /// Get the default config file path (~/.refcheck.toml)
    pub fn default_config_path() -> crate::Result<PathBuf> {
        let home_dir = env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .map_err(|_| anyhow::anyhow!("Could not determine home directory"))?;
        Ok(PathBuf::from(home_dir).join(".refcheck.toml"))
    }

    /// Load config from the default location, falling back to defaults if it doesn't exist
    pub fn load() -> crate::Result<Self> {
        let config_path = match Self::default_config_path() {
            Ok(path) => path,
            Err(_) => return Ok(Self::default()),
        };

        if config_path.exists() {
            tracing::debug!("Loading configuration from: {}", config_path.display());
            Self::from_file(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific file path
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Save config to a file
    pub fn to_file(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Appends a semicolon-delimited command-line list to a configured one.
    pub fn extend_list(list: &mut Vec<String>, delimited: Option<&str>) {
        if let Some(delimited) = delimited {
            list.extend(
                delimited
                    .split(';')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            );
        }
    }

    /// Create a config file with all available options documented
    pub fn create_documented_config() -> String {
        r#"# refcheck configuration file
# Checks that every assembly in a directory can resolve its references.

# Directory to check (usually given with --directory instead)
target_directory = "."

# File extensions treated as candidate modules
file_extensions = ["dll", "exe"]

# Wildcard patterns (* and ?) for references that may be missing without
# failing the check. Matched case-insensitively against the bare name.
exclusions = []

# Wildcard patterns for assemblies to leave out of the graph entirely
ignores = []

# Assembly names that are expected to be the only roots. When set, any
# difference counts towards the exit code.
expected_roots = []

# Require a local file to have the referenced version to satisfy a reference
check_version = true

# Worker threads for scanning (0 = one per CPU)
workers = 0

[registry]
# Fall back to the global assembly cache for references not found locally
enabled = true

# Cache roots to search; empty means the platform defaults
# gac_roots = ["C:\\Windows\\Microsoft.NET\\assembly\\GAC_MSIL"]
gac_roots = []
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_config_parses_to_defaults() {
        let parsed: Config = toml::from_str(&Config::create_documented_config()).unwrap();
        let defaults = Config::default();
        assert_eq!(parsed.file_extensions, defaults.file_extensions);
        assert_eq!(parsed.check_version, defaults.check_version);
        assert!(parsed.registry.enabled);
        assert!(parsed.exclusions.is_empty());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let parsed: Config = toml::from_str("exclusions = [\"System.*\"]\n[registry]\nenabled = false\n").unwrap();
        assert_eq!(parsed.exclusions, vec!["System.*"]);
        assert!(!parsed.registry.enabled);
        assert!(parsed.check_version);
        assert_eq!(parsed.file_extensions, vec!["dll", "exe"]);
    }

    #[test]
    fn round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("refcheck.toml");
        let config = Config {
            ignores: vec!["Noise.*".to_string()],
            workers: 4,
            ..Config::default()
        };
        config.to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.ignores, config.ignores);
        assert_eq!(loaded.workers, 4);
    }

    #[test]
    fn command_line_lists_extend_configured_ones() {
        let mut list = vec!["a".to_string()];
        Config::extend_list(&mut list, Some(" b ;; c*"));
        Config::extend_list(&mut list, None);
        assert_eq!(list, vec!["a", "b", "c*"]);
    }
}
