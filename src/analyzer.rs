use crate::{
    classify::Classification,
    config::Config,
    dependency_graph::{BuildOptions, GraphBuilder, ReferenceGraph, ScanStats},
    file_discovery::{FileDiscovery, FileInfo, FileStats},
    metadata::{CliMetadataParser, ModuleParser},
    registry::{GacResolver, NullResolver, RegistryResolver},
    wildcard::WildcardSet,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;

/// Runs one reference check over the configured directory.
pub struct Analyzer {
    config: Config,
    file_discovery: FileDiscovery,
    parser: Box<dyn ModuleParser>,
    resolver: Box<dyn RegistryResolver>,
}

impl Analyzer {
    pub fn new(config: Config) -> crate::Result<Self> {
        let resolver: Box<dyn RegistryResolver> = if !config.registry.enabled {
            info!("Registry lookups disabled");
            Box::new(NullResolver)
        } else if config.registry.gac_roots.is_empty() {
            Box::new(GacResolver::with_default_roots())
        } else {
            Box::new(GacResolver::new(config.registry.gac_roots.clone()))
        };
        Ok(Self::with_components(config, Box::new(CliMetadataParser::new()), resolver))
    }

    /// Uses the given parser and resolver instead of the defaults.
    pub fn with_components(
        config: Config,
        parser: Box<dyn ModuleParser>,
        resolver: Box<dyn RegistryResolver>,
    ) -> Self {
        let file_discovery = FileDiscovery::new(config.clone());
        Self {
            config,
            file_discovery,
            parser,
            resolver,
        }
    }

    fn build_options(&self) -> crate::Result<BuildOptions> {
        Ok(BuildOptions {
            exclusions: WildcardSet::from_patterns(&self.config.exclusions)?,
            ignores: WildcardSet::from_patterns(&self.config.ignores)?,
            check_version: self.config.check_version,
            workers: self.config.workers,
        })
    }

    pub fn check(&self) -> crate::Result<CheckResult> {
        let start_time = Instant::now();
        let options = self.build_options()?;

        info!("Checking {}", self.config.target_directory.display());
        let files = self.file_discovery.discover_files()?;
        let file_stats = self.file_discovery.get_stats(&files);
        file_stats.log_summary();

        let paths: Vec<PathBuf> = files.iter().map(|f| f.path.clone()).collect();
        let builder = GraphBuilder::new(self.parser.as_ref(), self.resolver.as_ref(), options);
        let (graph, scan_stats) = builder.build_with_stats(&paths);

        let classification = Classification::of(&graph, &self.config.expected_roots);
        let duration = start_time.elapsed();
        info!(
            failures = classification.failures.len(),
            roots = classification.roots.len(),
            elapsed_ms = duration.as_millis() as u64,
            "check finished"
        );

        Ok(CheckResult {
            directory: self.config.target_directory.clone(),
            files,
            file_stats,
            scan_stats,
            graph,
            classification,
            duration,
        })
    }
}

/// Everything one check produced.
#[derive(Debug)]
pub struct CheckResult {
    pub directory: PathBuf,
    pub files: Vec<FileInfo>,
    pub file_stats: FileStats,
    pub scan_stats: ScanStats,
    pub graph: ReferenceGraph,
    pub classification: Classification,
    pub duration: Duration,
}

impl CheckResult {
    pub fn exit_code(&self) -> usize {
        self.classification.exit_code()
    }

    pub fn is_clean(&self) -> bool {
        self.exit_code() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{write_module, FixedRegistry, ManifestParser};

    fn analyzer(config: Config, registry: FixedRegistry) -> Analyzer {
        Analyzer::with_components(config, Box::new(ManifestParser), Box::new(registry))
    }

    #[test]
    fn clean_directory_exits_zero() {
        let dir = tempfile::tempdir().unwrap();
        write_module(&dir, "App.exe", "App", "1.0", false, &[("Lib", "1.0")]);
        write_module(&dir, "Lib.dll", "Lib", "1.0", false, &[]);

        let config = Config {
            target_directory: dir.path().to_path_buf(),
            expected_roots: vec!["App".to_string()],
            ..Config::default()
        };
        let result = analyzer(config, FixedRegistry::empty()).check().unwrap();

        assert!(result.is_clean());
        assert_eq!(result.scan_stats.modules, 2);
        assert_eq!(result.file_stats.total_files, 2);
        assert_eq!(result.graph.edge_count(), 1);
    }

    #[test]
    fn configured_patterns_and_roots_reach_the_builder() {
        let dir = tempfile::tempdir().unwrap();
        write_module(
            &dir,
            "App.exe",
            "App",
            "1.0",
            false,
            &[("Optional.Plugin", "1.0"), ("Noise", "1.0"), ("Gone", "1.0")],
        );

        let config = Config {
            target_directory: dir.path().to_path_buf(),
            exclusions: vec!["optional.*".to_string()],
            ignores: vec!["noise".to_string()],
            expected_roots: vec!["App".to_string(), "Service".to_string()],
            ..Config::default()
        };
        let result = analyzer(config, FixedRegistry::empty()).check().unwrap();

        assert_eq!(result.classification.failures.len(), 1);
        assert_eq!(result.classification.missing_but_excluded.len(), 1);
        assert!(result.graph.node_weights().all(|v| v.name != "Noise"));
        // Gone + the missing Service root.
        assert_eq!(result.exit_code(), 2);
    }

    #[test]
    fn missing_directory_fails_before_scanning() {
        let config = Config {
            target_directory: PathBuf::from("/no/such/refcheck/dir"),
            ..Config::default()
        };
        assert!(analyzer(config, FixedRegistry::empty()).check().is_err());
    }

    #[test]
    fn regex_metacharacters_in_patterns_are_literal() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            target_directory: dir.path().to_path_buf(),
            exclusions: vec!["[".to_string()],
            ..Config::default()
        };
        assert!(analyzer(config, FixedRegistry::empty()).check().is_ok());
    }
}
