use crate::assembly_name::{AssemblyName, Version};
use crate::metadata::{ModuleDescriptor, ModuleParser};
use crate::registry::RegistryResolver;
use crate::wildcard::WildcardSet;
use petgraph::{graph::NodeIndex, visit::EdgeRef, Directed, Graph};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

pub type ReferenceGraph = Graph<Vertex, (), Directed>;

/// One named, versioned, bitness-tagged assembly identity.
///
/// Identity is `(full_identity, exists, excluded, requires_32bit)`; `name` and
/// `version` are carried for display and are implied by `full_identity`.
#[derive(Debug, Clone, Serialize)]
pub struct Vertex {
    pub full_identity: String,
    pub name: String,
    pub version: Version,
    pub exists: bool,
    pub excluded: bool,
    pub requires_32bit: bool,
}

impl Vertex {
    pub fn new(identity: &AssemblyName, exists: bool, excluded: bool, requires_32bit: bool) -> Self {
        Self {
            full_identity: identity.full_name(),
            name: identity.name.clone(),
            version: identity.version.unwrap_or_default(),
            exists,
            excluded,
            requires_32bit,
        }
    }

    fn key(&self) -> (&str, bool, bool, bool) {
        (&self.full_identity, self.exists, self.excluded, self.requires_32bit)
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.name, self.version)
    }
}

impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Vertex {}

impl Hash for Vertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for Vertex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Vertex {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// "`source` declares a reference to `target`".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge {
    pub source: Vertex,
    pub target: Vertex,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Suppress failure reporting for matching names.
    pub exclusions: WildcardSet,
    /// Drop matching names from the graph entirely.
    pub ignores: WildcardSet,
    /// A same-named local file only satisfies a reference with the same version.
    /// The candidate must still parse and match bitness when this is off.
    pub check_version: bool,
    /// Worker threads for the scan; 0 picks one per CPU.
    pub workers: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            exclusions: WildcardSet::empty(),
            ignores: WildcardSet::empty(),
            check_version: true,
            workers: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub files: usize,
    pub modules: usize,
    pub skipped: usize,
    pub ignored: usize,
    pub references: usize,
}

impl ScanStats {
    fn merge(mut self, other: Self) -> Self {
        self.files += other.files;
        self.modules += other.modules;
        self.skipped += other.skipped;
        self.ignored += other.ignored;
        self.references += other.references;
        self
    }
}

#[derive(Default)]
struct ScanOutput {
    edges: Vec<Edge>,
    isolated: Vec<Vertex>,
    stats: ScanStats,
}

impl ScanOutput {
    fn merge(mut self, mut other: Self) -> Self {
        self.edges.append(&mut other.edges);
        self.isolated.append(&mut other.isolated);
        self.stats = self.stats.merge(other.stats);
        self
    }
}

/// Lazily parsed view of the candidate file set, shared by all workers.
///
/// Each file is read and parsed at most once, whether it is reached as a
/// module being scanned or as a candidate for somebody else's reference.
struct ModuleIndex<'a> {
    parser: &'a dyn ModuleParser,
    modules: HashMap<PathBuf, OnceLock<Option<Arc<ModuleDescriptor>>>>,
    by_stem: HashMap<String, Vec<PathBuf>>,
}

impl<'a> ModuleIndex<'a> {
    fn new(parser: &'a dyn ModuleParser, files: &[PathBuf]) -> Self {
        let mut modules = HashMap::with_capacity(files.len());
        let mut by_stem: HashMap<String, Vec<PathBuf>> = HashMap::new();
        for path in files {
            if modules.insert(path.clone(), OnceLock::new()).is_some() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                by_stem.entry(stem.to_lowercase()).or_default().push(path.clone());
            }
        }
        Self {
            parser,
            modules,
            by_stem,
        }
    }

    fn descriptor(&self, path: &Path) -> Option<Arc<ModuleDescriptor>> {
        self.modules
            .get(path)?
            .get_or_init(|| load_module(self.parser, path))
            .clone()
    }

    fn candidates(&self, name: &str) -> &[PathBuf] {
        self.by_stem
            .get(&name.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

fn load_module(parser: &dyn ModuleParser, path: &Path) -> Option<Arc<ModuleDescriptor>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read file");
            return None;
        }
    };
    match parser.parse(&bytes) {
        Ok(descriptor) => Some(Arc::new(descriptor)),
        Err(e) => {
            debug!(
                path = %path.display(),
                reason = %e,
                "skipping file as it does not appear to be a .NET assembly"
            );
            None
        }
    }
}

/// Builds the reference graph of a set of candidate files.
pub struct GraphBuilder<'a> {
    parser: &'a dyn ModuleParser,
    resolver: &'a dyn RegistryResolver,
    options: BuildOptions,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(
        parser: &'a dyn ModuleParser,
        resolver: &'a dyn RegistryResolver,
        options: BuildOptions,
    ) -> Self {
        Self {
            parser,
            resolver,
            options,
        }
    }

    pub fn build(&self, files: &[PathBuf]) -> ReferenceGraph {
        self.build_with_stats(files).0
    }

    pub fn build_with_stats(&self, files: &[PathBuf]) -> (ReferenceGraph, ScanStats) {
        let mut files = files.to_vec();
        files.sort();
        files.dedup();

        info!("Processing {} files.", files.len());
        let index = ModuleIndex::new(self.parser, &files);

        let scan_all = || {
            files
                .par_iter()
                .map(|path| self.scan_file(&index, path))
                .reduce(ScanOutput::default, ScanOutput::merge)
        };
        let output = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers)
            .build()
        {
            Ok(pool) => pool.install(scan_all),
            Err(e) => {
                warn!(error = %e, "could not start worker pool, using the global pool");
                scan_all()
            }
        };

        info!("Creating graph...");
        let stats = output.stats.clone();
        let graph = assemble(output);
        info!(
            modules = stats.modules,
            skipped = stats.skipped,
            vertices = graph.node_count(),
            edges = graph.edge_count(),
            "reference graph built"
        );
        (graph, stats)
    }

    fn scan_file(&self, index: &ModuleIndex<'_>, path: &Path) -> ScanOutput {
        let mut output = ScanOutput::default();
        output.stats.files = 1;

        let Some(module) = index.descriptor(path) else {
            output.stats.skipped = 1;
            return output;
        };
        if self.options.ignores.is_match(module.name()) {
            debug!(module = module.name(), "ignored");
            output.stats.ignored = 1;
            return output;
        }
        output.stats.modules = 1;
        debug!(path = %path.display(), module = %module.identity, "scanning");

        let source = Vertex::new(
            &module.identity,
            true,
            self.options.exclusions.is_match(module.name()),
            module.requires_32bit,
        );

        for reference in &module.references {
            if self.options.ignores.is_match(&reference.name) {
                continue;
            }
            output.stats.references += 1;

            let exists = self.resolve(index, &module, reference);
            if !exists {
                debug!(module = module.name(), reference = %reference, "unresolved reference");
            }
            let target = Vertex::new(
                reference,
                exists,
                self.options.exclusions.is_match(&reference.name),
                module.requires_32bit,
            );
            output.edges.push(Edge {
                source: source.clone(),
                target,
            });
        }

        if output.edges.is_empty() {
            output.isolated.push(source);
        }
        output
    }

    fn resolve(&self, index: &ModuleIndex<'_>, module: &ModuleDescriptor, reference: &AssemblyName) -> bool {
        self.resolve_from_files(index, module, reference)
            || self.resolver.exists(&reference.to_string())
    }

    /// A local file satisfies a reference when its stem matches the name, it
    /// parses as an assembly that is not ignored, its bitness matches the referencing module and, when version
    /// checking is on, its version matches the one referenced.
    fn resolve_from_files(
        &self,
        index: &ModuleIndex<'_>,
        module: &ModuleDescriptor,
        reference: &AssemblyName,
    ) -> bool {
        index.candidates(&reference.name).iter().any(|path| {
            let Some(candidate) = index.descriptor(path) else {
                return false;
            };
            if self.options.ignores.is_match(candidate.name()) {
                return false;
            }
            if candidate.requires_32bit != module.requires_32bit {
                debug!(
                    module = module.name(),
                    candidate = %path.display(),
                    "bitness mismatch"
                );
                return false;
            }
            !self.options.check_version || Some(candidate.version()) == reference.version
        })
    }
}

/// Single-threaded assembly once every worker has finished.
fn assemble(output: ScanOutput) -> ReferenceGraph {
    let mut vertices: Vec<Vertex> = output
        .edges
        .iter()
        .flat_map(|edge| [edge.source.clone(), edge.target.clone()])
        .chain(output.isolated)
        .collect();
    vertices.sort();
    vertices.dedup();

    let mut edges = output.edges;
    edges.sort();
    edges.dedup();

    let mut graph = ReferenceGraph::with_capacity(vertices.len(), edges.len());
    let mut nodes: HashMap<Vertex, NodeIndex> = HashMap::with_capacity(vertices.len());
    for vertex in vertices {
        let node = graph.add_node(vertex.clone());
        nodes.insert(vertex, node);
    }
    for edge in edges {
        if let (Some(&source), Some(&target)) = (nodes.get(&edge.source), nodes.get(&edge.target)) {
            graph.update_edge(source, target, ());
        }
    }
    graph
}

/// Every edge as a `(source, target)` pair of vertices.
pub fn edge_pairs(graph: &ReferenceGraph) -> Vec<(&Vertex, &Vertex)> {
    graph
        .edge_references()
        .map(|edge| (&graph[edge.source()], &graph[edge.target()]))
        .collect()
}
