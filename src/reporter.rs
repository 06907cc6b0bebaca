use crate::{
    analyzer::CheckResult,
    classify::{Classification, RootComparison},
    dependency_graph::{edge_pairs, ReferenceGraph, ScanStats, Vertex},
};
use anyhow::Result;
use serde::Serialize;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Dgml,
    Dot,
    Json,
}

impl ReportFormat {
    /// Guesses the format from a file extension, defaulting to DGML.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref()
        {
            Some("dot") | Some("gv") => ReportFormat::Dot,
            Some("json") => ReportFormat::Json,
            _ => ReportFormat::Dgml,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub summary: ScanStats,
    pub vertices: Vec<Vertex>,
    pub edges: Vec<ReportEdge>,
    pub classification: Classification,
}

#[derive(Debug, Serialize)]
pub struct ReportMetadata {
    pub generated_at: String,
    pub directory: String,
    pub total_files: usize,
    pub total_size: u64,
    pub analysis_duration_ms: u128,
    pub exit_code: usize,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ReportEdge {
    pub source: String,
    pub target: String,
}

pub struct Reporter;

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter {
    pub fn new() -> Self {
        Self
    }

    pub fn generate_report(&self, result: &CheckResult) -> Report {
        let mut vertices: Vec<Vertex> = result.graph.node_weights().cloned().collect();
        vertices.sort();

        let mut edges: Vec<ReportEdge> = edge_pairs(&result.graph)
            .into_iter()
            .map(|(source, target)| ReportEdge {
                source: source.full_identity.clone(),
                target: target.full_identity.clone(),
            })
            .collect();
        edges.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));

        Report {
            metadata: ReportMetadata {
                generated_at: chrono::Utc::now().to_rfc3339(),
                directory: result.directory.display().to_string(),
                total_files: result.file_stats.total_files,
                total_size: result.file_stats.total_size,
                analysis_duration_ms: result.duration.as_millis(),
                exit_code: result.exit_code(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            summary: result.scan_stats.clone(),
            vertices,
            edges,
            classification: result.classification.clone(),
        }
    }

    /// The plain-text summary printed after every check.
    pub fn text_report(&self, classification: &Classification) -> String {
        let mut text = String::new();

        section(&mut text, "Roots...", classification.roots.iter().map(|v| v.full_identity.as_str()));
        section(
            &mut text,
            "Missing but excluded...",
            classification.missing_but_excluded.iter().map(|v| v.full_identity.as_str()),
        );
        section(&mut text, "Missing...", classification.failures.iter().map(|v| v.full_identity.as_str()));

        if let Some(RootComparison {
            missing_roots,
            unexpected_roots,
        }) = &classification.root_comparison
        {
            section(&mut text, "Missing expected roots...", missing_roots.iter().map(String::as_str));
            section(
                &mut text,
                "Unexpected roots...",
                unexpected_roots.iter().map(|v| v.full_identity.as_str()),
            );
        }

        text
    }

    /// Visual Studio directed graph markup.
    pub fn generate_dgml(&self, graph: &ReferenceGraph) -> String {
        let ids = node_ids(graph);
        let mut xml = String::from(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<DirectedGraph xmlns=\"http://schemas.microsoft.com/vs/2009/dgml\">\n  <Nodes>\n",
        );

        for vertex in sorted_vertices(graph) {
            let background = match colour(vertex) {
                Some(colour) => format!(" Background=\"{}\"", colour),
                None => String::new(),
            };
            xml.push_str(&format!(
                "    <Node Id=\"{}\" Label=\"{}\"{} />\n",
                ids[&vertex],
                escape_xml(&vertex.label()),
                background
            ));
        }

        xml.push_str("  </Nodes>\n  <Links>\n");
        for (source, target) in sorted_edges(graph) {
            xml.push_str(&format!(
                "    <Link Source=\"{}\" Target=\"{}\" />\n",
                ids[&source], ids[&target]
            ));
        }
        xml.push_str("  </Links>\n</DirectedGraph>\n");
        xml
    }

    /// Graphviz digraph with the same labels and colours as the DGML export.
    pub fn generate_dot(&self, graph: &ReferenceGraph) -> String {
        let ids = node_ids(graph);
        let mut dot = String::from("digraph references {\n  node [shape=box];\n");

        for vertex in sorted_vertices(graph) {
            let fill = match colour(vertex) {
                Some(colour) => format!(", style=filled, fillcolor={}", colour.to_lowercase()),
                None => String::new(),
            };
            dot.push_str(&format!(
                "  n{} [label=\"{}\"{}];\n",
                ids[&vertex],
                escape_dot(&vertex.label()),
                fill
            ));
        }
        for (source, target) in sorted_edges(graph) {
            dot.push_str(&format!("  n{} -> n{};\n", ids[&source], ids[&target]));
        }
        dot.push_str("}\n");
        dot
    }

    pub fn export_graph(&self, result: &CheckResult, output: &Path, format: ReportFormat) -> Result<PathBuf> {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let content = match format {
            ReportFormat::Dgml => self.generate_dgml(&result.graph),
            ReportFormat::Dot => self.generate_dot(&result.graph),
            ReportFormat::Json => serde_json::to_string_pretty(&self.generate_report(result))?,
        };
        fs::write(output, content)?;
        tracing::info!(path = %output.display(), format = ?format, "graph exported");
        Ok(output.to_path_buf())
    }
}

/// Headings are only written for non-empty lists.
fn section<'a>(text: &mut String, heading: &str, lines: impl Iterator<Item = &'a str>) {
    let mut lines = lines.peekable();
    if lines.peek().is_none() {
        return;
    }
    text.push_str(heading);
    text.push('\n');
    for line in lines {
        text.push('\t');
        text.push_str(line);
        text.push('\n');
    }
}

fn colour(vertex: &Vertex) -> Option<&'static str> {
    match (vertex.exists, vertex.excluded) {
        (true, _) => None,
        (false, true) => Some("Yellow"),
        (false, false) => Some("Red"),
    }
}

fn sorted_vertices(graph: &ReferenceGraph) -> Vec<&Vertex> {
    let mut vertices: Vec<&Vertex> = graph.node_weights().collect();
    vertices.sort();
    vertices
}

fn sorted_edges(graph: &ReferenceGraph) -> Vec<(&Vertex, &Vertex)> {
    let mut edges = edge_pairs(graph);
    edges.sort();
    edges
}

/// Stable ids: position in the sorted vertex list.
fn node_ids(graph: &ReferenceGraph) -> HashMap<&Vertex, usize> {
    sorted_vertices(graph)
        .into_iter()
        .enumerate()
        .map(|(i, v)| (v, i))
        .collect()
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
