pub mod analyzer;
pub mod assembly_name;
pub mod classify;
pub mod config;
pub mod dependency_graph;
pub mod file_discovery;
pub mod metadata;
pub mod registry;
pub mod reporter;
pub mod wildcard;

#[cfg(test)]
mod test_support;

pub use analyzer::{Analyzer, CheckResult};
pub use assembly_name::{AssemblyName, PublicKeyToken, Version};
pub use classify::Classification;
pub use config::Config;
pub use dependency_graph::{GraphBuilder, ReferenceGraph, Vertex};
pub use file_discovery::FileDiscovery;
pub use metadata::{CliMetadataParser, ModuleDescriptor, ModuleParser, ParseError};
pub use registry::{GacResolver, NullResolver, RegistryResolver, Resolution};
pub use reporter::Reporter;

pub type Result<T> = anyhow::Result<T>;
