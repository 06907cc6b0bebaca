//! Fixtures shared by unit tests: a plain-text stand-in for assembly
//! metadata and a registry with a fixed set of installed names.

use crate::assembly_name::AssemblyName;
use crate::metadata::{ModuleDescriptor, ModuleParser, ParseError};
use crate::registry::{RegistryResolver, Resolution};
use std::collections::HashSet;
use std::path::PathBuf;
use tempfile::TempDir;

/// Parses manifests of the form
///
/// ```text
/// module A 1.0
/// x86
/// ref B 1.0
/// ```
pub struct ManifestParser;

impl ModuleParser for ManifestParser {
    fn parse(&self, bytes: &[u8]) -> Result<ModuleDescriptor, ParseError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ParseError::NotPortableExecutable)?;
        let mut identity = None;
        let mut requires_32bit = false;
        let mut references = Vec::new();

        for line in text.lines() {
            let words: Vec<&str> = line.split_whitespace().collect();
            match words.as_slice() {
                ["module", name, version] => identity = Some(named(name, version)?),
                ["x86"] => requires_32bit = true,
                ["ref", name, version] => references.push(named(name, version)?),
                [] => {}
                _ => return Err(ParseError::NotPortableExecutable),
            }
        }

        Ok(ModuleDescriptor {
            identity: identity.ok_or(ParseError::NotAnAssembly)?,
            requires_32bit,
            references,
        })
    }
}

fn named(name: &str, version: &str) -> Result<AssemblyName, ParseError> {
    let version = version.parse().map_err(|_| ParseError::NotPortableExecutable)?;
    Ok(AssemblyName::with_version(name, version))
}

pub fn write_module(
    dir: &TempDir,
    file: &str,
    name: &str,
    version: &str,
    x86: bool,
    references: &[(&str, &str)],
) -> PathBuf {
    let mut manifest = format!("module {} {}\n", name, version);
    if x86 {
        manifest.push_str("x86\n");
    }
    for (reference, version) in references {
        manifest.push_str(&format!("ref {} {}\n", reference, version));
    }
    let path = dir.path().join(file);
    std::fs::write(&path, manifest).unwrap();
    path
}

/// Registry that knows exactly the listed name forms.
pub struct FixedRegistry {
    installed: HashSet<String>,
}

impl FixedRegistry {
    pub fn empty() -> Self {
        Self {
            installed: HashSet::new(),
        }
    }

    pub fn with(names: &[&str]) -> Self {
        Self {
            installed: names.iter().map(|n| n.to_string()).collect(),
        }
    }
}

impl RegistryResolver for FixedRegistry {
    fn lookup(&self, qualified_name: &str) -> Resolution {
        if self.installed.contains(qualified_name) {
            Resolution::Found(PathBuf::from(qualified_name))
        } else {
            Resolution::NotFound
        }
    }
}
