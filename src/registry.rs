//! Lookups against the system-wide shared assembly store.

use crate::assembly_name::{AssemblyName, PublicKeyToken, Version};
use dashmap::DashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Outcome of a registry lookup. Not finding something is the common case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(PathBuf),
    NotFound,
}

impl Resolution {
    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }
}

/// A shared component registry that can answer "is this assembly installed".
///
/// `lookup` answers for exactly one name form. `resolve` walks the relaxed
/// forms from [`name_variants`] and stops at the first hit.
pub trait RegistryResolver: Send + Sync {
    fn lookup(&self, qualified_name: &str) -> Resolution;

    fn resolve(&self, qualified_name: &str) -> Resolution {
        for variant in name_variants(qualified_name) {
            let resolution = self.lookup(&variant);
            if resolution.is_found() {
                trace!(name = qualified_name, variant = %variant, "registry hit");
                return resolution;
            }
        }
        Resolution::NotFound
    }

    fn exists(&self, qualified_name: &str) -> bool {
        self.resolve(qualified_name).is_found()
    }
}

/// The forms a registry lookup is retried with, most specific first.
///
/// Dropping the public key token can match an unsigned build of a
/// same-named component; the order is kept because some registries only
/// index partially qualified names.
pub fn name_variants(qualified_name: &str) -> Vec<String> {
    let mut variants = vec![qualified_name.to_string()];

    if let Ok(parsed) = qualified_name.parse::<AssemblyName>() {
        let without_arch = AssemblyName {
            processor_architecture: None,
            ..parsed.clone()
        };
        let without_token = AssemblyName {
            public_key_token: None,
            ..without_arch.clone()
        };
        variants.push(parsed.to_string());
        variants.push(without_arch.to_string());
        variants.push(without_token.to_string());
        if let Some(version) = parsed.version {
            variants.push(format!("{}, Version={}", parsed.name, version));
        }
        variants.push(parsed.name.clone());
    }

    let mut seen = std::collections::HashSet::new();
    variants.retain(|v| seen.insert(v.clone()));
    variants
}

/// Registry that never finds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullResolver;

impl RegistryResolver for NullResolver {
    fn lookup(&self, _qualified_name: &str) -> Resolution {
        Resolution::NotFound
    }
}

/// Global assembly cache laid out on disk.
///
/// Each root holds `<Name>/<entry>/<Name>.dll` where `<entry>` is
/// `[v4.0_]<Version>_<Culture>_<PublicKeyToken>`. This covers the .NET
/// Framework 2.0 and 4.0 caches as well as Mono's.
#[derive(Debug, Default)]
pub struct GacResolver {
    roots: Vec<PathBuf>,
    cache: DashMap<String, Resolution>,
}

impl GacResolver {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            cache: DashMap::new(),
        }
    }

    /// Resolver over the platform's well-known cache locations that exist.
    pub fn with_default_roots() -> Self {
        let roots: Vec<PathBuf> = default_roots().into_iter().filter(|p| p.is_dir()).collect();
        debug!(roots = ?roots, "using global assembly cache roots");
        Self::new(roots)
    }

    fn search(&self, query: &AssemblyName) -> Option<PathBuf> {
        self.roots.iter().find_map(|root| search_root(root, query))
    }
}

impl RegistryResolver for GacResolver {
    fn lookup(&self, qualified_name: &str) -> Resolution {
        if let Some(hit) = self.cache.get(qualified_name) {
            return hit.value().clone();
        }

        let resolution = match qualified_name.parse::<AssemblyName>() {
            Ok(query) => self
                .search(&query)
                .map(Resolution::Found)
                .unwrap_or(Resolution::NotFound),
            Err(e) => {
                debug!(name = qualified_name, error = %e, "unparseable registry query");
                Resolution::NotFound
            }
        };

        self.cache.insert(qualified_name.to_string(), resolution.clone());
        resolution
    }
}

pub fn default_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(windir) = std::env::var("WINDIR") {
        let windir = PathBuf::from(windir);
        let net4 = windir.join("Microsoft.NET").join("assembly");
        for flavour in ["GAC_MSIL", "GAC_32", "GAC_64"] {
            roots.push(net4.join(flavour));
        }
        let net2 = windir.join("assembly");
        for flavour in ["GAC_MSIL", "GAC_32", "GAC_64", "GAC"] {
            roots.push(net2.join(flavour));
        }
    }

    roots.push(PathBuf::from("/usr/lib/mono/gac"));
    roots.push(PathBuf::from("/usr/local/lib/mono/gac"));
    roots.push(PathBuf::from(
        "/Library/Frameworks/Mono.framework/Versions/Current/lib/mono/gac",
    ));
    roots
}

/// Components of a cache entry directory name.
#[derive(Debug, PartialEq, Eq)]
struct GacEntry {
    version: Version,
    culture: String,
    token: PublicKeyToken,
}

fn parse_entry(dir_name: &str) -> Option<GacEntry> {
    let trimmed = dir_name.strip_prefix("v4.0_").unwrap_or(dir_name);
    let mut parts = trimmed.splitn(3, '_');
    let version = parts.next()?.parse().ok()?;
    let culture = parts.next()?.to_string();
    let token = parts.next()?.parse().ok()?;
    Some(GacEntry {
        version,
        culture,
        token,
    })
}

fn entry_matches(entry: &GacEntry, query: &AssemblyName) -> bool {
    if let Some(version) = query.version {
        if entry.version != version {
            return false;
        }
    }
    if let Some(culture) = &query.culture {
        let wanted = if culture.eq_ignore_ascii_case("neutral") { "" } else { culture.as_str() };
        if !entry.culture.eq_ignore_ascii_case(wanted) {
            return false;
        }
    }
    if let Some(token) = &query.public_key_token {
        // Only strong-named assemblies live in the cache.
        if token.is_null() || entry.token != *token {
            return false;
        }
    }
    true
}

fn search_root(root: &Path, query: &AssemblyName) -> Option<PathBuf> {
    let name_dir = find_child_ignore_case(root, &query.name)?;
    let mut entries: Vec<(GacEntry, PathBuf)> = fs::read_dir(&name_dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter_map(|p| {
            let entry = parse_entry(p.file_name()?.to_str()?)?;
            Some((entry, p))
        })
        .filter(|(entry, _)| entry_matches(entry, query))
        .collect();
    // Highest version first when the query leaves the version open.
    entries.sort_by(|a, b| b.0.version.cmp(&a.0.version));

    entries.into_iter().find_map(|(_, entry_dir)| {
        ["dll", "exe"]
            .iter()
            .map(|ext| entry_dir.join(format!("{}.{}", query.name, ext)))
            .find(|candidate| candidate.is_file())
            .or_else(|| find_module_ignore_case(&entry_dir, &query.name))
    })
}

fn find_child_ignore_case(dir: &Path, name: &str) -> Option<PathBuf> {
    let exact = dir.join(name);
    if exact.is_dir() {
        return Some(exact);
    }
    fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .find(|e| e.file_name().to_string_lossy().eq_ignore_ascii_case(name))
        .map(|e| e.path())
        .filter(|p| p.is_dir())
}

fn find_module_ignore_case(dir: &Path, name: &str) -> Option<PathBuf> {
    fs::read_dir(dir).ok()?.filter_map(|e| e.ok()).map(|e| e.path()).find(|p| {
        let stem_matches = p
            .file_stem()
            .map(|s| s.to_string_lossy().eq_ignore_ascii_case(name))
            .unwrap_or(false);
        let ext_matches = p
            .extension()
            .map(|e| {
                let e = e.to_string_lossy();
                e.eq_ignore_ascii_case("dll") || e.eq_ignore_ascii_case("exe")
            })
            .unwrap_or(false);
        stem_matches && ext_matches && p.is_file()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const SYSTEM_XML: &str =
        "System.Xml, Version=4.0.0.0, Culture=neutral, PublicKeyToken=b77a5c561934e089, ProcessorArchitecture=MSIL";

    #[test]
    fn variants_follow_documented_order() {
        assert_eq!(
            name_variants(SYSTEM_XML),
            vec![
                SYSTEM_XML.to_string(),
                "System.Xml, Version=4.0.0.0, Culture=neutral, PublicKeyToken=b77a5c561934e089".to_string(),
                "System.Xml, Version=4.0.0.0, Culture=neutral".to_string(),
                "System.Xml, Version=4.0.0.0".to_string(),
                "System.Xml".to_string(),
            ]
        );
    }

    #[test]
    fn variants_of_bare_name_collapse() {
        assert_eq!(name_variants("System"), vec!["System".to_string()]);
        assert_eq!(name_variants(", oops"), vec![", oops".to_string()]);
    }

    struct Recording {
        accepts: &'static str,
        calls: Mutex<Vec<String>>,
    }

    impl RegistryResolver for Recording {
        fn lookup(&self, qualified_name: &str) -> Resolution {
            self.calls.lock().unwrap().push(qualified_name.to_string());
            if qualified_name == self.accepts {
                Resolution::Found(PathBuf::from("/gac/hit.dll"))
            } else {
                Resolution::NotFound
            }
        }
    }

    #[test]
    fn resolve_stops_at_first_hit() {
        let registry = Recording {
            accepts: "System.Xml, Version=4.0.0.0",
            calls: Mutex::new(Vec::new()),
        };
        assert!(registry.exists(SYSTEM_XML));
        assert_eq!(registry.calls.lock().unwrap().len(), 4);
    }

    #[test]
    fn null_resolver_finds_nothing() {
        assert_eq!(NullResolver.resolve(SYSTEM_XML), Resolution::NotFound);
    }

    #[test]
    fn parses_cache_entry_names() {
        assert_eq!(
            parse_entry("v4.0_4.0.0.0__b77a5c561934e089"),
            Some(GacEntry {
                version: Version::new(4, 0, 0, 0),
                culture: String::new(),
                token: "b77a5c561934e089".parse().unwrap(),
            })
        );
        assert_eq!(parse_entry("2.0.0.0_de_b77a5c561934e089").unwrap().culture, "de");
        assert_eq!(parse_entry("junk"), None);
    }

    fn install(root: &Path, name: &str, entry: &str) -> PathBuf {
        let dir = root.join(name).join(entry);
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join(format!("{}.dll", name));
        fs::write(&file, b"MZ").unwrap();
        file
    }

    #[test]
    fn gac_layout_lookup() {
        let root = tempfile::tempdir().unwrap();
        let installed = install(root.path(), "System.Xml", "v4.0_4.0.0.0__b77a5c561934e089");
        let gac = GacResolver::new(vec![root.path().to_path_buf()]);

        assert_eq!(gac.resolve(SYSTEM_XML), Resolution::Found(installed.clone()));
        assert!(gac.lookup("system.xml").is_found());
        assert_eq!(
            gac.lookup("System.Xml, Version=2.0.0.0, Culture=neutral, PublicKeyToken=b77a5c561934e089"),
            Resolution::NotFound
        );
        assert!(!gac.exists("Contoso.Missing"));
    }

    #[test]
    fn null_token_never_matches_cache_entries() {
        let root = tempfile::tempdir().unwrap();
        install(root.path(), "System.Xml", "4.0.0.0__b77a5c561934e089");
        let gac = GacResolver::new(vec![root.path().to_path_buf()]);

        assert_eq!(
            gac.lookup("System.Xml, Version=4.0.0.0, Culture=neutral, PublicKeyToken=null"),
            Resolution::NotFound
        );
        // The relaxed forms drop the token and still find it.
        assert!(gac.exists("System.Xml, Version=4.0.0.0, Culture=neutral, PublicKeyToken=null"));
    }

    #[test]
    fn lookups_are_memoized() {
        struct Counting(AtomicUsize);
        impl RegistryResolver for Counting {
            fn lookup(&self, _: &str) -> Resolution {
                self.0.fetch_add(1, Ordering::SeqCst);
                Resolution::NotFound
            }
        }
        let counting = Counting(AtomicUsize::new(0));
        counting.resolve("A");
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);

        let root = tempfile::tempdir().unwrap();
        let gac = GacResolver::new(vec![root.path().to_path_buf()]);
        gac.lookup("A");
        gac.lookup("A");
        assert_eq!(gac.cache.len(), 1);
    }
}
