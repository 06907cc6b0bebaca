use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssemblyNameError {
    #[error("assembly name is empty")]
    Empty,
    #[error("invalid version '{0}'")]
    InvalidVersion(String),
    #[error("invalid public key token '{0}'")]
    InvalidToken(String),
    #[error("malformed name component '{0}'")]
    MalformedComponent(String),
}

/// Four-part assembly version. Missing trailing components read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
    pub revision: u16,
}

impl Version {
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self { major, minor, build, revision }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.build, self.revision)
    }
}

impl FromStr for Version {
    type Err = AssemblyNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AssemblyNameError::InvalidVersion(s.to_string());
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() < 2 || parts.len() > 4 {
            return Err(invalid());
        }

        let mut numbers = [0u16; 4];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part.trim().parse().map_err(|_| invalid())?;
        }

        Ok(Version::new(numbers[0], numbers[1], numbers[2], numbers[3]))
    }
}

/// Public key token as it appears in a display name. An empty token is the
/// unsigned case and renders as `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKeyToken(Vec<u8>);

impl PublicKeyToken {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn null() -> Self {
        Self(Vec::new())
    }

    pub fn is_null(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PublicKeyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("null");
        }
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for PublicKeyToken {
    type Err = AssemblyNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("null") || s.is_empty() {
            return Ok(Self::null());
        }
        if s.len() % 2 != 0 || !s.is_ascii() {
            return Err(AssemblyNameError::InvalidToken(s.to_string()));
        }

        let bytes = (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|_| AssemblyNameError::InvalidToken(s.to_string()))?;
        Ok(Self(bytes))
    }
}

/// A (possibly partial) assembly identity.
///
/// Identities read from metadata always carry version, culture and token.
/// Identities parsed from strings only carry the components that were
/// written, which is what the registry's partial-name lookups rely on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssemblyName {
    pub name: String,
    pub version: Option<Version>,
    pub culture: Option<String>,
    pub public_key_token: Option<PublicKeyToken>,
    pub processor_architecture: Option<String>,
}

impl AssemblyName {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            culture: None,
            public_key_token: None,
            processor_architecture: None,
        }
    }

    /// Fully specified identity with neutral culture and no public key.
    pub fn with_version(name: impl Into<String>, version: Version) -> Self {
        Self {
            version: Some(version),
            culture: Some("neutral".to_string()),
            public_key_token: Some(PublicKeyToken::null()),
            ..Self::new(name)
        }
    }

    pub fn culture(mut self, culture: &str) -> Self {
        self.culture = Some(normalize_culture(culture));
        self
    }

    pub fn token(mut self, token: PublicKeyToken) -> Self {
        self.public_key_token = Some(token);
        self
    }

    /// Display name without the processor architecture qualifier.
    pub fn full_name(&self) -> String {
        Self {
            processor_architecture: None,
            ..self.clone()
        }
        .to_string()
    }
}

/// Empty culture is the invariant culture, written `neutral` in display names.
pub fn normalize_culture(culture: &str) -> String {
    if culture.is_empty() {
        "neutral".to_string()
    } else {
        culture.to_string()
    }
}

impl fmt::Display for AssemblyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(version) = &self.version {
            write!(f, ", Version={}", version)?;
        }
        if let Some(culture) = &self.culture {
            write!(f, ", Culture={}", culture)?;
        }
        if let Some(token) = &self.public_key_token {
            write!(f, ", PublicKeyToken={}", token)?;
        }
        if let Some(arch) = &self.processor_architecture {
            write!(f, ", ProcessorArchitecture={}", arch)?;
        }
        Ok(())
    }
}

impl FromStr for AssemblyName {
    type Err = AssemblyNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(',');
        let name = parts.next().map(str::trim).unwrap_or_default();
        if name.is_empty() {
            return Err(AssemblyNameError::Empty);
        }

        let mut assembly = AssemblyName::new(name);
        for part in parts {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| AssemblyNameError::MalformedComponent(part.to_string()))?;
            let value = value.trim();

            match key.trim().to_ascii_lowercase().as_str() {
                "version" => assembly.version = Some(value.parse()?),
                "culture" => assembly.culture = Some(normalize_culture(value)),
                "publickeytoken" => assembly.public_key_token = Some(value.parse()?),
                "processorarchitecture" => assembly.processor_architecture = Some(value.to_string()),
                // Retargetable, ContentType and friends do not affect identity here.
                _ => {}
            }
        }

        Ok(assembly)
    }
}
