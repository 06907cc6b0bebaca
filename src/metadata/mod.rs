//! Reading assembly identities out of managed PE images.
//!
//! Only the parts of ECMA-335 needed to answer "who am I, what bitness do I
//! need, and which assemblies do I reference" are decoded: the PE/COFF
//! headers, the CLI header, the metadata root and the `Assembly` /
//! `AssemblyRef` tables.

mod pe;
mod tables;

use crate::assembly_name::{AssemblyName, PublicKeyToken, Version};
use serde::Serialize;
use sha1::{Digest, Sha1};
use thiserror::Error;

pub use pe::PeImage;
pub use tables::{AssemblyRow, MetadataTables};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected end of data at offset {0:#x}")]
    Truncated(usize),
    #[error("not a portable executable")]
    NotPortableExecutable,
    #[error("unsupported optional header magic {0:#x}")]
    UnsupportedOptionalHeader(u16),
    #[error("image has no CLI header")]
    NotManaged,
    #[error("RVA {0:#x} is not mapped by any section")]
    UnmappedRva(u32),
    #[error("bad metadata signature {0:#x}")]
    BadMetadataSignature(u32),
    #[error("metadata stream {0} is missing")]
    MissingStream(&'static str),
    #[error("metadata table {0:#04x} has an unknown layout")]
    UnknownTable(usize),
    #[error("invalid UTF-8 in string heap at index {0}")]
    InvalidString(usize),
    #[error("image is a module without an assembly manifest")]
    NotAnAssembly,
}

const COMIMAGE_FLAGS_32BITREQUIRED: u32 = 0x0000_0002;
const ASSEMBLY_FLAGS_PUBLIC_KEY: u32 = 0x0000_0001;

/// What the graph builder needs to know about one binary module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleDescriptor {
    pub identity: AssemblyName,
    pub requires_32bit: bool,
    pub references: Vec<AssemblyName>,
}

impl ModuleDescriptor {
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn version(&self) -> Version {
        self.identity.version.unwrap_or_default()
    }
}

/// Turns the bytes of a candidate file into a [`ModuleDescriptor`].
///
/// Implementations must be callable from several worker threads at once.
pub trait ModuleParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<ModuleDescriptor, ParseError>;
}

/// [`ModuleParser`] for .NET assemblies.
#[derive(Debug, Default, Clone, Copy)]
pub struct CliMetadataParser;

impl CliMetadataParser {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleParser for CliMetadataParser {
    fn parse(&self, bytes: &[u8]) -> Result<ModuleDescriptor, ParseError> {
        let image = PeImage::parse(bytes)?;
        let tables = MetadataTables::parse(image.metadata()?)?;

        let assembly = tables.assembly()?.ok_or(ParseError::NotAnAssembly)?;
        let references = tables
            .assembly_refs()?
            .into_iter()
            .map(|row| identity_from_row(&row))
            .collect();

        Ok(ModuleDescriptor {
            identity: identity_from_row(&assembly),
            requires_32bit: image.cli_flags() & COMIMAGE_FLAGS_32BITREQUIRED != 0,
            references,
        })
    }
}

fn identity_from_row(row: &AssemblyRow) -> AssemblyName {
    let token = if row.flags & ASSEMBLY_FLAGS_PUBLIC_KEY != 0 || row.public_key_or_token.len() > 8 {
        public_key_token(&row.public_key_or_token)
    } else {
        PublicKeyToken::new(row.public_key_or_token.clone())
    };

    AssemblyName::with_version(row.name.clone(), row.version)
        .culture(&row.culture)
        .token(token)
}

/// The token of a strong-name key: the last eight bytes of its SHA-1, reversed.
pub fn public_key_token(public_key: &[u8]) -> PublicKeyToken {
    if public_key.is_empty() {
        return PublicKeyToken::null();
    }
    let digest = Sha1::digest(public_key);
    let token: Vec<u8> = digest.iter().rev().take(8).copied().collect();
    PublicKeyToken::new(token)
}

pub(crate) fn read_u16(bytes: &[u8], offset: usize) -> Result<u16, ParseError> {
    let slice = slice(bytes, offset, 2)?;
    Ok(u16::from_le_bytes([slice[0], slice[1]]))
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, ParseError> {
    let slice = slice(bytes, offset, 4)?;
    Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

pub(crate) fn read_u64(bytes: &[u8], offset: usize) -> Result<u64, ParseError> {
    let lo = read_u32(bytes, offset)? as u64;
    let hi = read_u32(bytes, offset + 4)? as u64;
    Ok(lo | (hi << 32))
}

pub(crate) fn slice(bytes: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    offset
        .checked_add(len)
        .and_then(|end| bytes.get(offset..end))
        .ok_or(ParseError::Truncated(offset))
}
