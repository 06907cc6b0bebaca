//! Writes minimal but well-formed managed PE images for the integration tests.
#![allow(dead_code)]

use refcheck::Version;
use std::path::{Path, PathBuf};

const SECTION_RVA: u32 = 0x2000;
const FILE_ALIGNMENT: usize = 0x200;
const CLI_HEADER_SIZE: usize = 72;
const COMIMAGE_FLAGS_ILONLY: u32 = 0x1;
const COMIMAGE_FLAGS_32BITREQUIRED: u32 = 0x2;

/// The ECMA standard public key, whose token is `b77a5c561934e089`.
pub const ECMA_KEY: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0];

struct Reference {
    name: String,
    version: Version,
    culture: String,
    token: Vec<u8>,
}

pub struct TestAssembly {
    name: String,
    version: Version,
    culture: String,
    public_key: Vec<u8>,
    requires_32bit: bool,
    pe32_plus: bool,
    manifest: bool,
    managed: bool,
    references: Vec<Reference>,
}

impl TestAssembly {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.parse().unwrap(),
            culture: String::new(),
            public_key: Vec::new(),
            requires_32bit: false,
            pe32_plus: false,
            manifest: true,
            managed: true,
            references: Vec::new(),
        }
    }

    pub fn x86(mut self) -> Self {
        self.requires_32bit = true;
        self
    }

    pub fn pe32_plus(mut self) -> Self {
        self.pe32_plus = true;
        self
    }

    pub fn culture(mut self, culture: &str) -> Self {
        self.culture = culture.to_string();
        self
    }

    pub fn public_key(mut self, key: &[u8]) -> Self {
        self.public_key = key.to_vec();
        self
    }

    /// A netmodule: metadata but no `Assembly` row.
    pub fn without_manifest(mut self) -> Self {
        self.manifest = false;
        self
    }

    /// A native image: no CLI header at all.
    pub fn native(mut self) -> Self {
        self.managed = false;
        self
    }

    pub fn reference(self, name: &str, version: &str) -> Self {
        self.reference_with_token(name, version, &[])
    }

    pub fn reference_with_token(mut self, name: &str, version: &str, token: &[u8]) -> Self {
        self.references.push(Reference {
            name: name.to_string(),
            version: version.parse().unwrap(),
            culture: String::new(),
            token: token.to_vec(),
        });
        self
    }

    pub fn write_to(&self, dir: &Path, file: &str) -> PathBuf {
        let path = dir.join(file);
        std::fs::write(&path, self.to_bytes()).unwrap();
        path
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let metadata = self.metadata();
        let mut text = Vec::new();
        put_u32(&mut text, CLI_HEADER_SIZE as u32);
        put_u16(&mut text, 2);
        put_u16(&mut text, 5);
        put_u32(&mut text, SECTION_RVA + CLI_HEADER_SIZE as u32);
        put_u32(&mut text, metadata.len() as u32);
        let mut flags = COMIMAGE_FLAGS_ILONLY;
        if self.requires_32bit {
            flags |= COMIMAGE_FLAGS_32BITREQUIRED;
        }
        put_u32(&mut text, flags);
        text.resize(CLI_HEADER_SIZE, 0);
        text.extend_from_slice(&metadata);
        text.resize(align(text.len(), FILE_ALIGNMENT), 0);

        let optional_size: usize = if self.pe32_plus { 240 } else { 224 };
        let mut image = vec![0u8; 0x80];
        image[0..2].copy_from_slice(b"MZ");
        image[0x3C..0x40].copy_from_slice(&0x80u32.to_le_bytes());

        image.extend_from_slice(b"PE\0\0");
        put_u16(&mut image, if self.pe32_plus { 0x8664 } else { 0x014C });
        put_u16(&mut image, 1);
        put_u32(&mut image, 0);
        put_u32(&mut image, 0);
        put_u32(&mut image, 0);
        put_u16(&mut image, optional_size as u16);
        put_u16(&mut image, 0x2102);

        let optional = image.len();
        put_u16(&mut image, if self.pe32_plus { 0x020B } else { 0x010B });
        image.resize(optional + optional_size, 0);
        let directories = optional + if self.pe32_plus { 112 } else { 96 };
        set_u32(&mut image, directories - 4, 16);
        if self.managed {
            set_u32(&mut image, directories + 14 * 8, SECTION_RVA);
            set_u32(&mut image, directories + 14 * 8 + 4, CLI_HEADER_SIZE as u32);
        }

        image.extend_from_slice(b".text\0\0\0");
        put_u32(&mut image, text.len() as u32);
        put_u32(&mut image, SECTION_RVA);
        put_u32(&mut image, text.len() as u32);
        put_u32(&mut image, FILE_ALIGNMENT as u32);
        image.extend_from_slice(&[0u8; 12]);
        put_u32(&mut image, 0x6000_0020);

        image.resize(FILE_ALIGNMENT, 0);
        image.extend_from_slice(&text);
        image
    }

    fn metadata(&self) -> Vec<u8> {
        let mut strings = vec![0u8];
        let mut blobs = vec![0u8];

        let mut tables = Vec::new();
        put_u32(&mut tables, 0);
        tables.extend_from_slice(&[2, 0, 0, 1]);
        let mut valid = 1u64;
        if self.manifest {
            valid |= 1 << 0x20;
        }
        if !self.references.is_empty() {
            valid |= 1 << 0x23;
        }
        put_u64(&mut tables, valid);
        put_u64(&mut tables, 0);
        put_u32(&mut tables, 1);
        if self.manifest {
            put_u32(&mut tables, 1);
        }
        if !self.references.is_empty() {
            put_u32(&mut tables, self.references.len() as u32);
        }

        // Module
        let module_name = add_string(&mut strings, &format!("{}.dll", self.name));
        put_u16(&mut tables, 0);
        put_u16(&mut tables, module_name);
        put_u16(&mut tables, 0);
        put_u16(&mut tables, 0);
        put_u16(&mut tables, 0);

        if self.manifest {
            put_u32(&mut tables, 0x8004);
            put_version(&mut tables, self.version);
            put_u32(&mut tables, if self.public_key.is_empty() { 0 } else { 1 });
            let key = add_blob(&mut blobs, &self.public_key);
            let name = add_string(&mut strings, &self.name);
            let culture = add_string(&mut strings, &self.culture);
            put_u16(&mut tables, key);
            put_u16(&mut tables, name);
            put_u16(&mut tables, culture);
        }

        for reference in &self.references {
            put_version(&mut tables, reference.version);
            put_u32(&mut tables, 0);
            let token = add_blob(&mut blobs, &reference.token);
            let name = add_string(&mut strings, &reference.name);
            let culture = add_string(&mut strings, &reference.culture);
            put_u16(&mut tables, token);
            put_u16(&mut tables, name);
            put_u16(&mut tables, culture);
            put_u16(&mut tables, 0);
        }

        let streams: [(&str, Vec<u8>); 3] = [("#~", tables), ("#Strings", strings), ("#Blob", blobs)];
        let streams = streams.map(|(name, mut data)| {
            data.resize(align(data.len(), 4), 0);
            (name, data)
        });

        let version = b"v4.0.30319\0\0";
        let header_len = 16
            + version.len()
            + 4
            + streams
                .iter()
                .map(|(name, _)| 8 + align(name.len() + 1, 4))
                .sum::<usize>();

        let mut metadata = Vec::new();
        put_u32(&mut metadata, 0x424A_5342);
        put_u16(&mut metadata, 1);
        put_u16(&mut metadata, 1);
        put_u32(&mut metadata, 0);
        put_u32(&mut metadata, version.len() as u32);
        metadata.extend_from_slice(version);
        put_u16(&mut metadata, 0);
        put_u16(&mut metadata, streams.len() as u16);

        let mut offset = header_len;
        for (name, data) in &streams {
            put_u32(&mut metadata, offset as u32);
            put_u32(&mut metadata, data.len() as u32);
            let start = metadata.len();
            metadata.extend_from_slice(name.as_bytes());
            metadata.resize(start + align(name.len() + 1, 4), 0);
            offset += data.len();
        }
        for (_, data) in &streams {
            metadata.extend_from_slice(data);
        }
        metadata
    }
}

fn add_string(heap: &mut Vec<u8>, value: &str) -> u16 {
    if value.is_empty() {
        return 0;
    }
    let index = heap.len() as u16;
    heap.extend_from_slice(value.as_bytes());
    heap.push(0);
    index
}

fn add_blob(heap: &mut Vec<u8>, value: &[u8]) -> u16 {
    if value.is_empty() {
        return 0;
    }
    let index = heap.len() as u16;
    let length = value.len();
    if length < 0x80 {
        heap.push(length as u8);
    } else {
        heap.push(0x80 | (length >> 8) as u8);
        heap.push((length & 0xFF) as u8);
    }
    heap.extend_from_slice(value);
    index
}

fn put_version(out: &mut Vec<u8>, version: Version) {
    put_u16(out, version.major);
    put_u16(out, version.minor);
    put_u16(out, version.build);
    put_u16(out, version.revision);
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn set_u32(out: &mut [u8], offset: usize, value: u32) {
    out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn align(value: usize, to: usize) -> usize {
    value.div_ceil(to) * to
}
