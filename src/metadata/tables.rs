use super::{read_u16, read_u32, read_u64, slice, ParseError};
use crate::assembly_name::Version;

const METADATA_SIGNATURE: u32 = 0x424A_5342;

const HEAP_STRINGS_WIDE: u8 = 0x01;
const HEAP_GUID_WIDE: u8 = 0x02;
const HEAP_BLOB_WIDE: u8 = 0x04;

const MODULE: usize = 0x00;
const TYPE_REF: usize = 0x01;
const TYPE_DEF: usize = 0x02;
const FIELD: usize = 0x04;
const METHOD_DEF: usize = 0x06;
const PARAM: usize = 0x08;
const INTERFACE_IMPL: usize = 0x09;
const MEMBER_REF: usize = 0x0A;
const DECL_SECURITY: usize = 0x0E;
const STAND_ALONE_SIG: usize = 0x11;
const EVENT: usize = 0x14;
const PROPERTY: usize = 0x17;
const MODULE_REF: usize = 0x1A;
const TYPE_SPEC: usize = 0x1B;
const ASSEMBLY: usize = 0x20;
const ASSEMBLY_REF: usize = 0x23;
const FILE: usize = 0x26;
const EXPORTED_TYPE: usize = 0x27;
const MANIFEST_RESOURCE: usize = 0x28;
const GENERIC_PARAM: usize = 0x2A;
const METHOD_SPEC: usize = 0x2B;
const GENERIC_PARAM_CONSTRAINT: usize = 0x2C;

/// Tables a coded index may point at, and the width of its tag.
type CodedIndex = (&'static [usize], u32);

const TYPE_DEF_OR_REF: CodedIndex = (&[TYPE_DEF, TYPE_REF, TYPE_SPEC], 2);
const HAS_CONSTANT: CodedIndex = (&[FIELD, PARAM, PROPERTY], 2);
const HAS_CUSTOM_ATTRIBUTE: CodedIndex = (
    &[
        METHOD_DEF, FIELD, TYPE_REF, TYPE_DEF, PARAM, INTERFACE_IMPL, MEMBER_REF, MODULE,
        DECL_SECURITY, PROPERTY, EVENT, STAND_ALONE_SIG, MODULE_REF, TYPE_SPEC, ASSEMBLY,
        ASSEMBLY_REF, FILE, EXPORTED_TYPE, MANIFEST_RESOURCE, GENERIC_PARAM,
        GENERIC_PARAM_CONSTRAINT, METHOD_SPEC,
    ],
    5,
);
const HAS_FIELD_MARSHAL: CodedIndex = (&[FIELD, PARAM], 1);
const HAS_DECL_SECURITY: CodedIndex = (&[TYPE_DEF, METHOD_DEF, ASSEMBLY], 2);
const MEMBER_REF_PARENT: CodedIndex = (&[TYPE_DEF, TYPE_REF, MODULE_REF, METHOD_DEF, TYPE_SPEC], 3);
const HAS_SEMANTICS: CodedIndex = (&[EVENT, PROPERTY], 1);
const METHOD_DEF_OR_REF: CodedIndex = (&[METHOD_DEF, MEMBER_REF], 1);
const MEMBER_FORWARDED: CodedIndex = (&[FIELD, METHOD_DEF], 1);
const CUSTOM_ATTRIBUTE_TYPE: CodedIndex = (&[METHOD_DEF, MEMBER_REF], 3);
const RESOLUTION_SCOPE: CodedIndex = (&[MODULE, MODULE_REF, ASSEMBLY_REF, TYPE_REF], 2);

/// One row of either the `Assembly` or the `AssemblyRef` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyRow {
    pub version: Version,
    pub flags: u32,
    pub public_key_or_token: Vec<u8>,
    pub name: String,
    pub culture: String,
}

/// The compressed (`#~`) table stream with the heaps it indexes into.
#[derive(Debug)]
pub struct MetadataTables<'a> {
    tables: &'a [u8],
    strings: &'a [u8],
    blobs: &'a [u8],
    heap_sizes: u8,
    rows: [u32; 64],
    data_start: usize,
}

impl<'a> MetadataTables<'a> {
    pub fn parse(metadata: &'a [u8]) -> Result<Self, ParseError> {
        let signature = read_u32(metadata, 0)?;
        if signature != METADATA_SIGNATURE {
            return Err(ParseError::BadMetadataSignature(signature));
        }

        let version_length = read_u32(metadata, 12)? as usize;
        let mut offset = 16 + align4(version_length);
        let stream_count = read_u16(metadata, offset + 2)? as usize;
        offset += 4;

        let (mut tables, mut strings, mut blobs) = (None, None, None);
        for _ in 0..stream_count {
            let stream_offset = read_u32(metadata, offset)? as usize;
            let stream_size = read_u32(metadata, offset + 4)? as usize;
            let name = stream_name(metadata, offset + 8)?;
            let data = slice(metadata, stream_offset, stream_size)?;
            match name {
                b"#~" | b"#-" => tables = Some(data),
                b"#Strings" => strings = Some(data),
                b"#Blob" => blobs = Some(data),
                _ => {}
            }
            offset += 8 + align4(name.len() + 1);
        }

        let tables = tables.ok_or(ParseError::MissingStream("#~"))?;
        let strings = strings.ok_or(ParseError::MissingStream("#Strings"))?;
        // An image without any blobs may omit the heap entirely.
        let blobs = blobs.unwrap_or(&[]);

        let heap_sizes = *tables.get(6).ok_or(ParseError::Truncated(6))?;
        let valid = read_u64(tables, 8)?;
        let mut rows = [0u32; 64];
        let mut cursor = 24;
        for (table, count) in rows.iter_mut().enumerate() {
            if valid & (1u64 << table) != 0 {
                *count = read_u32(tables, cursor)?;
                cursor += 4;
            }
        }

        Ok(Self {
            tables,
            strings,
            blobs,
            heap_sizes,
            rows,
            data_start: cursor,
        })
    }

    pub fn row_count(&self, table: usize) -> u32 {
        self.rows.get(table).copied().unwrap_or(0)
    }

    /// The manifest row of this assembly, if it has one.
    pub fn assembly(&self) -> Result<Option<AssemblyRow>, ParseError> {
        if self.row_count(ASSEMBLY) == 0 {
            return Ok(None);
        }
        let mut cursor = self.table_offset(ASSEMBLY)?;

        let _hash_algorithm = self.u32(&mut cursor)?;
        let version = self.version(&mut cursor)?;
        let flags = self.u32(&mut cursor)?;
        let public_key_or_token = self.blob(&mut cursor)?;
        let name = self.string(&mut cursor)?;
        let culture = self.string(&mut cursor)?;

        Ok(Some(AssemblyRow {
            version,
            flags,
            public_key_or_token,
            name,
            culture,
        }))
    }

    pub fn assembly_refs(&self) -> Result<Vec<AssemblyRow>, ParseError> {
        let mut cursor = self.table_offset(ASSEMBLY_REF)?;
        (0..self.row_count(ASSEMBLY_REF))
            .map(|_| {
                let version = self.version(&mut cursor)?;
                let flags = self.u32(&mut cursor)?;
                let public_key_or_token = self.blob(&mut cursor)?;
                let name = self.string(&mut cursor)?;
                let culture = self.string(&mut cursor)?;
                let _hash_value = self.blob_index(&mut cursor)?;
                Ok(AssemblyRow {
                    version,
                    flags,
                    public_key_or_token,
                    name,
                    culture,
                })
            })
            .collect()
    }

    fn table_offset(&self, table: usize) -> Result<usize, ParseError> {
        let mut offset = self.data_start;
        for earlier in 0..table {
            offset += self.row_size(earlier)? * self.row_count(earlier) as usize;
        }
        Ok(offset)
    }

    fn row_size(&self, table: usize) -> Result<usize, ParseError> {
        let s = self.string_width();
        let g = self.guid_width();
        let b = self.blob_width();
        let idx = |t| self.index_width(t);
        let coded = |c: CodedIndex| self.coded_width(c);

        let size = match table {
            0x00 => 2 + s + g + g + g,
            0x01 => coded(RESOLUTION_SCOPE) + s + s,
            0x02 => 4 + s + s + coded(TYPE_DEF_OR_REF) + idx(FIELD) + idx(METHOD_DEF),
            0x03 => idx(FIELD),
            0x04 => 2 + s + b,
            0x05 => idx(METHOD_DEF),
            0x06 => 4 + 2 + 2 + s + b + idx(PARAM),
            0x07 => idx(PARAM),
            0x08 => 2 + 2 + s,
            0x09 => idx(TYPE_DEF) + coded(TYPE_DEF_OR_REF),
            0x0A => coded(MEMBER_REF_PARENT) + s + b,
            0x0B => 2 + coded(HAS_CONSTANT) + b,
            0x0C => coded(HAS_CUSTOM_ATTRIBUTE) + coded(CUSTOM_ATTRIBUTE_TYPE) + b,
            0x0D => coded(HAS_FIELD_MARSHAL) + b,
            0x0E => 2 + coded(HAS_DECL_SECURITY) + b,
            0x0F => 2 + 4 + idx(TYPE_DEF),
            0x10 => 4 + idx(FIELD),
            0x11 => b,
            0x12 => idx(TYPE_DEF) + idx(EVENT),
            0x13 => idx(EVENT),
            0x14 => 2 + s + coded(TYPE_DEF_OR_REF),
            0x15 => idx(TYPE_DEF) + idx(PROPERTY),
            0x16 => idx(PROPERTY),
            0x17 => 2 + s + b,
            0x18 => 2 + idx(METHOD_DEF) + coded(HAS_SEMANTICS),
            0x19 => idx(TYPE_DEF) + coded(METHOD_DEF_OR_REF) + coded(METHOD_DEF_OR_REF),
            0x1A => s,
            0x1B => b,
            0x1C => 2 + coded(MEMBER_FORWARDED) + s + idx(MODULE_REF),
            0x1D => 4 + idx(FIELD),
            0x1E => 4 + 4,
            0x1F => 4,
            0x20 => 4 + 2 * 4 + 4 + b + s + s,
            0x21 => 4,
            0x22 => 4 + 4 + 4,
            other => return Err(ParseError::UnknownTable(other)),
        };
        Ok(size)
    }

    fn string_width(&self) -> usize {
        if self.heap_sizes & HEAP_STRINGS_WIDE != 0 { 4 } else { 2 }
    }

    fn guid_width(&self) -> usize {
        if self.heap_sizes & HEAP_GUID_WIDE != 0 { 4 } else { 2 }
    }

    fn blob_width(&self) -> usize {
        if self.heap_sizes & HEAP_BLOB_WIDE != 0 { 4 } else { 2 }
    }

    fn index_width(&self, table: usize) -> usize {
        if self.row_count(table) < (1 << 16) { 2 } else { 4 }
    }

    fn coded_width(&self, (tables, tag_bits): CodedIndex) -> usize {
        let max_rows = tables.iter().map(|&t| self.row_count(t)).max().unwrap_or(0);
        if max_rows < (1u32 << (16 - tag_bits)) { 2 } else { 4 }
    }

    fn u16(&self, cursor: &mut usize) -> Result<u16, ParseError> {
        let value = read_u16(self.tables, *cursor)?;
        *cursor += 2;
        Ok(value)
    }

    fn u32(&self, cursor: &mut usize) -> Result<u32, ParseError> {
        let value = read_u32(self.tables, *cursor)?;
        *cursor += 4;
        Ok(value)
    }

    fn heap_index(&self, cursor: &mut usize, width: usize) -> Result<usize, ParseError> {
        if width == 4 {
            Ok(self.u32(cursor)? as usize)
        } else {
            Ok(self.u16(cursor)? as usize)
        }
    }

    fn version(&self, cursor: &mut usize) -> Result<Version, ParseError> {
        Ok(Version::new(
            self.u16(cursor)?,
            self.u16(cursor)?,
            self.u16(cursor)?,
            self.u16(cursor)?,
        ))
    }

    fn string(&self, cursor: &mut usize) -> Result<String, ParseError> {
        let index = self.heap_index(cursor, self.string_width())?;
        let tail = self.strings.get(index..).ok_or(ParseError::Truncated(index))?;
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        std::str::from_utf8(&tail[..end])
            .map(str::to_string)
            .map_err(|_| ParseError::InvalidString(index))
    }

    fn blob_index(&self, cursor: &mut usize) -> Result<usize, ParseError> {
        self.heap_index(cursor, self.blob_width())
    }

    fn blob(&self, cursor: &mut usize) -> Result<Vec<u8>, ParseError> {
        let index = self.blob_index(cursor)?;
        if index == 0 {
            return Ok(Vec::new());
        }
        let (length, header) = blob_length(self.blobs, index)?;
        Ok(slice(self.blobs, index + header, length)?.to_vec())
    }
}

/// Decodes an ECMA-335 compressed length prefix: returns (length, prefix size).
fn blob_length(blobs: &[u8], index: usize) -> Result<(usize, usize), ParseError> {
    let first = *blobs.get(index).ok_or(ParseError::Truncated(index))? as usize;
    if first & 0x80 == 0 {
        Ok((first, 1))
    } else if first & 0xC0 == 0x80 {
        let bytes = slice(blobs, index, 2)?;
        Ok((((first & 0x3F) << 8) | bytes[1] as usize, 2))
    } else {
        let bytes = slice(blobs, index, 4)?;
        let length = ((first & 0x1F) << 24)
            | (bytes[1] as usize) << 16
            | (bytes[2] as usize) << 8
            | bytes[3] as usize;
        Ok((length, 4))
    }
}

fn stream_name(metadata: &[u8], offset: usize) -> Result<&[u8], ParseError> {
    let tail = metadata.get(offset..).ok_or(ParseError::Truncated(offset))?;
    let end = tail
        .iter()
        .take(32)
        .position(|&b| b == 0)
        .ok_or(ParseError::Truncated(offset))?;
    Ok(&tail[..end])
}

fn align4(value: usize) -> usize {
    (value + 3) & !3
}
