use super::{read_u16, read_u32, slice, ParseError};

const DOS_MAGIC: u16 = 0x5A4D;
const PE_SIGNATURE: u32 = 0x0000_4550;
const PE32_MAGIC: u16 = 0x010B;
const PE32_PLUS_MAGIC: u16 = 0x020B;
const CLI_HEADER_DIRECTORY: usize = 14;
const SECTION_HEADER_SIZE: usize = 40;

#[derive(Debug, Clone, Copy)]
struct Section {
    virtual_address: u32,
    virtual_size: u32,
    raw_size: u32,
    raw_pointer: u32,
}

impl Section {
    fn contains(&self, rva: u32) -> bool {
        let extent = self.virtual_size.max(self.raw_size) as u64;
        let start = self.virtual_address as u64;
        (start..start + extent).contains(&(rva as u64))
    }
}

/// The PE/COFF view of a managed image: section map plus the CLI header.
#[derive(Debug)]
pub struct PeImage<'a> {
    bytes: &'a [u8],
    sections: Vec<Section>,
    pe32_plus: bool,
    metadata_rva: u32,
    metadata_size: u32,
    cli_flags: u32,
}

impl<'a> PeImage<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ParseError> {
        if read_u16(bytes, 0)? != DOS_MAGIC {
            return Err(ParseError::NotPortableExecutable);
        }
        let pe_offset = read_u32(bytes, 0x3C)? as usize;
        if read_u32(bytes, pe_offset)? != PE_SIGNATURE {
            return Err(ParseError::NotPortableExecutable);
        }

        let coff = pe_offset + 4;
        let section_count = read_u16(bytes, coff + 2)? as usize;
        let optional_size = read_u16(bytes, coff + 16)? as usize;
        let optional = coff + 20;

        let (directories, pe32_plus) = match read_u16(bytes, optional)? {
            PE32_MAGIC => (optional + 96, false),
            PE32_PLUS_MAGIC => (optional + 112, true),
            other => return Err(ParseError::UnsupportedOptionalHeader(other)),
        };

        // NumberOfRvaAndSizes sits right before the directory array.
        let directory_count = read_u32(bytes, directories - 4)? as usize;
        if directory_count <= CLI_HEADER_DIRECTORY {
            return Err(ParseError::NotManaged);
        }
        let cli_entry = directories + CLI_HEADER_DIRECTORY * 8;
        let cli_rva = read_u32(bytes, cli_entry)?;
        let cli_size = read_u32(bytes, cli_entry + 4)?;
        if cli_rva == 0 || cli_size == 0 {
            return Err(ParseError::NotManaged);
        }

        let table = optional + optional_size;
        let sections = (0..section_count)
            .map(|i| {
                let base = table + i * SECTION_HEADER_SIZE;
                Ok(Section {
                    virtual_size: read_u32(bytes, base + 8)?,
                    virtual_address: read_u32(bytes, base + 12)?,
                    raw_size: read_u32(bytes, base + 16)?,
                    raw_pointer: read_u32(bytes, base + 20)?,
                })
            })
            .collect::<Result<Vec<_>, ParseError>>()?;

        let mut image = Self {
            bytes,
            sections,
            pe32_plus,
            metadata_rva: 0,
            metadata_size: 0,
            cli_flags: 0,
        };

        let cli = image.rva_to_offset(cli_rva)?;
        image.metadata_rva = read_u32(bytes, cli + 8)?;
        image.metadata_size = read_u32(bytes, cli + 12)?;
        image.cli_flags = read_u32(bytes, cli + 16)?;

        Ok(image)
    }

    pub fn rva_to_offset(&self, rva: u32) -> Result<usize, ParseError> {
        self.sections
            .iter()
            .find(|section| section.contains(rva))
            .map(|section| (rva - section.virtual_address) as usize + section.raw_pointer as usize)
            .ok_or(ParseError::UnmappedRva(rva))
    }

    pub fn metadata(&self) -> Result<&'a [u8], ParseError> {
        let offset = self.rva_to_offset(self.metadata_rva)?;
        slice(self.bytes, offset, self.metadata_size as usize)
    }

    pub fn cli_flags(&self) -> u32 {
        self.cli_flags
    }

    pub fn is_pe32_plus(&self) -> bool {
        self.pe32_plus
    }
}
