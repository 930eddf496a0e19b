use super::{
    FormatReader, dedup,
    reader::{Endian, Stream},
};
use crate::{Result, error::malformed_binary_error};
use std::io::{Read, Seek};

const DOS_MAGIC: [u8; 2] = *b"MZ";
const PE_SIGNATURE: [u8; 4] = *b"PE\0\0";
const E_LFANEW: u64 = 0x3c;
const COFF_HEADER_SIZE: u64 = 20;
const SECTION_HEADER_SIZE: u64 = 40;
const COFF_SYMBOL_SIZE: u64 = 18;
const EXPORT_DIRECTORY_SIZE: u64 = 40;

const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;

#[derive(Debug, Clone)]
struct Section {
    name: String,
    virtual_size: u32,
    virtual_address: u32,
    raw_size: u32,
    raw_offset: u32,
}

impl Section {
    fn contains(&self, rva: u32) -> bool {
        let span = self.virtual_size.max(self.raw_size) as u64;
        let start = self.virtual_address as u64;
        (start..start + span).contains(&(rva as u64))
    }
}

/// A PE image: PE32 or PE32+ depending on the optional header magic.
pub(crate) struct Pe {
    sections: Vec<Section>,
    export_rva: u32,
}

impl Pe {
    /// Returns the optional header offset and its magic.
    fn optional_header<R: Read + Seek>(stream: &mut Stream<R>) -> Result<(u64, u16)> {
        stream.set_endian(Endian::Little);
        stream.seek(0)?;
        if stream.bytes::<2>()? != DOS_MAGIC {
            return Err(malformed_binary_error("missing DOS header"));
        }
        stream.seek(E_LFANEW)?;
        let nt = stream.u32()? as u64;
        stream.seek(nt)?;
        if stream.bytes::<4>()? != PE_SIGNATURE {
            return Err(malformed_binary_error("missing PE signature"));
        }
        let optional = nt + 4 + COFF_HEADER_SIZE;
        stream.seek(optional)?;
        Ok((optional, stream.u16()?))
    }

    /// True when the file starts a DOS header, or a PE signature it points to, and ends before
    /// the optional header magic. A DOS program without a PE header is not cut off.
    pub(crate) fn is_cut_off<R: Read + Seek>(stream: &mut Stream<R>) -> Result<bool> {
        let prefix = stream.prefix(2)?;
        if prefix.is_empty() || !DOS_MAGIC.starts_with(&prefix) {
            return Ok(false);
        }
        let len = stream.len();
        if len < E_LFANEW + 4 {
            return Ok(true);
        }
        stream.set_endian(Endian::Little);
        stream.seek(E_LFANEW)?;
        let nt = stream.u32()? as u64;
        if nt >= len {
            return Ok(false);
        }
        stream.seek(nt)?;
        let available = (len - nt).min(4) as usize;
        let mut signature = [0u8; 4];
        for byte in &mut signature[..available] {
            *byte = stream.u8()?;
        }
        Ok(signature[..available] == PE_SIGNATURE[..available]
            && nt + 4 + COFF_HEADER_SIZE + 2 > len)
    }

    fn rva_to_offset(&self, rva: u32) -> Result<u64> {
        self.sections
            .iter()
            .find(|section| section.contains(rva))
            .map(|section| (rva - section.virtual_address) as u64 + section.raw_offset as u64)
            .ok_or_else(|| malformed_binary_error(format!("RVA {rva:#x} is not in any section")))
    }

    /// Section names are 8 bytes padded with nul, or `/<decimal>` pointing into the COFF string table.
    fn section_name<R: Read + Seek>(
        stream: &mut Stream<R>,
        raw: [u8; 8],
        string_table: u64,
    ) -> Result<String> {
        let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let short = String::from_utf8_lossy(&raw[..len]).into_owned();
        let Some(digits) = short.strip_prefix('/') else {
            return Ok(short);
        };
        match digits.parse::<u64>() {
            Ok(offset) if string_table != 0 => {
                stream.c_string_at(string_table.saturating_add(offset), stream.len())
            }
            _ => Ok(short),
        }
    }
}

impl FormatReader for Pe {
    fn detect<R: Read + Seek>(stream: &mut Stream<R>, wide: bool) -> bool {
        let expected = if wide { PE32_PLUS_MAGIC } else { PE32_MAGIC };
        matches!(Self::optional_header(stream), Ok((_, magic)) if magic == expected)
    }

    fn parse<R: Read + Seek>(stream: &mut Stream<R>, wide: bool) -> Result<Self> {
        let (optional, _) = Self::optional_header(stream)?;
        stream.seek(optional - COFF_HEADER_SIZE + 2)?;
        let section_count = stream.u16()? as u64;
        let _timestamp = stream.u32()?;
        let symbol_table = stream.u32()? as u64;
        let symbol_count = stream.u32()? as u64;
        let optional_size = stream.u16()? as u64;

        let (count_at, dirs_at) = if wide { (108, 112) } else { (92, 96) };
        if optional_size < dirs_at {
            return Err(malformed_binary_error(format!(
                "optional header size {optional_size} is too small"
            )));
        }
        stream.check_range(optional, optional_size, "optional header")?;
        stream.seek(optional + count_at)?;
        let dir_count = stream.u32()?;
        let export_rva = if dir_count > 0 && optional_size >= dirs_at + 8 {
            stream.seek(optional + dirs_at)?;
            stream.u32()?
        } else {
            0
        };

        let string_table = if symbol_table == 0 {
            0
        } else {
            symbol_table + symbol_count * COFF_SYMBOL_SIZE
        };
        let table = optional + optional_size;
        stream.check_range(table, section_count * SECTION_HEADER_SIZE, "section table")?;
        let mut sections = Vec::with_capacity(section_count as usize);
        for idx in 0..section_count {
            stream.seek(table + idx * SECTION_HEADER_SIZE)?;
            let raw: [u8; 8] = stream.bytes()?;
            let virtual_size = stream.u32()?;
            let virtual_address = stream.u32()?;
            let raw_size = stream.u32()?;
            let raw_offset = stream.u32()?;
            let name = Self::section_name(stream, raw, string_table)?;
            sections.push(Section {
                name,
                virtual_size,
                virtual_address,
                raw_size,
                raw_offset,
            });
        }
        log::trace!(
            "PE{}: {} sections, export directory at RVA {:#x}",
            if wide { "32+" } else { "32" },
            sections.len(),
            export_rva
        );
        Ok(Pe {
            sections,
            export_rva,
        })
    }

    fn sections<R: Read + Seek>(&self, _stream: &mut Stream<R>) -> Result<Vec<String>> {
        Ok(self.sections.iter().map(|s| s.name.clone()).collect())
    }

    fn symbols<R: Read + Seek>(
        &self,
        stream: &mut Stream<R>,
        section: Option<&str>,
    ) -> Result<Vec<String>> {
        let wanted = match section {
            Some(name) => match self.sections.iter().find(|s| s.name == name) {
                Some(section) => Some(section),
                None => return Ok(Vec::new()),
            },
            None => None,
        };
        if self.export_rva == 0 {
            return Ok(Vec::new());
        }

        let directory = self.rva_to_offset(self.export_rva)?;
        stream.check_range(directory, EXPORT_DIRECTORY_SIZE, "export directory")?;
        stream.seek(directory + 20)?;
        let function_count = stream.u32()?;
        let name_count = stream.u32()? as u64;
        let functions = stream.u32()?;
        let names = stream.u32()?;
        let ordinals = stream.u32()?;
        if name_count == 0 {
            return Ok(Vec::new());
        }

        let names_at = self.rva_to_offset(names)?;
        let ordinals_at = self.rva_to_offset(ordinals)?;
        stream.check_range(names_at, name_count * 4, "export name table")?;
        stream.check_range(ordinals_at, name_count * 2, "export ordinal table")?;
        let functions_at = if wanted.is_some() {
            let at = self.rva_to_offset(functions)?;
            stream.check_range(at, function_count as u64 * 4, "export address table")?;
            at
        } else {
            0
        };

        let mut result = Vec::with_capacity(name_count as usize);
        for idx in 0..name_count {
            if let Some(section) = wanted {
                stream.seek(ordinals_at + idx * 2)?;
                let ordinal = stream.u16()? as u32;
                if ordinal >= function_count {
                    return Err(malformed_binary_error(format!(
                        "export ordinal {ordinal} is out of range"
                    )));
                }
                stream.seek(functions_at + ordinal as u64 * 4)?;
                if !section.contains(stream.u32()?) {
                    continue;
                }
            }
            stream.seek(names_at + idx * 4)?;
            let name_rva = stream.u32()?;
            let name_at = self.rva_to_offset(name_rva)?;
            result.push(stream.c_string_at(name_at, stream.len())?);
        }
        Ok(dedup(result))
    }
}
