use super::{
    FormatReader, dedup,
    reader::{Endian, Stream},
};
use crate::{Result, error::malformed_binary_error};
use std::io::{Read, Seek};

const ELFMAG: [u8; 4] = *b"\x7fELF";
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;

const SHN_UNDEF: u16 = 0;
const SHN_XINDEX: u16 = 0xffff;

const SHT_SYMTAB: u32 = 2;
const SHT_DYNSYM: u32 = 11;

const STB_GLOBAL: u8 = 1;
const STB_WEAK: u8 = 2;
const STB_GNU_UNIQUE: u8 = 10;
const STV_DEFAULT: u8 = 0;
const STV_PROTECTED: u8 = 3;

#[derive(Debug, Clone)]
struct SectionHeader {
    name: u32,
    kind: u32,
    offset: u64,
    size: u64,
    link: u32,
    entsize: u64,
}

struct RawSymbol {
    name: u32,
    info: u8,
    other: u8,
    shndx: u16,
}

impl RawSymbol {
    fn is_exported(&self) -> bool {
        let bind = self.info >> 4;
        let visibility = self.other & 0x3;
        matches!(bind, STB_GLOBAL | STB_WEAK | STB_GNU_UNIQUE)
            && matches!(visibility, STV_DEFAULT | STV_PROTECTED)
            && self.shndx != SHN_UNDEF
    }
}

/// An ELF image of either class. The section header table is read once, at parse time.
pub(crate) struct Elf {
    wide: bool,
    headers: Vec<SectionHeader>,
    shstrndx: usize,
}

impl Elf {
    /// True when the file ends inside the identification bytes of an ELF magic.
    pub(crate) fn is_cut_off<R: Read + Seek>(stream: &mut Stream<R>) -> Result<bool> {
        let ident = stream.prefix(6)?;
        let n = ident.len().min(ELFMAG.len());
        Ok(n > 0 && ident[..n] == ELFMAG[..n] && ident.len() < 6)
    }

    #[inline]
    fn header_size(&self) -> u64 {
        if self.wide { 64 } else { 40 }
    }

    #[inline]
    fn symbol_size(&self) -> u64 {
        if self.wide { 24 } else { 16 }
    }

    fn read_header<R: Read + Seek>(stream: &mut Stream<R>, wide: bool) -> Result<SectionHeader> {
        let name = stream.u32()?;
        let kind = stream.u32()?;
        let _flags = stream.word(wide)?;
        let _addr = stream.word(wide)?;
        let offset = stream.word(wide)?;
        let size = stream.word(wide)?;
        let link = stream.u32()?;
        let _info = stream.u32()?;
        let _align = stream.word(wide)?;
        let entsize = stream.word(wide)?;
        Ok(SectionHeader {
            name,
            kind,
            offset,
            size,
            link,
            entsize,
        })
    }

    fn section_name<R: Read + Seek>(
        &self,
        stream: &mut Stream<R>,
        header: &SectionHeader,
    ) -> Result<String> {
        // Index 0 means the image has no section name table.
        if self.shstrndx == SHN_UNDEF as usize {
            return Ok(String::new());
        }
        let strtab = &self.headers[self.shstrndx];
        let end = strtab.offset.saturating_add(strtab.size);
        stream.c_string_at(strtab.offset.saturating_add(header.name as u64), end)
    }

    fn read_symbols<R: Read + Seek>(
        &self,
        stream: &mut Stream<R>,
        table: &SectionHeader,
    ) -> Result<Vec<RawSymbol>> {
        let entsize = match table.entsize {
            0 => self.symbol_size(),
            size if size < self.symbol_size() => {
                return Err(malformed_binary_error(format!(
                    "symbol entry size {size} is too small"
                )));
            }
            size => size,
        };
        stream.check_range(table.offset, table.size, "symbol table")?;
        if table.size % entsize != 0 {
            return Err(malformed_binary_error(format!(
                "symbol table size {:#x} is not a multiple of {entsize}",
                table.size
            )));
        }
        let count = table.size / entsize;
        let mut symbols = Vec::with_capacity(count as usize);
        for idx in 0..count {
            stream.seek(table.offset + idx * entsize)?;
            let symbol = if self.wide {
                let name = stream.u32()?;
                let info = stream.u8()?;
                let other = stream.u8()?;
                let shndx = stream.u16()?;
                RawSymbol {
                    name,
                    info,
                    other,
                    shndx,
                }
            } else {
                let name = stream.u32()?;
                let _value = stream.u32()?;
                let _size = stream.u32()?;
                let info = stream.u8()?;
                let other = stream.u8()?;
                let shndx = stream.u16()?;
                RawSymbol {
                    name,
                    info,
                    other,
                    shndx,
                }
            };
            symbols.push(symbol);
        }
        Ok(symbols)
    }
}

impl FormatReader for Elf {
    fn detect<R: Read + Seek>(stream: &mut Stream<R>, wide: bool) -> bool {
        let Ok(ident) = stream.prefix(6) else {
            return false;
        };
        let class = if wide { ELFCLASS64 } else { ELFCLASS32 };
        ident.len() == 6 && ident[..4] == ELFMAG && ident[4] == class
    }

    fn parse<R: Read + Seek>(stream: &mut Stream<R>, wide: bool) -> Result<Self> {
        stream.seek(0)?;
        let ident: [u8; 16] = stream.bytes()?;
        let endian = match ident[5] {
            ELFDATA2LSB => Endian::Little,
            ELFDATA2MSB => Endian::Big,
            other => {
                return Err(malformed_binary_error(format!(
                    "unknown ELF data encoding {other}"
                )));
            }
        };
        stream.set_endian(endian);

        let _e_type = stream.u16()?;
        let _e_machine = stream.u16()?;
        let _e_version = stream.u32()?;
        let _e_entry = stream.word(wide)?;
        let _e_phoff = stream.word(wide)?;
        let e_shoff = stream.word(wide)?;
        let _e_flags = stream.u32()?;
        let _e_ehsize = stream.u16()?;
        let _e_phentsize = stream.u16()?;
        let _e_phnum = stream.u16()?;
        let e_shentsize = stream.u16()? as u64;
        let e_shnum = stream.u16()?;
        let e_shstrndx = stream.u16()?;

        let mut elf = Elf {
            wide,
            headers: Vec::new(),
            shstrndx: 0,
        };
        if e_shoff == 0 {
            return Ok(elf);
        }
        if e_shentsize < elf.header_size() {
            return Err(malformed_binary_error(format!(
                "section header size {e_shentsize} is too small"
            )));
        }

        // Section 0 carries the real counts when they do not fit in the file header.
        stream.check_range(e_shoff, e_shentsize, "section header table")?;
        stream.seek(e_shoff)?;
        let first = Self::read_header(stream, wide)?;
        let count = if e_shnum == 0 {
            first.size
        } else {
            e_shnum as u64
        };
        let shstrndx = if e_shstrndx == SHN_XINDEX {
            first.link as u64
        } else {
            e_shstrndx as u64
        };
        if count == 0 {
            return Ok(elf);
        }
        let table_size = count
            .checked_mul(e_shentsize)
            .ok_or_else(|| malformed_binary_error("section header table is too large"))?;
        stream.check_range(e_shoff, table_size, "section header table")?;
        if shstrndx >= count {
            return Err(malformed_binary_error(format!(
                "section name table index {shstrndx} is out of range"
            )));
        }

        let mut headers = Vec::with_capacity(count as usize);
        headers.push(first);
        for idx in 1..count {
            stream.seek(e_shoff + idx * e_shentsize)?;
            headers.push(Self::read_header(stream, wide)?);
        }
        if let Some(table) = headers.get(shstrndx as usize) {
            stream.check_range(table.offset, table.size, "section name table")?;
        }
        elf.headers = headers;
        elf.shstrndx = shstrndx as usize;
        log::trace!(
            "ELF{}: {} section headers at {:#x}",
            if wide { 64 } else { 32 },
            elf.headers.len(),
            e_shoff
        );
        Ok(elf)
    }

    fn sections<R: Read + Seek>(&self, stream: &mut Stream<R>) -> Result<Vec<String>> {
        self.headers
            .iter()
            .map(|header| self.section_name(stream, header))
            .collect()
    }

    fn symbols<R: Read + Seek>(
        &self,
        stream: &mut Stream<R>,
        section: Option<&str>,
    ) -> Result<Vec<String>> {
        let wanted = match section {
            Some(name) => {
                let mut found = None;
                for (idx, header) in self.headers.iter().enumerate() {
                    if self.section_name(stream, header)? == name {
                        found = Some(idx);
                        break;
                    }
                }
                match found {
                    Some(idx) => Some(idx),
                    None => return Ok(Vec::new()),
                }
            }
            None => None,
        };

        let mut names = Vec::new();
        for table in &self.headers {
            if table.kind != SHT_SYMTAB && table.kind != SHT_DYNSYM {
                continue;
            }
            let strtab = self.headers.get(table.link as usize).ok_or_else(|| {
                malformed_binary_error(format!("string table index {} is out of range", table.link))
            })?;
            let str_end = strtab.offset.saturating_add(strtab.size);
            stream.check_range(strtab.offset, strtab.size, "string table")?;
            for symbol in self.read_symbols(stream, table)? {
                if !symbol.is_exported() {
                    continue;
                }
                if wanted.is_some_and(|idx| symbol.shndx as usize != idx) {
                    continue;
                }
                let name =
                    stream.c_string_at(strtab.offset.saturating_add(symbol.name as u64), str_end)?;
                if !name.is_empty() {
                    names.push(name);
                }
            }
        }
        Ok(dedup(names))
    }
}
