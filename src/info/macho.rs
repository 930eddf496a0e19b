use super::{
    FormatReader, dedup,
    reader::{Endian, Stream},
};
use crate::{Result, error::malformed_binary_error};
use std::io::{Read, Seek};

// Magic numbers as they read in little-endian order.
const MH_MAGIC: u32 = 0xfeed_face;
const MH_CIGAM: u32 = 0xcefa_edfe;
const MH_MAGIC_64: u32 = 0xfeed_facf;
const MH_CIGAM_64: u32 = 0xcffa_edfe;

const LC_SEGMENT: u32 = 0x1;
const LC_SYMTAB: u32 = 0x2;
const LC_SEGMENT_64: u32 = 0x19;

const N_STAB: u8 = 0xe0;
const N_EXT: u8 = 0x01;
const NO_SECT: u8 = 0;

#[derive(Debug, Clone, Copy)]
struct SymtabCommand {
    symoff: u64,
    nsyms: u64,
    stroff: u64,
    strsize: u64,
}

/// A Mach-O image of either width, in either byte order.
pub(crate) struct MachO {
    wide: bool,
    /// `SEGMENT,section`, in load command order. Symbol section numbers are 1-based indices into it.
    sections: Vec<String>,
    symtab: Option<SymtabCommand>,
}

fn fixed_name(raw: &[u8; 16]) -> String {
    let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..len]).into_owned()
}

impl MachO {
    fn magic<R: Read + Seek>(stream: &mut Stream<R>) -> Result<u32> {
        stream.set_endian(Endian::Little);
        stream.seek(0)?;
        stream.u32()
    }

    /// True when the file ends inside a Mach-O magic number.
    pub(crate) fn is_cut_off<R: Read + Seek>(stream: &mut Stream<R>) -> Result<bool> {
        let prefix = stream.prefix(4)?;
        if prefix.is_empty() || prefix.len() == 4 {
            return Ok(false);
        }
        Ok([MH_MAGIC, MH_CIGAM, MH_MAGIC_64, MH_CIGAM_64]
            .iter()
            .any(|magic| magic.to_le_bytes().starts_with(&prefix)))
    }

    fn read_sections<R: Read + Seek>(
        &mut self,
        stream: &mut Stream<R>,
        command: u64,
        cmdsize: u64,
    ) -> Result<()> {
        let (count_at, first_at, stride) = if self.wide { (64, 72, 80) } else { (48, 56, 68) };
        if cmdsize < first_at {
            return Err(malformed_binary_error(format!(
                "segment command size {cmdsize} is too small"
            )));
        }
        stream.seek(command + count_at)?;
        let count = stream.u32()? as u64;
        // Section headers live inside the segment command.
        if first_at + count * stride > cmdsize {
            return Err(malformed_binary_error(format!(
                "{count} sections do not fit in a segment command of {cmdsize} bytes"
            )));
        }
        stream.check_range(command + first_at, count * stride, "section headers")?;
        for idx in 0..count {
            stream.seek(command + first_at + idx * stride)?;
            let section: [u8; 16] = stream.bytes()?;
            let segment: [u8; 16] = stream.bytes()?;
            self.sections
                .push(format!("{},{}", fixed_name(&segment), fixed_name(&section)));
        }
        Ok(())
    }
}

impl FormatReader for MachO {
    fn detect<R: Read + Seek>(stream: &mut Stream<R>, wide: bool) -> bool {
        match Self::magic(stream) {
            Ok(MH_MAGIC | MH_CIGAM) => !wide,
            Ok(MH_MAGIC_64 | MH_CIGAM_64) => wide,
            _ => false,
        }
    }

    fn parse<R: Read + Seek>(stream: &mut Stream<R>, wide: bool) -> Result<Self> {
        let magic = Self::magic(stream)?;
        if matches!(magic, MH_CIGAM | MH_CIGAM_64) {
            stream.set_endian(Endian::Big);
        }
        let _cputype = stream.u32()?;
        let _cpusubtype = stream.u32()?;
        let _filetype = stream.u32()?;
        let ncmds = stream.u32()?;
        let sizeofcmds = stream.u32()? as u64;
        let _flags = stream.u32()?;
        let header_size = if wide { 32 } else { 28 };
        stream.check_range(header_size, sizeofcmds, "load commands")?;

        let mut macho = MachO {
            wide,
            sections: Vec::new(),
            symtab: None,
        };
        let segment = if wide { LC_SEGMENT_64 } else { LC_SEGMENT };
        let end = header_size + sizeofcmds;
        let mut at = header_size;
        for _ in 0..ncmds {
            if at + 8 > end {
                return Err(malformed_binary_error("load commands overrun their area"));
            }
            stream.seek(at)?;
            let cmd = stream.u32()?;
            let cmdsize = stream.u32()? as u64;
            if cmdsize < 8 || at + cmdsize > end {
                return Err(malformed_binary_error(format!(
                    "load command {cmd:#x} has invalid size {cmdsize}"
                )));
            }
            match cmd {
                c if c == segment => macho.read_sections(stream, at, cmdsize)?,
                LC_SYMTAB => {
                    let symoff = stream.u32()? as u64;
                    let nsyms = stream.u32()? as u64;
                    let stroff = stream.u32()? as u64;
                    let strsize = stream.u32()? as u64;
                    macho.symtab = Some(SymtabCommand {
                        symoff,
                        nsyms,
                        stroff,
                        strsize,
                    });
                }
                _ => {}
            }
            at += cmdsize;
        }
        log::trace!(
            "Mach-O{}: {} load commands, {} sections",
            if wide { 64 } else { 32 },
            ncmds,
            macho.sections.len()
        );
        Ok(macho)
    }

    fn sections<R: Read + Seek>(&self, _stream: &mut Stream<R>) -> Result<Vec<String>> {
        Ok(self.sections.clone())
    }

    fn symbols<R: Read + Seek>(
        &self,
        stream: &mut Stream<R>,
        section: Option<&str>,
    ) -> Result<Vec<String>> {
        let wanted = match section {
            Some(name) => match self.sections.iter().position(|s| s == name) {
                Some(idx) => Some(idx + 1),
                None => return Ok(Vec::new()),
            },
            None => None,
        };
        let Some(symtab) = self.symtab else {
            return Ok(Vec::new());
        };

        let entry = if self.wide { 16 } else { 12 };
        stream.check_range(symtab.symoff, symtab.nsyms * entry, "symbol table")?;
        stream.check_range(symtab.stroff, symtab.strsize, "string table")?;
        let str_end = symtab.stroff + symtab.strsize;

        let mut names = Vec::new();
        for idx in 0..symtab.nsyms {
            stream.seek(symtab.symoff + idx * entry)?;
            let strx = stream.u32()? as u64;
            let kind = stream.u8()?;
            let sect = stream.u8()?;
            if kind & N_STAB != 0 || kind & N_EXT == 0 || sect == NO_SECT {
                continue;
            }
            if wanted.is_some_and(|idx| sect as usize != idx) {
                continue;
            }
            let name = stream.c_string_at(symtab.stroff + strx, str_end)?;
            // C symbols carry a leading underscore.
            let name = match name.strip_prefix('_') {
                Some(stripped) => stripped.to_string(),
                None => name,
            };
            if !name.is_empty() {
                names.push(name);
            }
        }
        Ok(dedup(names))
    }
}
