//! Reading section and symbol tables from library files without loading them.

mod elf;
mod macho;
mod pe;
mod reader;

use crate::{
    Error, Result,
    error::{malformed_binary_error, not_native_error},
};
use core::fmt::Display;
use elf::Elf;
use macho::MachO;
use pe::Pe;
use reader::Stream;
use std::{
    collections::HashSet,
    fs::File,
    io::{BufReader, Read, Seek},
    path::Path,
};

/// One binary container format at one pointer width.
trait FormatReader: Sized {
    /// Looks only at the magic numbers and header signature.
    fn detect<R: Read + Seek>(stream: &mut Stream<R>, wide: bool) -> bool;
    /// Validates the headers and reads the tables every later query needs.
    fn parse<R: Read + Seek>(stream: &mut Stream<R>, wide: bool) -> Result<Self>;
    fn sections<R: Read + Seek>(&self, stream: &mut Stream<R>) -> Result<Vec<String>>;
    fn symbols<R: Read + Seek>(
        &self,
        stream: &mut Stream<R>,
        section: Option<&str>,
    ) -> Result<Vec<String>>;
}

/// Drops repeated names, keeping the first occurrence in place.
fn dedup(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(names.len());
    names
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// The container format and width of a library file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Elf32,
    Elf64,
    Pe32,
    Pe64,
    MachO32,
    MachO64,
}

impl Format {
    /// Readers are probed in this order and the first match wins.
    const PROBE_ORDER: [Format; 6] = [
        Format::Elf32,
        Format::Elf64,
        Format::Pe32,
        Format::Pe64,
        Format::MachO32,
        Format::MachO64,
    ];

    #[inline]
    pub fn is_64bit(self) -> bool {
        matches!(self, Format::Elf64 | Format::Pe64 | Format::MachO64)
    }

    fn detect<R: Read + Seek>(self, stream: &mut Stream<R>) -> bool {
        let wide = self.is_64bit();
        match self {
            Format::Elf32 | Format::Elf64 => Elf::detect(stream, wide),
            Format::Pe32 | Format::Pe64 => Pe::detect(stream, wide),
            Format::MachO32 | Format::MachO64 => MachO::detect(stream, wide),
        }
    }

    /// Fails unless a library of this format could be loaded by the running program.
    pub fn check_native(self) -> Result<()> {
        let host_ok = if cfg!(windows) {
            matches!(self, Format::Pe32 | Format::Pe64)
        } else if cfg!(target_vendor = "apple") {
            matches!(self, Format::MachO32 | Format::MachO64)
        } else {
            matches!(self, Format::Elf32 | Format::Elf64)
        };
        if !host_ok {
            return Err(not_native_error(if cfg!(windows) {
                "not a PE binary"
            } else if cfg!(target_vendor = "apple") {
                "not a Mach-O binary"
            } else {
                "not an ELF binary"
            }));
        }
        if self.is_64bit() && cfg!(target_pointer_width = "32") {
            return Err(not_native_error("64bit binary"));
        }
        Ok(())
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Format::Elf32 => "ELF32",
            Format::Elf64 => "ELF64",
            Format::Pe32 => "PE32",
            Format::Pe64 => "PE32+",
            Format::MachO32 => "Mach-O32",
            Format::MachO64 => "Mach-O64",
        };
        f.write_str(name)
    }
}

enum Parsed {
    Elf(Elf),
    Pe(Pe),
    MachO(MachO),
}

/// A library file opened for inspection.
///
/// The format is detected and the headers validated on construction. Queries read the tables
/// they need from the file on demand.
///
/// # Examples
/// ```no_run
/// # use dynlib::LibraryInfo;
/// let mut info = LibraryInfo::open_any("/usr/lib/libc.so.6").unwrap();
/// println!("{}: {:?}", info.format(), info.sections().unwrap());
/// for name in info.section_symbols(".text").unwrap() {
///     println!("{name}");
/// }
/// ```
pub struct LibraryInfo<R = BufReader<File>> {
    stream: Stream<R>,
    format: Format,
    parsed: Parsed,
}

impl LibraryInfo {
    /// Opens a library file, failing with [`Error::NotNativeFormat`] if the running program could
    /// not load it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_file(path.as_ref(), true)
    }

    /// Opens a library file of any supported format, native or not.
    pub fn open_any(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_file(path.as_ref(), false)
    }

    fn open_file(path: &Path, native_only: bool) -> Result<Self> {
        log::debug!("Inspecting [{}]", path.display());
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), native_only)
    }
}

impl<R: Read + Seek> LibraryInfo<R> {
    /// Detects the format of `reader` and validates its headers.
    pub fn from_reader(reader: R, native_only: bool) -> Result<Self> {
        let mut stream = Stream::new(reader)?;
        let Some(format) = Format::PROBE_ORDER
            .into_iter()
            .find(|format| format.detect(&mut stream))
        else {
            return Err(unrecognized(&mut stream));
        };
        log::debug!("Detected format {}", format);
        if native_only {
            format.check_native()?;
        }
        let wide = format.is_64bit();
        let parsed = match format {
            Format::Elf32 | Format::Elf64 => Parsed::Elf(Elf::parse(&mut stream, wide)?),
            Format::Pe32 | Format::Pe64 => Parsed::Pe(Pe::parse(&mut stream, wide)?),
            Format::MachO32 | Format::MachO64 => Parsed::MachO(MachO::parse(&mut stream, wide)?),
        };
        Ok(LibraryInfo {
            stream,
            format,
            parsed,
        })
    }

    #[inline]
    pub fn format(&self) -> Format {
        self.format
    }

    /// Every section name in file order, duplicates included.
    pub fn sections(&mut self) -> Result<Vec<String>> {
        match &self.parsed {
            Parsed::Elf(elf) => elf.sections(&mut self.stream),
            Parsed::Pe(pe) => pe.sections(&mut self.stream),
            Parsed::MachO(macho) => macho.sections(&mut self.stream),
        }
    }

    /// Every exported symbol defined anywhere in the file.
    pub fn symbols(&mut self) -> Result<Vec<String>> {
        self.query_symbols(None)
    }

    /// The exported symbols defined in `section`. A section without symbols, or one the file
    /// does not have, gives an empty list.
    pub fn section_symbols(&mut self, section: &str) -> Result<Vec<String>> {
        self.query_symbols(Some(section))
    }

    fn query_symbols(&mut self, section: Option<&str>) -> Result<Vec<String>> {
        match &self.parsed {
            Parsed::Elf(elf) => elf.symbols(&mut self.stream, section),
            Parsed::Pe(pe) => pe.symbols(&mut self.stream, section),
            Parsed::MachO(macho) => macho.symbols(&mut self.stream, section),
        }
    }
}

/// No reader matched: a file that ends inside the headers of a known format is malformed,
/// anything else is simply not a library.
fn unrecognized<R: Read + Seek>(stream: &mut Stream<R>) -> Error {
    let cut_off = |stream: &mut Stream<R>| -> Result<bool> {
        Ok(Elf::is_cut_off(stream)? || Pe::is_cut_off(stream)? || MachO::is_cut_off(stream)?)
    };
    match cut_off(stream) {
        Ok(true) => malformed_binary_error("file is truncated inside its header"),
        _ => Error::UnsupportedFormat,
    }
}
