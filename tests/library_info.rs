mod common;

use common::{compile, lib_path};
use dynlib::{ErrorKind, Format, LibraryInfo, program_location};
use std::io::Cursor;

fn inspect(bytes: Vec<u8>) -> LibraryInfo<Cursor<Vec<u8>>> {
    let _ = env_logger::builder().is_test(true).try_init();
    LibraryInfo::from_reader(Cursor::new(bytes), false).unwrap()
}

fn write_temp(name: &str, bytes: &[u8]) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("dynlib-{}-{name}", std::process::id()));
    std::fs::write(&path, bytes).unwrap();
    path
}

#[test]
fn elf_fixtures() {
    for (wide, format) in [(false, Format::Elf32), (true, Format::Elf64)] {
        let mut info = inspect(common::elf(wide));
        assert_eq!(info.format(), format);
        assert_eq!(
            info.sections().unwrap(),
            ["", ".text", ".data", ".symtab", ".strtab", ".shstrtab"]
        );
        assert_eq!(info.symbols().unwrap(), ["answer", "counter", "helper"]);
        assert_eq!(info.section_symbols(".text").unwrap(), ["answer", "helper"]);
        assert_eq!(info.section_symbols(".data").unwrap(), ["counter"]);
        assert!(info.section_symbols(".strtab").unwrap().is_empty());
        assert!(info.section_symbols(".bss").unwrap().is_empty());
    }
}

#[test]
fn pe_fixtures() {
    for (wide, format) in [(false, Format::Pe32), (true, Format::Pe64)] {
        let mut info = inspect(common::pe(wide));
        assert_eq!(info.format(), format);
        assert_eq!(
            info.sections().unwrap(),
            [".text", ".rdata", ".data_section_long"]
        );
        assert_eq!(info.symbols().unwrap(), ["answer", "counter", "helper"]);
        assert_eq!(info.section_symbols(".text").unwrap(), ["answer", "helper"]);
        assert_eq!(
            info.section_symbols(".data_section_long").unwrap(),
            ["counter"]
        );
        assert!(info.section_symbols(".rdata").unwrap().is_empty());
    }
}

#[test]
fn macho_fixtures() {
    for (wide, format) in [(false, Format::MachO32), (true, Format::MachO64)] {
        let mut info = inspect(common::macho(wide));
        assert_eq!(info.format(), format);
        assert_eq!(info.sections().unwrap(), ["__TEXT,__text", "__DATA,__data"]);
        assert_eq!(info.symbols().unwrap(), ["answer", "counter", "helper"]);
        assert_eq!(
            info.section_symbols("__TEXT,__text").unwrap(),
            ["answer", "helper"]
        );
        assert_eq!(info.section_symbols("__DATA,__data").unwrap(), ["counter"]);
        assert!(info.section_symbols("__TEXT,__cstring").unwrap().is_empty());
    }
}

#[test]
fn queries_can_be_repeated() {
    let mut info = inspect(common::elf(true));
    let first = info.symbols().unwrap();
    info.sections().unwrap();
    assert_eq!(info.symbols().unwrap(), first);
}

#[test]
fn truncated_fixtures_are_malformed() {
    for (name, image) in [
        ("elf32", common::elf(false)),
        ("elf64", common::elf(true)),
        ("pe32", common::pe(false)),
        ("pe64", common::pe(true)),
        ("macho32", common::macho(false)),
        ("macho64", common::macho(true)),
    ] {
        // Every fixture keeps its tables at the end of the file.
        let cut = image[..image.len() - 24].to_vec();
        let result = LibraryInfo::from_reader(Cursor::new(cut), false).and_then(|mut info| {
            info.sections()?;
            info.symbols()
        });
        assert_eq!(
            result.err().map(|e| e.kind()),
            Some(ErrorKind::MalformedBinary),
            "{name}"
        );
    }
}

#[test]
fn unsupported_files() {
    let path = write_temp("text", b"just some text, not a binary");
    let err = LibraryInfo::open_any(&path).err().unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);

    let err = LibraryInfo::open_any("/definitely/not/here.so").err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[cfg(all(unix, not(target_vendor = "apple")))]
#[test]
fn foreign_formats_are_not_native() {
    let path = write_temp("pe64.dll", &common::pe(true));
    let err = LibraryInfo::open(&path).err().unwrap();
    let any = LibraryInfo::open_any(&path).map(|info| info.format());
    std::fs::remove_file(&path).unwrap();
    assert_eq!(err.kind(), ErrorKind::NotNativeFormat);
    assert_eq!(any.unwrap(), Format::Pe64);
}

#[test]
fn running_program() {
    let mut info = LibraryInfo::open(program_location().unwrap()).unwrap();
    let sections = info.sections().unwrap();
    let code = if cfg!(windows) {
        ".text"
    } else if cfg!(target_vendor = "apple") {
        "__TEXT,__text"
    } else {
        ".text"
    };
    assert!(sections.iter().any(|s| s == code), "{sections:?}");
}

#[test]
fn example_library() {
    compile();
    let mut info = LibraryInfo::open(lib_path()).unwrap();
    let symbols = info.symbols().unwrap();
    for name in ["add", "ANSWER", "COUNTER", "bump", "plugin"] {
        assert!(symbols.iter().any(|s| s == name), "{name} in {symbols:?}");
    }
    let code = if cfg!(target_vendor = "apple") {
        "__TEXT,__text"
    } else {
        ".text"
    };
    assert!(info.section_symbols(code).unwrap().iter().any(|s| s == "add"));
}
