#![allow(dead_code)]

use byteorder::{LittleEndian, WriteBytesExt};
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::PathBuf;
use std::sync::Once;

const TARGET_DIR: Option<&'static str> = option_env!("CARGO_TARGET_DIR");

const PACKAGE_NAME: [&str; 1] = ["example_dylib"];

/// Builds the example plugin once per test binary.
pub fn compile() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
        for name in PACKAGE_NAME {
            let mut cmd = std::process::Command::new("cargo");
            cmd.arg("build").arg("-r").arg("-p").arg(name);
            assert!(
                cmd.status()
                    .expect("could not compile the test helpers!")
                    .success()
            );
        }
    });
}

pub fn release_dir() -> PathBuf {
    let path: PathBuf = TARGET_DIR.unwrap_or("target").into();
    path.join("release")
}

/// `target/release/libexample.so` or its platform equivalent.
pub fn lib_path() -> PathBuf {
    release_dir().join(format!("{DLL_PREFIX}example{DLL_SUFFIX}"))
}

/// A string table with a leading empty string, as ELF and Mach-O lay them out.
fn string_table(names: &[&str]) -> (Vec<u8>, Vec<u32>) {
    let mut table = vec![0u8];
    let mut offsets = Vec::with_capacity(names.len());
    for name in names {
        offsets.push(table.len() as u32);
        table.extend_from_slice(name.as_bytes());
        table.push(0);
    }
    (table, offsets)
}

fn put_word(buf: &mut Vec<u8>, wide: bool, value: u64) {
    if wide {
        buf.write_u64::<LittleEndian>(value).unwrap();
    } else {
        buf.write_u32::<LittleEndian>(value as u32).unwrap();
    }
}

fn align(buf: &mut Vec<u8>, to: usize) {
    while buf.len() % to != 0 {
        buf.push(0);
    }
}

fn fixed16(name: &str) -> [u8; 16] {
    let mut raw = [0u8; 16];
    raw[..name.len()].copy_from_slice(name.as_bytes());
    raw
}

/// A relocatable-style ELF image with `.text`, `.data` and a symbol table holding exported
/// `answer` and `helper` in `.text`, `counter` in `.data`, a local `hidden` and an undefined
/// `external`.
pub fn elf(wide: bool) -> Vec<u8> {
    let (shstrtab, sh_names) =
        string_table(&[".text", ".data", ".symtab", ".strtab", ".shstrtab"]);
    let (strtab, sym_names) = string_table(&["answer", "counter", "hidden", "external", "helper"]);
    // (name, info, shndx)
    let symbols = [
        (0, 0u8, 0u16),
        (sym_names[0], 0x12, 1),
        (sym_names[1], 0x11, 2),
        (sym_names[2], 0x02, 1),
        (sym_names[3], 0x10, 0),
        (sym_names[4], 0x22, 1),
    ];

    let header_size = if wide { 64 } else { 52 };
    let mut image = vec![0u8; header_size];
    let text_at = image.len();
    image.extend_from_slice(&[0xc3; 16]);
    let data_at = image.len();
    image.extend_from_slice(&[0; 8]);
    align(&mut image, 8);
    let symtab_at = image.len();
    for (name, info, shndx) in symbols {
        image.write_u32::<LittleEndian>(name).unwrap();
        if wide {
            image.push(info);
            image.push(0);
            image.write_u16::<LittleEndian>(shndx).unwrap();
            image.write_u64::<LittleEndian>(0).unwrap();
            image.write_u64::<LittleEndian>(0).unwrap();
        } else {
            image.write_u32::<LittleEndian>(0).unwrap();
            image.write_u32::<LittleEndian>(0).unwrap();
            image.push(info);
            image.push(0);
            image.write_u16::<LittleEndian>(shndx).unwrap();
        }
    }
    let symtab_size = image.len() - symtab_at;
    let strtab_at = image.len();
    image.extend_from_slice(&strtab);
    let shstrtab_at = image.len();
    image.extend_from_slice(&shstrtab);
    align(&mut image, 8);
    let shoff = image.len();

    let entsize = if wide { 24 } else { 16 };
    // (name, type, offset, size, link, entsize)
    let sections = [
        (0, 0, 0, 0, 0, 0),
        (sh_names[0], 1, text_at, 16, 0, 0),
        (sh_names[1], 1, data_at, 8, 0, 0),
        (sh_names[2], 2, symtab_at, symtab_size, 4, entsize),
        (sh_names[3], 3, strtab_at, strtab.len(), 0, 0),
        (sh_names[4], 3, shstrtab_at, shstrtab.len(), 0, 0),
    ];
    for (name, kind, offset, size, link, entsize) in sections {
        image.write_u32::<LittleEndian>(name).unwrap();
        image.write_u32::<LittleEndian>(kind).unwrap();
        put_word(&mut image, wide, 0);
        put_word(&mut image, wide, 0);
        put_word(&mut image, wide, offset as u64);
        put_word(&mut image, wide, size as u64);
        image.write_u32::<LittleEndian>(link).unwrap();
        image.write_u32::<LittleEndian>(0).unwrap();
        put_word(&mut image, wide, 1);
        put_word(&mut image, wide, entsize as u64);
    }

    let mut header = vec![0x7f, b'E', b'L', b'F', if wide { 2 } else { 1 }, 1, 1];
    header.resize(16, 0);
    header.write_u16::<LittleEndian>(1).unwrap();
    header
        .write_u16::<LittleEndian>(if wide { 62 } else { 3 })
        .unwrap();
    header.write_u32::<LittleEndian>(1).unwrap();
    put_word(&mut header, wide, 0);
    put_word(&mut header, wide, 0);
    put_word(&mut header, wide, shoff as u64);
    header.write_u32::<LittleEndian>(0).unwrap();
    for value in [header_size as u16, 0, 0, if wide { 64 } else { 40 }, 6, 5] {
        header.write_u16::<LittleEndian>(value).unwrap();
    }
    assert_eq!(header.len(), header_size);
    image[..header_size].copy_from_slice(&header);
    image
}

/// A PE image with `.text`, `.rdata` holding the export directory, and a section whose long name
/// `.data_section_long` lives in the COFF string table. Exports `answer` and `helper` point into
/// `.text`, `counter` into the long-named section.
pub fn pe(wide: bool) -> Vec<u8> {
    const TEXT_RVA: u32 = 0x1000;
    const RDATA_RVA: u32 = 0x2000;
    const LONG_RVA: u32 = 0x3000;
    const RAW_SIZE: u32 = 0x200;

    let mut rdata = vec![0u8; 40];
    let functions = RDATA_RVA + rdata.len() as u32;
    for rva in [TEXT_RVA, LONG_RVA, TEXT_RVA + 8] {
        rdata.write_u32::<LittleEndian>(rva).unwrap();
    }
    let names = RDATA_RVA + rdata.len() as u32;
    rdata.extend_from_slice(&[0; 12]);
    let ordinals = RDATA_RVA + rdata.len() as u32;
    for ordinal in [0u16, 1, 2] {
        rdata.write_u16::<LittleEndian>(ordinal).unwrap();
    }
    let dll_name = RDATA_RVA + rdata.len() as u32;
    rdata.extend_from_slice(b"fixture.dll\0");
    for (idx, name) in ["answer", "counter", "helper"].into_iter().enumerate() {
        let rva = RDATA_RVA + rdata.len() as u32;
        let slot = (names - RDATA_RVA) as usize + idx * 4;
        rdata[slot..slot + 4].copy_from_slice(&rva.to_le_bytes());
        rdata.extend_from_slice(name.as_bytes());
        rdata.push(0);
    }
    let mut directory = Vec::new();
    // The third slot holds both version halves.
    for value in [0u32, 0, 0, dll_name, 1, 3, 3, functions, names, ordinals] {
        directory.write_u32::<LittleEndian>(value).unwrap();
    }
    rdata[..40].copy_from_slice(&directory);
    assert!(rdata.len() <= RAW_SIZE as usize);
    rdata.resize(RAW_SIZE as usize, 0);

    let optional_size: u16 = if wide { 240 } else { 224 };
    let mut image = vec![0u8; 0x40];
    image[..2].copy_from_slice(b"MZ");
    image[0x3c..0x40].copy_from_slice(&0x40u32.to_le_bytes());
    image.extend_from_slice(b"PE\0\0");
    image
        .write_u16::<LittleEndian>(if wide { 0x8664 } else { 0x14c })
        .unwrap();
    image.write_u16::<LittleEndian>(3).unwrap();
    image.write_u32::<LittleEndian>(0).unwrap();
    let string_table = 0x800u32;
    image.write_u32::<LittleEndian>(string_table).unwrap();
    image.write_u32::<LittleEndian>(0).unwrap();
    image.write_u16::<LittleEndian>(optional_size).unwrap();
    image.write_u16::<LittleEndian>(0x2022).unwrap();

    let mut optional = vec![0u8; optional_size as usize];
    let magic: u16 = if wide { 0x20b } else { 0x10b };
    optional[..2].copy_from_slice(&magic.to_le_bytes());
    let (count_at, dirs_at) = if wide { (108, 112) } else { (92, 96) };
    optional[count_at..count_at + 4].copy_from_slice(&16u32.to_le_bytes());
    optional[dirs_at..dirs_at + 4].copy_from_slice(&RDATA_RVA.to_le_bytes());
    optional[dirs_at + 4..dirs_at + 8].copy_from_slice(&40u32.to_le_bytes());
    image.extend_from_slice(&optional);

    let sections = [
        (*b".text\0\0\0", 0x10, TEXT_RVA, 0x200u32),
        (*b".rdata\0\0", RAW_SIZE, RDATA_RVA, 0x400),
        (*b"/4\0\0\0\0\0\0", 0x10, LONG_RVA, 0x600),
    ];
    for (name, virtual_size, rva, raw_at) in sections {
        image.extend_from_slice(&name);
        for value in [virtual_size, rva, RAW_SIZE, raw_at, 0, 0, 0, 0x4000_0040] {
            image.write_u32::<LittleEndian>(value).unwrap();
        }
    }
    assert!(image.len() <= 0x200);

    image.resize(0x200, 0);
    image.extend_from_slice(&[0xc3; RAW_SIZE as usize]);
    image.extend_from_slice(&rdata);
    image.extend_from_slice(&[0; RAW_SIZE as usize]);
    assert_eq!(image.len(), string_table as usize);
    let long_name = b".data_section_long\0";
    image
        .write_u32::<LittleEndian>(4 + long_name.len() as u32)
        .unwrap();
    image.extend_from_slice(long_name);
    image
}

/// A Mach-O dylib with `__TEXT,__text` and `__DATA,__data`. Exports `_answer` and `_helper`
/// from the first section, `_counter` from the second, plus a private, an undefined and a
/// debugging entry.
pub fn macho(wide: bool) -> Vec<u8> {
    let header_size = if wide { 32 } else { 28 };
    let (segment_size, section_size) = if wide { (72, 80) } else { (56, 68) };
    let segment_cmd = segment_size + section_size;
    let sizeofcmds = 2 * segment_cmd + 24;

    let (strings, offsets) =
        string_table(&["_answer", "_counter", "_hidden", "_external", "_stab", "_helper"]);
    // (name, type, sect)
    let symbols = [
        (offsets[0], 0x0f, 1),
        (offsets[1], 0x0f, 2),
        (offsets[2], 0x0e, 1),
        (offsets[3], 0x01, 0),
        (offsets[4], 0x24, 1),
        (offsets[5], 0x0f, 1),
    ];
    let entry = if wide { 16 } else { 12 };
    let symoff = header_size + sizeofcmds;
    let stroff = symoff + symbols.len() * entry;

    let mut image = Vec::new();
    let magic = if wide { 0xfeed_facf } else { 0xfeed_face };
    let cputype = if wide { 0x0100_0007 } else { 7 };
    for value in [magic, cputype, 3, 6, 3, sizeofcmds as u32, 0] {
        image.write_u32::<LittleEndian>(value).unwrap();
    }
    if wide {
        image.write_u32::<LittleEndian>(0).unwrap();
    }

    for (segment, section) in [("__TEXT", "__text"), ("__DATA", "__data")] {
        image
            .write_u32::<LittleEndian>(if wide { 0x19 } else { 0x1 })
            .unwrap();
        image.write_u32::<LittleEndian>(segment_cmd as u32).unwrap();
        image.extend_from_slice(&fixed16(segment));
        for _ in 0..4 {
            put_word(&mut image, wide, 0);
        }
        for value in [7, 5, 1, 0] {
            image.write_u32::<LittleEndian>(value).unwrap();
        }
        image.extend_from_slice(&fixed16(section));
        image.extend_from_slice(&fixed16(segment));
        put_word(&mut image, wide, 0);
        put_word(&mut image, wide, 0);
        let tail = if wide { 8 } else { 7 };
        for _ in 0..tail {
            image.write_u32::<LittleEndian>(0).unwrap();
        }
    }

    for value in [
        0x2,
        24,
        symoff as u32,
        symbols.len() as u32,
        stroff as u32,
        strings.len() as u32,
    ] {
        image.write_u32::<LittleEndian>(value).unwrap();
    }
    assert_eq!(image.len(), symoff);

    for (name, kind, sect) in symbols {
        image.write_u32::<LittleEndian>(name).unwrap();
        image.push(kind);
        image.push(sect);
        image.write_u16::<LittleEndian>(0).unwrap();
        put_word(&mut image, wide, 0);
    }
    image.extend_from_slice(&strings);
    image
}
