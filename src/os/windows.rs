use super::Handle;
use crate::{
    LoadMode, Result,
    error::{address_error, io_error},
};
use core::{
    ffi::{CStr, c_void},
    mem::MaybeUninit,
    ptr::{NonNull, null, null_mut},
};
use std::{
    ffi::{OsStr, OsString},
    os::windows::ffi::{OsStrExt, OsStringExt},
    path::{Path, PathBuf},
};
use windows_sys::Win32::{
    Foundation::{GetLastError, HMODULE},
    System::{
        Diagnostics::Debug::{
            FORMAT_MESSAGE_FROM_SYSTEM, FORMAT_MESSAGE_IGNORE_INSERTS, FormatMessageW,
        },
        LibraryLoader::{
            FreeLibrary, GetModuleFileNameW, GetModuleHandleExW, GetProcAddress, LoadLibraryExW,
        },
        Memory::{MEMORY_BASIC_INFORMATION, VirtualQuery},
    },
};

pub(crate) const LIBRARY_PREFIX: &str = "";
pub(crate) const LIBRARY_SUFFIX: &str = ".dll";

/// Formats `GetLastError()` with the system message table.
fn last_error() -> String {
    let code = unsafe { GetLastError() };
    if code == 0 {
        return String::new();
    }
    let mut buf = [0u16; 512];
    let len = unsafe {
        FormatMessageW(
            FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_IGNORE_INSERTS,
            null(),
            code,
            0,
            buf.as_mut_ptr(),
            buf.len() as u32,
            null(),
        )
    };
    if len == 0 {
        return format!("error code {code}");
    }
    String::from_utf16_lossy(&buf[..len as usize])
        .trim_end()
        .to_string()
}

pub(crate) fn reset_error() {}

fn native_mode(mode: LoadMode) -> u32 {
    (mode
        & (LoadMode::DONT_RESOLVE_DLL_REFERENCES
            | LoadMode::LOAD_IGNORE_CODE_AUTHZ_LEVEL
            | LoadMode::LOAD_WITH_ALTERED_SEARCH_PATH))
        .bits()
}

fn wide(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(Some(0)).collect()
}

pub(crate) fn localize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// MinGW puts a `lib` prefix on DLL names even on Windows.
pub(crate) fn extra_decorations(path: &Path) -> Option<PathBuf> {
    let file_name = path.file_name()?;
    let mut name = OsString::from("lib");
    name.push(file_name);
    name.push(LIBRARY_SUFFIX);
    Some(path.with_file_name(name))
}

pub(crate) unsafe fn open(path: &Path, mode: LoadMode) -> core::result::Result<Handle, String> {
    // LoadLibraryExW appends ".dll" to a name without an extension. A trailing dot stops it.
    let mut name = path.as_os_str().to_os_string();
    if path.extension().is_none() {
        name.push(".");
    }
    let name = wide(&name);
    let handle = unsafe { LoadLibraryExW(name.as_ptr(), null_mut(), native_mode(mode)) };
    NonNull::new(handle).ok_or_else(last_error)
}

/// Opens the running program with a counted reference, so `close` stays balanced.
pub(crate) fn open_self(_mode: LoadMode) -> core::result::Result<Handle, String> {
    let mut handle: HMODULE = null_mut();
    if unsafe { GetModuleHandleExW(0, null(), &mut handle) } == 0 {
        return Err(last_error());
    }
    NonNull::new(handle).ok_or_else(last_error)
}

pub(crate) unsafe fn close(handle: Handle) {
    if unsafe { FreeLibrary(handle.as_ptr()) } == 0 {
        log::warn!("FreeLibrary failed: {}", last_error());
    }
}

pub(crate) unsafe fn symbol(
    handle: Handle,
    name: &CStr,
) -> core::result::Result<NonNull<c_void>, String> {
    let sym = unsafe { GetProcAddress(handle.as_ptr(), name.as_ptr().cast()) };
    sym.and_then(|f| NonNull::new(f as *mut c_void))
        .ok_or_else(last_error)
}

fn module_file_name(module: HMODULE) -> Result<PathBuf> {
    let mut buf = vec![0u16; 260];
    loop {
        let len = unsafe { GetModuleFileNameW(module, buf.as_mut_ptr(), buf.len() as u32) };
        if len == 0 {
            return Err(io_error(format!("GetModuleFileNameW failed: {}", last_error())));
        }
        let len = len as usize;
        if len < buf.len() {
            return Ok(PathBuf::from(OsString::from_wide(&buf[..len])));
        }
        // Truncated: retry with a bigger buffer.
        let new_len = buf.len() * 2;
        buf.resize(new_len, 0);
    }
}

pub(crate) unsafe fn path_from_handle(handle: Handle) -> Result<PathBuf> {
    module_file_name(handle.as_ptr())
}

pub(crate) fn module_of(addr: *const c_void) -> Result<PathBuf> {
    let mut mbi = MaybeUninit::<MEMORY_BASIC_INFORMATION>::uninit();
    let res = unsafe {
        VirtualQuery(
            addr,
            mbi.as_mut_ptr(),
            core::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
        )
    };
    if res == 0 {
        return Err(address_error(last_error()));
    }
    let base = unsafe { mbi.assume_init() }.AllocationBase;
    if base.is_null() {
        return Err(address_error(format!(
            "no loaded module contains {:#x}",
            addr as usize
        )));
    }
    module_file_name(base).map_err(|err| address_error(err.to_string()))
}

pub(crate) fn program_location() -> Result<PathBuf> {
    module_file_name(null_mut())
}
