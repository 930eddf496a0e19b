use super::Handle;
use crate::{
    LoadMode, Result,
    error::{address_error, io_error},
};
#[cfg(not(any(target_os = "linux", target_os = "android")))]
use core::mem::MaybeUninit;
use core::{
    ffi::{CStr, c_char, c_int, c_void},
    ptr::NonNull,
};
use std::{
    ffi::{CString, OsStr},
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
};

pub(crate) const LIBRARY_PREFIX: &str = "lib";

#[cfg(target_vendor = "apple")]
pub(crate) const LIBRARY_SUFFIX: &str = ".dylib";
#[cfg(not(target_vendor = "apple"))]
pub(crate) const LIBRARY_SUFFIX: &str = ".so";

/// Takes the pending `dlerror()` text, if any. Reading it also clears it.
fn last_error() -> Option<String> {
    let err = unsafe { libc::dlerror() };
    if err.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned())
    }
}

pub(crate) fn reset_error() {
    let _ = last_error();
}

fn native_mode(mode: LoadMode) -> c_int {
    let mut native = 0;
    if mode.contains(LoadMode::RTLD_LAZY) {
        native |= libc::RTLD_LAZY;
    }
    if mode.contains(LoadMode::RTLD_NOW) {
        native |= libc::RTLD_NOW;
    }
    if mode.contains(LoadMode::RTLD_GLOBAL) {
        native |= libc::RTLD_GLOBAL;
    }
    if mode.contains(LoadMode::RTLD_LOCAL) {
        native |= libc::RTLD_LOCAL;
    }
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    if mode.contains(LoadMode::RTLD_DEEPBIND) {
        native |= libc::RTLD_DEEPBIND;
    }
    native
}

/// Makes a bare file name resolve against the current directory before the system folders.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn localize(path: &Path) -> PathBuf {
    let has_parent = path.parent().is_some_and(|p| !p.as_os_str().is_empty());
    if has_parent {
        path.to_path_buf()
    } else {
        Path::new(".").join(path)
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn localize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// No decorated names beyond `lib<name><suffix>` on this platform.
pub(crate) fn extra_decorations(_path: &Path) -> Option<PathBuf> {
    None
}

pub(crate) unsafe fn open(path: &Path, mode: LoadMode) -> core::result::Result<Handle, String> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| format!("{} contains an interior nul byte", path.display()))?;
    let handle = unsafe { libc::dlopen(c_path.as_ptr(), native_mode(mode)) };
    match NonNull::new(handle) {
        Some(handle) => {
            reset_error();
            Ok(handle)
        }
        None => Err(last_error().unwrap_or_default()),
    }
}

/// Opens the running program itself: `dlopen(NULL, ..)`.
pub(crate) fn open_self(mode: LoadMode) -> core::result::Result<Handle, String> {
    let handle = unsafe { libc::dlopen(core::ptr::null(), native_mode(mode)) };
    match NonNull::new(handle) {
        Some(handle) => {
            reset_error();
            Ok(handle)
        }
        None => Err(last_error().unwrap_or_default()),
    }
}

pub(crate) unsafe fn close(handle: Handle) {
    if unsafe { libc::dlclose(handle.as_ptr()) } != 0 {
        log::warn!("dlclose failed: {}", last_error().unwrap_or_default());
    }
}

pub(crate) unsafe fn symbol(
    handle: Handle,
    name: &CStr,
) -> core::result::Result<NonNull<c_void>, String> {
    reset_error();
    let sym = unsafe { libc::dlsym(handle.as_ptr(), name.as_ptr()) };
    NonNull::new(sym).ok_or_else(|| last_error().unwrap_or_default())
}

#[cfg(any(target_os = "linux", target_os = "freebsd"))]
pub(crate) unsafe fn path_from_handle(handle: Handle) -> Result<PathBuf> {
    const RTLD_DI_LINKMAP: c_int = 2;

    #[repr(C)]
    struct LinkMap {
        l_addr: usize,
        l_name: *const c_char,
        l_ld: *mut c_void,
        l_next: *mut LinkMap,
        l_prev: *mut LinkMap,
    }

    unsafe extern "C" {
        fn dlinfo(handle: *mut c_void, request: c_int, info: *mut c_void) -> c_int;
    }

    let mut link_map: *const LinkMap = core::ptr::null();
    let res = unsafe {
        dlinfo(
            handle.as_ptr(),
            RTLD_DI_LINKMAP,
            (&mut link_map as *mut *const LinkMap).cast(),
        )
    };
    if res < 0 || link_map.is_null() {
        return Err(io_error(format!(
            "dlinfo failed: {}",
            last_error().unwrap_or_default()
        )));
    }
    let name = unsafe { (*link_map).l_name };
    // The main program is recorded with an empty name.
    if name.is_null() || unsafe { *name } == 0 {
        return program_location();
    }
    Ok(path_from_c(unsafe { CStr::from_ptr(name) }))
}

#[cfg(target_vendor = "apple")]
pub(crate) unsafe fn path_from_handle(handle: Handle) -> Result<PathBuf> {
    unsafe extern "C" {
        fn _dyld_image_count() -> u32;
        fn _dyld_get_image_name(image_index: u32) -> *const c_char;
    }

    // RTLD_NOLOAD bumps the reference count of an already loaded image, so every hit is closed again.
    let count = unsafe { _dyld_image_count() };
    for index in 0..count {
        let name = unsafe { _dyld_get_image_name(index) };
        if name.is_null() {
            continue;
        }
        let probe = unsafe { libc::dlopen(name, libc::RTLD_NOLOAD | libc::RTLD_LAZY) };
        if probe.is_null() {
            continue;
        }
        unsafe { libc::dlclose(probe) };
        if probe == handle.as_ptr() {
            return Ok(path_from_c(unsafe { CStr::from_ptr(name) }));
        }
    }
    reset_error();
    // dlopen(NULL) hands out a pseudo handle that matches no image.
    if let Ok(program) = open_self(LoadMode::RTLD_LAZY) {
        unsafe { libc::dlclose(program.as_ptr()) };
        if program == handle {
            return program_location();
        }
    }
    Err(io_error("handle does not belong to any loaded image"))
}

#[cfg(not(any(target_os = "linux", target_os = "freebsd", target_vendor = "apple")))]
pub(crate) unsafe fn path_from_handle(_handle: Handle) -> Result<PathBuf> {
    Err(io_error(
        "mapping a library handle to its path is not supported on this platform",
    ))
}

/// Walks the loaded objects and picks the one with a `PT_LOAD` segment covering `addr`.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn module_of(addr: *const c_void) -> Result<PathBuf> {
    const PT_LOAD: u32 = 1;

    struct Search {
        addr: usize,
        // `Some(None)` is the main program, which has no name of its own.
        found: Option<Option<PathBuf>>,
    }

    unsafe extern "C" fn callback(
        info: *mut libc::dl_phdr_info,
        _size: usize,
        data: *mut c_void,
    ) -> c_int {
        let search = unsafe { &mut *data.cast::<Search>() };
        let info = unsafe { &*info };
        if info.dlpi_phdr.is_null() {
            return 0;
        }
        let phdrs = unsafe { core::slice::from_raw_parts(info.dlpi_phdr, info.dlpi_phnum as usize) };
        let hit = phdrs.iter().filter(|p| p.p_type == PT_LOAD).any(|p| {
            let start = (info.dlpi_addr as usize).wrapping_add(p.p_vaddr as usize);
            let end = start.wrapping_add(p.p_memsz as usize);
            (start..end).contains(&search.addr)
        });
        if !hit {
            return 0;
        }
        let name = info.dlpi_name;
        search.found = if name.is_null() || unsafe { *name } == 0 {
            Some(None)
        } else {
            Some(Some(path_from_c(unsafe { CStr::from_ptr(name) })))
        };
        1
    }

    let mut search = Search {
        addr: addr as usize,
        found: None,
    };
    unsafe { libc::dl_iterate_phdr(Some(callback), (&mut search as *mut Search).cast()) };
    match search.found {
        Some(Some(path)) => Ok(path),
        Some(None) => program_location(),
        None => Err(address_error(format!(
            "no loaded module contains {:#x}",
            addr as usize
        ))),
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn module_of(addr: *const c_void) -> Result<PathBuf> {
    let mut info = MaybeUninit::<libc::Dl_info>::uninit();
    let res = unsafe { libc::dladdr(addr, info.as_mut_ptr()) };
    if res == 0 {
        reset_error();
        return Err(address_error(format!(
            "no loaded module contains {:#x}",
            addr as usize
        )));
    }
    let info = unsafe { info.assume_init() };
    if info.dli_fname.is_null() || unsafe { *info.dli_fname } == 0 {
        return program_location();
    }
    Ok(path_from_c(unsafe { CStr::from_ptr(info.dli_fname) }))
}

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn program_location() -> Result<PathBuf> {
    Ok(std::fs::read_link("/proc/self/exe")?)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn program_location() -> Result<PathBuf> {
    Ok(std::env::current_exe()?)
}

fn path_from_c(name: &CStr) -> PathBuf {
    PathBuf::from(OsStr::from_bytes(name.to_bytes()))
}
