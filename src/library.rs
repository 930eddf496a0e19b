use crate::{
    Error, LoadMode, Result,
    error::{find_symbol_error, invalid_image_error, load_error},
    os::{self, Handle},
};
use core::{
    ffi::c_void,
    fmt::Debug,
    marker::PhantomData,
    ops,
    ptr::NonNull,
};
use std::{
    ffi::{CString, OsString},
    path::{Path, PathBuf},
};

/// A shared library loaded through the operating system loader.
///
/// It owns at most one native handle and closes it exactly once, on [`unload`](Self::unload)
/// or on drop. The type is move-only: symbols borrowed from it are tied to this single owner.
/// Wrap it in an [`Arc`](std::sync::Arc) (see [`import_from`](crate::import_from)) to share it.
#[derive(Default)]
pub struct SharedLibrary {
    handle: Option<Handle>,
}

// dlsym/GetProcAddress on a stable handle are thread safe. Loading and unloading need `&mut self`.
unsafe impl Send for SharedLibrary {}
unsafe impl Sync for SharedLibrary {}

impl Debug for SharedLibrary {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedLibrary")
            .field("handle", &self.handle)
            .finish()
    }
}

impl Drop for SharedLibrary {
    fn drop(&mut self) {
        self.unload();
    }
}

/// Canonical paths are equal. Missing files are never equivalent.
fn equivalent(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn is_program(path: &Path) -> bool {
    os::program_location().is_ok_and(|program| equivalent(path, &program))
}

impl SharedLibrary {
    /// Creates an unloaded library.
    #[inline]
    pub const fn new() -> SharedLibrary {
        SharedLibrary { handle: None }
    }

    /// Loads the library at `path`, see [`load`](Self::load).
    ///
    /// # Example
    /// ```no_run
    /// # use dynlib::{SharedLibrary, LoadMode};
    /// let lib = SharedLibrary::open("/path/to/libfoo.so", LoadMode::RTLD_NOW)
    ///     .expect("Failed to load library");
    /// ```
    pub fn open(path: impl AsRef<Path>, mode: LoadMode) -> Result<SharedLibrary> {
        let mut lib = SharedLibrary::new();
        lib.load(path, mode)?;
        Ok(lib)
    }

    /// Opens the running program as a library. Its exported symbols become reachable.
    pub fn open_self(mode: LoadMode) -> Result<SharedLibrary> {
        let mode = mode.normalized();
        match os::open_self(mode) {
            Ok(handle) => {
                log::info!("Loaded the running program itself");
                Ok(SharedLibrary {
                    handle: Some(handle),
                })
            }
            Err(msg) => Err(load_error(
                &os::program_location().unwrap_or_default(),
                msg,
            )),
        }
    }

    /// Loads the library at `path`, closing the currently loaded one first.
    ///
    /// The load is attempted in this order:
    /// 1. with [`LoadMode::APPEND_DECORATIONS`], the [decorated](Self::decorate) name. If that
    ///    file exists but cannot be loaded, [`Error::InvalidImage`] is returned right away;
    /// 2. `path` exactly as given;
    /// 3. if `path` is the running program, the program itself.
    ///
    /// Unless [`LoadMode::SEARCH_SYSTEM_FOLDERS`] is set, a bare file name is resolved against the
    /// current directory so that a system library with the same name is not picked up.
    ///
    /// On failure the library is left unloaded.
    pub fn load(&mut self, path: impl AsRef<Path>, mode: LoadMode) -> Result<()> {
        self.unload();
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            os::reset_error();
            return Err(Error::InvalidPath);
        }

        let mode = mode.normalized();
        let path = if mode.contains(LoadMode::SEARCH_SYSTEM_FOLDERS) {
            path.to_path_buf()
        } else {
            os::localize(path)
        };
        let native_mode = mode - (LoadMode::SEARCH_SYSTEM_FOLDERS | LoadMode::APPEND_DECORATIONS);

        if mode.contains(LoadMode::APPEND_DECORATIONS) {
            let candidates =
                core::iter::once(SharedLibrary::decorate(&path)).chain(os::extra_decorations(&path));
            for candidate in candidates {
                match unsafe { os::open(&candidate, native_mode) } {
                    Ok(handle) => {
                        log::info!("Loaded [{}]", candidate.display());
                        self.handle = Some(handle);
                        return Ok(());
                    }
                    Err(msg) => {
                        log::debug!("Decorated load of [{}] failed: {}", candidate.display(), msg);
                        if candidate.exists() && !is_program(&path) {
                            return Err(invalid_image_error(&candidate, msg));
                        }
                    }
                }
            }
        }

        let msg = match unsafe { os::open(&path, native_mode) } {
            Ok(handle) => {
                log::info!("Loaded [{}]", path.display());
                self.handle = Some(handle);
                return Ok(());
            }
            Err(msg) => msg,
        };

        // Loading the executable is rare, so it is only tried once a regular load failed.
        if is_program(&path) {
            log::debug!("[{}] is the running program, loading it as a library", path.display());
            if let Ok(handle) = os::open_self(native_mode) {
                self.handle = Some(handle);
                return Ok(());
            }
        }
        Err(load_error(&path, msg))
    }

    /// Closes the native handle. Does nothing if the library is not loaded.
    pub fn unload(&mut self) {
        if let Some(handle) = self.handle.take() {
            log::info!("Unloading library handle [{:p}]", handle.as_ptr());
            unsafe { os::close(handle) };
        }
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.handle.is_some()
    }

    /// Gets the native handle (`void*` from `dlopen` or `HMODULE`), null if not loaded.
    #[inline]
    pub fn native(&self) -> *mut c_void {
        self.handle.map_or(core::ptr::null_mut(), |h| h.as_ptr())
    }

    /// Returns the platform file name for a logical library name: `foo` becomes `libfoo.so`,
    /// `libfoo.dylib` or `foo.dll`. A name that already carries the prefix or suffix keeps it,
    /// so decorating twice changes nothing.
    pub fn decorate(path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        let Some(file_name) = path.file_name() else {
            return path.to_path_buf();
        };
        let lossy = file_name.to_string_lossy();
        let mut name = OsString::new();
        if !lossy.starts_with(os::LIBRARY_PREFIX) {
            name.push(os::LIBRARY_PREFIX);
        }
        name.push(file_name);
        if !lossy.ends_with(os::LIBRARY_SUFFIX) {
            name.push(os::LIBRARY_SUFFIX);
        }
        path.with_file_name(name)
    }

    /// The platform library suffix: `.so`, `.dylib` or `.dll`.
    #[inline]
    pub fn suffix() -> &'static str {
        os::LIBRARY_SUFFIX
    }

    /// Resolves `name` to its address in the loaded image.
    pub fn symbol_address(&self, name: &str) -> Result<NonNull<c_void>> {
        let Some(handle) = self.handle else {
            return Err(find_symbol_error(name, "library is not loaded"));
        };
        let c_name =
            CString::new(name).map_err(|_| find_symbol_error(name, "name contains a nul byte"))?;
        log::trace!("Get the symbol [{}] in [{:p}]", name, handle.as_ptr());
        unsafe { os::symbol(handle, &c_name) }.map_err(|msg| find_symbol_error(name, msg))
    }

    /// Checks whether the library exports `name`.
    #[inline]
    pub fn has(&self, name: &str) -> bool {
        self.symbol_address(name).is_ok()
    }

    /// Get a pointer to a function or static variable by symbol name.
    ///
    /// The symbol is interpreted as-is; no mangling is done. This means that symbols like `x::y` are
    /// most likely invalid.
    ///
    /// # Safety
    /// Users of this API must specify the correct type of the function or variable loaded.
    ///
    /// # Examples
    /// ```no_run
    /// # use dynlib::{Symbol, SharedLibrary, LoadMode};
    /// # let lib = SharedLibrary::open("awesome.so", LoadMode::RTLD_NOW).unwrap();
    /// unsafe {
    ///     let awesome_function: Symbol<unsafe extern fn(f64) -> f64> =
    ///         lib.get("awesome_function").unwrap();
    ///     awesome_function(0.42);
    /// }
    /// ```
    /// A static variable may also be loaded and inspected:
    /// ```no_run
    /// # use dynlib::{Symbol, SharedLibrary, LoadMode};
    /// # let lib = SharedLibrary::open("awesome.so", LoadMode::RTLD_NOW).unwrap();
    /// unsafe {
    ///     let awesome_variable: Symbol<*mut f64> = lib.get("awesome_variable").unwrap();
    ///     **awesome_variable = 42.0;
    /// };
    /// ```
    #[inline]
    pub unsafe fn get<'lib, T>(&'lib self, name: &str) -> Result<Symbol<'lib, T>> {
        self.symbol_address(name).map(|ptr| Symbol {
            ptr: ptr.as_ptr().cast(),
            pd: PhantomData,
        })
    }

    /// Gets the object an exported pointer variable points to. The symbol `name` must be a
    /// pointer-sized global of type `*const T`.
    ///
    /// # Safety
    /// The symbol must really hold a `*const T` that stays valid while the library is loaded.
    pub unsafe fn get_alias<'lib, T>(&'lib self, name: &str) -> Result<&'lib T> {
        let addr = self.symbol_address(name)?;
        let target = unsafe { *addr.as_ptr().cast::<*const T>() };
        unsafe { target.as_ref() }.ok_or_else(|| find_symbol_error(name, "alias is a null pointer"))
    }

    /// Asks the loader which file the loaded handle was opened from.
    pub fn full_module_path(&self) -> Result<PathBuf> {
        let handle = self.handle.ok_or(Error::NotLoaded)?;
        unsafe { os::path_from_handle(handle) }
    }

    /// Same as [`full_module_path`](Self::full_module_path).
    #[inline]
    pub fn location(&self) -> Result<PathBuf> {
        self.full_module_path()
    }
}

/// A symbol borrowed from a [`SharedLibrary`]. It cannot outlive the library.
#[derive(Debug, Clone)]
pub struct Symbol<'lib, T: 'lib> {
    ptr: *mut (),
    pd: PhantomData<&'lib T>,
}

impl<'lib, T> ops::Deref for Symbol<'lib, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*(&self.ptr as *const *mut _ as *const T) }
    }
}

impl<'lib, T> Symbol<'lib, T> {
    pub fn into_raw(self) -> *const () {
        self.ptr
    }
}
