//! Symbols that keep their library loaded.
//!
//! Every value returned here holds an [`Arc`] to the [`SharedLibrary`] it came from. The library is
//! unloaded once, when the last of those holders (and the caller's own `Arc`, if any) is dropped.

use crate::{LoadMode, Result, SharedLibrary, error::find_symbol_error};
use core::{fmt::Debug, ops, ptr::NonNull};
use std::{path::Path, sync::Arc};

/// An object exported by a shared library, kept alive together with the library.
///
/// Dereferences to the object itself.
pub struct Imported<T> {
    library: Arc<SharedLibrary>,
    ptr: NonNull<T>,
}

// The object lives in library memory shared by every holder.
unsafe impl<T: Sync> Send for Imported<T> {}
unsafe impl<T: Sync> Sync for Imported<T> {}

impl<T> Clone for Imported<T> {
    fn clone(&self) -> Self {
        Imported {
            library: Arc::clone(&self.library),
            ptr: self.ptr,
        }
    }
}

impl<T> ops::Deref for Imported<T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> Debug for Imported<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Imported")
            .field("library", &self.library)
            .field("ptr", &self.ptr)
            .finish()
    }
}

impl<T> Imported<T> {
    /// The library this symbol keeps alive.
    #[inline]
    pub fn library(this: &Self) -> &Arc<SharedLibrary> {
        &this.library
    }

    /// The address of the object.
    #[inline]
    pub fn as_ptr(this: &Self) -> *const T {
        this.ptr.as_ptr()
    }
}

/// A function exported by a shared library, kept alive together with the library.
///
/// `F` is a function pointer type such as `extern "C" fn(i32) -> i32`. The wrapper dereferences
/// to it, so it can be called directly.
#[derive(Clone)]
pub struct ImportedFn<F: Copy> {
    library: Arc<SharedLibrary>,
    func: F,
}

impl<F: Copy> ops::Deref for ImportedFn<F> {
    type Target = F;
    fn deref(&self) -> &F {
        &self.func
    }
}

impl<F: Copy> Debug for ImportedFn<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ImportedFn")
            .field("library", &self.library)
            .finish_non_exhaustive()
    }
}

impl<F: Copy> ImportedFn<F> {
    /// The library this function keeps alive.
    #[inline]
    pub fn library(this: &Self) -> &Arc<SharedLibrary> {
        &this.library
    }

    /// The function pointer itself. It is only valid while the library is loaded.
    #[inline]
    pub fn get(this: &Self) -> F {
        this.func
    }
}

/// Imports the object `name` from the library at `path`.
///
/// # Safety
/// The symbol must really be an object of type `T`.
///
/// # Examples
/// ```no_run
/// # use dynlib::{LoadMode, import};
/// let answer = unsafe { import::<i32>("libexample.so", "ANSWER", LoadMode::DEFAULT_MODE) }.unwrap();
/// assert_eq!(*answer, 42);
/// ```
pub unsafe fn import<T>(path: impl AsRef<Path>, name: &str, mode: LoadMode) -> Result<Imported<T>> {
    let library = SharedLibrary::open(path, mode)?;
    unsafe { import_from(library, name) }
}

/// Imports the object `name` from an already loaded library. Passing an `Arc` shares it with
/// the caller, passing a [`SharedLibrary`] moves it into the returned value.
///
/// # Safety
/// The symbol must really be an object of type `T`.
pub unsafe fn import_from<T>(
    library: impl Into<Arc<SharedLibrary>>,
    name: &str,
) -> Result<Imported<T>> {
    let library = library.into();
    let ptr = library.symbol_address(name)?.cast::<T>();
    log::info!("Imported [{}]", name);
    Ok(Imported { library, ptr })
}

/// Imports the function `name` from the library at `path`.
///
/// # Safety
/// `F` must be a function pointer type matching the real signature of the symbol.
///
/// # Examples
/// ```no_run
/// # use dynlib::{LoadMode, import_fn};
/// let add = unsafe {
///     import_fn::<extern "C" fn(i32, i32) -> i32>("libexample.so", "add", LoadMode::RTLD_NOW)
/// }
/// .unwrap();
/// assert_eq!(add(1, 2), 3);
/// ```
pub unsafe fn import_fn<F: Copy>(
    path: impl AsRef<Path>,
    name: &str,
    mode: LoadMode,
) -> Result<ImportedFn<F>> {
    let library = SharedLibrary::open(path, mode)?;
    unsafe { import_fn_from(library, name) }
}

/// Imports the function `name` from an already loaded library.
///
/// # Safety
/// `F` must be a function pointer type matching the real signature of the symbol.
pub unsafe fn import_fn_from<F: Copy>(
    library: impl Into<Arc<SharedLibrary>>,
    name: &str,
) -> Result<ImportedFn<F>> {
    const {
        assert!(
            size_of::<F>() == size_of::<*const ()>(),
            "imported functions must be function pointers"
        )
    };
    let library = library.into();
    let addr = library.symbol_address(name)?;
    let func = unsafe { core::mem::transmute_copy::<*mut core::ffi::c_void, F>(&addr.as_ptr()) };
    log::info!("Imported function [{}]", name);
    Ok(ImportedFn { library, func })
}

/// Imports the object an exported pointer variable `name` points to. This is how a plugin
/// publishes a ready-made instance under a fixed name.
///
/// # Safety
/// The symbol must be a pointer-sized global holding a `*const T`.
pub unsafe fn import_alias<T>(
    path: impl AsRef<Path>,
    name: &str,
    mode: LoadMode,
) -> Result<Imported<T>> {
    let library = SharedLibrary::open(path, mode)?;
    unsafe { import_alias_from(library, name) }
}

/// Same as [`import_alias`] for an already loaded library.
///
/// # Safety
/// The symbol must be a pointer-sized global holding a `*const T`.
pub unsafe fn import_alias_from<T>(
    library: impl Into<Arc<SharedLibrary>>,
    name: &str,
) -> Result<Imported<T>> {
    let library = library.into();
    let addr = library.symbol_address(name)?;
    let target = unsafe { *addr.as_ptr().cast::<*mut T>() };
    let ptr = NonNull::new(target).ok_or_else(|| find_symbol_error(name, "alias is a null pointer"))?;
    log::info!("Imported alias [{}]", name);
    Ok(Imported { library, ptr })
}
