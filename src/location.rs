use crate::{Error, Imported, ImportedFn, Result, os};
use core::{ffi::c_void, ptr::NonNull};
use std::path::PathBuf;

/// Something that has an address in memory which can be mapped back to a module.
pub trait SymbolAddress {
    fn symbol_address(&self) -> *const c_void;
}

impl<T: ?Sized> SymbolAddress for *const T {
    #[inline]
    fn symbol_address(&self) -> *const c_void {
        self.cast()
    }
}

impl<T: ?Sized> SymbolAddress for *mut T {
    #[inline]
    fn symbol_address(&self) -> *const c_void {
        self.cast_const().cast()
    }
}

impl<T: ?Sized> SymbolAddress for NonNull<T> {
    #[inline]
    fn symbol_address(&self) -> *const c_void {
        self.as_ptr().cast_const().cast()
    }
}

impl<T> SymbolAddress for Imported<T> {
    #[inline]
    fn symbol_address(&self) -> *const c_void {
        Imported::as_ptr(self).cast()
    }
}

impl<F: Copy + SymbolAddress> SymbolAddress for ImportedFn<F> {
    #[inline]
    fn symbol_address(&self) -> *const c_void {
        ImportedFn::get(self).symbol_address()
    }
}

macro_rules! impl_fn_address {
    ($($arg:ident),*) => {
        impl<R, $($arg),*> SymbolAddress for fn($($arg),*) -> R {
            #[inline]
            fn symbol_address(&self) -> *const c_void {
                *self as *const c_void
            }
        }
        impl<R, $($arg),*> SymbolAddress for unsafe fn($($arg),*) -> R {
            #[inline]
            fn symbol_address(&self) -> *const c_void {
                *self as *const c_void
            }
        }
        impl<R, $($arg),*> SymbolAddress for extern "C" fn($($arg),*) -> R {
            #[inline]
            fn symbol_address(&self) -> *const c_void {
                *self as *const c_void
            }
        }
        impl<R, $($arg),*> SymbolAddress for unsafe extern "C" fn($($arg),*) -> R {
            #[inline]
            fn symbol_address(&self) -> *const c_void {
                *self as *const c_void
            }
        }
    };
}

impl_fn_address!();
impl_fn_address!(A);
impl_fn_address!(A, B);
impl_fn_address!(A, B, C);
impl_fn_address!(A, B, C, D);
impl_fn_address!(A, B, C, D, E);
impl_fn_address!(A, B, C, D, E, G);

/// Returns the path of the module (program or shared library) whose memory contains `ptr`.
///
/// # Examples
/// ```no_run
/// # use dynlib::symbol_location_ptr;
/// extern "C" fn local() {}
/// // The running program.
/// println!("{}", symbol_location_ptr(local as extern "C" fn()).unwrap().display());
/// ```
pub fn symbol_location_ptr<P: SymbolAddress>(ptr: P) -> Result<PathBuf> {
    let addr = ptr.symbol_address();
    if addr.is_null() {
        return Err(Error::NullAddress);
    }
    log::trace!("symbol_location: addr [{:#x}]", addr as usize);
    os::module_of(addr)
}

/// Returns the path of the module that holds `symbol`, typically a `static` or an imported object.
///
/// Functions go through [`symbol_location_ptr`]: a reference to a fn item points at a zero-sized
/// value, and a reference to a fn pointer points at the variable holding it, not at the code.
pub fn symbol_location<T: ?Sized>(symbol: &T) -> Result<PathBuf> {
    debug_assert!(
        core::mem::size_of_val(symbol) != 0,
        "zero-sized values have no address of their own; pass functions to symbol_location_ptr"
    );
    symbol_location_ptr(symbol as *const T)
}

/// Returns the path of the running program, as reported by the operating system
/// (never derived from `argv[0]`).
pub fn program_location() -> Result<PathBuf> {
    os::program_location()
}

/// Returns the path of the module that contains the calling code.
///
/// The macro defines a helper function at the call site and looks up the module owning it, so the
/// answer is the crate the macro is expanded in: a plugin gets its own path, not the host's.
#[macro_export]
macro_rules! this_line_location {
    () => {{
        #[inline(never)]
        fn this_line_location_anchor() {}
        $crate::symbol_location_ptr(this_line_location_anchor as fn())
    }};
}
