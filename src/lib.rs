//!A Rust library for loading shared libraries at run time through the operating system's own loader,
//!importing their symbols with a lifetime that keeps the library alive, and inspecting library files
//!without loading them.
//!
//!This library covers four jobs:
//!1. [`SharedLibrary`]: a move-only owner of one native `dlopen`/`LoadLibraryExW` handle.
//!2. [`import`], [`import_fn`] and [`import_alias`]: symbols that share ownership of their library,
//!   so the library is unloaded exactly once, after the last holder is gone.
//!3. [`symbol_location_ptr`], [`program_location`] and [`this_line_location!`]: map an address to
//!   the file of the module that contains it.
//!4. [`LibraryInfo`]: list the sections and exported symbols of an ELF, PE or Mach-O file (32 or 64 bit).
//!
//! # Examples
//! ```no_run
//! # use dynlib::{LoadMode, import_fn};
//! let add = unsafe {
//!     import_fn::<extern "C" fn(i32, i32) -> i32>(
//!         "./target/release/example",
//!         "add",
//!         LoadMode::APPEND_DECORATIONS,
//!     )
//! }
//! .unwrap();
//! println!("{}", add(1, 1));
//! ```
#![allow(clippy::type_complexity)]
#![warn(
    clippy::unnecessary_lazy_evaluations,
    clippy::collapsible_if,
    clippy::explicit_iter_loop,
    clippy::manual_assert,
    clippy::needless_question_mark,
    clippy::needless_return,
    clippy::needless_update,
    clippy::redundant_clone,
    clippy::redundant_else,
    clippy::redundant_static_lifetimes
)]

mod error;
mod import;
mod info;
mod library;
mod location;
mod os;

use bitflags::bitflags;

pub use crate::error::{Error, ErrorKind};
pub use crate::import::{
    Imported, ImportedFn, import, import_alias, import_alias_from, import_fn, import_fn_from,
    import_from,
};
pub use crate::info::{Format, LibraryInfo};
pub use crate::library::{SharedLibrary, Symbol};
pub use crate::location::{SymbolAddress, program_location, symbol_location, symbol_location_ptr};

bitflags! {
    /// Flags that control how a shared library is loaded.
    ///
    /// Each platform understands its own subset. Flags that mean nothing on the current platform
    /// are accepted and silently ignored.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct LoadMode: u32 {
        /// Let the platform decide.
        const DEFAULT_MODE = 0;
        /// Windows: do not call `DllMain` and do not load dependencies.
        const DONT_RESOLVE_DLL_REFERENCES = 0x0000_0001;
        /// Windows: do not check software restriction policies.
        const LOAD_IGNORE_CODE_AUTHZ_LEVEL = 0x0000_0010;
        /// Windows: search dependencies starting from the library's own folder.
        const LOAD_WITH_ALTERED_SEARCH_PATH = 0x0000_0008;
        /// POSIX: resolve undefined symbols only as the code referencing them is executed.
        const RTLD_LAZY = 0x0000_0100;
        /// POSIX: resolve all undefined symbols before the load returns.
        const RTLD_NOW = 0x0000_0200;
        /// POSIX: make symbols available to subsequently loaded libraries.
        const RTLD_GLOBAL = 0x0000_0400;
        /// POSIX: keep symbols private to this library.
        const RTLD_LOCAL = 0x0000_0800;
        /// POSIX: prefer the library's own symbols over global ones.
        const RTLD_DEEPBIND = 0x0000_1000;
        /// Try the platform-decorated file name first: `libname.so`, `libname.dylib` or `name.dll`.
        const APPEND_DECORATIONS = 0x0080_0000;
        /// Let the loader search system folders for a bare file name
        /// instead of resolving it against the current directory.
        const SEARCH_SYSTEM_FOLDERS = 0x0100_0000;
    }
}

impl Default for LoadMode {
    fn default() -> Self {
        LoadMode::DEFAULT_MODE
    }
}

impl LoadMode {
    /// Fills in the defaults the loader needs: lazy binding unless `RTLD_NOW`,
    /// local visibility unless `RTLD_GLOBAL`.
    pub(crate) fn normalized(self) -> LoadMode {
        let mut mode = self;
        if !mode.contains(LoadMode::RTLD_NOW) {
            mode |= LoadMode::RTLD_LAZY;
        }
        if !mode.contains(LoadMode::RTLD_GLOBAL) {
            mode |= LoadMode::RTLD_LOCAL;
        }
        mode
    }
}

pub type Result<T> = core::result::Result<T, Error>;
