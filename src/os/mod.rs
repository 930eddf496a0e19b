//! The operating system loader capability set: open, close, resolve a symbol, map a handle or an
//! address back to a file, and find the running program. Exactly one backend is compiled in.

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        mod windows;
        pub(crate) use windows::*;
    } else if #[cfg(unix)] {
        mod unix;
        pub(crate) use unix::*;
    } else {
        compile_error!("unsupported platform: no dynamic loader backend");
    }
}

/// A native loader handle that is known to be non-null.
pub(crate) type Handle = core::ptr::NonNull<core::ffi::c_void>;
