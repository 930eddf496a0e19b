use std::{
    borrow::Cow,
    fmt::Display,
    path::{Path, PathBuf},
};

/// Errors that can occur while loading libraries, resolving symbols or reading library files.
#[derive(Debug)]
pub enum Error {
    /// An empty or otherwise unusable path was given to `load`.
    InvalidPath,
    /// The operating system loader rejected the library.
    LoadFailed { path: PathBuf, msg: Cow<'static, str> },
    /// The decorated library file exists but is not a loadable image.
    InvalidImage { path: PathBuf, msg: Cow<'static, str> },
    /// The operation needs a loaded library.
    NotLoaded,
    /// The symbol could not be found in the library.
    SymbolNotFound { name: String, msg: Cow<'static, str> },
    /// No binary format reader recognised the file.
    UnsupportedFormat,
    /// The file format is recognised but cannot be loaded on this host.
    NotNativeFormat { msg: Cow<'static, str> },
    /// The file format is recognised but its structure is inconsistent or truncated.
    MalformedBinary { msg: Cow<'static, str> },
    /// A null address was given to the symbol locator.
    NullAddress,
    /// No loaded module contains the address.
    AddressNotMapped { msg: Cow<'static, str> },
    /// An error occurred while opening, reading or querying a file.
    Io { msg: Cow<'static, str> },
}

/// The kind of an [`Error`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidPath,
    LoadFailed,
    InvalidImage,
    NotLoaded,
    SymbolNotFound,
    UnsupportedFormat,
    NotNativeFormat,
    MalformedBinary,
    NullAddress,
    AddressNotMapped,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidPath => ErrorKind::InvalidPath,
            Error::LoadFailed { .. } => ErrorKind::LoadFailed,
            Error::InvalidImage { .. } => ErrorKind::InvalidImage,
            Error::NotLoaded => ErrorKind::NotLoaded,
            Error::SymbolNotFound { .. } => ErrorKind::SymbolNotFound,
            Error::UnsupportedFormat => ErrorKind::UnsupportedFormat,
            Error::NotNativeFormat { .. } => ErrorKind::NotNativeFormat,
            Error::MalformedBinary { .. } => ErrorKind::MalformedBinary,
            Error::NullAddress => ErrorKind::NullAddress,
            Error::AddressNotMapped { .. } => ErrorKind::AddressNotMapped,
            Error::Io { .. } => ErrorKind::Io,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidPath => write!(f, "Invalid path"),
            Error::LoadFailed { path, msg } => {
                write!(f, "failed to load [{}]", path.display())?;
                if !msg.is_empty() {
                    write!(f, ": {msg}")?;
                }
                Ok(())
            }
            Error::InvalidImage { path, msg } => {
                write!(f, "[{}] exists but is not a loadable image", path.display())?;
                if !msg.is_empty() {
                    write!(f, ": {msg}")?;
                }
                Ok(())
            }
            Error::NotLoaded => write!(f, "library is not loaded"),
            Error::SymbolNotFound { name, msg } => {
                write!(f, "can not find symbol:{name}")?;
                if !msg.is_empty() {
                    write!(f, " ({msg})")?;
                }
                Ok(())
            }
            Error::UnsupportedFormat => write!(f, "Unsupported binary format"),
            Error::NotNativeFormat { msg } => write!(f, "Not native format: {msg}"),
            Error::MalformedBinary { msg } => write!(f, "Malformed binary: {msg}"),
            Error::NullAddress => write!(f, "Null address"),
            Error::AddressNotMapped { msg } => write!(f, "Address not mapped: {msg}"),
            Error::Io { msg } => write!(f, "I/O error: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

impl From<std::io::Error> for Error {
    #[cold]
    fn from(value: std::io::Error) -> Self {
        if value.kind() == std::io::ErrorKind::UnexpectedEof {
            malformed_binary_error("unexpected end of file")
        } else {
            io_error(value.to_string())
        }
    }
}

#[cold]
#[inline(never)]
pub(crate) fn load_error(path: &Path, msg: impl Into<Cow<'static, str>>) -> Error {
    Error::LoadFailed {
        path: path.to_path_buf(),
        msg: msg.into(),
    }
}

#[cold]
#[inline(never)]
pub(crate) fn invalid_image_error(path: &Path, msg: impl Into<Cow<'static, str>>) -> Error {
    Error::InvalidImage {
        path: path.to_path_buf(),
        msg: msg.into(),
    }
}

#[cold]
#[inline(never)]
pub(crate) fn find_symbol_error(name: &str, msg: impl Into<Cow<'static, str>>) -> Error {
    Error::SymbolNotFound {
        name: name.to_string(),
        msg: msg.into(),
    }
}

#[cold]
#[inline(never)]
pub(crate) fn not_native_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::NotNativeFormat { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn malformed_binary_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::MalformedBinary { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn address_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::AddressNotMapped { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn io_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Io { msg: msg.into() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eof_is_reported_as_malformed() {
        let err: Error = std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into();
        assert_eq!(err.kind(), ErrorKind::MalformedBinary);
    }

    #[test]
    fn other_io_errors_stay_io() {
        let err: Error = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn os_text_is_appended() {
        let err = load_error(Path::new("libfoo.so"), "libfoo.so: cannot open shared object file");
        assert_eq!(
            err.to_string(),
            "failed to load [libfoo.so]: libfoo.so: cannot open shared object file"
        );
        let err = find_symbol_error("bar", "");
        assert_eq!(err.to_string(), "can not find symbol:bar");
    }
}
