//! Errors raised while writing generated files. Generation itself cannot fail:
//! a `Protocol` is validated when it is built.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Reading, creating or writing a file failed.
    Io { path: PathBuf, message: String },
    /// The target exists and was not written by the generator.
    ForeignFile(PathBuf),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io { path, message } => write!(f, "I/O error on {}: {}", path.display(), message),
            Error::ForeignFile(path) => {
                write!(f, "Refusing to overwrite {}, it was not generated by loamgen", path.display())
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
