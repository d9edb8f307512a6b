//! Writing generated files without clobbering anything else.
//!
//! Every generated file starts with a banner line. A file is only rewritten when its
//! contents differ, so build systems watching timestamps see no change after an
//! idempotent regeneration. A file without the banner is assumed hand-written and is
//! left alone unless `force_overwrite` is set.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;

use tracing::debug;

use crate::error::Error;
use crate::error::Result;
use crate::GeneratedFile;

/// Marker carried by the first line of every generated file.
pub const BANNER: &str = "Generated by loamgen";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputOptions {
    /// Overwrite files that lack the banner.
    pub force_overwrite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    Unchanged,
}

/// True when the first line of `contents` carries the banner.
pub fn is_generated(contents: &str) -> bool {
    contents.lines().next().is_some_and(|line| line.contains(BANNER))
}

fn io_error(path: &Path, e: std::io::Error) -> Error {
    Error::Io { path: path.to_path_buf(), message: e.to_string() }
}

/// Writes `files` into `dir`, creating it if needed.
///
/// # Errors
/// - `ForeignFile` when a target exists without the banner and overwriting is not forced.
///   Files before it in `files` have already been written.
/// - `Io` for any file system failure.
pub fn write_all(dir: &Path, files: &[GeneratedFile], options: &OutputOptions) -> Result<Vec<(PathBuf, WriteOutcome)>> {
    fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
    let mut outcomes = Vec::with_capacity(files.len());

    for file in files {
        let path = dir.join(&file.name);
        let outcome = match fs::read_to_string(&path) {
            Ok(existing) if existing == file.contents => WriteOutcome::Unchanged,
            Ok(existing) => {
                if !is_generated(&existing) && !options.force_overwrite {
                    return Err(Error::ForeignFile(path));
                }
                WriteOutcome::Updated
            }
            Err(e) if e.kind() == ErrorKind::NotFound => WriteOutcome::Created,
            // Exists but unreadable as text: treat like a foreign file.
            Err(e) if e.kind() == ErrorKind::InvalidData && !options.force_overwrite => {
                return Err(Error::ForeignFile(path));
            }
            Err(e) if e.kind() == ErrorKind::InvalidData => WriteOutcome::Updated,
            Err(e) => return Err(io_error(&path, e)),
        };

        if outcome != WriteOutcome::Unchanged {
            fs::write(&path, &file.contents).map_err(|e| io_error(&path, e))?;
        }
        debug!(path = %path.display(), outcome = ?outcome, "generated file");
        outcomes.push((path, outcome));
    }
    Ok(outcomes)
}
