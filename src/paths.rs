use crate::error::{Error, Result};
use log::debug;
use nix::errno::Errno;
use nix::unistd::{access, AccessFlags};
use std::path::{Component, Path, PathBuf};

/// Tail comparison of two paths: they match iff one is a suffix of the other.
///
/// Comparison goes from the right, character by character, and stops as soon
/// as either string is exhausted; equality of the overlapping suffix is a
/// match. This is intentionally tolerant of build-tree vs. source-tree
/// prefix differences.
pub fn tail_match(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let overlap = a.len().min(b.len());
    (1..=overlap).all(|i| a[a.len() - i] == b[b.len() - i])
}

/// Strip the leading path component, returning `None` when nothing is left.
fn strip_first_component(path: &Path) -> Option<PathBuf> {
    let mut components = path.components();
    loop {
        match components.next() {
            Some(Component::Normal(_)) => break,
            Some(_) => continue,
            None => return None,
        }
    }
    let rest = components.as_path();
    (!rest.as_os_str().is_empty()).then(|| rest.to_path_buf())
}

/// Resolve a source path recorded in debug information to a readable local
/// path.
///
/// Without a configured prefix the raw path must be readable as-is (a
/// relative raw path is anchored at the compilation directory first). With a
/// prefix, the raw path is appended to it and, while the attempt fails with
/// a "wrong tree" class of errno, its leading component is stripped and the
/// attempt repeats on a strictly shorter suffix.
pub fn resolve_source_path(
    raw_path: &Path,
    comp_dir: Option<&Path>,
    source_prefix: Option<&Path>,
) -> Result<PathBuf> {
    let prefix = match source_prefix {
        Some(prefix) => prefix,
        None => {
            if raw_path.is_relative() {
                if let Some(comp_dir) = comp_dir {
                    let candidate = comp_dir.join(raw_path);
                    return match access(&candidate, AccessFlags::R_OK) {
                        Ok(()) => Ok(candidate),
                        Err(errno) => Err(Error::IO(errno.into())),
                    };
                }
            }
            return match access(raw_path, AccessFlags::R_OK) {
                Ok(()) => Ok(raw_path.to_path_buf()),
                Err(errno) => Err(Error::IO(errno.into())),
            };
        }
    };

    let mut suffix = raw_path.to_path_buf();
    loop {
        let candidate = prefix.join(&suffix);
        match access(&candidate, AccessFlags::R_OK) {
            Ok(()) => return Ok(candidate),
            Err(Errno::ENOENT | Errno::ENAMETOOLONG | Errno::EROFS | Errno::EFAULT) => {
                debug!(target: "resolver", "source not found at {candidate:?}, retry");
                match strip_first_component(&suffix) {
                    Some(shorter) => suffix = shorter,
                    None => return Err(Error::SourceFileNotFound(raw_path.to_path_buf())),
                }
            }
            Err(errno) => return Err(Error::IO(errno.into())),
        }
    }
}
