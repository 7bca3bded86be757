use std::fmt;
use std::path::{Component, Path, PathBuf};

//===============
// Path Handling
//===============
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathValidationError {
    Empty,
    NullByte,
    ContainsParentDir,
    EscapesRoot,
    OutsideStaging,
}

impl fmt::Display for PathValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathValidationError::Empty => write!(f, "Path is empty"),
            PathValidationError::NullByte => write!(f, "Path contains null byte"),
            PathValidationError::ContainsParentDir => {
                write!(f, "Relative path contains parent directory (..)")
            }
            PathValidationError::EscapesRoot => write!(f, "Path climbs above the filesystem root"),
            PathValidationError::OutsideStaging => {
                write!(f, "Path is not inside the staging directory")
            }
        }
    }
}

impl std::error::Error for PathValidationError {}

// Lexically resolve `.` and `..` without touching the filesystem;
// reported files may not exist yet.
fn clean_absolute(path: &Path) -> Result<PathBuf, PathValidationError> {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                cleaned.push(component.as_os_str())
            }
            Component::CurDir => {}
            Component::ParentDir => {
                let at_root = cleaned.parent().is_none();
                if at_root || !cleaned.pop() {
                    return Err(PathValidationError::EscapesRoot);
                }
            }
        }
    }
    Ok(cleaned)
}

/// Turn a transport-reported file name into a canonical path value.
///
/// Relative names resolve against `staging_dir` and may not use `..`.
/// Absolute names are cleaned lexically.
pub fn normalize_reported_path(
    staging_dir: &Path,
    raw: &str,
) -> Result<PathBuf, PathValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PathValidationError::Empty);
    }

    // rust uses C-style APIs so \0 can end str early
    if trimmed.contains('\0') {
        return Err(PathValidationError::NullByte);
    }

    let path = Path::new(trimmed);
    if path.is_absolute() {
        return clean_absolute(path);
    }

    let mut joined = staging_dir.to_path_buf();
    for component in path.components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => continue,
            Component::ParentDir => return Err(PathValidationError::ContainsParentDir),
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathValidationError::EscapesRoot)
            }
        }
    }

    if joined == staging_dir {
        return Err(PathValidationError::Empty);
    }
    Ok(joined)
}

/// Path of `path` below `staging_dir`, refusing anything outside it.
pub fn staging_relative<'a>(
    staging_dir: &Path,
    path: &'a Path,
) -> Result<&'a Path, PathValidationError> {
    match path.strip_prefix(staging_dir) {
        Ok(rest) if !rest.as_os_str().is_empty() => Ok(rest),
        _ => Err(PathValidationError::OutsideStaging),
    }
}

/// Top-level staging directory a file lives in, shared by every file of a
/// folder transfer. Files directly inside `staging_dir` have none.
pub fn staging_root(staging_dir: &Path, path: &Path) -> Option<PathBuf> {
    let rest = staging_relative(staging_dir, path).ok()?;
    let mut components = rest.components();
    let first = components.next()?;
    components.next()?;
    Some(staging_dir.join(first.as_os_str()))
}
