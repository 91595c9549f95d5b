use thiserror::Error;

/// File written inside a directory so the remote store, which only addresses files,
/// keeps the directory alive.
pub const DIRECTORY_MARKER: &str = ".keep";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("path contains unsupported component: {0}")]
    UnsupportedComponent(String),
}

/// Canonical repository path: no leading or trailing separator, no empty or `.`
/// components, `..` rejected.
pub fn normalize(raw: &str) -> Result<String, PathError> {
    let mut parts = Vec::new();
    for part in raw.trim().split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => return Err(PathError::UnsupportedComponent(part.to_string())),
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(parts.join("/"))
}

pub fn parent_of(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

pub fn file_name(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Ancestors from the closest parent up to the top-level directory.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(parent_of(path), |current| parent_of(current))
}

pub fn is_within(path: &str, dir: &str) -> bool {
    path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}

pub fn marker_for(dir: &str) -> String {
    join(dir, DIRECTORY_MARKER)
}
