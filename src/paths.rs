//! Lexical path helpers shared by the loader and the local sandbox.
//!
//! None of these touch the filesystem.

use std::path::{Component, Path, PathBuf};

/// Normalize a path without consulting the filesystem.
///
/// `.` components are dropped and `..` pops the previous normal component.
/// A `..` that would climb above the root is discarded; a `..` at the start
/// of a relative path is kept.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Make a path absolute against the current directory and normalize it.
pub fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(normalize(&joined))
}

/// Whether a path carries a root or a drive prefix.
pub fn has_root(path: &Path) -> bool {
    path.is_absolute()
        || path
            .components()
            .next()
            .map(|c| matches!(c, Component::RootDir | Component::Prefix(_)))
            .unwrap_or(false)
}

/// Whether any component of the path is `..`.
pub fn has_parent_component(path: &Path) -> bool {
    path.components().any(|c| matches!(c, Component::ParentDir))
}

/// Render a relative path with `/` separators regardless of platform.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
