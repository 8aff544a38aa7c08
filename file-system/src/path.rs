// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::FileError;

/// Normalizes a virtual path: backslashes become slashes, empty and `.`
/// segments are dropped, and leading slashes are removed. Paths that try to
/// climb out of the root with `..` are rejected.
pub fn normalize_path(path: &str) -> Result<String, FileError> {
    let mut normalized = String::with_capacity(path.len());
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => return Err(FileError::InvalidPath(path.to_string())),
            segment => {
                if !normalized.is_empty() {
                    normalized.push('/');
                }
                normalized.push_str(segment);
            }
        }
    }
    Ok(normalized)
}

/// Splits `Textures/rock.png` into `("Textures/rock", Some("png"))`. Dots in
/// directory names are not treated as extension separators.
pub fn split_extension(path: &str) -> (&str, Option<&str>) {
    let file_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[file_start..].rfind('.') {
        Some(dot) if dot > 0 => {
            let dot = file_start + dot;
            (&path[..dot], Some(&path[dot + 1..]))
        }
        _ => (path, None),
    }
}

/// True if the file name of `path` has the extension, or if `extension` is
/// empty.
pub(crate) fn has_extension(path: &str, extension: &str) -> bool {
    extension.is_empty() || split_extension(path).1 == Some(extension)
}
