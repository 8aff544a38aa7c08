// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! The file system collaborator used by the package and cooking code: media
//! scoped synchronous and asynchronous reads, writes, timestamps and directory
//! searches, plus the lump container format used for cooked packages and pak
//! files.
//!
//! Everything goes through the object safe [`FileSystem`] trait, so that the
//! package code can be tested against [`MemoryFileSystem`] and shipped against
//! [`NativeFileSystem`].

mod io;
pub mod lump;
mod memory;
mod native;
mod path;

pub use io::*;
pub use memory::MemoryFileSystem;
pub use native::NativeFileSystem;
pub use path::{normalize_path, split_extension};
