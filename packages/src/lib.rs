// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Asset packages: the metadata of every asset, loading assets through
//! per-type pipelines of sinks, and cooking them into the binary form the
//! runtime loads.
//!
//! Packages are either editable scripts (`<Packages>/<name>.pkg`, JSON) or
//! cooked lumps written by [`PackageMan::cook`]. An [`Entry`] is the metadata
//! record of one asset, an [`Asset`] is a live handle to it in some [`Zone`],
//! and [`PackageMan`] ties it all together.

mod asset;
mod asset_type;
pub mod assets;
mod binary;
mod binding;
mod cook;
pub mod cooker;
mod entry;
mod flags;
mod keys;
mod language;
mod package;
mod package_man;
mod result;
mod script;
mod sink;
pub mod tag;
mod time_slice;

pub use asset::Asset;
pub use asset_type::AssetType;
pub use binding::{BindError, Binding};
pub use cook::CookReport;
pub use cooker::{CookImport, Cooker, CookerContext, CookerInstance, CookerType};
pub use entry::{CookedEntry, Entry};
pub use flags::*;
pub use keys::*;
pub use language::{Language, Languages};
pub use package::Package;
pub use package_man::{PackageInfo, PackageMan, PackageManConfig};
pub use result::*;
pub use sink::{AsAny, Sink, SinkType};
pub use time_slice::TimeSlice;

#[cfg(test)]
pub(crate) mod test_util {
    use std::{io::Cursor, sync::Arc};

    use file_system::{FileSystem, MemoryFileSystem};
    use image::{ImageFormat, Rgba, RgbaImage};

    use crate::package_man::{PackageMan, PackageManConfig};

    /// A package manager with tools enabled, on an empty in-memory file
    /// system.
    pub fn package_man() -> (Arc<MemoryFileSystem>, Arc<PackageMan>) {
        let fs = Arc::new(MemoryFileSystem::new());
        let man = PackageMan::new(fs.clone(), PackageManConfig::default());
        man.initialize().unwrap();
        (fs, man)
    }

    /// Writes a single color PNG of `size` by `size` pixels.
    pub fn write_png(fs: &MemoryFileSystem, path: &str, size: u32, color: [u8; 4]) {
        let image = RgbaImage::from_pixel(size, size, Rgba(color));
        let mut png = Cursor::new(Vec::new());
        image.write_to(&mut png, ImageFormat::Png).unwrap();
        fs.write(path, png.get_ref()).unwrap();
    }
}
