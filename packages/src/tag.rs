// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! The cooked package data format: one lump file per package
//! (`Packages/<Name>.lump`) with a zero-length lump per entry. The entry's
//! metadata is in the lump's tag:
//!
//! ```text
//! u32 offsets[6]       generic tag, then one per target, relative to the
//!                      start of the tag, 0 if absent
//! u16 asset_type
//! u16 import_count
//! u16 imports[import_count]   indices into the @imports table
//! tag blobs
//! ```
//!
//! The package's import table is the tag of the `@imports` lump:
//! `u16 count` and `count` times `{u16 len, bytes}`.

use crate::{
    asset_type::AssetType,
    binary::{BinReader, BinWriter},
    entry::CookedEntry,
    flags::NUM_TARGETS,
    result::SinkError,
};

pub const PACKAGE_SIG: [u8; 4] = *b"plmp";
pub const PACKAGE_ID: u32 = 0x55bd_decf;
pub const IMPORTS_LUMP: &str = "@imports";

const OFFSET_TABLE_SIZE: usize = 4 * (NUM_TARGETS + 1);

pub fn encode_imports(imports: &[String]) -> Result<Vec<u8>, SinkError> {
    let count = u16::try_from(imports.len())
        .map_err(|_| SinkError::InvalidFormat(format!("{} imports don't fit a package", imports.len())))?;
    let mut writer = BinWriter::new();
    writer.put(count);
    for import in imports {
        if import.len() > u16::MAX as usize {
            return Err(SinkError::InvalidFormat(format!("import path {import:?} is too long")));
        }
        writer.put_str16(import);
    }
    Ok(writer.into_bytes())
}

pub fn decode_imports(tag: &[u8], name: &str) -> Result<Vec<String>, SinkError> {
    let mut reader = BinReader::new(tag, name);
    let count = reader.get::<u16>()?;
    (0..count).map(|_| reader.str16()).collect()
}

pub fn encode_entry(asset_type: AssetType, entry: &CookedEntry) -> Result<Vec<u8>, SinkError> {
    let import_count = u16::try_from(entry.imports.len())
        .map_err(|_| SinkError::InvalidFormat(format!("{} imports don't fit an entry", entry.imports.len())))?;
    let mut writer = BinWriter::new();
    writer.put([0u32; NUM_TARGETS + 1]).put(asset_type.id()).put(import_count);
    for import in &entry.imports {
        writer.put(*import);
    }
    for (slot, tag) in entry.tags.iter().enumerate() {
        let Some(tag) = tag else {
            continue;
        };
        let offset = u32::try_from(writer.len())
            .map_err(|_| SinkError::InvalidFormat("entry tag is too large".into()))?;
        writer.patch(slot * 4, offset);
        writer.put_bytes(tag);
    }
    Ok(writer.into_bytes())
}

/// Decodes an entry tag. Each blob runs up to the next blob, or the end of
/// the tag.
pub fn decode_entry(tag: &[u8], name: &str) -> Result<(AssetType, CookedEntry), SinkError> {
    let mut reader = BinReader::new(tag, name);
    let offsets: [u32; NUM_TARGETS + 1] = reader.get()?;
    let type_id = reader.get::<u16>()?;
    let asset_type = AssetType::from_id(type_id)
        .ok_or_else(|| SinkError::CorruptFile(format!("{name} has an unknown asset type {type_id}")))?;
    let import_count = reader.get::<u16>()?;
    let imports = (0..import_count)
        .map(|_| reader.get::<u16>())
        .collect::<Result<Vec<_>, _>>()?;
    let blobs_start = reader.position();

    let mut cooked = CookedEntry {
        imports,
        ..Default::default()
    };
    for (slot, offset) in offsets.iter().enumerate() {
        let start = *offset as usize;
        if start == 0 {
            continue;
        }
        let end = offsets
            .iter()
            .map(|offset| *offset as usize)
            .filter(|other| *other > start)
            .min()
            .unwrap_or(tag.len());
        if start < blobs_start.max(OFFSET_TABLE_SIZE) || end > tag.len() {
            return Err(SinkError::CorruptFile(format!("{name} has a tag blob out of bounds")));
        }
        cooked.tags[slot] = Some(tag[start..end].to_vec());
    }
    Ok((asset_type, cooked))
}

#[cfg(test)]
mod tests {
    use crate::{asset_type::AssetType, entry::CookedEntry, flags::Target};

    use super::{decode_entry, decode_imports, encode_entry, encode_imports};

    #[test]
    fn entry_tags() {
        let mut cooked = CookedEntry {
            imports: vec![2, 0],
            ..Default::default()
        };
        cooked.tags[0] = Some(vec![0x49]);
        cooked.tags[Target::IPad.index() + 1] = Some(vec![1, 2, 3]);

        let tag = encode_entry(AssetType::Texture, &cooked).unwrap();
        assert_eq!(24 + 2 + 2 + 4, u32::from_le_bytes(tag[0..4].try_into().unwrap()));
        let (asset_type, decoded) = decode_entry(&tag, "World/Rock").unwrap();
        assert_eq!(AssetType::Texture, asset_type);
        assert_eq!(cooked, decoded);
    }

    #[test]
    fn entries_without_tags() {
        let cooked = CookedEntry::default();
        let tag = encode_entry(AssetType::Particle, &cooked).unwrap();
        assert_eq!(28, tag.len());
        assert_eq!((AssetType::Particle, cooked), decode_entry(&tag, "P/E").unwrap());
    }

    #[test]
    fn import_tables() {
        let imports = vec!["World/Rock".to_string(), "World/Stone".to_string()];
        let tag = encode_imports(&imports).unwrap();
        assert_eq!(vec![2, 0, 10, 0], tag[..4].to_vec());
        assert_eq!(imports, decode_imports(&tag, "@imports").unwrap());
        assert!(decode_imports(&tag[..5], "@imports").is_err());
    }
}
