// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! The tagged lump container used for cooked package data and pak files.
//!
//! Layout (little endian):
//!
//! ```text
//! LumpHeader { sig: [u8; 4], id: u32, lump_count: u32, directory_offset: u32 }
//! lump data and tag data, each lump aligned as requested
//! directory: lump_count times {
//!     name_len: u16, name: [u8; name_len],
//!     flags: u32, offset: u32, size: u32, tag_offset: u32, tag_size: u32,
//! }
//! ```

use std::{
    collections::HashMap,
    io::{Read, Write},
};

use bytemuck::{Pod, Zeroable};
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};

use crate::FileError;

/// Signature of pak archives.
pub const PAK_SIG: [u8; 4] = *b"DPAK";
/// Format id of pak archives.
pub const PAK_ID: u32 = 0xA305_4028;

/// The lump data is compressed with [`compress`], and the tag data holds the
/// uncompressed size as a little endian `u32`.
pub const LUMP_FLAG_COMPRESSED: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum LumpError {
    #[error("bad lump file signature {0:?}")]
    BadSignature([u8; 4]),
    #[error("bad lump file id {0:#x}")]
    BadId(u32),
    #[error("lump file is truncated")]
    Truncated,
    #[error("lump name {0:?} is used twice")]
    DuplicateName(String),
    #[error("lump name {0:?} is too long")]
    NameTooLong(String),
    #[error("lump name {0:?} is not UTF-8")]
    BadName(Vec<u8>),
    #[error("lump file would exceed 4 GiB")]
    TooLarge,
    #[error("failed to decompress lump {name:?}: {source}")]
    Decompress {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("lump {name:?} decompressed to {actual} bytes instead of {expected}")]
    SizeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
}

impl LumpError {
    pub fn into_file_error(self, path: &str) -> FileError {
        FileError::CorruptArchive {
            path: path.to_string(),
            reason: self.to_string(),
        }
    }
}

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct LumpHeader {
    sig: [u8; 4],
    id: u32,
    lump_count: u32,
    directory_offset: u32,
}

const HEADER_SIZE: usize = size_of::<LumpHeader>();

/// One entry of a lump file's directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lump {
    pub name: String,
    pub flags: u32,
    offset: u32,
    size: u32,
    tag_offset: u32,
    tag_size: u32,
}

impl Lump {
    pub fn size(&self) -> usize {
        self.size as usize
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & LUMP_FLAG_COMPRESSED != 0
    }
}

/// Builds a lump file in memory.
pub struct LumpWriter {
    sig: [u8; 4],
    id: u32,
    data: Vec<u8>,
    lumps: Vec<Lump>,
}

impl LumpWriter {
    pub fn new(sig: [u8; 4], id: u32) -> LumpWriter {
        LumpWriter {
            sig,
            id,
            data: vec![0; HEADER_SIZE],
            lumps: Vec::new(),
        }
    }

    pub fn lump_count(&self) -> usize {
        self.lumps.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lumps.iter().any(|lump| lump.name == name)
    }

    /// Appends a lump. `alignment` is the byte alignment of the lump's data
    /// within the file, 0 and 1 both mean unaligned.
    pub fn write_lump(
        &mut self,
        name: &str,
        data: &[u8],
        tag: &[u8],
        flags: u32,
        alignment: usize,
    ) -> Result<(), LumpError> {
        if name.len() > u16::MAX as usize {
            return Err(LumpError::NameTooLong(name.to_string()));
        }
        if self.contains(name) {
            return Err(LumpError::DuplicateName(name.to_string()));
        }

        if alignment > 1 {
            let padding = self.data.len().next_multiple_of(alignment) - self.data.len();
            self.data.extend(core::iter::repeat(0).take(padding));
        }
        let offset = self.offset()?;
        self.data.extend_from_slice(data);
        let tag_offset = self.offset()?;
        self.data.extend_from_slice(tag);
        self.offset()?;

        self.lumps.push(Lump {
            name: name.to_string(),
            flags,
            offset,
            size: data.len() as u32,
            tag_offset,
            tag_size: tag.len() as u32,
        });
        Ok(())
    }

    /// Sorts the directory by lump name. The data stays where it is.
    pub fn sort_lumps(&mut self) {
        self.lumps.sort_by(|a, b| a.name.cmp(&b.name));
    }

    pub fn finish(mut self) -> Result<Vec<u8>, LumpError> {
        let directory_offset = self.offset()?;
        for lump in &self.lumps {
            let Lump {
                name,
                flags,
                offset,
                size,
                tag_offset,
                tag_size,
            } = lump;
            self.data
                .extend_from_slice(&(name.len() as u16).to_le_bytes());
            self.data.extend_from_slice(name.as_bytes());
            for value in [flags, offset, size, tag_offset, tag_size] {
                self.data.extend_from_slice(&value.to_le_bytes());
            }
        }

        let header = LumpHeader {
            sig: self.sig,
            id: self.id.to_le(),
            lump_count: (self.lumps.len() as u32).to_le(),
            directory_offset: directory_offset.to_le(),
        };
        self.data[..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
        Ok(self.data)
    }

    fn offset(&self) -> Result<u32, LumpError> {
        u32::try_from(self.data.len()).map_err(|_| LumpError::TooLarge)
    }
}

/// The parsed directory of a lump file. Lookups by name are hashed.
#[derive(Debug, Clone)]
pub struct LumpDirectory {
    lumps: Vec<Lump>,
    by_name: HashMap<String, usize>,
}

impl LumpDirectory {
    /// Parses the header and directory of `bytes`, checking that the
    /// signature and id match, and that every lump is within the file.
    pub fn parse(bytes: &[u8], sig: [u8; 4], id: u32) -> Result<LumpDirectory, LumpError> {
        if bytes.len() < HEADER_SIZE {
            return Err(LumpError::Truncated);
        }
        let header: LumpHeader = bytemuck::pod_read_unaligned(&bytes[..HEADER_SIZE]);
        if header.sig != sig {
            return Err(LumpError::BadSignature(header.sig));
        }
        if u32::from_le(header.id) != id {
            return Err(LumpError::BadId(u32::from_le(header.id)));
        }

        let lump_count = u32::from_le(header.lump_count) as usize;
        let mut cursor = u32::from_le(header.directory_offset) as usize;
        let mut lumps = Vec::with_capacity(lump_count.min(bytes.len()));
        let mut by_name = HashMap::with_capacity(lump_count.min(bytes.len()));
        for _ in 0..lump_count {
            let name_len = read_u16(bytes, &mut cursor)? as usize;
            let name = bytes
                .get(cursor..cursor + name_len)
                .ok_or(LumpError::Truncated)?;
            let name = String::from_utf8(name.to_vec()).map_err(|err| LumpError::BadName(err.into_bytes()))?;
            cursor += name_len;
            let lump = Lump {
                name,
                flags: read_u32(bytes, &mut cursor)?,
                offset: read_u32(bytes, &mut cursor)?,
                size: read_u32(bytes, &mut cursor)?,
                tag_offset: read_u32(bytes, &mut cursor)?,
                tag_size: read_u32(bytes, &mut cursor)?,
            };
            let data_end = lump.offset as usize + lump.size as usize;
            let tag_end = lump.tag_offset as usize + lump.tag_size as usize;
            if data_end > bytes.len() || tag_end > bytes.len() {
                return Err(LumpError::Truncated);
            }
            if by_name.insert(lump.name.clone(), lumps.len()).is_some() {
                return Err(LumpError::DuplicateName(lump.name));
            }
            lumps.push(lump);
        }

        Ok(LumpDirectory { lumps, by_name })
    }

    pub fn lumps(&self) -> &[Lump] {
        &self.lumps
    }

    pub fn find(&self, name: &str) -> Option<&Lump> {
        self.by_name.get(name).map(|&i| &self.lumps[i])
    }
}

/// A parsed lump file, borrowing the file's bytes.
#[derive(Debug)]
pub struct LumpReader<'a> {
    bytes: &'a [u8],
    directory: LumpDirectory,
}

impl<'a> LumpReader<'a> {
    pub fn new(bytes: &'a [u8], sig: [u8; 4], id: u32) -> Result<LumpReader<'a>, LumpError> {
        let directory = LumpDirectory::parse(bytes, sig, id)?;
        Ok(LumpReader { bytes, directory })
    }

    pub fn lumps(&self) -> &[Lump] {
        self.directory.lumps()
    }

    pub fn find(&self, name: &str) -> Option<&Lump> {
        self.directory.find(name)
    }

    /// The lump's data as stored, i.e. still compressed if it is.
    pub fn data(&self, lump: &Lump) -> &'a [u8] {
        lump_data(self.bytes, lump)
    }

    pub fn tag(&self, lump: &Lump) -> &'a [u8] {
        lump_tag(self.bytes, lump)
    }

    /// The lump's data, decompressed if needed.
    pub fn read(&self, lump: &Lump) -> Result<Vec<u8>, LumpError> {
        read_lump(self.bytes, lump)
    }
}

// The directory parser checks that these ranges are within the file.

fn lump_data<'a>(bytes: &'a [u8], lump: &Lump) -> &'a [u8] {
    &bytes[lump.offset as usize..lump.offset as usize + lump.size as usize]
}

fn lump_tag<'a>(bytes: &'a [u8], lump: &Lump) -> &'a [u8] {
    &bytes[lump.tag_offset as usize..lump.tag_offset as usize + lump.tag_size as usize]
}

fn read_lump(bytes: &[u8], lump: &Lump) -> Result<Vec<u8>, LumpError> {
    if lump.is_compressed() {
        let mut cursor = 0;
        let size = read_u32(lump_tag(bytes, lump), &mut cursor)? as usize;
        decompress(&lump.name, lump_data(bytes, lump), size)
    } else {
        Ok(lump_data(bytes, lump).to_vec())
    }
}

/// A mounted pak archive: an owned lump file whose lump names are the virtual
/// paths of the files inside it.
pub struct PakArchive {
    path: String,
    bytes: Vec<u8>,
    directory: LumpDirectory,
}

impl PakArchive {
    pub fn open(path: &str, bytes: Vec<u8>) -> Result<PakArchive, FileError> {
        let directory =
            LumpDirectory::parse(&bytes, PAK_SIG, PAK_ID).map_err(|err| err.into_file_error(path))?;
        Ok(PakArchive {
            path: path.to_string(),
            bytes,
            directory,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn contains(&self, name: &str) -> bool {
        self.directory.find(name).is_some()
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.directory.lumps().iter().map(|lump| lump.name.as_str())
    }

    /// Reads the file, or returns `None` if it isn't in this archive.
    pub fn read(&self, name: &str) -> Option<Result<Vec<u8>, FileError>> {
        let lump = self.directory.find(name)?;
        Some(read_lump(&self.bytes, lump).map_err(|err| err.into_file_error(&self.path)))
    }
}

/// Deflates `data` with the given compression level (0-9).
pub fn compress(data: &[u8], level: u32) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::new(level));
    // Writing into a Vec can't fail.
    let _ = encoder.write_all(data);
    encoder.finish().unwrap_or_default()
}

pub fn decompress(name: &str, data: &[u8], size: usize) -> Result<Vec<u8>, LumpError> {
    let mut decompressed = Vec::with_capacity(size);
    ZlibDecoder::new(data)
        .read_to_end(&mut decompressed)
        .map_err(|source| LumpError::Decompress {
            name: name.to_string(),
            source,
        })?;
    if decompressed.len() != size {
        return Err(LumpError::SizeMismatch {
            name: name.to_string(),
            expected: size,
            actual: decompressed.len(),
        });
    }
    Ok(decompressed)
}

fn read_u16(src: &[u8], cursor: &mut usize) -> Result<u16, LumpError> {
    let bytes = src.get(*cursor..*cursor + 2).ok_or(LumpError::Truncated)?;
    *cursor += 2;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(src: &[u8], cursor: &mut usize) -> Result<u32, LumpError> {
    let bytes = src.get(*cursor..*cursor + 4).ok_or(LumpError::Truncated)?;
    *cursor += 4;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
