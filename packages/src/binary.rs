// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Little-endian codecs for the cooked binary formats.

use crate::result::SinkError;

pub trait Serialize {
    /// The length of the buffer passed into [`Serialize::serialize`].
    const SERIALIZED_SIZE: usize;
    /// Serializes the value into the byte buffer. The length of `dst` must
    /// match the same type's [`Serialize::SERIALIZED_SIZE`] constant.
    fn serialize(&self, dst: &mut [u8]);
}

pub trait Deserialize: Sized {
    /// The length of the buffer passed into [`Deserialize::deserialize`].
    const SERIALIZED_SIZE: usize;
    /// Deserializes the byte buffer into the value. The length of `src` must
    /// match the same type's [`Deserialize::SERIALIZED_SIZE`] constant.
    fn deserialize(src: &[u8]) -> Self;
}

/// Appends serialized values to a growing buffer.
#[derive(Debug, Default)]
pub struct BinWriter {
    buffer: Vec<u8>,
}

impl BinWriter {
    pub fn new() -> BinWriter {
        BinWriter::default()
    }

    pub fn put<S: Serialize>(&mut self, value: S) -> &mut Self {
        let start = self.buffer.len();
        self.buffer.resize(start + S::SERIALIZED_SIZE, 0);
        value.serialize(&mut self.buffer[start..]);
        self
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(bytes);
        self
    }

    /// Writes a `U16 length` prefixed string.
    pub fn put_str16(&mut self, s: &str) -> &mut Self {
        self.put(s.len() as u16).put_bytes(s.as_bytes())
    }

    /// Pads with zeroes up to the next multiple of 4.
    pub fn pad4(&mut self) -> &mut Self {
        let padded = self.buffer.len().next_multiple_of(4);
        self.buffer.resize(padded, 0);
        self
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Overwrites an already written value, e.g. an offset that's only known
    /// after the data it points to has been written.
    pub fn patch<S: Serialize>(&mut self, position: usize, value: S) {
        value.serialize(&mut self.buffer[position..position + S::SERIALIZED_SIZE]);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Reads deserialized values from a buffer, failing with
/// [`SinkError::CorruptFile`] instead of panicking on truncated data.
#[derive(Debug)]
pub struct BinReader<'a> {
    src: &'a [u8],
    cursor: usize,
    name: &'a str,
}

impl<'a> BinReader<'a> {
    /// `name` is only used in error messages.
    pub fn new(src: &'a [u8], name: &'a str) -> BinReader<'a> {
        BinReader {
            src,
            cursor: 0,
            name,
        }
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.src.len() - self.cursor
    }

    pub fn get<D: Deserialize>(&mut self) -> Result<D, SinkError> {
        let bytes = self.bytes(D::SERIALIZED_SIZE)?;
        Ok(D::deserialize(bytes))
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], SinkError> {
        let end = self.cursor.checked_add(len).filter(|end| *end <= self.src.len());
        let Some(end) = end else {
            return Err(SinkError::CorruptFile(format!(
                "{} is truncated: wanted {len} bytes at offset {}, {} left",
                self.name,
                self.cursor,
                self.remaining(),
            )));
        };
        let bytes = &self.src[self.cursor..end];
        self.cursor = end;
        Ok(bytes)
    }

    /// Reads a `U16 length` prefixed string.
    pub fn str16(&mut self) -> Result<String, SinkError> {
        let len = self.get::<u16>()? as usize;
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| SinkError::CorruptFile(format!("{} has a non-UTF-8 string", self.name)))
    }

    /// Skips to the next multiple of 4.
    pub fn align4(&mut self) -> Result<(), SinkError> {
        let padding = self.cursor.next_multiple_of(4) - self.cursor;
        self.bytes(padding).map(|_| ())
    }
}

impl Serialize for bool {
    const SERIALIZED_SIZE: usize = 1;
    #[inline]
    fn serialize(&self, dst: &mut [u8]) {
        assert_eq!(<Self as Serialize>::SERIALIZED_SIZE, dst.len());
        dst[0] = if *self { 1 } else { 0 };
    }
}

impl Deserialize for bool {
    const SERIALIZED_SIZE: usize = 1;
    #[inline]
    fn deserialize(src: &[u8]) -> Self {
        assert_eq!(<Self as Deserialize>::SERIALIZED_SIZE, src.len());
        src[0] != 0
    }
}

macro_rules! impl_le_codec {
    ($($ty:ty),*) => {
        $(
            impl Serialize for $ty {
                const SERIALIZED_SIZE: usize = size_of::<$ty>();
                #[inline]
                fn serialize(&self, dst: &mut [u8]) {
                    assert_eq!(<Self as Serialize>::SERIALIZED_SIZE, dst.len());
                    dst.copy_from_slice(&self.to_le_bytes());
                }
            }

            impl Deserialize for $ty {
                const SERIALIZED_SIZE: usize = size_of::<$ty>();
                #[inline]
                fn deserialize(src: &[u8]) -> Self {
                    assert_eq!(<Self as Deserialize>::SERIALIZED_SIZE, src.len());
                    let mut bytes = [0; size_of::<$ty>()];
                    bytes.copy_from_slice(src);
                    <$ty>::from_le_bytes(bytes)
                }
            }
        )*
    };
}

impl_le_codec!(u8, u16, u32, u64, i32, f32);

impl<T: Serialize, const N: usize> Serialize for [T; N] {
    const SERIALIZED_SIZE: usize = T::SERIALIZED_SIZE * N;
    fn serialize(&self, dst: &mut [u8]) {
        assert_eq!(<Self as Serialize>::SERIALIZED_SIZE, dst.len());
        for (value, dst) in self.iter().zip(dst.chunks_exact_mut(T::SERIALIZED_SIZE)) {
            value.serialize(dst);
        }
    }
}

impl<T: Deserialize + Copy + Default, const N: usize> Deserialize for [T; N] {
    const SERIALIZED_SIZE: usize = T::SERIALIZED_SIZE * N;
    fn deserialize(src: &[u8]) -> Self {
        assert_eq!(<Self as Deserialize>::SERIALIZED_SIZE, src.len());
        let mut values = [T::default(); N];
        for (value, src) in values.iter_mut().zip(src.chunks_exact(T::SERIALIZED_SIZE)) {
            *value = T::deserialize(src);
        }
        values
    }
}
