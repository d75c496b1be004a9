//! Blocks are the byte ranges of the data files that chunk payloads live in.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::{write::ZlibEncoder, Compression};
use tracing::{debug, instrument, warn};

use crate::{
    compression::{BlockReader, CompressionMethod},
    error::Result,
    types::BlockDescriptor,
};

/// A byte range inside one of the sibling data files
///
/// The file is chosen by [`Block::source_index`], which indexes the extension
/// string table of the dictionary (`.data`, `.debug`, ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub index: usize,
    pub offset: u32,
    pub decompressed_size: u32,
    pub compressed_size: u32,
    pub flags: u32,
    /// File extension of the data file holding this block, including the dot
    pub extension: String,
    cache: Option<Bytes>,
}

impl Block {
    pub fn new(index: usize, extension: impl Into<String>, source_index: u8) -> Self {
        Self {
            index,
            flags: (source_index as u32) << 16,
            extension: extension.into(),
            ..Default::default()
        }
    }

    pub(crate) fn from_descriptor(index: usize, descriptor: &BlockDescriptor) -> Self {
        Self {
            index,
            offset: descriptor.offset,
            decompressed_size: descriptor.decompressed_size,
            compressed_size: descriptor.compressed_size,
            flags: descriptor.flags,
            extension: String::new(),
            cache: None,
        }
    }

    pub(crate) fn descriptor(&self, compressed: bool) -> BlockDescriptor {
        BlockDescriptor {
            offset: self.offset,
            decompressed_size: self.decompressed_size,
            compressed_size: if compressed { self.compressed_size } else { 0 },
            flags: self.flags,
        }
    }

    /// Index into the extension string table
    pub fn source_index(&self) -> usize {
        ((self.flags >> 16) & 0xFF) as usize
    }

    /// The decompressed contents, if [`Block::decompress`] already ran
    pub fn cached(&self) -> Option<&Bytes> {
        self.cache.as_ref()
    }

    /// Number of bytes this block occupies inside its data file
    pub fn stored_size(&self, compressed: bool) -> u32 {
        if compressed {
            self.compressed_size
        } else {
            self.decompressed_size
        }
    }

    /// Decompress this block out of the full contents of its data file.
    ///
    /// Uncompressed blocks are returned as a view into `source` without a
    /// copy. Blocks starting with a zstd frame are decoded either way. A block that is out of range, truncated, or uses an unknown codec
    /// yields an empty buffer. The result is cached for later calls.
    #[instrument(skip(self, source), fields(block = self.index, offset = self.offset))]
    pub fn decompress(&mut self, source: &Bytes, compressed: bool) -> Bytes {
        if let Some(cache) = &self.cache {
            return cache.clone();
        }

        let data = self.decode(source, compressed);
        self.cache = Some(data.clone());
        data
    }

    fn decode(&self, source: &Bytes, compressed: bool) -> Bytes {
        let offset = self.offset as usize;
        let expected = self.decompressed_size as usize;
        if offset > source.len() || expected == 0 {
            return Bytes::new();
        }

        let stored = &source[offset..];
        let method = CompressionMethod::sniff(stored);
        // zstd frames are recognised whether or not the dictionary is flagged compressed
        if !compressed && method != Some(CompressionMethod::Zstd) {
            return match offset.checked_add(expected) {
                Some(end) if end <= source.len() => source.slice(offset..end),
                _ => {
                    warn!(len = source.len(), expected, "block runs past the end of its file");
                    Bytes::new()
                }
            };
        }

        let Some(method) = method else {
            warn!("unknown compression magic, skipping block");
            return Bytes::new();
        };

        let limit = match self.compressed_size {
            0 => stored.len(),
            size => (size as usize).min(stored.len()),
        };
        let mut data = Vec::with_capacity(expected);
        let decoded = BlockReader::new(&stored[..limit], limit as u64, method)
            .and_then(|mut reader| reader.read_to_end(&mut data).map_err(Into::into));
        match decoded {
            Ok(_) if data.len() == expected => {
                debug!(%method, size = expected, "decompressed block");
                data.into()
            }
            Ok(_) => {
                warn!(actual = data.len(), expected, "decompressed size mismatch");
                Bytes::new()
            }
            Err(e) => {
                warn!(error = %e, "unable to decompress block");
                Bytes::new()
            }
        }
    }

    /// Store `data` as the new contents of this block.
    ///
    /// Updates both sizes and returns the bytes to place in the data file,
    /// zlib compressed when `compressed` is set.
    #[instrument(skip(self, data), fields(block = self.index, size = data.len()), err)]
    pub fn compress(&mut self, data: Bytes, compressed: bool) -> Result<Bytes> {
        self.decompressed_size = data.len() as u32;
        self.compressed_size = data.len() as u32;
        self.cache = Some(data.clone());

        if !compressed {
            return Ok(data);
        }

        let mut writer =
            ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
        writer.write_all(&data)?;
        let read = writer.total_in();
        let stored = writer.finish()?;
        self.compressed_size = stored.len() as u32;
        debug!(read, stored = stored.len(), "compressed block");
        Ok(stored.into())
    }
}
