//! Block compression and decompression handling.

use std::io::{self, BufReader, Read};

use flate2::read::ZlibDecoder;
use tracing::instrument;

use crate::error::Result;

/// Codec of a compressed block inside a data file
///
/// Dictionaries only carry a single "compressed" flag for all blocks, the
/// actual codec is detected from the first bytes of each block with
/// [`CompressionMethod::sniff`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Zlib stream with a standard two byte header
    Zlib,

    /// Zstandard frame
    Zstd,
}

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

impl CompressionMethod {
    /// Detect the codec of a compressed block, `None` if the magic is unknown
    pub fn sniff(data: &[u8]) -> Option<Self> {
        match data {
            [0x78, 0x9C | 0xDA, ..] | [0x9C, 0x78, ..] => Some(CompressionMethod::Zlib),
            [a, b, c, d, ..] if [*a, *b, *c, *d] == ZSTD_MAGIC => Some(CompressionMethod::Zstd),
            _ => None,
        }
    }
}

impl std::fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CompressionMethod::Zlib => "zlib",
            CompressionMethod::Zstd => "zstd",
        })
    }
}

pub(crate) enum BlockReader<R: Read> {
    Zlib(Box<ZlibDecoder<io::Take<R>>>),
    Zstd(Box<zstd::stream::read::Decoder<'static, BufReader<io::Take<R>>>>),
}

impl<R: Read> BlockReader<R> {
    #[instrument(skip(reader))]
    pub fn new(reader: R, limit: u64, compression: CompressionMethod) -> Result<Self> {
        let limit_reader = reader.take(limit);
        Ok(match compression {
            CompressionMethod::Zlib => BlockReader::Zlib(Box::new(ZlibDecoder::new(limit_reader))),
            CompressionMethod::Zstd => BlockReader::Zstd(Box::new(
                zstd::stream::read::Decoder::new(limit_reader)?,
            )),
        })
    }
}

impl<R: Read> Read for BlockReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BlockReader::Zlib(r) => r.read(buf),
            BlockReader::Zstd(r) => r.read(buf),
        }
    }

    #[instrument(skip_all, err)]
    fn read_to_end(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        match self {
            BlockReader::Zlib(r) => r.read_to_end(buf),
            BlockReader::Zstd(r) => r.read_to_end(buf),
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::{Read, Write};

    use flate2::{write::ZlibEncoder, Compression};
    use pretty_assertions::assert_eq;

    use super::{BlockReader, CompressionMethod};
    use crate::error::Result;

    #[rustfmt::skip]
    const HELLO_ZLIB: [u8; 19] = [
        0x78, 0x9C, 0xF3, 0x48, 0xCD, 0xC9, 0xC9, 0x57, 0x08, 0xCF,
        0x2F, 0xCA, 0x49, 0x01, 0x00, 0x18, 0x0B, 0x04, 0x1D,
    ];

    #[test]
    fn sniff_magic() {
        assert_eq!(CompressionMethod::sniff(&HELLO_ZLIB), Some(CompressionMethod::Zlib));
        assert_eq!(CompressionMethod::sniff(&[0x78, 0xDA, 0x00]), Some(CompressionMethod::Zlib));
        assert_eq!(
            CompressionMethod::sniff(&[0x28, 0xB5, 0x2F, 0xFD, 0x00]),
            Some(CompressionMethod::Zstd)
        );
        assert_eq!(CompressionMethod::sniff(b"Hello"), None);
        assert_eq!(CompressionMethod::sniff(&[0x78]), None);
    }

    #[test]
    fn read_zlib_block() -> Result<()> {
        let mut reader =
            BlockReader::new(&HELLO_ZLIB[..], HELLO_ZLIB.len() as u64, CompressionMethod::Zlib)?;
        let mut actual = Vec::new();
        reader.read_to_end(&mut actual)?;
        assert_eq!(actual, b"Hello World");
        Ok(())
    }

    #[test]
    fn zlib_roundtrip() -> Result<()> {
        let input = b"chunk payload chunk payload chunk payload".repeat(8);

        let mut writer = ZlibEncoder::new(Vec::new(), Compression::default());
        writer.write_all(&input)?;
        let compressed = writer.finish()?;
        assert!(compressed.len() < input.len());
        assert_eq!(CompressionMethod::sniff(&compressed), Some(CompressionMethod::Zlib));

        let mut reader =
            BlockReader::new(&compressed[..], compressed.len() as u64, CompressionMethod::Zlib)?;
        let mut actual = Vec::new();
        reader.read_to_end(&mut actual)?;
        assert_eq!(actual, input);
        Ok(())
    }

    #[test]
    fn zstd_stops_at_the_limit() -> Result<()> {
        let input = b"region data".repeat(4);
        let mut stored = zstd::bulk::compress(&input, 0)?;
        let limit = stored.len() as u64;
        stored.extend_from_slice(b"next block");

        let mut reader = BlockReader::new(&stored[..], limit, CompressionMethod::Zstd)?;
        let mut actual = Vec::new();
        reader.read_to_end(&mut actual)?;
        assert_eq!(actual, input);
        Ok(())
    }

    #[test]
    fn zstd_block() -> Result<()> {
        let input = b"region data".repeat(4);
        let compressed = zstd::bulk::compress(&input, 0)?;

        let mut reader =
            BlockReader::new(&compressed[..], compressed.len() as u64, CompressionMethod::Zstd)?;
        let mut actual = Vec::new();
        reader.read_to_end(&mut actual)?;
        assert_eq!(actual, input);
        Ok(())
    }
}
