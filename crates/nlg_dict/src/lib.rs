//! This library handles reading from and creating the **dictionary** archives used by the games
//! of *Next Level Games* (*Luigi's Mansion 2*, *Luigi's Mansion 2 HD*, *Luigi's Mansion 3* and
//! *Metroid Prime: Federation Force*).
//!
//! # Dictionary Archive Format Documentation
//!
//! An archive is a small `.dict` metadata file plus one or more sibling data files sharing its
//! stem (`level.data`, `level.debug`, ...). The dictionary cuts the data files into **blocks**,
//! and a few of those blocks hold **chunk tables** describing the assets stored in the others.
//!
//! ## Dictionary
//!
//! All values are little endian. Two header layouts exist, the legacy one used by *Luigi's
//! Mansion 2* and the modern one used by *Luigi's Mansion 3*. *Federation Force* uses the modern
//! header with the legacy chunk flags.
//!
//! ### Legacy header
//!
//! | Offset (bytes) | Field            | Description                                          |
//! |----------------|------------------|------------------------------------------------------|
//! | 0x0000         | Magic number     | 4 bytes: 0xA9F32458                                  |
//! | 0x0004         | Flags            | 2 bytes                                              |
//! | 0x0006         | Compressed       | 1 byte: 1 when blocks are zlib compressed, 1 pad     |
//! | 0x0008         | Block count      | 4 bytes                                              |
//! | 0x000C         | Largest block    | 4 bytes: largest compressed block, 0 when raw        |
//! | 0x0010         | File table count | 1 byte, 1 pad                                        |
//! | 0x0012         | Reference count  | 1 byte                                               |
//! | 0x0013         | String count     | 1 byte                                               |
//!
//! It is followed by `reference count` references of a 4 byte name hash and 8 block indices,
//! then `file table count * reference count` table infos of a 2 byte section count and a 2 byte
//! table block.
//!
//! ### Modern header
//!
//! | Offset (bytes) | Field            | Description                                          |
//! |----------------|------------------|------------------------------------------------------|
//! | 0x0000         | Magic number     | 4 bytes: 0xA9F32458                                  |
//! | 0x0004         | Flags            | 2 bytes                                              |
//! | 0x0006         | Compressed       | 1 byte, 1 pad                                        |
//! | 0x0008         | Largest block    | 4 bytes                                              |
//! | 0x000C         | Block count      | 1 byte                                               |
//! | 0x000D         | Reference count  | 1 byte                                               |
//! | 0x000E         | String count     | 1 byte, 1 pad                                        |
//!
//! It is followed by `reference count` references of a 4 byte name hash, a 2 byte section count,
//! a 2 byte file count and 16 block indices (8 for *Federation Force*).
//!
//! ### Blocks and extensions
//!
//! Both layouts end with `block count` descriptors and `string count` zero terminated extensions.
//!
//! | Offset (bytes) | Field             | Description                                         |
//! |----------------|-------------------|-----------------------------------------------------|
//! | 0x0000         | Offset            | 4 bytes: start inside the data file                 |
//! | 0x0004         | Decompressed size | 4 bytes                                             |
//! | 0x0008         | Compressed size   | 4 bytes: 0 when raw                                 |
//! | 0x000C         | Flags             | 4 bytes: bits 16..24 index the extension strings    |
//!
//! Blocks sharing an extension are stored one after the other in the same data file, aligned to
//! 512 bytes for *Luigi's Mansion 2 HD* and 8 bytes otherwise.
//!
//! ## Chunk tables
//!
//! A table is a flat run of 12 byte records:
//!
//! | Offset (bytes) | Field  | Description                                                    |
//! |----------------|--------|----------------------------------------------------------------|
//! | 0x0000         | Type   | 2 bytes                                                        |
//! | 0x0002         | Flags  | 2 bytes: has parent, alignment, block slot, has children       |
//! | 0x0004         | Size   | 4 bytes: payload length, or child record count                 |
//! | 0x0008         | Offset | 4 bytes: payload offset in its block, or first child record    |
//!
//! The reference of a table declares how many records sit at its root. A record of type
//! `0x1301` is the header of a file entry and is always followed by the body of that file, its
//! 8 byte payload holds the hash type and the path hash of the file. Children are found at
//! record `offset` of the same table, so they are only decoded when asked for.
//!
//! The block slot of a leaf selects an entry of the reference's block indices, which in turn
//! selects the block holding the payload. Region tables store most of their files by pointing
//! at the same data as the global table, the first one.
//!
//! ## Additional Information
//!
//! - **File Extension**: `.dict` plus data files such as `.data`
//! - **Endianness**: Little-endian for all multi-byte integers
//! - **Compression Methods**: none, zlib, and zstd for blocks that start with its frame magic
//!

pub mod block;
pub mod compression;
pub mod dictionary;
pub mod error;
pub mod export;
pub mod hash;
pub mod read;
pub mod source;
pub mod tree;
pub mod types;
pub mod version;
pub mod write;

pub use compression::CompressionMethod;
pub use dictionary::Dictionary;
pub use hash::{hash_str, HashLookup, HashNames};
pub use read::{DictArchive, OpenOptions};
pub use source::{DataSource, FsSource, MemorySource};
pub use tree::{ChunkTree, NodeId};
pub use types::ChunkType;
pub use version::GameVersion;
pub use write::DictWriter;
