//! Base types for the structure of dictionary files.

use std::fmt;

use binrw::{BinRead, BinWrite};

use crate::version::BitField;

/// Size in bytes of one [`ChunkRecord`]
pub const CHUNK_SIZE: usize = 12;

/// Magic number at the start of every dictionary
pub const DICT_MAGIC: u32 = 0xA9F3_2458;

/// Type tag of a chunk
///
/// Tags this library knows about get their own variant, anything else is
/// carried through untouched as [`ChunkType::Unknown`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ChunkType {
    FileHeader,
    Script,
    AnimationData,
    Skeleton,
    Model,
    SkinBinding,
    MaterialParams,
    MaterialData,
    MaterialLookupTable,
    Shaders,
    ShaderDefinitions,
    Texture,
    TextureHeader,
    TextureData,
    Unknown(u16),
}

impl From<u16> for ChunkType {
    fn from(value: u16) -> Self {
        match value {
            0x1301 => ChunkType::FileHeader,
            0x5000 => ChunkType::Script,
            0x7000 => ChunkType::AnimationData,
            0x7100 => ChunkType::Skeleton,
            0xB000 => ChunkType::Model,
            0xB100 => ChunkType::SkinBinding,
            0xB310 => ChunkType::MaterialParams,
            0xB320 => ChunkType::MaterialData,
            0xB330 => ChunkType::MaterialLookupTable,
            0xB400 => ChunkType::Shaders,
            0xB404 => ChunkType::ShaderDefinitions,
            0xB500 => ChunkType::Texture,
            0xB501 => ChunkType::TextureHeader,
            0xB502 => ChunkType::TextureData,
            other => ChunkType::Unknown(other),
        }
    }
}

impl From<ChunkType> for u16 {
    fn from(value: ChunkType) -> Self {
        match value {
            ChunkType::FileHeader => 0x1301,
            ChunkType::Script => 0x5000,
            ChunkType::AnimationData => 0x7000,
            ChunkType::Skeleton => 0x7100,
            ChunkType::Model => 0xB000,
            ChunkType::SkinBinding => 0xB100,
            ChunkType::MaterialParams => 0xB310,
            ChunkType::MaterialData => 0xB320,
            ChunkType::MaterialLookupTable => 0xB330,
            ChunkType::Shaders => 0xB400,
            ChunkType::ShaderDefinitions => 0xB404,
            ChunkType::Texture => 0xB500,
            ChunkType::TextureHeader => 0xB501,
            ChunkType::TextureData => 0xB502,
            ChunkType::Unknown(other) => other,
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkType::Unknown(value) => write!(f, "{value:04X}"),
            known => write!(f, "{known:?}"),
        }
    }
}

/// Bit packed flags of a chunk
///
/// | Bits   | Meaning                                    |
/// |--------|--------------------------------------------|
/// | 0      | has a parent                               |
/// | 1..=10 | alignment selector                         |
/// | 11..   | block slot, 3 or 4 bits depending on title |
/// | 15     | has children                               |
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ChunkFlags(pub u16);

const ALIGNMENT: BitField = BitField::new(1, 10);

impl ChunkFlags {
    pub const fn bit(self, n: u32) -> bool {
        self.0 & (1 << n) != 0
    }

    pub const fn has_parent(self) -> bool {
        self.bit(0)
    }

    pub const fn has_children(self) -> bool {
        self.bit(15)
    }

    pub const fn alignment(self) -> u16 {
        ALIGNMENT.get(self.0)
    }

    pub const fn block_index(self, field: BitField) -> usize {
        field.get(self.0) as usize
    }

    const fn with_bit(self, n: u32, value: bool) -> Self {
        if value {
            Self(self.0 | (1 << n))
        } else {
            Self(self.0 & !(1 << n))
        }
    }

    pub const fn with_parent(self, value: bool) -> Self {
        self.with_bit(0, value)
    }

    pub const fn with_children(self, value: bool) -> Self {
        self.with_bit(15, value)
    }

    pub const fn with_alignment(self, value: u16) -> Self {
        Self(ALIGNMENT.set(self.0, value))
    }

    pub const fn with_block_index(self, field: BitField, value: usize) -> Self {
        Self(field.set(self.0, value as u16))
    }
}

impl fmt::Display for ChunkFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One 12 byte entry of a chunk table
///
/// For a leaf, `offset` and `size` locate the payload inside the block picked
/// by the block slot of `flags`. For a chunk with children, `offset` is the
/// record index of the first child and `size` the number of child slots.
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[brw(little)]
pub struct ChunkRecord {
    #[br(map = |x: u16| ChunkType::from(x))]
    #[bw(map = |x: &ChunkType| u16::from(*x))]
    pub kind: ChunkType,

    #[br(map = |x: u16| ChunkFlags(x))]
    #[bw(map = |x: &ChunkFlags| x.0)]
    pub flags: ChunkFlags,

    pub size: u32,

    pub offset: u32,
}

impl ChunkRecord {
    pub const fn new(kind: ChunkType, flags: u16) -> Self {
        Self {
            kind,
            flags: ChunkFlags(flags),
            size: 0,
            offset: 0,
        }
    }

    /// Whether this record is the first half of a file entry
    pub fn is_file_header(&self) -> bool {
        self.kind == ChunkType::FileHeader
    }
}

/// Header of the Luigi's Mansion 2 family of dictionaries
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little, magic = 0xA9F3_2458u32)]
pub struct LegacyHeader {
    pub flags: u16,

    #[br(map = |x: u8| x == 1)]
    #[bw(map = |x: &bool| u8::from(*x))]
    #[brw(pad_after = 1)]
    pub compressed: bool,

    pub block_count: u32,

    /// Largest compressed block, zero when blocks are stored raw
    pub largest_block: u32,

    #[brw(pad_after = 1)]
    pub file_table_count: u8,

    pub reference_count: u8,

    pub string_count: u8,
}

/// Header of the Luigi's Mansion 3 family of dictionaries
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little, magic = 0xA9F3_2458u32)]
pub struct ModernHeader {
    pub flags: u16,

    #[br(map = |x: u8| x == 1)]
    #[bw(map = |x: &bool| u8::from(*x))]
    #[brw(pad_after = 1)]
    pub compressed: bool,

    /// Largest compressed block, zero when blocks are stored raw
    pub largest_block: u32,

    pub block_count: u8,

    pub reference_count: u8,

    #[brw(pad_after = 1)]
    pub string_count: u8,
}

#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct LegacyReference {
    pub name: u32,
    pub block_indices: [u8; 8],
}

#[derive(BinRead, BinWrite, Debug, Default, Clone, PartialEq)]
#[brw(little)]
#[br(import(slots: usize))]
pub struct ModernReference {
    pub name: u32,

    /// Number of records at the root of the table, file entries count twice
    pub section_count: u16,

    /// Number of root entries
    pub file_count: u16,

    #[br(count = slots)]
    pub block_indices: Vec<u8>,
}

/// Location and size of one legacy chunk table
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct TableInfo {
    pub section_count: u16,
    pub table_block: u16,
}

#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct BlockDescriptor {
    pub offset: u32,
    pub decompressed_size: u32,
    pub compressed_size: u32,
    pub flags: u32,
}
