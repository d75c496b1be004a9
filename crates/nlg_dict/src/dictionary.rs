//! The `.dict` metadata file: header, table references, blocks and extensions.

use std::io::{Cursor, Read, Write};

use binrw::{BinRead, BinWrite};
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use tracing::{debug, instrument, trace};

use crate::{
    block::Block,
    error::{Error, Result},
    types::{
        BlockDescriptor, LegacyHeader, LegacyReference, ModernHeader, ModernReference, TableInfo,
        DICT_MAGIC,
    },
    version::{GameVersion, HeaderLayout},
};

const LM3_SIGNATURE: u32 = 0x7834_0300;
const METROID_SIGNATURE: u32 = 0x297B_947A;
const METROID_REGION: u32 = 83_197_030;
const STRIKERS_SIGNATURE: u32 = 4_247_762_216;

/// Per region description of where a chunk table finds its data
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileTableReference {
    /// Hash of the region name
    pub name: u32,
    /// Records at the root of the table, only stored by modern dictionaries
    pub section_count: u16,
    /// Root entries of the table, only stored by modern dictionaries
    pub file_count: u16,
    /// Logical block slot to block index, zero marks an unused slot
    pub block_indices: Vec<u8>,
}

/// Everything needed to decode one chunk table
#[derive(Debug, Clone, PartialEq)]
pub struct TableLocation {
    pub name: u32,
    /// Reference the table takes its block slots from
    pub reference: usize,
    /// Legacy table info entry, if any
    pub info: Option<usize>,
    /// Block holding the chunk records
    pub table_block: usize,
    /// Block slot to block index
    pub slots: Vec<Option<usize>>,
    /// Records at the root of the table
    pub sections: usize,
}

/// Parsed `.dict` file
#[derive(Debug, Clone, PartialEq)]
pub struct Dictionary {
    pub version: GameVersion,
    pub header_flags: u16,
    /// Whether blocks are stored compressed inside the data files
    pub compressed: bool,
    pub largest_block: u32,
    /// Number of chunk tables in a legacy dictionary
    pub file_table_count: u8,
    pub references: Vec<FileTableReference>,
    /// Legacy only, `file_table_count * references.len()` entries
    pub table_infos: Vec<TableInfo>,
    pub blocks: Vec<Block>,
    /// Data file extensions including the leading dot
    pub extensions: Vec<String>,
}

fn read_zstring<R: Read>(reader: &mut R) -> Result<String> {
    let mut raw = Vec::new();
    loop {
        let c = reader.read_u8()?;
        if c == b'\0' {
            break;
        }
        raw.push(c);
    }
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn read_at<E: ByteOrder>(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4).map(E::read_u32)
}

impl Dictionary {
    /// An empty dictionary for `version`
    pub fn new(version: GameVersion) -> Self {
        Self {
            version,
            header_flags: 0,
            compressed: false,
            largest_block: 0,
            file_table_count: 0,
            references: Vec::new(),
            table_infos: Vec::new(),
            blocks: Vec::new(),
            extensions: Vec::new(),
        }
    }

    /// Read a dictionary, detecting the version unless one is given
    #[instrument(skip(reader), err)]
    pub fn read<R: Read>(mut reader: R, version: Option<GameVersion>) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;

        if read_at::<LittleEndian>(&data, 0) != Some(DICT_MAGIC) {
            return Err(Error::InvalidDictionary);
        }

        let version = match version {
            Some(version) => version,
            None => Self::probe(&data)?,
        };
        debug!(%version, size = data.len(), "reading dictionary");

        Self::parse(&data, version)
    }

    /// Guess the version of a dictionary from its raw bytes.
    ///
    /// Known signatures are checked first. Otherwise each header layout is
    /// tried and the first one that parses and consumes the whole file wins.
    pub fn probe(data: &[u8]) -> Result<GameVersion> {
        if read_at::<BigEndian>(data, 12) == Some(LM3_SIGNATURE) {
            return Ok(GameVersion::Lm3);
        }
        if read_at::<BigEndian>(data, 16) == Some(METROID_SIGNATURE)
            || read_at::<LittleEndian>(data, 32) == Some(METROID_REGION)
        {
            return Ok(GameVersion::MetroidFed);
        }
        if data.len() > 0x44 && read_at::<LittleEndian>(data, 0x40) == Some(STRIKERS_SIGNATURE) {
            return Err(Error::UnsupportedVersion("Mario Strikers".into()));
        }

        let legacy = if data.get(8).is_some_and(|count| count % 7 == 0) {
            GameVersion::Lm2Hd
        } else {
            GameVersion::Lm2
        };

        [legacy, GameVersion::Lm3, GameVersion::MetroidFed]
            .into_iter()
            .find(|version| {
                let mut cursor = Cursor::new(data);
                let parsed = Self::read_parts(&mut cursor, *version).is_ok();
                trace!(%version, parsed, consumed = cursor.position(), "probing layout");
                parsed && cursor.position() == data.len() as u64
            })
            .ok_or(Error::InvalidDictionary)
    }

    fn parse(data: &[u8], version: GameVersion) -> Result<Self> {
        let mut dictionary = Self::read_parts(&mut Cursor::new(data), version)?;
        for block in dictionary.blocks.iter_mut() {
            let index = block.source_index();
            block.extension = dictionary
                .extensions
                .get(index)
                .ok_or(Error::MissingExtension {
                    block: block.index,
                    index,
                })?
                .clone();
        }
        Ok(dictionary)
    }

    fn read_parts(reader: &mut Cursor<&[u8]>, version: GameVersion) -> Result<Self> {
        let policy = version.policy();
        let mut dictionary = Dictionary::new(version);

        let (block_count, string_count) = match policy.layout {
            HeaderLayout::Legacy => {
                let header = LegacyHeader::read(reader)?;
                dictionary.header_flags = header.flags;
                dictionary.compressed = header.compressed;
                dictionary.largest_block = header.largest_block;
                dictionary.file_table_count = header.file_table_count;

                dictionary.references = (0..header.reference_count)
                    .map(|_| {
                        LegacyReference::read(reader)
                            .map(|r| FileTableReference {
                                name: r.name,
                                block_indices: r.block_indices.to_vec(),
                                ..Default::default()
                            })
                            .map_err(Error::from)
                    })
                    .collect::<Result<_>>()?;

                let infos = header.file_table_count as usize * header.reference_count as usize;
                dictionary.table_infos = (0..infos)
                    .map(|_| TableInfo::read(reader).map_err(Error::from))
                    .collect::<Result<_>>()?;

                (header.block_count as usize, header.string_count)
            }
            HeaderLayout::Modern => {
                let header = ModernHeader::read(reader)?;
                dictionary.header_flags = header.flags;
                dictionary.compressed = header.compressed;
                dictionary.largest_block = header.largest_block;

                dictionary.references = (0..header.reference_count)
                    .map(|_| {
                        ModernReference::read_args(reader, (policy.block_slots,))
                            .map(|r| FileTableReference {
                                name: r.name,
                                section_count: r.section_count,
                                file_count: r.file_count,
                                block_indices: r.block_indices,
                            })
                            .map_err(Error::from)
                    })
                    .collect::<Result<_>>()?;

                (header.block_count as usize, header.string_count)
            }
        };

        // guards the allocation below against garbage counts while probing
        let remaining = reader.get_ref().len() as u64 - reader.position();
        if block_count as u64 * 16 > remaining {
            return Err(Error::InvalidDictionary);
        }

        dictionary.blocks = (0..block_count)
            .map(|i| {
                BlockDescriptor::read(reader)
                    .map(|d| Block::from_descriptor(i, &d))
                    .map_err(Error::from)
            })
            .collect::<Result<_>>()?;

        dictionary.extensions = (0..string_count)
            .map(|_| read_zstring(reader))
            .collect::<Result<_>>()?;

        Ok(dictionary)
    }

    fn check_count(&self, field: &'static str, value: usize, max: usize) -> Result<()> {
        if value > max {
            return Err(Error::CountOverflow {
                field,
                value,
                version: self.version,
            });
        }
        Ok(())
    }

    fn slots_of(&self, reference: &FileTableReference) -> Vec<u8> {
        let mut slots = reference.block_indices.clone();
        slots.resize(self.version.policy().block_slots, 0);
        slots
    }

    /// Serialize the dictionary
    #[instrument(skip_all, err)]
    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        let largest_block = if self.compressed {
            self.blocks.iter().map(|b| b.compressed_size).max().unwrap_or(0)
        } else {
            0
        };

        let mut out = Cursor::new(Vec::new());
        match self.version.policy().layout {
            HeaderLayout::Legacy => {
                self.check_count("file tables", self.file_table_count as usize, u8::MAX as usize)?;
                self.check_count("references", self.references.len(), u8::MAX as usize)?;
                self.check_count("strings", self.extensions.len(), u8::MAX as usize)?;
                self.check_count("blocks", self.blocks.len(), u32::MAX as usize)?;

                LegacyHeader {
                    flags: self.header_flags,
                    compressed: self.compressed,
                    block_count: self.blocks.len() as u32,
                    largest_block,
                    file_table_count: self.file_table_count,
                    reference_count: self.references.len() as u8,
                    string_count: self.extensions.len() as u8,
                }
                .write(&mut out)?;

                for reference in &self.references {
                    let mut block_indices = [0u8; 8];
                    block_indices.copy_from_slice(&self.slots_of(reference));
                    LegacyReference {
                        name: reference.name,
                        block_indices,
                    }
                    .write(&mut out)?;
                }

                for info in &self.table_infos {
                    info.write(&mut out)?;
                }
            }
            HeaderLayout::Modern => {
                self.check_count("blocks", self.blocks.len(), u8::MAX as usize)?;
                self.check_count("references", self.references.len(), u8::MAX as usize)?;
                self.check_count("strings", self.extensions.len(), u8::MAX as usize)?;

                ModernHeader {
                    flags: self.header_flags,
                    compressed: self.compressed,
                    largest_block,
                    block_count: self.blocks.len() as u8,
                    reference_count: self.references.len() as u8,
                    string_count: self.extensions.len() as u8,
                }
                .write(&mut out)?;

                for reference in &self.references {
                    ModernReference {
                        name: reference.name,
                        section_count: reference.section_count,
                        file_count: reference.file_count,
                        block_indices: self.slots_of(reference),
                    }
                    .write(&mut out)?;
                }
            }
        }

        for block in &self.blocks {
            block.descriptor(self.compressed).write(&mut out)?;
        }

        for extension in &self.extensions {
            out.write_all(extension.as_bytes())?;
            out.write_all(&[0])?;
        }

        writer.write_all(out.get_ref())?;
        Ok(())
    }

    /// Register a data file extension, returning its string index
    pub fn add_extension(&mut self, extension: &str) -> usize {
        match self.extensions.iter().position(|e| e == extension) {
            Some(index) => index,
            None => {
                self.extensions.push(extension.to_owned());
                self.extensions.len() - 1
            }
        }
    }

    /// Append an empty block stored in the data file with `extension`
    pub fn add_block(&mut self, extension: &str) -> usize {
        let source = self.add_extension(extension);
        let index = self.blocks.len();
        self.blocks
            .push(Block::new(index, extension, source as u8));
        index
    }

    /// Append a table reference, padding or cutting `block_indices` to the slot count
    pub fn add_reference(&mut self, name: u32, block_indices: &[u8]) -> usize {
        let mut reference = FileTableReference {
            name,
            block_indices: block_indices.to_vec(),
            ..Default::default()
        };
        reference.block_indices = self.slots_of(&reference);
        self.references.push(reference);
        self.references.len() - 1
    }

    /// Append a legacy chunk table stored in `table_block`
    ///
    /// Legacy dictionaries keep one table info per reference for every table.
    pub fn add_table_info(&mut self, table_block: u16) -> Result<usize> {
        if self.version.policy().layout != HeaderLayout::Legacy {
            return Err(Error::CustomError(format!(
                "{} dictionaries do not store table infos",
                self.version
            )));
        }
        if self.references.is_empty() {
            return Err(Error::CustomError(
                "a table reference must exist before adding tables".into(),
            ));
        }
        self.check_count("file tables", self.file_table_count as usize + 1, u8::MAX as usize)?;

        for _ in 0..self.references.len() {
            self.table_infos.push(TableInfo {
                section_count: 0,
                table_block,
            });
        }
        self.file_table_count += 1;
        Ok(self.file_table_count as usize - 1)
    }

    /// Number of chunk tables described by this dictionary
    pub fn table_count(&self) -> usize {
        match self.version.policy().layout {
            HeaderLayout::Modern => self.references.len(),
            HeaderLayout::Legacy if self.references.is_empty() => 0,
            HeaderLayout::Legacy => (self.file_table_count as usize)
                .min(self.table_infos.len() / self.references.len()),
        }
    }

    /// Where table `index` lives and which blocks its slots map to.
    ///
    /// Modern table `i` is stored in block `i` and maps slots directly. Legacy
    /// tables all use the first reference, shifted by their table block.
    pub fn table_location(&self, index: usize) -> Result<TableLocation> {
        if index >= self.table_count() {
            return Err(Error::TableNotFound(index));
        }

        let (reference, info, table_block, shift, sections) = match self.version.policy().layout {
            HeaderLayout::Modern => {
                let reference = &self.references[index];
                (index, None, index, 0, reference.section_count as usize)
            }
            HeaderLayout::Legacy => {
                let info_index = index * self.references.len();
                let info = self
                    .table_infos
                    .get(info_index)
                    .ok_or(Error::TableNotFound(index))?;
                let block = info.table_block as usize;
                (0, Some(info_index), block, block, info.section_count as usize)
            }
        };

        if table_block >= self.blocks.len() {
            return Err(Error::BlockOutOfRange(table_block));
        }

        let slots = self.references[reference]
            .block_indices
            .iter()
            .map(|&block| match block {
                0 => Ok(None),
                block if shift + (block as usize) < self.blocks.len() => {
                    Ok(Some(shift + block as usize))
                }
                block => Err(Error::BlockOutOfRange(shift + block as usize)),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(TableLocation {
            name: self.references[reference].name,
            reference,
            info,
            table_block,
            slots,
            sections,
        })
    }

    /// Record the new root counts of a table after it was rewritten
    pub(crate) fn set_table_counts(
        &mut self,
        location: &TableLocation,
        sections: usize,
        files: usize,
    ) -> Result<()> {
        self.check_count("sections", sections, u16::MAX as usize)?;
        match location.info {
            Some(info) => {
                if let Some(info) = self.table_infos.get_mut(info) {
                    info.section_count = sections as u16;
                }
            }
            None => {
                if let Some(reference) = self.references.get_mut(location.reference) {
                    reference.section_count = sections as u16;
                    reference.file_count = files as u16;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::Dictionary;
    use crate::{error::Error, error::Result, version::GameVersion};

    #[rustfmt::skip]
    const MODERN: [u8; 96] = [
        // header
        0x58, 0x24, 0xF3, 0xA9, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x03, 0x01, 0x02, 0x00,
        // reference
        0x44, 0x33, 0x22, 0x11, 0x02, 0x00, 0x01, 0x00,
        0x00, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        // blocks
        0x00, 0x00, 0x00, 0x00, 0x18, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x18, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00,
        // strings
        b'.', b'd', b'a', b't', b'a', 0x00, b'.', 0x00,
    ];

    #[test]
    fn read_modern() -> Result<()> {
        let dict = Dictionary::read(Cursor::new(MODERN), None)?;
        assert_eq!(dict.version, GameVersion::Lm3);
        assert_eq!(dict.blocks.len(), 3);
        assert_eq!(dict.references[0].name, 0x1122_3344);
        assert_eq!(dict.references[0].section_count, 2);
        assert_eq!(dict.extensions, vec![".data".to_string(), ".".to_string()]);
        assert_eq!(dict.blocks[2].extension, ".");
        assert_eq!(dict.blocks[1].offset, 0x18);

        let location = dict.table_location(0)?;
        assert_eq!(location.table_block, 0);
        assert_eq!(location.sections, 2);
        assert_eq!(location.slots[..3], [None, Some(1), Some(2)]);
        assert!(location.slots[3..].iter().all(Option::is_none));
        Ok(())
    }

    #[test]
    fn write_modern_roundtrip() -> Result<()> {
        let dict = Dictionary::read(Cursor::new(MODERN), Some(GameVersion::Lm3))?;
        let mut actual = Vec::new();
        dict.write(&mut actual)?;
        assert_eq!(actual, MODERN.to_vec());
        Ok(())
    }

    #[test]
    fn invalid_magic() {
        let mut input = MODERN;
        input[0] = 0;
        assert!(matches!(
            Dictionary::read(Cursor::new(input), None),
            Err(Error::InvalidDictionary)
        ));
    }

    #[test]
    fn missing_extension() {
        let mut input = MODERN;
        // point block 2 at string 5
        input[86] = 5;
        assert!(matches!(
            Dictionary::read(Cursor::new(input), None),
            Err(Error::MissingExtension { block: 2, index: 5 })
        ));
    }

    #[test]
    fn legacy_roundtrip_and_locations() -> Result<()> {
        let mut dict = Dictionary::new(GameVersion::Lm2);
        for _ in 0..5 {
            dict.add_block(".data");
        }
        dict.add_block(".debug");
        dict.add_reference(0xAAAA, &[1, 2]);
        dict.add_reference(0xBBBB, &[3]);
        dict.add_table_info(0)?;
        dict.add_table_info(2)?;
        assert_eq!(dict.table_infos.len(), 4);
        assert_eq!(dict.table_count(), 2);

        let second = dict.table_location(1)?;
        assert_eq!(second.table_block, 2);
        assert_eq!(second.info, Some(2));
        assert_eq!(second.slots[..3], [Some(3), Some(4), None]);

        let mut data = Vec::new();
        dict.write(&mut data)?;
        assert_eq!(Dictionary::probe(&data)?, GameVersion::Lm2);
        assert_eq!(Dictionary::read(Cursor::new(&data), None)?, dict);
        Ok(())
    }

    #[test]
    fn slot_out_of_range() {
        let mut dict = Dictionary::new(GameVersion::Lm3);
        dict.add_block(".data");
        dict.add_reference(1, &[0, 4]);
        assert!(matches!(dict.table_location(0), Err(Error::BlockOutOfRange(4))));
        assert!(matches!(dict.table_location(1), Err(Error::TableNotFound(1))));
    }

    #[test]
    fn modern_count_overflow() {
        let mut dict = Dictionary::new(GameVersion::Lm3);
        for _ in 0..256 {
            dict.add_block(".data");
        }
        assert!(matches!(
            dict.write(Vec::new()),
            Err(Error::CountOverflow { field: "blocks", value: 256, .. })
        ));
    }

    #[test]
    fn probe_signatures() {
        let mut data = vec![0u8; 0x48];
        data[12..16].copy_from_slice(&[0x78, 0x34, 0x03, 0x00]);
        assert!(matches!(Dictionary::probe(&data), Ok(GameVersion::Lm3)));

        let mut data = vec![0u8; 0x48];
        data[16..20].copy_from_slice(&[0x29, 0x7B, 0x94, 0x7A]);
        assert!(matches!(Dictionary::probe(&data), Ok(GameVersion::MetroidFed)));

        let mut data = vec![0u8; 0x48];
        data[0x40..0x44].copy_from_slice(&4_247_762_216u32.to_le_bytes());
        assert!(matches!(
            Dictionary::probe(&data),
            Err(Error::UnsupportedVersion(_))
        ));
    }
}
