//! Types for reading dictionary archives
//!

use std::{
    collections::HashMap,
    fmt::{self, Debug},
    fs::File,
    io::BufReader,
    path::Path,
    sync::Arc,
};

use bon::Builder;
use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

use crate::{
    dictionary::{Dictionary, TableLocation},
    error::{Error, Result},
    hash::{HashLookup, NoNames},
    source::{DataSource, FsSource},
    tree::{ChunkTree, NodeId},
    version::GameVersion,
};

/// Options for opening a dictionary archive
#[derive(Clone, Default, Builder)]
pub struct OpenOptions {
    /// Skip detection and read the dictionary as this version
    pub version: Option<GameVersion>,

    /// Names used when displaying hashes
    pub names: Option<Arc<dyn HashLookup>>,
}

/// One loaded chunk table
#[derive(Debug, Clone)]
pub struct DictTable {
    /// Index of the table inside the dictionary
    pub index: usize,
    pub location: TableLocation,
    pub tree: ChunkTree,
}

impl DictTable {
    pub fn name(&self) -> u32 {
        self.location.name
    }
}

/// A dictionary together with its data files and decoded tables
///
/// ```no_run
/// use nlg_dict::{DictArchive, OpenOptions};
///
/// fn list_files(path: &str) -> nlg_dict::error::Result<()> {
///     let archive = DictArchive::open(path, OpenOptions::default())?;
///
///     for table in archive.tables() {
///         println!("{}: {} roots", archive.display_hash(table.name()), table.tree.roots().len());
///     }
///
///     Ok(())
/// }
/// ```
pub struct DictArchive<S> {
    dictionary: Dictionary,
    source: S,
    files: HashMap<String, Option<Bytes>>,
    tables: Vec<DictTable>,
    names: Arc<dyn HashLookup>,
}

impl<S> Debug for DictArchive<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DictArchive")
            .field("dictionary", &self.dictionary)
            .field("tables", &self.tables.len())
            .finish()
    }
}

impl DictArchive<FsSource> {
    /// Open a `.dict` file and the data files next to it
    #[instrument(skip(path, options), fields(path = %path.as_ref().display()), err)]
    pub fn open(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let dictionary = Dictionary::read(BufReader::new(File::open(path)?), options.version)?;
        Self::new(dictionary, FsSource::new(path), options)
    }
}

impl<S: DataSource> DictArchive<S> {
    /// Load every table of `dictionary` from `source`.
    ///
    /// A table whose data file is missing or whose records are malformed is
    /// left out, the remaining tables still load.
    pub fn new(dictionary: Dictionary, source: S, options: OpenOptions) -> Result<Self> {
        let mut archive = Self {
            dictionary,
            source,
            files: HashMap::new(),
            tables: Vec::new(),
            names: options.names.unwrap_or_else(|| Arc::new(NoNames)),
        };

        for index in 0..archive.dictionary.table_count() {
            match archive.load_table(index) {
                Ok(Some(table)) => archive.tables.push(table),
                Ok(None) => {}
                Err(e) => warn!(table = index, error = %e, "skipping malformed table"),
            }
        }
        archive.link_shared()?;

        info!(
            version = %archive.dictionary.version,
            tables = archive.tables.len(),
            blocks = archive.dictionary.blocks.len(),
            "opened dictionary"
        );
        Ok(archive)
    }

    /// An archive with an empty tree for every table of `dictionary`, for
    /// building new archives
    pub fn create(dictionary: Dictionary, source: S) -> Result<Self> {
        let version = dictionary.version;
        let tables = (0..dictionary.table_count())
            .map(|index| {
                Ok(DictTable {
                    index,
                    location: dictionary.table_location(index)?,
                    tree: ChunkTree::new(version),
                })
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            dictionary,
            source,
            files: HashMap::new(),
            tables,
            names: Arc::new(NoNames),
        })
    }

    #[instrument(skip(self), err)]
    fn load_table(&mut self, index: usize) -> Result<Option<DictTable>> {
        let location = self.dictionary.table_location(index)?;

        let Some(stream) = self.block_data(location.table_block)? else {
            warn!(table = index, block = location.table_block, "table data is missing, skipping");
            return Ok(None);
        };

        let mut buffers = Vec::with_capacity(location.slots.len());
        for slot in &location.slots {
            let buffer = match slot {
                Some(block) => match self.block_data(*block)? {
                    Some(data) => Some(data),
                    None => {
                        warn!(table = index, block, "block data is missing, skipping table");
                        return Ok(None);
                    }
                },
                None => None,
            };
            buffers.push(buffer);
        }

        let tree = ChunkTree::decode(self.dictionary.version, stream, buffers, location.sections)
            .map_err(|e| match e {
                Error::TableOverrun { sections, .. } => Error::TableOverrun { index, sections },
                e => e,
            })?;
        debug!(table = index, roots = tree.roots().len(), "decoded table");

        Ok(Some(DictTable {
            index,
            location,
            tree,
        }))
    }

    /// Bind the root payloads of every table, except roots of region tables
    /// whose data is stored at the same place as a root of the global table.
    /// Those are linked to the global root instead.
    fn link_shared(&mut self) -> Result<()> {
        let Some((global, regions)) = self.tables.split_first_mut() else {
            return Ok(());
        };

        let mut keys = HashMap::new();
        if global.index == 0 && !regions.is_empty() {
            for (position, root) in global.tree.roots().to_vec().into_iter().enumerate() {
                if let Ok(key) = global.tree.location_key(root, &global.location.slots) {
                    keys.entry(key).or_insert(position);
                }
            }
        }
        for root in global.tree.roots().to_vec() {
            global.tree.bind(root)?;
        }

        for table in regions {
            let mut shared = 0;
            for root in table.tree.roots().to_vec() {
                let key = table.tree.location_key(root, &table.location.slots).ok();
                match key.and_then(|key| keys.get(&key)) {
                    Some(&position) => {
                        table.tree.bind_identity(root)?;
                        table.tree.set_shared(root, Some(position))?;
                        shared += 1;
                    }
                    None => table.tree.bind(root)?,
                }
            }
            debug!(table = table.index, shared, "linked region table");
        }
        Ok(())
    }

    /// Contents of a data file, loaded once
    pub fn source_file(&mut self, extension: &str) -> Result<Option<Bytes>> {
        if let Some(data) = self.files.get(extension) {
            return Ok(data.clone());
        }
        let data = self.source.load(extension)?;
        self.files.insert(extension.to_owned(), data.clone());
        Ok(data)
    }

    /// Decompressed contents of a block, `None` if its data file is missing
    pub fn block_data(&mut self, index: usize) -> Result<Option<Bytes>> {
        let block = self
            .dictionary
            .blocks
            .get(index)
            .ok_or(Error::BlockOutOfRange(index))?;
        if let Some(data) = block.cached() {
            return Ok(Some(data.clone()));
        }

        let extension = block.extension.clone();
        let Some(source) = self.source_file(&extension)? else {
            return Ok(None);
        };
        let compressed = self.dictionary.compressed;
        Ok(Some(self.dictionary.blocks[index].decompress(&source, compressed)))
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    pub fn version(&self) -> GameVersion {
        self.dictionary.version
    }

    pub fn names(&self) -> &dyn HashLookup {
        self.names.as_ref()
    }

    /// Replace the names used when displaying hashes
    pub fn set_names(&mut self, names: Arc<dyn HashLookup>) {
        self.names = names;
    }

    /// A hash as a name if known, hex otherwise
    pub fn display_hash(&self, hash: u32) -> String {
        self.names.display(hash)
    }

    /// The loaded tables, in dictionary order
    pub fn tables(&self) -> &[DictTable] {
        &self.tables
    }

    pub fn tables_mut(&mut self) -> &mut [DictTable] {
        &mut self.tables
    }

    /// Number of loaded tables
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Loaded table with dictionary index `index`
    pub fn table(&self, index: usize) -> Option<&DictTable> {
        self.tables.iter().find(|table| table.index == index)
    }

    pub fn table_mut(&mut self, index: usize) -> Option<&mut DictTable> {
        self.tables.iter_mut().find(|table| table.index == index)
    }

    /// Tree of the table with dictionary index `index`
    pub fn tree(&mut self, index: usize) -> Result<&mut ChunkTree> {
        self.table_mut(index)
            .map(|table| &mut table.tree)
            .ok_or(Error::TableNotFound(index))
    }

    /// The table region tables share their data with
    pub fn global(&self) -> Option<&DictTable> {
        self.table(0)
    }

    /// Follow a shared region root to the global root holding its data.
    ///
    /// Returns the dictionary index of the table and the node to read.
    pub fn resolve(&self, index: usize, node: NodeId) -> Result<(usize, NodeId)> {
        let table = self.table(index).ok_or(Error::TableNotFound(index))?;
        let shared = table.tree.node(node)?.shared();
        match (shared, self.global()) {
            (Some(position), Some(global)) if index != global.index => global
                .tree
                .roots()
                .get(position)
                .map(|&root| (global.index, root))
                .ok_or(Error::NodeNotFound(position)),
            _ => Ok((index, node)),
        }
    }

    /// Payload of a node, following shared roots to the global table
    pub fn payload(&self, index: usize, node: NodeId) -> Result<Option<Bytes>> {
        let (index, node) = self.resolve(index, node)?;
        let table = self.table(index).ok_or(Error::TableNotFound(index))?;
        Ok(table.tree.payload(node).cloned())
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use super::{DictArchive, OpenOptions};
    use crate::{
        dictionary::Dictionary, error::Result, source::MemorySource, types::ChunkType,
        version::GameVersion,
    };

    #[rustfmt::skip]
    const TABLE: [u8; 24] = [
        // file header, slot 1, 8 bytes at 0
        0x01, 0x13, 0x00, 0x10, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        // script body, slot 1, 4 bytes at 8
        0x00, 0x50, 0x00, 0x10, 0x04, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00,
    ];

    #[rustfmt::skip]
    const DATA: [u8; 12] = [
        0x07, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00,
        b'b', b'o', b'o', b'!',
    ];

    /// Blocks 0 and 1 hold a table each, block 2 the chunk data
    fn dictionary() -> Dictionary {
        let mut dict = Dictionary::new(GameVersion::MetroidFed);
        for _ in 0..3 {
            dict.add_block(".data");
        }
        dict.add_reference(0x1234, &[0, 2]);
        dict.references[0].section_count = 2;
        dict.references[0].file_count = 1;

        dict.blocks[0].decompressed_size = TABLE.len() as u32;
        dict.blocks[1].offset = 24;
        dict.blocks[1].decompressed_size = TABLE.len() as u32;
        dict.blocks[2].offset = 48;
        dict.blocks[2].decompressed_size = DATA.len() as u32;
        dict
    }

    fn data_file() -> Bytes {
        let mut data = TABLE.to_vec();
        data.extend_from_slice(&TABLE);
        data.extend_from_slice(&DATA);
        data.into()
    }

    #[test]
    fn load_single_table() -> Result<()> {
        let source = MemorySource::new().with(".data", data_file());
        let mut archive = DictArchive::new(dictionary(), source, OpenOptions::default())?;
        assert_eq!(archive.len(), 1);

        let tree = archive.tree(0)?;
        let file = tree.roots()[0];
        let node = tree.node(file)?;
        assert_eq!(node.record.kind, ChunkType::Script);
        assert_eq!(node.file_header().map(|h| (h.hash_type, h.file_path)), Some((7, 9)));
        assert_eq!(archive.payload(0, file)?.as_deref(), Some(&b"boo!"[..]));
        assert_eq!(archive.display_hash(0x1234), "00001234");
        Ok(())
    }

    #[traced_test]
    #[test]
    fn missing_data_file_skips_table() -> Result<()> {
        let mut dict = dictionary();
        dict.add_block(".debug");
        dict.references[0].block_indices[2] = 3;

        let source = MemorySource::new().with(".data", data_file());
        let archive = DictArchive::new(dict, source, OpenOptions::default())?;
        assert!(archive.is_empty());
        assert!(logs_contain("block data is missing"));
        Ok(())
    }

    #[traced_test]
    #[test]
    fn overrun_skips_table() -> Result<()> {
        let mut dict = dictionary();
        dict.references[0].section_count = 5;

        let source = MemorySource::new().with(".data", data_file());
        let archive = DictArchive::new(dict, source, OpenOptions::default())?;
        assert!(archive.is_empty());
        assert!(logs_contain("skipping malformed table"));
        Ok(())
    }

    #[test]
    fn region_roots_link_to_global() -> Result<()> {
        let mut dict = dictionary();
        // the region table points at the same chunk data as the global table
        dict.add_reference(0x5678, &[0, 2]);
        dict.references[1].section_count = 2;
        dict.references[1].file_count = 1;

        let source = MemorySource::new().with(".data", data_file());
        let archive = DictArchive::new(dict, source, OpenOptions::default())?;
        assert_eq!(archive.len(), 2);

        let region = archive.table(1).expect("region table");
        let root = region.tree.roots()[0];
        assert_eq!(region.tree.node(root)?.shared(), Some(0));
        assert!(region.tree.payload(root).is_none());
        assert_eq!(region.tree.find_file(9), Some(root));

        let global = archive.global().expect("global table");
        assert_eq!(archive.resolve(1, root)?, (0, global.tree.roots()[0]));
        assert_eq!(archive.payload(1, root)?.as_deref(), Some(&b"boo!"[..]));
        Ok(())
    }

    #[test]
    fn create_gives_empty_trees() -> Result<()> {
        let mut dict = Dictionary::new(GameVersion::Lm3);
        dict.add_block(".data");
        dict.add_block(".data");
        dict.add_reference(1, &[]);
        dict.add_reference(2, &[]);

        let archive = DictArchive::create(dict, MemorySource::new())?;
        assert_eq!(archive.len(), 2);
        assert!(archive.tables().iter().all(|t| t.tree.roots().is_empty()));
        Ok(())
    }
}
