//! Types for writing dictionary archives
//!

use std::{
    collections::HashMap,
    fs,
    io::Cursor,
    path::Path,
};

use binrw::BinWrite;
use bon::Builder;
use bytes::Bytes;
use indexmap::IndexMap;
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    block::Block,
    error::{Error, Result},
    read::DictArchive,
    source::{DataSource, FsSource},
    tree::{ChunkTree, NodeId, MAX_DEPTH},
    types::ChunkRecord,
    version::{BitField, VersionPolicy},
};

/// Options for how the archive should be written
#[derive(Debug, Clone, Copy, Builder)]
pub struct DictWriterOptions {
    /// Store blocks compressed, keeps the setting of the source dictionary when unset
    pub compress: Option<bool>,

    /// Store region roots whose content matches a root of the global table only once
    #[builder(default = true)]
    pub dedupe: bool,
}

impl Default for DictWriterOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// The files making up a written archive
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WrittenArchive {
    /// Contents of the `.dict` file
    pub dict: Vec<u8>,
    /// Data files keyed by extension, in the order they were first used
    pub files: IndexMap<String, Vec<u8>>,
}

impl WrittenArchive {
    /// Write the dictionary to `dict_path` and each data file next to it
    #[instrument(skip(self, dict_path), fields(path = %dict_path.as_ref().display()), err)]
    pub fn save(&self, dict_path: impl AsRef<Path>) -> Result<()> {
        let dict_path = dict_path.as_ref();
        fs::write(dict_path, &self.dict)?;

        let source = FsSource::new(dict_path);
        for (extension, data) in &self.files {
            let path = source.path_for(extension);
            fs::write(&path, data)?;
            debug!(path = %path.display(), size = data.len(), "wrote data file");
        }
        Ok(())
    }
}

/// A chunk placed for writing. Leaf records already point at their new
/// payload location, the child runs are assigned when the table is laid out.
#[derive(Debug, Clone, PartialEq)]
struct Draft {
    record: ChunkRecord,
    header: Option<ChunkRecord>,
    children: Vec<Draft>,
}

impl Draft {
    fn slot_count(&self) -> usize {
        if self.header.is_some() {
            2
        } else {
            1
        }
    }

    fn is_leaf(&self) -> bool {
        !self.record.flags.has_children()
    }
}

/// Chunk data appended to each block while the tables are drafted
struct Layout {
    policy: &'static VersionPolicy,
    blocks: Vec<Option<Vec<u8>>>,
}

impl Layout {
    /// Append `data` to the block behind the slot of `record`, aligned for its flags
    fn place(
        &mut self,
        mut record: ChunkRecord,
        data: &[u8],
        slots: &[Option<usize>],
    ) -> Result<ChunkRecord> {
        let slot = record.flags.block_index(self.policy.block_index);
        let Some(block) = slots.get(slot).copied().flatten() else {
            // empty placeholders may point anywhere
            if data.is_empty() {
                record.size = 0;
                return Ok(record);
            }
            return Err(Error::UnmappedBlockSlot(slot));
        };

        let buffer = self
            .blocks
            .get_mut(block)
            .ok_or(Error::BlockOutOfRange(block))?
            .get_or_insert_with(Vec::new);
        let offset = buffer
            .len()
            .next_multiple_of(self.policy.data_alignment(record.flags.0));
        buffer.resize(offset, 0);
        buffer.extend_from_slice(data);

        record.offset = offset as u32;
        record.size = data.len() as u32;
        Ok(record)
    }

    fn draft(
        &mut self,
        tree: &mut ChunkTree,
        id: NodeId,
        slots: &[Option<usize>],
        depth: usize,
    ) -> Result<Draft> {
        if depth > MAX_DEPTH {
            return Err(Error::CustomError(format!(
                "chunk {} nests deeper than {MAX_DEPTH} levels",
                id.index()
            )));
        }

        let children = tree.children(id)?.to_vec();
        let node = tree.node(id)?.clone();
        let header = node
            .file_header()
            .map(|header| self.place(header.record, &header.payload(), slots))
            .transpose()?;

        if node.is_leaf() {
            if node.payload().is_none() && node.record.size > 0 {
                warn!(
                    node = id.index(),
                    size = node.record.size,
                    "payload was never read, writing the chunk empty"
                );
            }
            let payload = node.payload().cloned().unwrap_or_default();
            return Ok(Draft {
                record: self.place(node.record, &payload, slots)?,
                header,
                children: Vec::new(),
            });
        }

        let children = children
            .into_iter()
            .map(|child| self.draft(tree, child, slots, depth + 1))
            .collect::<Result<Vec<_>>>()?;
        Ok(Draft {
            record: node.record,
            header,
            children,
        })
    }
}

/// Drafted roots of the global table, for region tables to link against
struct GlobalDrafts {
    slots: Vec<Option<usize>>,
    roots: Vec<Draft>,
    /// The global table as it was written
    tree: ChunkTree,
    /// Content hash to the positions of the roots with that hash
    hashes: HashMap<u32, Vec<usize>>,
}

/// Move the block slot of `record` from one slot map to another
fn relink_record(
    record: &mut ChunkRecord,
    from: &[Option<usize>],
    to: &[Option<usize>],
    field: BitField,
) -> Option<()> {
    let slot = record.flags.block_index(field);
    let Some(block) = from.get(slot).copied().flatten() else {
        return Some(());
    };
    let target = to.iter().position(|mapped| *mapped == Some(block))?;
    record.flags = record.flags.with_block_index(field, target);
    Some(())
}

/// Rewrite the slots of a global draft for a region table, `None` if the
/// region does not map one of the blocks the draft is stored in
fn relink(
    mut draft: Draft,
    from: &[Option<usize>],
    to: &[Option<usize>],
    field: BitField,
) -> Option<Draft> {
    if let Some(header) = &mut draft.header {
        relink_record(header, from, to, field)?;
    }
    if draft.is_leaf() {
        relink_record(&mut draft.record, from, to, field)?;
    }
    draft.children = draft
        .children
        .into_iter()
        .map(|child| relink(child, from, to, field))
        .collect::<Option<Vec<_>>>()?;
    Some(draft)
}

/// Give every chunk with children its run of records, in the order the runs
/// are written by [`write_children`]
fn assign_runs(draft: &mut Draft, next: &mut usize) {
    if draft.is_leaf() {
        return;
    }
    let count = draft.children.iter().map(Draft::slot_count).sum::<usize>();
    draft.record.offset = *next as u32;
    draft.record.size = count as u32;
    *next += count;

    for child in &mut draft.children {
        assign_runs(child, next);
    }
}

fn write_run(run: &[Draft], out: &mut Cursor<Vec<u8>>) -> Result<()> {
    for draft in run {
        if let Some(header) = &draft.header {
            header.write(out)?;
        }
        draft.record.write(out)?;
    }
    Ok(())
}

fn write_children(draft: &Draft, out: &mut Cursor<Vec<u8>>) -> Result<()> {
    if draft.is_leaf() {
        return Ok(());
    }
    write_run(&draft.children, out)?;
    for child in &draft.children {
        write_children(child, out)?;
    }
    Ok(())
}

/// Flatten drafted roots into a table stream: the roots first, then the child
/// runs depth first
fn linearize(mut roots: Vec<Draft>) -> Result<Vec<u8>> {
    let mut next = roots.iter().map(Draft::slot_count).sum::<usize>();
    for root in &mut roots {
        assign_runs(root, &mut next);
    }

    let mut out = Cursor::new(Vec::new());
    write_run(&roots, &mut out)?;
    for root in &roots {
        write_children(root, &mut out)?;
    }
    Ok(out.into_inner())
}

/// Dictionary archive generator
///
/// Every loaded table is laid out again. Chunk payloads are packed into fresh
/// block buffers, the tables are flattened into their table blocks, and blocks
/// no table writes to are carried over from the source data files.
///
/// ```no_run
/// # fn doit() -> nlg_dict::error::Result<()> {
/// use nlg_dict::{DictArchive, DictWriter, OpenOptions, write::DictWriterOptions};
///
/// let mut archive = DictArchive::open("level.dict", OpenOptions::default())?;
/// let written = DictWriter::new(DictWriterOptions::builder().compress(true).build())
///     .write(&mut archive)?;
/// written.save("repacked/level.dict")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct DictWriter {
    options: DictWriterOptions,
}

impl DictWriter {
    pub fn new(options: DictWriterOptions) -> Self {
        Self { options }
    }

    /// Serialize `archive`. The archive itself is left as it was, so writing
    /// twice gives the same files.
    #[instrument(skip_all, err)]
    pub fn write<S: DataSource>(&self, archive: &mut DictArchive<S>) -> Result<WrittenArchive> {
        let mut dictionary = archive.dictionary().clone();
        let policy = dictionary.version.policy();
        let block_count = dictionary.blocks.len();

        let mut layout = Layout {
            policy,
            blocks: vec![None; block_count],
        };
        let mut streams: Vec<Option<Vec<u8>>> = vec![None; block_count];
        let mut global: Option<GlobalDrafts> = None;

        for table in archive.tables_mut() {
            let slots = table.location.slots.clone();
            let mut drafts = Vec::with_capacity(table.tree.roots().len());
            let mut linked = 0;

            for root in table.tree.roots().to_vec() {
                if let Some(draft) = self.link(&mut table.tree, root, &slots, global.as_mut())? {
                    drafts.push(draft);
                    linked += 1;
                    continue;
                }
                if table.tree.node(root)?.shared().is_some() {
                    debug!(table = table.index, "unable to link shared root, writing a copy");
                }
                drafts.push(layout.draft(&mut table.tree, root, &slots, 0)?);
            }

            let sections = drafts.iter().map(Draft::slot_count).sum::<usize>();
            dictionary.set_table_counts(&table.location, sections, drafts.len())?;

            if table.index == 0 {
                let mut hashes: HashMap<u32, Vec<usize>> = HashMap::new();
                if self.options.dedupe {
                    for (position, root) in table.tree.roots().to_vec().into_iter().enumerate() {
                        hashes
                            .entry(table.tree.content_hash(root)?)
                            .or_default()
                            .push(position);
                    }
                }
                global = Some(GlobalDrafts {
                    slots: slots.clone(),
                    roots: drafts.clone(),
                    tree: table.tree.clone(),
                    hashes,
                });
            }

            let stream = streams
                .get_mut(table.location.table_block)
                .ok_or(Error::BlockOutOfRange(table.location.table_block))?;
            if stream.is_some() {
                return Err(Error::CustomError(format!(
                    "block {} holds more than one table",
                    table.location.table_block
                )));
            }
            *stream = Some(linearize(drafts)?);
            debug!(table = table.index, sections, linked, "laid out table");
        }

        let mut regenerated = Vec::with_capacity(block_count);
        for (index, (stream, data)) in streams.into_iter().zip(layout.blocks).enumerate() {
            regenerated.push(match (stream, data) {
                (Some(_), Some(_)) => {
                    return Err(Error::CustomError(format!(
                        "block {index} holds both a table and chunk data"
                    )))
                }
                (stream, data) => stream.or(data),
            });
        }

        let compressed = self.options.compress.unwrap_or(dictionary.compressed);
        let mut stored = Vec::with_capacity(block_count);
        for (block, data) in dictionary.blocks.iter_mut().zip(regenerated) {
            stored.push(match data {
                Some(data) => Some(block.compress(data.into(), compressed)?),
                None => Self::reload(archive, block, compressed)?,
            });
        }
        dictionary.compressed = compressed;

        let files = Self::pack(&mut dictionary.blocks, stored, policy.data_file_alignment)?;

        let mut dict = Vec::new();
        dictionary.write(&mut dict)?;
        info!(
            blocks = block_count,
            files = files.len(),
            compressed,
            "wrote dictionary"
        );
        Ok(WrittenArchive { dict, files })
    }

    /// Draft of the global root a region root shares its data with, if any.
    ///
    /// The root shared at load time is tried first, then with dedupe on every
    /// global root with the same content hash. A candidate is only linked when
    /// its content matches the region root byte for byte.
    fn link(
        &self,
        tree: &mut ChunkTree,
        root: NodeId,
        slots: &[Option<usize>],
        global: Option<&mut GlobalDrafts>,
    ) -> Result<Option<Draft>> {
        let Some(global) = global else {
            return Ok(None);
        };

        // shared roots load without their payload
        tree.bind_payload(root)?;
        let shared = tree.node(root)?.shared();
        let mut candidates = shared.into_iter().collect::<Vec<_>>();
        if self.options.dedupe {
            let hash = tree.content_hash(root)?;
            let matches = global.hashes.get(&hash).into_iter().flatten();
            candidates.extend(matches.filter(|&&position| Some(position) != shared));
        }

        let field = tree.version().policy().block_index;
        for position in candidates {
            let (Some(draft), Some(&target)) =
                (global.roots.get(position), global.tree.roots().get(position))
            else {
                continue;
            };
            if !tree.same_content(root, &mut global.tree, target)? {
                trace!(root = root.index(), position, "content differs from the global root");
                continue;
            }
            if let Some(linked) = relink(draft.clone(), &global.slots, slots, field) {
                trace!(root = root.index(), position, "linked root to global table");
                return Ok(Some(linked));
            }
        }
        Ok(None)
    }

    /// Stored bytes of a block no table wrote to, taken from the source files
    fn reload<S: DataSource>(
        archive: &mut DictArchive<S>,
        block: &mut Block,
        compressed: bool,
    ) -> Result<Option<Bytes>> {
        if block.decompressed_size == 0 {
            block.compressed_size = 0;
            return Ok(Some(Bytes::new()));
        }

        let source_compressed = archive.dictionary().compressed;
        if compressed != source_compressed {
            return match archive.block_data(block.index)? {
                Some(data) => Ok(Some(block.compress(data, compressed)?)),
                None => Ok(None),
            };
        }

        let size = block.stored_size(compressed) as usize;
        if size == 0 {
            return Ok(Some(Bytes::new()));
        }
        let Some(file) = archive.source_file(&block.extension)? else {
            return Ok(None);
        };
        let start = block.offset as usize;
        match start.checked_add(size) {
            Some(end) if end <= file.len() => Ok(Some(file.slice(start..end))),
            _ => Ok(None),
        }
    }

    /// Concatenate the stored blocks of each extension into one data file
    fn pack(
        blocks: &mut [Block],
        stored: Vec<Option<Bytes>>,
        alignment: usize,
    ) -> Result<IndexMap<String, Vec<u8>>> {
        let mut files: IndexMap<String, Vec<u8>> = IndexMap::new();
        for (block, data) in blocks.iter_mut().zip(stored) {
            let Some(data) = data else {
                warn!(block = block.index, "block data is unavailable, keeping its old location");
                continue;
            };
            if data.is_empty() {
                block.offset = files.get(&block.extension).map_or(0, |file| file.len() as u32);
                continue;
            }

            let file = files.entry(block.extension.clone()).or_default();
            let offset = file.len().next_multiple_of(alignment);
            if offset > u32::MAX as usize {
                return Err(Error::CustomError(format!(
                    "data file {} grows past 4 GiB",
                    block.extension
                )));
            }
            file.resize(offset, 0);
            file.extend_from_slice(&data);
            block.offset = offset as u32;
        }
        Ok(files)
    }
}
