//! Lazily expanded forest of chunks decoded from one chunk table.
//!
//! Only the root records are decoded when a table is read. The children of a
//! chunk are decoded the first time [`ChunkTree::children`] is asked for them:
//! a chunk with children stores the record index of its first child in
//! `offset` and the number of child records in `size`, so the run starts at
//! byte `offset * 12` of the table stream.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Payloads are
//! [`Bytes`] views into the decompressed blocks, so the block buffer stays
//! alive for as long as any payload still points into it.

use std::io::Cursor;

use binrw::BinRead;
use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use crc::{Crc, CRC_32_ISO_HDLC};
use tracing::{instrument, trace, warn};

use crate::{
    error::{Error, Result},
    types::{ChunkFlags, ChunkRecord, ChunkType, CHUNK_SIZE},
    version::{GameVersion, VersionPolicy},
};

const CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Nesting deeper than this is treated as a cycle in the table
pub const MAX_DEPTH: usize = 64;

/// Size of the payload behind a file header record
pub const FILE_HEADER_SIZE: usize = 8;

/// Stable handle of a node inside a [`ChunkTree`]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Identity of a file entry, stored in the record preceding its body
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub record: ChunkRecord,
    /// Hash of the kind of asset
    pub hash_type: u32,
    /// Hash of the asset path
    pub file_path: u32,
}

impl FileHeader {
    /// The eight byte payload the header record points at
    pub fn payload(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut data = [0u8; FILE_HEADER_SIZE];
        LittleEndian::write_u32(&mut data[0..4], self.hash_type);
        LittleEndian::write_u32(&mut data[4..8], self.file_path);
        data
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// A plain chunk occupying one record
    Entry,
    /// A chunk preceded by a file header record
    File(FileHeader),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expansion {
    Leaf,
    Unexpanded,
    Expanded(Vec<NodeId>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub record: ChunkRecord,
    pub kind: NodeKind,
    children: Expansion,
    payload: Option<Bytes>,
    shared: Option<usize>,
}

impl Node {
    fn new(record: ChunkRecord, kind: NodeKind) -> Self {
        let children = match (record.flags.has_children(), record.size) {
            (false, _) => Expansion::Leaf,
            (true, 0) => Expansion::Expanded(Vec::new()),
            (true, _) => Expansion::Unexpanded,
        };
        Self {
            record,
            kind,
            children,
            payload: None,
            shared: None,
        }
    }

    pub fn kind_tag(&self) -> ChunkType {
        self.record.kind
    }

    pub fn file_header(&self) -> Option<&FileHeader> {
        match &self.kind {
            NodeKind::File(header) => Some(header),
            NodeKind::Entry => None,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File(_))
    }

    /// Whether this node carries a payload rather than children
    pub fn is_leaf(&self) -> bool {
        self.children == Expansion::Leaf
    }

    pub fn is_expanded(&self) -> bool {
        !matches!(self.children, Expansion::Unexpanded)
    }

    /// Records this node occupies in a table
    pub fn slot_count(&self) -> usize {
        if self.is_file() {
            2
        } else {
            1
        }
    }

    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Root index in the global table this region root is shared with
    pub fn shared(&self) -> Option<usize> {
        self.shared
    }
}

/// The stored ranges of a subtree, see [`ChunkTree::location_key`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocationKey {
    kind: ChunkType,
    /// Block, offset and size of each range, `None` for unmapped slots
    ranges: Vec<(Option<usize>, u32, u32)>,
}

/// Forest of chunks of one table
#[derive(Debug, Clone)]
pub struct ChunkTree {
    version: GameVersion,
    stream: Bytes,
    buffers: Vec<Option<Bytes>>,
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
}

fn next_record(cursor: &mut Cursor<&[u8]>) -> Option<ChunkRecord> {
    let remaining = (cursor.get_ref().len() as u64).saturating_sub(cursor.position());
    if remaining < CHUNK_SIZE as u64 {
        return None;
    }
    ChunkRecord::read(cursor).ok()
}

impl ChunkTree {
    /// An empty tree, for building tables from scratch
    pub fn new(version: GameVersion) -> Self {
        Self {
            version,
            stream: Bytes::new(),
            buffers: Vec::new(),
            nodes: Vec::new(),
            roots: Vec::new(),
        }
    }

    /// Decode the root records of a table and bind their payloads.
    ///
    /// `buffers` maps the block slot of a chunk onto the decompressed block,
    /// `sections` is the number of records at the root (file entries count
    /// twice).
    pub fn read(
        version: GameVersion,
        stream: Bytes,
        buffers: Vec<Option<Bytes>>,
        sections: usize,
    ) -> Result<Self> {
        let mut tree = Self::decode(version, stream, buffers, sections)?;
        for root in tree.roots.clone() {
            tree.bind(root)?;
        }
        Ok(tree)
    }

    /// Decode the root records without binding any payload
    #[instrument(skip(stream, buffers), fields(len = stream.len()), err)]
    pub(crate) fn decode(
        version: GameVersion,
        stream: Bytes,
        buffers: Vec<Option<Bytes>>,
        sections: usize,
    ) -> Result<Self> {
        let mut tree = Self {
            version,
            stream,
            buffers,
            nodes: Vec::new(),
            roots: Vec::new(),
        };
        tree.roots = tree
            .decode_run(0, sections)
            .ok_or(Error::TableOverrun {
                index: 0,
                sections,
            })?;
        Ok(tree)
    }

    /// Decode `count` records starting at record `start`, `None` if the
    /// stream ends first
    fn decode_run(&mut self, start: usize, count: usize) -> Option<Vec<NodeId>> {
        let mark = self.nodes.len();
        let ids = self.decode_records(start, count);
        if ids.is_none() {
            self.nodes.truncate(mark);
        }
        ids
    }

    fn decode_records(&mut self, start: usize, count: usize) -> Option<Vec<NodeId>> {
        let stream = self.stream.clone();
        let mut cursor = Cursor::new(stream.as_ref());
        cursor.set_position(start.checked_mul(CHUNK_SIZE)? as u64);

        let mut ids = Vec::new();
        let mut slot = 0;
        while slot < count {
            let record = next_record(&mut cursor)?;
            let node = if record.is_file_header() {
                let body = next_record(&mut cursor)?;
                Node::new(
                    body,
                    NodeKind::File(FileHeader {
                        record,
                        hash_type: 0,
                        file_path: 0,
                    }),
                )
            } else {
                Node::new(record, NodeKind::Entry)
            };
            slot += node.slot_count();
            ids.push(self.push(node));
        }
        trace!(start, count, decoded = ids.len(), "decoded chunk run");
        Some(ids)
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn version(&self) -> GameVersion {
        self.version
    }

    fn policy(&self) -> &'static VersionPolicy {
        self.version.policy()
    }

    /// The decompressed table stream this tree was decoded from
    pub fn stream(&self) -> &Bytes {
        &self.stream
    }

    /// The decompressed block behind a block slot
    pub fn buffer(&self, slot: usize) -> Option<&Bytes> {
        self.buffers.get(slot).and_then(Option::as_ref)
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Number of nodes materialized so far
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.0).ok_or(Error::NodeNotFound(id.0))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id.0).ok_or(Error::NodeNotFound(id.0))
    }

    /// Block slot of a record under this tree's version
    pub fn block_slot(&self, record: &ChunkRecord) -> usize {
        record.flags.block_index(self.policy().block_index)
    }

    fn slice(&self, record: &ChunkRecord) -> Option<Bytes> {
        let buffer = self.buffer(self.block_slot(record))?;
        let start = record.offset as usize;
        let end = start.checked_add(record.size as usize)?;
        (end <= buffer.len()).then(|| buffer.slice(start..end))
    }

    /// Decode the identity of a file entry and attach the payload of a leaf
    pub(crate) fn bind(&mut self, id: NodeId) -> Result<()> {
        self.bind_identity(id)?;
        self.bind_payload(id)
    }

    /// Read the hash type and path of a file entry from its header payload
    pub(crate) fn bind_identity(&mut self, id: NodeId) -> Result<()> {
        let Some(header) = self.node(id)?.file_header() else {
            return Ok(());
        };
        let Some(data) = self
            .slice(&header.record)
            .filter(|data| data.len() >= FILE_HEADER_SIZE)
        else {
            warn!(node = id.0, "file header payload out of range");
            return Ok(());
        };

        if let NodeKind::File(header) = &mut self.nodes[id.0].kind {
            header.hash_type = LittleEndian::read_u32(&data[0..4]);
            header.file_path = LittleEndian::read_u32(&data[4..8]);
        }
        Ok(())
    }

    /// Attach the payload of a leaf that has none yet
    pub(crate) fn bind_payload(&mut self, id: NodeId) -> Result<()> {
        let node = self.node(id)?;
        if !node.is_leaf() || node.payload.is_some() {
            return Ok(());
        }
        match self.slice(&node.record) {
            Some(payload) => self.nodes[id.0].payload = Some(payload),
            None => trace!(node = id.0, "payload out of range"),
        }
        Ok(())
    }

    /// Children of a node, decoding them on first access.
    ///
    /// A run that walks past the end of the table stream is cut short and
    /// logged rather than failing. Leaves have no children.
    pub fn children(&mut self, id: NodeId) -> Result<&[NodeId]> {
        let node = self.node(id)?;
        if node.children == Expansion::Unexpanded {
            let (start, count) = (node.record.offset as usize, node.record.size as usize);
            let ids = match self.decode_run(start, count) {
                Some(ids) => ids,
                None => {
                    warn!(node = id.0, start, count, "child run passes the end of the table");
                    self.decode_partial(start, count)
                }
            };
            for &child in &ids {
                self.bind(child)?;
            }
            self.nodes[id.0].children = Expansion::Expanded(ids);
        }

        match &self.node(id)?.children {
            Expansion::Expanded(ids) => Ok(ids),
            _ => Ok(&[]),
        }
    }

    /// Decode as many whole entries of a run as the stream holds
    fn decode_partial(&mut self, start: usize, count: usize) -> Vec<NodeId> {
        let available = (self.stream.len() / CHUNK_SIZE).saturating_sub(start);
        let mut take = count.min(available);
        // a trailing file header without its body shortens the run by one more
        while take > 0 {
            if let Some(ids) = self.decode_run(start, take) {
                return ids;
            }
            take -= 1;
        }
        Vec::new()
    }

    /// Decode every chunk of the tree
    pub fn expand_all(&mut self) -> Result<()> {
        let mut pending: Vec<(NodeId, usize)> = self.roots.iter().map(|&id| (id, 0)).collect();
        while let Some((id, depth)) = pending.pop() {
            if depth > MAX_DEPTH {
                return Err(Error::CustomError(format!(
                    "chunk {} nests deeper than {MAX_DEPTH} levels",
                    id.0
                )));
            }
            pending.extend(self.children(id)?.iter().map(|&child| (child, depth + 1)));
        }
        Ok(())
    }

    pub fn payload(&self, id: NodeId) -> Option<&Bytes> {
        self.nodes.get(id.0).and_then(Node::payload)
    }

    /// Replace the payload of a leaf, updating its size
    pub fn set_payload(&mut self, id: NodeId, data: impl Into<Bytes>) -> Result<()> {
        let data = data.into();
        let node = self.node_mut(id)?;
        if !node.is_leaf() {
            return Err(Error::CustomError(format!(
                "chunk {} has children and cannot hold a payload",
                id.0
            )));
        }
        node.record.size = data.len() as u32;
        node.payload = Some(data);
        Ok(())
    }

    pub fn set_shared(&mut self, id: NodeId, global_root: Option<usize>) -> Result<()> {
        self.node_mut(id)?.shared = global_root;
        Ok(())
    }

    /// Point a chunk, and the header of a file entry, at block slot `slot`
    pub fn set_block_slot(&mut self, id: NodeId, slot: usize) -> Result<()> {
        let field = self.policy().block_index;
        let node = self.node_mut(id)?;
        node.record.flags = node.record.flags.with_block_index(field, slot);
        if let NodeKind::File(header) = &mut node.kind {
            header.record.flags = header.record.flags.with_block_index(field, slot);
        }
        Ok(())
    }

    /// Alignment of the payload of a node inside its block
    pub fn data_alignment(&self, id: NodeId) -> Result<usize> {
        Ok(self.policy().data_alignment(self.node(id)?.record.flags.0))
    }

    /// A record for a new chunk using the defaults of this version
    fn default_record(&self, kind: ChunkType, has_parent: bool) -> ChunkRecord {
        let alignment = match kind {
            ChunkType::Texture | ChunkType::TextureData => 0x120,
            ChunkType::FileHeader => 0x40,
            _ => 0x60,
        };
        let flags = self.policy().default_flags(kind).unwrap_or(
            ChunkFlags::default()
                .with_alignment(alignment)
                .with_parent(has_parent)
                .0,
        );
        ChunkRecord::new(kind, flags)
    }

    fn file_kind(&self, hash_type: u32, file_path: u32) -> NodeKind {
        let mut record = self.default_record(ChunkType::FileHeader, false);
        record.size = FILE_HEADER_SIZE as u32;
        NodeKind::File(FileHeader {
            record,
            hash_type,
            file_path,
        })
    }

    pub fn add_root(&mut self, kind: ChunkType) -> NodeId {
        let node = Node::new(self.default_record(kind, false), NodeKind::Entry);
        let id = self.push(node);
        self.roots.push(id);
        id
    }

    pub fn add_file_root(&mut self, kind: ChunkType, hash_type: u32, file_path: u32) -> NodeId {
        let file = self.file_kind(hash_type, file_path);
        let id = self.push(Node::new(self.default_record(kind, false), file));
        self.roots.push(id);
        id
    }

    pub fn add_child(&mut self, parent: NodeId, kind: ChunkType) -> Result<NodeId> {
        let node = Node::new(self.default_record(kind, true), NodeKind::Entry);
        let child = self.push(node);
        self.attach_child(parent, child)?;
        Ok(child)
    }

    pub fn add_file_child(
        &mut self,
        parent: NodeId,
        kind: ChunkType,
        hash_type: u32,
        file_path: u32,
    ) -> Result<NodeId> {
        let file = self.file_kind(hash_type, file_path);
        let child = self.push(Node::new(self.default_record(kind, true), file));
        self.attach_child(parent, child)?;
        Ok(child)
    }

    /// Append an existing node to the children of `parent`.
    ///
    /// A leaf parent turns into a chunk with children and drops its payload.
    pub fn attach_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.node(child)?;
        self.children(parent)?;

        let node = self.node_mut(child)?;
        node.record.flags = node.record.flags.with_parent(true);
        let node = self.node_mut(parent)?;
        node.record.flags = node.record.flags.with_children(true);
        node.payload = None;
        match &mut node.children {
            Expansion::Expanded(ids) => ids.push(child),
            children => *children = Expansion::Expanded(vec![child]),
        }
        Ok(())
    }

    /// Deep copy a subtree inside this tree, sharing payload buffers
    pub fn clone_subtree(&mut self, id: NodeId) -> Result<NodeId> {
        self.clone_at(id, 0)
    }

    fn clone_at(&mut self, id: NodeId, depth: usize) -> Result<NodeId> {
        if depth > MAX_DEPTH {
            return Err(Error::CustomError(format!("chunk {} nests too deep", id.0)));
        }
        let children = self.children(id)?.to_vec();
        let copies = children
            .into_iter()
            .map(|child| self.clone_at(child, depth + 1))
            .collect::<Result<Vec<_>>>()?;

        let mut node = self.node(id)?.clone();
        if !node.is_leaf() {
            node.children = Expansion::Expanded(copies);
        }
        Ok(self.push(node))
    }

    /// Hash of the logical content of a subtree: types, file identity and
    /// payload bytes, independent of where the data is stored
    pub fn content_hash(&mut self, id: NodeId) -> Result<u32> {
        self.content_hash_at(id, 0)
    }

    fn content_hash_at(&mut self, id: NodeId, depth: usize) -> Result<u32> {
        if depth > MAX_DEPTH {
            return Err(Error::CustomError(format!("chunk {} nests too deep", id.0)));
        }
        let children = self.children(id)?.to_vec();
        let child_hashes = children
            .into_iter()
            .map(|child| self.content_hash_at(child, depth + 1))
            .collect::<Result<Vec<_>>>()?;

        let node = self.node(id)?;
        let mut digest = CRC.digest();
        digest.update(&u16::from(node.record.kind).to_le_bytes());
        if let Some(header) = node.file_header() {
            digest.update(&header.payload());
        }
        if node.is_leaf() {
            digest.update(&[0]);
            if let Some(payload) = node.payload() {
                digest.update(payload);
            }
        } else {
            digest.update(&[1]);
            child_hashes
                .iter()
                .for_each(|hash| digest.update(&hash.to_le_bytes()));
        }
        Ok(digest.finalize())
    }

    /// Whether a subtree holds the same types, file identities and payload
    /// bytes as the subtree at `other_id` in `other`, wherever either is stored
    pub fn same_content(
        &mut self,
        id: NodeId,
        other: &mut ChunkTree,
        other_id: NodeId,
    ) -> Result<bool> {
        let mut pending = vec![(id, other_id, 0)];
        while let Some((left, right, depth)) = pending.pop() {
            if depth > MAX_DEPTH {
                return Err(Error::CustomError(format!("chunk {} nests too deep", left.0)));
            }
            let left_children = self.children(left)?.to_vec();
            let right_children = other.children(right)?.to_vec();

            let (a, b) = (self.node(left)?, other.node(right)?);
            let bytes: fn(&Node) -> &[u8] = |node| node.payload().map_or(&[][..], |payload| payload.as_ref());
            if a.record.kind != b.record.kind
                || a.is_leaf() != b.is_leaf()
                || a.file_header().map(FileHeader::payload) != b.file_header().map(FileHeader::payload)
                || bytes(a) != bytes(b)
                || left_children.len() != right_children.len()
            {
                return Ok(false);
            }
            pending.extend(
                left_children
                    .into_iter()
                    .zip(right_children)
                    .map(|(left, right)| (left, right, depth + 1)),
            );
        }
        Ok(true)
    }

    /// Where a subtree's data is stored: the block, offset and size of the
    /// file header, or of every leaf for chunks that are not files.
    ///
    /// Two tables referring to the same stored data produce equal keys as
    /// long as their slots resolve to the same blocks.
    pub fn location_key(&mut self, id: NodeId, slots: &[Option<usize>]) -> Result<LocationKey> {
        let node = self.node(id)?;
        let kind = node.record.kind;

        let mut leaves = Vec::new();
        match node.file_header() {
            // the header already pins the file to one place in a block
            Some(header) => leaves.push(header.record),
            None => {
                let mut pending = vec![(id, 0)];
                while let Some((current, depth)) = pending.pop() {
                    if depth > MAX_DEPTH {
                        return Err(Error::CustomError(format!(
                            "chunk {} nests too deep",
                            current.0
                        )));
                    }
                    let children = self.children(current)?.to_vec();
                    let node = self.node(current)?;
                    if node.is_leaf() {
                        leaves.push(node.record);
                    }
                    pending.extend(children.into_iter().rev().map(|child| (child, depth + 1)));
                }
            }
        }

        let ranges = leaves
            .into_iter()
            .map(|record| {
                let block = slots.get(self.block_slot(&record)).copied().flatten();
                (block, record.offset, record.size)
            })
            .collect();
        Ok(LocationKey { kind, ranges })
    }

    /// Root file entries
    pub fn files(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.roots
            .iter()
            .copied()
            .filter(|id| self.nodes[id.0].is_file())
    }

    /// Root entries that are not files
    pub fn loose(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.roots
            .iter()
            .copied()
            .filter(|id| !self.nodes[id.0].is_file())
    }

    /// Root file entry with the given path hash
    pub fn find_file(&self, file_path: u32) -> Option<NodeId> {
        self.files().find(|id| {
            self.nodes[id.0]
                .file_header()
                .is_some_and(|header| header.file_path == file_path)
        })
    }

    /// Root file entry with the given path hash and chunk type
    pub fn find_file_of_type(&self, file_path: u32, kind: ChunkType) -> Option<NodeId> {
        self.files().find(|id| {
            let node = &self.nodes[id.0];
            node.record.kind == kind
                && node
                    .file_header()
                    .is_some_and(|header| header.file_path == file_path)
        })
    }
}
