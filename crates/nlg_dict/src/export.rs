//! Writing chunks out of an archive.

use std::io::Write;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use tracing::instrument;

use crate::{
    error::{Error, Result},
    tree::{ChunkTree, NodeId, FILE_HEADER_SIZE, MAX_DEPTH},
    types::ChunkRecord,
};

fn too_deep(id: NodeId) -> Error {
    Error::CustomError(format!(
        "chunk {} nests deeper than {MAX_DEPTH} levels",
        id.index()
    ))
}

fn write_tag(out: &mut Vec<u8>, record: &ChunkRecord) -> Result<()> {
    out.write_u16::<LittleEndian>(record.kind.into())?;
    out.write_u16::<LittleEndian>(record.flags.0)?;
    out.write_all(record.kind.to_string().as_bytes())?;
    out.write_u8(0)?;
    Ok(())
}

fn write_record(out: &mut Vec<u8>, record: &ChunkRecord) -> Result<()> {
    writeln!(
        out,
        "{} {} {} {}",
        record.flags, record.kind, record.offset, record.size
    )?;
    Ok(())
}

impl ChunkTree {
    /// Write a chunk and its children as a standalone `.nlg` stream.
    ///
    /// Each chunk is its type, flags, type name and byte size followed by its
    /// payload or its children. A file entry is preceded by a header chunk
    /// holding the path hash and hash type.
    #[instrument(skip(self, writer), err)]
    pub fn export_nlg<W: Write>(&mut self, id: NodeId, mut writer: W) -> Result<()> {
        let mut out = Vec::new();
        self.export_chunk(id, &mut out, 0)?;
        writer.write_all(&out)?;
        Ok(())
    }

    fn export_chunk(&mut self, id: NodeId, out: &mut Vec<u8>, depth: usize) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(too_deep(id));
        }
        let children = self.children(id)?.to_vec();
        let node = self.node(id)?.clone();

        if let Some(header) = node.file_header() {
            write_tag(out, &header.record)?;
            out.write_u32::<LittleEndian>(FILE_HEADER_SIZE as u32)?;
            out.write_u32::<LittleEndian>(header.file_path)?;
            out.write_u32::<LittleEndian>(header.hash_type)?;
        }

        write_tag(out, &node.record)?;
        let start = out.len();
        out.write_u32::<LittleEndian>(0)?;

        if node.is_leaf() {
            if let Some(payload) = node.payload() {
                out.write_all(payload)?;
            }
        } else {
            for child in children {
                self.export_chunk(child, out, depth + 1)?;
            }
        }

        let size = (out.len() - start - 4) as u32;
        LittleEndian::write_u32(&mut out[start..start + 4], size);
        Ok(())
    }

    /// Write the payload of a chunk, or the payloads of all its leaves in order
    #[instrument(skip(self, writer), err)]
    pub fn export_raw<W: Write>(&mut self, id: NodeId, mut writer: W) -> Result<()> {
        let mut pending = vec![(id, 0)];
        while let Some((current, depth)) = pending.pop() {
            if depth > MAX_DEPTH {
                return Err(too_deep(current));
            }
            let children = self.children(current)?.to_vec();
            if let Some(payload) = self.payload(current) {
                writer.write_all(payload)?;
            }
            pending.extend(children.into_iter().rev().map(|child| (child, depth + 1)));
        }
        Ok(())
    }

    /// Write every record of the table as `flags type offset size`, depth first
    pub fn dump<W: Write>(&mut self, mut writer: W) -> Result<()> {
        let mut out = Vec::new();
        let mut pending = self
            .roots()
            .iter()
            .rev()
            .map(|&root| (root, 0))
            .collect::<Vec<_>>();
        while let Some((id, depth)) = pending.pop() {
            if depth > MAX_DEPTH {
                return Err(too_deep(id));
            }
            let children = self.children(id)?.to_vec();
            let node = self.node(id)?;
            if let Some(header) = node.file_header() {
                write_record(&mut out, &header.record)?;
            }
            write_record(&mut out, &node.record)?;
            pending.extend(children.into_iter().rev().map(|child| (child, depth + 1)));
        }
        writer.write_all(&out)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    use crate::{
        error::Result,
        tree::{ChunkTree, NodeId},
        types::ChunkType,
        version::GameVersion,
    };

    fn tree() -> Result<(ChunkTree, NodeId)> {
        let mut tree = ChunkTree::new(GameVersion::Lm2);
        let texture = tree.add_file_root(ChunkType::Texture, 0x11, 0x22);
        let header = tree.add_child(texture, ChunkType::TextureHeader)?;
        let data = tree.add_child(texture, ChunkType::TextureData)?;
        tree.set_payload(header, Bytes::from_static(b"hd"))?;
        tree.set_payload(data, Bytes::from_static(b"pix"))?;
        Ok((tree, texture))
    }

    #[test]
    fn nlg_stream() -> Result<()> {
        let (mut tree, texture) = tree()?;
        let mut actual = Vec::new();
        tree.export_nlg(texture, &mut actual)?;

        #[rustfmt::skip]
        let expected: &[&[u8]] = &[
            &[0x01, 0x13, 0x00, 0x02][..], b"FileHeader\0",
            &[0x08, 0, 0, 0, 0x22, 0, 0, 0, 0x11, 0, 0, 0],
            &[0x00, 0xB5, 0x01, 0x87], b"Texture\0", &[0x2F, 0, 0, 0],
            &[0x01, 0xB5, 0x01, 0x02], b"TextureHeader\0", &[0x02, 0, 0, 0], b"hd",
            &[0x02, 0xB5, 0x01, 0x17], b"TextureData\0", &[0x03, 0, 0, 0], b"pix",
        ];
        assert_eq!(actual, expected.concat());
        Ok(())
    }

    #[test]
    fn raw_concatenates_leaves() -> Result<()> {
        let (mut tree, texture) = tree()?;
        let mut actual = Vec::new();
        tree.export_raw(texture, &mut actual)?;
        assert_eq!(actual, b"hdpix".to_vec());
        Ok(())
    }

    #[test]
    fn dump_lists_records() -> Result<()> {
        let (mut tree, _) = tree()?;
        let mut actual = Vec::new();
        tree.dump(&mut actual)?;
        assert_eq!(
            String::from_utf8_lossy(&actual),
            "512 FileHeader 0 8\n34561 Texture 0 0\n513 TextureHeader 0 2\n5889 TextureData 0 3\n"
        );
        Ok(())
    }
}
