use std::io::Cursor;

use bytes::Bytes;
use nlg_dict::{
    error::Result,
    read::OpenOptions,
    write::{DictWriterOptions, WrittenArchive},
    ChunkTree, ChunkType, CompressionMethod, DataSource, DictArchive, DictWriter, Dictionary,
    GameVersion, MemorySource, NodeId,
};
use pretty_assertions::assert_eq;

static PIXELS: [u8; 37] = [7; 37];

/// A texture file entry whose header and pixels live in block slot 1
fn texture(tree: &mut ChunkTree, file_path: u32) -> Result<NodeId> {
    let texture = tree.add_file_root(ChunkType::Texture, 0x11, file_path);
    let header = tree.add_child(texture, ChunkType::TextureHeader)?;
    let data = tree.add_child(texture, ChunkType::TextureData)?;
    tree.set_payload(header, Bytes::from_static(b"hdr"))?;
    tree.set_payload(data, Bytes::from_static(&PIXELS))?;
    for id in [texture, header, data] {
        tree.set_block_slot(id, 1)?;
    }
    Ok(texture)
}

/// Global and region tables that both carry the same texture. The region
/// keeps a debug script in `.debug`.
fn lm3_archive() -> Result<DictArchive<MemorySource>> {
    let mut dict = Dictionary::new(GameVersion::Lm3);
    for _ in 0..3 {
        dict.add_block(".data");
    }
    dict.add_block(".debug");
    dict.add_reference(0x0A, &[0, 2]);
    dict.add_reference(0x0B, &[0, 2, 3]);
    let mut archive = DictArchive::create(dict, MemorySource::new())?;

    let global = archive.tree(0)?;
    texture(global, 0x100)?;
    let script = global.add_file_root(ChunkType::Script, 0x30, 0x200);
    global.set_payload(script, Bytes::from_static(b"init()"))?;
    global.set_block_slot(script, 1)?;

    let region = archive.tree(1)?;
    texture(region, 0x100)?;
    let note = region.add_file_root(ChunkType::Script, 0x30, 0x300);
    region.set_payload(note, Bytes::from_static(b"debug()"))?;
    region.set_block_slot(note, 2)?;
    Ok(archive)
}

fn reopen(written: &WrittenArchive, version: GameVersion) -> Result<DictArchive<MemorySource>> {
    let dict = Dictionary::read(Cursor::new(&written.dict), Some(version))?;
    DictArchive::new(dict, MemorySource::from(written.clone()), OpenOptions::default())
}

fn walk(tree: &mut ChunkTree) -> Result<Vec<NodeId>> {
    let mut order = Vec::new();
    let mut pending = tree.roots().iter().rev().copied().collect::<Vec<_>>();
    while let Some(id) = pending.pop() {
        order.push(id);
        pending.extend(tree.children(id)?.iter().rev().copied());
    }
    Ok(order)
}

type Entry = (ChunkType, Option<(u32, u32)>, Vec<u8>);

/// Type, file identity and resolved payload of every chunk of a table
fn entries<S: DataSource>(archive: &mut DictArchive<S>, index: usize) -> Result<Vec<Entry>> {
    let order = walk(archive.tree(index)?)?;
    let mut out = Vec::with_capacity(order.len());
    for id in order {
        let tree = archive.tree(index)?;
        let node = tree.node(id)?;
        let kind = node.record.kind;
        let identity = node
            .file_header()
            .map(|header| (header.hash_type, header.file_path));
        let payload = archive.payload(index, id)?.unwrap_or_default();
        out.push((kind, identity, payload.to_vec()));
    }
    Ok(out)
}

fn pixel_copies(data: &[u8]) -> usize {
    data.windows(PIXELS.len())
        .filter(|window| *window == PIXELS)
        .count()
}

#[test]
fn round_trip_keeps_every_chunk() -> Result<()> {
    let mut archive = lm3_archive()?;
    let written = DictWriter::default().write(&mut archive)?;
    assert_eq!(written.files.keys().collect::<Vec<_>>(), vec![".data", ".debug"]);

    let mut reopened = reopen(&written, GameVersion::Lm3)?;
    assert_eq!(reopened.len(), 2);
    for index in 0..2 {
        assert_eq!(entries(&mut reopened, index)?, entries(&mut archive, index)?);
    }
    assert_eq!(reopened.dictionary().references[0].section_count, 4);
    assert_eq!(reopened.dictionary().references[0].file_count, 2);
    Ok(())
}

#[test]
fn payloads_respect_their_alignment() -> Result<()> {
    let written = DictWriter::default().write(&mut lm3_archive()?)?;
    let mut reopened = reopen(&written, GameVersion::Lm3)?;
    let policy = GameVersion::Lm3.policy();

    let mut checked = 0;
    for index in 0..2 {
        let tree = reopened.tree(index)?;
        for id in walk(tree)? {
            let node = tree.node(id)?;
            if let Some(header) = node.file_header() {
                let alignment = policy.data_alignment(header.record.flags.0);
                assert_eq!(header.record.offset as usize % alignment, 0);
            }
            if node.is_leaf() && node.shared().is_none() {
                assert_eq!(node.record.offset as usize % tree.data_alignment(id)?, 0);
                checked += 1;
            }
        }
    }
    assert!(checked >= 5);
    Ok(())
}

#[test]
fn region_copies_are_stored_once() -> Result<()> {
    let written = DictWriter::default().write(&mut lm3_archive()?)?;
    assert_eq!(pixel_copies(&written.files[".data"]), 1);

    let mut reopened = reopen(&written, GameVersion::Lm3)?;
    let region = reopened.tree(1)?;
    let texture = region.find_file_of_type(0x100, ChunkType::Texture).expect("texture");
    assert_eq!(region.node(texture)?.shared(), Some(0));

    let (table, global) = reopened.resolve(1, texture)?;
    assert_eq!(table, 0);
    assert_eq!(reopened.tree(0)?.roots()[0], global);

    // the children of a shared root read the same bytes as the global ones
    let region = reopened.tree(1)?;
    let pixels = region.children(texture)?[1];
    assert_eq!(region.payload(pixels).map(|p| &p[..]), Some(&PIXELS[..]));

    let note = region.find_file(0x300).expect("debug script");
    assert_eq!(region.node(note)?.shared(), None);
    assert_eq!(region.payload(note).map(|p| &p[..]), Some(&b"debug()"[..]));
    Ok(())
}

#[test]
fn dedupe_can_be_turned_off() -> Result<()> {
    let options = DictWriterOptions::builder().dedupe(false).build();
    let written = DictWriter::new(options).write(&mut lm3_archive()?)?;
    assert_eq!(pixel_copies(&written.files[".data"]), 2);

    let mut reopened = reopen(&written, GameVersion::Lm3)?;
    let region = reopened.tree(1)?;
    let texture = region.find_file(0x100).expect("texture");
    assert_eq!(region.node(texture)?.shared(), None);
    Ok(())
}

#[test]
fn compressed_blocks_round_trip() -> Result<()> {
    let mut archive = lm3_archive()?;
    let options = DictWriterOptions::builder().compress(true).build();
    let written = DictWriter::new(options).write(&mut archive)?;
    assert_eq!(pixel_copies(&written.files[".data"]), 0);

    let mut reopened = reopen(&written, GameVersion::Lm3)?;
    assert!(reopened.dictionary().compressed);
    for block in &reopened.dictionary().blocks {
        if block.compressed_size == 0 {
            continue;
        }
        let file = &written.files[block.extension.as_str()];
        assert_eq!(
            CompressionMethod::sniff(&file[block.offset as usize..]),
            Some(CompressionMethod::Zlib)
        );
    }

    for index in 0..2 {
        assert_eq!(entries(&mut reopened, index)?, entries(&mut archive, index)?);
    }
    Ok(())
}

#[test]
fn writing_twice_gives_the_same_files() -> Result<()> {
    let writer = DictWriter::default();
    let mut archive = lm3_archive()?;
    let first = writer.write(&mut archive)?;
    assert_eq!(writer.write(&mut archive)?, first);

    // and again from the files that were just written
    let mut reopened = reopen(&first, GameVersion::Lm3)?;
    let second = writer.write(&mut reopened)?;
    assert_eq!(writer.write(&mut reopened)?, second);
    assert_eq!(pixel_copies(&second.files[".data"]), 1);
    Ok(())
}

#[test]
fn equal_hashes_keep_their_own_bytes() -> Result<()> {
    #[rustfmt::skip]
    let colliding: &[u8] = &[
        0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42,
        0x8F, 0x47, 0xC5, 0x9D,
    ];
    let crc = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
    assert_eq!(crc.checksum(colliding), crc.checksum(&[0x41; 12]));

    let mut archive = lm3_archive()?;
    let global = archive.tree(0)?;
    let script = global.add_root(ChunkType::Script);
    global.set_payload(script, Bytes::from_static(&[0x41; 12]))?;
    global.set_block_slot(script, 1)?;
    let global_hash = global.content_hash(script)?;

    let region = archive.tree(1)?;
    let script = region.add_root(ChunkType::Script);
    region.set_payload(script, Bytes::copy_from_slice(colliding))?;
    region.set_block_slot(script, 1)?;
    assert_eq!(region.content_hash(script)?, global_hash);

    let written = DictWriter::default().write(&mut archive)?;
    let mut reopened = reopen(&written, GameVersion::Lm3)?;
    for index in 0..2 {
        assert_eq!(entries(&mut reopened, index)?, entries(&mut archive, index)?);
    }

    let region = reopened.tree(1)?;
    let script = *region.roots().last().expect("script");
    assert_eq!(region.node(script)?.shared(), None);
    assert_eq!(region.payload(script).map(|p| &p[..]), Some(colliding));
    Ok(())
}

#[test]
fn edited_shared_roots_are_written_again() -> Result<()> {
    let written = DictWriter::default().write(&mut lm3_archive()?)?;
    let mut reopened = reopen(&written, GameVersion::Lm3)?;

    let region = reopened.tree(1)?;
    let texture = region.find_file_of_type(0x100, ChunkType::Texture).expect("texture");
    assert_eq!(region.node(texture)?.shared(), Some(0));
    let header = region.children(texture)?[0];
    region.set_payload(header, Bytes::from_static(b"EDITED-REGION"))?;
    let rewritten = DictWriter::default().write(&mut reopened)?;

    let mut again = reopen(&rewritten, GameVersion::Lm3)?;
    assert_eq!(entries(&mut again, 1)?, entries(&mut reopened, 1)?);

    let region = again.tree(1)?;
    let texture = region.find_file_of_type(0x100, ChunkType::Texture).expect("texture");
    assert_eq!(region.node(texture)?.shared(), None);
    let header = region.children(texture)?[0];
    assert_eq!(region.payload(header).map(|p| &p[..]), Some(&b"EDITED-REGION"[..]));

    let global = again.tree(0)?;
    let texture = global.find_file(0x100).expect("texture");
    let header = global.children(texture)?[0];
    assert_eq!(global.payload(header).map(|p| &p[..]), Some(&b"hdr"[..]));
    // the region keeps its own pixels next to the global ones
    assert_eq!(pixel_copies(&rewritten.files[".data"]), 2);
    Ok(())
}

#[test]
fn edits_survive_a_rewrite() -> Result<()> {
    let written = DictWriter::default().write(&mut lm3_archive()?)?;
    let mut reopened = reopen(&written, GameVersion::Lm3)?;

    let global = reopened.tree(0)?;
    let script = global.find_file(0x200).expect("script");
    global.set_payload(script, Bytes::from_static(b"init(fast)"))?;
    let rewritten = DictWriter::default().write(&mut reopened)?;

    let mut again = reopen(&rewritten, GameVersion::Lm3)?;
    let global = again.tree(0)?;
    let script = global.find_file(0x200).expect("script");
    assert_eq!(global.payload(script).map(|p| &p[..]), Some(&b"init(fast)"[..]));
    assert_eq!(entries(&mut again, 1)?, entries(&mut reopened, 1)?);
    Ok(())
}

/// Two legacy tables sharing the first reference, each shifted by its table block
fn legacy_archive(version: GameVersion) -> Result<DictArchive<MemorySource>> {
    let mut dict = Dictionary::new(version);
    for _ in 0..4 {
        dict.add_block(".data");
    }
    dict.add_reference(0x0C, &[0, 1]);
    dict.add_table_info(0)?;
    dict.add_table_info(2)?;
    let mut archive = DictArchive::create(dict, MemorySource::new())?;

    for (index, body) in [(0, &b"first"[..]), (1, &b"second"[..])] {
        let tree = archive.tree(index)?;
        let texture = tree.add_file_root(ChunkType::Texture, 0x11, index as u32);
        let data = tree.add_child(texture, ChunkType::TextureData)?;
        tree.set_payload(data, Bytes::copy_from_slice(body))?;
        for id in [texture, data] {
            tree.set_block_slot(id, 1)?;
        }
    }
    Ok(archive)
}

#[test]
fn legacy_tables_round_trip() -> Result<()> {
    let written = DictWriter::default().write(&mut legacy_archive(GameVersion::Lm2)?)?;
    assert_eq!(Dictionary::probe(&written.dict)?, GameVersion::Lm2);

    let dict = Dictionary::read(Cursor::new(&written.dict), None)?;
    let mut reopened =
        DictArchive::new(dict, MemorySource::from(written), OpenOptions::default())?;
    assert_eq!(reopened.dictionary().file_table_count, 2);
    assert_eq!(reopened.len(), 2);

    for (index, body) in [(0, &b"first"[..]), (1, &b"second"[..])] {
        let tree = reopened.tree(index)?;
        let texture = tree.find_file(index as u32).expect("texture");
        let data = tree.children(texture)?[0];
        assert_eq!(tree.payload(data).map(|p| &p[..]), Some(body));
    }
    Ok(())
}

#[test]
fn hd_data_files_align_blocks() -> Result<()> {
    let written = DictWriter::default().write(&mut legacy_archive(GameVersion::Lm2Hd)?)?;
    let reopened = reopen(&written, GameVersion::Lm2Hd)?;

    let mut placed = 0;
    for block in &reopened.dictionary().blocks {
        if block.decompressed_size > 0 {
            assert_eq!(block.offset % 512, 0);
            placed += 1;
        }
    }
    assert_eq!(placed, 4);
    Ok(())
}
