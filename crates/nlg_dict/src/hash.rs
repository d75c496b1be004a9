//! String hashes used for file paths, hash types and table names.
//!
//! Archives only ever store 32 bit hashes. Resolving them back to readable
//! names is optional and goes through a [`HashLookup`] handed to the reader,
//! the container never depends on a name being known.

use std::{
    collections::HashMap,
    io::{BufRead, Read, Seek, SeekFrom},
};

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use tracing::{debug, instrument};

use crate::error::Result;

/// Hash a name the way the games do.
///
/// With `fold_case` set, ASCII upper case letters are hashed as lower case.
pub fn hash_str(name: &str, fold_case: bool) -> u32 {
    name.bytes().fold(0xFFFF_FFFF, |hash: u32, mut c| {
        if fold_case && c.is_ascii_uppercase() {
            c |= 0x20;
        }
        hash.wrapping_mul(33).wrapping_add(c as u32)
    })
}

/// Read only lookup from hashes back to names
pub trait HashLookup: Send + Sync {
    fn lookup(&self, hash: u32) -> Option<&str>;

    /// The name if known, otherwise the hash as hex
    fn display(&self, hash: u32) -> String {
        self.lookup(hash)
            .map(str::to_owned)
            .unwrap_or_else(|| format!("{hash:08X}"))
    }
}

/// A lookup that knows no names
#[derive(Debug, Default, Clone, Copy)]
pub struct NoNames;

impl HashLookup for NoNames {
    fn lookup(&self, _hash: u32) -> Option<&str> {
        None
    }
}

/// In memory hash to name table
#[derive(Debug, Default, Clone)]
pub struct HashNames {
    names: HashMap<u32, String>,
}

impl HashNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Register a name both as written and lower cased
    pub fn insert(&mut self, name: &str) {
        self.names
            .entry(hash_str(name, false))
            .or_insert_with(|| name.to_owned());
        let lower = name.to_ascii_lowercase();
        self.names
            .entry(hash_str(&lower, false))
            .or_insert(lower);
    }

    /// Register every non empty line of a strings file
    #[instrument(skip_all, err)]
    pub fn extend_from_lines<R: BufRead>(&mut self, reader: R) -> Result<()> {
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if !line.is_empty() {
                self.insert(line);
            }
        }
        debug!(names = self.names.len(), "loaded strings");
        Ok(())
    }

    /// Load a hash bin.
    ///
    /// The layout is a `u32` count, then `count` pairs of `u32` hash and `u32`
    /// string offset, then the zero terminated strings. Offsets are relative to
    /// the end of the pair list.
    #[instrument(skip(self, reader), err)]
    pub fn read_hashbin<R: Read + Seek>(&mut self, reader: R, big_endian: bool) -> Result<()> {
        if big_endian {
            self.read_hashbin_with::<BigEndian, R>(reader)
        } else {
            self.read_hashbin_with::<LittleEndian, R>(reader)
        }
    }

    fn read_hashbin_with<E: ByteOrder, R: Read + Seek>(&mut self, mut reader: R) -> Result<()> {
        let count = reader.read_u32::<E>()?;
        let pairs = (0..count)
            .map(|_| -> Result<(u32, u32)> {
                Ok((reader.read_u32::<E>()?, reader.read_u32::<E>()?))
            })
            .collect::<Result<Vec<_>>>()?;

        let strings_start = 4 + count as u64 * 8;
        for (hash, offset) in pairs {
            reader.seek(SeekFrom::Start(strings_start + offset as u64))?;
            let mut raw = Vec::new();
            loop {
                let c = reader.read_u8()?;
                if c == b'\0' {
                    break;
                }
                raw.push(c);
            }
            self.names
                .insert(hash, String::from_utf8_lossy(&raw).into_owned());
        }
        debug!(names = self.names.len(), "loaded hash bin");
        Ok(())
    }
}

impl HashLookup for HashNames {
    fn lookup(&self, hash: u32) -> Option<&str> {
        self.names.get(&hash).map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for HashNames {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut names = HashNames::new();
        iter.into_iter().for_each(|name| names.insert(name.as_ref()));
        names
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::{hash_str, HashLookup, HashNames, NoNames};
    use crate::error::Result;

    #[test]
    fn hash_values() {
        assert_eq!(hash_str("", false), 0xFFFF_FFFF);
        // 0xFFFFFFFF * 33 + 'a' wraps to 0xFFFFFFDF + 0x61
        assert_eq!(hash_str("a", false), 0x0000_0040);
        assert_eq!(hash_str("ABC", true), hash_str("abc", false));
        assert_ne!(hash_str("ABC", false), hash_str("abc", false));
    }

    #[test]
    fn lookup_registers_lowercase() {
        let names: HashNames = ["Textures/Boo.png"].into_iter().collect();
        assert_eq!(names.len(), 2);
        assert_eq!(
            names.lookup(hash_str("textures/boo.png", false)),
            Some("textures/boo.png")
        );
        assert_eq!(names.display(1), "00000001");
        assert_eq!(NoNames.display(0xABCD), "0000ABCD");
    }

    #[test]
    fn read_hashbin() -> Result<()> {
        #[rustfmt::skip]
        let input = vec![
            0x02, 0x00, 0x00, 0x00,
            0x01, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00,
            0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            b'o', b'n', b'e', 0x00,
            b't', b'w', b'o', 0x00,
        ];

        let mut names = HashNames::new();
        names.read_hashbin(Cursor::new(input), false)?;
        assert_eq!(names.lookup(1), Some("two"));
        assert_eq!(names.lookup(2), Some("one"));
        Ok(())
    }

    #[test]
    fn read_big_endian_hashbin() -> Result<()> {
        #[rustfmt::skip]
        let input = vec![
            0x00, 0x00, 0x00, 0x01,
            0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x00, 0x00,
            b'b', b'o', b'o', 0x00,
        ];

        let mut names = HashNames::new();
        names.read_hashbin(Cursor::new(input), true)?;
        assert_eq!(names.lookup(7), Some("boo"));
        Ok(())
    }

    #[test]
    fn strings_file() -> Result<()> {
        let mut names = HashNames::new();
        names.extend_from_lines(Cursor::new("alpha\n\n  beta  \n"))?;
        assert_eq!(names.lookup(hash_str("beta", false)), Some("beta"));
        assert_eq!(names.len(), 2);
        Ok(())
    }
}
