//! Archive header and on-disk geometry.
//!
//! The header sits at offset 0 and is always read and written whole:
//!
//! ```text
//! entry[max_entries] = { name[name_len] (NUL padded) | size: u64 | start_block: u32 }
//! count:     u32
//! free_head: u32
//! ```
//!
//! All integers are little-endian.  There is no magic number and no version
//! field, so a reader must be opened with the same [`Geometry`] the writer
//! used.  Unused entry slots are written as zeros.  Names must be UTF-8; a
//! slot holding anything else is rejected on read, never rewritten.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

use crate::error::{Result, StarError};

/// Link value that terminates a chain or marks an empty free list.
pub const NO_BLOCK: u32 = u32::MAX;
/// Bytes taken by the next-block link at the start of every block.
pub const LINK_SIZE: usize = 4;

/// `size: u64` + `start_block: u32` after each name.
const ENTRY_FIXED: usize = 12;
/// `count: u32` + `free_head: u32`.
const HEADER_TRAILER: usize = 8;

pub const DEFAULT_BLOCK_SIZE:  u32   = 256 * 1024;
pub const DEFAULT_MAX_ENTRIES: usize = 250;
pub const DEFAULT_NAME_LEN:    usize = 256;

// ── Geometry ─────────────────────────────────────────────────────────────────

/// Layout parameters shared by every reader and writer of one archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub block_size:  u32,
    pub max_entries: usize,
    /// Bytes reserved per name, including the NUL terminator.
    pub name_len:    usize,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            block_size:  DEFAULT_BLOCK_SIZE,
            max_entries: DEFAULT_MAX_ENTRIES,
            name_len:    DEFAULT_NAME_LEN,
        }
    }
}

impl Geometry {
    pub fn validate(&self) -> Result<()> {
        if (self.block_size as usize) <= LINK_SIZE {
            return Err(StarError::InvalidGeometry(format!(
                "block size {} leaves no payload", self.block_size
            )));
        }
        if self.max_entries == 0 {
            return Err(StarError::InvalidGeometry("entry capacity must be at least 1".into()));
        }
        if self.name_len < 2 {
            return Err(StarError::InvalidGeometry(format!(
                "name length {} cannot hold a name and its terminator", self.name_len
            )));
        }
        if self.max_entries > u32::MAX as usize {
            return Err(StarError::InvalidGeometry(format!(
                "entry capacity {} does not fit the u32 count field", self.max_entries
            )));
        }
        let size = self.checked_header_size().ok_or_else(|| {
            StarError::InvalidGeometry(format!(
                "{} entries of {}-byte names overflow the header size",
                self.max_entries, self.name_len
            ))
        })?;
        if (size as u64).div_ceil(self.block_size as u64) >= NO_BLOCK as u64 {
            return Err(StarError::InvalidGeometry("header does not fit in addressable blocks".into()));
        }
        Ok(())
    }

    fn checked_header_size(&self) -> Option<usize> {
        self.name_len
            .checked_add(ENTRY_FIXED)?
            .checked_mul(self.max_entries)?
            .checked_add(HEADER_TRAILER)
    }

    /// Payload bytes carried by one block.
    pub fn payload_size(&self) -> usize {
        self.block_size as usize - LINK_SIZE
    }

    /// Saturates instead of overflowing; exact for any geometry that
    /// passes [`Geometry::validate`].
    pub fn entry_size(&self) -> usize {
        self.name_len.saturating_add(ENTRY_FIXED)
    }

    pub fn header_size(&self) -> usize {
        self.max_entries.saturating_mul(self.entry_size()).saturating_add(HEADER_TRAILER)
    }

    /// Block slots reserved by the header; the first data block index.
    pub fn header_blocks(&self) -> u64 {
        (self.header_size() as u64).div_ceil(self.block_size as u64)
    }

    /// Index of the first block eligible for allocation.
    pub fn first_block(&self) -> u32 {
        self.header_blocks() as u32
    }

    pub fn block_offset(&self, index: u32) -> u64 {
        index as u64 * self.block_size as u64
    }

    /// Blocks a member of `len` bytes occupies.
    pub fn blocks_for(&self, len: u64) -> u64 {
        len.div_ceil(self.payload_size() as u64)
    }

    /// The stored form of `name`: cut at the first NUL, then to at most
    /// `name_len - 1` bytes on a character boundary.
    pub fn stored_name<'a>(&self, name: &'a str) -> &'a str {
        let name = name.split('\0').next().unwrap_or("");
        let max = self.name_len - 1;
        if name.len() <= max {
            return name;
        }
        let mut end = max;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        &name[..end]
    }
}

// ── FileEntry ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name:        String,
    pub size:        u64,
    /// First block of the chain, or [`NO_BLOCK`] for an empty member.
    pub start_block: u32,
}

impl FileEntry {
    pub fn is_empty(&self) -> bool {
        self.start_block == NO_BLOCK
    }
}

// ── Header ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Header {
    pub geometry:  Geometry,
    entries:       Vec<FileEntry>,
    pub free_head: u32,
}

impl Header {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            entries:   Vec::new(),
            free_head: NO_BLOCK,
        }
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [FileEntry] {
        &mut self.entries
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.geometry.max_entries
    }

    /// Position of the live entry whose stored name matches `name`.
    pub fn find(&self, name: &str) -> Option<usize> {
        let name = self.geometry.stored_name(name);
        self.entries.iter().position(|e| e.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&FileEntry> {
        self.find(name).map(|i| &self.entries[i])
    }

    pub(crate) fn push_entry(&mut self, entry: FileEntry) -> Result<()> {
        if self.is_full() {
            return Err(StarError::CapacityExceeded { capacity: self.geometry.max_entries });
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Removes entry `index`, shifting later entries one slot earlier.
    pub(crate) fn remove_entry(&mut self, index: usize) -> FileEntry {
        self.entries.remove(index)
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        let g = &self.geometry;
        let mut name_buf = vec![0u8; g.name_len];
        for slot in 0..g.max_entries {
            name_buf.fill(0);
            match self.entries.get(slot) {
                Some(entry) => {
                    let name = g.stored_name(&entry.name).as_bytes();
                    name_buf[..name.len()].copy_from_slice(name);
                    writer.write_all(&name_buf)?;
                    writer.write_u64::<LittleEndian>(entry.size)?;
                    writer.write_u32::<LittleEndian>(entry.start_block)?;
                }
                None => {
                    writer.write_all(&name_buf)?;
                    writer.write_u64::<LittleEndian>(0)?;
                    writer.write_u32::<LittleEndian>(0)?;
                }
            }
        }
        writer.write_u32::<LittleEndian>(self.entries.len() as u32)?;
        writer.write_u32::<LittleEndian>(self.free_head)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.geometry.header_size());
        // Writing into a Vec cannot fail.
        let _ = self.write(&mut buf);
        buf
    }

    /// Decode a header.  `reader` must supply the full header region; a
    /// short reader surfaces as an `UnexpectedEof` I/O error.
    pub fn read<R: Read>(mut reader: R, geometry: Geometry) -> Result<Self> {
        geometry.validate()?;
        let mut slots = Vec::with_capacity(geometry.max_entries);
        let mut name_buf = vec![0u8; geometry.name_len];
        for _ in 0..geometry.max_entries {
            reader.read_exact(&mut name_buf)?;
            let size = reader.read_u64::<LittleEndian>()?;
            let start_block = reader.read_u32::<LittleEndian>()?;
            slots.push((name_buf.clone(), size, start_block));
        }
        let count = reader.read_u32::<LittleEndian>()? as usize;
        let free_head = reader.read_u32::<LittleEndian>()?;

        if count > geometry.max_entries {
            return Err(StarError::MalformedHeader(format!(
                "entry count {count} exceeds capacity {}", geometry.max_entries
            )));
        }

        let mut entries = Vec::with_capacity(geometry.max_entries);
        for (slot, (raw, size, start_block)) in slots.into_iter().take(count).enumerate() {
            let end = raw.iter().position(|&b| b == 0).ok_or_else(|| {
                StarError::MalformedHeader(format!("entry {slot} has an unterminated name"))
            })?;
            let name = String::from_utf8(raw[..end].to_vec()).map_err(|_| {
                StarError::MalformedHeader(format!("entry {slot} has a name that is not UTF-8"))
            })?;
            entries.push(FileEntry { name, size, start_block });
        }

        Ok(Self { geometry, entries, free_head })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn small() -> Geometry {
        Geometry { block_size: 64, max_entries: 4, name_len: 16 }
    }

    #[test]
    fn test_default_geometry_matches_format() {
        let g = Geometry::default();
        assert_eq!(g.payload_size(), 262_140);
        assert_eq!(g.header_size(), 250 * 268 + 8);
        assert_eq!(g.header_blocks(), 1);
        g.validate().unwrap();
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        let bad = Geometry { block_size: 4, ..small() };
        assert!(matches!(bad.validate(), Err(StarError::InvalidGeometry(_))));
        let bad = Geometry { max_entries: 0, ..small() };
        assert!(bad.validate().is_err());
        let bad = Geometry { name_len: 1, ..small() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_oversized_geometry_rejected_without_overflow() {
        let too_many = Geometry { max_entries: usize::MAX / 8, ..small() };
        assert!(matches!(too_many.validate(), Err(StarError::InvalidGeometry(_))));

        let long_names = Geometry { name_len: usize::MAX - 4, ..small() };
        assert!(matches!(long_names.validate(), Err(StarError::InvalidGeometry(_))));

        let product = Geometry { name_len: usize::MAX / 2, max_entries: 4, ..small() };
        assert!(matches!(product.validate(), Err(StarError::InvalidGeometry(_))));
        assert_eq!(product.header_size(), usize::MAX);
    }

    #[test]
    fn test_header_blocks_rounds_up() {
        // 4 * 28 + 8 = 120 bytes over 64-byte blocks
        assert_eq!(small().header_size(), 120);
        assert_eq!(small().header_blocks(), 2);
    }

    #[test]
    fn test_stored_name_truncates_silently() {
        let g = small();
        assert_eq!(g.stored_name("short"), "short");
        assert_eq!(g.stored_name("exactly-15-bytes"), "exactly-15-byte");
        assert_eq!(g.stored_name("a\0b"), "a");
        // 'é' is two bytes; the cut must not split it
        assert_eq!(g.stored_name("aaaaaaaaaaaaaaé"), "aaaaaaaaaaaaaa");
    }

    #[test]
    fn test_header_roundtrip_preserves_order() {
        let mut h = Header::new(small());
        h.push_entry(FileEntry { name: "b".into(), size: 70, start_block: 5 }).unwrap();
        h.push_entry(FileEntry { name: "a".into(), size: 0, start_block: NO_BLOCK }).unwrap();
        h.free_head = 9;

        let bytes = h.to_bytes();
        assert_eq!(bytes.len(), small().header_size());

        let back = Header::read(Cursor::new(bytes), small()).unwrap();
        assert_eq!(back.entries(), h.entries());
        assert_eq!(back.free_head, 9);
    }

    #[test]
    fn test_header_capacity_enforced() {
        let mut h = Header::new(small());
        for i in 0..4 {
            h.push_entry(FileEntry { name: format!("f{i}"), size: 0, start_block: NO_BLOCK }).unwrap();
        }
        let err = h
            .push_entry(FileEntry { name: "f4".into(), size: 0, start_block: NO_BLOCK })
            .unwrap_err();
        assert!(matches!(err, StarError::CapacityExceeded { capacity: 4 }));
        assert_eq!(h.count(), 4);
    }

    #[test]
    fn test_count_over_capacity_is_malformed() {
        let mut bytes = Header::new(small()).to_bytes();
        let count_at = small().max_entries * small().entry_size();
        bytes[count_at..count_at + 4].copy_from_slice(&5u32.to_le_bytes());
        let err = Header::read(Cursor::new(bytes), small()).unwrap_err();
        assert!(matches!(err, StarError::MalformedHeader(_)));
    }

    /// A header with one live slot whose name bytes are `name`.
    fn header_with_raw_name(name: &[u8]) -> Vec<u8> {
        let mut bytes = Header::new(small()).to_bytes();
        bytes[..name.len()].copy_from_slice(name);
        let count_at = small().max_entries * small().entry_size();
        bytes[count_at..count_at + 4].copy_from_slice(&1u32.to_le_bytes());
        bytes
    }

    #[test]
    fn test_unterminated_name_is_malformed() {
        let bytes = header_with_raw_name(&[b'x'; 16]);
        let err = Header::read(Cursor::new(bytes), small()).unwrap_err();
        assert!(matches!(err, StarError::MalformedHeader(ref m) if m.contains("unterminated")));
        assert!(err.is_corruption());
    }

    #[test]
    fn test_non_utf8_name_is_malformed() {
        let bytes = header_with_raw_name(&[b'c', 0xE9, b'.', b'c']);
        let err = Header::read(Cursor::new(bytes), small()).unwrap_err();
        assert!(matches!(err, StarError::MalformedHeader(ref m) if m.contains("UTF-8")));
    }

    #[test]
    fn test_full_length_name_reads_back() {
        let bytes = header_with_raw_name(b"fifteen-bytes-x");
        let h = Header::read(Cursor::new(bytes), small()).unwrap();
        assert_eq!(h.entries()[0].name, "fifteen-bytes-x");
    }

    #[test]
    fn test_find_uses_stored_name() {
        let g = small();
        let mut h = Header::new(g);
        let long = "a-name-longer-than-fifteen";
        h.push_entry(FileEntry { name: g.stored_name(long).into(), size: 0, start_block: NO_BLOCK })
            .unwrap();
        assert_eq!(h.find(long), Some(0));
        assert_eq!(h.find("a-name"), None);
    }
}
