//! Block I/O primitive.
//!
//! Block `i` lives at byte offset `i * block_size` and is laid out as
//!
//! ```text
//! next: u32 (LE) | payload[block_size - 4]
//! ```
//!
//! The header occupies the first `header_blocks` slots, so valid data block
//! indices are `first_block..block_count`.  Writing at exactly
//! `block_count` appends a block and grows the host.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use crate::error::{Result, StarError};
use crate::header::{Geometry, Header, LINK_SIZE, NO_BLOCK};

// ── Storage ──────────────────────────────────────────────────────────────────

/// A seekable host that can report and change its length.
pub trait Storage: Read + Write + Seek {
    fn byte_len(&mut self) -> io::Result<u64>;
    fn set_byte_len(&mut self, len: u64) -> io::Result<()>;
}

impl Storage for File {
    fn byte_len(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn set_byte_len(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

impl Storage for Cursor<Vec<u8>> {
    fn byte_len(&mut self) -> io::Result<u64> {
        Ok(self.get_ref().len() as u64)
    }

    fn set_byte_len(&mut self, len: u64) -> io::Result<()> {
        self.get_mut().resize(len as usize, 0);
        Ok(())
    }
}

// ── Block ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub next:    u32,
    pub payload: Vec<u8>,
}

impl Block {
    /// A zeroed block with a terminating link.
    pub fn empty(geometry: &Geometry) -> Self {
        Self { next: NO_BLOCK, payload: vec![0u8; geometry.payload_size()] }
    }

    /// A terminating block holding `data`, zero padded to the payload size.
    pub fn with_data(geometry: &Geometry, data: &[u8]) -> Self {
        let mut block = Self::empty(geometry);
        block.payload[..data.len()].copy_from_slice(data);
        block
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.next)?;
        writer.write_all(&self.payload)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R, geometry: &Geometry) -> io::Result<Self> {
        let next = reader.read_u32::<LittleEndian>()?;
        let mut payload = vec![0u8; geometry.payload_size()];
        reader.read_exact(&mut payload)?;
        Ok(Self { next, payload })
    }
}

// ── BlockStore ───────────────────────────────────────────────────────────────

pub struct BlockStore<S: Storage> {
    inner:       S,
    geometry:    Geometry,
    block_count: u32,
}

impl<S: Storage> BlockStore<S> {
    /// Wrap an existing host.  The block count is derived from its length
    /// and never reported below the header region.
    pub fn new(mut inner: S, geometry: Geometry) -> Result<Self> {
        geometry.validate()?;
        let len = inner.byte_len()?;
        let blocks = len.div_ceil(geometry.block_size as u64).max(geometry.header_blocks());
        if blocks >= NO_BLOCK as u64 {
            return Err(StarError::MalformedHeader(format!(
                "host holds {blocks} blocks, more than a link can address"
            )));
        }
        Ok(Self { inner, geometry, block_count: blocks as u32 })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Blocks currently held by the host, header slots included.
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    pub fn first_block(&self) -> u32 {
        self.geometry.first_block()
    }

    pub fn byte_len(&mut self) -> Result<u64> {
        Ok(self.inner.byte_len()?)
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Fails unless `index` names an existing data block.
    pub fn check_index(&self, index: u32) -> Result<()> {
        if index < self.first_block() || index >= self.block_count {
            return Err(StarError::BlockOutOfRange {
                block: index,
                first: self.first_block(),
                count: self.block_count,
            });
        }
        Ok(())
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        match self.inner.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(StarError::ShortRead { offset, expected: buf.len() })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn read_block(&mut self, index: u32) -> Result<Block> {
        self.check_index(index)?;
        let mut buf = vec![0u8; self.geometry.block_size as usize];
        self.read_exact_at(self.geometry.block_offset(index), &mut buf)?;
        Ok(Block::read(Cursor::new(buf), &self.geometry)?)
    }

    /// Reads only the link field of block `index`.
    pub fn read_link(&mut self, index: u32) -> Result<u32> {
        self.check_index(index)?;
        let mut buf = [0u8; LINK_SIZE];
        self.read_exact_at(self.geometry.block_offset(index), &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Writes a whole block.  `index == block_count` appends.
    pub fn write_block(&mut self, index: u32, block: &Block) -> Result<()> {
        if index != self.block_count {
            self.check_index(index)?;
        }
        debug_assert_eq!(block.payload.len(), self.geometry.payload_size());

        let mut buf = Vec::with_capacity(self.geometry.block_size as usize);
        block.write(&mut buf)?;
        self.inner.seek(SeekFrom::Start(self.geometry.block_offset(index)))?;
        self.inner.write_all(&buf)?;

        if index == self.block_count {
            self.block_count += 1;
        }
        Ok(())
    }

    /// Rewrites only the link field of an existing block.
    pub fn write_link(&mut self, index: u32, next: u32) -> Result<()> {
        self.check_index(index)?;
        self.inner.seek(SeekFrom::Start(self.geometry.block_offset(index)))?;
        self.inner.write_u32::<LittleEndian>(next)?;
        Ok(())
    }

    pub fn read_header(&mut self) -> Result<Header> {
        let mut buf = vec![0u8; self.geometry.header_size()];
        self.read_exact_at(0, &mut buf)?;
        Header::read(Cursor::new(buf), self.geometry)
    }

    pub fn write_header(&mut self, header: &Header) -> Result<()> {
        self.inner.seek(SeekFrom::Start(0))?;
        self.inner.write_all(&header.to_bytes())?;
        Ok(())
    }

    /// Pads the host out to the full header region.  Used once, on create.
    pub fn reserve_header(&mut self) -> Result<()> {
        let len = self.geometry.header_blocks() * self.geometry.block_size as u64;
        if self.inner.byte_len()? < len {
            self.inner.set_byte_len(len)?;
        }
        Ok(())
    }

    /// Cuts the host to exactly `blocks` blocks.
    pub fn truncate(&mut self, blocks: u32) -> Result<()> {
        let blocks = blocks.max(self.first_block());
        self.inner.set_byte_len(blocks as u64 * self.geometry.block_size as u64)?;
        self.block_count = blocks;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}
