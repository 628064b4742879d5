//! Read-only diagnostics over the block region.
//!
//! [`analyze`] builds an occupancy map of the host (header slots plus every
//! block reachable from a live entry) and summarises the gaps between
//! occupied blocks as a [`FragmentationInfo`].  [`verify`] goes further and
//! checks ownership of every block; see [`verify::VerifyReport`].

pub mod verify;

use serde::Serialize;

use crate::alloc::free_blocks;
use crate::block::{BlockStore, Storage};
use crate::error::{Result, StarError};
use crate::header::{Header, NO_BLOCK};

pub use verify::{verify, Issue, Owner, VerifyReport};

/// Block occupancy statistics for one archive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FragmentationInfo {
    /// Blocks held by the host, header slots included.
    pub total_blocks:        u32,
    pub header_blocks:       u32,
    /// Blocks reachable from a live entry.
    pub used_blocks:         u32,
    /// Data blocks not reachable from any entry.
    pub free_blocks:         u32,
    /// Length of the free list; equals `free_blocks` unless blocks leaked.
    pub free_list_len:       u32,
    /// Maximal runs of contiguous free blocks.
    pub free_runs:           u32,
    pub largest_free_run:    u32,
    pub smallest_free_run:   u32,
    /// Single-block runs over total free blocks; 0 when nothing is free.
    pub fragmentation_ratio: f64,
}

impl FragmentationInfo {
    pub fn is_compact(&self) -> bool {
        self.free_blocks == 0
    }
}

/// Every block owned by a live entry, in entry order then chain order.
///
/// Each block appears once; reaching a block a second time (two chains
/// sharing it, or a chain looping) is corruption.
pub fn live_blocks<S: Storage>(store: &mut BlockStore<S>, header: &Header) -> Result<Vec<u32>> {
    let mut seen = vec![false; store.block_count() as usize];
    let mut out  = Vec::new();

    for entry in header.entries() {
        let mut current = entry.start_block;
        while current != NO_BLOCK {
            store.check_index(current)?;
            if seen[current as usize] {
                return Err(StarError::BlockRevisited(current));
            }
            seen[current as usize] = true;
            out.push(current);
            current = store.read_link(current)?;
        }
    }
    Ok(out)
}

pub fn analyze<S: Storage>(store: &mut BlockStore<S>, header: &Header) -> Result<FragmentationInfo> {
    let total = store.block_count();
    let first = store.first_block();

    let mut occupied = vec![false; total as usize];
    occupied[..first as usize].fill(true);
    let live = live_blocks(store, header)?;
    for &index in &live {
        occupied[index as usize] = true;
    }

    let mut runs: Vec<u32> = Vec::new();
    let mut run = 0u32;
    for &taken in &occupied[first as usize..] {
        if taken {
            if run > 0 {
                runs.push(run);
                run = 0;
            }
        } else {
            run += 1;
        }
    }
    if run > 0 {
        runs.push(run);
    }

    let free: u32 = runs.iter().sum();
    let singles = runs.iter().filter(|&&r| r == 1).count() as u32;
    let ratio = if free == 0 { 0.0 } else { singles as f64 / free as f64 };

    Ok(FragmentationInfo {
        total_blocks:        total,
        header_blocks:       first,
        used_blocks:         live.len() as u32,
        free_blocks:         free,
        free_list_len:       free_blocks(store, header)?.len() as u32,
        free_runs:           runs.len() as u32,
        largest_free_run:    runs.iter().copied().max().unwrap_or(0),
        smallest_free_run:   runs.iter().copied().min().unwrap_or(0),
        fragmentation_ratio: ratio,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Geometry;
    use crate::io_stream::{remove_member, write_member_bytes};
    use std::io::Cursor;

    // 12-byte payloads; header = 2 * 20 + 8 = 48 bytes -> 3 slots
    fn setup() -> (BlockStore<Cursor<Vec<u8>>>, Header) {
        let g = Geometry { block_size: 16, max_entries: 2, name_len: 8 };
        let mut store = BlockStore::new(Cursor::new(Vec::new()), g).unwrap();
        store.reserve_header().unwrap();
        (store, Header::new(g))
    }

    #[test]
    fn test_empty_archive_has_no_fragmentation() {
        let (mut store, header) = setup();
        let info = analyze(&mut store, &header).unwrap();
        assert_eq!(info.total_blocks, 3);
        assert_eq!(info.header_blocks, 3);
        assert_eq!(info.used_blocks, 0);
        assert_eq!(info.free_blocks, 0);
        assert_eq!(info.fragmentation_ratio, 0.0);
        assert!(info.is_compact());
    }

    #[test]
    fn test_single_gap() {
        let (mut store, mut header) = setup();
        write_member_bytes(&mut store, &mut header, "a", &[1u8; 20]).unwrap(); // 3, 4
        write_member_bytes(&mut store, &mut header, "b", &[2u8; 5]).unwrap(); // 5
        remove_member(&mut store, &mut header, "a").unwrap();
        write_member_bytes(&mut store, &mut header, "c", &[3u8; 36]).unwrap(); // 4, 3, 6
        remove_member(&mut store, &mut header, "b").unwrap();

        let info = analyze(&mut store, &header).unwrap();
        assert_eq!(info.total_blocks, 7);
        assert_eq!(info.used_blocks, 3);
        assert_eq!(info.free_blocks, 1);
        assert_eq!(info.free_list_len, 1);
        assert_eq!(info.free_runs, 1);
        assert_eq!(info.largest_free_run, 1);
        assert_eq!(info.smallest_free_run, 1);
        assert_eq!(info.fragmentation_ratio, 1.0);
    }

    #[test]
    fn test_mixed_run_lengths() {
        let (mut store, mut header) = setup();
        write_member_bytes(&mut store, &mut header, "a", &[1u8; 36]).unwrap(); // 3, 4, 5
        write_member_bytes(&mut store, &mut header, "b", &[2u8; 12]).unwrap(); // 6
        remove_member(&mut store, &mut header, "a").unwrap();
        write_member_bytes(&mut store, &mut header, "c", &[3u8; 1]).unwrap(); // 5
        remove_member(&mut store, &mut header, "b").unwrap();

        // free: [3, 4] and [6]
        let info = analyze(&mut store, &header).unwrap();
        assert_eq!(info.used_blocks, 1);
        assert_eq!(info.free_blocks, 3);
        assert_eq!(info.free_list_len, 3);
        assert_eq!(info.free_runs, 2);
        assert_eq!(info.largest_free_run, 2);
        assert_eq!(info.smallest_free_run, 1);
        assert!((info.fragmentation_ratio - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_shared_block_is_corruption() {
        let (mut store, mut header) = setup();
        write_member_bytes(&mut store, &mut header, "a", &[1u8; 30]).unwrap();
        let start = header.entries()[0].start_block;
        write_member_bytes(&mut store, &mut header, "b", &[2u8; 5]).unwrap();
        header.entries_mut()[1].start_block = start + 1;

        let err = analyze(&mut store, &header).unwrap_err();
        assert!(matches!(err, StarError::BlockRevisited(b) if b == start + 1));
    }

    #[test]
    fn test_live_blocks_order() {
        let (mut store, mut header) = setup();
        write_member_bytes(&mut store, &mut header, "a", &[1u8; 30]).unwrap();
        write_member_bytes(&mut store, &mut header, "b", &[2u8; 5]).unwrap();
        assert_eq!(live_blocks(&mut store, &header).unwrap(), vec![3, 4, 5, 6]);
    }
}
