//! Free-list block allocator.
//!
//! Reclaimed blocks form a singly linked LIFO list threaded through their
//! own link fields, headed by `Header::free_head`.  Allocation pops that
//! list before it grows the host; it never scans.

use std::collections::HashSet;

use tracing::trace;

use crate::block::{BlockStore, Storage};
use crate::error::{Result, StarError};
use crate::header::{Header, NO_BLOCK};

/// Hand out a block index: the free-list head if there is one, otherwise
/// the next index past the end of the host.  An appended block only exists
/// once it is written.
pub fn allocate_block<S: Storage>(store: &mut BlockStore<S>, header: &mut Header) -> Result<u32> {
    if header.free_head != NO_BLOCK {
        let index = header.free_head;
        header.free_head = store.read_link(index)?;
        trace!(block = index, next_free = header.free_head, "reusing free block");
        return Ok(index);
    }

    let index = store.block_count();
    if index == NO_BLOCK {
        return Err(StarError::BlockOutOfRange {
            block: index,
            first: store.first_block(),
            count: store.block_count(),
        });
    }
    trace!(block = index, "appending block");
    Ok(index)
}

/// Push every block of the chain starting at `start` onto the free list, in
/// chain order.  Reclaiming `[b0, b1, .., bn]` leaves the list as
/// `[bn, .., b1, b0, <previous list>]`.  Returns the number of blocks freed.
///
/// The chain is validated before any link is rewritten, so a looping or
/// out-of-range chain fails without touching the free list.
pub fn reclaim_chain<S: Storage>(
    store:  &mut BlockStore<S>,
    header: &mut Header,
    start:  u32,
) -> Result<usize> {
    let blocks = chain_blocks(store, start)?;
    for &index in &blocks {
        store.write_link(index, header.free_head)?;
        header.free_head = index;
    }
    trace!(start, freed = blocks.len(), "reclaimed chain");
    Ok(blocks.len())
}

/// Block indices of the chain starting at `start`, in link order.
pub fn chain_blocks<S: Storage>(store: &mut BlockStore<S>, start: u32) -> Result<Vec<u32>> {
    walk_links(store, start)
}

/// Block indices on the free list, head first.
pub fn free_blocks<S: Storage>(store: &mut BlockStore<S>, header: &Header) -> Result<Vec<u32>> {
    walk_links(store, header.free_head)
}

fn walk_links<S: Storage>(store: &mut BlockStore<S>, start: u32) -> Result<Vec<u32>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut current = start;
    while current != NO_BLOCK {
        if !seen.insert(current) {
            return Err(StarError::Cycle(start));
        }
        out.push(current);
        current = store.read_link(current)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::header::Geometry;
    use std::io::Cursor;

    fn setup() -> (BlockStore<Cursor<Vec<u8>>>, Header) {
        let g = Geometry { block_size: 32, max_entries: 2, name_len: 8 };
        let mut store = BlockStore::new(Cursor::new(Vec::new()), g).unwrap();
        store.reserve_header().unwrap();
        (store, Header::new(g))
    }

    /// Writes a chain over freshly appended blocks and returns its indices.
    fn write_chain(store: &mut BlockStore<Cursor<Vec<u8>>>, len: usize) -> Vec<u32> {
        let g = *store.geometry();
        let first = store.block_count();
        let indices: Vec<u32> = (first..first + len as u32).collect();
        for (i, &index) in indices.iter().enumerate() {
            let mut block = Block::empty(&g);
            block.next = indices.get(i + 1).copied().unwrap_or(NO_BLOCK);
            store.write_block(index, &block).unwrap();
        }
        indices
    }

    #[test]
    fn test_allocate_appends_when_free_list_empty() {
        let (mut store, mut header) = setup();
        assert_eq!(allocate_block(&mut store, &mut header).unwrap(), 2);
        // Nothing written yet, so the same index is offered again.
        assert_eq!(allocate_block(&mut store, &mut header).unwrap(), 2);
    }

    #[test]
    fn test_reclaim_reverses_chain_order() {
        let (mut store, mut header) = setup();
        let chain = write_chain(&mut store, 3);
        assert_eq!(chain, vec![2, 3, 4]);

        assert_eq!(reclaim_chain(&mut store, &mut header, 2).unwrap(), 3);
        assert_eq!(header.free_head, 4);
        assert_eq!(free_blocks(&mut store, &header).unwrap(), vec![4, 3, 2]);
    }

    #[test]
    fn test_reclaim_prepends_to_existing_free_list() {
        let (mut store, mut header) = setup();
        let a = write_chain(&mut store, 2);
        let b = write_chain(&mut store, 2);
        reclaim_chain(&mut store, &mut header, a[0]).unwrap();
        reclaim_chain(&mut store, &mut header, b[0]).unwrap();
        assert_eq!(free_blocks(&mut store, &header).unwrap(), vec![5, 4, 3, 2]);
    }

    #[test]
    fn test_allocate_pops_lifo() {
        let (mut store, mut header) = setup();
        write_chain(&mut store, 3);
        reclaim_chain(&mut store, &mut header, 2).unwrap();

        assert_eq!(allocate_block(&mut store, &mut header).unwrap(), 4);
        assert_eq!(allocate_block(&mut store, &mut header).unwrap(), 3);
        assert_eq!(allocate_block(&mut store, &mut header).unwrap(), 2);
        assert_eq!(header.free_head, NO_BLOCK);
        assert_eq!(allocate_block(&mut store, &mut header).unwrap(), 5);
    }

    #[test]
    fn test_cyclic_chain_rejected_before_mutation() {
        let (mut store, mut header) = setup();
        write_chain(&mut store, 2);
        store.write_link(3, 2).unwrap();

        let err = reclaim_chain(&mut store, &mut header, 2).unwrap_err();
        assert!(matches!(err, StarError::Cycle(2)));
        assert_eq!(header.free_head, NO_BLOCK);
        assert_eq!(store.read_link(2).unwrap(), 3);
    }

    #[test]
    fn test_free_head_out_of_range_is_corruption() {
        let (mut store, mut header) = setup();
        header.free_head = 40;
        let err = allocate_block(&mut store, &mut header).unwrap_err();
        assert!(err.is_corruption());
    }
}
