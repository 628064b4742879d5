//! Ownership verifier.
//!
//! Every data block must belong to exactly one owner: a single member's
//! chain or the free list.  [`verify`] walks all chains and the free list
//! and records each violation as an [`Issue`] instead of failing on the
//! first one, so a damaged archive can still be inspected.  Only genuine
//! I/O errors propagate as `Err`.
//!
//! | Issue | Meaning |
//! |-------|---------|
//! | `OutOfRange` | A link points into the header or past the end of the host |
//! | `SharedBlock` | A block is reached from two owners, or twice from one |
//! | `ChainTooShort` | A chain ends before the member's recorded size |
//! | `ExcessBlocks` | A chain runs on past the blocks its size needs |
//!
//! Blocks owned by nobody are reported separately as orphans.

use serde::Serialize;

use crate::block::{BlockStore, Storage};
use crate::error::{Result, StarError};
use crate::header::{Header, NO_BLOCK};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Owner {
    Member(String),
    FreeList,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Issue {
    OutOfRange { owner: Owner, block: u32 },
    SharedBlock { block: u32, first: Owner, second: Owner },
    ChainTooShort { name: String, missing: u64 },
    ExcessBlocks { name: String, extra: u64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub members_checked: usize,
    pub owned_blocks:    u32,
    pub free_list_len:   u32,
    /// Data blocks reachable from neither a chain nor the free list.
    pub orphans:         Vec<u32>,
    pub issues:          Vec<Issue>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty() && self.orphans.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} member(s), {} owned block(s), {} free, {} orphaned, {} issue(s)",
            self.members_checked,
            self.owned_blocks,
            self.free_list_len,
            self.orphans.len(),
            self.issues.len(),
        )
    }
}

pub fn verify<S: Storage>(store: &mut BlockStore<S>, header: &Header) -> Result<VerifyReport> {
    let first   = store.first_block();
    let payload = store.geometry().payload_size() as u64;

    let mut owners: Vec<Option<Owner>> = vec![None; store.block_count() as usize];
    let mut issues = Vec::new();
    let mut owned_blocks = 0u32;

    for entry in header.entries() {
        let owner = Owner::Member(entry.name.clone());
        let walked = walk(store, entry.start_block, &owner, &mut owners, &mut issues)?;
        owned_blocks += walked as u32;

        let needed = store.geometry().blocks_for(entry.size);
        let walked = walked as u64;
        if walked < needed {
            issues.push(Issue::ChainTooShort {
                name:    entry.name.clone(),
                missing: entry.size - walked * payload,
            });
        } else if walked > needed {
            issues.push(Issue::ExcessBlocks { name: entry.name.clone(), extra: walked - needed });
        }
    }

    let free_list_len =
        walk(store, header.free_head, &Owner::FreeList, &mut owners, &mut issues)? as u32;

    let orphans = owners
        .iter()
        .enumerate()
        .skip(first as usize)
        .filter(|(_, o)| o.is_none())
        .map(|(i, _)| i as u32)
        .collect();

    Ok(VerifyReport {
        members_checked: header.count(),
        owned_blocks,
        free_list_len,
        orphans,
        issues,
    })
}

/// Claim every block from `start` for `owner`.  Stops at the first block
/// that cannot be claimed, since its link cannot be trusted.
fn walk<S: Storage>(
    store:  &mut BlockStore<S>,
    start:  u32,
    owner:  &Owner,
    owners: &mut [Option<Owner>],
    issues: &mut Vec<Issue>,
) -> Result<usize> {
    let mut claimed = 0;
    let mut current = start;
    while current != NO_BLOCK {
        if store.check_index(current).is_err() {
            issues.push(Issue::OutOfRange { owner: owner.clone(), block: current });
            break;
        }
        if let Some(first) = &owners[current as usize] {
            issues.push(Issue::SharedBlock {
                block:  current,
                first:  first.clone(),
                second: owner.clone(),
            });
            break;
        }
        owners[current as usize] = Some(owner.clone());
        claimed += 1;
        current = match store.read_link(current) {
            Ok(next) => next,
            Err(StarError::ShortRead { .. }) => {
                issues.push(Issue::OutOfRange { owner: owner.clone(), block: current });
                break;
            }
            Err(e) => return Err(e),
        };
    }
    Ok(claimed)
}
