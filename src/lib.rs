//! Block-chained archive format.
//!
//! A host file starts with a fixed-size header table of member entries and
//! is followed by equal-sized blocks.  Each block carries a little-endian
//! link to the next block of its chain; a member is a chain, and unused
//! blocks form a LIFO free list threaded through the same links.

pub mod alloc;
pub mod analyze;
pub mod archive;
pub mod block;
pub mod error;
pub mod header;
pub mod io_stream;
pub mod pack;

pub use analyze::{FragmentationInfo, VerifyReport};
pub use archive::Archive;
pub use block::{Block, BlockStore, Storage};
pub use error::{Result, StarError};
pub use header::{FileEntry, Geometry, Header, NO_BLOCK};
pub use pack::PackReport;
