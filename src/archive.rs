//! High-level [`Archive`] handle over one host file.
//!
//! ```no_run
//! use star::archive::Archive;
//! use star::header::Geometry;
//!
//! let mut ar = Archive::create("out.star", Geometry::default())?;
//! ar.add_bytes("readme.txt", b"Hello, world!")?;
//! ar.remove("readme.txt")?;
//! ar.add_bytes("notes.txt", b"reuses the freed block")?;
//! ar.pack()?;
//!
//! let mut ar = Archive::open("out.star", Geometry::default())?;
//! assert_eq!(ar.read("notes.txt")?, b"reuses the freed block");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! The header is loaded once when the handle is opened and written back at
//! the end of every mutating call.  Nothing guards against a second handle
//! on the same host; callers must serialize access themselves.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};

use crate::alloc::{chain_blocks, free_blocks};
use crate::analyze::{analyze, verify, FragmentationInfo, VerifyReport};
use crate::block::{BlockStore, Storage};
use crate::error::{Result, StarError};
use crate::header::{FileEntry, Geometry, Header, NO_BLOCK};
use crate::io_stream::{copy_member, read_member, remove_member, write_member};
use crate::pack::{compact, PackReport};

pub struct Archive<S: Storage = File> {
    path:   Option<PathBuf>,
    store:  BlockStore<S>,
    header: Header,
}

impl Archive<File> {
    // ── Constructors ─────────────────────────────────────────────────────────

    /// Create (or overwrite) an archive file holding no members.
    pub fn create<P: AsRef<Path>>(path: P, geometry: Geometry) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let mut ar = Self::create_in(file, geometry)?;
        info!(path = %path.display(), "archive created");
        ar.path = Some(path);
        Ok(ar)
    }

    /// Open an existing archive for reading and writing.
    pub fn open<P: AsRef<Path>>(path: P, geometry: Geometry) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let mut ar = Self::open_in(file, geometry)?;
        ar.path = Some(path);
        Ok(ar)
    }

    /// Open an existing archive without write access.  Mutating calls fail
    /// with an I/O error.
    pub fn open_read_only<P: AsRef<Path>>(path: P, geometry: Geometry) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let mut ar = Self::open_in(File::open(&path)?, geometry)?;
        ar.path = Some(path);
        Ok(ar)
    }
}

impl<S: Storage> Archive<S> {
    /// Start a fresh archive on `storage`, discarding whatever it held.
    pub fn create_in(storage: S, geometry: Geometry) -> Result<Self> {
        let mut store = BlockStore::new(storage, geometry)?;
        store.truncate(0)?;
        let header = Header::new(geometry);
        store.write_header(&header)?;
        store.flush()?;
        Ok(Self { path: None, store, header })
    }

    pub fn open_in(storage: S, geometry: Geometry) -> Result<Self> {
        let mut store = BlockStore::new(storage, geometry)?;
        let header = store.read_header()?;
        debug!(
            members = header.count(),
            blocks = store.block_count(),
            free_head = header.free_head,
            "archive opened"
        );
        Ok(Self { path: None, store, header })
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn geometry(&self) -> &Geometry {
        self.store.geometry()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Members in insertion order.
    pub fn list(&self) -> &[FileEntry] {
        self.header.entries()
    }

    pub fn stat(&self, name: &str) -> Option<&FileEntry> {
        self.header.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.header.find(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.header.count()
    }

    pub fn is_empty(&self) -> bool {
        self.header.count() == 0
    }

    pub fn block_count(&self) -> u32 {
        self.store.block_count()
    }

    pub fn into_inner(self) -> S {
        self.store.into_inner()
    }

    // ── Write ────────────────────────────────────────────────────────────────

    /// Add `length` bytes from `reader` as member `name`.
    pub fn add<R: Read>(&mut self, name: &str, reader: R, length: u64) -> Result<FileEntry> {
        let entry = write_member(&mut self.store, &mut self.header, name, reader, length)?;
        self.persist()?;
        Ok(entry)
    }

    pub fn add_bytes(&mut self, name: &str, data: &[u8]) -> Result<FileEntry> {
        self.add(name, data, data.len() as u64)
    }

    /// Add the file at `path`, stored under the path as given.  A path that
    /// is not UTF-8 is an `InvalidInput` I/O error.
    pub fn add_path(&mut self, path: &Path) -> Result<FileEntry> {
        let name = member_name(path)?;
        let file = File::open(path)?;
        let length = file.metadata()?.len();
        self.add(name, BufReader::new(file), length)
    }

    /// Replace an existing member.  The replacement moves to the end of the
    /// listing.
    pub fn update<R: Read>(&mut self, name: &str, reader: R, length: u64) -> Result<FileEntry> {
        if !remove_member(&mut self.store, &mut self.header, name)? {
            return Err(StarError::NotFound(name.to_owned()));
        }
        let entry = write_member(&mut self.store, &mut self.header, name, reader, length);
        // The removal already happened; keep the header in step with it
        // even if the rewrite failed.
        self.persist()?;
        entry
    }

    pub fn update_path(&mut self, path: &Path) -> Result<FileEntry> {
        let name = member_name(path)?;
        let file = File::open(path)?;
        let length = file.metadata()?.len();
        self.update(name, BufReader::new(file), length)
    }

    /// Remove a member.  Returns `false` when it does not exist.
    pub fn remove(&mut self, name: &str) -> Result<bool> {
        let removed = remove_member(&mut self.store, &mut self.header, name)?;
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Compact the archive; see [`crate::pack`].
    pub fn pack(&mut self) -> Result<PackReport> {
        compact(&mut self.store, &mut self.header)
    }

    fn persist(&mut self) -> Result<()> {
        self.store.write_header(&self.header)?;
        self.store.flush()
    }

    // ── Read ─────────────────────────────────────────────────────────────────

    fn entry(&self, name: &str) -> Result<FileEntry> {
        self.header
            .get(name)
            .cloned()
            .ok_or_else(|| StarError::NotFound(name.to_owned()))
    }

    pub fn read(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self.entry(name)?;
        read_member(&mut self.store, &entry)
    }

    pub fn copy_to<W: Write>(&mut self, name: &str, out: W) -> Result<u64> {
        let entry = self.entry(name)?;
        copy_member(&mut self.store, &entry, out)
    }

    /// Extract every member into `dest`, creating directories as needed.
    /// Only the normal components of a stored name are used, so a member
    /// cannot be written outside `dest`.  Returns the written paths.
    pub fn extract_all<P: AsRef<Path>>(&mut self, dest: P) -> Result<Vec<PathBuf>> {
        let dest = dest.as_ref();
        let mut written = Vec::with_capacity(self.header.count());
        for entry in self.header.entries().to_vec() {
            let relative: PathBuf = Path::new(&entry.name)
                .components()
                .filter_map(|c| match c {
                    Component::Normal(part) => Some(part),
                    _ => None,
                })
                .collect();
            if relative.as_os_str().is_empty() {
                warn!(name = %entry.name, "skipping member with no usable path");
                continue;
            }

            let target = dest.join(relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = BufWriter::new(File::create(&target)?);
            copy_member(&mut self.store, &entry, &mut out)?;
            out.flush()?;
            debug!(name = %entry.name, path = %target.display(), size = entry.size, "extracted");
            written.push(target);
        }
        Ok(written)
    }

    // ── Diagnostics ──────────────────────────────────────────────────────────

    pub fn stats(&mut self) -> Result<FragmentationInfo> {
        analyze(&mut self.store, &self.header)
    }

    pub fn verify(&mut self) -> Result<VerifyReport> {
        verify(&mut self.store, &self.header)
    }

    /// Block indices of a member's chain, in order.
    pub fn blocks_of(&mut self, name: &str) -> Result<Vec<u32>> {
        let entry = self.entry(name)?;
        if entry.start_block == NO_BLOCK {
            return Ok(Vec::new());
        }
        chain_blocks(&mut self.store, entry.start_block)
    }

    /// Free-list block indices, next to be reused first.
    pub fn free_list(&mut self) -> Result<Vec<u32>> {
        free_blocks(&mut self.store, &self.header)
    }
}

fn member_name(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| {
        StarError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{}: path is not valid UTF-8", path.display()),
        ))
    })
}
