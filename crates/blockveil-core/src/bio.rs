//! The scatter-list I/O descriptor ("bio") that every conversion walks.
//!
//! A `Bio` is a vector of `Segment`s, each pinning a page-sized buffer plus
//! a byte range within it. Segments are always sector-aligned, and by
//! construction a single sector never spans two segments: the conversion
//! loop in [`crate::convert`] depends on that invariant.
//!
//! Cloning a bio for the write path allocates fresh pages (via the page
//! pool, owned by `blockveil-membrane`); cloning it for the read path
//! shares the same page handles so ciphertext lands directly in the
//! caller's own memory. That sharing is why a page is `Arc<Mutex<..>>`
//! rather than an owned buffer.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::sector::{Direction, SectorNumber, SECTOR_SIZE};

/// A single page-sized, shared, lockable buffer.
pub type Page = Arc<Mutex<Vec<u8>>>;

pub fn new_page(len: usize) -> Page {
    Arc::new(Mutex::new(vec![0u8; len]))
}

/// One (page, offset, length) entry in a bio's scatter list.
#[derive(Clone)]
pub struct Segment {
    pub page: Page,
    pub offset: usize,
    pub len: usize,
}

impl Segment {
    pub fn new(page: Page, offset: usize, len: usize) -> Self {
        debug_assert_eq!(len % SECTOR_SIZE, 0, "segment length must be sector-aligned");
        Self { page, offset, len }
    }

    /// Copies `len` bytes starting at `offset` out of the page into `out`.
    pub fn read_into(&self, rel_offset: usize, out: &mut [u8]) {
        let page = self.page.lock();
        let start = self.offset + rel_offset;
        out.copy_from_slice(&page[start..start + out.len()]);
    }

    /// Copies `data` into the page at `offset + rel_offset`.
    pub fn write_from(&self, rel_offset: usize, data: &[u8]) {
        let mut page = self.page.lock();
        let start = self.offset + rel_offset;
        page[start..start + data.len()].copy_from_slice(data);
    }

    /// Raw pointer to this segment's data at `rel_offset`, valid for as
    /// long as the owning page is alive. The conversion engine uses this
    /// to hand the asynchronous cipher backend a destination it can write
    /// into from a background thread, after this call has returned: the
    /// page's backing allocation never moves once created, and exactly
    /// one in-flight conversion owns a given sector at a time.
    pub(crate) fn sector_ptr(&self, rel_offset: usize) -> *mut u8 {
        let mut guard = self.page.lock();
        let start = self.offset + rel_offset;
        unsafe { guard.as_mut_ptr().add(start) }
    }
}

/// A vector of memory segments tagged with a starting sector and direction,
/// exactly as delivered to (or returned from) the upper I/O submitter.
pub struct Bio {
    pub segments: Vec<Segment>,
    pub sector: SectorNumber,
    pub direction: Direction,
}

impl Bio {
    pub fn new(segments: Vec<Segment>, sector: SectorNumber, direction: Direction) -> Self {
        Self { segments, sector, direction }
    }

    pub fn total_len(&self) -> usize {
        self.segments.iter().map(|s| s.len).sum()
    }

    pub fn sector_count(&self) -> u64 {
        (self.total_len() / SECTOR_SIZE) as u64
    }

    /// Builds a bio that shares this bio's pages verbatim — the read-path
    /// clone used to fetch ciphertext into the caller's own memory.
    pub fn share_pages(&self, sector: SectorNumber, direction: Direction) -> Bio {
        Bio::new(self.segments.clone(), sector, direction)
    }
}
