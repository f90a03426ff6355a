//! Page-granular backing store.
//!
//! The store holds `ceil(capacity / PAGE_SIZE)` individually allocated pages.
//! Allocation is all-or-nothing: if any page cannot be obtained, every page
//! already taken goes back to the allocator before the error is reported.

use crate::{Error, Result, PAGE_SIZE};
use std::fmt;
use std::sync::Arc;

/// One backing page. Always exactly [`PAGE_SIZE`] bytes.
pub type Page = Box<[u8]>;

/// Source of backing pages.
///
/// The store only talks to pages through this trait, so tests can inject
/// allocation failures and account for every page handed out.
pub trait PageAllocator: Send + Sync {
    /// Allocate one zero-filled page, or `None` if memory is exhausted.
    fn alloc_page(&self) -> Option<Page>;

    /// Return a page previously obtained from [`PageAllocator::alloc_page`].
    fn free_page(&self, page: Page) {
        drop(page);
    }
}

/// Allocator backed by the global heap, with fallible reservation.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapPageAllocator;

impl PageAllocator for HeapPageAllocator {
    fn alloc_page(&self) -> Option<Page> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(PAGE_SIZE).ok()?;
        buf.resize(PAGE_SIZE, 0);
        Some(buf.into_boxed_slice())
    }
}

/// Fixed-size array of pages representing a device's capacity.
pub struct PagedStore {
    pages: Vec<Page>,
    capacity_bytes: u64,
    released: bool,
    allocator: Arc<dyn PageAllocator>,
}

impl PagedStore {
    /// Allocate a store from the heap.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if any page cannot be allocated.
    pub fn allocate(capacity_bytes: u64) -> Result<Self> {
        Self::allocate_with(capacity_bytes, Arc::new(HeapPageAllocator))
    }

    /// Allocate a store using the given page allocator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the page table or any page cannot be
    /// allocated. No pages remain outstanding on the error path.
    pub fn allocate_with(capacity_bytes: u64, allocator: Arc<dyn PageAllocator>) -> Result<Self> {
        let pages_requested = usize::try_from(capacity_bytes.div_ceil(PAGE_SIZE as u64))
            .map_err(|_| Error::OutOfMemory { pages_allocated: 0, pages_requested: usize::MAX })?;

        let mut pages = Vec::new();
        pages
            .try_reserve_exact(pages_requested)
            .map_err(|_| Error::OutOfMemory { pages_allocated: 0, pages_requested })?;

        for _ in 0..pages_requested {
            match allocator.alloc_page() {
                Some(mut page) if page.len() == PAGE_SIZE => {
                    page.fill(0);
                    pages.push(page);
                }
                other => {
                    let pages_allocated = pages.len();
                    if let Some(page) = other {
                        allocator.free_page(page);
                    }
                    for page in pages.drain(..) {
                        allocator.free_page(page);
                    }
                    tracing::warn!(pages_allocated, pages_requested, "Page allocation failed");
                    return Err(Error::OutOfMemory { pages_allocated, pages_requested });
                }
            }
        }

        tracing::debug!(pages = pages_requested, capacity_bytes, "Allocated paged store");
        Ok(Self { pages, capacity_bytes, released: false, allocator })
    }

    /// Number of pages currently held.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Capacity the store was sized for, in bytes.
    #[must_use]
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    /// True once [`PagedStore::release`] has returned the pages.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Borrow a page for reading.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PageOutOfRange`] if `index` is past the last page.
    pub fn read_page(&self, index: usize) -> Result<&[u8]> {
        let pages = self.pages.len();
        self.pages
            .get(index)
            .map(|page| &page[..])
            .ok_or(Error::PageOutOfRange { index, pages })
    }

    /// Borrow a page for writing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PageOutOfRange`] if `index` is past the last page.
    pub fn write_page(&mut self, index: usize) -> Result<&mut [u8]> {
        let pages = self.pages.len();
        self.pages
            .get_mut(index)
            .map(|page| &mut page[..])
            .ok_or(Error::PageOutOfRange { index, pages })
    }

    /// Return every page to the allocator. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let released = self.pages.len();
        for page in self.pages.drain(..) {
            self.allocator.free_page(page);
        }
        self.pages.shrink_to_fit();
        tracing::debug!(pages = released, "Released paged store");
    }
}

impl Drop for PagedStore {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for PagedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagedStore")
            .field("pages", &self.pages.len())
            .field("capacity_bytes", &self.capacity_bytes)
            .finish_non_exhaustive()
    }
}
