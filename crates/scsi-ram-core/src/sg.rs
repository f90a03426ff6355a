//! Scatter-gather transfer engine.
//!
//! A command carries an ordered list of caller-owned buffer windows. The
//! engine moves bytes between that list and the [`PagedStore`], splitting each
//! step at whichever boundary comes first: the end of the current store page,
//! the end of the current segment, or the end of the requested length.

use crate::page::PagedStore;
use crate::{Error, Result, PAGE_SIZE};

/// One caller-supplied buffer window: `buf[offset..offset + len]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SgSegment {
    buf: Vec<u8>,
    offset: usize,
    len: usize,
}

impl SgSegment {
    /// Describe a window inside `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSegment`] if the window runs past the buffer.
    pub fn new(buf: Vec<u8>, offset: usize, len: usize) -> Result<Self> {
        match offset.checked_add(len) {
            Some(end) if end <= buf.len() => Ok(Self { buf, offset, len }),
            _ => Err(Error::InvalidSegment { offset, len, buffer_len: buf.len() }),
        }
    }

    /// Use the whole buffer as the window.
    #[must_use]
    pub fn from_vec(buf: Vec<u8>) -> Self {
        let len = buf.len();
        Self { buf, offset: 0, len }
    }

    /// A zero-filled segment of `len` bytes.
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        Self::from_vec(vec![0; len])
    }

    /// Window length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length window.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of the window inside its buffer.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The bytes inside the window.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[self.offset..self.offset + self.len]
    }

    /// The bytes inside the window, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf[self.offset..self.offset + self.len]
    }

    /// Give the backing buffer back to the caller.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Ordered list of segments attached to a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SgList {
    segments: Vec<SgSegment>,
}

impl SgList {
    /// An empty list (commands with no data phase).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from segments, in order.
    #[must_use]
    pub fn from_segments(segments: Vec<SgSegment>) -> Self {
        Self { segments }
    }

    /// Split `data` into consecutive segments of at most `chunk` bytes.
    #[must_use]
    pub fn chunked(data: &[u8], chunk: usize) -> Self {
        let chunk = chunk.max(1);
        Self { segments: data.chunks(chunk).map(|c| SgSegment::from_vec(c.to_vec())).collect() }
    }

    /// `count` zero-filled segments of `len` bytes each.
    #[must_use]
    pub fn zeroed(count: usize, len: usize) -> Self {
        Self { segments: (0..count).map(|_| SgSegment::zeroed(len)).collect() }
    }

    /// Append a segment.
    pub fn push(&mut self, segment: SgSegment) {
        self.segments.push(segment);
    }

    /// Number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// True if the list has no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Sum of all segment lengths.
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.segments.iter().map(SgSegment::len).sum()
    }

    /// The segments, in order.
    #[must_use]
    pub fn segments(&self) -> &[SgSegment] {
        &self.segments
    }

    /// Consume the list, returning its segments.
    #[must_use]
    pub fn into_segments(self) -> Vec<SgSegment> {
        self.segments
    }

    /// Concatenate every window into one buffer.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len());
        for segment in &self.segments {
            out.extend_from_slice(segment.as_slice());
        }
        out
    }

    /// Scatter `src` across the segments. Returns the bytes copied, which is
    /// `min(src.len(), total_len())`.
    pub fn copy_from_buffer(&mut self, src: &[u8]) -> usize {
        let mut copied = 0;
        for segment in &mut self.segments {
            if copied == src.len() {
                break;
            }
            let dst = segment.as_mut_slice();
            let n = dst.len().min(src.len() - copied);
            dst[..n].copy_from_slice(&src[copied..copied + n]);
            copied += n;
        }
        copied
    }

    fn segment_lengths(&self) -> Vec<usize> {
        self.segments.iter().map(SgSegment::len).collect()
    }
}

/// Which way bytes move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Store to segments.
    Read,
    /// Segments to store.
    Write,
}

/// Bytes moved by one transfer and the part of the request left over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferOutcome {
    /// Bytes copied.
    pub transferred: usize,
    /// Requested bytes that had no segment space.
    pub residual: usize,
}

/// One copy step: a run that stays inside a single page and a single segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Chunk {
    page: usize,
    page_offset: usize,
    segment: usize,
    segment_offset: usize,
    len: usize,
}

/// Walks the two boundary sequences together.
struct ChunkPlan {
    lengths: Vec<usize>,
    segment: usize,
    segment_offset: usize,
    page: usize,
    page_offset: usize,
    remaining: usize,
}

impl ChunkPlan {
    fn new(store_offset: usize, amount: usize, lengths: Vec<usize>) -> Self {
        Self {
            lengths,
            segment: 0,
            segment_offset: 0,
            page: store_offset / PAGE_SIZE,
            page_offset: store_offset % PAGE_SIZE,
            remaining: amount,
        }
    }
}

impl Iterator for ChunkPlan {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        while self.remaining > 0 {
            let seg_len = *self.lengths.get(self.segment)?;
            let in_segment = seg_len - self.segment_offset;
            if in_segment == 0 {
                self.segment += 1;
                self.segment_offset = 0;
                continue;
            }

            let len = (PAGE_SIZE - self.page_offset).min(in_segment).min(self.remaining);
            let chunk = Chunk {
                page: self.page,
                page_offset: self.page_offset,
                segment: self.segment,
                segment_offset: self.segment_offset,
                len,
            };

            self.remaining -= len;
            self.page_offset += len;
            if self.page_offset == PAGE_SIZE {
                self.page_offset = 0;
                self.page += 1;
            }
            self.segment_offset += len;
            return Some(chunk);
        }
        None
    }
}

/// Validate the byte range and work out how much will actually move.
fn plan(store: &PagedStore, store_offset: u64, total: usize, sg_len: usize) -> Result<(usize, usize)> {
    let amount = total.min(sg_len);
    let end = store_offset.saturating_add(amount as u64);
    if end > store.capacity_bytes() || store.is_released() {
        let index = usize::try_from(end.saturating_sub(1) / PAGE_SIZE as u64).unwrap_or(usize::MAX);
        return Err(Error::PageOutOfRange { index, pages: store.page_count() });
    }
    let start = usize::try_from(store_offset)
        .map_err(|_| Error::PageOutOfRange { index: usize::MAX, pages: store.page_count() })?;
    Ok((start, amount))
}

/// Copy from the store into the segments.
///
/// # Errors
///
/// Returns [`Error::PageOutOfRange`] if the range runs past the store. Nothing
/// is copied in that case.
pub fn read_into(
    store: &PagedStore,
    store_offset: u64,
    total: usize,
    sg: &mut SgList,
) -> Result<TransferOutcome> {
    let (start, amount) = plan(store, store_offset, total, sg.total_len())?;

    for chunk in ChunkPlan::new(start, amount, sg.segment_lengths()) {
        let page = store.read_page(chunk.page)?;
        let dst = sg.segments[chunk.segment].as_mut_slice();
        dst[chunk.segment_offset..chunk.segment_offset + chunk.len]
            .copy_from_slice(&page[chunk.page_offset..chunk.page_offset + chunk.len]);
    }

    Ok(TransferOutcome { transferred: amount, residual: total - amount })
}

/// Copy from the segments into the store.
///
/// # Errors
///
/// Returns [`Error::PageOutOfRange`] if the range runs past the store. Nothing
/// is copied in that case.
pub fn write_from(
    store: &mut PagedStore,
    store_offset: u64,
    total: usize,
    sg: &SgList,
) -> Result<TransferOutcome> {
    let (start, amount) = plan(store, store_offset, total, sg.total_len())?;

    for chunk in ChunkPlan::new(start, amount, sg.segment_lengths()) {
        let src = sg.segments[chunk.segment].as_slice();
        let page = store.write_page(chunk.page)?;
        page[chunk.page_offset..chunk.page_offset + chunk.len]
            .copy_from_slice(&src[chunk.segment_offset..chunk.segment_offset + chunk.len]);
    }

    Ok(TransferOutcome { transferred: amount, residual: total - amount })
}

/// Move `min(total, sg.total_len())` bytes between the store at
/// `store_offset` and the segment list.
///
/// # Errors
///
/// Returns [`Error::PageOutOfRange`] if the range runs past the store.
pub fn transfer(
    direction: Direction,
    store: &mut PagedStore,
    store_offset: u64,
    total: usize,
    sg: &mut SgList,
) -> Result<TransferOutcome> {
    match direction {
        Direction::Read => read_into(store, store_offset, total, sg),
        Direction::Write => write_from(store, store_offset, total, sg),
    }
}
