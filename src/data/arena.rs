//! Transfer-buffer arena for halo messages.
//!
//! Exchange sessions draw one send span and one receive span per batch from
//! an [`Arena`]. Spans are handed out as [`ArenaBuffer`]s, which return their
//! chunks to the arena on drop, so a failed or finished session releases
//! everything it held.
//!
//! Memory is allocated in 16-byte [`Chunk`]s so every span is aligned for
//! any element type up to 16 bytes of alignment.

use crate::halo_error::HaloError;
use bytemuck::{Pod, Zeroable};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use static_assertions::{assert_eq_size, const_assert_eq};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Allocation granule of every arena.
#[repr(C, align(16))]
#[derive(Copy, Clone, Debug, Default)]
pub struct Chunk(pub [u8; 16]);

// SAFETY: a byte array with no padding; every bit pattern is valid.
unsafe impl Zeroable for Chunk {}
unsafe impl Pod for Chunk {}

assert_eq_size!(Chunk, [u8; 16]);
const_assert_eq!(std::mem::align_of::<Chunk>(), 16);

pub const CHUNK_BYTES: usize = std::mem::size_of::<Chunk>();

/// Where a buffer lives, and therefore who may touch it directly.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Residency {
    #[default]
    Host,
    Device,
    Managed,
    Pinned,
}

impl Residency {
    #[inline]
    pub fn is_host_accessible(self) -> bool {
        !matches!(self, Residency::Device)
    }

    #[inline]
    pub fn is_device_accessible(self) -> bool {
        !matches!(self, Residency::Host)
    }
}

/// Source of transfer spans.
pub trait Arena: Send + Sync {
    /// Chunks covering at least `nbytes`.
    ///
    /// # Errors
    /// `ArenaExhausted` if the request would exceed the arena's limit.
    fn alloc(&self, nbytes: usize) -> Result<Vec<Chunk>, HaloError>;

    /// Return chunks obtained from [`alloc`](Self::alloc).
    fn free(&self, chunks: Vec<Chunk>);

    fn residency(&self) -> Residency;

    /// Bytes currently handed out.
    fn in_use(&self) -> usize;

    fn is_host_accessible(&self) -> bool {
        self.residency().is_host_accessible()
    }

    fn is_device_accessible(&self) -> bool {
        self.residency().is_device_accessible()
    }
}

#[derive(Debug, Default)]
struct PoolState {
    /// Free lists keyed by chunk count (a power of two).
    free: BTreeMap<usize, Vec<Vec<Chunk>>>,
    in_use: usize,
    cached: usize,
}

/// Size-class pool with an optional cap on bytes in use.
pub struct PoolArena {
    residency: Residency,
    limit: Option<usize>,
    max_cached: usize,
    state: Mutex<PoolState>,
}

impl PoolArena {
    /// Bytes kept on free lists before returned spans are dropped instead.
    pub const DEFAULT_MAX_CACHED: usize = 64 << 20;

    pub fn new(residency: Residency) -> Self {
        Self {
            residency,
            limit: None,
            max_cached: Self::DEFAULT_MAX_CACHED,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Refuse allocations that would push bytes in use past `limit`.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Bytes sitting on free lists.
    pub fn cached(&self) -> usize {
        self.state.lock().cached
    }

    /// Drop every cached span.
    pub fn trim(&self) {
        let mut st = self.state.lock();
        st.free.clear();
        st.cached = 0;
    }

    fn class_of(nbytes: usize) -> usize {
        nbytes.div_ceil(CHUNK_BYTES).max(1).next_power_of_two()
    }
}

impl Arena for PoolArena {
    fn alloc(&self, nbytes: usize) -> Result<Vec<Chunk>, HaloError> {
        let class = Self::class_of(nbytes);
        let bytes = class * CHUNK_BYTES;
        let mut st = self.state.lock();
        if let Some(limit) = self.limit {
            if st.in_use + bytes > limit {
                log::warn!(
                    "arena exhausted: {nbytes} bytes requested, {} in use, limit {limit}",
                    st.in_use
                );
                return Err(HaloError::ArenaExhausted {
                    requested: nbytes,
                    in_use: st.in_use,
                    limit,
                });
            }
        }
        st.in_use += bytes;
        if let Some(chunks) = st.free.get_mut(&class).and_then(|l| l.pop()) {
            st.cached -= bytes;
            return Ok(chunks);
        }
        drop(st);
        Ok(vec![Chunk::zeroed(); class])
    }

    fn free(&self, chunks: Vec<Chunk>) {
        let bytes = chunks.len() * CHUNK_BYTES;
        let mut st = self.state.lock();
        st.in_use = st.in_use.saturating_sub(bytes);
        if chunks.len().is_power_of_two() && st.cached + bytes <= self.max_cached {
            st.cached += bytes;
            st.free.entry(chunks.len()).or_default().push(chunks);
        }
    }

    fn residency(&self) -> Residency {
        self.residency
    }

    fn in_use(&self) -> usize {
        self.state.lock().in_use
    }
}

impl fmt::Debug for PoolArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("PoolArena")
            .field("residency", &self.residency)
            .field("limit", &self.limit)
            .field("in_use", &st.in_use)
            .field("cached", &st.cached)
            .finish()
    }
}

static COMMS_ARENA: Lazy<Arc<dyn Arena>> =
    Lazy::new(|| Arc::new(PoolArena::new(Residency::Pinned)));

/// Process-wide arena for exchange buffers.
pub fn comms_arena() -> Arc<dyn Arena> {
    Arc::clone(&COMMS_ARENA)
}

/// A span of `len` bytes owned until drop.
pub struct ArenaBuffer {
    chunks: Vec<Chunk>,
    len: usize,
    arena: Arc<dyn Arena>,
}

impl ArenaBuffer {
    pub fn new(arena: &Arc<dyn Arena>, len: usize) -> Result<Self, HaloError> {
        let chunks = arena.alloc(len)?;
        Ok(Self {
            chunks,
            len,
            arena: Arc::clone(arena),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.chunks)[..self.len]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.chunks)[..self.len]
    }
}

impl Drop for ArenaBuffer {
    fn drop(&mut self) {
        self.arena.free(std::mem::take(&mut self.chunks));
    }
}

impl fmt::Debug for ArenaBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaBuffer").field("len", &self.len).finish()
    }
}
