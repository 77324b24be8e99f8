//! Exchange engine: two-phase halo fill, parallel copy and redistribution.
//!
//! `start_*` validates its arguments, fetches the communication pattern,
//! posts every receive, packs and posts every send, runs the local copies
//! and returns an [`ExchangeSession`]. [`ExchangeSession::finish`] waits for
//! the receives, unpacks them, waits for the sends and releases the transfer
//! spans. Nothing blocks between the two calls, so callers can overlap
//! computation on valid cells with communication.
//!
//! The session mutably borrows its engine, so an engine has at most one
//! exchange in flight. A store is additionally marked busy between start and
//! finish, so a second exchange on it through another engine is rejected.
//!
//! Components are moved in batches of at most [`ExchangeConfig::max_comp`].
//! Every batch but the last runs a complete start/finish cycle inside
//! `start_*`; the last batch is the one the returned session finishes.

use super::cache::PatternCache;
use super::pack::{
    PeerSlot, copy_local_between, copy_local_within, layout, pack_tags, unpack_tags,
};
use super::pattern::{CopyKey, FillKey};
use super::tags::{CommMetaData, CopyTag};
use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{expect_exact_len, try_cast_from, try_cast_from_mut};
use crate::data::arena::{Arena, ArenaBuffer, comms_arena};
use crate::data::payload::{Element, FillOp};
use crate::data::store::BoxStore;
use crate::geometry::IntVect;
use crate::halo_error::HaloError;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::mem::size_of;
use std::sync::Arc;

/// Tunables of an [`ExchangeEngine`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Components moved per batch.
    pub max_comp: usize,
    /// Compare every received message with its expected length.
    pub check_message_sizes: bool,
    /// Test each receive once right after posting.
    pub poll_receives: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            max_comp: 25,
            check_message_sizes: cfg!(debug_assertions),
            poll_receives: true,
        }
    }
}

/// In-flight state of one batch.
struct Posted<C: Communicator> {
    store_id: u64,
    pattern: Option<Arc<CommMetaData>>,
    dcomp: usize,
    ncomp: usize,
    op: FillOp,
    recvs: Vec<(PeerSlot, C::RecvHandle)>,
    recv_buf: Option<ArenaBuffer>,
    sends: Vec<C::SendHandle>,
    send_buf: Option<ArenaBuffer>,
}

impl<C: Communicator> Posted<C> {
    fn completed(store_id: u64) -> Self {
        Self {
            store_id,
            pattern: None,
            dcomp: 0,
            ncomp: 0,
            op: FillOp::Copy,
            recvs: Vec::new(),
            recv_buf: None,
            sends: Vec::new(),
            send_buf: None,
        }
    }

    fn is_complete(&self) -> bool {
        self.recvs.is_empty() && self.sends.is_empty()
    }
}

pub struct ExchangeEngine<'a, C: Communicator> {
    comm: &'a C,
    cache: &'a PatternCache,
    arena: Arc<dyn Arena>,
    config: ExchangeConfig,
}

/// An exchange between `start_*` and [`finish`](ExchangeSession::finish).
///
/// Dropping a session without finishing discards the data in flight and
/// leaves the store marked busy until [`BoxStore::abandon_session`].
#[must_use = "an exchange session must be finished"]
pub struct ExchangeSession<'e, 'a, C: Communicator, T: Element> {
    engine: &'e mut ExchangeEngine<'a, C>,
    posted: Posted<C>,
    _elem: PhantomData<fn() -> T>,
}

impl<'e, 'a, C: Communicator, T: Element> ExchangeSession<'e, 'a, C, T> {
    /// True if there is nothing left to wait for.
    pub fn is_complete(&self) -> bool {
        self.posted.is_complete()
    }

    /// Id of the store the session was started on.
    pub fn store_id(&self) -> u64 {
        self.posted.store_id
    }

    /// Receives still outstanding.
    pub fn pending_receives(&self) -> usize {
        self.posted.recvs.len()
    }

    /// Complete the exchange into `store`, the store it was started on.
    ///
    /// # Errors
    /// `StoreMismatch` for any other store (the transfers are still drained);
    /// `MessageSizeMismatch` or `MissingMessage` on transport inconsistencies.
    pub fn finish(self, store: &mut BoxStore<T>) -> Result<(), HaloError> {
        self.engine.complete(self.posted, store)
    }
}

fn check_comps(start: usize, count: usize, ncomp: usize) -> Result<(), HaloError> {
    if start + count <= ncomp {
        Ok(())
    } else {
        Err(HaloError::ComponentRange {
            start,
            count,
            ncomp,
        })
    }
}

fn check_idle<T: Element>(store: &BoxStore<T>) -> Result<(), HaloError> {
    if store.is_session_open() {
        Err(HaloError::SessionInProgress { store: store.id() })
    } else {
        Ok(())
    }
}

fn check_ghost<T: Element>(store: &BoxStore<T>, requested: IntVect) -> Result<(), HaloError> {
    if requested.all_le(store.n_grow()) {
        Ok(())
    } else {
        Err(HaloError::GhostWidth {
            requested,
            available: store.n_grow(),
        })
    }
}

/// Run `f`, clearing the store's session flag if it fails.
fn or_end_session<T: Element, R>(
    store: &mut BoxStore<T>,
    f: impl FnOnce(&mut BoxStore<T>) -> Result<R, HaloError>,
) -> Result<R, HaloError> {
    let r = f(store);
    if r.is_err() {
        store.end_session();
    }
    r
}

impl<'a, C: Communicator> ExchangeEngine<'a, C> {
    /// Engine over `comm` using the process-wide pattern cache and arena.
    pub fn new(comm: &'a C) -> Self {
        Self {
            comm,
            cache: PatternCache::global(),
            arena: comms_arena(),
            config: ExchangeConfig::default(),
        }
    }

    pub fn with_cache(mut self, cache: &'a PatternCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_arena(mut self, arena: Arc<dyn Arena>) -> Self {
        self.arena = arena;
        self
    }

    pub fn with_config(mut self, config: ExchangeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn comm(&self) -> &C {
        self.comm
    }

    pub fn cache(&self) -> &PatternCache {
        self.cache
    }

    fn completed<T: Element>(&mut self, store_id: u64) -> ExchangeSession<'_, 'a, C, T> {
        ExchangeSession {
            engine: self,
            posted: Posted::completed(store_id),
            _elem: PhantomData,
        }
    }

    /// `(first component, count)` of every batch.
    fn batches(&self, start: usize, ncomp: usize) -> Vec<(usize, usize)> {
        let step = self.config.max_comp.max(1);
        (0..ncomp)
            .step_by(step)
            .map(|off| (start + off, step.min(ncomp - off)))
            .collect()
    }

    // ------------------------------------------------------------------
    // Self-fill
    // ------------------------------------------------------------------

    /// Start filling ghost cells of components `[scomp, scomp + ncomp)`.
    pub fn start_fill<T: Element>(
        &mut self,
        store: &mut BoxStore<T>,
        scomp: usize,
        ncomp: usize,
        key: &FillKey,
    ) -> Result<ExchangeSession<'_, 'a, C, T>, HaloError> {
        check_idle(store)?;
        check_comps(scomp, ncomp, store.ncomp())?;
        check_ghost(store, key.ghost)?;
        if key.is_noop() || ncomp == 0 || store.region().is_empty() {
            return Ok(self.completed(store.id()));
        }
        let mut batches = self.batches(scomp, ncomp);
        let last = batches.pop().unwrap_or((scomp, ncomp));
        for (c0, n) in batches {
            let p = self.post_fill(store, c0, n, key)?;
            self.complete(p, store)?;
        }
        let posted = self.post_fill(store, last.0, last.1, key)?;
        Ok(ExchangeSession {
            engine: self,
            posted,
            _elem: PhantomData,
        })
    }

    fn post_fill<T: Element>(
        &self,
        store: &mut BoxStore<T>,
        scomp: usize,
        ncomp: usize,
        key: &FillKey,
    ) -> Result<Posted<C>, HaloError> {
        let rank = self.comm.rank();
        if self.comm.size() == 1 {
            let md = self.cache.fill(store.region(), store.dist(), key, rank);
            copy_local_within(store, &md.local, scomp, scomp, ncomp, FillOp::Copy)?;
            return Ok(Posted::completed(store.id()));
        }
        let tag = self.comm.next_tag();
        let md = self.cache.fill(store.region(), store.dist(), key, rank);
        store.begin_session()?;
        or_end_session(store, |store| {
            let posted = self.post(md, store, scomp, scomp, ncomp, FillOp::Copy, tag, store.id())?;
            if let Some(md) = &posted.pattern {
                copy_local_within(store, &md.local, scomp, scomp, ncomp, FillOp::Copy)?;
            }
            self.poll(&posted);
            Ok(posted)
        })
    }

    /// Blocking self-fill.
    pub fn fill_boundary<T: Element>(
        &mut self,
        store: &mut BoxStore<T>,
        scomp: usize,
        ncomp: usize,
        key: &FillKey,
    ) -> Result<(), HaloError> {
        self.start_fill(store, scomp, ncomp, key)?.finish(store)
    }

    // ------------------------------------------------------------------
    // Cross-copy
    // ------------------------------------------------------------------

    /// Start copying components `[scomp, scomp + ncomp)` of `src` into
    /// `[dcomp, dcomp + ncomp)` of `dst`.
    #[allow(clippy::too_many_arguments)]
    pub fn start_copy<T: Element>(
        &mut self,
        dst: &mut BoxStore<T>,
        src: &BoxStore<T>,
        scomp: usize,
        dcomp: usize,
        ncomp: usize,
        key: &CopyKey,
        op: FillOp,
    ) -> Result<ExchangeSession<'_, 'a, C, T>, HaloError> {
        check_idle(dst)?;
        let (dix, six) = (dst.region().ix_type(), src.region().ix_type());
        if dix != six {
            return Err(HaloError::IndexTypeMismatch { dst: dix, src: six });
        }
        check_comps(scomp, ncomp, src.ncomp())?;
        check_comps(dcomp, ncomp, dst.ncomp())?;
        check_ghost(dst, key.dst_ghost)?;
        check_ghost(src, key.src_ghost)?;
        if ncomp == 0 || dst.region().is_empty() || src.region().is_empty() {
            return Ok(self.completed(dst.id()));
        }
        let mut batches = self.batches(0, ncomp);
        let last = batches.pop().unwrap_or((0, ncomp));
        for (off, n) in batches {
            let p = self.post_copy(dst, src, scomp + off, dcomp + off, n, key, op)?;
            self.complete(p, dst)?;
        }
        let (off, n) = last;
        let posted = self.post_copy(dst, src, scomp + off, dcomp + off, n, key, op)?;
        Ok(ExchangeSession {
            engine: self,
            posted,
            _elem: PhantomData,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn post_copy<T: Element>(
        &self,
        dst: &mut BoxStore<T>,
        src: &BoxStore<T>,
        scomp: usize,
        dcomp: usize,
        ncomp: usize,
        key: &CopyKey,
        op: FillOp,
    ) -> Result<Posted<C>, HaloError> {
        let rank = self.comm.rank();
        let pattern = |dst: &BoxStore<T>| {
            self.cache.copy(
                (dst.region(), dst.dist()),
                (src.region(), src.dist()),
                key,
                rank,
            )
        };
        if self.comm.size() == 1 {
            let md = pattern(&*dst)?;
            copy_local_between(dst, src, &md.local, scomp, dcomp, ncomp, op)?;
            return Ok(Posted::completed(dst.id()));
        }
        let tag = self.comm.next_tag();
        let md = pattern(&*dst)?;
        dst.begin_session()?;
        or_end_session(dst, |dst| {
            let posted = self.post(md, src, scomp, dcomp, ncomp, op, tag, dst.id())?;
            if let Some(md) = &posted.pattern {
                copy_local_between(dst, src, &md.local, scomp, dcomp, ncomp, op)?;
            }
            self.poll(&posted);
            Ok(posted)
        })
    }

    /// Blocking copy of valid (and, with ghosts in `key`, ghost) cells.
    #[allow(clippy::too_many_arguments)]
    pub fn parallel_copy<T: Element>(
        &mut self,
        dst: &mut BoxStore<T>,
        src: &BoxStore<T>,
        scomp: usize,
        dcomp: usize,
        ncomp: usize,
        key: &CopyKey,
        op: FillOp,
    ) -> Result<(), HaloError> {
        let key = CopyKey {
            ghost_only: false,
            ..*key
        };
        self.start_copy(dst, src, scomp, dcomp, ncomp, &key, op)?
            .finish(dst)
    }

    /// Blocking copy into destination ghost cells only.
    #[allow(clippy::too_many_arguments)]
    pub fn parallel_copy_to_ghost<T: Element>(
        &mut self,
        dst: &mut BoxStore<T>,
        src: &BoxStore<T>,
        scomp: usize,
        dcomp: usize,
        ncomp: usize,
        key: &CopyKey,
    ) -> Result<(), HaloError> {
        let key = CopyKey {
            ghost_only: true,
            ..*key
        };
        self.start_copy(dst, src, scomp, dcomp, ncomp, &key, FillOp::Copy)?
            .finish(dst)
    }

    /// Move every component of `src` into `dst`, which holds the same boxes
    /// under a different distribution.
    pub fn redistribute<T: Element>(
        &mut self,
        dst: &mut BoxStore<T>,
        src: &BoxStore<T>,
    ) -> Result<(), HaloError> {
        if dst.region() != src.region() {
            return Err(HaloError::RegionMismatch(format!(
                "redistribute needs equal box lists ({} vs {} boxes)",
                dst.region().len(),
                src.region().len()
            )));
        }
        let ncomp = src.ncomp();
        self.start_copy(dst, src, 0, 0, ncomp, &CopyKey::valid(), FillOp::Copy)?
            .finish(dst)
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    /// Post receives, then pack and post sends.
    #[allow(clippy::too_many_arguments)]
    fn post<T: Element>(
        &self,
        md: Arc<CommMetaData>,
        src: &BoxStore<T>,
        scomp: usize,
        dcomp: usize,
        ncomp: usize,
        op: FillOp,
        tag: CommTag,
        store_id: u64,
    ) -> Result<Posted<C>, HaloError> {
        // 1) one receive per sending peer, all in one span
        let (rslots, rtotal) = layout::<T>(md.recv_cells(), ncomp);
        let recv_buf = match rtotal {
            0 => None,
            n => Some(ArenaBuffer::new(&self.arena, n)?),
        };
        let recvs: Vec<_> = rslots
            .into_iter()
            .map(|slot| {
                log::trace!("irecv {} bytes from rank {} tag {:?}", slot.nbytes, slot.peer, tag);
                let h = self.comm.irecv(slot.peer, tag.as_u16(), slot.nbytes);
                (slot, h)
            })
            .collect();

        // 2) pack every send into its slot of the send span
        let (sslots, stotal) = layout::<T>(md.send_cells(), ncomp);
        let mut send_buf = match stotal {
            0 => None,
            n => Some(ArenaBuffer::new(&self.arena, n)?),
        };
        let mut sends = Vec::with_capacity(sslots.len());
        if let Some(buf) = send_buf.as_mut() {
            for slot in &sslots {
                let bytes = &mut buf.as_bytes_mut()[slot.offset..slot.offset + slot.nbytes];
                let (data, pad) = bytes.split_at_mut(slot.nelems * size_of::<T>());
                pad.fill(0);
                let tags = md.sends.get(&slot.peer).map_or(&[][..], Vec::as_slice);
                pack_tags(src, tags, scomp, ncomp, try_cast_from_mut::<T>(data)?)?;
            }
            // 3) post sends
            for slot in &sslots {
                log::trace!("isend {} bytes to rank {} tag {:?}", slot.nbytes, slot.peer, tag);
                let bytes = &buf.as_bytes()[slot.offset..slot.offset + slot.nbytes];
                sends.push(self.comm.isend(slot.peer, tag.as_u16(), bytes));
            }
        }
        log::debug!(
            "exchange started on store {store_id}: {} local tags, {} recvs, {} sends, tag {:?}",
            md.local.len(),
            recvs.len(),
            sends.len(),
            tag
        );
        Ok(Posted {
            store_id,
            pattern: Some(md),
            dcomp,
            ncomp,
            op,
            recvs,
            recv_buf,
            sends,
            send_buf,
        })
    }

    fn poll(&self, posted: &Posted<C>) {
        if self.config.poll_receives && !posted.recvs.is_empty() {
            let ready = posted.recvs.iter().filter(|(_, h)| h.test()).count();
            log::trace!("poll: {ready}/{} receives ready", posted.recvs.len());
        }
    }

    /// Finish phase: drain every handle, then report the first error.
    fn complete<T: Element>(
        &self,
        posted: Posted<C>,
        store: &mut BoxStore<T>,
    ) -> Result<(), HaloError> {
        let Posted {
            store_id,
            pattern,
            dcomp,
            ncomp,
            op,
            recvs,
            mut recv_buf,
            sends,
            send_buf,
        } = posted;
        let mut maybe_err = None;
        if store_id != store.id() {
            maybe_err = Some(HaloError::StoreMismatch {
                expected: store_id,
                found: store.id(),
            });
        }

        // 1) wait for all receives, stage them in the receive span
        let mut arrived = Vec::with_capacity(recvs.len());
        for (slot, h) in recvs {
            match h.wait() {
                Some(data) => {
                    if self.config.check_message_sizes {
                        if let Err(e) = expect_exact_len(slot.peer, data.len(), slot.nbytes) {
                            log::warn!("{e}");
                            maybe_err = maybe_err.or(Some(e));
                            continue;
                        }
                    }
                    if let Some(buf) = recv_buf.as_mut() {
                        let n = data.len().min(slot.nbytes);
                        buf.as_bytes_mut()[slot.offset..slot.offset + n].copy_from_slice(&data[..n]);
                    }
                    arrived.push(slot);
                }
                None => {
                    maybe_err = maybe_err.or(Some(HaloError::MissingMessage { peer: slot.peer }));
                }
            }
        }

        // 2) unpack
        if maybe_err.is_none() {
            if let (Some(md), Some(buf)) = (&pattern, &recv_buf) {
                for slot in &arrived {
                    let bytes = &buf.as_bytes()[slot.offset..slot.offset + slot.nelems * size_of::<T>()];
                    let tags: &[CopyTag] = md.recvs.get(&slot.peer).map_or(&[][..], Vec::as_slice);
                    let res = try_cast_from::<T>(bytes)
                        .and_then(|data| unpack_tags(store, tags, dcomp, ncomp, data, op));
                    if let Err(e) = res {
                        maybe_err = Some(e);
                        break;
                    }
                }
            }
        }

        // 3) always drain all send handles before returning
        for s in sends {
            let _ = s.wait();
        }
        drop(send_buf);
        drop(recv_buf);

        // 4) the store is idle again, unless it was never ours
        if store_id == store.id() {
            store.end_session();
        }
        log::debug!(
            "exchange finished on store {store_id}: {} messages received",
            arrived.len()
        );
        match maybe_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
