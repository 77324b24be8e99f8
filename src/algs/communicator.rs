//! Thin façade over serial, intra-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are contiguous byte slices. All handles are waitable but
//! non-blocking: the exchange engine posts every receive and send first and
//! only calls [`Wait::wait`] in its finish phase.
//!
//! Matching is by `(source, destination, tag)` with FIFO order per key. Each
//! communicator hands out tags from its own monotonically increasing
//! sequence ([`Communicator::next_tag`]), so exchanges issued in the same
//! order on every rank match up without negotiation.

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

/// Message tag. Exchange tags come from [`Communicator::next_tag`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(v: u16) -> Self {
        Self(v)
    }

    #[inline]
    pub const fn base(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

/// First tag of the per-communicator exchange sequence.
const SEQ_BASE: u16 = 0x2000;
/// Sequence tags stay in `SEQ_BASE..SEQ_BASE + SEQ_SPAN`.
const SEQ_SPAN: u16 = 0x2000;
/// Reserved for [`Communicator::barrier`] on message-based backends.
const BARRIER_TAG: u16 = 0xFFFF;

#[inline]
fn seq_tag(n: u16) -> CommTag {
    CommTag(SEQ_BASE + n % SEQ_SPAN)
}

/// Non-blocking communication interface.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Post a send of `buf` to `peer`. The data is copied or owned by the
    /// handle, so `buf` may be reused immediately.
    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;

    /// Post a receive of a message of (expected) `len` bytes from `peer`.
    fn irecv(&self, peer: usize, tag: u16, len: usize) -> Self::RecvHandle;

    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Block until every rank has entered the barrier.
    fn barrier(&self);

    /// Next tag of this communicator's exchange sequence.
    fn next_tag(&self) -> CommTag;
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;

    /// Non-blocking completion check.
    fn test(&self) -> bool {
        false
    }
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }

    fn test(&self) -> bool {
        true
    }
}

// --- NoComm: single rank ---

/// Compile-time no-op comm for a single rank.
#[derive(Debug, Default)]
pub struct NoComm {
    seq: AtomicU16,
}

impl Clone for NoComm {
    fn clone(&self) -> Self {
        Self {
            seq: AtomicU16::new(self.seq.load(Ordering::Relaxed)),
        }
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}

    fn irecv(&self, _peer: usize, _tag: u16, _len: usize) {}

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn next_tag(&self) -> CommTag {
        seq_tag(self.seq.fetch_add(1, Ordering::Relaxed))
    }
}

// --- RayonComm: ranks as threads of one process ---

type Key = (usize, usize, u16); // (src, dst, tag)

/// Shared mailbox: FIFO queue per `(src, dst, tag)`.
#[derive(Default)]
struct Mailbox {
    slots: DashMap<Key, VecDeque<Bytes>>,
    lock: Mutex<()>,
    signal: Condvar,
}

impl Mailbox {
    fn post(&self, key: Key, data: Bytes) {
        self.slots.entry(key).or_default().push_back(data);
        let _g = self.lock.lock();
        self.signal.notify_all();
    }

    fn try_take(&self, key: &Key) -> Option<Bytes> {
        self.slots.get_mut(key).and_then(|mut q| q.pop_front())
    }

    fn take(&self, key: &Key) -> Bytes {
        loop {
            if let Some(b) = self.try_take(key) {
                return b;
            }
            let mut g = self.lock.lock();
            if let Some(b) = self.try_take(key) {
                return b;
            }
            // timed wait: a post between the check and the wait is picked up next round
            self.signal.wait_for(&mut g, Duration::from_millis(1));
        }
    }
}

static MAILBOX: Lazy<Arc<Mailbox>> = Lazy::new(|| Arc::new(Mailbox::default()));

/// Receive handle for [`RayonComm`].
pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
    arrived: Mutex<Option<Bytes>>,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let data = match self.arrived.into_inner() {
            Some(b) => b,
            None => self.mailbox.take(&self.key),
        };
        Some(data.to_vec())
    }

    fn test(&self) -> bool {
        let mut slot = self.arrived.lock();
        if slot.is_none() {
            *slot = self.mailbox.try_take(&self.key);
        }
        slot.is_some()
    }
}

/// In-process communicator: one instance per rank, ranks run as threads.
#[derive(Clone)]
pub struct RayonComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
    seq: Arc<AtomicU16>,
}

impl RayonComm {
    /// Rank `rank` of `size` on the process-wide mailbox.
    pub fn new(rank: usize, size: usize) -> Self {
        Self {
            rank,
            size,
            mailbox: Arc::clone(&MAILBOX),
            seq: Arc::new(AtomicU16::new(0)),
        }
    }

    /// `n` ranks sharing a private mailbox, isolated from every other world.
    pub fn world(n: usize) -> Vec<Self> {
        let mailbox = Arc::new(Mailbox::default());
        (0..n)
            .map(|rank| Self {
                rank,
                size: n,
                mailbox: Arc::clone(&mailbox),
                seq: Arc::new(AtomicU16::new(0)),
            })
            .collect()
    }
}

impl std::fmt::Debug for RayonComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RayonComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        self.mailbox
            .post((self.rank, peer, tag), Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, _len: usize) -> LocalHandle {
        LocalHandle {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
            arrived: Mutex::new(None),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        // gather on rank 0, then release
        if self.rank == 0 {
            for r in 1..self.size {
                self.mailbox.take(&(r, 0, BARRIER_TAG));
            }
            for r in 1..self.size {
                self.mailbox.post((0, r, BARRIER_TAG), Bytes::new());
            }
        } else {
            self.mailbox.post((self.rank, 0, BARRIER_TAG), Bytes::new());
            self.mailbox.take(&(0, self.rank, BARRIER_TAG));
        }
    }

    fn next_tag(&self) -> CommTag {
        seq_tag(self.seq.fetch_add(1, Ordering::Relaxed))
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// MPI world communicator. The caller keeps the `mpi::environment::Universe`
    /// returned by `mpi::initialize()` alive for as long as this is used.
    #[derive(Debug)]
    pub struct MpiComm {
        rank: usize,
        size: usize,
        seq: AtomicU16,
    }

    impl MpiComm {
        pub fn new() -> Self {
            let world = SimpleCommunicator::world();
            Self {
                rank: world.rank() as usize,
                size: world.size() as usize,
                seq: AtomicU16::new(0),
            }
        }
    }

    impl Default for MpiComm {
        fn default() -> Self {
            Self::new()
        }
    }

    type ByteRequest = Request<'static, [u8], StaticScope>;

    /// Free a buffer handed out by [`leak`].
    ///
    /// # Safety
    /// `buf` came from `leak` and no request still refers to it.
    unsafe fn reclaim(buf: *mut [u8]) {
        // SAFETY: upheld by the caller.
        drop(unsafe { Box::from_raw(buf) });
    }

    fn leak(data: Box<[u8]>) -> *mut [u8] {
        Box::into_raw(data)
    }

    /// Send request over a leaked copy of the message.
    ///
    /// Dropping the handle before [`Wait::wait`] blocks until the send
    /// completes, then frees the copy.
    pub struct MpiSend {
        req: Option<ByteRequest>,
        buf: *mut [u8],
    }

    impl Drop for MpiSend {
        fn drop(&mut self) {
            if let Some(req) = self.req.take() {
                req.wait();
            }
            // SAFETY: `buf` came from `leak` in `isend` and its request has completed.
            unsafe { reclaim(self.buf) }
        }
    }

    impl Wait for MpiSend {
        fn wait(self) -> Option<Vec<u8>> {
            drop(self);
            None
        }
    }

    struct RecvState {
        req: Option<ByteRequest>,
        /// Bytes delivered, once the request has completed.
        got: Option<usize>,
    }

    impl RecvState {
        fn settle(&mut self, status: mpi::point_to_point::Status) {
            let n = status.count(u8::equivalent_datatype());
            self.got = Some(usize::try_from(n).unwrap_or(0));
        }

        fn complete(&mut self) -> usize {
            if let Some(req) = self.req.take() {
                let status = req.wait();
                self.settle(status);
            }
            self.got.unwrap_or(0)
        }
    }

    /// Receive posted with `MPI_Irecv` into a leaked buffer of the expected
    /// length. A longer message is an MPI truncation error; a shorter one
    /// comes back short from [`Wait::wait`].
    ///
    /// Dropping the handle before `wait` blocks until the receive completes,
    /// then frees the buffer.
    pub struct MpiRecv {
        state: Mutex<RecvState>,
        buf: *mut [u8],
    }

    impl Drop for MpiRecv {
        fn drop(&mut self) {
            self.state.get_mut().complete();
            // SAFETY: `buf` came from `leak` in `irecv` and its request has completed.
            unsafe { reclaim(self.buf) }
        }
    }

    impl Wait for MpiRecv {
        fn wait(self) -> Option<Vec<u8>> {
            let got = self.state.lock().complete();
            // SAFETY: the request writing into `buf` has completed and `self` owns it.
            let data = unsafe { &(&*self.buf)[..got] };
            Some(data.to_vec())
        }

        fn test(&self) -> bool {
            let mut st = self.state.lock();
            match st.req.take() {
                None => true,
                Some(req) => match req.test() {
                    Ok(status) => {
                        st.settle(status);
                        true
                    }
                    Err(req) => {
                        st.req = Some(req);
                        false
                    }
                },
            }
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSend;
        type RecvHandle = MpiRecv;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSend {
            let world = SimpleCommunicator::world();
            let ptr = leak(buf.into());
            // SAFETY: `ptr` stays valid until `MpiSend` drops, after the request completes.
            let data: &'static [u8] = unsafe { &*ptr };
            let req = world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, data, tag as i32);
            MpiSend {
                req: Some(req),
                buf: ptr,
            }
        }

        fn irecv(&self, peer: usize, tag: u16, len: usize) -> MpiRecv {
            let world = SimpleCommunicator::world();
            let ptr = leak(vec![0u8; len].into_boxed_slice());
            // SAFETY: `ptr` stays valid until `MpiRecv` drops, after the request completes,
            // and nothing else reads it while the request is pending.
            let data: &'static mut [u8] = unsafe { &mut *ptr };
            let req = world
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, data, tag as i32);
            MpiRecv {
                state: Mutex::new(RecvState {
                    req: Some(req),
                    got: None,
                }),
                buf: ptr,
            }
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn barrier(&self) {
            SimpleCommunicator::world().barrier();
        }

        fn next_tag(&self) -> CommTag {
            seq_tag(self.seq.fetch_add(1, Ordering::Relaxed))
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_comm_is_single_rank() {
        let c = NoComm::default();
        assert_eq!((c.rank(), c.size()), (0, 1));
        assert!(c.irecv(0, 1, 8).test());
        assert_eq!(c.isend(0, 1, &[1, 2]).wait(), None);
        let a = c.next_tag();
        assert_eq!(c.next_tag().as_u16(), a.as_u16() + 1);
    }

    #[test]
    fn rayon_roundtrip_two_ranks() {
        let w = RayonComm::world(2);
        let recv = w[1].irecv(0, 7, 4);
        assert!(!recv.test());
        w[0].isend(1, 7, &[1, 2, 3, 4]).wait();
        assert!(recv.test());
        assert_eq!(recv.wait(), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn worlds_do_not_share_mailboxes() {
        let a = RayonComm::world(2);
        let b = RayonComm::world(2);
        a[0].isend(1, 3, &[9]);
        assert!(!b[1].irecv(0, 3, 1).test());
        assert_eq!(a[1].irecv(0, 3, 1).wait(), Some(vec![9]));
    }

    #[test]
    fn barrier_and_blocking_receive_across_threads() {
        let w = RayonComm::world(3);
        std::thread::scope(|s| {
            for c in &w {
                s.spawn(move || {
                    let tag = c.next_tag().as_u16();
                    let next = (c.rank() + 1) % c.size();
                    let prev = (c.rank() + c.size() - 1) % c.size();
                    let r = c.irecv(prev, tag, 1);
                    c.isend(next, tag, &[c.rank() as u8]);
                    assert_eq!(r.wait(), Some(vec![prev as u8]));
                    c.barrier();
                });
            }
        });
    }

    #[test]
    fn sequence_tags_stay_clear_of_barrier() {
        let c = NoComm::default();
        for _ in 0..(2 * SEQ_SPAN as usize + 5) {
            let t = c.next_tag().as_u16();
            assert!((SEQ_BASE..SEQ_BASE + SEQ_SPAN).contains(&t));
            assert_ne!(t, BARRIER_TAG);
        }
    }

    #[cfg(feature = "mpi-support")]
    #[test]
    fn mpi_handles_post_eagerly_and_drop_cleanly() {
        let _universe = mpi::initialize();
        let comm = MpiComm::new();
        let me = comm.rank();

        // handles dropped without a wait still complete and free their buffers
        let r = comm.irecv(me, 11, 4);
        let s = comm.isend(me, 11, &[1, 2, 3, 4]);
        drop(s);
        drop(r);

        // the receive is posted up front and reports a short message as short
        let r = comm.irecv(me, 12, 8);
        comm.isend(me, 12, &[9, 8, 7]).wait();
        assert_eq!(r.wait(), Some(vec![9, 8, 7]));
        comm.barrier();
    }
}
