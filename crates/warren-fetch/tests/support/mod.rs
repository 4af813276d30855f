//! Shared test doubles for the segment suites: scripted fetchers, a
//! recording owner, a capturing heal queue, and a fixed-draw rng.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};

use warren_fetch::bucket::{Bucket, BucketFactory, MemoryBucket, MemoryBucketFactory};
use warren_fetch::codec::InterpolationCodec;
use warren_fetch::fetcher::{BlockFetcher, BlockFetcherProvider, BlockToken};
use warren_fetch::heal::{HealQueue, HealRng};
use warren_fetch::key::BlockKey;
use warren_fetch::segment::{FetchConfig, FetchContext, SegmentOwner, SplitSegment};

// ─── Fetcher Stubs ──────────────────────────────────────────────────────────

pub struct StubFetcher {
    token: BlockToken,
    retries: u32,
    cancelled: Arc<AtomicBool>,
}

impl BlockFetcher for StubFetcher {
    fn schedule(&mut self) {}

    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn retry_count(&self) -> u32 {
        self.retries
    }

    fn token(&self) -> BlockToken {
        self.token
    }
}

/// Provider recording every creation; completions are driven by the tests.
#[derive(Default)]
pub struct StubProvider {
    /// Retry count reported per block index (default 1 = "was tried").
    pub retries: Mutex<HashMap<usize, u32>>,
    /// Cancellation flags, one per created child.
    pub cancelled: Mutex<HashMap<usize, Arc<AtomicBool>>>,
    /// Indices created, in order.
    pub created: Mutex<Vec<usize>>,
    /// Recursion levels the children were created at.
    pub levels: Mutex<Vec<u32>>,
    /// Fail creation of this index, if set.
    pub fail_at: Option<usize>,
}

impl StubProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_at(index: usize) -> Arc<Self> {
        Arc::new(StubProvider {
            fail_at: Some(index),
            ..Default::default()
        })
    }

    /// Script the retry count a child will report.
    pub fn set_retries(&self, index: usize, retries: u32) {
        self.retries.lock().unwrap().insert(index, retries);
    }

    pub fn was_cancelled(&self, index: usize) -> bool {
        self.cancelled
            .lock()
            .unwrap()
            .get(&index)
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

impl BlockFetcherProvider for StubProvider {
    fn create(
        &self,
        _key: &BlockKey,
        token: BlockToken,
        _is_data: bool,
        recursion_level: u32,
        _max_retries: u32,
    ) -> anyhow::Result<Box<dyn BlockFetcher>> {
        let index = token.index();
        if self.fail_at == Some(index) {
            anyhow::bail!("no transport route for block {index}");
        }
        let cancelled = Arc::new(AtomicBool::new(false));
        self.cancelled
            .lock()
            .unwrap()
            .insert(index, Arc::clone(&cancelled));
        self.created.lock().unwrap().push(index);
        self.levels.lock().unwrap().push(recursion_level);
        let retries = self
            .retries
            .lock()
            .unwrap()
            .get(&index)
            .copied()
            .unwrap_or(1);
        Ok(Box::new(StubFetcher {
            token,
            retries,
            cancelled,
        }))
    }
}

// ─── Owner ──────────────────────────────────────────────────────────────────

/// Owner asserting the publish-before-notify ordering and counting calls.
pub struct RecordingOwner {
    pub notifications: AtomicUsize,
    tx: Sender<()>,
}

impl RecordingOwner {
    pub fn new() -> (Arc<Self>, Receiver<()>) {
        let (tx, rx) = unbounded();
        (
            Arc::new(RecordingOwner {
                notifications: AtomicUsize::new(0),
                tx,
            }),
            rx,
        )
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.load(Ordering::SeqCst)
    }
}

impl SegmentOwner for RecordingOwner {
    fn segment_finished(&self, segment: &SplitSegment) {
        assert!(
            segment.is_finished(),
            "finished must be observable before the owner is notified"
        );
        self.notifications.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(());
    }
}

// ─── Heal Doubles ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingHealQueue {
    pub healed: Mutex<Vec<(BlockKey, Bytes)>>,
}

impl RecordingHealQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn healed_keys(&self) -> Vec<BlockKey> {
        self.healed
            .lock()
            .unwrap()
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }
}

impl HealQueue for RecordingHealQueue {
    fn queue_heal(&self, key: BlockKey, block: Bytes) {
        self.healed.lock().unwrap().push((key, block));
    }
}

/// Rng always answering the same draw.
pub struct ScriptedRng {
    pub draw: u32,
}

impl HealRng for ScriptedRng {
    fn uniform(&self, n: u32) -> u32 {
        self.draw % n
    }
}

// ─── Failing Storage ────────────────────────────────────────────────────────

/// Factory whose buckets can never be created — forces decode-time storage
/// failures.
pub struct FailingBucketFactory;

impl BucketFactory for FailingBucketFactory {
    fn make_bucket(&self, _size_hint: Option<u64>) -> std::io::Result<Box<dyn Bucket>> {
        Err(std::io::Error::other("bucket backend offline"))
    }
}

// ─── Builders ───────────────────────────────────────────────────────────────

pub const TEST_BLOCK: usize = 16;

/// Route crate logs through the test writer. Safe to call from every test;
/// only the first call per binary installs the subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn context(
    provider: Arc<StubProvider>,
    heal: Arc<RecordingHealQueue>,
    rng_draw: u32,
) -> FetchContext {
    init_tracing();
    FetchContext {
        buckets: Arc::new(MemoryBucketFactory),
        fetchers: provider,
        heal,
        rng: Arc::new(ScriptedRng { draw: rng_draw }),
        config: FetchConfig {
            block_size: TEST_BLOCK,
            max_retries: 3,
        },
    }
}

pub fn content_keys(n: usize, tag: u8) -> Vec<BlockKey> {
    (0..n)
        .map(|i| {
            let mut routing = [tag; 32];
            routing[0] = i as u8;
            BlockKey::content(routing)
        })
        .collect()
}

pub fn data_blocks(k: usize) -> Vec<Vec<u8>> {
    (0..k)
        .map(|i| {
            (0..TEST_BLOCK)
                .map(|j| ((i * 37 + j * 11 + 3) % 256) as u8)
                .collect()
        })
        .collect()
}

/// Check-block contents consistent with `data` under the standard codec.
pub fn encode_checks(data: &[Vec<u8>], m: usize) -> Vec<Vec<u8>> {
    let codec = InterpolationCodec::new(data.len(), m);
    let factory = MemoryBucketFactory;
    let data_slots: Vec<Option<Box<dyn Bucket>>> = data
        .iter()
        .map(|d| Some(Box::new(MemoryBucket::of(d)) as Box<dyn Bucket>))
        .collect();
    let mut check: Vec<Option<Box<dyn Bucket>>> = (0..m).map(|_| None).collect();
    use warren_fetch::codec::ErasureCodec;
    codec
        .encode(&data_slots, &mut check, TEST_BLOCK, &factory)
        .unwrap();
    check
        .into_iter()
        .map(|c| c.unwrap().read_all().unwrap().to_vec())
        .collect()
}

pub fn bucket_of(data: &[u8]) -> Box<dyn Bucket> {
    Box::new(MemoryBucket::of(data))
}

/// Poll `predicate` until it holds or the deadline expires. The decode
/// worker notifies the owner before the heal pass runs, so heal assertions
/// need a grace period.
pub fn wait_until(deadline: Duration, predicate: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    predicate()
}
