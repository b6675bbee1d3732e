//! Bounded pool of codec workers.
//!
//! Every codec that does real work needs a slot. Slots are created on demand
//! up to `max_workers`; past that, requests wait in FIFO order and a slot is
//! handed straight to the next waiter when its holder finishes. A slot's
//! worker is a blocking task fed through a channel, kept alive across
//! hand-offs and stopped once the slot goes idle.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, trace};
use tokio::sync::{mpsc, oneshot};

use crate::codec::{Codec, CodecOutput};
use crate::error::{ZipError, ZipResult};

type Reply<T> = oneshot::Sender<ZipResult<T>>;

enum Message {
    Init(Codec),
    Append(Vec<u8>, Reply<Vec<u8>>),
    Flush(Reply<CodecOutput>),
}

struct WorkerContext {
    sender: mpsc::UnboundedSender<Message>,
}

impl WorkerContext {
    fn spawn(slot: usize) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Message>();
        tokio::task::spawn_blocking(move || {
            trace!("worker {} started", slot);
            let mut codec = None;
            while let Some(message) = receiver.blocking_recv() {
                match message {
                    Message::Init(next) => codec = Some(next),
                    Message::Append(data, reply) => {
                        let result = match codec.as_mut() {
                            Some(codec) => codec.append(&data),
                            None => Err(ZipError::Worker("no codec to append to")),
                        };
                        let _ = reply.send(result);
                    }
                    Message::Flush(reply) => {
                        let result = match codec.take() {
                            Some(codec) => codec.flush(),
                            None => Err(ZipError::Worker("no codec to flush")),
                        };
                        let _ = reply.send(result);
                    }
                }
            }
            trace!("worker {} stopped", slot);
        });
        Self { sender }
    }
}

struct Slot {
    id: usize,
    busy: bool,
    context: Option<WorkerContext>,
}

#[derive(Default)]
struct PoolState {
    slots: Vec<Slot>,
    pending: VecDeque<oneshot::Sender<SlotLease>>,
    next_id: usize,
}

pub struct WorkerPool {
    max_workers: usize,
    state: Mutex<PoolState>,
}

impl WorkerPool {
    /// Create an empty pool allowing at most `max_workers` busy slots.
    ///
    /// No worker is spawned until the first codec needs one. A limit of 0
    /// is raised to 1.
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Slots currently running a codec
    pub fn busy_slots(&self) -> usize {
        self.lock().slots.iter().filter(|s| s.busy).count()
    }

    /// Slots that exist, busy or idle
    pub fn slot_count(&self) -> usize {
        self.lock().slots.len()
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Nothing under this lock can panic halfway through an update
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Waits for a free slot.
    ///
    /// A new slot is created while the pool is under its limit, an idle one
    /// is reused otherwise, and failing both the request is queued until a
    /// lease is dropped and its slot handed over.
    ///
    /// # Errors
    ///
    /// Returns [`ZipError::Worker`] if the pool is torn down while the
    /// request is queued.
    pub async fn acquire(self: &Arc<Self>) -> ZipResult<SlotLease> {
        let waiter = {
            let mut state = self.lock();
            if state.slots.len() < self.max_workers {
                let id = state.next_id;
                state.next_id += 1;
                state.slots.push(Slot {
                    id,
                    busy: true,
                    context: None,
                });
                debug!("created worker slot {}", id);
                return Ok(self.lease(id));
            }
            if let Some(slot) = state.slots.iter_mut().find(|s| !s.busy) {
                slot.busy = true;
                return Ok(self.lease(slot.id));
            }
            let (sender, receiver) = oneshot::channel();
            state.pending.push_back(sender);
            trace!("queued codec request ({} waiting)", state.pending.len());
            receiver
        };
        waiter
            .await
            .map_err(|_| ZipError::Worker("pool dropped a queued request"))
    }

    fn lease(self: &Arc<Self>, id: usize) -> SlotLease {
        SlotLease {
            pool: Arc::clone(self),
            id: Some(id),
        }
    }

    fn release(self: &Arc<Self>, id: usize) {
        let mut state = self.lock();
        let mut lease = self.lease(id);
        while let Some(waiter) = state.pending.pop_front() {
            match waiter.send(lease) {
                Ok(()) => {
                    debug!("handed worker slot {} to a queued request", id);
                    return;
                }
                // The waiter gave up; try the next one
                Err(returned) => lease = returned,
            }
        }
        lease.id = None;
        if let Some(slot) = state.slots.iter_mut().find(|s| s.id == id) {
            slot.busy = false;
            if slot.context.take().is_some() {
                debug!("worker slot {} idle, stopping its worker", id);
            }
        }
    }

    fn worker(&self, id: usize) -> ZipResult<mpsc::UnboundedSender<Message>> {
        let mut state = self.lock();
        let slot = state
            .slots
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(ZipError::Worker("slot disappeared"))?;
        let context = slot.context.get_or_insert_with(|| WorkerContext::spawn(id));
        Ok(context.sender.clone())
    }

    /// Prepares `codec` to run under this pool.
    ///
    /// Passthrough codecs never take a slot. With `use_workers` false the
    /// codec still counts against the limit but runs on the caller's task.
    ///
    /// # Arguments
    ///
    /// * `codec` - A freshly built encoder or decoder
    /// * `use_workers` - Run the codec on the slot's blocking worker
    ///
    /// # Returns
    ///
    /// A [`CodecHandle`] holding the slot until it is flushed or dropped.
    pub async fn start(self: &Arc<Self>, codec: Codec, use_workers: bool) -> ZipResult<CodecHandle> {
        if codec.is_passthrough() {
            return Ok(CodecHandle {
                engine: Engine::Inline(Some(codec)),
                _lease: None,
            });
        }
        let lease = self.acquire().await?;
        let engine = if use_workers {
            let sender = self.worker(lease.id())?;
            sender
                .send(Message::Init(codec))
                .map_err(|_| ZipError::Worker("worker stopped"))?;
            Engine::Worker(sender)
        } else {
            Engine::Inline(Some(codec))
        };
        Ok(CodecHandle {
            engine,
            _lease: Some(lease),
        })
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self::new(parallelism.max(2))
    }
}

/// Exclusive use of one slot; dropping it frees the slot.
pub struct SlotLease {
    pool: Arc<WorkerPool>,
    id: Option<usize>,
}

impl SlotLease {
    fn id(&self) -> usize {
        self.id.unwrap_or_default()
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.pool.release(id);
        }
    }
}

enum Engine {
    Inline(Option<Codec>),
    Worker(mpsc::UnboundedSender<Message>),
}

/// A running codec, either inline or on a pool worker.
pub struct CodecHandle {
    engine: Engine,
    _lease: Option<SlotLease>,
}

impl CodecHandle {
    /// Feed one chunk through the codec and return whatever it produced.
    ///
    /// The output may be empty while the codec buffers.
    ///
    /// # Errors
    ///
    /// * [`ZipError::InvalidPassword`] once a cipher header fails its check
    /// * [`ZipError::CorruptData`] for bad deflate data
    /// * [`ZipError::Worker`] if the worker went away
    pub async fn append(&mut self, data: Vec<u8>) -> ZipResult<Vec<u8>> {
        match &mut self.engine {
            Engine::Inline(codec) => match codec.as_mut() {
                Some(codec) => codec.append(&data),
                None => Err(ZipError::Worker("codec already flushed")),
            },
            Engine::Worker(sender) => {
                let (reply, response) = oneshot::channel();
                sender
                    .send(Message::Append(data, reply))
                    .map_err(|_| ZipError::Worker("worker stopped"))?;
                response
                    .await
                    .map_err(|_| ZipError::Worker("worker dropped a reply"))?
            }
        }
    }

    /// Finish the codec, returning its last bytes and signature, and free
    /// the slot.
    ///
    /// # Errors
    ///
    /// See [`Codec::flush`].
    pub async fn flush(mut self) -> ZipResult<CodecOutput> {
        match &mut self.engine {
            Engine::Inline(codec) => match codec.take() {
                Some(codec) => codec.flush(),
                None => Err(ZipError::Worker("codec already flushed")),
            },
            Engine::Worker(sender) => {
                let (reply, response) = oneshot::channel();
                sender
                    .send(Message::Flush(reply))
                    .map_err(|_| ZipError::Worker("worker stopped"))?;
                response
                    .await
                    .map_err(|_| ZipError::Worker("worker dropped a reply"))?
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DecodeOptions, EncodeOptions};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_max_busy() {
        let pool = Arc::new(WorkerPool::new(3));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..12 {
            let pool = Arc::clone(&pool);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                let lease = pool.acquire().await.unwrap();
                peak.fetch_max(pool.busy_slots(), Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                drop(lease);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.busy_slots(), 0);
        assert!(pool.slot_count() <= 3);
    }

    #[tokio::test]
    async fn queued_request_gets_released_slot() {
        let pool = Arc::new(WorkerPool::new(1));
        let first = pool.acquire().await.unwrap();
        let waiting = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|lease| lease.id()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiting.is_finished());
        let id = first.id();
        drop(first);
        assert_eq!(waiting.await.unwrap().unwrap(), id);
        assert_eq!(pool.busy_slots(), 0);
    }

    #[tokio::test]
    async fn abandoned_waiter_does_not_leak_slot() {
        let pool = Arc::new(WorkerPool::new(1));
        let first = pool.acquire().await.unwrap();
        let abandoned = tokio::time::timeout(Duration::from_millis(5), pool.acquire()).await;
        assert!(abandoned.is_err());
        drop(first);
        assert_eq!(pool.busy_slots(), 0);
        drop(pool.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn worker_runs_codec() {
        let pool = Arc::new(WorkerPool::new(2));
        let codec = Codec::encoder(EncodeOptions {
            level: Some(6),
            signed: true,
            ..Default::default()
        })
        .unwrap();
        let mut handle = pool.start(codec, true).await.unwrap();
        assert_eq!(pool.busy_slots(), 1);
        let mut compressed = handle.append(b"abcabcabc".repeat(100)).await.unwrap();
        let output = handle.flush().await.unwrap();
        compressed.extend(output.data);
        assert_eq!(pool.busy_slots(), 0);

        let codec = Codec::decoder(DecodeOptions {
            compressed: true,
            signature: output.signature,
            ..Default::default()
        });
        let mut handle = pool.start(codec, true).await.unwrap();
        let mut plain = handle.append(compressed).await.unwrap();
        plain.extend(handle.flush().await.unwrap().data);
        assert_eq!(plain, b"abcabcabc".repeat(100));
    }

    #[tokio::test]
    async fn passthrough_bypasses_pool() {
        let pool = Arc::new(WorkerPool::new(1));
        let _held = pool.acquire().await.unwrap();
        let mut handle = pool
            .start(Codec::decoder(DecodeOptions::default()), true)
            .await
            .unwrap();
        assert_eq!(handle.append(b"raw".to_vec()).await.unwrap(), b"raw");
        assert!(handle.flush().await.unwrap().data.is_empty());
    }
}
