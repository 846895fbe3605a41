//! The guest database: local interface, remote execution.
//!
//! A [`Guest`] presents the store operations to local callers and forwards
//! them as frames over an attached rpc stream. It owns two maps keyed by
//! 32-bit ids: pending requests and live iterators. The dispatch task reads
//! reply frames and settles map entries; when both maps drain, the guest is
//! *flushed* and says so through a watch channel.

use crate::error::GuestError;
use crate::ids::IdAllocator;
use crate::iterator::{GuestIterator, IterFailure, IterRecord};
use bytes::Bytes;
use kvbridge_protocol::{codec, BatchOp, Decoder, ErrorCode, Input, IteratorOptions, Output, RangeOptions};
use kvbridge_store::Store;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, watch};

/// Process keepalive handle.
///
/// Acquired when in-flight work transitions from none to some, released on
/// the opposite transition. Never double-acquired.
pub trait Keepalive: Send + Sync + 'static {
    fn acquire(&self);
    fn release(&self);
}

/// Guest construction options.
pub struct GuestOptions {
    retry: bool,
    keepalive: Option<Arc<dyn Keepalive>>,
}

impl GuestOptions {
    pub fn new() -> Self {
        Self {
            retry: false,
            keepalive: None,
        }
    }

    /// Preserve pending work across disconnects and replay it on the next
    /// attachment instead of aborting.
    pub fn with_retry(mut self, retry: bool) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_keepalive(mut self, keepalive: Arc<dyn Keepalive>) -> Self {
        self.keepalive = Some(keepalive);
        self
    }
}

impl Default for GuestOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GuestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestOptions")
            .field("retry", &self.retry)
            .field("keepalive", &self.keepalive.is_some())
            .finish()
    }
}

struct PendingRequest {
    /// Retained for replay after a reconnect.
    message: Input,
    slot: ReplySlot,
}

enum ReplySlot {
    Value(oneshot::Sender<Result<Option<Bytes>, GuestError>>),
    Values(oneshot::Sender<Result<Vec<Option<Bytes>>, GuestError>>),
}

impl ReplySlot {
    fn fail(self, err: GuestError) {
        match self {
            ReplySlot::Value(tx) => {
                let _ = tx.send(Err(err));
            }
            ReplySlot::Values(tx) => {
                let _ = tx.send(Err(err));
            }
        }
    }
}

pub(crate) struct GuestState {
    requests: HashMap<u32, PendingRequest>,
    iterators: HashMap<u32, Arc<IterRecord>>,
    request_ids: IdAllocator,
    iterator_ids: IdAllocator,
    forward: Option<Arc<dyn Store>>,
    attached: bool,
    writer_ready: bool,
    closed: bool,
    busy: bool,
}

pub(crate) struct GuestInner {
    pub(crate) retry: bool,
    keepalive: Option<Arc<dyn Keepalive>>,
    state: Mutex<GuestState>,
    writer: tokio::sync::Mutex<Option<Box<dyn AsyncWrite + Send + Unpin>>>,
    flush: watch::Sender<u64>,
}

/// An ordered key/value database executed by a remote host.
///
/// Cloning is cheap and hands out another handle to the same database.
pub struct Guest {
    inner: Arc<GuestInner>,
}

impl Clone for Guest {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Guest {
    pub fn new(options: GuestOptions) -> Self {
        let (flush, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(GuestInner {
                retry: options.retry,
                keepalive: options.keepalive,
                state: Mutex::new(GuestState {
                    requests: HashMap::new(),
                    iterators: HashMap::new(),
                    request_ids: IdAllocator::new(),
                    iterator_ids: IdAllocator::new(),
                    forward: None,
                    attached: false,
                    writer_ready: false,
                    closed: false,
                    busy: false,
                }),
                writer: tokio::sync::Mutex::new(None),
                flush,
            }),
        }
    }

    /// Attaches the rpc stream and spawns the dispatch task.
    ///
    /// Pending requests and live iterators are replayed onto the new
    /// transport, so with retry enabled a reconnect resumes range scans from
    /// their bookmarks. Only one stream may be attached at a time.
    pub async fn attach<T>(&self, transport: T) -> Result<(), GuestError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        {
            let mut st = self.inner.state.lock();
            if st.closed {
                return Err(GuestError::NotSupported);
            }
            if st.attached {
                return Err(GuestError::RpcStream);
            }
            st.attached = true;
        }

        let (read_half, write_half) = tokio::io::split(transport);
        *self.inner.writer.lock().await = Some(Box::new(write_half));

        let replay = {
            let mut st = self.inner.state.lock();
            st.writer_ready = true;
            self.inner.collect_replay(&st)
        };
        for msg in &replay {
            self.inner.send_best_effort(msg).await;
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.read_loop(read_half).await;
            inner.on_detach().await;
        });
        Ok(())
    }

    /// Routes all further operations to a local store, bypassing the rpc
    /// layer. Requests already in flight keep resolving via rpc.
    pub fn forward(&self, store: Arc<dyn Store>) -> Result<(), GuestError> {
        let mut st = self.inner.state.lock();
        if st.closed {
            return Err(GuestError::DatabaseNotOpen);
        }
        st.forward = Some(store);
        Ok(())
    }

    /// Returns the value at `key`, or `None` when absent.
    pub async fn get(&self, key: impl Into<Bytes>) -> Result<Option<Bytes>, GuestError> {
        let key = key.into();
        if let Some(store) = self.inner.forward_target()? {
            return Ok(store.get(&key)?);
        }
        self.value_request(|id| Input::Get { id, key }).await
    }

    /// Looks up several keys, preserving order and absence.
    pub async fn get_many(&self, keys: Vec<Bytes>) -> Result<Vec<Option<Bytes>>, GuestError> {
        if let Some(store) = self.inner.forward_target()? {
            return Ok(store.get_many(&keys)?);
        }
        let (tx, rx) = oneshot::channel();
        let msg = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            if st.closed {
                return Err(GuestError::DatabaseNotOpen);
            }
            let id = st.request_ids.next_id(&st.requests);
            let msg = Input::GetMany { id, keys };
            st.requests.insert(
                id,
                PendingRequest {
                    message: msg.clone(),
                    slot: ReplySlot::Values(tx),
                },
            );
            self.inner.settle(st);
            msg
        };
        self.inner.send_best_effort(&msg).await;
        rx.await.map_err(|_| GuestError::ConnectionLost)?
    }

    /// Stores `value` at `key`.
    pub async fn put(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<(), GuestError> {
        let (key, value) = (key.into(), value.into());
        if let Some(store) = self.inner.forward_target()? {
            return Ok(store.put(key, value)?);
        }
        self.value_request(|id| Input::Put { id, key, value })
            .await
            .map(|_| ())
    }

    /// Removes `key`.
    pub async fn del(&self, key: impl Into<Bytes>) -> Result<(), GuestError> {
        let key = key.into();
        if let Some(store) = self.inner.forward_target()? {
            return Ok(store.del(&key)?);
        }
        self.value_request(|id| Input::Del { id, key })
            .await
            .map(|_| ())
    }

    /// Applies a sequence of puts and deletes as one write.
    pub async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), GuestError> {
        if let Some(store) = self.inner.forward_target()? {
            return Ok(store.batch(ops)?);
        }
        self.value_request(|id| Input::Batch { id, ops })
            .await
            .map(|_| ())
    }

    /// Removes every key within the range.
    pub async fn clear(&self, options: RangeOptions) -> Result<(), GuestError> {
        if let Some(store) = self.inner.forward_target()? {
            return Ok(store.clear(&options)?);
        }
        self.value_request(|id| Input::Clear { id, options })
            .await
            .map(|_| ())
    }

    /// Opens an ordered iterator over the range described by `options`.
    pub async fn iterator(&self, options: IteratorOptions) -> Result<GuestIterator, GuestError> {
        if let Some(store) = self.inner.forward_target()? {
            return Ok(GuestIterator::local(
                store.iterator(options.clone())?,
                options,
            ));
        }
        let (record, id, msg) = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            if st.closed {
                return Err(GuestError::DatabaseNotOpen);
            }
            let id = st.iterator_ids.next_id(&st.iterators);
            let record = Arc::new(IterRecord::new(options.clone()));
            st.iterators.insert(id, record.clone());
            self.inner.settle(st);
            let msg = Input::Iterator {
                id,
                options,
                bookmark: None,
                seek: None,
                seq: 0,
            };
            (record, id, msg)
        };
        self.inner.send_best_effort(&msg).await;
        Ok(GuestIterator::rpc(self.inner.clone(), record, id))
    }

    /// Closes the database: aborts all pending work, tears down the
    /// transport, and closes the forwarded store if one is installed.
    /// Idempotent; attaching again afterwards is rejected.
    pub async fn close(&self) -> Result<(), GuestError> {
        let forward = {
            let mut st = self.inner.state.lock();
            if st.closed {
                return Ok(());
            }
            st.closed = true;
            st.attached = false;
            st.writer_ready = false;
            self.inner.abort_all(&mut st, ErrorCode::DatabaseNotOpen);
            self.inner.settle(&mut st);
            st.forward.take()
        };
        if let Some(store) = forward {
            store.close()?;
        }
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        Ok(())
    }

    /// Whether an rpc stream is currently attached.
    pub fn is_attached(&self) -> bool {
        self.inner.state.lock().attached
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Whether no requests and no iterators are in flight.
    pub fn is_idle(&self) -> bool {
        let st = self.inner.state.lock();
        st.requests.is_empty() && st.iterators.is_empty()
    }

    /// Subscribes to flush events. The value increments once per transition
    /// from in-flight work to none.
    pub fn flush_events(&self) -> watch::Receiver<u64> {
        self.inner.flush.subscribe()
    }

    async fn value_request(
        &self,
        build: impl FnOnce(u32) -> Input,
    ) -> Result<Option<Bytes>, GuestError> {
        let (tx, rx) = oneshot::channel();
        let msg = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            if st.closed {
                return Err(GuestError::DatabaseNotOpen);
            }
            let id = st.request_ids.next_id(&st.requests);
            let msg = build(id);
            st.requests.insert(
                id,
                PendingRequest {
                    message: msg.clone(),
                    slot: ReplySlot::Value(tx),
                },
            );
            self.inner.settle(st);
            msg
        };
        self.inner.send_best_effort(&msg).await;
        rx.await.map_err(|_| GuestError::ConnectionLost)?
    }
}

impl GuestInner {
    fn forward_target(&self) -> Result<Option<Arc<dyn Store>>, GuestError> {
        let st = self.state.lock();
        if st.closed {
            return Err(GuestError::DatabaseNotOpen);
        }
        Ok(st.forward.clone())
    }

    /// Writes a frame if a transport is attached; otherwise the message
    /// stays recorded in its map and goes out with the next replay.
    pub(crate) async fn send_best_effort(&self, msg: &Input) {
        if !self.state.lock().writer_ready {
            return;
        }
        let frame = codec::encode_input(msg);
        let mut guard = self.writer.lock().await;
        if let Some(writer) = guard.as_mut() {
            if let Err(err) = writer.write_all(&frame).await {
                tracing::debug!("rpc write failed: {err}");
                return;
            }
            let _ = writer.flush().await;
        }
    }

    pub(crate) fn remove_iterator(&self, id: u32) {
        let mut st = self.state.lock();
        if st.iterators.remove(&id).is_some() {
            self.settle(&mut st);
        }
    }

    /// Keepalive and flush bookkeeping, called after every map mutation.
    fn settle(&self, st: &mut GuestState) {
        let busy = !st.requests.is_empty() || !st.iterators.is_empty();
        if busy && !st.busy {
            st.busy = true;
            if let Some(keepalive) = &self.keepalive {
                keepalive.acquire();
            }
        } else if !busy && st.busy {
            st.busy = false;
            if let Some(keepalive) = &self.keepalive {
                keepalive.release();
            }
            self.flush.send_modify(|epoch| *epoch += 1);
        }
    }

    fn abort_all(&self, st: &mut GuestState, code: ErrorCode) {
        for (_, request) in st.requests.drain() {
            request.slot.fail(GuestError::from_code(code));
        }
        for (_, record) in st.iterators.drain() {
            {
                let mut iter_state = record.state.lock();
                iter_state.failure.get_or_insert(IterFailure::Abort(code));
            }
            record.wake.notify_one();
        }
    }

    /// Messages to resend on a fresh attachment: every pending request plus
    /// an open frame for every live iterator, carrying its current seq,
    /// bookmark, pending seek, and the limit reduced by what was already
    /// consumed.
    fn collect_replay(&self, st: &GuestState) -> Vec<Input> {
        let mut out: Vec<Input> = st
            .requests
            .values()
            .map(|request| request.message.clone())
            .collect();
        for (id, record) in &st.iterators {
            let iter_state = record.state.lock();
            if iter_state.ended || iter_state.failure.is_some() {
                continue;
            }
            let mut options = iter_state.options.clone();
            if options.range.limit >= 0 {
                options.range.limit =
                    (options.range.limit - iter_state.consumed as i32).max(0);
            }
            out.push(Input::Iterator {
                id: *id,
                options,
                bookmark: iter_state.bookmark.clone(),
                seek: iter_state.pending_seek.clone(),
                seq: iter_state.seq,
            });
        }
        out
    }

    async fn read_loop<R: AsyncRead + Unpin>(&self, mut reader: R) {
        let mut decoder = Decoder::new();
        let mut buf = vec![0u8; 8192];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => {
                    tracing::debug!("rpc stream ended");
                    return;
                }
                Ok(n) => n,
                Err(err) => {
                    tracing::debug!("rpc stream read error: {err}");
                    return;
                }
            };
            decoder.extend(&buf[..n]);
            loop {
                match decoder.decode_output() {
                    Ok(Some(msg)) => self.dispatch(msg),
                    Ok(None) => break,
                    Err(err) => {
                        tracing::debug!("rpc stream framing error: {err}");
                        return;
                    }
                }
            }
        }
    }

    fn dispatch(&self, msg: Output) {
        match msg {
            Output::Callback { id, error, value } => {
                let request = self.take_request(id);
                match request {
                    None => tracing::trace!(id, "reply for unknown request id"),
                    Some(request) => match request.slot {
                        ReplySlot::Value(tx) => {
                            let _ = tx.send(match error {
                                Some(code) => Err(GuestError::from_wire(code)),
                                None => Ok(value),
                            });
                        }
                        slot @ ReplySlot::Values(_) => {
                            slot.fail(match error {
                                Some(code) => GuestError::from_wire(code),
                                None => GuestError::Remote {
                                    code: "LEVEL_REMOTE_ERROR".to_string(),
                                },
                            });
                        }
                    },
                }
            }
            Output::GetManyCallback { id, error, values } => {
                let request = self.take_request(id);
                match request {
                    None => tracing::trace!(id, "reply for unknown request id"),
                    Some(request) => match request.slot {
                        ReplySlot::Values(tx) => {
                            let _ = tx.send(match error {
                                Some(code) => Err(GuestError::from_wire(code)),
                                None => Ok(values),
                            });
                        }
                        slot @ ReplySlot::Value(_) => {
                            slot.fail(match error {
                                Some(code) => GuestError::from_wire(code),
                                None => GuestError::Remote {
                                    code: "LEVEL_REMOTE_ERROR".to_string(),
                                },
                            });
                        }
                    },
                }
            }
            Output::IteratorData { id, seq, data } => {
                let Some(record) = self.state.lock().iterators.get(&id).cloned() else {
                    return;
                };
                {
                    let mut iter_state = record.state.lock();
                    if iter_state.seq != seq {
                        tracing::trace!(id, seq, "discarding stale iterator data");
                        return;
                    }
                    let fields = iter_state.options.fields_per_entry().max(1);
                    if data.is_empty() || data.len() % fields != 0 {
                        tracing::debug!(id, "dropping malformed iterator batch");
                        return;
                    }
                    iter_state.queue.push_back(data.into());
                }
                record.wake.notify_one();
            }
            Output::IteratorEnd { id, seq } => {
                let Some(record) = self.state.lock().iterators.get(&id).cloned() else {
                    return;
                };
                {
                    let mut iter_state = record.state.lock();
                    if iter_state.seq != seq {
                        return;
                    }
                    iter_state.ended = true;
                }
                record.wake.notify_one();
            }
            Output::IteratorError { id, seq, error } => {
                let Some(record) = self.state.lock().iterators.get(&id).cloned() else {
                    return;
                };
                {
                    let mut iter_state = record.state.lock();
                    if iter_state.seq != seq {
                        return;
                    }
                    iter_state.failure.get_or_insert(IterFailure::Remote(error));
                }
                record.wake.notify_one();
            }
        }
    }

    fn take_request(&self, id: u32) -> Option<PendingRequest> {
        let mut st = self.state.lock();
        let request = st.requests.remove(&id);
        if request.is_some() {
            self.settle(&mut st);
        }
        request
    }

    /// Transport ended: abort or preserve pending work per the retry flag.
    async fn on_detach(&self) {
        *self.writer.lock().await = None;
        let mut st = self.state.lock();
        if st.closed {
            return;
        }
        st.attached = false;
        st.writer_ready = false;
        if self.retry {
            // Buffered batches the caller never pulled are dropped here; the
            // host resends that data from the bookmark after reattach.
            for record in st.iterators.values() {
                record.state.lock().queue.clear();
            }
        } else {
            self.abort_all(&mut st, ErrorCode::ConnectionLost);
            self.settle(&mut st);
        }
    }
}
