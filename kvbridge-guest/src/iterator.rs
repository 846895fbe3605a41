//! Guest-side iterator handle.
//!
//! Each open iterator is split between a *record* (owned by the guest's
//! iterator map, mutated by the dispatch task) and a *handle* (held by the
//! caller). The record carries the wire state: the current `seq`, queued
//! data batches, the consumed count, and the bookmark / pending-seek used to
//! resume after a reconnect. The handle drains batches and acknowledges
//! consumption back to the host.

use crate::error::GuestError;
use crate::guest::GuestInner;
use bytes::Bytes;
use kvbridge_protocol::{ErrorCode, Input, IteratorOptions};
use kvbridge_store::StoreIterator;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

/// A single streamed entry. Fields the iterator was not asked for are `None`.
pub type Entry = (Option<Bytes>, Option<Bytes>);

/// Why an iterator stopped producing entries.
#[derive(Debug, Clone)]
pub(crate) enum IterFailure {
    /// Aborted locally (disconnect without retry, database closed).
    Abort(ErrorCode),
    /// The host reported an error for this iterator.
    Remote(String),
}

impl IterFailure {
    pub(crate) fn to_error(&self) -> GuestError {
        match self {
            IterFailure::Abort(code) => GuestError::from_code(*code),
            IterFailure::Remote(code) => GuestError::from_wire(code.clone()),
        }
    }
}

pub(crate) struct IterState {
    pub seq: u32,
    pub options: IteratorOptions,
    pub consumed: u32,
    pub bookmark: Option<Bytes>,
    pub pending_seek: Option<Bytes>,
    pub ended: bool,
    pub failure: Option<IterFailure>,
    /// Batches delivered by the host, drained front to back.
    pub queue: VecDeque<VecDeque<Bytes>>,
}

pub(crate) struct IterRecord {
    pub state: Mutex<IterState>,
    pub wake: Notify,
}

impl IterRecord {
    pub(crate) fn new(options: IteratorOptions) -> Self {
        Self {
            state: Mutex::new(IterState {
                seq: 0,
                options,
                consumed: 0,
                bookmark: None,
                pending_seek: None,
                ended: false,
                failure: None,
                queue: VecDeque::new(),
            }),
            wake: Notify::new(),
        }
    }
}

enum Backend {
    Rpc {
        inner: Arc<GuestInner>,
        record: Arc<IterRecord>,
        id: u32,
    },
    Local {
        cursor: Box<dyn StoreIterator>,
        options: IteratorOptions,
    },
}

/// An ordered iterator over the remote (or forwarded) store.
pub struct GuestIterator {
    backend: Backend,
    closed: bool,
}

impl GuestIterator {
    pub(crate) fn rpc(inner: Arc<GuestInner>, record: Arc<IterRecord>, id: u32) -> Self {
        Self {
            backend: Backend::Rpc { inner, record, id },
            closed: false,
        }
    }

    pub(crate) fn local(cursor: Box<dyn StoreIterator>, options: IteratorOptions) -> Self {
        Self {
            backend: Backend::Local { cursor, options },
            closed: false,
        }
    }

    /// Yields the next entry, or `None` once the iterator is exhausted.
    ///
    /// Suspends while no data is buffered and the host has not signalled the
    /// end of the range.
    pub async fn next(&mut self) -> Result<Option<Entry>, GuestError> {
        if self.closed {
            return Ok(None);
        }
        match &mut self.backend {
            Backend::Local { cursor, options } => {
                let (keys, values) = (options.keys, options.values);
                Ok(cursor.next()?.map(|(key, value)| {
                    (keys.then_some(key), values.then_some(value))
                }))
            }
            Backend::Rpc { inner, record, id } => loop {
                let mut st = record.state.lock();
                if let Some(failure) = &st.failure {
                    return Err(failure.to_error());
                }
                let limit = st.options.range.limit;
                if limit >= 0 && st.consumed >= limit as u32 {
                    return Ok(None);
                }
                while matches!(st.queue.front(), Some(batch) if batch.is_empty()) {
                    st.queue.pop_front();
                }
                if st.queue.front().is_some() {
                    let (keys, values) = (st.options.keys, st.options.values);
                    let batch = st.queue.front_mut().expect("non-empty queue");
                    let key = if keys { batch.pop_front() } else { None };
                    let value = if values { batch.pop_front() } else { None };
                    if !keys && !values {
                        batch.pop_front();
                    }
                    let drained = batch.is_empty();
                    if drained {
                        st.queue.pop_front();
                    }
                    st.consumed += 1;
                    st.pending_seek = None;
                    if inner.retry {
                        if let Some(key) = &key {
                            st.bookmark = Some(key.clone());
                        }
                    }
                    let at_limit = limit >= 0 && st.consumed >= limit as u32;
                    let ack = (drained && !at_limit).then(|| Input::IteratorAck {
                        id: *id,
                        seq: st.seq,
                        consumed: st.consumed,
                    });
                    drop(st);
                    if let Some(msg) = ack {
                        inner.send_best_effort(&msg).await;
                    }
                    return Ok(Some((key, value)));
                }
                if st.ended {
                    return Ok(None);
                }
                drop(st);
                record.wake.notified().await;
            },
        }
    }

    /// Repositions the iterator; the next pull yields the first entry at or
    /// past `target` in iteration order. Data frames still in flight from
    /// before the seek are discarded.
    pub async fn seek(&mut self, target: impl Into<Bytes>) -> Result<(), GuestError> {
        if self.closed {
            return Ok(());
        }
        let target = target.into();
        match &mut self.backend {
            Backend::Local { cursor, .. } => {
                cursor.seek(&target);
                Ok(())
            }
            Backend::Rpc { inner, record, id } => {
                let msg = {
                    let mut st = record.state.lock();
                    if st.failure.is_some() {
                        return Ok(());
                    }
                    st.queue.clear();
                    st.ended = false;
                    st.seq = st.seq.wrapping_add(1);
                    st.pending_seek = Some(target.clone());
                    st.bookmark = None;
                    Input::IteratorSeek {
                        id: *id,
                        seq: st.seq,
                        target,
                    }
                };
                inner.send_best_effort(&msg).await;
                Ok(())
            }
        }
    }

    /// Closes the iterator, releasing the host-side cursor. Idempotent.
    pub async fn close(&mut self) -> Result<(), GuestError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Backend::Rpc { inner, id, .. } = &self.backend {
            inner.remove_iterator(*id);
            inner.send_best_effort(&Input::IteratorClose { id: *id }).await;
        }
        Ok(())
    }
}

impl Drop for GuestIterator {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Without an async close we can only drop the local record; the host
        // collects the cursor when the transport ends or the id is reused.
        if let Backend::Rpc { inner, id, .. } = &self.backend {
            inner.remove_iterator(*id);
        }
    }
}
