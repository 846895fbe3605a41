//! Per-connection demultiplexer.
//!
//! One [`HostSession`] serves one transport: inbound frames are decoded,
//! executed against the backing store, and answered with reply frames.
//! Iterator output is batched and credit-limited: after sending a batch the
//! host waits for the guest's ack before producing the next one.

use crate::error::HostError;
use bytes::Bytes;
use kvbridge_protocol::{codec, Decoder, Input, Output};
use kvbridge_store::{Store, StoreError, StoreIterator};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Tuning knobs for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum entries per iterator data frame.
    pub iterator_batch_size: usize,
    /// Maximum inbound frame size.
    pub max_frame_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            iterator_batch_size: 64,
            max_frame_size: kvbridge_protocol::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// A live cursor, keyed by the guest-chosen id.
struct HostIterator {
    cursor: Box<dyn StoreIterator>,
    seq: u32,
    keys: bool,
    values: bool,
}

enum PumpOutcome {
    /// Batch filled; wait for the guest's ack.
    More,
    End,
    Error(StoreError),
}

/// Executes decoded requests against the backing store.
pub struct HostSession<S: Store> {
    store: Arc<S>,
    config: SessionConfig,
    iterators: HashMap<u32, HostIterator>,
}

impl<S: Store> HostSession<S> {
    pub fn new(store: Arc<S>, config: SessionConfig) -> Self {
        Self {
            store,
            config,
            iterators: HashMap::new(),
        }
    }

    /// Number of live cursors, for introspection and tests.
    pub fn iterator_count(&self) -> usize {
        self.iterators.len()
    }

    /// Handles one request and returns the replies to write, in order.
    pub fn handle(&mut self, msg: Input) -> Vec<Output> {
        match msg {
            Input::Get { id, key } => vec![match self.store.get(&key) {
                Ok(value) => Output::Callback {
                    id,
                    error: None,
                    value,
                },
                Err(err) => error_callback(id, &err),
            }],
            Input::GetMany { id, keys } => vec![match self.store.get_many(&keys) {
                Ok(values) => Output::GetManyCallback {
                    id,
                    error: None,
                    values,
                },
                Err(err) => Output::GetManyCallback {
                    id,
                    error: Some(err.code().as_str().to_string()),
                    values: Vec::new(),
                },
            }],
            Input::Put { id, key, value } => vec![ack(id, self.store.put(key, value))],
            Input::Del { id, key } => vec![ack(id, self.store.del(&key))],
            Input::Batch { id, ops } => vec![ack(id, self.store.batch(ops))],
            Input::Clear { id, options } => vec![ack(id, self.store.clear(&options))],
            Input::Iterator {
                id,
                options,
                bookmark,
                seek,
                seq,
            } => {
                // A fresh iterator frame under a live id replaces the old
                // cursor; this is how a reconnected guest resumes.
                self.iterators.remove(&id);
                match self.store.iterator(options.clone()) {
                    Ok(mut cursor) => {
                        if let Some(bookmark) = &bookmark {
                            cursor.resume_after(bookmark);
                        }
                        if let Some(seek) = &seek {
                            cursor.seek(seek);
                        }
                        self.iterators.insert(
                            id,
                            HostIterator {
                                cursor,
                                seq,
                                keys: options.keys,
                                values: options.values,
                            },
                        );
                        self.pump(id)
                    }
                    Err(err) => vec![Output::IteratorError {
                        id,
                        seq,
                        error: err.code().as_str().to_string(),
                    }],
                }
            }
            Input::IteratorSeek { id, seq, target } => {
                if let Some(it) = self.iterators.get_mut(&id) {
                    it.cursor.seek(&target);
                    it.seq = seq;
                    self.pump(id)
                } else {
                    Vec::new()
                }
            }
            Input::IteratorAck { id, seq, consumed } => {
                // One batch of credit per ack. A stale-seq ack is from before
                // a seek and must not double-issue credit.
                tracing::trace!(id, seq, consumed, "iterator ack");
                match self.iterators.get(&id) {
                    Some(it) if it.seq == seq => self.pump(id),
                    _ => Vec::new(),
                }
            }
            Input::IteratorClose { id } => {
                self.iterators.remove(&id);
                Vec::new()
            }
        }
    }

    /// Produces the next batch for an iterator: at most `iterator_batch_size`
    /// entries, followed by end or error frames when the cursor finishes.
    fn pump(&mut self, id: u32) -> Vec<Output> {
        let batch_size = self.config.iterator_batch_size;
        let Some(it) = self.iterators.get_mut(&id) else {
            return Vec::new();
        };

        let mut data = Vec::new();
        let mut entries = 0;
        let outcome = loop {
            if entries == batch_size {
                break PumpOutcome::More;
            }
            match it.cursor.next() {
                Ok(Some((key, value))) => {
                    match (it.keys, it.values) {
                        (true, true) => {
                            data.push(key);
                            data.push(value);
                        }
                        (true, false) => data.push(key),
                        (false, true) => data.push(value),
                        // Count-only advance: one empty placeholder per entry
                        // keeps the batch countable.
                        (false, false) => data.push(Bytes::new()),
                    }
                    entries += 1;
                }
                Ok(None) => break PumpOutcome::End,
                Err(err) => break PumpOutcome::Error(err),
            }
        };

        let seq = it.seq;
        let mut out = Vec::new();
        if !data.is_empty() {
            out.push(Output::IteratorData { id, seq, data });
        }
        match outcome {
            PumpOutcome::More => {}
            PumpOutcome::End => {
                out.push(Output::IteratorEnd { id, seq });
                self.iterators.remove(&id);
            }
            PumpOutcome::Error(err) => {
                out.push(Output::IteratorError {
                    id,
                    seq,
                    error: err.code().as_str().to_string(),
                });
                self.iterators.remove(&id);
            }
        }
        out
    }
}

fn ack(id: u32, result: Result<(), StoreError>) -> Output {
    match result {
        Ok(()) => Output::Callback {
            id,
            error: None,
            value: None,
        },
        Err(err) => error_callback(id, &err),
    }
}

fn error_callback(id: u32, err: &StoreError) -> Output {
    Output::Callback {
        id,
        error: Some(err.code().as_str().to_string()),
        value: None,
    }
}

/// Serves one store over one transport until the stream ends.
pub async fn serve<S, T>(store: Arc<S>, transport: T, config: SessionConfig) -> Result<(), HostError>
where
    S: Store,
    T: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(transport);
    let mut decoder = Decoder::with_max_frame_size(config.max_frame_size);
    let mut session = HostSession::new(store, config);
    let mut buf = vec![0u8; 8192];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            tracing::debug!("rpc stream ended");
            return Ok(());
        }
        decoder.extend(&buf[..n]);
        while let Some(msg) = decoder.decode_input()? {
            tracing::trace!(op = msg.name(), id = msg.id(), "dispatching request");
            for reply in session.handle(msg) {
                writer.write_all(&codec::encode_output(&reply)).await?;
            }
        }
        writer.flush().await?;
    }
}
