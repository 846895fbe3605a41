//! Per-tag binary encoding and decoding.
//!
//! Fields are written in declaration order with no field tags: u32 as
//! unsigned varint, the signed limit as zigzag varint, bytes as
//! varint-length-prefixed raw bytes, optionals behind a one-byte presence
//! marker (absent stays distinct from present-and-empty), repeats behind a
//! varint count. Trailing bytes after the last field are ignored so newer
//! peers can append fields.

use crate::error::ProtocolError;
use crate::frame;
use crate::message::{
    input_tag, output_tag, BatchOp, Input, IteratorOptions, Output, RangeOptions,
};
use crate::varint::{get_ivarint, get_uvarint, put_ivarint, put_uvarint};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Encodes an input message into a complete length-prefixed frame.
pub fn encode_input(msg: &Input) -> BytesMut {
    let mut body = BytesMut::with_capacity(64);
    body.put_u8(msg.tag());
    match msg {
        Input::Get { id, key } => {
            put_uvarint(&mut body, u64::from(*id));
            put_bytes(&mut body, key);
        }
        Input::Put { id, key, value } => {
            put_uvarint(&mut body, u64::from(*id));
            put_bytes(&mut body, key);
            put_bytes(&mut body, value);
        }
        Input::Del { id, key } => {
            put_uvarint(&mut body, u64::from(*id));
            put_bytes(&mut body, key);
        }
        Input::Batch { id, ops } => {
            put_uvarint(&mut body, u64::from(*id));
            put_uvarint(&mut body, ops.len() as u64);
            for op in ops {
                match op {
                    BatchOp::Put { key, value } => {
                        body.put_u8(0);
                        put_bytes(&mut body, key);
                        put_opt_bytes(&mut body, &Some(value.clone()));
                    }
                    BatchOp::Del { key } => {
                        body.put_u8(1);
                        put_bytes(&mut body, key);
                        put_opt_bytes(&mut body, &None);
                    }
                }
            }
        }
        Input::Iterator {
            id,
            options,
            bookmark,
            seek,
            seq,
        } => {
            put_uvarint(&mut body, u64::from(*id));
            put_iterator_options(&mut body, options);
            put_opt_bytes(&mut body, bookmark);
            put_opt_bytes(&mut body, seek);
            put_uvarint(&mut body, u64::from(*seq));
        }
        Input::IteratorClose { id } => {
            put_uvarint(&mut body, u64::from(*id));
        }
        Input::IteratorAck { id, seq, consumed } => {
            put_uvarint(&mut body, u64::from(*id));
            put_uvarint(&mut body, u64::from(*seq));
            put_uvarint(&mut body, u64::from(*consumed));
        }
        Input::IteratorSeek { id, seq, target } => {
            put_uvarint(&mut body, u64::from(*id));
            put_uvarint(&mut body, u64::from(*seq));
            put_bytes(&mut body, target);
        }
        Input::Clear { id, options } => {
            put_uvarint(&mut body, u64::from(*id));
            put_range_options(&mut body, options);
        }
        Input::GetMany { id, keys } => {
            put_uvarint(&mut body, u64::from(*id));
            put_uvarint(&mut body, keys.len() as u64);
            for key in keys {
                put_bytes(&mut body, key);
            }
        }
    }
    frame::encode(&body)
}

/// Encodes an output message into a complete length-prefixed frame.
pub fn encode_output(msg: &Output) -> BytesMut {
    let mut body = BytesMut::with_capacity(64);
    body.put_u8(msg.tag());
    match msg {
        Output::Callback { id, error, value } => {
            put_uvarint(&mut body, u64::from(*id));
            put_opt_string(&mut body, error);
            put_opt_bytes(&mut body, value);
        }
        Output::IteratorData { id, seq, data } => {
            put_uvarint(&mut body, u64::from(*id));
            put_uvarint(&mut body, u64::from(*seq));
            put_uvarint(&mut body, data.len() as u64);
            for item in data {
                put_bytes(&mut body, item);
            }
        }
        Output::IteratorEnd { id, seq } => {
            put_uvarint(&mut body, u64::from(*id));
            put_uvarint(&mut body, u64::from(*seq));
        }
        Output::IteratorError { id, seq, error } => {
            put_uvarint(&mut body, u64::from(*id));
            put_uvarint(&mut body, u64::from(*seq));
            put_bytes(&mut body, error.as_bytes());
        }
        Output::GetManyCallback { id, error, values } => {
            put_uvarint(&mut body, u64::from(*id));
            put_opt_string(&mut body, error);
            put_uvarint(&mut body, values.len() as u64);
            for value in values {
                put_opt_bytes(&mut body, value);
            }
        }
    }
    frame::encode(&body)
}

/// Decodes one input message from a frame body (tag byte included).
pub fn decode_input_body(mut body: Bytes) -> Result<Input, ProtocolError> {
    if !body.has_remaining() {
        return Err(ProtocolError::Truncated);
    }
    let tag = body.get_u8();
    let buf = &mut body;
    match tag {
        input_tag::GET => Ok(Input::Get {
            id: get_id(buf)?,
            key: get_bytes(buf)?,
        }),
        input_tag::PUT => Ok(Input::Put {
            id: get_id(buf)?,
            key: get_bytes(buf)?,
            value: get_bytes(buf)?,
        }),
        input_tag::DEL => Ok(Input::Del {
            id: get_id(buf)?,
            key: get_bytes(buf)?,
        }),
        input_tag::BATCH => {
            let id = get_id(buf)?;
            let count = get_count(buf)?;
            let mut ops = Vec::with_capacity(count);
            for _ in 0..count {
                let kind = get_u8(buf)?;
                let key = get_bytes(buf)?;
                let value = get_opt_bytes(buf)?;
                ops.push(match (kind, value) {
                    (0, Some(value)) => BatchOp::Put { key, value },
                    (0, None) => return Err(ProtocolError::OutOfRange("batch put value")),
                    (1, _) => BatchOp::Del { key },
                    (other, _) => {
                        return Err(ProtocolError::InvalidEnum {
                            field: "batch op type",
                            value: other,
                        })
                    }
                });
            }
            Ok(Input::Batch { id, ops })
        }
        input_tag::ITERATOR => Ok(Input::Iterator {
            id: get_id(buf)?,
            options: get_iterator_options(buf)?,
            bookmark: get_opt_bytes(buf)?,
            seek: get_opt_bytes(buf)?,
            seq: get_id(buf)?,
        }),
        input_tag::ITERATOR_CLOSE => Ok(Input::IteratorClose { id: get_id(buf)? }),
        input_tag::ITERATOR_ACK => Ok(Input::IteratorAck {
            id: get_id(buf)?,
            seq: get_id(buf)?,
            consumed: get_id(buf)?,
        }),
        input_tag::ITERATOR_SEEK => Ok(Input::IteratorSeek {
            id: get_id(buf)?,
            seq: get_id(buf)?,
            target: get_bytes(buf)?,
        }),
        input_tag::CLEAR => Ok(Input::Clear {
            id: get_id(buf)?,
            options: get_range_options(buf)?,
        }),
        input_tag::GET_MANY => {
            let id = get_id(buf)?;
            let count = get_count(buf)?;
            let mut keys = Vec::with_capacity(count);
            for _ in 0..count {
                keys.push(get_bytes(buf)?);
            }
            Ok(Input::GetMany { id, keys })
        }
        other => Err(ProtocolError::UnknownTag(other)),
    }
}

/// Decodes one output message from a frame body (tag byte included).
pub fn decode_output_body(mut body: Bytes) -> Result<Output, ProtocolError> {
    if !body.has_remaining() {
        return Err(ProtocolError::Truncated);
    }
    let tag = body.get_u8();
    let buf = &mut body;
    match tag {
        output_tag::CALLBACK => Ok(Output::Callback {
            id: get_id(buf)?,
            error: get_opt_string(buf)?,
            value: get_opt_bytes(buf)?,
        }),
        output_tag::ITERATOR_DATA => {
            let id = get_id(buf)?;
            let seq = get_id(buf)?;
            let count = get_count(buf)?;
            let mut data = Vec::with_capacity(count);
            for _ in 0..count {
                data.push(get_bytes(buf)?);
            }
            Ok(Output::IteratorData { id, seq, data })
        }
        output_tag::ITERATOR_END => Ok(Output::IteratorEnd {
            id: get_id(buf)?,
            seq: get_id(buf)?,
        }),
        output_tag::ITERATOR_ERROR => Ok(Output::IteratorError {
            id: get_id(buf)?,
            seq: get_id(buf)?,
            error: get_string(buf)?,
        }),
        output_tag::GET_MANY_CALLBACK => {
            let id = get_id(buf)?;
            let error = get_opt_string(buf)?;
            let count = get_count(buf)?;
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(get_opt_bytes(buf)?);
            }
            Ok(Output::GetManyCallback { id, error, values })
        }
        other => Err(ProtocolError::UnknownTag(other)),
    }
}

/// Incremental decoder over a byte stream.
///
/// Feed chunks with [`Decoder::extend`] and drain complete messages with
/// [`Decoder::decode_input`] / [`Decoder::decode_output`]. Frames that fail
/// to decode (unknown tag, malformed payload) are dropped silently so one bad
/// frame never poisons the stream; framing-level failures propagate.
pub struct Decoder {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_max_frame_size(frame::DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_frame_size,
        }
    }

    /// Appends raw transport bytes to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decodes the next input message, skipping undecodable frames.
    pub fn decode_input(&mut self) -> Result<Option<Input>, ProtocolError> {
        loop {
            match frame::decode(&mut self.buffer, self.max_frame_size)? {
                None => return Ok(None),
                Some(body) => match decode_input_body(body) {
                    Ok(msg) => return Ok(Some(msg)),
                    Err(err) => tracing::debug!("dropping undecodable input frame: {err}"),
                },
            }
        }
    }

    /// Decodes the next output message, skipping undecodable frames.
    pub fn decode_output(&mut self) -> Result<Option<Output>, ProtocolError> {
        loop {
            match frame::decode(&mut self.buffer, self.max_frame_size)? {
                None => return Ok(None),
                Some(body) => match decode_output_body(body) {
                    Ok(msg) => return Ok(Some(msg)),
                    Err(err) => tracing::debug!("dropping undecodable output frame: {err}"),
                },
            }
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
    put_uvarint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

fn put_opt_bytes(buf: &mut BytesMut, data: &Option<Bytes>) {
    match data {
        Some(data) => {
            buf.put_u8(1);
            put_bytes(buf, data);
        }
        None => buf.put_u8(0),
    }
}

fn put_opt_string(buf: &mut BytesMut, data: &Option<String>) {
    match data {
        Some(data) => {
            buf.put_u8(1);
            put_bytes(buf, data.as_bytes());
        }
        None => buf.put_u8(0),
    }
}

fn put_range_options(buf: &mut BytesMut, options: &RangeOptions) {
    put_opt_bytes(buf, &options.gt);
    put_opt_bytes(buf, &options.gte);
    put_opt_bytes(buf, &options.lt);
    put_opt_bytes(buf, &options.lte);
    buf.put_u8(u8::from(options.reverse));
    put_ivarint(buf, i64::from(options.limit));
}

fn put_iterator_options(buf: &mut BytesMut, options: &IteratorOptions) {
    put_range_options(buf, &options.range);
    buf.put_u8(u8::from(options.keys));
    buf.put_u8(u8::from(options.values));
}

fn get_u8(buf: &mut Bytes) -> Result<u8, ProtocolError> {
    if !buf.has_remaining() {
        return Err(ProtocolError::Truncated);
    }
    Ok(buf.get_u8())
}

fn get_id(buf: &mut Bytes) -> Result<u32, ProtocolError> {
    u32::try_from(get_uvarint(buf)?).map_err(|_| ProtocolError::OutOfRange("u32 field"))
}

fn get_count(buf: &mut Bytes) -> Result<usize, ProtocolError> {
    let count = get_uvarint(buf)? as usize;
    // Every element takes at least one byte, so a count beyond the remaining
    // payload is malformed.
    if count > buf.remaining() {
        return Err(ProtocolError::Truncated);
    }
    Ok(count)
}

fn get_bytes(buf: &mut Bytes) -> Result<Bytes, ProtocolError> {
    let len = get_uvarint(buf)? as usize;
    if len > buf.remaining() {
        return Err(ProtocolError::Truncated);
    }
    Ok(buf.copy_to_bytes(len))
}

fn get_opt_bytes(buf: &mut Bytes) -> Result<Option<Bytes>, ProtocolError> {
    match get_u8(buf)? {
        0 => Ok(None),
        1 => Ok(Some(get_bytes(buf)?)),
        other => Err(ProtocolError::InvalidEnum {
            field: "presence marker",
            value: other,
        }),
    }
}

fn get_string(buf: &mut Bytes) -> Result<String, ProtocolError> {
    let raw = get_bytes(buf)?;
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::OutOfRange("string field"))
}

fn get_opt_string(buf: &mut Bytes) -> Result<Option<String>, ProtocolError> {
    match get_u8(buf)? {
        0 => Ok(None),
        1 => Ok(Some(get_string(buf)?)),
        other => Err(ProtocolError::InvalidEnum {
            field: "presence marker",
            value: other,
        }),
    }
}

fn get_bool(buf: &mut Bytes) -> Result<bool, ProtocolError> {
    match get_u8(buf)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(ProtocolError::InvalidEnum {
            field: "bool",
            value: other,
        }),
    }
}

fn get_range_options(buf: &mut Bytes) -> Result<RangeOptions, ProtocolError> {
    Ok(RangeOptions {
        gt: get_opt_bytes(buf)?,
        gte: get_opt_bytes(buf)?,
        lt: get_opt_bytes(buf)?,
        lte: get_opt_bytes(buf)?,
        reverse: get_bool(buf)?,
        limit: i32::try_from(get_ivarint(buf)?)
            .map_err(|_| ProtocolError::OutOfRange("limit"))?,
    })
}

fn get_iterator_options(buf: &mut Bytes) -> Result<IteratorOptions, ProtocolError> {
    Ok(IteratorOptions {
        range: get_range_options(buf)?,
        keys: get_bool(buf)?,
        values: get_bool(buf)?,
    })
}
