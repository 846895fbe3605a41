//! Message types for both directions of the rpc stream.
//!
//! Every frame body starts with a one-byte tag naming the message kind. The
//! input namespace (guest to host) and output namespace (host to guest) are
//! disjoint; the numeric values are part of the protocol contract.

use bytes::Bytes;

/// Tags for guest-to-host messages.
pub mod input_tag {
    pub const GET: u8 = 1;
    pub const PUT: u8 = 2;
    pub const DEL: u8 = 3;
    pub const BATCH: u8 = 4;
    pub const ITERATOR: u8 = 5;
    pub const ITERATOR_CLOSE: u8 = 6;
    pub const ITERATOR_ACK: u8 = 7;
    pub const ITERATOR_SEEK: u8 = 8;
    pub const CLEAR: u8 = 9;
    pub const GET_MANY: u8 = 10;
}

/// Tags for host-to-guest messages.
pub mod output_tag {
    pub const CALLBACK: u8 = 1;
    pub const ITERATOR_DATA: u8 = 2;
    pub const ITERATOR_END: u8 = 3;
    pub const ITERATOR_ERROR: u8 = 4;
    pub const GET_MANY_CALLBACK: u8 = 5;
}

/// Range bounds shared by iterators and range clears.
///
/// Absent bounds are unbounded; `gt`/`lt` are exclusive, `gte`/`lte`
/// inclusive. When both an exclusive and an inclusive bound are given for the
/// same side, the stricter one applies. A negative `limit` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeOptions {
    pub gt: Option<Bytes>,
    pub gte: Option<Bytes>,
    pub lt: Option<Bytes>,
    pub lte: Option<Bytes>,
    pub reverse: bool,
    pub limit: i32,
}

impl Default for RangeOptions {
    fn default() -> Self {
        Self {
            gt: None,
            gte: None,
            lt: None,
            lte: None,
            reverse: false,
            limit: -1,
        }
    }
}

impl RangeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gt(mut self, key: impl Into<Bytes>) -> Self {
        self.gt = Some(key.into());
        self
    }

    pub fn with_gte(mut self, key: impl Into<Bytes>) -> Self {
        self.gte = Some(key.into());
        self
    }

    pub fn with_lt(mut self, key: impl Into<Bytes>) -> Self {
        self.lt = Some(key.into());
        self
    }

    pub fn with_lte(mut self, key: impl Into<Bytes>) -> Self {
        self.lte = Some(key.into());
        self
    }

    pub fn with_reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn with_limit(mut self, limit: i32) -> Self {
        self.limit = limit;
        self
    }
}

/// Iterator parameters: a range plus which entry fields to stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IteratorOptions {
    pub range: RangeOptions,
    pub keys: bool,
    pub values: bool,
}

impl Default for IteratorOptions {
    fn default() -> Self {
        Self {
            range: RangeOptions::default(),
            keys: true,
            values: true,
        }
    }
}

impl IteratorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_range(mut self, range: RangeOptions) -> Self {
        self.range = range;
        self
    }

    pub fn with_keys(mut self, keys: bool) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_values(mut self, values: bool) -> Self {
        self.values = values;
        self
    }

    /// Number of wire fields each streamed entry occupies. Zero-field
    /// entries are encoded as a single empty placeholder so they stay
    /// countable.
    pub fn fields_per_entry(&self) -> usize {
        usize::from(self.keys) + usize::from(self.values)
    }
}

/// One operation inside a batch write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Bytes, value: Bytes },
    Del { key: Bytes },
}

impl BatchOp {
    pub fn put(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        BatchOp::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn del(key: impl Into<Bytes>) -> Self {
        BatchOp::Del { key: key.into() }
    }

    pub fn key(&self) -> &Bytes {
        match self {
            BatchOp::Put { key, .. } => key,
            BatchOp::Del { key } => key,
        }
    }
}

/// Guest-to-host messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Get {
        id: u32,
        key: Bytes,
    },
    Put {
        id: u32,
        key: Bytes,
        value: Bytes,
    },
    Del {
        id: u32,
        key: Bytes,
    },
    Batch {
        id: u32,
        ops: Vec<BatchOp>,
    },
    Iterator {
        id: u32,
        options: IteratorOptions,
        bookmark: Option<Bytes>,
        seek: Option<Bytes>,
        seq: u32,
    },
    IteratorClose {
        id: u32,
    },
    IteratorAck {
        id: u32,
        seq: u32,
        consumed: u32,
    },
    IteratorSeek {
        id: u32,
        seq: u32,
        target: Bytes,
    },
    Clear {
        id: u32,
        options: RangeOptions,
    },
    GetMany {
        id: u32,
        keys: Vec<Bytes>,
    },
}

impl Input {
    pub fn tag(&self) -> u8 {
        match self {
            Input::Get { .. } => input_tag::GET,
            Input::Put { .. } => input_tag::PUT,
            Input::Del { .. } => input_tag::DEL,
            Input::Batch { .. } => input_tag::BATCH,
            Input::Iterator { .. } => input_tag::ITERATOR,
            Input::IteratorClose { .. } => input_tag::ITERATOR_CLOSE,
            Input::IteratorAck { .. } => input_tag::ITERATOR_ACK,
            Input::IteratorSeek { .. } => input_tag::ITERATOR_SEEK,
            Input::Clear { .. } => input_tag::CLEAR,
            Input::GetMany { .. } => input_tag::GET_MANY,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            Input::Get { id, .. }
            | Input::Put { id, .. }
            | Input::Del { id, .. }
            | Input::Batch { id, .. }
            | Input::Iterator { id, .. }
            | Input::IteratorClose { id }
            | Input::IteratorAck { id, .. }
            | Input::IteratorSeek { id, .. }
            | Input::Clear { id, .. }
            | Input::GetMany { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Input::Get { .. } => "get",
            Input::Put { .. } => "put",
            Input::Del { .. } => "del",
            Input::Batch { .. } => "batch",
            Input::Iterator { .. } => "iterator",
            Input::IteratorClose { .. } => "iteratorClose",
            Input::IteratorAck { .. } => "iteratorAck",
            Input::IteratorSeek { .. } => "iteratorSeek",
            Input::Clear { .. } => "clear",
            Input::GetMany { .. } => "getMany",
        }
    }
}

/// Host-to-guest messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Callback {
        id: u32,
        error: Option<String>,
        value: Option<Bytes>,
    },
    IteratorData {
        id: u32,
        seq: u32,
        data: Vec<Bytes>,
    },
    IteratorEnd {
        id: u32,
        seq: u32,
    },
    IteratorError {
        id: u32,
        seq: u32,
        error: String,
    },
    GetManyCallback {
        id: u32,
        error: Option<String>,
        values: Vec<Option<Bytes>>,
    },
}

impl Output {
    pub fn tag(&self) -> u8 {
        match self {
            Output::Callback { .. } => output_tag::CALLBACK,
            Output::IteratorData { .. } => output_tag::ITERATOR_DATA,
            Output::IteratorEnd { .. } => output_tag::ITERATOR_END,
            Output::IteratorError { .. } => output_tag::ITERATOR_ERROR,
            Output::GetManyCallback { .. } => output_tag::GET_MANY_CALLBACK,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            Output::Callback { id, .. }
            | Output::IteratorData { id, .. }
            | Output::IteratorEnd { id, .. }
            | Output::IteratorError { id, .. }
            | Output::GetManyCallback { id, .. } => *id,
        }
    }
}
