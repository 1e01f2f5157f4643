use crate::common::{Nanos, TimeInterval};
use crate::engine::error::{ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

/// Timestamp specification of one response message: either a uniform clock
/// grid or an explicit list of sample times.
///
/// Two keys are equal iff all fields are elementwise equal; the hash follows
/// the same fields. Ordering is by induced time range first so that sorted
/// block sets come out start-time-ordered, with the structural fields as a
/// deterministic tie break.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimingKey {
    Clock {
        start: Nanos,
        period_nanos: i64,
        count: usize,
    },
    ExplicitList {
        timestamps: Vec<Nanos>,
    },
}

impl TimingKey {
    pub fn count(&self) -> usize {
        match self {
            TimingKey::Clock { count, .. } => return *count,
            TimingKey::ExplicitList { timestamps } => return timestamps.len(),
        }
    }

    pub fn begin(&self) -> Nanos {
        match self {
            TimingKey::Clock { start, .. } => return *start,
            TimingKey::ExplicitList { timestamps } => {
                return timestamps.first().copied().unwrap_or(0);
            }
        }
    }

    pub fn end(&self) -> Nanos {
        match self {
            TimingKey::Clock {
                start,
                period_nanos,
                count,
            } => {
                if *count == 0 {
                    return *start;
                }
                return start + period_nanos * (*count as i64 - 1);
            }
            TimingKey::ExplicitList { timestamps } => {
                return timestamps.last().copied().unwrap_or(0);
            }
        }
    }

    /// Time range induced by the key (first..last timestamp, closed).
    pub fn range(&self) -> TimeInterval {
        return TimeInterval::new(self.begin(), self.end())
            .unwrap_or_else(|| TimeInterval::at(self.begin()));
    }

    /// Materializes the key into the full timestamp sequence.
    pub fn timestamps(&self) -> Vec<Nanos> {
        match self {
            TimingKey::Clock {
                start,
                period_nanos,
                count,
            } => {
                return (0..*count as i64).map(|i| start + period_nanos * i).collect();
            }
            TimingKey::ExplicitList { timestamps } => return timestamps.clone(),
        }
    }
}

impl Ord for TimingKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_range = (self.begin(), self.end()).cmp(&(other.begin(), other.end()));
        if by_range != Ordering::Equal {
            return by_range;
        }
        // Structural tie break so that distinct keys never compare equal.
        match (self, other) {
            (
                TimingKey::Clock {
                    start: s1,
                    period_nanos: p1,
                    count: c1,
                },
                TimingKey::Clock {
                    start: s2,
                    period_nanos: p2,
                    count: c2,
                },
            ) => return (s1, p1, c1).cmp(&(s2, p2, c2)),
            (TimingKey::ExplicitList { timestamps: t1 }, TimingKey::ExplicitList { timestamps: t2 }) => {
                return t1.cmp(t2);
            }
            (TimingKey::Clock { .. }, TimingKey::ExplicitList { .. }) => return Ordering::Less,
            (TimingKey::ExplicitList { .. }, TimingKey::Clock { .. }) => return Ordering::Greater,
        }
    }
}

impl PartialOrd for TimingKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        return Some(self.cmp(other));
    }
}

/// Closed set of value types a source can report.
///
/// `Unsupported` is a sentinel recorded when conflicting types were observed
/// for the same source name; it never appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SupportedType {
    Bool,
    ByteArray,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Unsupported,
}

impl fmt::Display for SupportedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SupportedType::Bool => "bool",
            SupportedType::ByteArray => "bytes",
            SupportedType::Int32 => "int32",
            SupportedType::Int64 => "int64",
            SupportedType::Float32 => "float32",
            SupportedType::Float64 => "float64",
            SupportedType::String => "string",
            SupportedType::Unsupported => "unsupported",
        };
        return write!(f, "{}", name);
    }
}

/// One decoded sample value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Bytes(Vec<u8>),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
}

impl Value {
    pub fn supported_type(&self) -> SupportedType {
        match self {
            Value::Bool(_) => return SupportedType::Bool,
            Value::Bytes(_) => return SupportedType::ByteArray,
            Value::Int32(_) => return SupportedType::Int32,
            Value::Int64(_) => return SupportedType::Int64,
            Value::Float32(_) => return SupportedType::Float32,
            Value::Float64(_) => return SupportedType::Float64,
            Value::String(_) => return SupportedType::String,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => return write!(f, "{}", v),
            Value::Bytes(v) => return write!(f, "<{} bytes>", v.len()),
            Value::Int32(v) => return write!(f, "{}", v),
            Value::Int64(v) => return write!(f, "{}", v),
            Value::Float32(v) => return write!(f, "{}", v),
            Value::Float64(v) => return write!(f, "{}", v),
            Value::String(v) => return write!(f, "{}", v),
        }
    }
}

/// Labelled sequence of values for one source, as carried by a response
/// message. `values.len()` must equal the sample count of the owning key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataColumn {
    pub source: String,
    pub data_type: SupportedType,
    pub values: Vec<Value>,
}

impl DataColumn {
    pub fn new(source: impl Into<String>, data_type: SupportedType, values: Vec<Value>) -> Self {
        return DataColumn {
            source: source.into(),
            data_type,
            values,
        };
    }
}

/// One decoded server frame: a timing key plus one or more data columns.
///
/// The key is optional at this level so that a frame which carried neither a
/// clock nor a timestamp list is representable (and rejected at correlation
/// time with a timing-missing error).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub timing: Option<TimingKey>,
    pub columns: Vec<DataColumn>,
    /// Serialized size of the frame, reported by the decoder.
    pub byte_size: usize,
}

impl ResponseMessage {
    pub fn new(timing: TimingKey, columns: Vec<DataColumn>, byte_size: usize) -> Self {
        return ResponseMessage {
            timing: Some(timing),
            columns,
            byte_size,
        };
    }

    pub fn timing(&self) -> Result<&TimingKey> {
        return self
            .timing
            .as_ref()
            .ok_or_else(|| ErrorKind::TimingMissing.with_message("message has no timestamp specification"));
    }
}

/// A data request: named sources over one closed time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequest {
    /// Opaque identifier, passed through to the final aggregate unchanged.
    pub request_id: String,
    pub sources: Vec<String>,
    pub range: TimeInterval,
}

impl DataRequest {
    pub fn new(request_id: impl Into<String>, sources: Vec<String>, range: TimeInterval) -> Self {
        return DataRequest {
            request_id: request_id.into(),
            sources,
            range,
        };
    }

    /// Gating metric for multi-streaming: source count times whole seconds.
    pub fn domain_size(&self) -> i64 {
        return self.sources.len() as i64 * self.range.duration_seconds();
    }
}

/// All columns sharing one timing key.
///
/// Source names are unique within a block (first writer wins) and every
/// column length matches the key's sample count once verified.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedBlock {
    timing: TimingKey,
    columns: Vec<DataColumn>,
    sources: BTreeSet<String>,
}

impl CorrelatedBlock {
    pub fn new(timing: TimingKey) -> Self {
        return CorrelatedBlock {
            timing,
            columns: Vec::new(),
            sources: BTreeSet::new(),
        };
    }

    pub fn timing(&self) -> &TimingKey {
        return &self.timing;
    }

    pub fn time_range(&self) -> TimeInterval {
        return self.timing.range();
    }

    pub fn columns(&self) -> &[DataColumn] {
        return &self.columns;
    }

    pub fn into_columns(self) -> Vec<DataColumn> {
        return self.columns;
    }

    pub fn sources(&self) -> &BTreeSet<String> {
        return &self.sources;
    }

    /// Appends a column unless its source is already present.
    /// Returns false when the column was dropped (first writer wins).
    pub fn insert_column(&mut self, column: DataColumn) -> bool {
        if self.sources.contains(&column.source) {
            return false;
        }
        self.sources.insert(column.source.clone());
        self.columns.push(column);
        return true;
    }

    /// Structural checks, run only when error checking is enabled:
    /// column count vs source count, column lengths vs key sample count.
    pub fn verify(&self) -> Result<()> {
        if self.columns.len() != self.sources.len() {
            return Err(ErrorKind::CorrelationFailure.with_context(format!(
                "block has {} columns for {} sources",
                self.columns.len(),
                self.sources.len()
            )));
        }
        let expected = self.timing.count();
        for column in &self.columns {
            if column.values.len() != expected {
                return Err(ErrorKind::SizeMismatch.with_message(format!(
                    "column {} has {} values, timing key defines {}",
                    column.source,
                    column.values.len(),
                    expected
                )));
            }
        }
        return Ok(());
    }
}
