// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Core data model: PV names, time instants/intervals, timestamp bases, values, buckets,
//! and correlated blocks.
//!
//! Deliberately avoids a "base trait with virtual methods" for the basis variants — it's a
//! tagged union, so we give it explicit free functions (`sample_count`, `domain`, `timestamps`)
//! rather than an inheritance hierarchy.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};

/// Non-empty printable string, unique within the archive. Wrapped rather than a bare `String`
/// so call sites can't accidentally confuse a PV name with an arbitrary label.
pub type PvName = String;

/// `(seconds since epoch, nanoseconds in [0, 10^9))`, totally ordered lexicographically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Instant {
    pub secs: i64,
    pub nanos: u32,
}

impl Instant {
    pub fn new(secs: i64, nanos: u32) -> Self {
        debug_assert!(nanos < 1_000_000_000, "nanos must be in [0, 1e9)");
        Self { secs, nanos }
    }

    pub fn from_secs(secs: i64) -> Self {
        Self { secs, nanos: 0 }
    }

    /// Adds a whole number of nanoseconds, carrying into seconds.
    pub fn plus_nanos(self, nanos: u64) -> Self {
        let total = self.nanos as u64 + nanos;
        let carry_secs = (total / 1_000_000_000) as i64;
        let rem_nanos = (total % 1_000_000_000) as u32;
        Self {
            secs: self.secs + carry_secs,
            nanos: rem_nanos,
        }
    }

    /// Nanoseconds between `self` and `other` (`self - other`), saturating at `i64::MIN/MAX`.
    pub fn diff_nanos(self, other: Self) -> i64 {
        let secs_diff = (self.secs - other.secs).saturating_mul(1_000_000_000);
        secs_diff.saturating_add(self.nanos as i64 - other.nanos as i64)
    }

    /// Subtracts a whole number of nanoseconds, borrowing from seconds. Panics if `nanos`
    /// exceeds `self`'s distance from `Instant::new(i64::MIN, 0)`, which never happens for the
    /// request-decomposition callers that use this (subtracting 1ns from a non-minimal instant).
    pub fn minus_nanos(self, nanos: u64) -> Self {
        let total = self.secs as i128 * 1_000_000_000 + self.nanos as i128 - nanos as i128;
        let secs = total.div_euclid(1_000_000_000) as i64;
        let rem_nanos = total.rem_euclid(1_000_000_000) as u32;
        Self { secs, nanos: rem_nanos }
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.secs, self.nanos)
    }
}

/// Closed `[begin, end]` interval with `begin <= end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub begin: Instant,
    pub end: Instant,
}

impl TimeInterval {
    pub fn new(begin: Instant, end: Instant) -> crate::Result<Self> {
        if begin >= end {
            return Err(ErrorKind::RequestMalformed.with_message("range begin must be < end"));
        }
        Ok(Self { begin, end })
    }

    /// True if the two intervals share any point, endpoints included.
    pub fn intersects_closed(&self, other: &Self) -> bool {
        self.begin <= other.end && other.begin <= self.end
    }

    pub fn duration_nanos(&self) -> i64 {
        self.end.diff_nanos(self.begin)
    }
}

/// The timestamp schema of a bucket: either a uniform sampling clock or an explicit list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Basis {
    Clock {
        start: Instant,
        period_ns: u64,
        count: usize,
    },
    List(Vec<Instant>),
}

impl Basis {
    pub fn clock(start: Instant, period_ns: u64, count: usize) -> crate::Result<Self> {
        if period_ns == 0 {
            return Err(ErrorKind::RequestMalformed.with_message("clock period must be > 0"));
        }
        if count == 0 {
            return Err(ErrorKind::RequestMalformed.with_message("clock count must be >= 1"));
        }
        Ok(Basis::Clock {
            start,
            period_ns,
            count,
        })
    }

    pub fn list(timestamps: Vec<Instant>) -> crate::Result<Self> {
        if timestamps.is_empty() {
            return Err(ErrorKind::RequestMalformed.with_message("timestamp list must be non-empty"));
        }
        if !timestamps.windows(2).all(|w| w[0] < w[1]) {
            return Err(ErrorKind::RequestMalformed
                .with_message("timestamp list must be strictly increasing"));
        }
        Ok(Basis::List(timestamps))
    }

    pub fn sample_count(&self) -> usize {
        match self {
            Basis::Clock { count, .. } => *count,
            Basis::List(items) => items.len(),
        }
    }

    pub fn start(&self) -> Instant {
        match self {
            Basis::Clock { start, .. } => *start,
            Basis::List(items) => items[0],
        }
    }

    pub fn end(&self) -> Instant {
        match self {
            Basis::Clock {
                start,
                period_ns,
                count,
            } => start.plus_nanos(*period_ns * (*count as u64 - 1)),
            Basis::List(items) => *items.last().expect("non-empty by construction"),
        }
    }

    pub fn domain(&self) -> TimeInterval {
        TimeInterval {
            begin: self.start(),
            end: self.end(),
        }
    }

    /// Materializes the full timestamp sequence. Cheap for lists (already explicit); for
    /// clocks this allocates, so callers that only need `sample_count`/`domain` should avoid it.
    pub fn timestamps(&self) -> Vec<Instant> {
        match self {
            Basis::Clock {
                start,
                period_ns,
                count,
            } => (0..*count)
                .map(|i| start.plus_nanos(*period_ns * i as u64))
                .collect(),
            Basis::List(items) => items.clone(),
        }
    }

    /// Field-by-field (clocks) or element-by-element (lists) equality — the correlation key.
    pub fn equivalent(&self, other: &Self) -> bool {
        self == other
    }
}

/// The closed set of value types a series may hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Bool,
    I32,
    I64,
    U32,
    U64,
    F32,
    F64,
    Str,
    Bytes,
    Timestamp,
    Array,
    Struct,
}

/// A single sample value. `Array` and `Struct` recurse; `DataColumn` is responsible for
/// rejecting values whose type is not assignable to the column's declared `ValueType`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    Timestamp(Instant),
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::U32(_) => ValueType::U32,
            Value::U64(_) => ValueType::U64,
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
            Value::Str(_) => ValueType::Str,
            Value::Bytes(_) => ValueType::Bytes,
            Value::Timestamp(_) => ValueType::Timestamp,
            Value::Array(_) => ValueType::Array,
            Value::Struct(_) => ValueType::Struct,
        }
    }

    /// Rough resident-byte estimate, used for the correlator's `bytes_processed` counter.
    /// Not meant to be byte-exact.
    pub fn estimated_bytes(&self) -> u64 {
        match self {
            Value::Bool(_) => 1,
            Value::I32(_) | Value::U32(_) | Value::F32(_) => 4,
            Value::I64(_) | Value::U64(_) | Value::F64(_) => 8,
            Value::Timestamp(_) => 12,
            Value::Str(s) => s.len() as u64,
            Value::Bytes(b) => b.len() as u64,
            Value::Array(items) => items.iter().map(Value::estimated_bytes).sum(),
            Value::Struct(fields) => fields
                .iter()
                .map(|(k, v)| k.len() as u64 + v.estimated_bytes())
                .sum(),
        }
    }
}

/// `(pv_name, type, values)` where `values.len()` equals the owning bucket's basis sample count.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataColumn {
    pub pv_name: PvName,
    pub value_type: ValueType,
    pub values: Vec<Value>,
}

impl DataColumn {
    /// Builds a column, rejecting any value whose type isn't the declared one
    /// (`ErrorKind::TypeMismatch`).
    pub fn new(pv_name: PvName, value_type: ValueType, values: Vec<Value>) -> crate::Result<Self> {
        if let Some(bad) = values.iter().find(|v| v.value_type() != value_type) {
            return Err(ErrorKind::TypeMismatch.with_message(format!(
                "pv {pv_name}: expected {:?}, found {:?}",
                value_type,
                bad.value_type()
            )));
        }
        Ok(Self {
            pv_name,
            value_type,
            values,
        })
    }

    /// Rough resident-byte estimate for this column's values (see [`Value::estimated_bytes`]).
    pub fn estimated_bytes(&self) -> u64 {
        self.values.iter().map(Value::estimated_bytes).sum()
    }
}

/// `(basis, column)`. Invariant: `column.values.len() == basis.sample_count()`.
#[derive(Clone, Debug)]
pub struct Bucket {
    pub basis: Basis,
    pub column: DataColumn,
}

impl Bucket {
    pub fn new(basis: Basis, column: DataColumn) -> crate::Result<Self> {
        if column.values.len() != basis.sample_count() {
            return Err(ErrorKind::SizeMismatch.with_message(format!(
                "pv {}: column has {} values, basis expects {}",
                column.pv_name,
                column.values.len(),
                basis.sample_count()
            )));
        }
        Ok(Self { basis, column })
    }
}

/// `(basis, columns)`, `len(columns) >= 1`, all column lengths equal to `basis.sample_count()`.
#[derive(Clone, Debug, PartialEq)]
pub struct CorrelatedBlock {
    pub basis: Basis,
    pub columns: BTreeMap<PvName, DataColumn>,
}

impl CorrelatedBlock {
    pub fn seed(bucket: Bucket) -> Self {
        let mut columns = BTreeMap::new();
        columns.insert(bucket.column.pv_name.clone(), bucket.column);
        Self {
            basis: bucket.basis,
            columns,
        }
    }

    /// Adds a bucket's column to this block, rejecting a PV already present
    /// (`ErrorKind::DuplicateSeries`).
    pub fn add(&mut self, bucket: Bucket) -> Result<(), Error> {
        if !self.basis.equivalent(&bucket.basis) {
            return Err(ErrorKind::Internal
                .with_message("attempted to add a bucket with a different basis to this block"));
        }
        if self.columns.contains_key(&bucket.column.pv_name) {
            return Err(ErrorKind::DuplicateSeries.with_message(format!(
                "pv {} already has a column in this block",
                bucket.column.pv_name
            )));
        }
        self.columns.insert(bucket.column.pv_name.clone(), bucket.column);
        Ok(())
    }
}

/// Metadata record returned by `query_meta`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PvInfo {
    pub name: PvName,
    pub value_type: ValueType,
    pub first_timestamp: Instant,
    pub last_timestamp: Instant,
    pub attributes: Option<BTreeMap<String, String>>,
}
