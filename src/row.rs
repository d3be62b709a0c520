//! Contains the record types handed back and forth between the host process and the engine.
//!
//! A [Value] is a single dynamically typed cell, a [Row] is one record and a [Batch] is the
//! ordered group of rows the engine materializes per pull. The binding itself never interprets
//! these values - it moves them between the caller and the gateway and, if a cache is attached
//! to a reader, keeps them around so that a second iteration pass doesn't bother the engine
//! again.
use bytes::Bytes;

use crate::cache::ByteSize;

/// Represents a single dynamically typed cell of a record.
///
/// Binary payloads are backed by [Bytes] so that cloning a value (e.g. when replaying a cached
/// batch) shares the underlying buffer instead of copying it.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// The absence of a value.
    Null,
    /// A true/false value.
    Boolean(bool),
    /// An integer value. Both 32 bit and 64 bit columns are transported in this variant, as
    /// the physical width is a concern of the engine, not of the binding.
    Int(i64),
    /// A 64 bit floating point value.
    Double(f64),
    /// A UTF-8 string value.
    Str(String),
    /// An opaque byte blob (e.g. an encoded image).
    Binary(Bytes),
}

impl Value {
    /// Returns the contained string, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the contained integer, if this is an integer value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the contained floating point number, if this is a double value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the contained boolean, if this is a boolean value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the contained blob, if this is a binary value.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Binary(value) => Some(value),
            _ => None,
        }
    }

    /// Determines if this is the null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl ByteSize for Value {
    fn allocated_size(&self) -> usize {
        match self {
            Value::Str(value) => value.capacity(),
            Value::Binary(value) => value.len(),
            _ => 0,
        }
    }
}

/// Represents a single record.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    /// Creates a row from the given cell values.
    pub fn new(values: Vec<Value>) -> Self {
        Row { values }
    }

    /// Returns all cell values of this row.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Returns the cell value at the given column position.
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Returns the number of cells in this row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Determines if this row contains no cells.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consumes the row and returns its cell values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

impl ByteSize for Row {
    fn allocated_size(&self) -> usize {
        self.values.capacity() * std::mem::size_of::<Value>()
            + self
                .values
                .iter()
                .map(ByteSize::allocated_size)
                .sum::<usize>()
    }
}

/// Represents an ordered group of rows as materialized by the engine per pull.
///
/// Each batch carries its ordinal position within the scan, which also serves as the cache key
/// when a reader replays batches across iteration passes.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    ordinal: usize,
    rows: Vec<Row>,
}

impl Batch {
    /// Creates a batch from the given rows.
    pub fn new(ordinal: usize, rows: Vec<Row>) -> Self {
        Batch { ordinal, rows }
    }

    /// Returns the position of this batch within its scan (the first batch has ordinal 0).
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Returns the rows of this batch.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Returns the number of rows in this batch.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Determines if this batch contains no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Consumes the batch and returns its rows.
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

impl ByteSize for Batch {
    fn allocated_size(&self) -> usize {
        self.rows.capacity() * std::mem::size_of::<Row>()
            + self
                .rows
                .iter()
                .map(ByteSize::allocated_size)
                .sum::<usize>()
    }
}
