//! Positional decoding of compact wire tuples into named-field records.
//!
//! Decode-only. Arity is strict: a short tuple fails with `CodecError::Arity`
//! naming the fields it lacks. Types are tolerant: any primitive converts to
//! text, and text that parses as a number is accepted for numeric fields.
//! Nothing is ever defaulted to zero.

use crate::types::{CodecError, Primitive, Row};

/// Field layout of one entity kind's wire tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowSchema {
    pub kind: &'static str,
    /// Required fields, in wire order.
    pub fields: &'static [&'static str],
    /// Trailing fields that may be absent.
    pub optional: &'static [&'static str],
}

impl RowSchema {
    pub fn min_arity(&self) -> usize {
        self.fields.len()
    }

    fn field_name(&self, pos: usize) -> &'static str {
        self.fields
            .get(pos)
            .or_else(|| self.optional.get(pos - self.fields.len()))
            .copied()
            .unwrap_or("?")
    }
}

/// `[id, routeId, tripId, lat, lng]`. Earlier producers could append an
/// explicit movement angle.
pub const VEHICLE_ROW: RowSchema = RowSchema {
    kind: "vehicle",
    fields: &["id", "routeId", "tripId", "lat", "lng"],
    optional: &["moveAngle"],
};

/// `[id, name, lat, lng]`.
pub const STOP_ROW: RowSchema = RowSchema {
    kind: "stop",
    fields: &["id", "name", "lat", "lng"],
    optional: &[],
};

// ---------------------------------------------------------------------------
// RowReader
// ---------------------------------------------------------------------------

/// Arity-checked view over one row.
#[derive(Debug)]
pub struct RowReader<'a> {
    schema: &'static RowSchema,
    row: &'a [Primitive],
    index: usize,
}

impl<'a> RowReader<'a> {
    /// Check `row` against `schema`. `index` is the row's position in its
    /// payload, reported in errors.
    pub fn new(
        schema: &'static RowSchema,
        row: &'a [Primitive],
        index: usize,
    ) -> Result<Self, CodecError> {
        let required = schema.min_arity();
        if row.len() < required {
            return Err(CodecError::Arity {
                kind: schema.kind,
                index,
                required,
                actual: row.len(),
                missing: schema.fields[row.len()..].to_vec(),
            });
        }
        Ok(RowReader { schema, row, index })
    }

    /// String conversion of the primitive at `pos`.
    pub fn text(&self, pos: usize) -> String {
        self.row[pos].to_string()
    }

    /// Numeric parse of the primitive at `pos`.
    pub fn number(&self, pos: usize) -> Result<f64, CodecError> {
        let value = &self.row[pos];
        let parsed = match value {
            Primitive::Int(i) => Some(*i as f64),
            Primitive::Float(f) => Some(*f),
            Primitive::Text(s) => s.trim().parse::<f64>().ok(),
        };
        match parsed {
            Some(n) if n.is_finite() => Ok(n),
            _ => Err(CodecError::Coercion {
                kind: self.schema.kind,
                index: self.index,
                field: self.schema.field_name(pos),
                value: value.to_string(),
            }),
        }
    }

    /// Numeric parse of an optional trailing field; `None` when absent.
    pub fn optional_number(&self, pos: usize) -> Result<Option<f64>, CodecError> {
        if pos >= self.row.len() {
            return Ok(None);
        }
        self.number(pos).map(Some)
    }
}

// ---------------------------------------------------------------------------
// FromRow
// ---------------------------------------------------------------------------

/// Record types constructed from a compact tuple.
pub trait FromRow: Sized {
    const SCHEMA: &'static RowSchema;

    fn from_reader(reader: &RowReader<'_>) -> Result<Self, CodecError>;

    /// Arity-check and decode a single row.
    fn from_row(row: &[Primitive], index: usize) -> Result<Self, CodecError> {
        Self::from_reader(&RowReader::new(Self::SCHEMA, row, index)?)
    }
}

/// Decode every row, failing the whole batch on the first bad one.
///
/// A short tuple usually means a producer/consumer version mismatch rather
/// than one bad record, so partial results are never returned.
pub fn decode_rows<T: FromRow>(rows: &[Row]) -> Result<Vec<T>, CodecError> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| T::from_row(row, i))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
