//! Positional binding of raw fields to typed rows

use std::marker::PhantomData;

use crate::error::RecordError;
use crate::source::RawRecord;

/// A row type with a fixed column layout
pub trait MappedRow: Sized + Send + Sync + 'static {
    /// Column names in file order
    const COLUMNS: &'static [&'static str];

    fn from_fields(fields: &BoundFields<'_>) -> Self;
}

/// Raw values addressed by declared column name
pub struct BoundFields<'a> {
    columns: &'static [&'static str],
    values: &'a [String],
}

impl<'a> BoundFields<'a> {
    /// Trimmed value of `column`, `None` when blank or undeclared.
    pub fn get(&self, column: &str) -> Option<&'a str> {
        let position = self.columns.iter().position(|c| *c == column)?;
        let value = self.values.get(position)?.trim();
        (!value.is_empty()).then_some(value)
    }

    /// Owned variant of [`BoundFields::get`]
    pub fn owned(&self, column: &str) -> Option<String> {
        self.get(column).map(str::to_string)
    }
}

/// Maps [`RawRecord`]s onto `R`
pub struct FieldMapper<R> {
    _row: PhantomData<fn() -> R>,
}

impl<R> Default for FieldMapper<R> {
    fn default() -> Self {
        Self { _row: PhantomData }
    }
}

impl<R: MappedRow> FieldMapper<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &'static [&'static str] {
        R::COLUMNS
    }

    /// Bind `record` to `R`.
    ///
    /// A field count that differs from the layout is a malformed record,
    /// except on the first data record where it means the file itself has
    /// the wrong layout.
    pub fn map(&self, record: &RawRecord) -> Result<R, RecordError> {
        let expected = R::COLUMNS.len();
        let found = record.fields.len();

        if found != expected {
            if record.is_first() {
                return Err(RecordError::SchemaMismatch {
                    line: record.line,
                    expected,
                    found,
                });
            }
            return Err(RecordError::MalformedRecord {
                line: record.line,
                reason: format!("expected {expected} fields, found {found}"),
            });
        }

        Ok(R::from_fields(&BoundFields {
            columns: R::COLUMNS,
            values: &record.fields,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct PairRow {
        left: Option<String>,
        right: Option<String>,
    }

    impl MappedRow for PairRow {
        const COLUMNS: &'static [&'static str] = &["left", "right"];

        fn from_fields(fields: &BoundFields<'_>) -> Self {
            Self {
                left: fields.owned("left"),
                right: fields.owned("right"),
            }
        }
    }

    fn record(index: u64, fields: &[&str]) -> RawRecord {
        RawRecord {
            line: index + 1,
            index,
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[test]
    fn test_binds_by_column_and_trims() {
        let mapper = FieldMapper::<PairRow>::new();
        let row = mapper.map(&record(3, &[" a ", "  "])).unwrap();
        assert_eq!(
            row,
            PairRow {
                left: Some("a".into()),
                right: None
            }
        );
    }

    #[test]
    fn test_arity_mismatch_on_first_record_is_schema_error() {
        let mapper = FieldMapper::<PairRow>::new();
        let err = mapper.map(&record(1, &["a", "b", "c"])).unwrap_err();
        assert!(matches!(
            err,
            RecordError::SchemaMismatch {
                expected: 2,
                found: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_arity_mismatch_later_is_malformed() {
        let mapper = FieldMapper::<PairRow>::new();
        let err = mapper.map(&record(5, &["a"])).unwrap_err();
        assert!(matches!(err, RecordError::MalformedRecord { line: 6, .. }));
    }
}
