use std::fmt;
use std::marker::PhantomData;

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;

use crate::report::{AttributeMap, AttributeValue};

/// One cell of a finalized table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell {
    Value(AttributeValue),
    Missing,
}

impl Cell {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Value(v) => Some(v.as_f64()),
            Cell::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }
}

/// Missing cells render as an empty string.
impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Value(v) => write!(f, "{v}"),
            Cell::Missing => Ok(()),
        }
    }
}

/// What a row holds for an attribute it never received.
pub trait FillPolicy {
    const LABEL: &'static str;

    fn absent() -> Cell;
}

/// Absent attributes are zero occurrences.
#[derive(Debug)]
pub struct ZeroFill;

impl FillPolicy for ZeroFill {
    const LABEL: &'static str = "zero-fill";

    fn absent() -> Cell {
        Cell::Value(AttributeValue::Count(0))
    }
}

/// Absent attributes were never measured and stay missing.
#[derive(Debug)]
pub struct MissingMarker;

impl FillPolicy for MissingMarker {
    const LABEL: &'static str = "missing-marker";

    fn absent() -> Cell {
        Cell::Missing
    }
}

/// Motif occurrence counts: a motif absent from a report occurred zero times.
pub type MotifTable = AttributeTable<ZeroFill>;

/// Peptide statistics: a statistic absent from a report is unknown, never zero.
pub type StatsTable = AttributeTable<MissingMarker>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TableError {
    #[error("sequence {identifier} is not part of this batch")]
    UnknownIdentifier { identifier: String },
}

#[derive(Debug, Default)]
struct Row {
    attributes: AttributeMap,
    flag: Option<String>,
}

/// Aggregates per-sequence attribute mappings into one table.
///
/// Rows are keyed by sequence identifier and the column set is the union of every attribute name
/// seen. How absent attributes are materialised is decided by the fill policy `P`.
#[derive(Debug)]
pub struct AttributeTable<P: FillPolicy> {
    batch: Option<IndexSet<String>>,
    rows: IndexMap<String, Row>,
    columns: IndexSet<String>,
    preferred_order: Vec<String>,
    policy: PhantomData<P>,
}

impl<P: FillPolicy> Default for AttributeTable<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: FillPolicy> AttributeTable<P> {
    /// A table accepting any identifier; rows finalize in insertion order.
    pub fn new() -> Self {
        AttributeTable {
            batch: None,
            rows: IndexMap::new(),
            columns: IndexSet::new(),
            preferred_order: Vec::new(),
            policy: PhantomData,
        }
    }

    /// A table for a known batch of sequences. Only these identifiers are accepted, and rows
    /// finalize in batch order.
    pub fn for_batch<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AttributeTable {
            batch: Some(identifiers.into_iter().map(Into::into).collect()),
            ..Self::new()
        }
    }

    /// Columns named here are placed first, in this order, when present. Any other columns follow
    /// in the order they were first seen.
    pub fn with_column_order(mut self, order: Vec<String>) -> Self {
        self.preferred_order = order;
        self
    }

    /// Adds columns to the schema without giving any row a value for them.
    pub fn declare_columns<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(names.into_iter().map(Into::into));
    }

    fn check_member(&self, identifier: &str) -> Result<(), TableError> {
        match &self.batch {
            Some(batch) if !batch.contains(identifier) => Err(TableError::UnknownIdentifier {
                identifier: identifier.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Inserts the attributes of a sequence. If the sequence already has a row, the new
    /// attributes are merged into it, replacing existing values of the same name.
    pub fn add_row(&mut self, identifier: &str, attributes: AttributeMap) -> Result<(), TableError> {
        self.check_member(identifier)?;

        self.columns.extend(attributes.keys().cloned());
        self.rows
            .entry(identifier.to_string())
            .or_default()
            .attributes
            .extend(attributes);

        Ok(())
    }

    /// Records that the data for a sequence could not be obtained. Every cell of a flagged row is
    /// missing in the finalized table, whatever the fill policy.
    pub fn flag_missing(
        &mut self,
        identifier: &str,
        reason: impl Into<String>,
    ) -> Result<(), TableError> {
        self.check_member(identifier)?;

        self.rows.entry(identifier.to_string()).or_default().flag = Some(reason.into());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn ordered_columns(&self) -> Vec<String> {
        let preferred = self
            .preferred_order
            .iter()
            .filter(|name| self.columns.contains(name.as_str()));

        let rest = self
            .columns
            .iter()
            .filter(|name| !self.preferred_order.contains(name));

        let mut columns = Vec::with_capacity(self.columns.len());
        for name in preferred.chain(rest) {
            if !columns.contains(name) {
                columns.push(name.clone());
            }
        }
        columns
    }

    /// Materialises every row against the shared column schema.
    pub fn finalize(mut self) -> FinalTable {
        let columns = self.ordered_columns();

        let order: Vec<String> = match self.batch.take() {
            Some(batch) => batch
                .into_iter()
                .filter(|id| self.rows.contains_key(id))
                .collect(),
            None => self.rows.keys().cloned().collect(),
        };

        let rows = order
            .into_iter()
            .filter_map(|identifier| {
                let row = self.rows.swap_remove(&identifier)?;

                let cells = columns
                    .iter()
                    .map(|name| match (&row.flag, row.attributes.get(name)) {
                        (Some(_), _) => Cell::Missing,
                        (None, Some(value)) => Cell::Value(*value),
                        (None, None) => P::absent(),
                    })
                    .collect();

                Some(FinalRow {
                    identifier,
                    cells,
                    flag: row.flag,
                })
            })
            .collect();

        FinalTable {
            policy: P::LABEL,
            columns,
            rows,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinalRow {
    pub identifier: String,
    pub cells: Vec<Cell>,
    /// Why the data for this row is missing, if it is
    pub flag: Option<String>,
}

/// A finalized, immutable table with one cell per row and column.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalTable {
    pub policy: &'static str,
    pub columns: Vec<String>,
    pub rows: Vec<FinalRow>,
}

impl FinalTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn row(&self, identifier: &str) -> Option<&FinalRow> {
        self.rows.iter().find(|r| r.identifier == identifier)
    }

    pub fn cell(&self, identifier: &str, column: &str) -> Option<&Cell> {
        let index = self.column_index(column)?;
        self.row(identifier)?.cells.get(index)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn flagged(&self) -> impl Iterator<Item = &FinalRow> {
        self.rows.iter().filter(|r| r.flag.is_some())
    }
}
