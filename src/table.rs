use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use lazy_static::lazy_static;
use thiserror::Error;
use tracing::*;

use crate::parse::is_element_symbol;
use crate::FormulaError;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Invalid element symbol '{0}' (expected an uppercase letter, optionally followed by a lowercase letter)")]
    InvalidSymbol(String),
    #[error("Invalid valence '{valence}' for element '{symbol}' (expected a positive integer)")]
    InvalidValence { symbol: String, valence: String },
    #[error("Element '{0}' appears more than once in the valence table")]
    DuplicateSymbol(String),
    #[error("Missing {column} in record {record:?}")]
    MissingColumn {
        column: &'static str,
        record: StringRecord,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Valence electrons of the period 1 to 3 elements.
const STANDARD_VALENCES: [(&str, u32); 18] = [
    ("H", 1),
    ("He", 2),
    ("Li", 1),
    ("Be", 2),
    ("B", 3),
    ("C", 4),
    ("N", 5),
    ("O", 6),
    ("F", 7),
    ("Ne", 8),
    ("Na", 1),
    ("Mg", 2),
    ("Al", 3),
    ("Si", 4),
    ("P", 5),
    ("S", 6),
    ("Cl", 7),
    ("Ar", 8),
];

lazy_static! {
    static ref STANDARD_TABLE: ValenceTable = ValenceTable {
        valences: STANDARD_VALENCES
            .iter()
            .map(|&(symbol, valence)| (symbol.to_string(), valence))
            .collect(),
    };
}

/// Maps element symbols to their number of valence electrons.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValenceTable {
    valences: BTreeMap<String, u32>,
}

impl ValenceTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in table covering hydrogen through argon.
    pub fn standard() -> &'static ValenceTable {
        &STANDARD_TABLE
    }

    pub fn from_entries<'a>(
        entries: impl IntoIterator<Item = (&'a str, u32)>,
    ) -> Result<Self, TableError> {
        let mut table = Self::new();
        for (symbol, valence) in entries {
            table.insert(symbol, valence)?;
        }
        Ok(table)
    }

    /// Reads a table from CSV with a header row and the columns
    /// `symbol,valence`.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .trim(Trim::All)
            .from_reader(reader);

        let mut table = Self::new();
        for result in rdr.records() {
            let record = result?;
            let symbol = record
                .get(0)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| TableError::MissingColumn {
                    column: "symbol",
                    record: record.clone(),
                })?;
            let valence = record
                .get(1)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| TableError::MissingColumn {
                    column: "valence",
                    record: record.clone(),
                })?;
            let valence = valence
                .parse::<u32>()
                .map_err(|_| TableError::InvalidValence {
                    symbol: symbol.to_string(),
                    valence: valence.to_string(),
                })?;
            table.insert(symbol, valence)?;
        }
        Ok(table)
    }

    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let path = path.as_ref();
        let table = Self::from_csv_reader(File::open(path)?)?;
        info!(
            "Loaded valence table with {} elements from {}",
            table.len(),
            path.display()
        );
        Ok(table)
    }

    /// Adds an element, rejecting malformed symbols, zero valences and
    /// symbols already present.
    pub fn insert(&mut self, symbol: &str, valence: u32) -> Result<(), TableError> {
        if !is_element_symbol(symbol) {
            return Err(TableError::InvalidSymbol(symbol.to_string()));
        }
        if valence == 0 {
            return Err(TableError::InvalidValence {
                symbol: symbol.to_string(),
                valence: valence.to_string(),
            });
        }
        if self.valences.contains_key(symbol) {
            return Err(TableError::DuplicateSymbol(symbol.to_string()));
        }
        self.valences.insert(symbol.to_string(), valence);
        Ok(())
    }

    pub fn get(&self, symbol: &str) -> Option<u32> {
        self.valences.get(symbol).copied()
    }

    pub fn valence_of(&self, symbol: &str) -> Result<u32, FormulaError> {
        self.get(symbol)
            .ok_or_else(|| FormulaError::UnknownElement(symbol.to_string()))
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.valences.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.valences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valences.is_empty()
    }

    /// Iterates over `(symbol, valence)` pairs in symbol order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        self.valences
            .iter()
            .map(|(symbol, valence)| (symbol.as_str(), *valence))
    }
}
