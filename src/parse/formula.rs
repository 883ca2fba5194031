use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use nom::{
    branch::alt,
    bytes::complete::take_while,
    character::complete::{char, digit1, satisfy},
    combinator::{all_consuming, cut, map, opt, recognize},
    error::{VerboseError, VerboseErrorKind},
    multi::many1,
    sequence::{delimited, pair},
    IResult,
};
use thiserror::Error;
use tracing::*;

use crate::ValenceTable;

type Res<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormulaError {
    #[error("Invalid element '{0}' in formula or element not in the valence table")]
    UnknownElement(String),
    #[error("Malformed formula {formula:?}: {reason} (at position {position})")]
    Malformed {
        formula: String,
        position: usize,
        reason: String,
    },
    #[error("Valence electron count of {formula:?} overflowed")]
    Overflow { formula: String },
}

/// A chemical formula, parsed into element and group terms.
///
/// Counts default to 1 when no digits follow a symbol or a closing
/// parenthesis.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Formula {
    pub terms: Vec<Term>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    Element { symbol: String, count: u32 },
    Group { formula: Formula, count: u32 },
}

/// Counts the valence electrons in a formula.
///
/// # Arguments
///
/// * `formula` - The formula to count, e.g. `"Al2(SO4)3"`.
/// * `table` - The valence table every symbol is looked up in.
///
/// # Returns
///
/// * `Result<u64, FormulaError>` - The total, or the first problem found
///   scanning left to right.
pub fn parse(formula: &str, table: &ValenceTable) -> Result<u64, FormulaError> {
    let total = Formula::parse(formula)?.valence_electrons(table)?;
    debug!("Formula {} has {} valence electrons", formula, total);
    Ok(total)
}

impl Formula {
    pub fn parse(formula: &str) -> Result<Self, FormulaError> {
        if formula.is_empty() {
            return Err(FormulaError::Malformed {
                formula: String::new(),
                position: 0,
                reason: "empty formula".to_string(),
            });
        }

        match all_consuming(terms)(formula) {
            Ok((_, parsed)) => Ok(parsed),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(malformed(formula, e)),
            Err(nom::Err::Incomplete(_)) => Err(FormulaError::Malformed {
                formula: formula.to_string(),
                position: formula.chars().count(),
                reason: "incomplete formula".to_string(),
            }),
        }
    }

    /// Sums valence × count over every term, expanding groups by their
    /// multiplier. Symbols are looked up in the order they appear.
    pub fn valence_electrons(&self, table: &ValenceTable) -> Result<u64, FormulaError> {
        self.terms.iter().try_fold(0u64, |total, term| {
            let value = match term {
                Term::Element { symbol, count } => {
                    let valence = table.valence_of(symbol)?;
                    trace!("Committing {}{} ({} valence electrons each)", symbol, count, valence);
                    u64::from(valence).checked_mul(u64::from(*count))
                }
                Term::Group { formula, count } => {
                    let subtotal = formula.valence_electrons(table)?;
                    trace!("Committing group ({}){} with subtotal {}", formula, count, subtotal);
                    subtotal.checked_mul(u64::from(*count))
                }
            };

            value
                .and_then(|value| total.checked_add(value))
                .ok_or_else(|| FormulaError::Overflow {
                    formula: self.to_string(),
                })
        })
    }

    /// Number of atoms of each element, with group multipliers expanded.
    pub fn composition(&self) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        self.accumulate(1, &mut counts);
        counts
    }

    pub fn atom_count(&self) -> u64 {
        self.composition()
            .values()
            .fold(0u64, |total, count| total.saturating_add(*count))
    }

    fn accumulate(&self, multiplier: u64, counts: &mut BTreeMap<String, u64>) {
        for term in &self.terms {
            match term {
                Term::Element { symbol, count } => {
                    let entry = counts.entry(symbol.clone()).or_insert(0);
                    *entry = entry.saturating_add(multiplier.saturating_mul(u64::from(*count)));
                }
                Term::Group { formula, count } => {
                    formula.accumulate(multiplier.saturating_mul(u64::from(*count)), counts)
                }
            }
        }
    }
}

impl FromStr for Formula {
    type Err = FormulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Formula::parse(s)
    }
}

impl Display for Formula {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for term in &self.terms {
            write!(f, "{}", term)?;
        }
        Ok(())
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let count = match self {
            Term::Element { symbol, count } => {
                write!(f, "{}", symbol)?;
                *count
            }
            Term::Group { formula, count } => {
                write!(f, "({})", formula)?;
                *count
            }
        };
        if count != 1 {
            write!(f, "{}", count)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Grammar
// ---------------------------------------------------------------------

/// An uppercase letter followed by any lowercase letters.
fn symbol(input: &str) -> Res<&str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_uppercase()),
        take_while(|c: char| c.is_ascii_lowercase()),
    ))(input)
}

/// The digits after a symbol or group, converted as one run.
fn count(input: &str) -> Res<u32> {
    let (rest, digits) = opt(digit1::<_, VerboseError<&str>>)(input)?;
    match digits {
        None => Ok((rest, 1)),
        Some(digits) => match digits.parse::<u32>() {
            Ok(n) => Ok((rest, n)),
            Err(_) => Err(nom::Err::Failure(VerboseError {
                errors: vec![(input, VerboseErrorKind::Context("count does not fit in 32 bits"))],
            })),
        },
    }
}

fn element_term(input: &str) -> Res<Term> {
    let (input, symbol) = symbol(input)?;
    let (input, count) = count(input)?;
    Ok((
        input,
        Term::Element {
            symbol: symbol.to_string(),
            count,
        },
    ))
}

fn group_term(input: &str) -> Res<Term> {
    let (input, formula) = delimited(char('('), cut(terms), cut(char(')')))(input)?;
    let (input, count) = count(input)?;
    Ok((input, Term::Group { formula, count }))
}

fn terms(input: &str) -> Res<Formula> {
    map(many1(alt((element_term, group_term))), |terms| Formula {
        terms,
    })(input)
}

/// Whether `s` is a whole element symbol of at most two letters.
pub(crate) fn is_element_symbol(s: &str) -> bool {
    s.chars().count() <= 2 && all_consuming(symbol)(s).is_ok()
}

fn malformed(formula: &str, error: VerboseError<&str>) -> FormulaError {
    let context = error.errors.iter().find_map(|(rest, kind)| match kind {
        VerboseErrorKind::Context(ctx) => Some((*rest, ctx.to_string())),
        _ => None,
    });
    let (rest, reason) = match context {
        Some(found) => found,
        None => {
            let rest = error.errors.first().map(|(rest, _)| *rest).unwrap_or(formula);
            (rest, describe_unexpected(formula, rest))
        }
    };

    let offset = formula.len() - rest.len();
    FormulaError::Malformed {
        formula: formula.to_string(),
        position: formula[..offset].chars().count(),
        reason,
    }
}

/// Explains a failure from the character the grammar stopped at.
fn describe_unexpected(formula: &str, rest: &str) -> String {
    let previous = formula[..formula.len() - rest.len()].chars().next_back();
    match rest.chars().next() {
        // Only an open group can run out of input.
        None => "unmatched '('".to_string(),
        Some(')') if previous == Some('(') => "empty group '()'".to_string(),
        Some(')') => "unmatched ')'".to_string(),
        Some(c) if c.is_ascii_digit() => "count with no preceding element or group".to_string(),
        Some(c) if c.is_ascii_lowercase() => {
            format!("lowercase '{}' with no element symbol to extend", c)
        }
        Some(c) => format!("unexpected character {:?}", c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_logging;

    fn synthetic_table() -> ValenceTable {
        ValenceTable::from_entries([("A", 1), ("B", 10), ("C", 100)]).unwrap()
    }

    fn assert_malformed(formula: &str, position: usize, reason: &str) {
        match parse(formula, ValenceTable::standard()) {
            Err(FormulaError::Malformed {
                position: p,
                reason: r,
                formula: f,
            }) => {
                assert_eq!(f, formula);
                assert_eq!((p, r.as_str()), (position, reason), "for {:?}", formula);
            }
            other => panic!("Expected {:?} to be malformed, got {:?}", formula, other),
        }
    }

    #[test]
    fn test_simple_molecules() {
        init_logging("trace").unwrap();
        let table = ValenceTable::standard();
        assert_eq!(parse("H2O", table), Ok(8));
        assert_eq!(parse("C6H12O6", table), Ok(72));
        assert_eq!(parse("CO2", table), Ok(16));
        assert_eq!(parse("NaCl", table), Ok(8));
        assert_eq!(parse("He", table), Ok(2));
    }

    #[test]
    fn test_groups() {
        let table = ValenceTable::standard();
        assert_eq!(parse("Mg(OH)2", table), Ok(16));
        assert_eq!(parse("Al2(SO4)3", table), Ok(96));
        // A group without a multiplier counts once.
        assert_eq!(parse("(OH)", table), Ok(7));
        // Atoms on both sides of a group are committed exactly once.
        assert_eq!(parse("H(OH)H", table), Ok(9));
    }

    #[test]
    fn test_nested_groups_multiply() {
        let table = synthetic_table();
        // A + ((B + 2C) * 3) * 2 = 1 + (10 + 200) * 6
        assert_eq!(parse("A(B(C2)3)2", &table), Ok(1261));
        assert_eq!(parse("((A2)3)4", &table), Ok(24));
    }

    #[test]
    fn test_multi_digit_counts() {
        let table = ValenceTable::standard();
        assert_eq!(parse("C12H22O11", table), Ok(48 + 22 + 66));
        assert_eq!(parse("(CH2)10", table), Ok(60));
    }

    #[test]
    fn test_zero_count_contributes_nothing() {
        let table = ValenceTable::standard();
        assert_eq!(parse("H0", table), Ok(0));
        assert_eq!(parse("O(H)0", table), Ok(6));
    }

    #[test]
    fn test_repeated_calls_agree() {
        let table = ValenceTable::standard();
        let first = parse("Ca3(PO4)2", table);
        for _ in 0..10 {
            assert_eq!(parse("Ca3(PO4)2", table), first);
        }
    }

    #[test]
    fn test_unknown_element() {
        let table = ValenceTable::standard();
        assert_eq!(
            parse("Ca3(PO4)2", table),
            Err(FormulaError::UnknownElement("Ca".to_string()))
        );
        assert_eq!(
            parse("H2Xe", table),
            Err(FormulaError::UnknownElement("Xe".to_string()))
        );
        // Symbols longer than two letters are never in a table.
        assert_eq!(
            parse("Hex", table),
            Err(FormulaError::UnknownElement("Hex".to_string()))
        );
        // Inside a group, the first unknown symbol is reported.
        assert_eq!(
            parse("O(HKr)2Xe", table),
            Err(FormulaError::UnknownElement("Kr".to_string()))
        );
    }

    #[test]
    fn test_unknown_element_with_zero_count() {
        assert_eq!(
            parse("K0", ValenceTable::standard()),
            Err(FormulaError::UnknownElement("K".to_string()))
        );
    }

    #[test]
    fn test_malformed_formulas() {
        assert_malformed("", 0, "empty formula");
        assert_malformed("Mg(OH2", 6, "unmatched '('");
        assert_malformed("(", 1, "unmatched '('");
        assert_malformed("H2O)", 3, "unmatched ')'");
        assert_malformed("()", 1, "empty group '()'");
        assert_malformed("2H", 0, "count with no preceding element or group");
        assert_malformed("H(2)", 2, "count with no preceding element or group");
        assert_malformed("h2o", 0, "lowercase 'h' with no element symbol to extend");
        assert_malformed("H2e", 2, "lowercase 'e' with no element symbol to extend");
        assert_malformed("H2 O", 2, "unexpected character ' '");
        assert_malformed("NH4+", 3, "unexpected character '+'");
        assert_malformed("O(H O)", 3, "unexpected character ' '");
        assert_malformed("H99999999999", 1, "count does not fit in 32 bits");
    }

    #[test]
    fn test_malformed_position_counts_characters() {
        assert_malformed("Hé", 1, "unexpected character 'é'");
        assert_malformed("éH", 0, "unexpected character 'é'");
    }

    #[test]
    fn test_overflow() {
        let formula = "(((H4294967295)4294967295)4294967295)4294967295";
        assert!(matches!(
            parse(formula, ValenceTable::standard()),
            Err(FormulaError::Overflow { .. })
        ));
    }

    #[test]
    fn test_structure() {
        let formula: Formula = "Mg(OH)2".parse().unwrap();
        assert_eq!(
            formula,
            Formula {
                terms: vec![
                    Term::Element {
                        symbol: "Mg".to_string(),
                        count: 1
                    },
                    Term::Group {
                        formula: Formula {
                            terms: vec![
                                Term::Element {
                                    symbol: "O".to_string(),
                                    count: 1
                                },
                                Term::Element {
                                    symbol: "H".to_string(),
                                    count: 1
                                },
                            ]
                        },
                        count: 2
                    },
                ]
            }
        );
        assert_eq!(formula.to_string(), "Mg(OH)2");
        assert_eq!(Formula::parse("H1O1").unwrap().to_string(), "HO");
    }

    #[test]
    fn test_composition() {
        let formula = Formula::parse("Al2(SO4)3").unwrap();
        let composition = formula.composition();
        assert_eq!(composition.len(), 3);
        assert_eq!(composition["Al"], 2);
        assert_eq!(composition["S"], 3);
        assert_eq!(composition["O"], 12);
        assert_eq!(formula.atom_count(), 17);

        // Repeated symbols are merged.
        let acetic_acid = Formula::parse("CH3COOH").unwrap();
        let composition = acetic_acid.composition();
        assert_eq!(composition["C"], 2);
        assert_eq!(composition["H"], 4);
        assert_eq!(composition["O"], 2);
    }

    #[test]
    fn test_element_symbols() {
        assert!(is_element_symbol("H"));
        assert!(is_element_symbol("Cl"));
        assert!(!is_element_symbol(""));
        assert!(!is_element_symbol("cl"));
        assert!(!is_element_symbol("CL"));
        assert!(!is_element_symbol("Uue"));
        assert!(!is_element_symbol("H2"));
    }
}
