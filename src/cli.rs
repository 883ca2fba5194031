use std::io::{BufRead, Write};

use anyhow::Result;
use tracing::*;

use crate::{Formula, FormulaError, ValenceTable};

pub const PROMPT: &str = "Enter the chemical formula: ";
pub const UNKNOWN_ELEMENT_MESSAGE: &str =
    "Invalid element in formula or element not in the database.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportOptions {
    /// Also print the atom count of every element.
    pub composition: bool,
}

/// Evaluates one formula and writes the result, or a diagnostic, followed
/// by a blank line. Formula errors are reported, never returned; only
/// failures to write are.
pub fn report_formula<W: Write>(
    formula: &str,
    table: &ValenceTable,
    options: ReportOptions,
    out: &mut W,
) -> Result<()> {
    let evaluated = Formula::parse(formula)
        .and_then(|parsed| parsed.valence_electrons(table).map(|total| (parsed, total)));

    match evaluated {
        Ok((parsed, total)) => {
            debug!("Formula {} has {} valence electrons", formula, total);
            writeln!(
                out,
                "The number of valence electrons in {} is: {}",
                formula, total
            )?;
            if options.composition {
                for (symbol, count) in parsed.composition() {
                    writeln!(out, "  {}: {}", symbol, count)?;
                }
            }
        }
        Err(FormulaError::UnknownElement(symbol)) => {
            warn!("Unknown element '{}' in formula '{}'", symbol, formula);
            writeln!(out, "{}", UNKNOWN_ELEMENT_MESSAGE)?;
        }
        Err(FormulaError::Malformed {
            position, reason, ..
        }) => {
            warn!("Rejected formula '{}': {}", formula, reason);
            writeln!(out, "Malformed formula: {} (at position {})", reason, position)?;
        }
        Err(e @ FormulaError::Overflow { .. }) => {
            warn!("{}", e);
            writeln!(out, "{}", e)?;
        }
    }

    writeln!(out)?;
    Ok(())
}

/// Prompts for formulas until `exit` (in any case) or the end of input.
pub fn run_loop<R: BufRead, W: Write>(
    input: R,
    out: &mut W,
    table: &ValenceTable,
    options: ReportOptions,
) -> Result<()> {
    let mut lines = input.lines();
    loop {
        write!(out, "{}", PROMPT)?;
        out.flush()?;

        let line = match lines.next() {
            Some(line) => line?,
            None => {
                writeln!(out)?;
                info!("Reached end of input");
                break;
            }
        };

        let formula = line.trim();
        if formula.eq_ignore_ascii_case("exit") {
            break;
        }
        report_formula(formula, table, options, out)?;
    }
    Ok(())
}
