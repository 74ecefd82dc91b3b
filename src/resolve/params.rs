//! Step parameter resolution

use super::{ArgLookup, ResolveError, SpecialResolver};
use crate::models::{ArgKind, Parameter, Step, StepArg, Table, TableCell};

/// Resolve every declared argument of `step` against `lookup`
///
/// Produces exactly one parameter per argument, in declaration order.
pub fn resolve_parameters(
    step: &Step,
    lookup: &ArgLookup,
    special: &SpecialResolver,
) -> Result<Vec<Parameter>, ResolveError> {
    step.args
        .iter()
        .map(|arg| resolve_arg(arg, lookup, special))
        .collect()
}

fn resolve_arg(
    arg: &StepArg,
    lookup: &ArgLookup,
    special: &SpecialResolver,
) -> Result<Parameter, ResolveError> {
    match arg.kind {
        ArgKind::Static => Ok(Parameter::text(&arg.name, ArgKind::Static, &arg.value)),
        ArgKind::Dynamic => {
            let resolved = lookup.get(&arg.value)?;
            match resolved.table.as_ref().filter(|t| t.is_initialized()) {
                Some(table) => Ok(Parameter::table(
                    &resolved.name,
                    ArgKind::SpecialTable,
                    resolve_table(table, lookup, special)?,
                )),
                None => Ok(Parameter::text(
                    &resolved.name,
                    ArgKind::Dynamic,
                    &resolved.value,
                )),
            }
        }
        ArgKind::SpecialString => {
            let resolved = special.resolve(&arg.value)?;
            Ok(Parameter::text(&arg.value, ArgKind::SpecialString, resolved.value))
        }
        ArgKind::SpecialTable => {
            let table = match &arg.table {
                Some(table) => table.clone(),
                None => special.resolve(&arg.value)?.table.unwrap_or_default(),
            };
            Ok(Parameter::table(
                &arg.value,
                ArgKind::SpecialTable,
                resolve_table(&table, lookup, special)?,
            ))
        }
        ArgKind::Table => {
            let table = arg.table.clone().unwrap_or_default();
            Ok(Parameter::table(
                &arg.name,
                ArgKind::Table,
                resolve_table(&table, lookup, special)?,
            ))
        }
    }
}

/// Copy of `table` with dynamic and special cells replaced by their values
fn resolve_table(
    table: &Table,
    lookup: &ArgLookup,
    special: &SpecialResolver,
) -> Result<Table, ResolveError> {
    let mut resolved = Table::new(table.headers.clone());
    resolved.line_no = table.line_no;
    for row in &table.rows {
        let cells = row
            .iter()
            .map(|cell| -> Result<TableCell, ResolveError> {
                let value = match cell.kind {
                    ArgKind::Dynamic => lookup.get(&cell.value)?.value.clone(),
                    ArgKind::SpecialString => special.resolve(&cell.value)?.value,
                    _ => cell.value.clone(),
                };
                Ok(TableCell::new(value))
            })
            .collect::<Result<Vec<_>, _>>()?;
        resolved = resolved.with_cells(cells);
    }
    Ok(resolved)
}

/// Step text with each `{}` placeholder replaced by its parameter
pub fn actual_text(parsed_text: &str, parameters: &[Parameter]) -> String {
    let mut pieces = parsed_text.split("{}");
    let mut text = pieces.next().unwrap_or_default().to_string();
    let mut params = parameters.iter();
    for piece in pieces {
        match params.next() {
            Some(param) if param.table.is_some() => text.push_str("<table>"),
            Some(param) => {
                text.push('"');
                text.push_str(&param.value);
                text.push('"');
            }
            None => text.push_str("{}"),
        }
        text.push_str(piece);
    }
    text
}
