use std::collections::BTreeSet;

use sp_columnar::Column;
use sp_frame::Table;
use sp_types::canonical_name;

use crate::parser::Expr;
use crate::{FormulaError, FormulaSet};

/// Evaluates every formula and appends the results to a copy of `table`.
pub fn evaluate(set: &FormulaSet, table: &Table) -> Result<Table, FormulaError> {
    let targets = set
        .formulas()
        .iter()
        .map(|formula| formula.name.as_str())
        .collect::<Vec<_>>();
    evaluate_for(set, table, &targets)
}

/// Evaluates only the formulas `targets` transitively depend on.
///
/// Targets may name raw columns as well as formulas; anything that is
/// neither is a name error. A formula whose name matches a raw column
/// replaces that column in the output.
pub fn evaluate_for<S: AsRef<str>>(
    set: &FormulaSet,
    table: &Table,
    targets: &[S],
) -> Result<Table, FormulaError> {
    let mut needed = BTreeSet::new();
    let mut stack = Vec::new();
    for target in targets {
        let name = canonical_name(target.as_ref());
        if set.contains(&name) {
            stack.push(name);
        } else if !table.has_column(&name) {
            return Err(FormulaError::UndefinedName {
                name,
                referenced_by: None,
            });
        }
    }
    while let Some(name) = stack.pop() {
        if !needed.insert(name.clone()) {
            continue;
        }
        if let Some(formula) = set.get(&name) {
            stack.extend(
                formula
                    .expr
                    .references()
                    .into_iter()
                    .filter(|reference| set.contains(reference)),
            );
        }
    }

    let time_order = table.timestamp_order();
    let mut out = table.clone();
    for formula in set.evaluation_order() {
        if !needed.contains(&formula.name) {
            continue;
        }
        let column = eval_expr(&formula.expr, &out, &time_order, &formula.name)?;
        out.insert_column(&formula.name, column)?;
    }
    Ok(out)
}

fn eval_expr(
    expr: &Expr,
    table: &Table,
    time_order: &[usize],
    formula: &str,
) -> Result<Column, FormulaError> {
    match expr {
        Expr::Param { name } => {
            table
                .column(name)
                .cloned()
                .ok_or_else(|| FormulaError::UndefinedName {
                    name: name.clone(),
                    referenced_by: Some(formula.to_owned()),
                })
        }
        Expr::Literal { value } => Ok(Column::from_f64s(vec![Some(*value); table.len()])),
        Expr::Neg { expr } => Ok(eval_expr(expr, table, time_order, formula)?.map_numeric(|v| -v)),
        Expr::Binary { op, left, right } => {
            let lhs = eval_expr(left, table, time_order, formula)?;
            let rhs = eval_expr(right, table, time_order, formula)?;
            Ok(lhs.binary_numeric(&rhs, *op)?)
        }
        Expr::Call { function, args } => {
            let columns = args
                .iter()
                .map(|arg| eval_expr(arg, table, time_order, formula))
                .collect::<Result<Vec<_>, _>>()?;
            let values = (0..table.len()).map(|row| {
                let row_args = columns
                    .iter()
                    .map(|column| column.get_f64(row))
                    .collect::<Option<Vec<_>>>()?;
                Some(function.apply(&row_args))
            });
            Ok(Column::from_f64s(values))
        }
        Expr::Rolling { expr, window } => {
            let inner = eval_expr(expr, table, time_order, formula)?;
            Ok(rolling_mean(&inner, time_order, *window))
        }
    }
}

/// Mean of the current row and up to `window - 1` earlier rows, walking
/// rows in timestamp order. Missing inputs are skipped; a window with no
/// present value yields missing.
fn rolling_mean(column: &Column, time_order: &[usize], window: usize) -> Column {
    let mut out = vec![None; column.len()];
    let mut sum = CompensatedSum::default();
    let mut count = 0_usize;
    for (k, &row) in time_order.iter().enumerate() {
        if let Some(value) = column.get_f64(row) {
            sum.add(value);
            count += 1;
        }
        if k >= window {
            if let Some(expired) = column.get_f64(time_order[k - window]) {
                sum.add(-expired);
                count -= 1;
            }
        }
        if !sum.total().is_finite() {
            // Overflow poisons the running state; rebuild from the live span.
            let start = (k + 1).saturating_sub(window);
            sum = CompensatedSum::default();
            for value in time_order[start..=k].iter().filter_map(|&r| column.get_f64(r)) {
                sum.add(value);
            }
        }
        if count > 0 {
            out[row] = Some(sum.total() / count as f64);
        }
    }
    Column::from_f64s(out)
}

/// Neumaier summation.
#[derive(Debug, Clone, Copy, Default)]
struct CompensatedSum {
    sum: f64,
    compensation: f64,
}

impl CompensatedSum {
    fn add(&mut self, value: f64) {
        let total = self.sum + value;
        if self.sum.abs() >= value.abs() {
            self.compensation += (self.sum - total) + value;
        } else {
            self.compensation += (value - total) + self.sum;
        }
        self.sum = total;
    }

    fn total(&self) -> f64 {
        self.sum + self.compensation
    }
}
