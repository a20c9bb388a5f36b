#![forbid(unsafe_code)]

//! Derived-parameter formulas: `NAME = expression`, one per line.
//!
//! Text is tokenized and parsed up front so a whole formula file can be
//! rejected before anything is committed. Evaluation appends one column per
//! formula to a [`Table`], in dependency order.

mod eval;
mod function;
mod parser;
mod token;

use std::collections::{BTreeMap, BTreeSet};

use sp_columnar::ColumnError;
use sp_frame::{FrameError, Table};
use sp_types::canonical_name;
use thiserror::Error;

pub use eval::{evaluate, evaluate_for};
pub use function::{Arity, Function};
pub use parser::{Expr, Formula, parse_expression, parse_line};
pub use token::{Span, Token, TokenKind, tokenize};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormulaError {
    #[error("syntax error on line {line}, column {column} near {fragment:?}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        fragment: String,
        message: String,
    },
    #[error("{name} is referenced before definition{}", referenced_in(.referenced_by))]
    UndefinedName {
        name: String,
        referenced_by: Option<String>,
    },
    #[error("{name} is part of a circular definition: {}", .path.join(" -> "))]
    Cycle { name: String, path: Vec<String> },
    #[error("{name} is defined on line {line} but was already defined on line {first_line}")]
    DuplicateDefinition {
        name: String,
        line: usize,
        first_line: usize,
    },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

fn referenced_in(formula: &Option<String>) -> String {
    formula
        .as_ref()
        .map(|name| format!(" (in {name})"))
        .unwrap_or_default()
}

impl FormulaError {
    #[must_use]
    pub fn is_syntax_error(&self) -> bool {
        matches!(self, Self::Syntax { .. })
    }

    /// Undefined, circular and duplicate identifiers.
    #[must_use]
    pub fn is_name_error(&self) -> bool {
        matches!(
            self,
            Self::UndefinedName { .. } | Self::Cycle { .. } | Self::DuplicateDefinition { .. }
        )
    }

    /// The identifier a name error is about.
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Self::UndefinedName { name, .. }
            | Self::Cycle { name, .. }
            | Self::DuplicateDefinition { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// A validated set of formulas with a fixed evaluation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormulaSet {
    formulas: Vec<Formula>,
    order: Vec<usize>,
    index: BTreeMap<String, usize>,
}

impl FormulaSet {
    /// Parses formula text. Any bad line rejects the whole text; the error
    /// carries the 1-based line number.
    pub fn parse(text: &str) -> Result<Self, FormulaError> {
        let mut formulas = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            if let Some(formula) = parse_line(line, idx + 1)? {
                formulas.push(formula);
            }
        }
        Self::from_formulas(formulas)
    }

    pub fn from_formulas(formulas: Vec<Formula>) -> Result<Self, FormulaError> {
        let mut index: BTreeMap<String, usize> = BTreeMap::new();
        for (pos, formula) in formulas.iter().enumerate() {
            if let Some(&first) = index.get(&formula.name) {
                return Err(FormulaError::DuplicateDefinition {
                    name: formula.name.clone(),
                    line: formula.line,
                    first_line: formulas[first].line,
                });
            }
            index.insert(formula.name.clone(), pos);
        }
        let order = evaluation_order(&formulas, &index)?;
        Ok(Self {
            formulas,
            order,
            index,
        })
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Formulas in definition order.
    #[must_use]
    pub fn formulas(&self) -> &[Formula] {
        &self.formulas
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.formulas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.formulas.is_empty()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Formula> {
        let pos = self
            .index
            .get(name)
            .or_else(|| self.index.get(&canonical_name(name)))?;
        self.formulas.get(*pos)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Formulas ordered so each comes after everything it references.
    /// Independent formulas keep definition order.
    pub fn evaluation_order(&self) -> impl Iterator<Item = &Formula> {
        self.order.iter().filter_map(|&pos| self.formulas.get(pos))
    }

    pub fn evaluate(&self, table: &Table) -> Result<Table, FormulaError> {
        evaluate(self, table)
    }

    pub fn evaluate_for<S: AsRef<str>>(
        &self,
        table: &Table,
        targets: &[S],
    ) -> Result<Table, FormulaError> {
        evaluate_for(self, table, targets)
    }
}

// Kahn's algorithm over formula-to-formula references. The ready set is
// ordered by definition position so the result is deterministic.
fn evaluation_order(
    formulas: &[Formula],
    index: &BTreeMap<String, usize>,
) -> Result<Vec<usize>, FormulaError> {
    let deps = formulas
        .iter()
        .map(|formula| {
            formula
                .expr
                .references()
                .iter()
                .filter_map(|name| index.get(name).copied())
                .collect::<BTreeSet<usize>>()
        })
        .collect::<Vec<_>>();

    let mut in_degree = deps.iter().map(BTreeSet::len).collect::<Vec<_>>();
    let mut dependents = vec![Vec::new(); formulas.len()];
    for (pos, formula_deps) in deps.iter().enumerate() {
        for &dep in formula_deps {
            dependents[dep].push(pos);
        }
    }

    let mut ready = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(pos, _)| pos)
        .collect::<BTreeSet<_>>();
    let mut order = Vec::with_capacity(formulas.len());
    while let Some(pos) = ready.pop_first() {
        order.push(pos);
        for &dependent in &dependents[pos] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() == formulas.len() {
        return Ok(order);
    }

    // Every unresolved formula depends on another unresolved one, so
    // following those edges from any of them must revisit a node.
    let emitted = order.iter().copied().collect::<BTreeSet<_>>();
    let unresolved = |pos: &usize| !emitted.contains(pos);
    let mut path = Vec::new();
    let mut current = (0..formulas.len()).find(unresolved);
    while let Some(pos) = current {
        if let Some(start) = path.iter().position(|&seen| seen == pos) {
            let mut cycle = path.split_off(start);
            cycle.push(pos);
            path = cycle;
            break;
        }
        path.push(pos);
        current = deps[pos].iter().copied().find(|dep| unresolved(dep));
    }

    let names = path
        .iter()
        .map(|&pos| formulas[pos].name.clone())
        .collect::<Vec<_>>();
    Err(FormulaError::Cycle {
        name: names.first().cloned().unwrap_or_default(),
        path: names,
    })
}
