use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sp_columnar::ArithmeticOp;

use crate::FormulaError;
use crate::function::Function;
use crate::token::{Span, Token, TokenKind, syntax, tokenize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Param {
        name: String,
    },
    Literal {
        value: f64,
    },
    Neg {
        expr: Box<Expr>,
    },
    Binary {
        op: ArithmeticOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
    /// `ROLLAVG(expr, window)`; the window is fixed at parse time.
    Rolling {
        expr: Box<Expr>,
        window: usize,
    },
}

impl Expr {
    /// Every identifier the expression reads, in sorted order.
    #[must_use]
    pub fn references(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Param { name } => {
                out.insert(name.clone());
            }
            Self::Literal { .. } => {}
            Self::Neg { expr } | Self::Rolling { expr, .. } => expr.collect_references(out),
            Self::Binary { left, right, .. } => {
                left.collect_references(out);
                right.collect_references(out);
            }
            Self::Call { args, .. } => {
                for arg in args {
                    arg.collect_references(out);
                }
            }
        }
    }
}

/// One `NAME = expression` definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    pub name: String,
    pub expr: Expr,
    /// 1-based line in the formula text.
    pub line: usize,
}

/// Parses one line. Blank and comment lines yield `Ok(None)`.
pub fn parse_line(line: &str, line_number: usize) -> Result<Option<Formula>, FormulaError> {
    let tokens = tokenize(line, line_number)?;
    if tokens.is_empty() {
        return Ok(None);
    }
    let cursor = Cursor {
        tokens: &tokens,
        source: line,
        line: line_number,
    };

    let name = match &tokens[0].kind {
        TokenKind::Ident(name) => name.clone(),
        _ => return Err(cursor.error_at(0, "expected a formula name")),
    };
    if tokens.get(1).map(|token| &token.kind) != Some(&TokenKind::Assign) {
        return Err(cursor.error_at(1, "expected '=' after formula name"));
    }

    let mut pos = 2;
    if pos == tokens.len() {
        return Err(cursor.error_at(pos, "missing expression after '='"));
    }
    let expr = parse_sum(&cursor, &mut pos)?;
    if pos != tokens.len() {
        return Err(cursor.error_at(pos, "unexpected token"));
    }

    Ok(Some(Formula {
        name,
        expr,
        line: line_number,
    }))
}

/// Parses a bare expression, e.g. a plot axis written as an expression.
pub fn parse_expression(text: &str) -> Result<Expr, FormulaError> {
    let tokens = tokenize(text, 1)?;
    let cursor = Cursor {
        tokens: &tokens,
        source: text,
        line: 1,
    };
    let mut pos = 0;
    if tokens.is_empty() {
        return Err(cursor.error_at(0, "empty expression"));
    }
    let expr = parse_sum(&cursor, &mut pos)?;
    if pos != tokens.len() {
        return Err(cursor.error_at(pos, "unexpected token"));
    }
    Ok(expr)
}

struct Cursor<'a> {
    tokens: &'a [Token],
    source: &'a str,
    line: usize,
}

impl Cursor<'_> {
    fn kind(&self, pos: usize) -> Option<&TokenKind> {
        self.tokens.get(pos).map(|token| &token.kind)
    }

    fn error_at(&self, pos: usize, message: &str) -> FormulaError {
        let span = self.tokens.get(pos).map_or_else(
            || {
                let end = self.source.chars().count();
                Span::new(end, end)
            },
            |token| token.span,
        );
        syntax(self.source, self.line, span, message)
    }

    fn expect(&self, pos: &mut usize, expected: &TokenKind, message: &str) -> Result<(), FormulaError> {
        if self.kind(*pos) == Some(expected) {
            *pos += 1;
            Ok(())
        } else {
            Err(self.error_at(*pos, message))
        }
    }
}

fn parse_sum(cursor: &Cursor<'_>, pos: &mut usize) -> Result<Expr, FormulaError> {
    let mut left = parse_product(cursor, pos)?;
    while let Some(TokenKind::Operator(op @ (ArithmeticOp::Add | ArithmeticOp::Sub))) =
        cursor.kind(*pos)
    {
        let op = *op;
        *pos += 1;
        let right = parse_product(cursor, pos)?;
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn parse_product(cursor: &Cursor<'_>, pos: &mut usize) -> Result<Expr, FormulaError> {
    let mut left = parse_unary(cursor, pos)?;
    while let Some(TokenKind::Operator(op @ (ArithmeticOp::Mul | ArithmeticOp::Div))) =
        cursor.kind(*pos)
    {
        let op = *op;
        *pos += 1;
        let right = parse_unary(cursor, pos)?;
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
    }
    Ok(left)
}

// Unary signs bind looser than `^`, so `-A^2` is `-(A^2)`.
fn parse_unary(cursor: &Cursor<'_>, pos: &mut usize) -> Result<Expr, FormulaError> {
    match cursor.kind(*pos) {
        Some(TokenKind::Operator(ArithmeticOp::Sub)) => {
            *pos += 1;
            let expr = parse_unary(cursor, pos)?;
            Ok(match expr {
                Expr::Literal { value } => Expr::Literal { value: -value },
                expr => Expr::Neg {
                    expr: Box::new(expr),
                },
            })
        }
        Some(TokenKind::Operator(ArithmeticOp::Add)) => {
            *pos += 1;
            parse_unary(cursor, pos)
        }
        _ => parse_power(cursor, pos),
    }
}

// Right-associative: `A^B^C` is `A^(B^C)`.
fn parse_power(cursor: &Cursor<'_>, pos: &mut usize) -> Result<Expr, FormulaError> {
    let base = parse_atom(cursor, pos)?;
    if cursor.kind(*pos) == Some(&TokenKind::Operator(ArithmeticOp::Pow)) {
        *pos += 1;
        let exponent = parse_unary(cursor, pos)?;
        return Ok(Expr::Binary {
            op: ArithmeticOp::Pow,
            left: Box::new(base),
            right: Box::new(exponent),
        });
    }
    Ok(base)
}

fn parse_atom(cursor: &Cursor<'_>, pos: &mut usize) -> Result<Expr, FormulaError> {
    let Some(kind) = cursor.kind(*pos) else {
        return Err(cursor.error_at(*pos, "unexpected end of expression"));
    };
    match kind {
        TokenKind::Number(value) => {
            *pos += 1;
            Ok(Expr::Literal { value: *value })
        }
        TokenKind::Ident(name) => {
            *pos += 1;
            Ok(Expr::Param { name: name.clone() })
        }
        TokenKind::LParen => {
            *pos += 1;
            let expr = parse_sum(cursor, pos)?;
            cursor.expect(pos, &TokenKind::RParen, "expected ')'")?;
            Ok(expr)
        }
        TokenKind::Function(function) => parse_call(cursor, pos, *function),
        _ => Err(cursor.error_at(*pos, "unexpected token")),
    }
}

fn parse_call(
    cursor: &Cursor<'_>,
    pos: &mut usize,
    function: Function,
) -> Result<Expr, FormulaError> {
    let name_pos = *pos;
    *pos += 1;
    cursor.expect(pos, &TokenKind::LParen, "expected '(' after function name")?;

    let mut args = Vec::new();
    let mut arg_starts = Vec::new();
    if cursor.kind(*pos) == Some(&TokenKind::RParen) {
        *pos += 1;
    } else {
        loop {
            arg_starts.push(*pos);
            args.push(parse_sum(cursor, pos)?);
            match cursor.kind(*pos) {
                Some(TokenKind::Comma) => *pos += 1,
                Some(TokenKind::RParen) => {
                    *pos += 1;
                    break;
                }
                _ => return Err(cursor.error_at(*pos, "expected ',' or ')' in argument list")),
            }
        }
    }

    if !function.arity().accepts(args.len()) {
        return Err(cursor.error_at(name_pos, "wrong number of arguments"));
    }

    if function == Function::RollAvg {
        let window = match args.get(1) {
            Some(Expr::Literal { value }) if *value >= 1.0 && value.fract() == 0.0 => {
                *value as usize
            }
            _ => {
                let at = arg_starts.get(1).copied().unwrap_or(name_pos);
                return Err(cursor.error_at(at, "window must be a positive integer literal"));
            }
        };
        let mut args = args.into_iter();
        let Some(expr) = args.next() else {
            return Err(cursor.error_at(name_pos, "wrong number of arguments"));
        };
        return Ok(Expr::Rolling {
            expr: Box::new(expr),
            window,
        });
    }

    Ok(Expr::Call { function, args })
}

#[cfg(test)]
mod tests {
    use sp_columnar::ArithmeticOp;

    use super::{Expr, parse_expression, parse_line};
    use crate::FormulaError;
    use crate::function::Function;

    fn param(name: &str) -> Expr {
        Expr::Param { name: name.into() }
    }

    fn lit(value: f64) -> Expr {
        Expr::Literal { value }
    }

    fn bin(op: ArithmeticOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[test]
    fn comment_and_blank_lines_parse_to_nothing() {
        assert_eq!(parse_line("# note", 1).expect("comment"), None);
        assert_eq!(parse_line("", 2).expect("blank"), None);
    }

    #[test]
    fn precedence_follows_arithmetic_rules() {
        let formula = parse_line("a = b + c * d", 1).expect("parse").expect("formula");
        assert_eq!(formula.name, "A");
        assert_eq!(
            formula.expr,
            bin(
                ArithmeticOp::Add,
                param("B"),
                bin(ArithmeticOp::Mul, param("C"), param("D"))
            )
        );
    }

    #[test]
    fn power_is_right_associative_and_binds_tighter_than_negation() {
        assert_eq!(
            parse_expression("A ^ B ^ C").expect("parse"),
            bin(
                ArithmeticOp::Pow,
                param("A"),
                bin(ArithmeticOp::Pow, param("B"), param("C"))
            )
        );
        assert_eq!(
            parse_expression("-A^2").expect("parse"),
            Expr::Neg {
                expr: Box::new(bin(ArithmeticOp::Pow, param("A"), lit(2.0)))
            }
        );
    }

    #[test]
    fn negative_literals_fold() {
        assert_eq!(
            parse_expression("X * -2").expect("parse"),
            bin(ArithmeticOp::Mul, param("X"), lit(-2.0))
        );
    }

    #[test]
    fn function_calls_and_rolling_average() {
        assert_eq!(
            parse_expression("MAX(A, B, 3)").expect("parse"),
            Expr::Call {
                function: Function::Max,
                args: vec![param("A"), param("B"), lit(3.0)],
            }
        );
        assert_eq!(
            parse_expression("ROLLAVG(A - B, 4)").expect("parse"),
            Expr::Rolling {
                expr: Box::new(bin(ArithmeticOp::Sub, param("A"), param("B"))),
                window: 4,
            }
        );
    }

    #[test]
    fn rolling_window_must_be_a_positive_integer_literal() {
        for text in ["ROLLAVG(A, 0)", "ROLLAVG(A, 2.5)", "ROLLAVG(A, N)"] {
            let err = parse_expression(text).expect_err(text);
            assert!(matches!(err, FormulaError::Syntax { .. }), "{text}");
        }
    }

    #[test]
    fn arity_violations_are_syntax_errors() {
        let err = parse_line("A = SQRT(B, C)", 4).expect_err("arity");
        assert!(matches!(err, FormulaError::Syntax { line: 4, column: 5, .. }));
    }

    #[test]
    fn structural_errors_name_the_offending_fragment() {
        let err = parse_line("A = (B + C", 9).expect_err("unbalanced");
        match err {
            FormulaError::Syntax { line, column, fragment, .. } => {
                assert_eq!(line, 9);
                assert_eq!(column, 11);
                assert_eq!(fragment, "");
            }
            other => panic!("expected syntax error, got {other:?}"),
        }

        let err = parse_line("A = B C", 1).expect_err("juxtaposed");
        assert!(
            matches!(err, FormulaError::Syntax { ref fragment, column: 7, .. } if fragment == "C")
        );

        assert!(parse_line("3 = B", 1).is_err());
        assert!(parse_line("A B", 1).is_err());
        assert!(parse_line("A =", 1).is_err());
    }

    #[test]
    fn references_are_collected_through_calls() {
        let expr = parse_expression("ATAN2(Y, X) + ROLLAVG(Z, 3) - Y").expect("parse");
        assert_eq!(
            expr.references().into_iter().collect::<Vec<_>>(),
            vec!["X".to_owned(), "Y".to_owned(), "Z".to_owned()]
        );
    }
}
