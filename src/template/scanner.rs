//! Character-level state machine that splits raw template source into
//! constant text and `${...}`/`#{...}` expression bodies, tracking
//! line/column and staying brace-balanced through quoted strings so a map
//! literal like `${ {'a': 1} }` doesn't close the template expression early.

use crate::error::{JexlError, Position};
use crate::options::EngineOptions;
use crate::parser::Parser;

use super::TemplateExpr;

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    /// Plain text.
    Const,
    /// Just saw `$`; expecting `{` to enter `Imm`.
    Imm0,
    /// Just saw `#`; expecting `{` to enter `Def`.
    Def0,
    /// Inside `${...}`.
    Imm,
    /// Inside `#{...}`.
    Def,
}

struct Cursor {
    line: u32,
    col: u32,
}

impl Cursor {
    fn advance(&mut self, c: char) {
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
    }

    fn pos(&self) -> Position {
        Position::new(self.line, self.col)
    }
}

/// Scan `source`, parsing each extracted expression body through `parser`.
pub fn scan(
    source: &str,
    parser: &dyn Parser,
    options: EngineOptions,
) -> Result<TemplateExpr, Box<JexlError>> {
    let mut state = State::Const;
    let mut parts: Vec<TemplateExpr> = Vec::new();
    let mut text = String::new();
    let mut expr_src = String::new();
    let mut depth: i32 = 0;
    let mut in_quote: Option<char> = None;
    let mut escape = false;
    let mut cursor = Cursor { line: 1, col: 1 };

    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match state {
            State::Const => match c {
                '\\' if matches!(chars.peek(), Some('$') | Some('#') | Some('\\')) => {
                    let next = *chars.peek().unwrap();
                    text.push(next);
                    chars.next();
                    cursor.advance(c);
                    cursor.advance(next);
                    continue;
                }
                '$' => state = State::Imm0,
                '#' => state = State::Def0,
                _ => text.push(c),
            },
            State::Imm0 | State::Def0 => {
                if c == '{' {
                    if !text.is_empty() {
                        parts.push(TemplateExpr::Constant(std::mem::take(&mut text)));
                    }
                    state = if state == State::Imm0 { State::Imm } else { State::Def };
                } else {
                    // Not actually an expression opener: put the sigil back
                    // as literal text and reprocess `c` as constant text.
                    text.push(if state == State::Imm0 { '$' } else { '#' });
                    text.push(c);
                    state = State::Const;
                }
            }
            State::Imm | State::Def => {
                if escape {
                    expr_src.push(c);
                    escape = false;
                } else if let Some(q) = in_quote {
                    expr_src.push(c);
                    if c == '\\' {
                        escape = true;
                    } else if c == q {
                        in_quote = None;
                    }
                } else {
                    match c {
                        '\'' | '"' => {
                            in_quote = Some(c);
                            expr_src.push(c);
                        }
                        '{' => {
                            depth += 1;
                            expr_src.push(c);
                        }
                        '}' if depth > 0 => {
                            depth -= 1;
                            expr_src.push(c);
                        }
                        '}' => {
                            let body = std::mem::take(&mut expr_src);
                            let expr = parser
                                .parse_expr(&body, options, None)
                                .map_err(|e| Box::new(JexlError::from(e)))?;
                            parts.push(if state == State::Imm {
                                TemplateExpr::Immediate(expr)
                            } else {
                                TemplateExpr::Deferred(expr)
                            });
                            state = State::Const;
                        }
                        _ => expr_src.push(c),
                    }
                }
            }
        }
        cursor.advance(c);
    }

    match state {
        State::Const => {
            if !text.is_empty() {
                parts.push(TemplateExpr::Constant(text));
            }
        }
        State::Imm0 => parts.push(TemplateExpr::Constant(format!("{text}$"))),
        State::Def0 => parts.push(TemplateExpr::Constant(format!("{text}#"))),
        State::Imm | State::Def => {
            return Err(Box::new(JexlError::Tokenization(
                "unterminated template expression".into(),
                cursor.pos(),
            )));
        }
    }

    Ok(TemplateExpr::Composite(parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, RootNode};
    use crate::error::ParseError;
    use crate::types::{Scope, Value};
    use std::sync::Arc;

    /// Parses only integer/string literals — enough to exercise the scanner.
    struct LiteralParser;
    impl Parser for LiteralParser {
        fn parse(&self, _: &str, _: EngineOptions, _: Option<&Scope>) -> Result<Arc<RootNode>, ParseError> {
            unimplemented!()
        }
        fn parse_expr(&self, source: &str, _: EngineOptions, _: Option<&Scope>) -> Result<Expr, ParseError> {
            let trimmed = source.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                Ok(Expr::Literal(Value::Int(i), Position::NONE))
            } else {
                Ok(Expr::Literal(Value::string(trimmed.to_string()), Position::NONE))
            }
        }
    }

    fn flatten(tree: &TemplateExpr) -> String {
        tree.evaluate_with(&mut |e| match e {
            Expr::Literal(v, _) => Ok(v.clone()),
            _ => unreachable!(),
        })
        .unwrap()
    }

    #[test]
    fn mixed_constant_and_immediate() {
        let tree = scan("a=${1}b", &LiteralParser, EngineOptions::empty()).unwrap();
        assert_eq!(flatten(&tree), "a=1b");
    }

    #[test]
    fn escaped_sigil_is_literal() {
        let tree = scan(r"price: \$5", &LiteralParser, EngineOptions::empty()).unwrap();
        assert_eq!(flatten(&tree), "price: $5");
    }

    #[test]
    fn unterminated_expression_errors() {
        let err = scan("${1", &LiteralParser, EngineOptions::empty()).unwrap_err();
        assert!(matches!(*err, JexlError::Tokenization(..)));
    }
}
