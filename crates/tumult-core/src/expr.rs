//! Expressions used by conditions and value-producing nodes.
//!
//! The grammar is deliberately small: integer, float, string, boolean and
//! null literals, variable references, parentheses, unary `!` and `-`, and the
//! binary operators below (loosest first):
//!
//! ```text
//! ||
//! &&
//! ==  !=
//! <  <=  >  >=
//! +  -
//! *  /  %
//! ```
//!
//! Expressions are parsed once when the node is constructed, so syntax errors
//! surface as configuration errors before anything runs.

use std::fmt;

use crate::{error::{ActivityError, ConfigError}, value::{Value, Variables}};

/// A parsed expression.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    ast: Expr,
}

impl Expression {
    /// Parse `source`.
    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        let fail = |reason: String| ConfigError::Expression { source_text: source.to_string(), reason };
        let tokens = tokenize(source).map_err(fail)?;
        let mut parser = Parser { tokens, pos: 0 };
        let ast = parser.expression(0).map_err(fail)?;
        if let Some(tok) = parser.peek() {
            return Err(fail(format!("unexpected trailing {tok}")));
        }
        Ok(Self { source: source.to_string(), ast })
    }

    /// An expression that always yields `value`.
    pub fn literal(value: Value) -> Self {
        Self { source: value.to_string(), ast: Expr::Literal(value) }
    }

    /// Source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against a variable scope.
    pub fn eval(&self, vars: &Variables) -> Result<Value, ActivityError> {
        self.ast.eval(vars)
    }

    /// Evaluate and reduce to a boolean.
    pub fn eval_bool(&self, vars: &Variables) -> Result<bool, ActivityError> {
        Ok(self.eval(vars)?.is_truthy())
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinOp {
    fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "||" => Self::Or,
            "&&" => Self::And,
            "==" => Self::Eq,
            "!=" => Self::Ne,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "%" => Self::Rem,
            _ => return None,
        })
    }

    fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Eq | Self::Ne => 3,
            Self::Lt | Self::Le | Self::Gt | Self::Ge => 4,
            Self::Add | Self::Sub => 5,
            Self::Mul | Self::Div | Self::Rem => 6,
        }
    }
}

const UNARY_PRECEDENCE: u8 = 7;

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Var(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval(&self, vars: &Variables) -> Result<Value, ActivityError> {
        match self {
            Self::Literal(v) => Ok(v.clone()),
            Self::Var(name) => vars.require(name).cloned(),
            Self::Not(inner) => Ok(Value::Bool(!inner.eval(vars)?.is_truthy())),
            Self::Neg(inner) => match inner.eval(vars)? {
                Value::Int(i) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| ActivityError::Arithmetic(format!("-({i}) overflows"))),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(ActivityError::Type(format!("cannot negate {}", other.type_name()))),
            },
            Self::Binary(BinOp::And, lhs, rhs) => {
                Ok(Value::Bool(lhs.eval(vars)?.is_truthy() && rhs.eval(vars)?.is_truthy()))
            },
            Self::Binary(BinOp::Or, lhs, rhs) => {
                Ok(Value::Bool(lhs.eval(vars)?.is_truthy() || rhs.eval(vars)?.is_truthy()))
            },
            Self::Binary(op, lhs, rhs) => binary(*op, &lhs.eval(vars)?, &rhs.eval(vars)?),
        }
    }
}

fn binary(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, ActivityError> {
    let type_error = || {
        ActivityError::Type(format!("{} {op:?} {} is not defined", lhs.type_name(), rhs.type_name()))
    };
    let overflow = || ActivityError::Arithmetic(format!("{lhs} {op:?} {rhs} overflows"));

    match op {
        BinOp::Eq => Ok(Value::Bool(lhs == rhs)),
        BinOp::Ne => Ok(Value::Bool(lhs != rhs)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (lhs, rhs) {
                (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
                _ => match (lhs.as_f64(), rhs.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => return Err(type_error()),
                },
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        },
        BinOp::Add => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => a.checked_add(*b).map(Value::Int).ok_or_else(overflow),
            (Value::Str(_), _) | (_, Value::Str(_)) => Ok(Value::Str(format!("{lhs}{rhs}"))),
            _ => float_op(lhs, rhs, |a, b| a + b).ok_or_else(type_error),
        },
        BinOp::Sub => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => a.checked_sub(*b).map(Value::Int).ok_or_else(overflow),
            _ => float_op(lhs, rhs, |a, b| a - b).ok_or_else(type_error),
        },
        BinOp::Mul => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => a.checked_mul(*b).map(Value::Int).ok_or_else(overflow),
            _ => float_op(lhs, rhs, |a, b| a * b).ok_or_else(type_error),
        },
        BinOp::Div => {
            let (a, b) = lhs.as_f64().zip(rhs.as_f64()).ok_or_else(type_error)?;
            if b == 0.0 {
                return Err(ActivityError::Arithmetic(format!("{lhs} / {rhs}: division by zero")));
            }
            Ok(Value::Float(a / b))
        },
        BinOp::Rem => match (lhs, rhs) {
            (Value::Int(_), Value::Int(0)) => {
                Err(ActivityError::Arithmetic(format!("{lhs} % 0: division by zero")))
            },
            (Value::Int(a), Value::Int(b)) => a.checked_rem(*b).map(Value::Int).ok_or_else(overflow),
            _ => float_op(lhs, rhs, |a, b| a % b).ok_or_else(type_error),
        },
        BinOp::And | BinOp::Or => Err(type_error()),
    }
}

fn float_op(lhs: &Value, rhs: &Value, f: impl Fn(f64, f64) -> f64) -> Option<Value> {
    let (a, b) = lhs.as_f64().zip(rhs.as_f64())?;
    Some(Value::Float(f(a, b)))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Ident(s) => f.write_str(s),
            Self::Op(op) => write!(f, "`{op}`"),
            Self::LParen => f.write_str("`(`"),
            Self::RParen => f.write_str("`)`"),
        }
    }
}

const OPERATORS: [&str; 16] =
    ["||", "&&", "==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/", "%", "!", "(", ")"];

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            if text.contains('.') {
                tokens.push(Token::Float(text.parse().map_err(|_| format!("bad number {text}"))?));
            } else {
                tokens.push(Token::Int(text.parse().map_err(|_| format!("bad number {text}"))?));
            }
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if c == '"' || c == '\'' {
            let quote = c;
            i += 1;
            let mut text = String::new();
            loop {
                match chars.get(i) {
                    None => return Err("unterminated string".to_string()),
                    Some(&ch) if ch == quote => break,
                    Some('\\') => {
                        let escaped = chars.get(i + 1).ok_or("unterminated escape")?;
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => *other,
                        });
                        i += 2;
                        continue;
                    },
                    Some(&ch) => text.push(ch),
                }
                i += 1;
            }
            i += 1;
            tokens.push(Token::Str(text));
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let op = OPERATORS
                .iter()
                .find(|op| rest.starts_with(**op))
                .ok_or_else(|| format!("unexpected character {c:?}"))?;
            i += op.len();
            tokens.push(match *op {
                "(" => Token::LParen,
                ")" => Token::RParen,
                other => Token::Op(other),
            });
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expression(&mut self, min_precedence: u8) -> Result<Expr, String> {
        let mut lhs = self.prefix()?;
        loop {
            let Some(Token::Op(symbol)) = self.peek() else { break };
            let Some(op) = BinOp::from_symbol(symbol) else {
                return Err(format!("unexpected `{symbol}`"));
            };
            if op.precedence() <= min_precedence {
                break;
            }
            self.pos += 1;
            let rhs = self.expression(op.precedence())?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, String> {
        match self.next() {
            None => Err("unexpected end of expression".to_string()),
            Some(Token::Int(i)) => Ok(Expr::Literal(Value::Int(i))),
            Some(Token::Float(f)) => Ok(Expr::Literal(Value::Float(f))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" => Expr::Literal(Value::Null),
                _ => Expr::Var(name),
            }),
            Some(Token::Op("!")) => Ok(Expr::Not(Box::new(self.expression(UNARY_PRECEDENCE)?))),
            Some(Token::Op("-")) => Ok(Expr::Neg(Box::new(self.expression(UNARY_PRECEDENCE)?))),
            Some(Token::LParen) => {
                let inner = self.expression(0)?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(tok) => Err(format!("expected `)`, found {tok}")),
                    None => Err("missing `)`".to_string()),
                }
            },
            Some(tok) => Err(format!("unexpected {tok}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(src: &str, vars: &Variables) -> Value {
        Expression::parse(src).unwrap().eval(vars).unwrap()
    }

    #[test]
    fn precedence_and_associativity() {
        let vars = Variables::new();
        assert_eq!(eval("1 + 2 * 3", &vars), Value::Int(7));
        assert_eq!(eval("(1 + 2) * 3", &vars), Value::Int(9));
        assert_eq!(eval("10 - 3 - 2", &vars), Value::Int(5));
        assert_eq!(eval("-2 * 3", &vars), Value::Int(-6));
        assert_eq!(eval("1 < 2 && 3 >= 3 || false", &vars), Value::Bool(true));
    }

    #[test]
    fn variables_and_strings() {
        let mut vars = Variables::new();
        vars.define("i", Value::Int(3));
        vars.define("name", Value::from("node"));

        assert_eq!(eval("i < 5", &vars), Value::Bool(true));
        assert_eq!(eval("name + '-' + i", &vars), Value::from("node-3"));
        assert_eq!(eval("name == \"node\"", &vars), Value::Bool(true));
    }

    #[test]
    fn division_yields_float() {
        let vars = Variables::new();
        assert_eq!(eval("7 / 2", &vars), Value::Float(3.5));
        assert_eq!(eval("7 % 2", &vars), Value::Int(1));
    }

    #[test]
    fn short_circuit_skips_unknown_variables() {
        let vars = Variables::new();
        assert_eq!(eval("false && missing", &vars), Value::Bool(false));
        assert_eq!(eval("true || missing", &vars), Value::Bool(true));
    }

    #[test]
    fn runtime_errors() {
        let vars = Variables::new();
        let err = Expression::parse("1 / 0").unwrap().eval(&vars).unwrap_err();
        assert!(matches!(err, ActivityError::Arithmetic(_)));

        let err = Expression::parse("nope + 1").unwrap().eval(&vars).unwrap_err();
        assert!(matches!(err, ActivityError::UnknownVariable(ref v) if v == "nope"));

        let err = Expression::parse("true < 1").unwrap().eval(&vars).unwrap_err();
        assert!(matches!(err, ActivityError::Type(_)));
    }

    #[test]
    fn syntax_errors_are_config_errors() {
        for bad in ["", "1 +", "(1", "1 2", "'open", "a $ b"] {
            assert!(
                matches!(Expression::parse(bad), Err(ConfigError::Expression { .. })),
                "{bad:?} should not parse"
            );
        }
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        fn scope(a: i64, b: i64) -> Variables {
            let mut vars = Variables::new();
            vars.define("a", Value::Int(a));
            vars.define("b", Value::Int(b));
            vars
        }

        proptest! {
            #[test]
            fn int_arithmetic_matches_rust(a in -10_000i64..10_000, b in -10_000i64..10_000) {
                let vars = scope(a, b);
                prop_assert_eq!(eval("a + b * 2", &vars), Value::Int(a + b * 2));
                prop_assert_eq!(eval("(a - b) * -1", &vars), Value::Int(b - a));
                prop_assert_eq!(eval("a < b", &vars), Value::Bool(a < b));
                prop_assert_eq!(eval("!(a == b) == (a != b)", &vars), Value::Bool(true));
            }

            #[test]
            fn remainder_matches_rust(a in any::<i64>(), b in 1i64..1_000) {
                prop_assert_eq!(eval("a % b", &scope(a, b)), Value::Int(a % b));
            }

            #[test]
            fn overflow_is_an_error(a in (i64::MAX / 2 + 1)..i64::MAX) {
                let err = Expression::parse("a + a").unwrap().eval(&scope(a, 0)).unwrap_err();
                prop_assert!(matches!(err, ActivityError::Arithmetic(_)));
            }
        }
    }
}
