//! Pure merge of per-task partials, dispatched on the terminal operation.
//!
//! The scheduler treats operation payloads as opaque; only here, after every
//! partial arrived, is the terminal operation's kind examined. `count` sums,
//! `reduce` folds with the submitted reducer, everything else concatenates in
//! slot order. Merge never touches I/O and runs on the ingesting task.

use elytra_common::{ElytraError, Result};
use serde_json::Value;

use crate::protocol::OpDescriptor;

/// Combine per-chunk partials into the job result.
///
/// `partials` is ordered by chunk id; arrival order never matters here.
pub fn merge_partials(ops: &[OpDescriptor], partials: Vec<Value>) -> Result<Value> {
    match ops.last() {
        Some(OpDescriptor::Count) => sum_partials(&partials),
        Some(OpDescriptor::Reduce {
            body,
            initial_value,
        }) => fold_partials(body, initial_value, &partials),
        _ => Ok(concat_partials(partials)),
    }
}

/// Numeric sum; integer-preserving when every partial is integral.
fn sum_partials(partials: &[Value]) -> Result<Value> {
    if partials.iter().all(|v| v.as_i64().is_some()) {
        let mut total = 0_i64;
        for v in partials {
            total = total.saturating_add(v.as_i64().expect("all partials integral"));
        }
        return Ok(Value::from(total));
    }
    let mut total = 0.0_f64;
    for v in partials {
        total += numeric(v)?;
    }
    number_value(total)
}

/// Fold partials in slot order from the initial value, applying the
/// submitted reducer body.
fn fold_partials(body: &str, initial: &Value, partials: &[Value]) -> Result<Value> {
    let reducer = Reducer::parse(body)?;
    let mut acc = numeric(initial)?;
    for v in partials {
        acc = reducer.apply(acc, numeric(v)?);
        if !acc.is_finite() {
            return Err(ElytraError::Internal(format!(
                "reducer '{body}' produced a non-finite value"
            )));
        }
    }
    number_value(acc)
}

/// Flatten array partials and append scalar partials, in slot order.
fn concat_partials(partials: Vec<Value>) -> Value {
    let mut out = Vec::new();
    for partial in partials {
        match partial {
            Value::Array(items) => out.extend(items),
            other => out.push(other),
        }
    }
    Value::Array(out)
}

fn numeric(v: &Value) -> Result<f64> {
    v.as_f64()
        .ok_or_else(|| ElytraError::Internal(format!("merge expected a numeric partial, got {v}")))
}

fn number_value(x: f64) -> Result<Value> {
    if !x.is_finite() {
        return Err(ElytraError::Internal(
            "merge produced a non-finite number".to_string(),
        ));
    }
    const INT_EXACT: f64 = 9_007_199_254_740_992.0; // 2^53
    if x.fract() == 0.0 && x.abs() < INT_EXACT {
        return Ok(Value::from(x as i64));
    }
    serde_json::Number::from_f64(x)
        .map(Value::Number)
        .ok_or_else(|| ElytraError::Internal("merge produced an unrepresentable number".to_string()))
}

/// A parsed two-parameter arrow-function reducer.
///
/// Supported subset: `(a, b) => <expr>` where `<expr>` is arithmetic over
/// the two parameters and numeric literals with `+ - * /`, unary minus, and
/// parentheses. Bodies outside the subset fail the merge.
struct Reducer {
    expr: Expr,
}

#[derive(Debug)]
enum Expr {
    Num(f64),
    ParamA,
    ParamB,
    Neg(Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Num(f64),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
    Arrow,
}

impl Reducer {
    fn parse(body: &str) -> Result<Self> {
        let tokens = tokenize(body)?;
        let mut parser = Parser {
            body,
            tokens,
            pos: 0,
        };
        parser.reducer()
    }

    fn apply(&self, a: f64, b: f64) -> f64 {
        eval(&self.expr, a, b)
    }
}

fn eval(expr: &Expr, a: f64, b: f64) -> f64 {
    match expr {
        Expr::Num(n) => *n,
        Expr::ParamA => a,
        Expr::ParamB => b,
        Expr::Neg(inner) => -eval(inner, a, b),
        Expr::Bin(op, lhs, rhs) => {
            let l = eval(lhs, a, b);
            let r = eval(rhs, a, b);
            match op {
                BinOp::Add => l + r,
                BinOp::Sub => l - r,
                BinOp::Mul => l * r,
                BinOp::Div => l / r,
            }
        }
    }
}

fn tokenize(body: &str) -> Result<Vec<Token>> {
    let unsupported =
        |c: char| ElytraError::Internal(format!("unsupported reducer body: unexpected '{c}'"));
    let mut tokens = Vec::new();
    let mut chars = body.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '=' => {
                chars.next();
                if chars.next() != Some('>') {
                    return Err(ElytraError::Internal(
                        "unsupported reducer body: expected '=>'".to_string(),
                    ));
                }
                tokens.push(Token::Arrow);
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut lit = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        lit.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = lit.parse::<f64>().map_err(|_| {
                    ElytraError::Internal(format!(
                        "unsupported reducer body: bad number literal '{lit}'"
                    ))
                })?;
                tokens.push(Token::Num(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' || d == '$' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(unsupported(other)),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    body: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn reducer(&mut self) -> Result<Reducer> {
        self.expect(Token::LParen)?;
        let param_a = self.ident()?;
        self.expect(Token::Comma)?;
        let param_b = self.ident()?;
        self.expect(Token::RParen)?;
        self.expect(Token::Arrow)?;
        let expr = self.expr(&param_a, &param_b)?;
        if self.pos != self.tokens.len() {
            return Err(self.fail("trailing input"));
        }
        Ok(Reducer { expr })
    }

    fn expr(&mut self, a: &str, b: &str) -> Result<Expr> {
        let mut lhs = self.term(a, b)?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term(a, b)?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn term(&mut self, a: &str, b: &str) -> Result<Expr> {
        let mut lhs = self.factor(a, b)?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.factor(a, b)?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn factor(&mut self, a: &str, b: &str) -> Result<Expr> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::Ident(name)) if name == a => Ok(Expr::ParamA),
            Some(Token::Ident(name)) if name == b => Ok(Expr::ParamB),
            Some(Token::Ident(name)) => Err(self.fail(&format!("unknown identifier '{name}'"))),
            Some(Token::Minus) => Ok(Expr::Neg(Box::new(self.factor(a, b)?))),
            Some(Token::LParen) => {
                let inner = self.expr(a, b)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            _ => Err(self.fail("expected a number, parameter, or '('")),
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name),
            _ => Err(self.fail("expected a parameter name")),
        }
    }

    fn expect(&mut self, want: Token) -> Result<()> {
        if self.next().as_ref() == Some(&want) {
            Ok(())
        } else {
            Err(self.fail(&format!("expected {want:?}")))
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn fail(&self, reason: &str) -> ElytraError {
        ElytraError::Internal(format!(
            "unsupported reducer body '{}': {reason}",
            self.body
        ))
    }
}
