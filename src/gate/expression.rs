//! Restricted condition language used by `criteria` and `expression` gates.
//!
//! Conditions are tokenized, parsed into a small [`Expr`] tree and evaluated
//! directly against the runtime state document. Nothing is ever executed as code.
//!
//! Grammar:
//!
//! ```text
//! expr       := or
//! or         := and ("||" and)*
//! and        := unary ("&&" unary)*
//! unary      := "!" unary | "(" expr ")" | comparison
//! comparison := operand (cmp operand)?
//! operand    := literal | path | path ".length"
//!             | path ("." | "?.") ("every" | "some") "(" lambda ")"
//! path       := "state" (("." | "?.") ident)*
//! lambda     := param "=>" param (("." | "?.") ident)+ cmp literal
//! cmp        := "===" | "!==" | "==" | "!=" | ">" | ">=" | "<" | "<="
//! literal    := number | string | true | false | null | undefined
//! ```

use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported condition at offset {offset}: {reason}")]
pub struct ParseError {
    pub offset: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    StrictEq,
    StrictNe,
    LooseEq,
    LooseNe,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    Every,
    Some,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

/// Field accessors below the `state` root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePath {
    pub segments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: Vec<String>,
    pub op: CmpOp,
    pub value: Literal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Literal),
    Path(StatePath),
    Length(StatePath),
    Quantified {
        path: StatePath,
        quantifier: Quantifier,
        null_safe: bool,
        predicate: Predicate,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Truthy(Operand),
    Compare {
        left: Operand,
        op: CmpOp,
        right: Operand,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Dot,
    OptionalDot,
    LParen,
    RParen,
    Not,
    And,
    Or,
    Arrow,
    Cmp(CmpOp),
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, ParseError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let err = |offset: usize, reason: &str| ParseError {
        offset,
        reason: reason.to_string(),
    };

    while i < chars.len() {
        let ch = chars[i];
        let next = chars.get(i + 1).copied();
        let start = i;
        if ch.is_whitespace() {
            i += 1;
            continue;
        }
        let token = match ch {
            '(' => {
                i += 1;
                Token::LParen
            }
            ')' => {
                i += 1;
                Token::RParen
            }
            '.' => {
                i += 1;
                Token::Dot
            }
            '?' if next == Some('.') => {
                i += 2;
                Token::OptionalDot
            }
            '&' if next == Some('&') => {
                i += 2;
                Token::And
            }
            '|' if next == Some('|') => {
                i += 2;
                Token::Or
            }
            '=' if next == Some('>') => {
                i += 2;
                Token::Arrow
            }
            '=' | '!' if next == Some('=') => {
                let strict = chars.get(i + 2) == Some(&'=');
                i += if strict { 3 } else { 2 };
                Token::Cmp(match (ch, strict) {
                    ('=', true) => CmpOp::StrictEq,
                    ('=', false) => CmpOp::LooseEq,
                    (_, true) => CmpOp::StrictNe,
                    (_, false) => CmpOp::LooseNe,
                })
            }
            '!' => {
                i += 1;
                Token::Not
            }
            '>' | '<' => {
                let inclusive = next == Some('=');
                i += if inclusive { 2 } else { 1 };
                Token::Cmp(match (ch, inclusive) {
                    ('>', true) => CmpOp::Ge,
                    ('>', false) => CmpOp::Gt,
                    (_, true) => CmpOp::Le,
                    (_, false) => CmpOp::Lt,
                })
            }
            '"' | '\'' => {
                let quote = ch;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(err(start, "unterminated string literal")),
                        Some('\\') => {
                            let escaped = chars
                                .get(i + 1)
                                .ok_or_else(|| err(i, "dangling escape"))?;
                            value.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => *other,
                            });
                            i += 2;
                        }
                        Some(c) if *c == quote => {
                            i += 1;
                            break;
                        }
                        Some(c) => {
                            value.push(*c);
                            i += 1;
                        }
                    }
                }
                Token::Str(value)
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                let value = raw
                    .parse::<f64>()
                    .map_err(|_| err(start, "invalid number literal"))?;
                Token::Number(value)
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                Token::Ident(chars[start..i].iter().collect())
            }
            _ => return Err(err(start, &format!("unexpected character `{ch}`"))),
        };
        tokens.push((start, token));
    }
    Ok(tokens)
}

/// Deepest `!`/`(` nesting a condition may use.
pub const MAX_CONDITION_DEPTH: usize = 64;

/// Longest condition, in tokens. Bounds `&&`/`||` chains as well.
pub const MAX_CONDITION_TOKENS: usize = 1024;

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, token)| token)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(offset, _)| *offset)
            .unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, token)| token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error<T>(&self, reason: impl Into<String>) -> Result<T, ParseError> {
        Err(ParseError {
            offset: self.offset(),
            reason: reason.into(),
        })
    }

    fn expect(&mut self, expected: Token, label: &str) -> Result<(), ParseError> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            self.error(format!("expected {label}"))
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if !matches!(self.peek(), Some(Token::Not | Token::LParen)) {
            return self.parse_comparison();
        }
        if self.depth >= MAX_CONDITION_DEPTH {
            return self.error(format!("nesting deeper than {MAX_CONDITION_DEPTH} levels"));
        }
        self.depth += 1;
        let expr = match self.advance() {
            Some(Token::Not) => self.parse_unary().map(|inner| Expr::Not(Box::new(inner))),
            _ => self
                .parse_or()
                .and_then(|inner| self.expect(Token::RParen, "`)`").map(|()| inner)),
        };
        self.depth -= 1;
        expr
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_operand()?;
        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.parse_operand()?;
            return Ok(Expr::Compare { left, op, right });
        }
        Ok(Expr::Truthy(left))
    }

    fn parse_operand(&mut self) -> Result<Operand, ParseError> {
        match self.advance() {
            Some(Token::Number(value)) => Ok(Operand::Literal(Literal::Number(value))),
            Some(Token::Str(value)) => Ok(Operand::Literal(Literal::String(value))),
            Some(Token::Ident(ident)) => match ident.as_str() {
                "true" => Ok(Operand::Literal(Literal::Bool(true))),
                "false" => Ok(Operand::Literal(Literal::Bool(false))),
                "null" => Ok(Operand::Literal(Literal::Null)),
                "undefined" => Ok(Operand::Literal(Literal::Undefined)),
                "state" => self.parse_state_path(),
                other => {
                    self.pos -= 1;
                    self.error(format!("unknown identifier `{other}`; paths must start at `state`"))
                }
            },
            Some(_) => {
                self.pos -= 1;
                self.error("expected a state path or literal")
            }
            None => self.error("unexpected end of condition"),
        }
    }

    fn parse_state_path(&mut self) -> Result<Operand, ParseError> {
        let mut segments = Vec::new();
        loop {
            let null_safe = match self.peek() {
                Some(Token::Dot) => false,
                Some(Token::OptionalDot) => true,
                _ => break,
            };
            self.pos += 1;
            let Some(Token::Ident(name)) = self.advance() else {
                self.pos = self.pos.saturating_sub(1);
                return self.error("expected field name after accessor");
            };

            let quantifier = match name.as_str() {
                "every" => Some(Quantifier::Every),
                "some" => Some(Quantifier::Some),
                _ => None,
            };
            let opens_call = self.peek() == Some(&Token::LParen);
            if let (Some(quantifier), true) = (quantifier, opens_call) {
                self.pos += 1;
                let predicate = self.parse_predicate()?;
                self.expect(Token::RParen, "`)` closing quantifier")?;
                return Ok(Operand::Quantified {
                    path: StatePath { segments },
                    quantifier,
                    null_safe,
                    predicate,
                });
            }

            let is_last = !matches!(self.peek(), Some(Token::Dot | Token::OptionalDot));
            if name == "length" && is_last && !segments.is_empty() {
                return Ok(Operand::Length(StatePath { segments }));
            }
            segments.push(name);
        }
        if segments.is_empty() {
            return self.error("`state` must be followed by a field");
        }
        Ok(Operand::Path(StatePath { segments }))
    }

    fn parse_predicate(&mut self) -> Result<Predicate, ParseError> {
        let parenthesized = self.peek() == Some(&Token::LParen);
        if parenthesized {
            self.pos += 1;
        }
        let Some(Token::Ident(param)) = self.advance() else {
            return self.error("expected lambda parameter");
        };
        if parenthesized {
            self.expect(Token::RParen, "`)` after lambda parameter")?;
        }
        self.expect(Token::Arrow, "`=>`")?;
        match self.advance() {
            Some(Token::Ident(name)) if name == param => {}
            _ => {
                self.pos = self.pos.saturating_sub(1);
                return self.error(format!("lambda body must start with `{param}`"));
            }
        }

        let mut field = Vec::new();
        while matches!(self.peek(), Some(Token::Dot | Token::OptionalDot)) {
            self.pos += 1;
            let Some(Token::Ident(name)) = self.advance() else {
                self.pos = self.pos.saturating_sub(1);
                return self.error("expected field name in lambda");
            };
            field.push(name);
        }
        if field.is_empty() {
            return self.error("lambda must compare a field of its parameter");
        }

        let Some(Token::Cmp(op)) = self.advance() else {
            self.pos = self.pos.saturating_sub(1);
            return self.error("lambda must be a single field comparison");
        };
        let value = match self.parse_operand()? {
            Operand::Literal(literal) => literal,
            _ => return self.error("lambda comparisons must use a literal"),
        };
        Ok(Predicate { field, op, value })
    }
}

pub fn parse_condition(source: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(ParseError {
            offset: 0,
            reason: "empty condition".to_string(),
        });
    }
    if tokens.len() > MAX_CONDITION_TOKENS {
        return Err(ParseError {
            offset: tokens[MAX_CONDITION_TOKENS].0,
            reason: format!("condition longer than {MAX_CONDITION_TOKENS} tokens"),
        });
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.len(),
        depth: 0,
    };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return parser.error("unexpected trailing input");
    }
    Ok(expr)
}

/// `None` stands for JavaScript's `undefined`.
type Resolved = Option<Value>;

impl Expr {
    pub fn evaluate(&self, state: &Value) -> bool {
        match self {
            Expr::Truthy(operand) => truthy(&operand.resolve(state)),
            Expr::Compare { left, op, right } => {
                compare(&left.resolve(state), *op, &right.resolve(state))
            }
            Expr::Not(inner) => !inner.evaluate(state),
            Expr::And(left, right) => left.evaluate(state) && right.evaluate(state),
            Expr::Or(left, right) => left.evaluate(state) || right.evaluate(state),
        }
    }
}

impl StatePath {
    fn resolve<'a>(&self, state: &'a Value) -> Option<&'a Value> {
        lookup_segments(state, &self.segments)
    }
}

impl Operand {
    fn resolve(&self, state: &Value) -> Resolved {
        match self {
            Operand::Literal(literal) => literal.to_value(),
            Operand::Path(path) => path.resolve(state).cloned(),
            Operand::Length(path) => match path.resolve(state) {
                Some(Value::Array(items)) => Some(Value::from(items.len())),
                Some(Value::String(text)) => Some(Value::from(text.chars().count())),
                _ => None,
            },
            Operand::Quantified {
                path,
                quantifier,
                null_safe,
                predicate,
            } => {
                let outcome = match path.resolve(state) {
                    Some(Value::Array(items)) => {
                        let matches = |item: &Value| {
                            let field = lookup_segments(item, &predicate.field).cloned();
                            compare(&field, predicate.op, &predicate.value.to_value())
                        };
                        match quantifier {
                            Quantifier::Every => items.iter().all(matches),
                            Quantifier::Some => items.iter().any(matches),
                        }
                    }
                    _ if *null_safe => *quantifier == Quantifier::Every,
                    _ => false,
                };
                Some(Value::Bool(outcome))
            }
        }
    }
}

impl Literal {
    fn to_value(&self) -> Resolved {
        match self {
            Literal::Undefined => None,
            Literal::Null => Some(Value::Null),
            Literal::Bool(value) => Some(Value::Bool(*value)),
            Literal::Number(value) => serde_json::Number::from_f64(*value).map(Value::Number),
            Literal::String(value) => Some(Value::String(value.clone())),
        }
    }
}

fn lookup_segments<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        _ => None,
    })
}

fn truthy(value: &Resolved) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

fn to_number(value: &Resolved) -> Option<f64> {
    match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::Bool(flag)) => Some(if *flag { 1.0 } else { 0.0 }),
        Some(Value::String(text)) if text.trim().is_empty() => Some(0.0),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        Some(Value::Null) => Some(0.0),
        _ => None,
    }
}

fn strict_equal(left: &Resolved, right: &Resolved) -> bool {
    match (left, right) {
        (None, None) => true,
        (Some(Value::Number(a)), Some(Value::Number(b))) => a.as_f64() == b.as_f64(),
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn loose_equal(left: &Resolved, right: &Resolved) -> bool {
    let nullish = |value: &Resolved| matches!(value, None | Some(Value::Null));
    if nullish(left) || nullish(right) {
        return nullish(left) && nullish(right);
    }
    if strict_equal(left, right) {
        return true;
    }
    match (left, right) {
        (Some(Value::Array(_) | Value::Object(_)), _)
        | (_, Some(Value::Array(_) | Value::Object(_))) => false,
        _ => match (to_number(left), to_number(right)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

fn relational(left: &Resolved, right: &Resolved) -> Option<Ordering> {
    if let (Some(Value::String(a)), Some(Value::String(b))) = (left, right) {
        return Some(a.cmp(b));
    }
    let a = to_number(left)?;
    let b = to_number(right)?;
    a.partial_cmp(&b)
}

fn compare(left: &Resolved, op: CmpOp, right: &Resolved) -> bool {
    match op {
        CmpOp::StrictEq => strict_equal(left, right),
        CmpOp::StrictNe => !strict_equal(left, right),
        CmpOp::LooseEq => loose_equal(left, right),
        CmpOp::LooseNe => !loose_equal(left, right),
        CmpOp::Gt => relational(left, right) == Some(Ordering::Greater),
        CmpOp::Ge => matches!(
            relational(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        CmpOp::Lt => relational(left, right) == Some(Ordering::Less),
        CmpOp::Le => matches!(
            relational(left, right),
            Some(Ordering::Less | Ordering::Equal)
        ),
    }
}
