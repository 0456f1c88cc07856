//! Boolean filter expressions evaluated against item metadata.
//!
//! ```text
//! width >= 1000 and extension in ["jpg", "png"]
//! not (user["name"] == "bot") or rating > 4.5
//! ```
//!
//! Supported: integer/float/string literals, `True`, `False`, `None`, list
//! literals, names, subscripts, `== != < <= > >=`, `in`, `not in`, `and`,
//! `or`, `not` and parentheses. Truthiness follows the usual scripting
//! conventions (empty strings, lists, maps, zero and `None` are false).

use std::cmp::Ordering;

use serde_json::{Number, Value};
use thiserror::Error;

use crate::format::display_value;
use crate::message::Kwdict;

/// Errors raised while parsing or evaluating a filter expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("{0}")]
    Syntax(String),

    #[error("name '{0}' is not defined")]
    Name(String),

    #[error("{0}")]
    Type(String),

    #[error("{0}")]
    Lookup(String),
}

impl FilterError {
    pub fn kind(&self) -> &'static str {
        match self {
            FilterError::Syntax(_) => "SyntaxError",
            FilterError::Name(_) => "NameError",
            FilterError::Type(_) => "TypeError",
            FilterError::Lookup(_) => "KeyError",
        }
    }
}

/// A compiled boolean expression over metadata.
pub trait FilterExpr: Send + Sync {
    fn evaluate(&self, kwdict: &Kwdict) -> Result<bool, FilterError>;
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Number),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

fn tokenize(src: &str) -> Result<Vec<Token>, FilterError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(FilterError::Syntax("unterminated string literal".into()));
                        }
                        Some('\\') => {
                            if let Some(next) = chars.get(i + 1) {
                                text.push(*next);
                            }
                            i += 2;
                        }
                        Some(ch) if *ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            text.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            '=' | '!' | '<' | '>' => {
                let two: String = chars[i..chars.len().min(i + 2)].iter().collect();
                let op = match two.as_str() {
                    "==" => "==",
                    "!=" => "!=",
                    "<=" => "<=",
                    ">=" => ">=",
                    _ if c == '<' => "<",
                    _ if c == '>' => ">",
                    _ => return Err(FilterError::Syntax(format!("invalid operator near '{two}'"))),
                };
                i += op.len();
                tokens.push(Token::Op(op));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Number(parse_number(&text)?));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(FilterError::Syntax(format!("unexpected character '{other}'"))),
        }
    }

    Ok(tokens)
}

/// Integer literals stay integers so large ids compare exactly.
fn parse_number(text: &str) -> Result<Number, FilterError> {
    let invalid = || FilterError::Syntax(format!("invalid number '{text}'"));
    if text.contains('.') {
        let float = text.parse::<f64>().map_err(|_| invalid())?;
        return Number::from_f64(float).ok_or_else(invalid);
    }
    if let Ok(int) = text.parse::<i64>() {
        return Ok(Number::from(int));
    }
    text.parse::<u64>().map(Number::from).map_err(|_| invalid())
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Literal(Value),
    List(Vec<Node>),
    Name(String),
    Subscript(Box<Node>, Box<Node>),
    Not(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Compare(&'static str, Box<Node>, Box<Node>),
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
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w == word)
    }

    fn expect(&mut self, token: Token) -> Result<(), FilterError> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(FilterError::Syntax(format!(
                "expected {token:?}, found {other:?}"
            ))),
        }
    }

    fn or(&mut self) -> Result<Node, FilterError> {
        let mut node = self.and()?;
        while self.is_keyword("or") {
            self.pos += 1;
            node = Node::Or(Box::new(node), Box::new(self.and()?));
        }
        Ok(node)
    }

    fn and(&mut self) -> Result<Node, FilterError> {
        let mut node = self.not()?;
        while self.is_keyword("and") {
            self.pos += 1;
            node = Node::And(Box::new(node), Box::new(self.not()?));
        }
        Ok(node)
    }

    fn not(&mut self) -> Result<Node, FilterError> {
        if self.is_keyword("not") {
            self.pos += 1;
            return Ok(Node::Not(Box::new(self.not()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Node, FilterError> {
        let left = self.postfix()?;
        let op = match self.peek() {
            Some(Token::Op(op)) => *op,
            Some(Token::Ident(w)) if w == "in" => "in",
            Some(Token::Ident(w)) if w == "not" => {
                match self.tokens.get(self.pos + 1) {
                    Some(Token::Ident(w)) if w == "in" => {
                        self.pos += 1;
                        "not in"
                    }
                    _ => return Ok(left),
                }
            }
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.postfix()?;
        Ok(Node::Compare(op, Box::new(left), Box::new(right)))
    }

    fn postfix(&mut self) -> Result<Node, FilterError> {
        let mut node = self.atom()?;
        while self.peek() == Some(&Token::LBracket) {
            self.pos += 1;
            let index = self.or()?;
            self.expect(Token::RBracket)?;
            node = Node::Subscript(Box::new(node), Box::new(index));
        }
        Ok(node)
    }

    fn atom(&mut self) -> Result<Node, FilterError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Node::Literal(Value::Number(n))),
            Some(Token::Str(s)) => Ok(Node::Literal(Value::String(s))),
            Some(Token::Ident(word)) => Ok(match word.as_str() {
                "True" => Node::Literal(Value::Bool(true)),
                "False" => Node::Literal(Value::Bool(false)),
                "None" => Node::Literal(Value::Null),
                _ => Node::Name(word),
            }),
            Some(Token::LParen) => {
                let node = self.or()?;
                self.expect(Token::RParen)?;
                Ok(node)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() != Some(&Token::RBracket) {
                    loop {
                        items.push(self.or()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.pos += 1;
                        } else {
                            break;
                        }
                    }
                }
                self.expect(Token::RBracket)?;
                Ok(Node::List(items))
            }
            other => Err(FilterError::Syntax(format!("unexpected token {other:?}"))),
        }
    }
}

/// The built-in expression language.
#[derive(Debug, Clone)]
pub struct Expression {
    root: Node,
}

impl Expression {
    /// Compile an expression, failing on syntax errors.
    pub fn parse(source: &str) -> Result<Self, FilterError> {
        let mut parser = Parser {
            tokens: tokenize(source)?,
            pos: 0,
        };
        if parser.tokens.is_empty() {
            return Err(FilterError::Syntax("empty expression".into()));
        }
        let root = parser.or()?;
        if let Some(token) = parser.peek() {
            return Err(FilterError::Syntax(format!("unexpected token {token:?}")));
        }
        Ok(Self { root })
    }
}

impl FilterExpr for Expression {
    fn evaluate(&self, kwdict: &Kwdict) -> Result<bool, FilterError> {
        eval(&self.root, kwdict).map(|v| truthy(&v))
    }
}

fn eval(node: &Node, kwdict: &Kwdict) -> Result<Value, FilterError> {
    match node {
        Node::Literal(value) => Ok(value.clone()),
        Node::List(items) => items
            .iter()
            .map(|item| eval(item, kwdict))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Node::Name(name) => kwdict
            .get(name)
            .cloned()
            .ok_or_else(|| FilterError::Name(name.clone())),
        Node::Subscript(target, index) => {
            let target = eval(target, kwdict)?;
            let index = eval(index, kwdict)?;
            subscript(&target, &index)
        }
        Node::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, kwdict)?))),
        Node::And(left, right) => {
            let left = eval(left, kwdict)?;
            if !truthy(&left) {
                return Ok(left);
            }
            eval(right, kwdict)
        }
        Node::Or(left, right) => {
            let left = eval(left, kwdict)?;
            if truthy(&left) {
                return Ok(left);
            }
            eval(right, kwdict)
        }
        Node::Compare(op, left, right) => {
            let left = eval(left, kwdict)?;
            let right = eval(right, kwdict)?;
            compare(op, &left, &right).map(Value::Bool)
        }
    }
}

fn subscript(target: &Value, index: &Value) -> Result<Value, FilterError> {
    match (target, index) {
        (Value::Object(map), Value::String(key)) => map
            .get(key)
            .cloned()
            .ok_or_else(|| FilterError::Lookup(format!("'{key}'"))),
        (Value::Array(items), Value::Number(n)) => {
            let len = items.len() as i64;
            let idx = n
                .as_i64()
                .ok_or_else(|| FilterError::Type("list indices must be integers".into()))?;
            let idx = if idx < 0 { len + idx } else { idx };
            usize::try_from(idx)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .ok_or_else(|| FilterError::Lookup("list index out of range".into()))
        }
        (Value::String(s), Value::Number(n)) => n
            .as_u64()
            .and_then(|i| s.chars().nth(i as usize))
            .map(|c| Value::String(c.to_string()))
            .ok_or_else(|| FilterError::Lookup("string index out of range".into())),
        (target, _) => Err(FilterError::Type(format!(
            "'{}' object is not subscriptable",
            type_name(target)
        ))),
    }
}

fn compare(op: &str, left: &Value, right: &Value) -> Result<bool, FilterError> {
    match op {
        "==" => Ok(equals(left, right)),
        "!=" => Ok(!equals(left, right)),
        "in" => contains(right, left),
        "not in" => contains(right, left).map(|found| !found),
        _ => {
            let ordering = order(left, right).ok_or_else(|| {
                FilterError::Type(format!(
                    "'{op}' not supported between instances of '{}' and '{}'",
                    type_name(left),
                    type_name(right)
                ))
            })?;
            Ok(match op {
                "<" => ordering == Ordering::Less,
                "<=" => ordering != Ordering::Greater,
                ">" => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
    }
}

fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b) == Some(Ordering::Equal),
        _ => left == right,
    }
}

fn as_integer(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

/// Exact for two integers; floats fall back to `f64`.
fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    match (as_integer(a), as_integer(b)) {
        (Some(a), Some(b)) => Some(a.cmp(&b)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, FilterError> {
    match (container, item) {
        (Value::Array(items), _) => Ok(items.iter().any(|v| equals(v, item))),
        (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
        (Value::String(haystack), Value::String(needle)) => Ok(haystack.contains(needle.as_str())),
        (container, item) => Err(FilterError::Type(format!(
            "cannot test '{}' for membership in '{}'",
            display_value(item),
            type_name(container)
        ))),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "NoneType",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::kwdict;
    use serde_json::json;

    fn data() -> Kwdict {
        kwdict(json!({
            "width": 1200,
            "rating": 4.7,
            "extension": "jpg",
            "title": "Sunset over the bay",
            "tags": ["sky", "sea"],
            "user": {"name": "bot"},
            "empty": "",
        }))
    }

    fn check(src: &str) -> bool {
        Expression::parse(src).unwrap().evaluate(&data()).unwrap()
    }

    #[test]
    fn test_comparisons() {
        assert!(check("width >= 1000"));
        assert!(!check("width < 1000"));
        assert!(check("rating > 4.5"));
        assert!(check("extension == 'jpg'"));
        assert!(check("extension != \"png\""));
        assert!(check("width == 1200.0"));
    }

    #[test]
    fn test_large_integers_compare_exactly() {
        let post = kwdict(json!({"id": 9007199254740992u64, "big": u64::MAX}));
        let check = |src: &str| Expression::parse(src).unwrap().evaluate(&post).unwrap();

        assert!(!check("id == 9007199254740993"));
        assert!(check("id != 9007199254740993"));
        assert!(check("id < 9007199254740993"));
        assert!(check("id == 9007199254740992"));
        assert!(check("big == 18446744073709551615"));
        assert!(check("big > id"));
        assert!(check("id in [1, 9007199254740992]"));
    }

    #[test]
    fn test_boolean_operators() {
        assert!(check("width > 10 and extension == 'jpg'"));
        assert!(check("width < 10 or extension == 'jpg'"));
        assert!(check("not (width < 10)"));
        assert!(!check("empty"));
        assert!(check("not empty and tags"));
    }

    #[test]
    fn test_membership() {
        assert!(check("extension in ['jpg', 'png']"));
        assert!(check("'sea' in tags"));
        assert!(check("'bay' in title"));
        assert!(check("'gif' not in tags"));
        assert!(check("'name' in user"));
    }

    #[test]
    fn test_subscripts() {
        assert!(check("user['name'] == 'bot'"));
        assert!(check("tags[0] == 'sky'"));
        assert!(check("tags[-1] == 'sea'"));
    }

    #[test]
    fn test_undefined_name_fails_at_evaluation() {
        let expr = Expression::parse("missing > 1").unwrap();
        let err = expr.evaluate(&data()).unwrap_err();
        assert_eq!(err, FilterError::Name("missing".into()));
        assert_eq!(err.kind(), "NameError");
    }

    #[test]
    fn test_type_errors() {
        let expr = Expression::parse("title > 3").unwrap();
        assert!(matches!(expr.evaluate(&data()), Err(FilterError::Type(_))));
        let expr = Expression::parse("width[0]").unwrap();
        assert!(matches!(expr.evaluate(&data()), Err(FilterError::Type(_))));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(Expression::parse(""), Err(FilterError::Syntax(_))));
        assert!(matches!(Expression::parse("width >"), Err(FilterError::Syntax(_))));
        assert!(matches!(Expression::parse("(width"), Err(FilterError::Syntax(_))));
        assert!(matches!(Expression::parse("'open"), Err(FilterError::Syntax(_))));
        assert!(matches!(Expression::parse("a = 1"), Err(FilterError::Syntax(_))));
    }
}
