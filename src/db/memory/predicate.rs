//! Root predicate evaluation for the in-memory backend.
//!
//! Supports the subset of SQL boolean expressions roots are usually written
//! in: comparisons, `IN (...)`, `IS [NOT] NULL`, `AND`/`OR`/`NOT`,
//! parentheses and `TRUE`/`FALSE`. NULL follows SQL three-valued logic.

use crate::error::DbError;
use crate::schema::TableSchema;
use std::cmp::Ordering;

const SYNTAX_ERROR: &str = "42601";
const UNDEFINED_COLUMN: &str = "42703";

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Quoted(String),
    Number(String),
    Str(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, DbError> {
    let chars: Vec<char> = input.chars().collect();
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
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(DbError::new("unterminated quoted string in predicate")
                                .with_code(SYNTAX_ERROR))
                        }
                        Some(&q) if q == quote => {
                            if chars.get(i + 1) == Some(&quote) {
                                value.push(quote);
                                i += 2;
                            } else {
                                i += 1;
                                break;
                            }
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(if quote == '\'' {
                    Token::Str(value)
                } else {
                    Token::Quoted(value)
                });
            }
            '=' => {
                tokens.push(Token::Op("="));
                i += 1;
            }
            '<' | '>' | '!' => {
                let next = chars.get(i + 1).copied();
                let op = match (c, next) {
                    ('<', Some('=')) => "<=",
                    ('>', Some('=')) => ">=",
                    ('<', Some('>')) | ('!', Some('=')) => "<>",
                    ('<', _) => "<",
                    ('>', _) => ">",
                    _ => {
                        return Err(DbError::new(format!("unexpected '{c}' in predicate"))
                            .with_code(SYNTAX_ERROR))
                    }
                };
                i += op.len();
                tokens.push(Token::Op(op));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Number(chars[start..i].iter().collect()));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => {
                return Err(
                    DbError::new(format!("unexpected '{c}' in predicate")).with_code(SYNTAX_ERROR)
                )
            }
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Operand {
    Column(usize),
    Literal(Option<String>),
}

#[derive(Debug, Clone)]
enum Expr {
    Const(bool),
    Compare(Operand, &'static str, Operand),
    IsNull(Operand, bool),
    In(Operand, Vec<Operand>, bool),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

/// A parsed predicate bound to one table's columns
#[derive(Debug, Clone)]
pub struct Predicate {
    expr: Expr,
    numeric: Vec<bool>,
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    table: &'a TableSchema,
}

impl Predicate {
    pub fn parse(input: &str, table: &TableSchema) -> Result<Self, DbError> {
        let mut parser = Parser {
            tokens: tokenize(input)?,
            pos: 0,
            table,
        };
        let expr = parser.or()?;
        if parser.pos != parser.tokens.len() {
            return Err(DbError::new(format!(
                "unexpected trailing input in predicate '{input}'"
            ))
            .with_code(SYNTAX_ERROR));
        }
        Ok(Self {
            expr,
            numeric: table.columns.iter().map(|c| c.col_type.is_numeric()).collect(),
        })
    }

    /// Whether the row satisfies the predicate (unknown counts as false)
    pub fn matches(&self, row: &[Option<String>]) -> bool {
        self.eval(&self.expr, row) == Some(true)
    }

    fn eval(&self, expr: &Expr, row: &[Option<String>]) -> Option<bool> {
        match expr {
            Expr::Const(b) => Some(*b),
            Expr::Compare(l, op, r) => {
                let ordering = self.compare(l, r, row)?;
                Some(match *op {
                    "=" => ordering == Ordering::Equal,
                    "<>" => ordering != Ordering::Equal,
                    "<" => ordering == Ordering::Less,
                    "<=" => ordering != Ordering::Greater,
                    ">" => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                })
            }
            Expr::IsNull(operand, negated) => {
                let is_null = self.value(operand, row).is_none();
                Some(is_null != *negated)
            }
            Expr::In(operand, list, negated) => {
                let mut unknown = false;
                for item in list {
                    match self.compare(operand, item, row) {
                        Some(Ordering::Equal) => return Some(!negated),
                        Some(_) => {}
                        None => unknown = true,
                    }
                }
                if unknown {
                    None
                } else {
                    Some(*negated)
                }
            }
            Expr::Not(inner) => self.eval(inner, row).map(|b| !b),
            Expr::And(l, r) => match (self.eval(l, row), self.eval(r, row)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            Expr::Or(l, r) => match (self.eval(l, row), self.eval(r, row)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
        }
    }

    fn value<'r>(&'r self, operand: &'r Operand, row: &'r [Option<String>]) -> Option<&'r str> {
        match operand {
            Operand::Column(i) => row.get(*i).and_then(|v| v.as_deref()),
            Operand::Literal(v) => v.as_deref(),
        }
    }

    fn is_numeric(&self, operand: &Operand) -> bool {
        matches!(operand, Operand::Column(i) if self.numeric.get(*i).copied().unwrap_or(false))
    }

    fn compare(&self, l: &Operand, r: &Operand, row: &[Option<String>]) -> Option<Ordering> {
        let a = self.value(l, row)?;
        let b = self.value(r, row)?;
        if self.is_numeric(l) || self.is_numeric(r) {
            if let (Ok(x), Ok(y)) = (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
                return x.partial_cmp(&y);
            }
        }
        Some(a.cmp(b))
    }
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), DbError> {
        if self.peek() == Some(&token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected {token:?}")))
        }
    }

    fn error(&self, message: &str) -> DbError {
        let near = match self.peek() {
            Some(t) => format!("{t:?}"),
            None => "end of input".to_string(),
        };
        DbError::new(format!("{message} near {near}")).with_code(SYNTAX_ERROR)
    }

    fn or(&mut self) -> Result<Expr, DbError> {
        let mut left = self.and()?;
        while self.eat_keyword("or") {
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, DbError> {
        let mut left = self.not()?;
        while self.eat_keyword("and") {
            let right = self.not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, DbError> {
        if self.eat_keyword("not") {
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, DbError> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let expr = self.or()?;
            self.expect(Token::RParen)?;
            return Ok(expr);
        }
        if self.eat_keyword("true") {
            return Ok(Expr::Const(true));
        }
        if self.eat_keyword("false") {
            return Ok(Expr::Const(false));
        }

        let left = self.operand()?;

        if self.eat_keyword("is") {
            let negated = self.eat_keyword("not");
            if !self.eat_keyword("null") {
                return Err(self.error("expected NULL"));
            }
            return Ok(Expr::IsNull(left, negated));
        }

        let negated = self.eat_keyword("not");
        if self.eat_keyword("in") {
            self.expect(Token::LParen)?;
            let mut list = vec![self.operand()?];
            while self.peek() == Some(&Token::Comma) {
                self.pos += 1;
                list.push(self.operand()?);
            }
            self.expect(Token::RParen)?;
            return Ok(Expr::In(left, list, negated));
        }
        if negated {
            return Err(self.error("expected IN"));
        }

        match self.peek() {
            Some(Token::Op(op)) => {
                let op = *op;
                self.pos += 1;
                let right = self.operand()?;
                Ok(Expr::Compare(left, op, right))
            }
            _ => Err(self.error("expected comparison")),
        }
    }

    fn operand(&mut self) -> Result<Operand, DbError> {
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| self.error("expected operand"))?;
        self.pos += 1;
        match token {
            Token::Number(n) => Ok(Operand::Literal(Some(n))),
            Token::Str(s) => Ok(Operand::Literal(Some(s))),
            Token::Ident(s) if s.eq_ignore_ascii_case("null") => Ok(Operand::Literal(None)),
            Token::Ident(s) => self.column(&s.to_lowercase()),
            Token::Quoted(s) => self.column(&s),
            _ => {
                self.pos -= 1;
                Err(self.error("expected operand"))
            }
        }
    }

    fn column(&self, name: &str) -> Result<Operand, DbError> {
        self.table
            .columns
            .iter()
            .position(|c| c.name == name)
            .map(Operand::Column)
            .ok_or_else(|| {
                DbError::new(format!(
                    "column \"{}\" does not exist in {}",
                    name,
                    self.table.qualified_name()
                ))
                .with_code(UNDEFINED_COLUMN)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaDocument;

    fn table() -> TableSchema {
        let schema = SchemaDocument::parse(
            r#"
tables:
  - schema: public
    name: users
    columns:
      - { name: id, type: integer }
      - { name: name, type: text }
      - { name: score, type: numeric }
"#,
        )
        .unwrap()
        .resolve()
        .unwrap();
        schema.get_table("users").unwrap().clone()
    }

    fn row(id: &str, name: Option<&str>, score: &str) -> Vec<Option<String>> {
        vec![Some(id.to_string()), name.map(str::to_string), Some(score.to_string())]
    }

    fn eval(predicate: &str, r: &[Option<String>]) -> bool {
        Predicate::parse(predicate, &table()).unwrap().matches(r)
    }

    #[test]
    fn test_numeric_comparison() {
        let r = row("10", Some("ann"), "2.5");
        assert!(eval("id = 10", &r));
        assert!(eval("id > 9", &r));
        assert!(eval("score <= 2.50", &r));
        assert!(!eval("id < 9", &r));
    }

    #[test]
    fn test_boolean_connectives_and_in() {
        let r = row("3", Some("bob"), "1");
        assert!(eval("id IN (1, 2, 3) AND name = 'bob'", &r));
        assert!(eval("NOT (id = 1) OR false", &r));
        assert!(eval("id NOT IN (4, 5)", &r));
        assert!(eval("TRUE", &r));
    }

    #[test]
    fn test_null_semantics() {
        let r = row("3", None, "1");
        assert!(eval("name IS NULL", &r));
        assert!(!eval("name = 'x'", &r));
        assert!(!eval("NOT (name = 'x')", &r));
        assert!(eval("name IS NULL OR name = 'x'", &r));
    }

    #[test]
    fn test_errors() {
        let t = table();
        let err = Predicate::parse("missing = 1", &t).unwrap_err();
        assert_eq!(err.code.as_deref(), Some(UNDEFINED_COLUMN));
        let err = Predicate::parse("id = ", &t).unwrap_err();
        assert_eq!(err.code.as_deref(), Some(SYNTAX_ERROR));
        assert!(Predicate::parse("id = 1 extra", &t).is_err());
    }
}
