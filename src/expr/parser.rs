use chrono::{DateTime, Utc};

use crate::core::error::{Error, ErrorKind, Result};
use crate::data::types::{Type, TypeKind};
use crate::data::value::{parse_duration_ns, Subnet, Value};
use crate::expr::ast::{Expression, MetaExtractor, Operand, Predicate, RelOp};
use crate::schema::schema::Schema;

/// Parses a query expression. When a schema is given, field extractors are
/// resolved against it and ill-typed predicates are rejected at parse time.
///
/// Grammar:
/// ```text
/// expr   := or
/// or     := and ("||" and)*
/// and    := not ("&&" not)*
/// not    := "!" not | atom
/// atom   := "(" expr ")" | pred
/// pred   := operand relop operand
/// ```
pub fn parse(input: &str, schema: Option<&Schema>) -> Result<Expression> {
    let tokens = lex(input)?;
    if tokens.is_empty() {
        return Err(parse_error("empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        schema,
    };
    let expr = parser.expr()?;
    match parser.peek() {
        None => Ok(expr),
        Some(t) => Err(parse_error(format!("trailing input at {:?}", t))),
    }
}

fn parse_error(context: impl Into<String>) -> Error {
    Error::new(ErrorKind::Parse, context)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    AndAnd,
    OrOr,
    Bang,
    Op(RelOp),
    MetaType,
    MetaField,
    TypeExtractor(String),
    Str(String),
    Pat(String),
    Word(String),
}

fn lex(input: &str) -> Result<Vec<Token>> {
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
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::AndAnd);
                    i += 2;
                } else {
                    return Err(parse_error("expected '&&'"));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::OrOr);
                    i += 2;
                } else {
                    return Err(parse_error("expected '||'"));
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(RelOp::Equal));
                    i += 2;
                } else {
                    return Err(parse_error("expected '=='"));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(RelOp::LessEqual));
                    i += 2;
                } else {
                    tokens.push(Token::Op(RelOp::Less));
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(RelOp::GreaterEqual));
                    i += 2;
                } else {
                    tokens.push(Token::Op(RelOp::Greater));
                    i += 1;
                }
            }
            '~' => {
                tokens.push(Token::Op(RelOp::Match));
                i += 1;
            }
            '!' => match chars.get(i + 1) {
                Some('=') => {
                    tokens.push(Token::Op(RelOp::NotEqual));
                    i += 2;
                }
                Some('~') => {
                    tokens.push(Token::Op(RelOp::NotMatch));
                    i += 2;
                }
                Some('i')
                    if chars.get(i + 2) == Some(&'n')
                        && !matches!(chars.get(i + 3), Some(c) if is_word_char(*c)) =>
                {
                    tokens.push(Token::Op(RelOp::NotIn));
                    i += 3;
                }
                _ => {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            },
            '#' => {
                let (word, next) = scan(&chars, i + 1, is_word_char);
                match word.as_str() {
                    "type" => tokens.push(Token::MetaType),
                    "field" => tokens.push(Token::MetaField),
                    other => {
                        return Err(parse_error(format!("unknown meta extractor #{}", other)))
                    }
                }
                i = next;
            }
            ':' => {
                // "::1"-style v6 addresses also start with a colon.
                match chars.get(i + 1) {
                    Some(c) if c.is_alphabetic() || *c == '_' => {
                        let (word, next) = scan(&chars, i + 1, is_word_char);
                        tokens.push(Token::TypeExtractor(word));
                        i = next;
                    }
                    Some(':') => {
                        let (word, next) = scan(&chars, i, is_term_char);
                        tokens.push(Token::Word(word));
                        i = next;
                    }
                    _ => return Err(parse_error("dangling ':'")),
                }
            }
            '"' => {
                let mut s = String::new();
                let mut j = i + 1;
                loop {
                    match chars.get(j) {
                        None => return Err(parse_error("unterminated string literal")),
                        Some('"') => break,
                        Some('\\') => {
                            match chars.get(j + 1) {
                                Some('"') => s.push('"'),
                                Some('\\') => s.push('\\'),
                                Some('n') => s.push('\n'),
                                Some('t') => s.push('\t'),
                                other => {
                                    return Err(parse_error(format!(
                                        "invalid escape {:?}",
                                        other
                                    )))
                                }
                            }
                            j += 2;
                        }
                        Some(c) => {
                            s.push(*c);
                            j += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
                i = j + 1;
            }
            '/' => {
                let mut p = String::new();
                let mut j = i + 1;
                loop {
                    match chars.get(j) {
                        None => return Err(parse_error("unterminated pattern literal")),
                        Some('/') => break,
                        Some('\\') if chars.get(j + 1) == Some(&'/') => {
                            p.push('/');
                            j += 2;
                        }
                        Some(c) => {
                            p.push(*c);
                            j += 1;
                        }
                    }
                }
                tokens.push(Token::Pat(p));
                i = j + 1;
            }
            c if c.is_ascii_digit() || c == '+' || c == '-' || c == '.' => {
                let (word, next) = scan(&chars, i, is_term_char);
                tokens.push(Token::Word(word));
                i = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let (mut word, mut next) = scan(&chars, i, is_word_char);
                // A hex word followed by ':' is the head of a v6 address.
                if chars.get(next) == Some(&':')
                    && word.chars().all(|c| c.is_ascii_hexdigit())
                {
                    let (rest, after) = scan(&chars, next, is_term_char);
                    word.push_str(&rest);
                    next = after;
                }
                if word == "in" {
                    tokens.push(Token::Op(RelOp::In));
                } else {
                    tokens.push(Token::Word(word));
                }
                i = next;
            }
            other => return Err(parse_error(format!("unexpected character {:?}", other))),
        }
    }
    Ok(tokens)
}

fn scan(chars: &[char], start: usize, pred: fn(char) -> bool) -> (String, usize) {
    let mut end = start;
    while end < chars.len() && pred(chars[end]) {
        end += 1;
    }
    (chars[start..end].iter().collect(), end)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

/// Characters of an unquoted value term: numbers, reals, addresses, subnets,
/// durations, and timestamps all draw from this set.
fn is_term_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '+' | '-' | '/' | '_')
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    schema: Option<&'a Schema>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<Expression> {
        let mut operands = vec![self.conjunction()?];
        while self.eat(&Token::OrOr) {
            operands.push(self.conjunction()?);
        }
        Ok(if operands.len() == 1 {
            operands.pop().unwrap()
        } else {
            Expression::Or(operands)
        })
    }

    fn conjunction(&mut self) -> Result<Expression> {
        let mut operands = vec![self.negation()?];
        while self.eat(&Token::AndAnd) {
            operands.push(self.negation()?);
        }
        Ok(if operands.len() == 1 {
            operands.pop().unwrap()
        } else {
            Expression::And(operands)
        })
    }

    fn negation(&mut self) -> Result<Expression> {
        if self.eat(&Token::Bang) {
            Ok(Expression::Not(Box::new(self.negation()?)))
        } else {
            self.atom()
        }
    }

    fn atom(&mut self) -> Result<Expression> {
        if self.eat(&Token::LParen) {
            let inner = self.expr()?;
            if !self.eat(&Token::RParen) {
                return Err(parse_error("expected ')'"));
            }
            return Ok(inner);
        }
        self.predicate()
    }

    fn predicate(&mut self) -> Result<Expression> {
        let lhs = self.operand()?;
        let op = match self.next() {
            Some(Token::Op(op)) => op,
            other => {
                return Err(parse_error(format!(
                    "expected relational operator, got {:?}",
                    other
                )))
            }
        };
        let rhs = self.operand()?;
        let pred = Predicate::new(lhs, op, rhs);
        if let Some(schema) = self.schema {
            type_check(schema, &pred)?;
        }
        Ok(Expression::Pred(pred))
    }

    fn operand(&mut self) -> Result<Operand> {
        match self.next() {
            Some(Token::MetaType) => Ok(Operand::Meta(MetaExtractor::Type)),
            Some(Token::MetaField) => Ok(Operand::Meta(MetaExtractor::Field)),
            Some(Token::TypeExtractor(name)) => Ok(Operand::Type(type_for_token(&name))),
            Some(Token::Str(s)) => Ok(Operand::Data(Value::String(s))),
            Some(Token::Pat(p)) => Ok(Operand::Data(Value::Pattern(p))),
            Some(Token::LBracket) => {
                let mut elements = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        match self.operand()? {
                            Operand::Data(value) => elements.push(value),
                            other => {
                                return Err(parse_error(format!(
                                    "list elements must be literals, got {}",
                                    other
                                )))
                            }
                        }
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                        if !self.eat(&Token::Comma) {
                            return Err(parse_error("expected ',' or ']' in list"));
                        }
                    }
                }
                Ok(Operand::Data(Value::List(elements)))
            }
            Some(Token::Word(word)) => classify_word(&word),
            other => Err(parse_error(format!("expected operand, got {:?}", other))),
        }
    }
}

/// Maps a type extractor token to its structural type. Unknown names become
/// name-only extractors matched against type names.
fn type_for_token(name: &str) -> Type {
    match name {
        "bool" => Type::bool_(),
        "int" => Type::integer(),
        "count" => Type::count(),
        "real" => Type::real(),
        "time" => Type::time(),
        "duration" => Type::duration(),
        "string" => Type::string(),
        "pattern" => Type::pattern(),
        "addr" => Type::address(),
        "subnet" => Type::subnet(),
        other => Type::none().with_name(other),
    }
}

/// Decides whether an unquoted term is a literal or a field extractor.
fn classify_word(word: &str) -> Result<Operand> {
    match word {
        "true" => return Ok(Operand::Data(Value::Bool(true))),
        "false" => return Ok(Operand::Data(Value::Bool(false))),
        "nil" => return Ok(Operand::Data(Value::Null)),
        _ => {}
    }
    let head = word.chars().next().unwrap_or('\0');
    if head.is_ascii_digit() || head == '+' || head == '-' || head == ':' || head == '.' {
        return parse_literal(word).map(Operand::Data);
    }
    // Words that parse as v6 addresses (e.g. fe80::1) take precedence over
    // field extractors; everything else with identifier shape is a field.
    if word.contains(':') {
        return parse_literal(word).map(Operand::Data);
    }
    if word
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
    {
        return Ok(Operand::Field(word.to_string()));
    }
    parse_literal(word).map(Operand::Data)
}

fn parse_literal(word: &str) -> Result<Value> {
    // Subnet: address/length.
    if let Some((addr, len)) = word.rsplit_once('/') {
        if let (Ok(addr), Ok(len)) = (addr.parse(), len.parse::<u8>()) {
            return Ok(Value::Subnet(Subnet::new(addr, len)));
        }
    }
    if let Ok(addr) = word.parse() {
        return Ok(Value::Address(addr));
    }
    // Timestamps: 2020-01-01 or full RFC 3339.
    let bytes = word.as_bytes();
    if bytes.len() >= 10 && bytes[4] == b'-' && bytes[7] == b'-' {
        if let Ok(time) = DateTime::parse_from_rfc3339(word) {
            return Ok(Value::Time(time.with_timezone(&Utc)));
        }
        let midnight = format!("{}T00:00:00Z", word);
        if let Ok(time) = DateTime::parse_from_rfc3339(&midnight) {
            return Ok(Value::Time(time.with_timezone(&Utc)));
        }
    }
    if let Some(ns) = parse_duration_ns(word) {
        return Ok(Value::Duration(ns));
    }
    if word.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(count) = word.parse() {
            return Ok(Value::Count(count));
        }
    }
    if let Some(rest) = word.strip_prefix('+').or_else(|| word.strip_prefix('-')) {
        if rest.chars().all(|c| c.is_ascii_digit()) && !rest.is_empty() {
            if let Ok(int) = word.parse() {
                return Ok(Value::Integer(int));
            }
        }
    }
    if let Ok(real) = word.parse() {
        return Ok(Value::Real(real));
    }
    Err(parse_error(format!("invalid literal {:?}", word)))
}

/// Rejects predicates that can never hold for any field the schema knows
/// about. Predicates over unknown fields pass through unchecked.
fn type_check(schema: &Schema, pred: &Predicate) -> Result<()> {
    use crate::expr::eval::fqn_ends_with;
    let (field, op, value) = match (&pred.lhs, &pred.rhs) {
        (Operand::Field(f), Operand::Data(v)) => (f, pred.op, v),
        (Operand::Data(v), Operand::Field(f)) => (f, pred.op.flip(), v),
        _ => return Ok(()),
    };
    let mut seen = false;
    for layout in schema.layouts() {
        for qf in crate::data::types::qualified_fields(layout) {
            if fqn_ends_with(&qf.fqn(), field) {
                seen = true;
                if compatible(&qf.ty, op, value) {
                    return Ok(());
                }
            }
        }
    }
    if seen {
        return Err(parse_error(format!(
            "ill-typed predicate: no field matching {:?} supports `{} {}`",
            field, op, value
        )));
    }
    Ok(())
}

fn compatible(ty: &Type, op: RelOp, value: &Value) -> bool {
    if value.is_null() {
        return true;
    }
    let numeric = |v: &Value| {
        matches!(v, Value::Integer(_) | Value::Count(_) | Value::Real(_))
    };
    let kind = ty.kind();
    match op {
        RelOp::Equal | RelOp::NotEqual | RelOp::Less | RelOp::LessEqual | RelOp::Greater
        | RelOp::GreaterEqual => match kind {
            TypeKind::Integer | TypeKind::Count | TypeKind::Real => numeric(value),
            TypeKind::Bool => matches!(value, Value::Bool(_)),
            TypeKind::Time => matches!(value, Value::Time(_)),
            TypeKind::Duration => matches!(value, Value::Duration(_)),
            TypeKind::String | TypeKind::Enumeration(_) => {
                matches!(value, Value::String(_) | Value::Enum(_))
            }
            TypeKind::Address => matches!(value, Value::Address(_)),
            TypeKind::Subnet => matches!(value, Value::Subnet(_)),
            _ => true,
        },
        RelOp::In | RelOp::NotIn => match value {
            Value::List(elements) => {
                elements.is_empty() || elements.iter().any(|e| compatible(ty, RelOp::Equal, e))
            }
            Value::Subnet(_) => matches!(kind, TypeKind::Address | TypeKind::Subnet),
            Value::String(_) => matches!(kind, TypeKind::String | TypeKind::Enumeration(_)),
            _ => false,
        },
        RelOp::Match | RelOp::NotMatch => {
            matches!(kind, TypeKind::String | TypeKind::Enumeration(_))
                && matches!(value, Value::Pattern(_))
        }
    }
}
