//! A strict reader for the object-literal filters typed by operators.
//!
//! Filters are written the way the store's shell accepts them, for example
//! `{age: {$gt: 21}}, {sort: {age: -1}}`. The reader understands a closed set of forms and
//! produces [`Bson`] values; nothing in the input is ever evaluated.
//!
//! Accepted forms:
//!
//! - mappings with bare (`name`, `$gt`, `address.city`), quoted or numeric keys
//! - sequences, with trailing commas allowed in both
//! - single- or double-quoted strings, numbers, `true`, `false`, `null`, `undefined`
//! - `ObjectId("<hex>")`, `ISODate("<date>")` and `new Date("<date>")`
//! - `/pattern/flags` regular expressions, read as `{$regex: pattern, $options: flags}`
//!
//! Every other identifier, call or operator is rejected with its byte offset.

use bson::{Bson, Document, doc, oid::ObjectId};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use thiserror::Error;

use crate::error::DocumentStoreError;

/// Maximum nesting of mappings and sequences.
pub const MAX_DEPTH: usize = 64;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LiteralError {
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("unexpected character '{found}' at offset {offset}")]
    UnexpectedChar { found: char, offset: usize },
    #[error("'{name}' at offset {offset} is not a literal")]
    ForbiddenIdentifier { name: String, offset: usize },
    #[error("call to '{name}' at offset {offset} is not allowed")]
    ForbiddenCall { name: String, offset: usize },
    #[error("invalid number '{text}' at offset {offset}")]
    InvalidNumber { text: String, offset: usize },
    #[error("invalid escape sequence at offset {offset}")]
    InvalidEscape { offset: usize },
    #[error("unterminated string starting at offset {offset}")]
    UnterminatedString { offset: usize },
    #[error("invalid {name} argument at offset {offset}: {reason}")]
    InvalidConstructor { name: String, offset: usize, reason: String },
    #[error("invalid regular expression flags '{flags}' at offset {offset}")]
    InvalidRegexFlags { flags: String, offset: usize },
    #[error("literal nested deeper than {0} levels")]
    TooDeep(usize),
}

impl From<LiteralError> for DocumentStoreError {
    fn from(err: LiteralError) -> Self {
        DocumentStoreError::InvalidFilter(err.to_string())
    }
}

pub type LiteralResult<T> = Result<T, LiteralError>;

/// Parses a comma-separated list of literals, as if the input were wrapped in `[` and `]`.
///
/// Blank input yields an empty list.
pub fn parse_list(input: &str) -> LiteralResult<Vec<Bson>> {
    let mut parser = LiteralParser::new(input);
    let mut values = Vec::new();

    parser.skip_whitespace();
    while !parser.at_end() {
        values.push(parser.parse_value()?);
        parser.skip_whitespace();

        match parser.peek() {
            None => break,
            Some(',') => {
                parser.bump();
                parser.skip_whitespace();
            }
            Some(found) => return Err(LiteralError::UnexpectedChar { found, offset: parser.pos }),
        }
    }

    Ok(values)
}

/// Parses exactly one literal.
pub fn parse_value(input: &str) -> LiteralResult<Bson> {
    let mut parser = LiteralParser::new(input);

    parser.skip_whitespace();
    let value = parser.parse_value()?;
    parser.skip_whitespace();

    match parser.peek() {
        None => Ok(value),
        Some(found) => Err(LiteralError::UnexpectedChar { found, offset: parser.pos }),
    }
}

struct LiteralParser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> LiteralParser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0, depth: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.bump();
        }
    }

    fn expect(&mut self, expected: char) -> LiteralResult<()> {
        self.skip_whitespace();
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(found) => Err(LiteralError::UnexpectedChar {
                found,
                offset: self.pos - found.len_utf8(),
            }),
            None => Err(LiteralError::UnexpectedEnd),
        }
    }

    fn parse_value(&mut self) -> LiteralResult<Bson> {
        self.skip_whitespace();

        match self.peek() {
            None => Err(LiteralError::UnexpectedEnd),
            Some('{') => self.nested(|p| p.parse_mapping().map(Bson::Document)),
            Some('[') => self.nested(|p| p.parse_sequence().map(Bson::Array)),
            Some('"') | Some('\'') => self.parse_string().map(Bson::String),
            Some('/') => self.parse_regex(),
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => self.parse_number(),
            Some(c) if is_identifier_start(c) => self.parse_word(),
            Some(found) => Err(LiteralError::UnexpectedChar { found, offset: self.pos }),
        }
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> LiteralResult<T>) -> LiteralResult<T> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(LiteralError::TooDeep(MAX_DEPTH));
        }

        let result = f(self);
        self.depth -= 1;
        result
    }

    fn parse_mapping(&mut self) -> LiteralResult<Document> {
        self.expect('{')?;
        let mut document = Document::new();

        loop {
            self.skip_whitespace();
            if self.peek() == Some('}') {
                self.bump();
                return Ok(document);
            }

            let key = self.parse_key()?;
            self.expect(':')?;
            let value = self.parse_value()?;
            document.insert(key, value);

            self.skip_whitespace();
            match self.bump() {
                Some(',') => continue,
                Some('}') => return Ok(document),
                Some(found) => {
                    return Err(LiteralError::UnexpectedChar {
                        found,
                        offset: self.pos - found.len_utf8(),
                    });
                }
                None => return Err(LiteralError::UnexpectedEnd),
            }
        }
    }

    fn parse_sequence(&mut self) -> LiteralResult<Vec<Bson>> {
        self.expect('[')?;
        let mut items = Vec::new();

        loop {
            self.skip_whitespace();
            if self.peek() == Some(']') {
                self.bump();
                return Ok(items);
            }

            items.push(self.parse_value()?);

            self.skip_whitespace();
            match self.bump() {
                Some(',') => continue,
                Some(']') => return Ok(items),
                Some(found) => {
                    return Err(LiteralError::UnexpectedChar {
                        found,
                        offset: self.pos - found.len_utf8(),
                    });
                }
                None => return Err(LiteralError::UnexpectedEnd),
            }
        }
    }

    fn parse_key(&mut self) -> LiteralResult<String> {
        match self.peek() {
            Some('"') | Some('\'') => self.parse_string(),
            Some(c) if c.is_ascii_digit() => {
                let start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
                Ok(self.src[start..self.pos].to_string())
            }
            Some(c) if is_identifier_start(c) => {
                let start = self.pos;
                while self.peek().is_some_and(|c| is_identifier_part(c) || c == '.') {
                    self.bump();
                }
                Ok(self.src[start..self.pos].to_string())
            }
            Some(found) => Err(LiteralError::UnexpectedChar { found, offset: self.pos }),
            None => Err(LiteralError::UnexpectedEnd),
        }
    }

    fn parse_string(&mut self) -> LiteralResult<String> {
        let start = self.pos;
        let quote = match self.bump() {
            Some(q) => q,
            None => return Err(LiteralError::UnexpectedEnd),
        };
        let mut out = String::new();

        loop {
            let offset = self.pos;
            match self.bump() {
                None | Some('\n') | Some('\r') => return Err(LiteralError::UnterminatedString { offset: start }),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.bump() {
                    None => return Err(LiteralError::UnterminatedString { offset: start }),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('b') => out.push('\u{8}'),
                    Some('f') => out.push('\u{c}'),
                    Some('v') => out.push('\u{b}'),
                    Some('0') => out.push('\0'),
                    Some('x') => out.push(self.parse_hex_escape(2, offset)?),
                    Some('u') => out.push(self.parse_unicode_escape(offset)?),
                    Some(other) => out.push(other),
                },
                Some(c) => out.push(c),
            }
        }
    }

    /// Reads `/pattern/flags`. Escaped slashes lose their backslash; other escapes are kept
    /// verbatim for the regex engine.
    fn parse_regex(&mut self) -> LiteralResult<Bson> {
        let start = self.pos;
        self.bump();

        if self.peek() == Some('/') {
            return Err(LiteralError::UnexpectedChar { found: '/', offset: self.pos });
        }

        let mut pattern = String::new();
        let mut in_class = false;

        loop {
            match self.bump() {
                None | Some('\n') | Some('\r') => return Err(LiteralError::UnterminatedString { offset: start }),
                Some('/') if !in_class => break,
                Some('\\') => match self.bump() {
                    None => return Err(LiteralError::UnterminatedString { offset: start }),
                    Some('/') => pattern.push('/'),
                    Some(other) => {
                        pattern.push('\\');
                        pattern.push(other);
                    }
                },
                Some(c) => {
                    match c {
                        '[' => in_class = true,
                        ']' => in_class = false,
                        _ => {}
                    }
                    pattern.push(c);
                }
            }
        }

        let flags_start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
            self.bump();
        }
        let flags = &self.src[flags_start..self.pos];

        let mut seen = Vec::new();
        for flag in flags.chars() {
            if !"imsxu".contains(flag) || seen.contains(&flag) {
                return Err(LiteralError::InvalidRegexFlags {
                    flags: flags.to_string(),
                    offset: flags_start,
                });
            }
            seen.push(flag);
        }
        seen.sort_unstable();

        Ok(Bson::Document(doc! {
            "$regex": pattern,
            "$options": seen.into_iter().collect::<String>(),
        }))
    }

    fn read_hex(&mut self, digits: usize, offset: usize) -> LiteralResult<u32> {
        let end = self.pos + digits;
        let text = self
            .src
            .get(self.pos..end)
            .ok_or(LiteralError::InvalidEscape { offset })?;
        let value = u32::from_str_radix(text, 16).map_err(|_| LiteralError::InvalidEscape { offset })?;

        self.pos = end;
        Ok(value)
    }

    fn parse_hex_escape(&mut self, digits: usize, offset: usize) -> LiteralResult<char> {
        let code = self.read_hex(digits, offset)?;
        char::from_u32(code).ok_or(LiteralError::InvalidEscape { offset })
    }

    fn parse_unicode_escape(&mut self, offset: usize) -> LiteralResult<char> {
        let high = self.read_hex(4, offset)?;

        if (0xD800..0xDC00).contains(&high) {
            if !self.src[self.pos..].starts_with("\\u") {
                return Err(LiteralError::InvalidEscape { offset });
            }
            self.pos += 2;

            let low = self.read_hex(4, offset)?;
            if !(0xDC00..0xE000).contains(&low) {
                return Err(LiteralError::InvalidEscape { offset });
            }

            let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
            return char::from_u32(code).ok_or(LiteralError::InvalidEscape { offset });
        }

        char::from_u32(high).ok_or(LiteralError::InvalidEscape { offset })
    }

    fn parse_number(&mut self) -> LiteralResult<Bson> {
        let start = self.pos;

        if matches!(self.peek(), Some('-') | Some('+')) {
            self.bump();
        }

        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => {}
                '.' => is_float = true,
                'e' | 'E' => {
                    is_float = true;
                    self.bump();
                    if matches!(self.peek(), Some('-') | Some('+')) {
                        self.bump();
                    }
                    continue;
                }
                _ => break,
            }
            self.bump();
        }

        let text = &self.src[start..self.pos];
        let invalid = || LiteralError::InvalidNumber {
            text: text.to_string(),
            offset: start,
        };

        if !text.bytes().any(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        if !is_float {
            if let Ok(value) = text.parse::<i64>() {
                return Ok(match i32::try_from(value) {
                    Ok(small) => Bson::Int32(small),
                    Err(_) => Bson::Int64(value),
                });
            }
        }

        text.trim_start_matches('+')
            .parse::<f64>()
            .map(Bson::Double)
            .map_err(|_| invalid())
    }

    fn parse_word(&mut self) -> LiteralResult<Bson> {
        let start = self.pos;
        while self.peek().is_some_and(is_identifier_part) {
            self.bump();
        }
        let word = &self.src[start..self.pos];

        match word {
            "true" => Ok(Bson::Boolean(true)),
            "false" => Ok(Bson::Boolean(false)),
            "null" | "undefined" => Ok(Bson::Null),
            "ObjectId" | "ObjectID" => {
                let (arg, offset) = self.parse_constructor_argument(word)?;
                ObjectId::parse_str(&arg)
                    .map(Bson::ObjectId)
                    .map_err(|e| LiteralError::InvalidConstructor {
                        name: word.to_string(),
                        offset,
                        reason: e.to_string(),
                    })
            }
            "ISODate" => {
                let (arg, offset) = self.parse_constructor_argument(word)?;
                parse_date(&arg, word, offset)
            }
            "new" => {
                self.skip_whitespace();
                let name_start = self.pos;
                while self.peek().is_some_and(is_identifier_part) {
                    self.bump();
                }
                let name = &self.src[name_start..self.pos];

                if name != "Date" {
                    return Err(LiteralError::ForbiddenCall {
                        name: format!("new {}", name),
                        offset: start,
                    });
                }

                let (arg, offset) = self.parse_constructor_argument("Date")?;
                parse_date(&arg, "Date", offset)
            }
            _ => {
                // Report a call if the identifier (or a dotted path) is followed by parentheses.
                while self.peek().is_some_and(|c| is_identifier_part(c) || c == '.') {
                    self.bump();
                }
                let name = self.src[start..self.pos].to_string();

                self.skip_whitespace();
                if self.peek() == Some('(') {
                    Err(LiteralError::ForbiddenCall { name, offset: start })
                } else {
                    Err(LiteralError::ForbiddenIdentifier { name, offset: start })
                }
            }
        }
    }

    fn parse_constructor_argument(&mut self, name: &str) -> LiteralResult<(String, usize)> {
        self.expect('(')?;
        self.skip_whitespace();

        let offset = self.pos;
        let arg = match self.peek() {
            Some('"') | Some('\'') => self.parse_string()?,
            _ => {
                return Err(LiteralError::InvalidConstructor {
                    name: name.to_string(),
                    offset,
                    reason: "expected a quoted string".to_string(),
                });
            }
        };

        self.expect(')')?;
        Ok((arg, offset))
    }
}

fn parse_date(text: &str, name: &str, offset: usize) -> LiteralResult<Bson> {
    let parsed = DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map(|date| date.and_time(NaiveTime::MIN).and_utc())
        })
        .map_err(|e| LiteralError::InvalidConstructor {
            name: name.to_string(),
            offset,
            reason: e.to_string(),
        })?;

    Ok(Bson::DateTime(bson::DateTime::from_chrono(parsed)))
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_identifier_part(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}
