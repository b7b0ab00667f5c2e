//! Type expressions used in layout files.
//!
//! ```text
//! type  := name | name '<' arg (',' arg)* '>'
//! arg   := type | integer
//! ```
//!
//! Bare names that are not primitives are parsed as records and later
//! reclassified as enumerations or bitfields when the file declares them.

use std::collections::HashSet;
use std::str::FromStr;

use super::types::{Primitive, TypeDesc};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Ident(&'a str),
    Number(usize),
    Open,
    Close,
    Comma,
}

fn tokenize(text: &str) -> Result<Vec<Token<'_>>, String> {
    let mut tokens = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' => i += 1,
            b'<' => {
                tokens.push(Token::Open);
                i += 1;
            }
            b'>' => {
                tokens.push(Token::Close);
                i += 1;
            }
            b',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            b'0'..=b'9' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_alphanumeric() {
                    i += 1;
                }
                let token = &text[start..i];
                let value = match token.strip_prefix("0x") {
                    Some(hex) => usize::from_str_radix(hex, 16),
                    None => token.parse(),
                }
                .map_err(|e| format!("invalid number '{}': {}", token, e))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b':')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(&text[start..i]));
            }
            other => return Err(format!("unexpected character '{}'", other as char)),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn next(&mut self) -> Option<Token<'a>> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn expect(&mut self, expected: Token<'a>) -> Result<(), String> {
        match self.next() {
            Some(ref t) if *t == expected => Ok(()),
            Some(t) => Err(format!("expected {:?}, found {:?}", expected, t)),
            None => Err(format!("expected {:?}, found end of input", expected)),
        }
    }

    fn ty(&mut self) -> Result<TypeDesc, String> {
        let name = match self.next() {
            Some(Token::Ident(name)) => name,
            Some(t) => return Err(format!("expected a type name, found {:?}", t)),
            None => return Err("expected a type name, found end of input".to_string()),
        };

        let args = if self.peek() == Some(&Token::Open) {
            self.pos += 1;
            let mut args = vec![self.arg()?];
            while self.peek() == Some(&Token::Comma) {
                self.pos += 1;
                args.push(self.arg()?);
            }
            self.expect(Token::Close)?;
            args
        } else {
            Vec::new()
        };

        build(name, args)
    }

    fn arg(&mut self) -> Result<Arg, String> {
        match self.peek() {
            Some(Token::Number(n)) => {
                let n = *n;
                self.pos += 1;
                Ok(Arg::Number(n))
            }
            _ => self.ty().map(Arg::Type),
        }
    }
}

enum Arg {
    Type(TypeDesc),
    Number(usize),
}

fn build(name: &str, args: Vec<Arg>) -> Result<TypeDesc, String> {
    let mut args = args.into_iter();
    let mut next_type = |what: &str| match args.next() {
        Some(Arg::Type(t)) => Ok(Box::new(t)),
        Some(Arg::Number(n)) => Err(format!("{}: expected a type, found {}", what, n)),
        None => Err(format!("{}: missing type argument", what)),
    };

    let ty = match name {
        "pointer" => TypeDesc::Pointer(next_type(name)?),
        "shared" => TypeDesc::Shared(next_type(name)?),
        "weak" => TypeDesc::Weak(next_type(name)?),
        "vector" => TypeDesc::Vector(next_type(name)?),
        "map" => {
            let key = next_type(name)?;
            let value = next_type(name)?;
            TypeDesc::Map { key, value }
        }
        "array" => {
            let elem = next_type(name)?;
            let len = match args.next() {
                Some(Arg::Number(n)) => n,
                _ => return Err("array: missing extent".to_string()),
            };
            TypeDesc::Array { elem, len }
        }
        // The index enumeration is informational; the host decides indexing.
        "flags" => {
            args.next();
            TypeDesc::Flags
        }
        other => {
            if args.next().is_some() {
                return Err(format!("'{}' takes no type arguments", other));
            }
            match Primitive::from_str(other) {
                Ok(p) => TypeDesc::Primitive(p),
                Err(_) => TypeDesc::Record(other.to_string()),
            }
        }
    };

    if args.next().is_some() {
        return Err(format!("too many arguments to '{}'", name));
    }
    Ok(ty)
}

/// Parse a type expression.
pub fn parse_type(text: &str) -> Result<TypeDesc, String> {
    let mut parser = Parser {
        tokens: tokenize(text)?,
        pos: 0,
    };
    let ty = parser.ty()?;
    if parser.pos != parser.tokens.len() {
        return Err(format!("trailing input in type '{}'", text));
    }
    Ok(ty)
}

/// Reclassify bare names as enumerations or bitfields and check that every
/// remaining record name is declared.
pub fn classify(
    ty: TypeDesc,
    enums: &HashSet<String>,
    bitfields: &HashSet<String>,
    records: &HashSet<String>,
) -> Result<TypeDesc, String> {
    let rec = |t: Box<TypeDesc>| classify(*t, enums, bitfields, records).map(Box::new);
    Ok(match ty {
        TypeDesc::Record(name) => {
            if enums.contains(&name) {
                TypeDesc::Enum(name)
            } else if bitfields.contains(&name) {
                TypeDesc::Bitfield(name)
            } else if records.contains(&name) {
                TypeDesc::Record(name)
            } else {
                return Err(format!("unknown type '{}'", name));
            }
        }
        TypeDesc::Array { elem, len } => TypeDesc::Array {
            elem: rec(elem)?,
            len,
        },
        TypeDesc::Vector(elem) => TypeDesc::Vector(rec(elem)?),
        TypeDesc::Map { key, value } => TypeDesc::Map {
            key: rec(key)?,
            value: rec(value)?,
        },
        TypeDesc::Pointer(inner) => TypeDesc::Pointer(rec(inner)?),
        TypeDesc::Shared(inner) => TypeDesc::Shared(rec(inner)?),
        TypeDesc::Weak(inner) => TypeDesc::Weak(rec(inner)?),
        other => other,
    })
}
