//! Concrete wire formats: a sequence of typed tokens, written and parsed in the
//! familiar struct-format notation (`"3f"`, `"12s"`, `"2H"`, `"v"`).
//!
//! A format never carries its byte order; that is resolved per record and passed
//! alongside it. Variable-width integer codes (`v`, `V`) only get a size once a
//! `long_varints` flag is known.

use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::{
    byte_order::ByteOrder,
    errors::{Error, Result},
};

/// A single wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    /// Signed integer of 4 or 8 bytes, decided by `long_varints`.
    VarInt,
    /// Unsigned integer of 4 or 8 bytes, decided by `long_varints`.
    VarUInt,
    /// Raw byte string; the token count is its byte length.
    Bytes,
}

impl Code {
    pub fn as_char(self) -> char {
        match self {
            Code::Bool => '?',
            Code::U8 => 'B',
            Code::I8 => 'b',
            Code::U16 => 'H',
            Code::I16 => 'h',
            Code::U32 => 'I',
            Code::I32 => 'i',
            Code::U64 => 'Q',
            Code::I64 => 'q',
            Code::F32 => 'f',
            Code::F64 => 'd',
            Code::VarInt => 'v',
            Code::VarUInt => 'V',
            Code::Bytes => 's',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        let code = match c {
            '?' => Code::Bool,
            'B' => Code::U8,
            'b' => Code::I8,
            'H' => Code::U16,
            'h' => Code::I16,
            'I' => Code::U32,
            'i' => Code::I32,
            'Q' => Code::U64,
            'q' => Code::I64,
            'f' => Code::F32,
            'd' => Code::F64,
            'v' => Code::VarInt,
            'V' => Code::VarUInt,
            's' => Code::Bytes,
            _ => return None,
        };
        Some(code)
    }

    /// Replaces varint codes with their concrete 4- or 8-byte code.
    pub fn resolve(self, long_varints: Option<bool>) -> Result<Code> {
        match (self, long_varints) {
            (Code::VarInt, Some(true)) => Ok(Code::I64),
            (Code::VarInt, Some(false)) => Ok(Code::I32),
            (Code::VarUInt, Some(true)) => Ok(Code::U64),
            (Code::VarUInt, Some(false)) => Ok(Code::U32),
            (Code::VarInt | Code::VarUInt, None) => Err(Error::UnresolvedVarintWidth),
            (code, _) => Ok(code),
        }
    }

    /// Size of one value in bytes. `None` for varints and byte strings.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Code::Bool | Code::U8 | Code::I8 => Some(1),
            Code::U16 | Code::I16 => Some(2),
            Code::U32 | Code::I32 | Code::F32 => Some(4),
            Code::U64 | Code::I64 | Code::F64 => Some(8),
            Code::VarInt | Code::VarUInt | Code::Bytes => None,
        }
    }

    pub fn is_unsigned_int(self) -> bool {
        matches!(
            self,
            Code::U8 | Code::U16 | Code::U32 | Code::U64 | Code::VarUInt
        )
    }

    pub fn is_signed_int(self) -> bool {
        matches!(
            self,
            Code::I8 | Code::I16 | Code::I32 | Code::I64 | Code::VarInt
        )
    }

    pub fn is_varint(self) -> bool {
        matches!(self, Code::VarInt | Code::VarUInt)
    }
}

/// A code with a repeat count. `4s` is one 4-byte string, `3f` is three floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token {
    pub code: Code,
    pub count: usize,
}

impl Token {
    pub fn new(code: Code, count: usize) -> Self {
        Token { code, count }
    }

    pub fn one(code: Code) -> Self {
        Token { code, count: 1 }
    }

    pub fn bytes(len: usize) -> Self {
        Token {
            code: Code::Bytes,
            count: len,
        }
    }

    /// Number of values this token packs or unpacks.
    pub fn value_count(self) -> usize {
        if self.code == Code::Bytes {
            1
        } else {
            self.count
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count == 1 && self.code != Code::Bytes {
            write!(f, "{}", self.code.as_char())
        } else {
            write!(f, "{}{}", self.count, self.code.as_char())
        }
    }
}

/// Format text that could not be parsed into tokens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid format `{0}`")]
pub struct ParseFormatError(pub String);

/// Ordered list of tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Format {
    tokens: Vec<Token>,
}

impl Format {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn push(&mut self, token: Token) {
        self.tokens.push(token);
    }

    pub fn extend(&mut self, other: &Format) {
        self.tokens.extend_from_slice(&other.tokens);
    }

    pub fn value_count(&self) -> usize {
        self.tokens.iter().map(|t| t.value_count()).sum()
    }

    pub fn has_varints(&self) -> bool {
        self.tokens.iter().any(|t| t.code.is_varint())
    }

    /// Replicates this format `times` times. A single scalar token is widened
    /// (`f` x 3 = `3f`); anything else is concatenated.
    pub fn repeat(&self, times: usize) -> Format {
        match self.tokens.as_slice() {
            [token] if token.code != Code::Bytes => Format {
                tokens: vec![Token::new(token.code, token.count.saturating_mul(times))],
            },
            _ => Format {
                tokens: (0..times)
                    .flat_map(|_| self.tokens.iter().copied())
                    .collect(),
            },
        }
    }

    /// Copy with every varint token replaced by its concrete code.
    pub fn resolve(&self, long_varints: Option<bool>) -> Result<Format> {
        let tokens = self
            .tokens
            .iter()
            .map(|t| Ok(Token::new(t.code.resolve(long_varints)?, t.count)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Format { tokens })
    }

    /// Parses format text that may start with a byte order marker (`"<2H"`).
    pub fn parse_with_order(s: &str) -> Result<(Option<ByteOrder>, Format), ParseFormatError> {
        let trimmed = s.trim_start();
        let mut chars = trimmed.chars();
        match chars.next().and_then(ByteOrder::from_marker) {
            Some(order) => Ok((Some(order), chars.as_str().parse()?)),
            None => Ok((None, trimmed.parse()?)),
        }
    }

    /// Total byte size under `order`. Fails on varints without a width flag.
    pub fn size(&self, order: ByteOrder, long_varints: Option<bool>) -> Result<usize> {
        let overflow = || ParseFormatError(self.to_string());
        let mut offset: usize = 0;

        for token in &self.tokens {
            let code = token.code.resolve(long_varints)?;
            let len = match code.fixed_size() {
                None => token.count,
                Some(size) => {
                    if order.is_aligned() && token.count > 0 {
                        offset = offset
                            .checked_next_multiple_of(size)
                            .ok_or_else(overflow)?;
                    }
                    size.checked_mul(token.count).ok_or_else(overflow)?
                }
            };
            offset = offset.checked_add(len).ok_or_else(overflow)?;
        }

        Ok(offset)
    }
}

impl From<Vec<Token>> for Format {
    fn from(tokens: Vec<Token>) -> Self {
        Format { tokens }
    }
}

impl From<Token> for Format {
    fn from(token: Token) -> Self {
        Format {
            tokens: vec![token],
        }
    }
}

impl FromStr for Format {
    type Err = ParseFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tokens = Vec::new();
        let mut count: Option<usize> = None;

        for c in s.chars() {
            if c.is_whitespace() {
                continue;
            }

            if let Some(digit) = c.to_digit(10) {
                let current = count.unwrap_or(0);
                count = Some(
                    current
                        .checked_mul(10)
                        .and_then(|n| n.checked_add(digit as usize))
                        .ok_or_else(|| ParseFormatError(s.to_string()))?,
                );
                continue;
            }

            let code = Code::from_char(c).ok_or_else(|| ParseFormatError(s.to_string()))?;
            tokens.push(Token::new(code, count.take().unwrap_or(1)));
        }

        if count.is_some() {
            return Err(ParseFormatError(s.to_string()));
        }

        Ok(Format { tokens })
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in &self.tokens {
            write!(f, "{token}")?;
        }
        Ok(())
    }
}

pub(crate) fn align_up(offset: usize, alignment: usize) -> usize {
    match offset % alignment {
        0 => offset,
        rem => offset + alignment - rem,
    }
}
