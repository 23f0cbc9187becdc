//! PDF Lexer
//!
//! Tokenizes PDF syntax according to ISO 32000-1 Section 7.2 and builds
//! direct values (arrays, dictionaries, references) from the token stream.

use super::device::InputDevice;
use super::stack_safe::StackSafeContext;
use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, Object, ObjectId, PdfString};
use std::io::SeekFrom;

/// PDF Token types
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Integer number
    Integer(i64),

    /// Real number
    Real(f64),

    /// String (literal or hexadecimal)
    String(PdfString),

    /// Name object without the leading slash
    Name(String),

    /// Left square bracket [
    ArrayStart,

    /// Right square bracket ]
    ArrayEnd,

    /// Dictionary start <<
    DictStart,

    /// Dictionary end >>
    DictEnd,

    /// Any bare word: obj, endobj, stream, xref, trailer, R, true, null...
    Keyword(String),
}

impl Token {
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Keyword(k) if k == keyword)
    }
}

pub(crate) fn is_whitespace(ch: u8) -> bool {
    matches!(ch, b' ' | b'\t' | b'\n' | b'\r' | b'\x0C' | b'\0')
}

pub(crate) fn is_delimiter(ch: u8) -> bool {
    matches!(
        ch,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

/// Tokenizer over an [`InputDevice`]. Holds no lookahead of its own, so
/// callers may seek the device freely between calls.
#[derive(Debug, Default)]
pub struct Tokenizer {
    context: StackSafeContext,
}

impl Tokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            context: StackSafeContext::with_limit(max_depth),
        }
    }

    /// Read the next token, or `None` at end of input
    pub fn try_read_next_token(&mut self, device: &mut dyn InputDevice) -> Result<Option<Token>> {
        skip_whitespace_and_comments(device)?;

        let ch = match device.peek()? {
            Some(ch) => ch,
            None => return Ok(None),
        };

        let token = match ch {
            b'/' => read_name(device)?,
            b'(' => read_literal_string(device)?,
            b'<' => {
                device.read_byte()?;
                if device.peek()? == Some(b'<') {
                    device.read_byte()?;
                    Token::DictStart
                } else {
                    read_hex_string(device)?
                }
            }
            b'>' => {
                device.read_byte()?;
                if device.peek()? == Some(b'>') {
                    device.read_byte()?;
                    Token::DictEnd
                } else {
                    return Err(PdfError::syntax(
                        device.position(),
                        "Expected '>' after '>'",
                    ));
                }
            }
            b'[' => {
                device.read_byte()?;
                Token::ArrayStart
            }
            b']' => {
                device.read_byte()?;
                Token::ArrayEnd
            }
            b'{' | b'}' => {
                device.read_byte()?;
                Token::Keyword((ch as char).to_string())
            }
            b')' => {
                return Err(PdfError::syntax(
                    device.position(),
                    "Unbalanced ')' outside string",
                ))
            }
            b'+' | b'-' | b'.' | b'0'..=b'9' => read_number(device)?,
            _ => Token::Keyword(read_word(device)?),
        };
        Ok(Some(token))
    }

    /// Read the next token, failing at end of input
    pub fn read_next_token(&mut self, device: &mut dyn InputDevice) -> Result<Token> {
        self.try_read_next_token(device)?
            .ok_or_else(|| PdfError::syntax(device.position(), "Unexpected end of file"))
    }

    /// Look at the next token without consuming it
    pub fn try_peek_next_token(&mut self, device: &mut dyn InputDevice) -> Result<Option<Token>> {
        let start = device.position();
        let token = self.try_read_next_token(device);
        device.seek(SeekFrom::Start(start))?;
        token
    }

    /// Read a token that must be an integer
    pub fn read_next_number(&mut self, device: &mut dyn InputDevice) -> Result<i64> {
        match self.try_read_next_token(device)? {
            Some(Token::Integer(n)) => Ok(n),
            Some(other) => Err(PdfError::syntax(
                device.position(),
                format!("Expected number, found {other:?}"),
            )),
            None => Err(PdfError::syntax(device.position(), "Expected number, found EOF")),
        }
    }

    /// Read one complete direct value
    pub fn read_next_value(&mut self, device: &mut dyn InputDevice) -> Result<Object> {
        let token = self.read_next_token(device)?;
        self.read_value_from(token, device)
    }

    /// Build a value whose first token has already been read
    pub fn read_value_from(&mut self, token: Token, device: &mut dyn InputDevice) -> Result<Object> {
        self.context.enter()?;
        let value = self.build_value(token, device);
        self.context.exit();
        value
    }

    fn build_value(&mut self, token: Token, device: &mut dyn InputDevice) -> Result<Object> {
        match token {
            Token::Integer(n) => self.maybe_reference(n, device),
            Token::Real(f) => Ok(Object::Real(f)),
            Token::String(s) => Ok(Object::String(s)),
            Token::Name(n) => Ok(Object::Name(n)),
            Token::ArrayStart => self.read_array(device),
            Token::DictStart => self.read_dictionary(device),
            Token::Keyword(k) => match k.as_str() {
                "true" => Ok(Object::Boolean(true)),
                "false" => Ok(Object::Boolean(false)),
                "null" => Ok(Object::Null),
                _ => Err(PdfError::syntax(
                    device.position(),
                    format!("Unexpected keyword '{k}' where a value was expected"),
                )),
            },
            Token::ArrayEnd | Token::DictEnd => Err(PdfError::syntax(
                device.position(),
                format!("Unexpected {token:?} where a value was expected"),
            )),
        }
    }

    /// `N G R` is a reference; anything else leaves the cursor right
    /// after `N`.
    fn maybe_reference(&mut self, number: i64, device: &mut dyn InputDevice) -> Result<Object> {
        let after_first = device.position();
        if (0..=u32::MAX as i64).contains(&number) {
            if let Ok(Some(Token::Integer(generation))) = self.try_read_next_token(device) {
                if (0..=u16::MAX as i64).contains(&generation) {
                    if let Ok(Some(token)) = self.try_read_next_token(device) {
                        if token.is_keyword("R") {
                            return Ok(Object::Reference(ObjectId::new(
                                number as u32,
                                generation as u16,
                            )));
                        }
                    }
                }
            }
        }
        device.seek(SeekFrom::Start(after_first))?;
        Ok(Object::Integer(number))
    }

    fn read_array(&mut self, device: &mut dyn InputDevice) -> Result<Object> {
        let mut items = Vec::new();
        loop {
            let token = self.read_next_token(device)?;
            if token == Token::ArrayEnd {
                break;
            }
            items.push(self.read_value_from(token, device)?);
        }
        Ok(Object::Array(items))
    }

    fn read_dictionary(&mut self, device: &mut dyn InputDevice) -> Result<Object> {
        let mut dict = Dictionary::new();
        loop {
            let key = match self.read_next_token(device)? {
                Token::DictEnd => break,
                Token::Name(key) => key,
                other => {
                    return Err(PdfError::syntax(
                        device.position(),
                        format!("Expected name as dictionary key, found {other:?}"),
                    ))
                }
            };

            let token = self.read_next_token(device)?;
            if token == Token::DictEnd {
                // "/Key >>" with the value missing
                dict.set(key, Object::Null);
                break;
            }
            let value = self.read_value_from(token, device)?;
            dict.set(key, value);
        }
        Ok(Object::Dictionary(dict))
    }
}

/// Skip whitespace and `%` comments
pub fn skip_whitespace_and_comments(device: &mut dyn InputDevice) -> Result<()> {
    while let Some(ch) = device.peek()? {
        if is_whitespace(ch) {
            device.read_byte()?;
        } else if ch == b'%' {
            while let Some(ch) = device.peek()? {
                if ch == b'\n' || ch == b'\r' {
                    break;
                }
                device.read_byte()?;
            }
        } else {
            break;
        }
    }
    Ok(())
}

/// Read a word (sequence of non-delimiter characters)
fn read_word(device: &mut dyn InputDevice) -> Result<String> {
    let mut word = String::new();
    while let Some(ch) = device.peek()? {
        if is_whitespace(ch) || is_delimiter(ch) {
            break;
        }
        device.read_byte()?;
        word.push(ch as char);
    }
    Ok(word)
}

fn hex_value(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        _ => None,
    }
}

/// Read a name object (e.g., /Type); `#xx` escapes are decoded
fn read_name(device: &mut dyn InputDevice) -> Result<Token> {
    device.read_byte()?; // consume '/'
    let mut name = String::new();

    while let Some(ch) = device.peek()? {
        if is_whitespace(ch) || is_delimiter(ch) {
            break;
        }
        device.read_byte()?;

        if ch == b'#' {
            let hi = device.read_byte()?.and_then(hex_value);
            let lo = device.read_byte()?.and_then(hex_value);
            match (hi, lo) {
                (Some(hi), Some(lo)) => name.push(((hi << 4) | lo) as char),
                _ => {
                    return Err(PdfError::syntax(
                        device.position(),
                        "Invalid hex code in name",
                    ))
                }
            }
        } else {
            name.push(ch as char);
        }
    }

    Ok(Token::Name(name))
}

/// Read a literal string (parentheses)
fn read_literal_string(device: &mut dyn InputDevice) -> Result<Token> {
    device.read_byte()?; // consume '('
    let mut string = Vec::new();
    let mut paren_depth = 1;

    while paren_depth > 0 {
        let ch = device
            .read_byte()?
            .ok_or_else(|| PdfError::syntax(device.position(), "Unterminated string"))?;

        match ch {
            b'\\' => {
                let esc = device
                    .read_byte()?
                    .ok_or_else(|| PdfError::syntax(device.position(), "Unterminated string"))?;
                match esc {
                    b'n' => string.push(b'\n'),
                    b'r' => string.push(b'\r'),
                    b't' => string.push(b'\t'),
                    b'b' => string.push(b'\x08'),
                    b'f' => string.push(b'\x0C'),
                    b'0'..=b'7' => {
                        let mut value = u32::from(esc - b'0');
                        for _ in 0..2 {
                            match device.peek()? {
                                Some(next @ b'0'..=b'7') => {
                                    device.read_byte()?;
                                    value = value * 8 + u32::from(next - b'0');
                                }
                                _ => break,
                            }
                        }
                        string.push(value as u8);
                    }
                    // line continuation
                    b'\r' => {
                        if device.peek()? == Some(b'\n') {
                            device.read_byte()?;
                        }
                    }
                    b'\n' => {}
                    other => string.push(other),
                }
            }
            b'(' => {
                paren_depth += 1;
                string.push(ch);
            }
            b')' => {
                paren_depth -= 1;
                if paren_depth > 0 {
                    string.push(ch);
                }
            }
            _ => string.push(ch),
        }
    }

    Ok(Token::String(PdfString::new(string)))
}

/// Read a hex string; the opening '<' is already consumed
fn read_hex_string(device: &mut dyn InputDevice) -> Result<Token> {
    let mut bytes = Vec::new();
    let mut pending: Option<u8> = None;

    loop {
        let ch = device
            .read_byte()?
            .ok_or_else(|| PdfError::syntax(device.position(), "Unterminated hex string"))?;
        if ch == b'>' {
            break;
        }
        if is_whitespace(ch) {
            continue;
        }
        let digit = hex_value(ch).ok_or_else(|| {
            PdfError::syntax(device.position(), "Invalid character in hex string")
        })?;
        match pending.take() {
            Some(hi) => bytes.push((hi << 4) | digit),
            None => pending = Some(digit),
        }
    }

    // Pad with 0 if odd number of digits
    if let Some(hi) = pending {
        bytes.push(hi << 4);
    }

    Ok(Token::String(PdfString::hex(bytes)))
}

/// Read a number (integer or real)
fn read_number(device: &mut dyn InputDevice) -> Result<Token> {
    let start = device.position();
    let mut number_str = String::new();
    let mut has_dot = false;

    if let Some(ch @ (b'+' | b'-')) = device.peek()? {
        device.read_byte()?;
        number_str.push(ch as char);
        // tolerate doubled signs such as "--5"
        while let Some(b'+' | b'-') = device.peek()? {
            device.read_byte()?;
        }
    }

    while let Some(ch) = device.peek()? {
        match ch {
            b'0'..=b'9' => {
                device.read_byte()?;
                number_str.push(ch as char);
            }
            b'.' if !has_dot => {
                device.read_byte()?;
                number_str.push('.');
                has_dot = true;
            }
            _ => break,
        }
    }

    let digits = number_str.trim_start_matches(['+', '-']);
    if digits.is_empty() || digits == "." {
        // a lone sign or dot reads as zero
        return Ok(Token::Integer(0));
    }

    if has_dot {
        let value = number_str
            .parse::<f64>()
            .map_err(|_| PdfError::syntax(start, format!("Invalid real number: '{number_str}'")))?;
        Ok(Token::Real(value))
    } else {
        number_str
            .parse::<i64>()
            .map(Token::Integer)
            .map_err(|_| PdfError::syntax(start, format!("Invalid integer: '{number_str}'")))
    }
}
