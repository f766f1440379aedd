//! Minimal bencode reader that keeps the byte span of every value.
//!
//! Re-encoding a parsed dictionary does not reliably reproduce the upstream
//! bytes (key order is not guaranteed to round-trip), and the info-hash must
//! be computed over the exact bytes the upstream served. The reader therefore
//! borrows from the input and records where each value started and ended.

use std::ops::Range;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BencodeError {
    #[error("unexpected end of input at byte {0}")]
    UnexpectedEof(usize),

    #[error("unexpected byte {byte:#04x} at {at}")]
    UnexpectedByte { at: usize, byte: u8 },

    #[error("invalid integer at byte {0}")]
    InvalidInt(usize),

    #[error("invalid string length at byte {0}")]
    InvalidLength(usize),

    #[error("trailing data after byte {0}")]
    TrailingData(usize),
}

#[derive(Debug, Clone)]
pub enum Node<'a> {
    Int(i64),
    Bytes(&'a [u8]),
    List(Vec<Value<'a>>),
    /// Key/value pairs in upstream order.
    Dict(Vec<(&'a [u8], Value<'a>)>),
}

/// A decoded value plus the input range it was decoded from.
#[derive(Debug, Clone)]
pub struct Value<'a> {
    pub node: Node<'a>,
    pub span: Range<usize>,
}

impl<'a> Value<'a> {
    pub fn as_int(&self) -> Option<i64> {
        match self.node {
            Node::Int(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match self.node {
            Node::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_list(&self) -> Option<&[Value<'a>]> {
        match &self.node {
            Node::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value<'a>> {
        match &self.node {
            Node::Dict(pairs) => pairs
                .iter()
                .find(|(k, _)| *k == key.as_bytes())
                .map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn is_dict(&self) -> bool {
        matches!(self.node, Node::Dict(_))
    }
}

/// Parse a complete bencoded document; trailing bytes are an error.
pub fn parse(data: &[u8]) -> Result<Value<'_>, BencodeError> {
    let mut pos = 0;
    let value = parse_value(data, &mut pos)?;
    if pos != data.len() {
        return Err(BencodeError::TrailingData(pos));
    }
    Ok(value)
}

fn parse_value<'a>(data: &'a [u8], pos: &mut usize) -> Result<Value<'a>, BencodeError> {
    let start = *pos;
    let &first = data.get(*pos).ok_or(BencodeError::UnexpectedEof(*pos))?;
    let node = match first {
        b'i' => {
            *pos += 1;
            Node::Int(parse_int(data, pos, b'e')?)
        }
        b'0'..=b'9' => Node::Bytes(parse_bytes(data, pos)?),
        b'l' => {
            *pos += 1;
            let mut items = Vec::new();
            while peek(data, *pos)? != b'e' {
                items.push(parse_value(data, pos)?);
            }
            *pos += 1;
            Node::List(items)
        }
        b'd' => {
            *pos += 1;
            let mut pairs = Vec::new();
            while peek(data, *pos)? != b'e' {
                let key = parse_bytes(data, pos)?;
                let value = parse_value(data, pos)?;
                pairs.push((key, value));
            }
            *pos += 1;
            Node::Dict(pairs)
        }
        byte => return Err(BencodeError::UnexpectedByte { at: *pos, byte }),
    };
    Ok(Value {
        node,
        span: start..*pos,
    })
}

fn peek(data: &[u8], pos: usize) -> Result<u8, BencodeError> {
    data.get(pos).copied().ok_or(BencodeError::UnexpectedEof(pos))
}

fn parse_int(data: &[u8], pos: &mut usize, terminator: u8) -> Result<i64, BencodeError> {
    let start = *pos;
    let mut end = *pos;
    while end < data.len() && data[end] != terminator {
        end += 1;
    }
    if end == data.len() {
        return Err(BencodeError::UnexpectedEof(end));
    }
    let digits =
        std::str::from_utf8(&data[start..end]).map_err(|_| BencodeError::InvalidInt(start))?;
    let n: i64 = digits.parse().map_err(|_| BencodeError::InvalidInt(start))?;
    *pos = end + 1;
    Ok(n)
}

fn parse_bytes<'a>(data: &'a [u8], pos: &mut usize) -> Result<&'a [u8], BencodeError> {
    let start = *pos;
    let len = parse_int(data, pos, b':')?;
    if len < 0 {
        return Err(BencodeError::InvalidLength(start));
    }
    let len = len as usize;
    let end = *pos + len;
    if end > data.len() {
        return Err(BencodeError::UnexpectedEof(data.len()));
    }
    let bytes = &data[*pos..end];
    *pos = end;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int() {
        let value = parse(b"i-42e").unwrap();
        assert_eq!(value.as_int(), Some(-42));
        assert_eq!(value.span, 0..5);
    }

    #[test]
    fn test_parse_bytes() {
        let value = parse(b"4:spam").unwrap();
        assert_eq!(value.as_bytes(), Some(&b"spam"[..]));
    }

    #[test]
    fn test_parse_nested_dict_spans() {
        // The info sub-dict span must cover exactly its own bytes.
        let data = b"d3:fooi1e4:infod4:name1:Aee";
        let value = parse(data).unwrap();
        let info = value.get("info").unwrap();
        assert!(info.is_dict());
        assert_eq!(&data[info.span.clone()], b"d4:name1:Ae");
        assert_eq!(info.get("name").unwrap().as_str(), Some("A"));
    }

    #[test]
    fn test_parse_list() {
        let value = parse(b"l1:a1:bi3ee").unwrap();
        let items = value.as_list().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[2].as_int(), Some(3));
    }

    #[test]
    fn test_trailing_data_rejected() {
        assert!(matches!(
            parse(b"i1ejunk"),
            Err(BencodeError::TrailingData(3))
        ));
    }

    #[test]
    fn test_truncated_input() {
        assert!(matches!(
            parse(b"d4:name"),
            Err(BencodeError::UnexpectedEof(_))
        ));
    }

    #[test]
    fn test_not_bencode() {
        assert!(matches!(
            parse(b"<html></html>"),
            Err(BencodeError::UnexpectedByte { at: 0, .. })
        ));
    }
}
