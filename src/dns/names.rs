//! Textual domain name handling
//!
//! Names travel through the crate in presentation form without the trailing
//! root dot, so `example.com` rather than `example.com.`, and the root zone is
//! the empty string. Labels may contain `\.`, `\\` and `\DDD` escapes.

use derive_more::{Display, Error};

pub const MAX_LABEL_LEN: usize = 63;
pub const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum NameError {
    #[display(fmt = "empty label in name {:?}", _0)]
    #[error(ignore)]
    EmptyLabel(String),
    #[display(fmt = "label longer than 63 octets in {:?}", _0)]
    #[error(ignore)]
    LabelTooLong(String),
    #[display(fmt = "name longer than 255 octets: {:?}", _0)]
    #[error(ignore)]
    NameTooLong(String),
    #[display(fmt = "invalid escape sequence in {:?}", _0)]
    #[error(ignore)]
    BadEscape(String),
}

type Result<T> = std::result::Result<T, NameError>;

/// Malformed backslash escape in presentation text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum EscapeError {
    #[display(fmt = "escape \\{} out of range", _0)]
    OutOfRange(u32),
    #[display(fmt = "dangling escape")]
    Dangling,
}

/// Decodes a `\X` or `\DDD` escape given the bytes after the backslash
///
/// Returns the octet and how many bytes after the backslash it used.
pub fn decode_escape(rest: &[u8]) -> std::result::Result<(u8, usize), EscapeError> {
    if rest.len() >= 3 && rest[..3].iter().all(|b| b.is_ascii_digit()) {
        let value = (rest[0] - b'0') as u32 * 100
            + (rest[1] - b'0') as u32 * 10
            + (rest[2] - b'0') as u32;
        if value > 255 {
            return Err(EscapeError::OutOfRange(value));
        }
        return Ok((value as u8, 3));
    }

    match rest.first() {
        Some(b) => Ok((*b, 1)),
        None => Err(EscapeError::Dangling),
    }
}

/// Returns true if the presentation name ends in an unescaped dot
pub fn is_absolute(text: &str) -> bool {
    if !text.ends_with('.') {
        return false;
    }

    let backslashes = text[..text.len() - 1]
        .bytes()
        .rev()
        .take_while(|b| *b == b'\\')
        .count();

    backslashes % 2 == 0
}

/// Splits a presentation name into raw label octets
pub fn split_labels(text: &str) -> Result<Vec<Vec<u8>>> {
    let mut labels = Vec::new();
    if text.is_empty() || text == "." {
        return Ok(labels);
    }

    let bytes = text.as_bytes();
    let mut label = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                let (octet, used) = decode_escape(&bytes[i + 1..])
                    .map_err(|_| NameError::BadEscape(text.to_string()))?;
                label.push(octet);
                i += 1 + used;
            }
            b'.' => {
                if label.is_empty() {
                    return Err(NameError::EmptyLabel(text.to_string()));
                }
                labels.push(std::mem::replace(&mut label, Vec::new()));
                i += 1;
            }
            b => {
                label.push(b);
                i += 1;
            }
        }
    }

    if !label.is_empty() {
        labels.push(label);
    }

    if labels.iter().any(|l| l.len() > MAX_LABEL_LEN) {
        return Err(NameError::LabelTooLong(text.to_string()));
    }

    if wire_len_of(&labels) > MAX_NAME_LEN {
        return Err(NameError::NameTooLong(text.to_string()));
    }

    Ok(labels)
}

/// Renders a single label, escaping octets that would be ambiguous
pub fn escape_label(label: &[u8]) -> String {
    let mut out = String::with_capacity(label.len());
    for &b in label {
        match b {
            b'.' | b'\\' => {
                out.push('\\');
                out.push(b as char);
            }
            0x21..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\{:03}", b)),
        }
    }
    out
}

pub fn from_labels(labels: &[Vec<u8>]) -> String {
    labels
        .iter()
        .map(|l| escape_label(l))
        .collect::<Vec<_>>()
        .join(".")
}

/// Validates a name and brings it into the crate's relative-dot-free form
pub fn normalize(text: &str) -> Result<String> {
    Ok(from_labels(&split_labels(text)?))
}

/// Completes `text` against `origin` the way zone file parsers do
///
/// `@` and the empty string denote the origin, names ending in a dot are
/// already absolute and anything else is appended to the origin.
pub fn resolve(text: &str, origin: &str) -> Result<String> {
    if text.is_empty() || text == "@" {
        return normalize(origin);
    }

    if is_absolute(text) || origin.is_empty() {
        return normalize(text);
    }

    normalize(&format!("{}.{}", text, origin))
}

/// Presentation form with the trailing root dot
pub fn fqdn(name: &str) -> String {
    if name.is_empty() {
        ".".to_string()
    } else if is_absolute(name) {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}

/// Case-insensitive lookup key for a name
pub fn key(name: &str) -> String {
    let name = if is_absolute(name) {
        &name[..name.len() - 1]
    } else {
        name
    };
    name.to_ascii_lowercase()
}

pub fn eq(a: &str, b: &str) -> bool {
    key(a) == key(b)
}

/// True if `name` is `parent` or lies below it
pub fn is_subdomain(name: &str, parent: &str) -> bool {
    let (name, parent) = match (split_labels(name), split_labels(parent)) {
        (Ok(n), Ok(p)) => (n, p),
        _ => return false,
    };

    if parent.len() > name.len() {
        return false;
    }

    name.iter()
        .rev()
        .zip(parent.iter().rev())
        .all(|(a, b)| a.eq_ignore_ascii_case(b))
}

/// Number of octets the uncompressed name occupies on the wire
pub fn wire_len(name: &str) -> Result<usize> {
    Ok(wire_len_of(&split_labels(name)?))
}

fn wire_len_of(labels: &[Vec<u8>]) -> usize {
    labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1
}
