//! Argument quoting for the line-oriented wire format
//!
//! Directive arguments are whitespace-delimited on the wire, so every space,
//! newline and `&` in a value is rewritten as an `&` escape pair. A leading `-`
//! is escaped too, otherwise the server would read the value as a directive.
//!
//! | raw            | wire |
//! |----------------|------|
//! | space          | `&_` |
//! | newline        | `&n` |
//! | `&`            | `&&` |
//! | leading `-`    | `&-` |

/// Escape marker byte
const ESC: u8 = b'&';

/// Quote `raw` so it survives as a single whitespace-free token
pub fn escape(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() * 2);
    escape_into(raw, &mut out);
    out
}

/// Like [`escape`], appending to an existing buffer
pub fn escape_into(raw: &[u8], out: &mut Vec<u8>) {
    for (i, &b) in raw.iter().enumerate() {
        match b {
            b' ' => out.extend_from_slice(b"&_"),
            b'\n' => out.extend_from_slice(b"&n"),
            ESC => out.extend_from_slice(b"&&"),
            b'-' if i == 0 => out.extend_from_slice(b"&-"),
            _ => out.push(b),
        }
    }
}

/// Reverse [`escape`].
///
/// An `&` followed by anything other than `&`, `_`, `n` or `-` is dropped and
/// the following byte is kept as is; a trailing lone `&` is dropped.
pub fn unescape(wire: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(wire.len());
    let mut bytes = wire.iter().copied();

    while let Some(b) = bytes.next() {
        if b != ESC {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(b'_') => out.push(b' '),
            Some(b'n') => out.push(b'\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }

    out
}
