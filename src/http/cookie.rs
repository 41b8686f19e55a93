//! Zero-copy lookup of a single cookie inside a `Cookie` request header.

use memchr::memchr;

/// Finds the first cookie named `name` in a raw `Cookie` header value.
///
/// Cookie pairs are separated by `; ` per
/// [RFC 6265, Section 4.2.1](https://tools.ietf.org/html/rfc6265#section-4.2.1),
/// though a single space after the `;` is tolerated rather than required.
/// Returns the value slice with no percent-decoding applied.
pub(crate) fn find<'a>(header: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    let mut rest = header;

    loop {
        while rest.first() == Some(&b' ') {
            rest = &rest[1..];
        }
        if rest.is_empty() {
            return None;
        }

        let pair_end = memchr(b';', rest).unwrap_or(rest.len());
        let pair = &rest[..pair_end];

        if let Some(eq) = memchr(b'=', pair) {
            let (key, value) = (&pair[..eq], &pair[eq + 1..]);
            if key == name {
                return Some(value);
            }
        }

        if pair_end == rest.len() {
            return None;
        }
        rest = &rest[pair_end + 1..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic() {
        let header = b"session=abc123; theme=dark";
        assert_eq!(find(header, b"session"), Some(&b"abc123"[..]));
        assert_eq!(find(header, b"theme"), Some(&b"dark"[..]));
        assert_eq!(find(header, b"missing"), None);
    }

    #[test]
    fn single_pair() {
        assert_eq!(find(b"id=42", b"id"), Some(&b"42"[..]));
    }

    #[test]
    fn tight_separator() {
        assert_eq!(find(b"a=1;b=2", b"b"), Some(&b"2"[..]));
    }

    #[test]
    fn empty_header() {
        assert_eq!(find(b"", b"id"), None);
    }

    #[test]
    fn empty_value() {
        assert_eq!(find(b"flag=", b"flag"), Some(&b""[..]));
    }

    #[test]
    fn key_without_value_is_ignored() {
        assert_eq!(find(b"weird; id=42", b"weird"), None);
        assert_eq!(find(b"weird; id=42", b"id"), Some(&b"42"[..]));
    }
}
