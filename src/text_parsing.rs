use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take},
    character::complete::char,
    combinator::recognize,
    multi::many0,
    sequence::{pair, terminated},
    IResult, Parser,
};

const VERTICAL_TAB: u8 = 0x0b;
const FORM_FEED: u8 = 0x0c;

/// Parser for one piece of a text value: a run of ordinary bytes, a newline or a backslash
fn chunk(input: &[u8]) -> IResult<&[u8], &[u8]> {
    alt((is_not(&b"\n\\"[..]), tag(&b"\n"[..]), tag(&b"\\"[..]))).parse(input)
}

fn chunks(input: &[u8]) -> IResult<&[u8], Vec<&[u8]>> {
    many0(chunk).parse(input)
}

/// Parser for the first half of a composed value, up to the first unescaped colon
fn compose_head(input: &[u8]) -> IResult<&[u8], &[u8]> {
    terminated(
        recognize(many0(alt((
            is_not(&b"\\:"[..]),
            recognize(pair(char('\\'), take(1usize))),
        )))),
        char(':'),
    )
    .parse(input)
}

/// Converts every linebreak style (LF, CR, CRLF, LFCR) to a single LF.
fn normalise_linebreaks(s: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(s.len());
    let mut i = 0;
    while i < s.len() {
        match (s[i], s.get(i + 1)) {
            (b'\n', Some(b'\r')) | (b'\r', Some(b'\n')) => {
                result.push(b'\n');
                i += 2;
            }
            (b'\r', _) | (b'\n', _) => {
                result.push(b'\n');
                i += 1;
            }
            (c, _) => {
                result.push(c);
                i += 1;
            }
        }
    }
    result
}

fn unescape(s: &[u8], keep_newlines: bool) -> Vec<u8> {
    let mut s = normalise_linebreaks(s);
    for c in s.iter_mut() {
        if matches!(*c, b'\t' | VERTICAL_TAB | FORM_FEED) {
            *c = b' ';
        }
    }
    let pieces = chunks(&s).map(|(_, pieces)| pieces).unwrap_or_default();
    let mut result = Vec::with_capacity(s.len());
    let mut is_escaped = false;
    for piece in pieces {
        if is_escaped {
            // An escaped linebreak is a soft linebreak and disappears.
            if piece != b"\n" {
                result.extend_from_slice(piece);
            }
            is_escaped = false;
        } else if piece == b"\\" {
            is_escaped = true;
        } else if piece == b"\n" && !keep_newlines {
            result.push(b' ');
        } else {
            result.extend_from_slice(piece);
        }
    }
    result
}

/// Decodes a raw SimpleText value: escapes are processed and all whitespace,
/// linebreaks included, becomes a plain space.
pub fn simpletext_value(s: &[u8]) -> Vec<u8> {
    unescape(s, false)
}

/// Decodes a raw Text value: like [`simpletext_value`] but linebreaks are kept.
pub fn text_value(s: &[u8]) -> Vec<u8> {
    unescape(s, true)
}

/// Escapes backslashes and closing brackets so the result is a valid raw value.
pub fn escape_text(s: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(s.len());
    for &c in s {
        if c == b'\\' || c == b']' {
            result.push(b'\\');
        }
        result.push(c);
    }
    result
}

/// Splits a composed value at its first unescaped colon.
///
/// Returns the whole input and `None` if there is no such colon. Escapes in
/// either half are left intact.
pub fn parse_compose(s: &[u8]) -> (&[u8], Option<&[u8]>) {
    match compose_head(s) {
        Ok((rest, head)) => (head, Some(rest)),
        Err(_) => (s, None),
    }
}

/// Joins two raw values into a composed value, escaping colons in the first.
pub fn compose(s1: &[u8], s2: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(s1.len() + s2.len() + 1);
    for &c in s1 {
        if c == b':' {
            result.push(b'\\');
        }
        result.push(c);
    }
    result.push(b':');
    result.extend_from_slice(s2);
    result
}
