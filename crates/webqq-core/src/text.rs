//! Text run escaping used by the chat wire format.
//!
//! The server sends line breaks, tabs and backslashes inside text runs as
//! two-character escape sequences that survive the JSON layer untouched.

/// Turns the server's escape sequences into the characters they stand for.
///
/// `\n`, `\t` and `\\` become newline, tab and backslash. `\r` becomes a
/// space since the server always pairs it with `\n`. Any other backslash
/// sequence, and a trailing lone backslash, is kept as is.
pub fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push(' '),
            Some('\\') => out.push('\\'),
            _ => {
                out.push('\\');
                continue;
            }
        }
        chars.next();
    }

    out
}

/// Inverse of [`unescape`] for newline, tab and backslash.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 8);
    for c in input.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out
}
