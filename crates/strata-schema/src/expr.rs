//! Expression comparison helpers.
//!
//! User-written expressions come back from the database with cosmetic
//! differences: redundant outer parentheses, trailing semicolons,
//! re-indented bodies. The helpers here absorb those differences so the
//! differ only reports real changes.

/// Wraps the expression in parentheses unless it is already a fully
/// balanced parenthesized expression. Aware of single-quoted strings
/// and backslash escapes, so `('(' )` is not considered balanced-wrapped
/// by its inner content.
#[must_use]
pub fn may_wrap(s: &str) -> String {
    if is_wrapped(s) {
        s.to_string()
    } else {
        format!("({s})")
    }
}

/// Reports whether the expression is surrounded by one balanced pair of
/// parentheses.
fn is_wrapped(s: &str) -> bool {
    let b = s.as_bytes();
    if b.len() < 2 || b[0] != b'(' || b[b.len() - 1] != b')' {
        return false;
    }
    let mut depth = 0i32;
    let mut quoted = false;
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'\\' if quoted => i += 1,
            b'\'' => quoted = !quoted,
            b'(' if !quoted => depth += 1,
            b')' if !quoted => {
                depth -= 1;
                // The opening paren closed before the end: not a wrap.
                if depth == 0 && i != b.len() - 1 {
                    return false;
                }
            }
            _ => {}
        }
        i += 1;
    }
    depth == 0 && !quoted
}

/// Unquotes a single- or double-quoted string literal; returns the input
/// unchanged when it is not quoted.
#[must_use]
pub fn unquote(s: &str) -> String {
    if is_quoted(s, '\'') {
        s[1..s.len() - 1].replace("''", "'")
    } else if is_quoted(s, '"') {
        s[1..s.len() - 1].replace("\\\"", "\"")
    } else {
        s.to_string()
    }
}

/// Quotes the string with single quotes, doubling embedded quotes.
#[must_use]
pub fn single_quote(s: &str) -> String {
    if is_quoted(s, '\'') {
        return s.to_string();
    }
    let inner = if is_quoted(s, '"') {
        unquote(s)
    } else {
        s.to_string()
    };
    format!("'{}'", inner.replace('\'', "''"))
}

fn is_quoted(s: &str, q: char) -> bool {
    s.len() >= 2 && s.starts_with(q) && s.ends_with(q)
}

/// Trims trailing whitespace and statement terminators from a body
/// definition.
#[must_use]
pub fn trim_body(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || c == ';')
}

/// Reports whether the body definition of a view, trigger, function or
/// procedure has changed, tolerating trailing terminators and
/// re-indentation added during inspection.
#[must_use]
pub fn body_def_changed(from: &str, to: &str) -> bool {
    if from == to {
        return false;
    }
    let (from, to) = (trim_body(from), trim_body(to));
    if from == to {
        return false;
    }
    let noindent = |v: &str| {
        let mut out = String::new();
        for (i, line) in v.split('\n').enumerate() {
            let line = trim_body(line);
            if !line.is_empty() && i > 0 && !out.is_empty() {
                out.push(' ');
            }
            out.push_str(line);
        }
        out
    };
    noindent(from) != noindent(to)
}
