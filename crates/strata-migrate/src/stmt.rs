//! Statement scanning.
//!
//! Migration files are split into statements by a dialect-configurable
//! scanner that preserves comments and byte positions. Comments attach
//! to the statement that follows them. Leading `-- strata:` lines form
//! the file header and carry directives (`delimiter`, `checkpoint`,
//! `txmode`).

use crate::error::{MigrateError, Result};

/// Prefix of file directives.
pub const DIRECTIVE_PREFIX: &str = "-- strata:";

/// A single scanned statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stmt {
    /// Byte offset of the statement within its file.
    pub pos: usize,
    /// Statement text. The default `;` delimiter is part of the text;
    /// custom delimiters are not.
    pub text: String,
    /// Comments preceding the statement.
    pub comments: Vec<String>,
}

/// Scanner configuration. Dialects toggle what their server accepts.
#[derive(Debug, Clone)]
pub struct ScannerOptions {
    /// Match `BEGIN ... END` blocks (trigger and procedure bodies) so
    /// embedded delimiters do not terminate the statement.
    pub match_begin: bool,
    /// Match `BEGIN ATOMIC` blocks only.
    pub match_begin_atomic: bool,
    /// Match dollar-quoted strings (`$tag$ ... $tag$`).
    pub match_dollar_quote: bool,
    /// Statement delimiter.
    pub delimiter: String,
}

impl Default for ScannerOptions {
    fn default() -> Self {
        Self {
            match_begin: false,
            match_begin_atomic: false,
            match_dollar_quote: false,
            delimiter: ";".to_string(),
        }
    }
}

/// Splits SQL scripts into statements.
#[derive(Debug, Clone, Default)]
pub struct Scanner {
    /// Scanner configuration.
    pub options: ScannerOptions,
}

impl Scanner {
    /// Creates a scanner with the given options.
    #[must_use]
    pub fn new(options: ScannerOptions) -> Self {
        Self { options }
    }

    /// Sets the statement delimiter.
    #[must_use]
    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.options.delimiter = delimiter.into();
        self
    }

    /// Scans the input into statements.
    pub fn scan(&self, input: &str) -> Result<Vec<Stmt>> {
        let bytes = input.as_bytes();
        let mut stmts = Vec::new();
        let mut comments: Vec<String> = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i].is_ascii_whitespace() {
                i += 1;
                continue;
            }
            if bytes[i..].starts_with(b"--") {
                let end = line_end(input, i);
                let text = &input[i..end];
                // Header directives are not statement comments.
                if !text.starts_with(DIRECTIVE_PREFIX) {
                    comments.push(text.to_string());
                }
                i = end;
                continue;
            }
            if bytes[i..].starts_with(b"/*") {
                let end = block_comment_end(input, i)?;
                comments.push(input[i..end].to_string());
                i = end;
                continue;
            }
            let start = i;
            let stmt_comments = std::mem::take(&mut comments);
            let (text, next) = self.scan_stmt(input, start)?;
            if !text.is_empty() {
                stmts.push(Stmt {
                    pos: start,
                    text,
                    comments: stmt_comments,
                });
            }
            i = next;
        }
        Ok(stmts)
    }

    // Scans one statement starting at `start`, returning its text and
    // the position after its delimiter.
    fn scan_stmt(&self, input: &str, start: usize) -> Result<(String, usize)> {
        let bytes = input.as_bytes();
        let delim = self.options.delimiter.as_bytes();
        let mut depth = 0usize;
        let mut i = start;
        while i < bytes.len() {
            // The delimiter wins over everything but quoted content and
            // open blocks.
            if depth == 0 && bytes[i..].starts_with(delim) {
                let text = if delim == b";" {
                    input[start..i + 1].to_string()
                } else {
                    input[start..i].trim_end().to_string()
                };
                return Ok((text, i + delim.len()));
            }
            match bytes[i] {
                b'\'' | b'"' | b'`' => {
                    i = skip_quoted(input, i)?;
                    continue;
                }
                b'$' if self.options.match_dollar_quote => {
                    if let Some(next) = skip_dollar_quoted(input, i)? {
                        i = next;
                        continue;
                    }
                }
                b'-' if bytes[i..].starts_with(b"--") => {
                    i = line_end(input, i);
                    continue;
                }
                b'/' if bytes[i..].starts_with(b"/*") => {
                    i = block_comment_end(input, i)?;
                    continue;
                }
                _ => {}
            }
            if (self.options.match_begin || self.options.match_begin_atomic)
                && word_starts_at(bytes, i)
            {
                let word = read_word(input, i);
                match word.to_ascii_uppercase().as_str() {
                    "BEGIN" => {
                        let opens = self.options.match_begin
                            || next_word(input, i + word.len()).eq_ignore_ascii_case("ATOMIC");
                        if opens {
                            depth += 1;
                        }
                    }
                    "CASE" if depth > 0 => depth += 1,
                    "END" => depth = depth.saturating_sub(1),
                    _ => {}
                }
                i += word.len();
                continue;
            }
            i += 1;
        }
        // Trailing statement without a delimiter.
        Ok((input[start..].trim_end().to_string(), bytes.len()))
    }
}

fn line_end(input: &str, from: usize) -> usize {
    match input[from..].find('\n') {
        Some(n) => from + n + 1,
        None => input.len(),
    }
}

fn block_comment_end(input: &str, from: usize) -> Result<usize> {
    match input[from + 2..].find("*/") {
        Some(n) => Ok(from + 2 + n + 2),
        None => Err(MigrateError::Syntax {
            pos: from,
            message: "unterminated block comment".to_string(),
        }),
    }
}

// Skips a quoted region starting at `from`, honoring doubled quotes and
// backslash escapes inside single-quoted strings.
fn skip_quoted(input: &str, from: usize) -> Result<usize> {
    let bytes = input.as_bytes();
    let quote = bytes[from];
    let mut i = from + 1;
    while i < bytes.len() {
        if bytes[i] == b'\\' && quote == b'\'' {
            i += 2;
            continue;
        }
        if bytes[i] == quote {
            if quote == b'\'' && bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return Ok(i + 1);
        }
        i += 1;
    }
    Err(MigrateError::Syntax {
        pos: from,
        message: format!("unterminated quoted string ({})", quote as char),
    })
}

// Skips a dollar-quoted region; returns `None` when `from` does not open
// a valid dollar quote.
fn skip_dollar_quoted(input: &str, from: usize) -> Result<Option<usize>> {
    let rest = &input[from + 1..];
    let Some(tag_len) = rest.find('$') else {
        return Ok(None);
    };
    let tag = &rest[..tag_len];
    if !tag.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return Ok(None);
    }
    let open = &input[from..from + tag_len + 2];
    let body_start = from + open.len();
    match input[body_start..].find(open) {
        Some(n) => Ok(Some(body_start + n + open.len())),
        None => Err(MigrateError::Syntax {
            pos: from,
            message: format!("unterminated dollar-quoted string {open}"),
        }),
    }
}

fn word_starts_at(bytes: &[u8], i: usize) -> bool {
    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    is_word(bytes[i]) && (i == 0 || !is_word(bytes[i - 1]))
}

fn read_word(input: &str, from: usize) -> &str {
    let end = input[from..]
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .map_or(input.len(), |n| from + n);
    &input[from..end]
}

fn next_word(input: &str, from: usize) -> &str {
    let trimmed = input[from..].trim_start();
    let offset = from + (input.len() - from - trimmed.len());
    read_word(input, offset)
}

/// Scans a migration file with the given base options, honoring the
/// file's delimiter directive. Dialect drivers route their `scan_stmts`
/// capability through here with their own base options.
pub fn scan_file(input: &str, mut options: ScannerOptions) -> Result<Vec<Stmt>> {
    let directives = parse_directives(input)?;
    if let Some(delimiter) = directives.delimiter {
        options.delimiter = delimiter;
    }
    Scanner::new(options).scan(input)
}

/// Per-file transaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxMode {
    /// Wrap the entire file in one transaction.
    #[default]
    File,
    /// Execute statements without a wrapping transaction.
    None,
    /// Wrap the whole batch of pending files in one transaction.
    All,
}

/// Directives parsed from a file's leading comment header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    /// Custom statement delimiter.
    pub delimiter: Option<String>,
    /// Checkpoint tag. `Some` marks the file as a checkpoint even when
    /// the tag is empty.
    pub checkpoint: Option<String>,
    /// Transaction mode.
    pub tx_mode: TxMode,
}

/// Parses the directive header: leading `-- strata:` lines up to the
/// first non-directive line.
pub fn parse_directives(input: &str) -> Result<Directives> {
    let mut directives = Directives::default();
    for line in input.lines() {
        let Some(rest) = line.strip_prefix(DIRECTIVE_PREFIX) else {
            break;
        };
        let (name, arg) = match rest.split_once(' ') {
            Some((n, a)) => (n, a.trim()),
            None => (rest, ""),
        };
        match name {
            "delimiter" => {
                if arg.is_empty() {
                    return Err(MigrateError::Directive("delimiter requires a value".into()));
                }
                directives.delimiter = Some(unescape_delimiter(arg));
            }
            "checkpoint" => directives.checkpoint = Some(arg.to_string()),
            "txmode" => {
                directives.tx_mode = match arg {
                    "file" => TxMode::File,
                    "none" => TxMode::None,
                    "all" => TxMode::All,
                    other => {
                        return Err(MigrateError::Directive(format!(
                            "unknown txmode {other:?}"
                        )))
                    }
                }
            }
            other => {
                return Err(MigrateError::Directive(format!(
                    "unknown directive {other:?}"
                )))
            }
        }
    }
    Ok(directives)
}

/// Unescapes a delimiter directive value (`\n`, `\r`, `\t`, `\\`).
#[must_use]
pub fn unescape_delimiter(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Escapes a delimiter for the directive header.
#[must_use]
pub fn escape_delimiter(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
}
