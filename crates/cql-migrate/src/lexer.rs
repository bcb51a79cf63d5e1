//! Statement Lexer - Splits migration scripts into executable units
//!
//! Scans raw CQL script text and produces, in document order, the statements
//! to execute, the comments to skip, and the inline callback directives
//! (`-- CALL name;`) that fire a hook at that point of the script.

use std::iter::Peekable;
use std::str::Chars;

use thiserror::Error;

/// Token that turns a `--` comment into a callback directive
const CALL_TOKEN: &str = "CALL";

/// One unit of a migration script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedItem {
    /// Statement text without its terminating `;`
    Statement(String),
    /// Comment body without comment markers
    Comment(String),
    /// Inline callback directive with the callback name
    Callback(String),
}

impl ParsedItem {
    /// Whether this item is executed against the target
    pub fn is_statement(&self) -> bool {
        matches!(self, ParsedItem::Statement(_))
    }
}

/// Errors raised while splitting a script
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unterminated string literal opened on line {line}")]
    UnterminatedString { line: usize },

    #[error("unterminated quoted identifier opened on line {line}")]
    UnterminatedIdentifier { line: usize },

    #[error("unterminated $$ string literal opened on line {line}")]
    UnterminatedDollarString { line: usize },

    #[error("unterminated block comment opened on line {line}")]
    UnterminatedBlockComment { line: usize },

    #[error("content is not valid UTF-8 (valid up to byte {valid_up_to})")]
    InvalidUtf8 { valid_up_to: usize },
}

/// Result type for lexer operations
pub type ParseResult<T> = Result<T, ParseError>;

/// Split raw migration bytes, rejecting content that is not UTF-8
pub fn split_bytes(content: &[u8]) -> ParseResult<Vec<ParsedItem>> {
    let text = std::str::from_utf8(content).map_err(|e| ParseError::InvalidUtf8 {
        valid_up_to: e.valid_up_to(),
    })?;
    split(text)
}

/// Split a migration script into statements, comments and callback directives
///
/// A missing `;` after the last statement is accepted. Separators and comment
/// markers inside `'...'`, `"..."` and `$$...$$` are literal text.
///
/// # Examples
/// ```
/// use cql_migrate::{split, ParsedItem};
///
/// let items = split("INSERT INTO t (k) VALUES (1); -- ttl 1 hour").unwrap();
/// assert_eq!(
///     items,
///     vec![
///         ParsedItem::Statement("INSERT INTO t (k) VALUES (1)".to_string()),
///         ParsedItem::Comment("ttl 1 hour".to_string()),
///     ]
/// );
/// ```
pub fn split(content: &str) -> ParseResult<Vec<ParsedItem>> {
    Lexer::new(content).run()
}

/// Returns the callback name if `text` is a `-- CALL name;` directive
pub fn is_callback(text: &str) -> Option<String> {
    let body = text.trim().strip_prefix("--")?;
    callback_name(body)
}

/// Whether `text` is a plain comment (callback directives are not comments)
pub fn is_comment(text: &str) -> bool {
    let text = text.trim();
    if text.starts_with("//") || (text.len() >= 4 && text.starts_with("/*") && text.ends_with("*/")) {
        return true;
    }
    text.starts_with("--") && is_callback(text).is_none()
}

fn callback_name(body: &str) -> Option<String> {
    let body = body.trim_start_matches('-').trim();
    let rest = body.strip_prefix(CALL_TOKEN)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }

    let name = rest.trim().trim_end_matches(';').trim_end();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
    buf: String,
    items: Vec<ParsedItem>,
}

impl<'a> Lexer<'a> {
    fn new(content: &'a str) -> Self {
        Self {
            chars: content.chars().peekable(),
            line: 1,
            buf: String::new(),
            items: Vec::new(),
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn next_is(&mut self, expected: char) -> bool {
        self.chars.peek() == Some(&expected)
    }

    fn run(mut self) -> ParseResult<Vec<ParsedItem>> {
        while let Some(c) = self.bump() {
            match c {
                '\'' => self.quoted('\'', |line| ParseError::UnterminatedString { line })?,
                '"' => self.quoted('"', |line| ParseError::UnterminatedIdentifier { line })?,
                '$' if self.next_is('$') => self.dollar_quoted()?,
                '-' if self.next_is('-') => {
                    self.bump();
                    let body = self.rest_of_line();
                    self.line_comment(&body, '-');
                }
                '/' if self.next_is('/') => {
                    self.bump();
                    let body = self.rest_of_line();
                    self.line_comment(&body, '/');
                }
                '/' if self.next_is('*') => {
                    self.bump();
                    self.block_comment()?;
                }
                ';' => self.finish_statement(),
                _ => self.buf.push(c),
            }
        }

        self.finish_statement();
        Ok(self.items)
    }

    /// Consume a quoted region; a doubled quote is an escaped quote
    fn quoted(&mut self, quote: char, unterminated: fn(usize) -> ParseError) -> ParseResult<()> {
        let opened = self.line;
        self.buf.push(quote);

        loop {
            match self.bump() {
                Some(c) if c == quote => {
                    self.buf.push(c);
                    if self.next_is(quote) {
                        self.bump();
                        self.buf.push(quote);
                    } else {
                        return Ok(());
                    }
                }
                Some(c) => self.buf.push(c),
                None => return Err(unterminated(opened)),
            }
        }
    }

    fn dollar_quoted(&mut self) -> ParseResult<()> {
        let opened = self.line;
        self.bump();
        self.buf.push_str("$$");

        loop {
            match self.bump() {
                Some('$') if self.next_is('$') => {
                    self.bump();
                    self.buf.push_str("$$");
                    return Ok(());
                }
                Some(c) => self.buf.push(c),
                None => return Err(ParseError::UnterminatedDollarString { line: opened }),
            }
        }
    }

    /// Everything up to, not including, the next newline
    fn rest_of_line(&mut self) -> String {
        let mut body = String::new();
        while let Some(&c) = self.chars.peek() {
            if c == '\n' {
                break;
            }
            body.push(c);
            self.chars.next();
        }
        body
    }

    fn line_comment(&mut self, body: &str, marker: char) {
        let directive = if marker == '-' {
            callback_name(body)
        } else {
            None
        };

        match directive {
            // a directive ends any open statement so it fires after it
            Some(name) => {
                self.finish_statement();
                self.items.push(ParsedItem::Callback(name));
            }
            None => {
                let body = body.trim_start_matches(marker).trim().to_string();
                self.emit_inline(ParsedItem::Comment(body));
            }
        }
    }

    fn block_comment(&mut self) -> ParseResult<()> {
        let opened = self.line;
        let mut body = String::new();

        loop {
            match self.bump() {
                Some('*') if self.next_is('/') => {
                    self.bump();
                    break;
                }
                Some(c) => body.push(c),
                None => return Err(ParseError::UnterminatedBlockComment { line: opened }),
            }
        }

        self.emit_inline(ParsedItem::Comment(body.trim().to_string()));
        Ok(())
    }

    /// Emit a non-statement item; a pending statement keeps a token break in its place
    fn emit_inline(&mut self, item: ParsedItem) {
        if !self.buf.trim().is_empty() {
            self.buf.push(' ');
        }
        self.items.push(item);
    }

    fn finish_statement(&mut self) {
        let text = self.buf.trim();
        if !text.is_empty() {
            self.items.push(ParsedItem::Statement(text.to_string()));
        }
        self.buf.clear();
    }
}
