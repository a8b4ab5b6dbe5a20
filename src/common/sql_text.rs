// SQL Text Helpers
//
// This module implements the small amount of lexical analysis the dispatcher
// needs: finding the leading verb, skipping comments and literals, spotting
// SELECT ... INTO constructs, statement annotations and script splitting.

use std::iter::Peekable;
use std::str::CharIndices;

/// A lexical unit of a SQL statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlToken<'a> {
    /// Keyword, identifier, number or variable reference
    Word(&'a str),
    /// Quoted string or quoted identifier, including the quotes
    Literal(&'a str),
    /// Comment body without the comment markers
    Comment(&'a str),
    /// Any other single character
    Symbol(char),
}

/// Scanner that splits SQL text into tokens, keeping their byte offsets
pub struct SqlScanner<'a> {
    sql: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> SqlScanner<'a> {
    /// Create a new scanner over the given text
    pub fn new(sql: &'a str) -> Self {
        SqlScanner {
            sql,
            chars: sql.char_indices().peekable(),
        }
    }

    fn peek_second(&self) -> Option<char> {
        let mut ahead = self.chars.clone();
        ahead.next();
        ahead.next().map(|(_, c)| c)
    }

    fn offset(&mut self) -> usize {
        self.chars.peek().map(|(i, _)| *i).unwrap_or(self.sql.len())
    }

    fn read_line_comment(&mut self, start: usize) -> (usize, usize, SqlToken<'a>) {
        // skip "--"
        self.chars.next();
        self.chars.next();
        let body_start = start + 2;
        while let Some(&(_, c)) = self.chars.peek() {
            if c == '\n' {
                break;
            }
            self.chars.next();
        }
        let end = self.offset();
        (start, end, SqlToken::Comment(&self.sql[body_start..end]))
    }

    fn read_block_comment(&mut self, start: usize) -> (usize, usize, SqlToken<'a>) {
        self.chars.next();
        self.chars.next();
        let body_start = start + 2;
        let mut body_end = self.sql.len();
        while let Some((i, c)) = self.chars.next() {
            if c == '*' && matches!(self.chars.peek(), Some((_, '/'))) {
                self.chars.next();
                body_end = i;
                break;
            }
        }
        let end = self.offset();
        (start, end, SqlToken::Comment(&self.sql[body_start..body_end]))
    }

    fn read_quoted(&mut self, start: usize, quote: char) -> (usize, usize, SqlToken<'a>) {
        self.chars.next();
        while let Some((_, c)) = self.chars.next() {
            if c == quote {
                // doubled quote is an escaped quote
                if matches!(self.chars.peek(), Some((_, q)) if *q == quote) {
                    self.chars.next();
                    continue;
                }
                break;
            }
        }
        let end = self.offset();
        (start, end, SqlToken::Literal(&self.sql[start..end]))
    }

    fn read_word(&mut self, start: usize) -> (usize, usize, SqlToken<'a>) {
        while let Some(&(pos, c)) = self.chars.peek() {
            if is_word_char(c) {
                self.chars.next();
            } else if c == '[' && self.sql[..pos].ends_with('$') {
                // $[variable] references belong to the word
                while let Some((_, c)) = self.chars.next() {
                    if c == ']' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
        let end = self.offset();
        (start, end, SqlToken::Word(&self.sql[start..end]))
    }
}

impl<'a> Iterator for SqlScanner<'a> {
    /// (start offset, end offset, token)
    type Item = (usize, usize, SqlToken<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
            } else {
                break;
            }
        }

        let &(start, c) = self.chars.peek()?;
        let second = self.peek_second();
        let token = match (c, second) {
            ('-', Some('-')) => self.read_line_comment(start),
            ('/', Some('*')) => self.read_block_comment(start),
            ('\'', _) | ('"', _) | ('`', _) => self.read_quoted(start, c),
            _ if is_word_char(c) => self.read_word(start),
            _ => {
                self.chars.next();
                (start, start + c.len_utf8(), SqlToken::Symbol(c))
            }
        };
        Some(token)
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '$' | '#' | '@' | ':' | '.')
}

/// Find the verb token and its end offset
fn verb_token(sql: &str) -> Option<(usize, String)> {
    for (_, end, token) in SqlScanner::new(sql) {
        match token {
            SqlToken::Comment(_) => continue,
            SqlToken::Symbol('(') => continue,
            SqlToken::Word(w) => return Some((end, w.to_uppercase())),
            SqlToken::Literal(l) => return Some((end, l.to_string())),
            SqlToken::Symbol(c) => return Some((end, c.to_string())),
        }
    }
    None
}

/// Extract the leading verb of a statement in upper case.
///
/// Leading comments, whitespace and opening parentheses are skipped. Returns
/// `None` for empty or comment-only text.
pub fn sql_verb(sql: &str) -> Option<String> {
    verb_token(sql).map(|(_, verb)| verb)
}

/// Text following the leading verb, trimmed
pub fn text_after_verb(sql: &str) -> &str {
    match verb_token(sql) {
        Some((end, _)) => strip_delimiter(sql[end..].trim()),
        None => "",
    }
}

/// Remove a trailing `;` from a statement
pub fn strip_delimiter(sql: &str) -> &str {
    sql.trim_end().trim_end_matches(';').trim_end()
}

/// Upper-cased words outside literals and comments
pub fn words(sql: &str) -> Vec<String> {
    SqlScanner::new(sql)
        .filter_map(|(_, _, token)| match token {
            SqlToken::Word(w) => Some(w.to_uppercase()),
            _ => None,
        })
        .collect()
}

/// Detects `SELECT ... INTO new_table FROM ...` at the top nesting level.
///
/// Host variable targets (`:var`, `@var`) do not create a table.
pub fn is_select_into_new_table(sql: &str) -> bool {
    let mut depth = 0usize;
    let mut top_level = Vec::new();
    for (_, _, token) in SqlScanner::new(sql) {
        match token {
            SqlToken::Symbol('(') => depth += 1,
            SqlToken::Symbol(')') => depth = depth.saturating_sub(1),
            SqlToken::Word(w) if depth == 0 => top_level.push(w),
            SqlToken::Literal(l) if depth == 0 => top_level.push(l),
            _ => {}
        }
    }

    let mut iter = top_level.into_iter();
    match iter.next() {
        Some(first) if first.eq_ignore_ascii_case("SELECT") => {}
        _ => return false,
    }
    while let Some(word) = iter.next() {
        if word.eq_ignore_ascii_case("FROM") {
            return false;
        }
        if word.eq_ignore_ascii_case("INTO") {
            return match iter.next() {
                Some(target) => !target.starts_with(':') && !target.starts_with('@'),
                None => false,
            };
        }
    }
    false
}

/// Returns true if a comment in the statement carries `@<name>`
pub fn has_annotation(sql: &str, name: &str) -> bool {
    SqlScanner::new(sql).any(|(_, _, token)| match token {
        SqlToken::Comment(body) => body.split_whitespace().any(|word| {
            word.strip_prefix('@')
                .map(|tag| tag.eq_ignore_ascii_case(name))
                .unwrap_or(false)
        }),
        _ => false,
    })
}

/// Split a script into statements on `;` outside literals and comments.
///
/// Pieces that contain nothing but comments are dropped.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut start = 0;
    let mut has_code = false;

    for (offset, _, token) in SqlScanner::new(script) {
        match token {
            SqlToken::Symbol(';') => {
                if has_code {
                    statements.push(script[start..offset].trim().to_string());
                }
                start = offset + 1;
                has_code = false;
            }
            SqlToken::Comment(_) => {}
            _ => has_code = true,
        }
    }
    if has_code {
        statements.push(script[start..].trim().to_string());
    }
    statements
}
