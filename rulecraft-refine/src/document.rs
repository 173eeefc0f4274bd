//! # Library Document and Rule Sets
//!
//! `LibraryDocument` is the cell-library text every prompt embeds. Parsing is
//! deliberately shallow: the text is normalized, group braces are checked for
//! balance (ignoring quoted strings and `/* */` comments) and `cell(NAME)`
//! group names are collected for trace params.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Parsed, immutable cell-library text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryDocument {
    text: String,
    cells: Vec<String>,
}

impl LibraryDocument {
    /// Parse raw library text.
    ///
    /// Fails with `InvalidInput` when the text is blank, a brace is unbalanced,
    /// or a string or comment is left unterminated.
    pub fn parse(raw: &str) -> Result<Self> {
        let text = raw.replace("\r\n", "\n").replace('\r', "\n");
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::invalid_input("library document is empty")
                .with_operation("document::parse"));
        }

        let cells = scan(text).map_err(|e| e.with_operation("document::parse"))?;
        Ok(Self {
            text: text.to_string(),
            cells,
        })
    }

    /// Normalized text, as embedded in prompts
    pub fn to_text(&self) -> &str {
        &self.text
    }

    /// Cell group names in document order
    pub fn cells(&self) -> &[String] {
        &self.cells
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

impl FromStr for LibraryDocument {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for LibraryDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Walk the text once, checking brace balance and collecting cell names
fn scan(text: &str) -> Result<Vec<String>> {
    let chars: Vec<char> = text.chars().collect();
    let mut cells = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '\n' => line += 1,
            '"' => {
                let start = line;
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(Error::invalid_input(format!(
                                "unterminated string starting at line {}",
                                start
                            )))
                        }
                        Some('\\') => i += 1,
                        Some('\n') => line += 1,
                        Some('"') => break,
                        Some(_) => {}
                    }
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let start = line;
                i += 2;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(Error::invalid_input(format!(
                                "unterminated comment starting at line {}",
                                start
                            )))
                        }
                        Some('*') if chars.get(i + 1) == Some(&'/') => {
                            i += 1;
                            break;
                        }
                        Some('\n') => line += 1,
                        Some(_) => {}
                    }
                    i += 1;
                }
            }
            '{' => open.push(line),
            '}' => {
                if open.pop().is_none() {
                    return Err(Error::invalid_input(format!(
                        "unbalanced '}}' at line {}",
                        line
                    )));
                }
            }
            c if is_word_char(c) => {
                let start = i;
                while i < chars.len() && is_word_char(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                if word == "cell" {
                    if let Some(name) = group_name(&chars[i..]) {
                        cells.push(name);
                    }
                }
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    match open.last() {
        Some(opened) => Err(Error::invalid_input(format!(
            "unclosed '{{' opened at line {}",
            opened
        ))),
        None => Ok(cells),
    }
}

/// Name following a `cell` keyword: `(NAME)`, `("NAME")` or a bare word
fn group_name(rest: &[char]) -> Option<String> {
    let mut iter = rest.iter().copied().skip_while(|c| *c == ' ' || *c == '\t').peekable();
    let name: String = match iter.peek()? {
        '(' => iter.skip(1).take_while(|c| *c != ')' && *c != '\n').collect(),
        c if is_word_char(*c) => iter.take_while(|c| is_word_char(*c)).collect(),
        _ => return None,
    };
    let name = name.trim().trim_matches('"').trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// The current rules: an opaque text blob replaced wholesale per iteration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet(String);

impl RuleSet {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Literal comparison after trimming outer whitespace only
    pub fn converged_with(&self, previous: &RuleSet) -> bool {
        self.0.trim() == previous.0.trim()
    }
}

impl From<String> for RuleSet {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl fmt::Display for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
