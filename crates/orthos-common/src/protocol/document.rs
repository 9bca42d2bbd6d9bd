//! Document and Suggestion Types
//!
//! The core only needs span references into a tokenized text and a way to
//! attach suggestions to them. The richer annotation formats used by
//! upstream tooling are converted to and from this shape at the edges.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{OrthosError, Result};

/// Byte range into [`Document::text`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Span {
    pub offset: usize,
    pub length: usize,
}

impl Span {
    pub fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Token {
    pub text: String,
    pub offset: usize,
}

impl Token {
    pub fn span(&self) -> Span {
        Span::new(self.offset, self.text.len())
    }
}

/// A tokenized input document.
///
/// Documents are never mutated by modules; suggestions are collected
/// separately and attached by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub tokens: Vec<Token>,
}

impl Document {
    /// Tokenizes plain text.
    ///
    /// Splits on whitespace, then peels leading and trailing punctuation off
    /// each chunk into tokens of their own. Inner punctuation (`don't`,
    /// `e-mail`) stays attached.
    ///
    /// # Example
    ///
    /// ```
    /// use orthos_common::protocol::Document;
    ///
    /// let doc = Document::from_text("doc", "I wa teh best.");
    /// let words: Vec<&str> = doc.tokens.iter().map(|t| t.text.as_str()).collect();
    /// assert_eq!(words, vec!["I", "wa", "teh", "best", "."]);
    /// assert_eq!(doc.tokens[2].offset, 5);
    /// ```
    pub fn from_text(id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let mut tokens = Vec::new();

        let mut chunk_start: Option<usize> = None;
        for (i, c) in text.char_indices() {
            if c.is_whitespace() {
                if let Some(start) = chunk_start.take() {
                    split_chunk(&text[start..i], start, &mut tokens);
                }
            } else if chunk_start.is_none() {
                chunk_start = Some(i);
            }
        }
        if let Some(start) = chunk_start {
            split_chunk(&text[start..], start, &mut tokens);
        }

        Self {
            id: id.into(),
            text,
            tokens,
        }
    }

    /// Loads a document from disk.
    ///
    /// Files ending in `.json` hold a serialized `Document`; anything else is
    /// read as plain text and tokenized, with the file stem as the id.
    pub fn from_path(path: &Path) -> Result<Self> {
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let contents = std::fs::read_to_string(path)?;
        if is_json {
            return Ok(serde_json::from_str(&contents)?);
        }

        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| {
                OrthosError::InvalidRequest(format!("Not a document path: {}", path.display()))
            })?;
        Ok(Self::from_text(id, contents))
    }

    /// Returns the text covered by `span`, if it lies on char boundaries.
    pub fn slice(&self, span: Span) -> Option<&str> {
        self.text.get(span.offset..span.end())
    }
}

fn split_chunk(chunk: &str, base: usize, tokens: &mut Vec<Token>) {
    let chars: Vec<(usize, char)> = chunk.char_indices().collect();

    let lead = chars
        .iter()
        .take_while(|(_, c)| is_edge_punctuation(*c))
        .count();
    let trail = chars[lead..]
        .iter()
        .rev()
        .take_while(|(_, c)| is_edge_punctuation(*c))
        .count();

    for &(i, c) in &chars[..lead] {
        tokens.push(Token {
            text: c.to_string(),
            offset: base + i,
        });
    }

    let core_end = chars.len() - trail;
    if lead < core_end {
        let start = chars[lead].0;
        let end = chars.get(core_end).map(|(i, _)| *i).unwrap_or(chunk.len());
        tokens.push(Token {
            text: chunk[start..end].to_string(),
            offset: base + start,
        });
    }

    for &(i, c) in &chars[core_end..] {
        tokens.push(Token {
            text: c.to_string(),
            offset: base + i,
        });
    }
}

fn is_edge_punctuation(c: char) -> bool {
    c.is_ascii_punctuation() || matches!(c, '“' | '”' | '‘' | '’' | '«' | '»' | '…')
}

/// One proposed replacement text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Replacement {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Replacement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// A proposed correction for one span of the input.
///
/// Suggestions from different modules are independent; nothing in the core
/// reconciles overlapping ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Suggestion {
    pub span: Span,
    pub original: String,
    pub replacements: Vec<Replacement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
}

impl Suggestion {
    pub fn for_token(token: &Token, replacements: Vec<Replacement>) -> Self {
        Self {
            span: token.span(),
            original: token.text.clone(),
            replacements,
            class: None,
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn proposes(&self, text: &str) -> bool {
        self.replacements.iter().any(|r| r.text == text)
    }
}
