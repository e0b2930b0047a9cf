// Token-pattern formatter for human-readable output

use std::fmt::Write;

use chrono::{DateTime, Local};

use super::Formatter;
use crate::message::Message;

/// Default line shape, matching the console output of most daemons
pub const DEFAULT_PATTERN: &str = "[{timestamp}] [{level}] [{name}] {message}";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(String),
    Timestamp,
    Level,
    Name,
    Message,
    Source,
    Function,
    Line,
}

/// Formats records by substituting `{token}` placeholders.
///
/// Recognized tokens: `{timestamp}`, `{level}`, `{name}`, `{message}`,
/// `{source}` (file:line), `{function}` (module path), `{line}`. Unknown
/// braces are kept verbatim. Structured fields, when present, are appended
/// as `key=value` pairs.
pub struct PatternFormatter {
    tokens: Vec<Token>,
}

impl PatternFormatter {
    pub fn new() -> Self {
        Self::with_pattern(DEFAULT_PATTERN)
    }

    pub fn with_pattern(pattern: &str) -> Self {
        Self {
            tokens: Self::parse(pattern),
        }
    }

    fn parse(pattern: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut rest = pattern;

        while let Some(open) = rest.find('{') {
            literal.push_str(&rest[..open]);
            rest = &rest[open..];

            match rest.find('}') {
                Some(close) => {
                    let token = match &rest[..=close] {
                        "{timestamp}" => Some(Token::Timestamp),
                        "{level}" => Some(Token::Level),
                        "{name}" => Some(Token::Name),
                        "{message}" => Some(Token::Message),
                        "{source}" => Some(Token::Source),
                        "{function}" => Some(Token::Function),
                        "{line}" => Some(Token::Line),
                        _ => None,
                    };

                    match token {
                        Some(token) => {
                            if !literal.is_empty() {
                                tokens.push(Token::Literal(std::mem::take(&mut literal)));
                            }
                            tokens.push(token);
                        }
                        None => literal.push_str(&rest[..=close]),
                    }
                    rest = &rest[close + 1..];
                }
                None => {
                    literal.push_str(rest);
                    rest = "";
                }
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        tokens
    }
}

impl Default for PatternFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl Formatter for PatternFormatter {
    fn format(&self, message: &Message) -> Vec<u8> {
        let mut out = String::with_capacity(64 + message.text().len());

        for token in &self.tokens {
            match token {
                Token::Literal(text) => out.push_str(text),
                Token::Timestamp => {
                    let timestamp: DateTime<Local> = message.timestamp().into();
                    let _ = write!(out, "{}", timestamp.format(TIMESTAMP_FORMAT));
                }
                Token::Level => out.push_str(message.level().as_str()),
                Token::Name => out.push_str(message.name()),
                Token::Message => out.push_str(message.text()),
                Token::Source => {
                    let source = message.source();
                    let _ = write!(out, "{}:{}", source.file, source.line);
                }
                Token::Function => out.push_str(message.source().module),
                Token::Line => {
                    let _ = write!(out, "{}", message.source().line);
                }
            }
        }

        if !message.structured().is_empty() {
            for (key, value) in message.structured().fields() {
                let rendered =
                    serde_json::to_string(value).unwrap_or_else(|_| String::from("null"));
                let _ = write!(out, " {key}={rendered}");
            }
        }

        out.into_bytes()
    }
}
