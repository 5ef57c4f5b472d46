//! Restricted chart-construction grammar.
//!
//! The text-generation service is asked for a single plotting statement such as
//!
//! ```text
//! fig = px.bar(filtered_df, x='Region', y='TotalSales', title="Sales")
//! ```
//!
//! Instead of executing that text, it is parsed here into a [`ChartCall`]. The
//! grammar accepts exactly one assignment of a `px.<kind>(...)` call whose
//! arguments are literals, lists, string-keyed dicts or bare names. Anything
//! else (imports, further statements, attribute chains, arithmetic, calls in
//! argument position) is a [`GrammarError`].

use crate::chart::figure::ChartKind;
use regex::Regex;
use std::iter::Peekable;
use std::str::CharIndices;
use thiserror::Error;

/// Identifier the response must assign the chart to.
pub const FIGURE_IDENT: &str = "fig";
/// Module prefix of the construction call.
pub const PLOT_MODULE: &str = "px";

const MAX_NESTING: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Number(f64),
    Bool(bool),
    None,
    /// Bare identifier; only the bound table name resolves.
    Name(String),
    List(Vec<Value>),
    Dict(Vec<(String, Value)>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
            Value::None => "None",
            Value::Name(_) => "name",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
        }
    }
}

/// A parsed `target = px.kind(data, key=value, ...)` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartCall {
    pub target: String,
    pub kind: ChartKind,
    /// Positional data argument, if given.
    pub data: Option<String>,
    pub keywords: Vec<(String, Value)>,
}

impl ChartCall {
    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keywords.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} (at offset {offset})")]
pub struct GrammarError {
    pub message: String,
    pub offset: usize,
}

impl GrammarError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

/// True when the text contains `fig = px.` (any spacing around `=`).
pub fn has_figure_marker(text: &str) -> bool {
    let pattern = format!(r"\b{}\s*=\s*{}\.", FIGURE_IDENT, PLOT_MODULE);
    Regex::new(&pattern)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

/// Pulls the statement out of a response, dropping markdown code fences. When
/// the response has several fenced blocks the first one carrying the marker
/// wins.
pub fn extract_code(response: &str) -> String {
    if !response.contains("```") {
        return response.trim().to_string();
    }

    let blocks: Vec<&str> = response
        .split("```")
        .enumerate()
        .filter(|(i, _)| i % 2 == 1)
        .map(|(_, block)| strip_language_tag(block))
        .collect();

    blocks
        .iter()
        .find(|block| has_figure_marker(block))
        .or_else(|| blocks.first())
        .map(|block| block.trim().to_string())
        .unwrap_or_else(|| response.trim().to_string())
}

fn strip_language_tag(block: &str) -> &str {
    match block.split_once('\n') {
        Some((first, rest)) if !first.trim().is_empty() && first.trim().chars().all(|c| c.is_ascii_alphanumeric()) => rest,
        _ => block,
    }
}

pub fn parse_chart_call(source: &str) -> Result<ChartCall, GrammarError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.len(),
    };
    let call = parser.statement()?;
    if let Some(token) = parser.peek() {
        return Err(GrammarError::new(
            format!("unexpected {} after the chart statement; only one statement is allowed", token.kind.describe()),
            token.offset,
        ));
    }
    Ok(call)
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Number(f64),
    Equals,
    Dot,
    Comma,
    Colon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
}

impl TokenKind {
    fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("name '{}'", name),
            TokenKind::Str(_) => "string".to_string(),
            TokenKind::Number(_) => "number".to_string(),
            TokenKind::Equals => "'='".to_string(),
            TokenKind::Dot => "'.'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::Colon => "':'".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::LBracket => "'['".to_string(),
            TokenKind::RBracket => "']'".to_string(),
            TokenKind::LBrace => "'{'".to_string(),
            TokenKind::RBrace => "'}'".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

/// Appends digits (and `.` when `fraction` is set) to `text`, skipping `_`
/// separators. Returns whether any digit was taken.
fn take_digits(chars: &mut Peekable<CharIndices<'_>>, text: &mut String, fraction: bool) -> bool {
    let mut any = false;
    while let Some(&(_, ch)) = chars.peek() {
        if ch.is_ascii_digit() {
            text.push(ch);
            any = true;
        } else if !(ch == '_' || (fraction && ch == '.')) {
            break;
        } else if ch == '.' {
            text.push(ch);
        }
        chars.next();
    }
    any
}

fn tokenize(source: &str) -> Result<Vec<Token>, GrammarError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        let kind = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '#' => {
                while let Some(&(_, c)) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                }
                continue;
            }
            '=' => {
                chars.next();
                if matches!(chars.peek(), Some((_, '='))) {
                    return Err(GrammarError::new("comparisons are not allowed", offset));
                }
                TokenKind::Equals
            }
            '.' => {
                chars.next();
                TokenKind::Dot
            }
            ',' => {
                chars.next();
                TokenKind::Comma
            }
            ':' => {
                chars.next();
                TokenKind::Colon
            }
            '(' => {
                chars.next();
                TokenKind::LParen
            }
            ')' => {
                chars.next();
                TokenKind::RParen
            }
            '[' => {
                chars.next();
                TokenKind::LBracket
            }
            ']' => {
                chars.next();
                TokenKind::RBracket
            }
            '{' => {
                chars.next();
                TokenKind::LBrace
            }
            '}' => {
                chars.next();
                TokenKind::RBrace
            }
            '\'' | '"' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, ch)) = chars.next() {
                    match ch {
                        '\\' => match chars.next() {
                            Some((_, 'n')) => text.push('\n'),
                            Some((_, 't')) => text.push('\t'),
                            Some((_, escaped)) => text.push(escaped),
                            None => break,
                        },
                        '\n' => break,
                        ch if ch == c => {
                            closed = true;
                            break;
                        }
                        ch => text.push(ch),
                    }
                }
                if !closed {
                    return Err(GrammarError::new("unterminated string literal", offset));
                }
                TokenKind::Str(text)
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut text = String::new();
                text.push(c);
                chars.next();
                take_digits(&mut chars, &mut text, true);
                if c == '-' && text == "-" {
                    return Err(GrammarError::new("'-' must be followed by a number", offset));
                }
                if let Some(&(_, e @ ('e' | 'E'))) = chars.peek() {
                    text.push(e);
                    chars.next();
                    if let Some(&(_, sign @ ('+' | '-'))) = chars.peek() {
                        text.push(sign);
                        chars.next();
                    }
                    if !take_digits(&mut chars, &mut text, false) {
                        return Err(GrammarError::new(format!("exponent missing in '{}'", text), offset));
                    }
                }
                let number = text
                    .parse::<f64>()
                    .map_err(|_| GrammarError::new(format!("invalid number '{}'", text), offset))?;
                TokenKind::Number(number)
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut text = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        text.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                TokenKind::Ident(text)
            }
            other => {
                return Err(GrammarError::new(format!("unexpected character '{}'", other), offset));
            }
        };
        tokens.push(Token { kind, offset });
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind_at(&self, ahead: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + ahead).map(|t| &t.kind)
    }

    fn offset(&self) -> usize {
        self.peek().map(|t| t.offset).unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: TokenKind) -> Result<(), GrammarError> {
        let offset = self.offset();
        match self.next() {
            Some(token) if token.kind == expected => Ok(()),
            Some(token) => Err(GrammarError::new(
                format!("expected {}, found {}", expected.describe(), token.kind.describe()),
                token.offset,
            )),
            None => Err(GrammarError::new(
                format!("expected {}, found end of input", expected.describe()),
                offset,
            )),
        }
    }

    fn ident(&mut self, what: &str) -> Result<(String, usize), GrammarError> {
        let offset = self.offset();
        match self.next() {
            Some(Token { kind: TokenKind::Ident(name), offset }) => Ok((name, offset)),
            Some(token) => Err(GrammarError::new(
                format!("expected {}, found {}", what, token.kind.describe()),
                token.offset,
            )),
            None => Err(GrammarError::new(format!("expected {}, found end of input", what), offset)),
        }
    }

    fn statement(&mut self) -> Result<ChartCall, GrammarError> {
        let (target, target_offset) = self.ident("an assignment target")?;
        if target == "import" || target == "from" {
            return Err(GrammarError::new("import statements are not allowed", target_offset));
        }
        self.expect(TokenKind::Equals)?;

        let (module, module_offset) = self.ident("the plotting module")?;
        if module != PLOT_MODULE {
            return Err(GrammarError::new(
                format!("expected a call on '{}', found '{}'", PLOT_MODULE, module),
                module_offset,
            ));
        }
        self.expect(TokenKind::Dot)?;

        let (kind_name, kind_offset) = self.ident("a chart kind")?;
        let kind = ChartKind::from_name(&kind_name).ok_or_else(|| {
            let supported: Vec<&str> = ChartKind::ALL.iter().map(|k| k.name()).collect();
            GrammarError::new(
                format!("unsupported chart kind '{}'; supported: {}", kind_name, supported.join(", ")),
                kind_offset,
            )
        })?;

        self.expect(TokenKind::LParen)?;
        let (data, keywords) = self.arguments()?;
        self.expect(TokenKind::RParen)?;

        Ok(ChartCall {
            target,
            kind,
            data,
            keywords,
        })
    }

    fn arguments(&mut self) -> Result<(Option<String>, Vec<(String, Value)>), GrammarError> {
        let mut data = None;
        let mut keywords: Vec<(String, Value)> = Vec::new();
        let mut first = true;

        while !matches!(self.peek_kind_at(0), Some(TokenKind::RParen) | None) {
            let is_keyword = matches!(
                (self.peek_kind_at(0), self.peek_kind_at(1)),
                (Some(TokenKind::Ident(_)), Some(TokenKind::Equals))
            );

            if is_keyword {
                let (name, offset) = self.ident("a keyword")?;
                self.expect(TokenKind::Equals)?;
                if keywords.iter().any(|(k, _)| *k == name) {
                    return Err(GrammarError::new(format!("keyword '{}' repeated", name), offset));
                }
                let value = self.value(0)?;
                keywords.push((name, value));
            } else if first {
                let (name, _) = self.ident("the table name or a keyword argument")?;
                data = Some(name);
            } else {
                return Err(GrammarError::new(
                    "only the table may be passed positionally, and only first",
                    self.offset(),
                ));
            }
            first = false;

            if matches!(self.peek_kind_at(0), Some(TokenKind::Comma)) {
                self.next();
            } else {
                break;
            }
        }

        Ok((data, keywords))
    }

    fn value(&mut self, depth: usize) -> Result<Value, GrammarError> {
        if depth > MAX_NESTING {
            return Err(GrammarError::new("values nested too deeply", self.offset()));
        }
        let offset = self.offset();
        let token = self
            .next()
            .ok_or_else(|| GrammarError::new("expected a value, found end of input", offset))?;

        match token.kind {
            TokenKind::Str(text) => Ok(Value::Str(text)),
            TokenKind::Number(n) => Ok(Value::Number(n)),
            TokenKind::Ident(name) => {
                if matches!(self.peek_kind_at(0), Some(TokenKind::LParen) | Some(TokenKind::Dot)) {
                    return Err(GrammarError::new(
                        format!("expressions on '{}' are not allowed in arguments", name),
                        token.offset,
                    ));
                }
                Ok(match name.as_str() {
                    "True" => Value::Bool(true),
                    "False" => Value::Bool(false),
                    "None" => Value::None,
                    _ => Value::Name(name),
                })
            }
            TokenKind::LBracket => {
                let mut items = Vec::new();
                while !matches!(self.peek_kind_at(0), Some(TokenKind::RBracket) | None) {
                    items.push(self.value(depth + 1)?);
                    if matches!(self.peek_kind_at(0), Some(TokenKind::Comma)) {
                        self.next();
                    } else {
                        break;
                    }
                }
                self.expect(TokenKind::RBracket)?;
                Ok(Value::List(items))
            }
            TokenKind::LBrace => {
                let mut entries: Vec<(String, Value)> = Vec::new();
                while !matches!(self.peek_kind_at(0), Some(TokenKind::RBrace) | None) {
                    let key_offset = self.offset();
                    let key = match self.next().map(|t| t.kind) {
                        Some(TokenKind::Str(key)) => key,
                        _ => return Err(GrammarError::new("dict keys must be strings", key_offset)),
                    };
                    self.expect(TokenKind::Colon)?;
                    let value = self.value(depth + 1)?;
                    entries.push((key, value));
                    if matches!(self.peek_kind_at(0), Some(TokenKind::Comma)) {
                        self.next();
                    } else {
                        break;
                    }
                }
                self.expect(TokenKind::RBrace)?;
                Ok(Value::Dict(entries))
            }
            other => Err(GrammarError::new(
                format!("expected a value, found {}", other.describe()),
                token.offset,
            )),
        }
    }
}
