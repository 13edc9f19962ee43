// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Segment parser for TKML documents.
//!
//! A document is split into an ordered sequence of [`Segment`]s: literal
//! text and code regions delimited by `<?` and `?>`. Parsing is pure and
//! lossless; concatenating [`Segment::original_text`] over the sequence
//! reproduces the input exactly.
//!
//! # Classification
//!
//! `<?= ... ?>` is always an [`CodeKind::Expression`]. Any other code region
//! is an expression unless, ignoring string literals, it
//!
//! - contains a statement terminator (`;`) or a brace,
//! - contains an assignment (`=` that is not `==`, `~=`, `<=`, `>=`),
//! - begins with a statement keyword (`if`, `for`, `while`, `repeat`,
//!   `function`, `local`, `return`, `do`, `end`, `else`, `elseif`, `until`,
//!   `goto`, `break`) or a comment,
//! - or is empty,
//!
//! in which case it is a [`CodeKind::Statement`].

use crate::document::DocumentId;
use crate::error::{Result, SourceContext, TkmlError};
use lazy_static::lazy_static;
use pest::error::LineColLocation;
use pest::Parser;
use pest_derive::Parser;
use regex::Regex;

/// Opening delimiter of a code region.
pub const OPEN_TOKEN: &str = "<?";
/// Closing delimiter of a code region.
pub const CLOSE_TOKEN: &str = "?>";
/// Sigil that forces a code region to be an expression (`<?= ... ?>`).
pub const EXPRESSION_SIGIL: char = '=';

/// Pest parser generated from `segments.pest`.
#[derive(Parser)]
#[grammar = "segments.pest"]
pub struct SegmentParser;

lazy_static! {
    static ref STRING_LITERAL: Regex =
        Regex::new(r#""(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*'|\[\[[\s\S]*?\]\]"#).unwrap();
    static ref STATEMENT_KEYWORD: Regex = Regex::new(
        r"^(if|for|while|repeat|function|local|return|do|end|else|elseif|until|goto|break)\b"
    )
    .unwrap();
    static ref ASSIGNMENT: Regex = Regex::new(r"(^|[^=~<>])=([^=]|$)").unwrap();
    static ref CALL: Regex = Regex::new(r#"[\w\])]\s*(\(|"|'|\[\[)"#).unwrap();
}

/// Whether a code segment yields a value or runs for effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    /// Evaluated; its rendered value is appended to the output.
    Expression,
    /// Inlined verbatim into the synthesized program.
    Statement,
}

/// A code region of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSegment {
    /// The code between the delimiters, without the `=` sigil.
    pub source: String,
    /// Expression or statement.
    pub kind: CodeKind,
    /// The region exactly as written, delimiters included.
    pub raw: String,
    /// 1-indexed line of the opening delimiter.
    pub line: usize,
}

impl CodeSegment {
    /// True for expressions containing a call, whose evaluation may suspend
    /// at an `include(...)` boundary.
    pub fn may_suspend(&self) -> bool {
        self.kind == CodeKind::Expression && CALL.is_match(&self.source)
    }
}

/// One unit of a parsed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Text copied to the output unchanged.
    Literal(String),
    /// A code region.
    Code(CodeSegment),
}

impl Segment {
    /// The exact source text this segment was parsed from.
    pub fn original_text(&self) -> &str {
        match self {
            Segment::Literal(text) => text,
            Segment::Code(code) => &code.raw,
        }
    }
}

/// Classifies the inside of a code region (sigil already removed).
pub fn classify(code: &str) -> CodeKind {
    let stripped = STRING_LITERAL.replace_all(code, "\"\"");
    let trimmed = stripped.trim();

    if trimmed.is_empty()
        || trimmed.starts_with("--")
        || trimmed.contains(';')
        || trimmed.contains('{')
        || trimmed.contains('}')
        || STATEMENT_KEYWORD.is_match(trimmed)
        || ASSIGNMENT.is_match(trimmed)
    {
        CodeKind::Statement
    } else {
        CodeKind::Expression
    }
}

fn code_segment(body: &str, raw: &str, line: usize) -> CodeSegment {
    match body.strip_prefix(EXPRESSION_SIGIL) {
        Some(expr) => CodeSegment {
            source: expr.to_string(),
            kind: CodeKind::Expression,
            raw: raw.to_string(),
            line,
        },
        None => CodeSegment {
            source: body.to_string(),
            kind: classify(body),
            raw: raw.to_string(),
            line,
        },
    }
}

/// Byte offset of the first `<?` with no matching `?>`.
fn unterminated_open(source: &str) -> Option<usize> {
    let mut pos = 0;
    while let Some(found) = source[pos..].find(OPEN_TOKEN) {
        let open = pos + found;
        let body_start = open + OPEN_TOKEN.len();
        match source[body_start..].find(CLOSE_TOKEN) {
            Some(close) => pos = body_start + close + CLOSE_TOKEN.len(),
            None => return Some(open),
        }
    }
    None
}

/// 1-indexed line and column (in characters) of a byte offset.
fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    (line, before[line_start..].chars().count() + 1)
}

/// Parses a document into its segment sequence.
///
/// An unterminated `<?` fails with [`TkmlError::ParseFailure`] pointing at
/// the opening token; the failure is local to this document.
pub fn parse_segments(id: &DocumentId, source: &str) -> Result<Vec<Segment>> {
    let mut pairs = SegmentParser::parse(Rule::document, source).map_err(|e| {
        let (line, column) = match unterminated_open(source) {
            Some(offset) => line_col(source, offset),
            None => match e.line_col {
                LineColLocation::Pos(pos) => pos,
                LineColLocation::Span(start, _) => start,
            },
        };
        TkmlError::ParseFailure {
            message: format!("unterminated `{}` (missing `{}`)", OPEN_TOKEN, CLOSE_TOKEN),
            line,
            column,
            file: id.to_string(),
            source_context: Some(SourceContext::from_source(source, line, column)),
        }
    })?;

    let mut segments = Vec::new();
    let Some(document) = pairs.next() else {
        return Ok(segments);
    };

    for pair in document.into_inner() {
        match pair.as_rule() {
            Rule::literal => segments.push(Segment::Literal(pair.as_str().to_string())),
            Rule::code => {
                let (line, _) = pair.line_col();
                let raw = pair.as_str();
                let body = pair
                    .into_inner()
                    .next()
                    .map(|inner| inner.as_str())
                    .unwrap_or_default();
                segments.push(Segment::Code(code_segment(body, raw, line)));
            }
            _ => {}
        }
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Vec<Segment> {
        parse_segments(&DocumentId::new("test.tkml").unwrap(), source).unwrap()
    }

    fn reassemble(segments: &[Segment]) -> String {
        segments.iter().map(Segment::original_text).collect()
    }

    #[test]
    fn test_expression_example() {
        let segments = parse("Hello <?= 1+1 ?>!");
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], Segment::Literal("Hello ".to_string()));
        match &segments[1] {
            Segment::Code(code) => {
                assert_eq!(code.kind, CodeKind::Expression);
                assert_eq!(code.source.trim(), "1+1");
                assert_eq!(code.raw, "<?= 1+1 ?>");
            }
            other => panic!("expected code segment, got {:?}", other),
        }
        assert_eq!(segments[2], Segment::Literal("!".to_string()));
    }

    #[test]
    fn test_lossless_reassembly() {
        let inputs = [
            "",
            "plain text only",
            "<?= x ?>",
            "a<? if x then ?>b<? end ?>c",
            "<list>\n  <? for i = 1, 3 do ?>\n  <section><?= i ?></section>\n  <? end ?>\n</list>\n",
            "?> stray close and <?= \"quoted ?\" ?> tail",
            "unicode ✓ <?= 'é' ?> ✓",
        ];
        for input in inputs {
            assert_eq!(reassemble(&parse(input)), input, "input: {:?}", input);
        }
    }

    #[test]
    fn test_first_close_token_terminates() {
        let segments = parse("<? a = 1 ?> ?>");
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1], Segment::Literal(" ?>".to_string()));
    }

    #[test]
    fn test_unterminated_open_is_parse_failure() {
        let id = DocumentId::new("broken.tkml").unwrap();
        let err = parse_segments(&id, "line one\nok <?= 1 ?> then <? oops").unwrap_err();
        match err {
            TkmlError::ParseFailure { line, column, file, .. } => {
                assert_eq!(line, 2);
                assert_eq!(column, 18);
                assert_eq!(file, "broken.tkml");
            }
            other => panic!("expected parse failure, got {:?}", other),
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify(" 1 + 1 "), CodeKind::Expression);
        assert_eq!(classify("queryParams.name"), CodeKind::Expression);
        assert_eq!(classify("include('header.tkml')"), CodeKind::Expression);
        assert_eq!(classify("a == b"), CodeKind::Expression);
        assert_eq!(classify("\"x = 1; {}\""), CodeKind::Expression);

        assert_eq!(classify("if x then"), CodeKind::Statement);
        assert_eq!(classify("end"), CodeKind::Statement);
        assert_eq!(classify("local y = 2"), CodeKind::Statement);
        assert_eq!(classify("count = count + 1"), CodeKind::Statement);
        assert_eq!(classify("print(1); print(2)"), CodeKind::Statement);
        assert_eq!(classify("t = {1, 2}"), CodeKind::Statement);
        assert_eq!(classify("-- just a note"), CodeKind::Statement);
        assert_eq!(classify("   "), CodeKind::Statement);
        assert_eq!(classify("functional_value"), CodeKind::Expression);
    }

    #[test]
    fn test_sigil_forces_expression() {
        let segments = parse("<?= {1, 2} ?>");
        match &segments[0] {
            Segment::Code(code) => assert_eq!(code.kind, CodeKind::Expression),
            other => panic!("expected code segment, got {:?}", other),
        }
    }

    #[test]
    fn test_may_suspend() {
        let segments = parse("<?= include(\"a.tkml\") ?><?= include \"b.tkml\" ?><?= 1 + x ?><?= a .. \"b\" ?>");
        let flags: Vec<bool> = segments
            .iter()
            .map(|s| match s {
                Segment::Code(code) => code.may_suspend(),
                Segment::Literal(_) => false,
            })
            .collect();
        assert_eq!(flags, vec![true, true, false, false]);
    }

    #[test]
    fn test_code_line_numbers() {
        let segments = parse("a\nb\n<?= 1 ?>");
        match &segments[1] {
            Segment::Code(code) => assert_eq!(code.line, 3),
            other => panic!("expected code segment, got {:?}", other),
        }
    }
}
