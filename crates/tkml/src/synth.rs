// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Program synthesizer: turns a segment sequence into one Lua chunk.
//!
//! The chunk receives three arguments (the output buffer, the value
//! renderer and `table.concat`) and returns the rendered document:
//!
//! ```lua
//! local __out, __str, __concat = ...
//! __out[#__out + 1] = "Hello "
//! __out[#__out + 1] = __str((1+1))
//! __out[#__out + 1] = "!"
//! return __concat(__out)
//! ```
//!
//! Statement segments are inlined verbatim, so control flow written in them
//! decides how often the surrounding literal appends run. The buffer lives
//! outside the chunk so partial output survives a failing program.

use crate::document::DocumentId;
use crate::parser::{CodeKind, Segment};

/// Local holding the output buffer.
pub const OUTPUT_BUFFER: &str = "__out";
/// Local holding the value renderer.
pub const RENDER_VALUE: &str = "__str";
/// Local holding `table.concat`.
pub const CONCAT: &str = "__concat";

/// Escapes a string so it can be placed inside a double-quoted Lua literal.
pub fn escape_lua_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
        .replace('\0', "\\x00")
}

/// A synthesized program, tied to the document it came from.
#[derive(Debug, Clone)]
pub struct Program {
    /// Document whose segments produced this program.
    pub document: DocumentId,
    /// Lua source of the chunk.
    pub source: String,
    /// Document line for each chunk line (index 0 is chunk line 1).
    line_map: Vec<usize>,
}

impl Program {
    /// Chunk name used for error reporting.
    pub fn chunk_name(&self) -> String {
        format!("={}", self.document)
    }

    /// Maps a chunk line back to the document line it was generated from.
    pub fn document_line(&self, chunk_line: usize) -> Option<usize> {
        chunk_line
            .checked_sub(1)
            .and_then(|idx| self.line_map.get(idx))
            .copied()
    }

    /// Rewrites `document:LINE:` locations in a Lua error message from
    /// chunk lines to document lines.
    pub fn translate_error(&self, message: &str) -> String {
        relocate_error_lines(message, self.document.as_str(), |line| self.document_line(line))
    }
}

/// Rewrites every `name:LINE:` location in `message` through `map`.
/// Locations `map` cannot resolve are left unchanged.
pub fn relocate_error_lines(
    message: &str,
    name: &str,
    map: impl Fn(usize) -> Option<usize>,
) -> String {
    let prefix = format!("{}:", name);
    let mut result = String::with_capacity(message.len());
    let mut rest = message;

    while let Some(idx) = rest.find(&prefix) {
        let after = &rest[idx + prefix.len()..];
        let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
        let mapped = digits.parse::<usize>().ok().and_then(&map);

        result.push_str(&rest[..idx + prefix.len()]);
        match mapped {
            Some(line) if after[digits.len()..].starts_with(':') => {
                result.push_str(&line.to_string());
            }
            _ => result.push_str(&digits),
        }
        rest = &after[digits.len()..];
    }

    result.push_str(rest);
    result
}

struct ProgramWriter {
    source: String,
    line_map: Vec<usize>,
}

impl ProgramWriter {
    /// Appends `code` and records `line` for every chunk line it spans.
    fn emit(&mut self, code: &str, line: usize) {
        for (offset, _) in code.split('\n').enumerate().skip(1) {
            self.line_map.push(line + offset - 1);
        }
        self.source.push_str(code);
    }

    fn newline(&mut self, line: usize) {
        self.source.push('\n');
        self.line_map.push(line);
    }
}

/// Synthesizes the program for `segments` of document `document`.
pub fn synthesize(document: &DocumentId, segments: &[Segment]) -> Program {
    let mut writer = ProgramWriter {
        source: String::new(),
        line_map: Vec::new(),
    };
    let mut line = 1;

    writer.emit(
        &format!("local {}, {}, {} = ...", OUTPUT_BUFFER, RENDER_VALUE, CONCAT),
        line,
    );
    writer.newline(line);

    for segment in segments {
        match segment {
            Segment::Literal(text) => {
                if !text.is_empty() {
                    writer.emit(
                        &format!(
                            "{out}[#{out} + 1] = \"{}\"",
                            escape_lua_string(text),
                            out = OUTPUT_BUFFER
                        ),
                        line,
                    );
                    writer.newline(line);
                }
                line += text.matches('\n').count();
            }
            Segment::Code(code) => {
                line = code.line;
                match code.kind {
                    CodeKind::Expression => writer.emit(
                        &format!(
                            "{out}[#{out} + 1] = {}(({}\n))",
                            RENDER_VALUE,
                            code.source.trim(),
                            out = OUTPUT_BUFFER
                        ),
                        line,
                    ),
                    // A trailing `--` comment would swallow the next line.
                    CodeKind::Statement => writer.emit(&code.source, line),
                }
                line += code.raw.matches('\n').count();
                writer.newline(line);
            }
        }
    }

    writer.emit(&format!("return {}({})", CONCAT, OUTPUT_BUFFER), line);

    Program {
        document: document.clone(),
        source: writer.source,
        line_map: writer.line_map,
    }
}
