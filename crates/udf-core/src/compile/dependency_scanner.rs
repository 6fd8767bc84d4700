//! Static discovery of the datasets a UDF reads.
//!
//! Both scanners look for calls to the data accessor (`lib.getData`) and
//! take the first quoted literal after it as the dataset name. Nothing is
//! executed; this is a text scan, not a parser.
//!
//! - Preprocessed text (native UDFs): comments have already been removed by
//!   the system preprocessor, so every line is code.
//! - Lua source (bytecode UDFs): line comments (`--`), long-bracket block
//!   comments (`--[[ ]]`, `--[==[ ]==]`, ...) and long strings (`[[ ]]`)
//!   are tracked here.

use crate::error::{Error, Result};

/// Identifier of the UDF-facing data accessor.
pub const ACCESSOR: &str = "lib.getData";

/// Collects dataset names referenced by a UDF, in textual order.
pub struct DependencyScanner {
    names: Vec<String>,
}

impl DependencyScanner {
    /// Create a new scanner.
    pub fn new() -> Self {
        Self { names: Vec::new() }
    }

    /// Scan the output of a C preprocessor run.
    pub fn scan_preprocessed(&mut self, text: &str) -> Result<&[String]> {
        self.names.clear();

        for (index, line) in text.lines().enumerate() {
            self.collect(line, index + 1, &['"'])?;
        }

        Ok(&self.names)
    }

    /// Scan raw Lua source, skipping comments.
    pub fn scan_lua(&mut self, text: &str) -> Result<&[String]> {
        self.names.clear();

        // Level of the long bracket (comment or string) we are inside, if any.
        let mut open_level: Option<usize> = None;

        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            let mut rest = line;

            loop {
                if let Some(level) = open_level {
                    let close = format!("]{}]", "=".repeat(level));
                    match rest.find(&close) {
                        Some(pos) => {
                            rest = &rest[pos + close.len()..];
                            open_level = None;
                        }
                        None => break,
                    }
                    continue;
                }

                match split_lua_line(rest) {
                    LuaLine::Code(code) => {
                        self.collect(code, line_no, &['"', '\''])?;
                        break;
                    }
                    LuaLine::Comment { code, comment } => {
                        self.collect(code, line_no, &['"', '\''])?;
                        let Some((level, len)) = long_bracket_open(comment) else { break };
                        open_level = Some(level);
                        rest = &comment[len..];
                    }
                    LuaLine::LongString { code, level, body } => {
                        self.collect(code, line_no, &['"', '\''])?;
                        open_level = Some(level);
                        rest = body;
                    }
                }
            }
        }

        Ok(&self.names)
    }

    /// Get the names found by the last scan.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Consume the scanner, returning the names found by the last scan.
    pub fn into_names(self) -> Vec<String> {
        self.names
    }

    /// Record every accessor call in a code-only fragment.
    fn collect(&mut self, code: &str, line_no: usize, quotes: &[char]) -> Result<()> {
        let mut offset = 0;

        while let Some(found) = code[offset..].find(ACCESSOR) {
            let start = offset + found;
            let end = start + ACCESSOR.len();

            if !is_call_site(code, start, end) {
                offset = end;
                continue;
            }

            let (name, consumed) =
                quoted_argument(&code[end..], quotes).ok_or_else(|| {
                    Error::MalformedDependencyDeclaration {
                        line: line_no,
                        text: code.trim().to_string(),
                    }
                })?;

            self.names.push(name.to_string());
            offset = end + consumed;
        }

        Ok(())
    }
}

impl Default for DependencyScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// The accessor must not be part of a longer identifier (`mylib.getDataset`).
fn is_call_site(code: &str, start: usize, end: usize) -> bool {
    let before = code[..start].chars().next_back();
    let after = code[end..].chars().next();
    !before.is_some_and(is_ident_char) && !after.is_some_and(is_ident_char)
}

/// Extract the first quoted literal, returning it and the bytes consumed.
fn quoted_argument<'a>(text: &'a str, quotes: &[char]) -> Option<(&'a str, usize)> {
    let open = text.find(|c: char| quotes.contains(&c))?;
    let quote = text[open..].chars().next()?;
    let body = &text[open + 1..];
    let close = body.find(quote)?;
    Some((&body[..close], open + 1 + close + 1))
}

/// How a Lua line fragment ends.
enum LuaLine<'a> {
    /// Code up to the end of the line.
    Code(&'a str),
    /// Code, then a `--` marker followed by `comment`.
    Comment { code: &'a str, comment: &'a str },
    /// Code, then a long-string opener of `level`; `body` follows the opener.
    LongString {
        code: &'a str,
        level: usize,
        body: &'a str,
    },
}

/// Split a Lua line at the first comment marker or long-string opener.
///
/// Neither counts inside a quoted string.
fn split_lua_line(line: &str) -> LuaLine<'_> {
    let bytes = line.as_bytes();
    let mut in_string: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match in_string {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    in_string = None;
                }
            }
            None => {
                if b == b'"' || b == b'\'' {
                    in_string = Some(b);
                } else if b == b'-' && bytes.get(i + 1) == Some(&b'-') {
                    return LuaLine::Comment {
                        code: &line[..i],
                        comment: &line[i + 2..],
                    };
                } else if b == b'[' {
                    if let Some((level, len)) = long_bracket_open(&line[i..]) {
                        return LuaLine::LongString {
                            code: &line[..i],
                            level,
                            body: &line[i + len..],
                        };
                    }
                }
            }
        }
        i += 1;
    }

    LuaLine::Code(line)
}

/// Match a long-bracket opener (`[[`, `[=[`, `[==[`, ...) at the start of
/// `text`, returning its level and length.
fn long_bracket_open(text: &str) -> Option<(usize, usize)> {
    let rest = text.strip_prefix('[')?;
    let level = rest.bytes().take_while(|&b| b == b'=').count();
    rest[level..].strip_prefix('[')?;
    Some((level, level + 2))
}
