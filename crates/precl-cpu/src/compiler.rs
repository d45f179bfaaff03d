//! Front end of the software compiler.
//!
//! It does not generate code. It checks the structure a real kernel
//! compiler would reject first (delimiters, comments, literals, `#error`,
//! build options, kernel entry points) and reports problems in the usual
//! `file:line:col: error: message` form.

use std::fmt;

use sha2::{Digest, Sha256};

/// One compiler diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// 1-based line.
    pub line: usize,
    /// 1-based column.
    pub column: usize,
    /// Message text.
    pub message: String,
}

/// Result of a successful compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledUnit {
    /// Kernel entry points in source order.
    pub kernels: Vec<String>,
    /// Digest of the source text and build options.
    pub digest: [u8; 32],
}

/// Compiler diagnostics for a failed build, printable as a build log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLog {
    /// File name used as the diagnostic prefix.
    pub file: String,
    /// Diagnostics in source order.
    pub diagnostics: Vec<Diagnostic>,
}

impl fmt::Display for BuildLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in &self.diagnostics {
            writeln!(f, "{}:{}:{}: error: {}", self.file, d.line, d.column, d.message)?;
        }
        write!(f, "{} error(s) generated.", self.diagnostics.len())
    }
}

/// Compiles `source` with `options`.
pub fn compile(source: &str, options: &str, file: &str) -> Result<CompiledUnit, BuildLog> {
    let mut diagnostics = check_options(options);
    let mut scan = Scanner::new(source).run();
    diagnostics.append(&mut scan.diagnostics);

    if diagnostics.is_empty() && scan.kernels.is_empty() {
        diagnostics.push(Diagnostic {
            line: 1,
            column: 1,
            message: "no kernel functions found".to_string(),
        });
    }

    if !diagnostics.is_empty() {
        diagnostics.sort_by_key(|d| (d.line, d.column));
        return Err(BuildLog {
            file: file.to_string(),
            diagnostics,
        });
    }

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update([0]);
    hasher.update(options.as_bytes());

    Ok(CompiledUnit {
        kernels: scan.kernels,
        digest: hasher.finalize().into(),
    })
}

fn check_options(options: &str) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let mut expects_value = false;
    for token in options.split_whitespace() {
        if expects_value {
            expects_value = false;
            continue;
        }
        match token {
            "-D" | "-I" => expects_value = true,
            t if t.starts_with('-') && t.len() > 1 => {}
            t => diagnostics.push(Diagnostic {
                line: 0,
                column: 0,
                message: format!("invalid build option '{}'", t),
            }),
        }
    }
    if expects_value {
        diagnostics.push(Diagnostic {
            line: 0,
            column: 0,
            message: "missing argument to build option".to_string(),
        });
    }
    diagnostics
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    LineComment,
    BlockComment,
    StringLit,
    CharLit,
}

struct ScanResult {
    kernels: Vec<String>,
    diagnostics: Vec<Diagnostic>,
}

struct Scanner<'a> {
    source: &'a str,
    line: usize,
    column: usize,
    state: State,
    state_start: (usize, usize),
    stack: Vec<(char, usize, usize)>,
    /// Last three identifiers seen in code, for `kernel void name`.
    recent: [String; 3],
    ident: String,
    at_line_start: bool,
    kernels: Vec<String>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            line: 1,
            column: 0,
            state: State::Code,
            state_start: (1, 1),
            stack: Vec::new(),
            recent: Default::default(),
            ident: String::new(),
            at_line_start: true,
            kernels: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn error(&mut self, line: usize, column: usize, message: String) {
        self.diagnostics.push(Diagnostic {
            line,
            column,
            message,
        });
    }

    fn run(mut self) -> ScanResult {
        let source = self.source;
        let mut chars = source.char_indices().peekable();

        while let Some((offset, c)) = chars.next() {
            self.column += 1;
            let next = chars.peek().map(|&(_, n)| n);

            match self.state {
                State::Code => {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        self.ident.push(c);
                        self.at_line_start = false;
                        continue;
                    }
                    self.finish_ident();

                    if self.at_line_start && c == '#' && self.directive(&source[offset..]) {
                        self.at_line_start = false;
                        self.state = State::LineComment;
                        continue;
                    }

                    match c {
                        '/' if next == Some('/') => {
                            chars.next();
                            self.column += 1;
                            self.state = State::LineComment;
                        }
                        '/' if next == Some('*') => {
                            chars.next();
                            self.state_start = (self.line, self.column);
                            self.column += 1;
                            self.state = State::BlockComment;
                        }
                        '"' => {
                            self.state_start = (self.line, self.column);
                            self.state = State::StringLit;
                        }
                        '\'' => {
                            self.state_start = (self.line, self.column);
                            self.state = State::CharLit;
                        }
                        '(' | '{' | '[' => self.stack.push((c, self.line, self.column)),
                        ')' | '}' | ']' => self.close(c),
                        _ => {}
                    }
                }
                State::LineComment => {
                    if c == '\n' {
                        self.state = State::Code;
                    }
                }
                State::BlockComment => {
                    if c == '*' && next == Some('/') {
                        chars.next();
                        self.column += 1;
                        self.state = State::Code;
                    }
                }
                State::StringLit | State::CharLit => {
                    let quote = if self.state == State::StringLit { '"' } else { '\'' };
                    if c == '\\' {
                        match chars.next() {
                            Some((_, '\n')) => {
                                self.line += 1;
                                self.column = 0;
                            }
                            Some(_) => self.column += 1,
                            None => {}
                        }
                    } else if c == quote {
                        self.state = State::Code;
                    } else if c == '\n' {
                        let (line, column) = self.state_start;
                        self.error(line, column, "missing terminating quote".to_string());
                        self.state = State::Code;
                    }
                }
            }

            if c == '\n' {
                self.line += 1;
                self.column = 0;
                self.at_line_start = true;
            } else if !c.is_whitespace() {
                self.at_line_start = false;
            }
        }

        self.finish_ident();
        self.finish()
    }

    fn finish(mut self) -> ScanResult {
        match self.state {
            State::BlockComment => {
                let (line, column) = self.state_start;
                self.error(line, column, "unterminated comment".to_string());
            }
            State::StringLit | State::CharLit => {
                let (line, column) = self.state_start;
                self.error(line, column, "missing terminating quote".to_string());
            }
            State::Code | State::LineComment => {}
        }

        for (open, line, column) in std::mem::take(&mut self.stack) {
            self.error(line, column, format!("unterminated '{}'", open));
        }

        ScanResult {
            kernels: self.kernels,
            diagnostics: self.diagnostics,
        }
    }

    fn close(&mut self, c: char) {
        let expected = match c {
            ')' => '(',
            '}' => '{',
            _ => '[',
        };
        match self.stack.iter().rposition(|&(open, _, _)| open == expected) {
            Some(pos) if pos + 1 == self.stack.len() => {
                self.stack.pop();
            }
            Some(pos) => {
                // Inner openers are abandoned so one slip yields one error.
                let top = self.stack[self.stack.len() - 1].0;
                let message = format!("expected '{}' before '{}'", closer(top), c);
                self.error(self.line, self.column, message);
                self.stack.truncate(pos);
            }
            None => {
                let message = format!("unexpected '{}'", c);
                self.error(self.line, self.column, message);
            }
        }
    }

    /// Handles a preprocessor line. Returns true if the rest of the line
    /// must be skipped.
    fn directive(&mut self, rest: &str) -> bool {
        let line = rest.lines().next().unwrap_or("");
        let body = line.trim_start_matches('#').trim_start();
        match body.strip_prefix("error") {
            Some(message) if message.is_empty() || message.starts_with(char::is_whitespace) => {
                let message = message.trim();
                self.error(self.line, self.column, format!("#error {}", message));
                true
            }
            _ => false,
        }
    }

    fn finish_ident(&mut self) {
        if self.ident.is_empty() {
            return;
        }
        let ident = std::mem::take(&mut self.ident);
        self.recent.rotate_left(1);
        self.recent[2] = ident;

        let [qualifier, ret, name] = &self.recent;
        if (qualifier == "__kernel" || qualifier == "kernel")
            && ret == "void"
            && !name.is_empty()
            && !name.starts_with(|c: char| c.is_ascii_digit())
        {
            self.kernels.push(name.clone());
        }
    }
}

fn closer(open: char) -> char {
    match open {
        '(' => ')',
        '{' => '}',
        _ => ']',
    }
}
