//! Statement-boundary splitting for migration files.
//!
//! SQL text is otherwise opaque; this only finds where one statement ends and
//! the next begins. Comments are dropped, quoted text is kept verbatim, and a
//! `CREATE TRIGGER ... BEGIN ... END` body counts as a single statement.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitError {
    UnterminatedQuote { quote: char, line: usize },
    UnterminatedComment { line: usize },
    UnterminatedBlock,
}

impl fmt::Display for SplitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitError::UnterminatedQuote { quote, line } => {
                write!(f, "unterminated {quote} quote opened on line {line}")
            }
            SplitError::UnterminatedComment { line } => {
                write!(f, "unterminated block comment opened on line {line}")
            }
            SplitError::UnterminatedBlock => write!(f, "trigger body is missing its END"),
        }
    }
}

impl std::error::Error for SplitError {}

/// Leading keywords of the statement being scanned, used to recognise
/// trigger bodies whose inner `;` must not end the statement.
#[derive(Default)]
struct StatementScope {
    leading: Vec<String>,
    trigger: bool,
    depth: u32,
}

impl StatementScope {
    fn word(&mut self, word: &str) {
        let upper = word.to_ascii_uppercase();
        if self.leading.len() < 4 {
            self.leading.push(upper.clone());
            if self.leading[0] == "CREATE" && upper == "TRIGGER" {
                self.trigger = true;
            }
        }
        if self.trigger {
            match upper.as_str() {
                "BEGIN" | "CASE" => self.depth += 1,
                "END" => self.depth = self.depth.saturating_sub(1),
                _ => {}
            }
        }
    }
}

fn line_of(chars: &[char], idx: usize) -> usize {
    chars[..idx].iter().filter(|c| **c == '\n').count() + 1
}

/// Split `sql` into trimmed statements without their terminating `;`.
pub fn split_statements(sql: &str) -> Result<Vec<String>, SplitError> {
    let chars: Vec<char> = sql.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut word = String::new();
    let mut scope = StatementScope::default();
    let mut i = 0;

    let flush = |word: &mut String, scope: &mut StatementScope| {
        if !word.is_empty() {
            scope.word(word);
            word.clear();
        }
    };

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '-' if next == Some('-') => {
                flush(&mut word, &mut scope);
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if next == Some('*') => {
                flush(&mut word, &mut scope);
                let start = i;
                i += 2;
                loop {
                    if i + 1 >= chars.len() {
                        return Err(SplitError::UnterminatedComment {
                            line: line_of(&chars, start),
                        });
                    }
                    if chars[i] == '*' && chars[i + 1] == '/' {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
                current.push(' ');
            }
            '\'' | '"' | '`' | '[' => {
                flush(&mut word, &mut scope);
                let close = if c == '[' { ']' } else { c };
                let start = i;
                current.push(c);
                i += 1;
                loop {
                    let Some(&ch) = chars.get(i) else {
                        return Err(SplitError::UnterminatedQuote {
                            quote: c,
                            line: line_of(&chars, start),
                        });
                    };
                    current.push(ch);
                    i += 1;
                    if ch == close {
                        // doubled quote is an escape, not the end
                        if close != ']' && chars.get(i) == Some(&close) {
                            current.push(close);
                            i += 1;
                            continue;
                        }
                        break;
                    }
                }
            }
            ';' => {
                flush(&mut word, &mut scope);
                if scope.depth == 0 {
                    let stmt = current.trim();
                    if !stmt.is_empty() {
                        statements.push(stmt.to_string());
                    }
                    current.clear();
                    scope = StatementScope::default();
                } else {
                    current.push(';');
                }
                i += 1;
            }
            _ => {
                if c.is_alphanumeric() || c == '_' {
                    word.push(c);
                } else {
                    flush(&mut word, &mut scope);
                }
                current.push(c);
                i += 1;
            }
        }
    }

    flush(&mut word, &mut scope);
    let tail = current.trim();
    if !tail.is_empty() {
        if scope.depth > 0 {
            return Err(SplitError::UnterminatedBlock);
        }
        statements.push(tail.to_string());
    }
    Ok(statements)
}
