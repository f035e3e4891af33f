//! Diagnostic accumulation shared by every compiler phase.
//!
//! Each phase (lexer, parser, name analysis, type analysis) collects a list
//! of [`Diagnostic`]s instead of aborting on the first problem. The driver
//! in `lib.rs` treats a non-empty list after a phase as fatal and stops the
//! pipeline there, per the error-handling design: phases accumulate, the
//! driver decides when to give up.

use std::fmt;

/// Which compiler phase raised a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Lexer,
    Parser,
    Name,
    Type,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Lexer => "Lexer",
            Phase::Parser => "Parse",
            Phase::Name => "Name",
            Phase::Type => "Type",
        };
        write!(f, "{s}")
    }
}

/// A single textual diagnostic, positioned at a source location.
///
/// `Display` renders the canonical `<Phase> error at L:C: <message>` form
/// used throughout the pipeline and asserted on by the test suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub phase: Phase,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn new(phase: Phase, line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            phase,
            line,
            column,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} error at {}:{}: {}",
            self.phase, self.line, self.column, self.message
        )
    }
}

/// Join a diagnostic list into the multi-line text the CLI prints under `-v`.
pub fn render(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_canonical_message() {
        let d = Diagnostic::new(Phase::Parser, 3, 7, "expected ';'");
        assert_eq!(d.to_string(), "Parse error at 3:7: expected ';'");
    }
}
