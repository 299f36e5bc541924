use std::fmt;

use thiserror::Error;

use crate::value::ValueType;

//===----------------------------------------------------------------------===//
// Error
//===----------------------------------------------------------------------===//

/// Reason a nested interactive loop unwinds back to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Quit,
    Restart,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("{error} (line {line})")]
    SyntaxError { error: SyntaxError, line: usize },
    #[error("Unbound symbol: {0}")]
    UnboundSymbol(String),
    #[error("Invalid cast: no {expected} (found {found})")]
    InvalidCast { expected: &'static str, found: ValueType },
    #[error("Invalid operation: no {op} operator for types {left} and {right}")]
    InvalidOperation { op: &'static str, left: ValueType, right: ValueType },
    #[error("Runtime error: {0}")]
    RuntimeError(String),
    #[error("Debugger stop ({0:?})")]
    DebuggerStop(StopReason),
}

impl Error {
    pub fn runtime(msg: impl Into<String>) -> Self {
        Error::RuntimeError(msg.into())
    }

    pub fn syntax(error: SyntaxError, line: usize) -> Self {
        Error::SyntaxError { error, line }
    }

    /// True for the cancellation sentinel, which is never reported as a failure.
    pub fn is_debugger_stop(&self) -> bool {
        matches!(self, Error::DebuggerStop(_))
    }
}

//===----------------------------------------------------------------------===//
// SyntaxError
//===----------------------------------------------------------------------===//

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyntaxError {
    #[error("Unbalanced parenthesis: missing ')'")]
    UnbalancedParen,
    #[error("Unexpected ')'")]
    UnexpectedCloseParen,
    #[error("Unexpected end of input after '{0}'")]
    UnexpectedEof(String),
    #[error("Invalid character after backslash: {0}")]
    InvalidCharacter(char),
    #[error("Unterminated string")]
    UnterminatedString,
    #[error("Bad form: {0}")]
    BadForm(String),
}

//===----------------------------------------------------------------------===//
// Diagnostic
//===----------------------------------------------------------------------===//

/// An error annotated with where it happened.
///
/// The annotation is filled in by the innermost frame that sees the error and
/// is never overwritten while the error unwinds through outer frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub error: Error,
    pub line: Option<usize>,
    pub module: Option<String>,
    pub stack: Option<String>,
    /// Set once the debugger has already suspended on this error.
    pub suspended: bool,
}

pub type EvalResult<T = crate::value::Value> = Result<T, Diagnostic>;

impl Diagnostic {
    pub fn new(error: Error) -> Self {
        let line = match &error {
            Error::SyntaxError { line, .. } => Some(*line),
            _ => None,
        };
        Self { error, line, module: None, stack: None, suspended: false }
    }

    pub fn is_annotated(&self) -> bool {
        self.stack.is_some()
    }

    /// Fills in line, module and stack snapshot unless already present.
    pub fn annotate(
        mut self,
        line: Option<usize>,
        module: Option<String>,
        stack: impl FnOnce() -> String,
    ) -> Self {
        if self.line.is_none() {
            self.line = line;
        }
        if self.module.is_none() {
            self.module = module;
        }
        if self.stack.is_none() {
            self.stack = Some(stack());
        }
        self
    }

    pub fn is_debugger_stop(&self) -> bool {
        self.error.is_debugger_stop()
    }

    /// Multi-line report used by the safe evaluation entry point.
    pub fn format_error(&self) -> String {
        let line = self.line.map(|l| l.to_string()).unwrap_or_else(|| "?".to_string());
        let module = self.module.as_deref().unwrap_or("<main>");
        format!(
            "Error executing script.\n\n{} line={} module={}\n\nCallstack:\n{}",
            self.error,
            line,
            module,
            self.stack.as_deref().unwrap_or("")
        )
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{} (line {})", self.error, line),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for Diagnostic {}

impl From<Error> for Diagnostic {
    fn from(error: Error) -> Self {
        Diagnostic::new(error)
    }
}
