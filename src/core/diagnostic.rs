//! Compiler diagnostics reported against user source.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One compiler message. Lists of diagnostics keep emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub severity: Severity,
    pub code: String,
    pub message: String,
    /// Source file the diagnostic refers to; `None` for command line problems.
    pub file_name: Option<String>,
}

impl Diagnostic {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            line: None,
            column: None,
            severity: Severity::Error,
            code: code.into(),
            message: message.into(),
            file_name: None,
        }
    }

    pub fn warning(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { severity: Severity::Warning, ..Self::error(code, message) }
    }

    /// Attach a source position.
    pub fn at(mut self, file_name: &str, line: u32, column: u32) -> Self {
        self.file_name = Some(file_name.to_string());
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.file_name.as_deref() {
            Some(name) if !name.is_empty() => write!(
                f,
                "Line {} (Column {}) : {} {}: {}",
                self.line.unwrap_or(0),
                self.column.unwrap_or(0),
                self.severity,
                self.code,
                self.message
            ),
            _ => write!(f, "{} {}: {}", self.severity, self.code, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positioned_diagnostic_format() {
        let d = Diagnostic::error("CS1002", "; expected").at("snippet.0.cs", 7, 50);
        assert_eq!(d.to_string(), "Line 7 (Column 50) : error CS1002: ; expected");
    }

    #[test]
    fn unpositioned_diagnostic_format() {
        let d = Diagnostic::warning("BC2007", "unrecognized option 'unsafe'; ignored");
        assert_eq!(d.to_string(), "warning BC2007: unrecognized option 'unsafe'; ignored");
        assert!(!d.is_error());
    }
}
