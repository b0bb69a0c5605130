//! Diagnostic catalogue for both source languages.
//!
//! Each [`Message`] knows its code, severity and wording in either dialect;
//! [`DiagnosticSink`] stamps them with the snippet file name and position.

use super::ast::Pos;
use super::Dialect;
use crate::core::diagnostic::{Diagnostic, Severity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    MissingSemicolon,
    ExpectedOpenBrace,
    ExpectedCloseBrace,
    ExpectedCloseParen,
    EndOfStatementExpected,
    SyntaxError(String),
    TopLevelExpected,
    InvalidExpressionTerm(String),
    IdentifierExpected,
    /// Basic block construct without its terminator (`If`, `While`, ...).
    MissingEnd(&'static str),
    NewlineInConstant,
    UnexpectedChar(char),
    IntegerTooLarge,
    NameNotFound(String),
    TypeNotFound(String),
    NoMember { ty: String, name: String },
    CannotConvert { from: String, to: String },
    BadBinaryOperands { op: &'static str, lhs: String, rhs: String },
    BadUnaryOperand { op: &'static str, ty: String },
    WrongArgCount { method: String, count: usize },
    BadArgument { index: usize, from: String, to: String },
    NotInvocable(String),
    NotIndexable(String),
    DuplicateLocal(String),
    DuplicateMember { ty: String, name: String },
    InstanceRequired(String),
    NotAStatement,
    LeftHandSideNotVariable,
    NotAllPathsReturn(String),
    ReturnValueRequired(String),
    ReturnValueInVoid(String),
    NoEnclosingLoop { exit: bool, kind: &'static str },
    NotAnException,
    StaticClassInstance(String),
    InstanceMemberInStaticClass(String),
    UnknownOption { option: String, ignored: bool },
    UnusedVariable(String),
    AssignedNeverUsed(String),
}

impl Message {
    pub fn severity(&self, dialect: Dialect) -> Severity {
        match self {
            Message::UnusedVariable(_) | Message::AssignedNeverUsed(_) => Severity::Warning,
            Message::NotAllPathsReturn(_) if dialect == Dialect::Basic => Severity::Warning,
            Message::UnknownOption { ignored: true, .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }

    pub fn code(&self, dialect: Dialect) -> &'static str {
        match dialect {
            Dialect::Brace => self.brace_code(),
            Dialect::Basic => self.basic_code(),
        }
    }

    fn brace_code(&self) -> &'static str {
        match self {
            Message::MissingSemicolon => "CS1002",
            Message::ExpectedOpenBrace => "CS1514",
            Message::ExpectedCloseBrace | Message::MissingEnd(_) => "CS1513",
            Message::ExpectedCloseParen => "CS1026",
            Message::EndOfStatementExpected => "CS1002",
            Message::SyntaxError(_) => "CS1519",
            Message::TopLevelExpected => "CS1022",
            Message::InvalidExpressionTerm(_) => "CS1525",
            Message::IdentifierExpected => "CS1001",
            Message::NewlineInConstant => "CS1010",
            Message::UnexpectedChar(_) => "CS1056",
            Message::IntegerTooLarge => "CS1021",
            Message::NameNotFound(_) => "CS0103",
            Message::TypeNotFound(_) => "CS0246",
            Message::NoMember { .. } => "CS0117",
            Message::CannotConvert { .. } => "CS0029",
            Message::BadBinaryOperands { .. } => "CS0019",
            Message::BadUnaryOperand { .. } => "CS0023",
            Message::WrongArgCount { .. } => "CS1501",
            Message::BadArgument { .. } => "CS1503",
            Message::NotInvocable(_) => "CS1955",
            Message::NotIndexable(_) => "CS0021",
            Message::DuplicateLocal(_) => "CS0128",
            Message::DuplicateMember { .. } => "CS0111",
            Message::InstanceRequired(_) => "CS0120",
            Message::NotAStatement => "CS0201",
            Message::LeftHandSideNotVariable => "CS0131",
            Message::NotAllPathsReturn(_) => "CS0161",
            Message::ReturnValueRequired(_) => "CS0126",
            Message::ReturnValueInVoid(_) => "CS0127",
            Message::NoEnclosingLoop { .. } => "CS0139",
            Message::NotAnException => "CS0155",
            Message::StaticClassInstance(_) => "CS0712",
            Message::InstanceMemberInStaticClass(_) => "CS0708",
            Message::UnknownOption { .. } => "CS2007",
            Message::UnusedVariable(_) => "CS0168",
            Message::AssignedNeverUsed(_) => "CS0219",
        }
    }

    fn basic_code(&self) -> &'static str {
        match self {
            Message::MissingSemicolon | Message::EndOfStatementExpected => "BC30205",
            Message::ExpectedOpenBrace | Message::ExpectedCloseBrace | Message::SyntaxError(_) => "BC30035",
            Message::ExpectedCloseParen => "BC30198",
            Message::TopLevelExpected => "BC30689",
            Message::InvalidExpressionTerm(_) => "BC30201",
            Message::IdentifierExpected => "BC30203",
            Message::MissingEnd(construct) => match *construct {
                "If" => "BC30081",
                "While" => "BC30082",
                "Do" => "BC30083",
                "For" => "BC30084",
                "Sub" => "BC30026",
                "Function" => "BC30027",
                "Module" => "BC30625",
                "Namespace" => "BC30626",
                "Class" => "BC30481",
                _ => "BC30384",
            },
            Message::NewlineInConstant => "BC30648",
            Message::UnexpectedChar(_) => "BC30037",
            Message::IntegerTooLarge => "BC30036",
            Message::NameNotFound(_) => "BC30451",
            Message::TypeNotFound(_) => "BC30002",
            Message::NoMember { .. } => "BC30456",
            Message::CannotConvert { .. } | Message::BadArgument { .. } => "BC30311",
            Message::BadBinaryOperands { .. } => "BC30452",
            Message::BadUnaryOperand { .. } => "BC30487",
            Message::WrongArgCount { .. } => "BC30516",
            Message::NotInvocable(_) | Message::NotAStatement => "BC30454",
            Message::NotIndexable(_) => "BC30367",
            Message::DuplicateLocal(_) => "BC30288",
            Message::DuplicateMember { .. } => "BC30269",
            Message::InstanceRequired(_) => "BC30369",
            Message::LeftHandSideNotVariable => "BC30068",
            Message::NotAllPathsReturn(_) => "BC42105",
            Message::ReturnValueRequired(_) => "BC30654",
            Message::ReturnValueInVoid(_) => "BC30647",
            Message::NoEnclosingLoop { exit: true, .. } => "BC30096",
            Message::NoEnclosingLoop { exit: false, .. } => "BC30783",
            Message::NotAnException => "BC30665",
            Message::StaticClassInstance(_) => "BC30371",
            Message::InstanceMemberInStaticClass(_) => "BC30433",
            Message::UnknownOption { .. } => "BC2007",
            Message::UnusedVariable(_) | Message::AssignedNeverUsed(_) => "BC42024",
        }
    }

    pub fn text(&self, dialect: Dialect) -> String {
        match dialect {
            Dialect::Brace => self.brace_text(),
            Dialect::Basic => self.basic_text(),
        }
    }

    fn brace_text(&self) -> String {
        match self {
            Message::MissingSemicolon | Message::EndOfStatementExpected => "; expected".into(),
            Message::ExpectedOpenBrace => "{ expected".into(),
            Message::ExpectedCloseBrace | Message::MissingEnd(_) => "} expected".into(),
            Message::ExpectedCloseParen => ") expected".into(),
            Message::SyntaxError(token) => {
                format!("Invalid token '{}' in class, struct, or interface member declaration", token)
            }
            Message::TopLevelExpected => "Type or namespace definition, or end-of-file expected".into(),
            Message::InvalidExpressionTerm(term) => format!("Invalid expression term '{}'", term),
            Message::IdentifierExpected => "Identifier expected".into(),
            Message::NewlineInConstant => "Newline in constant".into(),
            Message::UnexpectedChar(c) => format!("Unexpected character '{}'", c),
            Message::IntegerTooLarge => "Integral constant is too large".into(),
            Message::NameNotFound(name) => {
                format!("The name '{}' does not exist in the current context", name)
            }
            Message::TypeNotFound(name) => format!(
                "The type or namespace name '{}' could not be found (are you missing a using directive or an assembly reference?)",
                name
            ),
            Message::NoMember { ty, name } => format!("'{}' does not contain a definition for '{}'", ty, name),
            Message::CannotConvert { from, to } => {
                format!("Cannot implicitly convert type '{}' to '{}'", from, to)
            }
            Message::BadBinaryOperands { op, lhs, rhs } => format!(
                "Operator '{}' cannot be applied to operands of type '{}' and '{}'",
                op, lhs, rhs
            ),
            Message::BadUnaryOperand { op, ty } => {
                format!("Operator '{}' cannot be applied to operand of type '{}'", op, ty)
            }
            Message::WrongArgCount { method, count } => {
                format!("No overload for method '{}' takes {} arguments", method, count)
            }
            Message::BadArgument { index, from, to } => {
                format!("Argument {}: cannot convert from '{}' to '{}'", index, from, to)
            }
            Message::NotInvocable(name) => {
                format!("Non-invocable member '{}' cannot be used like a method.", name)
            }
            Message::NotIndexable(ty) => {
                format!("Cannot apply indexing with [] to an expression of type '{}'", ty)
            }
            Message::DuplicateLocal(name) => {
                format!("A local variable named '{}' is already defined in this scope", name)
            }
            Message::DuplicateMember { ty, name } => format!(
                "Type '{}' already defines a member called '{}' with the same parameter types",
                ty, name
            ),
            Message::InstanceRequired(member) => format!(
                "An object reference is required for the non-static field, method, or property '{}'",
                member
            ),
            Message::NotAStatement => "Only assignment, call, increment, decrement, await, and new object expressions can be used as a statement".into(),
            Message::LeftHandSideNotVariable => {
                "The left-hand side of an assignment must be a variable, property or indexer".into()
            }
            Message::NotAllPathsReturn(method) => format!("'{}': not all code paths return a value", method),
            Message::ReturnValueRequired(ty) => {
                format!("An object of a type convertible to '{}' is required", ty)
            }
            Message::ReturnValueInVoid(method) => format!(
                "Since '{}' returns void, a return keyword must not be followed by an object expression",
                method
            ),
            Message::NoEnclosingLoop { .. } => "No enclosing loop out of which to break or continue".into(),
            Message::NotAnException => "The type caught or thrown must be derived from System.Exception".into(),
            Message::StaticClassInstance(ty) => format!("Cannot create an instance of the static class '{}'", ty),
            Message::InstanceMemberInStaticClass(name) => {
                format!("'{}': cannot declare instance members in a static class", name)
            }
            Message::UnknownOption { option, .. } => format!("Unrecognized option: '{}'", option),
            Message::UnusedVariable(name) => format!("The variable '{}' is declared but never used", name),
            Message::AssignedNeverUsed(name) => {
                format!("The variable '{}' is assigned but its value is never used", name)
            }
        }
    }

    fn basic_text(&self) -> String {
        match self {
            Message::MissingSemicolon | Message::EndOfStatementExpected => "End of statement expected.".into(),
            Message::ExpectedOpenBrace | Message::ExpectedCloseBrace | Message::SyntaxError(_) => {
                "Syntax error.".into()
            }
            Message::ExpectedCloseParen => "')' expected.".into(),
            Message::TopLevelExpected => "Statement cannot appear outside of a method body.".into(),
            Message::InvalidExpressionTerm(_) => "Expression expected.".into(),
            Message::IdentifierExpected => "Identifier expected.".into(),
            Message::MissingEnd(construct) => match *construct {
                "Sub" => "'End Sub' expected.".into(),
                "Function" => "'End Function' expected.".into(),
                "For" => "'For' must end with a matching 'Next'.".into(),
                "Do" => "'Do' must end with a matching 'Loop'.".into(),
                "Module" | "Class" | "Namespace" => {
                    format!("'{0}' statement must end with a matching 'End {0}'.", construct)
                }
                _ => format!("'{0}' must end with a matching 'End {0}'.", construct),
            },
            Message::NewlineInConstant => "String constants must end with a double quote.".into(),
            Message::UnexpectedChar(_) => "Character is not valid.".into(),
            Message::IntegerTooLarge => "Overflow.".into(),
            Message::NameNotFound(name) => {
                format!("'{}' is not declared. It may be inaccessible due to its protection level.", name)
            }
            Message::TypeNotFound(name) => format!("Type '{}' is not defined.", name),
            Message::NoMember { ty, name } => format!("'{}' is not a member of '{}'.", name, ty),
            Message::CannotConvert { from, to } | Message::BadArgument { from, to, .. } => {
                format!("Value of type '{}' cannot be converted to '{}'.", from, to)
            }
            Message::BadBinaryOperands { op, lhs, rhs } => {
                format!("Operator '{}' is not defined for types '{}' and '{}'.", op, lhs, rhs)
            }
            Message::BadUnaryOperand { op, ty } => format!("Operator '{}' is not defined for type '{}'.", op, ty),
            Message::WrongArgCount { method, .. } => format!(
                "Overload resolution failed because no accessible '{}' accepts this number of arguments.",
                method
            ),
            Message::NotInvocable(_) | Message::NotAStatement => "Expression is not a method.".into(),
            Message::NotIndexable(ty) => {
                format!("Class '{}' cannot be indexed because it has no default property.", ty)
            }
            Message::DuplicateLocal(name) => {
                format!("Local variable '{}' is already declared in the current block.", name)
            }
            Message::DuplicateMember { name, .. } => {
                format!("'{}' has multiple definitions with identical signatures.", name)
            }
            Message::InstanceRequired(_) => "Cannot refer to an instance member of a class from within a shared method or shared member initializer without an explicit instance of the class.".into(),
            Message::LeftHandSideNotVariable => {
                "Expression is a value and therefore cannot be the target of an assignment.".into()
            }
            Message::NotAllPathsReturn(method) => format!(
                "Function '{}' doesn't return a value on all code paths. A null reference exception could occur at run time when the result is used.",
                method
            ),
            Message::ReturnValueRequired(_) => {
                "'Return' statement in a Function, Get, or Operator must return a value.".into()
            }
            Message::ReturnValueInVoid(_) => "'Return' statement in a Sub or a Set cannot return a value.".into(),
            Message::NoEnclosingLoop { exit, kind } => format!(
                "'{} {}' can only appear inside a '{}' statement.",
                if *exit { "Exit" } else { "Continue" },
                kind,
                kind
            ),
            Message::NotAnException => "'Throw' operand must derive from 'System.Exception'.".into(),
            Message::StaticClassInstance(ty) => format!("Module '{}' cannot be used as a type.", ty),
            Message::InstanceMemberInStaticClass(_) => {
                "Methods in a Module cannot be declared 'Overridable'.".into()
            }
            Message::UnknownOption { option, .. } => format!("unrecognized option '{}'; ignored", option),
            Message::UnusedVariable(name) | Message::AssignedNeverUsed(name) => {
                format!("Unused local variable: '{}'.", name)
            }
        }
    }
}

/// Collects diagnostics in emission order.
#[derive(Debug)]
pub struct DiagnosticSink {
    dialect: Dialect,
    file_name: String,
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new(dialect: Dialect, file_name: impl Into<String>) -> Self {
        Self { dialect, file_name: file_name.into(), diagnostics: Vec::new() }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Report a problem at a source position.
    pub fn report(&mut self, pos: Pos, message: Message) {
        let diag = self.build(&message).at(&self.file_name, pos.line, pos.column);
        self.diagnostics.push(diag);
    }

    /// Report a problem that has no source position (command line).
    pub fn report_global(&mut self, message: Message) {
        let diag = self.build(&message);
        self.diagnostics.push(diag);
    }

    fn build(&self, message: &Message) -> Diagnostic {
        let code = message.code(self.dialect);
        let text = message.text(self.dialect);
        match message.severity(self.dialect) {
            Severity::Error => Diagnostic::error(code, text),
            Severity::Warning => Diagnostic::warning(code, text),
        }
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_specific_wording() {
        let msg = Message::NameNotFound("x".into());
        assert_eq!(msg.code(Dialect::Brace), "CS0103");
        assert_eq!(msg.code(Dialect::Basic), "BC30451");
        assert_eq!(
            Message::MissingEnd("If").text(Dialect::Basic),
            "'If' must end with a matching 'End If'."
        );
        assert_eq!(
            Message::MissingEnd("Module").text(Dialect::Basic),
            "'Module' statement must end with a matching 'End Module'."
        );
    }

    #[test]
    fn missing_return_severity_depends_on_dialect() {
        let msg = Message::NotAllPathsReturn("F".into());
        assert_eq!(msg.severity(Dialect::Brace), Severity::Error);
        assert_eq!(msg.severity(Dialect::Basic), Severity::Warning);
    }

    #[test]
    fn sink_keeps_order_and_positions() {
        let mut sink = DiagnosticSink::new(Dialect::Brace, "snippet.0.cs");
        sink.report(Pos::new(3, 7), Message::MissingSemicolon);
        sink.report_global(Message::UnknownOption { option: "/foo".into(), ignored: false });
        let diags = sink.diagnostics();
        assert_eq!(diags[0].to_string(), "Line 3 (Column 7) : error CS1002: ; expected");
        assert_eq!(diags[1].to_string(), "error CS2007: Unrecognized option: '/foo'");
        assert_eq!(sink.error_count(), 2);
    }
}
