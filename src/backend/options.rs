//! Command line option parsing for the in-process compilers.

use crate::frontend::{Dialect, DiagnosticSink, Message};

/// Switches understood by both compilers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandLine {
    pub optimize: bool,
    pub debug: bool,
}

/// Parse a whitespace separated option string such as `/unsafe /o+ /debug`.
///
/// Unknown switches are reported to `sink` without a source position.
pub fn parse(options: &str, dialect: Dialect, sink: &mut DiagnosticSink) -> CommandLine {
    let mut cmd = CommandLine::default();
    for option in options.split_whitespace() {
        let Some(switch) = option.strip_prefix('/').or_else(|| option.strip_prefix('-')) else {
            sink.report_global(Message::UnknownOption { option: option.to_string(), ignored: false });
            continue;
        };
        let (name, value) = split_switch(switch);
        match (name.to_ascii_lowercase().as_str(), value) {
            ("o" | "optimize", Some(on)) => cmd.optimize = on,
            ("debug", Some(on)) => cmd.debug = on,
            ("unsafe", _) if dialect == Dialect::Brace => {}
            // The Basic compiler has no unsafe code.
            ("unsafe", _) => {
                sink.report_global(Message::UnknownOption { option: option.to_string(), ignored: true })
            }
            _ => sink.report_global(Message::UnknownOption { option: option.to_string(), ignored: false }),
        }
    }
    log::debug!("options '{}' -> {:?}", options, cmd);
    cmd
}

/// Split `o+`, `debug-`, `debug:full` into a name and an on/off value.
fn split_switch(switch: &str) -> (&str, Option<bool>) {
    if let Some((name, arg)) = switch.split_once(':') {
        let on = matches!(arg.to_ascii_lowercase().as_str(), "full" | "pdbonly" | "portable");
        return (name, Some(on));
    }
    match switch.as_bytes().last() {
        Some(b'+') => (&switch[..switch.len() - 1], Some(true)),
        Some(b'-') => (&switch[..switch.len() - 1], Some(false)),
        _ => (switch, Some(true)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Severity;

    #[test]
    fn global_option_string() {
        let mut sink = DiagnosticSink::new(Dialect::Brace, "snippet.cs");
        let cmd = parse("/unsafe /o+ /debug", Dialect::Brace, &mut sink);
        assert_eq!(cmd, CommandLine { optimize: true, debug: true });
        assert!(sink.diagnostics().is_empty());

        let cmd = parse("/unsafe /o-", Dialect::Brace, &mut sink);
        assert_eq!(cmd, CommandLine { optimize: false, debug: false });
    }

    #[test]
    fn basic_ignores_unsafe_with_warning() {
        let mut sink = DiagnosticSink::new(Dialect::Basic, "snippet.vb");
        let cmd = parse("/unsafe /o+", Dialect::Basic, &mut sink);
        assert!(cmd.optimize);
        let diags = sink.diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, "BC2007");
        assert_eq!(diags[0].severity, Severity::Warning);
        assert_eq!(diags[0].file_name, None);
    }

    #[test]
    fn unknown_switch_is_an_error() {
        let mut sink = DiagnosticSink::new(Dialect::Brace, "snippet.cs");
        parse("/frobnicate", Dialect::Brace, &mut sink);
        assert!(sink.has_errors());
        assert_eq!(sink.diagnostics()[0].code, "CS2007");
    }

    #[test]
    fn switch_forms() {
        assert_eq!(split_switch("debug:full"), ("debug", Some(true)));
        assert_eq!(split_switch("optimize-"), ("optimize", Some(false)));
        assert_eq!(split_switch("debug"), ("debug", Some(true)));
    }
}
