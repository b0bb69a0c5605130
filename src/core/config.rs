//! Static configuration shared by every compilation.

use crate::il::metadata::Version;

/// Assemblies referenced by every compilation, whatever the language.
pub static REFERENCES: &[&str] = &[
    "System.dll",
    "System.Core.dll",
    "System.Data.dll",
    "System.Data.DataSetExtensions.dll",
    "System.Xml.dll",
    "System.Xml.Linq.dll",
    "Microsoft.VisualBasic.dll",
    "System.Net.dll",
    "System.Web.dll",
    "System.ComponentModel.DataAnnotations.dll",
    "System.Drawing.dll",
];

/// Compiler versions offered to callers and the `mscorlib` each one targets.
pub static COMPILER_VERSIONS: &[(&str, Version)] = &[
    ("v2.0", Version::new(2, 0, 0, 0)),
    ("v3.5", Version::new(2, 0, 0, 0)),
    ("v4.0", Version::new(4, 0, 0, 0)),
];

pub const DEFAULT_COMPILER_VERSION: &str = "v4.0";

/// Starter program per language key.
pub static EXAMPLE_SNIPPETS: &[(&str, &str)] = &[
    (
        "C#",
        "using System;\n\
         \n\
         public class Program\n\
         {\n\
         \x20   static void Main(string[] args)\n\
         \x20   {\n\
         \x20       Console.WriteLine(\"Hello, MuchDifferent!\");\n\
         \x20   }\n\
         }\n",
    ),
    (
        "VB",
        "Imports System\n\
         \n\
         Public Module Program\n\
         \x20   Public Sub Main(args() As String)\n\
         \x20       Console.WriteLine(\"Hello, MuchDifferent!\")\n\
         \x20   End Sub\n\
         End Module\n",
    ),
];

/// Public key token of the framework assemblies.
pub const ECMA_PUBLIC_KEY_TOKEN: [u8; 8] = [0xB7, 0x7A, 0x5C, 0x56, 0x19, 0x34, 0xE0, 0x89];

/// Name given to every compiled assembly.
pub const ASSEMBLY_NAME: &str = "snippet";

/// Look up the example program of a language key.
pub fn example_snippet(language_key: &str) -> Option<&'static str> {
    EXAMPLE_SNIPPETS
        .iter()
        .find(|(key, _)| *key == language_key)
        .map(|(_, code)| *code)
}

/// `mscorlib` version targeted by a compiler version.
pub fn mscorlib_version(compiler_version: &str) -> Option<Version> {
    COMPILER_VERSIONS
        .iter()
        .find(|(name, _)| *name == compiler_version)
        .map(|(_, version)| *version)
}

/// The command line handed to every backend.
pub fn option_string(optimize: bool, debug: bool) -> String {
    format!(
        "/unsafe /o{}{}",
        if optimize { '+' } else { '-' },
        if debug { " /debug" } else { "" }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_strings() {
        assert_eq!(option_string(true, true), "/unsafe /o+ /debug");
        assert_eq!(option_string(false, false), "/unsafe /o-");
    }

    #[test]
    fn versions_and_examples() {
        assert_eq!(mscorlib_version("v3.5"), Some(Version::new(2, 0, 0, 0)));
        assert_eq!(mscorlib_version("v9.9"), None);
        assert!(example_snippet("C#").unwrap().contains("Console.WriteLine(\"Hello, MuchDifferent!\");"));
        assert!(example_snippet("VB").unwrap().starts_with("Imports System\n\nPublic Module Program\n    Public Sub"));
        assert_eq!(REFERENCES.len(), 11);
    }
}
