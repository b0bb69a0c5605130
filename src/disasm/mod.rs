// This module is the renderer. It takes a loaded Module and produces its textual IL, either
// as a complete listing with the assembly reference, assembly and module header blocks, or as
// the type definitions alone. In the latter form the compiler-generated `<Module>` placeholder
// class is stripped when it is empty, since every snippet carries it; a placeholder that owns
// members is kept. Method bodies are written flat or with control structures recognized by
// the structure module, which falls back to flat output for any span it cannot structure.

//! IL renderer.
//!
//! - [`output`] - indentation-aware text sink
//! - [`disassembler`] - headers, types, members and flat bodies
//! - [`flow`] - control-flow graph, dominators and loops
//! - [`structure`] - structured bodies

pub mod disassembler;
pub mod flow;
pub mod output;
pub mod structure;

pub use disassembler::Disassembler;
pub use output::TextOutput;

use crate::core::error::RenderError;
use crate::il::Module;

/// Text of the empty `<Module>` class at the start of every listing.
pub const MODULE_BOILERPLATE: &str = ".class private auto ansi '<Module>'\n{\n} // end of class <Module>\n\n";

/// Rendering switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Emit the assembly reference, assembly and module header blocks.
    pub include_headers: bool,
    /// Show try/catch/finally, loops and conditionals as nested blocks.
    pub detect_control_structures: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { include_headers: false, detect_control_structures: true }
    }
}

/// Render `module` as textual IL.
pub fn render(module: &Module, options: RenderOptions) -> Result<String, RenderError> {
    let disassembler = Disassembler::new(module, options.detect_control_structures);
    let mut out = TextOutput::new();
    if options.include_headers {
        disassembler.write_assembly_references(&mut out);
        disassembler.write_assembly_header(&mut out)?;
        out.line();
        disassembler.write_module_header(&mut out);
        out.line();
        out.line();
        disassembler.write_module_contents(&mut out)?;
        return Ok(out.into_string());
    }

    disassembler.write_module_contents(&mut out)?;
    let text = out.into_string();
    Ok(match text.strip_prefix(MODULE_BOILERPLATE) {
        Some(rest) => rest.to_string(),
        None => text,
    })
}
