// This module holds the representation shared by the compiler backends, the loader and the
// renderer: the CIL opcode table, the decoded instruction form, the metadata model and its
// binary codec. A loaded Module pairs the metadata with one decoded body per method row;
// abstract methods have no body. Nothing here touches the file system.

//! Intermediate-language model.

pub mod codec;
pub mod instruction;
pub mod metadata;
pub mod opcodes;

pub use instruction::{decode_stream, Instruction, Operand};
pub use metadata::{ModuleMetadata, Token};
pub use opcodes::OpCode;

/// Section holding the method bodies, one symbol per method.
pub const CODE_SECTION: &str = ".il";

/// Section holding the encoded [`ModuleMetadata`].
pub const METADATA_SECTION: &str = ".ilmeta";

/// Base RVA of the first method body, as laid out by a PE writer after the
/// CLI header.
pub const CODE_RVA_BASE: u32 = 0x2050;

/// Decoded body of one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody {
    pub rva: u32,
    pub code_size: u32,
    pub instructions: Vec<Instruction>,
}

/// A compiled module as seen by the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub metadata: ModuleMetadata,
    /// Indexed by method row.
    pub bodies: Vec<Option<MethodBody>>,
}

impl Module {
    /// Body of the method at `row`, if it has one.
    pub fn body(&self, row: usize) -> Option<&MethodBody> {
        self.bodies.get(row).and_then(Option::as_ref)
    }
}
