// This module writes a compiled module image to its on-disk artifact. The artifact is an ELF
// relocatable object produced with object::write: method bodies are appended to the `.il`
// section on four byte boundaries with one data symbol per method named `Type::Method`, and
// the encoded metadata goes to the `.ilmeta` section. Overloads share a symbol name; the
// loader pairs them with methods in address order.

//! Artifact writer.

use super::codegen::ModuleImage;
use crate::core::error::{BackendError, BackendResult};
use crate::il::{codec, CODE_SECTION, METADATA_SECTION};
use object::write::{Object, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope};
use std::path::Path;

const BODY_ALIGNMENT: u64 = 4;

/// Serialize `image` into object file bytes.
pub fn assemble(image: &ModuleImage) -> BackendResult<Vec<u8>> {
    let meta = &image.metadata;
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let code = obj.add_section(Vec::new(), CODE_SECTION.as_bytes().to_vec(), SectionKind::ReadOnlyData);
    let metadata = obj.add_section(Vec::new(), METADATA_SECTION.as_bytes().to_vec(), SectionKind::ReadOnlyData);

    let methods: Vec<_> = meta.methods().collect();
    if methods.len() != image.bodies.len() {
        return Err(BackendError::codegen(format!(
            "{} methods but {} bodies",
            methods.len(),
            image.bodies.len()
        )));
    }

    for ((type_index, method), body) in methods.into_iter().zip(&image.bodies) {
        let offset = obj.append_section_data(code, &body.code, BODY_ALIGNMENT);
        obj.add_symbol(Symbol {
            name: meta.body_symbol(type_index, method).into_bytes(),
            value: offset,
            size: body.code.len() as u64,
            kind: SymbolKind::Data,
            scope: SymbolScope::Compilation,
            weak: false,
            section: SymbolSection::Section(code),
            flags: SymbolFlags::None,
        });
    }

    let encoded = codec::encode(meta);
    obj.append_section_data(metadata, &encoded, 1);

    let bytes = obj.write()?;
    log::debug!(
        "assembled {} bodies, {} metadata bytes, {} object bytes",
        image.bodies.len(),
        encoded.len(),
        bytes.len()
    );
    Ok(bytes)
}

/// Assemble `image` and write it to `path`.
pub fn write_artifact(image: &ModuleImage, path: &Path) -> BackendResult<()> {
    let bytes = assemble(image)?;
    std::fs::write(path, bytes)?;
    Ok(())
}
