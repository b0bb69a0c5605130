// This module opens a compiled artifact and rebuilds the module the renderer works on. The
// artifact is parsed with object::File: the `.ilmeta` section is decoded back into the
// metadata model and every method row is paired with its body symbol in the `.il` section.
// Overloads share a symbol name, so symbols of one name are handed out in address order,
// which is the order the assembler wrote them. Every body is decoded eagerly; a stream that
// does not decode is a load error rather than something the renderer has to cope with.

//! Artifact loader.

use crate::compiler::ArtifactHandle;
use crate::core::error::LoadError;
use crate::il::{codec, decode_stream, MethodBody, Module, CODE_RVA_BASE, CODE_SECTION, METADATA_SECTION};
use hashbrown::HashMap;
use object::{Object, ObjectSection, ObjectSymbol};
use std::collections::VecDeque;
use std::path::Path;

/// Load the artifact owned by `handle`.
pub fn load(handle: &ArtifactHandle) -> Result<Module, LoadError> {
    load_path(handle.path())
}

/// Load an artifact from disk.
pub fn load_path(path: &Path) -> Result<Module, LoadError> {
    let bytes = std::fs::read(path)?;
    load_bytes(&bytes)
}

/// Load an artifact from memory.
pub fn load_bytes(bytes: &[u8]) -> Result<Module, LoadError> {
    let file = object::File::parse(bytes)?;
    let code = file.section_by_name(CODE_SECTION).ok_or(LoadError::MissingSection(CODE_SECTION))?;
    let meta_section = file
        .section_by_name(METADATA_SECTION)
        .ok_or(LoadError::MissingSection(METADATA_SECTION))?;
    let code_data = code.data()?;
    let metadata = codec::decode(meta_section.data()?)?;
    log::debug!(
        "loaded {} code bytes, {} metadata bytes",
        code_data.len(),
        meta_section.size()
    );

    let mut symbols: HashMap<&str, Vec<(u64, u64)>> = HashMap::new();
    for symbol in file.symbols() {
        if symbol.section_index() != Some(code.index()) {
            continue;
        }
        let Ok(name) = symbol.name() else { continue };
        symbols.entry(name).or_default().push((symbol.address(), symbol.size()));
    }
    let mut symbols: HashMap<&str, VecDeque<(u64, u64)>> = symbols
        .into_iter()
        .map(|(name, mut spans)| {
            spans.sort_unstable();
            (name, spans.into())
        })
        .collect();

    let mut bodies = Vec::new();
    for (type_index, method) in metadata.methods() {
        let symbol = metadata.body_symbol(type_index, method);
        let (offset, size) = symbols
            .get_mut(symbol.as_str())
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| LoadError::MissingBody { symbol: symbol.clone() })?;
        let start = usize::try_from(offset).map_err(|_| LoadError::BodyOutOfRange { symbol: symbol.clone() })?;
        let end = start
            .checked_add(size as usize)
            .filter(|&end| end <= code_data.len())
            .ok_or_else(|| LoadError::BodyOutOfRange { symbol: symbol.clone() })?;
        let code = &code_data[start..end];
        let instructions =
            decode_stream(code).map_err(|source| LoadError::Decode { method: symbol.clone(), source })?;
        log::trace!("{}: {} instructions", symbol, instructions.len());
        bodies.push(Some(MethodBody {
            rva: CODE_RVA_BASE + start as u32,
            code_size: code.len() as u32,
            instructions,
        }));
    }

    Ok(Module { metadata, bodies })
}

#[cfg(test)]
mod tests {
    use super::*;
    use object::write::{Object as WriteObject, Symbol, SymbolSection};
    use object::{Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope};

    #[test]
    fn missing_sections_are_reported() {
        let obj = WriteObject::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
        let bytes = obj.write().unwrap();
        assert!(matches!(load_bytes(&bytes), Err(LoadError::MissingSection(".il"))));
    }

    #[test]
    fn garbage_is_not_an_object() {
        assert!(matches!(load_bytes(b"not an object"), Err(LoadError::Object(_))));
    }

    #[test]
    fn bad_metadata_is_reported() {
        let mut obj = WriteObject::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
        let code = obj.add_section(Vec::new(), b".il".to_vec(), SectionKind::ReadOnlyData);
        let meta = obj.add_section(Vec::new(), b".ilmeta".to_vec(), SectionKind::ReadOnlyData);
        obj.append_section_data(code, &[0x2A], 4);
        obj.append_section_data(meta, b"XXXX", 1);
        obj.add_symbol(Symbol {
            name: b"P::M".to_vec(),
            value: 0,
            size: 1,
            kind: SymbolKind::Data,
            scope: SymbolScope::Compilation,
            weak: false,
            section: SymbolSection::Section(code),
            flags: SymbolFlags::None,
        });
        let bytes = obj.write().unwrap();
        assert!(matches!(load_bytes(&bytes), Err(LoadError::Metadata(_))));
    }
}
