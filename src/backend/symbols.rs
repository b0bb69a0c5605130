//! Debug symbol file written next to the artifact under `/debug`.
//!
//! The format is plain text: one `method` line per body followed by its
//! sequence points as `IL_xxxx line:column`.

use super::codegen::ModuleImage;
use crate::core::error::BackendResult;
use std::fmt::Write as _;
use std::path::Path;

pub fn render(image: &ModuleImage) -> String {
    let meta = &image.metadata;
    let mut out = String::new();
    for ((type_index, method), body) in meta.methods().zip(&image.bodies) {
        let _ = writeln!(out, "method {}", meta.body_symbol(type_index, method));
        for (offset, pos) in &body.sequence_points {
            let _ = writeln!(out, "  IL_{:04x} {}:{}", offset, pos.line, pos.column);
        }
    }
    out
}

pub fn write_symbols(image: &ModuleImage, path: &Path) -> BackendResult<()> {
    std::fs::write(path, render(image))?;
    Ok(())
}
