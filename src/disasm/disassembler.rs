// This module turns a loaded Module into ilasm-style text. The Disassembler writes the
// assembly reference list, the assembly and module header blocks and then every top-level
// type in definition order, nested types inside their enclosing type. Within a type the
// sections come in a fixed order: custom attributes, nested types, fields, methods. Names are
// resolved through a Resolver bound to the member being written so that an unresolvable token
// is reported together with the place it was found. Method bodies are written flat here; the
// structured form lives in the structure module and shares the instruction formatting.

//! ilasm-style disassembler.

use super::flow::ControlFlowGraph;
use super::output::TextOutput;
use super::structure;
use crate::core::error::RenderError;
use crate::il::metadata::{
    ClauseKind, CustomAttribute, MethodDef, MethodSig, TableKind, TypeDef, TypeSig, Visibility,
};
use crate::il::{Instruction, MethodBody, Module, ModuleMetadata, OpCode, Operand, Token};
use std::borrow::Cow;
use std::fmt::Write as _;

const SHA1: u32 = 0x8004;
const IL_ONLY: u32 = 0x0000_0001;

/// Writes the parts of a module listing.
pub struct Disassembler<'m> {
    module: &'m Module,
    detect_control_structures: bool,
}

impl<'m> Disassembler<'m> {
    pub fn new(module: &'m Module, detect_control_structures: bool) -> Self {
        Self { module, detect_control_structures }
    }

    fn meta(&self) -> &'m ModuleMetadata {
        &self.module.metadata
    }

    pub fn write_assembly_references(&self, out: &mut TextOutput) {
        for reference in &self.meta().assembly_refs {
            out.write_line(&format!(".assembly extern {}", escape_name(&reference.name)));
            out.write_line("{");
            out.indent();
            if let Some(token) = reference.public_key_token {
                out.write_line(".publickeytoken = (");
                out.indent();
                write_hex(out, &token);
                out.unindent();
                out.write_line(")");
            }
            out.write_line(&format!(".ver {}", reference.version));
            out.unindent();
            out.write_line("}");
        }
    }

    pub fn write_assembly_header(&self, out: &mut TextOutput) -> Result<(), RenderError> {
        let assembly = &self.meta().assembly;
        let names = Resolver::new(self.meta(), &assembly.name);
        out.write_line(&format!(".assembly {}", escape_name(&assembly.name)));
        out.write_line("{");
        out.indent();
        write_custom_attributes(out, &names, &assembly.custom_attributes)?;
        let mut hash = format!(".hash algorithm 0x{:08x}", assembly.hash_algorithm);
        if assembly.hash_algorithm == SHA1 {
            hash.push_str(" // SHA1");
        }
        out.write_line(&hash);
        out.write_line(&format!(".ver {}", assembly.version));
        out.unindent();
        out.write_line("}");
        Ok(())
    }

    pub fn write_module_header(&self, out: &mut TextOutput) {
        let meta = self.meta();
        out.write_line(&format!(".module {}", escape_name(&meta.module_name)));
        out.write_line(&format!("// MVID: {{{}}}", format_guid(&meta.mvid)));
        out.write_line(&format!(".corflags 0x{:08x} // ILOnly", IL_ONLY));
    }

    /// Every top-level type, each followed by a blank line.
    pub fn write_module_contents(&self, out: &mut TextOutput) -> Result<(), RenderError> {
        let rows = self.meta().method_rows();
        for (index, ty) in self.meta().types.iter().enumerate() {
            if ty.enclosing.is_none() {
                self.write_type(out, index, &rows)?;
                out.line();
            }
        }
        Ok(())
    }

    fn write_type(&self, out: &mut TextOutput, index: usize, rows: &[usize]) -> Result<(), RenderError> {
        let meta = self.meta();
        let ty = &meta.types[index];
        let names = Resolver::new(meta, &meta.type_full_name(index));

        let mut head = String::from(".class ");
        head.push_str(type_visibility(ty));
        head.push_str(" auto ansi");
        if ty.flags.is_abstract {
            head.push_str(" abstract");
        }
        if ty.flags.is_sealed {
            head.push_str(" sealed");
        }
        if ty.flags.before_field_init {
            head.push_str(" beforefieldinit");
        }
        head.push(' ');
        head.push_str(&declared_name(ty));
        out.write_line(&head);
        if let Some(base) = ty.extends {
            out.indent();
            out.write_line(&format!("extends {}", names.type_token(base)?));
            out.unindent();
        }
        out.write_line("{");
        out.indent();
        write_custom_attributes(out, &names, &ty.custom_attributes)?;

        let nested: Vec<usize> = (0..meta.types.len())
            .filter(|&i| meta.types[i].enclosing == Some(index))
            .collect();
        if !nested.is_empty() {
            out.write_line("// Nested Types");
            for inner in nested {
                self.write_type(out, inner, rows)?;
                out.line();
            }
        }
        if !ty.fields.is_empty() {
            out.write_line("// Fields");
            for field in &ty.fields {
                let mut line = format!(".field {}", member_visibility(field.visibility));
                if field.is_static {
                    line.push_str(" static");
                }
                write!(line, " {} {}", names.sig(&field.sig)?, escape_name(&field.name))?;
                out.write_line(&line);
            }
            out.line();
        }
        if !ty.methods.is_empty() {
            out.write_line("// Methods");
            for (i, method) in ty.methods.iter().enumerate() {
                self.write_method(out, index, method, rows[index] + i)?;
                out.line();
            }
        }

        out.unindent();
        let end_name = if ty.enclosing.is_some() { ty.name.clone() } else { meta.type_full_name(index) };
        out.write_line(&format!("}} // end of class {}", end_name));
        Ok(())
    }

    fn write_method(
        &self,
        out: &mut TextOutput,
        type_index: usize,
        method: &'m MethodDef,
        row: usize,
    ) -> Result<(), RenderError> {
        let meta = self.meta();
        let symbol = meta.body_symbol(type_index, method);
        let ctx = MethodContext { names: Resolver::new(meta, &symbol), method };

        let flags = &method.flags;
        let mut head = format!(".method {}", member_visibility(flags.visibility));
        for (set, word) in [
            (flags.hide_by_sig, "hidebysig"),
            (flags.special_name, "specialname"),
            (flags.rt_special_name, "rtspecialname"),
            (flags.is_static, "static"),
        ] {
            if set {
                head.push(' ');
                head.push_str(word);
            }
        }
        out.write_line(&head);

        out.indent();
        let mut decl = String::new();
        if method.sig.has_this {
            decl.push_str("instance ");
        }
        write!(decl, "{} {} (", ctx.names.sig(&method.sig.ret)?, escape_name(&method.name))?;
        if method.sig.params.is_empty() {
            decl.push_str(") cil managed");
            out.write_line(&decl);
        } else {
            out.write_line(&decl);
            out.indent();
            let count = method.sig.params.len();
            for (i, param) in method.sig.params.iter().enumerate() {
                let mut line = ctx.names.sig(param)?;
                if let Some(name) = method.param_names.get(i) {
                    write!(line, " {}", escape_name(name))?;
                }
                if i + 1 < count {
                    line.push(',');
                }
                out.write_line(&line);
            }
            out.unindent();
            out.write_line(") cil managed");
        }
        out.unindent();

        out.write_line("{");
        out.indent();
        write_custom_attributes(out, &ctx.names, &method.custom_attributes)?;
        if let Some(body) = self.module.body(row) {
            self.write_body(out, &ctx, body)?;
        }
        out.unindent();
        out.write_line(&format!("}} // end of method {}", symbol));
        Ok(())
    }

    fn write_body(&self, out: &mut TextOutput, ctx: &MethodContext<'_>, body: &MethodBody) -> Result<(), RenderError> {
        let method = ctx.method;
        out.write_line(&format!("// Method begins at RVA 0x{:x}", body.rva));
        out.write_line(&format!("// Code size {} (0x{:x})", body.code_size, body.code_size));
        out.write_line(&format!(".maxstack {}", method.max_stack));
        if !method.locals.is_empty() {
            out.write_line(".locals init (");
            out.indent();
            let count = method.locals.len();
            for (i, local) in method.locals.iter().enumerate() {
                let mut line = format!("[{}] {}", i, ctx.names.sig(&local.sig)?);
                if let Some(name) = &local.name {
                    write!(line, " {}", escape_name(name))?;
                }
                if i + 1 < count {
                    line.push(',');
                }
                out.write_line(&line);
            }
            out.unindent();
            out.write_line(")");
        }
        out.line();

        let cfg = ControlFlowGraph::build(ctx.names.site(), &body.instructions, &method.clauses)?;
        if self.detect_control_structures {
            return structure::write_structured(out, ctx, &body.instructions, &method.clauses, &cfg);
        }

        for instr in &body.instructions {
            out.write_line(&ctx.instruction_line(instr, None)?);
        }
        if !method.clauses.is_empty() {
            out.line();
            for clause in &method.clauses {
                let handler = match clause.kind {
                    ClauseKind::Catch(token) => format!("catch {}", ctx.names.type_token(token)?),
                    ClauseKind::Finally => "finally".to_string(),
                };
                out.write_line(&format!(
                    ".try IL_{:04x} to IL_{:04x} {} handler IL_{:04x} to IL_{:04x}",
                    clause.try_offset,
                    clause.try_end(),
                    handler,
                    clause.handler_offset,
                    clause.handler_end()
                ));
            }
        }
        Ok(())
    }
}

/// Resolves tokens to ilasm names, reporting failures against one site.
pub(crate) struct Resolver<'m> {
    meta: &'m ModuleMetadata,
    site: String,
}

impl<'m> Resolver<'m> {
    pub(crate) fn new(meta: &'m ModuleMetadata, site: &str) -> Self {
        Self { meta, site: site.to_string() }
    }

    pub(crate) fn site(&self) -> &str {
        &self.site
    }

    fn unknown(&self, token: Token) -> RenderError {
        RenderError::UnknownToken { method: self.site.clone(), token }
    }

    fn row<T>(&self, items: &'m [T], token: Token, table: TableKind) -> Result<&'m T, RenderError> {
        if token.table() != Some(table) {
            return Err(self.unknown(token));
        }
        token.index().and_then(|i| items.get(i)).ok_or_else(|| self.unknown(token))
    }

    /// `[assembly]Namespace.Name` for references, the full name for definitions.
    pub(crate) fn type_token(&self, token: Token) -> Result<String, RenderError> {
        match token.table() {
            Some(TableKind::TypeRef) => {
                let ty = self.row(&self.meta.type_refs, token, TableKind::TypeRef)?;
                let scope = self.row(&self.meta.assembly_refs, ty.scope, TableKind::AssemblyRef)?;
                let name = if ty.namespace.is_empty() {
                    ty.name.clone()
                } else {
                    format!("{}.{}", ty.namespace, ty.name)
                };
                Ok(format!("[{}]{}", escape_name(&scope.name), escape_name(&name)))
            }
            Some(TableKind::TypeDef) => {
                let index = token
                    .index()
                    .filter(|&i| i < self.meta.types.len())
                    .ok_or_else(|| self.unknown(token))?;
                Ok(self.type_def_name(index))
            }
            _ => Err(self.unknown(token)),
        }
    }

    fn type_def_name(&self, index: usize) -> String {
        let ty = &self.meta.types[index];
        match ty.enclosing {
            Some(outer) => format!("{}/{}", self.type_def_name(outer), escape_name(&ty.name)),
            None => declared_name(ty).into_owned(),
        }
    }

    pub(crate) fn sig(&self, sig: &TypeSig) -> Result<String, RenderError> {
        Ok(match sig {
            TypeSig::Void => "void".to_string(),
            TypeSig::Boolean => "bool".to_string(),
            TypeSig::Int32 => "int32".to_string(),
            TypeSig::String => "string".to_string(),
            TypeSig::Object => "object".to_string(),
            TypeSig::Class(token) => format!("class {}", self.type_token(*token)?),
            TypeSig::SzArray(element) => format!("{}[]", self.sig(element)?),
        })
    }

    fn method(&self, sig: &MethodSig, parent: &str, name: &str) -> Result<String, RenderError> {
        let mut text = String::new();
        if sig.has_this {
            text.push_str("instance ");
        }
        let params = sig.params.iter().map(|p| self.sig(p)).collect::<Result<Vec<_>, _>>()?;
        write!(text, "{} {}::{}({})", self.sig(&sig.ret)?, parent, escape_name(name), params.join(", "))?;
        Ok(text)
    }

    pub(crate) fn method_token(&self, token: Token) -> Result<String, RenderError> {
        match token.table() {
            Some(TableKind::MemberRef) => {
                let member = self.row(&self.meta.member_refs, token, TableKind::MemberRef)?;
                self.method(&member.sig, &self.type_token(member.parent)?, &member.name)
            }
            Some(TableKind::MethodDef) => {
                let (type_index, def) = token
                    .index()
                    .and_then(|i| self.meta.methods().nth(i))
                    .ok_or_else(|| self.unknown(token))?;
                self.method(&def.sig, &self.type_def_name(type_index), &def.name)
            }
            _ => Err(self.unknown(token)),
        }
    }

    fn field_token(&self, token: Token) -> Result<String, RenderError> {
        let (type_index, field) = token
            .index()
            .and_then(|i| self.meta.fields().nth(i))
            .ok_or_else(|| self.unknown(token))?;
        Ok(format!(
            "{} {}::{}",
            self.sig(&field.sig)?,
            self.type_def_name(type_index),
            escape_name(&field.name)
        ))
    }

    /// Text of any token operand, chosen by its table.
    pub(crate) fn token(&self, token: Token) -> Result<String, RenderError> {
        match token.table() {
            Some(TableKind::UserString) => {
                let text = self.row(&self.meta.user_strings, token, TableKind::UserString)?;
                Ok(string_literal(text))
            }
            Some(TableKind::MemberRef | TableKind::MethodDef) => self.method_token(token),
            Some(TableKind::Field) => self.field_token(token),
            Some(TableKind::TypeRef | TableKind::TypeDef) => self.type_token(token),
            _ => Err(self.unknown(token)),
        }
    }
}

/// Names and operands of one method body.
pub(crate) struct MethodContext<'m> {
    pub(crate) names: Resolver<'m>,
    pub(crate) method: &'m MethodDef,
}

impl MethodContext<'_> {
    fn argument(&self, index: u16) -> String {
        let index = usize::from(index);
        let position = if self.method.sig.has_this {
            match index.checked_sub(1) {
                Some(position) => position,
                None => return "this".to_string(),
            }
        } else {
            index
        };
        match self.method.param_names.get(position) {
            Some(name) => escape_name(name).into_owned(),
            None => format!("A_{}", index),
        }
    }

    fn local(&self, index: u16) -> String {
        match self.method.locals.get(usize::from(index)).and_then(|l| l.name.as_deref()) {
            Some(name) => escape_name(name).into_owned(),
            None => format!("V_{}", index),
        }
    }

    /// `IL_xxxx: mnemonic operand`, with `label` replacing a branch target.
    pub(crate) fn instruction_line(&self, instr: &Instruction, label: Option<&str>) -> Result<String, RenderError> {
        let mut line = format!("IL_{:04x}: {}", instr.offset, instr.opcode.name());
        let operand = match instr.operand {
            Operand::None => None,
            Operand::Int(value) => Some(value.to_string()),
            Operand::Var(index) => Some(match instr.opcode {
                OpCode::Ldarg | OpCode::LdargS | OpCode::StargS => self.argument(index),
                _ => self.local(index),
            }),
            Operand::Target(target) => Some(match label {
                Some(label) => label.to_string(),
                None => format!("IL_{:04x}", target),
            }),
            Operand::Token(token) => Some(self.names.token(token)?),
        };
        if let Some(operand) = operand {
            line.push(' ');
            line.push_str(&operand);
        }
        Ok(line)
    }
}

fn write_custom_attributes(
    out: &mut TextOutput,
    names: &Resolver<'_>,
    attributes: &[CustomAttribute],
) -> Result<(), RenderError> {
    for attribute in attributes {
        out.write_line(&format!(".custom {} = (", names.method_token(attribute.ctor)?));
        out.indent();
        write_hex(out, &attribute.blob);
        out.unindent();
        out.write_line(")");
    }
    Ok(())
}

/// Bytes as lowercase hex pairs, sixteen per line.
fn write_hex(out: &mut TextOutput, bytes: &[u8]) {
    for chunk in bytes.chunks(16) {
        let line: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        out.write_line(&line.join(" "));
    }
}

fn type_visibility(ty: &TypeDef) -> &'static str {
    match (ty.enclosing.is_some(), ty.flags.visibility) {
        (false, Visibility::Public) => "public",
        (false, _) => "private",
        (true, Visibility::Public) => "nested public",
        (true, Visibility::Private) => "nested private",
        (true, Visibility::Assembly) => "nested assembly",
        (true, Visibility::Family) => "nested family",
    }
}

fn member_visibility(visibility: Visibility) -> &'static str {
    match visibility {
        Visibility::Private => "private",
        Visibility::Assembly => "assembly",
        Visibility::Family => "family",
        Visibility::Public => "public",
    }
}

/// Name in the `.class` line: `Namespace.Name`, or just the name for nested types.
fn declared_name(ty: &TypeDef) -> Cow<'_, str> {
    if ty.enclosing.is_some() || ty.namespace.is_empty() {
        escape_name(&ty.name)
    } else {
        Cow::Owned(escape_name(&format!("{}.{}", ty.namespace, ty.name)).into_owned())
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$' | '@' | '`' | '?')
}

/// Quote a name that ilasm would not accept bare.
pub(crate) fn escape_name(name: &str) -> Cow<'_, str> {
    let plain = name.chars().next().is_some_and(|c| !c.is_ascii_digit()) && name.chars().all(is_identifier_char);
    if plain {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("'{}'", name.replace('\'', "\\'")))
    }
}

pub(crate) fn string_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn format_guid(bytes: &[u8; 16]) -> String {
    let data1 = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let data2 = u16::from_le_bytes([bytes[4], bytes[5]]);
    let data3 = u16::from_le_bytes([bytes[6], bytes[7]]);
    let tail: String = bytes[10..].iter().map(|b| format!("{:02X}", b)).collect();
    format!(
        "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{}",
        data1, data2, data3, bytes[8], bytes[9], tail
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_quoted_when_needed() {
        assert_eq!(escape_name("Program"), "Program");
        assert_eq!(escape_name(".ctor"), ".ctor");
        assert_eq!(escape_name("<Module>"), "'<Module>'");
        assert_eq!(escape_name("1st"), "'1st'");
    }

    #[test]
    fn string_literals_are_escaped() {
        assert_eq!(string_literal("a\"b\\c\n"), "\"a\\\"b\\\\c\\n\"");
    }

    #[test]
    fn guid_layout() {
        let bytes = [
            0x78, 0x56, 0x34, 0x12, 0x34, 0x12, 0x78, 0x56, 0x9a, 0xbc, 0xde, 0xf0, 0x12, 0x34, 0x56, 0x78,
        ];
        assert_eq!(format_guid(&bytes), "12345678-1234-5678-9ABC-DEF012345678");
    }
}
