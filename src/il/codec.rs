//! Binary encoding of [`ModuleMetadata`] for the artifact's metadata section.
//!
//! The section starts with the ECMA metadata signature `BSJB` and a format
//! version, followed by the tables in a fixed order. Integers are little
//! endian, strings are a `u32` byte length followed by UTF-8.

use super::metadata::*;
use crate::core::error::MetadataError;

/// `BSJB` read as a little-endian `u32`.
pub const METADATA_SIGNATURE: u32 = 0x424A_5342;
pub const METADATA_VERSION: u16 = 1;

const SIG_VOID: u8 = 0x01;
const SIG_BOOLEAN: u8 = 0x02;
const SIG_I4: u8 = 0x08;
const SIG_STRING: u8 = 0x0E;
const SIG_CLASS: u8 = 0x12;
const SIG_OBJECT: u8 = 0x1C;
const SIG_SZARRAY: u8 = 0x1D;

/// Serialize metadata into the section layout.
pub fn encode(meta: &ModuleMetadata) -> Vec<u8> {
    let mut w = Writer::default();
    w.u32(METADATA_SIGNATURE);
    w.u16(METADATA_VERSION);

    w.str(&meta.assembly.name);
    w.version(meta.assembly.version);
    w.u32(meta.assembly.hash_algorithm);
    w.attributes(&meta.assembly.custom_attributes);
    w.str(&meta.module_name);
    w.bytes.extend_from_slice(&meta.mvid);

    w.u32(meta.assembly_refs.len() as u32);
    for r in &meta.assembly_refs {
        w.str(&r.name);
        w.version(r.version);
        match r.public_key_token {
            Some(token) => {
                w.u8(1);
                w.bytes.extend_from_slice(&token);
            }
            None => w.u8(0),
        }
    }

    w.u32(meta.type_refs.len() as u32);
    for r in &meta.type_refs {
        w.u32(r.scope.0);
        w.str(&r.namespace);
        w.str(&r.name);
    }

    w.u32(meta.member_refs.len() as u32);
    for r in &meta.member_refs {
        w.u32(r.parent.0);
        w.str(&r.name);
        w.method_sig(&r.sig);
    }

    w.u32(meta.user_strings.len() as u32);
    for s in &meta.user_strings {
        w.str(s);
    }

    w.u32(meta.types.len() as u32);
    for ty in &meta.types {
        w.str(&ty.namespace);
        w.str(&ty.name);
        w.visibility(ty.flags.visibility);
        w.u8(ty.flags.is_abstract as u8 | (ty.flags.is_sealed as u8) << 1 | (ty.flags.before_field_init as u8) << 2);
        w.u32(ty.extends.map_or(0, |t| t.0));
        w.u32(ty.enclosing.map_or(0, |i| i as u32 + 1));
        w.attributes(&ty.custom_attributes);

        w.u32(ty.fields.len() as u32);
        for f in &ty.fields {
            w.str(&f.name);
            w.visibility(f.visibility);
            w.u8(f.is_static as u8);
            w.type_sig(&f.sig);
        }

        w.u32(ty.methods.len() as u32);
        for m in &ty.methods {
            w.str(&m.name);
            w.visibility(m.flags.visibility);
            w.u8(
                m.flags.is_static as u8
                    | (m.flags.hide_by_sig as u8) << 1
                    | (m.flags.special_name as u8) << 2
                    | (m.flags.rt_special_name as u8) << 3,
            );
            w.method_sig(&m.sig);
            w.u32(m.param_names.len() as u32);
            for p in &m.param_names {
                w.str(p);
            }
            w.u32(m.locals.len() as u32);
            for l in &m.locals {
                w.type_sig(&l.sig);
                match &l.name {
                    Some(name) => {
                        w.u8(1);
                        w.str(name);
                    }
                    None => w.u8(0),
                }
            }
            w.u16(m.max_stack);
            w.u32(m.clauses.len() as u32);
            for c in &m.clauses {
                match c.kind {
                    ClauseKind::Catch(token) => {
                        w.u8(0);
                        w.u32(token.0);
                    }
                    ClauseKind::Finally => w.u8(2),
                }
                w.u32(c.try_offset);
                w.u32(c.try_length);
                w.u32(c.handler_offset);
                w.u32(c.handler_length);
            }
            w.attributes(&m.custom_attributes);
        }
    }

    w.bytes
}

/// Parse a metadata section.
pub fn decode(data: &[u8]) -> Result<ModuleMetadata, MetadataError> {
    let mut r = Reader { data, pos: 0 };
    let signature = r.u32()?;
    if signature != METADATA_SIGNATURE {
        return Err(MetadataError::BadSignature { found: signature });
    }
    let version = r.u16()?;
    if version != METADATA_VERSION {
        return Err(MetadataError::UnsupportedVersion(version));
    }

    let assembly = AssemblyDef {
        name: r.str()?,
        version: r.version()?,
        hash_algorithm: r.u32()?,
        custom_attributes: r.attributes()?,
    };
    let module_name = r.str()?;
    let mut mvid = [0u8; 16];
    mvid.copy_from_slice(r.take(16)?);

    let assembly_refs = r.list(|r| {
        let name = r.str()?;
        let version = r.version()?;
        let public_key_token = match r.u8()? {
            0 => None,
            _ => {
                let mut token = [0u8; 8];
                token.copy_from_slice(r.take(8)?);
                Some(token)
            }
        };
        Ok(AssemblyRef { name, version, public_key_token })
    })?;

    let type_refs = r.list(|r| {
        Ok(TypeRef { scope: Token(r.u32()?), namespace: r.str()?, name: r.str()? })
    })?;

    let member_refs = r.list(|r| {
        Ok(MemberRef { parent: Token(r.u32()?), name: r.str()?, sig: r.method_sig()? })
    })?;

    let user_strings = r.list(|r| r.str())?;

    let types = r.list(|r| {
        let namespace = r.str()?;
        let name = r.str()?;
        let visibility = r.visibility()?;
        let bits = r.u8()?;
        let flags = TypeFlags {
            visibility,
            is_abstract: bits & 1 != 0,
            is_sealed: bits & 2 != 0,
            before_field_init: bits & 4 != 0,
        };
        let extends = match r.u32()? {
            0 => None,
            raw => Some(Token(raw)),
        };
        let enclosing = match r.u32()? {
            0 => None,
            raw => Some(raw as usize - 1),
        };
        let custom_attributes = r.attributes()?;

        let fields = r.list(|r| {
            Ok(FieldDef {
                name: r.str()?,
                visibility: r.visibility()?,
                is_static: r.u8()? != 0,
                sig: r.type_sig()?,
            })
        })?;

        let methods = r.list(|r| {
            let name = r.str()?;
            let visibility = r.visibility()?;
            let bits = r.u8()?;
            let flags = MethodFlags {
                visibility,
                is_static: bits & 1 != 0,
                hide_by_sig: bits & 2 != 0,
                special_name: bits & 4 != 0,
                rt_special_name: bits & 8 != 0,
            };
            let sig = r.method_sig()?;
            let param_names = r.list(|r| r.str())?;
            let locals = r.list(|r| {
                let sig = r.type_sig()?;
                let name = match r.u8()? {
                    0 => None,
                    _ => Some(r.str()?),
                };
                Ok(LocalVar { sig, name })
            })?;
            let max_stack = r.u16()?;
            let clauses = r.list(|r| {
                let offset = r.pos;
                let kind = match r.u8()? {
                    0 => ClauseKind::Catch(Token(r.u32()?)),
                    2 => ClauseKind::Finally,
                    tag => return Err(MetadataError::InvalidTag { what: "clause", tag, offset }),
                };
                Ok(ExceptionClause {
                    kind,
                    try_offset: r.u32()?,
                    try_length: r.u32()?,
                    handler_offset: r.u32()?,
                    handler_length: r.u32()?,
                })
            })?;
            let custom_attributes = r.attributes()?;
            Ok(MethodDef {
                name,
                flags,
                sig,
                param_names,
                locals,
                max_stack,
                clauses,
                custom_attributes,
            })
        })?;

        Ok(TypeDef { namespace, name, flags, extends, enclosing, custom_attributes, fields, methods })
    })?;
    check_nesting(&types)?;

    Ok(ModuleMetadata {
        assembly,
        module_name,
        mvid,
        assembly_refs,
        type_refs,
        member_refs,
        user_strings,
        types,
    })
}

/// Every enclosing index must name another type, and nesting chains must end.
fn check_nesting(types: &[TypeDef]) -> Result<(), MetadataError> {
    for (index, ty) in types.iter().enumerate() {
        let Some(enclosing) = ty.enclosing else { continue };
        let bad = MetadataError::BadEnclosingType { index, enclosing };
        let mut current = Some(enclosing);
        let mut depth = 0;
        while let Some(outer) = current {
            depth += 1;
            if outer >= types.len() || outer == index || depth > types.len() {
                return Err(bad);
            }
            current = types[outer].enclosing;
        }
    }
    Ok(())
}

#[derive(Default)]
struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn str(&mut self, s: &str) {
        self.u32(s.len() as u32);
        self.bytes.extend_from_slice(s.as_bytes());
    }

    fn version(&mut self, v: Version) {
        self.u16(v.major);
        self.u16(v.minor);
        self.u16(v.build);
        self.u16(v.revision);
    }

    fn visibility(&mut self, v: Visibility) {
        self.u8(match v {
            Visibility::Private => 0,
            Visibility::Assembly => 1,
            Visibility::Family => 2,
            Visibility::Public => 3,
        });
    }

    fn type_sig(&mut self, sig: &TypeSig) {
        match sig {
            TypeSig::Void => self.u8(SIG_VOID),
            TypeSig::Boolean => self.u8(SIG_BOOLEAN),
            TypeSig::Int32 => self.u8(SIG_I4),
            TypeSig::String => self.u8(SIG_STRING),
            TypeSig::Object => self.u8(SIG_OBJECT),
            TypeSig::Class(token) => {
                self.u8(SIG_CLASS);
                self.u32(token.0);
            }
            TypeSig::SzArray(elem) => {
                self.u8(SIG_SZARRAY);
                self.type_sig(elem);
            }
        }
    }

    fn method_sig(&mut self, sig: &MethodSig) {
        self.u8(sig.has_this as u8);
        self.type_sig(&sig.ret);
        self.u32(sig.params.len() as u32);
        for p in &sig.params {
            self.type_sig(p);
        }
    }

    fn attributes(&mut self, attrs: &[CustomAttribute]) {
        self.u32(attrs.len() as u32);
        for a in attrs {
            self.u32(a.ctor.0);
            self.u32(a.blob.len() as u32);
            self.bytes.extend_from_slice(&a.blob);
        }
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], MetadataError> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.data.len());
        match end {
            Some(end) => {
                let slice = &self.data[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(MetadataError::Truncated { offset: self.pos }),
        }
    }

    fn u8(&mut self) -> Result<u8, MetadataError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, MetadataError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, MetadataError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn str(&mut self) -> Result<String, MetadataError> {
        let len = self.u32()? as usize;
        let offset = self.pos;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| MetadataError::InvalidString { offset })
    }

    fn version(&mut self) -> Result<Version, MetadataError> {
        Ok(Version::new(self.u16()?, self.u16()?, self.u16()?, self.u16()?))
    }

    fn visibility(&mut self) -> Result<Visibility, MetadataError> {
        let offset = self.pos;
        Ok(match self.u8()? {
            0 => Visibility::Private,
            1 => Visibility::Assembly,
            2 => Visibility::Family,
            3 => Visibility::Public,
            tag => return Err(MetadataError::InvalidTag { what: "visibility", tag, offset }),
        })
    }

    fn type_sig(&mut self) -> Result<TypeSig, MetadataError> {
        let offset = self.pos;
        Ok(match self.u8()? {
            SIG_VOID => TypeSig::Void,
            SIG_BOOLEAN => TypeSig::Boolean,
            SIG_I4 => TypeSig::Int32,
            SIG_STRING => TypeSig::String,
            SIG_OBJECT => TypeSig::Object,
            SIG_CLASS => TypeSig::Class(Token(self.u32()?)),
            SIG_SZARRAY => TypeSig::SzArray(Box::new(self.type_sig()?)),
            tag => return Err(MetadataError::InvalidTag { what: "element type", tag, offset }),
        })
    }

    fn method_sig(&mut self) -> Result<MethodSig, MetadataError> {
        let has_this = self.u8()? != 0;
        let ret = self.type_sig()?;
        let params = self.list(|r| r.type_sig())?;
        Ok(MethodSig { has_this, ret, params })
    }

    fn attributes(&mut self) -> Result<Vec<CustomAttribute>, MetadataError> {
        self.list(|r| {
            let ctor = Token(r.u32()?);
            let len = r.u32()? as usize;
            Ok(CustomAttribute { ctor, blob: r.take(len)?.to_vec() })
        })
    }

    fn list<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> Result<T, MetadataError>,
    ) -> Result<Vec<T>, MetadataError> {
        let count = self.u32()? as usize;
        // Every entry takes at least one byte, so a larger count is corrupt.
        if count > self.data.len() - self.pos {
            return Err(MetadataError::Truncated { offset: self.pos });
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(item(self)?);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ModuleMetadata {
        let mut program = TypeDef::module_placeholder();
        program.name = "Program".into();
        program.flags.visibility = Visibility::Public;
        program.flags.before_field_init = true;
        program.extends = Some(Token::new(TableKind::TypeRef, 0));
        program.fields.push(FieldDef {
            name: "count".into(),
            visibility: Visibility::Private,
            is_static: true,
            sig: TypeSig::Int32,
        });
        program.methods.push(MethodDef {
            name: "Main".into(),
            flags: MethodFlags {
                visibility: Visibility::Private,
                is_static: true,
                hide_by_sig: true,
                special_name: false,
                rt_special_name: false,
            },
            sig: MethodSig::new_static(TypeSig::Void, vec![TypeSig::SzArray(Box::new(TypeSig::String))]),
            param_names: vec!["args".into()],
            locals: vec![LocalVar { sig: TypeSig::Int32, name: Some("i".into()) }],
            max_stack: 2,
            clauses: vec![ExceptionClause {
                kind: ClauseKind::Catch(Token::new(TableKind::TypeRef, 1)),
                try_offset: 0,
                try_length: 4,
                handler_offset: 4,
                handler_length: 3,
            }],
            custom_attributes: Vec::new(),
        });
        ModuleMetadata {
            assembly: AssemblyDef {
                name: "snippet".into(),
                version: Version::new(0, 0, 0, 0),
                hash_algorithm: 0x8004,
                custom_attributes: vec![CustomAttribute {
                    ctor: Token::new(TableKind::MemberRef, 0),
                    blob: vec![1, 0, 8, 0, 0, 0, 0, 0],
                }],
            },
            module_name: "snippet.dll".into(),
            mvid: [7; 16],
            assembly_refs: vec![AssemblyRef {
                name: "mscorlib".into(),
                version: Version::new(4, 0, 0, 0),
                public_key_token: Some([0xB7, 0x7A, 0x5C, 0x56, 0x19, 0x34, 0xE0, 0x89]),
            }],
            type_refs: vec![TypeRef {
                scope: Token::new(TableKind::AssemblyRef, 0),
                namespace: "System".into(),
                name: "Object".into(),
            }],
            member_refs: Vec::new(),
            user_strings: vec!["Hello".into()],
            types: vec![TypeDef::module_placeholder(), program],
        }
    }

    #[test]
    fn decode_restores_encoded_tables() {
        let meta = sample();
        let bytes = encode(&meta);
        assert_eq!(&bytes[..4], b"BSJB");
        assert_eq!(decode(&bytes).unwrap(), meta);
    }

    #[test]
    fn truncated_section_is_rejected() {
        let bytes = encode(&sample());
        let err = decode(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, MetadataError::Truncated { .. }));
    }

    #[test]
    fn wrong_signature_is_rejected() {
        let mut bytes = encode(&sample());
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Err(MetadataError::BadSignature { .. })));
    }

    #[test]
    fn enclosing_types_must_exist_and_terminate() {
        for (edits, index, enclosing) in [
            (vec![(1, 42)], 1, 42),
            (vec![(1, 1)], 1, 1),
            (vec![(0, 1), (1, 0)], 0, 1),
        ] {
            let mut meta = sample();
            for (ty, outer) in edits {
                meta.types[ty].enclosing = Some(outer);
            }
            let err = decode(&encode(&meta)).unwrap_err();
            assert_eq!(err, MetadataError::BadEnclosingType { index, enclosing });
        }

        let mut meta = sample();
        meta.types[1].enclosing = Some(0);
        assert!(decode(&encode(&meta)).is_ok());
    }
}
