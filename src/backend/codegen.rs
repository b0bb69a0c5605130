// This module is the code generator shared by both compiler backends. After the binder has
// declared every type and member, each method body is type checked and lowered to CIL in a
// single walk over the syntax tree: expressions leave their value on the evaluation stack
// and return their semantic type, statements are lowered onto labels and branches of the
// MethodBuilder. Problems in user source are reported through the diagnostic sink and the
// walk carries on with an error type so that one mistake produces one diagnostic. When the
// walk is clean the declarations and bodies are assembled into the module metadata that the
// assembler writes out.

//! Type checking and CIL generation.

use super::binder::{same_name, user_class_sig, Env, FieldInfo, GenOptions, MethodInfo, MethodSource, Refs};
use super::emitter::{EmittedBody, Label, MethodBuilder};
use super::library::{self, CallKind, LibClass, LibMethodId, Ty, METHODS};
use crate::core::config::ASSEMBLY_NAME;
use crate::core::error::{BackendError, BackendResult};
use crate::core::session::CompilationSession;
use crate::frontend::ast::*;
use crate::frontend::messages::{DiagnosticSink, Message};
use crate::frontend::Dialect;
use crate::il::metadata::{
    AssemblyDef, ClauseKind, CustomAttribute, FieldDef, MethodDef, MethodFlags, MethodSig, ModuleMetadata,
    TableKind, Token, TypeDef, TypeFlags, Version,
};
use crate::il::opcodes::OpCode;

/// `SHA1`, the hash algorithm recorded in the assembly manifest.
const HASH_ALGORITHM_SHA1: u32 = 0x8004;

/// A compiled module before it is written out.
#[derive(Debug)]
pub struct ModuleImage {
    pub metadata: ModuleMetadata,
    /// Indexed by method row.
    pub bodies: Vec<EmittedBody>,
}

/// Compile a parsed unit. Returns `Ok(None)` when the program has errors;
/// they are in `sink`.
pub fn generate<'a>(
    unit: &'a CompilationUnit<'a>,
    session: &mut CompilationSession<'a>,
    dialect: Dialect,
    options: GenOptions,
    mvid: [u8; 16],
    sink: &mut DiagnosticSink,
) -> BackendResult<Option<ModuleImage>> {
    let env = Env::declare(unit, dialect, options, session.arena(), sink);
    let mut refs = Refs::new(options.mscorlib);

    let relaxations = library::ctor(LibClass::CompilationRelaxationsAttribute, &[Ty::Int])
        .ok_or_else(|| BackendError::codegen("missing CompilationRelaxationsAttribute constructor"))?;
    let compatibility = library::ctor(LibClass::RuntimeCompatibilityAttribute, &[])
        .ok_or_else(|| BackendError::codegen("missing RuntimeCompatibilityAttribute constructor"))?;
    let assembly_attributes = vec![
        CustomAttribute { ctor: refs.method(relaxations), blob: library::COMPILATION_RELAXATIONS_BLOB.to_vec() },
        CustomAttribute { ctor: refs.method(compatibility), blob: library::RUNTIME_COMPATIBILITY_BLOB.to_vec() },
    ];

    let mut bodies = Vec::new();
    for (index, ty) in env.types.iter().enumerate().skip(1) {
        session.record_type_compiled();
        for method in &ty.methods {
            let body = MethodCompiler::new(&env, &mut refs, sink, index, method).compile()?;
            let symbol = format!("{}::{}", ty.name, method.name);
            session.record_method_compiled(&symbol, body.code.len(), body.instruction_count);
            bodies.push(body);
        }
    }

    if sink.has_errors() {
        log::debug!("code generation stopped after {} errors", sink.error_count());
        return Ok(None);
    }
    let metadata = build_metadata(&env, refs, assembly_attributes, &mut bodies, mvid)?;
    Ok(Some(ModuleImage { metadata, bodies }))
}

fn build_metadata(
    env: &Env<'_>,
    mut refs: Refs,
    assembly_attributes: Vec<CustomAttribute>,
    bodies: &mut [EmittedBody],
    mvid: [u8; 16],
) -> BackendResult<ModuleMetadata> {
    let brace = env.dialect == Dialect::Brace;
    let object = refs.class(LibClass::Object);
    let mut types = vec![TypeDef::module_placeholder()];

    for info in env.types.iter().skip(1) {
        let flags = TypeFlags {
            visibility: info.visibility,
            is_abstract: info.kind == TypeKind::StaticClass,
            is_sealed: info.is_static(),
            before_field_init: brace,
        };
        let mut custom_attributes = Vec::new();
        if info.kind == TypeKind::Module && env.options.visual_basic_runtime {
            let id = library::ctor(LibClass::StandardModuleAttribute, &[])
                .ok_or_else(|| BackendError::codegen("missing StandardModuleAttribute constructor"))?;
            custom_attributes.push(CustomAttribute {
                ctor: refs.method(id),
                blob: library::EMPTY_ATTRIBUTE_BLOB.to_vec(),
            });
        }
        let fields: Vec<FieldDef> = info
            .fields
            .iter()
            .map(|f| FieldDef {
                name: f.name.to_string(),
                visibility: f.visibility,
                is_static: f.is_static,
                sig: refs.sig(f.ty, &user_class_sig),
            })
            .collect();
        let methods = info
            .methods
            .iter()
            .map(|m| {
                let special = !matches!(m.source, MethodSource::User(_));
                let body = bodies.get_mut(m.row).ok_or_else(|| BackendError::codegen("method body missing"))?;
                let params = m.params.iter().map(|&p| refs.sig(p, &user_class_sig)).collect();
                let ret = refs.sig(m.ret, &user_class_sig);
                Ok(MethodDef {
                    name: m.name.to_string(),
                    flags: MethodFlags {
                        visibility: m.visibility,
                        is_static: m.is_static,
                        hide_by_sig: brace,
                        special_name: special,
                        rt_special_name: special,
                    },
                    sig: MethodSig { has_this: !m.is_static, ret, params },
                    param_names: m.param_names.iter().map(|p| p.to_string()).collect(),
                    locals: std::mem::take(&mut body.locals),
                    max_stack: body.max_stack,
                    clauses: body.clauses.clone(),
                    custom_attributes: Vec::new(),
                })
            })
            .collect::<BackendResult<Vec<_>>>()?;
        types.push(TypeDef {
            namespace: info.namespace.to_string(),
            name: info.name.to_string(),
            flags,
            extends: Some(object),
            enclosing: info.enclosing,
            custom_attributes,
            fields,
            methods,
        });
    }

    let tables = refs.into_tables();
    Ok(ModuleMetadata {
        assembly: AssemblyDef {
            name: ASSEMBLY_NAME.to_string(),
            version: Version::default(),
            hash_algorithm: HASH_ALGORITHM_SHA1,
            custom_attributes: assembly_attributes,
        },
        module_name: format!("{}.dll", ASSEMBLY_NAME),
        mvid,
        assembly_refs: tables.assembly_refs,
        type_refs: tables.type_refs,
        member_refs: tables.member_refs,
        user_strings: tables.user_strings,
        types,
    })
}

// ---------------------------------------------------------------------------
// Method bodies
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Local<'a> {
    name: &'a str,
    slot: u16,
    ty: Ty<'a>,
    pos: Pos,
    read: bool,
    assigned: bool,
    /// Every assignment stored a literal.
    constant_only: bool,
}

struct LoopFrame {
    kind: LoopKind,
    exit: Label,
    next: Label,
    try_depth: usize,
}

/// Something that can be assigned to.
#[derive(Debug, Clone, Copy)]
enum Place<'a> {
    Local { scope: usize, index: usize },
    Arg { index: u16, ty: Ty<'a> },
    Field { token: Token, ty: Ty<'a>, is_static: bool, receiver: Receiver<'a> },
}

#[derive(Debug, Clone, Copy)]
enum Receiver<'a> {
    None,
    This,
    Expr(&'a Expr<'a>),
}

/// What a simple name denotes.
enum NameRef<'a> {
    Place(Place<'a>),
    Method(usize),
    Type(Ty<'a>),
    Unknown,
}

/// An overload candidate.
#[derive(Clone, Copy)]
enum Callee<'c, 'a> {
    User(&'c MethodInfo<'a>),
    Lib(LibMethodId),
}

impl<'c, 'a> Callee<'c, 'a> {
    fn params(&self) -> &'c [Ty<'a>] {
        match *self {
            Callee::User(m) => &m.params,
            Callee::Lib(id) => METHODS[id].params,
        }
    }
}

struct MethodCompiler<'c, 'a> {
    env: &'c Env<'a>,
    refs: &'c mut Refs,
    sink: &'c mut DiagnosticSink,
    owner: usize,
    method: &'c MethodInfo<'a>,
    b: MethodBuilder,
    scopes: Vec<Vec<Local<'a>>>,
    loops: Vec<LoopFrame>,
    try_depth: usize,
    catch_depth: usize,
    /// Shared exit used by `return` inside protected regions.
    ret_exit: Option<(Label, Option<u16>)>,
    /// Suppresses diagnostics while probing an expression's type.
    muted: bool,
}

impl<'c, 'a> MethodCompiler<'c, 'a> {
    fn new(
        env: &'c Env<'a>,
        refs: &'c mut Refs,
        sink: &'c mut DiagnosticSink,
        owner: usize,
        method: &'c MethodInfo<'a>,
    ) -> Self {
        Self {
            env,
            refs,
            sink,
            owner,
            method,
            b: MethodBuilder::new(),
            scopes: Vec::new(),
            loops: Vec::new(),
            try_depth: 0,
            catch_depth: 0,
            ret_exit: None,
            muted: false,
        }
    }

    fn options(&self) -> GenOptions {
        self.env.options
    }

    fn dialect(&self) -> Dialect {
        self.env.dialect
    }

    fn report(&mut self, pos: Pos, message: Message) {
        if !self.muted {
            self.sink.report(pos, message);
        }
    }

    fn compile(mut self) -> BackendResult<EmittedBody> {
        let arguments = self.method.params.len() + usize::from(!self.method.is_static);
        if u16::try_from(arguments).is_err() {
            return Err(BackendError::codegen(format!("{} takes {} arguments", self.method.name, arguments)));
        }
        match self.method.source {
            MethodSource::User(decl) => self.user_body(decl)?,
            MethodSource::Ctor => self.ctor_body()?,
            MethodSource::Cctor => self.cctor_body(),
        }
        self.b.finish()
    }

    fn sequence_point(&mut self, pos: Pos) {
        if self.options().debug {
            self.b.sequence_point(pos);
        }
    }

    fn block_nop(&mut self) {
        if !self.options().optimize {
            self.b.emit(OpCode::Nop);
        }
    }

    fn user_body(&mut self, decl: &'a MethodDecl<'a>) -> BackendResult<()> {
        self.sequence_point(decl.pos);
        self.block_nop();
        self.scopes.push(Vec::new());
        self.statements(decl.body);
        self.pop_scope();

        if self.b.is_reachable() {
            self.sequence_point(decl.end_pos);
            if self.method.ret == Ty::Void {
                self.block_nop();
                self.b.emit(OpCode::Ret);
            } else {
                self.report(decl.pos, Message::NotAllPathsReturn(self.method.name.to_string()));
                self.default_value(self.method.ret);
                self.b.emit(OpCode::Ret);
            }
        }
        if let Some((label, slot)) = self.ret_exit {
            self.b.mark(label);
            if let Some(slot) = slot {
                self.b.ldloc(slot);
            }
            self.b.emit(OpCode::Ret);
        }
        Ok(())
    }

    fn ctor_body(&mut self) -> BackendResult<()> {
        let base = library::ctor(LibClass::Object, &[])
            .ok_or_else(|| BackendError::codegen("missing Object constructor"))?;
        let env = self.env;
        let fields: Vec<&'c FieldInfo<'a>> = env.types[self.owner]
            .fields
            .iter()
            .filter(|f| !f.is_static && f.decl.init.is_some())
            .collect();
        self.scopes.push(Vec::new());
        // C# runs field initializers before the base constructor call.
        if self.dialect() == Dialect::Brace {
            self.field_initializers(&fields);
        }
        self.b.ldarg(0);
        let token = self.refs.method(base);
        self.b.emit_call(OpCode::Call, token, 1, 0);
        if self.dialect() == Dialect::Basic {
            self.field_initializers(&fields);
        }
        self.block_nop();
        self.b.emit(OpCode::Ret);
        Ok(())
    }

    fn cctor_body(&mut self) {
        let env = self.env;
        let fields: Vec<&'c FieldInfo<'a>> = env.types[self.owner]
            .fields
            .iter()
            .filter(|f| f.is_static && f.decl.init.is_some())
            .collect();
        self.scopes.push(Vec::new());
        self.field_initializers(&fields);
        self.b.emit(OpCode::Ret);
    }

    fn field_initializers(&mut self, fields: &[&'c FieldInfo<'a>]) {
        for field in fields {
            let Some(init) = field.decl.init else { continue };
            self.sequence_point(field.decl.pos);
            let token = Token::new(TableKind::Field, field.row);
            if !field.is_static {
                self.b.ldarg(0);
            }
            let ty = self.expr(init);
            self.coerce(ty, field.ty, init.pos);
            if field.is_static {
                self.b.emit_token(OpCode::Stsfld, token);
            } else {
                self.b.emit_token(OpCode::Stfld, token);
            }
        }
    }

    /// Resolve a written type; silent while probing.
    fn resolve_type(&mut self, ty: TypeRef<'a>) -> Ty<'a> {
        if self.muted {
            let mut scratch = DiagnosticSink::new(self.dialect(), "");
            return self.env.resolve_type(ty.name, ty.pos, self.owner, &mut scratch);
        }
        self.env.resolve_type(ty.name, ty.pos, self.owner, self.sink)
    }

    fn default_value(&mut self, ty: Ty<'a>) {
        match ty {
            Ty::Int | Ty::Bool => self.b.ldc_i4(0),
            _ => self.b.emit(OpCode::Ldnull),
        }
    }

    // ------------------------------------------------------------------
    // Scopes and locals
    // ------------------------------------------------------------------

    fn pop_scope(&mut self) {
        let Some(scope) = self.scopes.pop() else { return };
        for local in scope {
            if local.read {
                continue;
            }
            match self.dialect() {
                Dialect::Brace if !local.assigned => {
                    self.report(local.pos, Message::UnusedVariable(local.name.to_string()))
                }
                Dialect::Brace if local.constant_only => {
                    self.report(local.pos, Message::AssignedNeverUsed(local.name.to_string()))
                }
                Dialect::Basic if !local.assigned => {
                    self.report(local.pos, Message::UnusedVariable(local.name.to_string()))
                }
                _ => {}
            }
        }
    }

    fn find_local(&self, name: &str) -> Option<(usize, usize)> {
        let dialect = self.dialect();
        self.scopes.iter().enumerate().rev().find_map(|(scope, locals)| {
            locals
                .iter()
                .rposition(|l| same_name(dialect, l.name, name))
                .map(|index| (scope, index))
        })
    }

    fn declare_local(&mut self, name: &'a str, ty: Ty<'a>, pos: Pos) -> Option<(usize, usize)> {
        if self.find_local(name).is_some() {
            self.report(pos, Message::DuplicateLocal(name.to_string()));
            return None;
        }
        let sig = self.refs.sig(ty, &user_class_sig);
        let debug_name = self.options().debug.then(|| name.to_string());
        let slot = self.b.declare_local(sig, debug_name);
        let scope = self.scopes.len().checked_sub(1)?;
        self.scopes[scope].push(Local {
            name,
            slot,
            ty,
            pos,
            read: false,
            assigned: false,
            constant_only: true,
        });
        Some((scope, self.scopes[scope].len() - 1))
    }

    fn local_mut(&mut self, scope: usize, index: usize) -> &mut Local<'a> {
        &mut self.scopes[scope][index]
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statements(&mut self, stmts: &'a [Stmt<'a>]) {
        for stmt in stmts {
            self.statement(stmt);
        }
    }

    /// Body of a compound statement, in its own scope.
    fn nested(&mut self, stmts: &'a [Stmt<'a>]) {
        self.scopes.push(Vec::new());
        self.block_nop();
        self.statements(stmts);
        self.pop_scope();
    }

    fn statement(&mut self, stmt: &'a Stmt<'a>) {
        if !matches!(stmt.kind, StmtKind::Block(_)) {
            self.sequence_point(stmt.pos);
        }
        match &stmt.kind {
            StmtKind::Local { name, ty, init } => self.local_statement(name, *ty, *init, stmt.pos),
            StmtKind::Assign { target, op, value } => self.assign(target, *op, value),
            StmtKind::Increment { target, delta } => self.increment(target, *delta),
            StmtKind::Expr(expr) => {
                let ty = self.expr(expr);
                if ty != Ty::Void {
                    self.b.emit(OpCode::Pop);
                }
            }
            StmtKind::If { cond, then, otherwise } => self.if_statement(cond, then, *otherwise),
            StmtKind::While { cond, body, step, kind } => self.while_loop(*cond, body, *step, *kind),
            StmtKind::DoWhile { body, cond, until } => self.do_loop(body, cond, *until),
            StmtKind::Break(kind) => self.jump(*kind, true, stmt.pos),
            StmtKind::Continue(kind) => self.jump(*kind, false, stmt.pos),
            StmtKind::Return(value) => self.return_statement(*value, stmt.pos),
            StmtKind::Throw(value) => self.throw_statement(*value, stmt.pos),
            StmtKind::Try { body, catch, finally } => self.try_statement(body, catch.as_ref(), *finally),
            StmtKind::Block(stmts) => {
                self.scopes.push(Vec::new());
                self.statements(stmts);
                self.pop_scope();
            }
        }
    }

    fn local_statement(&mut self, name: &'a str, ty: Option<TypeRef<'a>>, init: Option<&'a Expr<'a>>, pos: Pos) {
        let declared = match ty {
            Some(ty) => self.resolve_type(ty),
            None => match (self.dialect(), init) {
                (Dialect::Brace, _) if !self.options().infer_locals => {
                    self.report(pos, Message::TypeNotFound("var".into()));
                    Ty::Error
                }
                (Dialect::Brace, Some(init)) => match self.infer(init) {
                    Ty::Null | Ty::Void => {
                        self.report(init.pos, Message::CannotConvert { from: "<null>".into(), to: "var".into() });
                        Ty::Error
                    }
                    other => other,
                },
                (Dialect::Basic, Some(init)) if self.options().infer_locals => match self.infer(init) {
                    Ty::Null | Ty::Void | Ty::Error => Ty::Object,
                    other => other,
                },
                _ => Ty::Object,
            },
        };
        let Some((scope, index)) = self.declare_local(name, declared, pos) else { return };
        if let Some(init) = init {
            let ty = self.expr(init);
            self.coerce(ty, declared, init.pos);
            let slot = self.scopes[scope][index].slot;
            self.b.stloc(slot);
            let local = self.local_mut(scope, index);
            local.assigned = true;
            local.constant_only &= is_literal(init);
        }
    }

    fn assign(&mut self, target: &'a Expr<'a>, op: AssignOp, value: &'a Expr<'a>) {
        let Some(place) = self.place(target) else {
            // Still check the value.
            self.expr(value);
            return;
        };
        let place_ty = self.place_ty(place);
        self.load_receiver(place);
        if op == AssignOp::Set {
            let ty = self.expr(value);
            self.coerce(ty, place_ty, value.pos);
            self.mark_assigned(place, is_literal(value));
        } else {
            if self.has_receiver(place) {
                self.b.emit(OpCode::Dup);
            }
            self.load_place(place);
            let bin = match op {
                AssignOp::Add => BinaryOp::Add,
                AssignOp::Sub => BinaryOp::Sub,
                AssignOp::Mul => BinaryOp::Mul,
                AssignOp::Div => BinaryOp::Div,
                AssignOp::Rem => BinaryOp::Rem,
                AssignOp::Concat | AssignOp::Set => BinaryOp::Concat,
            };
            let ty = self.binary_rest(bin, place_ty, value, value.pos);
            self.coerce(ty, place_ty, value.pos);
            self.mark_assigned(place, false);
        }
        self.store_place(place);
    }

    fn increment(&mut self, target: &'a Expr<'a>, delta: i32) {
        let Some(place) = self.place(target) else { return };
        let ty = self.place_ty(place);
        if ty != Ty::Int && ty != Ty::Error {
            let op = if delta > 0 { "++" } else { "--" };
            let ty = self.env.ty_name(ty);
            self.report(target.pos, Message::BadUnaryOperand { op, ty });
            return;
        }
        self.load_receiver(place);
        if self.has_receiver(place) {
            self.b.emit(OpCode::Dup);
        }
        self.load_place(place);
        self.b.ldc_i4(1);
        self.b.emit(if delta > 0 { OpCode::Add } else { OpCode::Sub });
        self.mark_assigned(place, false);
        self.store_place(place);
    }

    fn if_statement(&mut self, cond: &'a Expr<'a>, then: &'a [Stmt<'a>], otherwise: Option<&'a [Stmt<'a>]>) {
        let else_label = self.b.new_label();
        self.branch_on(cond, else_label, false);
        self.nested(then);
        match otherwise {
            Some(otherwise) => {
                let end = self.b.new_label();
                if self.b.is_reachable() {
                    self.b.branch(OpCode::Br, end);
                }
                self.b.mark(else_label);
                self.nested(otherwise);
                self.b.mark(end);
            }
            None => self.b.mark(else_label),
        }
    }

    fn while_loop(&mut self, cond: Option<&'a Expr<'a>>, body: &'a [Stmt<'a>], step: Option<&'a Stmt<'a>>, kind: LoopKind) {
        let head = self.b.new_label();
        let exit = self.b.new_label();
        let next = if step.is_some() { self.b.new_label() } else { head };
        self.b.mark(head);
        match cond {
            Some(Expr { kind: ExprKind::Bool(true), .. }) | None => {}
            Some(cond) => self.branch_on(cond, exit, false),
        }
        self.loops.push(LoopFrame { kind, exit, next, try_depth: self.try_depth });
        self.nested(body);
        self.loops.pop();
        if let Some(step) = step {
            self.b.mark(next);
            self.statement(step);
        }
        self.b.branch(OpCode::Br, head);
        self.b.mark(exit);
    }

    fn do_loop(&mut self, body: &'a [Stmt<'a>], cond: &'a Expr<'a>, until: bool) {
        let head = self.b.new_label();
        let exit = self.b.new_label();
        let next = self.b.new_label();
        self.b.mark(head);
        self.loops.push(LoopFrame { kind: LoopKind::Do, exit, next, try_depth: self.try_depth });
        self.nested(body);
        self.loops.pop();
        self.b.mark(next);
        self.branch_on(cond, head, !until);
        self.b.mark(exit);
    }

    fn jump(&mut self, kind: Option<LoopKind>, exit: bool, pos: Pos) {
        let frame = self
            .loops
            .iter()
            .rev()
            .find(|frame| kind.map_or(true, |k| k == frame.kind))
            .map(|frame| (if exit { frame.exit } else { frame.next }, frame.try_depth));
        match frame {
            Some((target, depth)) => {
                let op = if depth < self.try_depth { OpCode::Leave } else { OpCode::Br };
                self.b.branch(op, target);
            }
            None => {
                let kind = match kind {
                    Some(LoopKind::For) => "For",
                    Some(LoopKind::While) => "While",
                    Some(LoopKind::Do) => "Do",
                    None => "",
                };
                self.report(pos, Message::NoEnclosingLoop { exit, kind });
            }
        }
    }

    fn return_statement(&mut self, value: Option<&'a Expr<'a>>, pos: Pos) {
        let ret = self.method.ret;
        match value {
            Some(value) if ret == Ty::Void => {
                self.report(pos, Message::ReturnValueInVoid(self.method.name.to_string()));
                self.expr(value);
                return;
            }
            Some(value) => {
                let ty = self.expr(value);
                self.coerce(ty, ret, value.pos);
            }
            None if ret != Ty::Void => {
                let name = self.env.ty_name(ret);
                self.report(pos, Message::ReturnValueRequired(name));
                return;
            }
            None => {}
        }
        if self.try_depth == 0 {
            self.b.emit(OpCode::Ret);
            return;
        }
        let (label, slot) = match self.ret_exit {
            Some(exit) => exit,
            None => {
                let label = self.b.new_label();
                let slot = (ret != Ty::Void).then(|| {
                    let sig = self.refs.sig(ret, &user_class_sig);
                    self.b.declare_local(sig, None)
                });
                self.ret_exit = Some((label, slot));
                (label, slot)
            }
        };
        if let Some(slot) = slot {
            self.b.stloc(slot);
        }
        self.b.branch(OpCode::Leave, label);
    }

    fn throw_statement(&mut self, value: Option<&'a Expr<'a>>, pos: Pos) {
        match value {
            Some(value) => {
                let ty = self.expr(value);
                if !matches!(ty, Ty::Lib(LibClass::Exception) | Ty::Null | Ty::Error) {
                    self.report(value.pos, Message::NotAnException);
                }
                self.b.emit(OpCode::Throw);
            }
            None if self.catch_depth > 0 => self.b.emit(OpCode::Rethrow),
            None => self.report(pos, Message::NotAnException),
        }
    }

    fn try_statement(&mut self, body: &'a [Stmt<'a>], catch: Option<&'a CatchClause<'a>>, finally: Option<&'a [Stmt<'a>]>) {
        let end = self.b.new_label();
        self.try_depth += 1;
        let outer = finally.map(|_| self.b.begin_try());

        if let Some(clause) = catch {
            let region = self.b.begin_try();
            self.nested(body);
            if self.b.is_reachable() {
                self.b.branch(OpCode::Leave, end);
            }
            let caught = match clause.ty {
                Some(ty) => self.resolve_type(ty),
                None if self.dialect() == Dialect::Brace => Ty::Object,
                None => Ty::Lib(LibClass::Exception),
            };
            if !matches!(caught, Ty::Lib(LibClass::Exception) | Ty::Object | Ty::Error) {
                self.report(clause.pos, Message::NotAnException);
            }
            let class_token = match caught {
                Ty::Object => self.refs.class(LibClass::Object),
                _ => self.refs.class(LibClass::Exception),
            };
            let handler = self.b.begin_handler(region, ClauseKind::Catch(class_token));
            self.catch_depth += 1;
            self.scopes.push(Vec::new());
            let var = clause.var.and_then(|name| self.declare_local(name, caught, clause.pos));
            match var {
                Some((scope, index)) => {
                    let slot = self.scopes[scope][index].slot;
                    self.b.stloc(slot);
                }
                None => self.b.emit(OpCode::Pop),
            }
            self.block_nop();
            self.statements(clause.body);
            self.pop_scope();
            self.catch_depth -= 1;
            if self.b.is_reachable() {
                self.b.branch(OpCode::Leave, end);
            }
            self.b.end_handler(handler);
        } else {
            self.nested(body);
            if self.b.is_reachable() {
                self.b.branch(OpCode::Leave, end);
            }
        }

        if let (Some(region), Some(finally)) = (outer, finally) {
            let handler = self.b.begin_handler(region, ClauseKind::Finally);
            self.nested(finally);
            self.b.emit(OpCode::Endfinally);
            self.b.end_handler(handler);
        }
        self.try_depth -= 1;
        self.b.mark(end);
    }

    // ------------------------------------------------------------------
    // Places
    // ------------------------------------------------------------------

    fn resolve_name(&self, name: &str) -> NameRef<'a> {
        let env = self.env;
        if let Some((scope, index)) = self.find_local(name) {
            return NameRef::Place(Place::Local { scope, index });
        }
        if let Some(i) = self.method.param_names.iter().position(|p| same_name(env.dialect, p, name)) {
            // `compile` rejects parameter lists that do not fit.
            let Ok(index) = u16::try_from(i + usize::from(!self.method.is_static)) else { return NameRef::Unknown };
            return NameRef::Place(Place::Arg { index, ty: self.method.params[i] });
        }
        if let Some((_, field)) = env.find_field(self.owner, name) {
            return NameRef::Place(Place::Field {
                token: Token::new(TableKind::Field, field.row),
                ty: field.ty,
                is_static: field.is_static,
                receiver: if field.is_static { Receiver::None } else { Receiver::This },
            });
        }
        if let Some(owner) = env.find_method_owner(self.owner, name) {
            return NameRef::Method(owner);
        }
        match env.lookup_type(name, self.owner) {
            Some(ty) => NameRef::Type(ty),
            None => NameRef::Unknown,
        }
    }

    /// The type an expression names, if it is a type rather than a value.
    fn as_type(&self, expr: &'a Expr<'a>) -> Option<Ty<'a>> {
        match &expr.kind {
            ExprKind::TypeKeyword(name) => match name {
                TypeName::Int => Some(Ty::Int),
                TypeName::Bool => Some(Ty::Bool),
                TypeName::String => Some(Ty::String),
                TypeName::Object => Some(Ty::Object),
                _ => None,
            },
            ExprKind::Name(name) => match self.resolve_name(name) {
                NameRef::Type(ty) => Some(ty),
                _ => None,
            },
            ExprKind::Member { target, .. } => {
                // A value on the left makes the whole chain a value.
                if let Some(root) = root_name(target) {
                    if matches!(self.resolve_name(root), NameRef::Place(_)) {
                        return None;
                    }
                }
                let dotted = expr.dotted_name()?;
                self.env.lookup_type(&dotted, self.owner)
            }
            _ => None,
        }
    }

    /// Resolve an assignment target.
    fn place(&mut self, target: &'a Expr<'a>) -> Option<Place<'a>> {
        match &target.kind {
            ExprKind::Name(name) => match self.resolve_name(name) {
                NameRef::Place(place) => {
                    self.check_instance_access(place, name, target.pos);
                    Some(place)
                }
                NameRef::Unknown => {
                    self.report(target.pos, Message::NameNotFound(name.to_string()));
                    None
                }
                _ => {
                    self.report(target.pos, Message::LeftHandSideNotVariable);
                    None
                }
            },
            ExprKind::Member { target: receiver, name } => {
                if let Some(ty) = self.as_type(receiver) {
                    return match ty {
                        Ty::Class(index) => match self.env.field_of(index, name) {
                            Some(field) if field.is_static => Some(Place::Field {
                                token: Token::new(TableKind::Field, field.row),
                                ty: field.ty,
                                is_static: true,
                                receiver: Receiver::None,
                            }),
                            Some(_) => {
                                self.report(target.pos, Message::InstanceRequired(name.to_string()));
                                None
                            }
                            None => {
                                self.no_member(ty, name, target.pos);
                                None
                            }
                        },
                        _ => {
                            self.report(target.pos, Message::LeftHandSideNotVariable);
                            None
                        }
                    };
                }
                let receiver_ty = self.infer(receiver);
                match receiver_ty {
                    Ty::Class(index) => match self.env.field_of(index, name) {
                        Some(field) => Some(Place::Field {
                            token: Token::new(TableKind::Field, field.row),
                            ty: field.ty,
                            is_static: field.is_static,
                            receiver: if field.is_static { Receiver::None } else { Receiver::Expr(receiver) },
                        }),
                        None => {
                            self.no_member(receiver_ty, name, target.pos);
                            None
                        }
                    },
                    Ty::Error => {
                        self.expr(receiver);
                        None
                    }
                    _ => {
                        self.report(target.pos, Message::LeftHandSideNotVariable);
                        None
                    }
                }
            }
            _ => {
                self.report(target.pos, Message::LeftHandSideNotVariable);
                None
            }
        }
    }

    fn check_instance_access(&mut self, place: Place<'a>, name: &str, pos: Pos) {
        if let Place::Field { receiver: Receiver::This, .. } = place {
            if self.method.is_static {
                self.report(pos, Message::InstanceRequired(name.to_string()));
            }
        }
    }

    fn place_ty(&self, place: Place<'a>) -> Ty<'a> {
        match place {
            Place::Local { scope, index } => self.scopes[scope][index].ty,
            Place::Arg { ty, .. } | Place::Field { ty, .. } => ty,
        }
    }

    fn has_receiver(&self, place: Place<'a>) -> bool {
        matches!(place, Place::Field { receiver: Receiver::This | Receiver::Expr(_), .. })
    }

    fn load_receiver(&mut self, place: Place<'a>) {
        match place {
            Place::Field { receiver: Receiver::This, .. } => self.b.ldarg(0),
            Place::Field { receiver: Receiver::Expr(expr), .. } => {
                self.expr(expr);
            }
            _ => {}
        }
    }

    /// Load the value of `place`; its receiver is already on the stack.
    fn load_place(&mut self, place: Place<'a>) {
        match place {
            Place::Local { scope, index } => {
                let local = self.local_mut(scope, index);
                local.read = true;
                let slot = local.slot;
                self.b.ldloc(slot);
            }
            Place::Arg { index, .. } => self.b.ldarg(index),
            Place::Field { token, is_static: true, .. } => self.b.emit_token(OpCode::Ldsfld, token),
            Place::Field { token, .. } => self.b.emit_token(OpCode::Ldfld, token),
        }
    }

    fn store_place(&mut self, place: Place<'a>) {
        match place {
            Place::Local { scope, index } => {
                let slot = self.scopes[scope][index].slot;
                self.b.stloc(slot);
            }
            Place::Arg { index, .. } => self.b.starg(index),
            Place::Field { token, is_static: true, .. } => self.b.emit_token(OpCode::Stsfld, token),
            Place::Field { token, .. } => self.b.emit_token(OpCode::Stfld, token),
        }
    }

    fn mark_assigned(&mut self, place: Place<'a>, literal: bool) {
        if let Place::Local { scope, index } = place {
            let local = self.local_mut(scope, index);
            local.assigned = true;
            local.constant_only &= literal;
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Type of `expr` without emitting code or diagnostics.
    fn infer(&mut self, expr: &'a Expr<'a>) -> Ty<'a> {
        let saved = std::mem::take(&mut self.b);
        let muted = std::mem::replace(&mut self.muted, true);
        let ty = self.expr(expr);
        self.muted = muted;
        self.b = saved;
        ty
    }

    /// Emit `expr`, leaving its value on the stack.
    fn expr(&mut self, expr: &'a Expr<'a>) -> Ty<'a> {
        match &expr.kind {
            ExprKind::Int(v) => {
                self.b.ldc_i4(*v);
                Ty::Int
            }
            ExprKind::Str(s) => {
                let token = self.refs.string(s);
                self.b.emit_token(OpCode::Ldstr, token);
                Ty::String
            }
            ExprKind::Bool(v) => {
                self.b.ldc_i4(i32::from(*v));
                Ty::Bool
            }
            ExprKind::Null => {
                self.b.emit(OpCode::Ldnull);
                Ty::Null
            }
            ExprKind::This => {
                if self.method.is_static {
                    self.report(expr.pos, Message::InstanceRequired("this".into()));
                    return Ty::Error;
                }
                self.b.ldarg(0);
                Ty::Class(self.owner)
            }
            ExprKind::Name(name) => self.name_expr(name, expr.pos),
            ExprKind::TypeKeyword(_) => {
                let term = self.as_type(expr).map(|ty| self.env.ty_name(ty)).unwrap_or_default();
                self.report(expr.pos, Message::InvalidExpressionTerm(term));
                Ty::Error
            }
            ExprKind::Member { target, name } => self.member_expr(target, name, expr.pos),
            ExprKind::Call { callee, args } => self.call_expr(callee, args, expr.pos),
            ExprKind::New { ty, args } => self.new_expr(*ty, args, expr.pos),
            ExprKind::Index { target, index } => {
                let ty = self.expr(target);
                self.element(ty, index, expr.pos)
            }
            ExprKind::Unary { op, operand } => self.unary(*op, operand, expr.pos),
            ExprKind::Binary { op: BinaryOp::AndAlso, lhs, rhs } => self.short_circuit(lhs, rhs, false),
            ExprKind::Binary { op: BinaryOp::OrElse, lhs, rhs } => self.short_circuit(lhs, rhs, true),
            ExprKind::Binary { op, lhs, rhs } => {
                let lt = self.expr(lhs);
                self.binary_rest(*op, lt, rhs, expr.pos)
            }
        }
    }

    fn name_expr(&mut self, name: &'a str, pos: Pos) -> Ty<'a> {
        match self.resolve_name(name) {
            NameRef::Place(place) => {
                self.check_instance_access(place, name, pos);
                self.load_receiver(place);
                self.load_place(place);
                self.place_ty(place)
            }
            NameRef::Method(owner) => {
                // Basic calls parameterless methods without parentheses.
                if self.dialect() == Dialect::Basic {
                    return self.user_call(owner, name, Receiver::None, &[], pos);
                }
                self.report(pos, Message::NotInvocable(name.to_string()));
                Ty::Error
            }
            NameRef::Type(_) | NameRef::Unknown => {
                self.report(pos, Message::NameNotFound(name.to_string()));
                Ty::Error
            }
        }
    }

    fn member_expr(&mut self, target: &'a Expr<'a>, name: &'a str, pos: Pos) -> Ty<'a> {
        if let Some(ty) = self.as_type(target) {
            return match ty {
                Ty::Class(index) => match self.env.field_of(index, name) {
                    Some(field) if field.is_static => {
                        self.b.emit_token(OpCode::Ldsfld, Token::new(TableKind::Field, field.row));
                        field.ty
                    }
                    Some(_) => {
                        self.report(pos, Message::InstanceRequired(name.to_string()));
                        Ty::Error
                    }
                    None if self.env.has_method(index, name) && self.dialect() == Dialect::Basic => {
                        self.user_call(index, name, Receiver::None, &[], pos)
                    }
                    None => self.no_member(ty, name, pos),
                },
                _ => self.no_member(ty, name, pos),
            };
        }
        if let ExprKind::Name(root) = target.kind {
            if matches!(self.resolve_name(root), NameRef::Unknown) {
                self.report(target.pos, Message::NameNotFound(root.to_string()));
                return Ty::Error;
            }
        }

        let ty = self.expr(target);
        match ty {
            Ty::Error => Ty::Error,
            Ty::Array(_) if same_name(self.dialect(), name, "Length") => {
                self.b.emit(OpCode::Ldlen);
                self.b.emit(OpCode::ConvI4);
                Ty::Int
            }
            Ty::Class(index) => match self.env.field_of(index, name) {
                Some(field) if !field.is_static => {
                    self.b.emit_token(OpCode::Ldfld, Token::new(TableKind::Field, field.row));
                    field.ty
                }
                Some(_) => {
                    self.report(pos, Message::InstanceRequired(name.to_string()));
                    Ty::Error
                }
                None if self.env.has_method(index, name) && self.dialect() == Dialect::Basic => {
                    self.user_call(index, name, Receiver::Expr(target), &[], pos)
                }
                None => self.no_member(ty, name, pos),
            },
            other => match lib_class_of(other) {
                Some(class) => {
                    let getter = format!("get_{}", name);
                    let candidates = library::overloads(class, &getter, CallKind::Instance, self.dialect());
                    match candidates.first() {
                        Some(&id) => self.emit_lib_call(id),
                        None if self.dialect() == Dialect::Basic => {
                            // Basic calls parameterless methods without parentheses.
                            let methods = library::overloads(class, name, CallKind::Instance, self.dialect());
                            match methods.iter().find(|&&id| METHODS[id].params.is_empty()) {
                                Some(&id) => self.emit_lib_call(id),
                                None => self.no_member(other, name, pos),
                            }
                        }
                        None => self.no_member(other, name, pos),
                    }
                }
                None => self.no_member(other, name, pos),
            },
        }
    }

    fn no_member(&mut self, ty: Ty<'a>, name: &str, pos: Pos) -> Ty<'a> {
        if ty != Ty::Error {
            let ty = self.env.ty_name(ty);
            self.report(pos, Message::NoMember { ty, name: name.to_string() });
        }
        Ty::Error
    }

    fn element(&mut self, target_ty: Ty<'a>, index: &'a Expr<'a>, pos: Pos) -> Ty<'a> {
        match target_ty {
            Ty::Array(elem) if elem.is_reference() => {
                let ty = self.expr(index);
                self.coerce(ty, Ty::Int, index.pos);
                self.b.emit(OpCode::LdelemRef);
                *elem
            }
            Ty::Error => {
                self.expr(index);
                Ty::Error
            }
            other => {
                let ty = self.env.ty_name(other);
                self.report(pos, Message::NotIndexable(ty));
                Ty::Error
            }
        }
    }

    fn call_expr(&mut self, callee: &'a Expr<'a>, args: &'a [&'a Expr<'a>], pos: Pos) -> Ty<'a> {
        match &callee.kind {
            ExprKind::Name(name) => match self.resolve_name(name) {
                NameRef::Method(owner) => self.user_call(owner, name, Receiver::None, args, pos),
                // Basic element access `args(0)`.
                NameRef::Place(_) if self.dialect() == Dialect::Basic && args.len() == 1 => {
                    let ty = self.name_expr(name, callee.pos);
                    self.element(ty, args[0], pos)
                }
                NameRef::Place(_) => {
                    self.report(callee.pos, Message::NotInvocable(name.to_string()));
                    Ty::Error
                }
                NameRef::Type(_) | NameRef::Unknown => {
                    self.report(callee.pos, Message::NameNotFound(name.to_string()));
                    Ty::Error
                }
            },
            ExprKind::Member { target, name } => {
                if let Some(ty) = self.as_type(target) {
                    return match ty {
                        Ty::Class(index) => self.user_call(index, name, Receiver::None, args, pos),
                        other => match lib_class_of(other) {
                            Some(class) => {
                                let candidates = library::overloads(class, name, CallKind::Static, self.dialect());
                                self.lib_call(candidates, other, name, args, pos)
                            }
                            None => self.no_member(other, name, pos),
                        },
                    };
                }
                if let ExprKind::Name(root) = target.kind {
                    if matches!(self.resolve_name(root), NameRef::Unknown) {
                        self.report(target.pos, Message::NameNotFound(root.to_string()));
                        return Ty::Error;
                    }
                }
                let receiver_ty = self.infer(target);
                match receiver_ty {
                    Ty::Class(index) => self.user_call(index, name, Receiver::Expr(target), args, pos),
                    Ty::Error => self.expr(target),
                    other => match lib_class_of(other) {
                        Some(class) => {
                            self.expr(target);
                            let candidates = library::overloads(class, name, CallKind::Instance, self.dialect());
                            self.lib_call(candidates, other, name, args, pos)
                        }
                        None => self.no_member(other, name, pos),
                    },
                }
            }
            // Basic element access on a computed array.
            _ if self.dialect() == Dialect::Basic && args.len() == 1 => {
                let ty = self.expr(callee);
                self.element(ty, args[0], pos)
            }
            _ => {
                let name = callee.dotted_name().unwrap_or_default();
                self.report(callee.pos, Message::NotInvocable(name));
                Ty::Error
            }
        }
    }

    fn user_call(&mut self, owner: usize, name: &str, receiver: Receiver<'a>, args: &'a [&'a Expr<'a>], pos: Pos) -> Ty<'a> {
        let env = self.env;
        let candidates: Vec<Callee<'c, 'a>> = env.types[owner]
            .methods
            .iter()
            .filter(|m| matches!(m.source, MethodSource::User(_)) && same_name(env.dialect, m.name, name))
            .map(Callee::User)
            .collect();
        if candidates.is_empty() {
            return self.no_member(Ty::Class(owner), name, pos);
        }
        let Some(chosen) = self.choose(&candidates, name, args, pos) else { return Ty::Error };
        let Callee::User(method) = chosen else { return Ty::Error };

        let mut virtual_call = false;
        if !method.is_static {
            match receiver {
                Receiver::Expr(expr) => {
                    self.expr(expr);
                    virtual_call = !matches!(expr.kind, ExprKind::This);
                }
                Receiver::This | Receiver::None => {
                    if self.method.is_static {
                        self.report(pos, Message::InstanceRequired(name.to_string()));
                        return Ty::Error;
                    }
                    self.b.ldarg(0);
                }
            }
        } else if let Receiver::Expr(expr) = receiver {
            if self.dialect() == Dialect::Brace {
                self.report(expr.pos, Message::InstanceRequired(name.to_string()));
                return Ty::Error;
            }
        }
        self.arguments(chosen, args);
        let pops = method.params.len() as u32 + u32::from(!method.is_static);
        let pushes = u32::from(method.ret != Ty::Void);
        let op = if virtual_call { OpCode::Callvirt } else { OpCode::Call };
        self.b.emit_call(op, method.token(), pops, pushes);
        method.ret
    }

    /// Call a library method; an instance receiver is already on the stack.
    fn lib_call(&mut self, candidates: Vec<LibMethodId>, owner: Ty<'a>, name: &str, args: &'a [&'a Expr<'a>], pos: Pos) -> Ty<'a> {
        if candidates.is_empty() {
            return self.no_member(owner, name, pos);
        }
        let callees: Vec<Callee<'c, 'a>> = candidates.into_iter().map(Callee::Lib).collect();
        let Some(chosen) = self.choose(&callees, name, args, pos) else { return Ty::Error };
        let Callee::Lib(id) = chosen else { return Ty::Error };
        self.arguments(chosen, args);
        self.emit_lib_call(id)
    }

    fn emit_lib_call(&mut self, id: LibMethodId) -> Ty<'a> {
        let method = &METHODS[id];
        let token = self.refs.method(id);
        let this = u32::from(method.kind == CallKind::Instance);
        let pops = method.params.len() as u32 + this;
        let pushes = u32::from(method.ret != Ty::Void);
        let op = if method.kind == CallKind::Instance { OpCode::Callvirt } else { OpCode::Call };
        self.b.emit_call(op, token, pops, pushes);
        method.ret
    }

    fn arguments(&mut self, callee: Callee<'c, 'a>, args: &'a [&'a Expr<'a>]) {
        for (arg, &param) in args.iter().zip(callee.params()) {
            let ty = self.expr(arg);
            self.coerce(ty, param, arg.pos);
        }
    }

    /// Overload resolution: an exact match wins, then the first candidate
    /// all arguments convert to.
    fn choose(&mut self, candidates: &[Callee<'c, 'a>], name: &str, args: &'a [&'a Expr<'a>], pos: Pos) -> Option<Callee<'c, 'a>> {
        let arg_tys: Vec<Ty<'a>> = args.iter().map(|arg| self.infer(arg)).collect();
        if arg_tys.contains(&Ty::Error) {
            // Emit for the diagnostics.
            for arg in args {
                self.expr(arg);
            }
            return None;
        }
        let arity: Vec<Callee<'c, 'a>> = candidates.iter().copied().filter(|c| c.params().len() == args.len()).collect();
        let exact = arity.iter().find(|c| {
            c.params().iter().zip(&arg_tys).all(|(&p, &a)| p == a || (a == Ty::Null && p.is_reference()))
        });
        if let Some(&callee) = exact {
            return Some(callee);
        }
        if let Some(&callee) = arity.iter().find(|c| c.params().iter().zip(&arg_tys).all(|(&p, &a)| convertible(a, p))) {
            return Some(callee);
        }
        match arity.first() {
            None => self.report(pos, Message::WrongArgCount { method: name.to_string(), count: args.len() }),
            Some(callee) => {
                let params = callee.params();
                if let Some((i, (&a, &p))) = arg_tys.iter().zip(params).enumerate().find(|(_, (&a, &p))| !convertible(a, p)) {
                    let from = self.env.ty_name(a);
                    let to = self.env.ty_name(p);
                    self.report(args[i].pos, Message::BadArgument { index: i + 1, from, to });
                }
            }
        }
        None
    }

    fn new_expr(&mut self, ty: TypeRef<'a>, args: &'a [&'a Expr<'a>], pos: Pos) -> Ty<'a> {
        let resolved = self.resolve_type(ty);
        match resolved {
            Ty::Error => Ty::Error,
            Ty::Class(index) => {
                let env = self.env;
                let info = &env.types[index];
                if info.is_static() {
                    let name = self.env.ty_name(resolved);
                    self.report(pos, Message::StaticClassInstance(name));
                    return Ty::Error;
                }
                let Some(ctor) = self.env.ctor_of(index) else { return Ty::Error };
                if !args.is_empty() {
                    let method = info.name.to_string();
                    self.report(pos, Message::WrongArgCount { method, count: args.len() });
                    return Ty::Error;
                }
                self.b.emit_call(OpCode::Newobj, ctor.token(), 0, 1);
                resolved
            }
            other => {
                let class = match other {
                    Ty::Object => Some(LibClass::Object),
                    Ty::Lib(LibClass::Exception) => Some(LibClass::Exception),
                    _ => None,
                };
                let Some(class) = class else {
                    let name = self.env.ty_name(other);
                    self.report(pos, Message::StaticClassInstance(name));
                    return Ty::Error;
                };
                let candidates = library::overloads(class, ".ctor", CallKind::Ctor, self.dialect());
                let callees: Vec<Callee<'c, 'a>> = candidates.into_iter().map(Callee::Lib).collect();
                let Some(chosen) = self.choose(&callees, class.name(), args, pos) else { return Ty::Error };
                let Callee::Lib(id) = chosen else { return Ty::Error };
                self.arguments(chosen, args);
                let token = self.refs.method(id);
                self.b.emit_call(OpCode::Newobj, token, METHODS[id].params.len() as u32, 1);
                other
            }
        }
    }

    fn unary(&mut self, op: UnaryOp, operand: &'a Expr<'a>, pos: Pos) -> Ty<'a> {
        let ty = self.expr(operand);
        match (op, ty) {
            (_, Ty::Error) => Ty::Error,
            (UnaryOp::Neg, Ty::Int) => {
                self.b.emit(OpCode::Neg);
                Ty::Int
            }
            (UnaryOp::Not, Ty::Bool) => {
                self.b.ldc_i4(0);
                self.b.emit(OpCode::Ceq);
                Ty::Bool
            }
            (UnaryOp::Not, Ty::Int) if self.dialect() == Dialect::Basic => {
                self.b.emit(OpCode::Not);
                Ty::Int
            }
            _ => {
                let symbol = match (op, self.dialect()) {
                    (UnaryOp::Neg, _) => "-",
                    (UnaryOp::Not, Dialect::Brace) => "!",
                    (UnaryOp::Not, Dialect::Basic) => "Not",
                };
                let ty = self.env.ty_name(ty);
                self.report(pos, Message::BadUnaryOperand { op: symbol, ty });
                Ty::Error
            }
        }
    }

    /// `&&` / `||` as a value.
    fn short_circuit(&mut self, lhs: &'a Expr<'a>, rhs: &'a Expr<'a>, is_or: bool) -> Ty<'a> {
        let shortcut = self.b.new_label();
        let end = self.b.new_label();
        self.branch_on(lhs, shortcut, is_or);
        let ty = self.expr(rhs);
        self.coerce(ty, Ty::Bool, rhs.pos);
        self.b.branch(OpCode::Br, end);
        self.b.mark(shortcut);
        self.b.ldc_i4(i32::from(is_or));
        self.b.mark(end);
        Ty::Bool
    }

    /// Apply `op` to a left operand already on the stack.
    fn binary_rest(&mut self, op: BinaryOp, lt: Ty<'a>, rhs: &'a Expr<'a>, pos: Pos) -> Ty<'a> {
        let concat = match op {
            BinaryOp::Concat => true,
            BinaryOp::Add => lt == Ty::String || (lt != Ty::Error && self.infer(rhs) == Ty::String),
            _ => false,
        };
        if concat {
            return self.concat(lt, rhs, pos, op);
        }
        if op == BinaryOp::AndAlso || op == BinaryOp::OrElse {
            // Only reached from compound forms; evaluate strictly.
            let rt = self.expr(rhs);
            self.coerce(lt, Ty::Bool, pos);
            self.coerce(rt, Ty::Bool, rhs.pos);
            self.b.emit(if op == BinaryOp::AndAlso { OpCode::And } else { OpCode::Or });
            return Ty::Bool;
        }

        let rt = self.expr(rhs);
        if lt == Ty::Error || rt == Ty::Error {
            return Ty::Error;
        }
        let string_equality = matches!((lt, rt), (Ty::String, Ty::String));
        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::IntDiv | BinaryOp::Rem
                if lt == Ty::Int && rt == Ty::Int =>
            {
                self.b.emit(match op {
                    BinaryOp::Add => OpCode::Add,
                    BinaryOp::Sub => OpCode::Sub,
                    BinaryOp::Mul => OpCode::Mul,
                    BinaryOp::Rem => OpCode::Rem,
                    _ => OpCode::Div,
                });
                Ty::Int
            }
            BinaryOp::And | BinaryOp::Or if lt == rt && matches!(lt, Ty::Int | Ty::Bool) => {
                self.b.emit(if op == BinaryOp::And { OpCode::And } else { OpCode::Or });
                lt
            }
            BinaryOp::Eq | BinaryOp::Ne if string_equality => {
                let name = if op == BinaryOp::Eq { "op_Equality" } else { "op_Inequality" };
                match library::overloads(LibClass::String, name, CallKind::Static, Dialect::Brace).first() {
                    Some(&id) => self.emit_lib_call(id),
                    None => Ty::Error,
                }
            }
            BinaryOp::Eq | BinaryOp::Ne if comparable(lt, rt) => {
                self.b.emit(OpCode::Ceq);
                if op == BinaryOp::Ne {
                    self.b.ldc_i4(0);
                    self.b.emit(OpCode::Ceq);
                }
                Ty::Bool
            }
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge if lt == Ty::Int && rt == Ty::Int => {
                match op {
                    BinaryOp::Lt => self.b.emit(OpCode::Clt),
                    BinaryOp::Gt => self.b.emit(OpCode::Cgt),
                    BinaryOp::Le => {
                        self.b.emit(OpCode::Cgt);
                        self.b.ldc_i4(0);
                        self.b.emit(OpCode::Ceq);
                    }
                    _ => {
                        self.b.emit(OpCode::Clt);
                        self.b.ldc_i4(0);
                        self.b.emit(OpCode::Ceq);
                    }
                }
                Ty::Bool
            }
            _ => {
                let lhs = self.env.ty_name(lt);
                let rhs = self.env.ty_name(rt);
                let op = operator_symbol(op, self.dialect());
                self.report(pos, Message::BadBinaryOperands { op, lhs, rhs });
                Ty::Error
            }
        }
    }

    /// String concatenation; boxes value operands.
    fn concat(&mut self, lt: Ty<'a>, rhs: &'a Expr<'a>, pos: Pos, op: BinaryOp) -> Ty<'a> {
        let rt = self.infer(rhs);
        if lt == Ty::Error || rt == Ty::Error {
            self.expr(rhs);
            return Ty::Error;
        }
        if lt == Ty::Void || rt == Ty::Void {
            self.expr(rhs);
            let lhs = self.env.ty_name(lt);
            let rhs = self.env.ty_name(rt);
            self.report(pos, Message::BadBinaryOperands { op: operator_symbol(op, self.dialect()), lhs, rhs });
            return Ty::Error;
        }
        let strings = |t: Ty<'_>| matches!(t, Ty::String | Ty::Null);
        let both_strings = strings(lt) && strings(rt);
        if !both_strings {
            self.box_value(lt);
        }
        let rt = self.expr(rhs);
        let params: &[Ty<'_>] = if both_strings {
            &[Ty::String, Ty::String]
        } else {
            self.box_value(rt);
            &[Ty::Object, Ty::Object]
        };
        let id = library::overloads(LibClass::String, "Concat", CallKind::Static, Dialect::Brace)
            .into_iter()
            .find(|&id| METHODS[id].params == params);
        match id {
            Some(id) => self.emit_lib_call(id),
            None => Ty::Error,
        }
    }

    fn box_value(&mut self, ty: Ty<'a>) {
        let class = match ty {
            Ty::Int => LibClass::Int32,
            Ty::Bool => LibClass::Boolean,
            _ => return,
        };
        let token = self.refs.class(class);
        self.b.emit_token(OpCode::Box, token);
    }

    /// Check an implicit conversion and emit the boxing it needs.
    fn coerce(&mut self, from: Ty<'a>, to: Ty<'a>, pos: Pos) {
        if !convertible(from, to) {
            let from = self.env.ty_name(from);
            let to = self.env.ty_name(to);
            self.report(pos, Message::CannotConvert { from, to });
            return;
        }
        if to == Ty::Object {
            self.box_value(from);
        }
    }

    // ------------------------------------------------------------------
    // Conditions
    // ------------------------------------------------------------------

    /// Jump to `target` when `cond` evaluates to `when`.
    fn branch_on(&mut self, cond: &'a Expr<'a>, target: Label, when: bool) {
        match &cond.kind {
            ExprKind::Unary { op: UnaryOp::Not, operand } if self.infer(operand) == Ty::Bool => {
                self.branch_on(operand, target, !when)
            }
            ExprKind::Binary { op: op @ (BinaryOp::AndAlso | BinaryOp::OrElse), lhs, rhs } => {
                let is_and = *op == BinaryOp::AndAlso;
                if is_and != when {
                    // `a && b` false or `a || b` true: either operand decides.
                    self.branch_on(lhs, target, when);
                    self.branch_on(rhs, target, when);
                } else {
                    let skip = self.b.new_label();
                    self.branch_on(lhs, skip, !when);
                    self.branch_on(rhs, target, when);
                    self.b.mark(skip);
                }
            }
            ExprKind::Bool(value) if self.options().optimize => {
                if *value == when {
                    self.b.branch(OpCode::Br, target);
                }
            }
            ExprKind::Binary { op, lhs, rhs } if op.is_comparison() && self.options().optimize => {
                let lt = self.expr(lhs);
                let rt = self.infer(rhs);
                let fused = match op {
                    BinaryOp::Eq | BinaryOp::Ne => {
                        (lt == Ty::Int && rt == Ty::Int)
                            || (comparable(lt, rt) && !matches!((lt, rt), (Ty::String, Ty::String)))
                    }
                    _ => lt == Ty::Int && rt == Ty::Int,
                };
                if fused {
                    self.expr(rhs);
                    self.b.branch(comparison_branch(*op, when), target);
                } else {
                    let ty = self.binary_rest(*op, lt, rhs, cond.pos);
                    self.coerce(ty, Ty::Bool, cond.pos);
                    self.b.branch(if when { OpCode::Brtrue } else { OpCode::Brfalse }, target);
                }
            }
            _ => {
                let ty = self.expr(cond);
                self.coerce(ty, Ty::Bool, cond.pos);
                self.b.branch(if when { OpCode::Brtrue } else { OpCode::Brfalse }, target);
            }
        }
    }
}

/// Long-form branch taken when `op` holds (`when`) or fails.
fn comparison_branch(op: BinaryOp, when: bool) -> OpCode {
    match (op, when) {
        (BinaryOp::Lt, true) | (BinaryOp::Ge, false) => OpCode::Blt,
        (BinaryOp::Gt, true) | (BinaryOp::Le, false) => OpCode::Bgt,
        (BinaryOp::Le, true) | (BinaryOp::Gt, false) => OpCode::Ble,
        (BinaryOp::Ge, true) | (BinaryOp::Lt, false) => OpCode::Bge,
        (BinaryOp::Eq, true) | (BinaryOp::Ne, false) => OpCode::Beq,
        _ => OpCode::BneUn,
    }
}

fn convertible(from: Ty<'_>, to: Ty<'_>) -> bool {
    match (from, to) {
        (Ty::Error, _) | (_, Ty::Error) => true,
        (a, b) if a == b => true,
        (Ty::Void, _) => false,
        (_, Ty::Object) => true,
        (Ty::Null, b) => b.is_reference(),
        _ => false,
    }
}

/// Operands `==` / `!=` can compare.
fn comparable(lt: Ty<'_>, rt: Ty<'_>) -> bool {
    match (lt, rt) {
        (Ty::Int, Ty::Int) | (Ty::Bool, Ty::Bool) => true,
        (a, b) => a.is_reference() && b.is_reference() && (a == b || convertible(a, b) || convertible(b, a)),
    }
}

fn lib_class_of(ty: Ty<'_>) -> Option<LibClass> {
    match ty {
        Ty::String => Some(LibClass::String),
        Ty::Object => Some(LibClass::Object),
        Ty::Int => Some(LibClass::Int32),
        Ty::Bool => Some(LibClass::Boolean),
        Ty::Lib(class) => Some(class),
        _ => None,
    }
}

fn root_name<'a>(expr: &'a Expr<'a>) -> Option<&'a str> {
    match &expr.kind {
        ExprKind::Name(name) => Some(name),
        ExprKind::Member { target, .. } => root_name(target),
        _ => None,
    }
}

fn is_literal(expr: &Expr<'_>) -> bool {
    matches!(expr.kind, ExprKind::Int(_) | ExprKind::Str(_) | ExprKind::Bool(_) | ExprKind::Null)
}

fn operator_symbol(op: BinaryOp, dialect: Dialect) -> &'static str {
    match (op, dialect) {
        (BinaryOp::Add, _) => "+",
        (BinaryOp::Sub, _) => "-",
        (BinaryOp::Mul, _) => "*",
        (BinaryOp::Div, _) => "/",
        (BinaryOp::IntDiv, _) => "\\",
        (BinaryOp::Rem, Dialect::Brace) => "%",
        (BinaryOp::Rem, Dialect::Basic) => "Mod",
        (BinaryOp::Concat, _) => "&",
        (BinaryOp::Lt, _) => "<",
        (BinaryOp::Gt, _) => ">",
        (BinaryOp::Le, _) => "<=",
        (BinaryOp::Ge, _) => ">=",
        (BinaryOp::Eq, Dialect::Brace) => "==",
        (BinaryOp::Eq, Dialect::Basic) => "=",
        (BinaryOp::Ne, Dialect::Brace) => "!=",
        (BinaryOp::Ne, Dialect::Basic) => "<>",
        (BinaryOp::AndAlso, Dialect::Brace) => "&&",
        (BinaryOp::AndAlso, Dialect::Basic) => "AndAlso",
        (BinaryOp::OrElse, Dialect::Brace) => "||",
        (BinaryOp::OrElse, Dialect::Basic) => "OrElse",
        (BinaryOp::And, Dialect::Brace) => "&",
        (BinaryOp::And, Dialect::Basic) => "And",
        (BinaryOp::Or, Dialect::Brace) => "|",
        (BinaryOp::Or, Dialect::Basic) => "Or",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{csharp, vb};
    use crate::il::instruction::{decode_stream, Operand};
    use crate::il::metadata::TypeSig;
    use bumpalo::Bump;

    fn options(optimize: bool) -> GenOptions {
        GenOptions {
            optimize,
            debug: false,
            infer_locals: true,
            mscorlib: Version::new(4, 0, 0, 0),
            visual_basic_runtime: true,
        }
    }

    fn compile(src: &str, dialect: Dialect, optimize: bool) -> (Option<ModuleImage>, DiagnosticSink) {
        let arena = Bump::new();
        let mut session = CompilationSession::new(&arena);
        let mut sink = DiagnosticSink::new(dialect, "snippet.0");
        let unit = match dialect {
            Dialect::Brace => csharp::parse(src, &session, &mut sink),
            Dialect::Basic => vb::parse(src, &session, &mut sink),
        };
        let image = unit.and_then(|unit| {
            generate(unit, &mut session, dialect, options(optimize), [0; 16], &mut sink).unwrap()
        });
        (image, sink)
    }

    fn opcodes(image: &ModuleImage, row: usize) -> Vec<OpCode> {
        decode_stream(&image.bodies[row].code).unwrap().iter().map(|i| i.opcode).collect()
    }

    #[test]
    fn hello_world_body() {
        let src = crate::core::config::example_snippet("C#").unwrap();
        let (image, sink) = compile(src, Dialect::Brace, true);
        assert!(sink.diagnostics().is_empty(), "{:?}", sink.diagnostics());
        let image = image.unwrap();
        assert_eq!(opcodes(&image, 0), vec![OpCode::Ldstr, OpCode::Call, OpCode::Ret]);
        let meta = &image.metadata;
        assert_eq!(meta.types[1].methods[0].name, "Main");
        assert_eq!(meta.types[1].methods[1].name, ".ctor");
        assert_eq!(meta.user_strings, vec!["Hello, MuchDifferent!".to_string()]);
        let call = decode_stream(&image.bodies[0].code).unwrap()[1].operand;
        let Operand::Token(token) = call else { panic!("call without token") };
        let member = &meta.member_refs[token.index().unwrap()];
        assert_eq!(member.name, "WriteLine");
        assert_eq!(member.sig.params, vec![TypeSig::String]);
    }

    #[test]
    fn debug_build_adds_nops() {
        let src = crate::core::config::example_snippet("C#").unwrap();
        let (image, _) = compile(src, Dialect::Brace, false);
        assert_eq!(
            opcodes(&image.unwrap(), 0),
            vec![OpCode::Nop, OpCode::Ldstr, OpCode::Call, OpCode::Nop, OpCode::Ret]
        );
    }

    #[test]
    fn while_loop_is_top_tested() {
        let src = "class P { static void Main() { int i = 0; while (i < 10) { i++; } } }";
        let (image, sink) = compile(src, Dialect::Brace, true);
        assert!(sink.diagnostics().is_empty(), "{:?}", sink.diagnostics());
        assert_eq!(
            opcodes(&image.unwrap(), 0),
            vec![
                OpCode::LdcI40,
                OpCode::Stloc0,
                OpCode::Ldloc0,
                OpCode::LdcI4S,
                OpCode::BgeS,
                OpCode::Ldloc0,
                OpCode::LdcI41,
                OpCode::Add,
                OpCode::Stloc0,
                OpCode::BrS,
                OpCode::Ret,
            ]
        );
    }

    #[test]
    fn mixed_concatenation_boxes() {
        let src = "using System; class P { static void Main() { int n = 3; Console.WriteLine(\"n=\" + n); } }";
        let (image, sink) = compile(src, Dialect::Brace, true);
        assert!(sink.diagnostics().is_empty(), "{:?}", sink.diagnostics());
        let image = image.unwrap();
        let ops = opcodes(&image, 0);
        assert!(ops.contains(&OpCode::Box));
        let concat = image.metadata.member_refs.iter().find(|m| m.name == "Concat").unwrap();
        assert_eq!(concat.sig.params, vec![TypeSig::Object, TypeSig::Object]);
    }

    #[test]
    fn try_catch_finally_clauses() {
        let src = "using System; class P { static void Main() { try { Console.WriteLine(1); } \
                   catch (Exception e) { Console.WriteLine(e.Message); } finally { Console.WriteLine(2); } } }";
        let (image, sink) = compile(src, Dialect::Brace, true);
        assert!(sink.diagnostics().is_empty(), "{:?}", sink.diagnostics());
        let image = image.unwrap();
        let clauses = &image.metadata.types[1].methods[0].clauses;
        assert_eq!(clauses.len(), 2);
        assert!(matches!(clauses[0].kind, ClauseKind::Catch(_)));
        assert_eq!(clauses[1].kind, ClauseKind::Finally);
        assert_eq!(clauses[0].try_offset, clauses[1].try_offset);
        assert_eq!(clauses[1].try_end(), clauses[0].handler_end());
    }

    #[test]
    fn missing_return_depends_on_dialect() {
        let (image, sink) = compile("class P { static int F() { } }", Dialect::Brace, true);
        assert!(image.is_none());
        assert_eq!(sink.diagnostics()[0].code, "CS0161");

        let src = "Module M\nFunction F() As Integer\nEnd Function\nEnd Module\n";
        let (image, sink) = compile(src, Dialect::Basic, true);
        assert!(image.is_some());
        assert_eq!(sink.diagnostics()[0].code, "BC42105");
    }

    #[test]
    fn semantic_errors_are_reported() {
        let src = "class P { static void Main() { int x = \"a\"; y = 2; } }";
        let (image, sink) = compile(src, Dialect::Brace, true);
        assert!(image.is_none());
        let codes: Vec<_> = sink.diagnostics().iter().map(|d| d.code.as_str()).collect();
        // `x` also draws an assigned-but-unused warning.
        assert_eq!(codes, vec!["CS0029", "CS0103", "CS0219"]);
    }

    #[test]
    fn unused_locals_warn() {
        let src = "class P { static void Main() { int a; int b = 1; } }";
        let (image, sink) = compile(src, Dialect::Brace, true);
        assert!(image.is_some());
        let codes: Vec<_> = sink.diagnostics().iter().map(|d| d.code.as_str()).collect();
        assert_eq!(codes, vec!["CS0168", "CS0219"]);
    }

    #[test]
    fn basic_module_is_static_and_indexes_arrays() {
        let src = "Imports System\nModule M\nSub Main(args() As String)\nIf args.Length > 0 Then Console.WriteLine(args(0))\nEnd Sub\nEnd Module\n";
        let (image, sink) = compile(src, Dialect::Basic, true);
        assert!(sink.diagnostics().is_empty(), "{:?}", sink.diagnostics());
        let image = image.unwrap();
        let module = &image.metadata.types[1];
        assert!(module.flags.is_sealed);
        assert_eq!(module.methods.len(), 1);
        assert!(module.methods[0].flags.is_static);
        assert_eq!(module.custom_attributes.len(), 1);
        assert!(opcodes(&image, 0).contains(&OpCode::LdelemRef));
    }

    #[test]
    fn return_inside_try_leaves() {
        let src = "class P { static int F() { try { return 1; } finally { } } }";
        let (image, sink) = compile(src, Dialect::Brace, true);
        assert!(sink.diagnostics().is_empty(), "{:?}", sink.diagnostics());
        let ops = opcodes(&image.unwrap(), 0);
        assert!(ops.contains(&OpCode::LeaveS));
        assert_eq!(&ops[ops.len() - 2..], &[OpCode::Ldloc0, OpCode::Ret]);
    }
}
