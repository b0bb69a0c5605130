//! Line-oriented parser for the Visual Basic subset.
//!
//! `For … To … Step`, `Do … Loop` and `ElseIf` chains are lowered onto the
//! shared loop and conditional statements. Syntax errors abort the parse;
//! an unterminated block is reported at its opening statement.

use super::ast::*;
use super::cursor::{Abort, Cursor, PResult};
use super::lexer::{Lexer, Tok};
use super::messages::{DiagnosticSink, Message};
use super::Dialect;
use crate::core::session::CompilationSession;

const RESERVED: &[&str] = &[
    "addhandler", "and", "andalso", "as", "boolean", "byval", "call", "catch", "class", "dim", "do",
    "else", "elseif", "end", "exit", "false", "finally", "for", "friend", "function", "if", "imports",
    "integer", "loop", "me", "mod", "module", "namespace", "new", "next", "not", "nothing", "object",
    "or", "orelse", "private", "protected", "public", "return", "shared", "step", "string", "sub",
    "then", "throw", "to", "true", "try", "until", "while", "continue",
];

/// Words that end a statement block.
const BLOCK_END: &[&str] = &["end", "else", "elseif", "loop", "next", "catch", "finally"];

/// Parse a Basic compilation unit. Returns `None` when parsing aborted.
pub fn parse<'a>(
    source: &str,
    session: &CompilationSession<'a>,
    sink: &mut DiagnosticSink,
) -> Option<&'a CompilationUnit<'a>> {
    let tokens = Lexer::new(source, Dialect::Basic, session).tokenize(sink);
    let mut parser = Parser { cur: Cursor::new(tokens, Dialect::Basic), session, sink };
    match parser.unit() {
        Ok(unit) => Some(session.alloc(unit)),
        Err(Abort) => None,
    }
}

struct Parser<'s, 'a> {
    cur: Cursor<'a>,
    session: &'s CompilationSession<'a>,
    sink: &'s mut DiagnosticSink,
}

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|kw| kw.eq_ignore_ascii_case(word))
}

impl<'s, 'a> Parser<'s, 'a> {
    fn fail<T>(&mut self, pos: Pos, message: Message) -> PResult<T> {
        self.sink.report(pos, message);
        Err(Abort)
    }

    fn skip_newlines(&mut self) {
        while self.cur.tok() == Tok::Newline {
            self.cur.advance();
        }
    }

    fn end_of_statement(&mut self) -> PResult<()> {
        match self.cur.tok() {
            Tok::Newline => {
                self.cur.advance();
                Ok(())
            }
            Tok::Eof => Ok(()),
            _ => {
                let pos = self.cur.pos();
                self.fail(pos, Message::EndOfStatementExpected)
            }
        }
    }

    fn expect_punct(&mut self, p: &str) -> PResult<()> {
        if self.cur.eat_punct(p) {
            return Ok(());
        }
        let pos = self.cur.pos();
        let message = match p {
            ")" => Message::ExpectedCloseParen,
            _ => Message::SyntaxError(self.cur.describe()),
        };
        self.fail(pos, message)
    }

    fn expect_word(&mut self, kw: &str) -> PResult<()> {
        if self.cur.eat_word(kw) {
            return Ok(());
        }
        let pos = self.cur.pos();
        let token = self.cur.describe();
        self.fail(pos, Message::SyntaxError(token))
    }

    /// Expect `End <construct>`, reporting the unterminated block otherwise.
    fn expect_end(&mut self, construct: &'static str, opened: Pos) -> PResult<()> {
        if self.cur.is_word("end") && self.cur.is_word_at(1, construct) {
            self.cur.advance();
            self.cur.advance();
            return Ok(());
        }
        self.fail(opened, Message::MissingEnd(construct))
    }

    fn ident(&mut self) -> PResult<&'a str> {
        match self.cur.tok() {
            Tok::Word(w) if !is_reserved(w) => {
                self.cur.advance();
                Ok(w)
            }
            _ => {
                let pos = self.cur.pos();
                self.fail(pos, Message::IdentifierExpected)
            }
        }
    }

    fn qualified_name(&mut self) -> PResult<&'a str> {
        let mut name = self.ident()?.to_string();
        while self.cur.is_punct(".") && matches!(self.cur.peek_nth(1).tok, Tok::Word(_)) {
            self.cur.advance();
            name.push('.');
            name.push_str(self.ident()?);
        }
        Ok(self.session.alloc_str(&name))
    }

    // ---------------------------------------------------------------
    // Declarations
    // ---------------------------------------------------------------

    fn unit(&mut self) -> PResult<CompilationUnit<'a>> {
        self.skip_newlines();
        let mut imports = Vec::new();
        while self.cur.is_word("imports") {
            let pos = self.cur.advance().pos;
            let namespace = self.qualified_name()?;
            self.end_of_statement()?;
            self.skip_newlines();
            imports.push(Import { namespace, pos });
        }
        let mut types = Vec::new();
        self.declarations("", &mut types, None)?;
        Ok(CompilationUnit {
            imports: self.session.alloc_vec(imports),
            types: self.session.alloc_vec(types),
        })
    }

    /// Top-level or namespace declarations; `opened` is the `Namespace`
    /// statement position when inside one.
    fn declarations(&mut self, namespace: &str, types: &mut Vec<TypeDecl<'a>>, opened: Option<Pos>) -> PResult<()> {
        loop {
            self.skip_newlines();
            if self.cur.at_eof() {
                return match opened {
                    Some(pos) => self.fail(pos, Message::MissingEnd("Namespace")),
                    None => Ok(()),
                };
            }
            if let Some(pos) = opened {
                if self.cur.is_word("end") {
                    self.expect_end("Namespace", pos)?;
                    return self.end_of_statement();
                }
            }
            if self.cur.is_word("namespace") {
                let pos = self.cur.advance().pos;
                let name = self.qualified_name()?;
                self.end_of_statement()?;
                let full = if namespace.is_empty() {
                    name.to_string()
                } else {
                    format!("{}.{}", namespace, name)
                };
                self.declarations(&full, types, Some(pos))?;
                continue;
            }
            let pos = self.cur.pos();
            let (access, _) = self.modifiers();
            if !(self.cur.is_word("module") || self.cur.is_word("class")) {
                return self.fail(pos, Message::TopLevelExpected);
            }
            let decl = self.type_decl(namespace, access, pos)?;
            types.push(decl);
        }
    }

    fn modifiers(&mut self) -> (Option<Access>, bool) {
        let mut access = None;
        let mut shared = false;
        loop {
            if self.cur.eat_word("public") {
                access = Some(Access::Public);
            } else if self.cur.eat_word("private") {
                access = Some(Access::Private);
            } else if self.cur.eat_word("friend") {
                access = Some(Access::Internal);
            } else if self.cur.eat_word("protected") {
                access = Some(Access::Protected);
            } else if self.cur.eat_word("shared") {
                shared = true;
            } else {
                return (access, shared);
            }
        }
    }

    fn type_decl(&mut self, namespace: &str, access: Option<Access>, pos: Pos) -> PResult<TypeDecl<'a>> {
        let is_module = self.cur.is_word("module");
        let construct = if is_module { "Module" } else { "Class" };
        self.cur.advance();
        let name = self.ident()?;
        self.end_of_statement()?;

        let mut fields = Vec::new();
        let mut methods = Vec::new();
        let mut nested = Vec::new();
        loop {
            self.skip_newlines();
            if self.cur.at_eof() || self.cur.is_word("end") {
                self.expect_end(construct, pos)?;
                self.end_of_statement()?;
                break;
            }
            let member_pos = self.cur.pos();
            let (member_access, shared) = self.modifiers();
            let is_static = shared || is_module;
            if self.cur.is_word("class") {
                nested.push(self.type_decl("", member_access, member_pos)?);
            } else if self.cur.is_word("sub") || self.cur.is_word("function") {
                methods.push(self.method(member_access, is_static, member_pos)?);
            } else {
                self.cur.eat_word("dim");
                self.fields(member_access, is_static, &mut fields)?;
                self.end_of_statement()?;
            }
        }
        Ok(TypeDecl {
            namespace: self.session.alloc_str(namespace),
            name,
            kind: if is_module { TypeKind::Module } else { TypeKind::Class },
            access,
            fields: self.session.alloc_vec(fields),
            methods: self.session.alloc_vec(methods),
            nested: self.session.alloc_vec(nested),
            pos,
        })
    }

    fn fields(&mut self, access: Option<Access>, is_static: bool, out: &mut Vec<FieldDecl<'a>>) -> PResult<()> {
        loop {
            let pos = self.cur.pos();
            let (name, ty, init) = self.declarator()?;
            let ty = match ty {
                Some(ty) => ty,
                None => TypeRef { name: TypeName::Object, pos },
            };
            out.push(FieldDecl { name, ty, access, is_static, init, pos });
            if !self.cur.eat_punct(",") {
                return Ok(());
            }
        }
    }

    /// `name[()] [As Type] [= expr]`.
    #[allow(clippy::type_complexity)]
    fn declarator(&mut self) -> PResult<(&'a str, Option<TypeRef<'a>>, Option<&'a Expr<'a>>)> {
        let name = self.ident()?;
        let is_array = self.cur.is_punct("(") && self.cur.is_punct_at(1, ")");
        if is_array {
            self.cur.advance();
            self.cur.advance();
        }
        let mut ty = if self.cur.eat_word("as") { Some(self.type_ref()?) } else { None };
        if is_array {
            let pos = self.cur.pos();
            let elem = ty.map_or(TypeName::Object, |t| t.name);
            let elem_pos = ty.map_or(pos, |t| t.pos);
            ty = Some(TypeRef { name: TypeName::Array(self.session.alloc(elem)), pos: elem_pos });
        }
        let init = if self.cur.eat_punct("=") { Some(self.expr()?) } else { None };
        Ok((name, ty, init))
    }

    fn method(&mut self, access: Option<Access>, is_static: bool, pos: Pos) -> PResult<MethodDecl<'a>> {
        let is_function = self.cur.is_word("function");
        let construct = if is_function { "Function" } else { "Sub" };
        self.cur.advance();
        let name = self.ident()?;
        let mut params = Vec::new();
        if self.cur.eat_punct("(") {
            if !self.cur.is_punct(")") {
                loop {
                    self.cur.eat_word("byval");
                    let param_pos = self.cur.pos();
                    let (param_name, ty, _) = self.declarator()?;
                    let ty = ty.unwrap_or(TypeRef { name: TypeName::Object, pos: param_pos });
                    params.push(Param { name: param_name, ty, pos: param_pos });
                    if !self.cur.eat_punct(",") {
                        break;
                    }
                }
            }
            self.expect_punct(")")?;
        }
        let ret = if is_function {
            let ret_pos = self.cur.pos();
            if self.cur.eat_word("as") {
                self.type_ref()?
            } else {
                TypeRef { name: TypeName::Object, pos: ret_pos }
            }
        } else {
            TypeRef { name: TypeName::Void, pos }
        };
        self.end_of_statement()?;
        let body = self.statements()?;
        let end_pos = self.cur.pos();
        self.expect_end(construct, pos)?;
        self.end_of_statement()?;
        Ok(MethodDecl {
            name,
            ret,
            params: self.session.alloc_vec(params),
            access,
            is_static,
            body,
            pos,
            end_pos,
        })
    }

    fn type_ref(&mut self) -> PResult<TypeRef<'a>> {
        let pos = self.cur.pos();
        let base = if self.cur.eat_word("integer") {
            TypeName::Int
        } else if self.cur.eat_word("boolean") {
            TypeName::Bool
        } else if self.cur.eat_word("string") {
            TypeName::String
        } else if self.cur.eat_word("object") {
            TypeName::Object
        } else {
            TypeName::Named(self.qualified_name()?)
        };
        let mut name = base;
        while self.cur.is_punct("(") && self.cur.is_punct_at(1, ")") {
            self.cur.advance();
            self.cur.advance();
            name = TypeName::Array(self.session.alloc(name));
        }
        Ok(TypeRef { name, pos })
    }

    // ---------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------

    fn at_block_end(&self) -> bool {
        BLOCK_END.iter().any(|kw| self.cur.is_word(kw))
    }

    /// Statements up to a block terminator or end of input.
    fn statements(&mut self) -> PResult<&'a [Stmt<'a>]> {
        let mut stmts = Vec::new();
        loop {
            self.skip_newlines();
            if self.cur.at_eof() || self.at_block_end() {
                return Ok(self.session.alloc_vec(stmts));
            }
            self.statement_into(&mut stmts)?;
            self.end_of_statement()?;
        }
    }

    fn statement_into(&mut self, out: &mut Vec<Stmt<'a>>) -> PResult<()> {
        let pos = self.cur.pos();
        let kind = if self.cur.eat_word("dim") {
            loop {
                let decl_pos = self.cur.pos();
                let (name, ty, init) = self.declarator()?;
                out.push(Stmt { kind: StmtKind::Local { name, ty, init }, pos: decl_pos });
                if !self.cur.eat_punct(",") {
                    return Ok(());
                }
            }
        } else if self.cur.is_word("if") {
            self.if_statement()?
        } else if self.cur.eat_word("while") {
            let cond = self.expr()?;
            self.end_of_statement()?;
            let body = self.statements()?;
            self.expect_end("While", pos)?;
            StmtKind::While { cond: Some(cond), body, step: None, kind: LoopKind::While }
        } else if self.cur.eat_word("do") {
            self.do_statement(pos)?
        } else if self.cur.is_word("for") {
            return self.for_statement(out);
        } else if self.cur.eat_word("exit") {
            match self.loop_kind() {
                Some(kind) => StmtKind::Break(Some(kind)),
                None if self.cur.eat_word("sub") || self.cur.eat_word("function") => StmtKind::Return(None),
                None => {
                    let pos = self.cur.pos();
                    let token = self.cur.describe();
                    return self.fail(pos, Message::SyntaxError(token));
                }
            }
        } else if self.cur.eat_word("continue") {
            match self.loop_kind() {
                Some(kind) => StmtKind::Continue(Some(kind)),
                None => {
                    let pos = self.cur.pos();
                    let token = self.cur.describe();
                    return self.fail(pos, Message::SyntaxError(token));
                }
            }
        } else if self.cur.eat_word("return") {
            let value = if self.at_statement_end() { None } else { Some(self.expr()?) };
            StmtKind::Return(value)
        } else if self.cur.eat_word("throw") {
            let value = if self.at_statement_end() { None } else { Some(self.expr()?) };
            StmtKind::Throw(value)
        } else if self.cur.eat_word("try") {
            self.try_statement(pos)?
        } else if self.cur.eat_word("call") {
            let target = self.postfix_expr()?;
            StmtKind::Expr(self.as_call(target))
        } else {
            self.simple_statement()?
        };
        out.push(Stmt { kind, pos });
        Ok(())
    }

    fn at_statement_end(&self) -> bool {
        matches!(self.cur.tok(), Tok::Newline | Tok::Eof) || self.cur.is_word("else")
    }

    fn loop_kind(&mut self) -> Option<LoopKind> {
        if self.cur.eat_word("for") {
            Some(LoopKind::For)
        } else if self.cur.eat_word("while") {
            Some(LoopKind::While)
        } else if self.cur.eat_word("do") {
            Some(LoopKind::Do)
        } else {
            None
        }
    }

    fn if_statement(&mut self) -> PResult<StmtKind<'a>> {
        let opened = self.cur.advance().pos;
        let cond = self.expr()?;
        self.expect_word("then")?;

        if !matches!(self.cur.tok(), Tok::Newline | Tok::Eof) {
            // Single-line form.
            let mut then = Vec::new();
            self.statement_into(&mut then)?;
            let otherwise = if self.cur.eat_word("else") {
                let mut otherwise = Vec::new();
                self.statement_into(&mut otherwise)?;
                Some(self.session.alloc_vec(otherwise))
            } else {
                None
            };
            return Ok(StmtKind::If { cond, then: self.session.alloc_vec(then), otherwise });
        }

        self.end_of_statement()?;
        let then = self.statements()?;
        let otherwise = if self.cur.is_word("elseif") {
            let pos = self.cur.pos();
            let nested = self.if_statement()?;
            Some(self.session.alloc_vec(vec![Stmt { kind: nested, pos }]))
        } else if self.cur.eat_word("else") {
            self.end_of_statement()?;
            let body = self.statements()?;
            self.expect_end("If", opened)?;
            Some(body)
        } else {
            self.expect_end("If", opened)?;
            None
        };
        Ok(StmtKind::If { cond, then, otherwise })
    }

    fn do_statement(&mut self, opened: Pos) -> PResult<StmtKind<'a>> {
        let top_test = self.loop_condition()?;
        self.end_of_statement()?;
        let body = self.statements()?;
        if !self.cur.eat_word("loop") {
            return self.fail(opened, Message::MissingEnd("Do"));
        }
        let bottom_test = self.loop_condition()?;
        Ok(match (top_test, bottom_test) {
            (Some((cond, until)), None) => {
                let cond = if until { self.negate(cond) } else { cond };
                StmtKind::While { cond: Some(cond), body, step: None, kind: LoopKind::Do }
            }
            (None, Some((cond, until))) => StmtKind::DoWhile { body, cond, until },
            (None, None) => StmtKind::While { cond: None, body, step: None, kind: LoopKind::Do },
            (Some(_), Some(_)) => {
                let pos = self.cur.pos();
                return self.fail(pos, Message::EndOfStatementExpected);
            }
        })
    }

    /// Optional `While cond` / `Until cond`; the flag is true for `Until`.
    fn loop_condition(&mut self) -> PResult<Option<(&'a Expr<'a>, bool)>> {
        if self.cur.eat_word("while") {
            Ok(Some((self.expr()?, false)))
        } else if self.cur.eat_word("until") {
            Ok(Some((self.expr()?, true)))
        } else {
            Ok(None)
        }
    }

    fn negate(&self, cond: &'a Expr<'a>) -> &'a Expr<'a> {
        self.session.alloc(Expr::new(ExprKind::Unary { op: UnaryOp::Not, operand: cond }, cond.pos))
    }

    fn for_statement(&mut self, out: &mut Vec<Stmt<'a>>) -> PResult<()> {
        let opened = self.cur.advance().pos;
        let var_pos = self.cur.pos();
        let var = self.ident()?;
        let ty = if self.cur.eat_word("as") { Some(self.type_ref()?) } else { None };
        self.expect_punct("=")?;
        let from = self.expr()?;
        self.expect_word("to")?;
        let to = self.expr()?;
        let step = if self.cur.eat_word("step") { Some(self.expr()?) } else { None };
        self.end_of_statement()?;
        let body = self.statements()?;
        if !self.cur.eat_word("next") {
            return self.fail(opened, Message::MissingEnd("For"));
        }
        if let Tok::Word(w) = self.cur.tok() {
            if w.eq_ignore_ascii_case(var) {
                self.cur.advance();
            }
        }

        let target = self.session.alloc(Expr::new(ExprKind::Name(var), var_pos));
        let mut scope = Vec::new();
        let init = match ty {
            Some(ty) => StmtKind::Local { name: var, ty: Some(ty), init: Some(from) },
            None => StmtKind::Assign { target, op: AssignOp::Set, value: from },
        };
        scope.push(Stmt { kind: init, pos: var_pos });

        let descending = matches!(step, Some(Expr { kind: ExprKind::Int(v), .. }) if *v < 0);
        let cmp = if descending { BinaryOp::Ge } else { BinaryOp::Le };
        let cond = self.session.alloc(Expr::new(ExprKind::Binary { op: cmp, lhs: target, rhs: to }, opened));
        let one = self.session.alloc(Expr::new(ExprKind::Int(1), opened));
        let increment = Stmt {
            kind: StmtKind::Assign { target, op: AssignOp::Add, value: step.unwrap_or(one) },
            pos: opened,
        };
        let step_stmt = self.session.alloc(increment);
        scope.push(Stmt {
            kind: StmtKind::While { cond: Some(cond), body, step: Some(step_stmt), kind: LoopKind::For },
            pos: opened,
        });
        out.push(Stmt { kind: StmtKind::Block(self.session.alloc_vec(scope)), pos: opened });
        Ok(())
    }

    fn try_statement(&mut self, opened: Pos) -> PResult<StmtKind<'a>> {
        self.end_of_statement()?;
        let body = self.statements()?;
        let mut catch = None;
        if self.cur.is_word("catch") {
            let pos = self.cur.advance().pos;
            let mut var = None;
            let mut ty = None;
            if let Tok::Word(w) = self.cur.tok() {
                if !is_reserved(w) {
                    self.cur.advance();
                    var = Some(w);
                    if self.cur.eat_word("as") {
                        ty = Some(self.type_ref()?);
                    }
                }
            }
            self.end_of_statement()?;
            let handler = self.statements()?;
            catch = Some(CatchClause { ty, var, body: handler, pos });
        }
        let finally = if self.cur.eat_word("finally") {
            self.end_of_statement()?;
            Some(self.statements()?)
        } else {
            None
        };
        self.expect_end("Try", opened)?;
        Ok(StmtKind::Try { body, catch, finally })
    }

    fn simple_statement(&mut self) -> PResult<StmtKind<'a>> {
        let target = self.postfix_expr()?;
        let op = match self.cur.tok() {
            Tok::Punct("=") => AssignOp::Set,
            Tok::Punct("+=") => AssignOp::Add,
            Tok::Punct("-=") => AssignOp::Sub,
            Tok::Punct("*=") => AssignOp::Mul,
            Tok::Punct("&=") => AssignOp::Concat,
            _ => {
                if !matches!(target.kind, ExprKind::Call { .. } | ExprKind::Name(_) | ExprKind::Member { .. }) {
                    self.sink.report(target.pos, Message::NotAStatement);
                }
                return Ok(StmtKind::Expr(self.as_call(target)));
            }
        };
        self.cur.advance();
        let value = self.expr()?;
        Ok(StmtKind::Assign { target, op, value })
    }

    /// A bare name in statement position calls a parameterless method.
    fn as_call(&self, expr: &'a Expr<'a>) -> &'a Expr<'a> {
        match expr.kind {
            ExprKind::Name(_) | ExprKind::Member { .. } => {
                self.session.alloc(Expr::new(ExprKind::Call { callee: expr, args: &[] }, expr.pos))
            }
            _ => expr,
        }
    }

    // ---------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------

    fn expr(&mut self) -> PResult<&'a Expr<'a>> {
        self.logical_or()
    }

    fn binary_node(&self, op: BinaryOp, lhs: &'a Expr<'a>, rhs: &'a Expr<'a>, pos: Pos) -> &'a Expr<'a> {
        self.session.alloc(Expr::new(ExprKind::Binary { op, lhs, rhs }, pos))
    }

    fn logical_or(&mut self) -> PResult<&'a Expr<'a>> {
        let mut lhs = self.logical_and()?;
        loop {
            let pos = self.cur.pos();
            let op = if self.cur.eat_word("orelse") {
                BinaryOp::OrElse
            } else if self.cur.eat_word("or") {
                BinaryOp::Or
            } else {
                return Ok(lhs);
            };
            let rhs = self.logical_and()?;
            lhs = self.binary_node(op, lhs, rhs, pos);
        }
    }

    fn logical_and(&mut self) -> PResult<&'a Expr<'a>> {
        let mut lhs = self.logical_not()?;
        loop {
            let pos = self.cur.pos();
            let op = if self.cur.eat_word("andalso") {
                BinaryOp::AndAlso
            } else if self.cur.eat_word("and") {
                BinaryOp::And
            } else {
                return Ok(lhs);
            };
            let rhs = self.logical_not()?;
            lhs = self.binary_node(op, lhs, rhs, pos);
        }
    }

    fn logical_not(&mut self) -> PResult<&'a Expr<'a>> {
        let pos = self.cur.pos();
        if self.cur.eat_word("not") {
            let operand = self.logical_not()?;
            return Ok(self.session.alloc(Expr::new(ExprKind::Unary { op: UnaryOp::Not, operand }, pos)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> PResult<&'a Expr<'a>> {
        let mut lhs = self.arithmetic(0)?;
        loop {
            let op = match self.cur.tok() {
                Tok::Punct("=") => BinaryOp::Eq,
                Tok::Punct("<>") => BinaryOp::Ne,
                Tok::Punct("<") => BinaryOp::Lt,
                Tok::Punct(">") => BinaryOp::Gt,
                Tok::Punct("<=") => BinaryOp::Le,
                Tok::Punct(">=") => BinaryOp::Ge,
                _ => return Ok(lhs),
            };
            let pos = self.cur.advance().pos;
            let rhs = self.arithmetic(0)?;
            lhs = self.binary_node(op, lhs, rhs, pos);
        }
    }

    /// `&`, then `+ -`, `Mod`, `\`, `* /`, from loosest to tightest.
    fn arithmetic(&mut self, level: usize) -> PResult<&'a Expr<'a>> {
        if level == 5 {
            return self.unary();
        }
        let mut lhs = self.arithmetic(level + 1)?;
        loop {
            let pos = self.cur.pos();
            let op = match (level, self.cur.tok()) {
                (0, Tok::Punct("&")) => BinaryOp::Concat,
                (1, Tok::Punct("+")) => BinaryOp::Add,
                (1, Tok::Punct("-")) => BinaryOp::Sub,
                (2, Tok::Word(w)) if w.eq_ignore_ascii_case("mod") => BinaryOp::Rem,
                (3, Tok::Punct("\\")) => BinaryOp::IntDiv,
                (4, Tok::Punct("*")) => BinaryOp::Mul,
                (4, Tok::Punct("/")) => BinaryOp::Div,
                _ => return Ok(lhs),
            };
            self.cur.advance();
            let rhs = self.arithmetic(level + 1)?;
            lhs = self.binary_node(op, lhs, rhs, pos);
        }
    }

    fn unary(&mut self) -> PResult<&'a Expr<'a>> {
        let pos = self.cur.pos();
        if self.cur.eat_punct("-") {
            if let Tok::Int(v) = self.cur.tok() {
                self.cur.advance();
                let value = (v as i64).wrapping_neg() as i32;
                let literal = self.session.alloc(Expr::new(ExprKind::Int(value), pos));
                return self.postfix(literal);
            }
            let operand = self.unary()?;
            return Ok(self.session.alloc(Expr::new(ExprKind::Unary { op: UnaryOp::Neg, operand }, pos)));
        }
        self.postfix_expr()
    }

    fn postfix_expr(&mut self) -> PResult<&'a Expr<'a>> {
        let primary = self.primary()?;
        self.postfix(primary)
    }

    fn postfix(&mut self, mut expr: &'a Expr<'a>) -> PResult<&'a Expr<'a>> {
        loop {
            let pos = self.cur.pos();
            if self.cur.eat_punct(".") {
                let name = self.member_name()?;
                expr = self.session.alloc(Expr::new(ExprKind::Member { target: expr, name }, pos));
            } else if self.cur.is_punct("(") {
                let args = self.arguments()?;
                expr = self.session.alloc(Expr::new(ExprKind::Call { callee: expr, args }, expr.pos));
            } else {
                return Ok(expr);
            }
        }
    }

    /// Member names may be keywords (`.ToString`, `.Length`, `.Parse`).
    fn member_name(&mut self) -> PResult<&'a str> {
        match self.cur.tok() {
            Tok::Word(w) => {
                self.cur.advance();
                Ok(w)
            }
            _ => {
                let pos = self.cur.pos();
                self.fail(pos, Message::IdentifierExpected)
            }
        }
    }

    fn arguments(&mut self) -> PResult<&'a [&'a Expr<'a>]> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        if !self.cur.is_punct(")") {
            loop {
                args.push(self.expr()?);
                if !self.cur.eat_punct(",") {
                    break;
                }
            }
        }
        self.expect_punct(")")?;
        Ok(self.session.alloc_vec(args))
    }

    fn primary(&mut self) -> PResult<&'a Expr<'a>> {
        let token = self.cur.peek();
        let pos = token.pos;
        let kind = match token.tok {
            Tok::Int(v) => {
                self.cur.advance();
                if v > i32::MAX as u32 {
                    self.sink.report(pos, Message::IntegerTooLarge);
                }
                ExprKind::Int(v as i32)
            }
            Tok::Str(s) => {
                self.cur.advance();
                ExprKind::Str(s)
            }
            Tok::Punct("(") => {
                self.cur.advance();
                let inner = self.expr()?;
                self.expect_punct(")")?;
                return Ok(inner);
            }
            Tok::Word(_) if self.cur.eat_word("true") => ExprKind::Bool(true),
            Tok::Word(_) if self.cur.eat_word("false") => ExprKind::Bool(false),
            Tok::Word(_) if self.cur.eat_word("nothing") => ExprKind::Null,
            Tok::Word(_) if self.cur.eat_word("me") => ExprKind::This,
            Tok::Word(_)
                if self.cur.is_word("integer")
                    || self.cur.is_word("string")
                    || self.cur.is_word("boolean")
                    || self.cur.is_word("object") =>
            {
                let ty = self.type_ref()?;
                ExprKind::TypeKeyword(ty.name)
            }
            Tok::Word(_) if self.cur.eat_word("new") => {
                let ty = self.type_ref()?;
                let args = if self.cur.is_punct("(") { self.arguments()? } else { &[] };
                ExprKind::New { ty, args }
            }
            Tok::Word(w) if !is_reserved(w) => {
                self.cur.advance();
                ExprKind::Name(w)
            }
            _ => {
                let term = self.cur.describe();
                return self.fail(pos, Message::InvalidExpressionTerm(term));
            }
        };
        Ok(self.session.alloc(Expr::new(kind, pos)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bumpalo::Bump;

    fn parse_ok<'a>(src: &str, session: &CompilationSession<'a>) -> &'a CompilationUnit<'a> {
        let mut sink = DiagnosticSink::new(Dialect::Basic, "snippet.0.vb");
        let unit = parse(src, session, &mut sink);
        assert!(sink.diagnostics().is_empty(), "{:?}", sink.diagnostics());
        unit.unwrap()
    }

    #[test]
    fn parses_hello_world_module() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let unit = parse_ok(crate::core::config::example_snippet("VB").unwrap(), &session);
        let program = &unit.types[0];
        assert_eq!(program.kind, TypeKind::Module);
        let main = &program.methods[0];
        assert!(main.is_static);
        assert_eq!(main.params[0].name, "args");
        assert_eq!(main.params[0].ty.name, TypeName::Array(&TypeName::String));
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let src = "MODULE M\n  sub Main()\n    DIM x AS integer = 1\n    if x = 1 then x = 2\n  END SUB\nend module\n";
        let unit = parse_ok(src, &session);
        let body = unit.types[0].methods[0].body;
        assert!(matches!(body[0].kind, StmtKind::Local { name: "x", .. }));
        assert!(matches!(body[1].kind, StmtKind::If { otherwise: None, .. }));
    }

    #[test]
    fn for_next_lowers_to_while() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let src = "Module M\nSub Main()\nFor i As Integer = 10 To 1 Step -1\nExit For\nNext i\nEnd Sub\nEnd Module\n";
        let unit = parse_ok(src, &session);
        let StmtKind::Block(scope) = &unit.types[0].methods[0].body[0].kind else { panic!("expected block") };
        let StmtKind::While { cond: Some(cond), body, kind: LoopKind::For, .. } = &scope[1].kind else {
            panic!("expected loop")
        };
        assert!(matches!(cond.kind, ExprKind::Binary { op: BinaryOp::Ge, .. }));
        assert!(matches!(body[0].kind, StmtKind::Break(Some(LoopKind::For))));
    }

    #[test]
    fn do_loop_until_is_bottom_tested() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let src = "Module M\nSub Main()\nDim i = 0\nDo\ni += 1\nLoop Until i > 3\nEnd Sub\nEnd Module\n";
        let unit = parse_ok(src, &session);
        assert!(matches!(unit.types[0].methods[0].body[1].kind, StmtKind::DoWhile { until: true, .. }));
    }

    #[test]
    fn unterminated_if_is_reported_at_opener() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut sink = DiagnosticSink::new(Dialect::Basic, "snippet.0.vb");
        let src = "Module M\nSub Main()\n  If True Then\n    Main()\nEnd Sub\nEnd Module\n";
        assert!(parse(src, &session, &mut sink).is_none());
        let diag = &sink.diagnostics()[0];
        assert_eq!(diag.code, "BC30081");
        assert_eq!((diag.line, diag.column), (Some(3), Some(3)));
    }
}
