//! Recursive-descent parser for the C# subset.
//!
//! A missing `;` is reported at the end of the previous token and parsing
//! goes on as if it had been there. Every other syntax error is reported
//! once and aborts the parse.

use super::ast::*;
use super::cursor::{Abort, Cursor, PResult};
use super::lexer::{Lexer, Tok};
use super::messages::{DiagnosticSink, Message};
use super::Dialect;
use crate::core::session::CompilationSession;

const RESERVED: &[&str] = &[
    "class", "static", "public", "private", "internal", "protected", "void", "int", "bool", "string",
    "object", "if", "else", "while", "do", "for", "break", "continue", "return", "throw", "try", "catch",
    "finally", "new", "null", "true", "false", "this", "using", "namespace",
];

/// Parse a C# compilation unit. Returns `None` when parsing aborted.
pub fn parse<'a>(
    source: &str,
    session: &CompilationSession<'a>,
    sink: &mut DiagnosticSink,
) -> Option<&'a CompilationUnit<'a>> {
    let tokens = Lexer::new(source, Dialect::Brace, session).tokenize(sink);
    let mut parser = Parser { cur: Cursor::new(tokens, Dialect::Brace), session, sink };
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

impl<'s, 'a> Parser<'s, 'a> {
    fn fail<T>(&mut self, pos: Pos, message: Message) -> PResult<T> {
        self.sink.report(pos, message);
        Err(Abort)
    }

    fn expect_punct(&mut self, p: &str) -> PResult<()> {
        if self.cur.eat_punct(p) {
            return Ok(());
        }
        let message = match p {
            "{" => Message::ExpectedOpenBrace,
            "}" => Message::ExpectedCloseBrace,
            ")" => Message::ExpectedCloseParen,
            ";" => Message::MissingSemicolon,
            _ => Message::SyntaxError(self.cur.describe()),
        };
        let pos = if p == "{" || p == "}" { self.cur.pos() } else { self.cur.prev_end() };
        self.fail(pos, message)
    }

    fn expect_semicolon(&mut self) {
        if !self.cur.eat_punct(";") {
            let pos = self.cur.prev_end();
            self.sink.report(pos, Message::MissingSemicolon);
        }
    }

    fn is_reserved(word: &str) -> bool {
        RESERVED.contains(&word)
    }

    fn ident(&mut self) -> PResult<&'a str> {
        match self.cur.tok() {
            Tok::Word(w) if !Self::is_reserved(w) => {
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
        let mut imports = Vec::new();
        while self.cur.is_word("using") {
            let pos = self.cur.advance().pos;
            let namespace = self.qualified_name()?;
            self.expect_semicolon();
            imports.push(Import { namespace, pos });
        }
        let mut types = Vec::new();
        self.declarations("", &mut types, &mut imports, false)?;
        Ok(CompilationUnit {
            imports: self.session.alloc_vec(imports),
            types: self.session.alloc_vec(types),
        })
    }

    fn declarations(
        &mut self,
        namespace: &str,
        types: &mut Vec<TypeDecl<'a>>,
        imports: &mut Vec<Import<'a>>,
        in_namespace: bool,
    ) -> PResult<()> {
        loop {
            if in_namespace && self.cur.is_punct("}") {
                return Ok(());
            }
            if self.cur.at_eof() {
                if in_namespace {
                    let pos = self.cur.pos();
                    return self.fail(pos, Message::ExpectedCloseBrace);
                }
                return Ok(());
            }
            if self.cur.is_word("using") && in_namespace {
                let pos = self.cur.advance().pos;
                let name = self.qualified_name()?;
                self.expect_semicolon();
                imports.push(Import { namespace: name, pos });
                continue;
            }
            if self.cur.eat_word("namespace") {
                let name = self.qualified_name()?;
                let full = if namespace.is_empty() {
                    name.to_string()
                } else {
                    format!("{}.{}", namespace, name)
                };
                self.expect_punct("{")?;
                self.declarations(&full, types, imports, true)?;
                self.expect_punct("}")?;
                continue;
            }
            let pos = self.cur.pos();
            let (access, is_static) = self.modifiers();
            if !self.cur.is_word("class") {
                return self.fail(pos, Message::TopLevelExpected);
            }
            let decl = self.type_decl(namespace, access, is_static, pos)?;
            types.push(decl);
        }
    }

    fn modifiers(&mut self) -> (Option<Access>, bool) {
        let mut access = None;
        let mut is_static = false;
        loop {
            let next = match self.cur.tok() {
                Tok::Word("public") => Some(Access::Public),
                Tok::Word("private") => Some(Access::Private),
                Tok::Word("internal") => Some(Access::Internal),
                Tok::Word("protected") => Some(Access::Protected),
                Tok::Word("static") => {
                    is_static = true;
                    None
                }
                _ => return (access, is_static),
            };
            if next.is_some() {
                access = next;
            }
            self.cur.advance();
        }
    }

    fn type_decl(
        &mut self,
        namespace: &str,
        access: Option<Access>,
        is_static: bool,
        pos: Pos,
    ) -> PResult<TypeDecl<'a>> {
        self.cur.advance(); // class
        let name = self.ident()?;
        self.expect_punct("{")?;
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        let mut nested = Vec::new();
        loop {
            if self.cur.eat_punct("}") {
                break;
            }
            if self.cur.at_eof() {
                let pos = self.cur.pos();
                return self.fail(pos, Message::ExpectedCloseBrace);
            }
            let member_pos = self.cur.pos();
            let (member_access, member_static) = self.modifiers();
            if self.cur.is_word("class") {
                nested.push(self.type_decl("", member_access, member_static, member_pos)?);
                continue;
            }
            if !self.starts_type() {
                let token = self.cur.describe();
                return self.fail(member_pos, Message::SyntaxError(token));
            }
            let ty = self.type_ref()?;
            let name_pos = self.cur.pos();
            let member_name = self.ident()?;
            if self.cur.is_punct("(") {
                methods.push(self.method(member_name, ty, member_access, member_static, name_pos)?);
            } else {
                self.fields(member_name, ty, member_access, member_static, name_pos, &mut fields)?;
            }
        }
        Ok(TypeDecl {
            namespace: self.session.alloc_str(namespace),
            name,
            kind: if is_static { TypeKind::StaticClass } else { TypeKind::Class },
            access,
            fields: self.session.alloc_vec(fields),
            methods: self.session.alloc_vec(methods),
            nested: self.session.alloc_vec(nested),
            pos,
        })
    }

    fn fields(
        &mut self,
        first: &'a str,
        ty: TypeRef<'a>,
        access: Option<Access>,
        is_static: bool,
        first_pos: Pos,
        out: &mut Vec<FieldDecl<'a>>,
    ) -> PResult<()> {
        let mut name = first;
        let mut pos = first_pos;
        loop {
            let init = if self.cur.eat_punct("=") { Some(self.expr()?) } else { None };
            out.push(FieldDecl { name, ty, access, is_static, init, pos });
            if !self.cur.eat_punct(",") {
                break;
            }
            pos = self.cur.pos();
            name = self.ident()?;
        }
        self.expect_semicolon();
        Ok(())
    }

    fn method(
        &mut self,
        name: &'a str,
        ret: TypeRef<'a>,
        access: Option<Access>,
        is_static: bool,
        pos: Pos,
    ) -> PResult<MethodDecl<'a>> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        if !self.cur.is_punct(")") {
            loop {
                let ty = self.type_ref()?;
                let param_pos = self.cur.pos();
                let param_name = self.ident()?;
                params.push(Param { name: param_name, ty, pos: param_pos });
                if !self.cur.eat_punct(",") {
                    break;
                }
            }
        }
        self.expect_punct(")")?;
        let (body, end_pos) = self.block_with_end()?;
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

    fn starts_type(&self) -> bool {
        matches!(self.cur.tok(), Tok::Word(w) if !Self::is_reserved(w)
            || matches!(w, "void" | "int" | "bool" | "string" | "object"))
    }

    fn type_ref(&mut self) -> PResult<TypeRef<'a>> {
        let pos = self.cur.pos();
        let base = match self.cur.tok() {
            Tok::Word("void") => TypeName::Void,
            Tok::Word("int") => TypeName::Int,
            Tok::Word("bool") => TypeName::Bool,
            Tok::Word("string") => TypeName::String,
            Tok::Word("object") => TypeName::Object,
            Tok::Word(w) if !Self::is_reserved(w) => {
                let name = self.qualified_name()?;
                return Ok(TypeRef { name: self.array_suffix(TypeName::Named(name)), pos });
            }
            _ => return self.fail(pos, Message::IdentifierExpected),
        };
        self.cur.advance();
        Ok(TypeRef { name: self.array_suffix(base), pos })
    }

    fn array_suffix(&mut self, mut name: TypeName<'a>) -> TypeName<'a> {
        while self.cur.is_punct("[") && self.cur.is_punct_at(1, "]") {
            self.cur.advance();
            self.cur.advance();
            name = TypeName::Array(self.session.alloc(name));
        }
        name
    }

    // ---------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------

    fn block(&mut self) -> PResult<&'a [Stmt<'a>]> {
        Ok(self.block_with_end()?.0)
    }

    fn block_with_end(&mut self) -> PResult<(&'a [Stmt<'a>], Pos)> {
        self.expect_punct("{")?;
        let mut stmts = Vec::new();
        loop {
            if self.cur.is_punct("}") {
                let end = self.cur.advance().pos;
                return Ok((self.session.alloc_vec(stmts), end));
            }
            if self.cur.at_eof() {
                let pos = self.cur.pos();
                return self.fail(pos, Message::ExpectedCloseBrace);
            }
            self.statement_into(&mut stmts)?;
        }
    }

    /// Body of `if`/`while`/`for`: a block or a single statement.
    fn embedded(&mut self) -> PResult<&'a [Stmt<'a>]> {
        if self.cur.is_punct("{") {
            let pos = self.cur.pos();
            let body = self.block()?;
            return Ok(self.session.alloc_vec(vec![Stmt { kind: StmtKind::Block(body), pos }]));
        }
        let mut stmts = Vec::new();
        self.statement_into(&mut stmts)?;
        Ok(self.session.alloc_vec(stmts))
    }

    fn statement_into(&mut self, out: &mut Vec<Stmt<'a>>) -> PResult<()> {
        let pos = self.cur.pos();
        let kind = match self.cur.tok() {
            Tok::Punct("{") => StmtKind::Block(self.block()?),
            Tok::Punct(";") => {
                self.cur.advance();
                StmtKind::Block(&[])
            }
            Tok::Word("if") => {
                self.cur.advance();
                self.expect_punct("(")?;
                let cond = self.expr()?;
                self.expect_punct(")")?;
                let then = self.embedded()?;
                let otherwise = if self.cur.eat_word("else") { Some(self.embedded()?) } else { None };
                StmtKind::If { cond, then, otherwise }
            }
            Tok::Word("while") => {
                self.cur.advance();
                self.expect_punct("(")?;
                let cond = self.expr()?;
                self.expect_punct(")")?;
                let body = self.embedded()?;
                StmtKind::While { cond: Some(cond), body, step: None, kind: LoopKind::While }
            }
            Tok::Word("do") => {
                self.cur.advance();
                let body = self.embedded()?;
                if !self.cur.eat_word("while") {
                    let pos = self.cur.pos();
                    let token = self.cur.describe();
                    return self.fail(pos, Message::SyntaxError(token));
                }
                self.expect_punct("(")?;
                let cond = self.expr()?;
                self.expect_punct(")")?;
                self.expect_semicolon();
                StmtKind::DoWhile { body, cond, until: false }
            }
            Tok::Word("for") => return self.for_statement(out),
            Tok::Word("break") => {
                self.cur.advance();
                self.expect_semicolon();
                StmtKind::Break(None)
            }
            Tok::Word("continue") => {
                self.cur.advance();
                self.expect_semicolon();
                StmtKind::Continue(None)
            }
            Tok::Word("return") => {
                self.cur.advance();
                let value = if self.cur.is_punct(";") { None } else { Some(self.expr()?) };
                self.expect_semicolon();
                StmtKind::Return(value)
            }
            Tok::Word("throw") => {
                self.cur.advance();
                let value = if self.cur.is_punct(";") { None } else { Some(self.expr()?) };
                self.expect_semicolon();
                StmtKind::Throw(value)
            }
            Tok::Word("try") => self.try_statement()?,
            _ if self.is_local_decl() => {
                self.local_decl(out)?;
                self.expect_semicolon();
                return Ok(());
            }
            _ => {
                let kind = self.simple_statement()?;
                self.expect_semicolon();
                kind
            }
        };
        out.push(Stmt { kind, pos });
        Ok(())
    }

    fn for_statement(&mut self, out: &mut Vec<Stmt<'a>>) -> PResult<()> {
        let pos = self.cur.advance().pos;
        self.expect_punct("(")?;
        let mut scope = Vec::new();
        if !self.cur.is_punct(";") {
            if self.is_local_decl() {
                self.local_decl(&mut scope)?;
            } else {
                let init_pos = self.cur.pos();
                let kind = self.simple_statement()?;
                scope.push(Stmt { kind, pos: init_pos });
            }
        }
        self.expect_punct(";")?;
        let cond = if self.cur.is_punct(";") { None } else { Some(self.expr()?) };
        self.expect_punct(";")?;
        let step = if self.cur.is_punct(")") {
            None
        } else {
            let step_pos = self.cur.pos();
            let kind = self.simple_statement()?;
            Some(self.session.alloc(Stmt { kind, pos: step_pos }))
        };
        self.expect_punct(")")?;
        let body = self.embedded()?;
        scope.push(Stmt { kind: StmtKind::While { cond, body, step, kind: LoopKind::For }, pos });
        out.push(Stmt { kind: StmtKind::Block(self.session.alloc_vec(scope)), pos });
        Ok(())
    }

    fn try_statement(&mut self) -> PResult<StmtKind<'a>> {
        self.cur.advance();
        let body = self.block()?;
        let mut catch = None;
        if self.cur.is_word("catch") {
            let pos = self.cur.advance().pos;
            let mut ty = None;
            let mut var = None;
            if self.cur.eat_punct("(") {
                ty = Some(self.type_ref()?);
                if !self.cur.is_punct(")") {
                    var = Some(self.ident()?);
                }
                self.expect_punct(")")?;
            }
            let handler = self.block()?;
            catch = Some(CatchClause { ty, var, body: handler, pos });
        }
        let finally = if self.cur.eat_word("finally") { Some(self.block()?) } else { None };
        if catch.is_none() && finally.is_none() {
            let pos = self.cur.pos();
            return self.fail(pos, Message::ExpectedOpenBrace);
        }
        Ok(StmtKind::Try { body, catch, finally })
    }

    /// `Type name` or `var name` at the cursor.
    fn is_local_decl(&self) -> bool {
        let mut n = 0;
        match self.cur.peek_nth(0).tok {
            Tok::Word("int" | "bool" | "string" | "object") => return true,
            Tok::Word(w) if !Self::is_reserved(w) => n += 1,
            _ => return false,
        }
        loop {
            if self.cur.is_punct_at(n, ".") && matches!(self.cur.peek_nth(n + 1).tok, Tok::Word(_)) {
                n += 2;
            } else if self.cur.is_punct_at(n, "[") && self.cur.is_punct_at(n + 1, "]") {
                n += 2;
            } else {
                break;
            }
        }
        matches!(self.cur.peek_nth(n).tok, Tok::Word(w) if !Self::is_reserved(w))
    }

    fn local_decl(&mut self, out: &mut Vec<Stmt<'a>>) -> PResult<()> {
        let ty = if self.cur.is_word("var") && matches!(self.cur.peek_nth(1).tok, Tok::Word(_)) {
            self.cur.advance();
            None
        } else {
            Some(self.type_ref()?)
        };
        loop {
            let pos = self.cur.pos();
            let name = self.ident()?;
            let init = if self.cur.eat_punct("=") { Some(self.expr()?) } else { None };
            out.push(Stmt { kind: StmtKind::Local { name, ty, init }, pos });
            if !self.cur.eat_punct(",") {
                return Ok(());
            }
        }
    }

    /// Assignment, increment or call; no trailing `;`.
    fn simple_statement(&mut self) -> PResult<StmtKind<'a>> {
        if self.cur.is_punct("++") || self.cur.is_punct("--") {
            let delta = if self.cur.advance().tok == Tok::Punct("++") { 1 } else { -1 };
            let target = self.unary()?;
            return Ok(StmtKind::Increment { target, delta });
        }
        let target = self.expr()?;
        let op = match self.cur.tok() {
            Tok::Punct("=") => AssignOp::Set,
            Tok::Punct("+=") => AssignOp::Add,
            Tok::Punct("-=") => AssignOp::Sub,
            Tok::Punct("*=") => AssignOp::Mul,
            Tok::Punct("/=") => AssignOp::Div,
            Tok::Punct("%=") => AssignOp::Rem,
            Tok::Punct("++") => {
                self.cur.advance();
                return Ok(StmtKind::Increment { target, delta: 1 });
            }
            Tok::Punct("--") => {
                self.cur.advance();
                return Ok(StmtKind::Increment { target, delta: -1 });
            }
            _ => {
                if !matches!(target.kind, ExprKind::Call { .. } | ExprKind::New { .. }) {
                    self.sink.report(target.pos, Message::NotAStatement);
                }
                return Ok(StmtKind::Expr(target));
            }
        };
        self.cur.advance();
        let value = self.expr()?;
        Ok(StmtKind::Assign { target, op, value })
    }

    // ---------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------

    fn expr(&mut self) -> PResult<&'a Expr<'a>> {
        self.binary(0)
    }

    fn binary(&mut self, level: usize) -> PResult<&'a Expr<'a>> {
        const LEVELS: &[&[(&str, BinaryOp)]] = &[
            &[("||", BinaryOp::OrElse)],
            &[("&&", BinaryOp::AndAlso)],
            &[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)],
            &[("<", BinaryOp::Lt), (">", BinaryOp::Gt), ("<=", BinaryOp::Le), (">=", BinaryOp::Ge)],
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
        ];
        if level == LEVELS.len() {
            return self.unary();
        }
        let mut lhs = self.binary(level + 1)?;
        'outer: loop {
            for (p, op) in LEVELS[level] {
                if self.cur.is_punct(p) {
                    let pos = self.cur.advance().pos;
                    let rhs = self.binary(level + 1)?;
                    lhs = self.session.alloc(Expr::new(ExprKind::Binary { op: *op, lhs, rhs }, pos));
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn unary(&mut self) -> PResult<&'a Expr<'a>> {
        let pos = self.cur.pos();
        if self.cur.eat_punct("-") {
            if let Tok::Int(v) = self.cur.tok() {
                self.cur.advance();
                let value = (v as i64).wrapping_neg() as i32;
                return self.postfix(self.session.alloc(Expr::new(ExprKind::Int(value), pos)));
            }
            let operand = self.unary()?;
            return Ok(self.session.alloc(Expr::new(ExprKind::Unary { op: UnaryOp::Neg, operand }, pos)));
        }
        if self.cur.eat_punct("!") {
            let operand = self.unary()?;
            return Ok(self.session.alloc(Expr::new(ExprKind::Unary { op: UnaryOp::Not, operand }, pos)));
        }
        let primary = self.primary()?;
        self.postfix(primary)
    }

    fn postfix(&mut self, mut expr: &'a Expr<'a>) -> PResult<&'a Expr<'a>> {
        loop {
            let pos = self.cur.pos();
            if self.cur.eat_punct(".") {
                let name = self.ident()?;
                expr = self.session.alloc(Expr::new(ExprKind::Member { target: expr, name }, pos));
            } else if self.cur.is_punct("(") {
                let args = self.arguments()?;
                expr = self.session.alloc(Expr::new(ExprKind::Call { callee: expr, args }, expr.pos));
            } else if self.cur.eat_punct("[") {
                let index = self.expr()?;
                self.expect_punct("]")?;
                expr = self.session.alloc(Expr::new(ExprKind::Index { target: expr, index }, pos));
            } else {
                return Ok(expr);
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
            Tok::Word("true") => {
                self.cur.advance();
                ExprKind::Bool(true)
            }
            Tok::Word("false") => {
                self.cur.advance();
                ExprKind::Bool(false)
            }
            Tok::Word("null") => {
                self.cur.advance();
                ExprKind::Null
            }
            Tok::Word("this") => {
                self.cur.advance();
                ExprKind::This
            }
            Tok::Word("int" | "bool" | "string" | "object") => {
                let ty = self.type_ref()?;
                ExprKind::TypeKeyword(ty.name)
            }
            Tok::Word("new") => {
                self.cur.advance();
                let ty = self.type_ref()?;
                let args = self.arguments()?;
                ExprKind::New { ty, args }
            }
            Tok::Word(w) if !Self::is_reserved(w) => {
                self.cur.advance();
                ExprKind::Name(w)
            }
            Tok::Punct("(") => {
                self.cur.advance();
                let inner = self.expr()?;
                self.expect_punct(")")?;
                return Ok(inner);
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
        let mut sink = DiagnosticSink::new(Dialect::Brace, "snippet.0.cs");
        let unit = parse(src, session, &mut sink);
        assert!(sink.diagnostics().is_empty(), "{:?}", sink.diagnostics());
        unit.unwrap()
    }

    #[test]
    fn parses_hello_world() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let unit = parse_ok(crate::core::config::example_snippet("C#").unwrap(), &session);
        assert_eq!(unit.imports[0].namespace, "System");
        let program = &unit.types[0];
        assert_eq!(program.name, "Program");
        assert_eq!(program.access, Some(Access::Public));
        let main = &program.methods[0];
        assert_eq!(main.name, "Main");
        assert!(main.is_static);
        assert_eq!(main.params[0].ty.name, TypeName::Array(&TypeName::String));
        assert!(matches!(main.body[0].kind, StmtKind::Expr(Expr { kind: ExprKind::Call { .. }, .. })));
    }

    #[test]
    fn for_loop_is_scoped_while() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let unit = parse_ok(
            "class C { static void M() { for (int i = 0; i < 10; i++) { } } }",
            &session,
        );
        let body = unit.types[0].methods[0].body;
        let StmtKind::Block(scope) = &body[0].kind else { panic!("expected block") };
        assert!(matches!(scope[0].kind, StmtKind::Local { name: "i", .. }));
        assert!(matches!(scope[1].kind, StmtKind::While { kind: LoopKind::For, step: Some(_), .. }));
    }

    #[test]
    fn namespaces_and_nested_types() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let unit = parse_ok(
            "namespace A.B { public static class Util { private class Inner { int x = 1, y; } } }",
            &session,
        );
        let util = &unit.types[0];
        assert_eq!(util.namespace, "A.B");
        assert_eq!(util.kind, TypeKind::StaticClass);
        assert_eq!(util.nested[0].name, "Inner");
        assert_eq!(util.nested[0].fields.len(), 2);
    }

    #[test]
    fn missing_semicolon_recovers() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut sink = DiagnosticSink::new(Dialect::Brace, "snippet.0.cs");
        let src = "class P {\n  static void Main() {\n    int x = 1\n    x++;\n  }\n}\n";
        let unit = parse(src, &session, &mut sink);
        assert!(unit.is_some());
        let diags = sink.diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, "CS1002");
        assert_eq!((diags[0].line, diags[0].column), (Some(3), Some(14)));
    }

    #[test]
    fn invalid_term_aborts() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut sink = DiagnosticSink::new(Dialect::Brace, "snippet.0.cs");
        let unit = parse("class P { void M() { int x = ; } }", &session, &mut sink);
        assert!(unit.is_none());
        assert_eq!(sink.diagnostics()[0].code, "CS1525");
        assert_eq!(sink.diagnostics()[0].message, "Invalid expression term ';'");
    }
}
