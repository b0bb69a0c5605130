//! Syntax tree shared by both source languages.
//!
//! Every node lives in the [`CompilationSession`](crate::core::CompilationSession)
//! arena; children are arena references and slices. The Basic parser lowers
//! its `For … To` and `Do` forms onto the same loop statements the brace
//! parser produces, so the code generator sees one shape per construct.

/// One-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

impl Pos {
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Private,
    Internal,
    Protected,
}

#[derive(Debug)]
pub struct CompilationUnit<'a> {
    /// `using` / `Imports` namespaces.
    pub imports: &'a [Import<'a>],
    pub types: &'a [TypeDecl<'a>],
}

#[derive(Debug)]
pub struct Import<'a> {
    pub namespace: &'a str,
    pub pos: Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Class,
    /// C# `static class`.
    StaticClass,
    /// Basic `Module`: sealed, every member shared.
    Module,
}

#[derive(Debug)]
pub struct TypeDecl<'a> {
    /// Dotted namespace, empty for the global namespace and nested types.
    pub namespace: &'a str,
    pub name: &'a str,
    pub kind: TypeKind,
    pub access: Option<Access>,
    pub fields: &'a [FieldDecl<'a>],
    pub methods: &'a [MethodDecl<'a>],
    pub nested: &'a [TypeDecl<'a>],
    pub pos: Pos,
}

/// Type as written in source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeName<'a> {
    Void,
    Int,
    Bool,
    String,
    Object,
    /// Dotted name of a class.
    Named(&'a str),
    Array(&'a TypeName<'a>),
}

#[derive(Debug, Clone, Copy)]
pub struct TypeRef<'a> {
    pub name: TypeName<'a>,
    pub pos: Pos,
}

#[derive(Debug)]
pub struct FieldDecl<'a> {
    pub name: &'a str,
    pub ty: TypeRef<'a>,
    pub access: Option<Access>,
    pub is_static: bool,
    pub init: Option<&'a Expr<'a>>,
    pub pos: Pos,
}

#[derive(Debug)]
pub struct Param<'a> {
    pub name: &'a str,
    pub ty: TypeRef<'a>,
    pub pos: Pos,
}

#[derive(Debug)]
pub struct MethodDecl<'a> {
    pub name: &'a str,
    /// `TypeName::Void` for procedures.
    pub ret: TypeRef<'a>,
    pub params: &'a [Param<'a>],
    pub access: Option<Access>,
    pub is_static: bool,
    pub body: &'a [Stmt<'a>],
    pub pos: Pos,
    /// Position of the closing `}` or `End Sub`/`End Function`.
    pub end_pos: Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    /// Basic `&=`.
    Concat,
}

/// Loop kind named by Basic `Exit`/`Continue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    For,
    While,
    Do,
}

#[derive(Debug)]
pub struct CatchClause<'a> {
    /// Caught type; `None` catches every exception.
    pub ty: Option<TypeRef<'a>>,
    pub var: Option<&'a str>,
    pub body: &'a [Stmt<'a>],
    pub pos: Pos,
}

#[derive(Debug)]
pub enum StmtKind<'a> {
    /// `ty == None` asks for the type of the initializer.
    Local {
        name: &'a str,
        ty: Option<TypeRef<'a>>,
        init: Option<&'a Expr<'a>>,
    },
    Assign {
        target: &'a Expr<'a>,
        op: AssignOp,
        value: &'a Expr<'a>,
    },
    /// `x++` / `x--`.
    Increment {
        target: &'a Expr<'a>,
        delta: i32,
    },
    Expr(&'a Expr<'a>),
    If {
        cond: &'a Expr<'a>,
        then: &'a [Stmt<'a>],
        otherwise: Option<&'a [Stmt<'a>]>,
    },
    /// Top-tested loop; `step` runs before the next test and is the
    /// `continue` target.
    While {
        cond: Option<&'a Expr<'a>>,
        body: &'a [Stmt<'a>],
        step: Option<&'a Stmt<'a>>,
        kind: LoopKind,
    },
    /// Bottom-tested loop; `until` negates the test.
    DoWhile {
        body: &'a [Stmt<'a>],
        cond: &'a Expr<'a>,
        until: bool,
    },
    Break(Option<LoopKind>),
    Continue(Option<LoopKind>),
    Return(Option<&'a Expr<'a>>),
    Throw(Option<&'a Expr<'a>>),
    Try {
        body: &'a [Stmt<'a>],
        catch: Option<CatchClause<'a>>,
        finally: Option<&'a [Stmt<'a>]>,
    },
    Block(&'a [Stmt<'a>]),
}

#[derive(Debug)]
pub struct Stmt<'a> {
    pub kind: StmtKind<'a>,
    pub pos: Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    /// Basic `\`.
    IntDiv,
    Rem,
    /// Basic `&`.
    Concat,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    AndAlso,
    OrElse,
    /// Basic non-short-circuit `And`.
    And,
    /// Basic non-short-circuit `Or`.
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }
}

#[derive(Debug)]
pub enum ExprKind<'a> {
    Int(i32),
    Str(&'a str),
    Bool(bool),
    Null,
    /// `this` / `Me`.
    This,
    Name(&'a str),
    /// Predefined type keyword used as a qualifier (`int.Parse`).
    TypeKeyword(TypeName<'a>),
    Member {
        target: &'a Expr<'a>,
        name: &'a str,
    },
    /// Call, or element access for Basic `args(0)`.
    Call {
        callee: &'a Expr<'a>,
        args: &'a [&'a Expr<'a>],
    },
    New {
        ty: TypeRef<'a>,
        args: &'a [&'a Expr<'a>],
    },
    Index {
        target: &'a Expr<'a>,
        index: &'a Expr<'a>,
    },
    Unary {
        op: UnaryOp,
        operand: &'a Expr<'a>,
    },
    Binary {
        op: BinaryOp,
        lhs: &'a Expr<'a>,
        rhs: &'a Expr<'a>,
    },
}

#[derive(Debug)]
pub struct Expr<'a> {
    pub kind: ExprKind<'a>,
    pub pos: Pos,
}

impl<'a> Expr<'a> {
    pub fn new(kind: ExprKind<'a>, pos: Pos) -> Self {
        Self { kind, pos }
    }

    /// Dotted name if this expression is a plain `a.b.c` chain.
    pub fn dotted_name(&self) -> Option<String> {
        match &self.kind {
            ExprKind::Name(name) => Some((*name).to_string()),
            ExprKind::Member { target, name } => {
                target.dotted_name().map(|prefix| format!("{}.{}", prefix, name))
            }
            _ => None,
        }
    }
}

/// Whether control can leave the end of a statement list normally.
pub fn completes_normally(stmts: &[Stmt<'_>]) -> bool {
    stmts.iter().all(stmt_completes)
}

fn stmt_completes(stmt: &Stmt<'_>) -> bool {
    match &stmt.kind {
        StmtKind::Return(_) | StmtKind::Throw(_) => false,
        StmtKind::Block(body) => completes_normally(body),
        StmtKind::If { then, otherwise, .. } => match otherwise {
            Some(otherwise) => completes_normally(then) || completes_normally(otherwise),
            None => true,
        },
        StmtKind::While { cond, body, .. } => {
            let infinite = match cond {
                None => true,
                Some(expr) => matches!(expr.kind, ExprKind::Bool(true)),
            };
            !infinite || contains_break(body)
        }
        StmtKind::DoWhile { body, .. } => completes_normally(body) || contains_break(body),
        StmtKind::Try { body, catch, finally } => {
            let finally_ok = finally.map_or(true, completes_normally);
            let body_ok = completes_normally(body) || catch.as_ref().map_or(false, |c| completes_normally(c.body));
            finally_ok && body_ok
        }
        _ => true,
    }
}

/// A `break` that leaves the loop owning `body`.
fn contains_break(body: &[Stmt<'_>]) -> bool {
    body.iter().any(|stmt| match &stmt.kind {
        StmtKind::Break(_) => true,
        StmtKind::Block(inner) => contains_break(inner),
        StmtKind::If { then, otherwise, .. } => {
            contains_break(then) || otherwise.map_or(false, contains_break)
        }
        StmtKind::Try { body, catch, finally } => {
            contains_break(body)
                || catch.as_ref().map_or(false, |c| contains_break(c.body))
                || finally.map_or(false, contains_break)
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(kind: StmtKind<'_>) -> Stmt<'_> {
        Stmt { kind, pos: Pos::new(1, 1) }
    }

    #[test]
    fn return_ends_flow() {
        let value = Expr::new(ExprKind::Int(1), Pos::new(1, 1));
        let body = [stmt(StmtKind::Return(Some(&value)))];
        assert!(!completes_normally(&body));
    }

    #[test]
    fn infinite_loop_without_break() {
        let t = Expr::new(ExprKind::Bool(true), Pos::new(1, 1));
        let empty: [Stmt<'_>; 0] = [];
        let looping = [stmt(StmtKind::While { cond: Some(&t), body: &empty, step: None, kind: LoopKind::While })];
        assert!(!completes_normally(&looping));

        let brk = [stmt(StmtKind::Break(None))];
        let leaving = [stmt(StmtKind::While { cond: Some(&t), body: &brk, step: None, kind: LoopKind::While })];
        assert!(completes_normally(&leaving));
    }

    #[test]
    fn dotted_names() {
        let system = Expr::new(ExprKind::Name("System"), Pos::new(1, 1));
        let console = Expr::new(ExprKind::Member { target: &system, name: "Console" }, Pos::new(1, 1));
        assert_eq!(console.dotted_name().as_deref(), Some("System.Console"));
    }
}
