use crate::ast::expr::Expr;
use crate::ast::Block;
use crate::location::SourceLocation;

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// A bare expression, evaluated for its side effects and (when it
    /// produces a string) its output. This is how `print`, `exec` and
    /// ordinary function calls reach the content processor's output buffer.
    Expr(Expr),
    Assignment {
        name: String,
        op: AssignOp,
        value: Expr,
        location: SourceLocation,
    },
    FunctionDef {
        name: String,
        params: Vec<String>,
        body: Block,
        location: SourceLocation,
    },
    ClassDef {
        name: String,
        parent: Option<String>,
        methods: Vec<Stmt>,
        location: SourceLocation,
    },
    Return {
        value: Option<Expr>,
        location: SourceLocation,
    },
    If {
        condition: Expr,
        then_block: Block,
        else_branch: ElseBranch,
        location: SourceLocation,
    },
    For {
        vars: LoopVars,
        iterable: Expr,
        body: Block,
        location: SourceLocation,
    },
    While {
        condition: Expr,
        body: Block,
        location: SourceLocation,
    },
    Break(SourceLocation),
    Continue(SourceLocation),
    Import {
        path: String,
        location: SourceLocation,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    AddAssign,
}

/// The tail of an `if`. `ElseIf` lets `elif` chains reuse the same
/// [`Stmt::If`] node recursively, since an else-block may itself be
/// another conditional.
#[derive(Debug, Clone, PartialEq)]
pub enum ElseBranch {
    None,
    Block(Block),
    ElseIf(Box<Stmt>),
}

/// `for name in expr` binds a single loop variable; `for i, x in expr`
/// additionally binds the zero-based index.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopVars {
    Single(String),
    Indexed { index: String, value: String },
}
