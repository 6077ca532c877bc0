//! Linearized intermediate code
//!
//! This is the input to instruction selection: one straight-line statement
//! list per function, with explicit labels and jumps at every join, plus the
//! frame descriptor computed by frame layout.

use std::fmt;

use super::asm::Temp;

/// A code or data label
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub String);

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Label(name.into())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stack frame descriptor for one function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Function label
    pub label: Label,
    /// Static nesting depth (0 for top-level functions)
    pub depth: u32,
    /// Size of local variables in bytes
    pub locals_size: i64,
    /// Size of the outgoing call area in bytes
    pub args_size: i64,
    /// Total frame size in bytes
    pub size: i64,
    /// Temporary standing for the frame pointer
    pub fp: Temp,
    /// Temporary holding the return value
    pub rv: Temp,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOpKind {
    Neg,
    Not,
}

/// IR expressions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Const(i64),
    /// Address of a named static location
    Name(Label),
    Temp(Temp),
    Mem(Box<Expr>),
    UnOp {
        op: UnOpKind,
        expr: Box<Expr>,
    },
    BinOp {
        op: BinOpKind,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        label: Label,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn mem(addr: Expr) -> Self {
        Expr::Mem(Box::new(addr))
    }

    pub fn unop(op: UnOpKind, expr: Expr) -> Self {
        Expr::UnOp {
            op,
            expr: Box::new(expr),
        }
    }

    pub fn binop(op: BinOpKind, lhs: Expr, rhs: Expr) -> Self {
        Expr::BinOp {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn call(label: Label, args: Vec<Expr>) -> Self {
        Expr::Call { label, args }
    }

    fn max_temp(&self) -> Option<Temp> {
        match self {
            Expr::Const(_) | Expr::Name(_) => None,
            Expr::Temp(t) => Some(*t),
            Expr::Mem(addr) => addr.max_temp(),
            Expr::UnOp { expr, .. } => expr.max_temp(),
            Expr::BinOp { lhs, rhs, .. } => lhs.max_temp().max(rhs.max_temp()),
            Expr::Call { args, .. } => args.iter().filter_map(Expr::max_temp).max(),
        }
    }
}

/// IR statements
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    /// `dst` is either `Expr::Temp` or `Expr::Mem`
    Move { dst: Expr, src: Expr },
    CJump { cond: Expr, pos: Label, neg: Label },
    Jump(Label),
    Label(Label),
    Expr(Expr),
}

impl Stmt {
    pub fn mov(dst: Expr, src: Expr) -> Self {
        Stmt::Move { dst, src }
    }

    fn max_temp(&self) -> Option<Temp> {
        match self {
            Stmt::Move { dst, src } => dst.max_temp().max(src.max_temp()),
            Stmt::CJump { cond, .. } => cond.max_temp(),
            Stmt::Jump(_) | Stmt::Label(_) => None,
            Stmt::Expr(expr) => expr.max_temp(),
        }
    }
}

/// One linearized function body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeChunk {
    pub frame: Frame,
    pub entry: Label,
    pub exit: Label,
    pub stmts: Vec<Stmt>,
}

impl CodeChunk {
    /// Highest temporary mentioned anywhere in the chunk, frame included.
    pub fn max_temp(&self) -> Temp {
        self.stmts
            .iter()
            .filter_map(Stmt::max_temp)
            .chain([self.frame.fp, self.frame.rv])
            .max()
            .unwrap_or(self.frame.fp)
    }
}
