//! The stored representation of verb code: an abstract syntax tree. The
//! MOO-source parser that produces these lives outside the kernel; programs
//! arrive through the loader, and tests construct them directly.

use std::sync::Arc;

use bincode::{Decode, Encode};

use loam_values::var::{Symbol, Var};

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum Arg {
    Normal(Expr),
    /// `@expr`: flatten a list argument in place.
    Splice(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum ScatterKind {
    Required,
    Optional,
    Rest,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct ScatterItem {
    pub kind: ScatterKind,
    pub id: Symbol,
    pub expr: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Exp,
    Eq,
    NEq,
    Gt,
    GtE,
    Lt,
    LtE,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum CatchCodes {
    Codes(Vec<Arg>),
    Any,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum Expr {
    Value(Var),
    Id(Symbol),
    Assign {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Prop {
        location: Box<Expr>,
        property: Box<Expr>,
    },
    Verb {
        location: Box<Expr>,
        verb: Box<Expr>,
        args: Vec<Arg>,
    },
    Call {
        function: Symbol,
        args: Vec<Arg>,
    },
    Index(Box<Expr>, Box<Expr>),
    Range {
        base: Box<Expr>,
        from: Box<Expr>,
        to: Box<Expr>,
    },
    Cond {
        condition: Box<Expr>,
        consequence: Box<Expr>,
        alternative: Box<Expr>,
    },
    Catch {
        trye: Box<Expr>,
        codes: CatchCodes,
        except: Option<Box<Expr>>,
    },
    List(Vec<Arg>),
    Scatter(Vec<ScatterItem>, Box<Expr>),
    /// `$` inside an index expression: the length of the enclosing indexable.
    Length,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct CondArm {
    pub condition: Expr,
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct ExceptArm {
    pub id: Option<Symbol>,
    pub codes: CatchCodes,
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct Stmt {
    pub node: StmtNode,
    pub line: u32,
}

impl Stmt {
    pub fn new(node: StmtNode, line: u32) -> Self {
        Self { node, line }
    }
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum StmtNode {
    Cond {
        arms: Vec<CondArm>,
        otherwise: Vec<Stmt>,
    },
    ForList {
        id: Symbol,
        expr: Expr,
        body: Vec<Stmt>,
    },
    ForRange {
        id: Symbol,
        from: Expr,
        to: Expr,
        body: Vec<Stmt>,
    },
    While {
        id: Option<Symbol>,
        condition: Expr,
        body: Vec<Stmt>,
    },
    Fork {
        id: Option<Symbol>,
        delay: Expr,
        body: Vec<Stmt>,
    },
    TryExcept {
        body: Vec<Stmt>,
        excepts: Vec<ExceptArm>,
    },
    TryFinally {
        body: Vec<Stmt>,
        handler: Vec<Stmt>,
    },
    Break {
        exit: Option<Symbol>,
    },
    Continue {
        exit: Option<Symbol>,
    },
    Return {
        expr: Option<Expr>,
    },
    Expr(Expr),
}

/// A compiled verb body: the statement sequence, shared cheaply between the
/// store and every task executing it.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct Program {
    pub stmts: Arc<Vec<Stmt>>,
}

impl Program {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self {
            stmts: Arc::new(stmts),
        }
    }

    pub fn empty() -> Self {
        Self::new(vec![])
    }
}

/// Shorthand constructors for building programs in code. The MOO parser is
/// external to the kernel; these are what the loader and the test suites use.
pub mod build {
    use super::*;
    use loam_values::var::v_int;

    pub fn stmts(nodes: Vec<StmtNode>) -> Vec<Stmt> {
        nodes
            .into_iter()
            .enumerate()
            .map(|(i, node)| Stmt::new(node, i as u32 + 1))
            .collect()
    }

    pub fn prog(nodes: Vec<StmtNode>) -> Program {
        Program::new(stmts(nodes))
    }

    pub fn expr_stmt(e: Expr) -> StmtNode {
        StmtNode::Expr(e)
    }

    pub fn ret(e: Expr) -> StmtNode {
        StmtNode::Return { expr: Some(e) }
    }

    pub fn value(v: impl Into<Var>) -> Expr {
        Expr::Value(v.into())
    }

    pub fn int(i: i64) -> Expr {
        Expr::Value(v_int(i))
    }

    pub fn id(name: &str) -> Expr {
        Expr::Id(Symbol::mk(name))
    }

    pub fn assign(left: Expr, right: Expr) -> Expr {
        Expr::Assign {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn binary(op: BinaryOp, l: Expr, r: Expr) -> Expr {
        Expr::Binary(op, Box::new(l), Box::new(r))
    }

    pub fn index(base: Expr, idx: Expr) -> Expr {
        Expr::Index(Box::new(base), Box::new(idx))
    }

    pub fn range(base: Expr, from: Expr, to: Expr) -> Expr {
        Expr::Range {
            base: Box::new(base),
            from: Box::new(from),
            to: Box::new(to),
        }
    }

    pub fn prop(location: Expr, name: &str) -> Expr {
        Expr::Prop {
            location: Box::new(location),
            property: Box::new(Expr::Value(loam_values::var::v_str(name))),
        }
    }

    pub fn verb_call(location: Expr, name: &str, args: Vec<Arg>) -> Expr {
        Expr::Verb {
            location: Box::new(location),
            verb: Box::new(Expr::Value(loam_values::var::v_str(name))),
            args,
        }
    }

    pub fn call(function: &str, args: Vec<Arg>) -> Expr {
        Expr::Call {
            function: Symbol::mk(function),
            args,
        }
    }

    pub fn list(args: Vec<Arg>) -> Expr {
        Expr::List(args)
    }

    pub fn normal(e: Expr) -> Arg {
        Arg::Normal(e)
    }

    pub fn splice(e: Expr) -> Arg {
        Arg::Splice(e)
    }

    pub fn scatter_required(name: &str) -> ScatterItem {
        ScatterItem {
            kind: ScatterKind::Required,
            id: Symbol::mk(name),
            expr: None,
        }
    }

    pub fn scatter_optional(name: &str, default: Option<Expr>) -> ScatterItem {
        ScatterItem {
            kind: ScatterKind::Optional,
            id: Symbol::mk(name),
            expr: default,
        }
    }

    pub fn scatter_rest(name: &str) -> ScatterItem {
        ScatterItem {
            kind: ScatterKind::Rest,
            id: Symbol::mk(name),
            expr: None,
        }
    }
}
