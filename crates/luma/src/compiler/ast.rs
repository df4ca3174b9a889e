// Syntax tree produced by the parser and consumed by codegen.

use smol_str::SmolStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    Len,
}

#[derive(Debug)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug)]
pub struct FuncBody {
    pub params: Vec<SmolStr>,
    pub is_vararg: bool,
    pub block: Block,
    pub line: u32,
    pub end_line: u32,
}

/// `function a.b.c:m() ... end` target path.
#[derive(Debug)]
pub struct FuncName {
    pub base: SmolStr,
    pub path: Vec<SmolStr>,
    pub method: Option<SmolStr>,
}

#[derive(Debug)]
pub enum Stmt {
    /// Call used as a statement.
    Expr(Expr),
    Local {
        names: Vec<SmolStr>,
        exprs: Vec<Expr>,
        line: u32,
    },
    Assign {
        targets: Vec<Expr>,
        exprs: Vec<Expr>,
        line: u32,
    },
    If {
        arms: Vec<(Expr, Block)>,
        else_block: Option<Block>,
        line: u32,
    },
    While {
        cond: Expr,
        body: Block,
        line: u32,
    },
    Repeat {
        body: Block,
        cond: Expr,
        line: u32,
    },
    NumericFor {
        var: SmolStr,
        init: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Block,
        line: u32,
    },
    GenericFor {
        names: Vec<SmolStr>,
        exprs: Vec<Expr>,
        body: Block,
        line: u32,
    },
    Do(Block),
    Return {
        exprs: Vec<Expr>,
        line: u32,
    },
    Break {
        line: u32,
    },
    Function {
        name: FuncName,
        body: FuncBody,
        line: u32,
    },
    LocalFunction {
        name: SmolStr,
        body: FuncBody,
        line: u32,
    },
}

#[derive(Debug)]
pub enum Expr {
    Nil(u32),
    True(u32),
    False(u32),
    Number(f64, u32),
    Str(String, u32),
    Vararg(u32),
    Function(FuncBody),
    Name(SmolStr, u32),
    Index(Box<Expr>, Box<Expr>, u32),
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        line: u32,
    },
    MethodCall {
        obj: Box<Expr>,
        name: SmolStr,
        args: Vec<Expr>,
        line: u32,
    },
    Table {
        fields: Vec<TableField>,
        line: u32,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        line: u32,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
        line: u32,
    },
    /// Parenthesized expression: truncates multi-values to one.
    Paren(Box<Expr>),
}

#[derive(Debug)]
pub enum TableField {
    /// Positional item.
    Item(Expr),
    /// `name = value`
    Named(SmolStr, Expr),
    /// `[key] = value`
    Keyed(Expr, Expr),
}

impl Expr {
    pub fn line(&self) -> u32 {
        match self {
            Expr::Nil(l)
            | Expr::True(l)
            | Expr::False(l)
            | Expr::Number(_, l)
            | Expr::Str(_, l)
            | Expr::Vararg(l)
            | Expr::Name(_, l)
            | Expr::Index(_, _, l)
            | Expr::Call { line: l, .. }
            | Expr::MethodCall { line: l, .. }
            | Expr::Table { line: l, .. }
            | Expr::Binary { line: l, .. }
            | Expr::Unary { line: l, .. } => *l,
            Expr::Function(body) => body.line,
            Expr::Paren(inner) => inner.line(),
        }
    }

    /// Does this expression produce a variable number of values?
    pub fn is_multivalue(&self) -> bool {
        matches!(
            self,
            Expr::Call { .. } | Expr::MethodCall { .. } | Expr::Vararg(_)
        )
    }
}
