// Recursive-descent parser with precedence climbing for operators.

use crate::compiler::ast::*;
use crate::compiler::lexer::{Lexer, Token};
use smol_str::SmolStr;

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    token: Token,
    pub line: u32,
    /// Line of the token before the current one (for end-of-statement lines).
    pub prev_line: u32,
}

pub type ParseResult<T> = Result<T, String>;

/// (left, right) binding powers; right < left makes an operator
/// right-associative.
fn binary_priority(op: BinOp) -> (u8, u8) {
    match op {
        BinOp::Or => (1, 1),
        BinOp::And => (2, 2),
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => (3, 3),
        BinOp::Concat => (9, 8),
        BinOp::Add | BinOp::Sub => (10, 10),
        BinOp::Mul | BinOp::Div | BinOp::IDiv | BinOp::Mod => (11, 11),
        BinOp::Pow => (14, 13),
    }
}

const UNARY_PRIORITY: u8 = 12;

fn token_to_binop(token: &Token) -> Option<BinOp> {
    Some(match token {
        Token::Plus => BinOp::Add,
        Token::Minus => BinOp::Sub,
        Token::Star => BinOp::Mul,
        Token::Slash => BinOp::Div,
        Token::DoubleSlash => BinOp::IDiv,
        Token::Percent => BinOp::Mod,
        Token::Caret => BinOp::Pow,
        Token::Concat => BinOp::Concat,
        Token::Eq => BinOp::Eq,
        Token::Ne => BinOp::Ne,
        Token::Lt => BinOp::Lt,
        Token::Le => BinOp::Le,
        Token::Gt => BinOp::Gt,
        Token::Ge => BinOp::Ge,
        Token::And => BinOp::And,
        Token::Or => BinOp::Or,
        _ => return None,
    })
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> ParseResult<Self> {
        let mut lexer = Lexer::new(source);
        let (token, line) = lexer.next_token()?;
        Ok(Parser {
            lexer,
            token,
            line,
            prev_line: line,
        })
    }

    fn advance(&mut self) -> ParseResult<()> {
        self.prev_line = self.line;
        let (token, line) = self.lexer.next_token()?;
        self.token = token;
        self.line = line;
        Ok(())
    }

    fn check(&self, token: &Token) -> bool {
        &self.token == token
    }

    fn accept(&mut self, token: &Token) -> ParseResult<bool> {
        if self.check(token) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, token: Token) -> ParseResult<()> {
        if self.token == token {
            self.advance()
        } else {
            Err(format!(
                "{} expected near {}",
                token.describe(),
                self.token.describe()
            ))
        }
    }

    fn expect_name(&mut self) -> ParseResult<SmolStr> {
        match self.token.clone() {
            Token::Name(n) => {
                self.advance()?;
                Ok(n)
            }
            other => Err(format!("<name> expected near {}", other.describe())),
        }
    }

    /// Parse a whole chunk.
    pub fn parse_chunk(&mut self) -> ParseResult<Block> {
        let block = self.parse_block()?;
        if !self.check(&Token::Eof) {
            return Err(format!("'<eof>' expected near {}", self.token.describe()));
        }
        Ok(block)
    }

    fn block_follow(&self) -> bool {
        matches!(
            self.token,
            Token::Eof | Token::End | Token::Else | Token::Elseif | Token::Until
        )
    }

    fn parse_block(&mut self) -> ParseResult<Block> {
        let mut stmts = Vec::new();
        loop {
            if self.block_follow() {
                break;
            }
            if self.check(&Token::Return) {
                stmts.push(self.parse_return()?);
                break;
            }
            if let Some(stmt) = self.parse_statement()? {
                stmts.push(stmt);
            }
        }
        Ok(Block { stmts })
    }

    fn parse_return(&mut self) -> ParseResult<Stmt> {
        let line = self.line;
        self.expect(Token::Return)?;
        let mut exprs = Vec::new();
        if !self.block_follow() && !self.check(&Token::Semi) {
            exprs = self.parse_expr_list()?;
        }
        let _ = self.accept(&Token::Semi)?;
        Ok(Stmt::Return { exprs, line })
    }

    fn parse_statement(&mut self) -> ParseResult<Option<Stmt>> {
        let line = self.line;
        match &self.token {
            Token::Semi => {
                self.advance()?;
                Ok(None)
            }
            Token::If => Ok(Some(self.parse_if()?)),
            Token::While => Ok(Some(self.parse_while()?)),
            Token::Do => {
                self.advance()?;
                let block = self.parse_block()?;
                self.expect(Token::End)?;
                Ok(Some(Stmt::Do(block)))
            }
            Token::For => Ok(Some(self.parse_for()?)),
            Token::Repeat => Ok(Some(self.parse_repeat()?)),
            Token::Function => Ok(Some(self.parse_function_stmt()?)),
            Token::Local => {
                self.advance()?;
                if self.accept(&Token::Function)? {
                    let name = self.expect_name()?;
                    let body = self.parse_func_body(false)?;
                    Ok(Some(Stmt::LocalFunction { name, body, line }))
                } else {
                    let mut names = vec![self.expect_name()?];
                    while self.accept(&Token::Comma)? {
                        names.push(self.expect_name()?);
                    }
                    let exprs = if self.accept(&Token::Assign)? {
                        self.parse_expr_list()?
                    } else {
                        Vec::new()
                    };
                    Ok(Some(Stmt::Local { names, exprs, line }))
                }
            }
            Token::Break => {
                self.advance()?;
                Ok(Some(Stmt::Break { line }))
            }
            _ => Ok(Some(self.parse_expr_statement()?)),
        }
    }

    fn parse_if(&mut self) -> ParseResult<Stmt> {
        let line = self.line;
        self.expect(Token::If)?;
        let mut arms = Vec::new();
        let cond = self.parse_expr()?;
        self.expect(Token::Then)?;
        let body = self.parse_block()?;
        arms.push((cond, body));
        let mut else_block = None;
        loop {
            match &self.token {
                Token::Elseif => {
                    self.advance()?;
                    let cond = self.parse_expr()?;
                    self.expect(Token::Then)?;
                    let body = self.parse_block()?;
                    arms.push((cond, body));
                }
                Token::Else => {
                    self.advance()?;
                    else_block = Some(self.parse_block()?);
                    self.expect(Token::End)?;
                    break;
                }
                Token::End => {
                    self.advance()?;
                    break;
                }
                other => {
                    return Err(format!(
                        "'end' expected near {}",
                        other.describe()
                    ));
                }
            }
        }
        Ok(Stmt::If {
            arms,
            else_block,
            line,
        })
    }

    fn parse_while(&mut self) -> ParseResult<Stmt> {
        let line = self.line;
        self.expect(Token::While)?;
        let cond = self.parse_expr()?;
        self.expect(Token::Do)?;
        let body = self.parse_block()?;
        self.expect(Token::End)?;
        Ok(Stmt::While { cond, body, line })
    }

    fn parse_repeat(&mut self) -> ParseResult<Stmt> {
        let line = self.line;
        self.expect(Token::Repeat)?;
        let body = self.parse_block()?;
        self.expect(Token::Until)?;
        let cond = self.parse_expr()?;
        Ok(Stmt::Repeat { body, cond, line })
    }

    fn parse_for(&mut self) -> ParseResult<Stmt> {
        let line = self.line;
        self.expect(Token::For)?;
        let first = self.expect_name()?;
        if self.accept(&Token::Assign)? {
            let init = self.parse_expr()?;
            self.expect(Token::Comma)?;
            let limit = self.parse_expr()?;
            let step = if self.accept(&Token::Comma)? {
                Some(self.parse_expr()?)
            } else {
                None
            };
            self.expect(Token::Do)?;
            let body = self.parse_block()?;
            self.expect(Token::End)?;
            Ok(Stmt::NumericFor {
                var: first,
                init,
                limit,
                step,
                body,
                line,
            })
        } else {
            let mut names = vec![first];
            while self.accept(&Token::Comma)? {
                names.push(self.expect_name()?);
            }
            self.expect(Token::In)?;
            let exprs = self.parse_expr_list()?;
            self.expect(Token::Do)?;
            let body = self.parse_block()?;
            self.expect(Token::End)?;
            Ok(Stmt::GenericFor {
                names,
                exprs,
                body,
                line,
            })
        }
    }

    fn parse_function_stmt(&mut self) -> ParseResult<Stmt> {
        let line = self.line;
        self.expect(Token::Function)?;
        let base = self.expect_name()?;
        let mut path = Vec::new();
        let mut method = None;
        loop {
            if self.accept(&Token::Dot)? {
                path.push(self.expect_name()?);
            } else if self.accept(&Token::Colon)? {
                method = Some(self.expect_name()?);
                break;
            } else {
                break;
            }
        }
        let body = self.parse_func_body(method.is_some())?;
        Ok(Stmt::Function {
            name: FuncName { base, path, method },
            body,
            line,
        })
    }

    fn parse_func_body(&mut self, is_method: bool) -> ParseResult<FuncBody> {
        let line = self.line;
        self.expect(Token::LParen)?;
        let mut params = Vec::new();
        if is_method {
            params.push(SmolStr::new("self"));
        }
        let mut is_vararg = false;
        if !self.check(&Token::RParen) {
            loop {
                match &self.token {
                    Token::Ellipsis => {
                        is_vararg = true;
                        self.advance()?;
                        break;
                    }
                    Token::Name(_) => {
                        params.push(self.expect_name()?);
                    }
                    other => {
                        return Err(format!("<name> expected near {}", other.describe()));
                    }
                }
                if !self.accept(&Token::Comma)? {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;
        let block = self.parse_block()?;
        let end_line = self.line;
        self.expect(Token::End)?;
        Ok(FuncBody {
            params,
            is_vararg,
            block,
            line,
            end_line,
        })
    }

    /// A statement starting with an expression: either a call or an
    /// assignment target list.
    fn parse_expr_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.line;
        let first = self.parse_suffixed_expr()?;
        if self.check(&Token::Assign) || self.check(&Token::Comma) {
            let mut targets = vec![first];
            while self.accept(&Token::Comma)? {
                targets.push(self.parse_suffixed_expr()?);
            }
            for t in &targets {
                if !matches!(t, Expr::Name(..) | Expr::Index(..)) {
                    return Err("syntax error near '='".to_string());
                }
            }
            self.expect(Token::Assign)?;
            let exprs = self.parse_expr_list()?;
            Ok(Stmt::Assign {
                targets,
                exprs,
                line,
            })
        } else {
            if !matches!(first, Expr::Call { .. } | Expr::MethodCall { .. }) {
                return Err("syntax error: unexpected expression statement".to_string());
            }
            Ok(Stmt::Expr(first))
        }
    }

    fn parse_expr_list(&mut self) -> ParseResult<Vec<Expr>> {
        let mut exprs = vec![self.parse_expr()?];
        while self.accept(&Token::Comma)? {
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    pub fn parse_expr(&mut self) -> ParseResult<Expr> {
        self.parse_binary_expr(0)
    }

    fn parse_binary_expr(&mut self, limit: u8) -> ParseResult<Expr> {
        let line = self.line;
        let mut lhs = match &self.token {
            Token::Not => {
                self.advance()?;
                let operand = self.parse_binary_expr(UNARY_PRIORITY)?;
                Expr::Unary {
                    op: UnOp::Not,
                    operand: Box::new(operand),
                    line,
                }
            }
            Token::Minus => {
                self.advance()?;
                let operand = self.parse_binary_expr(UNARY_PRIORITY)?;
                Expr::Unary {
                    op: UnOp::Neg,
                    operand: Box::new(operand),
                    line,
                }
            }
            Token::Hash => {
                self.advance()?;
                let operand = self.parse_binary_expr(UNARY_PRIORITY)?;
                Expr::Unary {
                    op: UnOp::Len,
                    operand: Box::new(operand),
                    line,
                }
            }
            _ => self.parse_simple_expr()?,
        };
        while let Some(op) = token_to_binop(&self.token) {
            let (left, right) = binary_priority(op);
            if left <= limit {
                break;
            }
            let op_line = self.line;
            self.advance()?;
            let rhs = self.parse_binary_expr(right)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                line: op_line,
            };
        }
        Ok(lhs)
    }

    fn parse_simple_expr(&mut self) -> ParseResult<Expr> {
        let line = self.line;
        match self.token.clone() {
            Token::Nil => {
                self.advance()?;
                Ok(Expr::Nil(line))
            }
            Token::True => {
                self.advance()?;
                Ok(Expr::True(line))
            }
            Token::False => {
                self.advance()?;
                Ok(Expr::False(line))
            }
            Token::Number(n) => {
                self.advance()?;
                Ok(Expr::Number(n, line))
            }
            Token::Str(s) => {
                self.advance()?;
                Ok(Expr::Str(s, line))
            }
            Token::Ellipsis => {
                self.advance()?;
                Ok(Expr::Vararg(line))
            }
            Token::Function => {
                self.advance()?;
                Ok(Expr::Function(self.parse_func_body(false)?))
            }
            Token::LBrace => self.parse_table(),
            _ => self.parse_suffixed_expr(),
        }
    }

    fn parse_primary_expr(&mut self) -> ParseResult<Expr> {
        let line = self.line;
        match self.token.clone() {
            Token::Name(n) => {
                self.advance()?;
                Ok(Expr::Name(n, line))
            }
            Token::LParen => {
                self.advance()?;
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            other => Err(format!("unexpected symbol near {}", other.describe())),
        }
    }

    fn parse_suffixed_expr(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary_expr()?;
        loop {
            let line = self.line;
            match self.token.clone() {
                Token::Dot => {
                    self.advance()?;
                    let name = self.expect_name()?;
                    expr = Expr::Index(
                        Box::new(expr),
                        Box::new(Expr::Str(name.to_string(), line)),
                        line,
                    );
                }
                Token::LBracket => {
                    self.advance()?;
                    let key = self.parse_expr()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(key), line);
                }
                Token::Colon => {
                    self.advance()?;
                    let name = self.expect_name()?;
                    let args = self.parse_call_args()?;
                    expr = Expr::MethodCall {
                        obj: Box::new(expr),
                        name,
                        args,
                        line,
                    };
                }
                Token::LParen | Token::Str(_) | Token::LBrace => {
                    let args = self.parse_call_args()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        line,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> ParseResult<Vec<Expr>> {
        let line = self.line;
        match self.token.clone() {
            Token::LParen => {
                self.advance()?;
                let args = if self.check(&Token::RParen) {
                    Vec::new()
                } else {
                    self.parse_expr_list()?
                };
                self.expect(Token::RParen)?;
                Ok(args)
            }
            Token::Str(s) => {
                self.advance()?;
                Ok(vec![Expr::Str(s, line)])
            }
            Token::LBrace => Ok(vec![self.parse_table()?]),
            other => Err(format!(
                "function arguments expected near {}",
                other.describe()
            )),
        }
    }

    fn parse_table(&mut self) -> ParseResult<Expr> {
        let line = self.line;
        self.expect(Token::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(&Token::RBrace) {
            match self.token.clone() {
                Token::LBracket => {
                    self.advance()?;
                    let key = self.parse_expr()?;
                    self.expect(Token::RBracket)?;
                    self.expect(Token::Assign)?;
                    let value = self.parse_expr()?;
                    fields.push(TableField::Keyed(key, value));
                }
                Token::Name(n) => {
                    // `name =` is a record field; otherwise the name
                    // starts a positional expression
                    let name_line = self.line;
                    self.advance()?;
                    if self.accept(&Token::Assign)? {
                        let value = self.parse_expr()?;
                        fields.push(TableField::Named(n, value));
                    } else {
                        // Re-build the suffixed/binary expression that
                        // started with this name
                        let base = Expr::Name(n, name_line);
                        let expr = self.continue_expr_from(base)?;
                        fields.push(TableField::Item(expr));
                    }
                }
                _ => {
                    let expr = self.parse_expr()?;
                    fields.push(TableField::Item(expr));
                }
            }
            if !self.accept(&Token::Comma)? && !self.accept(&Token::Semi)? {
                break;
            }
        }
        self.expect(Token::RBrace)?;
        Ok(Expr::Table { fields, line })
    }

    /// Continue parsing suffixes and binary operators for an expression
    /// whose first Name token was already consumed.
    fn continue_expr_from(&mut self, base: Expr) -> ParseResult<Expr> {
        let mut expr = base;
        loop {
            let line = self.line;
            match self.token.clone() {
                Token::Dot => {
                    self.advance()?;
                    let name = self.expect_name()?;
                    expr = Expr::Index(
                        Box::new(expr),
                        Box::new(Expr::Str(name.to_string(), line)),
                        line,
                    );
                }
                Token::LBracket => {
                    self.advance()?;
                    let key = self.parse_expr()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(key), line);
                }
                Token::Colon => {
                    self.advance()?;
                    let name = self.expect_name()?;
                    let args = self.parse_call_args()?;
                    expr = Expr::MethodCall {
                        obj: Box::new(expr),
                        name,
                        args,
                        line,
                    };
                }
                Token::LParen | Token::Str(_) | Token::LBrace => {
                    let args = self.parse_call_args()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        line,
                    };
                }
                _ => break,
            }
        }
        // Binary operator tail
        while let Some(op) = token_to_binop(&self.token) {
            let (_, right) = binary_priority(op);
            let op_line = self.line;
            self.advance()?;
            let rhs = self.parse_binary_expr(right)?;
            expr = Expr::Binary {
                op,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
                line: op_line,
            };
        }
        Ok(expr)
    }
}
