//! Miniature expression evaluator for guest source strings.
//!
//! The dispatcher's eval operation hands the guest a source string; this
//! module tokenizes it with `logos`, parses a small expression grammar, and
//! evaluates it against the runtime. The grammar covers literals, global
//! names, attribute access, calls, indexing, list displays, arithmetic,
//! comparison, and `name = expr` assignment. Statements are separated by
//! semicolons; the value of the last one is the result.

use logos::Logos;
use smol_str::SmolStr;

use crate::runtime::{ArithOp, CompareOp};
use crate::{GuestError, GuestResult, GuestRuntime, GuestValue};

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"#[^\n]*")]
enum Token {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(";")]
    Semi,

    #[token("=")]
    Assign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,

    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LessEq,
    #[token(">=")]
    GreaterEq,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,

    // `None`, `True`, and `False` lex as identifiers and are recognized
    // by the parser, keeping keyword and name tokenization unambiguous.
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| SmolStr::new(lex.slice()))]
    Ident(SmolStr),

    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r"'[^'\n]*'", |lex| strip_quotes(lex.slice()))]
    #[regex(r#""[^"\n]*""#, |lex| strip_quotes(lex.slice()))]
    Str(SmolStr),
}

fn strip_quotes(slice: &str) -> SmolStr {
    SmolStr::new(&slice[1..slice.len() - 1])
}

#[derive(Debug, Clone, PartialEq)]
enum BinOp {
    Arith(ArithOp),
    Cmp(CompareOp),
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(GuestValue),
    Name(SmolStr),
    Attr(Box<Expr>, SmolStr),
    Call(Box<Expr>, Vec<Expr>),
    Index(Box<Expr>, Box<Expr>),
    List(Vec<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Assign(SmolStr, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn tokenize(source: &str) -> GuestResult<Vec<Token>> {
        let mut tokens = Vec::new();
        for (result, span) in Token::lexer(source).spanned() {
            match result {
                Ok(token) => tokens.push(token),
                Err(()) => {
                    return Err(GuestError::SyntaxError {
                        message: format!(
                            "unexpected character '{}'",
                            &source[span.start..span.end]
                        ),
                    })
                }
            }
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, context: &str) -> GuestResult<()> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(GuestError::SyntaxError {
                message: format!("expected {:?} {}", expected, context),
            })
        }
    }

    /// Semicolon-separated statement list.
    fn program(&mut self) -> GuestResult<Vec<Expr>> {
        let mut stmts = Vec::new();
        while self.peek().is_some() {
            stmts.push(self.statement()?);
            if !self.eat(&Token::Semi) {
                break;
            }
        }
        if let Some(extra) = self.peek() {
            return Err(GuestError::SyntaxError {
                message: format!("unexpected token {:?}", extra),
            });
        }
        Ok(stmts)
    }

    fn statement(&mut self) -> GuestResult<Expr> {
        // `name = expr`; `==` at the same spot is a comparison instead.
        if let (Some(Token::Ident(name)), Some(Token::Assign)) =
            (self.tokens.get(self.pos), self.tokens.get(self.pos + 1))
        {
            let name = name.clone();
            self.pos += 2;
            let value = self.expression()?;
            return Ok(Expr::Assign(name, Box::new(value)));
        }
        self.expression()
    }

    fn expression(&mut self) -> GuestResult<Expr> {
        self.comparison()
    }

    fn comparison(&mut self) -> GuestResult<Expr> {
        let mut lhs = self.additive()?;
        while let Some(op) = self.peek().and_then(compare_op) {
            self.pos += 1;
            let rhs = self.additive()?;
            lhs = Expr::Binary(BinOp::Cmp(op), Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> GuestResult<Expr> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(BinOp::Arith(op), Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> GuestResult<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => ArithOp::Mul,
                Some(Token::Slash) => ArithOp::Div,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(BinOp::Arith(op), Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> GuestResult<Expr> {
        if self.eat(&Token::Minus) {
            let operand = self.unary()?;
            return Ok(Expr::Neg(Box::new(operand)));
        }
        self.postfix()
    }

    /// Attribute access, calls, and indexing bind tightest.
    fn postfix(&mut self) -> GuestResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let name = match self.advance() {
                    Some(Token::Ident(name)) => name,
                    other => {
                        return Err(GuestError::SyntaxError {
                            message: format!("expected attribute name, found {:?}", other),
                        })
                    }
                };
                expr = Expr::Attr(Box::new(expr), name);
            } else if self.eat(&Token::LParen) {
                let mut args = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    loop {
                        args.push(self.expression()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                }
                self.expect(Token::RParen, "to close call arguments")?;
                expr = Expr::Call(Box::new(expr), args);
            } else if self.eat(&Token::LBracket) {
                let index = self.expression()?;
                self.expect(Token::RBracket, "to close index")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> GuestResult<Expr> {
        match self.advance() {
            Some(Token::Int(n)) => Ok(Expr::Literal(GuestValue::Int(n))),
            Some(Token::Float(f)) => Ok(Expr::Literal(GuestValue::Float(f))),
            Some(Token::Str(s)) => Ok(Expr::Literal(GuestValue::Str(s))),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "None" => Expr::Literal(GuestValue::None),
                "True" => Expr::Literal(GuestValue::Bool(true)),
                "False" => Expr::Literal(GuestValue::Bool(false)),
                _ => Expr::Name(name),
            }),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(Token::RParen, "to close group")?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() != Some(&Token::RBracket) {
                    loop {
                        items.push(self.expression()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                }
                self.expect(Token::RBracket, "to close list")?;
                Ok(Expr::List(items))
            }
            other => Err(GuestError::SyntaxError {
                message: format!("unexpected token {:?}", other),
            }),
        }
    }
}

fn compare_op(token: &Token) -> Option<CompareOp> {
    match token {
        Token::EqEq => Some(CompareOp::Eq),
        Token::NotEq => Some(CompareOp::Ne),
        Token::Less => Some(CompareOp::Lt),
        Token::Greater => Some(CompareOp::Gt),
        Token::LessEq => Some(CompareOp::Le),
        Token::GreaterEq => Some(CompareOp::Ge),
        _ => None,
    }
}

impl GuestRuntime {
    /// Evaluate a guest source string against the global namespace.
    ///
    /// Assignment binds in the global namespace and yields `None`; every
    /// other statement yields its value. With several semicolon-separated
    /// statements the last one's value is returned.
    pub fn eval(&mut self, source: &str) -> GuestResult<GuestValue> {
        let tokens = Parser::tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let program = parser.program()?;

        let mut result = GuestValue::None;
        for stmt in program {
            result = self.eval_expr(&stmt)?;
        }
        Ok(result)
    }

    fn eval_expr(&mut self, expr: &Expr) -> GuestResult<GuestValue> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Name(name) => self
                .lookup_global(name)
                .ok_or_else(|| GuestError::NameNotFound { name: name.clone() }),
            Expr::Attr(object, name) => {
                let object = self.eval_expr(object)?;
                self.getattr(&object, name)
            }
            Expr::Call(callee, arg_exprs) => {
                let callee = self.eval_expr(callee)?;
                let mut args = Vec::with_capacity(arg_exprs.len());
                for arg in arg_exprs {
                    args.push(self.eval_expr(arg)?);
                }
                self.call(&callee, args)
            }
            Expr::Index(container, index) => {
                let container = self.eval_expr(container)?;
                let index = self.eval_expr(index)?;
                self.get_item(&container, &index)
            }
            Expr::List(item_exprs) => {
                let mut items = Vec::with_capacity(item_exprs.len());
                for item in item_exprs {
                    items.push(self.eval_expr(item)?);
                }
                Ok(GuestValue::List(crate::GuestList::from_vec(items)))
            }
            Expr::Neg(operand) => match self.eval_expr(operand)? {
                GuestValue::Int(n) => Ok(GuestValue::Int(-n)),
                GuestValue::Float(f) => Ok(GuestValue::Float(-f)),
                other => Err(GuestError::TypeError {
                    message: format!("bad operand type for unary -: '{}'", other.type_name()),
                }),
            },
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval_expr(lhs)?;
                let rhs = self.eval_expr(rhs)?;
                match op {
                    BinOp::Arith(op) => self.arith(*op, &lhs, &rhs),
                    BinOp::Cmp(op) => self.compare(*op, &lhs, &rhs),
                }
            }
            Expr::Assign(name, value) => {
                let value = self.eval_expr(value)?;
                self.bind_global(name.clone(), value);
                Ok(GuestValue::None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_literals() {
        let mut rt = GuestRuntime::new();
        assert_eq!(rt.eval("42").unwrap(), GuestValue::Int(42));
        assert_eq!(rt.eval("2.5").unwrap(), GuestValue::Float(2.5));
        assert_eq!(rt.eval("'hi'").unwrap(), GuestValue::Str("hi".into()));
        assert_eq!(rt.eval("\"hi\"").unwrap(), GuestValue::Str("hi".into()));
        assert_eq!(rt.eval("None").unwrap(), GuestValue::None);
        assert_eq!(rt.eval("True").unwrap(), GuestValue::Bool(true));
        assert_eq!(rt.eval("-3").unwrap(), GuestValue::Int(-3));
    }

    #[test]
    fn test_arithmetic_precedence() {
        let mut rt = GuestRuntime::new();
        assert_eq!(rt.eval("1 + 2 * 3").unwrap(), GuestValue::Int(7));
        assert_eq!(rt.eval("(1 + 2) * 3").unwrap(), GuestValue::Int(9));
        assert_eq!(rt.eval("7 / 2").unwrap(), GuestValue::Float(3.5));
    }

    #[test]
    fn test_comparison() {
        let mut rt = GuestRuntime::new();
        assert_eq!(rt.eval("1 + 1 == 2").unwrap(), GuestValue::Bool(true));
        assert_eq!(rt.eval("'a' < 'b'").unwrap(), GuestValue::Bool(true));
        assert_eq!(rt.eval("3 != 3").unwrap(), GuestValue::Bool(false));
    }

    #[test]
    fn test_assignment_binds_global() {
        let mut rt = GuestRuntime::new();
        assert_eq!(rt.eval("x = 10").unwrap(), GuestValue::None);
        assert_eq!(rt.eval("x + 1").unwrap(), GuestValue::Int(11));
        assert_eq!(rt.lookup_global("x"), Some(GuestValue::Int(10)));
    }

    #[test]
    fn test_statement_sequence_yields_last() {
        let mut rt = GuestRuntime::new();
        assert_eq!(rt.eval("a = 2; b = 3; a * b").unwrap(), GuestValue::Int(6));
    }

    #[test]
    fn test_list_display_and_index() {
        let mut rt = GuestRuntime::new();
        assert_eq!(rt.eval("[1, 2, 3][1]").unwrap(), GuestValue::Int(2));
        assert_eq!(rt.eval("len([1, 2, 3])").unwrap(), GuestValue::Int(3));
        assert_eq!(rt.eval("[10, 20][-1]").unwrap(), GuestValue::Int(20));
    }

    #[test]
    fn test_builtin_calls() {
        let mut rt = GuestRuntime::new();
        assert_eq!(rt.eval("abs(-5)").unwrap(), GuestValue::Int(5));
        assert_eq!(rt.eval("str(2.5)").unwrap(), GuestValue::Str("2.5".into()));
        assert_eq!(rt.eval("len('hello')").unwrap(), GuestValue::Int(5));
    }

    #[test]
    fn test_module_attribute_through_global() {
        let mut rt = GuestRuntime::new();
        let handle = rt.import("math").unwrap();
        let module = rt.value_of(handle).unwrap().clone();
        rt.bind_global("math", module);

        assert_eq!(
            rt.eval("math.sqrt(16.0)").unwrap(),
            GuestValue::Float(4.0)
        );
        rt.release(handle).unwrap();
    }

    #[test]
    fn test_name_not_found() {
        let mut rt = GuestRuntime::new();
        assert!(matches!(
            rt.eval("missing"),
            Err(GuestError::NameNotFound { .. })
        ));
    }

    #[test]
    fn test_syntax_errors() {
        let mut rt = GuestRuntime::new();
        assert!(matches!(
            rt.eval("1 +"),
            Err(GuestError::SyntaxError { .. })
        ));
        assert!(matches!(
            rt.eval("(1"),
            Err(GuestError::SyntaxError { .. })
        ));
        assert!(matches!(
            rt.eval("$"),
            Err(GuestError::SyntaxError { .. })
        ));
    }

    #[test]
    fn test_comments_are_skipped() {
        let mut rt = GuestRuntime::new();
        assert_eq!(rt.eval("1 + 1 # two").unwrap(), GuestValue::Int(2));
    }
}
