use crate::condition::lexer::{Lexeme, TokenKind};
use crate::condition::{CompareOp, ConditionError, Expr};

/// Deepest expression tree the parser will build. Parsing, evaluation and
/// drop all recurse over the tree.
pub(crate) const MAX_DEPTH: usize = 64;

/// Recursive-descent parser over the lexed condition.
pub(crate) struct Parser {
    tokens: Vec<Lexeme>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Lexeme>, source_len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            end: source_len,
            depth: 0,
        }
    }

    pub fn parse(mut self) -> Result<Expr, ConditionError> {
        if self.tokens.is_empty() {
            return Err(ConditionError::new(0, "empty condition"));
        }
        let expr = self.parse_or()?;
        if let Some(lexeme) = self.tokens.get(self.pos) {
            return Err(ConditionError::new(
                lexeme.offset,
                format!("unexpected {:?} after expression", lexeme.kind),
            ));
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|l| &l.kind)
    }

    fn peek_at(&self, ahead: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + ahead).map(|l| &l.kind)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|l| l.offset).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<TokenKind> {
        let kind = self.tokens.get(self.pos).map(|l| l.kind.clone());
        if kind.is_some() {
            self.pos += 1;
        }
        kind
    }

    fn expect(&mut self, expected: TokenKind, what: &str) -> Result<(), ConditionError> {
        let offset = self.offset();
        match self.advance() {
            Some(kind) if kind == expected => Ok(()),
            Some(kind) => Err(ConditionError::new(offset, format!("expected {}, found {:?}", what, kind))),
            None => Err(ConditionError::new(offset, format!("expected {}, found end of input", what))),
        }
    }

    fn descend(&mut self) -> Result<(), ConditionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ConditionError::new(self.offset(), "condition nested too deeply"));
        }
        Ok(())
    }

    // Chains build left-deep trees, so each extra operand counts as a level.
    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let saved = self.depth;
        let mut left = self.parse_and()?;
        while self.peek() == Some(&TokenKind::Or) {
            self.advance();
            self.descend()?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth = saved;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let saved = self.depth;
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&TokenKind::And) {
            self.advance();
            self.descend()?;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth = saved;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        if self.peek() == Some(&TokenKind::Not) {
            self.advance();
            self.descend()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ConditionError> {
        let left = self.parse_operand()?;

        let op = match self.peek() {
            Some(TokenKind::Eq) => CompareOp::Eq,
            Some(TokenKind::Ne) => CompareOp::Ne,
            Some(TokenKind::Lt) => CompareOp::Lt,
            Some(TokenKind::Le) => CompareOp::Le,
            Some(TokenKind::Gt) => CompareOp::Gt,
            Some(TokenKind::Ge) => CompareOp::Ge,
            Some(TokenKind::In) => CompareOp::In,
            Some(TokenKind::Not) if self.peek_at(1) == Some(&TokenKind::In) => {
                self.advance();
                CompareOp::NotIn
            }
            _ => return Ok(left),
        };
        self.advance();

        let right = self.parse_operand()?;
        Ok(Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_operand(&mut self) -> Result<Expr, ConditionError> {
        let offset = self.offset();
        match self.advance() {
            Some(TokenKind::Literal(value)) => Ok(Expr::Literal(value)),
            Some(TokenKind::Ident(name)) => self.parse_path(name),
            Some(TokenKind::LParen) => {
                self.descend()?;
                let inner = self.parse_or()?;
                self.expect(TokenKind::RParen, "')'")?;
                self.depth -= 1;
                Ok(inner)
            }
            Some(TokenKind::LBracket) => {
                let mut items = Vec::new();
                if self.peek() == Some(&TokenKind::RBracket) {
                    self.advance();
                    return Ok(Expr::List(items));
                }
                self.descend()?;
                loop {
                    items.push(self.parse_operand()?);
                    let offset = self.offset();
                    match self.advance() {
                        Some(TokenKind::Comma) => continue,
                        Some(TokenKind::RBracket) => break,
                        _ => return Err(ConditionError::new(offset, "expected ',' or ']' in list")),
                    }
                }
                self.depth -= 1;
                Ok(Expr::List(items))
            }
            Some(kind) => Err(ConditionError::new(offset, format!("expected a value, found {:?}", kind))),
            None => Err(ConditionError::new(offset, "expected a value, found end of input")),
        }
    }

    fn parse_path(&mut self, first: String) -> Result<Expr, ConditionError> {
        let mut segments = vec![first];
        while self.peek() == Some(&TokenKind::Dot) {
            self.advance();
            let offset = self.offset();
            match self.advance() {
                Some(TokenKind::Ident(name)) => segments.push(name),
                Some(TokenKind::Literal(crate::Value::Int(index))) if index >= 0 => {
                    segments.push(index.to_string())
                }
                _ => return Err(ConditionError::new(offset, "expected a field name after '.'")),
            }
        }
        Ok(Expr::Path(segments))
    }
}
