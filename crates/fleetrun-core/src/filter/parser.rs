use regex::Regex;

use super::lexer::{Token, TokenKind};
use super::FilterError;

/// Attributes of an [`crate::Instance`] visible to filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Field {
    Name,
    PrivateAddress,
    PublicAddress,
    Provider,
    Labels,
}

impl Field {
    fn resolve(identifier: &str) -> Option<Self> {
        match identifier {
            "Name" | "name" => Some(Field::Name),
            "PrivateAddress" | "private_address" => Some(Field::PrivateAddress),
            "PublicAddress" | "public_address" => Some(Field::PublicAddress),
            "Provider" | "provider" => Some(Field::Provider),
            "Labels" | "labels" => Some(Field::Labels),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    NotEq,
    In,
    NotIn,
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone)]
pub(crate) enum Pattern {
    Compiled(Regex),
    Dynamic(Box<Expr>),
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Str(String),
    Bool(bool),
    List(Vec<String>),
    Field(Field),
    Label(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Matches {
        subject: Box<Expr>,
        pattern: Pattern,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Type {
    Bool,
    Str,
    Map,
    List,
}

impl Type {
    fn name(self) -> &'static str {
        match self {
            Type::Bool => "bool",
            Type::Str => "string",
            Type::Map => "map",
            Type::List => "list",
        }
    }
}

/// Deepest expression tree the parser will build. Evaluation and type
/// checking recurse over the tree.
pub(crate) const MAX_DEPTH: usize = 256;

pub(crate) struct Parser {
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
}

impl Parser {
    pub(crate) fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
            depth: 0,
        }
    }

    pub(crate) fn parse(mut self) -> Result<Expr, FilterError> {
        let expr = self.parse_or()?;
        let token = self.peek();
        if token.kind != TokenKind::Eof {
            return Err(unexpected(token));
        }
        Ok(expr)
    }

    fn peek(&self) -> &Token {
        // tokenize() always terminates the stream with Eof
        &self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    fn peek_kind_at(&self, lookahead: usize) -> Option<&TokenKind> {
        self.tokens
            .get(self.position + lookahead)
            .map(|token| &token.kind)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
        token
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, FilterError> {
        let token = self.advance();
        if token.kind == kind {
            Ok(token)
        } else {
            Err(FilterError::Syntax {
                offset: token.offset,
                message: format!("expected {}, found {}", kind.describe(), token.kind.describe()),
            })
        }
    }

    /// Counts one more level of nesting at `offset`.
    fn enter(&mut self, offset: usize) -> Result<(), FilterError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(FilterError::Syntax {
                offset,
                message: format!("expression nests deeper than {MAX_DEPTH} levels"),
            });
        }
        Ok(())
    }

    // Chains build left-deep trees, so each link counts as a level.
    fn parse_or(&mut self) -> Result<Expr, FilterError> {
        let depth = self.depth;
        let mut lhs = self.parse_and()?;
        while self.peek().kind == TokenKind::Or {
            let token = self.advance();
            self.enter(token.offset)?;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, FilterError> {
        let depth = self.depth;
        let mut lhs = self.parse_unary()?;
        while self.peek().kind == TokenKind::And {
            let token = self.advance();
            self.enter(token.offset)?;
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, FilterError> {
        if self.peek().kind == TokenKind::Not {
            let token = self.advance();
            self.enter(token.offset)?;
            let operand = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(operand)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, FilterError> {
        let lhs = self.parse_primary()?;

        let next = self.peek().kind.clone();
        let op = match next {
            TokenKind::Eq => CompareOp::Eq,
            TokenKind::NotEq => CompareOp::NotEq,
            TokenKind::In => CompareOp::In,
            TokenKind::Contains => CompareOp::Contains,
            TokenKind::StartsWith => CompareOp::StartsWith,
            TokenKind::EndsWith => CompareOp::EndsWith,
            TokenKind::Not if self.peek_kind_at(1) == Some(&TokenKind::In) => {
                self.advance();
                CompareOp::NotIn
            }
            TokenKind::Matches => {
                self.advance();
                return self.parse_matches(lhs);
            }
            _ => return Ok(lhs),
        };
        self.advance();

        let rhs = self.parse_primary()?;
        Ok(Expr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_matches(&mut self, subject: Expr) -> Result<Expr, FilterError> {
        let pattern = match self.parse_primary()? {
            Expr::Str(source) => {
                let regex = Regex::new(&source).map_err(|e| FilterError::InvalidPattern {
                    pattern: source.clone(),
                    message: e.to_string(),
                })?;
                Pattern::Compiled(regex)
            }
            other => Pattern::Dynamic(Box::new(other)),
        };

        Ok(Expr::Matches {
            subject: Box::new(subject),
            pattern,
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, FilterError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Str(value) => Ok(Expr::Str(value)),
            TokenKind::True => Ok(Expr::Bool(true)),
            TokenKind::False => Ok(Expr::Bool(false)),
            TokenKind::LParen => {
                self.enter(token.offset)?;
                let inner = self.parse_or()?;
                self.expect(TokenKind::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            TokenKind::LBracket => self.parse_list(),
            TokenKind::Ident(identifier) => {
                let field = Field::resolve(&identifier)
                    .ok_or(FilterError::UnknownIdentifier(identifier))?;
                if field == Field::Labels {
                    self.parse_label_access()
                } else {
                    Ok(Expr::Field(field))
                }
            }
            _ => Err(unexpected(&token)),
        }
    }

    fn parse_label_access(&mut self) -> Result<Expr, FilterError> {
        let next = self.peek().kind.clone();
        match next {
            TokenKind::LBracket => {
                self.advance();
                let token = self.advance();
                let key = match token.kind {
                    TokenKind::Str(key) => key,
                    _ => {
                        return Err(FilterError::Syntax {
                            offset: token.offset,
                            message: "label key must be a string literal".to_string(),
                        })
                    }
                };
                self.expect(TokenKind::RBracket)?;
                Ok(Expr::Label(key))
            }
            TokenKind::Dot => {
                self.advance();
                let token = self.advance();
                match token.kind {
                    TokenKind::Ident(key) => Ok(Expr::Label(key)),
                    _ => Err(FilterError::Syntax {
                        offset: token.offset,
                        message: "expected label name after '.'".to_string(),
                    }),
                }
            }
            _ => Ok(Expr::Field(Field::Labels)),
        }
    }

    fn parse_list(&mut self) -> Result<Expr, FilterError> {
        let mut items = Vec::new();
        if self.peek().kind == TokenKind::RBracket {
            self.advance();
            return Ok(Expr::List(items));
        }

        loop {
            let token = self.advance();
            match token.kind {
                TokenKind::Str(item) => items.push(item),
                _ => {
                    return Err(FilterError::Syntax {
                        offset: token.offset,
                        message: "list items must be string literals".to_string(),
                    })
                }
            }

            let separator = self.advance();
            match separator.kind {
                TokenKind::Comma => continue,
                TokenKind::RBracket => break,
                _ => return Err(unexpected(&separator)),
            }
        }

        Ok(Expr::List(items))
    }
}

fn unexpected(token: &Token) -> FilterError {
    FilterError::Syntax {
        offset: token.offset,
        message: format!("unexpected {}", token.kind.describe()),
    }
}

/// Static type of `expr`; rejects ill-typed expressions before any evaluation.
pub(crate) fn type_of(expr: &Expr) -> Result<Type, FilterError> {
    match expr {
        Expr::Str(_) | Expr::Label(_) => Ok(Type::Str),
        Expr::Bool(_) => Ok(Type::Bool),
        Expr::List(_) => Ok(Type::List),
        Expr::Field(Field::Labels) => Ok(Type::Map),
        Expr::Field(_) => Ok(Type::Str),
        Expr::Not(operand) => {
            require(operand, Type::Bool, "operand of '!'")?;
            Ok(Type::Bool)
        }
        Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
            require(lhs, Type::Bool, "operand of a logical operator")?;
            require(rhs, Type::Bool, "operand of a logical operator")?;
            Ok(Type::Bool)
        }
        Expr::Compare { op, lhs, rhs } => {
            let lhs_type = type_of(lhs)?;
            let rhs_type = type_of(rhs)?;
            match op {
                CompareOp::Eq | CompareOp::NotEq => {
                    if lhs_type != rhs_type || matches!(lhs_type, Type::Map | Type::List) {
                        return Err(FilterError::Type(format!(
                            "cannot compare {} with {}",
                            lhs_type.name(),
                            rhs_type.name()
                        )));
                    }
                }
                CompareOp::In | CompareOp::NotIn => {
                    if lhs_type != Type::Str || !matches!(rhs_type, Type::List | Type::Map) {
                        return Err(FilterError::Type(format!(
                            "'in' expects a string and a list or Labels, found {} and {}",
                            lhs_type.name(),
                            rhs_type.name()
                        )));
                    }
                }
                CompareOp::Contains | CompareOp::StartsWith | CompareOp::EndsWith => {
                    if lhs_type != Type::Str || rhs_type != Type::Str {
                        return Err(FilterError::Type(format!(
                            "string operator expects two strings, found {} and {}",
                            lhs_type.name(),
                            rhs_type.name()
                        )));
                    }
                }
            }
            Ok(Type::Bool)
        }
        Expr::Matches { subject, pattern } => {
            require(subject, Type::Str, "subject of 'matches'")?;
            if let Pattern::Dynamic(pattern) = pattern {
                require(pattern, Type::Str, "pattern of 'matches'")?;
            }
            Ok(Type::Bool)
        }
    }
}

fn require(expr: &Expr, expected: Type, context: &str) -> Result<(), FilterError> {
    let actual = type_of(expr)?;
    if actual != expected {
        return Err(FilterError::Type(format!(
            "{context} must be {}, found {}",
            expected.name(),
            actual.name()
        )));
    }
    Ok(())
}
