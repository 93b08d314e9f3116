use super::FilterError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Ident(String),
    Str(String),
    True,
    False,
    And,
    Or,
    Not,
    Eq,
    NotEq,
    In,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Eof,
}

impl TokenKind {
    pub(crate) fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("identifier '{name}'"),
            TokenKind::Str(value) => format!("string \"{value}\""),
            TokenKind::True => "'true'".to_string(),
            TokenKind::False => "'false'".to_string(),
            TokenKind::And => "'&&'".to_string(),
            TokenKind::Or => "'||'".to_string(),
            TokenKind::Not => "'!'".to_string(),
            TokenKind::Eq => "'=='".to_string(),
            TokenKind::NotEq => "'!='".to_string(),
            TokenKind::In => "'in'".to_string(),
            TokenKind::Contains => "'contains'".to_string(),
            TokenKind::StartsWith => "'startsWith'".to_string(),
            TokenKind::EndsWith => "'endsWith'".to_string(),
            TokenKind::Matches => "'matches'".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::LBracket => "'['".to_string(),
            TokenKind::RBracket => "']'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::Dot => "'.'".to_string(),
            TokenKind::Eof => "end of expression".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, FilterError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some((offset, ch)) = chars.next() {
        let kind = match ch {
            c if c.is_whitespace() => continue,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '&' => match chars.next() {
                Some((_, '&')) => TokenKind::And,
                _ => return Err(syntax(offset, "expected '&&'")),
            },
            '|' => match chars.next() {
                Some((_, '|')) => TokenKind::Or,
                _ => return Err(syntax(offset, "expected '||'")),
            },
            '=' => match chars.next() {
                Some((_, '=')) => TokenKind::Eq,
                _ => return Err(syntax(offset, "expected '=='")),
            },
            '!' => {
                if let Some((_, '=')) = chars.peek() {
                    chars.next();
                    TokenKind::NotEq
                } else {
                    TokenKind::Not
                }
            }
            '"' | '\'' => {
                let mut value = String::new();
                let mut closed = false;
                while let Some((escape_offset, c)) = chars.next() {
                    match c {
                        c if c == ch => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some((_, 'n')) => value.push('\n'),
                            Some((_, 't')) => value.push('\t'),
                            Some((_, '\\')) => value.push('\\'),
                            Some((_, '"')) => value.push('"'),
                            Some((_, '\'')) => value.push('\''),
                            Some((_, other)) => {
                                return Err(syntax(
                                    escape_offset,
                                    &format!("unknown escape sequence '\\{other}'"),
                                ))
                            }
                            None => break,
                        },
                        other => value.push(other),
                    }
                }
                if !closed {
                    return Err(syntax(offset, "unterminated string literal"));
                }
                TokenKind::Str(value)
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::from(c);
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                keyword(word)
            }
            other => return Err(syntax(offset, &format!("unexpected character '{other}'"))),
        };

        tokens.push(Token { kind, offset });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        offset: source.len(),
    });
    Ok(tokens)
}

fn keyword(word: String) -> TokenKind {
    match word.as_str() {
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "in" => TokenKind::In,
        "contains" => TokenKind::Contains,
        "startsWith" => TokenKind::StartsWith,
        "endsWith" => TokenKind::EndsWith,
        "matches" => TokenKind::Matches,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        _ => TokenKind::Ident(word),
    }
}

fn syntax(offset: usize, message: &str) -> FilterError {
    FilterError::Syntax {
        offset,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn test_tokenize_operators_and_keywords() {
        assert_eq!(
            kinds("Name == 'a' && !(x != \"b\") or y in [ ]"),
            vec![
                TokenKind::Ident("Name".to_string()),
                TokenKind::Eq,
                TokenKind::Str("a".to_string()),
                TokenKind::And,
                TokenKind::Not,
                TokenKind::LParen,
                TokenKind::Ident("x".to_string()),
                TokenKind::NotEq,
                TokenKind::Str("b".to_string()),
                TokenKind::RParen,
                TokenKind::Or,
                TokenKind::Ident("y".to_string()),
                TokenKind::In,
                TokenKind::LBracket,
                TokenKind::RBracket,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_string_escapes() {
        assert_eq!(
            kinds(r#""web-\"1\"\\""#),
            vec![TokenKind::Str("web-\"1\"\\".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_tokenize_reports_offsets() {
        let err = tokenize("Name = 'x'").unwrap_err();
        assert_eq!(
            err,
            FilterError::Syntax {
                offset: 5,
                message: "expected '=='".to_string()
            }
        );
    }

    #[test]
    fn test_tokenize_unterminated_string() {
        assert!(matches!(
            tokenize("Name == 'web"),
            Err(FilterError::Syntax { offset: 8, .. })
        ));
    }
}
