use crate::condition::ConditionError;
use crate::Value;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Ident(String),
    Literal(Value),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    In,
}

#[derive(Debug, Clone)]
pub(crate) struct Lexeme {
    pub kind: TokenKind,
    pub offset: usize,
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Lexeme>, ConditionError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let (kind, width) = match (c, next) {
            ('(', _) => (TokenKind::LParen, 1),
            (')', _) => (TokenKind::RParen, 1),
            ('[', _) => (TokenKind::LBracket, 1),
            (']', _) => (TokenKind::RBracket, 1),
            (',', _) => (TokenKind::Comma, 1),
            ('.', _) => (TokenKind::Dot, 1),
            ('=', Some('=')) => (TokenKind::Eq, 2),
            ('!', Some('=')) => (TokenKind::Ne, 2),
            ('!', _) => (TokenKind::Not, 1),
            ('<', Some('=')) => (TokenKind::Le, 2),
            ('<', _) => (TokenKind::Lt, 1),
            ('>', Some('=')) => (TokenKind::Ge, 2),
            ('>', _) => (TokenKind::Gt, 1),
            ('&', Some('&')) => (TokenKind::And, 2),
            ('|', Some('|')) => (TokenKind::Or, 2),
            ('\'', _) | ('"', _) => {
                let (text, consumed) = read_string(&chars, i, c)?;
                tokens.push(Lexeme {
                    kind: TokenKind::Literal(Value::String(text)),
                    offset,
                });
                i += consumed;
                continue;
            }
            (c, _) if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                // after '.' a number is a path segment, never a fraction
                let in_path = matches!(tokens.last(), Some(Lexeme { kind: TokenKind::Dot, .. }));
                let (value, consumed) = read_number(&chars, i, !in_path)?;
                tokens.push(Lexeme {
                    kind: TokenKind::Literal(value),
                    offset,
                });
                i += consumed;
                continue;
            }
            (c, _) if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i].1) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                tokens.push(Lexeme {
                    kind: keyword(word),
                    offset,
                });
                continue;
            }
            (c, _) => {
                return Err(ConditionError::new(offset, format!("unexpected character '{}'", c)));
            }
        };

        tokens.push(Lexeme { kind, offset });
        i += width;
    }

    Ok(tokens)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn keyword(word: String) -> TokenKind {
    match word.as_str() {
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "in" => TokenKind::In,
        "true" => TokenKind::Literal(Value::Bool(true)),
        "false" => TokenKind::Literal(Value::Bool(false)),
        "null" => TokenKind::Literal(Value::Null),
        _ => TokenKind::Ident(word),
    }
}

fn read_string(chars: &[(usize, char)], start: usize, quote: char) -> Result<(String, usize), ConditionError> {
    let mut text = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i].1 {
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .map(|(_, c)| *c)
                    .ok_or_else(|| ConditionError::new(chars[i].0, "dangling escape"))?;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                i += 2;
            }
            c if c == quote => return Ok((text, i - start + 1)),
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    Err(ConditionError::new(chars[start].0, "unterminated string literal"))
}

fn read_number(
    chars: &[(usize, char)],
    start: usize,
    allow_fraction: bool,
) -> Result<(Value, usize), ConditionError> {
    let mut i = start;
    if chars[i].1 == '-' {
        i += 1;
    }
    while i < chars.len() && chars[i].1.is_ascii_digit() {
        i += 1;
    }
    let mut is_float = false;
    if allow_fraction && i + 1 < chars.len() && chars[i].1 == '.' && chars[i + 1].1.is_ascii_digit() {
        is_float = true;
        i += 1;
        while i < chars.len() && chars[i].1.is_ascii_digit() {
            i += 1;
        }
    }

    let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
    let offset = chars[start].0;
    let value = if is_float {
        text.parse::<f64>()
            .map(Value::Float)
            .map_err(|e| ConditionError::new(offset, format!("invalid number '{}': {}", text, e)))?
    } else {
        text.parse::<i64>()
            .map(Value::Int)
            .map_err(|e| ConditionError::new(offset, format!("invalid number '{}': {}", text, e)))?
    };
    Ok((value, i - start))
}
