use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::FilterError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    /// A field name, `true`/`false` or a layer name.
    Word(String),
    Number(u64),
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    LParen,
    RParen,
    And,
    Or,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token in the filter text.
    pub position: usize,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Word(word) => format!("'{word}'"),
            TokenKind::Number(number) => format!("'{number}'"),
            TokenKind::Ipv4(addr) => format!("'{addr}'"),
            TokenKind::Ipv6(addr) => format!("'{addr}'"),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::And => "'and'".to_string(),
            TokenKind::Or => "'or'".to_string(),
            TokenKind::Not => "'not'".to_string(),
            TokenKind::Eq => "'=='".to_string(),
            TokenKind::Ne => "'!='".to_string(),
            TokenKind::Lt => "'<'".to_string(),
            TokenKind::Le => "'<='".to_string(),
            TokenKind::Gt => "'>'".to_string(),
            TokenKind::Ge => "'>='".to_string(),
            TokenKind::End => "end of filter".to_string(),
        }
    }
}

fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'.' | b':')
}

/// Splits filter text into tokens. The last token is always
/// [`TokenKind::End`].
pub(crate) fn tokenize(text: &str) -> Result<Vec<Token>, FilterError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let start = pos;
        let next = bytes.get(pos + 1).copied();
        let (kind, len) = match bytes[pos] {
            byte if byte.is_ascii_whitespace() => {
                pos += 1;
                continue;
            }
            b'(' => (TokenKind::LParen, 1),
            b')' => (TokenKind::RParen, 1),
            b'&' if next == Some(b'&') => (TokenKind::And, 2),
            b'|' if next == Some(b'|') => (TokenKind::Or, 2),
            b'=' if next == Some(b'=') => (TokenKind::Eq, 2),
            b'=' => (TokenKind::Eq, 1),
            b'!' if next == Some(b'=') => (TokenKind::Ne, 2),
            b'!' => (TokenKind::Not, 1),
            b'<' if next == Some(b'=') => (TokenKind::Le, 2),
            b'<' => (TokenKind::Lt, 1),
            b'>' if next == Some(b'=') => (TokenKind::Ge, 2),
            b'>' => (TokenKind::Gt, 1),
            byte if is_word_byte(byte) => {
                let len = bytes[pos..].iter().take_while(|&&b| is_word_byte(b)).count();
                (classify(&text[pos..pos + len], start)?, len)
            }
            _ => {
                let ch = text[pos..].chars().next().unwrap_or('?');
                return Err(FilterError::new(format!("unexpected character '{ch}'"), start));
            }
        };
        tokens.push(Token { kind, position: start });
        pos += len;
    }

    tokens.push(Token {
        kind: TokenKind::End,
        position: bytes.len(),
    });
    Ok(tokens)
}

fn classify(word: &str, position: usize) -> Result<TokenKind, FilterError> {
    if word.contains(':') {
        return word
            .parse::<Ipv6Addr>()
            .map(TokenKind::Ipv6)
            .map_err(|_| FilterError::new(format!("invalid IPv6 address '{word}'"), position));
    }

    if word.as_bytes()[0].is_ascii_digit() {
        if word.contains('.') {
            return word
                .parse::<Ipv4Addr>()
                .map(TokenKind::Ipv4)
                .map_err(|_| FilterError::new(format!("invalid IPv4 address '{word}'"), position));
        }
        let parsed = match word.strip_prefix("0x").or_else(|| word.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => word.parse::<u64>(),
        };
        return parsed
            .map(TokenKind::Number)
            .map_err(|_| FilterError::new(format!("invalid number '{word}'"), position));
    }

    let kind = if word.eq_ignore_ascii_case("and") {
        TokenKind::And
    } else if word.eq_ignore_ascii_case("or") {
        TokenKind::Or
    } else if word.eq_ignore_ascii_case("not") {
        TokenKind::Not
    } else {
        TokenKind::Word(word.to_string())
    };
    Ok(kind)
}
