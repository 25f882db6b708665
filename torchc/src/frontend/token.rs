use std::fmt::Display;
use std::fmt::Formatter;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Eof,

    /// `torch.aten.add.Tensor`, `f32`, `true`
    BareIdentifier,
    /// `@forward`
    AtIdentifier,
    /// `%arg0`
    PercentIdentifier,
    /// `^bb0`
    CaretIdentifier,

    /// `1.5`, `1e-3`
    FloatLiteral,
    Integer,
    /// Double-quoted with `\"`, `\\` and `\n` escapes.
    String,
    /// `i1`, `i32`, `i64`
    IntType,

    Arrow,
    Colon,
    Comma,
    Equal,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Minus,
    Exclamation,
    /// Unknown size in `[3,?]`.
    Question,
    /// Unranked tensor in `<*,f32>`.
    Star,
    Greater,
    Less,
}

impl TokenKind {
    /// The kind of a token that consists of the single character `c`.
    ///
    /// `-` is not included since it may start an arrow.
    pub fn punctuation(c: char) -> Option<TokenKind> {
        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ':' => TokenKind::Colon,
            ',' => TokenKind::Comma,
            '=' => TokenKind::Equal,
            '!' => TokenKind::Exclamation,
            '?' => TokenKind::Question,
            '*' => TokenKind::Star,
            '>' => TokenKind::Greater,
            '<' => TokenKind::Less,
            _ => return None,
        };
        Some(kind)
    }
}

/// Line and column of a token, both 0-based.
///
/// Displayed 1-based since that is what editors show.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Location {
    line: usize,
    column: usize,
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "loc({}:{})", self.line + 1, self.column + 1)
    }
}

impl Location {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
    pub fn line(&self) -> usize {
        self.line
    }
    pub fn column(&self) -> usize {
        self.column
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Source text of the token. Empty for `Eof`.
    pub lexeme: String,
    pub location: Location,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: String, location: Location) -> Self {
        Self {
            kind,
            lexeme,
            location,
        }
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} \"{}\" at {}", self.kind, self.lexeme, self.location)
    }
}
