use crate::frontend::token::Location;
use crate::frontend::token::Token;
use crate::frontend::token::TokenKind;
use anyhow::Result;

pub struct Scanner {
    source: Vec<char>,
    tokens: Vec<Token>,
    start: usize,
    current: usize,
    line: usize,
    column: usize,
}

impl Scanner {
    fn new(source: &str) -> Self {
        Scanner {
            source: source.chars().collect(),
            tokens: Vec::new(),
            start: 0,
            current: 0,
            line: 0,
            column: 0,
        }
    }
    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }
    fn advance(&mut self) -> char {
        let c = self.peek();
        self.current += 1;
        self.column += 1;
        c
    }
    fn peek(&self) -> char {
        self.peek_n(0)
    }
    fn peek_next(&self) -> char {
        self.peek_n(1)
    }
    fn peek_n(&self, n: usize) -> char {
        match self.source.get(self.current + n) {
            Some(c) => *c,
            None => '\0',
        }
    }
    fn peek_word(&self, already_matched: char) -> String {
        let mut word = already_matched.to_string();
        let mut i = 0;
        while Scanner::is_identifier(self.peek_n(i)) {
            word.push(self.peek_n(i));
            i += 1;
        }
        word
    }
    fn lexeme(&self) -> String {
        self.source[self.start..self.current].iter().collect()
    }
    fn location(&self) -> Location {
        let width = self.current - self.start;
        let column = self.column.saturating_sub(width);
        Location::new(self.line, column)
    }
    fn add_token(&mut self, kind: TokenKind) {
        let lexeme = if kind == TokenKind::Eof {
            "".to_string()
        } else {
            self.lexeme()
        };
        let location = self.location();
        self.tokens.push(Token::new(kind, lexeme, location));
    }
    fn fail(&self, msg: &str) -> anyhow::Error {
        let src = self.source.iter().collect::<String>();
        anyhow::anyhow!(Scanner::error(&src, &self.location(), msg))
    }
    fn digits(&mut self) {
        while self.peek().is_ascii_digit() {
            self.advance();
        }
    }
    fn number(&mut self) -> Result<()> {
        self.digits();
        let mut is_float = false;
        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            is_float = true;
            self.advance();
            self.digits();
        }
        let exponent = match (self.peek(), self.peek_next()) {
            ('e' | 'E', d) if d.is_ascii_digit() => true,
            ('e' | 'E', '+' | '-') => self.peek_n(2).is_ascii_digit(),
            _ => false,
        };
        if exponent {
            is_float = true;
            self.advance();
            if self.peek() == '+' || self.peek() == '-' {
                self.advance();
            }
            self.digits();
        }
        if is_float {
            self.add_token(TokenKind::FloatLiteral);
        } else {
            self.add_token(TokenKind::Integer)
        }
        Ok(())
    }
    // Whether the character is a valid identifier start character.
    fn is_identifier_start(c: char) -> bool {
        c.is_alphabetic() || c == '_' || c == '@' || c == '%' || c == '^'
    }
    // Whether the character is a valid identifier character.
    fn is_identifier(c: char) -> bool {
        c.is_alphanumeric() || c == '_' || c == '.' || c == '$'
    }
    // Scan identifiers and keywords.
    fn identifier(&mut self) -> Result<()> {
        while Scanner::is_identifier(self.peek()) {
            self.advance();
        }
        let lexeme = self.lexeme();
        if lexeme.len() == 1 && lexeme != "_" && !lexeme.chars().all(char::is_alphabetic) {
            return Err(self.fail("Expected identifier"));
        }
        let kind = match lexeme.chars().next() {
            Some('@') => TokenKind::AtIdentifier,
            Some('%') => TokenKind::PercentIdentifier,
            Some('^') => TokenKind::CaretIdentifier,
            _ => TokenKind::BareIdentifier,
        };
        self.add_token(kind);
        Ok(())
    }
    fn arrow_or_minus(&mut self) -> Result<()> {
        if self.peek() == '>' {
            self.advance();
            self.add_token(TokenKind::Arrow);
        } else {
            self.add_token(TokenKind::Minus);
        }
        Ok(())
    }
    fn is_int_type(word: &str) -> bool {
        let types = ["i1", "i4", "i8", "i16", "i32", "i64", "i128"];
        types.contains(&word)
    }
    fn int_type(&mut self, c: char) -> Result<()> {
        let word = self.peek_word(c);
        for _ in 0..(word.chars().count() - 1) {
            self.advance();
        }
        self.add_token(TokenKind::IntType);
        Ok(())
    }
    fn is_int_type_start(&self, c: char) -> bool {
        c == 'i' && Scanner::is_int_type(&self.peek_word(c))
    }
    fn string(&mut self) -> Result<()> {
        while self.peek() != '"' && !self.is_at_end() {
            if self.peek() == '\\' {
                self.advance();
            }
            if self.peek() == '\n' {
                return Err(self.fail("Unterminated string"));
            }
            self.advance();
        }
        if self.is_at_end() {
            return Err(self.fail("Unterminated string"));
        }
        self.advance();
        self.add_token(TokenKind::String);
        Ok(())
    }
    fn comment(&mut self) {
        while self.peek() != '\n' && !self.is_at_end() {
            self.advance();
        }
    }
    fn scan_token(&mut self) -> Result<()> {
        let c = self.advance();
        if let Some(kind) = TokenKind::punctuation(c) {
            self.add_token(kind);
            return Ok(());
        }
        match c {
            ' ' | '\r' | '\t' => (),
            '\n' => {
                self.line += 1;
                self.column = 0;
            }
            '/' if self.peek() == '/' => self.comment(),
            '-' => self.arrow_or_minus()?,
            '"' => self.string()?,
            s if self.is_int_type_start(s) => self.int_type(s)?,
            s if s.is_ascii_digit() => self.number()?,
            s if Scanner::is_identifier_start(s) => self.identifier()?,
            _ => {
                return Err(self.fail(&format!("Scanning failed starting at: {}", c)));
            }
        }
        Ok(())
    }
    fn scan_tokens(&mut self) -> Result<()> {
        while !self.is_at_end() {
            self.start = self.current;
            self.scan_token()?;
        }
        self.start = self.current;
        self.add_token(TokenKind::Eof);
        Ok(())
    }
    pub fn scan(src: &str) -> Result<Vec<Token>> {
        let mut scanner = Scanner::new(src);
        scanner.scan_tokens()?;
        Ok(scanner.tokens)
    }
    /// Render `msg` below the source line at `loc`.
    pub fn error(src: &str, loc: &Location, msg: &str) -> String {
        let lines = src.split('\n').collect::<Vec<&str>>();
        let n = loc.line().min(lines.len().saturating_sub(1));
        let prev_line = if n > 0 {
            let prev_n = n - 1;
            let prev = lines[prev_n];
            format!("\n{prev_n}  | {prev}")
        } else {
            "".to_string()
        };
        let line = lines.get(n).copied().unwrap_or("");
        let line_num_width = 4 + n.to_string().len();
        let err_indent = " ".repeat(loc.column() + line_num_width);
        format!("```{prev_line}\n{n}  | {line}\n{err_indent}^ {msg}\n```")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_token(source: &str) -> Result<Token> {
        let tokens = Scanner::scan(source)?;
        Ok(tokens.first().unwrap().clone())
    }
    fn kinds(src: &str) -> Vec<TokenKind> {
        Scanner::scan(src).unwrap().iter().map(|t| t.kind).collect()
    }
    #[test]
    fn test_numbers() {
        let token = scan_token("42.5").unwrap();
        assert_eq!(token.kind, TokenKind::FloatLiteral);
        assert_eq!(token.lexeme, "42.5");
        assert_eq!(token.location.line(), 0);
        assert_eq!(token.location.column(), 0);
        let token = scan_token("42").unwrap();
        assert_eq!(token.kind, TokenKind::Integer);
        assert_eq!(token.lexeme, "42");
        let token = scan_token("3.4028234663852886e38").unwrap();
        assert_eq!(token.kind, TokenKind::FloatLiteral);
        let token = scan_token("1e-7").unwrap();
        assert_eq!(token.kind, TokenKind::FloatLiteral);
        assert_eq!(token.lexeme, "1e-7");

        let tokens = Scanner::scan("42.5 42").unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[2].kind, TokenKind::Eof);
    }
    #[test]
    fn test_torch_op() {
        let src = "%1 = torch.aten.add.Tensor %0, %0, %int1 : !torch.vtensor<[3,?],f32>";
        let tokens = Scanner::scan(src).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::PercentIdentifier);
        assert_eq!(tokens[0].lexeme, "%1");
        assert_eq!(tokens[1].kind, TokenKind::Equal);
        assert_eq!(tokens[2].kind, TokenKind::BareIdentifier);
        assert_eq!(tokens[2].lexeme, "torch.aten.add.Tensor");
        assert_eq!(tokens[7].lexeme, "%int1");
        assert_eq!(tokens[8].kind, TokenKind::Colon);
        assert_eq!(tokens[9].kind, TokenKind::Exclamation);
        assert_eq!(tokens[10].lexeme, "torch.vtensor");
        assert_eq!(tokens[11].kind, TokenKind::Less);
        assert_eq!(tokens[12].kind, TokenKind::LBracket);
        assert_eq!(tokens[13].lexeme, "3");
        assert_eq!(tokens[15].kind, TokenKind::Question);
        assert_eq!(tokens[16].kind, TokenKind::RBracket);
    }
    #[test]
    fn test_builtin_types() {
        assert_eq!(
            kinds("memref<3x4xi64>"),
            vec![
                TokenKind::BareIdentifier,
                TokenKind::Less,
                TokenKind::Integer,
                TokenKind::BareIdentifier,
                TokenKind::Greater,
                TokenKind::Eof
            ]
        );
        let tokens = Scanner::scan("i1 index iter").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::IntType);
        assert_eq!(tokens[1].kind, TokenKind::BareIdentifier);
        assert_eq!(tokens[2].kind, TokenKind::BareIdentifier);
    }
    #[test]
    fn test_strings_and_comments() {
        let tokens = Scanner::scan(r#"name = "a \"b\"" // trailing"#).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::BareIdentifier);
        assert_eq!(tokens[1].kind, TokenKind::Equal);
        assert_eq!(tokens[2].kind, TokenKind::String);
        assert_eq!(tokens[2].lexeme, r#""a \"b\"""#);
        assert_eq!(tokens[3].kind, TokenKind::Eof);
        assert!(Scanner::scan("\"open").is_err());
    }
    #[test]
    fn test_error_snippet() {
        let src = "module {\n  %1 = arith.addi %0, %0 : i32\n}";
        let tokens = Scanner::scan(src).unwrap();
        assert_eq!(tokens[4].lexeme, "arith.addi");
        assert_eq!(tokens[4].location.line(), 1);
        assert_eq!(tokens[4].location.column(), 7);
        assert_eq!(tokens[4].location.to_string(), "loc(2:8)");

        let text = Scanner::error(src, &tokens[4].location, "test");
        let lines = text.split('\n').collect::<Vec<&str>>();
        assert_eq!(lines[0], "```");
        assert_eq!(lines[1], "0  | module {");
        assert_eq!(lines[2], "1  |   %1 = arith.addi %0, %0 : i32");
        assert_eq!(lines[3], "            ^ test");
        assert_eq!(lines[4], "```");
    }
    #[test]
    fn test_unranked_tensor_type() {
        let tokens = Scanner::scan("!torch.vtensor<*,f32> -> -1").unwrap();
        let kinds = tokens.iter().map(|t| t.kind).collect::<Vec<TokenKind>>();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Exclamation,
                TokenKind::BareIdentifier,
                TokenKind::Less,
                TokenKind::Star,
                TokenKind::Comma,
                TokenKind::BareIdentifier,
                TokenKind::Greater,
                TokenKind::Arrow,
                TokenKind::Minus,
                TokenKind::Integer,
                TokenKind::Eof
            ]
        );
        assert_eq!(TokenKind::punctuation('-'), None);
    }
}
