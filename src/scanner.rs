use std::borrow::Cow;
use std::iter::FusedIterator;

/// Scanner takes in script text and spits out tokens.
#[derive(Debug)]
pub struct Scanner<'a> {
    input: &'a str,
    // Number of bytes of `input` consumed while scanning the current token.
    // `reset_scanned_input` drops them from `input` once the token is made.
    scanned_input_len: usize,
    current_line: usize,
    // Set once the Eof token has been handed out through the Iterator impl.
    ended: bool,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    // Single-character tokens.
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Comma,
    Dot,
    Minus,
    Plus,
    Semicolon,
    Slash,
    Star,
    // One or two character tokens.
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    // Literals.
    Identifier,
    String,
    Number,
    // Keywords.
    And,
    Else,
    End,
    False,
    Fun,
    If,
    Let,
    Nil,
    Or,
    Print,
    Return,
    True,
    While,
    Yield,

    Error,
    Eof,
}

/// Token is a single token, including a ref to the raw characters that constitute it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    /// What kind of token this is.
    pub typ: TokenType,
    /// The source text of the token. Error tokens carry their message here instead,
    /// which is why this is a Cow rather than a plain &str.
    pub raw: Cow<'a, str>,
    /// 1-based source line the token ends on.
    pub line: usize,
}

impl<'a> Token<'a> {
    /// An Eof token on the given line.
    pub fn eof(line: usize) -> Token<'a> {
        Token {
            typ: TokenType::Eof,
            raw: Cow::Borrowed(""),
            line,
        }
    }
}

/// Marker that starts a comment running to the end of the line.
pub const COMMENT_MARKER: char = '#';

impl<'a> Scanner<'a> {
    /// Returns a fresh Scanner, ready to spit out tokens from the given source
    pub fn new(source: &'a str) -> Scanner<'a> {
        Scanner {
            input: source,
            current_line: 1,
            ended: false,
            scanned_input_len: 0,
        }
    }

    /// Returns the next token from the input, advancing the scanner.
    /// Errors are represented in-band as TokenType::Error.
    /// Once the input is exhausted every call returns an Eof token.
    pub fn next_token(&mut self) -> Token<'a> {
        self.skip_whitespace();
        let next_char = match self.take_next_char() {
            None => return Token::eof(self.current_line),
            Some(c) => c,
        };
        let token = match next_char {
            '(' => self.make_token(TokenType::LeftParen),
            ')' => self.make_token(TokenType::RightParen),
            '{' => self.make_token(TokenType::LeftBrace),
            '}' => self.make_token(TokenType::RightBrace),
            ';' => self.make_token(TokenType::Semicolon),
            ',' => self.make_token(TokenType::Comma),
            '.' => self.make_token(TokenType::Dot),
            '-' => self.make_token(TokenType::Minus),
            '+' => self.make_token(TokenType::Plus),
            '/' => self.make_token(TokenType::Slash),
            '*' => self.make_token(TokenType::Star),
            '!' => self.one_or_two('=', TokenType::BangEqual, TokenType::Bang),
            '=' => self.one_or_two('=', TokenType::EqualEqual, TokenType::Equal),
            '<' => self.one_or_two('=', TokenType::LessEqual, TokenType::Less),
            '>' => self.one_or_two('=', TokenType::GreaterEqual, TokenType::Greater),
            '"' => self.scan_string_literal(),
            '0'..='9' => self.scan_numeric_literal(),
            c if c.is_ascii_alphabetic() || c == '_' => self.scan_identifier_or_keyword(),
            c => self.err_token(format!("Unexpected character '{}'.", c)),
        };
        self.reset_scanned_input();
        token
    }

    fn unscanned_input(&self) -> &'a str {
        if self.scanned_input_len < self.input.len() {
            &self.input[self.scanned_input_len..]
        } else {
            ""
        }
    }

    fn peek_next_char(&self) -> Option<char> {
        self.unscanned_input().chars().next()
    }

    fn peek_next_next_char(&self) -> Option<char> {
        self.unscanned_input().chars().nth(1)
    }

    fn take_next_char(&mut self) -> Option<char> {
        let next_char = self.peek_next_char()?;
        self.scanned_input_len += next_char.len_utf8();
        Some(next_char)
    }

    fn take_next_char_if_matches(&mut self, target: char) -> bool {
        match self.peek_next_char() {
            Some(c) if c == target => {
                self.scanned_input_len += c.len_utf8();
                true
            }
            _ => false,
        }
    }

    fn one_or_two(&mut self, second: char, two: TokenType, one: TokenType) -> Token<'a> {
        if self.take_next_char_if_matches(second) {
            self.make_token(two)
        } else {
            self.make_token(one)
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek_next_char() {
                Some('\n') => {
                    self.current_line += 1;
                    self.take_next_char();
                }
                Some(c) if c.is_whitespace() => {
                    // only \n is recognized as newline, no other chars
                    self.take_next_char();
                }
                Some(COMMENT_MARKER) => {
                    // leave the \n alone so the line counter sees it
                    while !matches!(self.peek_next_char(), Some('\n') | None) {
                        self.take_next_char();
                    }
                }
                _ => break,
            }
        }
        self.reset_scanned_input();
    }

    // Makes a token of the given type from the scanned portion of input.
    // Does NOT reset scanned input, caller of this probably also wants to call that.
    fn make_token(&self, typ: TokenType) -> Token<'a> {
        Token {
            typ,
            line: self.current_line,
            raw: Cow::Borrowed(&self.input[0..self.scanned_input_len]),
        }
    }

    fn err_token(&self, message: String) -> Token<'a> {
        Token {
            typ: TokenType::Error,
            raw: Cow::Owned(message),
            line: self.current_line,
        }
    }

    fn reset_scanned_input(&mut self) {
        self.input = self.unscanned_input();
        self.scanned_input_len = 0;
    }

    // Assumes we have just scanned the initial double-quote.
    // There are no escape sequences; the token's raw text includes both quotes.
    fn scan_string_literal(&mut self) -> Token<'a> {
        loop {
            match self.peek_next_char() {
                Some('"') => {
                    self.take_next_char();
                    return self.make_token(TokenType::String);
                }
                Some(c) => {
                    if c == '\n' {
                        self.current_line += 1
                    }
                    self.take_next_char();
                }
                None => return self.err_token("Unterminated string.".to_string()),
            }
        }
    }

    // The dot is only part of the number if a digit follows it, so `1.x` is three tokens.
    fn scan_numeric_literal(&mut self) -> Token<'a> {
        while let Some('0'..='9') = self.peek_next_char() {
            self.take_next_char();
        }
        if self.peek_next_char() == Some('.')
            && matches!(self.peek_next_next_char(), Some('0'..='9'))
        {
            self.take_next_char();
            while let Some('0'..='9') = self.peek_next_char() {
                self.take_next_char();
            }
        }
        self.make_token(TokenType::Number)
    }

    fn scan_identifier_or_keyword(&mut self) -> Token<'a> {
        while self
            .peek_next_char()
            .map_or(false, |c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.take_next_char();
        }
        self.make_token(token_type_from_str(&self.input[0..self.scanned_input_len]))
    }
}

// assumes text is not empty and is ascii
fn token_type_from_str(token_text: &str) -> TokenType {
    let mut chars = token_text.chars();
    match chars.next() {
        Some('a') => keyword_if_equal(&token_text[1..], "nd", TokenType::And),
        Some('i') => keyword_if_equal(&token_text[1..], "f", TokenType::If),
        Some('l') => keyword_if_equal(&token_text[1..], "et", TokenType::Let),
        Some('n') => keyword_if_equal(&token_text[1..], "il", TokenType::Nil),
        Some('o') => keyword_if_equal(&token_text[1..], "r", TokenType::Or),
        Some('p') => keyword_if_equal(&token_text[1..], "rint", TokenType::Print),
        Some('r') => keyword_if_equal(&token_text[1..], "eturn", TokenType::Return),
        Some('t') => keyword_if_equal(&token_text[1..], "rue", TokenType::True),
        Some('w') => keyword_if_equal(&token_text[1..], "hile", TokenType::While),
        Some('y') => keyword_if_equal(&token_text[1..], "ield", TokenType::Yield),
        Some('e') => match chars.next() {
            Some('l') => keyword_if_equal(&token_text[2..], "se", TokenType::Else),
            Some('n') => keyword_if_equal(&token_text[2..], "d", TokenType::End),
            _ => TokenType::Identifier,
        },
        Some('f') => match chars.next() {
            Some('a') => keyword_if_equal(&token_text[2..], "lse", TokenType::False),
            Some('u') => keyword_if_equal(&token_text[2..], "n", TokenType::Fun),
            _ => TokenType::Identifier,
        },
        _ => TokenType::Identifier,
    }
}

fn keyword_if_equal(text: &str, keyword_text: &str, typ: TokenType) -> TokenType {
    if text == keyword_text {
        typ
    } else {
        TokenType::Identifier
    }
}

/// The iterator hands out a single Eof token and then stops, so scanners can be collected.
impl<'a> Iterator for Scanner<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.ended {
            return None;
        }
        let token = self.next_token();
        if token.typ == TokenType::Eof {
            self.ended = true;
        }
        Some(token)
    }
}

impl<'a> FusedIterator for Scanner<'a> {}

#[cfg(test)]
mod test {
    use super::*;

    fn token(typ: TokenType, raw: &str, line: usize) -> Token<'static> {
        Token {
            typ,
            raw: raw.to_string().into(),
            line,
        }
    }

    #[test]
    fn big_happy_path_test() {
        let input = r#"
( # comment
) ( { != == = = ! = /
123.1= /123 1.x
"#;
        let tokens: Vec<Token<'_>> = Scanner::new(input).collect();
        let expected_tokens = vec![
            token(TokenType::LeftParen, "(", 2),
            token(TokenType::RightParen, ")", 3),
            token(TokenType::LeftParen, "(", 3),
            token(TokenType::LeftBrace, "{", 3),
            token(TokenType::BangEqual, "!=", 3),
            token(TokenType::EqualEqual, "==", 3),
            token(TokenType::Equal, "=", 3),
            token(TokenType::Equal, "=", 3),
            token(TokenType::Bang, "!", 3),
            token(TokenType::Equal, "=", 3),
            token(TokenType::Slash, "/", 3),
            token(TokenType::Number, "123.1", 4),
            token(TokenType::Equal, "=", 4),
            token(TokenType::Slash, "/", 4),
            token(TokenType::Number, "123", 4),
            token(TokenType::Number, "1", 4),
            token(TokenType::Dot, ".", 4),
            token(TokenType::Identifier, "x", 4),
            token(TokenType::Eof, "", 5),
        ];
        assert_eq!(tokens.len(), expected_tokens.len());
        for (i, (expected, got)) in expected_tokens.into_iter().zip(tokens).enumerate() {
            assert_eq!(expected, got, "on the token number {}", i);
        }
    }

    #[test]
    fn test_keywords_and_identifiers() {
        let text = "and else end false fun if let nil or print return true while yield \
                    e en ends f fu t yields _private snake_case9 Let";
        let expected_tokens: Vec<_> = vec![
            ("and", TokenType::And),
            ("else", TokenType::Else),
            ("end", TokenType::End),
            ("false", TokenType::False),
            ("fun", TokenType::Fun),
            ("if", TokenType::If),
            ("let", TokenType::Let),
            ("nil", TokenType::Nil),
            ("or", TokenType::Or),
            ("print", TokenType::Print),
            ("return", TokenType::Return),
            ("true", TokenType::True),
            ("while", TokenType::While),
            ("yield", TokenType::Yield),
            ("e", TokenType::Identifier),
            ("en", TokenType::Identifier),
            ("ends", TokenType::Identifier),
            ("f", TokenType::Identifier),
            ("fu", TokenType::Identifier),
            ("t", TokenType::Identifier),
            ("yields", TokenType::Identifier),
            ("_private", TokenType::Identifier),
            ("snake_case9", TokenType::Identifier),
            ("Let", TokenType::Identifier),
            ("", TokenType::Eof),
        ]
        .into_iter()
        .map(|(raw, typ)| token(typ, raw, 1))
        .collect();
        let tokens: Vec<_> = Scanner::new(text).collect();
        assert_eq!(tokens.len(), expected_tokens.len());
        for (i, (expected, got)) in expected_tokens.into_iter().zip(tokens).enumerate() {
            assert_eq!(expected, got, "comparing token {}", i);
        }
    }

    #[test]
    fn eof_is_idempotent() {
        let mut scanner = Scanner::new("x");
        assert_eq!(scanner.next_token().typ, TokenType::Identifier);
        for _ in 0..3 {
            assert_eq!(scanner.next_token(), Token::eof(1));
        }
    }

    #[test]
    fn strings_count_lines_and_report_unterminated() {
        let tokens: Vec<_> = Scanner::new("\"a\nb\" \"open").collect();
        assert_eq!(tokens[0], token(TokenType::String, "\"a\nb\"", 2));
        assert_eq!(tokens[1].typ, TokenType::Error);
        assert_eq!(tokens[1].raw, "Unterminated string.");
        assert_eq!(tokens[2].typ, TokenType::Eof);
    }

    #[test]
    fn bad_character_is_an_error_token() {
        let tokens: Vec<_> = Scanner::new("let @ = 1;").collect();
        assert_eq!(tokens[1].typ, TokenType::Error);
        assert_eq!(tokens[1].raw, "Unexpected character '@'.");
        // scanning carries on after the bad character
        assert_eq!(tokens[2].typ, TokenType::Equal);
    }

    #[test]
    fn comment_at_end_of_input() {
        let tokens: Vec<_> = Scanner::new("1 # trailing").collect();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].typ, TokenType::Eof);
    }
}
