//! Scanner for user snippet code.
//!
//! The scanner converts snippet source text into a stream of tokens.
//! Scanning is context-sensitive in two places: identifiers bound in the
//! [`TypeContext`] lex as type specifiers (the typedef-name rule), and the
//! type of an un-suffixed floating literal is whatever the context binds to
//! `scalar`.

use crate::frontend::token::{Token, TokenKind};
use crate::frontend::types::TypeContext;
use crate::utils::errors::{GenResult, LexError, ScanError};

/// Capability through which the scanner reports lexical errors.
///
/// Errors do not stop the scan; one or more reported errors cause the scan
/// to fail once the whole source has been consumed.
pub trait ErrorHandler {
    /// Report an error at the given 1-indexed source line.
    fn error(&mut self, line: usize, message: &str);
}

/// An [`ErrorHandler`] that collects every reported error.
#[derive(Debug, Default)]
pub struct CollectingErrorHandler {
    errors: Vec<LexError>,
}

impl CollectingErrorHandler {
    /// Create an empty handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any error has been reported.
    pub fn has_error(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Consume the handler, yielding the collected errors.
    pub fn into_errors(self) -> Vec<LexError> {
        self.errors
    }
}

impl ErrorHandler for CollectingErrorHandler {
    fn error(&mut self, line: usize, message: &str) {
        self.errors.push(LexError { line, message: message.to_string() });
    }
}

/// A scanner for tokenizing snippet source.
struct Scanner<'a> {
    /// The source text (snippets are ASCII)
    source: &'a [u8],
    /// Start of the current lexeme
    start: usize,
    /// Current byte offset
    current: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// Typedef table
    context: &'a TypeContext,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str, context: &'a TypeContext) -> Self {
        Self { source: source.as_bytes(), start: 0, current: 0, line: 1, context }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn advance(&mut self) -> u8 {
        let c = self.source[self.current];
        self.current += 1;
        c
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.source[self.current] != expected {
            false
        } else {
            self.current += 1;
            true
        }
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() { b'\0' } else { self.source[self.current] }
    }

    fn lexeme(&self) -> &'a str {
        // Scanner only advances over ASCII, so the slice is valid UTF-8
        std::str::from_utf8(&self.source[self.start..self.current]).unwrap()
    }

    fn reset_lexeme(&mut self) {
        self.start = self.current;
    }

    fn emit(&self, tokens: &mut Vec<Token>, kind: TokenKind) {
        tokens.push(Token::new(kind, self.lexeme(), self.line));
    }

    /// Read a `U`/`L` suffix set and classify the integer literal.
    fn integer_suffix_kind(&mut self, handler: &mut dyn ErrorHandler) -> Option<TokenKind> {
        let mut unsigned = false;
        let mut long = false;
        while matches!(self.peek().to_ascii_uppercase(), b'U' | b'L') {
            match self.advance().to_ascii_uppercase() {
                b'U' => unsigned = true,
                _ => long = true,
            }
        }
        match (unsigned, long) {
            (false, false) => Some(TokenKind::Int32Number),
            (true, false) => Some(TokenKind::Uint32Number),
            _ => {
                handler.error(self.line, "Unsupported integer literal suffix.");
                None
            }
        }
    }

    /// Classification for an un-suffixed floating literal: the type bound to
    /// `scalar` in the type context. Absence of `scalar` is fatal.
    fn scalar_token_kind(&self) -> GenResult<TokenKind> {
        let scalar = self.context.scalar()?;
        Ok(if scalar == crate::frontend::types::NumericType::Float {
            TokenKind::FloatNumber
        } else {
            TokenKind::DoubleNumber
        })
    }

    fn scan_number(
        &mut self,
        first: u8,
        tokens: &mut Vec<Token>,
        handler: &mut dyn ErrorHandler,
    ) -> GenResult<()> {
        // Hexadecimal literal
        if first == b'0' && (self.matches(b'x') || self.matches(b'X')) {
            while self.peek().is_ascii_hexdigit() {
                self.advance();
            }
            if self.matches(b'.') {
                handler.error(self.line, "Hexadecimal floating point literals unsupported.");
                while self.peek().is_ascii_hexdigit() {
                    self.advance();
                }
                return Ok(());
            }
            if let Some(kind) = self.integer_suffix_kind(handler) {
                self.emit(tokens, kind);
            }
            return Ok(());
        }

        // Octal literal
        if first == b'0' && (b'0'..=b'7').contains(&self.peek()) {
            handler.error(self.line, "Octal literals unsupported.");
            while self.peek().is_ascii_digit() {
                self.advance();
            }
            return Ok(());
        }

        // Decimal: digits, optional fraction, optional exponent
        while self.peek().is_ascii_digit() {
            self.advance();
        }
        let mut is_float = first == b'.';
        if !is_float && self.matches(b'.') {
            is_float = true;
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        } else if is_float {
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }
        if matches!(self.peek(), b'e' | b'E') {
            let after_e = self.current + 1;
            let exponent_follows = match self.source.get(after_e) {
                Some(c) if c.is_ascii_digit() => true,
                Some(b'+') | Some(b'-') => {
                    matches!(self.source.get(after_e + 1), Some(d) if d.is_ascii_digit())
                }
                _ => false,
            };
            if exponent_follows {
                is_float = true;
                self.advance();
                if matches!(self.peek(), b'+' | b'-') {
                    self.advance();
                }
                while self.peek().is_ascii_digit() {
                    self.advance();
                }
            }
        }

        if is_float {
            if matches!(self.peek(), b'f' | b'F') {
                self.emit(tokens, TokenKind::FloatNumber);
                self.advance();
            } else if matches!(self.peek(), b'd' | b'D') {
                // 'd' suffix is an extension, not standard C
                self.emit(tokens, TokenKind::DoubleNumber);
                self.advance();
            } else {
                let kind = self.scalar_token_kind()?;
                self.emit(tokens, kind);
            }
        } else if let Some(kind) = self.integer_suffix_kind(handler) {
            self.emit(tokens, kind);
        }
        Ok(())
    }

    fn scan_string(&mut self, tokens: &mut Vec<Token>, handler: &mut dyn ErrorHandler) {
        while !self.is_at_end() && self.peek() != b'"' {
            if self.peek() == b'\n' {
                self.line += 1;
            }
            self.advance();
        }
        if self.matches(b'"') {
            self.emit(tokens, TokenKind::StringLit);
        } else {
            handler.error(self.line, "Unterminated string literal.");
        }
    }

    fn scan_identifier(&mut self, tokens: &mut Vec<Token>) {
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
            self.advance();
        }

        let lexeme = self.lexeme();
        if let Some(kind) = TokenKind::keyword(lexeme) {
            self.emit(tokens, kind);
        } else if self.context.contains(lexeme) {
            // Typedef-name rule
            self.emit(tokens, TokenKind::TypeSpecifier);
        } else {
            self.emit(tokens, TokenKind::Identifier);
        }
    }

    fn scan_token(
        &mut self,
        tokens: &mut Vec<Token>,
        handler: &mut dyn ErrorHandler,
    ) -> GenResult<()> {
        let c = self.advance();
        match c {
            b'(' => self.emit(tokens, TokenKind::LeftParen),
            b')' => self.emit(tokens, TokenKind::RightParen),
            b'{' => self.emit(tokens, TokenKind::LeftBrace),
            b'}' => self.emit(tokens, TokenKind::RightBrace),
            b'[' => self.emit(tokens, TokenKind::LeftSquareBracket),
            b']' => self.emit(tokens, TokenKind::RightSquareBracket),
            b',' => self.emit(tokens, TokenKind::Comma),
            b':' => self.emit(tokens, TokenKind::Colon),
            b';' => self.emit(tokens, TokenKind::Semicolon),
            b'~' => self.emit(tokens, TokenKind::Tilda),
            b'?' => self.emit(tokens, TokenKind::Question),

            b'!' => {
                let kind = if self.matches(b'=') { TokenKind::NotEqual } else { TokenKind::Not };
                self.emit(tokens, kind);
            }
            b'=' => {
                let kind =
                    if self.matches(b'=') { TokenKind::EqualEqual } else { TokenKind::Equal };
                self.emit(tokens, kind);
            }
            b'*' => {
                let kind = if self.matches(b'=') { TokenKind::StarEqual } else { TokenKind::Star };
                self.emit(tokens, kind);
            }
            b'%' => {
                let kind =
                    if self.matches(b'=') { TokenKind::PercentEqual } else { TokenKind::Percent };
                self.emit(tokens, kind);
            }
            b'^' => {
                let kind =
                    if self.matches(b'=') { TokenKind::CaretEqual } else { TokenKind::Caret };
                self.emit(tokens, kind);
            }

            b'<' => {
                let kind = if self.matches(b'=') {
                    TokenKind::LessEqual
                } else if self.matches(b'<') {
                    if self.matches(b'=') {
                        TokenKind::ShiftLeftEqual
                    } else {
                        TokenKind::ShiftLeft
                    }
                } else {
                    TokenKind::Less
                };
                self.emit(tokens, kind);
            }
            b'>' => {
                let kind = if self.matches(b'=') {
                    TokenKind::GreaterEqual
                } else if self.matches(b'>') {
                    if self.matches(b'=') {
                        TokenKind::ShiftRightEqual
                    } else {
                        TokenKind::ShiftRight
                    }
                } else {
                    TokenKind::Greater
                };
                self.emit(tokens, kind);
            }

            b'+' => {
                let kind = if self.matches(b'=') {
                    TokenKind::PlusEqual
                } else if self.matches(b'+') {
                    TokenKind::PlusPlus
                } else {
                    TokenKind::Plus
                };
                self.emit(tokens, kind);
            }
            b'-' => {
                let kind = if self.matches(b'=') {
                    TokenKind::MinusEqual
                } else if self.matches(b'-') {
                    TokenKind::MinusMinus
                } else {
                    TokenKind::Minus
                };
                self.emit(tokens, kind);
            }
            b'&' => {
                let kind = if self.matches(b'=') {
                    TokenKind::AmpersandEqual
                } else if self.matches(b'&') {
                    TokenKind::AmpersandAmpersand
                } else {
                    TokenKind::Ampersand
                };
                self.emit(tokens, kind);
            }
            b'|' => {
                let kind = if self.matches(b'=') {
                    TokenKind::PipeEqual
                } else if self.matches(b'|') {
                    TokenKind::PipePipe
                } else {
                    TokenKind::Pipe
                };
                self.emit(tokens, kind);
            }

            b'/' => {
                if self.matches(b'/') {
                    // Line comment
                    while !self.is_at_end() && self.peek() != b'\n' {
                        self.advance();
                    }
                } else {
                    self.emit(tokens, TokenKind::Slash);
                }
            }

            b'"' => self.scan_string(tokens, handler),

            // Whitespace
            b' ' | b'\r' | b'\t' => {}
            b'\n' => self.line += 1,

            _ => {
                if c.is_ascii_digit() || c == b'.' {
                    self.scan_number(c, tokens, handler)?;
                } else if c.is_ascii_alphabetic() || c == b'_' {
                    self.scan_identifier(tokens);
                } else {
                    handler.error(self.line, "Unexpected character.");
                }
            }
        }
        Ok(())
    }
}

/// Scan snippet source into tokens, reporting lexical errors through
/// `handler`. The caller is responsible for checking the handler afterwards;
/// only fatal conditions (a missing `scalar` binding) return `Err`.
pub fn scan_source_with(
    source: &str,
    context: &TypeContext,
    handler: &mut dyn ErrorHandler,
) -> GenResult<Vec<Token>> {
    let mut scanner = Scanner::new(source, context);
    let mut tokens = Vec::new();

    while !scanner.is_at_end() {
        scanner.reset_lexeme();
        scanner.scan_token(&mut tokens, handler)?;
    }

    scanner.reset_lexeme();
    tokens.push(Token::new(TokenKind::EndOfFile, "", scanner.line));
    Ok(tokens)
}

/// Scan snippet source into tokens, failing at the end of the scan if any
/// lexical error was reported.
pub fn scan_source(source: &str, context: &TypeContext) -> GenResult<Vec<Token>> {
    let mut handler = CollectingErrorHandler::new();
    let tokens = scan_source_with(source, context, &mut handler)?;
    if handler.has_error() {
        Err(ScanError { errors: handler.into_errors() }.into())
    } else {
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::types::NumericType;

    fn float_context() -> TypeContext {
        TypeContext::for_model(NumericType::Float, NumericType::Double)
    }

    fn double_context() -> TypeContext {
        TypeContext::for_model(NumericType::Double, NumericType::Double)
    }

    fn kinds(source: &str, context: &TypeContext) -> Vec<TokenKind> {
        scan_source(source, context).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_empty() {
        let tokens = scan_source("", &float_context()).unwrap();
        assert_eq!(tokens.len(), 1);
        assert!(tokens[0].is_eof());
    }

    #[test]
    fn test_keywords_and_typedefs() {
        let context = float_context();
        let kinds = kinds("if (scalar) { const unsigned int x; }", &context);
        assert_eq!(
            kinds,
            vec![
                TokenKind::If,
                TokenKind::LeftParen,
                TokenKind::TypeSpecifier,
                TokenKind::RightParen,
                TokenKind::LeftBrace,
                TokenKind::TypeQualifier,
                TokenKind::TypeSpecifier,
                TokenKind::TypeSpecifier,
                TokenKind::Identifier,
                TokenKind::Semicolon,
                TokenKind::RightBrace,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn test_scalar_literal_follows_context() {
        let float_tokens = scan_source("1.5", &float_context()).unwrap();
        assert_eq!(float_tokens[0].kind, TokenKind::FloatNumber);

        let double_tokens = scan_source("1.5", &double_context()).unwrap();
        assert_eq!(double_tokens[0].kind, TokenKind::DoubleNumber);
    }

    #[test]
    fn test_float_suffixes() {
        let context = double_context();
        let tokens = scan_source("1.5f 1.5d 2.0F", &context).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::FloatNumber);
        assert_eq!(tokens[1].kind, TokenKind::DoubleNumber);
        assert_eq!(tokens[2].kind, TokenKind::FloatNumber);
    }

    #[test]
    fn test_integer_suffixes() {
        let context = float_context();
        let tokens = scan_source("42 42U 0x2Au", &context).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Int32Number);
        assert_eq!(tokens[1].kind, TokenKind::Uint32Number);
        assert_eq!(tokens[2].kind, TokenKind::Uint32Number);
    }

    #[test]
    fn test_hex_float_is_error() {
        let err = scan_source("0x1.5", &float_context()).unwrap_err();
        let s = format!("{}", err);
        assert!(s.contains("Hexadecimal"), "{}", s);
    }

    #[test]
    fn test_octal_is_error() {
        assert!(scan_source("0755", &float_context()).is_err());
        // A lone zero is fine
        let tokens = scan_source("0", &float_context()).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Int32Number);
    }

    #[test]
    fn test_missing_scalar_is_fatal() {
        let context = TypeContext::new();
        assert!(scan_source("1.5", &context).is_err());
        // Integer literals don't consult the scalar binding
        assert!(scan_source("42", &context).is_ok());
    }

    #[test]
    fn test_exponents() {
        let context = float_context();
        let tokens = scan_source("3.1e-2 1e10 2E+3", &context).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::FloatNumber);
        assert_eq!(tokens[0].lexeme, "3.1e-2");
        assert_eq!(tokens[1].kind, TokenKind::FloatNumber);
        assert_eq!(tokens[2].kind, TokenKind::FloatNumber);
    }

    #[test]
    fn test_compound_operators() {
        let context = float_context();
        let kinds = kinds("<<= >>= << >> ++ -- += && ||", &context);
        assert_eq!(
            kinds,
            vec![
                TokenKind::ShiftLeftEqual,
                TokenKind::ShiftRightEqual,
                TokenKind::ShiftLeft,
                TokenKind::ShiftRight,
                TokenKind::PlusPlus,
                TokenKind::MinusMinus,
                TokenKind::PlusEqual,
                TokenKind::AmpersandAmpersand,
                TokenKind::PipePipe,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn test_line_comment_and_counting() {
        let context = float_context();
        let tokens = scan_source("x // trailing comment\ny", &context).unwrap();
        assert_eq!(tokens[0].lexeme, "x");
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].lexeme, "y");
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn test_unexpected_character_collected() {
        let mut handler = CollectingErrorHandler::new();
        let tokens = scan_source_with("a @ b", &float_context(), &mut handler).unwrap();
        assert!(handler.has_error());
        // Scan continues past the bad character
        assert_eq!(tokens.iter().filter(|t| t.kind == TokenKind::Identifier).count(), 2);
    }

    #[test]
    fn test_snippet_with_dollar_forms() {
        // Substitution forms appear as plain punctuation to the scanner once
        // lowered; raw snippets are substituted before scanning, so `$` is
        // the only character the scanner ever rejects in practice.
        let mut handler = CollectingErrorHandler::new();
        scan_source_with("$(V) += 1.0f;", &float_context(), &mut handler).unwrap();
        assert!(handler.has_error());
    }
}
