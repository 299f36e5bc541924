use logos::{Lexer, Logos};
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, SyntaxError};
use crate::value::Value;

//===----------------------------------------------------------------------===//
// Token
//===----------------------------------------------------------------------===//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    OpenParen,
    CloseParen,
    Symbol,
    Int,
    Double,
    Bool,
    Str,
    Nil,
    Quote,
    QuasiQuote,
    UnQuote,
    UnQuoteSplicing,
    Comment,
}

/// A positioned token.
///
/// `text` is the surface form with escapes decoded. String literals keep their
/// surrounding quotes so they stay distinguishable from bare symbols.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub line: usize,
}

impl Token {
    /// Contents of a string literal token without the surrounding quotes.
    pub fn string_value(&self) -> Option<&str> {
        match self.kind {
            TokenKind::Str => self.text.get(1..self.text.len() - 1),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

//===----------------------------------------------------------------------===//
// Lexer
//
// logos does the scanning; the callbacks below decode escapes and keep the
// line counter in the lexer extras.
//===----------------------------------------------------------------------===//

#[derive(Debug, Clone, PartialEq, Default)]
enum LexError {
    #[default]
    Unrecognized,
    InvalidEscape(char),
}

#[derive(Debug)]
struct LexerExtras {
    line: usize,
}

impl Default for LexerExtras {
    fn default() -> Self {
        Self { line: 1 }
    }
}

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(extras = LexerExtras, error = LexError)]
#[logos(skip r"[ \t\r\f]+")]
enum Lexeme {
    #[token("\n", |lex| {
        lex.extras.line += 1;
        logos::Skip
    })]
    Newline,

    #[token("(")]
    OpenParen,
    #[token(")")]
    CloseParen,

    #[token("'")]
    Quote,
    #[token("`")]
    QuasiQuote,
    #[token(",")]
    UnQuote,
    #[regex(r"['`,]@")]
    UnQuoteSplicing,

    // Consumes the rest of the line including the newline.
    #[regex(r";[^\n]*\n?")]
    Comment,

    #[regex(r#""([^"\\]|\\.)*""#, string_literal)]
    Str(String),

    #[regex(r#"([^ \t\r\f\n()'`,;"\\]|\\.)+"#, atom)]
    Atom(String),
}

fn decode_escapes(raw: &str) -> Result<String, LexError> {
    let mut result = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('t') => result.push('\t'),
            Some('\\') => result.push('\\'),
            Some('"') => result.push('"'),
            Some(other) => return Err(LexError::InvalidEscape(other)),
            None => return Err(LexError::InvalidEscape('\\')),
        }
    }

    Ok(result)
}

fn string_literal(lex: &mut Lexer<Lexeme>) -> Result<String, LexError> {
    let slice = lex.slice();
    lex.extras.line += slice.matches('\n').count();
    decode_escapes(&slice[1..slice.len() - 1])
}

fn atom(lex: &mut Lexer<Lexeme>) -> Result<String, LexError> {
    decode_escapes(lex.slice())
}

//===----------------------------------------------------------------------===//
// Tokenizer
//===----------------------------------------------------------------------===//

fn looks_numeric(text: &str) -> bool {
    let body = text.strip_prefix(['-', '+']).unwrap_or(text);
    let body = body.strip_prefix('.').unwrap_or(body);
    body.starts_with(|c: char| c.is_ascii_digit())
}

fn classify_atom(text: &str) -> TokenKind {
    match text {
        "nil" => TokenKind::Nil,
        "#t" | "#f" | "true" | "false" => TokenKind::Bool,
        _ if looks_numeric(text) && text.parse::<i64>().is_ok() => TokenKind::Int,
        _ if looks_numeric(text) && text.parse::<f64>().is_ok() => TokenKind::Double,
        _ => TokenKind::Symbol,
    }
}

/// Splits `source` into positioned tokens in one left-to-right scan.
///
/// Positions are reported relative to `offset`, which lets a caller
/// tokenize code that was embedded after a prefix of that length.
pub fn tokenize(source: &str, offset: usize) -> Result<Vec<Token>, Error> {
    let mut lexer = Lexeme::lexer(source);
    let mut tokens = Vec::new();

    while let Some(lexeme) = lexer.next() {
        let span = lexer.span();
        let line = lexer.extras.line;
        let (kind, text) = match lexeme {
            Ok(Lexeme::Newline) => continue,
            Ok(Lexeme::OpenParen) => (TokenKind::OpenParen, "(".to_string()),
            Ok(Lexeme::CloseParen) => (TokenKind::CloseParen, ")".to_string()),
            Ok(Lexeme::Quote) => (TokenKind::Quote, "'".to_string()),
            Ok(Lexeme::QuasiQuote) => (TokenKind::QuasiQuote, "`".to_string()),
            Ok(Lexeme::UnQuote) => (TokenKind::UnQuote, ",".to_string()),
            Ok(Lexeme::UnQuoteSplicing) => {
                (TokenKind::UnQuoteSplicing, lexer.slice().to_string())
            }
            Ok(Lexeme::Comment) => {
                if lexer.slice().ends_with('\n') {
                    lexer.extras.line += 1;
                }
                (TokenKind::Comment, lexer.slice().to_string())
            }
            Ok(Lexeme::Str(s)) => (TokenKind::Str, format!("\"{}\"", s)),
            Ok(Lexeme::Atom(text)) => (classify_atom(&text), text),
            Err(LexError::InvalidEscape(ch)) => {
                return Err(Error::syntax(SyntaxError::InvalidCharacter(ch), line));
            }
            Err(LexError::Unrecognized) => {
                let error = if lexer.slice().starts_with('"') {
                    SyntaxError::UnterminatedString
                } else {
                    SyntaxError::InvalidCharacter(lexer.slice().chars().next().unwrap_or('\\'))
                };
                return Err(Error::syntax(error, line));
            }
        };

        tokens.push(Token {
            kind,
            text,
            start: span.start.saturating_sub(offset),
            end: span.end.saturating_sub(offset),
            line,
        });
    }

    Ok(tokens)
}

//===----------------------------------------------------------------------===//
// Parser
//===----------------------------------------------------------------------===//

#[derive(Debug)]
pub struct Parser {
    tokens: Vec<Rc<Token>>,
    position: usize,
}

impl Parser {
    /// Comment tokens are dropped here; they only existed to keep line numbers right.
    pub fn new(tokens: Vec<Token>) -> Self {
        let tokens = tokens
            .into_iter()
            .filter(|t| t.kind != TokenKind::Comment)
            .map(Rc::new)
            .collect();
        Self { tokens, position: 0 }
    }

    fn next(&mut self) -> Option<Rc<Token>> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn peek(&self) -> Option<&Rc<Token>> {
        self.tokens.get(self.position)
    }

    fn last_line(&self) -> usize {
        self.tokens.last().map(|t| t.line).unwrap_or(1)
    }

    /// Reads the remaining top-level forms as they appear in the source.
    pub fn parse_forms(&mut self) -> Result<Vec<Value>, Error> {
        let mut forms = Vec::new();
        while self.peek().is_some() {
            forms.push(self.read_form()?);
        }
        Ok(forms)
    }

    /// Parses every top-level form. Several forms are wrapped in an implicit `do`.
    pub fn parse_program(&mut self) -> Result<Value, Error> {
        let mut forms = self.parse_forms()?;
        match forms.len() {
            0 => Ok(Value::Undefined),
            1 => Ok(forms.remove(0)),
            _ => {
                let token = forms[0].token().cloned();
                let do_sym = Value::Symbol { name: Rc::from("do"), token: token.clone() };
                forms.insert(0, do_sym);
                Ok(Value::List { items: Rc::new(forms), token })
            }
        }
    }

    fn read_form(&mut self) -> Result<Value, Error> {
        let token = match self.next() {
            Some(token) => token,
            None => {
                return Err(Error::syntax(
                    SyntaxError::UnexpectedEof(String::new()),
                    self.last_line(),
                ));
            }
        };

        match token.kind {
            TokenKind::OpenParen => self.read_list(token),
            TokenKind::CloseParen => {
                Err(Error::syntax(SyntaxError::UnexpectedCloseParen, token.line))
            }
            TokenKind::Quote => self.read_quoted("quote", token),
            TokenKind::QuasiQuote => self.read_quoted("quasiquote", token),
            TokenKind::UnQuote => self.read_quoted("unquote", token),
            TokenKind::UnQuoteSplicing => self.read_quoted("unquote-splicing", token),
            _ => read_atom(token),
        }
    }

    fn read_list(&mut self, open: Rc<Token>) -> Result<Value, Error> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                None => return Err(Error::syntax(SyntaxError::UnbalancedParen, open.line)),
                Some(t) if t.kind == TokenKind::CloseParen => {
                    self.next();
                    break;
                }
                Some(_) => items.push(self.read_form()?),
            }
        }

        if items.is_empty() {
            Ok(Value::Nil { token: Some(open) })
        } else {
            Ok(Value::List { items: Rc::new(items), token: Some(open) })
        }
    }

    fn read_quoted(&mut self, name: &str, marker: Rc<Token>) -> Result<Value, Error> {
        if self.peek().is_none() {
            return Err(Error::syntax(
                SyntaxError::UnexpectedEof(marker.text.clone()),
                marker.line,
            ));
        }
        let form = self.read_form()?;
        let head = Value::Symbol { name: Rc::from(name), token: Some(marker.clone()) };
        Ok(Value::List { items: Rc::new(vec![head, form]), token: Some(marker) })
    }
}

fn read_atom(token: Rc<Token>) -> Result<Value, Error> {
    let bad_form = |t: &Token| Error::syntax(SyntaxError::BadForm(t.text.clone()), t.line);
    let pos = Some(token.clone());

    let value = match token.kind {
        TokenKind::Nil => Value::Nil { token: pos },
        TokenKind::Bool => {
            Value::Bool { value: matches!(token.text.as_str(), "#t" | "true"), token: pos }
        }
        TokenKind::Int => {
            let value = token.text.parse().map_err(|_| bad_form(&token))?;
            Value::Int { value, token: pos }
        }
        TokenKind::Double => {
            let value = token.text.parse().map_err(|_| bad_form(&token))?;
            Value::Double { value, token: pos }
        }
        TokenKind::Str => {
            let value = token.string_value().ok_or_else(|| bad_form(&token))?;
            Value::String { value: Rc::from(value), token: pos }
        }
        TokenKind::Symbol => Value::Symbol { name: Rc::from(token.text.as_str()), token: pos },
        _ => return Err(bad_form(&token)),
    };

    Ok(value)
}

/// Tokenizes and parses `tokens` into one AST.
pub fn parse(tokens: Vec<Token>) -> Result<Value, Error> {
    Parser::new(tokens).parse_program()
}

/// Convenience for `parse(tokenize(source, 0)?)`.
pub fn read(source: &str) -> Result<Value, Error> {
    parse(tokenize(source, 0)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source, 0).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn tokenizes_core_cases() {
        let tokens = tokenize("(def x 123 -4.5 \"hi\" #t nil)", 0).unwrap();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["(", "def", "x", "123", "-4.5", "\"hi\"", "#t", "nil", ")"]);
        assert_eq!(
            kinds("(def x 123 -4.5 \"hi\" #t nil)"),
            vec![
                TokenKind::OpenParen,
                TokenKind::Symbol,
                TokenKind::Symbol,
                TokenKind::Int,
                TokenKind::Double,
                TokenKind::Str,
                TokenKind::Bool,
                TokenKind::Nil,
                TokenKind::CloseParen,
            ]
        );
        assert_eq!(tokens[3].start, 7);
        assert_eq!(tokens[3].end, 10);
    }

    #[test]
    fn parens_split_pending_atoms() {
        let tokens = tokenize("(a(b)c)", 0).unwrap();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["(", "a", "(", "b", ")", "c", ")"]);
    }

    #[test]
    fn escaped_quote_stays_in_one_string_token() {
        let tokens = tokenize(r#""a\"b""#, 0).unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Str);
        assert_eq!(tokens[0].string_value(), Some("a\"b"));
    }

    #[test]
    fn escapes_are_decoded() {
        let tokens = tokenize(r#""x\ty\n\\""#, 0).unwrap();
        assert_eq!(tokens[0].string_value(), Some("x\ty\n\\"));
    }

    #[test]
    fn invalid_escape_is_an_error() {
        match tokenize(r#""a\qb""#, 0) {
            Err(Error::SyntaxError { error: SyntaxError::InvalidCharacter('q'), line: 1 }) => {}
            other => panic!("expected InvalidCharacter, got {:?}", other),
        }
    }

    #[test]
    fn unquote_splicing_is_one_token() {
        assert_eq!(
            kinds("`(a ,b ,@c)"),
            vec![
                TokenKind::QuasiQuote,
                TokenKind::OpenParen,
                TokenKind::Symbol,
                TokenKind::UnQuote,
                TokenKind::Symbol,
                TokenKind::UnQuoteSplicing,
                TokenKind::Symbol,
                TokenKind::CloseParen,
            ]
        );
    }

    #[test]
    fn comments_keep_line_numbers() {
        let tokens = tokenize("(a ; note\n b)\n\n(c)", 0).unwrap();
        let comment = tokens.iter().find(|t| t.kind == TokenKind::Comment).unwrap();
        assert_eq!(comment.text, "; note\n");
        assert_eq!(comment.line, 1);

        let b = tokens.iter().find(|t| t.text == "b").unwrap();
        assert_eq!(b.line, 2);
        let c = tokens.iter().find(|t| t.text == "c").unwrap();
        assert_eq!(c.line, 4);
    }

    #[test]
    fn offset_rebases_positions() {
        let tokens = tokenize("(begin (x))", 7).unwrap();
        let x = tokens.iter().find(|t| t.text == "x").unwrap();
        assert_eq!(x.start, 1);
        assert_eq!(x.end, 2);
    }

    #[test]
    fn trailing_atom_is_flushed() {
        let tokens = tokenize("abc", 0).unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].text, "abc");
        assert_eq!(tokens[0].end, 3);
    }

    #[test]
    fn parses_nested_lists_with_positions() {
        let ast = read("(do\n  (def a 42)\n  (print a))").unwrap();
        let items = ast.as_list().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].line(), Some(1));
        assert_eq!(items[1].line(), Some(2));
        assert_eq!(items[2].line(), Some(3));
        let def = items[1].as_list().unwrap();
        assert_eq!(def[2], Value::int(42));
    }

    #[test]
    fn quote_markers_wrap_the_following_form() {
        let ast = read("'(a b)").unwrap();
        let items = ast.as_list().unwrap();
        assert!(items[0].is_symbol_named("quote"));
        assert_eq!(items[1].as_list().unwrap().len(), 2);

        let ast = read(",@xs").unwrap();
        assert!(ast.as_list().unwrap()[0].is_symbol_named("unquote-splicing"));
    }

    #[test]
    fn several_top_level_forms_become_a_do_block() {
        let ast = read("(def a 1)\n(def b 2)").unwrap();
        let items = ast.as_list().unwrap();
        assert!(items[0].is_symbol_named("do"));
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn empty_list_is_nil() {
        assert!(read("()").unwrap().is_nil());
        assert!(read("").unwrap().is_undefined());
    }

    #[test]
    fn unbalanced_parens_report_lines() {
        match read("(do\n (print 1)") {
            Err(Error::SyntaxError { error: SyntaxError::UnbalancedParen, line: 1 }) => {}
            other => panic!("expected UnbalancedParen, got {:?}", other),
        }
        match read("(print 1)\n)") {
            Err(Error::SyntaxError { error: SyntaxError::UnexpectedCloseParen, line: 2 }) => {}
            other => panic!("expected UnexpectedCloseParen, got {:?}", other),
        }
    }

    #[test]
    fn unterminated_string_is_flagged() {
        match tokenize("(print \"oops)", 0) {
            Err(Error::SyntaxError { error: SyntaxError::UnterminatedString, .. }) => {}
            other => panic!("expected UnterminatedString, got {:?}", other),
        }
    }
}
