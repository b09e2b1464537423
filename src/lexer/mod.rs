use logos::Logos;
use serde::Serialize;

/// Byte range of a token in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const UNKNOWN: Span = Span { start: 0, end: 0 };

    pub fn merge(self, other: Span) -> Span {
        Span { start: self.start.min(other.start), end: self.end.max(other.end) }
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(r: std::ops::Range<usize>) -> Self {
        Span { start: r.start, end: r.end }
    }
}

/// Integer literal in the narrowest type its value and suffix allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntLiteral {
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
}

fn parse_integer(lex: &mut logos::Lexer<Token>) -> Option<IntLiteral> {
    let text = lex.slice();
    let digits_end = text.trim_end_matches(['u', 'U', 'l', 'L']).len();
    let (digits, suffix) = text.split_at(digits_end);
    let value = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<u64>().ok()?,
    };
    let suffix = suffix.to_ascii_uppercase();
    Some(match suffix.as_str() {
        "" => match (i32::try_from(value), i64::try_from(value)) {
            (Ok(v), _) => IntLiteral::Int32(v),
            (_, Ok(v)) => IntLiteral::Int64(v),
            _ => IntLiteral::UInt64(value),
        },
        "U" => match u32::try_from(value) {
            Ok(v) => IntLiteral::UInt32(v),
            Err(_) => IntLiteral::UInt64(value),
        },
        "L" => IntLiteral::Int64(i64::try_from(value).ok()?),
        "UL" | "LU" => IntLiteral::UInt64(value),
        _ => return None,
    })
}

fn unescape(lex: &mut logos::Lexer<Token>) -> Option<String> {
    let raw = lex.slice();
    let body = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                let code = u8::from_str_radix(&hex, 16).ok()?;
                out.push(char::from(code));
            }
            _ => return None,
        }
    }
    Some(out)
}

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip(r"//[^\n]*", allow_greedy = true))]
#[logos(skip r"/\*([^*]|\*+[^*/])*\*+/")]
pub enum Token {
    // Keywords
    #[token("function")]
    Function,
    #[token("return")]
    Return,
    #[token("exit")]
    Exit,
    #[token("abort")]
    Abort,
    #[token("print")]
    Print,
    #[token("println")]
    Println,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("do")]
    Do,
    #[token("for")]
    For,
    #[token("foreach")]
    Foreach,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("switch")]
    Switch,
    #[token("case")]
    Case,
    #[token("default")]
    Default,
    #[token("try")]
    Try,
    #[token("catch")]
    Catch,
    #[token("use")]
    Use,
    #[token("global")]
    Global,
    #[token("array")]
    Array,
    #[token("const")]
    Const,
    #[token("with")]
    With,
    #[token("null")]
    Null,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("like")]
    Like,
    #[token("ilike")]
    ILike,
    #[token("match")]
    Match,
    #[token("imatch")]
    IMatch,

    // Cast names
    #[token("int32")]
    Int32Type,
    #[token("int64")]
    Int64Type,
    #[token("uint32")]
    UInt32Type,
    #[token("uint64")]
    UInt64Type,
    #[token("real")]
    RealType,
    #[token("string")]
    StringType,
    #[token("boolean")]
    BooleanType,

    // Punctuation
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("%{")]
    MapOpen,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token("::")]
    DoubleColon,
    #[token("->")]
    Arrow,
    #[token("?->")]
    SafeArrow,
    #[token("?")]
    Question,
    #[token("..")]
    DotDot,
    #[token("...")]
    Ellipsis,

    // Operators
    #[token("=")]
    Assign,
    #[token("+=")]
    AddAssign,
    #[token("-=")]
    SubAssign,
    #[token("*=")]
    MulAssign,
    #[token("/=")]
    DivAssign,
    #[token("%=")]
    RemAssign,
    #[token(".=")]
    ConcatAssign,
    #[token("&=")]
    AndAssign,
    #[token("|=")]
    OrAssign,
    #[token("^=")]
    XorAssign,
    #[token("<<=")]
    ShlAssign,
    #[token(">>=")]
    ShrAssign,
    #[token("++")]
    Increment,
    #[token("--")]
    Decrement,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token(".")]
    Dot,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("!")]
    Bang,
    #[token("~=")]
    MatchOp,

    // Literals
    #[regex(r"[0-9]+[uUlL]*", parse_integer)]
    #[regex(r"0[xX][0-9a-fA-F]+[uUlL]*", parse_integer)]
    Integer(IntLiteral),

    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Real(f64),

    #[regex(r#""([^"\\]|\\.)*""#, unescape)]
    Str(String),

    #[regex(r"[A-Za-z_$][A-Za-z0-9_$]*", |lex| lex.slice().to_string())]
    Ident(String),
}

impl Token {
    /// Text shown in "expected ..." messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Integer(_) => "integer literal".to_string(),
            Token::Real(_) => "real literal".to_string(),
            Token::Str(_) => "string literal".to_string(),
            Token::Ident(name) => format!("identifier '{name}'"),
            other => format!("{other:?}"),
        }
    }
}

/// Maps byte offsets to 1-based line numbers.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(source.bytes().enumerate().filter(|(_, b)| *b == b'\n').map(|(i, _)| i + 1));
        LineIndex { line_starts }
    }

    pub fn line(&self, offset: usize) -> u32 {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        line as u32 + 1
    }
}

/// Token source for the compiler: yields one token at a time together with
/// its span and line.
pub struct Lexer<'src> {
    inner: logos::Lexer<'src, Token>,
    source: &'src str,
    lines: LineIndex,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    pub token: Token,
    pub span: Span,
    pub line: u32,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Lexer { inner: Token::lexer(source), source, lines: LineIndex::new(source) }
    }

    pub fn line_at(&self, offset: usize) -> u32 {
        self.lines.line(offset)
    }

    /// Line of the end of input, for "unexpected end of file" errors.
    pub fn last_line(&self) -> u32 {
        self.lines.line(self.source.len())
    }

    pub fn next_token(&mut self) -> Option<Result<Lexeme, LexError>> {
        let result = self.inner.next()?;
        let span = Span::from(self.inner.span());
        let line = self.lines.line(span.start);
        Some(match result {
            Ok(token) => Ok(Lexeme { token, span, line }),
            Err(()) => {
                let snippet = self.source[span.start..span.end].to_string();
                Err(LexError { position: span.start, line, suggestion: suggest_fix(&snippet), snippet })
            }
        })
    }
}

/// Lex the whole source at once.
pub fn lex(source: &str) -> Result<Vec<Lexeme>, LexError> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    while let Some(next) = lexer.next_token() {
        tokens.push(next?);
    }
    Ok(tokens)
}

fn suggest_fix(bad_token: &str) -> String {
    if bad_token.starts_with('"') {
        "String literal is not terminated, or contains an unknown escape sequence".to_string()
    } else if bad_token.starts_with(|c: char| c.is_ascii_digit()) {
        "Numeric literal is out of range or has an unknown suffix (use U, L or UL)".to_string()
    } else if bad_token.starts_with("/*") {
        "Block comment is not closed with */".to_string()
    } else {
        format!("Unexpected character(s): '{bad_token}'")
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Lex error in line {line}: '{snippet}'. {suggestion}")]
pub struct LexError {
    pub position: usize,
    pub line: u32,
    pub snippet: String,
    pub suggestion: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        lex(source).unwrap().into_iter().map(|l| l.token).collect()
    }

    #[test]
    fn lex_function_header() {
        assert_eq!(
            tokens("function add(a, b) { return a + b; }"),
            vec![
                Token::Function,
                Token::Ident("add".into()),
                Token::LParen,
                Token::Ident("a".into()),
                Token::Comma,
                Token::Ident("b".into()),
                Token::RParen,
                Token::LBrace,
                Token::Return,
                Token::Ident("a".into()),
                Token::Plus,
                Token::Ident("b".into()),
                Token::Semicolon,
                Token::RBrace,
            ]
        );
    }

    #[test]
    fn integer_widths() {
        assert_eq!(tokens("7"), vec![Token::Integer(IntLiteral::Int32(7))]);
        assert_eq!(tokens("7U"), vec![Token::Integer(IntLiteral::UInt32(7))]);
        assert_eq!(tokens("7L"), vec![Token::Integer(IntLiteral::Int64(7))]);
        assert_eq!(tokens("7UL"), vec![Token::Integer(IntLiteral::UInt64(7))]);
        assert_eq!(tokens("3000000000"), vec![Token::Integer(IntLiteral::Int64(3_000_000_000))]);
        assert_eq!(tokens("0xFF"), vec![Token::Integer(IntLiteral::Int32(255))]);
        assert_eq!(
            tokens("18446744073709551615"),
            vec![Token::Integer(IntLiteral::UInt64(u64::MAX))]
        );
    }

    #[test]
    fn reals_and_concat_dot() {
        assert_eq!(tokens("1.5"), vec![Token::Real(1.5)]);
        assert_eq!(tokens("2e3"), vec![Token::Real(2000.0)]);
        assert_eq!(
            tokens("a . \"x\""),
            vec![Token::Ident("a".into()), Token::Dot, Token::Str("x".into())]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(tokens(r#""a\tb\n\"q\"\x41\0""#), vec![Token::Str("a\tb\n\"q\"A\0".into())]);
    }

    #[test]
    fn comments_skipped() {
        assert_eq!(
            tokens("// line\nx /* block\n comment */ y"),
            vec![Token::Ident("x".into()), Token::Ident("y".into())]
        );
    }

    #[test]
    fn dollar_identifiers_and_keywords() {
        assert_eq!(
            tokens("$1 $errorcode likes like"),
            vec![
                Token::Ident("$1".into()),
                Token::Ident("$errorcode".into()),
                Token::Ident("likes".into()),
                Token::Like,
            ]
        );
    }

    #[test]
    fn multi_char_operators() {
        assert_eq!(
            tokens("a?->b ?-> :: ... .. <<= ~= %{"),
            vec![
                Token::Ident("a".into()),
                Token::SafeArrow,
                Token::Ident("b".into()),
                Token::SafeArrow,
                Token::DoubleColon,
                Token::Ellipsis,
                Token::DotDot,
                Token::ShlAssign,
                Token::MatchOp,
                Token::MapOpen,
            ]
        );
    }

    #[test]
    fn line_numbers() {
        let lexemes = lex("a\n\nb").unwrap();
        assert_eq!(lexemes[0].line, 1);
        assert_eq!(lexemes[1].line, 3);
    }

    #[test]
    fn lex_error_has_suggestion() {
        let err = lex("x = @;").unwrap_err();
        assert_eq!(err.snippet, "@");
        assert_eq!(err.line, 1);
        assert!(err.suggestion.contains("Unexpected"));
    }

    #[test]
    fn bad_escape_is_error() {
        assert!(lex(r#""\q""#).is_err());
    }
}
