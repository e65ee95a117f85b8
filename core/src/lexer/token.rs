use core::fmt;

use logos::Logos;

/// Errors produced while recognizing a single token.
#[derive(Debug, Clone, PartialEq, Default, thiserror::Error)]
pub enum LexError {
    /// Raw logos failure; [`super::Lexer`] rewrites it to `InvalidCharacter`.
    #[default]
    #[error("unrecognized input")]
    Unrecognized,
    #[error("invalid character '{0}'")]
    InvalidCharacter(char),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("invalid escape sequence '\\{0}'")]
    InvalidEscape(char),
    #[error("integer literal does not fit in 64 bits")]
    IntegerOverflow,
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(error = LexError)]
#[logos(skip r"([ \t\r\n\x0C]+|//[^\n]*)")]
pub enum Token {
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_owned())]
    Ident(String),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().map_err(|_| LexError::IntegerOverflow))]
    Int(i64),

    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().map_err(|_| LexError::Unrecognized))]
    Float(f64),

    #[regex(r#""([^"\\\n]|\\.)*"?"#, lex_string)]
    Str(String),

    // Keywords
    #[token("break")]
    Break,
    #[token("do")]
    Do,
    #[token("else")]
    Else,
    #[token("extern")]
    Extern,
    #[token("export")]
    Export,
    #[token("false")]
    False,
    #[token("fn")]
    Fn,
    #[token("for")]
    For,
    #[token("if")]
    If,
    #[token("import")]
    Import,
    #[token("in")]
    In,
    #[token("let")]
    Let,
    #[token("loop")]
    Loop,
    #[token("match")]
    Match,
    #[token("return")]
    Return,
    #[token("struct")]
    Struct,
    #[token("true")]
    True,
    #[token("type")]
    Type,
    #[token("until")]
    Until,
    #[token("while")]
    While,

    // Arithmetic
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
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,

    // Logical and bitwise
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("~")]
    Tilde,
    #[token("^")]
    Caret,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("#")]
    Hash,

    // Comparison
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

    // Assignment
    #[token("=")]
    Assign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("%=")]
    PercentAssign,

    // Delimiters
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
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("..")]
    DotDot,
    #[token("...")]
    Ellipsis,
}

/// Decodes a string literal, opening quote included in the slice.
///
/// The regex accepts a missing closing quote so that the error can be
/// reported as an unterminated string rather than an invalid character.
fn lex_string(lex: &mut logos::Lexer<'_, Token>) -> Result<String, LexError> {
    let body = &lex.slice()[1..];
    let mut value = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Ok(value),
            '\\' => value.push(match chars.next() {
                Some('n') => '\n',
                Some('r') => '\r',
                Some('t') => '\t',
                Some('v') => '\x0B',
                Some('\\') => '\\',
                Some('"') => '"',
                Some(other) => return Err(LexError::InvalidEscape(other)),
                None => return Err(LexError::UnterminatedString),
            }),
            c => value.push(c),
        }
    }
    Err(LexError::UnterminatedString)
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Token::Ident(name) => return write!(f, "identifier `{}`", name),
            Token::Int(value) => return write!(f, "integer `{}`", value),
            Token::Float(value) => return write!(f, "float `{}`", value),
            Token::Str(_) => "string literal",
            Token::Break => "break",
            Token::Do => "do",
            Token::Else => "else",
            Token::Extern => "extern",
            Token::Export => "export",
            Token::False => "false",
            Token::Fn => "fn",
            Token::For => "for",
            Token::If => "if",
            Token::Import => "import",
            Token::In => "in",
            Token::Let => "let",
            Token::Loop => "loop",
            Token::Match => "match",
            Token::Return => "return",
            Token::Struct => "struct",
            Token::True => "true",
            Token::Type => "type",
            Token::Until => "until",
            Token::While => "while",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::PlusPlus => "++",
            Token::MinusMinus => "--",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Bang => "!",
            Token::Amp => "&",
            Token::Pipe => "|",
            Token::Tilde => "~",
            Token::Caret => "^",
            Token::Shl => "<<",
            Token::Shr => ">>",
            Token::Hash => "#",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Lt => "<",
            Token::Le => "<=",
            Token::Gt => ">",
            Token::Ge => ">=",
            Token::Assign => "=",
            Token::PlusAssign => "+=",
            Token::MinusAssign => "-=",
            Token::StarAssign => "*=",
            Token::SlashAssign => "/=",
            Token::PercentAssign => "%=",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Semicolon => ";",
            Token::Colon => ":",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::DotDot => "..",
            Token::Ellipsis => "...",
        };
        write!(f, "`{}`", text)
    }
}
