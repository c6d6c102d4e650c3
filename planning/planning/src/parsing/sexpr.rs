//! Located S-expression reader for PDDL inputs.
//!
//! Symbols are lowercased on read (PDDL is case-insensitive) but every atom
//! and list keeps the span it was read from, so that any later stage can
//! report an error with the offending line underlined.

use std::fmt::{Debug, Display, Error, Formatter};
use std::path::Path;
use std::sync::Arc;

/// A source text, either read from a file or given as a string (tests).
pub struct Input {
    pub text: String,
    pub source: Option<String>,
}

impl Input {
    pub fn from_string(input: impl Into<String>) -> Input {
        Input {
            text: input.into(),
            source: None,
        }
    }

    pub fn from_file(file: &Path) -> std::result::Result<Input, std::io::Error> {
        let text = std::fs::read_to_string(file)?;
        Ok(Input {
            text,
            source: Some(file.display().to_string()),
        })
    }

    /// The line of text containing the given position, with a `^^^` underline.
    fn underlined(&self, span: Span) -> String {
        let Some(line) = self.text.lines().nth(span.start.line as usize) else {
            return String::new();
        };
        let width = if span.start.line != span.end.line {
            line.len().saturating_sub(span.start.column as usize)
        } else {
            (span.end.column - span.start.column + 1) as usize
        };
        format!(
            "{}\n{}{}",
            line,
            " ".repeat(span.start.column as usize),
            "^".repeat(width.max(1))
        )
    }
}

/// Position of a single character in an input (zero-based).
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

/// Part of an input, start and end positions both inclusive.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq)]
pub struct Span {
    pub start: Pos,
    pub end: Pos,
}

impl Span {
    pub fn new(start: Pos, end: Pos) -> Span {
        Span { start, end }
    }
    pub fn point(p: Pos) -> Span {
        Span { start: p, end: p }
    }
}

/// An error attached to a place in the source text.
#[derive(Clone)]
pub struct ErrLoc {
    source: Arc<Input>,
    span: Span,
    msg: String,
}

impl ErrLoc {
    pub fn line(&self) -> u32 {
        self.span.start.line + 1
    }
}

impl Display for ErrLoc {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        let file = self.source.source.as_deref().unwrap_or("<input>");
        writeln!(
            f,
            "{}:{}:{}: {}",
            file,
            self.span.start.line + 1,
            self.span.start.column + 1,
            self.msg
        )?;
        write!(f, "{}", self.source.underlined(self.span))
    }
}

impl Debug for ErrLoc {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{self}")
    }
}

impl std::error::Error for ErrLoc {}

/// A lowercased symbol together with its location.
#[derive(Clone)]
pub struct Sym {
    text: String,
    span: Span,
    source: Arc<Input>,
}

impl Sym {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn invalid(&self, msg: impl Into<String>) -> ErrLoc {
        ErrLoc {
            source: self.source.clone(),
            span: self.span,
            msg: msg.into(),
        }
    }
}

impl PartialEq for Sym {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl PartialEq<str> for Sym {
    fn eq(&self, other: &str) -> bool {
        self.text == other
    }
}

impl Display for Sym {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", self.text)
    }
}

impl Debug for Sym {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", self.text)
    }
}

#[derive(Clone)]
pub struct SList {
    elems: Vec<SExpr>,
    span: Span,
    source: Arc<Input>,
}

impl SList {
    pub fn iter(&self) -> ListIter<'_> {
        ListIter {
            elems: self.elems.as_slice(),
            span: self.span,
            source: self.source.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn invalid(&self, msg: impl Into<String>) -> ErrLoc {
        ErrLoc {
            source: self.source.clone(),
            span: self.span,
            msg: msg.into(),
        }
    }
}

impl std::ops::Index<usize> for SList {
    type Output = SExpr;
    fn index(&self, index: usize) -> &SExpr {
        &self.elems[index]
    }
}

#[derive(Clone)]
pub enum SExpr {
    Atom(Sym),
    List(SList),
}

impl SExpr {
    pub fn span(&self) -> Span {
        match self {
            SExpr::Atom(a) => a.span,
            SExpr::List(l) => l.span,
        }
    }

    pub fn invalid(&self, msg: impl Into<String>) -> ErrLoc {
        match self {
            SExpr::Atom(a) => a.invalid(msg),
            SExpr::List(l) => l.invalid(msg),
        }
    }

    pub fn as_atom(&self) -> Option<&Sym> {
        match self {
            SExpr::Atom(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&SList> {
        match self {
            SExpr::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_list_iter(&self) -> Option<ListIter<'_>> {
        self.as_list().map(|l| l.iter())
    }

    pub fn is_atom(&self, expected: &str) -> bool {
        self.as_atom().map(|a| a.as_str() == expected).unwrap_or(false)
    }

    /// If this expression is the application `(head args...)`, returns the args.
    pub fn as_application(&self, head: &str) -> Option<&[SExpr]> {
        match self {
            SExpr::Atom(_) => None,
            SExpr::List(l) => match l.elems.as_slice() {
                [SExpr::Atom(h), rest @ ..] if h.as_str() == head => Some(rest),
                _ => None,
            },
        }
    }
}

impl Display for SExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        match self {
            SExpr::Atom(a) => write!(f, "{a}"),
            SExpr::List(l) => {
                write!(f, "(")?;
                for (i, e) in l.elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// A cursor over the elements of a list, consumed front to back.
pub struct ListIter<'a> {
    elems: &'a [SExpr],
    span: Span,
    source: Arc<Input>,
}

impl<'a> ListIter<'a> {
    pub fn peek(&self) -> Option<&'a SExpr> {
        self.elems.first()
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn invalid(&self, msg: impl Into<String>) -> ErrLoc {
        ErrLoc {
            source: self.source.clone(),
            span: self.span,
            msg: msg.into(),
        }
    }

    pub fn pop(&mut self) -> Result<&'a SExpr, ErrLoc> {
        self.next()
            .ok_or_else(|| self.end_of_list("unexpected end of list"))
    }

    pub fn pop_atom(&mut self) -> Result<&'a Sym, ErrLoc> {
        let e = self.pop()?;
        e.as_atom().ok_or_else(|| e.invalid("expected an atom"))
    }

    pub fn pop_list(&mut self) -> Result<&'a SList, ErrLoc> {
        let e = self.pop()?;
        e.as_list().ok_or_else(|| e.invalid("expected a list"))
    }

    /// Consumes the next element, which must be the given keyword.
    pub fn pop_known_atom(&mut self, expected: &str) -> Result<(), ErrLoc> {
        let a = self.pop_atom()?;
        if a.as_str() == expected {
            Ok(())
        } else {
            Err(a.invalid(format!("expected `{expected}`")))
        }
    }

    fn end_of_list(&self, msg: &str) -> ErrLoc {
        ErrLoc {
            source: self.source.clone(),
            span: Span::point(self.span.end),
            msg: msg.to_string(),
        }
    }
}

impl<'a> Iterator for ListIter<'a> {
    type Item = &'a SExpr;
    fn next(&mut self) -> Option<&'a SExpr> {
        match self.elems.split_first() {
            Some((head, tail)) => {
                self.elems = tail;
                Some(head)
            }
            None => None,
        }
    }
}

enum Token {
    LParen(Pos),
    RParen(Pos),
    Atom(String, Span),
}

fn tokenize(source: &Arc<Input>) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut line = 0u32;
    let mut column = 0u32;
    let mut atom: Option<(String, Pos)> = None;
    let mut in_comment = false;

    let mut close_atom = |atom: &mut Option<(String, Pos)>, end: Pos, out: &mut Vec<Token>| {
        if let Some((text, start)) = atom.take() {
            out.push(Token::Atom(text, Span::new(start, end)));
        }
    };

    let mut prev: Pos = Pos { line: 0, column: 0 };
    for c in source.text.chars() {
        let here = Pos { line, column };
        if c == '\n' {
            close_atom(&mut atom, prev, &mut tokens);
            in_comment = false;
            line += 1;
            column = 0;
            continue;
        }
        if !in_comment {
            match c {
                ';' => {
                    close_atom(&mut atom, prev, &mut tokens);
                    in_comment = true;
                }
                '(' => {
                    close_atom(&mut atom, prev, &mut tokens);
                    tokens.push(Token::LParen(here));
                }
                ')' => {
                    close_atom(&mut atom, prev, &mut tokens);
                    tokens.push(Token::RParen(here));
                }
                _ if c.is_whitespace() => close_atom(&mut atom, prev, &mut tokens),
                _ => match &mut atom {
                    Some((text, _)) => text.extend(c.to_lowercase()),
                    None => atom = Some((c.to_lowercase().collect(), here)),
                },
            }
        }
        prev = here;
        column += 1;
    }
    close_atom(&mut atom, prev, &mut tokens);
    tokens
}

/// Parses the first S-expression of the input.
pub fn parse(input: impl Into<Input>) -> Result<SExpr, ErrLoc> {
    let source = Arc::new(input.into());
    let tokens = tokenize(&source);
    let mut rest = tokens.as_slice();
    let e = read(&mut rest, &source)?;
    Ok(e)
}

fn read(tokens: &mut &[Token], source: &Arc<Input>) -> Result<SExpr, ErrLoc> {
    let eof = || ErrLoc {
        source: source.clone(),
        span: Span::point(Pos { line: 0, column: 0 }),
        msg: "unexpected end of input".to_string(),
    };
    let (token, rest) = tokens.split_first().ok_or_else(eof)?;
    *tokens = rest;
    match token {
        Token::Atom(text, span) => Ok(SExpr::Atom(Sym {
            text: text.clone(),
            span: *span,
            source: source.clone(),
        })),
        Token::LParen(start) => {
            let mut elems = Vec::new();
            loop {
                match tokens.first() {
                    Some(Token::RParen(end)) => {
                        *tokens = &tokens[1..];
                        return Ok(SExpr::List(SList {
                            elems,
                            span: Span::new(*start, *end),
                            source: source.clone(),
                        }));
                    }
                    Some(_) => elems.push(read(tokens, source)?),
                    None => return Err(eof()),
                }
            }
        }
        Token::RParen(p) => Err(ErrLoc {
            source: source.clone(),
            span: Span::point(*p),
            msg: "unexpected closing parenthesis".to_string(),
        }),
    }
}

impl From<&str> for Input {
    fn from(s: &str) -> Self {
        Input::from_string(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formats_as(input: &str, output: &str) {
        let res = parse(input).unwrap();
        assert_eq!(&format!("{res}"), output);
    }

    #[test]
    fn parsing() {
        formats_as("aa", "aa");
        formats_as(" aa ", "aa");
        formats_as("(a b)", "(a b)");
        formats_as("(A b)", "(a b)");
        formats_as("(a (b c) d)", "(a (b c) d)");
        formats_as(" ( a  ( b ; comment (x y\n c )   d )", "(a (b c) d)");
    }

    #[test]
    fn spans_track_lines() {
        let e = parse("(a\n  (b c))").unwrap();
        let l = e.as_list().unwrap();
        let inner = l[1].as_list().unwrap();
        assert_eq!(inner.span.start.line, 1);
        let err = inner.invalid("boom");
        assert_eq!(err.line(), 2);
        assert!(format!("{err}").contains("^"));
    }

    #[test]
    fn iter_helpers() {
        let e = parse("(define (domain d))").unwrap();
        let mut it = e.as_list_iter().unwrap();
        it.pop_known_atom("define").unwrap();
        let mut inner = it.pop_list().unwrap().iter();
        inner.pop_known_atom("domain").unwrap();
        assert_eq!(inner.pop_atom().unwrap().as_str(), "d");
        assert!(inner.pop().is_err());
    }
}
