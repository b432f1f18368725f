//! Reader for the yacc-like grammar notation.
//!
//! A grammar is a sequence of blocks separated by blank lines, one production
//! per block:
//!
//! ```text
//! # comment lines are ignored
//! expr %loop(2): expr '+' expr
//!     | 'n' %weight(3)
//!     ;
//!
//! opt_temporary: %empty | 'TEMPORARY'
//! ```
//!
//! Quoted tokens (`'…'` or `"…"`) are terminals and `''` is epsilon; every
//! other bare token names a production. `%loop(N)` may follow the head and
//! bounds how often the production may be entered along one expansion path.
//! `%weight(W)` may appear once anywhere inside an alternative. `%empty` is
//! an explicit empty alternative. The trailing `;` is optional.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::info;

use crate::grammar::{Alternative, Production, Symbol};
use crate::utils::{ParseError, ParseErrorKind, Result};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Literal(String),
    Annotation(String),
    Colon,
    Bar,
    Semicolon,
}

impl Token {
    fn text(&self) -> String {
        match self {
            Token::Word(word) | Token::Annotation(word) => word.clone(),
            Token::Literal(text) => format!("'{}'", text),
            Token::Colon => ":".to_string(),
            Token::Bar => "|".to_string(),
            Token::Semicolon => ";".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Annotation {
    Loop(usize),
    Weight(u32),
    Empty,
}

impl Annotation {
    fn name(&self) -> &'static str {
        match self {
            Annotation::Loop(_) => "loop",
            Annotation::Weight(_) => "weight",
            Annotation::Empty => "empty",
        }
    }
}

/// A run of non-blank lines
#[derive(Debug)]
struct Block {
    line: usize,
    text: String,
}

/// Parse grammar text into productions, in declaration order.
///
/// Productions are not merged or validated here; hand the result to
/// [`crate::GrammarBuilder`] or [`crate::build_registry`].
pub fn parse(text: &str) -> std::result::Result<Vec<Production>, ParseError> {
    split_blocks(text)
        .into_iter()
        .enumerate()
        .map(|(block, Block { line, text })| {
            tokenize(&text)
                .and_then(parse_production)
                .map_err(|kind| ParseError { block, line, kind })
        })
        .collect()
}

/// Parse a grammar file
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Vec<Production>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let productions = parse(&text)?;
    info!("parsed {} productions from {}", productions.len(), path.display());
    Ok(productions)
}

/// Parse several grammar files and concatenate their productions, so that
/// later fragments can extend heads declared by earlier ones
pub fn parse_files<I, P>(paths: I) -> Result<Vec<Production>>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut productions = Vec::new();
    for path in paths {
        productions.extend(parse_file(path)?);
    }
    Ok(productions)
}

fn split_blocks(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut current: Option<Block> = None;

    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            blocks.extend(current.take());
            continue;
        }
        if trimmed.starts_with('#') {
            continue;
        }
        let block = current.get_or_insert_with(|| Block {
            line: idx + 1,
            text: String::new(),
        });
        block.text.push_str(line);
        block.text.push('\n');
    }
    blocks.extend(current);
    blocks
}

fn tokenize(block: &str) -> std::result::Result<Vec<Token>, ParseErrorKind> {
    let mut tokens = Vec::new();
    let mut chars = block.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            ':' | '|' | ';' => {
                chars.next();
                tokens.push(match c {
                    ':' => Token::Colon,
                    '|' => Token::Bar,
                    _ => Token::Semicolon,
                });
            }
            '\'' | '"' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, c2)) = chars.next() {
                    if c2 == c {
                        closed = true;
                        break;
                    }
                    if c2 != '\\' {
                        text.push(c2);
                        continue;
                    }
                    match chars.next() {
                        Some((_, escaped @ ('\'' | '"' | '\\'))) => text.push(escaped),
                        Some((_, other)) => {
                            text.push('\\');
                            text.push(other);
                        }
                        None => break,
                    }
                }
                if !closed {
                    let snippet: String = block[start..].chars().take(16).collect();
                    return Err(ParseErrorKind::UnterminatedLiteral(snippet));
                }
                tokens.push(Token::Literal(text));
            }
            _ => {
                let mut end = block.len();
                while let Some(&(pos, c2)) = chars.peek() {
                    if c2.is_whitespace() || matches!(c2, ':' | '|' | ';' | '\'' | '"') {
                        end = pos;
                        break;
                    }
                    chars.next();
                }
                let word = block[start..end].to_string();
                tokens.push(if word.starts_with('%') {
                    Token::Annotation(word)
                } else {
                    Token::Word(word)
                });
            }
        }
    }
    Ok(tokens)
}

fn annotation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^%([A-Za-z_]+)(?:\(\s*(\d+)\s*\))?$").expect("valid regex"))
}

fn parse_annotation(token: &str) -> std::result::Result<Annotation, ParseErrorKind> {
    let malformed = || ParseErrorKind::MalformedAnnotation(token.to_string());
    let captures = annotation_regex().captures(token).ok_or_else(malformed)?;
    let name = &captures[1];
    let argument = captures.get(2).map(|m| m.as_str());

    match (name, argument) {
        ("loop", Some(n)) => n.parse().map(Annotation::Loop).map_err(|_| malformed()),
        ("weight", Some(w)) => w.parse().map(Annotation::Weight).map_err(|_| malformed()),
        ("empty", None) => Ok(Annotation::Empty),
        ("loop" | "weight" | "empty", _) => Err(malformed()),
        (other, _) => Err(ParseErrorKind::UnknownAnnotation(other.to_string())),
    }
}

#[derive(Default)]
struct PendingAlternative {
    symbols: Vec<Symbol>,
    weight: Option<u32>,
    explicit_empty: bool,
}

impl PendingAlternative {
    fn finish(self, index: usize) -> std::result::Result<Alternative, ParseErrorKind> {
        if self.symbols.is_empty() && !self.explicit_empty {
            return Err(ParseErrorKind::EmptyAlternative(index));
        }
        Ok(Alternative::new(self.symbols).with_weight(self.weight.unwrap_or(1)))
    }
}

fn parse_production(tokens: Vec<Token>) -> std::result::Result<Production, ParseErrorKind> {
    let mut tokens = tokens.into_iter();

    let mut production = match tokens.next() {
        Some(Token::Word(head)) => Production::new(&head),
        _ => return Err(ParseErrorKind::MissingHead),
    };

    loop {
        match tokens.next() {
            Some(Token::Colon) => break,
            Some(Token::Annotation(text)) => match parse_annotation(&text)? {
                Annotation::Loop(_) if production.loop_bound.is_some() => {
                    return Err(ParseErrorKind::DuplicateAnnotation("loop".to_string()));
                }
                Annotation::Loop(bound) => production.loop_bound = Some(bound),
                other => return Err(ParseErrorKind::MisplacedAnnotation(other.name().to_string())),
            },
            _ => return Err(ParseErrorKind::MissingColon),
        }
    }

    let mut pending = PendingAlternative::default();
    let mut terminated = false;
    for token in tokens.by_ref() {
        match token {
            Token::Word(name) => pending.symbols.push(Symbol::NonTerminal(name)),
            Token::Literal(text) => pending.symbols.push(Symbol::Terminal(text)),
            Token::Annotation(text) => match parse_annotation(&text)? {
                Annotation::Weight(_) if pending.weight.is_some() => {
                    return Err(ParseErrorKind::DuplicateAnnotation("weight".to_string()));
                }
                Annotation::Weight(weight) => pending.weight = Some(weight),
                Annotation::Empty => pending.explicit_empty = true,
                other => return Err(ParseErrorKind::MisplacedAnnotation(other.name().to_string())),
            },
            Token::Bar => {
                let index = production.alternatives.len();
                let finished = std::mem::take(&mut pending).finish(index)?;
                production.alternatives.push(finished);
            }
            Token::Semicolon => {
                terminated = true;
                break;
            }
            Token::Colon => return Err(ParseErrorKind::UnexpectedToken(":".to_string())),
        }
    }

    if terminated {
        if let Some(extra) = tokens.next() {
            return Err(ParseErrorKind::TrailingInput(extra.text()));
        }
    }
    let index = production.alternatives.len();
    production.alternatives.push(pending.finish(index)?);
    Ok(production)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarBuilder;
    use pretty_assertions::assert_eq;

    fn terminal(text: &str) -> Symbol {
        Symbol::Terminal(text.to_string())
    }

    fn non_terminal(name: &str) -> Symbol {
        Symbol::NonTerminal(name.to_string())
    }

    fn kind_of(text: &str) -> ParseErrorKind {
        parse(text).unwrap_err().kind
    }

    #[test]
    fn test_parse_single_production() {
        let productions = parse("start: 'A' x | 'B' y ;").unwrap();

        assert_eq!(productions.len(), 1);
        let start = &productions[0];
        assert_eq!(start.name, "start");
        assert_eq!(start.loop_bound, None);
        assert_eq!(
            start.alternatives,
            vec![
                Alternative::new(vec![terminal("A"), non_terminal("x")]),
                Alternative::new(vec![terminal("B"), non_terminal("y")]),
            ]
        );
    }

    #[test]
    fn test_parse_blocks_and_comments() {
        let text = r#"
# Test comment
deallocate_or_drop: DEALLOCATE_SYM
# another comment inside the block
| DROP

prepare: "PREPARE" ident FROM prepare_src
"#;
        let productions = parse(text).unwrap();

        assert_eq!(productions.len(), 2);
        assert_eq!(productions[0].name, "deallocate_or_drop");
        assert_eq!(productions[0].alternatives.len(), 2);
        assert_eq!(productions[1].name, "prepare");
        assert_eq!(
            productions[1].alternatives[0].symbols,
            vec![
                terminal("PREPARE"),
                non_terminal("ident"),
                non_terminal("FROM"),
                non_terminal("prepare_src"),
            ]
        );
    }

    #[test]
    fn test_parse_annotations() {
        let text = "expr %loop(2): expr '+' expr %weight(1)\n    | 'n' %weight(3)\n    | %empty %weight(0)\n    ;";
        let productions = parse(text).unwrap();
        let expr = &productions[0];

        assert_eq!(expr.loop_bound, Some(2));
        let weights: Vec<u32> = expr.alternatives.iter().map(|a| a.weight).collect();
        assert_eq!(weights, vec![1, 3, 0]);
        assert!(expr.alternatives[2].symbols.is_empty());
    }

    #[test]
    fn test_parse_punctuation_without_spaces() {
        let productions = parse("a:'x'b|c;").unwrap();
        assert_eq!(
            productions[0].alternatives,
            vec![
                Alternative::new(vec![terminal("x"), non_terminal("b")]),
                Alternative::new(vec![non_terminal("c")]),
            ]
        );
    }

    #[test]
    fn test_parse_literals() {
        let productions = parse(r#"lit: '' 'it\'s' "a|b;c" '\n' '\\'"#).unwrap();
        assert_eq!(
            productions[0].alternatives[0].symbols,
            vec![
                terminal(""),
                terminal("it's"),
                terminal("a|b;c"),
                terminal("\\n"),
                terminal("\\"),
            ]
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(kind_of(": 'x'"), ParseErrorKind::MissingHead);
        assert_eq!(kind_of("'a': 'x'"), ParseErrorKind::MissingHead);
        assert_eq!(kind_of("a 'x'"), ParseErrorKind::MissingColon);
        assert_eq!(kind_of("a"), ParseErrorKind::MissingColon);
        assert_eq!(kind_of("a: 'x' |"), ParseErrorKind::EmptyAlternative(1));
        assert_eq!(kind_of("a: | 'x'"), ParseErrorKind::EmptyAlternative(0));
        assert_eq!(kind_of("a: 'x' %weight(2) |"), ParseErrorKind::EmptyAlternative(1));
        assert_eq!(
            kind_of("a: 'unterminated"),
            ParseErrorKind::UnterminatedLiteral("'unterminated\n".to_string())
        );
        assert_eq!(kind_of("a: 'x' %prec"), ParseErrorKind::UnknownAnnotation("prec".to_string()));
        assert_eq!(
            kind_of("a: 'x' %weight(x)"),
            ParseErrorKind::MalformedAnnotation("%weight(x)".to_string())
        );
        assert_eq!(
            kind_of("a %loop: 'x'"),
            ParseErrorKind::MalformedAnnotation("%loop".to_string())
        );
        assert_eq!(
            kind_of("a %weight(2): 'x'"),
            ParseErrorKind::MisplacedAnnotation("weight".to_string())
        );
        assert_eq!(
            kind_of("a: 'x' %loop(2)"),
            ParseErrorKind::MisplacedAnnotation("loop".to_string())
        );
        assert_eq!(
            kind_of("a %loop(1) %loop(2): 'x'"),
            ParseErrorKind::DuplicateAnnotation("loop".to_string())
        );
        assert_eq!(
            kind_of("a: 'x' %weight(1) %weight(2)"),
            ParseErrorKind::DuplicateAnnotation("weight".to_string())
        );
        assert_eq!(kind_of("a: 'x' ; b"), ParseErrorKind::TrailingInput("b".to_string()));
        assert_eq!(kind_of("a: 'x' : b"), ParseErrorKind::UnexpectedToken(":".to_string()));
    }

    #[test]
    fn test_parse_error_locates_block() {
        let err = parse("a: 'x'\n\n\n# note\nb: %bogus\n").unwrap_err();
        assert_eq!(err.block, 1);
        assert_eq!(err.line, 5);
    }

    #[test]
    fn test_display_round_trip() {
        let text = "expr %loop(2): expr '+' expr | 'it\\'s' %weight(3) | %empty\n\nstart: expr";
        let registry = GrammarBuilder::new().productions(parse(text).unwrap()).build().unwrap();

        let reparsed = GrammarBuilder::new()
            .productions(parse(&registry.to_string()).unwrap())
            .build()
            .unwrap();

        let before: Vec<&Production> = registry.iter().collect();
        let after: Vec<&Production> = reparsed.iter().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_parse_files_merges_fragments() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.y");
        let custom = dir.path().join("custom.y");
        fs::write(&base, "stmt: 'SELECT' expr\n\nexpr: 'x'\n").unwrap();
        fs::write(&custom, "expr: 'y' | 'z'\n").unwrap();

        let productions = parse_files([&base, &custom]).unwrap();
        assert_eq!(productions.len(), 3);

        let registry = GrammarBuilder::new().productions(productions).build().unwrap();
        assert_eq!(registry.get("expr").unwrap().alternatives.len(), 3);
    }

    #[test]
    fn test_parse_file_missing() {
        let err = parse_file("/definitely/not/here.y").unwrap_err();
        assert!(matches!(err, crate::utils::GrammarError::Io(_)));
    }
}
