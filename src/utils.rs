use std::fmt;
use std::io;
use thiserror::Error;

/// Custom error types for the grammar generator
#[derive(Error, Debug)]
pub enum GrammarError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Unresolved symbol: `{symbol}` is referenced by `{referrer}` but never defined")]
    UnresolvedSymbol { symbol: String, referrer: String },

    #[error("Unknown non-terminal: {0}")]
    UnknownNonTerminal(String),

    #[error("Production `{0}` has no alternatives")]
    NoAlternatives(String),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Grammar validation failed: {0}")]
    ValidationFailed(String),
}

/// Result type for grammar operations
pub type Result<T> = std::result::Result<T, GrammarError>;

/// A malformed production block in grammar text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("block {block} (line {line}): {kind}")]
pub struct ParseError {
    /// Zero-based index of the offending block
    pub block: usize,
    /// One-based line number where the block starts
    pub line: usize,
    pub kind: ParseErrorKind,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("block does not start with a production name")]
    MissingHead,

    #[error("expected `:` after the production name")]
    MissingColon,

    #[error("alternative {0} has no items (use '' or %empty for epsilon)")]
    EmptyAlternative(usize),

    #[error("unterminated quoted literal starting with {0}")]
    UnterminatedLiteral(String),

    #[error("unknown annotation `%{0}`")]
    UnknownAnnotation(String),

    #[error("malformed annotation `{0}`")]
    MalformedAnnotation(String),

    #[error("annotation `%{0}` is not allowed here")]
    MisplacedAnnotation(String),

    #[error("annotation `%{0}` given more than once")]
    DuplicateAnnotation(String),

    #[error("unexpected `{0}` after the terminating `;`")]
    TrailingInput(String),

    #[error("unexpected `{0}` inside an alternative")]
    UnexpectedToken(String),
}

/// External check applied to generated text, e.g. an independent SQL parser.
///
/// The generator only guarantees grammar-structural validity; a validator is
/// how callers split a batch into outputs a real engine accepts and outputs
/// it rejects.
pub trait OutputValidator: Send + Sync {
    /// Accept the text, or reject it with a reason
    fn check(&self, text: &str) -> std::result::Result<(), String>;

    /// Get the name of this validator
    fn name(&self) -> &str {
        "validator"
    }
}

impl<F> OutputValidator for F
where
    F: Fn(&str) -> std::result::Result<(), String> + Send + Sync,
{
    fn check(&self, text: &str) -> std::result::Result<(), String> {
        self(text)
    }

    fn name(&self) -> &str {
        "fn"
    }
}

impl fmt::Debug for dyn OutputValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputValidator({})", self.name())
    }
}

/// Trait for creating validator chains
pub trait ValidatorExt: OutputValidator + Sized {
    /// Chain this validator with another one
    fn chain<V: OutputValidator + 'static>(self, other: V) -> ValidatorChain
    where
        Self: 'static,
    {
        ValidatorChain::new(Box::new(self), Box::new(other))
    }
}

impl<T: OutputValidator + 'static> ValidatorExt for T {}

/// A chain of validators; text is valid only if every member accepts it
pub struct ValidatorChain {
    validators: Vec<Box<dyn OutputValidator>>,
    name: String,
}

impl ValidatorChain {
    /// Create a new validator chain from two validators
    pub fn new(first: Box<dyn OutputValidator>, second: Box<dyn OutputValidator>) -> Self {
        let name = format!("{}+{}", first.name(), second.name());
        ValidatorChain {
            validators: vec![first, second],
            name,
        }
    }

    /// Add another validator to the chain
    pub fn add<V: OutputValidator + 'static>(mut self, validator: V) -> Self {
        self.name = format!("{}+{}", self.name, validator.name());
        self.validators.push(Box::new(validator));
        self
    }
}

impl OutputValidator for ValidatorChain {
    fn check(&self, text: &str) -> std::result::Result<(), String> {
        for validator in &self.validators {
            validator
                .check(text)
                .map_err(|reason| format!("{}: {}", validator.name(), reason))?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Accepts everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl OutputValidator for AcceptAll {
    fn check(&self, _text: &str) -> std::result::Result<(), String> {
        Ok(())
    }

    fn name(&self) -> &str {
        "accept_all"
    }
}

/// Rejects text whose parentheses do not balance. Quoted sections are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalancedParens;

impl OutputValidator for BalancedParens {
    fn check(&self, text: &str) -> std::result::Result<(), String> {
        let mut depth: usize = 0;
        let mut quote: Option<char> = None;
        for (pos, c) in text.char_indices() {
            match (quote, c) {
                (Some(q), c) if c == q => quote = None,
                (Some(_), _) => {}
                (None, '\'' | '"' | '`') => quote = Some(c),
                (None, '(') => depth += 1,
                (None, ')') => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| format!("unmatched `)` at byte {}", pos))?;
                }
                _ => {}
            }
        }
        if let Some(q) = quote {
            return Err(format!("unterminated {} quote", q));
        }
        if depth != 0 {
            return Err(format!("{} unclosed `(`", depth));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "balanced_parens"
    }
}

/// Outputs of a batch, split by a validator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    pub valid: Vec<String>,
    /// Rejected text together with the validator's reason
    pub invalid: Vec<(String, String)>,
}

/// Split generated outputs into those the validator accepts and those it rejects
pub fn partition<I>(outputs: I, validator: &dyn OutputValidator) -> Partition
where
    I: IntoIterator<Item = String>,
{
    let mut result = Partition::default();
    for text in outputs {
        match validator.check(&text) {
            Ok(()) => result.valid.push(text),
            Err(reason) => result.invalid.push((text, reason)),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_parens() {
        let validator = BalancedParens;

        assert!(validator.check("CREATE TABLE t (a int, b int)").is_ok());
        assert!(validator.check("SELECT ')' FROM t").is_ok());
        assert!(validator.check("CREATE TABLE t (a int").is_err());
        assert!(validator.check("SELECT 1)").is_err());
        assert!(validator.check("SELECT 'abc").is_err());
    }

    #[test]
    fn test_validator_chain() {
        let no_drop = |text: &str| {
            if text.contains("DROP") {
                Err("drop is not allowed".to_string())
            } else {
                Ok(())
            }
        };
        let chain = BalancedParens.chain(no_drop).add(AcceptAll);

        assert_eq!(chain.name(), "balanced_parens+fn+accept_all");
        assert!(chain.check("CREATE TABLE t (a int)").is_ok());

        let err = chain.check("DROP TABLE t").unwrap_err();
        assert!(err.starts_with("fn:"), "{}", err);
    }

    #[test]
    fn test_partition() {
        let outputs = vec![
            "SELECT (1)".to_string(),
            "SELECT (1".to_string(),
            "SELECT 2".to_string(),
        ];

        let split = partition(outputs, &BalancedParens);
        assert_eq!(split.valid, vec!["SELECT (1)", "SELECT 2"]);
        assert_eq!(split.invalid.len(), 1);
        assert_eq!(split.invalid[0].0, "SELECT (1");
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError {
            block: 2,
            line: 7,
            kind: ParseErrorKind::UnknownAnnotation("prec".to_string()),
        };
        assert_eq!(err.to_string(), "block 2 (line 7): unknown annotation `%prec`");
    }
}
