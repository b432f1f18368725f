use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

use tracing::warn;

use crate::utils::{GrammarError, Result};

/// Loop bound used for productions that carry no annotation
pub const UNBOUNDED: usize = usize::MAX;

/// Represents an element in the grammar, either a terminal or a non-terminal
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Symbol {
    /// Literal text; the empty string produces nothing
    Terminal(String),
    /// Reference to a production by name
    NonTerminal(String),
}

impl Symbol {
    /// Classify a grammar token: quoted tokens are terminals, anything else
    /// names a production.
    pub fn from_token(token: &str) -> Symbol {
        for quote in ['\'', '"'] {
            if token.len() >= 2 && token.starts_with(quote) && token.ends_with(quote) {
                return Symbol::Terminal(token[1..token.len() - 1].to_string());
            }
        }
        Symbol::NonTerminal(token.to_string())
    }

    pub fn is_epsilon(&self) -> bool {
        matches!(self, Symbol::Terminal(text) if text.is_empty())
    }

    /// The referenced production name, if this is a non-terminal
    pub fn non_terminal(&self) -> Option<&str> {
        match self {
            Symbol::NonTerminal(name) => Some(name),
            Symbol::Terminal(_) => None,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::NonTerminal(name) => write!(f, "{}", name),
            Symbol::Terminal(text) => {
                write!(f, "'")?;
                for c in text.chars() {
                    if c == '\'' || c == '\\' {
                        write!(f, "\\")?;
                    }
                    write!(f, "{}", c)?;
                }
                write!(f, "'")
            }
        }
    }
}

/// One weighted choice of a production
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alternative {
    /// The sequence of symbols in this alternative
    pub symbols: Vec<Symbol>,
    /// Relative likelihood of being tried first; 0 excludes it
    pub weight: u32,
}

impl Alternative {
    pub fn new(symbols: Vec<Symbol>) -> Self {
        Alternative { symbols, weight: 1 }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Names of all productions this alternative refers to
    pub fn non_terminals(&self) -> impl Iterator<Item = &str> + '_ {
        self.symbols.iter().filter_map(Symbol::non_terminal)
    }

    fn mentions(&self, token: &str) -> bool {
        self.symbols.iter().any(|symbol| match symbol {
            Symbol::Terminal(text) | Symbol::NonTerminal(text) => text == token,
        })
    }
}

/// Represents a production rule in the grammar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Production {
    pub name: String,
    pub alternatives: Vec<Alternative>,
    /// Maximum entries along a single expansion path; `None` defers to the
    /// registry default
    pub loop_bound: Option<usize>,
}

impl Production {
    pub fn new(name: &str) -> Self {
        Production {
            name: name.to_string(),
            alternatives: Vec::new(),
            loop_bound: None,
        }
    }

    pub fn with_alternative(mut self, alternative: Alternative) -> Self {
        self.alternatives.push(alternative);
        self
    }

    pub fn with_loop_bound(mut self, bound: usize) -> Self {
        self.loop_bound = Some(bound);
        self
    }

    /// Fold another declaration of the same head into this one
    fn merge(&mut self, other: Production) {
        self.alternatives.extend(other.alternatives);
        self.loop_bound = match (self.loop_bound, other.loop_bound) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }
}

impl fmt::Display for Production {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(bound) = self.loop_bound {
            write!(f, " %loop({})", bound)?;
        }
        write!(f, ":")?;
        for (idx, alternative) in self.alternatives.iter().enumerate() {
            if idx > 0 {
                write!(f, "\n    |")?;
            }
            if alternative.symbols.is_empty() {
                write!(f, " %empty")?;
            }
            for symbol in &alternative.symbols {
                write!(f, " {}", symbol)?;
            }
            if alternative.weight != 1 {
                write!(f, " %weight({})", alternative.weight)?;
            }
        }
        write!(f, "\n    ;")
    }
}

/// Validated, immutable collection of productions keyed by name.
///
/// Every non-terminal referenced by any alternative resolves to a production
/// in the same registry; construction fails otherwise.
#[derive(Debug, Clone)]
pub struct Registry {
    productions: Vec<Production>,
    index: HashMap<String, usize>,
    default_loop_bound: usize,
}

impl Registry {
    /// Get a production by name
    pub fn get(&self, name: &str) -> Option<&Production> {
        self.index.get(name).map(|&idx| &self.productions[idx])
    }

    /// Check if the registry defines a specific non-terminal
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Fail with `UnknownNonTerminal` unless `name` is defined
    pub fn ensure_defined(&self, name: &str) -> Result<()> {
        if self.contains(name) {
            Ok(())
        } else {
            Err(GrammarError::UnknownNonTerminal(name.to_string()))
        }
    }

    /// Productions in order of first declaration
    pub fn iter(&self) -> impl Iterator<Item = &Production> {
        self.productions.iter()
    }

    pub fn len(&self) -> usize {
        self.productions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.productions.is_empty()
    }

    /// Effective loop bound of a production
    pub fn loop_bound(&self, name: &str) -> usize {
        self.get(name)
            .and_then(|production| production.loop_bound)
            .unwrap_or(self.default_loop_bound)
    }

    pub fn default_loop_bound(&self) -> usize {
        self.default_loop_bound
    }

    /// Names of every production reachable from `start`, `start` included
    pub fn reachable(&self, start: &str) -> Result<BTreeSet<String>> {
        self.ensure_defined(start)?;

        let mut visited = BTreeSet::new();
        let mut pending = VecDeque::from([start]);
        while let Some(name) = pending.pop_front() {
            if !visited.insert(name.to_string()) {
                continue;
            }
            let production = self
                .get(name)
                .ok_or_else(|| GrammarError::UnknownNonTerminal(name.to_string()))?;
            for alternative in &production.alternatives {
                pending.extend(
                    alternative
                        .non_terminals()
                        .filter(|next| !visited.contains(*next)),
                );
            }
        }
        Ok(visited)
    }

    /// Productions that can never be reached from `start`, in declaration order
    pub fn unreachable(&self, start: &str) -> Result<Vec<&str>> {
        let live = self.reachable(start)?;
        Ok(self
            .productions
            .iter()
            .map(|production| production.name.as_str())
            .filter(|name| !live.contains(*name))
            .collect())
    }

    /// The minimal registry that still expands `start`
    pub fn subgrammar(&self, start: &str) -> Result<Registry> {
        let live = self.reachable(start)?;
        let productions = self
            .productions
            .iter()
            .filter(|production| live.contains(&production.name))
            .cloned()
            .collect();
        Registry::from_merged(productions, self.default_loop_bound)
    }

    fn from_merged(productions: Vec<Production>, default_loop_bound: usize) -> Result<Registry> {
        let index = productions
            .iter()
            .enumerate()
            .map(|(idx, production)| (production.name.clone(), idx))
            .collect();
        let registry = Registry {
            productions,
            index,
            default_loop_bound,
        };
        if let Some(empty) = registry.productions.iter().find(|p| p.alternatives.is_empty()) {
            return Err(GrammarError::NoAlternatives(empty.name.clone()));
        }
        registry.check_references()?;
        Ok(registry)
    }

    /// Report the first unresolved reference in declaration order; every
    /// other one is logged
    fn check_references(&self) -> Result<()> {
        let mut unresolved = Vec::new();
        for production in &self.productions {
            for alternative in &production.alternatives {
                for name in alternative.non_terminals().filter(|name| !self.contains(name)) {
                    warn!("production `{}` is mentioned in {} but not defined", name, production.name);
                    unresolved.push((name, production.name.as_str()));
                }
            }
        }

        match unresolved.first() {
            Some(&(symbol, referrer)) => Err(GrammarError::UnresolvedSymbol {
                symbol: symbol.to_string(),
                referrer: referrer.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Renders the registry in the text notation `parser::parse` reads
impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, production) in self.productions.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}", production)?;
        }
        Ok(())
    }
}

/// Merge productions by head and validate every reference
pub fn build_registry(productions: Vec<Production>) -> Result<Registry> {
    GrammarBuilder::new().productions(productions).build()
}

/// Builder for constructing Registry instances
#[derive(Debug, Clone, Default)]
pub struct GrammarBuilder {
    productions: Vec<Production>,
    loop_bounds: Vec<(String, usize)>,
    excluded: HashSet<String>,
    default_loop_bound: Option<usize>,
}

impl GrammarBuilder {
    pub fn new() -> Self {
        GrammarBuilder::default()
    }

    /// Add an alternative of weight 1. Quoted items are terminals, bare items
    /// name productions.
    pub fn add_rule(self, head: &str, items: &[&str]) -> Self {
        self.add_weighted_rule(head, items, 1)
    }

    pub fn add_weighted_rule(self, head: &str, items: &[&str], weight: u32) -> Self {
        let symbols = items.iter().map(|item| Symbol::from_token(item)).collect();
        self.add_production(
            Production::new(head).with_alternative(Alternative::new(symbols).with_weight(weight)),
        )
    }

    pub fn add_production(mut self, production: Production) -> Self {
        self.productions.push(production);
        self
    }

    pub fn productions<I: IntoIterator<Item = Production>>(mut self, productions: I) -> Self {
        self.productions.extend(productions);
        self
    }

    /// Override the loop bound of one production, ignoring any annotation
    pub fn loop_bound(mut self, head: &str, bound: usize) -> Self {
        self.loop_bounds.push((head.to_string(), bound));
        self
    }

    /// Bound for productions without an explicit one
    pub fn default_loop_bound(mut self, bound: usize) -> Self {
        self.default_loop_bound = Some(bound);
        self
    }

    /// Never select alternatives that mention `token`, either as a production
    /// name or as literal text
    pub fn exclude(mut self, token: &str) -> Self {
        self.excluded.insert(token.to_string());
        self
    }

    /// Build the registry
    pub fn build(self) -> Result<Registry> {
        let mut merged: Vec<Production> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for production in self.productions {
            match positions.get(&production.name) {
                Some(&idx) => merged[idx].merge(production),
                None => {
                    positions.insert(production.name.clone(), merged.len());
                    merged.push(production);
                }
            }
        }

        for (head, bound) in self.loop_bounds {
            let idx = positions
                .get(&head)
                .copied()
                .ok_or(GrammarError::UnknownNonTerminal(head))?;
            merged[idx].loop_bound = Some(bound);
        }

        if !self.excluded.is_empty() {
            for alternative in merged.iter_mut().flat_map(|p| p.alternatives.iter_mut()) {
                if self.excluded.iter().any(|token| alternative.mentions(token)) {
                    alternative.weight = 0;
                }
            }
        }

        Registry::from_merged(merged, self.default_loop_bound.unwrap_or(UNBOUNDED))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn terminal(text: &str) -> Symbol {
        Symbol::Terminal(text.to_string())
    }

    fn non_terminal(name: &str) -> Symbol {
        Symbol::NonTerminal(name.to_string())
    }

    #[test]
    fn test_symbol_from_token() {
        assert_eq!(Symbol::from_token("'SELECT'"), terminal("SELECT"));
        assert_eq!(Symbol::from_token("\"FROM\""), terminal("FROM"));
        assert_eq!(Symbol::from_token("''"), terminal(""));
        assert_eq!(Symbol::from_token("table_name"), non_terminal("table_name"));
        assert_eq!(Symbol::from_token("'"), non_terminal("'"));
        assert!(Symbol::from_token("''").is_epsilon());
    }

    #[test]
    fn test_merge_concatenates_alternatives() {
        let registry = GrammarBuilder::new()
            .add_rule("start", &["'A'"])
            .add_rule("other", &["'x'"])
            .add_rule("start", &["'B'"])
            .add_rule("start", &["other"])
            .build()
            .unwrap();

        let start = registry.get("start").unwrap();
        assert_eq!(
            start.alternatives,
            vec![
                Alternative::new(vec![terminal("A")]),
                Alternative::new(vec![terminal("B")]),
                Alternative::new(vec![non_terminal("other")]),
            ]
        );
        let names: Vec<&str> = registry.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["start", "other"]);
    }

    #[test]
    fn test_merge_keeps_tighter_loop_bound() {
        let registry = build_registry(vec![
            Production::new("a").with_loop_bound(4).with_alternative(Alternative::new(vec![terminal("x")])),
            Production::new("a").with_alternative(Alternative::new(vec![terminal("y")])),
            Production::new("a").with_loop_bound(2),
        ])
        .unwrap();

        assert_eq!(registry.loop_bound("a"), 2);
        assert_eq!(registry.get("a").unwrap().alternatives.len(), 2);
    }

    #[test]
    fn test_unresolved_symbol() {
        let err = GrammarBuilder::new()
            .add_rule("start", &["'A'", "missing"])
            .build()
            .unwrap_err();

        match err {
            GrammarError::UnresolvedSymbol { symbol, referrer } => {
                assert_eq!(symbol, "missing");
                assert_eq!(referrer, "start");
            }
            other => panic!("Expected UnresolvedSymbol, got {:?}", other),
        }
    }

    #[test]
    fn test_production_without_alternatives_rejected() {
        let err = GrammarBuilder::new()
            .add_rule("start", &["a"])
            .add_production(Production::new("a").with_loop_bound(2))
            .build()
            .unwrap_err();
        assert!(matches!(err, GrammarError::NoAlternatives(ref name) if name == "a"));

        // A later declaration can still supply the alternatives.
        let registry = GrammarBuilder::new()
            .add_production(Production::new("a").with_loop_bound(2))
            .add_rule("a", &["'x'"])
            .build()
            .unwrap();
        let reloaded = build_registry(crate::parser::parse(&registry.to_string()).unwrap()).unwrap();
        assert_eq!(reloaded.loop_bound("a"), 2);
    }

    #[test]
    fn test_loop_bound_overrides() {
        let registry = GrammarBuilder::new()
            .add_rule("expr", &["expr", "'+'", "expr"])
            .add_rule("expr", &["'n'"])
            .add_production(Production::new("term").with_loop_bound(7).with_alternative(Alternative::new(vec![terminal("t")])))
            .loop_bound("expr", 2)
            .default_loop_bound(5)
            .build()
            .unwrap();

        assert_eq!(registry.loop_bound("expr"), 2);
        assert_eq!(registry.loop_bound("term"), 7);
        assert_eq!(registry.default_loop_bound(), 5);

        let err = GrammarBuilder::new()
            .add_rule("a", &["'x'"])
            .loop_bound("b", 1)
            .build()
            .unwrap_err();
        assert!(matches!(err, GrammarError::UnknownNonTerminal(name) if name == "b"));
    }

    #[test]
    fn test_default_loop_bound_is_unbounded() {
        let registry = GrammarBuilder::new().add_rule("a", &["'x'"]).build().unwrap();
        assert_eq!(registry.loop_bound("a"), UNBOUNDED);
    }

    #[test]
    fn test_exclude_zeroes_weights() {
        let registry = GrammarBuilder::new()
            .add_rule("stmt", &["'CREATE'", "temporary", "'TABLE'"])
            .add_rule("stmt", &["'CREATE'", "'TABLE'"])
            .add_rule("stmt", &["'DROP'", "'TABLE'"])
            .add_rule("temporary", &["'TEMPORARY'"])
            .exclude("temporary")
            .exclude("DROP")
            .build()
            .unwrap();

        let weights: Vec<u32> = registry
            .get("stmt")
            .unwrap()
            .alternatives
            .iter()
            .map(|alt| alt.weight)
            .collect();
        assert_eq!(weights, vec![0, 1, 0]);
    }

    #[test]
    fn test_reachable() {
        let registry = GrammarBuilder::new()
            .add_rule("start", &["a", "b"])
            .add_rule("a", &["'x'", "a"])
            .add_rule("a", &["''"])
            .add_rule("b", &["c"])
            .add_rule("c", &["'z'"])
            .add_rule("dead", &["a"])
            .build()
            .unwrap();

        let live: Vec<String> = registry.reachable("start").unwrap().into_iter().collect();
        assert_eq!(live, vec!["a", "b", "c", "start"]);
        assert_eq!(registry.unreachable("start").unwrap(), vec!["dead"]);
        assert_eq!(registry.reachable("b").unwrap().len(), 2);
        assert!(matches!(
            registry.reachable("nope"),
            Err(GrammarError::UnknownNonTerminal(_))
        ));
    }

    #[test]
    fn test_subgrammar() {
        let registry = GrammarBuilder::new()
            .add_rule("start", &["a"])
            .add_rule("a", &["'x'"])
            .add_rule("dead", &["'y'"])
            .default_loop_bound(3)
            .build()
            .unwrap();

        let sub = registry.subgrammar("start").unwrap();
        assert_eq!(sub.len(), 2);
        assert!(!sub.contains("dead"));
        assert_eq!(sub.default_loop_bound(), 3);
    }

    #[test]
    fn test_display() {
        let registry = GrammarBuilder::new()
            .add_rule("expr", &["expr", "'+'", "expr"])
            .add_weighted_rule("expr", &["'it''s'"], 3)
            .add_rule("expr", &["''"])
            .loop_bound("expr", 2)
            .build()
            .unwrap();

        assert_eq!(
            registry.to_string(),
            "expr %loop(2): expr '+' expr\n    | 'it\\'\\'s' %weight(3)\n    | ''\n    ;\n"
        );
    }
}
