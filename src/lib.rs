//! sqlgen is a grammar-driven random text generator.
//!
//! A grammar in yacc-like notation is parsed into productions, merged and
//! validated into a [`Registry`], and then expanded from a start symbol by a
//! [`Generator`] that picks weighted alternatives at random, backtracks out
//! of dead ends and never enters a production more often than its loop bound
//! allows along one path. The output is meant for fuzzing SQL parsers and
//! other consumers of structured text.
//!
//! # Example
//!
//! ```rust
//! use sqlgen::{parse, GrammarBuilder, Generator, Replacer};
//!
//! let productions = parse(
//!     "expr %loop(2): expr '+' expr | 'n' %weight(3)\n\nstart: 'SELECT' expr",
//! )
//! .unwrap();
//! let registry = GrammarBuilder::new().productions(productions).build().unwrap();
//! let replacer = Replacer::new();
//!
//! let mut generator = Generator::with_seed(&registry, &replacer, 42);
//! let text = generator.generate_text("start").unwrap();
//! assert!(text.starts_with("SELECT n"));
//! ```

pub mod config;
pub mod generator;
pub mod grammar;
pub mod parser;
pub mod replacer;
pub mod utils;

pub use config::GeneratorConfig;
pub use generator::{ExpansionCounter, ExpansionObserver, ExpansionStats, Generator, NoopObserver};
pub use grammar::{build_registry, Alternative, GrammarBuilder, Production, Registry, Symbol, UNBOUNDED};
pub use parser::{parse, parse_file, parse_files};
pub use replacer::Replacer;
pub use utils::{GrammarError, OutputValidator, ParseError, ParseErrorKind, Result};
