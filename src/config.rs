use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::grammar::GrammarBuilder;
use crate::replacer::Replacer;
use crate::utils::{GrammarError, Result};

/// Settings for a generation session, loadable from JSON.
///
/// ```json
/// {
///   "start": "create_table_stmt",
///   "count": 20,
///   "default_loop_bound": 3,
///   "loop_bounds": { "expr": 2 },
///   "replace": { "column_def": "a int", "opt_temporary": "" },
///   "sequences": { "table_ident": "t" },
///   "exclude": ["PARTITION_SYM"]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorConfig {
    /// Production to expand
    pub start: Option<String>,
    /// Number of outputs per run
    pub count: usize,
    /// Seed for reproducible output
    pub seed: Option<u64>,
    /// Text placed between tokens
    pub separator: String,
    /// Bound for productions without an annotation; unbounded when absent
    pub default_loop_bound: Option<usize>,
    /// Per-production bounds; these beat grammar annotations
    pub loop_bounds: BTreeMap<String, usize>,
    /// Productions replaced by a constant string
    pub replace: BTreeMap<String, String>,
    /// Productions replaced by fresh identifiers with the given prefix
    pub sequences: BTreeMap<String, String>,
    /// Alternatives mentioning any of these names or literals are never chosen
    pub exclude: Vec<String>,
    /// Attempts per output before a dead end is reported
    pub max_attempts: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            start: None,
            count: 1,
            seed: None,
            separator: " ".to_string(),
            default_loop_bound: None,
            loop_bounds: BTreeMap::new(),
            replace: BTreeMap::new(),
            sequences: BTreeMap::new(),
            exclude: Vec::new(),
            max_attempts: 100,
        }
    }
}

impl GeneratorConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: GeneratorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that can never produce output
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(GrammarError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if let Some(name) = self.replace.keys().find(|name| self.sequences.contains_key(*name)) {
            return Err(GrammarError::InvalidConfig(format!(
                "`{}` is listed in both replace and sequences",
                name
            )));
        }
        Ok(())
    }

    /// Add the bound overrides and exclusions to a builder
    pub fn apply(&self, mut builder: GrammarBuilder) -> GrammarBuilder {
        if let Some(bound) = self.default_loop_bound {
            builder = builder.default_loop_bound(bound);
        }
        for (name, &bound) in &self.loop_bounds {
            builder = builder.loop_bound(name, bound);
        }
        for token in &self.exclude {
            builder = builder.exclude(token);
        }
        builder
    }

    /// Build the replacer described by `replace` and `sequences`
    pub fn replacer(&self) -> Replacer {
        let mut replacer = Replacer::new();
        for (name, value) in &self.replace {
            replacer.add_const(name, value);
        }
        for (name, prefix) in &self.sequences {
            replacer.add_sequence(name, prefix);
        }
        replacer
    }
}
