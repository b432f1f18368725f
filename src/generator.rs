//! Randomized, loop-bounded, backtracking expansion of a [`Registry`].
//!
//! Expansion is a recursive descent from the start symbol. At every
//! production the alternatives that are still allowed are tried in a random,
//! weight-biased order until one of them expands completely; an alternative
//! that hits a dead end anywhere below it is abandoned and the next one is
//! tried. A production with no allowed alternative is a dead end for its
//! caller.
//!
//! Loop bounds are enforced with an [`ExpansionCounter`] that records how many
//! times each production is active on the current path. Every sub-expansion
//! gets its own forked copy, so the bookkeeping of a failed branch never
//! leaks into the branch tried after it.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::grammar::{Alternative, Registry, Symbol};
use crate::replacer::Replacer;
use crate::utils::{partition, GrammarError, OutputValidator, Partition, Result};

/// Entries per production along the active expansion path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpansionCounter {
    counts: HashMap<String, usize>,
}

impl ExpansionCounter {
    pub fn new() -> Self {
        ExpansionCounter::default()
    }

    pub fn get(&self, name: &str) -> usize {
        self.counts.get(name).copied().unwrap_or(0)
    }

    /// A copy of this counter with one more entry for `name`
    pub fn entered(&self, name: &str) -> ExpansionCounter {
        let mut forked = self.clone();
        *forked.counts.entry(name.to_string()).or_insert(0) += 1;
        forked
    }
}

/// Receives expansion events; inject one to collect diagnostics for a run
pub trait ExpansionObserver {
    /// A production is being expanded from the registry
    fn on_enter(&mut self, _name: &str) {}

    /// A name was satisfied by the replacer
    fn on_replaced(&mut self, _name: &str) {}

    /// A production could not be completed on the current path
    fn on_dead_end(&mut self, _name: &str) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ExpansionObserver for NoopObserver {}

/// Per-production event counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpansionStats {
    pub entries: HashMap<String, usize>,
    pub replaced: HashMap<String, usize>,
    pub dead_ends: HashMap<String, usize>,
}

impl ExpansionStats {
    pub fn new() -> Self {
        ExpansionStats::default()
    }

    pub fn total_entries(&self) -> usize {
        self.entries.values().sum()
    }

    pub fn total_dead_ends(&self) -> usize {
        self.dead_ends.values().sum()
    }

    /// The `n` productions that dead-ended most often, most frequent first
    pub fn top_dead_ends(&self, n: usize) -> Vec<(&str, usize)> {
        let mut sorted: Vec<(&str, usize)> = self
            .dead_ends
            .iter()
            .map(|(name, &count)| (name.as_str(), count))
            .collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        sorted.truncate(n);
        sorted
    }
}

impl ExpansionObserver for ExpansionStats {
    fn on_enter(&mut self, name: &str) {
        *self.entries.entry(name.to_string()).or_insert(0) += 1;
    }

    fn on_replaced(&mut self, name: &str) {
        *self.replaced.entry(name.to_string()).or_insert(0) += 1;
    }

    fn on_dead_end(&mut self, name: &str) {
        *self.dead_ends.entry(name.to_string()).or_insert(0) += 1;
    }
}

/// Order `candidates` by weighted sampling without replacement.
///
/// Each position is drawn from the alternatives not placed yet, with
/// probability proportional to their weight among those remaining. All
/// weights must be positive.
pub fn weighted_order<'g, R: Rng>(
    mut candidates: Vec<&'g Alternative>,
    rng: &mut R,
) -> Vec<&'g Alternative> {
    let mut remaining: u64 = candidates.iter().map(|alt| u64::from(alt.weight)).sum();
    for placed in 0..candidates.len() {
        let mut pick = rng.gen_range(0..remaining);
        let mut chosen = placed;
        for (offset, alternative) in candidates[placed..].iter().enumerate() {
            let weight = u64::from(alternative.weight);
            if pick < weight {
                chosen = placed + offset;
                break;
            }
            pick -= weight;
        }
        candidates.swap(placed, chosen);
        remaining -= u64::from(candidates[placed].weight);
    }
    candidates
}

/// Expands start symbols of a registry into token sequences
pub struct Generator<'a, R = StdRng> {
    registry: &'a Registry,
    replacer: &'a Replacer,
    rng: R,
    separator: String,
}

impl<'a> Generator<'a, StdRng> {
    /// Create a generator seeded from system entropy
    pub fn new(registry: &'a Registry, replacer: &'a Replacer) -> Self {
        Generator::with_rng(registry, replacer, StdRng::from_entropy())
    }

    /// Create a generator whose output is reproducible for a given seed
    pub fn with_seed(registry: &'a Registry, replacer: &'a Replacer, seed: u64) -> Self {
        Generator::with_rng(registry, replacer, StdRng::seed_from_u64(seed))
    }
}

impl<'a, R: Rng> Generator<'a, R> {
    pub fn with_rng(registry: &'a Registry, replacer: &'a Replacer, rng: R) -> Self {
        Generator {
            registry,
            replacer,
            rng,
            separator: " ".to_string(),
        }
    }

    /// Set the string placed between tokens by the text-producing methods
    pub fn separator(mut self, separator: &str) -> Self {
        self.separator = separator.to_string();
        self
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    /// Expand `start` into tokens, or `None` if no completion exists under
    /// the current bounds, weights and overrides.
    ///
    /// # Panics
    ///
    /// Panics if `start` or any production reached during expansion is
    /// neither overridden nor defined in the registry.
    pub fn generate(&mut self, start: &str) -> Option<Vec<String>> {
        self.generate_observed(start, &mut NoopObserver)
    }

    /// Like [`Generator::generate`], reporting every expansion event to `observer`
    pub fn generate_observed(
        &mut self,
        start: &str,
        observer: &mut dyn ExpansionObserver,
    ) -> Option<Vec<String>> {
        let replacer = self.replacer;
        let _run = replacer.begin_run();

        if !replacer.contains(start) && self.registry.loop_bound(start) == 0 {
            debug!("start symbol {} has a loop bound of 0", start);
            observer.on_dead_end(start);
            return None;
        }
        let counter = ExpansionCounter::new().entered(start);
        self.expand(start, &counter, observer)
    }

    /// Expand `start` and join the tokens with the separator
    pub fn generate_text(&mut self, start: &str) -> Option<String> {
        self.generate(start).map(|tokens| tokens.join(&self.separator))
    }

    /// Retry dead ends up to `attempts` times
    pub fn generate_retrying(&mut self, start: &str, attempts: usize) -> Option<String> {
        for attempt in 1..=attempts {
            if let Some(text) = self.generate_text(start) {
                return Some(text);
            }
            debug!("attempt {} for {} reached a dead end", attempt, start);
        }
        warn!("no expansion of {} completed after {} attempts", start, attempts);
        None
    }

    /// Generate `count` outputs and split them by `validator`.
    ///
    /// Each output gets up to `attempts` tries; outputs that never complete
    /// are left out, so the partition may hold fewer than `count` texts.
    pub fn generate_batch(
        &mut self,
        start: &str,
        count: usize,
        attempts: usize,
        validator: &dyn OutputValidator,
    ) -> Partition {
        let outputs: Vec<String> = (0..count)
            .filter_map(|_| self.generate_retrying(start, attempts))
            .collect();
        partition(outputs, validator)
    }

    /// Collect `count` outputs that `validator` accepts, drawing at most
    /// `max_attempts` candidates in total
    pub fn generate_valid(
        &mut self,
        start: &str,
        count: usize,
        max_attempts: usize,
        validator: &dyn OutputValidator,
    ) -> Result<Vec<String>> {
        let mut valid = Vec::with_capacity(count);
        let mut attempts = 0;
        while valid.len() < count {
            if attempts == max_attempts {
                return Err(GrammarError::ValidationFailed(format!(
                    "only {} of {} outputs of {} passed {} after {} attempts",
                    valid.len(),
                    count,
                    start,
                    validator.name(),
                    max_attempts
                )));
            }
            attempts += 1;
            let Some(text) = self.generate_text(start) else {
                continue;
            };
            match validator.check(&text) {
                Ok(()) => valid.push(text),
                Err(reason) => debug!("rejected by {}: {}", validator.name(), reason),
            }
        }
        Ok(valid)
    }

    /// Endless stream of outputs for `start`, each retried up to `attempts` times
    pub fn outputs<'s>(&'s mut self, start: &'s str, attempts: usize) -> Outputs<'s, 'a, R> {
        Outputs {
            generator: self,
            start,
            attempts,
        }
    }

    fn expand(
        &mut self,
        name: &str,
        counter: &ExpansionCounter,
        observer: &mut dyn ExpansionObserver,
    ) -> Option<Vec<String>> {
        if self.replacer.contains(name) {
            observer.on_replaced(name);
            let value = self.replacer.run(name);
            return Some(if value.is_empty() { Vec::new() } else { vec![value] });
        }

        let registry = self.registry;
        let production = registry
            .get(name)
            .unwrap_or_else(|| panic!("production `{}` not found in registry during generation", name));
        observer.on_enter(name);

        let candidates: Vec<&Alternative> = production
            .alternatives
            .iter()
            .filter(|alternative| alternative.weight > 0 && !self.exceeds_bound(alternative, counter))
            .collect();
        if candidates.is_empty() {
            debug!("exiting from {}: no alternative within bounds", name);
            observer.on_dead_end(name);
            return None;
        }

        for alternative in weighted_order(candidates, &mut self.rng) {
            if let Some(tokens) = self.expand_alternative(alternative, counter, observer) {
                return Some(tokens);
            }
        }
        debug!("exiting from {}: every alternative failed", name);
        observer.on_dead_end(name);
        None
    }

    fn expand_alternative(
        &mut self,
        alternative: &Alternative,
        counter: &ExpansionCounter,
        observer: &mut dyn ExpansionObserver,
    ) -> Option<Vec<String>> {
        let mut tokens = Vec::new();
        for symbol in &alternative.symbols {
            match symbol {
                Symbol::Terminal(text) => {
                    if !text.is_empty() {
                        tokens.push(text.clone());
                    }
                }
                Symbol::NonTerminal(name) => {
                    let Some(fragment) = self.expand(name, &counter.entered(name), observer) else {
                        debug!("encountered a dead end for {}", name);
                        return None;
                    };
                    tokens.extend(fragment);
                }
            }
        }
        Some(tokens)
    }

    /// Whether expanding `alternative` would re-enter a production that has
    /// used up its loop bound on this path
    fn exceeds_bound(&self, alternative: &Alternative, counter: &ExpansionCounter) -> bool {
        alternative.non_terminals().any(|name| {
            !self.replacer.contains(name) && counter.get(name) >= self.registry.loop_bound(name)
        })
    }
}

/// Iterator returned by [`Generator::outputs`]; yields `None` only when a
/// start symbol gives up after all its attempts
pub struct Outputs<'s, 'a, R> {
    generator: &'s mut Generator<'a, R>,
    start: &'s str,
    attempts: usize,
}

impl<R: Rng> Iterator for Outputs<'_, '_, R> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.generator.generate_retrying(self.start, self.attempts)
    }
}
