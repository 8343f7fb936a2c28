//! Entity filter
//!
//! Decides, per incoming event, whether it enters the batching path. A
//! filter is a mode (include or exclude), an ordered rule list, and an
//! exception list with the same shape. Exceptions always win, regardless of
//! mode: they model "always record this" / "always record even though its
//! domain is excluded" overrides.
//!
//! Rule sets compile once (globs become anchored regexes) and swap
//! atomically on reload - a concurrent `should_include` sees the old set or
//! the new set, never a half-applied one.

use arc_swap::ArcSwap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;
use virta_core::StateEvent;

/// Filter mode: what a rule match means
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Rules name what to drop; everything else passes
    #[default]
    Exclude,
    /// Rules name what to keep; everything else is dropped
    Include,
}

/// One filter rule: a pattern scoped to an event facet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterRule {
    /// Glob over the entity id (`sensor.kitchen_*`, `light.?allway`)
    EntityGlob(String),
    /// Exact entity domain (`sensor`)
    Domain(String),
    /// Exact device class (`temperature`)
    DeviceClass(String),
    /// Exact area id (`kitchen`)
    Area(String),
}

/// Filter configuration, reloadable at runtime
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// What a rule match means
    pub mode: FilterMode,
    /// Ordered rule list
    pub rules: Vec<FilterRule>,
    /// Rules that always force inclusion, regardless of mode
    pub exceptions: Vec<FilterRule>,
}

/// A rule with its glob compiled to an anchored regex
enum CompiledRule {
    Entity(Regex),
    Domain(String),
    DeviceClass(String),
    Area(String),
}

impl CompiledRule {
    /// Compile one rule; a bad glob is skipped (logged by the caller)
    fn compile(rule: &FilterRule) -> Result<Self, regex::Error> {
        match rule {
            FilterRule::EntityGlob(glob) => Ok(Self::Entity(compile_glob(glob)?)),
            FilterRule::Domain(d) => Ok(Self::Domain(d.clone())),
            FilterRule::DeviceClass(c) => Ok(Self::DeviceClass(c.clone())),
            FilterRule::Area(a) => Ok(Self::Area(a.clone())),
        }
    }

    fn matches(&self, entity_id: &str, event: &StateEvent) -> bool {
        match self {
            Self::Entity(re) => re.is_match(entity_id),
            Self::Domain(d) => extract_domain(event).is_some_and(|v| v == d),
            Self::DeviceClass(c) => extract_device_class(event).is_some_and(|v| v == c),
            Self::Area(a) => extract_area(event).is_some_and(|v| v == a),
        }
    }
}

/// Immutable compiled rule set, swapped wholesale on reload
struct CompiledRuleSet {
    mode: FilterMode,
    rules: Vec<CompiledRule>,
    exceptions: Vec<CompiledRule>,
}

impl CompiledRuleSet {
    /// Compile a config, skipping rules whose glob fails to compile
    ///
    /// Returns the set plus the number of skipped rules.
    fn compile(config: &FilterConfig) -> (Self, u64) {
        let mut skipped = 0;
        let mut compile_list = |rules: &[FilterRule], which: &str| {
            rules
                .iter()
                .filter_map(|rule| match CompiledRule::compile(rule) {
                    Ok(compiled) => Some(compiled),
                    Err(e) => {
                        skipped += 1;
                        warn!(rule = ?rule, list = which, error = %e, "skipping unparseable filter rule");
                        None
                    }
                })
                .collect::<Vec<_>>()
        };

        let rules = compile_list(&config.rules, "rules");
        let exceptions = compile_list(&config.exceptions, "exceptions");
        (
            Self {
                mode: config.mode,
                rules,
                exceptions,
            },
            skipped,
        )
    }
}

/// Counters exposed by [`EntityFilter::stats`]
#[derive(Debug, Clone, Serialize)]
pub struct FilterStats {
    /// Events that passed the filter
    pub included: u64,
    /// Events the filter dropped
    pub excluded: u64,
    /// Events included because an exception rule matched
    pub exception_hits: u64,
    /// Rules skipped because their pattern failed to compile
    pub rules_skipped: u64,
}

/// Include/exclude pattern matcher applied to each incoming event
///
/// # Example
///
/// ```
/// use virta_pipeline::filter::{EntityFilter, FilterConfig, FilterMode, FilterRule};
/// use virta_core::StateEvent;
///
/// let filter = EntityFilter::new(FilterConfig {
///     mode: FilterMode::Exclude,
///     rules: vec![FilterRule::Domain("sensor".to_string())],
///     exceptions: vec![FilterRule::EntityGlob("sensor.energy_*".to_string())],
/// });
///
/// assert!(!filter.should_include(&StateEvent::new("sensor.noise", "1")));
/// assert!(filter.should_include(&StateEvent::new("sensor.energy_meter", "2")));
/// assert!(filter.should_include(&StateEvent::new("light.hallway", "on")));
/// ```
pub struct EntityFilter {
    active: ArcSwap<CompiledRuleSet>,
    included: AtomicU64,
    excluded: AtomicU64,
    exception_hits: AtomicU64,
    rules_skipped: AtomicU64,
}

impl EntityFilter {
    /// Build a filter from configuration, compiling all patterns once
    pub fn new(config: FilterConfig) -> Self {
        let (set, skipped) = CompiledRuleSet::compile(&config);
        Self {
            active: ArcSwap::from_pointee(set),
            included: AtomicU64::new(0),
            excluded: AtomicU64::new(0),
            exception_hits: AtomicU64::new(0),
            rules_skipped: AtomicU64::new(skipped),
        }
    }

    /// A filter with no rules: everything passes
    pub fn allow_all() -> Self {
        Self::new(FilterConfig::default())
    }

    /// Decide whether the event enters the pipeline
    ///
    /// An event whose identifier cannot be derived fails open (included):
    /// dropping data because a record is oddly shaped is worse than
    /// recording it.
    pub fn should_include(&self, event: &StateEvent) -> bool {
        let set = self.active.load();

        let Some(entity_id) = extract_entity_id(event) else {
            self.included.fetch_add(1, Ordering::Relaxed);
            return true;
        };

        if set.exceptions.iter().any(|r| r.matches(entity_id, event)) {
            self.exception_hits.fetch_add(1, Ordering::Relaxed);
            self.included.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        let matched = set.rules.iter().any(|r| r.matches(entity_id, event));
        let include = match set.mode {
            FilterMode::Exclude => !matched,
            FilterMode::Include => matched,
        };

        if include {
            self.included.fetch_add(1, Ordering::Relaxed);
        } else {
            self.excluded.fetch_add(1, Ordering::Relaxed);
        }
        include
    }

    /// Replace the active rule set
    ///
    /// Compilation happens before the swap; readers never observe a
    /// partially-applied configuration.
    pub fn reload(&self, config: FilterConfig) {
        let (set, skipped) = CompiledRuleSet::compile(&config);
        self.rules_skipped.fetch_add(skipped, Ordering::Relaxed);
        self.active.store(Arc::new(set));
    }

    /// Counter snapshot
    pub fn stats(&self) -> FilterStats {
        FilterStats {
            included: self.included.load(Ordering::Relaxed),
            excluded: self.excluded.load(Ordering::Relaxed),
            exception_hits: self.exception_hits.load(Ordering::Relaxed),
            rules_skipped: self.rules_skipped.load(Ordering::Relaxed),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Facet extraction
//
// Each facet is derived through an ordered list of strategies, tried in
// order, first match wins. Events arrive from more than one upstream shape;
// the lists make the precedence explicit instead of burying it in
// conditionals.
// ─────────────────────────────────────────────────────────────────────────

type Extractor = fn(&StateEvent) -> Option<&str>;

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

const ENTITY_ID_STRATEGIES: &[Extractor] = &[
    |e| non_empty(&e.entity_id),
    |e| e.attribute_str("entity_id"),
];

const DOMAIN_STRATEGIES: &[Extractor] = &[
    |e| non_empty(&e.domain),
    |e| e.entity_id.split_once('.').map(|(d, _)| d),
];

const DEVICE_CLASS_STRATEGIES: &[Extractor] = &[
    |e| e.attribute_str("device_class"),
    |e| e.attribute_str("original_device_class"),
];

const AREA_STRATEGIES: &[Extractor] = &[
    |e| e.attribute_str("area_id"),
    |e| e.attribute_str("area"),
];

fn extract<'a>(event: &'a StateEvent, strategies: &[Extractor]) -> Option<&'a str> {
    strategies.iter().find_map(|s| s(event))
}

fn extract_entity_id(event: &StateEvent) -> Option<&str> {
    extract(event, ENTITY_ID_STRATEGIES)
}

fn extract_domain(event: &StateEvent) -> Option<&str> {
    extract(event, DOMAIN_STRATEGIES)
}

fn extract_device_class(event: &StateEvent) -> Option<&str> {
    extract(event, DEVICE_CLASS_STRATEGIES)
}

fn extract_area(event: &StateEvent) -> Option<&str> {
    extract(event, AREA_STRATEGIES)
}

/// Compile a glob (`*`, `?`, `[seq]`) into an anchored regex
///
/// Character classes pass through verbatim; an unbalanced `[` fails
/// compilation and the rule is skipped by the caller.
fn compile_glob(glob: &str) -> Result<Regex, regex::Error> {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            '[' | ']' => pattern.push(ch),
            c => pattern.push_str(&regex::escape(&c.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern)
}
