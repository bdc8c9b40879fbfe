//! Subscription Management Types
//!
//! Domain types for tracking which instruments should be live on the
//! upstream feed, and which push consumers are watching which of them.
//!
//! # Design
//!
//! The registry tracks:
//! - The desired set: every symbol that should be subscribed upstream.
//!   This set is authoritative and is replayed in full after every reconnect.
//! - Watch lists: per-consumer symbol sets used to filter fan-out.
//!
//! Only explicit subscribe/unsubscribe calls shrink or grow the desired set.
//! Watching a symbol also subscribes it; unwatching or disconnecting a
//! consumer leaves the desired set untouched.

use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a push consumer.
pub type ConsumerId = u64;

/// Exchange used when a symbol arrives without an `EXCH:` prefix.
pub const DEFAULT_EXCHANGE: &str = "NSE";

/// Errors produced while normalizing a symbol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// Symbol was empty after trimming.
    #[error("symbol cannot be empty")]
    Empty,
    /// Exchange or instrument part was empty (e.g. `"NSE:"`).
    #[error("malformed symbol: {0}")]
    Malformed(String),
}

/// Normalized exchange-qualified instrument identifier, e.g. `NSE:SBIN-EQ`.
///
/// Compared by exact string equality after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentSymbol(String);

impl InstrumentSymbol {
    /// Normalize a raw symbol: trim, upper-case, and add the default
    /// exchange prefix when missing.
    ///
    /// # Errors
    ///
    /// Returns `SymbolError` for empty input or an empty exchange/name part.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SymbolError::Empty);
        }

        let upper = trimmed.to_uppercase();
        match upper.split_once(':') {
            Some((exchange, name)) => {
                let (exchange, name) = (exchange.trim(), name.trim());
                if exchange.is_empty() || name.is_empty() {
                    return Err(SymbolError::Malformed(trimmed.to_string()));
                }
                Ok(Self(format!("{exchange}:{name}")))
            }
            None => Ok(Self(format!("{DEFAULT_EXCHANGE}:{upper}"))),
        }
    }

    /// Get the symbol string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exchange part (before the colon).
    #[must_use]
    pub fn exchange(&self) -> &str {
        self.0.split_once(':').map_or("", |(exchange, _)| exchange)
    }
}

impl std::fmt::Display for InstrumentSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for InstrumentSymbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for InstrumentSymbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Normalize a batch of raw symbols, dropping (and logging) invalid ones.
pub fn normalize_all<I, S>(raw: I) -> Vec<InstrumentSymbol>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .filter_map(|s| match InstrumentSymbol::parse(s.as_ref()) {
            Ok(symbol) => Some(symbol),
            Err(e) => {
                tracing::warn!(symbol = s.as_ref(), error = %e, "Ignoring invalid symbol");
                None
            }
        })
        .collect()
}

// =============================================================================
// Subscription Changes
// =============================================================================

/// Changes to the upstream subscription set produced by one mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Symbols newly added to the desired set.
    pub subscribe: BTreeSet<InstrumentSymbol>,
    /// Symbols removed from the desired set.
    pub unsubscribe: BTreeSet<InstrumentSymbol>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }

    /// Create changes with only subscribes.
    #[must_use]
    pub fn subscribe_only(symbols: impl IntoIterator<Item = InstrumentSymbol>) -> Self {
        Self {
            subscribe: symbols.into_iter().collect(),
            unsubscribe: BTreeSet::new(),
        }
    }

    /// Create changes with only unsubscribes.
    #[must_use]
    pub fn unsubscribe_only(symbols: impl IntoIterator<Item = InstrumentSymbol>) -> Self {
        Self {
            subscribe: BTreeSet::new(),
            unsubscribe: symbols.into_iter().collect(),
        }
    }
}

// =============================================================================
// Registry State
// =============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    desired: BTreeSet<InstrumentSymbol>,
    watch_lists: HashMap<ConsumerId, HashSet<InstrumentSymbol>>,
}

impl RegistryState {
    fn add(&mut self, symbols: &[InstrumentSymbol]) -> Vec<InstrumentSymbol> {
        symbols
            .iter()
            .filter(|symbol| self.desired.insert((*symbol).clone()))
            .cloned()
            .collect()
    }

    fn remove(&mut self, symbols: &[InstrumentSymbol]) -> Vec<InstrumentSymbol> {
        symbols
            .iter()
            .filter(|symbol| self.desired.remove(*symbol))
            .cloned()
            .collect()
    }

    fn watch(&mut self, consumer: ConsumerId, symbols: &[InstrumentSymbol]) -> Vec<InstrumentSymbol> {
        let list = self.watch_lists.entry(consumer).or_default();
        list.extend(symbols.iter().cloned());
        self.add(symbols)
    }

    fn unwatch(&mut self, consumer: ConsumerId, symbols: &[InstrumentSymbol]) {
        let Some(list) = self.watch_lists.get_mut(&consumer) else {
            return;
        };

        for symbol in symbols {
            list.remove(symbol);
        }

        if list.is_empty() {
            self.watch_lists.remove(&consumer);
        }
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe registry of desired upstream subscriptions and consumer
/// watch lists.
///
/// Every operation takes the lock once, so a snapshot always reflects a
/// complete sequence of add/remove calls.
///
/// # Example
///
/// ```rust
/// use tick_relay::domain::subscription::{InstrumentSymbol, SubscriptionRegistry};
///
/// let registry = SubscriptionRegistry::new();
/// let sbin = InstrumentSymbol::parse("sbin-eq").unwrap();
///
/// let changes = registry.add(&[sbin.clone()]);
/// assert!(changes.subscribe.contains("NSE:SBIN-EQ"));
///
/// // Adding again is a no-op
/// assert!(registry.add(&[sbin.clone()]).is_empty());
///
/// let changes = registry.remove(&[sbin]);
/// assert!(changes.unsubscribe.contains("NSE:SBIN-EQ"));
/// assert!(registry.snapshot().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Union symbols into the desired set.
    ///
    /// Returns the symbols that were not already present.
    pub fn add(&self, symbols: &[InstrumentSymbol]) -> SubscriptionChanges {
        let added = self.state.write().add(symbols);
        SubscriptionChanges::subscribe_only(added)
    }

    /// Remove symbols from the desired set.
    ///
    /// Returns the symbols that were actually present.
    pub fn remove(&self, symbols: &[InstrumentSymbol]) -> SubscriptionChanges {
        let removed = self.state.write().remove(symbols);
        SubscriptionChanges::unsubscribe_only(removed)
    }

    /// Current desired set, used for replay after reconnect.
    #[must_use]
    pub fn snapshot(&self) -> BTreeSet<InstrumentSymbol> {
        self.state.read().desired.clone()
    }

    /// Check whether a symbol is in the desired set.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.state.read().desired.contains(symbol)
    }

    /// Add symbols to a consumer's watch list and to the desired set.
    ///
    /// Returns the changes to the desired set.
    pub fn watch(&self, consumer: ConsumerId, symbols: &[InstrumentSymbol]) -> SubscriptionChanges {
        let added = self.state.write().watch(consumer, symbols);
        SubscriptionChanges::subscribe_only(added)
    }

    /// Remove symbols from a consumer's watch list.
    pub fn unwatch(&self, consumer: ConsumerId, symbols: &[InstrumentSymbol]) {
        self.state.write().unwatch(consumer, symbols);
    }

    /// Drop a consumer's watch list.
    pub fn consumer_disconnected(&self, consumer: ConsumerId) {
        self.state.write().watch_lists.remove(&consumer);
    }

    /// Check whether a consumer is watching a symbol.
    #[must_use]
    pub fn is_watching(&self, consumer: ConsumerId, symbol: &str) -> bool {
        self.state
            .read()
            .watch_lists
            .get(&consumer)
            .is_some_and(|list| list.contains(symbol))
    }

    /// Get a consumer's watch list.
    #[must_use]
    pub fn watch_list(&self, consumer: ConsumerId) -> BTreeSet<InstrumentSymbol> {
        self.state
            .read()
            .watch_lists
            .get(&consumer)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.state.read();
        SubscriptionStats {
            symbol_count: state.desired.len(),
            consumer_count: state.watch_lists.len(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    /// Number of symbols in the desired set.
    pub symbol_count: usize,
    /// Number of consumers with a non-empty watch list.
    pub consumer_count: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn sym(s: &str) -> InstrumentSymbol {
        InstrumentSymbol::parse(s).unwrap()
    }

    #[test_case("NSE:SBIN-EQ", "NSE:SBIN-EQ" ; "already qualified")]
    #[test_case("sbin-eq", "NSE:SBIN-EQ" ; "missing exchange")]
    #[test_case("  nse:nifty50-index ", "NSE:NIFTY50-INDEX" ; "trimmed and upper-cased")]
    #[test_case("BSE:SENSEX-INDEX", "BSE:SENSEX-INDEX" ; "other exchange kept")]
    #[test_case("NSE : RELIANCE-EQ", "NSE:RELIANCE-EQ" ; "spaces around colon")]
    fn symbol_normalization(raw: &str, expected: &str) {
        assert_eq!(InstrumentSymbol::parse(raw).unwrap().as_str(), expected);
    }

    #[test_case("" ; "empty")]
    #[test_case("   " ; "blank")]
    fn symbol_rejects_empty(raw: &str) {
        assert_eq!(InstrumentSymbol::parse(raw), Err(SymbolError::Empty));
    }

    #[test_case("NSE:" ; "missing name")]
    #[test_case(":SBIN-EQ" ; "missing exchange")]
    fn symbol_rejects_malformed(raw: &str) {
        assert!(matches!(
            InstrumentSymbol::parse(raw),
            Err(SymbolError::Malformed(_))
        ));
    }

    #[test]
    fn symbol_exchange_part() {
        assert_eq!(sym("BSE:SENSEX-INDEX").exchange(), "BSE");
        assert_eq!(sym("sbin-eq").exchange(), DEFAULT_EXCHANGE);
    }

    #[test]
    fn normalize_all_drops_invalid() {
        let symbols = normalize_all(["sbin-eq", "", "NSE:", "BSE:SENSEX-INDEX"]);
        assert_eq!(symbols, vec![sym("NSE:SBIN-EQ"), sym("BSE:SENSEX-INDEX")]);
    }

    #[test]
    fn add_new_symbol() {
        let registry = SubscriptionRegistry::new();

        let changes = registry.add(&[sym("NSE:SBIN-EQ")]);

        assert!(changes.subscribe.contains("NSE:SBIN-EQ"));
        assert!(changes.unsubscribe.is_empty());
    }

    #[test]
    fn add_is_idempotent() {
        let registry = SubscriptionRegistry::new();

        registry.add(&[sym("NSE:SBIN-EQ")]);
        let changes = registry.add(&[sym("NSE:SBIN-EQ")]);

        assert!(changes.is_empty());
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn add_partially_existing_symbols() {
        let registry = SubscriptionRegistry::new();

        registry.add(&[sym("NSE:SBIN-EQ")]);
        let changes = registry.add(&[sym("NSE:SBIN-EQ"), sym("NSE:TCS-EQ")]);

        assert_eq!(changes.subscribe.len(), 1);
        assert!(changes.subscribe.contains("NSE:TCS-EQ"));
    }

    #[test]
    fn remove_existing_symbol() {
        let registry = SubscriptionRegistry::new();

        registry.add(&[sym("NSE:SBIN-EQ"), sym("NSE:TCS-EQ")]);
        let changes = registry.remove(&[sym("NSE:SBIN-EQ")]);

        assert!(changes.unsubscribe.contains("NSE:SBIN-EQ"));
        assert!(!registry.contains("NSE:SBIN-EQ"));
        assert!(registry.contains("NSE:TCS-EQ"));
    }

    #[test]
    fn remove_nonexistent_no_changes() {
        let registry = SubscriptionRegistry::new();

        let changes = registry.remove(&[sym("NSE:SBIN-EQ")]);

        assert!(changes.is_empty());
    }

    #[test]
    fn watch_adds_to_desired_set() {
        let registry = SubscriptionRegistry::new();

        let changes = registry.watch(1, &[sym("NSE:SBIN-EQ")]);

        assert!(changes.subscribe.contains("NSE:SBIN-EQ"));
        assert!(registry.contains("NSE:SBIN-EQ"));
        assert!(registry.is_watching(1, "NSE:SBIN-EQ"));
        assert!(!registry.is_watching(2, "NSE:SBIN-EQ"));
    }

    #[test]
    fn second_watcher_needs_no_upstream_change() {
        let registry = SubscriptionRegistry::new();

        registry.watch(1, &[sym("NSE:SBIN-EQ")]);
        let changes = registry.watch(2, &[sym("NSE:SBIN-EQ")]);

        assert!(changes.is_empty());
        assert_eq!(registry.stats().consumer_count, 2);
    }

    #[test]
    fn unwatch_keeps_desired_set() {
        let registry = SubscriptionRegistry::new();

        registry.watch(1, &[sym("NSE:SBIN-EQ")]);
        registry.unwatch(1, &[sym("NSE:SBIN-EQ")]);

        assert!(!registry.is_watching(1, "NSE:SBIN-EQ"));
        assert!(registry.contains("NSE:SBIN-EQ"));
        assert_eq!(registry.stats().consumer_count, 0);
    }

    #[test]
    fn consumer_disconnected_drops_watch_list_only() {
        let registry = SubscriptionRegistry::new();

        registry.watch(1, &[sym("NSE:SBIN-EQ"), sym("NSE:TCS-EQ")]);
        registry.watch(2, &[sym("NSE:TCS-EQ")]);

        registry.consumer_disconnected(1);

        assert!(registry.watch_list(1).is_empty());
        assert_eq!(registry.watch_list(2).len(), 1);
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[test]
    fn unknown_consumer_operations_are_noops() {
        let registry = SubscriptionRegistry::new();

        registry.unwatch(42, &[sym("NSE:SBIN-EQ")]);
        registry.consumer_disconnected(42);

        assert!(registry.watch_list(42).is_empty());
        assert_eq!(registry.stats(), SubscriptionStats::default());
    }

    #[test]
    fn subscription_changes_is_empty() {
        assert!(SubscriptionChanges::default().is_empty());
        assert!(!SubscriptionChanges::subscribe_only(vec![sym("NSE:SBIN-EQ")]).is_empty());
        assert!(!SubscriptionChanges::unsubscribe_only(vec![sym("NSE:SBIN-EQ")]).is_empty());
    }

    #[test]
    fn thread_safety_concurrent_mutations() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(SubscriptionRegistry::new());
        let mut handles = vec![];

        for i in 0..10 {
            let r = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                r.add(&[sym(&format!("NSE:SYM{i}-EQ")), sym("NSE:SHARED-EQ")]);
                if i % 2 == 0 {
                    r.remove(&[sym(&format!("NSE:SYM{i}-EQ"))]);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        // 5 odd symbols survive plus the shared one
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 6);
        assert!(snapshot.contains("NSE:SHARED-EQ"));
        assert!(snapshot.contains("NSE:SYM1-EQ"));
        assert!(!snapshot.contains("NSE:SYM0-EQ"));
    }
}
