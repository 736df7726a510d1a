//! Tier merge and substitution application.
//!
//! Precedence on key collision: Local > RemoteRoom > RemoteGlobal. The
//! flattened table is published as a whole value; readers never observe a
//! partially built merge.

use std::sync::RwLock;

use tokio::sync::watch;

use crate::rules::model::{RemoteKeywordDoc, SubstitutionRule};

/// Flattened `from → to` table preserving first-insertion position, with
/// overwrite-in-place on key collision (the same semantics a JS `Map.set`
/// sequence produces).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedTable {
    entries: Vec<(String, String)>,
}

impl ResolvedTable {
    /// Merge the three tiers into one table. Rules with an empty `from` are
    /// skipped in every tier.
    pub fn merge(
        remote: Option<&RemoteKeywordDoc>,
        room_id: Option<u64>,
        local: &[SubstitutionRule],
    ) -> Self {
        let mut table = Self::default();

        if let Some(doc) = remote {
            for (from, to) in &doc.global.keywords {
                table.insert(from, to);
            }
            if let Some(room) = room_id.and_then(|id| doc.room_keywords(id)) {
                for (from, to) in room {
                    table.insert(from, to);
                }
            }
        }

        for rule in local {
            table.insert(&rule.from, &rule.to);
        }

        table
    }

    fn insert(&mut self, from: &str, to: &str) {
        if from.is_empty() {
            return;
        }
        match self.entries.iter_mut().find(|(f, _)| f == from) {
            Some((_, existing)) => *existing = to.to_string(),
            None => self.entries.push((from.to_string(), to.to_string())),
        }
    }

    /// Apply every rule as a literal replace-all, chaining each rule over
    /// the text produced by the previous one. Sequential by construction:
    /// if a rule's `to` contains a later rule's `from`, the later rule will
    /// re-transform the substituted text. Callers relying on idempotence
    /// must avoid such overlaps.
    pub fn apply(&self, text: &str) -> String {
        let mut result = text.to_string();
        for (from, to) in &self.entries {
            result = result.replace(from.as_str(), to);
        }
        result
    }

    pub fn get(&self, from: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(f, _)| f == from)
            .map(|(_, to)| to.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The three rule tiers plus the cached room identity, publishing the merged
/// table through a watch channel.
///
/// Writers (settings actions, the sync task, room resolution) mutate tiers
/// under a short lock and then swap in a freshly merged table. The dispatch
/// loop and the retrier read `current()` without locking.
pub struct RuleBook {
    tiers: RwLock<Tiers>,
    table: watch::Sender<ResolvedTable>,
}

#[derive(Default)]
struct Tiers {
    remote: Option<RemoteKeywordDoc>,
    local: Vec<SubstitutionRule>,
    room_id: Option<u64>,
}

impl RuleBook {
    pub fn new() -> Self {
        let (table, _) = watch::channel(ResolvedTable::default());
        Self {
            tiers: RwLock::new(Tiers::default()),
            table,
        }
    }

    /// Seed local rules from persisted state without triggering a rebuild
    /// per rule.
    pub fn set_local(&self, rules: Vec<SubstitutionRule>) {
        self.tiers.write().expect("rule tiers poisoned").local = rules;
        self.rebuild();
    }

    pub fn add_local(&self, rule: SubstitutionRule) {
        self.tiers
            .write()
            .expect("rule tiers poisoned")
            .local
            .push(rule);
        self.rebuild();
    }

    /// Remove the local rule at `index`. Returns the removed rule if any.
    pub fn remove_local(&self, index: usize) -> Option<SubstitutionRule> {
        let removed = {
            let mut tiers = self.tiers.write().expect("rule tiers poisoned");
            if index < tiers.local.len() {
                Some(tiers.local.remove(index))
            } else {
                None
            }
        };
        if removed.is_some() {
            self.rebuild();
        }
        removed
    }

    pub fn local_rules(&self) -> Vec<SubstitutionRule> {
        self.tiers
            .read()
            .expect("rule tiers poisoned")
            .local
            .clone()
    }

    /// Replace the remote document after a completed sync.
    pub fn set_remote(&self, doc: RemoteKeywordDoc) {
        self.tiers.write().expect("rule tiers poisoned").remote = Some(doc);
        self.rebuild();
    }

    /// Record the resolved room identity; unlocks the RemoteRoom tier.
    pub fn set_room(&self, room_id: u64) {
        self.tiers.write().expect("rule tiers poisoned").room_id = Some(room_id);
        self.rebuild();
    }

    /// The resolved room identity, once known.
    pub fn room_id(&self) -> Option<u64> {
        self.tiers.read().expect("rule tiers poisoned").room_id
    }

    /// Snapshot of the most recently completed merge.
    pub fn current(&self) -> ResolvedTable {
        self.table.borrow().clone()
    }

    /// Subscribe to table replacements.
    pub fn subscribe(&self) -> watch::Receiver<ResolvedTable> {
        self.table.subscribe()
    }

    fn rebuild(&self) {
        let merged = {
            let tiers = self.tiers.read().expect("rule tiers poisoned");
            ResolvedTable::merge(tiers.remote.as_ref(), tiers.room_id, &tiers.local)
        };
        self.table.send_replace(merged);
    }
}

impl Default for RuleBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(json: &str) -> RemoteKeywordDoc {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn precedence_local_over_room_over_global() {
        let remote = doc(
            r#"{
                "global": {"keywords": {"A": "1"}},
                "rooms": [{"room": 7, "keywords": {"A": "2", "B": "3"}}]
            }"#,
        );
        let local = vec![SubstitutionRule::new("B", "4")];

        let table = ResolvedTable::merge(Some(&remote), Some(7), &local);
        assert_eq!(table.get("A"), Some("2"));
        assert_eq!(table.get("B"), Some("4"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn room_tier_ignored_until_room_known() {
        let remote = doc(
            r#"{
                "global": {"keywords": {"A": "1"}},
                "rooms": [{"room": 7, "keywords": {"A": "2"}}]
            }"#,
        );
        let table = ResolvedTable::merge(Some(&remote), None, &[]);
        assert_eq!(table.get("A"), Some("1"));
    }

    #[test]
    fn empty_from_skipped_in_every_tier() {
        let remote = doc(r#"{"global": {"keywords": {"": "x", "A": "1"}}}"#);
        let local = vec![SubstitutionRule::new("", "y")];
        let table = ResolvedTable::merge(Some(&remote), None, &local);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("A"), Some("1"));
    }

    #[test]
    fn apply_replaces_all_occurrences() {
        let table = ResolvedTable::merge(None, None, &[SubstitutionRule::new("ab", "x")]);
        assert_eq!(table.apply("abcab"), "xcx");
    }

    #[test]
    fn apply_chains_sequentially_not_simultaneously() {
        // First rule produces text the second rule then re-transforms.
        let local = vec![
            SubstitutionRule::new("A", "B"),
            SubstitutionRule::new("B", "C"),
        ];
        let table = ResolvedTable::merge(None, None, &local);
        assert_eq!(table.apply("AB"), "CC");
    }

    #[test]
    fn apply_uses_merged_precedence_result() {
        let remote = doc(
            r#"{
                "global": {"keywords": {"A": "1"}},
                "rooms": [{"room": 7, "keywords": {"A": "2", "B": "3"}}]
            }"#,
        );
        let local = vec![SubstitutionRule::new("B", "4")];
        let table = ResolvedTable::merge(Some(&remote), Some(7), &local);
        assert_eq!(table.apply("AB"), "24");
    }

    #[test]
    fn overwrite_keeps_first_insertion_position() {
        let local = vec![
            SubstitutionRule::new("A", "1"),
            SubstitutionRule::new("B", "2"),
            SubstitutionRule::new("A", "3"),
        ];
        let table = ResolvedTable::merge(None, None, &local);
        assert_eq!(table.len(), 2);
        // "A" keeps position 0 with the overwritten value.
        assert_eq!(table.apply("AB"), "32");
    }

    #[test]
    fn rule_book_swaps_whole_tables() {
        let book = RuleBook::new();
        let mut rx = book.subscribe();
        assert!(book.current().is_empty());

        book.add_local(SubstitutionRule::new("A", "1"));
        assert!(rx.has_changed().unwrap());
        rx.mark_unchanged();
        assert_eq!(book.current().get("A"), Some("1"));

        book.set_room(7);
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn rule_book_remove_local() {
        let book = RuleBook::new();
        book.set_local(vec![
            SubstitutionRule::new("A", "1"),
            SubstitutionRule::new("B", "2"),
        ]);
        assert!(book.remove_local(5).is_none());
        let removed = book.remove_local(0).unwrap();
        assert_eq!(removed.from, "A");
        assert_eq!(book.current().len(), 1);
        assert_eq!(book.current().get("B"), Some("2"));
    }

    #[test]
    fn room_resolution_unlocks_room_tier() {
        let book = RuleBook::new();
        book.set_remote(doc(
            r#"{
                "global": {"keywords": {"A": "1"}},
                "rooms": [{"room": 9, "keywords": {"A": "2"}}]
            }"#,
        ));
        assert_eq!(book.current().get("A"), Some("1"));
        book.set_room(9);
        assert_eq!(book.current().get("A"), Some("2"));
    }
}
