//! State reducer library
//!
//! Pure `(old, incoming) -> merged` functions, one per merge rule. Each
//! state type declares which rule applies to which field through a static
//! [`FieldSpec`] schema.
//!
//! Every reducer here is idempotent: merging an update that has already been
//! merged leaves the value unchanged. That is what makes replay after a crash
//! between "node executed" and "checkpoint written" safe.

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;

/// Merge rule declared for a state field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReducerKind {
    /// Incoming value replaces the old one.
    LastWriteWins,
    /// Incoming items are concatenated, skipping ids already present.
    AppendOnly,
    /// Map union; per key, only entries with a new identity are appended.
    KeyedMerge,
    /// Incoming entries fill a matching open slot in place, else append.
    FillOrAppend,
}

/// One entry of a state schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub reducer: ReducerKind,
}

impl FieldSpec {
    pub const fn new(name: &'static str, reducer: ReducerKind) -> Self {
        Self { name, reducer }
    }
}

/// Tri-state update for nullable last-write-wins fields.
///
/// In JSON an absent field is `Unchanged`, `null` is `Clear` and any other
/// value is `Set`. Use with `#[serde(default, skip_serializing_if =
/// "FieldUpdate::is_unchanged")]`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate<T> {
    Unchanged,
    Set(T),
    Clear,
}

impl<T> Default for FieldUpdate<T> {
    fn default() -> Self {
        FieldUpdate::Unchanged
    }
}

impl<T> FieldUpdate<T> {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, FieldUpdate::Unchanged)
    }
}

impl<T> From<Option<T>> for FieldUpdate<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => FieldUpdate::Set(v),
            None => FieldUpdate::Clear,
        }
    }
}

impl<T: Serialize> Serialize for FieldUpdate<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldUpdate::Set(value) => serializer.serialize_some(value),
            FieldUpdate::Unchanged | FieldUpdate::Clear => serializer.serialize_none(),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for FieldUpdate<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(FieldUpdate::from)
    }
}

/// Last write wins for a plain field; `None` keeps the old value.
pub fn last_write_wins<T: Clone>(old: &T, incoming: Option<&T>) -> T {
    incoming.unwrap_or(old).clone()
}

/// Last write wins for a nullable field.
pub fn last_write_wins_nullable<T: Clone>(old: &Option<T>, incoming: &FieldUpdate<T>) -> Option<T> {
    match incoming {
        FieldUpdate::Unchanged => old.clone(),
        FieldUpdate::Set(value) => Some(value.clone()),
        FieldUpdate::Clear => None,
    }
}

/// Concatenate in arrival order, skipping items whose id is already present.
pub fn append_only<T, I, F>(old: &[T], incoming: &[T], id: F) -> Vec<T>
where
    T: Clone,
    I: Eq + Hash,
    F: Fn(&T) -> I,
{
    let mut seen: HashSet<I> = old.iter().map(&id).collect();
    let mut merged = old.to_vec();
    for item in incoming {
        if seen.insert(id(item)) {
            merged.push(item.clone());
        }
    }
    merged
}

/// Union of keys; for an existing key only entries with an unseen identity
/// are appended.
pub fn keyed_merge<K, V, I, F>(
    old: &BTreeMap<K, Vec<V>>,
    incoming: &BTreeMap<K, Vec<V>>,
    identity: F,
) -> BTreeMap<K, Vec<V>>
where
    K: Ord + Clone,
    V: Clone,
    I: Eq + Hash,
    F: Fn(&V) -> I,
{
    let mut merged = old.clone();
    for (key, entries) in incoming {
        let slot = merged.entry(key.clone()).or_default();
        let mut seen: HashSet<I> = slot.iter().map(&identity).collect();
        for entry in entries {
            if seen.insert(identity(entry)) {
                slot.push(entry.clone());
            }
        }
    }
    merged
}

/// Append, except that an incoming entry for which `fills(existing, incoming)`
/// holds replaces the newest such entry in place. Otherwise an entry already
/// present verbatim is skipped.
///
/// Filling comes first: an answer may repeat an earlier answer word for word
/// and must still close the open slot.
pub fn fill_or_append<T, F>(old: &[T], incoming: &[T], fills: F) -> Vec<T>
where
    T: Clone + PartialEq,
    F: Fn(&T, &T) -> bool,
{
    let mut merged = old.to_vec();
    for entry in incoming {
        if let Some(slot) = merged.iter_mut().rev().find(|existing| fills(existing, entry)) {
            *slot = entry.clone();
        } else if !merged.contains(entry) {
            merged.push(entry.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Hit {
        video: &'static str,
        start: u32,
        score: u32,
    }

    fn hit(video: &'static str, start: u32, score: u32) -> Hit {
        Hit { video, start, score }
    }

    fn identity(h: &Hit) -> (&'static str, u32) {
        (h.video, h.start)
    }

    #[test]
    fn test_last_write_wins() {
        assert_eq!(last_write_wins(&false, Some(&true)), true);
        assert_eq!(last_write_wins(&true, None), true);
    }

    #[test]
    fn test_last_write_wins_nullable() {
        let old = Some("plan a".to_string());
        assert_eq!(last_write_wins_nullable(&old, &FieldUpdate::Unchanged), old);
        assert_eq!(
            last_write_wins_nullable(&old, &FieldUpdate::Set("plan b".into())),
            Some("plan b".to_string())
        );
        assert_eq!(last_write_wins_nullable(&old, &FieldUpdate::Clear), None);
    }

    #[test]
    fn test_append_only_preserves_order_and_skips_known_ids() {
        let old = vec![(1, "a"), (2, "b")];
        let incoming = vec![(2, "b"), (3, "c"), (4, "d")];
        let merged = append_only(&old, &incoming, |m| m.0);
        assert_eq!(merged, vec![(1, "a"), (2, "b"), (3, "c"), (4, "d")]);

        let again = append_only(&merged, &incoming, |m| m.0);
        assert_eq!(again, merged);
    }

    #[test]
    fn test_append_only_never_shrinks() {
        let old = vec![1, 2, 3];
        let merged = append_only(&old, &[], |v| *v);
        assert!(merged.len() >= old.len());
    }

    #[test]
    fn test_keyed_merge_unions_keys() {
        let mut old = BTreeMap::new();
        old.insert("call_1", vec![hit("v1", 0, 90)]);
        let mut incoming = BTreeMap::new();
        incoming.insert("call_2", vec![hit("v2", 5, 80)]);

        let merged = keyed_merge(&old, &incoming, identity);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["call_2"], vec![hit("v2", 5, 80)]);
    }

    #[test]
    fn test_keyed_merge_suppresses_duplicates_within_key() {
        let mut old = BTreeMap::new();
        old.insert("call_1", vec![hit("v1", 0, 90)]);
        let mut incoming = BTreeMap::new();
        incoming.insert("call_1", vec![hit("v1", 0, 95), hit("v1", 30, 70)]);

        let merged = keyed_merge(&old, &incoming, identity);
        assert_eq!(merged["call_1"], vec![hit("v1", 0, 90), hit("v1", 30, 70)]);
    }

    #[test]
    fn test_keyed_merge_is_idempotent() {
        let mut old = BTreeMap::new();
        old.insert("call_1", vec![hit("v1", 0, 90)]);
        let mut update = BTreeMap::new();
        update.insert("call_1", vec![hit("v1", 30, 70)]);
        update.insert("call_2", vec![hit("v2", 0, 60), hit("v2", 0, 60)]);

        let once = keyed_merge(&old, &update, identity);
        let twice = keyed_merge(&once, &update, identity);
        assert_eq!(once, twice);
        assert_eq!(once["call_2"].len(), 1);
    }

    #[test]
    fn test_keyed_merge_disjoint_updates_commute() {
        let base: BTreeMap<&str, Vec<Hit>> = BTreeMap::new();
        let mut a = BTreeMap::new();
        a.insert("call_1", vec![hit("v1", 0, 90)]);
        let mut b = BTreeMap::new();
        b.insert("call_2", vec![hit("v2", 0, 60)]);

        let ab = keyed_merge(&keyed_merge(&base, &a, identity), &b, identity);
        let ba = keyed_merge(&keyed_merge(&base, &b, identity), &a, identity);
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_fill_or_append_fills_open_slot() {
        let open = ("worker", "");
        let answered = ("worker", "looks good");
        let fills = |existing: &(&str, &str), incoming: &(&str, &str)| {
            existing.1.is_empty() && existing.0 == incoming.0
        };

        let merged = fill_or_append(&[open], &[answered], fills);
        assert_eq!(merged, vec![answered]);

        let again = fill_or_append(&merged, &[answered], fills);
        assert_eq!(again, merged);

        let other = fill_or_append(&merged, &[("planner", "")], fills);
        assert_eq!(other.len(), 2);
    }

    #[test]
    fn test_fill_or_append_fills_even_when_answer_repeats() {
        let fills = |existing: &(&str, &str), incoming: &(&str, &str)| {
            existing.1.is_empty() && existing.0 == incoming.0
        };
        let log = [("worker", "again"), ("worker", "")];

        let merged = fill_or_append(&log, &[("worker", "again")], fills);
        assert_eq!(merged, vec![("worker", "again"), ("worker", "again")]);

        // re-delivery of the same answer is a no-op
        assert_eq!(fill_or_append(&merged, &[("worker", "again")], fills), merged);
    }

    #[test]
    fn test_field_update_json() {
        #[derive(serde::Deserialize, serde::Serialize, Default)]
        struct Patch {
            #[serde(default, skip_serializing_if = "FieldUpdate::is_unchanged")]
            plan: FieldUpdate<String>,
        }

        let absent: Patch = serde_json::from_str("{}").unwrap();
        assert!(absent.plan.is_unchanged());
        let cleared: Patch = serde_json::from_str(r#"{"plan": null}"#).unwrap();
        assert_eq!(cleared.plan, FieldUpdate::Clear);
        let set: Patch = serde_json::from_str(r#"{"plan": "x"}"#).unwrap();
        assert_eq!(set.plan, FieldUpdate::Set("x".into()));

        assert_eq!(serde_json::to_string(&Patch::default()).unwrap(), "{}");
    }
}
