//! Identifier classification.
//!
//! Ids minted on-device follow `{prefix}-{timestampMillis}-{randomAlnum}`
//! where the prefix names the entity kind. Ids issued by the backend are
//! opaque (UUID-shaped) and never start with one of the recognised prefixes.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::time::now_ms;

const RANDOM_SUFFIX_LEN: usize = 9;

static MONTH_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^month-(.+)-(\d{4})-(\d{2})$").expect("month id pattern to compile")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Family,
    Month,
    Expense,
    RecurringExpense,
    Subcategory,
    IncomeSource,
    Goal,
    GoalEntry,
    SyncQueueItem,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        EntityKind::Family,
        EntityKind::Month,
        EntityKind::Expense,
        EntityKind::RecurringExpense,
        EntityKind::Subcategory,
        EntityKind::IncomeSource,
        EntityKind::Goal,
        EntityKind::GoalEntry,
        EntityKind::SyncQueueItem,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            EntityKind::Family => "family",
            EntityKind::Month => "month",
            EntityKind::Expense => "expense",
            EntityKind::RecurringExpense => "recurring",
            EntityKind::Subcategory => "subcategory",
            EntityKind::IncomeSource => "income",
            EntityKind::Goal => "goal",
            EntityKind::GoalEntry => "goalentry",
            EntityKind::SyncQueueItem => "queue",
        }
    }

    /// Stable tag used in sync queue rows and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Family => "family",
            EntityKind::Month => "month",
            EntityKind::Expense => "expense",
            EntityKind::RecurringExpense => "recurring_expense",
            EntityKind::Subcategory => "subcategory",
            EntityKind::IncomeSource => "income_source",
            EntityKind::Goal => "goal",
            EntityKind::GoalEntry => "goal_entry",
            EntityKind::SyncQueueItem => "sync_queue_item",
        }
    }

    pub fn parse(tag: &str) -> Option<EntityKind> {
        EntityKind::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True when `id` was minted on-device. Pure; never consults external state.
pub fn is_local_origin(id: &str) -> bool {
    let Some((head, _)) = id.split_once('-') else {
        return false;
    };
    EntityKind::ALL.iter().any(|kind| kind.prefix() == head)
}

pub fn generate_local_id(kind: EntityKind) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}",
        kind.prefix(),
        now_ms(),
        &random[..RANDOM_SUFFIX_LEN]
    )
}

/// Deterministic id of a month created without the backend.
pub fn month_id(family_id: &str, year: i32, month: u32) -> String {
    format!("month-{family_id}-{year:04}-{month:02}")
}

/// Recovers `(year, month)` from an id built by [`month_id`].
pub fn parse_month_id(id: &str) -> Option<(i32, u32)> {
    let caps = MONTH_ID_PATTERN.captures(id)?;
    let year: i32 = caps.get(2)?.as_str().parse().ok()?;
    let month: u32 = caps.get(3)?.as_str().parse().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Local,
    Remote,
}

/// An identifier tagged with where it was minted. Equality and hashing
/// look at the value only.
#[derive(Debug, Clone)]
pub struct EntityId {
    value: String,
    origin: Origin,
}

impl EntityId {
    pub fn local(kind: EntityKind) -> Self {
        Self {
            value: generate_local_id(kind),
            origin: Origin::Local,
        }
    }

    pub fn local_month(family_id: &EntityId, year: i32, month: u32) -> Self {
        Self {
            value: month_id(family_id.as_str(), year, month),
            origin: Origin::Local,
        }
    }

    pub fn remote(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            origin: Origin::Remote,
        }
    }

    /// Compatibility shim for ids persisted before origins were carried
    /// alongside them: falls back to prefix classification.
    pub fn classify(value: impl Into<String>) -> Self {
        let value = value.into();
        let origin = if is_local_origin(&value) {
            Origin::Local
        } else {
            Origin::Remote
        };
        Self { value, origin }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn is_local(&self) -> bool {
        self.origin == Origin::Local
    }

    pub fn into_string(self) -> String {
        self.value
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

impl PartialEq for EntityId {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for EntityId {}

impl std::hash::Hash for EntityId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl PartialEq<str> for EntityId {
    fn eq(&self, other: &str) -> bool {
        self.value == other
    }
}

impl PartialEq<&str> for EntityId {
    fn eq(&self, other: &&str) -> bool {
        self.value == *other
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(EntityId::classify(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_follow_grammar() {
        let id = generate_local_id(EntityKind::Expense);
        let parts: Vec<&str> = id.splitn(3, '-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "expense");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), RANDOM_SUFFIX_LEN);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(is_local_origin(&id));
    }

    #[test]
    fn uuids_are_remote() {
        assert!(!is_local_origin("3f2504e0-4f89-11d3-9a0c-0305e82c3301"));
        assert!(!is_local_origin(&Uuid::new_v4().to_string()));
    }

    #[test]
    fn classification_is_exact_and_case_sensitive() {
        assert!(!is_local_origin("Family-1-abc"));
        assert!(!is_local_origin("families-1-abc"));
        assert!(!is_local_origin("family"));
        assert!(!is_local_origin(""));
        assert!(is_local_origin("goalentry-1-abc"));
    }

    #[test]
    fn month_ids_round_trip_year_and_month() {
        let family = EntityId::local(EntityKind::Family);
        let id = EntityId::local_month(&family, 2025, 3);
        assert!(id.as_str().ends_with("-2025-03"));
        assert!(is_local_origin(id.as_str()));
        assert_eq!(parse_month_id(id.as_str()), Some((2025, 3)));

        let remote_family = Uuid::new_v4().to_string();
        let id = month_id(&remote_family, 2024, 12);
        assert_eq!(parse_month_id(&id), Some((2024, 12)));
    }

    #[test]
    fn month_id_parser_rejects_other_shapes() {
        assert_eq!(parse_month_id("month-1700000000000-abc123def"), None);
        assert_eq!(parse_month_id("month-fam-2025-13"), None);
        assert_eq!(parse_month_id("3f2504e0-4f89-11d3-9a0c-0305e82c3301"), None);
    }

    #[test]
    fn entity_id_serializes_as_plain_string() {
        let id = EntityId::remote("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        let back: EntityId = serde_json::from_str("\"family-1-x\"").unwrap();
        assert!(back.is_local());
    }

    #[test]
    fn kind_tags_parse_back() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
    }
}
