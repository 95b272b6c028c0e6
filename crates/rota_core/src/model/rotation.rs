//! Rotation aggregate.
//!
//! # Responsibility
//! - Hold the people list, the current-turn pointer and completion history.
//! - Apply the rotation mutations with pointer repair on index shifts.
//!
//! # Invariants
//! - `people` never contains two equal names (exact, case-sensitive match).
//! - When `people` is non-empty, `current_index < people.len()` after every
//!   mutation and after every decode.
//! - `history` is append-only; only `reset` clears it.
//!
//! # See also
//! - `sync::coordinator` for persistence of every mutation.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// One completed turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Display name at the time the turn was completed.
    pub person: String,
    /// Serialized as ISO-8601 UTC with millisecond precision.
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
}

/// Single persisted aggregate shared by local and remote stores.
///
/// Field names follow the persisted document layout (`currentIndex`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationState {
    #[serde(default)]
    people: Vec<String>,
    #[serde(default)]
    current_index: usize,
    #[serde(default)]
    history: Vec<HistoryEntry>,
}

/// User-input rejections. State is unchanged when one is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationError {
    DuplicateName(String),
    LastPerson,
    IndexOutOfRange { index: usize, len: usize },
}

impl Display for RotationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateName(name) => write!(f, "person already exists: {name}"),
            Self::LastPerson => write!(f, "at least one person must remain in the rotation"),
            Self::IndexOutOfRange { index, len } => {
                write!(f, "person index {index} is out of range for {len} people")
            }
        }
    }
}

impl Error for RotationError {}

/// Persisted payload could not be decoded into a `RotationState`.
#[derive(Debug)]
pub struct StateDecodeError(serde_json::Error);

impl Display for StateDecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid rotation state payload: {}", self.0)
    }
}

impl Error for StateDecodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.0)
    }
}

impl RotationState {
    /// Creates the empty first-run state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a state from raw parts, repairing an out-of-range pointer.
    ///
    /// Does not deduplicate `people`; callers importing foreign data are
    /// expected to hand over a list that already satisfies uniqueness.
    pub fn from_parts(
        people: Vec<String>,
        current_index: usize,
        history: Vec<HistoryEntry>,
    ) -> Self {
        let mut state = Self {
            people,
            current_index,
            history,
        };
        state.normalize();
        state
    }

    pub fn people(&self) -> &[String] {
        &self.people
    }

    /// Raw pointer value. Meaningless when `people` is empty.
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Returns whether the rotation has nobody in it.
    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }

    /// Returns whether there is anything worth persisting or pushing.
    pub fn has_data(&self) -> bool {
        !self.people.is_empty() || !self.history.is_empty()
    }

    /// Name of whoever is up next.
    pub fn current_person(&self) -> Option<&str> {
        self.people.get(self.current_index).map(String::as_str)
    }

    /// Latest `limit` history entries, newest first.
    pub fn recent_history(&self, limit: usize) -> Vec<&HistoryEntry> {
        self.history.iter().rev().take(limit).collect()
    }

    /// Adds a person at the end of the rotation.
    ///
    /// Returns `Ok(None)` when the trimmed name is empty (nothing to add),
    /// `Ok(Some(name))` with the stored name otherwise.
    ///
    /// # Errors
    /// - `DuplicateName` when the trimmed name is already present.
    pub fn add_person(&mut self, name: &str) -> Result<Option<String>, RotationError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        if self.people.iter().any(|existing| existing == trimmed) {
            return Err(RotationError::DuplicateName(trimmed.to_string()));
        }

        self.people.push(trimmed.to_string());
        Ok(Some(trimmed.to_string()))
    }

    /// Removes the person at `index` and keeps the pointer on the same
    /// person, or wraps to the front when the pointed-at last entry is removed.
    ///
    /// # Errors
    /// - `LastPerson` when fewer than two people remain.
    /// - `IndexOutOfRange` when `index` does not address a person.
    pub fn delete_person(&mut self, index: usize) -> Result<String, RotationError> {
        let len = self.people.len();
        if len <= 1 {
            return Err(RotationError::LastPerson);
        }
        if index >= len {
            return Err(RotationError::IndexOutOfRange { index, len });
        }

        if index < self.current_index {
            self.current_index -= 1;
        } else if index == self.current_index && self.current_index >= len - 1 {
            self.current_index = 0;
        }

        Ok(self.people.remove(index))
    }

    /// Records a completed turn for the current person now and advances.
    pub fn mark_done(&mut self) -> Option<HistoryEntry> {
        self.mark_done_at(Utc::now())
    }

    /// Records a completed turn at `at` and advances the pointer.
    ///
    /// `at` is stored at millisecond precision, the precision of the
    /// persisted layout. Returns `None` without touching history when the
    /// rotation is empty.
    pub fn mark_done_at(&mut self, at: DateTime<Utc>) -> Option<HistoryEntry> {
        let person = self.current_person()?.to_string();
        let entry = HistoryEntry {
            person,
            timestamp: at.trunc_subsecs(3),
        };
        self.history.push(entry.clone());
        self.advance();
        Some(entry)
    }

    /// Passes the turn on without recording history.
    ///
    /// Returns the skipped person, or `None` when the rotation is empty.
    pub fn skip(&mut self) -> Option<String> {
        let person = self.current_person()?.to_string();
        self.advance();
        Some(person)
    }

    /// Clears people, pointer and history.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Repairs an out-of-range pointer on a non-empty list.
    ///
    /// Returns `true` when the pointer was changed.
    pub fn normalize(&mut self) -> bool {
        if !self.people.is_empty() && self.current_index >= self.people.len() {
            self.current_index = 0;
            return true;
        }
        false
    }

    /// Encodes the persisted document shape.
    pub fn to_document(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Decodes a persisted document, repairing the pointer if needed.
    pub fn from_document(document: serde_json::Value) -> Result<Self, StateDecodeError> {
        let mut state: Self = serde_json::from_value(document).map_err(StateDecodeError)?;
        state.normalize();
        Ok(state)
    }

    /// Encodes the persisted payload as a compact JSON string.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decodes a persisted JSON string, repairing the pointer if needed.
    pub fn from_json_str(raw: &str) -> Result<Self, StateDecodeError> {
        let mut state: Self = serde_json::from_str(raw).map_err(StateDecodeError)?;
        state.normalize();
        Ok(state)
    }

    fn advance(&mut self) {
        self.current_index = (self.current_index + 1) % self.people.len();
    }
}

mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|value| value.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
