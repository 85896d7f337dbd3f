//! Languages: process-wide allocators of symbol identifiers.
//!
//! A [`Language`] hands out sequential ids for the symbols minted in it and
//! is itself identified by an opaque 128-bit id. Cloning a language shares
//! the allocator; two languages are equal whenever their opaque ids match,
//! even if one of them has been sealed by a trip through serialization.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{LogicError, LogicResult};

/// Allocation state of a language. `Sealed` languages can no longer mint
/// identifiers; symbols already minted remain valid.
#[derive(Debug)]
enum Counter {
    Active(u64),
    Sealed,
}

/// A process-wide allocator of sequential symbol identifiers.
///
/// Thread-safe: the counter is guarded by a mutex, so symbols may be minted
/// concurrently. Equality and hashing use the opaque id only, which is what
/// lets a deserialized (sealed) language still compare equal to the live one
/// it was saved from.
#[derive(Debug, Clone)]
pub struct Language {
    id: Uuid,
    counter: Arc<Mutex<Counter>>,
}

impl Language {
    /// Creates a fresh language with a random opaque id.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            counter: Arc::new(Mutex::new(Counter::Active(0))),
        }
    }

    /// Creates a language with a caller-chosen id.
    ///
    /// Intended for well-known vocabularies (logical operators) that must
    /// keep stable identities across processes.
    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            counter: Arc::new(Mutex::new(Counter::Active(0))),
        }
    }

    /// Creates a sealed language: symbols minted elsewhere can be
    /// reconstructed against it, but no new identifier will ever come out.
    pub fn sealed(id: Uuid) -> Self {
        Self {
            id,
            counter: Arc::new(Mutex::new(Counter::Sealed)),
        }
    }

    /// The opaque id of this language.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Allocates the next sequential identifier.
    pub fn next_id(&self) -> LogicResult<u64> {
        let mut counter = self.counter.lock().expect("language counter poisoned");
        match &mut *counter {
            Counter::Active(next) => {
                let id = *next;
                *next += 1;
                Ok(id)
            }
            Counter::Sealed => Err(LogicError::SealedLanguage),
        }
    }

    /// Whether this handle can still allocate identifiers.
    pub fn is_sealed(&self) -> bool {
        matches!(*self.counter.lock().expect("language counter poisoned"), Counter::Sealed)
    }
}

impl Default for Language {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Language {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Language {}

impl Hash for Language {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Language({})", self.id)
    }
}

// Only the opaque id crosses a persistence boundary; the counter stays
// behind, which is exactly what makes the deserialized side sealed.
impl Serialize for Language {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.id.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Language {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = Uuid::deserialize(deserializer)?;
        Ok(Language::sealed(id))
    }
}

/// The identity of a symbol: its owning language plus a sequential id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub language: Language,
    pub sequential_id: u64,
}

impl Identifier {
    /// Total order over (language id, sequential id).
    ///
    /// Used wherever a deterministic traversal of variables is needed, most
    /// importantly to pick canonical representatives in head-less bindings.
    pub fn sort_key(&self) -> (u128, u64) {
        (self.language.id().as_u128(), self.sequential_id)
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.language.id(), self.sequential_id)
    }
}
