//! Deferred-offset ledger: named byte ranges of a write buffer that are patched
//! once their values are known.

use std::{collections::BTreeMap, fmt};

use crate::{byte_order::ByteOrder, errors::ReservationError, format::Format};

/// Identity of one packed record inside a writer. Issued by the writer, so two
/// records of the same type packed into one buffer never share reservation keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Owner {
    pub id: u64,
    pub label: String,
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.label, self.id)
    }
}

/// Handle of a pending patch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReservationKey {
    pub owner: Option<Owner>,
    pub name: String,
}

impl ReservationKey {
    /// Key for a reservation made directly on a writer.
    pub fn named(name: impl Into<String>) -> Self {
        ReservationKey {
            owner: None,
            name: name.into(),
        }
    }

    /// Key for a field reserved while packing a record.
    pub fn field(owner: Owner, name: impl Into<String>) -> Self {
        ReservationKey {
            owner: Some(owner),
            name: name.into(),
        }
    }
}

impl fmt::Display for ReservationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.owner {
            Some(owner) => write!(f, "{owner}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Where a patch goes and how its values are encoded. The format has its varints
/// resolved and the byte order is fixed when the reservation is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub offset: usize,
    pub byte_order: ByteOrder,
    pub format: Format,
    /// Position of `offset` within the pack call that wrote the placeholder.
    /// Native alignment of the patch is computed from it.
    pub align_base: usize,
}

#[derive(Debug, Default)]
pub struct Ledger {
    entries: BTreeMap<ReservationKey, Reservation>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        key: ReservationKey,
        reservation: Reservation,
    ) -> Result<(), ReservationError> {
        if self.entries.contains_key(&key) {
            return Err(ReservationError::Duplicate(key.to_string()));
        }
        self.entries.insert(key, reservation);
        Ok(())
    }

    pub fn get(&self, key: &ReservationKey) -> Result<&Reservation, ReservationError> {
        self.entries
            .get(key)
            .ok_or_else(|| ReservationError::Unknown(key.to_string()))
    }

    pub fn remove(&mut self, key: &ReservationKey) -> Option<Reservation> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ReservationKey> {
        self.entries.keys()
    }

    /// Fails, naming every outstanding key, unless all reservations are filled.
    pub fn ensure_empty(&self) -> Result<(), ReservationError> {
        if self.entries.is_empty() {
            return Ok(());
        }
        Err(ReservationError::Outstanding(
            self.entries.keys().map(ToString::to_string).collect(),
        ))
    }
}
