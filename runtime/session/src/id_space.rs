//! Id Spaces
//!
//! A session is known under three different ids: the id the client chose
//! ([`ClientId`]), the id the serving domain sees ([`ServerId`]), and, for
//! forwarded sessions, the client id used one level up. Each id space maps
//! ids to the arena key of the session record.

use std::collections::BTreeMap;
use std::fmt;

use cap_identity::Index;

/// Id usable as a key of an [`IdSpace`]
pub trait SpaceId: Copy + Ord + fmt::Debug {
    fn from_raw(raw: u64) -> Self;
    fn raw(self) -> u64;
}

/// Session id chosen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub u64);

/// Session id within a server's id space
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerId(pub u64);

impl SpaceId for ClientId {
    fn from_raw(raw: u64) -> Self {
        ClientId(raw)
    }

    fn raw(self) -> u64 {
        self.0
    }
}

impl SpaceId for ServerId {
    fn from_raw(raw: u64) -> Self {
        ServerId(raw)
    }

    fn raw(self) -> u64 {
        self.0
    }
}

/// Arena key of a session record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionKey(pub(crate) Index);

/// Ordered map from ids to values with id allocation
#[derive(Debug)]
pub struct IdSpace<I: SpaceId, T> {
    next: u64,
    entries: BTreeMap<I, T>,
}

impl<I: SpaceId, T> Default for IdSpace<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: SpaceId, T> IdSpace<I, T> {
    pub fn new() -> Self {
        Self {
            next: 1,
            entries: BTreeMap::new(),
        }
    }

    /// Insert under a freshly allocated id
    pub fn insert(&mut self, value: T) -> I {
        while self.entries.contains_key(&I::from_raw(self.next)) {
            self.next = self.next.wrapping_add(1).max(1);
        }

        let id = I::from_raw(self.next);
        self.next = self.next.wrapping_add(1).max(1);
        self.entries.insert(id, value);
        id
    }

    /// Insert under a caller-chosen id; refuses ids already in use
    pub fn insert_at(&mut self, id: I, value: T) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, value);
        true
    }

    pub fn get(&self, id: I) -> Option<&T> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.entries.get_mut(&id)
    }

    pub fn contains(&self, id: I) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn remove(&mut self, id: I) -> Option<T> {
        self.entries.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.entries.iter().map(|(id, value)| (*id, value))
    }

    pub fn ids(&self) -> Vec<I> {
        self.entries.keys().copied().collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
