//! Weight tables exchanged between providers and selectors.

use std::collections::BTreeMap;
use std::fmt;

use crate::server::Server;

/// Lowest weight any server can have, so nobody is starved forever.
pub const MIN_WEIGHT: u32 = 1;

/// Server → weight, iterated in server identity order.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct WeightTable {
    weights: BTreeMap<Server, u32>,
}

impl WeightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every server with the same weight, i.e. plain round robin.
    pub fn uniform<'a, I>(servers: I) -> Self
    where
        I: IntoIterator<Item = &'a Server>,
    {
        servers
            .into_iter()
            .map(|server| (server.clone(), MIN_WEIGHT))
            .collect()
    }

    /// Inserts `weight`, raised to [`MIN_WEIGHT`] if needed.
    pub fn insert(&mut self, server: Server, weight: u32) -> Option<u32> {
        self.weights.insert(server, weight.max(MIN_WEIGHT))
    }

    pub fn remove(&mut self, server: &Server) -> Option<u32> {
        self.weights.remove(server)
    }

    pub fn get(&self, server: &Server) -> Option<u32> {
        self.weights.get(server).copied()
    }

    pub fn contains(&self, server: &Server) -> bool {
        self.weights.contains_key(server)
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Server, u32)> {
        self.weights.iter().map(|(server, weight)| (server, *weight))
    }

    pub fn servers(&self) -> impl Iterator<Item = &Server> {
        self.weights.keys()
    }
}

impl FromIterator<(Server, u32)> for WeightTable {
    fn from_iter<T: IntoIterator<Item = (Server, u32)>>(iter: T) -> Self {
        let mut table = WeightTable::new();
        for (server, weight) in iter {
            table.insert(server, weight);
        }
        table
    }
}

impl fmt::Debug for WeightTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.weights.iter().map(|(s, w)| (s.to_string(), w)))
            .finish()
    }
}

// "a.local:8080: 3, b.local:8080: 1"
impl fmt::Display for WeightTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, (server, weight)) in self.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}{}: {}", server.host(), server.path(), weight)?;
        }
        Ok(())
    }
}
