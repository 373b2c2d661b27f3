//! Human-readable name registry for identifiers.
//!
//! Chains are addressed by 32-byte ids on the wire but by short names
//! ("X", "P") everywhere humans are involved. The aliaser is the two-way
//! mapping between the two: an id can carry arbitrarily many aliases, an
//! alias belongs to at most one id, and the first alias assigned stays the
//! primary one used for display.

use std::collections::HashMap;

use super::Id;

/// Errors from alias registration and lookup.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AliasError {
    #[error("no id registered with alias {0:?}")]
    UnknownAlias(String),
    #[error("no alias registered for id {0}")]
    NoAlias(Id),
    #[error("alias {0:?} is already used by another id")]
    AliasTaken(String),
}

/// Two-way mapping between string aliases and [`Id`]s.
#[derive(Clone, Debug, Default)]
pub struct Aliaser {
    dealias: HashMap<String, Id>,
    aliases: HashMap<Id, Vec<String>>,
}

impl Aliaser {
    /// An empty registry.
    pub fn new() -> Self {
        Aliaser::default()
    }

    /// The id registered under `alias`.
    pub fn lookup(&self, alias: &str) -> Result<Id, AliasError> {
        self.dealias
            .get(alias)
            .copied()
            .ok_or_else(|| AliasError::UnknownAlias(alias.to_string()))
    }

    /// All aliases of `id`, in the order they were assigned.
    pub fn aliases(&self, id: &Id) -> &[String] {
        self.aliases.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The first alias assigned to `id`.
    pub fn primary_alias(&self, id: &Id) -> Result<&str, AliasError> {
        self.aliases
            .get(id)
            .and_then(|names| names.first())
            .map(String::as_str)
            .ok_or(AliasError::NoAlias(*id))
    }

    /// Register `alias` for `id`. Fails if the alias already names any id.
    pub fn alias(&mut self, id: Id, alias: impl Into<String>) -> Result<(), AliasError> {
        let alias = alias.into();
        if self.dealias.contains_key(&alias) {
            return Err(AliasError::AliasTaken(alias));
        }
        self.dealias.insert(alias.clone(), id);
        self.aliases.entry(id).or_default().push(alias);
        Ok(())
    }
}
