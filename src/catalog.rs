//! Catalogue of known message kinds.
//!
//! Applications register every [`MessageKind`] once at start-up. The
//! catalogue rejects duplicate identifiers, names kinds in session logs and
//! can check a handler chain against the registered kinds.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::message::MessageKind;

/// Errors raised while building or consulting a [`MessageCatalog`].
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CatalogError {
    /// Two message types share one kind identifier.
    #[error("message kind {kind} registered by both {existing} and {duplicate}")]
    DuplicateKind {
        /// The contested identifier.
        kind: u32,
        /// Type registered first.
        existing: &'static str,
        /// Type registered second.
        duplicate: &'static str,
    },
    /// A handler expects a kind that was never registered.
    #[error("message kind {kind} ({name}) is not registered")]
    Unregistered {
        /// The missing identifier.
        kind: u32,
        /// Type the handler expects.
        name: &'static str,
    },
}

/// Immutable map from kind identifiers to message type names.
#[derive(Clone, Debug, Default)]
pub struct MessageCatalog {
    kinds: BTreeMap<u32, &'static str>,
}

impl MessageCatalog {
    /// Start an empty catalogue.
    #[must_use]
    pub fn builder() -> MessageCatalogBuilder { MessageCatalogBuilder::default() }

    /// Name of the type registered for `kind`.
    #[must_use]
    pub fn name_of(&self, kind: u32) -> Option<&'static str> { self.kinds.get(&kind).copied() }

    /// Name for `kind`, or `"unknown"` if it was never registered.
    #[must_use]
    pub fn describe(&self, kind: u32) -> &'static str { self.name_of(kind).unwrap_or("unknown") }

    /// `true` if `kind` is registered.
    #[must_use]
    pub fn contains(&self, kind: u32) -> bool { self.kinds.contains_key(&kind) }

    /// Number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize { self.kinds.len() }

    /// `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.kinds.is_empty() }

    /// Check that `kind` is registered.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Unregistered`] if it is not.
    pub fn ensure_registered(&self, kind: u32, name: &'static str) -> Result<(), CatalogError> {
        if self.contains(kind) {
            Ok(())
        } else {
            Err(CatalogError::Unregistered { kind, name })
        }
    }
}

/// Builder for [`MessageCatalog`].
#[derive(Debug, Default)]
pub struct MessageCatalogBuilder {
    kinds: BTreeMap<u32, &'static str>,
}

impl MessageCatalogBuilder {
    /// Register message type `M`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::DuplicateKind`] if another type already uses
    /// `M::KIND`.
    pub fn register<M: MessageKind>(mut self) -> Result<Self, CatalogError> {
        if let Some(&existing) = self.kinds.get(&M::KIND) {
            return Err(CatalogError::DuplicateKind {
                kind: M::KIND,
                existing,
                duplicate: M::name(),
            });
        }
        self.kinds.insert(M::KIND, M::name());
        Ok(self)
    }

    /// Finish the catalogue.
    #[must_use]
    pub fn build(self) -> MessageCatalog { MessageCatalog { kinds: self.kinds } }
}
