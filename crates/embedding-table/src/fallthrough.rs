//! Behavior for items that have no explicit slot.

use std::fmt;
use std::sync::Arc;

use crate::error::{EmbeddingError, Result};
use crate::index::{RESERVED_SLOT, Slot};
use crate::item::EmbeddingItem;

/// A caller-supplied fallthrough that owns the whole unknown-item path.
///
/// `encode`/`decode` default to the item's own codec.
pub trait FallthroughHandler<T: EmbeddingItem>: Send + Sync {
    fn encode(&self, item: &T) -> Result<Vec<u8>> {
        item.encode()
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        T::decode(bytes)
    }

    fn has_item(&self, item: &T) -> bool;

    fn embed(&self, item: &T) -> Result<Slot>;

    fn embed_batch(&self, items: &[T]) -> Result<Vec<Slot>> {
        items.iter().map(|item| self.embed(item)).collect()
    }

    fn unembed(&self, slot: Slot) -> Result<Option<T>>;
}

/// The active fallthrough policy of a table. Exactly one is active.
pub enum Fallthrough<T: EmbeddingItem> {
    /// Unknown items are an error.
    None,
    /// Unknown items use row 0 of the matrix.
    DefaultRow,
    /// Unknown items use row 0, which un-embeds to the alias item.
    DefaultItem(T),
    Custom(Arc<dyn FallthroughHandler<T>>),
}

/// Discriminant of [`Fallthrough`], for logging and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallthroughKind {
    None,
    DefaultRow,
    DefaultItem,
    Custom,
}

impl fmt::Display for FallthroughKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::DefaultRow => "default-row",
            Self::DefaultItem => "default-item",
            Self::Custom => "custom",
        })
    }
}

impl<T: EmbeddingItem> Fallthrough<T> {
    pub fn kind(&self) -> FallthroughKind {
        match self {
            Self::None => FallthroughKind::None,
            Self::DefaultRow => FallthroughKind::DefaultRow,
            Self::DefaultItem(_) => FallthroughKind::DefaultItem,
            Self::Custom(_) => FallthroughKind::Custom,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Whether the policy accepts `item` even though the table lacks it.
    pub fn has_item(&self, item: &T) -> bool {
        match self {
            Self::None => false,
            Self::DefaultRow | Self::DefaultItem(_) => true,
            Self::Custom(handler) => handler.has_item(item),
        }
    }

    /// Slot for an item that the table does not contain.
    pub fn embed(&self, item: &T) -> Result<Slot> {
        match self {
            Self::None => Err(EmbeddingError::ItemNotFound),
            Self::DefaultRow | Self::DefaultItem(_) => Ok(RESERVED_SLOT),
            Self::Custom(handler) => handler.embed(item),
        }
    }

    /// Slots for a batch of items the table does not contain.
    pub fn embed_batch(&self, items: &[T]) -> Result<Vec<Slot>> {
        match self {
            Self::None if !items.is_empty() => Err(EmbeddingError::ItemNotFound),
            Self::None => Ok(Vec::new()),
            Self::DefaultRow | Self::DefaultItem(_) => Ok(vec![RESERVED_SLOT; items.len()]),
            Self::Custom(handler) => handler.embed_batch(items),
        }
    }

    /// Item represented by `slot` on the fallthrough path.
    pub fn unembed(&self, slot: Slot) -> Result<Option<T>> {
        match self {
            Self::None => Err(EmbeddingError::UndefinedFallthrough),
            Self::DefaultRow => Ok(None),
            Self::DefaultItem(alias) => Ok(Some(alias.clone())),
            Self::Custom(handler) => handler.unembed(slot),
        }
    }
}

impl<T: EmbeddingItem> Default for Fallthrough<T> {
    fn default() -> Self {
        Self::None
    }
}

impl<T: EmbeddingItem> Clone for Fallthrough<T> {
    fn clone(&self) -> Self {
        match self {
            Self::None => Self::None,
            Self::DefaultRow => Self::DefaultRow,
            Self::DefaultItem(alias) => Self::DefaultItem(alias.clone()),
            Self::Custom(handler) => Self::Custom(Arc::clone(handler)),
        }
    }
}

impl<T: EmbeddingItem> fmt::Debug for Fallthrough<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::DefaultRow => f.write_str("DefaultRow"),
            Self::DefaultItem(alias) => f.debug_tuple("DefaultItem").field(alias).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
