//! Items that can be stored in an embedding table.
//!
//! The table never inspects an item beyond hashing and equality; the byte
//! encoding below is only used when a table is persisted.

use std::fmt::Debug;
use std::hash::Hash;

use crate::error::{EmbeddingError, Result};

/// An item that can be mapped to a slot and written to a persisted table.
pub trait EmbeddingItem: Eq + Hash + Clone + Debug + Send + Sync + 'static {
    /// Encode the item as opaque bytes.
    fn encode(&self) -> Result<Vec<u8>>;

    /// Decode an item previously produced by [`EmbeddingItem::encode`].
    fn decode(bytes: &[u8]) -> Result<Self>;
}

impl EmbeddingItem for String {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(self.as_bytes().to_vec())
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| EmbeddingError::ItemCodec(format!("item is not UTF-8: {e}")))
    }
}

macro_rules! int_item {
    ($($t:ty),*) => {$(
        impl EmbeddingItem for $t {
            fn encode(&self) -> Result<Vec<u8>> {
                Ok(self.to_be_bytes().to_vec())
            }

            fn decode(bytes: &[u8]) -> Result<Self> {
                let raw: [u8; std::mem::size_of::<$t>()] = bytes.try_into().map_err(|_| {
                    EmbeddingError::ItemCodec(format!(
                        "expected {} bytes for {}, got {}",
                        std::mem::size_of::<$t>(),
                        stringify!($t),
                        bytes.len()
                    ))
                })?;
                Ok(<$t>::from_be_bytes(raw))
            }
        }
    )*};
}

int_item!(u32, u64, i32, i64);
