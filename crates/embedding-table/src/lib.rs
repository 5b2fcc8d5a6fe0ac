//! Item-to-vector embedding table with fallthrough policies and versioned
//! persistence.
//!
//! Items map to rows of a `(num_items, embedding_size)` matrix. Row 0 is
//! reserved for items the table does not know, routed through a
//! [`Fallthrough`] policy. Tables persist in a compact big-endian format;
//! all four historical versions load, and older layouts that predate the
//! reserved row are migrated on the way in.
//!
//! # Example
//!
//! ```no_run
//! use embedding_table::{CandleBackend, Embedding, EmbeddingConfig};
//!
//! let config = EmbeddingConfig::new(vec!["a".to_string(), "b".to_string()], 8)
//!     .with_default_row();
//! let table = Embedding::from_config(config, CandleBackend::cpu()).unwrap();
//! assert_eq!(table.embed_one(&"b".to_string()).unwrap(), 2);
//! assert_eq!(table.embed_one(&"zzz".to_string()).unwrap(), 0);
//!
//! let vectors = table.lookup(&["a".to_string(), "zzz".to_string()]).unwrap();
//! assert_eq!(vectors.dims(), &[2, 8]);
//! table.save_file("table.bin").unwrap();
//! ```

pub mod backend;
pub mod codec;
pub mod config;
pub mod dtype;
pub mod embedding;
pub mod error;
pub mod fallthrough;
pub mod index;
pub mod item;
pub mod shape;
pub mod wire;

pub use backend::{CandleBackend, GatherParams};
pub use codec::{CURRENT_VERSION, PersistedTable, read_persisted};
pub use config::{EmbeddingConfig, WeightInit};
pub use dtype::DataType;
pub use embedding::Embedding;
pub use error::{EmbeddingError, Result};
pub use fallthrough::{Fallthrough, FallthroughHandler, FallthroughKind};
pub use index::{ItemIndex, RESERVED_SLOT, Slot};
pub use item::EmbeddingItem;
pub use shape::{Shape, UNKNOWN_DIM};
