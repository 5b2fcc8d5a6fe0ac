//! CLI command implementations

pub mod inspect;
pub mod migrate;

pub use inspect::InspectCommand;
pub use migrate::MigrateCommand;

use clap::ValueEnum;

/// Item type a table file was written with.
///
/// Items are stored as opaque bytes, so the reader has to be told how to
/// decode them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ItemType {
    /// UTF-8 strings
    String,
    /// Big-endian unsigned 64-bit integers
    U64,
    /// Big-endian signed 64-bit integers
    I64,
}
