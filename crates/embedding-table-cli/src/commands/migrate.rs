//! Rewrite a persisted embedding table in the current format

use std::fs;
use std::io::Cursor;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use embedding_table::codec::CURRENT_VERSION;
use embedding_table::{CandleBackend, Embedding, EmbeddingItem, Fallthrough};
use tracing::info;

use super::ItemType;

/// Migrate command arguments
#[derive(Args)]
pub struct MigrateCommand {
    /// Table file to read
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Where to write the migrated table
    #[arg(value_name = "OUTPUT")]
    pub output: PathBuf,

    /// How explicit items were encoded
    #[arg(long, value_enum, default_value_t = ItemType::String)]
    pub item_type: ItemType,

    /// Overwrite OUTPUT if it exists
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

impl MigrateCommand {
    pub fn execute(&self) -> Result<()> {
        if self.output.exists() && !self.force {
            anyhow::bail!("{} already exists; pass --force to overwrite", self.output.display());
        }
        match self.item_type {
            ItemType::String => self.run::<String>(),
            ItemType::U64 => self.run::<u64>(),
            ItemType::I64 => self.run::<i64>(),
        }
    }

    fn run<T: EmbeddingItem>(&self) -> Result<()> {
        let bytes = fs::read(&self.input)
            .with_context(|| format!("failed to read table: {}", self.input.display()))?;
        let from_version = bytes.first().copied().unwrap_or_default();

        // Fallthrough policies are not persisted, so none is needed to rewrite.
        let table: Embedding<T> =
            Embedding::restore(&mut Cursor::new(bytes), CandleBackend::cpu(), Fallthrough::None)
                .with_context(|| format!("failed to decode table: {}", self.input.display()))?;
        table
            .save_file(&self.output)
            .with_context(|| format!("failed to write table: {}", self.output.display()))?;

        info!(
            from_version,
            to_version = CURRENT_VERSION,
            num_items = table.num_items(),
            embedding_size = table.embedding_size(),
            output = %self.output.display(),
            "migrated embedding table"
        );
        Ok(())
    }
}
