//! Summarize a persisted embedding table

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use embedding_table::codec::CURRENT_VERSION;
use embedding_table::{CandleBackend, DataType, EmbeddingItem, read_persisted};
use serde::Serialize;
use tracing::debug;

use super::ItemType;

/// Inspect command arguments
#[derive(Args)]
pub struct InspectCommand {
    /// Table file path
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// How explicit items were encoded
    #[arg(long, value_enum, default_value_t = ItemType::String)]
    pub item_type: ItemType,

    /// Output format as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Number of explicit items to list
    #[arg(long, value_name = "N", default_value_t = 10)]
    pub show_items: usize,
}

/// What `inspect` prints.
#[derive(Debug, Serialize)]
pub struct InspectReport {
    pub file: String,
    pub version: u8,
    /// Absent for version 1.
    pub input_shapes: Option<Vec<String>>,
    pub data_type: String,
    /// Absent for versions 1 and 2.
    pub sparse_grad: Option<bool>,
    /// Absent for versions 1 and 2.
    pub explicit_items: Option<usize>,
    pub num_items: usize,
    pub embedding_size: usize,
    pub retrofitted: bool,
    pub items: Vec<ItemRow>,
}

#[derive(Debug, Serialize)]
pub struct ItemRow {
    pub slot: u32,
    pub item: String,
}

impl InspectCommand {
    pub fn execute(&self) -> Result<()> {
        let report = match self.item_type {
            ItemType::String => self.report::<String>()?,
            ItemType::U64 => self.report::<u64>()?,
            ItemType::I64 => self.report::<i64>()?,
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }
        Ok(())
    }

    fn report<T: EmbeddingItem>(&self) -> Result<InspectReport> {
        let file = File::open(&self.file)
            .with_context(|| format!("failed to open table: {}", self.file.display()))?;
        let backend = CandleBackend::cpu();
        let table = read_persisted::<_, T>(&mut BufReader::new(file), &backend)
            .with_context(|| format!("failed to decode table: {}", self.file.display()))?;
        debug!(version = table.version, retrofitted = table.retrofitted, "decoded table");

        let data_type = table
            .data_type
            .or_else(|| DataType::from_dtype(table.matrix.dtype()))
            .map_or_else(|| format!("{:?}", table.matrix.dtype()), |d| d.to_string());

        let (explicit_items, items) = match &table.index {
            Some(index) => {
                let rows = index
                    .entries()
                    .into_iter()
                    .take(self.show_items)
                    .map(|(item, slot)| ItemRow { slot, item: format!("{item:?}") })
                    .collect();
                (Some(index.len()), rows)
            }
            None => (None, Vec::new()),
        };

        Ok(InspectReport {
            file: self.file.display().to_string(),
            version: table.version,
            input_shapes: table
                .input_shapes
                .as_ref()
                .map(|shapes| shapes.iter().map(ToString::to_string).collect()),
            data_type,
            sparse_grad: table.sparse_grad,
            explicit_items,
            num_items: table.num_items,
            embedding_size: table.embedding_size,
            retrofitted: table.retrofitted,
            items,
        })
    }
}

fn or_absent<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "(not stored)".to_string(), |v| v.to_string())
}

fn print_report(report: &InspectReport) {
    let version = if report.version == CURRENT_VERSION {
        format!("{} (current)", report.version)
    } else {
        format!("{} (legacy)", report.version)
    };
    println!("file:           {}", report.file);
    println!("version:        {version}");
    println!("input shapes:   {}", or_absent(report.input_shapes.as_ref().map(|s| s.join(", "))));
    println!("data type:      {}", report.data_type);
    println!("sparse grad:    {}", or_absent(report.sparse_grad));
    println!("explicit items: {}", or_absent(report.explicit_items));
    println!("matrix:         {} x {}", report.num_items, report.embedding_size);
    println!("retrofitted:    {}", if report.retrofitted { "yes" } else { "no" });
    if !report.items.is_empty() {
        println!("items:");
        for row in &report.items {
            println!("  {:>6}  {}", row.slot, row.item);
        }
    }
}
