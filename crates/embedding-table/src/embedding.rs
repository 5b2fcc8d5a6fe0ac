//! The embedding table: item lookup, fallthrough dispatch, the row gather,
//! and persistence of the whole table.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use candle_core::Tensor;

use crate::backend::{CandleBackend, GatherParams};
use crate::codec::{self, PARAMETER_NAME, PersistedTable, TableView};
use crate::config::EmbeddingConfig;
use crate::dtype::DataType;
use crate::error::{EmbeddingError, Result};
use crate::fallthrough::Fallthrough;
use crate::index::{ItemIndex, RESERVED_SLOT, Slot};
use crate::item::EmbeddingItem;
use crate::shape::{Shape, UNKNOWN_DIM};

/// Maps items to rows of a `(num_items, embedding_size)` matrix.
///
/// Slot 0 is reserved for the fallthrough policy; explicit items occupy
/// slots `1..num_items`. Lookups take `&self` and may run from many threads.
/// [`Embedding::load`] takes `&mut self` and replaces the index and the
/// matrix together.
#[derive(Debug)]
pub struct Embedding<T: EmbeddingItem> {
    index: ItemIndex<T>,
    matrix: Tensor,
    embedding_size: usize,
    data_type: DataType,
    sparse_grad: bool,
    fallthrough: Fallthrough<T>,
    input_shapes: Vec<Shape>,
    backend: CandleBackend,
}

fn default_input_shapes() -> Vec<Shape> {
    vec![Shape::new([UNKNOWN_DIM])]
}

fn matrix_data_type(matrix: &Tensor) -> Result<DataType> {
    DataType::from_dtype(matrix.dtype()).ok_or_else(|| {
        EmbeddingError::Configuration(format!("unsupported matrix dtype {:?}", matrix.dtype()))
    })
}

impl<T: EmbeddingItem> Embedding<T> {
    /// Build a fresh table with a newly initialized matrix.
    pub fn from_config(config: EmbeddingConfig<T>, backend: CandleBackend) -> Result<Self> {
        config.validate()?;
        let fallthrough = config.fallthrough()?;
        let index = ItemIndex::with_items(config.items)?;
        let matrix = backend.initialize(
            index.num_items(),
            config.embedding_size,
            config.data_type,
            &config.init,
        )?;
        let table = Self {
            index,
            matrix,
            embedding_size: config.embedding_size,
            data_type: config.data_type,
            sparse_grad: config.sparse_grad,
            fallthrough,
            input_shapes: default_input_shapes(),
            backend,
        };
        table.log_constructed("config");
        Ok(table)
    }

    /// Wrap a trained matrix whose rows line up with `items`.
    ///
    /// `matrix` may either already carry the reserved row 0
    /// (`items.len() + 1` rows) or hold exactly one row per item, in which
    /// case a zero row is prepended.
    pub fn from_pretrained(
        matrix: Tensor,
        items: Vec<T>,
        fallthrough: Fallthrough<T>,
        backend: CandleBackend,
    ) -> Result<Self> {
        let index = ItemIndex::with_items(items)?;
        let (rows, cols) = matrix.dims2()?;
        if cols == 0 {
            return Err(EmbeddingError::Configuration("embedding_size must be >= 1".into()));
        }
        let matrix = if rows == index.num_items() {
            matrix
        } else if rows == index.len() {
            tracing::warn!(rows, "pretrained matrix lacks the reserved row; prepending zeros");
            codec::prepend_zero_row(&matrix, &backend)?
        } else {
            return Err(EmbeddingError::Configuration(format!(
                "pretrained matrix has {rows} rows for {} items",
                index.len()
            )));
        };
        let matrix = matrix.to_device(backend.device())?;
        let table = Self {
            index,
            data_type: matrix_data_type(&matrix)?,
            matrix,
            embedding_size: cols,
            sparse_grad: true,
            fallthrough,
            input_shapes: default_input_shapes(),
            backend,
        };
        table.log_constructed("pretrained");
        Ok(table)
    }

    /// Build a table straight from a persisted payload.
    ///
    /// Payloads without item entries (versions 1 and 2) yield a table with no
    /// explicit items.
    pub fn restore<R: Read>(
        r: &mut R,
        backend: CandleBackend,
        fallthrough: Fallthrough<T>,
    ) -> Result<Self> {
        let persisted = codec::read_persisted(r, &backend)?;
        let mut table = Self {
            index: ItemIndex::new(),
            matrix: persisted.matrix.clone(),
            embedding_size: persisted.embedding_size,
            data_type: matrix_data_type(&persisted.matrix)?,
            sparse_grad: true,
            fallthrough,
            input_shapes: default_input_shapes(),
            backend,
        };
        table.apply(persisted)?;
        table.log_constructed("restore");
        Ok(table)
    }

    /// Whether gradients of the gather are sparse.
    ///
    /// Pretrained and restored tables start sparse; persisted payloads
    /// carry the flag, so a later `load` overrides it.
    #[must_use]
    pub fn with_sparse_grad(mut self, sparse_grad: bool) -> Self {
        self.sparse_grad = sparse_grad;
        self
    }

    fn log_constructed(&self, source: &str) {
        tracing::debug!(
            source,
            items = self.index.len(),
            num_items = self.num_items(),
            embedding_size = self.embedding_size,
            data_type = %self.data_type,
            fallthrough = %self.fallthrough.kind(),
            "constructed embedding table"
        );
    }

    // ── Lookup ──────────────────────────────────────────────────

    /// Slot for `item`: its explicit slot, or whatever the fallthrough says.
    pub fn embed_one(&self, item: &T) -> Result<Slot> {
        match self.index.lookup_forward(item) {
            Some(slot) => Ok(slot),
            None => self.fallthrough.embed(item),
        }
    }

    /// Slots for `items`, in order.
    ///
    /// Items the table lacks are resolved in one call to the fallthrough, so
    /// a custom handler sees every miss of the batch together.
    pub fn embed_batch(&self, items: &[T]) -> Result<Vec<Slot>> {
        let mut slots = Vec::with_capacity(items.len());
        let mut miss_positions = Vec::new();
        let mut misses = Vec::new();
        for (pos, item) in items.iter().enumerate() {
            match self.index.lookup_forward(item) {
                Some(slot) => slots.push(slot),
                None => {
                    slots.push(RESERVED_SLOT);
                    miss_positions.push(pos);
                    misses.push(item.clone());
                }
            }
        }
        if misses.is_empty() {
            return Ok(slots);
        }

        let resolved = self.fallthrough.embed_batch(&misses)?;
        if resolved.len() != misses.len() {
            return Err(EmbeddingError::Configuration(format!(
                "fallthrough returned {} slots for {} items",
                resolved.len(),
                misses.len()
            )));
        }
        for (pos, slot) in miss_positions.into_iter().zip(resolved) {
            slots[pos] = slot;
        }
        Ok(slots)
    }

    /// Item stored at `slot`.
    ///
    /// Slot 0 is answered by the fallthrough policy and errors when none is
    /// configured. Unassigned slots yield `None`.
    pub fn unembed(&self, slot: Slot) -> Result<Option<T>> {
        if slot == RESERVED_SLOT {
            return self.fallthrough.unembed(slot);
        }
        Ok(self.index.lookup_backward(slot))
    }

    /// Whether `item` has an explicit slot.
    pub fn has_item(&self, item: &T) -> bool {
        self.index.contains(item)
    }

    /// Whether `embed_one(item)` would succeed.
    pub fn can_embed(&self, item: &T) -> bool {
        self.has_item(item) || self.fallthrough.has_item(item)
    }

    /// Slots of `items` as a rank-1 `u32` tensor on the backend device.
    pub fn embed_to_tensor(&self, items: &[T]) -> Result<Tensor> {
        let slots = self.embed_batch(items)?;
        self.backend.slots_to_tensor(&slots)
    }

    // ── Forward ─────────────────────────────────────────────────

    /// Gather the rows addressed by `indices`.
    ///
    /// The output has the index shape plus a trailing `embedding_size`
    /// dimension. A scalar index yields a single rank-1 vector.
    pub fn forward(&self, indices: &Tensor) -> Result<Tensor> {
        let params = GatherParams {
            embedding_size: self.embedding_size,
            num_items: self.num_items(),
            data_type: self.data_type,
            sparse_grad: self.sparse_grad,
        };
        if indices.rank() == 0 {
            let out = self.backend.gather(&indices.reshape(1)?, &self.matrix, &params)?;
            return Ok(out.reshape(self.embedding_size)?);
        }
        self.backend.gather(indices, &self.matrix, &params)
    }

    /// Embed `items` and gather their rows in one step.
    pub fn lookup(&self, items: &[T]) -> Result<Tensor> {
        self.forward(&self.embed_to_tensor(items)?)
    }

    pub fn output_shape(&self, input: &Shape) -> Shape {
        input.append(&[self.embedding_size as i64])
    }

    /// Shape of the named parameter. Only `"embedding"` exists.
    pub fn parameter_shape(&self, name: &str) -> Result<Shape> {
        if name != PARAMETER_NAME {
            return Err(EmbeddingError::InvalidParameterName(name.to_string()));
        }
        Ok(Shape::from_dims(&[self.num_items(), self.embedding_size]))
    }

    // ── Persistence ─────────────────────────────────────────────

    /// Write the table in the current format.
    pub fn save<W: Write>(&self, w: &mut W) -> Result<()> {
        let entries = self.index.entries();
        let view = TableView {
            input_shapes: &self.input_shapes,
            sparse_grad: self.sparse_grad,
            data_type: self.data_type,
            entries: &entries,
            matrix: &self.matrix,
        };
        codec::write_table(w, &view, &self.backend)
    }

    /// Replace the index and matrix with a persisted payload of any version.
    ///
    /// On error `self` is left exactly as it was. The fallthrough policy is
    /// kept; versions 1 and 2 also keep the current explicit items.
    pub fn load<R: Read>(&mut self, r: &mut R) -> Result<()> {
        let persisted = codec::read_persisted(r, &self.backend)?;
        self.apply(persisted)
    }

    /// Validate a decoded payload against this table and swap it in.
    fn apply(&mut self, persisted: PersistedTable<T>) -> Result<()> {
        let index = match persisted.index {
            Some(index) => index,
            None => ItemIndex::from_entries(self.index.entries(), persisted.num_items)?,
        };
        let data_type = match persisted.data_type {
            Some(data_type) => data_type,
            None => matrix_data_type(&persisted.matrix)?,
        };

        self.index = index;
        self.matrix = persisted.matrix;
        self.embedding_size = persisted.embedding_size;
        self.data_type = data_type;
        if let Some(sparse_grad) = persisted.sparse_grad {
            self.sparse_grad = sparse_grad;
        }
        if let Some(input_shapes) = persisted.input_shapes {
            self.input_shapes = input_shapes;
        }
        Ok(())
    }

    pub fn save_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        self.save(&mut w)?;
        w.flush()?;
        Ok(())
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let mut r = BufReader::new(File::open(path)?);
        self.load(&mut r)
    }

    // ── Accessors ───────────────────────────────────────────────

    pub fn matrix(&self) -> &Tensor {
        &self.matrix
    }

    /// Rows in the matrix, counting the reserved row 0.
    pub fn num_items(&self) -> usize {
        self.index.num_items()
    }

    pub fn embedding_size(&self) -> usize {
        self.embedding_size
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn sparse_grad(&self) -> bool {
        self.sparse_grad
    }

    pub fn input_shapes(&self) -> &[Shape] {
        &self.input_shapes
    }

    pub fn fallthrough(&self) -> &Fallthrough<T> {
        &self.fallthrough
    }

    /// Explicit `(item, slot)` pairs ordered by slot.
    pub fn entries(&self) -> Vec<(T, Slot)> {
        self.index.entries()
    }
}
