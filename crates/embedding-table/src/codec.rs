//! Versioned binary format of a persisted embedding table.
//!
//! ```text
//! u8     version                      1..=4
//! shapes input-shape descriptor       v2, v3, v4
//! bool   zero slot already reserved   v3 only
//! bool   sparse_grad                  v3, v4
//! utf    data type name               v3, v4
//! i32    explicit item count          v3, v4
//!   i32    encoded item length
//!   bytes  encoded item
//!   i32    slot
//! ...    matrix payload               see CandleBackend::save_matrix
//! ```
//!
//! Versions 2 and 3 (flag unset) predate the reserved zero slot. Loading them
//! prepends one zero row to the matrix; see [`migrate`].

use std::io::{Read, Write};

use candle_core::Tensor;

use crate::backend::CandleBackend;
use crate::dtype::DataType;
use crate::error::{EmbeddingError, Result};
use crate::index::{ItemIndex, MAX_SLOT, Slot};
use crate::item::EmbeddingItem;
use crate::shape::{self, Shape};
use crate::wire;

/// Version written by [`write_table`].
pub const CURRENT_VERSION: u8 = 4;
/// Oldest version [`read_persisted`] accepts.
pub const OLDEST_VERSION: u8 = 1;
/// Name of the single parameter of an embedding table.
pub const PARAMETER_NAME: &str = "embedding";

/// Borrowed state written by [`write_table`].
#[derive(Debug, Clone)]
pub struct TableView<'a, T> {
    pub input_shapes: &'a [Shape],
    pub sparse_grad: bool,
    pub data_type: DataType,
    /// Explicit `(item, slot)` pairs.
    pub entries: &'a [(T, Slot)],
    pub matrix: &'a Tensor,
}

/// Layout flags carried by legacy headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LegacyFlags {
    /// The v3-only flag telling whether slot 0 was already reserved.
    pub zero_reserved: Option<bool>,
}

/// Header fields decoded before the matrix payload.
#[derive(Debug, Clone)]
pub struct Header<T> {
    pub version: u8,
    pub input_shapes: Option<Vec<Shape>>,
    pub flags: LegacyFlags,
    pub sparse_grad: Option<bool>,
    pub data_type: Option<DataType>,
    /// Explicit entries as stored, before any migration.
    pub entries: Option<Vec<(T, Slot)>>,
}

/// A fully decoded and migrated payload.
#[derive(Debug)]
pub struct PersistedTable<T: EmbeddingItem> {
    pub version: u8,
    /// `None` for version 1, which stores no shapes.
    pub input_shapes: Option<Vec<Shape>>,
    pub sparse_grad: Option<bool>,
    pub data_type: Option<DataType>,
    /// `None` for versions 1 and 2, which store no item entries.
    pub index: Option<ItemIndex<T>>,
    pub matrix: Tensor,
    pub num_items: usize,
    pub embedding_size: usize,
    /// Whether the zero row was prepended while loading.
    pub retrofitted: bool,
}

/// Result of [`migrate`].
#[derive(Debug, Clone)]
pub struct Migrated {
    pub matrix: Tensor,
    pub retrofitted: bool,
}

/// Whether a payload of `version` lacks the reserved zero row.
///
/// Version 1 is trusted to be zero-reserving as written.
pub fn needs_retrofit(version: u8, flags: LegacyFlags) -> bool {
    match version {
        2 => true,
        3 => !flags.zero_reserved.unwrap_or(true),
        _ => false,
    }
}

/// Bring a loaded matrix into the current layout.
///
/// When the payload predates the reserved zero slot, a `1 x cols` zero row is
/// prepended exactly once. Otherwise the matrix is returned untouched.
pub fn migrate(
    version: u8,
    flags: LegacyFlags,
    matrix: Tensor,
    backend: &CandleBackend,
) -> Result<Migrated> {
    if !needs_retrofit(version, flags) {
        return Ok(Migrated { matrix, retrofitted: false });
    }
    let matrix = prepend_zero_row(&matrix, backend)?;
    Ok(Migrated { matrix, retrofitted: true })
}

/// A copy of `matrix` with one all-zero row stacked on top.
pub fn prepend_zero_row(matrix: &Tensor, backend: &CandleBackend) -> Result<Tensor> {
    let (_, cols) = matrix.dims2()?;
    let data_type = DataType::from_dtype(matrix.dtype()).ok_or_else(|| {
        EmbeddingError::malformed(format!("unsupported matrix dtype {:?}", matrix.dtype()))
    })?;
    let zero = backend.zeros(1, cols, data_type)?.to_device(matrix.device())?;
    backend.concat_rows(&zero, matrix)
}

/// Move legacy 0-based explicit slots up by one to follow a prepended zero row.
pub fn shift_slots<T>(entries: Vec<(T, Slot)>) -> Result<Vec<(T, Slot)>> {
    entries
        .into_iter()
        .map(|(item, slot)| {
            if slot >= MAX_SLOT {
                return Err(EmbeddingError::malformed(format!("slot {slot} cannot be shifted")));
            }
            Ok((item, slot + 1))
        })
        .collect()
}

/// Write a table in the current format.
pub fn write_table<W: Write, T: EmbeddingItem>(
    w: &mut W,
    view: &TableView<'_, T>,
    backend: &CandleBackend,
) -> Result<()> {
    wire::write_u8(w, CURRENT_VERSION)?;
    shape::write_input_shapes(w, view.input_shapes)?;
    wire::write_bool(w, view.sparse_grad)?;
    wire::write_utf(w, view.data_type.as_str())?;
    wire::write_len(w, view.entries.len(), "explicit item count")?;
    for (item, slot) in view.entries {
        let encoded = item.encode()?;
        wire::write_len(w, encoded.len(), "encoded item length")?;
        w.write_all(&encoded)?;
        wire::write_i32(w, *slot as i32)?;
    }
    backend.save_matrix(w, PARAMETER_NAME, view.matrix)?;
    tracing::debug!(
        version = CURRENT_VERSION,
        explicit_items = view.entries.len(),
        "saved embedding table"
    );
    Ok(())
}

/// Decode the version-specific header that precedes the matrix payload.
pub fn read_header<R: Read, T: EmbeddingItem>(r: &mut R) -> Result<Header<T>> {
    let version = wire::read_u8(r, "version")?;
    let mut header = Header {
        version,
        input_shapes: None,
        flags: LegacyFlags::default(),
        sparse_grad: None,
        data_type: None,
        entries: None,
    };
    match version {
        3 | CURRENT_VERSION => {
            header.input_shapes = Some(shape::read_input_shapes(r)?);
            if version == 3 {
                header.flags.zero_reserved = Some(wire::read_bool(r, "zero-reserved flag")?);
            }
            header.sparse_grad = Some(wire::read_bool(r, "sparse_grad")?);
            header.data_type = Some(wire::read_utf(r, "data type")?.parse()?);
            header.entries = Some(read_entries(r)?);
        }
        2 => {
            header.input_shapes = Some(shape::read_input_shapes(r)?);
        }
        1 => {}
        other => {
            return Err(EmbeddingError::malformed(format!("unsupported encoding version: {other}")));
        }
    }
    Ok(header)
}

fn read_entries<R: Read, T: EmbeddingItem>(r: &mut R) -> Result<Vec<(T, Slot)>> {
    let count = wire::read_len(r, "explicit item count")?;
    let mut entries = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        let len = wire::read_len(r, "encoded item length")?;
        let bytes = wire::read_bytes(r, len, "encoded item")?;
        let item = T::decode(&bytes)?;
        let raw = wire::read_i32(r, "slot")?;
        let slot = Slot::try_from(raw)
            .map_err(|_| EmbeddingError::malformed(format!("negative slot {raw} for {item:?}")))?;
        entries.push((item, slot));
    }
    Ok(entries)
}

/// Decode a whole payload, migrate legacy layouts, and validate entries.
///
/// Nothing is shared with a live table, so a failure here leaves callers
/// untouched.
pub fn read_persisted<R: Read, T: EmbeddingItem>(
    r: &mut R,
    backend: &CandleBackend,
) -> Result<PersistedTable<T>> {
    let header: Header<T> = read_header(r)?;
    if header.version < CURRENT_VERSION {
        tracing::info!(version = header.version, "loading legacy embedding table");
    }

    let (name, matrix) = backend.load_matrix(r)?;
    if name != PARAMETER_NAME {
        tracing::debug!(%name, "matrix payload carries an unexpected parameter name");
    }
    let stored_rows = matrix.dims2()?.0;

    let Migrated { matrix, retrofitted } = migrate(header.version, header.flags, matrix, backend)?;
    let (num_items, embedding_size) = matrix.dims2()?;
    if num_items == 0 {
        return Err(EmbeddingError::malformed("embedding matrix has no rows"));
    }
    if retrofitted {
        tracing::warn!(
            version = header.version,
            stored_rows,
            num_items,
            "prepended reserved zero row to legacy embedding matrix"
        );
    }

    let index = match header.entries {
        Some(entries) => {
            let entries = if retrofitted { shift_slots(entries)? } else { entries };
            Some(ItemIndex::from_entries(entries, num_items)?)
        }
        None => None,
    };

    Ok(PersistedTable {
        version: header.version,
        input_shapes: header.input_shapes,
        sparse_grad: header.sparse_grad,
        data_type: header.data_type,
        index,
        matrix,
        num_items,
        embedding_size,
        retrofitted,
    })
}
