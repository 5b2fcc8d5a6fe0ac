//! Shape descriptors for block inputs, outputs, and parameters.

use std::fmt;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::{EmbeddingError, Result};
use crate::wire;

/// Marks a dimension whose size is only known at run time (e.g. batch size).
pub const UNKNOWN_DIM: i64 = -1;

const MAX_RANK: usize = 64;
const MAX_INPUT_SHAPES: usize = 1024;

/// An n-dimensional shape, optionally annotated with a layout string
/// (one character per dimension, e.g. `"NC"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape {
    pub dims: Vec<i64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub layout: String,
}

impl Shape {
    pub fn new(dims: impl Into<Vec<i64>>) -> Self {
        Self { dims: dims.into(), layout: String::new() }
    }

    /// A zero-dimensional (scalar) shape.
    pub fn scalar() -> Self {
        Self::default()
    }

    pub fn from_dims(dims: &[usize]) -> Self {
        Self::new(dims.iter().map(|&d| d as i64).collect::<Vec<_>>())
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns a new shape with `extra` appended as trailing dimensions.
    /// The layout annotation is dropped.
    #[must_use]
    pub fn append(&self, extra: &[i64]) -> Self {
        let mut dims = self.dims.clone();
        dims.extend_from_slice(extra);
        Self::new(dims)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        wire::write_len(w, self.dims.len(), "shape rank")?;
        for &d in &self.dims {
            wire::write_i64(w, d)?;
        }
        let layout: Vec<u16> = self.layout.encode_utf16().collect();
        wire::write_len(w, layout.len(), "layout length")?;
        for c in layout {
            wire::write_u16(w, c)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let rank = wire::read_len(r, "shape rank")?;
        if rank > MAX_RANK {
            return Err(EmbeddingError::malformed(format!("shape rank {rank} exceeds {MAX_RANK}")));
        }
        let dims = (0..rank).map(|_| wire::read_i64(r, "shape dimension")).collect::<Result<_>>()?;
        let layout_len = wire::read_len(r, "layout length")?;
        if layout_len > MAX_RANK {
            return Err(EmbeddingError::malformed(format!("layout length {layout_len}")));
        }
        let units =
            (0..layout_len).map(|_| wire::read_u16(r, "layout")).collect::<Result<Vec<_>>>()?;
        let layout = String::from_utf16(&units)
            .map_err(|_| EmbeddingError::malformed("shape layout is not valid UTF-16"))?;
        Ok(Self { dims, layout })
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, ")")
    }
}

impl From<Vec<i64>> for Shape {
    fn from(dims: Vec<i64>) -> Self {
        Self::new(dims)
    }
}

/// Write the input-shape descriptor: a count followed by each shape.
pub fn write_input_shapes<W: Write>(w: &mut W, shapes: &[Shape]) -> Result<()> {
    wire::write_len(w, shapes.len(), "input shape count")?;
    shapes.iter().try_for_each(|s| s.write_to(w))
}

pub fn read_input_shapes<R: Read>(r: &mut R) -> Result<Vec<Shape>> {
    let count = wire::read_len(r, "input shape count")?;
    if count > MAX_INPUT_SHAPES {
        return Err(EmbeddingError::malformed(format!("{count} input shapes")));
    }
    (0..count).map(|_| Shape::read_from(r)).collect()
}
