//! Candle-backed tensor operations used by the embedding table.
//!
//! The backend owns device placement, the numeric gather, and the on-disk
//! format of the matrix payload. The table itself only tracks shapes.

use std::io::{Read, Write};

use candle_core::{DType, Device, Tensor};

use crate::config::WeightInit;
use crate::dtype::DataType;
use crate::error::{EmbeddingError, Result};
use crate::index::Slot;
use crate::shape::Shape;
use crate::wire;

/// Marker written before an initialized parameter.
const PARAMETER_MARKER: u16 = b'P' as u16;
/// Marker written for a parameter that was never initialized.
const UNINITIALIZED_MARKER: u16 = b'N' as u16;
const PARAMETER_VERSION: u8 = 1;

/// Arguments for [`CandleBackend::gather`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatherParams {
    pub embedding_size: usize,
    pub num_items: usize,
    pub data_type: DataType,
    pub sparse_grad: bool,
}

/// Tensor operations on a fixed candle device.
#[derive(Debug, Clone)]
pub struct CandleBackend {
    device: Device,
}

impl CandleBackend {
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    pub fn cpu() -> Self {
        Self::new(Device::Cpu)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Select matrix rows by slot.
    ///
    /// Output shape is the index shape followed by `embedding_size`. Indices of
    /// any dtype are accepted; each must lie in `[0, num_items)`.
    pub fn gather(
        &self,
        indices: &Tensor,
        matrix: &Tensor,
        params: &GatherParams,
    ) -> Result<Tensor> {
        let (rows, cols) = matrix.dims2()?;
        if rows != params.num_items || cols != params.embedding_size {
            return Err(EmbeddingError::Configuration(format!(
                "matrix is {rows}x{cols} but the table expects {}x{}",
                params.num_items, params.embedding_size
            )));
        }

        let flat = indices.flatten_all()?;
        let raw = flat.to_dtype(DType::I64)?.to_vec1::<i64>()?;
        let mut ids = Vec::with_capacity(raw.len());
        for slot in raw {
            if slot < 0 || slot as usize >= params.num_items {
                return Err(EmbeddingError::SlotOutOfRange { slot, num_items: params.num_items });
            }
            ids.push(slot as u32);
        }
        let count = ids.len();
        let ids = Tensor::from_vec(ids, count, matrix.device())?;

        let mut out_dims = indices.dims().to_vec();
        out_dims.push(params.embedding_size);
        let out = matrix.index_select(&ids, 0)?.reshape(out_dims)?;

        tracing::trace!(count, sparse_grad = params.sparse_grad, "gathered embedding rows");
        let dtype = params.data_type.to_dtype();
        Ok(if out.dtype() == dtype { out } else { out.to_dtype(dtype)? })
    }

    /// Stack `head` on top of `tail` along the row axis.
    pub fn concat_rows(&self, head: &Tensor, tail: &Tensor) -> Result<Tensor> {
        Ok(Tensor::cat(&[head, tail], 0)?)
    }

    pub fn zeros(&self, rows: usize, cols: usize, data_type: DataType) -> Result<Tensor> {
        Ok(Tensor::zeros((rows, cols), data_type.to_dtype(), &self.device)?)
    }

    /// Allocate a `rows x cols` matrix filled according to `init`.
    pub fn initialize(
        &self,
        rows: usize,
        cols: usize,
        data_type: DataType,
        init: &WeightInit,
    ) -> Result<Tensor> {
        let shape = (rows, cols);
        let t = match *init {
            WeightInit::Zeros => return self.zeros(rows, cols, data_type),
            WeightInit::Normal { mean, std } => Tensor::randn(mean, std, shape, &self.device)?,
            WeightInit::Uniform { low, high } => Tensor::rand(low, high, shape, &self.device)?,
            WeightInit::Xavier => {
                let bound = (6.0 / (rows + cols) as f32).sqrt();
                Tensor::rand(-bound, bound, shape, &self.device)?
            }
        };
        let dtype = data_type.to_dtype();
        Ok(if t.dtype() == dtype { t } else { t.to_dtype(dtype)? })
    }

    /// Slots as a rank-1 `u32` tensor on this device.
    pub fn slots_to_tensor(&self, slots: &[Slot]) -> Result<Tensor> {
        Ok(Tensor::from_slice(slots, slots.len(), &self.device)?)
    }

    /// Write `matrix` as a named parameter payload.
    ///
    /// Element bytes are stored in host order, which is little-endian on every
    /// platform candle supports.
    pub fn save_matrix<W: Write>(&self, w: &mut W, name: &str, matrix: &Tensor) -> Result<()> {
        let data_type = DataType::from_dtype(matrix.dtype()).ok_or_else(|| {
            EmbeddingError::Configuration(format!("cannot persist {:?} matrices", matrix.dtype()))
        })?;
        let bytes = raw_bytes(matrix)?;

        wire::write_u16(w, PARAMETER_MARKER)?;
        wire::write_u8(w, PARAMETER_VERSION)?;
        wire::write_utf(w, name)?;
        wire::write_utf(w, data_type.as_str())?;
        Shape::from_dims(matrix.dims()).write_to(w)?;
        wire::write_i64(w, bytes.len() as i64)?;
        w.write_all(&bytes)?;
        Ok(())
    }

    /// Read a parameter payload written by [`CandleBackend::save_matrix`].
    ///
    /// Returns the parameter name and a rank-2 matrix placed on this device.
    pub fn load_matrix<R: Read>(&self, r: &mut R) -> Result<(String, Tensor)> {
        match wire::read_u16(r, "parameter marker")? {
            PARAMETER_MARKER => {}
            UNINITIALIZED_MARKER => {
                return Err(EmbeddingError::malformed(
                    "embedding matrix was saved before it was initialized",
                ));
            }
            other => {
                return Err(EmbeddingError::malformed(format!("bad parameter marker {other:#06x}")));
            }
        }
        let version = wire::read_u8(r, "parameter version")?;
        if version != PARAMETER_VERSION {
            return Err(EmbeddingError::malformed(format!(
                "unsupported parameter version: {version}"
            )));
        }
        let name = wire::read_utf(r, "parameter name")?;
        let data_type: DataType = wire::read_utf(r, "matrix data type")?.parse()?;
        let shape = Shape::read_from(r)?;
        let (rows, cols) = match shape.dims[..] {
            [rows, cols] if rows >= 0 && cols >= 0 => (rows as usize, cols as usize),
            _ => {
                return Err(EmbeddingError::malformed(format!(
                    "embedding matrix must be rank 2 with known dims, got {shape}"
                )));
            }
        };
        let expected = rows
            .checked_mul(cols)
            .and_then(|n| n.checked_mul(data_type.size_in_bytes()))
            .ok_or_else(|| EmbeddingError::malformed(format!("matrix {shape} is too large")))?;
        let declared = wire::read_i64(r, "matrix byte length")?;
        if declared < 0 || declared as u64 != expected as u64 {
            return Err(EmbeddingError::malformed(format!(
                "matrix {shape} of {data_type} needs {expected} bytes, payload declares {declared}"
            )));
        }

        // Grow with the input instead of trusting the declared size up front.
        let mut bytes = Vec::new();
        r.take(expected as u64)
            .read_to_end(&mut bytes)
            .map_err(|e| EmbeddingError::from_read(e, "matrix data"))?;
        if bytes.len() != expected {
            return Err(EmbeddingError::malformed(format!(
                "matrix data truncated: {} of {expected} bytes",
                bytes.len()
            )));
        }

        let matrix =
            Tensor::from_raw_buffer(&bytes, data_type.to_dtype(), &[rows, cols], &self.device)?;
        Ok((name, matrix))
    }
}

impl Default for CandleBackend {
    fn default() -> Self {
        Self::cpu()
    }
}

fn pod_bytes<T: bytemuck::Pod>(values: &[T]) -> Vec<u8> {
    bytemuck::cast_slice::<T, u8>(values).to_vec()
}

fn raw_bytes(matrix: &Tensor) -> Result<Vec<u8>> {
    let flat = matrix.flatten_all()?;
    Ok(match matrix.dtype() {
        DType::F32 => pod_bytes(&flat.to_vec1::<f32>()?),
        DType::F64 => pod_bytes(&flat.to_vec1::<f64>()?),
        DType::F16 => pod_bytes(&flat.to_vec1::<half::f16>()?),
        DType::BF16 => pod_bytes(&flat.to_vec1::<half::bf16>()?),
        DType::U8 => flat.to_vec1::<u8>()?,
        DType::U32 => pod_bytes(&flat.to_vec1::<u32>()?),
        DType::I64 => pod_bytes(&flat.to_vec1::<i64>()?),
        other => {
            return Err(EmbeddingError::Configuration(format!(
                "cannot persist {other:?} matrices"
            )));
        }
    })
}
