//! Element data types of the embedding matrix.

use std::fmt;
use std::str::FromStr;

use candle_core::DType;
use serde::{Deserialize, Serialize};

use crate::error::EmbeddingError;

/// Data type of the embedding matrix, persisted by its lowercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    Float32,
    Float64,
    Float16,
    Bfloat16,
    Uint8,
    Uint32,
    Int64,
}

impl DataType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Float16 => "float16",
            Self::Bfloat16 => "bfloat16",
            Self::Uint8 => "uint8",
            Self::Uint32 => "uint32",
            Self::Int64 => "int64",
        }
    }

    pub const fn to_dtype(self) -> DType {
        match self {
            Self::Float32 => DType::F32,
            Self::Float64 => DType::F64,
            Self::Float16 => DType::F16,
            Self::Bfloat16 => DType::BF16,
            Self::Uint8 => DType::U8,
            Self::Uint32 => DType::U32,
            Self::Int64 => DType::I64,
        }
    }

    pub fn from_dtype(dtype: DType) -> Option<Self> {
        match dtype {
            DType::F32 => Some(Self::Float32),
            DType::F64 => Some(Self::Float64),
            DType::F16 => Some(Self::Float16),
            DType::BF16 => Some(Self::Bfloat16),
            DType::U8 => Some(Self::Uint8),
            DType::U32 => Some(Self::Uint32),
            DType::I64 => Some(Self::Int64),
            _ => None,
        }
    }

    pub const fn size_in_bytes(self) -> usize {
        match self {
            Self::Uint8 => 1,
            Self::Float16 | Self::Bfloat16 => 2,
            Self::Float32 | Self::Uint32 => 4,
            Self::Float64 | Self::Int64 => 8,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = EmbeddingError;

    /// Parsing is case-insensitive so names written as `FLOAT32` still load.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "float32" => Ok(Self::Float32),
            "float64" => Ok(Self::Float64),
            "float16" => Ok(Self::Float16),
            "bfloat16" => Ok(Self::Bfloat16),
            "uint8" => Ok(Self::Uint8),
            "uint32" => Ok(Self::Uint32),
            "int64" => Ok(Self::Int64),
            other => Err(EmbeddingError::malformed(format!("unsupported data type: {other}"))),
        }
    }
}
