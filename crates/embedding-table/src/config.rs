//! Construction options for an embedding table, with TOML and environment
//! variable sources.

use std::path::Path;
use std::sync::Arc;
use std::{env, fmt, fs};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::dtype::DataType;
use crate::error::{EmbeddingError, Result};
use crate::fallthrough::{Fallthrough, FallthroughHandler};
use crate::item::EmbeddingItem;

pub const ENV_EMBEDDING_SIZE: &str = "EMBEDDING_TABLE_SIZE";
pub const ENV_DATA_TYPE: &str = "EMBEDDING_TABLE_DATA_TYPE";
pub const ENV_SPARSE_GRAD: &str = "EMBEDDING_TABLE_SPARSE_GRAD";
pub const ENV_USE_DEFAULT_ROW: &str = "EMBEDDING_TABLE_USE_DEFAULT_ROW";

// ── WeightInit ──────────────────────────────────────────────────────

/// How a freshly constructed matrix is filled.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WeightInit {
    Zeros,
    Normal { mean: f32, std: f32 },
    Uniform { low: f32, high: f32 },
    /// Uniform in `±sqrt(6 / (rows + cols))`.
    #[default]
    Xavier,
}

// ── EmbeddingConfig ─────────────────────────────────────────────────

/// Everything needed to build a fresh table.
///
/// At most one fallthrough source may be set: `use_default_row`,
/// `default_item`, or `custom_fallthrough`.
#[derive(Serialize, Deserialize)]
#[serde(default, bound(serialize = "T: Serialize", deserialize = "T: DeserializeOwned"))]
pub struct EmbeddingConfig<T: EmbeddingItem> {
    /// Items in slot order; the first item gets slot 1.
    pub items: Vec<T>,
    pub embedding_size: usize,
    pub data_type: DataType,
    pub sparse_grad: bool,
    pub use_default_row: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_item: Option<T>,
    #[serde(skip)]
    pub custom_fallthrough: Option<Arc<dyn FallthroughHandler<T>>>,
    pub init: WeightInit,
}

#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: DeserializeOwned"))]
struct TomlWrapper<T: EmbeddingItem> {
    embedding: EmbeddingConfig<T>,
}

impl<T: EmbeddingItem> Default for EmbeddingConfig<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            embedding_size: 0,
            data_type: DataType::Float32,
            sparse_grad: true,
            use_default_row: false,
            default_item: None,
            custom_fallthrough: None,
            init: WeightInit::default(),
        }
    }
}

impl<T: EmbeddingItem> Clone for EmbeddingConfig<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            embedding_size: self.embedding_size,
            data_type: self.data_type,
            sparse_grad: self.sparse_grad,
            use_default_row: self.use_default_row,
            default_item: self.default_item.clone(),
            custom_fallthrough: self.custom_fallthrough.clone(),
            init: self.init,
        }
    }
}

impl<T: EmbeddingItem> fmt::Debug for EmbeddingConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("items", &self.items.len())
            .field("embedding_size", &self.embedding_size)
            .field("data_type", &self.data_type)
            .field("sparse_grad", &self.sparse_grad)
            .field("use_default_row", &self.use_default_row)
            .field("default_item", &self.default_item)
            .field("custom_fallthrough", &self.custom_fallthrough.is_some())
            .field("init", &self.init)
            .finish()
    }
}

impl<T: EmbeddingItem> EmbeddingConfig<T> {
    pub fn new(items: Vec<T>, embedding_size: usize) -> Self {
        Self { items, embedding_size, ..Self::default() }
    }

    #[must_use]
    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    #[must_use]
    pub fn with_sparse_grad(mut self, sparse_grad: bool) -> Self {
        self.sparse_grad = sparse_grad;
        self
    }

    #[must_use]
    pub fn with_default_row(mut self) -> Self {
        self.use_default_row = true;
        self
    }

    #[must_use]
    pub fn with_default_item(mut self, item: T) -> Self {
        self.default_item = Some(item);
        self
    }

    #[must_use]
    pub fn with_fallthrough(mut self, handler: Arc<dyn FallthroughHandler<T>>) -> Self {
        self.custom_fallthrough = Some(handler);
        self
    }

    #[must_use]
    pub fn with_init(mut self, init: WeightInit) -> Self {
        self.init = init;
        self
    }

    // ── Sources ─────────────────────────────────────────────────

    /// Parse a config from TOML text containing an `[embedding]` table.
    pub fn from_toml_str(text: &str) -> Result<Self>
    where
        T: DeserializeOwned,
    {
        let wrapper: TomlWrapper<T> = toml::from_str(text)?;
        Ok(wrapper.embedding)
    }

    /// Load a config from a TOML file containing an `[embedding]` table.
    pub fn from_toml(path: &Path) -> Result<Self>
    where
        T: DeserializeOwned,
    {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Serialize to TOML wrapped in `[embedding]`. The custom handler is omitted.
    pub fn to_toml(&self) -> Result<String>
    where
        T: Serialize,
    {
        let wrapper = TomlWrapper { embedding: self.clone() };
        Ok(toml::to_string_pretty(&wrapper)?)
    }

    /// Overlay `EMBEDDING_TABLE_*` environment variables on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(v) = env::var(ENV_EMBEDDING_SIZE) {
            self.embedding_size =
                v.trim().parse().map_err(|_| invalid_env(ENV_EMBEDDING_SIZE, &v))?;
        }
        if let Ok(v) = env::var(ENV_DATA_TYPE) {
            self.data_type = v.trim().parse().map_err(|_| invalid_env(ENV_DATA_TYPE, &v))?;
        }
        if let Ok(v) = env::var(ENV_SPARSE_GRAD) {
            self.sparse_grad = parse_env_bool(ENV_SPARSE_GRAD, &v)?;
        }
        if let Ok(v) = env::var(ENV_USE_DEFAULT_ROW) {
            self.use_default_row = parse_env_bool(ENV_USE_DEFAULT_ROW, &v)?;
        }
        Ok(self)
    }

    // ── Validation ──────────────────────────────────────────────

    pub fn validate(&self) -> Result<()> {
        if self.embedding_size == 0 {
            return Err(EmbeddingError::Configuration("embedding_size must be >= 1".into()));
        }
        if let WeightInit::Normal { std, .. } = self.init
            && !(std.is_finite() && std >= 0.0)
        {
            return Err(EmbeddingError::Configuration(format!("invalid normal std: {std}")));
        }
        if let WeightInit::Uniform { low, high } = self.init
            && !(low.is_finite() && high.is_finite() && low < high)
        {
            return Err(EmbeddingError::Configuration(format!(
                "invalid uniform range: [{low}, {high})"
            )));
        }
        self.fallthrough().map(|_| ())
    }

    /// The single fallthrough policy these options describe.
    pub fn fallthrough(&self) -> Result<Fallthrough<T>> {
        let sources = [
            self.use_default_row.then_some("use_default_row"),
            self.default_item.as_ref().map(|_| "default_item"),
            self.custom_fallthrough.as_ref().map(|_| "custom_fallthrough"),
        ];
        let set: Vec<&str> = sources.into_iter().flatten().collect();
        if set.len() > 1 {
            return Err(EmbeddingError::Configuration(format!(
                "only one fallthrough may be specified, got {}",
                set.join(" and ")
            )));
        }

        Ok(if let Some(handler) = &self.custom_fallthrough {
            Fallthrough::Custom(Arc::clone(handler))
        } else if let Some(item) = &self.default_item {
            Fallthrough::DefaultItem(item.clone())
        } else if self.use_default_row {
            Fallthrough::DefaultRow
        } else {
            Fallthrough::None
        })
    }
}

fn invalid_env(key: &str, value: &str) -> EmbeddingError {
    EmbeddingError::InvalidEnvVar { key: key.to_string(), value: value.to_string() }
}

fn parse_env_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid_env(key, value)),
    }
}
