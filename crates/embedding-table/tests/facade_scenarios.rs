//! End-to-end scenarios through the `Embedding` facade.

use std::io::Cursor;
use std::sync::Arc;
use std::thread;

use candle_core::{DType, Device, Tensor};
use embedding_table::{
    CandleBackend, DataType, Embedding, EmbeddingConfig, EmbeddingError, Fallthrough,
    FallthroughHandler, FallthroughKind, Shape, Slot, WeightInit,
};

fn s(v: &str) -> String {
    v.to_string()
}

fn abc() -> EmbeddingConfig<String> {
    EmbeddingConfig::new(vec![s("a"), s("b"), s("c")], 4)
}

fn build(cfg: EmbeddingConfig<String>) -> Embedding<String> {
    Embedding::from_config(cfg, CandleBackend::cpu()).unwrap()
}

// ---------------------------------------------------------------------------
// Construction and lookup
// ---------------------------------------------------------------------------

#[test]
fn abc_without_fallthrough() {
    let table = build(abc());
    assert_eq!(table.embed_batch(&[s("a"), s("b"), s("c")]).unwrap(), vec![1, 2, 3]);
    assert_eq!(table.num_items(), 4);
    assert!(matches!(table.embed_one(&s("z")), Err(EmbeddingError::ItemNotFound)));
}

#[test]
fn abc_with_default_row() {
    let table = build(abc().with_default_row());
    assert_eq!(table.embed_one(&s("z")).unwrap(), 0);
    assert_eq!(table.unembed(0).unwrap(), None);
    assert_eq!(table.fallthrough().kind(), FallthroughKind::DefaultRow);
}

#[test]
fn default_item_aliases_row_zero() {
    let table = build(abc().with_default_item(s("<unk>")));
    assert_eq!(table.embed_one(&s("zebra")).unwrap(), 0);
    assert_eq!(table.unembed(0).unwrap().as_deref(), Some("<unk>"));
    assert!(!table.has_item(&s("<unk>")));
}

#[test]
fn explicit_slots_round_trip() {
    let table = build(abc().with_default_row());
    for item in ["a", "b", "c"].map(s) {
        let slot = table.embed_one(&item).unwrap();
        assert_ne!(slot, 0);
        assert_eq!(table.unembed(slot).unwrap(), Some(item));
    }
}

#[test]
fn batch_keeps_order_and_duplicates() {
    let table = build(abc().with_default_row());
    let items = [s("c"), s("c"), s("x"), s("a")];
    assert_eq!(table.embed_batch(&items).unwrap(), vec![3, 3, 0, 1]);
}

#[test]
fn batch_fails_on_first_unknown_without_policy() {
    let table = build(abc());
    assert!(matches!(table.embed_batch(&[s("a"), s("q")]), Err(EmbeddingError::ItemNotFound)));
}

#[test]
fn duplicate_construction_items_are_skipped() {
    let table = build(EmbeddingConfig::new(vec![s("a"), s("b"), s("a")], 2));
    assert_eq!(table.num_items(), 3);
    assert_eq!(table.matrix().dims(), &[3, 2]);
}

#[test]
fn conflicting_fallthrough_sources_fail_construction() {
    let err = Embedding::from_config(
        abc().with_default_row().with_default_item(s("<unk>")),
        CandleBackend::cpu(),
    )
    .unwrap_err();
    assert!(matches!(err, EmbeddingError::Configuration(_)));
}

#[test]
fn zero_width_fails_construction() {
    let err = Embedding::from_config(EmbeddingConfig::new(vec![s("a")], 0), CandleBackend::cpu())
        .unwrap_err();
    assert!(matches!(err, EmbeddingError::Configuration(_)));
}

// ---------------------------------------------------------------------------
// Custom fallthrough
// ---------------------------------------------------------------------------

/// Hashes unknown items by length into the explicit slots `1..=3`.
struct ByLength;

impl FallthroughHandler<String> for ByLength {
    fn has_item(&self, _item: &String) -> bool {
        true
    }

    fn embed(&self, item: &String) -> embedding_table::Result<Slot> {
        Ok((item.len() % 3) as Slot + 1)
    }

    fn unembed(&self, slot: Slot) -> embedding_table::Result<Option<String>> {
        Ok((slot == 0).then(|| s("<custom>")))
    }
}

#[test]
fn custom_handler_owns_the_unknown_path() {
    let table = build(abc().with_fallthrough(Arc::new(ByLength)));
    assert_eq!(table.embed_one(&s("a")).unwrap(), 1);
    assert_eq!(table.embed_one(&s("zz")).unwrap(), 3);
    assert_eq!(table.unembed(0).unwrap().as_deref(), Some("<custom>"));
    assert!(table.can_embed(&s("anything")));
    assert_eq!(table.fallthrough().kind(), FallthroughKind::Custom);
}

/// Resolves every miss of a batch to slot 1, and a lone miss to slot 0.
struct BatchAware {
    batch_len: Option<usize>,
}

impl FallthroughHandler<String> for BatchAware {
    fn has_item(&self, _item: &String) -> bool {
        true
    }

    fn embed(&self, _item: &String) -> embedding_table::Result<Slot> {
        Ok(0)
    }

    fn embed_batch(&self, items: &[String]) -> embedding_table::Result<Vec<Slot>> {
        Ok(vec![1; self.batch_len.unwrap_or(items.len())])
    }

    fn unembed(&self, _slot: Slot) -> embedding_table::Result<Option<String>> {
        Ok(None)
    }
}

#[test]
fn batch_misses_go_through_handler_batch() {
    let table = build(abc().with_fallthrough(Arc::new(BatchAware { batch_len: None })));
    assert_eq!(table.embed_batch(&[s("x"), s("c"), s("y")]).unwrap(), vec![1, 3, 1]);
    assert_eq!(table.embed_one(&s("x")).unwrap(), 0);
    let slots = table.embed_to_tensor(&[s("x"), s("y")]).unwrap();
    assert_eq!(slots.to_vec1::<u32>().unwrap(), vec![1, 1]);
}

#[test]
fn batch_handler_with_wrong_length_is_rejected() {
    let table = build(abc().with_fallthrough(Arc::new(BatchAware { batch_len: Some(1) })));
    let err = table.embed_batch(&[s("x"), s("y")]).unwrap_err();
    assert!(matches!(err, EmbeddingError::Configuration(_)));
    assert_eq!(table.embed_batch(&[s("a"), s("b")]).unwrap(), vec![1, 2]);
}

// ---------------------------------------------------------------------------
// Forward and shapes
// ---------------------------------------------------------------------------

#[test]
fn output_shape_appends_width() {
    let table = build(EmbeddingConfig::new(vec![s("a")], 8));
    let out = table.output_shape(&Shape::new([-1]));
    assert_eq!(out, Shape::new([-1, 8]));
    assert_eq!(out.to_string(), "(-1, 8)");
    assert_eq!(table.output_shape(&Shape::scalar()), Shape::new([8]));
}

#[test]
fn lookup_gathers_matching_rows() {
    let matrix = Tensor::arange(0f32, 8.0, &Device::Cpu).unwrap().reshape((4, 2)).unwrap();
    let table = Embedding::from_pretrained(
        matrix,
        vec![s("a"), s("b"), s("c")],
        Fallthrough::DefaultRow,
        CandleBackend::cpu(),
    )
    .unwrap();
    let out = table.lookup(&[s("c"), s("nope"), s("a")]).unwrap();
    assert_eq!(out.to_vec2::<f32>().unwrap(), vec![vec![6.0, 7.0], vec![0.0, 1.0], vec![2.0, 3.0]]);
}

#[test]
fn forward_accepts_integer_index_dtypes() {
    let table = build(abc().with_init(WeightInit::Zeros));
    let idx = Tensor::new(&[0i64, 3], &Device::Cpu).unwrap();
    assert_eq!(table.forward(&idx).unwrap().dims(), &[2, 4]);
}

#[test]
fn forward_casts_to_declared_data_type() {
    let table = build(abc().with_data_type(DataType::Float16).with_init(WeightInit::Zeros));
    assert_eq!(table.matrix().dtype(), DType::F16);
    let out = table.lookup(&[s("a")]).unwrap();
    assert_eq!(out.dtype(), DType::F16);
}

#[test]
fn embed_to_tensor_is_u32_slots() {
    let table = build(abc());
    let t = table.embed_to_tensor(&[s("b"), s("c")]).unwrap();
    assert_eq!(t.dtype(), DType::U32);
    assert_eq!(t.to_vec1::<u32>().unwrap(), vec![2, 3]);
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn save_then_load_reproduces_table() {
    let saved = build(abc().with_sparse_grad(false));
    let mut buf = Vec::new();
    saved.save(&mut buf).unwrap();

    let mut target = build(EmbeddingConfig::new(vec![s("other")], 4).with_default_row());
    target.load(&mut Cursor::new(&buf)).unwrap();

    assert_eq!(target.entries(), saved.entries());
    assert_eq!(target.num_items(), saved.num_items());
    assert_eq!(target.matrix().to_vec2::<f32>().unwrap(), saved.matrix().to_vec2::<f32>().unwrap());
    assert!(!target.sparse_grad());
    assert!(!target.has_item(&s("other")));
    assert_eq!(target.fallthrough().kind(), FallthroughKind::DefaultRow);
}

#[test]
fn file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("table.bin");

    let saved = build(abc().with_data_type(DataType::Float64));
    saved.save_file(&path).unwrap();

    let mut restored = build(EmbeddingConfig::new(vec![], 1));
    restored.load_file(&path).unwrap();
    assert_eq!(restored.data_type(), DataType::Float64);
    assert_eq!(restored.embedding_size(), 4);
    assert_eq!(restored.parameter_shape("embedding").unwrap(), Shape::new([4, 4]));
    assert_eq!(restored.unembed(3).unwrap().as_deref(), Some("c"));
}

#[test]
fn load_from_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut table = build(abc());
    let err = table.load_file(dir.path().join("absent.bin")).unwrap_err();
    assert!(matches!(err, EmbeddingError::Io(_)));
}

#[test]
fn pretrained_sparse_grad_survives_save() {
    let matrix = Tensor::zeros((3, 2), DType::F32, &Device::Cpu).unwrap();
    let table = Embedding::from_pretrained(
        matrix,
        vec![s("a"), s("b")],
        Fallthrough::None,
        CandleBackend::cpu(),
    )
    .unwrap();
    assert!(table.sparse_grad());

    let table = table.with_sparse_grad(false);
    assert!(!table.sparse_grad());
    let mut buf = Vec::new();
    table.save(&mut buf).unwrap();

    let restored: Embedding<String> =
        Embedding::restore(&mut Cursor::new(buf), CandleBackend::cpu(), Fallthrough::None)
            .unwrap();
    assert!(!restored.sparse_grad());
    assert_eq!(restored.embed_one(&s("b")).unwrap(), 2);
}

#[test]
fn integer_items_persist() {
    let cfg = EmbeddingConfig::<u64>::new(vec![10, 20, u64::MAX], 2);
    let table = Embedding::from_config(cfg, CandleBackend::cpu()).unwrap();
    let mut buf = Vec::new();
    table.save(&mut buf).unwrap();
    let restored: Embedding<u64> =
        Embedding::restore(&mut Cursor::new(buf), CandleBackend::cpu(), Fallthrough::None)
            .unwrap();
    assert_eq!(restored.embed_one(&u64::MAX).unwrap(), 3);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn concurrent_lookups_agree() {
    let table = Arc::new(build(abc().with_default_row()));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                for _ in 0..200 {
                    assert_eq!(table.embed_one(&s("b")).unwrap(), 2);
                    assert_eq!(table.unembed(3).unwrap().as_deref(), Some("c"));
                    assert_eq!(table.embed_one(&s("?")).unwrap(), 0);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

// ---------------------------------------------------------------------------
// Configuration sources
// ---------------------------------------------------------------------------

#[test]
fn table_from_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("embedding.toml");
    std::fs::write(
        &path,
        r#"
[embedding]
items = ["cat", "dog"]
embedding_size = 3
data_type = "float64"
default_item = "<unk>"
init = { kind = "uniform", low = -0.5, high = 0.5 }
"#,
    )
    .unwrap();

    let cfg = EmbeddingConfig::<String>::from_toml(&path).unwrap();
    let table = Embedding::from_config(cfg, CandleBackend::cpu()).unwrap();
    assert_eq!(table.matrix().dims(), &[3, 3]);
    assert_eq!(table.data_type(), DataType::Float64);
    assert_eq!(table.unembed(0).unwrap().as_deref(), Some("<unk>"));
    let values = table.matrix().flatten_all().unwrap().to_vec1::<f64>().unwrap();
    assert!(values.iter().all(|v| (-0.5..0.5).contains(v)));
}
