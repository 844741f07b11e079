//! Multilingual sentence embeddings over ONNX Runtime.
//!
//! The backing model is a multilingual MiniLM (384 dimensions) so Korean
//! questions and English card texts land in the same space. One instance is
//! shared process-wide; inference is CPU-bound and runs behind a session
//! mutex.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use anyhow::{anyhow, bail, Result};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use parking_lot::{Mutex, RwLock};
use tokenizers::Tokenizer;

const MAX_BATCH_SIZE: usize = 8;

/// Text → dense vector. Deterministic for a given input.
pub trait Embedder: Send + Sync {
    /// Encode a batch. Empty input is an error.
    fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    fn encode_single(&self, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;
}

#[derive(Clone)]
pub struct EmbeddingConfig {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub dimension: usize,
    pub max_length: usize,
    pub normalize: bool,
}

impl EmbeddingConfig {
    /// Look for a `multilingual-minilm` directory containing `model.onnx`
    /// and `tokenizer.json`.
    pub fn auto_detect(model_dir: &Path) -> Option<Self> {
        let base = model_dir.join("multilingual-minilm");
        let model_path = base.join("model.onnx");
        let tokenizer_path = base.join("tokenizer.json");
        if !model_path.exists() || !tokenizer_path.exists() {
            return None;
        }
        Some(Self {
            model_path,
            tokenizer_path,
            dimension: 384,
            max_length: 128,
            normalize: true,
        })
    }
}

pub struct MiniLmEmbeddings {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    config: EmbeddingConfig,
    cache: RwLock<lru::LruCache<String, Vec<f32>>>,
}

impl MiniLmEmbeddings {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        if !config.model_path.exists() {
            return Err(anyhow!(
                "Model file not found at: {}",
                config.model_path.display()
            ));
        }

        let model_bytes = std::fs::read(&config.model_path)
            .map_err(|e| anyhow!("Failed to read model: {:?}", e))?;

        let num_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        let session = Session::builder()
            .map_err(|e| anyhow!("Session builder: {:?}", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("Optimization level: {:?}", e))?
            .with_intra_threads(num_threads)
            .map_err(|e| anyhow!("Intra threads: {:?}", e))?
            .with_inter_threads(1)
            .map_err(|e| anyhow!("Inter threads: {:?}", e))?
            .commit_from_memory(&model_bytes)
            .map_err(|e| anyhow!("Failed to load model: {:?}", e))?;

        let tokenizer = Tokenizer::from_file(&config.tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer: {e}"))?;

        tracing::info!(
            model = %config.model_path.display(),
            dimension = config.dimension,
            "embedding model loaded"
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            config,
            cache: RwLock::new(lru::LruCache::new(
                NonZeroUsize::new(1000).expect("nonzero capacity"),
            )),
        })
    }

    fn tokenize(&self, text: &str) -> Result<(Vec<i64>, Vec<i64>)> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("Tokenization failed: {e}"))?;
        let mut ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        if ids.len() > self.config.max_length {
            ids.truncate(self.config.max_length);
        }
        let mask = vec![1i64; ids.len()];
        Ok((ids, mask))
    }

    fn run_batch(&self, batch: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut all_ids = Vec::with_capacity(batch.len());
        let mut max_len = 0;
        for text in batch {
            let (ids, _) = self.tokenize(text)?;
            max_len = max_len.max(ids.len());
            all_ids.push(ids);
        }
        let padded_len = max_len.max(1);
        let batch_size = all_ids.len();

        let mut input_ids_flat = Vec::with_capacity(batch_size * padded_len);
        let mut attention_mask_flat = Vec::with_capacity(batch_size * padded_len);
        for ids in &all_ids {
            for &id in ids {
                input_ids_flat.push(id);
                attention_mask_flat.push(1i64);
            }
            for _ in ids.len()..padded_len {
                input_ids_flat.push(0i64);
                attention_mask_flat.push(0i64);
            }
        }

        let shape = vec![batch_size, padded_len];
        let input_ids = Value::from_array((shape.clone(), input_ids_flat))
            .map_err(|e| anyhow!("input_ids tensor: {:?}", e))?;
        let attention_mask = Value::from_array((shape, attention_mask_flat.clone()))
            .map_err(|e| anyhow!("attention_mask tensor: {:?}", e))?;

        let inputs = ort::inputs![
            "input_ids" => input_ids,
            "attention_mask" => attention_mask,
        ];

        let mut session = self.session.lock();
        let outputs = session
            .run(inputs)
            .map_err(|e| anyhow!("Inference failed: {:?}", e))?;

        let (out_shape, data) = outputs["last_hidden_state"]
            .try_extract_tensor::<f32>()
            .map_err(|e| anyhow!("Failed to extract last_hidden_state: {:?}", e))?;

        let seq_len = out_shape[1] as usize;
        let hidden_dim = out_shape[2] as usize;

        let mut embeddings = Vec::with_capacity(batch_size);
        for sample in 0..batch_size {
            let mask_offset = sample * padded_len;
            let sample_offset = sample * seq_len * hidden_dim;
            let mut pooled = vec![0.0f32; hidden_dim];
            let mut mask_sum = 0.0f32;

            for pos in 0..seq_len {
                let mask_val = attention_mask_flat
                    .get(mask_offset + pos)
                    .copied()
                    .unwrap_or(0) as f32;
                if mask_val > 0.0 {
                    mask_sum += mask_val;
                    let offset = sample_offset + pos * hidden_dim;
                    for dim in 0..hidden_dim {
                        pooled[dim] += data[offset + dim] * mask_val;
                    }
                }
            }
            if mask_sum > 0.0 {
                for value in &mut pooled {
                    *value /= mask_sum;
                }
            }
            embeddings.push(self.normalize_vec(pooled));
        }

        Ok(embeddings)
    }

    fn normalize_vec(&self, mut vec: Vec<f32>) -> Vec<f32> {
        if self.config.normalize {
            let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 1e-12 {
                for v in &mut vec {
                    *v /= norm;
                }
            }
        }
        vec
    }
}

impl Embedder for MiniLmEmbeddings {
    fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            bail!("texts cannot be empty");
        }
        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH_SIZE) {
            results.extend(self.run_batch(batch)?);
        }
        Ok(results)
    }

    fn encode_single(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            bail!("text cannot be empty");
        }
        if let Some(cached) = self.cache.write().get(text) {
            return Ok(cached.clone());
        }
        let embedding = self
            .run_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("empty embedding batch"))?;
        self.cache.write().put(text.to_string(), embedding.clone());
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}

static EMBEDDINGS: OnceLock<Arc<MiniLmEmbeddings>> = OnceLock::new();

/// Initialize the process-wide embedding model. Subsequent calls return the
/// already-loaded instance.
pub fn init_embedding_model(config: EmbeddingConfig) -> Result<Arc<MiniLmEmbeddings>> {
    if let Some(existing) = EMBEDDINGS.get() {
        return Ok(existing.clone());
    }
    let model = Arc::new(MiniLmEmbeddings::new(config)?);
    Ok(EMBEDDINGS.get_or_init(|| model).clone())
}

pub fn embedding_model() -> Option<Arc<MiniLmEmbeddings>> {
    EMBEDDINGS.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_detect_requires_both_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EmbeddingConfig::auto_detect(dir.path()).is_none());

        let base = dir.path().join("multilingual-minilm");
        std::fs::create_dir_all(&base).unwrap();
        std::fs::write(base.join("model.onnx"), b"stub").unwrap();
        assert!(EmbeddingConfig::auto_detect(dir.path()).is_none());

        std::fs::write(base.join("tokenizer.json"), b"stub").unwrap();
        let config = EmbeddingConfig::auto_detect(dir.path()).unwrap();
        assert_eq!(config.dimension, 384);
        assert_eq!(config.max_length, 128);
    }

    #[test]
    fn missing_model_file_errors() {
        let config = EmbeddingConfig {
            model_path: PathBuf::from("/nonexistent/model.onnx"),
            tokenizer_path: PathBuf::from("/nonexistent/tokenizer.json"),
            dimension: 384,
            max_length: 128,
            normalize: true,
        };
        assert!(MiniLmEmbeddings::new(config).is_err());
    }

    #[test]
    fn hash_embedder_contract() {
        use crate::rag::test_support::HashEmbedder;
        let embedder = HashEmbedder::new();
        assert!(embedder.encode(&[]).is_err());
        let a = embedder.encode_single("The Fool").unwrap();
        let b = embedder.encode_single("The Fool").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), embedder.dimension());
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
