//! Local ONNX Runtime embedding provider.
//!
//! Runs all-MiniLM-L6-v2 through `ort`, then mean-pools token embeddings under
//! the attention mask with `ndarray` and L2-normalizes the result.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use ndarray::{Array2, ArrayView3, Axis};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::{l2_normalize, EmbeddingProvider, EMBEDDING_DIM};
use crate::config::EmbeddingConfig;

/// Notes are short; 256 tokens is the length the model was trained at.
const MAX_SEQ_LEN: usize = 256;

const MODEL_FILE: &str = "model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";

/// Local ONNX-based embedding provider.
pub struct LocalEmbeddingProvider {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    model: String,
}

/// Model and tokenizer locations under the configured cache directory.
pub fn model_paths(config: &EmbeddingConfig) -> (PathBuf, PathBuf) {
    let cache_dir = crate::config::expand_tilde(&config.cache_dir);
    (cache_dir.join(MODEL_FILE), cache_dir.join(TOKENIZER_FILE))
}

/// Flattened `[batch, seq]` encoder inputs.
struct EncodedBatch {
    batch: usize,
    seq_len: usize,
    input_ids: Vec<i64>,
    attention_mask: Vec<i64>,
}

impl LocalEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_path, tokenizer_path) = model_paths(config);

        anyhow::ensure!(
            model_path.exists(),
            "ONNX model not found at {}. Run `territory model download` first.",
            model_path.display()
        );
        anyhow::ensure!(
            tokenizer_path.exists(),
            "Tokenizer not found at {}. Run `territory model download` first.",
            tokenizer_path.display()
        );

        let session = Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&model_path)
            .context("failed to load ONNX model")?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("failed to set truncation: {e}"))?;
        tokenizer.with_padding(Some(tokenizers::PaddingParams {
            strategy: tokenizers::PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        tracing::info!(
            model = %model_path.display(),
            tokenizer = %tokenizer_path.display(),
            "local embedding model loaded"
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            model: config.model.clone(),
        })
    }

    fn encode(&self, texts: &[&str]) -> Result<EncodedBatch> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;

        let batch = encodings.len();
        let seq_len = encodings.first().map(|e| e.get_ids().len()).unwrap_or(0);
        let mut input_ids = Vec::with_capacity(batch * seq_len);
        let mut attention_mask = Vec::with_capacity(batch * seq_len);
        for encoding in &encodings {
            input_ids.extend(encoding.get_ids().iter().map(|&id| id as i64));
            attention_mask.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
        }

        Ok(EncodedBatch {
            batch,
            seq_len,
            input_ids,
            attention_mask,
        })
    }
}

impl EmbeddingProvider for LocalEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .context("embedding batch returned no rows")
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encoded = self.encode(texts)?;
        let shape = vec![encoded.batch as i64, encoded.seq_len as i64];
        let input_ids = Tensor::from_array((shape.clone(), encoded.input_ids.into_boxed_slice()))?;
        let attention_mask = Tensor::from_array((
            shape.clone(),
            encoded.attention_mask.clone().into_boxed_slice(),
        ))?;
        // single-segment input
        let token_type_ids = Tensor::from_array((
            shape,
            vec![0i64; encoded.batch * encoded.seq_len].into_boxed_slice(),
        ))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;
        let outputs = session.run(ort::inputs! {
            "input_ids" => input_ids,
            "attention_mask" => attention_mask,
            "token_type_ids" => token_type_ids,
        })?;

        // Output naming differs between exports.
        let hidden = outputs
            .get("token_embeddings")
            .or_else(|| outputs.get("last_hidden_state"))
            .unwrap_or_else(|| &outputs[0]);
        let (dims, data) = hidden
            .try_extract_tensor::<f32>()
            .context("failed to extract token embeddings")?;
        let dims: &[i64] = &dims;
        anyhow::ensure!(
            dims.len() == 3
                && dims[0] == encoded.batch as i64
                && dims[2] == EMBEDDING_DIM as i64,
            "unexpected token embedding shape {dims:?}, expected [batch, seq, {EMBEDDING_DIM}]"
        );

        let tokens = ArrayView3::from_shape(
            (dims[0] as usize, dims[1] as usize, dims[2] as usize),
            data,
        )
        .context("token embedding buffer does not match its shape")?;
        let mask = Array2::from_shape_vec(
            (encoded.batch, encoded.seq_len),
            encoded.attention_mask.iter().map(|&m| m as f32).collect(),
        )
        .context("attention mask does not match batch shape")?;

        Ok(mean_pool(tokens, &mask))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Attention-masked mean over the sequence axis, then L2 normalization.
fn mean_pool(tokens: ArrayView3<f32>, mask: &Array2<f32>) -> Vec<Vec<f32>> {
    let seq = tokens.len_of(Axis(1)).min(mask.len_of(Axis(1)));
    let tokens = tokens.slice(ndarray::s![.., ..seq, ..]);
    let mask = mask.slice(ndarray::s![.., ..seq]);

    let weighted = &tokens * &mask.view().insert_axis(Axis(2));
    let sums = weighted.sum_axis(Axis(1));
    let counts = mask.sum_axis(Axis(1));

    sums.outer_iter()
        .zip(counts.iter())
        .map(|(row, &count)| {
            let pooled: Vec<f32> = if count > 0.0 {
                row.iter().map(|x| x / count).collect()
            } else {
                row.to_vec()
            };
            l2_normalize(&pooled)
        })
        .collect()
}
