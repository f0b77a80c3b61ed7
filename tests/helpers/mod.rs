#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use territory_map::embedding::{EmbeddingProvider, VectorStore};
use territory_map::label::{LabelCache, LabelError, LabelService, Labeler};
use territory_map::territory::{Material, TerritoryBuilder, TerritoryOptions};

/// Vector width used throughout the integration tests.
pub const DIMS: usize = 32;

/// Fixed "now" so weights are reproducible.
pub const NOW: i64 = 1_750_000_000_000;

const DAY_MS: i64 = 86_400_000;

/// Deterministic unit vector with a spike at `seed % DIMS`.
/// Distinct seeds give orthogonal vectors.
pub fn test_embedding(seed: u8) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    v[seed as usize % DIMS] = 1.0;
    v
}

/// `base` nudged on two dimensions picked by `salt`, renormalized.
/// Cosine similarity to `base` stays well above 0.99.
pub fn similar_embedding(base: &[f32], salt: usize) -> Vec<f32> {
    let mut v = base.to_vec();
    v[(salt * 7 + 3) % DIMS] += 0.05;
    v[(salt * 13 + 5) % DIMS] += 0.03;
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    for x in &mut v {
        *x /= norm;
    }
    v
}

pub fn material(id: &str, content: &str, created_at: i64) -> Material {
    Material {
        id: id.to_string(),
        content: content.to_string(),
        created_at,
    }
}

/// Materials and vectors for well-separated topics. Topic `t` sits on
/// dimension `4 * t`; ids are `{topic}-{i}`.
pub fn topic_corpus(topics: &[(&str, usize)]) -> (Vec<Material>, HashMap<String, Vec<f32>>) {
    let mut materials = Vec::new();
    let mut vectors = HashMap::new();
    for (t, (topic, count)) in topics.iter().enumerate() {
        let base = test_embedding((t * 4) as u8);
        for i in 0..*count {
            let id = format!("{topic}-{i}");
            let content = format!("{topic} journal entry {i}: notes on {topic} progress");
            materials.push(material(&id, &content, NOW - i as i64 * DAY_MS));
            vectors.insert(id, similar_embedding(&base, t * 31 + i));
        }
    }
    (materials, vectors)
}

/// Embeds text by the first vocabulary word it contains; text with no
/// known word fails. Counts every single-text embedding.
pub struct KeywordProvider {
    vocabulary: Vec<&'static str>,
    pub calls: AtomicUsize,
}

impl KeywordProvider {
    pub fn new(vocabulary: &[&'static str]) -> Self {
        Self {
            vocabulary: vocabulary.to_vec(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for KeywordProvider {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let lower = text.to_lowercase();
        let topic = self
            .vocabulary
            .iter()
            .position(|word| lower.contains(word))
            .ok_or_else(|| anyhow::anyhow!("no known topic in {text:?}"))?;
        Ok(similar_embedding(&test_embedding((topic * 4) as u8), text.len()))
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn model_id(&self) -> &str {
        "keyword-test"
    }
}

/// Store answering from a fixed map.
pub struct MapStore(pub HashMap<String, Vec<f32>>);

impl VectorStore for MapStore {
    fn get_embeddings(&self, materials: &[Material]) -> anyhow::Result<HashMap<String, Vec<f32>>> {
        Ok(materials
            .iter()
            .filter_map(|m| self.0.get(&m.id).map(|v| (m.id.clone(), v.clone())))
            .collect())
    }
}

/// Label service replying `Theme N` for its N-th call.
#[derive(Default)]
pub struct CountingLabels {
    pub calls: AtomicUsize,
}

impl CountingLabels {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LabelService for CountingLabels {
    async fn generate_label(&self, _prompt: &str) -> Result<String, LabelError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("Theme {n}"))
    }
}

/// Label service that is always down.
pub struct DownLabels;

#[async_trait]
impl LabelService for DownLabels {
    async fn generate_label(&self, _prompt: &str) -> Result<String, LabelError> {
        Err(LabelError::Http(503))
    }
}

pub fn builder_with(
    store: Arc<dyn VectorStore>,
    service: Option<Arc<dyn LabelService>>,
) -> TerritoryBuilder {
    TerritoryBuilder::new(
        store,
        Labeler::new(service, Arc::new(LabelCache::new())),
        TerritoryOptions::default(),
    )
}
