//! Human-readable cluster labels.
//!
//! A [`Labeler`] asks an optional [`LabelService`] for a short topic label and
//! falls back to [`fallback_label`] whenever the service is absent, fails, or
//! returns something unusable. Results are memoized in a [`LabelCache`] keyed
//! by a hash of the content sample, so the same content set always gets the
//! same label and never triggers a second service call.

pub mod fallback;
pub mod http;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

pub use fallback::{fallback_label, MISCELLANEOUS};
pub use http::HttpLabelService;

/// Label for a call with no contents at all.
pub const EMPTY_LABEL: &str = "Empty";

/// Contents hashed into the cache key, and chars taken from each.
const KEY_SAMPLES: usize = 5;
const KEY_CHARS: usize = 100;

/// Labels that say nothing about the topic.
const GENERIC_LABELS: &[&str] = &[
    "general",
    "various",
    "mixed",
    "miscellaneous",
    "other",
    "content",
    "text",
];

const MAX_LABEL_WORDS: usize = 6;

/// Why the label service did not produce a label.
#[derive(Debug, thiserror::Error)]
pub enum LabelError {
    #[error("label service unavailable: {0}")]
    Unavailable(String),
    #[error("label service timed out after {0} ms")]
    Timeout(u64),
    #[error("label service returned HTTP {0}")]
    Http(u16),
    #[error("label rejected: {0:?}")]
    Rejected(String),
    #[error("label service transport error: {0}")]
    Transport(String),
}

/// External text-generation capability used for labels.
#[async_trait]
pub trait LabelService: Send + Sync {
    /// Produce a raw label for the prompt. The caller cleans and validates it.
    async fn generate_label(&self, prompt: &str) -> Result<String, LabelError>;
}

/// Shared cache from content-derived key to label. Entries are never evicted
/// automatically; [`LabelCache::clear`] resets it.
#[derive(Debug, Default)]
pub struct LabelCache {
    entries: Mutex<HashMap<String, String>>,
}

impl LabelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    /// Insert unless the key is already present and return the stored label.
    /// When two builds race on the same key, the first writer wins.
    pub fn insert_if_absent(&self, key: &str, label: String) -> String {
        self.entries()
            .entry(key.to_string())
            .or_insert(label)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Remove every entry and return how many there were.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries();
        let removed = entries.len();
        entries.clear();
        removed
    }

    // Entries are plain strings inserted atomically, so a poisoned lock still
    // guards consistent data.
    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Resolves content samples to labels, always yielding a string.
#[derive(Clone)]
pub struct Labeler {
    service: Option<Arc<dyn LabelService>>,
    cache: Arc<LabelCache>,
}

impl Labeler {
    pub fn new(service: Option<Arc<dyn LabelService>>, cache: Arc<LabelCache>) -> Self {
        Self { service, cache }
    }

    /// Labeler that only uses the keyword fallback.
    pub fn offline(cache: Arc<LabelCache>) -> Self {
        Self::new(None, cache)
    }

    pub fn cache(&self) -> &Arc<LabelCache> {
        &self.cache
    }

    /// Label for a cluster (or sub-cluster) with the given member contents.
    pub async fn label(&self, contents: &[&str], is_sub_cluster: bool) -> String {
        if contents.is_empty() {
            return EMPTY_LABEL.to_string();
        }

        let key = cache_key(contents, is_sub_cluster);
        if let Some(label) = self.cache.get(&key) {
            tracing::debug!(%key, "label cache hit");
            return label;
        }

        let label = match self.request(contents, is_sub_cluster).await {
            Some(Ok(label)) => label,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "label service failed, using keyword fallback");
                fallback_label(contents)
            }
            None => fallback_label(contents),
        };

        self.cache.insert_if_absent(&key, label)
    }

    async fn request(
        &self,
        contents: &[&str],
        is_sub_cluster: bool,
    ) -> Option<Result<String, LabelError>> {
        let service = self.service.as_ref()?;
        let prompt = build_prompt(contents, is_sub_cluster);
        let result = service
            .generate_label(&prompt)
            .await
            .and_then(|raw| clean_label(&raw).ok_or(LabelError::Rejected(raw)));
        Some(result)
    }
}

/// Deterministic key over the first [`KEY_SAMPLES`] contents, [`KEY_CHARS`]
/// chars each, joined by `|`. Cluster and sub-cluster labels use separate
/// namespaces since their prompts differ.
pub fn cache_key(contents: &[&str], is_sub_cluster: bool) -> String {
    let sample = contents
        .iter()
        .take(KEY_SAMPLES)
        .map(|c| c.chars().take(KEY_CHARS).collect::<String>())
        .collect::<Vec<_>>()
        .join("|");

    let hash = sample
        .chars()
        .fold(0u32, |h, ch| h.wrapping_mul(31).wrapping_add(ch as u32));

    let prefix = if is_sub_cluster { "s" } else { "c" };
    format!("{prefix}:{}", to_base36(hash))
}

fn to_base36(mut n: u32) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Prompt for the label service. Top-level clusters get more and longer
/// excerpts than sub-clusters.
pub fn build_prompt(contents: &[&str], is_sub_cluster: bool) -> String {
    let (samples, chars, scope) = if is_sub_cluster {
        (3, 150, "a sub-topic inside a larger theme")
    } else {
        (5, 200, "a theme")
    };

    let excerpts = contents
        .iter()
        .take(samples)
        .map(|c| format!("- {}", c.chars().take(chars).collect::<String>().trim()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "These notes share {scope}. Reply with a specific 2-4 word topic label \
         and nothing else. Avoid generic words like \"general\" or \"various\".\n\n{excerpts}"
    )
}

/// Normalize a raw service reply. `None` if nothing usable remains.
pub fn clean_label(raw: &str) -> Option<String> {
    let mut label = raw.lines().find(|l| !l.trim().is_empty())?.trim();

    for prefix in ["label:", "topic:"] {
        if label
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        {
            label = label[prefix.len()..].trim_start();
        }
    }

    let label = label
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*' | '“' | '”'))
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | '?' | ',' | ';' | ':'))
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*' | '“' | '”'));

    let label = label.split_whitespace().collect::<Vec<_>>().join(" ");
    if label.is_empty() {
        return None;
    }
    if GENERIC_LABELS
        .iter()
        .any(|generic| label.eq_ignore_ascii_case(generic))
    {
        return None;
    }
    if label.split(' ').count() > MAX_LABEL_WORDS {
        return None;
    }
    Some(label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        reply: Result<&'static str, u16>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn ok(reply: &'static str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(status: u16) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(status),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LabelService for Scripted {
        async fn generate_label(&self, _prompt: &str) -> Result<String, LabelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply
                .map(str::to_string)
                .map_err(LabelError::Http)
        }
    }

    #[test]
    fn cache_key_is_deterministic_and_namespaced() {
        let contents = ["morning run", "evening swim"];
        assert_eq!(cache_key(&contents, false), cache_key(&contents, false));
        assert!(cache_key(&contents, false).starts_with("c:"));
        assert!(cache_key(&contents, true).starts_with("s:"));
        assert_ne!(cache_key(&contents, false), cache_key(&["evening swim"], false));
    }

    #[test]
    fn cache_key_ignores_content_past_sample() {
        let long_a = format!("{}tail one", "x".repeat(100));
        let long_b = format!("{}tail two", "x".repeat(100));
        assert_eq!(cache_key(&[&long_a], false), cache_key(&[&long_b], false));

        let six = ["a", "b", "c", "d", "e", "f"];
        let six_other = ["a", "b", "c", "d", "e", "zzz"];
        assert_eq!(cache_key(&six, false), cache_key(&six_other, false));
    }

    #[test]
    fn base36_rendering() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(u32::MAX), "1z141z3");
    }

    #[test]
    fn prompt_sample_sizes() {
        let long = "y".repeat(500);
        let contents: Vec<&str> = (0..8).map(|_| long.as_str()).collect();
        let top = build_prompt(&contents, false);
        let sub = build_prompt(&contents, true);
        assert_eq!(top.matches("\n- ").count(), 5);
        assert_eq!(sub.matches("\n- ").count(), 3);
        assert!(top.contains(&"y".repeat(200)) && !top.contains(&"y".repeat(201)));
        assert!(sub.contains(&"y".repeat(150)) && !sub.contains(&"y".repeat(151)));
    }

    #[test]
    fn clean_label_strips_decoration() {
        assert_eq!(clean_label("\"Garden Planning\"").as_deref(), Some("Garden Planning"));
        assert_eq!(clean_label("Label: Sleep Habits.").as_deref(), Some("Sleep Habits"));
        assert_eq!(clean_label("  topic:  `Career   Moves`  ").as_deref(), Some("Career Moves"));
        assert_eq!(clean_label("Family Trips\nextra line").as_deref(), Some("Family Trips"));
    }

    #[test]
    fn clean_label_rejects_generic_and_long() {
        assert_eq!(clean_label(""), None);
        assert_eq!(clean_label("  \"\" "), None);
        assert_eq!(clean_label("Miscellaneous."), None);
        assert_eq!(clean_label("GENERAL"), None);
        assert_eq!(clean_label("one two three four five six seven"), None);
    }

    #[test]
    fn cache_first_writer_wins() {
        let cache = LabelCache::new();
        assert_eq!(cache.insert_if_absent("k", "first".into()), "first");
        assert_eq!(cache.insert_if_absent("k", "second".into()), "first");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn service_label_is_cached() {
        let service = Scripted::ok("Label: Home Cooking");
        let labeler = Labeler::new(Some(service.clone()), Arc::new(LabelCache::new()));
        let contents = ["baked sourdough bread", "tried a new pasta recipe"];

        assert_eq!(labeler.label(&contents, false).await, "Home Cooking");
        assert_eq!(labeler.label(&contents, false).await, "Home Cooking");
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_and_rejections_use_fallback() {
        let contents = ["Sourdough starter feeding schedule", "Sourdough crumb looked better"];
        let expected = fallback_label(&contents);

        let failing = Labeler::new(Some(Scripted::failing(503)), Arc::new(LabelCache::new()));
        assert_eq!(failing.label(&contents, false).await, expected);

        let generic = Labeler::new(Some(Scripted::ok("Various")), Arc::new(LabelCache::new()));
        assert_eq!(generic.label(&contents, false).await, expected);
    }

    #[tokio::test]
    async fn empty_contents_get_sentinel() {
        let labeler = Labeler::offline(Arc::new(LabelCache::new()));
        assert_eq!(labeler.label(&[], false).await, EMPTY_LABEL);
        assert!(labeler.cache().is_empty());
    }
}
