//! Territory build pipeline.
//!
//! `build` resolves embeddings through the [`VectorStore`], runs the CPU-bound
//! stages in [`layout_territory`] on the blocking pool, then labels clusters
//! and sub-clusters. The stages run strictly in order: cluster, project,
//! weigh, centroid positions, sub-cluster, contours, tessellation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};

use super::contour::{density_contours, ContourOptions};
use super::types::{
    Bounds, Cluster, Contour, Material, MaterialPoint, Point, SubCluster, Tessellation,
    TerritoryData,
};
use super::voronoi::tessellate;
use super::weight::material_weight;
use crate::cluster::{cluster, sub_cluster, ClusterOptions, SubClusterOptions};
use crate::config::TerritoryConfig;
use crate::embedding::{CachedVectorStore, VectorStore};
use crate::label::{HttpLabelService, LabelCache, LabelService, Labeler};
use crate::layout::{project, LayoutOptions};

/// Tunables for every pipeline stage.
#[derive(Debug, Clone)]
pub struct TerritoryOptions {
    pub cluster: ClusterOptions,
    /// Iteration cap for sub-clustering. Each cluster derives its own seed
    /// from `cluster.seed`.
    pub sub_max_iterations: usize,
    pub layout: LayoutOptions,
    pub contours: ContourOptions,
}

impl Default for TerritoryOptions {
    fn default() -> Self {
        Self {
            cluster: ClusterOptions::default(),
            sub_max_iterations: SubClusterOptions::default().max_iterations,
            layout: LayoutOptions::default(),
            contours: ContourOptions::default(),
        }
    }
}

impl TerritoryOptions {
    pub fn from_config(config: &TerritoryConfig) -> Self {
        Self {
            cluster: ClusterOptions {
                max_iterations: config.clustering.max_iterations,
                force_k: None,
                seed: config.clustering.seed,
            },
            sub_max_iterations: config.clustering.sub_max_iterations,
            layout: LayoutOptions::from_config(&config.layout),
            contours: ContourOptions::from_config(&config.territory),
        }
    }
}

/// Everything a build produces except labels and identity.
#[derive(Debug, Clone, Default)]
pub struct TerritoryDraft {
    pub points: Vec<MaterialPoint>,
    /// Labels are empty until the label pass.
    pub clusters: Vec<Cluster>,
    pub contours: Vec<Contour>,
    pub tessellation: Option<Tessellation>,
}

pub struct TerritoryBuilder {
    store: Arc<dyn VectorStore>,
    labeler: Labeler,
    options: TerritoryOptions,
}

impl TerritoryBuilder {
    pub fn new(store: Arc<dyn VectorStore>, labeler: Labeler, options: TerritoryOptions) -> Self {
        Self {
            store,
            labeler,
            options,
        }
    }

    /// Builder backed by the configured embedding model and on-disk cache.
    ///
    /// The label service is used only when `use_label_service` is set and
    /// labeling is enabled in config.
    pub fn from_config(
        config: &TerritoryConfig,
        labels: Arc<LabelCache>,
        use_label_service: bool,
    ) -> Result<Self> {
        let provider = crate::embedding::create_provider(&config.embedding)?;
        let db_path = config.resolved_cache_db_path();
        let conn = crate::db::open_database(&db_path)?;
        let store = CachedVectorStore::new(Arc::from(provider), conn);

        let service: Option<Arc<dyn LabelService>> =
            (use_label_service && config.labeling.enabled).then(|| {
                Arc::new(HttpLabelService::from_config(&config.labeling)) as Arc<dyn LabelService>
            });
        tracing::info!(
            cache = %db_path.display(),
            label_service = service.is_some(),
            "territory builder ready"
        );

        Ok(Self::new(
            Arc::new(store),
            Labeler::new(service, labels),
            TerritoryOptions::from_config(config),
        ))
    }

    pub fn labeler(&self) -> &Labeler {
        &self.labeler
    }

    pub fn options(&self) -> &TerritoryOptions {
        &self.options
    }

    /// Build a territory from raw materials.
    ///
    /// Materials whose embedding cannot be produced are left out. An empty
    /// input, or one where nothing could be embedded, gives an empty
    /// territory rather than an error.
    pub async fn build(&self, materials: Vec<Material>, bounds: Bounds) -> Result<TerritoryData> {
        check_bounds(bounds)?;
        let materials = dedupe(materials);
        if materials.is_empty() {
            return Ok(TerritoryData::empty(bounds));
        }

        let started = Instant::now();
        let store = Arc::clone(&self.store);
        let (materials, vectors) = tokio::task::spawn_blocking(move || {
            let vectors = store.get_embeddings(&materials)?;
            anyhow::Ok((materials, vectors))
        })
        .await
        .context("embedding task failed")??;
        tracing::debug!(
            materials = materials.len(),
            embedded = vectors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "embeddings ready"
        );

        self.build_with_vectors(materials, vectors, bounds).await
    }

    /// Build from materials whose vectors the caller already holds.
    /// Materials without a vector are excluded.
    pub async fn build_with_vectors(
        &self,
        materials: Vec<Material>,
        vectors: HashMap<String, Vec<f32>>,
        bounds: Bounds,
    ) -> Result<TerritoryData> {
        check_bounds(bounds)?;
        let started = Instant::now();
        let materials = dedupe(materials);
        let total = materials.len();
        let materials: Vec<Material> = materials
            .into_iter()
            .filter(|m| vectors.get(&m.id).is_some_and(|v| !v.is_empty()))
            .collect();
        if materials.len() < total {
            tracing::warn!(
                excluded = total - materials.len(),
                "materials without embeddings excluded from territory"
            );
        }
        if materials.is_empty() {
            return Ok(TerritoryData::empty(bounds));
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        let options = self.options.clone();
        let (materials, draft) = tokio::task::spawn_blocking(move || {
            let draft = layout_territory(&materials, &vectors, bounds, &options, now_ms);
            (materials, draft)
        })
        .await
        .context("territory layout task failed")?;

        let mut clusters = draft.clusters;
        self.label_clusters(&materials, &mut clusters).await;

        let data = TerritoryData {
            build_id: uuid::Uuid::now_v7().to_string(),
            generated_at: now_ms,
            points: draft.points,
            clusters,
            contours: draft.contours,
            tessellation: draft.tessellation,
            bounds,
        };
        tracing::info!(
            build_id = %data.build_id,
            points = data.points.len(),
            clusters = data.clusters.len(),
            contours = data.contours.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "territory built"
        );
        Ok(data)
    }

    async fn label_clusters(&self, materials: &[Material], clusters: &mut [Cluster]) {
        let content: HashMap<&str, &str> = materials
            .iter()
            .map(|m| (m.id.as_str(), m.content.as_str()))
            .collect();

        for cluster in clusters.iter_mut() {
            let contents = contents_of(&content, &cluster.member_ids);
            cluster.label = self.labeler.label(&contents, false).await;
            for sub in cluster.sub_clusters.iter_mut() {
                let contents = contents_of(&content, &sub.member_ids);
                sub.label = self.labeler.label(&contents, true).await;
            }
        }
    }
}

fn check_bounds(bounds: Bounds) -> Result<()> {
    anyhow::ensure!(
        bounds.is_valid(),
        "canvas must have a finite positive width and height, got {}x{}",
        bounds.width,
        bounds.height
    );
    Ok(())
}

fn contents_of<'a>(content: &HashMap<&str, &'a str>, ids: &[String]) -> Vec<&'a str> {
    ids.iter()
        .filter_map(|id| content.get(id.as_str()).copied())
        .collect()
}

/// Keep the first material for each id.
fn dedupe(materials: Vec<Material>) -> Vec<Material> {
    let mut seen = HashSet::with_capacity(materials.len());
    let total = materials.len();
    let unique: Vec<Material> = materials
        .into_iter()
        .filter(|m| seen.insert(m.id.clone()))
        .collect();
    if unique.len() < total {
        tracing::warn!(dropped = total - unique.len(), "duplicate material ids ignored");
    }
    unique
}

/// The synchronous core of a build: every stage except labeling.
///
/// Only materials with an entry in `vectors` take part. Deterministic for a
/// given input order, options and `now_ms`.
pub fn layout_territory(
    materials: &[Material],
    vectors: &HashMap<String, Vec<f32>>,
    bounds: Bounds,
    options: &TerritoryOptions,
    now_ms: i64,
) -> TerritoryDraft {
    if !bounds.is_valid() {
        tracing::warn!(?bounds, "degenerate canvas, returning an empty territory");
        return TerritoryDraft::default();
    }
    let materials: Vec<&Material> = materials
        .iter()
        .filter(|m| vectors.contains_key(&m.id))
        .collect();
    let items: Vec<(String, Vec<f32>)> = materials
        .iter()
        .map(|m| (m.id.clone(), vectors[&m.id].clone()))
        .collect();

    // 1. cluster
    let clustering = cluster(&items, &options.cluster);
    let mut groups: Vec<(usize, Vec<&str>)> = (0..clustering.k()).map(|c| (c, Vec::new())).collect();
    for (id, _) in &items {
        if let Some(&c) = clustering.assignment.get(id) {
            groups[c].1.push(id.as_str());
        }
    }
    groups.retain(|(_, members)| !members.is_empty());
    groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    let cluster_ids: Vec<String> = (0..groups.len()).map(|i| format!("cluster-{i}")).collect();
    let cluster_of: HashMap<String, String> = groups
        .iter()
        .zip(&cluster_ids)
        .flat_map(|((_, members), cid)| members.iter().map(move |m| (m.to_string(), cid.clone())))
        .collect();

    // 2. project
    let positions = project(&items, &cluster_of, &cluster_ids, bounds, &options.layout);
    let position_of = |id: &str| positions.get(id).copied().unwrap_or_else(|| bounds.center());

    // 3. weigh
    let mut points: Vec<MaterialPoint> = materials
        .iter()
        .filter_map(|m| {
            let cluster_id = cluster_of.get(&m.id)?;
            Some(MaterialPoint {
                id: m.id.clone(),
                position: position_of(m.id.as_str()),
                cluster_id: cluster_id.clone(),
                weight: material_weight(m.created_at, m.content.chars().count(), now_ms),
            })
        })
        .collect();

    // 4. centroid positions, 5. sub-clusters
    let vector_refs: HashMap<&str, &[f32]> = items
        .iter()
        .map(|(id, v)| (id.as_str(), v.as_slice()))
        .collect();
    let mean_position = |ids: &[&str]| {
        let member_positions: Vec<Point> = ids.iter().map(|id| position_of(*id)).collect();
        Point::mean(&member_positions).unwrap_or_else(|| bounds.center())
    };

    let clusters: Vec<Cluster> = groups
        .iter()
        .zip(&cluster_ids)
        .enumerate()
        .map(|(i, ((original, members), cid))| {
            let sub_options = SubClusterOptions {
                max_iterations: options.sub_max_iterations,
                seed: options.cluster.seed.wrapping_add(i as u64 + 1),
            };
            let sub_clusters = sub_cluster(members.as_slice(), &vector_refs, &sub_options)
                .into_iter()
                .enumerate()
                .map(|(j, group)| {
                    let ids: Vec<&str> = group.member_ids.iter().map(String::as_str).collect();
                    SubCluster {
                        id: format!("{cid}-{j}"),
                        parent_id: cid.clone(),
                        label: String::new(),
                        centroid_position: mean_position(ids.as_slice()),
                        member_ids: group.member_ids,
                    }
                })
                .collect();

            Cluster {
                id: cid.clone(),
                label: String::new(),
                member_ids: members.iter().map(|m| m.to_string()).collect(),
                centroid_vector: clustering.centroids[*original].clone(),
                centroid_position: mean_position(members.as_slice()),
                sub_clusters,
            }
        })
        .collect();

    enforce_partition(&mut points, &clusters);

    // 6. contours
    let weighted: Vec<(Point, f64)> = points.iter().map(|p| (p.position, p.weight)).collect();
    let contours = density_contours(&weighted, bounds, &options.contours);

    // 7. tessellation
    let sites: Vec<Point> = clusters.iter().map(|c| c.centroid_position).collect();
    let tessellation = tessellate(&sites, bounds);

    tracing::debug!(
        points = points.len(),
        k = clusters.len(),
        iterations = clustering.iterations,
        sub_clusters = clusters.iter().map(|c| c.sub_clusters.len()).sum::<usize>(),
        "territory layout computed"
    );

    TerritoryDraft {
        points,
        clusters,
        contours,
        tessellation,
    }
}

/// Every point must belong to exactly the cluster it names, and every
/// sub-cluster member to its parent. Violations are bugs: they panic in
/// debug builds and are filtered out otherwise.
fn enforce_partition(points: &mut Vec<MaterialPoint>, clusters: &[Cluster]) {
    let owner: HashMap<&str, &str> = clusters
        .iter()
        .flat_map(|c| c.member_ids.iter().map(move |m| (m.as_str(), c.id.as_str())))
        .collect();

    debug_assert!(
        clusters.iter().all(|c| c
            .sub_clusters
            .iter()
            .all(|s| s.member_ids.iter().all(|m| owner.get(m.as_str()) == Some(&c.id.as_str())))),
        "sub-cluster member outside its parent"
    );

    let before = points.len();
    points.retain(|p| owner.get(p.id.as_str()) == Some(&p.cluster_id.as_str()));
    debug_assert_eq!(points.len(), before, "point assigned to a missing cluster");
    if points.len() < before {
        tracing::warn!(
            dropped = before - points.len(),
            "points with inconsistent cluster membership dropped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_750_000_000_000;

    fn spike(dims: usize, at: usize, noise: f32) -> Vec<f32> {
        let mut v = vec![0.0f32; dims];
        v[at] = 1.0;
        v[(at + 1) % dims] += noise;
        v
    }

    fn corpus(n: usize, topics: usize) -> (Vec<Material>, HashMap<String, Vec<f32>>) {
        let materials: Vec<Material> = (0..n)
            .map(|i| Material {
                id: format!("m{i}"),
                content: format!("note {i} about topic {}", i % topics),
                created_at: NOW - i as i64 * 86_400_000,
            })
            .collect();
        let vectors = materials
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id.clone(), spike(8, i % topics, 0.02 * (i / topics) as f32)))
            .collect();
        (materials, vectors)
    }

    #[test]
    fn invalid_canvas_gives_empty_draft() {
        let (materials, vectors) = corpus(8, 2);
        for bounds in [
            Bounds::new(-100.0, 600.0),
            Bounds::new(800.0, f64::NAN),
            Bounds::new(0.0, 0.0),
        ] {
            let draft = layout_territory(&materials, &vectors, bounds, &TerritoryOptions::default(), NOW);
            assert!(draft.points.is_empty());
            assert!(draft.clusters.is_empty());
            assert!(draft.tessellation.is_none());
        }
    }

    struct FixedStore(HashMap<String, Vec<f32>>);

    impl VectorStore for FixedStore {
        fn get_embeddings(&self, materials: &[Material]) -> Result<HashMap<String, Vec<f32>>> {
            Ok(materials
                .iter()
                .filter_map(|m| self.0.get(&m.id).map(|v| (m.id.clone(), v.clone())))
                .collect())
        }
    }

    #[tokio::test]
    async fn invalid_canvas_is_an_error() {
        let (materials, vectors) = corpus(8, 2);
        let builder = TerritoryBuilder::new(
            Arc::new(FixedStore(vectors.clone())),
            Labeler::offline(Arc::new(LabelCache::new())),
            TerritoryOptions::default(),
        );

        let err = builder
            .build_with_vectors(materials.clone(), vectors, Bounds::new(-100.0, 600.0))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("canvas"), "{err}");
        assert!(builder.build(materials, Bounds::new(f64::INFINITY, 10.0)).await.is_err());
    }

    #[test]
    fn draft_partitions_points() {
        let (materials, vectors) = corpus(20, 4);
        let draft = layout_territory(
            &materials,
            &vectors,
            Bounds::default(),
            &TerritoryOptions::default(),
            NOW,
        );

        assert_eq!(draft.points.len(), 20);
        let mut seen = HashSet::new();
        for cluster in &draft.clusters {
            for id in &cluster.member_ids {
                assert!(seen.insert(id.clone()), "{id} in two clusters");
            }
            for sub in &cluster.sub_clusters {
                assert_eq!(sub.parent_id, cluster.id);
                assert!(sub.member_ids.iter().all(|m| cluster.member_ids.contains(m)));
            }
        }
        assert_eq!(seen.len(), 20);
        for pair in draft.clusters.windows(2) {
            assert!(pair[0].member_ids.len() >= pair[1].member_ids.len());
        }
    }

    #[test]
    fn draft_ids_follow_size_order() {
        let (materials, vectors) = corpus(13, 4);
        let draft = layout_territory(
            &materials,
            &vectors,
            Bounds::default(),
            &TerritoryOptions::default(),
            NOW,
        );
        for (i, cluster) in draft.clusters.iter().enumerate() {
            assert_eq!(cluster.id, format!("cluster-{i}"));
            for (j, sub) in cluster.sub_clusters.iter().enumerate() {
                assert_eq!(sub.id, format!("cluster-{i}-{j}"));
            }
        }
    }

    #[test]
    fn materials_without_vectors_are_skipped() {
        let (materials, mut vectors) = corpus(6, 2);
        vectors.remove("m0");
        let draft = layout_territory(
            &materials,
            &vectors,
            Bounds::default(),
            &TerritoryOptions::default(),
            NOW,
        );
        assert_eq!(draft.points.len(), 5);
        assert!(draft.points.iter().all(|p| p.id != "m0"));
    }

    #[test]
    fn dedupe_keeps_first() {
        let materials = vec![
            Material {
                id: "a".into(),
                content: "first".into(),
                created_at: 0,
            },
            Material {
                id: "a".into(),
                content: "second".into(),
                created_at: 0,
            },
        ];
        let unique = dedupe(materials);
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].content, "first");
    }

    #[test]
    #[should_panic(expected = "missing cluster")]
    #[cfg(debug_assertions)]
    fn orphan_point_panics_in_debug() {
        let mut points = vec![MaterialPoint {
            id: "x".into(),
            position: Point::default(),
            cluster_id: "cluster-9".into(),
            weight: 1.0,
        }];
        enforce_partition(&mut points, &[]);
    }
}
