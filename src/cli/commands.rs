//! CLI command handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;

use coalesce::{
    cancel_pair, ClusteringAlgorithm, ClusteringCoordinator, ClusteringCoordinatorBuilder, Config,
    DistanceMetric, FragmentId, FragmentScope, Linkage, MemoryStore,
};

use super::output;
use super::types::{ClusterReport, ExportSummary, SimilarHit};

/// Options for `coalesce cluster`.
#[derive(Args, Debug)]
pub struct ClusterArgs {
    /// Fragments file (JSON Lines)
    pub fragments: PathBuf,
    /// Algorithm: hierarchical, kmeans or dbscan
    #[arg(short, long)]
    pub algorithm: Option<String>,
    /// Linkage for hierarchical clustering: ward, single, complete or average
    #[arg(short, long)]
    pub linkage: Option<String>,
    /// Distance metric: cosine or euclidean
    #[arg(short, long)]
    pub metric: Option<String>,
    /// Merge cost cutoff for hierarchical clustering
    #[arg(short, long)]
    pub threshold: Option<f64>,
    /// Stop hierarchical merging at this many clusters
    #[arg(long)]
    pub target: Option<usize>,
    /// Number of K-Means clusters (0 = auto)
    #[arg(short, long)]
    pub k: Option<usize>,
    /// DBSCAN neighbourhood radius
    #[arg(long)]
    pub eps: Option<f64>,
    /// DBSCAN core point threshold
    #[arg(long)]
    pub min_points: Option<usize>,
    /// Cap on claimed fragments
    #[arg(long)]
    pub max_fragments: Option<usize>,
    /// Only cluster fragments from this source
    #[arg(short, long)]
    pub source: Option<String>,
    /// Only cluster fragments of this category
    #[arg(long)]
    pub category: Option<String>,
    /// Write fragments with their new ownership to this file
    #[arg(short, long)]
    pub export: Option<PathBuf>,
}

/// Options for `coalesce similar`.
#[derive(Args, Debug)]
pub struct SimilarArgs {
    /// Fragments file (JSON Lines)
    pub fragments: PathBuf,
    /// Use this stored fragment's embedding as the query
    #[arg(long, conflicts_with = "vector", required_unless_present = "vector")]
    pub id: Option<u64>,
    /// Comma-separated query vector
    #[arg(long)]
    pub vector: Option<String>,
    /// Maximum number of results
    #[arg(short, long)]
    pub limit: Option<usize>,
    /// Minimum similarity in [0, 1]
    #[arg(long)]
    pub min_similarity: Option<f64>,
    /// Skip fragments already owned by a knowledge unit
    #[arg(long)]
    pub exclude_owned: bool,
    /// Only search fragments from this source
    #[arg(short, long)]
    pub source: Option<String>,
    /// Only search fragments of this category
    #[arg(long)]
    pub category: Option<String>,
}

fn scope(source: Option<String>, category: Option<String>) -> FragmentScope {
    let mut scope = FragmentScope::all();
    if let Some(source) = source {
        scope = scope.source(source);
    }
    if let Some(category) = category {
        scope = scope.category(category);
    }
    scope
}

async fn open(
    config: Config,
    fragments: &Path,
) -> Result<(ClusteringCoordinator, Arc<MemoryStore>)> {
    if !fragments.exists() {
        bail!("fragments file not found: {}", fragments.display());
    }
    let store = Arc::new(MemoryStore::new());
    let loaded = store
        .load_jsonl(fragments)
        .await
        .with_context(|| format!("loading {}", fragments.display()))?;
    tracing::info!("Loaded {} fragments from {}", loaded, fragments.display());

    let coordinator = ClusteringCoordinatorBuilder::new()
        .config(config)
        .store(store.clone())
        .build()
        .await?;
    Ok((coordinator, store))
}

fn apply_overrides(config: &mut Config, args: &ClusterArgs) -> Result<()> {
    let clustering = &mut config.clustering;
    if let Some(algorithm) = &args.algorithm {
        clustering.algorithm = ClusteringAlgorithm::parse(algorithm)
            .ok_or_else(|| anyhow!("unknown algorithm: {}", algorithm))?;
    }
    if let Some(linkage) = &args.linkage {
        clustering.linkage =
            Linkage::parse(linkage).ok_or_else(|| anyhow!("unknown linkage: {}", linkage))?;
    }
    if let Some(metric) = &args.metric {
        clustering.metric =
            DistanceMetric::parse(metric).ok_or_else(|| anyhow!("unknown metric: {}", metric))?;
    }
    if let Some(threshold) = args.threshold {
        clustering.distance_threshold = Some(threshold);
    }
    if let Some(target) = args.target {
        clustering.target_clusters = Some(target);
    }
    if let Some(k) = args.k {
        clustering.kmeans_k = k;
    }
    if let Some(eps) = args.eps {
        clustering.dbscan_eps = eps;
    }
    if let Some(min_points) = args.min_points {
        clustering.dbscan_min_points = min_points;
    }
    if let Some(max) = args.max_fragments {
        clustering.max_fragments = Some(max);
    }
    Ok(())
}

/// Run the cluster command.
pub async fn run_cluster(mut config: Config, args: ClusterArgs, json_output: bool) -> Result<()> {
    apply_overrides(&mut config, &args)?;
    let (coordinator, store) = open(config, &args.fragments).await?;

    let session_config =
        coordinator.default_session_config(scope(args.source.clone(), args.category.clone()));
    let session_id = coordinator.create_session(session_config).await?;

    let (cancel, signal) = cancel_pair();
    let run = coordinator.run_session(session_id, signal);
    tokio::pin!(run);
    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, cancelling session {}", session_id);
            cancel.cancel();
            run.await
        }
    };

    let exported = match &args.export {
        Some(path) => {
            let fragments = store
                .export_jsonl(path)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            Some(ExportSummary {
                path: path.display().to_string(),
                fragments,
            })
        }
        None => None,
    };

    let report = ClusterReport {
        session: coordinator.get_session(session_id).await?,
        clusters: coordinator.clusters(session_id).await?,
        units: coordinator.knowledge_units(session_id).await?,
        exported,
    };
    output::print_cluster_report(&report, json_output);

    result.map(|_| ()).map_err(Into::into)
}

fn parse_vector(raw: &str) -> Result<Vec<f32>> {
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .with_context(|| format!("invalid vector component: {:?}", part))
        })
        .collect()
}

/// Run the similar command.
pub async fn run_similar(config: Config, args: SimilarArgs, json_output: bool) -> Result<()> {
    let (coordinator, _store) = open(config, &args.fragments).await?;

    let vector = match (&args.id, &args.vector) {
        (Some(id), _) => coordinator.embedding_of(FragmentId(*id)).await?,
        (None, Some(raw)) => parse_vector(raw)?,
        (None, None) => bail!("either --id or --vector is required"),
    };

    let mut query = coordinator
        .similarity_query(vector)
        .exclude_owned(args.exclude_owned)
        .filter(scope(args.source, args.category));
    if let Some(limit) = args.limit {
        query = query.limit(limit);
    }
    if let Some(min_similarity) = args.min_similarity {
        query = query.min_similarity(min_similarity);
    }

    let neighbors = coordinator.find_similar(&query).await?;
    let ids: Vec<FragmentId> = neighbors.iter().map(|n| n.fragment_id).collect();
    let fragments = coordinator.store().read_fragments(&ids).await?;

    let hits: Vec<SimilarHit> = neighbors
        .iter()
        .filter_map(|n| {
            let fragment = fragments.iter().find(|f| f.id == n.fragment_id)?;
            Some(SimilarHit {
                fragment_id: n.fragment_id,
                distance: n.distance,
                similarity: n.similarity(),
                category: fragment.category.clone(),
                title: fragment.title.clone(),
                preview: coalesce::utils::preview(&fragment.content, 80),
            })
        })
        .collect();

    output::print_similar(&hits, json_output);
    Ok(())
}

/// Run the config command.
pub fn run_config(config: &Config, json_output: bool) -> Result<()> {
    output::print_config(config, json_output)
}
