//! Output formatting for CLI commands.
//!
//! This module handles formatting output as either JSON or human-readable text.

use anyhow::Result;
use serde::Serialize;

use coalesce::utils::truncate_chars;
use coalesce::Config;

use super::types::{ClusterReport, SimilarHit};

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

/// Print the outcome of a clustering session.
pub fn print_cluster_report(report: &ClusterReport, json: bool) {
    if json {
        print_json(report);
        return;
    }

    let session = &report.session;
    println!("Session {} {}", session.id, session.status);
    println!(
        "Claimed: {}  Clusters: {}  Units: {}  Unclustered: {}  Skipped: {}  Rejected: {}",
        session.claimed_count,
        session.clusters_found,
        session.units_created,
        session.unclustered_count,
        session.skipped_count,
        session.rejected_candidates
    );
    if let Some(metrics) = &session.metrics {
        println!(
            "Silhouette: {:.3}  Sizes: {:?}",
            metrics.silhouette_score, metrics.cluster_size_distribution
        );
    }
    if let Some(error) = &session.error {
        println!("Error ({:?}): {}", error.class, error.message);
    }

    if !report.clusters.is_empty() {
        println!("\n{:<8} {:<6} FRAGMENTS", "CLUSTER", "SIZE");
        println!("{}", "-".repeat(60));
        for cluster in &report.clusters {
            let ids: Vec<String> = cluster.fragment_ids.iter().map(|id| id.to_string()).collect();
            println!("{:<8} {:<6} {}", cluster.ordinal, cluster.len(), ids.join(", "));
        }
    }

    for unit in &report.units {
        println!("\n[{}] {} ({})", unit.confidence.as_str(), unit.title, unit.category);
        if !unit.summary.is_empty() {
            println!("   {}", unit.summary);
        }
        let ids: Vec<String> = unit.fragment_ids.iter().map(|id| id.to_string()).collect();
        println!("   fragments: {}", ids.join(", "));
    }

    if let Some(exported) = &report.exported {
        println!("\nExported {} fragments to {}", exported.fragments, exported.path);
    }
}

/// Print similarity hits.
pub fn print_similar(hits: &[SimilarHit], json: bool) {
    if json {
        print_json(&hits);
        return;
    }

    if hits.is_empty() {
        println!("No similar fragments found.");
        return;
    }

    println!("{:<4} {:<10} {:<10} {:<14} PREVIEW", "#", "ID", "SIMILARITY", "CATEGORY");
    println!("{}", "-".repeat(90));
    for (i, hit) in hits.iter().enumerate() {
        let label = if hit.title.is_empty() {
            hit.preview.as_str()
        } else {
            hit.title.as_str()
        };
        println!(
            "{:<4} {:<10} {:<10.3} {:<14} {}",
            i + 1,
            hit.fragment_id.to_string(),
            hit.similarity,
            truncate_chars(&hit.category, 14),
            label
        );
    }
}

/// Print the effective configuration as TOML or JSON.
pub fn print_config(config: &Config, json: bool) -> Result<()> {
    if json {
        print_json(config);
    } else {
        print!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}
