//! `cluster`: groups cases by clinical similarity and names each group.
//!
//! Text embeddings come from the MiniLM endpoint; dimensionality reduction and
//! density clustering run in an external sidecar that returns one label per
//! case (`-1` for outliers).

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::transform::{CXR_PRIMARY_FILE, PER_CASE_FILE};
use super::{read_json, write_json};
use crate::llm_client::TextEmbedder;
use crate::models::profile::is_yes;
use crate::models::{CaseProfile, CaseRecord, Cluster};

pub const CLUSTERS_FILE: &str = "clusters.json";
pub const OUTLIER_LABEL: i64 = -1;

#[async_trait]
pub trait Clusterer: Send + Sync {
    /// One label per embedding; `-1` marks an outlier.
    async fn cluster(&self, embeddings: &[Vec<f32>]) -> Result<Vec<i64>>;
}

/// UMAP + HDBSCAN behind `POST {base}/cluster`.
pub struct ClusteringSidecar {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ClusterResponse {
    labels: Vec<i64>,
}

impl ClusteringSidecar {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(300)).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Clusterer for ClusteringSidecar {
    async fn cluster(&self, embeddings: &[Vec<f32>]) -> Result<Vec<i64>> {
        let response = self
            .client
            .post(format!("{}/cluster", self.base_url))
            .json(&json!({
                "embeddings": embeddings,
                "n_components": 20,
                "n_neighbors": 15,
                "min_dist": 0.0,
                "min_cluster_size": 5,
                "min_samples": 3,
            }))
            .send()
            .await
            .context("Clustering service unreachable")?
            .error_for_status()?;
        let body: ClusterResponse = response.json().await?;
        Ok(body.labels)
    }
}

/// The most semantically informative fields of a case as one paragraph.
pub fn case_to_text(case: &CaseRecord) -> String {
    let patient = &case.patient;
    let presentation = &case.presentation;
    let assessment = &case.assessment;
    let mut parts: Vec<String> = Vec::new();

    if let Some(age) = patient.age_years.filter(|a| *a > 0) {
        parts.push(format!("{age}-year-old {}.", patient.sex.as_deref().unwrap_or("")));
    }
    if let Some(cc) = &presentation.chief_complaint {
        parts.push(format!("Chief complaint: {cc}."));
    }
    if let Some(hpi) = &presentation.hpi {
        parts.push(hpi.clone());
    }
    if let Some(pmh) = &presentation.pmh {
        parts.push(format!("PMH: {pmh}."));
    }
    if !patient.comorbidities.is_empty() {
        parts.push(format!("Comorbidities: {}.", patient.comorbidities.join(", ")));
    }
    if let Some(dx) = &assessment.diagnosis_primary {
        parts.push(format!("Diagnosis: {dx}."));
    }
    if !assessment.suspected_primary.is_empty() {
        parts.push(format!("Suspected: {}.", assessment.suspected_primary.join(", ")));
    }
    if !assessment.differential.is_empty() {
        parts.push(format!("Differential: {}.", assessment.differential.join(", ")));
    }
    if let Some(urgency) = &assessment.urgency {
        parts.push(format!("Urgency: {urgency}."));
    }
    if assessment.infectious_concern.as_deref() == Some("yes") {
        parts.push("Infectious concern.".to_string());
    }
    if assessment.icu_candidate.as_deref() == Some("yes") {
        parts.push("ICU candidate.".to_string());
    }

    let lungs = &case.findings.lungs;
    let pleura = &case.findings.pleura;
    let mut findings = Vec::new();
    if is_yes(&lungs.consolidation_present) {
        if lungs.consolidation_locations.is_empty() {
            findings.push("consolidation".to_string());
        } else {
            findings.push(format!("consolidation ({})", lungs.consolidation_locations.join(", ")));
        }
    }
    if is_yes(&lungs.atelectasis_present) {
        findings.push("atelectasis".to_string());
    }
    if is_yes(&lungs.edema_present) {
        findings.push(format!(
            "edema ({})",
            lungs.edema_pattern.as_deref().unwrap_or("unknown")
        ));
    }
    if is_yes(&pleura.effusion_present) {
        findings.push(format!(
            "pleural effusion ({})",
            pleura.effusion_side.as_deref().unwrap_or("")
        ));
    }
    if is_yes(&pleura.pneumothorax_present) {
        findings.push("pneumothorax".to_string());
    }
    if is_yes(&case.findings.cardiomediastinal.cardiomegaly) {
        findings.push("cardiomegaly".to_string());
    }
    if !findings.is_empty() {
        parts.push(format!("Findings: {}.", findings.join(", ")));
    }

    if let Some(one_liner) = &case.summary.one_liner {
        parts.push(one_liner.clone());
    }
    if !case.summary.key_points.is_empty() {
        parts.push(case.summary.key_points.join(" "));
    }
    parts.join(" ")
}

/// Most frequent item; ties go to the one seen first.
fn most_common<'a>(items: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for item in items {
        match counts.iter_mut().find(|(seen, _)| *seen == item) {
            Some((_, n)) => *n += 1,
            None => counts.push((item, 1)),
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (item, n) in counts {
        if best.map_or(true, |(_, top)| n > top) {
            best = Some((item, n));
        }
    }
    best.map(|(item, _)| item)
}

/// Capitalizes the first letter of every alphabetic run.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_alpha = false;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if prev_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(ch);
            prev_alpha = false;
        }
    }
    out
}

/// `(cluster_name, dominant_diagnosis)`: the most common diagnosis, the most
/// common positive finding, and `[infectious]` when most cases carry an
/// infectious concern.
pub fn name_cluster(cases: &[&CaseRecord]) -> (String, String) {
    let dominant = most_common(
        cases
            .iter()
            .filter_map(|c| c.assessment.diagnosis_primary.as_deref())
            .filter(|dx| !dx.is_empty()),
    )
    .unwrap_or("unknown")
    .to_string();

    let mut tokens = Vec::new();
    for case in cases {
        let f = &case.findings;
        if is_yes(&f.lungs.consolidation_present) {
            tokens.push("consolidation");
        }
        if is_yes(&f.lungs.edema_present) {
            tokens.push("edema");
        }
        if is_yes(&f.pleura.effusion_present) {
            tokens.push("effusion");
        }
        if is_yes(&f.cardiomediastinal.cardiomegaly) {
            tokens.push("cardiomegaly");
        }
    }

    let mut name = title_case(&dominant);
    if let Some(finding) = most_common(tokens) {
        name.push_str(&format!(" ({finding})"));
    }
    let infectious = cases
        .iter()
        .filter(|c| c.assessment.infectious_concern.as_deref() == Some("yes"))
        .count();
    if infectious > cases.len() / 2 {
        name.push_str(" [infectious]");
    }
    (name, dominant)
}

/// Clusters ordered by size (largest first, ties by label) and numbered from
/// zero. Outliers form one "Miscellaneous" cluster.
pub fn assemble_clusters(cases: &[CaseRecord], labels: &[i64]) -> Vec<Cluster> {
    let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        groups.entry(*label).or_default().push(i);
    }
    let mut ordered: Vec<(i64, Vec<usize>)> = groups.into_iter().collect();
    ordered.sort_by(|(la, a), (lb, b)| b.len().cmp(&a.len()).then(la.cmp(lb)));

    ordered
        .into_iter()
        .enumerate()
        .map(|(cluster_id, (label, members))| {
            let group: Vec<&CaseRecord> = members.iter().map(|&i| &cases[i]).collect();
            let (cluster_name, dominant_diagnosis) = if label == OUTLIER_LABEL {
                ("Miscellaneous".to_string(), "various".to_string())
            } else {
                name_cluster(&group)
            };
            Cluster {
                cluster_id,
                cluster_name,
                dominant_diagnosis,
                size: group.len(),
                case_ids: group.iter().map(|c| c.case_id.clone()).collect(),
            }
        })
        .collect()
}

/// Embeds and clusters `dataset_per_case.json` under `dir`, writes
/// `clusters.json`, and backfills embeddings into both dataset variants.
pub async fn cluster_cases(
    embedder: &dyn TextEmbedder,
    clusterer: &dyn Clusterer,
    dir: &Path,
) -> Result<Vec<Cluster>> {
    let per_case_path = dir.join(PER_CASE_FILE);
    let mut cases: Vec<CaseRecord> = read_json(&per_case_path)?;
    let texts: Vec<String> = cases.iter().map(case_to_text).collect();

    info!("Embedding {} cases", texts.len());
    let embeddings = embedder.embed_texts(&texts).await?;
    if embeddings.len() != cases.len() {
        bail!("Expected {} embeddings, got {}", cases.len(), embeddings.len());
    }

    let labels = clusterer.cluster(&embeddings).await?;
    if labels.len() != cases.len() {
        bail!("Expected {} cluster labels, got {}", cases.len(), labels.len());
    }
    let outliers = labels.iter().filter(|l| **l == OUTLIER_LABEL).count();

    let clusters = assemble_clusters(&cases, &labels);
    info!(
        "Found {} clusters, {outliers} outliers",
        clusters.len() - usize::from(outliers > 0)
    );
    for cluster in &clusters {
        info!("  [{:2}] {:<50} n={}", cluster.cluster_id, cluster.cluster_name, cluster.size);
    }
    write_json(&dir.join(CLUSTERS_FILE), &clusters)?;

    let by_case: HashMap<String, Vec<f32>> = cases
        .iter()
        .map(|c| c.case_id.clone())
        .zip(embeddings)
        .collect();
    for case in &mut cases {
        case.embeddings = by_case.get(&case.case_id).cloned().unwrap_or_default();
    }
    write_json(&per_case_path, &cases)?;

    let primary_path = dir.join(CXR_PRIMARY_FILE);
    if primary_path.exists() {
        let mut profiles: Vec<CaseProfile> = read_json(&primary_path)?;
        for profile in &mut profiles {
            profile.embeddings = by_case.get(&profile.case_id).cloned().unwrap_or_default();
        }
        write_json(&primary_path, &profiles)?;
    }
    Ok(clusters)
}
