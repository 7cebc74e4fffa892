//! `transform`: per-case records with every image of the case, and the
//! CXR-primary variant with one profile per chest X-ray.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use tracing::{info, warn};

use super::{read_json, write_json};
use crate::models::de::split_outside_parens;
use crate::models::profile::{profile_id, Study, Tags};
use crate::models::{CaseProfile, CaseRecord, ImageEntry, SourceArticle};

pub const PER_CASE_FILE: &str = "dataset_per_case.json";
pub const CXR_PRIMARY_FILE: &str = "dataset_cxr_primary.json";

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TransformSummary {
    pub cases: usize,
    pub missing: usize,
    pub images: usize,
    pub chest_xrays: usize,
    pub profiles: usize,
}

/// The enriched case fields with the export's full image list.
pub fn merge_case(enriched: &CaseRecord, images: &[ImageEntry]) -> CaseRecord {
    let mut case = enriched.clone();
    case.images = images.to_vec();
    case.study = Study {
        modality: Some("CXR".to_string()),
        body_region: enriched
            .study
            .body_region
            .clone()
            .filter(|r| !r.is_empty())
            .or_else(|| Some("thorax".to_string())),
        view_position: enriched.study.view_position.clone(),
        ..Default::default()
    };
    case.patient.medications = enriched
        .patient
        .medications
        .iter()
        .flat_map(|m| split_outside_parens(m))
        .collect();
    case.embeddings = Vec::new();
    case
}

/// One profile per chest X-ray of `case`; the case's other images ride
/// along as `related_images`.
pub fn cxr_primary_profiles(case: &CaseRecord) -> Vec<CaseProfile> {
    let related: Vec<_> = case
        .images
        .iter()
        .filter(|img| !img.is_chest_xray)
        .map(ImageEntry::to_related)
        .collect();

    case.images
        .iter()
        .filter(|img| img.is_chest_xray)
        .map(|img| CaseProfile {
            profile_id: profile_id(&case.case_id, &img.image_id),
            case_id: case.case_id.clone(),
            image_id: img.image_id.clone(),
            patient: case.patient.clone(),
            presentation: case.presentation.clone(),
            study: Study {
                modality: Some(img.image_subtype.clone()),
                body_region: img
                    .radiology_region
                    .clone()
                    .or_else(|| case.study.body_region.clone()),
                view_position: Some(img.view_position.clone()),
                radiology_region: img.radiology_region.clone(),
                caption: Some(img.caption.clone()),
                image_type: Some(img.image_type.clone()),
                image_subtype: Some(img.image_subtype.clone()),
                image_url: None,
                storage_path: Some(img.local_image_path.clone()),
            },
            related_images: related.clone(),
            assessment: case.assessment.clone(),
            findings: case.findings.clone(),
            summary: case.summary.clone(),
            outcome: case.outcome.clone(),
            provenance: case.provenance.clone(),
            tags: Tags {
                ml_labels: img.ml_labels.clone(),
                gt_labels: img.gt_labels.clone(),
                keywords: case.tags.keywords.clone(),
                mesh_terms: case.tags.mesh_terms.clone(),
            },
            extra_fields: Default::default(),
            embeddings: Vec::new(),
        })
        .collect()
}

/// Joins enriched records to source articles on PMC id. The first enriched
/// record of an article wins; articles without one are counted as missing.
pub fn merge_records(
    enriched: &[CaseRecord],
    sources: &[SourceArticle],
) -> (Vec<CaseRecord>, Vec<String>) {
    let mut by_pmc: HashMap<&str, &CaseRecord> = HashMap::new();
    for record in enriched {
        if let Some(pmc_id) = record.provenance.pmc_id.as_deref() {
            by_pmc.entry(pmc_id).or_insert(record);
        }
    }

    let mut cases = Vec::new();
    let mut missing = Vec::new();
    for article in sources {
        match by_pmc.get(article.pmc_id.as_str()) {
            Some(record) => {
                let images: Vec<ImageEntry> =
                    article.images.iter().map(ImageEntry::from_source).collect();
                cases.push(merge_case(record, &images));
            }
            None => missing.push(article.pmc_id.clone()),
        }
    }
    (cases, missing)
}

/// Reads the enriched records and the build-cxr source, writes both variants
/// into `output_dir`.
pub fn transform(enriched_path: &Path, source_path: &Path, output_dir: &Path) -> Result<TransformSummary> {
    let enriched: Vec<CaseRecord> = read_json(enriched_path)?;
    let sources: Vec<SourceArticle> = read_json(source_path)?;

    let (cases, missing) = merge_records(&enriched, &sources);
    if !missing.is_empty() {
        warn!("{} source articles have no enriched record", missing.len());
    }

    let images: usize = cases.iter().map(|c| c.images.len()).sum();
    let chest_xrays: usize = cases
        .iter()
        .map(|c| c.images.iter().filter(|img| img.is_chest_xray).count())
        .sum();
    info!(
        "Cases: {}, images: {images} ({chest_xrays} CXR, {} other)",
        cases.len(),
        images - chest_xrays
    );
    write_json(&output_dir.join(PER_CASE_FILE), &cases)?;

    let profiles: Vec<CaseProfile> = cases.iter().flat_map(cxr_primary_profiles).collect();
    info!("CXR-primary profiles: {}", profiles.len());
    write_json(&output_dir.join(CXR_PRIMARY_FILE), &profiles)?;

    Ok(TransformSummary {
        cases: cases.len(),
        missing: missing.len(),
        images,
        chest_xrays,
        profiles: profiles.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceImage;

    fn image(file_id: &str, cxr: bool) -> SourceImage {
        SourceImage {
            file_id: file_id.into(),
            file: format!("{file_id}.webp"),
            image_subtype: if cxr { "x_ray" } else { "ct" }.into(),
            image_type: "radiology".into(),
            is_chest_xray: cxr,
            radiology_view: cxr.then(|| "sagittal".to_string()),
            local_image_path: format!("images/{file_id}.webp"),
            gt_labels: "['chest']".into(),
            ..Default::default()
        }
    }

    fn enriched(pmc_id: &str) -> CaseRecord {
        let mut record = CaseRecord {
            case_id: format!("case-{pmc_id}"),
            embeddings: vec![0.1],
            ..Default::default()
        };
        record.provenance.pmc_id = Some(pmc_id.into());
        record.patient.medications = vec!["aspirin (81 mg, daily), metformin".into()];
        record.tags.keywords = vec!["pneumothorax".into()];
        record
    }

    #[test]
    fn test_merge_case_defaults_region() {
        let merged = merge_case(&enriched("PMC1"), &[]);
        assert_eq!(merged.study.modality.as_deref(), Some("CXR"));
        assert_eq!(merged.study.body_region.as_deref(), Some("thorax"));
        assert_eq!(merged.patient.medications, vec!["aspirin (81 mg, daily)", "metformin"]);
        assert!(merged.embeddings.is_empty());
    }

    #[test]
    fn test_cxr_primary_profiles() {
        let sources = vec![SourceArticle {
            pmc_id: "PMC1".into(),
            images: vec![image("a", true), image("b", false), image("c", true)],
            ..Default::default()
        }];
        let (cases, missing) = merge_records(&[enriched("PMC1")], &sources);
        assert!(missing.is_empty());

        let profiles = cxr_primary_profiles(&cases[0]);
        assert_eq!(profiles.len(), 2);
        let first = &profiles[0];
        assert_eq!(first.profile_id, format!("case-PMC1:{}", first.image_id));
        assert_eq!(first.study.modality.as_deref(), Some("x_ray"));
        assert_eq!(first.study.view_position.as_deref(), Some("LATERAL"));
        assert_eq!(first.study.storage_path.as_deref(), Some("images/a.webp"));
        assert_eq!(first.related_images.len(), 1);
        assert_eq!(first.related_images[0].image_subtype.as_deref(), Some("ct"));
        assert_eq!(first.tags.gt_labels, vec!["chest"]);
        assert_eq!(first.tags.keywords, vec!["pneumothorax"]);
    }

    #[test]
    fn test_transform_writes_both_variants() {
        let dir = tempfile::tempdir().unwrap();
        let enriched_path = dir.path().join("enriched.json");
        let source_path = dir.path().join("source.json");
        write_json(&enriched_path, &vec![enriched("PMC1")]).unwrap();
        write_json(
            &source_path,
            &vec![
                SourceArticle {
                    pmc_id: "PMC1".into(),
                    images: vec![image("a", true), image("b", false)],
                    ..Default::default()
                },
                SourceArticle {
                    pmc_id: "PMC2".into(),
                    ..Default::default()
                },
            ],
        )
        .unwrap();

        let summary = transform(&enriched_path, &source_path, dir.path()).unwrap();
        assert_eq!(
            summary,
            TransformSummary {
                cases: 1,
                missing: 1,
                images: 2,
                chest_xrays: 1,
                profiles: 1,
            }
        );
        let profiles: Vec<CaseProfile> = read_json(&dir.path().join(CXR_PRIMARY_FILE)).unwrap();
        assert_eq!(profiles[0].case_id, "case-PMC1");
    }
}
