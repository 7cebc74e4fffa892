//! `build-cxr`: every article with at least one chest X-ray, with all of its
//! images (any modality) copied next to the dataset.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use super::progress_bar;
use super::sources::{read_captions, ArticleTables, CaptionRow, CAPTIONS_FILE};
use crate::models::{SourceArticle, SourceImage};

static CXR_CAPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)chest\s*x-?ray|cxr").expect("valid regex"));
static PMC_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"PMC\d+").expect("valid regex"));

pub const DATASET_FILE: &str = "dataset.json";
pub const IMAGES_DIR: &str = "images";

#[derive(Debug, Default, Clone, PartialEq)]
pub struct BuildSummary {
    pub articles: usize,
    pub images: usize,
    pub copied: usize,
    pub missing: usize,
}

/// Radiology x-ray whose caption names a chest film.
pub fn is_chest_xray(row: &CaptionRow) -> bool {
    row.image_subtype == "x_ray"
        && row.image_type == "radiology"
        && CXR_CAPTION.is_match(&row.caption)
}

pub fn pmc_id_of(patient_id: &str) -> Option<&str> {
    PMC_ID.find(patient_id).map(|m| m.as_str())
}

/// Export layout: `PMC1/PMC10/PMC10_01_a.webp`.
pub fn source_image_path(base: &Path, file: &str) -> PathBuf {
    let prefix = |n: usize| file.get(..n).unwrap_or(file);
    base.join(prefix(4)).join(prefix(5)).join(file)
}

fn source_image(
    row: &CaptionRow,
    is_chest_xray: bool,
    text_references: &HashMap<String, Vec<String>>,
) -> SourceImage {
    SourceImage {
        file_id: row.file_id.clone(),
        file: row.file.clone(),
        main_image: row.main_image.clone(),
        image_component: row.image_component.clone(),
        patient_id: row.patient_id.clone(),
        license: row.license.clone(),
        file_size: row.file_size.map_or(0, |size| size.max(0.0) as u64),
        image_type: row.image_type.clone(),
        image_subtype: row.image_subtype.clone(),
        is_chest_xray,
        caption: row.caption.clone(),
        case_substring: row.case_substring.clone(),
        radiology_region: row.radiology_region.clone(),
        radiology_region_granular: row.radiology_region_granular.clone(),
        radiology_view: row.radiology_view.clone(),
        ml_labels: row.ml_labels.clone(),
        gt_labels: row.gt_labels.clone(),
        text_references: text_references.get(&row.main_image).cloned().unwrap_or_default(),
        local_image_path: format!("{IMAGES_DIR}/{}", row.file),
    }
}

/// Copies one image into `images_dir`. Returns false when the source is absent.
fn copy_image(base: &Path, images_dir: &Path, file: &str) -> Result<bool> {
    let source = source_image_path(base, file);
    if !source.exists() {
        return Ok(false);
    }
    let target = images_dir.join(file);
    if !target.exists() {
        fs::copy(&source, &target)
            .with_context(|| format!("Failed to copy {}", source.display()))?;
    }
    Ok(true)
}

/// Groups caption rows into articles. Only articles with a chest X-ray are
/// kept; their images are flagged by file id.
pub fn assemble_articles(
    captions: &[CaptionRow],
    tables: &ArticleTables,
) -> Vec<SourceArticle> {
    let cxr_rows: Vec<&CaptionRow> = captions.iter().filter(|row| is_chest_xray(row)).collect();
    let cxr_file_ids: HashSet<&str> = cxr_rows.iter().map(|row| row.file_id.as_str()).collect();
    let pmc_ids: BTreeSet<&str> = cxr_rows
        .iter()
        .filter_map(|row| pmc_id_of(&row.patient_id))
        .collect();
    info!(
        "Chest X-ray rows: {}, articles with chest X-rays: {}",
        cxr_rows.len(),
        pmc_ids.len()
    );

    let mut by_article: HashMap<&str, Vec<&CaptionRow>> = HashMap::new();
    for row in captions {
        if let Some(pmc_id) = pmc_id_of(&row.patient_id).filter(|id| pmc_ids.contains(id)) {
            by_article.entry(pmc_id).or_default().push(row);
        }
    }

    pmc_ids
        .into_iter()
        .map(|pmc_id| {
            let mut article = tables.article(pmc_id);
            article.images = by_article
                .get(pmc_id)
                .map(|rows| {
                    rows.iter()
                        .map(|row| {
                            let flagged = cxr_file_ids.contains(row.file_id.as_str());
                            source_image(row, flagged, &tables.text_references)
                        })
                        .collect()
                })
                .unwrap_or_default();
            article
        })
        .collect()
}

/// Reads the export under `base` and writes `dataset.json` plus `images/`
/// into `output`.
pub fn build_cxr_dataset(base: &Path, output: &Path) -> Result<BuildSummary> {
    let images_dir = output.join(IMAGES_DIR);
    fs::create_dir_all(&images_dir)
        .with_context(|| format!("Failed to create {}", images_dir.display()))?;

    info!("Loading source files from {}", base.display());
    let captions = read_captions(&base.join(CAPTIONS_FILE))?;
    let tables = ArticleTables::load(base)?;
    let articles = assemble_articles(&captions, &tables);

    let mut summary = BuildSummary {
        articles: articles.len(),
        ..Default::default()
    };
    let bar = progress_bar(articles.len() as u64, "Copying images");
    for article in &articles {
        for image in &article.images {
            summary.images += 1;
            if copy_image(base, &images_dir, &image.file)? {
                summary.copied += 1;
            } else {
                warn!("Missing source image {}", image.file);
                summary.missing += 1;
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    let dataset_path = output.join(DATASET_FILE);
    super::write_json(&dataset_path, &articles)?;
    info!(
        "Wrote {} articles to {} ({} images copied, {} missing)",
        summary.articles,
        dataset_path.display(),
        summary.copied,
        summary.missing
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(file_id: &str, patient_id: &str, subtype: &str, caption: &str) -> CaptionRow {
        CaptionRow {
            file_id: file_id.into(),
            file: format!("{file_id}.webp"),
            main_image: format!("main-{file_id}"),
            patient_id: patient_id.into(),
            image_type: "radiology".into(),
            image_subtype: subtype.into(),
            caption: caption.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_chest_xray_filter() {
        assert!(is_chest_xray(&row("a", "PMC1_01", "x_ray", "Chest X-ray showing effusion")));
        assert!(is_chest_xray(&row("a", "PMC1_01", "x_ray", "Follow-up CXR")));
        assert!(is_chest_xray(&row("a", "PMC1_01", "x_ray", "chest xray, day 3")));
        assert!(!is_chest_xray(&row("a", "PMC1_01", "x_ray", "Knee radiograph")));
        assert!(!is_chest_xray(&row("a", "PMC1_01", "ct", "Chest X-ray comparison")));
    }

    #[test]
    fn test_source_image_path() {
        let path = source_image_path(Path::new("/data"), "PMC10_01_a.webp");
        assert_eq!(path, PathBuf::from("/data/PMC1/PMC10/PMC10_01_a.webp"));
        assert_eq!(
            source_image_path(Path::new("/data"), "x.p"),
            PathBuf::from("/data/x.p/x.p/x.p")
        );
    }

    #[test]
    fn test_assemble_groups_by_exact_article() {
        let captions = vec![
            row("f1", "PMC1_01", "x_ray", "Chest x-ray"),
            row("f2", "PMC1_01", "ct", "CT thorax"),
            row("f3", "PMC10_01", "x_ray", "Abdominal film"),
            row("f4", "PMC2_01", "mri", "Brain MRI"),
        ];
        let mut tables = ArticleTables::default();
        tables
            .text_references
            .insert("main-f2".into(), vec!["Figure 2 shows...".into()]);

        let articles = assemble_articles(&captions, &tables);
        assert_eq!(articles.len(), 1);
        let article = &articles[0];
        assert_eq!(article.pmc_id, "PMC1");
        assert_eq!(article.images.len(), 2);
        assert!(article.images[0].is_chest_xray);
        assert!(!article.images[1].is_chest_xray);
        assert_eq!(article.images[1].text_references, vec!["Figure 2 shows..."]);
        assert_eq!(article.images[0].local_image_path, "images/f1.webp");
    }

    #[test]
    fn test_copy_image_reports_missing() {
        let base = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let nested = base.path().join("PMC1").join("PMC10");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("PMC10_a.png"), b"png").unwrap();

        assert!(copy_image(base.path(), out.path(), "PMC10_a.png").unwrap());
        assert_eq!(fs::read(out.path().join("PMC10_a.png")).unwrap(), b"png");
        assert!(!copy_image(base.path(), out.path(), "PMC10_b.png").unwrap());
    }
}
