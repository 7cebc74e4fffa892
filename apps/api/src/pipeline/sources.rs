//! Readers for the MultiCaRe export: the captions CSV and the four parquet
//! tables keyed by `article_id`.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use parquet::file::reader::{FileReader, SerializedFileReader};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::models::de::value_to_list;
use crate::models::{SourceArticle, SourceCase};

pub const CAPTIONS_FILE: &str = "captions_and_labels.csv";
pub const METADATA_FILE: &str = "metadata.parquet";
pub const ABSTRACTS_FILE: &str = "abstracts.parquet";
pub const CASES_FILE: &str = "cases.parquet";
pub const CASE_IMAGES_FILE: &str = "case_images.parquet";

/// One row of `captions_and_labels.csv`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptionRow {
    pub file_id: String,
    pub file: String,
    pub main_image: String,
    pub image_component: String,
    pub patient_id: String,
    pub license: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub file_size: Option<f64>,
    pub image_type: String,
    pub image_subtype: String,
    pub caption: String,
    pub case_substring: String,
    pub radiology_region: Option<String>,
    pub radiology_region_granular: Option<String>,
    pub radiology_view: Option<String>,
    #[serde(rename = "ml_labels_for_supervised_classification")]
    pub ml_labels: String,
    #[serde(rename = "gt_labels_for_semisupervised_classification")]
    pub gt_labels: String,
}

pub fn read_captions(path: &Path) -> Result<Vec<CaptionRow>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for (line, record) in reader.deserialize::<CaptionRow>().enumerate() {
        match record {
            Ok(row) => rows.push(row),
            Err(e) => warn!("Skipping malformed caption row {}: {e}", line + 2),
        }
    }
    debug!("Read {} caption rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// Every row of a parquet file as a JSON object. Nested structs and lists
/// come back as JSON objects and arrays.
pub fn read_parquet_rows(path: &Path) -> Result<Vec<Map<String, Value>>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = SerializedFileReader::new(file)
        .with_context(|| format!("Not a parquet file: {}", path.display()))?;
    debug!(
        "{}: {} rows in {} row groups",
        path.display(),
        reader.metadata().file_metadata().num_rows(),
        reader.num_row_groups()
    );

    let mut rows = Vec::new();
    for row in reader.get_row_iter(None)? {
        if let Value::Object(map) = row?.to_json_value() {
            rows.push(map);
        }
    }
    Ok(rows)
}

/// Parquet nulls become absent keys so serde defaults apply.
fn without_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, without_nulls(v)))
                .collect(),
        ),
        other => other,
    }
}

fn article_id(row: &Map<String, Value>) -> Option<String> {
    row.get("article_id").and_then(Value::as_str).map(str::to_string)
}

/// Article-level tables indexed by PMC id, plus the image-id to
/// text-reference lookup from `case_images.parquet`.
#[derive(Debug, Default)]
pub struct ArticleTables {
    pub metadata: HashMap<String, Map<String, Value>>,
    pub abstracts: HashMap<String, String>,
    pub cases: HashMap<String, Vec<SourceCase>>,
    pub text_references: HashMap<String, Vec<String>>,
}

impl ArticleTables {
    pub fn load(base: &Path) -> Result<Self> {
        let mut tables = ArticleTables::default();

        for row in read_parquet_rows(&base.join(METADATA_FILE))? {
            let Some(id) = article_id(&row) else { continue };
            if let Some(Value::Object(meta)) = row.get("article_metadata").cloned().map(without_nulls) {
                tables.metadata.entry(id).or_insert(meta);
            }
        }

        for row in read_parquet_rows(&base.join(ABSTRACTS_FILE))? {
            let Some(id) = article_id(&row) else { continue };
            if let Some(text) = row.get("abstract").and_then(Value::as_str) {
                tables.abstracts.entry(id).or_insert_with(|| text.to_string());
            }
        }

        for row in read_parquet_rows(&base.join(CASES_FILE))? {
            let Some(id) = article_id(&row) else { continue };
            let cases = row
                .get("cases")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|case| serde_json::from_value(without_nulls(case.clone())).ok())
                        .collect()
                })
                .unwrap_or_default();
            tables.cases.entry(id).or_insert(cases);
        }

        for row in read_parquet_rows(&base.join(CASE_IMAGES_FILE))? {
            let Some(images) = row.get("case_images").and_then(Value::as_array) else {
                continue;
            };
            for image in images {
                let Some(image_id) = image.get("image_id").and_then(Value::as_str) else {
                    continue;
                };
                let refs = image.get("text_references").map(value_to_list).unwrap_or_default();
                tables.text_references.insert(image_id.to_string(), refs);
            }
        }

        Ok(tables)
    }

    /// Metadata, abstract and cases merged into an article with no images yet.
    pub fn article(&self, pmc_id: &str) -> SourceArticle {
        let mut article: SourceArticle = self
            .metadata
            .get(pmc_id)
            .and_then(|meta| serde_json::from_value(Value::Object(meta.clone())).ok())
            .unwrap_or_default();
        article.pmc_id = pmc_id.to_string();
        article.abstract_text = self.abstracts.get(pmc_id).cloned().unwrap_or_default();
        article.cases = self.cases.get(pmc_id).cloned().unwrap_or_default();
        article
    }
}
