//! Dataset records produced by the pipeline stages.
//!
//! `SourceArticle` is the merged MultiCaRe export (one per PMC article),
//! `SchemaExtraction` the flat LLM-extracted fields, `CaseRecord` the per-case
//! record, and `Cluster` a group of clinically similar cases.

use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::de::{lenient_list, lenient_string, lenient_u32, null_default};
use super::profile::{
    Assessment, Findings, Outcome, Patient, Presentation, Provenance, RelatedImage, Study,
    Summary, Tags,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceCase {
    pub case_id: String,
    #[serde(deserialize_with = "lenient_u32")]
    pub age: Option<u32>,
    #[serde(deserialize_with = "lenient_string")]
    pub gender: Option<String>,
    pub case_text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceImage {
    pub file_id: String,
    pub file: String,
    pub main_image: String,
    pub image_component: String,
    pub patient_id: String,
    pub license: String,
    pub file_size: u64,
    pub image_type: String,
    pub image_subtype: String,
    pub is_chest_xray: bool,
    pub caption: String,
    pub case_substring: String,
    #[serde(deserialize_with = "lenient_string")]
    pub radiology_region: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub radiology_region_granular: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub radiology_view: Option<String>,
    /// Stringified label list exactly as exported.
    pub ml_labels: String,
    pub gt_labels: String,
    #[serde(deserialize_with = "lenient_list")]
    pub text_references: Vec<String>,
    pub local_image_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceArticle {
    pub pmc_id: String,
    pub title: String,
    #[serde(deserialize_with = "lenient_list")]
    pub authors: Vec<String>,
    pub journal: String,
    pub journal_detail: String,
    #[serde(deserialize_with = "lenient_string")]
    pub year: Option<String>,
    pub doi: String,
    #[serde(deserialize_with = "lenient_string")]
    pub pmid: Option<String>,
    pub license: String,
    #[serde(deserialize_with = "lenient_list")]
    pub keywords: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub mesh_terms: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub major_mesh_terms: Vec<String>,
    pub link: String,
    pub case_amount: u32,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub cases: Vec<SourceCase>,
    pub images: Vec<SourceImage>,
}

impl SourceArticle {
    pub fn first_case(&self) -> Option<&SourceCase> {
        self.cases.first()
    }

    pub fn chest_xrays(&self) -> impl Iterator<Item = &SourceImage> {
        self.images.iter().filter(|img| img.is_chest_xray)
    }
}

/// Flat fields extracted by the language model from an article's abstract
/// and first case text. Absent or unparseable fields stay empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchemaExtraction {
    #[serde(deserialize_with = "lenient_string")]
    pub chief_complaint: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub symptom_duration: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub comorbidities: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub medications_used: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub immunocompromised: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub clinical_note_hpi: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub clinical_note_pmh: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub clinical_note_meds: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub clinical_note_allergies: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub primary_suspected: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub differential: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub infectious_concern: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub icu_candidate: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub lungs_consolidation_present: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub lungs_consolidation_location: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub lungs_consolidation_extent: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub lungs_atelectasis_present: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub lungs_atelectasis_location: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub lungs_edema_present: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub lungs_edema_pattern: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub pleura_effusion_present: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub pleura_effusion_side: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub pleura_effusion_size: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub pleura_pneumothorax_present: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub pleura_pneumothorax_side: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub cardiomegaly: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub mediastinal_widening: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub lines_tubes_present: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub device_list: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub summary_1_2_lines: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub bullets: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub red_flags: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub uncertainties: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub urgency: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub outcome_success: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub outcome_detail: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub ground_truth_diagnosis: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub ground_truth_source: Option<String>,
}

impl SchemaExtraction {
    pub fn is_empty(&self) -> bool {
        *self == SchemaExtraction::default()
    }
}

/// One image of a case in its final, schema-normalized form.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImageEntry {
    pub image_id: String,
    pub local_image_path: String,
    pub file_type: String,
    pub image_type: String,
    pub image_subtype: String,
    pub is_chest_xray: bool,
    pub view_position: String,
    #[serde(deserialize_with = "lenient_string")]
    pub radiology_region: Option<String>,
    pub caption: String,
    #[serde(deserialize_with = "lenient_list")]
    pub text_references: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub ml_labels: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub gt_labels: Vec<String>,
}

impl ImageEntry {
    /// Image ids are UUIDv5 over the export's file id (file name as fallback)
    /// so repeated pipeline runs agree.
    pub fn from_source(img: &SourceImage) -> Self {
        let file_key = if img.file_id.is_empty() {
            img.file.as_str()
        } else {
            img.file_id.as_str()
        };
        ImageEntry {
            image_id: stable_id(file_key),
            local_image_path: img.local_image_path.clone(),
            file_type: file_type(&img.file),
            image_type: img.image_type.clone(),
            image_subtype: img.image_subtype.clone(),
            is_chest_xray: img.is_chest_xray,
            view_position: normalize_view(img.radiology_view.as_deref()),
            radiology_region: img.radiology_region.clone(),
            caption: img.caption.clone(),
            text_references: img.text_references.clone(),
            ml_labels: super::de::parse_list_text(&img.ml_labels),
            gt_labels: super::de::parse_list_text(&img.gt_labels),
        }
    }

    pub fn to_related(&self) -> RelatedImage {
        RelatedImage {
            image_id: self.image_id.clone(),
            local_image_path: Some(self.local_image_path.clone()),
            file_type: Some(self.file_type.clone()),
            image_type: Some(self.image_type.clone()),
            image_subtype: Some(self.image_subtype.clone()),
            view_position: Some(self.view_position.clone()),
            radiology_region: self.radiology_region.clone(),
            caption: Some(self.caption.clone()),
            ml_labels: self.ml_labels.clone(),
            gt_labels: self.gt_labels.clone(),
        }
    }

    /// MIME type for the stored file, defaulting to JPEG.
    pub fn mime_type(&self) -> &'static str {
        mime_for_extension(&self.file_type)
    }
}

/// Per-case record: case-level clinical fields plus every image of the case.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaseRecord {
    pub case_id: String,
    #[serde(deserialize_with = "null_default")]
    pub patient: Patient,
    #[serde(deserialize_with = "null_default")]
    pub presentation: Presentation,
    #[serde(deserialize_with = "null_default")]
    pub study: Study,
    #[serde(deserialize_with = "null_default")]
    pub images: Vec<ImageEntry>,
    #[serde(deserialize_with = "null_default")]
    pub assessment: Assessment,
    #[serde(deserialize_with = "null_default")]
    pub findings: Findings,
    #[serde(deserialize_with = "null_default")]
    pub summary: Summary,
    #[serde(deserialize_with = "null_default")]
    pub outcome: Outcome,
    #[serde(deserialize_with = "null_default")]
    pub provenance: Provenance,
    #[serde(deserialize_with = "null_default")]
    pub tags: Tags,
    #[serde(deserialize_with = "null_default")]
    pub embeddings: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub cluster_id: usize,
    pub cluster_name: String,
    pub dominant_diagnosis: String,
    pub size: usize,
    pub case_ids: Vec<String>,
}

/// Deterministic UUIDv5 (URL namespace) for a dataset key.
pub fn stable_id(key: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()).to_string()
}

/// frontal→PA, sagittal→LATERAL, axial/oblique/missing→UNKNOWN, anything
/// else upper-cased.
pub fn normalize_view(view: Option<&str>) -> String {
    match view.map(|v| v.trim().to_lowercase()) {
        None => "UNKNOWN".to_string(),
        Some(v) if v.is_empty() => "UNKNOWN".to_string(),
        Some(v) => match v.as_str() {
            "frontal" => "PA".to_string(),
            "sagittal" => "LATERAL".to_string(),
            "axial" | "oblique" => "UNKNOWN".to_string(),
            other => other.to_uppercase(),
        },
    }
}

fn file_type(file: &str) -> String {
    Path::new(file)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .unwrap_or("webp")
        .to_string()
}

pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "webp" => "image/webp",
        "png" => "image/png",
        "gif" => "image/gif",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_view() {
        assert_eq!(normalize_view(Some("frontal")), "PA");
        assert_eq!(normalize_view(Some("Sagittal")), "LATERAL");
        assert_eq!(normalize_view(Some("oblique")), "UNKNOWN");
        assert_eq!(normalize_view(None), "UNKNOWN");
        assert_eq!(normalize_view(Some("ap")), "AP");
    }

    #[test]
    fn test_image_entry_from_source() {
        let source = SourceImage {
            file_id: "file_0001".into(),
            file: "PMC123_01_a.webp".into(),
            is_chest_xray: true,
            radiology_view: Some("frontal".into()),
            ml_labels: "['x_ray', 'chest']".into(),
            local_image_path: "images/PMC123_01_a.webp".into(),
            ..Default::default()
        };
        let entry = ImageEntry::from_source(&source);
        assert_eq!(entry.image_id, stable_id("file_0001"));
        assert_eq!(entry.file_type, "webp");
        assert_eq!(entry.view_position, "PA");
        assert_eq!(entry.ml_labels, vec!["x_ray", "chest"]);
        assert!(entry.gt_labels.is_empty());
        assert_eq!(entry.mime_type(), "image/webp");
    }

    #[test]
    fn test_stable_id_is_deterministic() {
        assert_eq!(stable_id("PMC42"), stable_id("PMC42"));
        assert_ne!(stable_id("PMC42"), stable_id("PMC43"));
    }

    #[test]
    fn test_mime_for_extension() {
        assert_eq!(mime_for_extension("JPG"), "image/jpeg");
        assert_eq!(mime_for_extension("png"), "image/png");
        assert_eq!(mime_for_extension("tiff"), "image/jpeg");
    }

    #[test]
    fn test_extraction_is_empty() {
        assert!(SchemaExtraction::default().is_empty());
        let parsed: SchemaExtraction =
            serde_json::from_str(r#"{"chief_complaint": "dyspnea", "comorbidities": null}"#).unwrap();
        assert!(!parsed.is_empty());
        assert!(parsed.comorbidities.is_empty());
    }
}
