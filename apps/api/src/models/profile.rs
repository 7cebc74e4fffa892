//! CaseProfile: the structured summary of one patient case anchored on one image.
//!
//! The same shape is produced by `/extract`, stored as the Qdrant payload and
//! consumed by the re-ranker and the commentary prompts. Every field defaults
//! so partially-populated payloads deserialize.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::de::{
    lenient_f64, lenient_id, lenient_list, lenient_map, lenient_string, lenient_u32, null_default,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Patient {
    #[serde(deserialize_with = "lenient_u32")]
    pub age_years: Option<u32>,
    #[serde(deserialize_with = "lenient_string")]
    pub sex: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub immunocompromised: Option<String>,
    #[serde(deserialize_with = "lenient_f64")]
    pub weight_kg: Option<f64>,
    #[serde(deserialize_with = "lenient_list")]
    pub comorbidities: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub medications: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub allergies: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Presentation {
    #[serde(deserialize_with = "lenient_string")]
    pub chief_complaint: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub symptom_duration: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub hpi: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub pmh: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Study {
    #[serde(deserialize_with = "lenient_string")]
    pub modality: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub body_region: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub view_position: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub radiology_region: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub caption: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub image_type: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub image_subtype: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub image_url: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub storage_path: Option<String>,
}

/// A non-anchor image from the same case.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelatedImage {
    pub image_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub local_image_path: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub file_type: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub image_type: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub image_subtype: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub view_position: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub radiology_region: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub caption: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub ml_labels: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub gt_labels: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Assessment {
    #[serde(deserialize_with = "lenient_string")]
    pub diagnosis_primary: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub suspected_primary: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub differential: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub urgency: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub infectious_concern: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub icu_candidate: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LungFindings {
    #[serde(deserialize_with = "lenient_string")]
    pub consolidation_present: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub consolidation_locations: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub consolidation_extent: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub atelectasis_present: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub atelectasis_locations: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub edema_present: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub edema_pattern: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PleuraFindings {
    #[serde(deserialize_with = "lenient_string")]
    pub effusion_present: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub effusion_side: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub effusion_size: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub pneumothorax_present: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub pneumothorax_side: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CardiomediastinalFindings {
    #[serde(deserialize_with = "lenient_string")]
    pub cardiomegaly: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub mediastinal_widening: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceFindings {
    #[serde(deserialize_with = "lenient_string")]
    pub lines_tubes_present: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub device_list: Vec<String>,
}

/// Radiological findings. Chest regions are typed; any other body-system
/// region the extractor produced is kept verbatim in `other`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Findings {
    #[serde(deserialize_with = "null_default")]
    pub lungs: LungFindings,
    #[serde(deserialize_with = "null_default")]
    pub pleura: PleuraFindings,
    #[serde(deserialize_with = "null_default")]
    pub cardiomediastinal: CardiomediastinalFindings,
    #[serde(deserialize_with = "null_default")]
    pub devices: DeviceFindings,
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

/// `"yes"` and `"true"` both count as present.
pub fn is_yes(value: &Option<String>) -> bool {
    value
        .as_deref()
        .is_some_and(|v| v.eq_ignore_ascii_case("yes") || v.eq_ignore_ascii_case("true"))
}

impl Findings {
    /// Every flag explicitly negative and every qualifier unknown.
    pub fn negative_baseline() -> Self {
        let no = || Some("no".to_string());
        let unknown = || Some("unknown".to_string());
        Findings {
            lungs: LungFindings {
                consolidation_present: no(),
                consolidation_locations: Vec::new(),
                consolidation_extent: unknown(),
                atelectasis_present: no(),
                atelectasis_locations: Vec::new(),
                edema_present: no(),
                edema_pattern: unknown(),
            },
            pleura: PleuraFindings {
                effusion_present: no(),
                effusion_side: unknown(),
                effusion_size: unknown(),
                pneumothorax_present: no(),
                pneumothorax_side: unknown(),
            },
            cardiomediastinal: CardiomediastinalFindings {
                cardiomegaly: no(),
                mediastinal_widening: no(),
            },
            devices: DeviceFindings {
                lines_tubes_present: no(),
                device_list: Vec::new(),
            },
            other: BTreeMap::new(),
        }
    }

    /// Human-readable names of the positive chest findings.
    pub fn positive_findings(&self) -> Vec<&'static str> {
        let flags = [
            (&self.lungs.consolidation_present, "consolidation"),
            (&self.lungs.edema_present, "pulmonary edema"),
            (&self.lungs.atelectasis_present, "atelectasis"),
            (&self.pleura.effusion_present, "pleural effusion"),
            (&self.pleura.pneumothorax_present, "pneumothorax"),
            (&self.cardiomediastinal.cardiomegaly, "cardiomegaly"),
        ];
        flags
            .into_iter()
            .filter(|(flag, _)| is_yes(flag))
            .map(|(_, name)| name)
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Summary {
    #[serde(deserialize_with = "lenient_string")]
    pub one_liner: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub key_points: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub red_flags: Vec<String>,
    #[serde(deserialize_with = "lenient_list", skip_serializing_if = "Vec::is_empty")]
    pub uncertainties: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Outcome {
    #[serde(deserialize_with = "lenient_string")]
    pub success: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Provenance {
    #[serde(deserialize_with = "lenient_string")]
    pub dataset_name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub pmc_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub pmid: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub doi: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub article_title: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub journal: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub year: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub authors: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub license: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Tags {
    #[serde(deserialize_with = "lenient_list")]
    pub ml_labels: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub gt_labels: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub keywords: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub mesh_terms: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaseProfile {
    #[serde(deserialize_with = "lenient_id")]
    pub profile_id: String,
    #[serde(deserialize_with = "lenient_id")]
    pub case_id: String,
    #[serde(deserialize_with = "lenient_id")]
    pub image_id: String,
    #[serde(deserialize_with = "null_default")]
    pub patient: Patient,
    #[serde(deserialize_with = "null_default")]
    pub presentation: Presentation,
    #[serde(deserialize_with = "null_default")]
    pub study: Study,
    #[serde(deserialize_with = "null_default")]
    pub related_images: Vec<RelatedImage>,
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
    #[serde(deserialize_with = "lenient_map")]
    pub extra_fields: BTreeMap<String, String>,
    #[serde(deserialize_with = "null_default", skip_serializing_if = "Vec::is_empty")]
    pub embeddings: Vec<f32>,
}

pub fn profile_id(case_id: &str, image_id: &str) -> String {
    format!("{case_id}:{image_id}")
}
