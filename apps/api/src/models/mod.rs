pub mod dataset;
pub mod de;
pub mod profile;

pub use dataset::{
    CaseRecord, Cluster, ImageEntry, SchemaExtraction, SourceArticle, SourceCase, SourceImage,
};
pub use profile::CaseProfile;
