//! Data models shared by the enrichment pipeline and its consumers.

use serde::{Deserialize, Serialize};

/// One row of the source catalogue. Position in the catalogue is the record's
/// identity; the struct itself carries only what the source provides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogueRecord {
    pub title: String,
    pub link: String,
}

impl CatalogueRecord {
    pub fn new(title: impl Into<String>, link: impl Into<String>) -> Self {
        Self { title: title.into(), link: link.into() }
    }

    /// Both fields must be present for the record to be worth fetching.
    pub fn is_complete(&self) -> bool {
        !self.title.trim().is_empty() && !self.link.trim().is_empty()
    }
}

/// Fixed research-area taxonomy the summariser must pick from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    PlantBiology,
    RadiationEffects,
    HumanPhysiology,
    Microbiology,
    CellularBiology,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::PlantBiology,
        Category::RadiationEffects,
        Category::HumanPhysiology,
        Category::Microbiology,
        Category::CellularBiology,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::PlantBiology     => "plant-biology",
            Category::RadiationEffects => "radiation-effects",
            Category::HumanPhysiology  => "human-physiology",
            Category::Microbiology     => "microbiology",
            Category::CellularBiology  => "cellular-biology",
        }
    }

    /// Parse a label as returned by the model. Case and surrounding
    /// whitespace are ignored; anything outside the taxonomy is rejected.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_lowercase();
        Self::ALL.into_iter().find(|c| c.as_str() == label)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated output of one inference call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredSummary {
    pub summary: String,
    pub category: Category,
    pub year: i32,
    pub keywords: Vec<String>,
}

pub const PLACEHOLDER_ORGANISM: &str = "Various";
pub const PLACEHOLDER_EXPERIMENT: &str = "Multiple";
pub const PLACEHOLDER_DURATION: &str = "N/A";
pub const PLACEHOLDER_LOCATION: &str = "Space & Ground Studies";
pub const PLACEHOLDER_METHODOLOGY: &str = "Refer to full publication.";
pub const PLACEHOLDER_IMPLICATIONS: &str =
    "Refer to the full publication for detailed implications.";

/// The persisted output unit, one per successfully enriched publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedRecord {
    pub id: String,
    pub title: String,
    pub url: String,
    pub summary: String,
    pub category: Category,
    pub year: i32,
    pub keywords: Vec<String>,
    pub organism: String,
    pub experiment: String,
    pub duration: String,
    pub location: String,
    pub methodology: String,
    pub findings: Vec<String>,
    pub implications: Vec<String>,
    pub related_studies: Vec<String>,
}

impl EnrichedRecord {
    /// Build the persisted record for the catalogue entry at 0-based
    /// `position`. The id is the 1-based position.
    pub fn from_summary(position: usize, record: &CatalogueRecord, ai: StructuredSummary) -> Self {
        Self {
            id: (position + 1).to_string(),
            title: record.title.clone(),
            url: record.link.clone(),
            findings: vec![ai.summary.clone()],
            summary: ai.summary,
            category: ai.category,
            year: ai.year,
            keywords: ai.keywords,
            organism: PLACEHOLDER_ORGANISM.to_string(),
            experiment: PLACEHOLDER_EXPERIMENT.to_string(),
            duration: PLACEHOLDER_DURATION.to_string(),
            location: PLACEHOLDER_LOCATION.to_string(),
            methodology: PLACEHOLDER_METHODOLOGY.to_string(),
            implications: vec![PLACEHOLDER_IMPLICATIONS.to_string()],
            related_studies: Vec::new(),
        }
    }
}
