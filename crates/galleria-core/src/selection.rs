//! Selection results and the wire contracts of the two LLM-style collaborators.
//!
//! The text-understanding service produces a [`SceneContext`]; the
//! final-selection service receives a [`FinalSelectionRequest`] and answers
//! with a [`FinalSelectionResponse`].

use serde::{Deserialize, Serialize};

use crate::gallery::{Image, SensitivityLevel};

/// An item paired with a ranking score.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored<T> {
    pub item: T,
    pub score: f32,
}

/// Scene understanding returned by the text-understanding service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneContext {
    pub entities: Vec<String>,
    #[serde(default)]
    pub scene_summary: String,
    #[serde(default)]
    pub clip_query: String,
    pub sensitivity_level: SensitivityLevel,
    #[serde(default)]
    pub reasoning: String,
}

impl SceneContext {
    /// Text used for the scene embedding: `clipQuery`, falling back to `sceneSummary`.
    ///
    /// `None` when both are blank.
    pub fn query_text(&self) -> Option<&str> {
        [self.clip_query.as_str(), self.scene_summary.as_str()]
            .into_iter()
            .map(str::trim)
            .find(|s| !s.is_empty())
    }

    pub fn brief(&self) -> SceneBrief {
        SceneBrief {
            scene_summary: self.scene_summary.clone(),
            clip_query: self.clip_query.clone(),
            sensitivity_level: self.sensitivity_level,
        }
    }
}

/// Scene context forwarded to the final-selection service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneBrief {
    pub scene_summary: String,
    pub clip_query: String,
    pub sensitivity_level: SensitivityLevel,
}

/// An image as the final-selection service sees it: id and tags only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateImage {
    pub id: String,
    pub tags: Vec<String>,
}

impl From<&Image> for CandidateImage {
    fn from(image: &Image) -> Self {
        Self {
            id: image.id.clone(),
            tags: image.tags.clone(),
        }
    }
}

/// Post-narrowing candidates for one matched entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryCandidates {
    pub gallery_id: String,
    pub entity_name: String,
    pub images: Vec<CandidateImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalSelectionRequest {
    pub scene_context: SceneBrief,
    pub per_gallery_candidates: Vec<GalleryCandidates>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalSelectionResponse {
    pub results: Vec<SelectionResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Matched,
    Unmatched,
}

/// Outcome for one extracted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionResult {
    pub name: String,
    pub status: MatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gallery_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SelectionResult {
    pub fn unmatched(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: MatchStatus::Unmatched,
            gallery_id: None,
            selected_image_id: None,
            score: None,
            reason: Some(reason.into()),
        }
    }

    pub fn is_matched(&self) -> bool {
        self.status == MatchStatus::Matched
    }
}
