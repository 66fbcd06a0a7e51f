//! Selection pipeline: extract → match & gate → narrow → disambiguate.
//!
//! One call runs the four stages strictly in order. Stage A and Stage D
//! call external collaborators and fail the request when those fail;
//! Stage C degrades instead, recording why images or galleries were not
//! narrowed in the returned [`SelectionReport`].

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use galleria_ai::{EmbeddingClient, EmbeddingKind, cosine_similarity, match_gallery, rank};
use galleria_core::{
    AliasTable, CandidateImage, FinalSelectionRequest, FinalSelectionResponse, Gallery,
    GalleryCandidates, Image, SceneContext, SelectionConfig, SelectionResult,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::collaborator::{CollaboratorError, ContextExtractor, FinalSelector};
use crate::error::SelectError;

/// Default bound on concurrent image-embedding fetches per gallery.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// What Stage C did to one matched gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum NarrowingOutcome {
    /// At or below the narrowing threshold; passed through as is.
    Unchanged,
    Narrowed { from: usize, to: usize },
    /// The scene embedding was unavailable; passed through unfiltered.
    Degraded { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryNarrowing {
    pub gallery_id: String,
    pub entity_name: String,
    #[serde(flatten)]
    pub outcome: NarrowingOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SkipReason {
    EmbeddingUnavailable { cause: String, timeout: bool },
    DimensionMismatch { expected: usize, actual: usize },
}

/// An image left out of similarity ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedImage {
    pub gallery_id: String,
    pub image_id: String,
    pub reason: SkipReason,
}

/// Result of one selection request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionReport {
    pub scene: SceneContext,
    /// One entry per extracted entity, in extraction order.
    pub results: Vec<SelectionResult>,
    pub narrowing: Vec<GalleryNarrowing>,
    pub skipped: Vec<SkippedImage>,
}

impl SelectionReport {
    pub fn matched_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_matched()).count()
    }
}

/// Per-entity state carried from Stage B to Stage D.
enum Assignment {
    Unmatched { entity: String, reason: String },
    Matched { entity: String, gallery: Gallery },
}

pub struct Orchestrator {
    extractor: Arc<dyn ContextExtractor>,
    selector: Arc<dyn FinalSelector>,
    embeddings: Arc<EmbeddingClient>,
    aliases: AliasTable,
    config: SelectionConfig,
    max_concurrency: usize,
}

impl Orchestrator {
    pub fn new(
        extractor: Arc<dyn ContextExtractor>,
        selector: Arc<dyn FinalSelector>,
        embeddings: Arc<EmbeddingClient>,
    ) -> Self {
        Self {
            extractor,
            selector,
            embeddings,
            aliases: AliasTable::new(),
            config: SelectionConfig::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    pub fn with_aliases(mut self, aliases: AliasTable) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn with_config(mut self, config: SelectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn embeddings(&self) -> &Arc<EmbeddingClient> {
        &self.embeddings
    }

    /// Run the pipeline, bounded by the configured request deadline if any.
    pub async fn select(
        &self,
        text: &str,
        galleries: &[Gallery],
    ) -> Result<SelectionReport, SelectError> {
        match self.config.request_deadline() {
            Some(deadline) => self.select_with_deadline(text, galleries, deadline).await,
            None => self.run(text, galleries).await,
        }
    }

    /// Run the pipeline, abandoning it once `deadline` has elapsed.
    ///
    /// Embeddings cached before the deadline stay cached.
    pub async fn select_with_deadline(
        &self,
        text: &str,
        galleries: &[Gallery],
        deadline: Duration,
    ) -> Result<SelectionReport, SelectError> {
        tokio::time::timeout(deadline, self.run(text, galleries))
            .await
            .map_err(|_| {
                warn!(?deadline, "selection deadline exceeded");
                SelectError::DeadlineExceeded(deadline)
            })?
    }

    async fn run(&self, text: &str, galleries: &[Gallery]) -> Result<SelectionReport, SelectError> {
        if text.trim().is_empty() {
            return Err(SelectError::InvalidInput("conversation text is blank".into()));
        }
        if galleries.is_empty() {
            return Err(SelectError::InvalidInput("no galleries supplied".into()));
        }

        let scene = self.extract(text).await?;
        let mut assignments = self.match_and_gate(&scene, galleries);
        let (narrowing, skipped) = self.narrow(&scene, &mut assignments).await?;
        let results = self.disambiguate(&scene, &assignments).await?;

        let report = SelectionReport {
            scene,
            results,
            narrowing,
            skipped,
        };
        info!(
            entities = report.results.len(),
            matched = report.matched_count(),
            skipped = report.skipped.len(),
            "selection complete"
        );
        Ok(report)
    }

    // ── Stage A ──

    async fn extract(&self, text: &str) -> Result<SceneContext, SelectError> {
        let scene = with_timeout(self.config.extraction_timeout(), self.extractor.extract(text))
            .await
            .map_err(SelectError::Extraction)?;
        info!(
            entities = scene.entities.len(),
            level = %scene.sensitivity_level,
            "stage A: scene extracted"
        );
        Ok(scene)
    }

    // ── Stage B ──

    fn match_and_gate(&self, scene: &SceneContext, galleries: &[Gallery]) -> Vec<Assignment> {
        let level = scene.sensitivity_level;
        scene
            .entities
            .iter()
            .map(|entity| match match_gallery(entity, galleries, &self.aliases) {
                Ok(Some(m)) => {
                    let gallery = m.gallery.gated(level);
                    debug!(
                        entity = %entity,
                        gallery = %gallery.id,
                        strategy = ?m.strategy,
                        score = m.score,
                        allowed = gallery.images.len(),
                        total = m.gallery.images.len(),
                        "stage B: gallery matched"
                    );
                    Assignment::Matched {
                        entity: entity.clone(),
                        gallery,
                    }
                }
                Ok(None) => {
                    debug!(entity = %entity, "stage B: no gallery matched");
                    Assignment::Unmatched {
                        entity: entity.clone(),
                        reason: "no gallery matches this name".into(),
                    }
                }
                Err(e) => {
                    warn!(entity = %entity, error = %e, "stage B: entity not matchable");
                    Assignment::Unmatched {
                        entity: entity.clone(),
                        reason: e.to_string(),
                    }
                }
            })
            .collect()
    }

    // ── Stage C ──

    async fn narrow(
        &self,
        scene: &SceneContext,
        assignments: &mut [Assignment],
    ) -> Result<(Vec<GalleryNarrowing>, Vec<SkippedImage>), SelectError> {
        let threshold = self.config.narrowing_threshold;
        let needs_query = assignments.iter().any(
            |a| matches!(a, Assignment::Matched { gallery, .. } if gallery.images.len() > threshold),
        );
        let query = if needs_query {
            Some(self.scene_embedding(scene).await)
        } else {
            None
        };

        let mut narrowing = Vec::new();
        let mut skipped = Vec::new();
        for assignment in assignments.iter_mut() {
            let Assignment::Matched { entity, gallery } = assignment else {
                continue;
            };
            let before = gallery.images.len();
            let outcome = match &query {
                Some(Ok(q)) if before > threshold => {
                    let (kept, dropped) = self.rank_gallery(q, gallery).await?;
                    skipped.extend(dropped);
                    gallery.images = kept;
                    NarrowingOutcome::Narrowed {
                        from: before,
                        to: gallery.images.len(),
                    }
                }
                Some(Err(reason)) if before > threshold => NarrowingOutcome::Degraded {
                    reason: reason.clone(),
                },
                _ => NarrowingOutcome::Unchanged,
            };
            debug!(gallery = %gallery.id, ?outcome, "stage C: gallery narrowed");
            narrowing.push(GalleryNarrowing {
                gallery_id: gallery.id.clone(),
                entity_name: entity.clone(),
                outcome,
            });
        }
        Ok((narrowing, skipped))
    }

    /// Scene embedding, or the reason Stage C must pass galleries through.
    async fn scene_embedding(&self, scene: &SceneContext) -> Result<Vec<f32>, String> {
        let Some(text) = scene.query_text() else {
            warn!("stage C degraded: scene has no query text");
            return Err("scene has neither clipQuery nor sceneSummary".into());
        };
        self.embeddings
            .get_embedding(EmbeddingKind::Text, text)
            .await
            .map_err(|e| {
                warn!(error = %e, "stage C degraded: scene embedding unavailable");
                e.to_string()
            })
    }

    /// Top-k images of `gallery` by similarity to `query`, plus the images
    /// that could not be ranked.
    async fn rank_gallery(
        &self,
        query: &[f32],
        gallery: &Gallery,
    ) -> Result<(Vec<Image>, Vec<SkippedImage>), SelectError> {
        let fetched: Vec<_> = stream::iter(&gallery.images)
            .map(|image| async move {
                let vector = self
                    .embeddings
                    .get_embedding(EmbeddingKind::Image, image.representative_url())
                    .await;
                (image, vector)
            })
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut ranked = Vec::with_capacity(fetched.len());
        let mut scores = Vec::with_capacity(fetched.len());
        let mut skipped = Vec::new();
        for (image, vector) in fetched {
            let reason = match vector {
                Ok(v) => match cosine_similarity(query, &v) {
                    Ok(score) => {
                        ranked.push(image);
                        scores.push(score);
                        continue;
                    }
                    Err(_) => SkipReason::DimensionMismatch {
                        expected: query.len(),
                        actual: v.len(),
                    },
                },
                Err(e) => SkipReason::EmbeddingUnavailable {
                    timeout: e.is_timeout(),
                    cause: e.to_string(),
                },
            };
            warn!(gallery = %gallery.id, image = %image.id, ?reason, "stage C: image skipped");
            skipped.push(SkippedImage {
                gallery_id: gallery.id.clone(),
                image_id: image.id.clone(),
                reason,
            });
        }

        let kept = rank(ranked, &scores)?
            .into_iter()
            .take(self.config.top_k)
            .map(|s| s.item.clone())
            .collect();
        Ok((kept, skipped))
    }

    // ── Stage D ──

    async fn disambiguate(
        &self,
        scene: &SceneContext,
        assignments: &[Assignment],
    ) -> Result<Vec<SelectionResult>, SelectError> {
        let mut requested = Vec::new();
        let mut seen = HashSet::new();
        for assignment in assignments {
            if let Assignment::Matched { entity, gallery } = assignment
                && !gallery.images.is_empty()
                && seen.insert(entity.as_str())
            {
                requested.push(GalleryCandidates {
                    gallery_id: gallery.id.clone(),
                    entity_name: entity.clone(),
                    images: gallery.images.iter().map(CandidateImage::from).collect(),
                });
            }
        }

        let answers = if requested.is_empty() {
            info!("stage D skipped: no entity has candidate images");
            HashMap::new()
        } else {
            let request = FinalSelectionRequest {
                scene_context: scene.brief(),
                per_gallery_candidates: requested,
            };
            let response = with_timeout(
                self.config.disambiguation_timeout(),
                self.selector.select(&request),
            )
            .await
            .map_err(SelectError::Disambiguation)?;
            validate_response(&request, response).map_err(SelectError::Disambiguation)?
        };

        Ok(assignments
            .iter()
            .map(|assignment| match assignment {
                Assignment::Unmatched { entity, reason } => {
                    SelectionResult::unmatched(entity, reason)
                }
                Assignment::Matched { entity, gallery } if gallery.images.is_empty() => {
                    unmatched_in(entity, gallery, "no candidate images remain in the gallery")
                }
                Assignment::Matched { entity, gallery } => {
                    answers.get(entity).cloned().unwrap_or_else(|| {
                        unmatched_in(entity, gallery, "final selection returned no result")
                    })
                }
            })
            .collect())
    }
}

fn unmatched_in(entity: &str, gallery: &Gallery, reason: &str) -> SelectionResult {
    SelectionResult {
        gallery_id: Some(gallery.id.clone()),
        ..SelectionResult::unmatched(entity, reason)
    }
}

/// Index the final-selection reply by entity name, rejecting selections
/// that were not offered.
fn validate_response(
    request: &FinalSelectionRequest,
    response: FinalSelectionResponse,
) -> Result<HashMap<String, SelectionResult>, CollaboratorError> {
    let mut answers = HashMap::new();
    for result in response.results {
        let Some(offered) = request
            .per_gallery_candidates
            .iter()
            .find(|c| c.entity_name == result.name)
        else {
            warn!(name = %result.name, "stage D: ignoring result for an entity that was not offered");
            continue;
        };
        if result.is_matched() {
            let gallery_id = result.gallery_id.as_deref().ok_or_else(|| {
                CollaboratorError::Malformed(format!("{}: matched without galleryId", result.name))
            })?;
            if gallery_id != offered.gallery_id {
                return Err(CollaboratorError::Malformed(format!(
                    "{}: selected gallery {gallery_id}, offered {}",
                    result.name, offered.gallery_id
                )));
            }
            let image_id = result.selected_image_id.as_deref().ok_or_else(|| {
                CollaboratorError::Malformed(format!(
                    "{}: matched without selectedImageId",
                    result.name
                ))
            })?;
            if !offered.images.iter().any(|img| img.id == image_id) {
                return Err(CollaboratorError::Malformed(format!(
                    "{}: image {image_id} was not among the candidates",
                    result.name
                )));
            }
        }
        answers.entry(result.name.clone()).or_insert(result);
    }
    Ok(answers)
}

async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, CollaboratorError>>,
) -> Result<T, CollaboratorError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| CollaboratorError::Timeout(limit))?
}
