//! Human-readable rendering of selection reports, matches, and embeddings.
//!
//! Output is a vertical card per section with left-aligned labels.

use chrono::{DateTime, Utc};
use galleria_ai::{EmbeddingKind, GalleryMatch, HealthStatus, magnitude};
use galleria_select::{NarrowingOutcome, SelectionReport, SkipReason};

const MAX_LIST_ITEMS: usize = 10;
const PREVIEW_DIMS: usize = 6;

// ── Public API ──

/// Print a selection report grouped into scene, results, and diagnostics.
pub fn print_report(report: &SelectionReport, started: DateTime<Utc>) {
    let elapsed = Utc::now().signed_duration_since(started);
    println!(
        "=== Selection: {}/{} entities matched ===",
        report.matched_count(),
        report.results.len()
    );
    println!(
        "{} ({} ms)",
        started.format("%Y-%m-%d %H:%M:%S UTC"),
        elapsed.num_milliseconds()
    );
    println!();

    println!("Scene");
    field("sensitivity", report.scene.sensitivity_level);
    if !report.scene.scene_summary.is_empty() {
        field("summary", &report.scene.scene_summary);
    }
    if !report.scene.clip_query.is_empty() {
        field("clip query", &report.scene.clip_query);
    }
    field("entities", report.scene.entities.join(", "));
    println!();

    println!("Results");
    for result in &report.results {
        if result.is_matched() {
            let image = result.selected_image_id.as_deref().unwrap_or("?");
            let gallery = result.gallery_id.as_deref().unwrap_or("?");
            let score = result
                .score
                .map(|s| format!(" score {s:.2}"))
                .unwrap_or_default();
            field(&result.name, format!("{image} (gallery {gallery}){score}"));
        } else {
            field(&result.name, "unmatched");
        }
        if let Some(reason) = &result.reason {
            println!("  {:<26}   {reason}", "");
        }
    }
    println!();

    if !report.narrowing.is_empty() {
        println!("Narrowing");
        for n in &report.narrowing {
            field(&n.gallery_id, describe_outcome(&n.outcome));
        }
        println!();
    }

    if !report.skipped.is_empty() {
        println!("Skipped images ({})", report.skipped.len());
        for s in report.skipped.iter().take(MAX_LIST_ITEMS) {
            field(
                &format!("{}/{}", s.gallery_id, s.image_id),
                describe_skip(&s.reason),
            );
        }
        if report.skipped.len() > MAX_LIST_ITEMS {
            println!("  ... and {} more", report.skipped.len() - MAX_LIST_ITEMS);
        }
        println!();
    }
}

pub fn print_match(name: &str, found: Option<&GalleryMatch<'_>>) {
    println!("=== Match: {name} ===");
    match found {
        Some(m) => {
            field("gallery", format!("{} ({})", m.gallery.name, m.gallery.id));
            field("strategy", format!("{:?}", m.strategy).to_lowercase());
            field("score", m.score);
            field("images", m.gallery.images.len());
        }
        None => println!("  no gallery matches"),
    }
}

pub fn print_embedding(kind: EmbeddingKind, content: &str, vector: &[f32], provider: &str) {
    println!("=== Embedding ({kind}) ===");
    field("input", content);
    field("provider", provider);
    field("dimension", vector.len());
    field("magnitude", format!("{:.4}", magnitude(vector)));
    let preview: Vec<String> = vector
        .iter()
        .take(PREVIEW_DIMS)
        .map(|v| format!("{v:.4}"))
        .collect();
    let more = if vector.len() > PREVIEW_DIMS { ", ..." } else { "" };
    field("values", format!("[{}{more}]", preview.join(", ")));
}

pub fn print_health(endpoint: &str, health: &HealthStatus) {
    println!("=== Embedding server ===");
    field("endpoint", endpoint);
    field("status", &health.status);
    if !health.device.is_empty() {
        field("device", &health.device);
    }
    if !health.model.is_empty() {
        field("model", &health.model);
    }
    if let Some(v) = &health.torch_version {
        field("torch", v);
    }
}

// ── Helpers ──

fn field(label: &str, value: impl std::fmt::Display) {
    println!("  {:<26} {}", label, value);
}

fn describe_outcome(outcome: &NarrowingOutcome) -> String {
    match outcome {
        NarrowingOutcome::Unchanged => "unchanged".to_string(),
        NarrowingOutcome::Narrowed { from, to } => format!("{from} -> {to} images"),
        NarrowingOutcome::Degraded { reason } => format!("not narrowed: {reason}"),
    }
}

fn describe_skip(reason: &SkipReason) -> String {
    match reason {
        SkipReason::EmbeddingUnavailable { cause, timeout } => {
            if *timeout {
                format!("timed out: {cause}")
            } else {
                cause.clone()
            }
        }
        SkipReason::DimensionMismatch { expected, actual } => {
            format!("embedding has {actual} dims, scene has {expected}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_read_naturally() {
        assert_eq!(
            describe_outcome(&NarrowingOutcome::Narrowed { from: 15, to: 10 }),
            "15 -> 10 images"
        );
        assert_eq!(describe_outcome(&NarrowingOutcome::Unchanged), "unchanged");
        assert_eq!(
            describe_outcome(&NarrowingOutcome::Degraded {
                reason: "embedding server down".into()
            }),
            "not narrowed: embedding server down"
        );
    }

    #[test]
    fn skip_reasons_mention_timeouts() {
        let timed_out = SkipReason::EmbeddingUnavailable {
            cause: "after 30s".into(),
            timeout: true,
        };
        assert_eq!(describe_skip(&timed_out), "timed out: after 30s");
        let wide = SkipReason::DimensionMismatch {
            expected: 512,
            actual: 768,
        };
        assert_eq!(describe_skip(&wide), "embedding has 768 dims, scene has 512");
    }
}
