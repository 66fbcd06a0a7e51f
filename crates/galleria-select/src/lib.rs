//! Image selection pipeline and the collaborators it delegates to.

pub mod collaborator;
mod error;
pub mod orchestrator;

pub use collaborator::{
    CollaboratorError, ContextExtractor, FinalSelector, GalleryProvider, HttpContextExtractor,
    HttpFinalSelector, HttpGalleryProvider, fetch_galleries, parse_json_reply,
};
pub use error::SelectError;
pub use orchestrator::{
    GalleryNarrowing, NarrowingOutcome, Orchestrator, SelectionReport, SkipReason, SkippedImage,
};
