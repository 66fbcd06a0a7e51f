pub mod config;
pub mod gallery;
pub mod selection;

pub use config::{
    CacheConfig, CollaboratorConfig, ConfigError, EmbeddingConfig, ProviderKind, SelectionConfig,
    SelectorConfig,
};
pub use gallery::{AliasTable, Gallery, Image, SensitivityLevel};
pub use selection::{
    CandidateImage, FinalSelectionRequest, FinalSelectionResponse, GalleryCandidates, MatchStatus,
    SceneBrief, SceneContext, Scored, SelectionResult,
};
