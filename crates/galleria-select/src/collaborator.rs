//! External collaborators: scene extraction, final selection, gallery data.
//!
//! Each collaborator is a trait so the pipeline can run against HTTP
//! services in production and in-process fakes in tests.

use std::time::Duration;

use async_trait::async_trait;
use galleria_core::{FinalSelectionRequest, FinalSelectionResponse, Gallery, SceneContext};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed reply: {0}")]
    Malformed(String),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

/// Extracts entities, a scene summary, and a sensitivity level from text.
#[async_trait]
pub trait ContextExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<SceneContext, CollaboratorError>;
}

/// Picks one image per entity from the narrowed candidates.
#[async_trait]
pub trait FinalSelector: Send + Sync {
    async fn select(
        &self,
        request: &FinalSelectionRequest,
    ) -> Result<FinalSelectionResponse, CollaboratorError>;
}

/// Loads a gallery by container id.
#[async_trait]
pub trait GalleryProvider: Send + Sync {
    async fn gallery(&self, id: &str) -> Result<Gallery, CollaboratorError>;
}

/// Load several galleries concurrently, failing on the first error.
pub async fn fetch_galleries(
    provider: &dyn GalleryProvider,
    ids: &[String],
) -> Result<Vec<Gallery>, CollaboratorError> {
    let galleries =
        futures::future::try_join_all(ids.iter().map(|id| provider.gallery(id))).await?;
    info!(count = galleries.len(), "loaded galleries");
    Ok(galleries)
}

/// Decode a JSON reply that may be wrapped in a markdown code fence.
pub fn parse_json_reply<T: DeserializeOwned>(raw: &str) -> Result<T, CollaboratorError> {
    let trimmed = raw.trim();
    let body = match trimmed.strip_prefix("```") {
        Some(rest) => {
            // Drop the info string ("json") on the opening fence line.
            let rest = rest.split_once('\n').map(|(_, r)| r).unwrap_or("");
            rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
        }
        None => trimmed,
    };
    if body.is_empty() {
        return Err(CollaboratorError::Malformed("empty reply".into()));
    }
    Ok(serde_json::from_str(body)?)
}

// ── HTTP implementations ──

/// JSON-over-HTTP transport shared by the collaborator clients.
struct JsonService {
    client: reqwest::Client,
    url: String,
}

impl JsonService {
    fn new(url: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            url: url.trim_end_matches('/').to_string(),
        })
    }

    async fn read<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, CollaboratorError> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(CollaboratorError::Server {
                status: status.as_u16(),
                body,
            });
        }
        parse_json_reply(&body)
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        body: &B,
    ) -> Result<T, CollaboratorError> {
        let resp = self.client.post(&self.url).json(body).send().await?;
        Self::read(resp).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, CollaboratorError> {
        let url = format!("{}{path}", self.url);
        let resp = self.client.get(&url).send().await?;
        Self::read(resp).await
    }
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
    text: &'a str,
}

/// Text-understanding service reached with `POST {url}` and `{"text": ...}`.
pub struct HttpContextExtractor {
    service: JsonService,
}

impl HttpContextExtractor {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        Ok(Self {
            service: JsonService::new(url, timeout)?,
        })
    }
}

#[async_trait]
impl ContextExtractor for HttpContextExtractor {
    async fn extract(&self, text: &str) -> Result<SceneContext, CollaboratorError> {
        info!(url = %self.service.url, chars = text.chars().count(), "requesting scene extraction");
        self.service.post(&ExtractRequest { text }).await
    }
}

/// Final-selection service reached with `POST {url}`.
pub struct HttpFinalSelector {
    service: JsonService,
}

impl HttpFinalSelector {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        Ok(Self {
            service: JsonService::new(url, timeout)?,
        })
    }
}

#[async_trait]
impl FinalSelector for HttpFinalSelector {
    async fn select(
        &self,
        request: &FinalSelectionRequest,
    ) -> Result<FinalSelectionResponse, CollaboratorError> {
        info!(
            url = %self.service.url,
            galleries = request.per_gallery_candidates.len(),
            "requesting final selection"
        );
        self.service.post(request).await
    }
}

/// Gallery data provider reached with `GET {base_url}/galleries/{id}`.
pub struct HttpGalleryProvider {
    service: JsonService,
}

impl HttpGalleryProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        Ok(Self {
            service: JsonService::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl GalleryProvider for HttpGalleryProvider {
    async fn gallery(&self, id: &str) -> Result<Gallery, CollaboratorError> {
        self.service.get(&format!("/galleries/{id}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galleria_core::SensitivityLevel;
    use std::collections::HashMap;

    #[test]
    fn parses_bare_json() {
        let ctx: SceneContext = parse_json_reply(
            r#"{"entities": ["레이"], "sensitivityLevel": "sensitive", "clipQuery": "girl in rain"}"#,
        )
        .unwrap();
        assert_eq!(ctx.entities, vec!["레이"]);
        assert_eq!(ctx.sensitivity_level, SensitivityLevel::Sensitive);
        assert!(ctx.scene_summary.is_empty());
    }

    #[test]
    fn strips_markdown_fence() {
        let raw = "```json\n{\"results\": []}\n```\n";
        let resp: FinalSelectionResponse = parse_json_reply(raw).unwrap();
        assert!(resp.results.is_empty());

        let raw = "```\n{\"results\": []}\n```";
        let resp: FinalSelectionResponse = parse_json_reply(raw).unwrap();
        assert!(resp.results.is_empty());
    }

    #[test]
    fn empty_reply_is_malformed() {
        let err = parse_json_reply::<FinalSelectionResponse>("  ").unwrap_err();
        assert!(matches!(err, CollaboratorError::Malformed(_)));
        let err = parse_json_reply::<FinalSelectionResponse>("```json\n```").unwrap_err();
        assert!(matches!(err, CollaboratorError::Malformed(_)));
    }

    #[test]
    fn prose_reply_is_json_error() {
        let err =
            parse_json_reply::<FinalSelectionResponse>("I picked image 3 for 레이.").unwrap_err();
        assert!(matches!(err, CollaboratorError::Json(_)));
    }

    #[test]
    fn clients_trim_trailing_slash() {
        let extractor =
            HttpContextExtractor::new("http://llm:7000/extract/", Duration::from_secs(5)).unwrap();
        assert_eq!(extractor.service.url, "http://llm:7000/extract");
        let galleries =
            HttpGalleryProvider::new("http://data:4000/", Duration::from_secs(5)).unwrap();
        assert_eq!(galleries.service.url, "http://data:4000");
    }

    struct MapGalleries(HashMap<String, Gallery>);

    #[async_trait]
    impl GalleryProvider for MapGalleries {
        async fn gallery(&self, id: &str) -> Result<Gallery, CollaboratorError> {
            self.0.get(id).cloned().ok_or_else(|| CollaboratorError::Server {
                status: 404,
                body: format!("gallery {id} not found"),
            })
        }
    }

    fn gallery(id: &str) -> Gallery {
        Gallery {
            id: id.into(),
            name: format!("name-{id}"),
            images: vec![],
        }
    }

    #[tokio::test]
    async fn fetch_galleries_keeps_requested_order() {
        let provider = MapGalleries(HashMap::from([
            ("a".to_string(), gallery("a")),
            ("b".to_string(), gallery("b")),
        ]));
        let got = fetch_galleries(&provider, &["b".to_string(), "a".to_string()])
            .await
            .unwrap();
        let ids: Vec<&str> = got.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn fetch_galleries_fails_on_missing_gallery() {
        let provider = MapGalleries(HashMap::from([("a".to_string(), gallery("a"))]));
        let err = fetch_galleries(&provider, &["a".to_string(), "zzz".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Server { status: 404, .. }));
    }
}
