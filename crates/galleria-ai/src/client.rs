//! Cache-aside embedding lookups with in-flight request coalescing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OnceCell;
use tracing::debug;

use crate::cache::{CacheKey, EmbeddingCache, EmbeddingKind};
use crate::error::EmbeddingError;
use crate::provider::EmbeddingProvider;

type InFlight = Arc<OnceCell<Vec<f32>>>;

/// Fetches embeddings through a shared [`EmbeddingCache`].
///
/// Concurrent requests for the same uncached key share a single provider
/// call: the first caller fetches, later callers wait for its result. A
/// failed fetch is not shared; a waiting caller then makes its own attempt.
pub struct EmbeddingClient {
    cache: Arc<EmbeddingCache>,
    provider: Arc<dyn EmbeddingProvider>,
    in_flight: Mutex<HashMap<CacheKey, InFlight>>,
}

impl EmbeddingClient {
    pub fn new(cache: Arc<EmbeddingCache>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            cache,
            provider,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Embedding of `content`, from cache when possible.
    pub async fn get_embedding(
        &self,
        kind: EmbeddingKind,
        content: &str,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let key = CacheKey::new(kind, content);
        if let Some(v) = self.cache.get(&key) {
            debug!(%kind, "embedding cache hit");
            return Ok(v);
        }

        let slot = self.join(&key);
        slot.cell.get_or_try_init(|| self.fetch(&key)).await.cloned()
    }

    /// Embeddings for several inputs of one kind, in input order.
    ///
    /// Cache hits are served locally; all misses go to the provider in one
    /// batch and are cached on success.
    pub async fn get_embeddings(
        &self,
        kind: EmbeddingKind,
        contents: &[&str],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut found: Vec<Option<Vec<f32>>> = contents
            .iter()
            .map(|c| self.cache.get(&CacheKey::new(kind, *c)))
            .collect();
        let misses: Vec<usize> = found
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_none())
            .map(|(i, _)| i)
            .collect();

        debug!(%kind, total = contents.len(), misses = misses.len(), "batch embedding lookup");
        if !misses.is_empty() {
            let pending: Vec<&str> = misses.iter().map(|&i| contents[i]).collect();
            let vectors = self.provider.embed_batch(kind, &pending).await?;
            if vectors.len() != pending.len() {
                return Err(EmbeddingError::Malformed(format!(
                    "provider returned {} embeddings for {} inputs",
                    vectors.len(),
                    pending.len()
                )));
            }
            for (&i, v) in misses.iter().zip(vectors) {
                self.cache.set(CacheKey::new(kind, contents[i]), v.clone());
                found[i] = Some(v);
            }
        }

        Ok(found.into_iter().flatten().collect())
    }

    async fn fetch(&self, key: &CacheKey) -> Result<Vec<f32>, EmbeddingError> {
        // Another caller may have filled the cache between our miss and now.
        if let Some(v) = self.cache.get(key) {
            return Ok(v);
        }
        let v = self.provider.embed(key.kind, &key.content).await?;
        if v.is_empty() {
            return Err(EmbeddingError::Malformed("provider returned an empty vector".into()));
        }
        debug!(kind = %key.kind, dim = v.len(), provider = self.provider.name(), "fetched embedding");
        self.cache.set(key.clone(), v.clone());
        Ok(v)
    }

    fn join<'a>(&'a self, key: &'a CacheKey) -> InFlightSlot<'a> {
        let mut map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        InFlightSlot {
            client: self,
            key,
            cell: Arc::clone(map.entry(key.clone()).or_default()),
        }
    }

    fn leave(&self, key: &CacheKey, cell: &InFlight) {
        let mut map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if map.get(key).is_some_and(|c| Arc::ptr_eq(c, cell)) {
            map.remove(key);
        }
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Membership in the in-flight map; leaves on drop, so a cancelled
/// lookup does not strand its entry.
struct InFlightSlot<'a> {
    client: &'a EmbeddingClient,
    key: &'a CacheKey,
    cell: InFlight,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.client.leave(self.key, &self.cell);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Deterministic provider: vector derived from content length, with
    /// optional latency and a set of contents that always fail.
    #[derive(Default)]
    struct FakeProvider {
        calls: AtomicUsize,
        batch_calls: AtomicUsize,
        delay: Duration,
        failing: HashSet<String>,
    }

    #[async_trait]
    impl EmbeddingProvider for FakeProvider {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn embed(
            &self,
            _kind: EmbeddingKind,
            content: &str,
        ) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.failing.contains(content) {
                return Err(EmbeddingError::Provider(format!("cannot embed {content}")));
            }
            Ok(vec![content.len() as f32, 1.0])
        }

        async fn embed_batch(
            &self,
            kind: EmbeddingKind,
            contents: &[&str],
        ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            let mut out = Vec::new();
            for c in contents {
                out.push(self.embed(kind, c).await?);
            }
            Ok(out)
        }
    }

    fn client_with(provider: FakeProvider) -> (EmbeddingClient, Arc<FakeProvider>) {
        let provider = Arc::new(provider);
        let client = EmbeddingClient::new(
            Arc::new(EmbeddingCache::default()),
            Arc::clone(&provider) as Arc<dyn EmbeddingProvider>,
        );
        (client, provider)
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let (client, provider) = client_with(FakeProvider::default());
        let a = client.get_embedding(EmbeddingKind::Text, "hello").await.unwrap();
        let b = client.get_embedding(EmbeddingKind::Text, "hello").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.cache().size(), 1);
        assert_eq!(client.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let (client, provider) = client_with(FakeProvider {
            failing: HashSet::from(["broken".to_string()]),
            ..Default::default()
        });
        for _ in 0..2 {
            let err = client
                .get_embedding(EmbeddingKind::Image, "broken")
                .await
                .unwrap_err();
            assert!(matches!(err, EmbeddingError::Provider(_)));
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert!(client.cache().is_empty());
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_fetch() {
        let (client, provider) = client_with(FakeProvider {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let (a, b, c) = tokio::join!(
            client.get_embedding(EmbeddingKind::Text, "scene"),
            client.get_embedding(EmbeddingKind::Text, "scene"),
            client.get_embedding(EmbeddingKind::Text, "scene"),
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert!(c.is_ok());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn cancelled_lookups_leave_no_in_flight_entries() {
        let (client, _provider) = client_with(FakeProvider {
            delay: Duration::from_secs(5),
            ..Default::default()
        });
        for i in 0..50 {
            let content = format!("img-{i}");
            let lookup = client.get_embedding(EmbeddingKind::Image, &content);
            let timed_out = tokio::time::timeout(Duration::from_millis(5), lookup).await;
            assert!(timed_out.is_err());
        }

        // Several waiters on one key, all abandoned together.
        let waiter = || {
            tokio::time::timeout(
                Duration::from_millis(5),
                client.get_embedding(EmbeddingKind::Text, "shared"),
            )
        };
        let (a, b, c) = tokio::join!(waiter(), waiter(), waiter());
        assert!(a.is_err() && b.is_err() && c.is_err());

        assert_eq!(client.in_flight_len(), 0);
        assert!(client.cache().is_empty());
    }

    #[tokio::test]
    async fn different_kinds_are_fetched_separately() {
        let (client, provider) = client_with(FakeProvider::default());
        client.get_embedding(EmbeddingKind::Text, "x").await.unwrap();
        client.get_embedding(EmbeddingKind::Image, "x").await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn batch_only_sends_misses() {
        let (client, provider) = client_with(FakeProvider::default());
        client.get_embedding(EmbeddingKind::Image, "b").await.unwrap();
        provider.calls.store(0, Ordering::SeqCst);

        let vectors = client
            .get_embeddings(EmbeddingKind::Image, &["aaa", "b", "cc"])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![3.0, 1.0], vec![1.0, 1.0], vec![2.0, 1.0]]);
        assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.cache().size(), 3);
    }

    #[tokio::test]
    async fn fully_cached_batch_skips_provider() {
        let (client, provider) = client_with(FakeProvider::default());
        client.get_embeddings(EmbeddingKind::Text, &["a", "b"]).await.unwrap();
        client.get_embeddings(EmbeddingKind::Text, &["b", "a"]).await.unwrap();
        assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 1);
    }
}
