//! Keyword search against the photo provider
//!
//! One search issues a single provider request, deduplicates the returned
//! photos by their full-resolution URL and then streams a validated thumbnail
//! for each one. Anything that goes wrong degrades the result instead of
//! failing the task: a broken search yields zero thumbnails, a broken
//! thumbnail is skipped.

use crate::config::EngineConfig;
use crate::error::TaskError;
use crate::event::TaskEvent;
use crate::http::Fetcher;
use crate::scheduler::Emitter;
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What to search for and how many photos to ask for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub term: String,
    pub desired_count: usize,
}

impl SearchQuery {
    pub fn new(term: impl Into<String>, desired_count: usize) -> Self {
        Self {
            term: term.into(),
            desired_count,
        }
    }
}

/// One photo returned by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoCandidate {
    pub thumbnail_url: String,
    /// Full-resolution URL; also the deduplication key
    pub full_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProviderResponse {
    Many(Vec<ProviderPhoto>),
    // the provider answers with a bare object when count is 1
    One(ProviderPhoto),
}

#[derive(Debug, Deserialize)]
struct ProviderPhoto {
    #[serde(default)]
    urls: PhotoUrls,
}

#[derive(Debug, Default, Deserialize)]
struct PhotoUrls {
    raw: Option<String>,
    full: Option<String>,
    small: Option<String>,
    thumb: Option<String>,
}

impl ProviderPhoto {
    fn into_candidate(self) -> Option<PhotoCandidate> {
        let PhotoUrls {
            raw,
            full,
            small,
            thumb,
        } = self.urls;

        Some(PhotoCandidate {
            thumbnail_url: thumb.or(small)?,
            full_url: full.or(raw)?,
        })
    }
}

/// Parses a provider response into candidates, skipping entries without usable URLs
pub fn parse_candidates(body: &[u8]) -> Result<Vec<PhotoCandidate>, TaskError> {
    let response: ProviderResponse =
        serde_json::from_slice(body).map_err(|e| TaskError::Decode(e.to_string()))?;

    let photos = match response {
        ProviderResponse::Many(photos) => photos,
        ProviderResponse::One(photo) => vec![photo],
    };

    Ok(photos
        .into_iter()
        .filter_map(ProviderPhoto::into_candidate)
        .collect())
}

/// Drops candidates whose full URL was already seen; first occurrence wins
pub fn dedup_candidates(candidates: Vec<PhotoCandidate>) -> Vec<PhotoCandidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.full_url.clone()))
        .collect()
}

/// Checks that `bytes` decode as an image
pub fn validate_image(bytes: &[u8]) -> Result<(), TaskError> {
    image::load_from_memory(bytes)
        .map(|_| ())
        .map_err(|e| TaskError::Decode(e.to_string()))
}

pub(crate) struct SearchTask {
    query: SearchQuery,
    fetcher: Arc<dyn Fetcher>,
    config: Arc<EngineConfig>,
}

impl SearchTask {
    pub(crate) fn new(
        query: SearchQuery,
        fetcher: Arc<dyn Fetcher>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            query,
            fetcher,
            config,
        }
    }

    /// Runs the search to its single terminal event and returns the loaded count
    pub(crate) async fn run(self, emitter: Emitter) -> usize {
        let handle = emitter.handle();
        let count = self.query.desired_count.min(self.config.max_search_count);

        if self.query.term.trim().is_empty() || count == 0 {
            debug!(task = %handle, "nothing to search for");
            emitter.emit(TaskEvent::SearchCompleted { handle, loaded: 0 });
            return 0;
        }

        let candidates = match self.find_candidates(count).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(task = %handle, term = %self.query.term, error = %e, "search failed");
                emitter.emit(TaskEvent::SearchCompleted { handle, loaded: 0 });
                return 0;
            }
        };

        debug!(task = %handle, candidates = candidates.len(), "fetching thumbnails");
        let loaded = self.load_thumbnails(candidates, &emitter).await;

        info!(task = %handle, loaded, "search finished");
        emitter.emit(TaskEvent::SearchCompleted { handle, loaded });
        loaded
    }

    async fn find_candidates(&self, count: usize) -> Result<Vec<PhotoCandidate>, TaskError> {
        let count_param = count.to_string();
        let query = [
            ("client_id", self.config.client_id.as_str()),
            ("query", self.query.term.as_str()),
            ("count", count_param.as_str()),
            ("orientation", self.config.orientation.as_str()),
        ];

        let body = self.fetcher.fetch(&self.config.search_endpoint, &query).await?;

        let mut candidates = dedup_candidates(parse_candidates(&body)?);
        candidates.truncate(count);
        Ok(candidates)
    }

    async fn load_thumbnails(&self, candidates: Vec<PhotoCandidate>, emitter: &Emitter) -> usize {
        let handle = emitter.handle();
        let fetcher = self.fetcher.as_ref();

        // buffered keeps results in candidate order
        let mut thumbnails = futures_util::stream::iter(candidates)
            .map(move |candidate| async move {
                let result = fetch_thumbnail(fetcher, &candidate.thumbnail_url).await;
                (candidate, result)
            })
            .buffered(self.config.thumbnail_concurrency);

        let mut loaded = 0;
        while let Some((candidate, result)) = thumbnails.next().await {
            if !emitter.is_current() {
                debug!(task = %handle, "superseded, dropping remaining thumbnails");
                break;
            }

            match result {
                Ok(image) => {
                    let event = TaskEvent::ThumbnailReady {
                        handle,
                        image,
                        full_url: candidate.full_url,
                    };
                    if emitter.emit(event) {
                        loaded += 1;
                    }
                }
                Err(e) => {
                    debug!(task = %handle, url = %candidate.thumbnail_url, error = %e, "skipping thumbnail");
                }
            }
        }

        loaded
    }
}

async fn fetch_thumbnail(fetcher: &dyn Fetcher, url: &str) -> Result<Bytes, TaskError> {
    let bytes = fetcher.fetch(url, &[]).await?;

    let payload = bytes.clone();
    tokio::task::spawn_blocking(move || validate_image(&payload))
        .await
        .map_err(|e| TaskError::Decode(e.to_string()))??;

    Ok(bytes)
}
