//! In-memory fetcher for unit tests

use crate::error::FetchError;
use crate::http::{ChunkStream, Fetcher};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

enum Reply {
    Body(Result<Bytes, FetchError>),
    Stream {
        total: Option<u64>,
        chunks: Vec<Result<Bytes, FetchError>>,
        // never ends after the last chunk
        stall: bool,
    },
}

/// Fetcher that answers from a script and records every URL it was asked for
#[derive(Default)]
pub struct ScriptedFetcher {
    replies: Mutex<HashMap<String, Reply>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn body(&self, url: &str, body: impl Into<Bytes>) {
        self.replies
            .lock()
            .unwrap()
            .insert(url.to_string(), Reply::Body(Ok(body.into())));
    }

    pub fn error(&self, url: &str, err: FetchError) {
        self.replies
            .lock()
            .unwrap()
            .insert(url.to_string(), Reply::Body(Err(err)));
    }

    pub fn stream(&self, url: &str, total: Option<u64>, chunks: Vec<Result<Bytes, FetchError>>) {
        self.script_stream(url, total, chunks, false);
    }

    /// Like `stream`, but the body goes silent after `chunks` instead of ending
    pub fn stalled_stream(
        &self,
        url: &str,
        total: Option<u64>,
        chunks: Vec<Result<Bytes, FetchError>>,
    ) {
        self.script_stream(url, total, chunks, true);
    }

    fn script_stream(
        &self,
        url: &str,
        total: Option<u64>,
        chunks: Vec<Result<Bytes, FetchError>>,
        stall: bool,
    ) {
        self.replies.lock().unwrap().insert(
            url.to_string(),
            Reply::Stream {
                total,
                chunks,
                stall,
            },
        );
    }

    /// Holds requests for `url` until the returned notify fires
    pub fn gate(&self, url: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(url.to_string(), Arc::clone(&notify));
        notify
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn wait_gate(&self, url: &str) {
        self.calls.lock().unwrap().push(url.to_string());
        let gate = self.gates.lock().unwrap().get(url).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str, query: &[(&str, &str)]) -> Result<Bytes, FetchError> {
        let key = request_key(url, query);
        self.wait_gate(&key).await;
        match self.replies.lock().unwrap().get(&key) {
            Some(Reply::Body(result)) => result.clone(),
            _ => Err(FetchError::Status(404)),
        }
    }

    async fn fetch_stream(&self, url: &str) -> Result<ChunkStream, FetchError> {
        self.wait_gate(url).await;
        match self.replies.lock().unwrap().get(url) {
            Some(Reply::Stream {
                total,
                chunks,
                stall,
            }) => {
                let body = stream::iter(chunks.clone());
                let chunks = if *stall {
                    body.chain(stream::pending()).boxed()
                } else {
                    body.boxed()
                };
                Ok(ChunkStream {
                    total: *total,
                    chunks,
                })
            }
            Some(Reply::Body(Err(err))) => Err(err.clone()),
            _ => Err(FetchError::Status(404)),
        }
    }
}

/// Key a scripted reply is stored under: the URL plus `k=v` pairs in request order
pub fn request_key(url: &str, query: &[(&str, &str)]) -> String {
    if query.is_empty() {
        return url.to_string();
    }
    let pairs: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{url}?{}", pairs.join("&"))
}

/// A tiny valid PNG
pub fn png_bytes() -> Bytes {
    let img = image::RgbImage::from_pixel(4, 3, image::Rgb([10, 120, 200]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    Bytes::from(buf)
}
