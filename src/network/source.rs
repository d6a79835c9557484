use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::core::{detect_media_type, SnapshotError};
use crate::jobs::ProgressSink;
use crate::mime::parse_content_type_value;
use crate::utils::url::parse_data_url;

/// Bytes of one acquired resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fetched {
    pub data: Vec<u8>,
    /// Address the bytes came from, after redirects.
    pub final_url: Url,
    /// Declared media type, lowercase, without parameters. Empty when the
    /// source declared none.
    pub media_type: String,
    pub charset: Option<String>,
    pub status: u16,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct AcquireError {
    pub status: Option<u16>,
    pub reason: String,
}

impl AcquireError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            status: None,
            reason: reason.into(),
        }
    }

    pub fn into_snapshot_error(self, url: &Url) -> SnapshotError {
        SnapshotError::DownloadFailure {
            url: url.to_string(),
            status: self.status,
            reason: self.reason,
        }
    }
}

/// Acquisition capability: turns a URL into bytes plus declared metadata.
#[async_trait(?Send)]
pub trait ByteSource {
    async fn fetch(&self, url: &Url, progress: ProgressSink) -> Result<Fetched, AcquireError>;

    /// Resolves once the source has no pending external events. Callers
    /// bound the wait themselves.
    async fn settle(&self) {}
}

/// Splits a `Content-Type` header into media type and charset.
pub fn split_content_type(value: &str) -> (String, Option<String>) {
    match parse_content_type_value(value) {
        Ok(content_type) => {
            let charset = content_type.charset().map(str::to_string);
            (content_type.media_type, charset)
        }
        Err(_) => (String::new(), None),
    }
}

/// Fills in a missing media type by sniffing the payload.
pub fn with_detected_media_type(mut fetched: Fetched) -> Fetched {
    if fetched.media_type.is_empty() {
        fetched.media_type = detect_media_type(&fetched.data, &fetched.final_url);
    }
    fetched
}

/// Serves `http(s):` through reqwest, `file:` from disk and `data:` inline.
#[derive(Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    user_agent: Option<String>,
}

impl HttpSource {
    pub fn new(user_agent: Option<String>, timeout: Duration) -> Result<Self, SnapshotError> {
        let mut builder = reqwest::Client::builder();
        if !timeout.is_zero() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|error| SnapshotError::InvalidTarget(format!("cannot create HTTP client: {}", error)))?;

        Ok(Self { client, user_agent })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            user_agent: None,
        }
    }

    async fn fetch_http(&self, url: &Url, progress: &ProgressSink) -> Result<Fetched, AcquireError> {
        debug!(url = %url, "HTTP fetch starting");
        let mut request = self.client.get(url.as_str());
        if let Some(user_agent) = &self.user_agent {
            request = request.header(USER_AGENT, user_agent);
        }

        let mut response = request.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "HTTP request failed");
            AcquireError::new(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AcquireError {
                status: Some(status.as_u16()),
                reason: format!("HTTP {}", status),
            });
        }

        let final_url = response.url().clone();
        let (media_type, charset) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(split_content_type)
            .unwrap_or_default();
        let total = response.content_length();

        let mut data = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AcquireError::new(e.to_string()))?
        {
            data.extend_from_slice(&chunk);
            progress.report(data.len() as u64, total);
        }

        Ok(Fetched {
            data,
            final_url,
            media_type,
            charset,
            status: status.as_u16(),
        })
    }

    async fn fetch_file(&self, url: &Url, progress: &ProgressSink) -> Result<Fetched, AcquireError> {
        let path = url
            .to_file_path()
            .map_err(|_| AcquireError::new("not a local file path"))?;
        let data = tokio::fs::read(&path).await.map_err(|e| AcquireError {
            status: Some(404),
            reason: e.to_string(),
        })?;
        progress.report(data.len() as u64, Some(data.len() as u64));

        Ok(Fetched {
            data,
            final_url: url.clone(),
            media_type: String::new(),
            charset: None,
            status: 200,
        })
    }
}

/// Decodes a `data:` URL the way every source does.
pub fn fetch_data_url(url: &Url) -> Fetched {
    let (media_type, charset, data) = parse_data_url(url);
    Fetched {
        data,
        final_url: url.clone(),
        media_type,
        charset: Some(charset).filter(|c| !c.is_empty()),
        status: 200,
    }
}

#[async_trait(?Send)]
impl ByteSource for HttpSource {
    async fn fetch(&self, url: &Url, progress: ProgressSink) -> Result<Fetched, AcquireError> {
        let fetched = match url.scheme() {
            "http" | "https" => self.fetch_http(url, &progress).await?,
            "file" => self.fetch_file(url, &progress).await?,
            "data" => fetch_data_url(url),
            scheme => return Err(AcquireError::new(format!("unsupported scheme {}", scheme))),
        };

        Ok(with_detected_media_type(fetched))
    }
}
