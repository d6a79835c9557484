use std::cell::RefCell;
use std::collections::HashMap;

use async_trait::async_trait;
use url::Url;

use super::source::{fetch_data_url, with_detected_media_type, AcquireError, ByteSource, Fetched};
use crate::jobs::ProgressSink;
use crate::utils::url::normalize_url;

#[derive(Clone, Debug)]
enum Entry {
    Content {
        data: Vec<u8>,
        media_type: String,
        charset: Option<String>,
        /// Event-loop turns to wait before answering.
        delay: usize,
    },
    Redirect(Url),
    Failure(u16),
}

/// In-memory acquisition capability, for tests and embedding.
#[derive(Default)]
pub struct MemorySource {
    entries: HashMap<String, Entry>,
    requests: RefCell<Vec<String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, media_type: &str, data: impl Into<Vec<u8>>) -> Self {
        self.insert(url, media_type, data, 0);
        self
    }

    /// Like [`MemorySource::with`], but the answer arrives after `delay`
    /// yields to the event loop.
    pub fn with_delayed(mut self, url: &str, media_type: &str, data: impl Into<Vec<u8>>, delay: usize) -> Self {
        self.insert(url, media_type, data, delay);
        self
    }

    pub fn with_redirect(mut self, from: &str, to: &str) -> Self {
        if let (Ok(from), Ok(to)) = (Url::parse(from), Url::parse(to)) {
            self.entries.insert(normalize_url(&from), Entry::Redirect(to));
        }
        self
    }

    pub fn with_failure(mut self, url: &str, status: u16) -> Self {
        if let Ok(url) = Url::parse(url) {
            self.entries.insert(normalize_url(&url), Entry::Failure(status));
        }
        self
    }

    fn insert(&mut self, url: &str, media_type: &str, data: impl Into<Vec<u8>>, delay: usize) {
        let Ok(url) = Url::parse(url) else {
            return;
        };
        let (media_type, charset) = super::source::split_content_type(media_type);
        self.entries.insert(
            normalize_url(&url),
            Entry::Content {
                data: data.into(),
                media_type,
                charset,
                delay,
            },
        );
    }

    /// URLs requested so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}

/// Redirect chains longer than this fail.
const MAX_REDIRECTS: usize = 10;

#[async_trait(?Send)]
impl ByteSource for MemorySource {
    async fn fetch(&self, url: &Url, progress: ProgressSink) -> Result<Fetched, AcquireError> {
        self.requests.borrow_mut().push(url.to_string());
        if url.scheme() == "data" {
            return Ok(with_detected_media_type(fetch_data_url(url)));
        }

        let mut current = url.clone();
        for _ in 0..=MAX_REDIRECTS {
            match self.entries.get(&normalize_url(&current)).cloned() {
                Some(Entry::Redirect(target)) => current = target,
                Some(Entry::Failure(status)) => {
                    return Err(AcquireError {
                        status: Some(status),
                        reason: format!("HTTP {}", status),
                    })
                }
                Some(Entry::Content {
                    data,
                    media_type,
                    charset,
                    delay,
                }) => {
                    let total = data.len() as u64;
                    for step in 0..delay {
                        progress.report(total * step as u64 / delay as u64, Some(total));
                        tokio::task::yield_now().await;
                    }
                    progress.report(total, Some(total));

                    current.set_fragment(None);
                    return Ok(with_detected_media_type(Fetched {
                        data,
                        final_url: current,
                        media_type,
                        charset,
                        status: 200,
                    }));
                }
                None => {
                    return Err(AcquireError {
                        status: Some(404),
                        reason: "HTTP 404 Not Found".to_string(),
                    })
                }
            }
        }

        Err(AcquireError::new("too many redirects"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn follows_redirects_and_reports_failures() {
        let source = MemorySource::new()
            .with("https://a.example/new", "text/html; charset=utf-8", "<p>")
            .with_redirect("http://a.example/old", "https://a.example/new")
            .with_failure("https://a.example/gone", 410);

        let fetched = source
            .fetch(&Url::parse("http://a.example/old#x").unwrap(), ProgressSink::new())
            .await
            .unwrap();
        assert_eq!(fetched.final_url.as_str(), "https://a.example/new");
        assert_eq!(fetched.charset.as_deref(), Some("utf-8"));

        let gone = source
            .fetch(&Url::parse("https://a.example/gone").unwrap(), ProgressSink::new())
            .await
            .unwrap_err();
        assert_eq!(gone.status, Some(410));
        assert_eq!(source.requests().len(), 2);
    }
}
