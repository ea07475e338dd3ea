//! Per-run memoization of fetch results by URL.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use porter_shared::Result;

use crate::page::{ContentFormat, FetchResult};

/// Insert-if-absent cache shared by all tasks of one run.
///
/// The first caller for a key performs the fetch; concurrent callers for the
/// same key wait for it and reuse its result. Failures are not stored, so a
/// later caller tries again.
#[derive(Default)]
pub struct FetchMemo {
    entries: DashMap<(String, ContentFormat), Arc<OnceCell<FetchResult>>>,
}

impl FetchMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_fetch<F, Fut>(
        &self,
        url: &str,
        format: ContentFormat,
        fetch: F,
    ) -> Result<FetchResult>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FetchResult>>,
    {
        let cell = Arc::clone(
            self.entries
                .entry((url.to_string(), format))
                .or_default()
                .value(),
        );
        cell.get_or_try_init(fetch).await.cloned()
    }

    /// Number of URLs fetched successfully so far.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::Utc;
    use porter_shared::PorterError;

    use crate::page::Provenance;

    fn result(url: &str, content: &str) -> FetchResult {
        FetchResult {
            url: url.into(),
            provenance: Provenance::Network,
            format: ContentFormat::Markdown,
            content: content.into(),
            title: None,
            status: Some(200),
            final_url: None,
            html: String::new(),
            content_hash: String::new(),
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_first_fetch() {
        let memo = Arc::new(FetchMemo::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..8 {
            let memo = Arc::clone(&memo);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                memo.get_or_fetch("https://a.test/", ContentFormat::Markdown, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(result("https://a.test/", &format!("writer {i}")))
                })
                .await
                .unwrap()
            }));
        }

        let mut contents = Vec::new();
        for handle in handles {
            contents.push(handle.await.unwrap().content);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(contents.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(memo.len(), 1);
    }

    #[tokio::test]
    async fn failures_are_not_memoized() {
        let memo = FetchMemo::new();
        let err = memo
            .get_or_fetch("https://b.test/", ContentFormat::PlainText, || async {
                Err(PorterError::resource_unavailable("https://b.test/", vec![]))
            })
            .await;
        assert!(err.is_err());
        assert!(memo.is_empty());

        let ok = memo
            .get_or_fetch("https://b.test/", ContentFormat::PlainText, || async {
                Ok(result("https://b.test/", "second try"))
            })
            .await
            .unwrap();
        assert_eq!(ok.content, "second try");
    }

    #[tokio::test]
    async fn formats_are_cached_separately() {
        let memo = FetchMemo::new();
        memo.get_or_fetch("https://c.test/", ContentFormat::Markdown, || async {
            Ok(result("https://c.test/", "# md"))
        })
        .await
        .unwrap();
        let text = memo
            .get_or_fetch("https://c.test/", ContentFormat::PlainText, || async {
                Ok(result("https://c.test/", "text"))
            })
            .await
            .unwrap();
        assert_eq!(text.content, "text");
        assert_eq!(memo.len(), 2);
    }
}
