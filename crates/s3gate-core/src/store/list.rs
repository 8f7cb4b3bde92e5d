//! Listing pagination.
//!
//! A listing walks continuation tokens until the provider stops returning one
//! or the target's entry budget is spent. Pages that make no progress while
//! still carrying a token end the walk.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{LIST_OBJECTS_OPERATION, ObjectDescriptor, ObjectKind, S3_MAX_KEYS};
use crate::error::GatewayResult;
use crate::metrics::Metrics;

/// One object as reported in a list page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListedObject {
    /// Full key.
    pub key: String,
    /// Entity tag.
    pub etag: String,
    /// Size in bytes.
    pub size: i64,
    /// Last modification time.
    pub last_modified: Option<DateTime<Utc>>,
}

/// One page of a delimited listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Common prefixes under the `/` delimiter.
    pub common_prefixes: Vec<String>,
    /// Objects directly under the prefix.
    pub objects: Vec<ListedObject>,
    /// Number of keys the provider counted for this page.
    pub key_count: i32,
    /// Continuation token for the next page.
    pub next_token: Option<String>,
}

/// Fetches single list pages.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch one page of `prefix` starting at `token`.
    async fn fetch_page(
        &self,
        prefix: &str,
        token: Option<String>,
        max_keys: i32,
    ) -> GatewayResult<ListPage>;
}

/// Walk every page of `prefix`, up to `cap` entries, folders first.
pub async fn collect_listing(
    source: &dyn PageSource,
    prefix: &str,
    cap: i32,
) -> GatewayResult<Vec<ObjectDescriptor>> {
    let page_size = cap.clamp(1, S3_MAX_KEYS);
    let mut remaining = cap;
    let mut token = None;
    let mut folders = Vec::new();
    let mut files = Vec::new();

    loop {
        let page = source
            .fetch_page(prefix, token.take(), page_size.min(remaining))
            .await?;
        let entries = page.common_prefixes.len() + page.objects.len();

        for common_prefix in page.common_prefixes {
            let name = strip(&common_prefix, prefix);
            folders.push(ObjectDescriptor {
                kind: ObjectKind::Folder,
                name,
                key: common_prefix,
                etag: String::new(),
                size: 0,
                last_modified: None,
            });
        }
        for object in page.objects {
            let name = strip(&object.key, prefix);
            // The prefix's own directory marker.
            if name.is_empty() {
                continue;
            }
            files.push(ObjectDescriptor {
                kind: ObjectKind::File,
                name,
                key: object.key,
                etag: object.etag,
                size: object.size,
                last_modified: object.last_modified,
            });
        }

        remaining -= page.key_count;
        match page.next_token {
            Some(next) if remaining > 0 => {
                if page.key_count <= 0 && entries == 0 {
                    warn!(prefix, "list page made no progress, stopping pagination");
                    break;
                }
                token = Some(next);
            }
            _ => break,
        }
    }

    debug!(
        prefix,
        folders = folders.len(),
        files = files.len(),
        "listing collected"
    );
    folders.extend(files);
    Ok(folders)
}

/// [`collect_listing`] counted as one list operation, success or failure.
pub async fn counted_listing(
    source: &dyn PageSource,
    prefix: &str,
    cap: i32,
    metrics: &dyn Metrics,
    target_name: &str,
    bucket: &str,
) -> GatewayResult<Vec<ObjectDescriptor>> {
    let result = collect_listing(source, prefix, cap).await;
    metrics.inc_s3_operations(target_name, bucket, LIST_OBJECTS_OPERATION);
    result
}

fn strip(key: &str, prefix: &str) -> String {
    key.strip_prefix(prefix).unwrap_or(key).to_owned()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::error::GatewayError;
    use crate::testing::RecordingMetrics;

    /// Serves scripted pages and records requested page sizes.
    #[derive(Default)]
    struct ScriptedPages {
        pages: Mutex<Vec<ListPage>>,
        calls: AtomicUsize,
        requested: Mutex<Vec<(Option<String>, i32)>>,
        fail_on_call: Option<usize>,
    }

    impl ScriptedPages {
        fn new(pages: Vec<ListPage>) -> Self {
            Self {
                pages: Mutex::new(pages.into_iter().rev().collect()),
                ..Self::default()
            }
        }

        fn failing_on(mut self, call: usize) -> Self {
            self.fail_on_call = Some(call);
            self
        }
    }

    #[async_trait]
    impl PageSource for ScriptedPages {
        async fn fetch_page(
            &self,
            _prefix: &str,
            token: Option<String>,
            max_keys: i32,
        ) -> GatewayResult<ListPage> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.requested.lock().push((token, max_keys));
            if self.fail_on_call == Some(call) {
                return Err(GatewayError::Internal(anyhow::anyhow!("connection reset")));
            }
            Ok(self.pages.lock().pop().unwrap_or_default())
        }
    }

    fn object(key: &str) -> ListedObject {
        ListedObject {
            key: key.to_owned(),
            etag: "\"e\"".to_owned(),
            size: 3,
            last_modified: None,
        }
    }

    #[tokio::test]
    async fn test_should_put_folders_before_files_across_pages() {
        let source = ScriptedPages::new(vec![
            ListPage {
                common_prefixes: vec!["dir/a/".into()],
                objects: vec![object("dir/"), object("dir/z.txt")],
                key_count: 3,
                next_token: Some("t1".into()),
            },
            ListPage {
                common_prefixes: vec!["dir/b/".into()],
                objects: vec![object("dir/y.txt")],
                key_count: 2,
                next_token: None,
            },
        ]);

        let entries = collect_listing(&source, "dir/", 1000).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a/", "b/", "z.txt", "y.txt"]);
        assert_eq!(entries[0].kind, ObjectKind::Folder);
        assert_eq!(entries[2].kind, ObjectKind::File);
        assert_eq!(entries[2].key, "dir/z.txt");
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            source.requested.lock()[1],
            (Some("t1".to_owned()), 1000 - 3)
        );
    }

    #[tokio::test]
    async fn test_should_stop_when_cap_is_reached() {
        let source = ScriptedPages::new(vec![
            ListPage {
                objects: vec![object("a"), object("b")],
                key_count: 2,
                next_token: Some("t1".into()),
                ..ListPage::default()
            },
            ListPage {
                objects: vec![object("c"), object("d")],
                key_count: 2,
                next_token: Some("t2".into()),
                ..ListPage::default()
            },
            ListPage {
                objects: vec![object("e")],
                key_count: 1,
                next_token: None,
                ..ListPage::default()
            },
        ]);

        let entries = collect_listing(&source, "", 4).await.unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(source.requested.lock()[0], (None, 4));
    }

    #[tokio::test]
    async fn test_should_stop_when_no_token_is_returned() {
        let source = ScriptedPages::new(vec![ListPage {
            objects: vec![object("a")],
            key_count: 1,
            next_token: None,
            ..ListPage::default()
        }]);

        let entries = collect_listing(&source, "", 1000).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_should_treat_empty_page_with_token_as_terminal() {
        let source = ScriptedPages::new(vec![
            ListPage {
                objects: vec![object("a")],
                key_count: 1,
                next_token: Some("t1".into()),
                ..ListPage::default()
            },
            ListPage {
                next_token: Some("t1".into()),
                ..ListPage::default()
            },
            ListPage {
                objects: vec![object("never")],
                key_count: 1,
                next_token: None,
                ..ListPage::default()
            },
        ]);

        let entries = collect_listing(&source, "", 1000).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_should_cap_page_size_at_protocol_maximum() {
        let source = ScriptedPages::new(vec![ListPage::default()]);
        collect_listing(&source, "", 5000).await.unwrap();
        assert_eq!(source.requested.lock()[0], (None, S3_MAX_KEYS));
    }

    fn three_pages() -> Vec<ListPage> {
        (1..=3)
            .map(|n| ListPage {
                objects: vec![object(&format!("f{n}"))],
                key_count: 1,
                next_token: (n < 3).then(|| format!("t{n}")),
                ..ListPage::default()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_should_count_paginated_listing_once() {
        let source = ScriptedPages::new(three_pages());
        let metrics = RecordingMetrics::default();

        let entries = counted_listing(&source, "", 1000, &metrics, "t", "b")
            .await
            .unwrap();

        assert_eq!(entries.len(), 3);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            metrics.s3_operations(),
            [("t".to_owned(), "b".to_owned(), LIST_OBJECTS_OPERATION.to_owned())]
        );
    }

    #[tokio::test]
    async fn test_should_count_listing_failing_mid_walk_once() {
        let source = ScriptedPages::new(three_pages()).failing_on(2);
        let metrics = RecordingMetrics::default();

        let err = counted_listing(&source, "", 1000, &metrics, "t", "b")
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Internal(_)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.s3_operations().len(), 1);
    }
}
