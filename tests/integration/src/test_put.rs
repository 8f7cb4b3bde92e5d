//! PUT (multipart upload) integration tests.

#[cfg(test)]
mod tests {
    use reqwest::multipart::{Form, Part};

    use crate::{cleanup_prefix, gateway_url, http_client, s3_client, test_bucket, test_prefix};

    fn upload_form(filename: &str, body: &'static [u8]) -> Form {
        let part = Part::bytes(body)
            .file_name(filename.to_owned())
            .mime_str("text/plain")
            .expect("mime");
        Form::new().part("file", part)
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_upload_file_with_metadata() {
        let s3 = s3_client();
        let prefix = test_prefix("put");

        let resp = http_client()
            .put(format!("{}/{prefix}/docs/", gateway_url()))
            .multipart(upload_form("note.txt", b"uploaded"))
            .send()
            .await
            .expect("put");

        assert_eq!(resp.status(), 200);
        let echo: serde_json::Value = resp.json().await.expect("json");
        assert_eq!(echo["key"], format!("{prefix}/docs/note.txt"));
        assert_eq!(echo["filename"], "note.txt");
        assert_eq!(echo["contentSize"], 8);
        assert_eq!(echo["metadata"]["source"], "s3gate");

        let object = s3
            .get_object()
            .bucket(test_bucket())
            .key(format!("{prefix}/docs/note.txt"))
            .send()
            .await
            .expect("get_object");
        assert_eq!(object.content_type(), Some("text/plain"));
        assert_eq!(
            object.metadata().and_then(|m| m.get("source")).map(String::as_str),
            Some("s3gate")
        );
        let data = object.body.collect().await.expect("collect").into_bytes();
        assert_eq!(data.as_ref(), b"uploaded");

        cleanup_prefix(&s3, &prefix).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_refuse_to_override_existing_file() {
        let s3 = s3_client();
        let prefix = test_prefix("override");
        let url = format!("{}/{prefix}/", gateway_url());
        let client = http_client();

        let first = client
            .put(&url)
            .multipart(upload_form("a.txt", b"first"))
            .send()
            .await
            .expect("first put");
        assert_eq!(first.status(), 200);

        let second = client
            .put(&url)
            .multipart(upload_form("a.txt", b"second"))
            .send()
            .await
            .expect("second put");
        assert_eq!(second.status(), 403);

        cleanup_prefix(&s3, &prefix).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_fail_upload_without_file_part() {
        let prefix = test_prefix("nofile");

        let resp = http_client()
            .put(format!("{}/{prefix}/", gateway_url()))
            .multipart(Form::new().text("other", "value"))
            .send()
            .await
            .expect("put");

        assert_eq!(resp.status(), 500);
    }
}
