//! GET and HEAD integration tests.

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use sha2::{Digest, Sha256};

    use crate::{cleanup_prefix, gateway_url, http_client, s3_client, seed_object, test_prefix};

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_stream_object_with_metadata() {
        let s3 = s3_client();
        let prefix = test_prefix("get");
        let body = b"hello, s3gate!";
        seed_object(&s3, &format!("{prefix}/greeting.txt"), body).await;

        let resp = http_client()
            .get(format!("{}/{prefix}/greeting.txt", gateway_url()))
            .send()
            .await
            .expect("get");

        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["content-type"], "text/plain");
        assert_eq!(resp.headers()["content-length"], "14");
        assert!(resp.headers().contains_key("etag"));
        assert!(resp.headers().contains_key("last-modified"));
        assert!(resp.headers().contains_key("x-request-id"));

        let expected = format!("sha-256=:{}:", BASE64.encode(Sha256::digest(body)));
        assert_eq!(resp.headers()["content-digest"], expected.as_str());
        assert_eq!(resp.bytes().await.expect("body").as_ref(), body);

        cleanup_prefix(&s3, &prefix).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_answer_head_without_body() {
        let s3 = s3_client();
        let prefix = test_prefix("head");
        seed_object(&s3, &format!("{prefix}/file.txt"), b"binary data").await;

        let resp = http_client()
            .head(format!("{}/{prefix}/file.txt", gateway_url()))
            .send()
            .await
            .expect("head");

        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["content-length"], "11");
        assert!(resp.bytes().await.expect("body").is_empty());

        cleanup_prefix(&s3, &prefix).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_honor_conditions_and_ranges() {
        let s3 = s3_client();
        let prefix = test_prefix("cond");
        seed_object(&s3, &format!("{prefix}/file.txt"), b"0123456789").await;
        let url = format!("{}/{prefix}/file.txt", gateway_url());
        let client = http_client();

        let etag = client.get(&url).send().await.expect("get").headers()["etag"].clone();
        let resp = client
            .get(&url)
            .header("If-None-Match", etag)
            .send()
            .await
            .expect("conditional get");
        assert_eq!(resp.status(), 304);

        let resp = client
            .get(&url)
            .header("If-Match", "\"other\"")
            .send()
            .await
            .expect("conditional get");
        assert_eq!(resp.status(), 412);

        let resp = client
            .get(&url)
            .header("Range", "bytes=2-4")
            .send()
            .await
            .expect("range get");
        assert_eq!(resp.status(), 206);
        assert_eq!(resp.headers()["content-range"], "bytes 2-4/10");
        assert_eq!(resp.text().await.expect("body"), "234");

        let resp = client
            .get(&url)
            .header("If-Modified-Since", "not a date")
            .send()
            .await
            .expect("bad conditional get");
        assert_eq!(resp.status(), 400);

        cleanup_prefix(&s3, &prefix).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_list_folder() {
        let s3 = s3_client();
        let prefix = test_prefix("list");
        seed_object(&s3, &format!("{prefix}/a.txt"), b"a").await;
        seed_object(&s3, &format!("{prefix}/sub/b.txt"), b"b").await;

        let resp = http_client()
            .get(format!("{}/{prefix}/", gateway_url()))
            .send()
            .await
            .expect("list");

        assert_eq!(resp.status(), 200);
        let page = resp.text().await.expect("body");
        assert!(page.contains(">a.txt</a>"), "{page}");
        assert!(page.contains(">sub/</a>"), "{page}");

        cleanup_prefix(&s3, &prefix).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_rewrite_keys() {
        let s3 = s3_client();
        let prefix = test_prefix("rewrite");
        seed_object(&s3, &format!("{prefix}/v2/app.js"), b"v2").await;

        let resp = http_client()
            .get(format!("{}/{prefix}/latest/app.js", gateway_url()))
            .send()
            .await
            .expect("get");

        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.expect("body"), "v2");

        cleanup_prefix(&s3, &prefix).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_redirect_missing_file_to_folder() {
        let prefix = test_prefix("redirect");

        let resp = http_client()
            .get(format!("{}/{prefix}/missing?x=1", gateway_url()))
            .send()
            .await
            .expect("get");

        assert_eq!(resp.status(), 302);
        assert_eq!(
            resp.headers()["location"],
            format!("/{prefix}/missing/?x=1").as_str()
        );
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_answer_health_and_metrics() {
        let client = http_client();

        let resp = client
            .get(format!("{}/healthz", gateway_url()))
            .send()
            .await
            .expect("healthz");
        assert_eq!(resp.status(), 200);
        let health: serde_json::Value = resp.json().await.expect("json");
        assert_eq!(health["status"], "ok");

        let resp = client
            .get(format!("{}/metrics", gateway_url()))
            .send()
            .await
            .expect("metrics");
        assert_eq!(resp.status(), 200);
        assert!(
            resp.text()
                .await
                .expect("body")
                .contains("s3gate_http_requests_total")
        );
    }
}
