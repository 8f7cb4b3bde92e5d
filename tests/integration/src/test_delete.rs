//! DELETE integration tests.

#[cfg(test)]
mod tests {
    use crate::{gateway_url, http_client, s3_client, seed_object, test_bucket, test_prefix};

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_delete_object() {
        let s3 = s3_client();
        let prefix = test_prefix("delete");
        let key = format!("{prefix}/gone.txt");
        seed_object(&s3, &key, b"bye").await;

        let resp = http_client()
            .delete(format!("{}/{key}", gateway_url()))
            .send()
            .await
            .expect("delete");
        assert_eq!(resp.status(), 204);

        let head = s3.head_object().bucket(test_bucket()).key(&key).send().await;
        assert!(head.is_err(), "object should be gone");
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_refuse_to_delete_folder() {
        let prefix = test_prefix("delete-folder");

        let resp = http_client()
            .delete(format!("{}/{prefix}/", gateway_url()))
            .send()
            .await
            .expect("delete");
        assert_eq!(resp.status(), 400);
    }
}
