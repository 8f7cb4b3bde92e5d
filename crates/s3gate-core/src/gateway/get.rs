//! GET and HEAD.

use std::sync::LazyLock;

use tracing::debug;

use super::{BucketGateway, GetInput, is_folder_path, join_key};
use crate::config::GetConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::request::RequestContext;
use crate::response::{ResponseHandler, StreamFile};
use crate::store::{HeadOutput, ResultInfo};
use crate::webhook::HookEvent;

static DEFAULT_GET_CONFIG: LazyLock<GetConfig> = LazyLock::new(GetConfig::default);

impl BucketGateway {
    /// Serve a GET request.
    pub async fn get(&self, ctx: &RequestContext, input: &GetInput, response: &dyn ResponseHandler) {
        self.get_or_head(ctx, input, false, response).await;
    }

    /// Serve a HEAD request.
    pub async fn head(
        &self,
        ctx: &RequestContext,
        input: &GetInput,
        response: &dyn ResponseHandler,
    ) {
        self.get_or_head(ctx, input, true, response).await;
    }

    async fn get_or_head(
        &self,
        ctx: &RequestContext,
        input: &GetInput,
        head_only: bool,
        response: &dyn ResponseHandler,
    ) {
        let key = match self.rewrite(ctx, &self.start_key(&input.request_path)) {
            Ok(key) => key,
            Err(e) => return self.render_error(response, &e).await,
        };
        debug!(
            request_id = %ctx.request_id,
            target_name = %self.target.name(),
            key,
            head_only,
            "get request"
        );

        if is_folder_path(&input.request_path) {
            return self.get_folder(ctx, &key, input, head_only, response).await;
        }

        let get_config = self.get_config();
        let result = if head_only || get_config.redirect_to_signed_url {
            match self.store.head(&key).await {
                Ok((head, info)) if head_only => self.answer_head(input, head, info, response).await,
                Ok(_) => self.redirect_to_signed_url(&key, input, response).await,
                Err(e) => Err(e),
            }
        } else {
            self.stream_file(&key, input, response).await
        };

        let Err(err) = result else {
            return;
        };
        if err.is_not_found()
            && get_config.redirect_with_trailing_slash_for_not_found_file
            && !input.request_path.ends_with('/')
        {
            response.redirect_with_trailing_slash();
            return;
        }
        self.render_get_error(response, &err).await;
    }

    async fn get_folder(
        &self,
        ctx: &RequestContext,
        key: &str,
        input: &GetInput,
        head_only: bool,
        response: &dyn ResponseHandler,
    ) {
        let get_config = self.get_config();

        if let Some(index) = get_config.index_document.as_deref().filter(|d| !d.is_empty()) {
            let index_key = join_key(key, index);
            match self.store.head(&index_key).await {
                Ok((head, info)) => {
                    debug!(key = %index_key, "serving index document");
                    let result = if head_only {
                        self.answer_head(input, head, info, response).await
                    } else if get_config.redirect_to_signed_url {
                        self.redirect_to_signed_url(&index_key, input, response).await
                    } else {
                        self.stream_file(&head.key, input, response).await
                    };
                    if let Err(err) = result {
                        self.render_get_error(response, &err).await;
                    }
                    return;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    response.internal_server_error(self, &e).await;
                    return;
                }
            }
        }

        if get_config.disable_listing {
            response.folders_files_list(self, Vec::new()).await;
            return;
        }

        let (descriptors, info) = match self.store.list(key).await {
            Ok(listing) => listing,
            Err(e) => {
                response.internal_server_error(self, &e).await;
                return;
            }
        };

        let name = self.target.name();
        let event = if head_only {
            HookEvent::head(name, &input.request_path, &input.conditions, info)
        } else {
            HookEvent::get(name, &input.request_path, &input.conditions, info)
        };
        self.webhooks.dispatch(event);

        let entries = self.entries(&ctx.mount_path, descriptors);
        response.folders_files_list(self, entries).await;
    }

    async fn answer_head(
        &self,
        input: &GetInput,
        head: HeadOutput,
        info: ResultInfo,
        response: &dyn ResponseHandler,
    ) -> GatewayResult<()> {
        self.webhooks.dispatch(HookEvent::head(
            self.target.name(),
            &input.request_path,
            &input.conditions,
            info,
        ));
        response
            .stream_file(
                self,
                StreamFile {
                    body: None,
                    metadata: head.metadata,
                },
            )
            .await
    }

    async fn redirect_to_signed_url(
        &self,
        key: &str,
        input: &GetInput,
        response: &dyn ResponseHandler,
    ) -> GatewayResult<()> {
        let expiration = self.get_config().signed_url_expiration()?;
        let url = self
            .store
            .signed_url(key, &input.conditions, expiration)
            .await?;
        response.redirect_to(&url);
        Ok(())
    }

    async fn stream_file(
        &self,
        key: &str,
        input: &GetInput,
        response: &dyn ResponseHandler,
    ) -> GatewayResult<()> {
        let (output, info) = self.store.get(key, &input.conditions).await?;
        response
            .stream_file(
                self,
                StreamFile {
                    body: Some(output.body),
                    metadata: output.metadata,
                },
            )
            .await?;
        self.webhooks.dispatch(HookEvent::get(
            self.target.name(),
            &input.request_path,
            &input.conditions,
            info,
        ));
        Ok(())
    }

    async fn render_get_error(&self, response: &dyn ResponseHandler, err: &GatewayError) {
        match err {
            GatewayError::NotFound => response.not_found(self).await,
            GatewayError::NotModified => response.not_modified(),
            GatewayError::PreconditionFailed => response.precondition_failed(),
            _ => response.internal_server_error(self, err).await,
        }
    }

    fn get_config(&self) -> &GetConfig {
        self.target
            .config
            .actions
            .get
            .as_ref()
            .map_or(&*DEFAULT_GET_CONFIG, |a| &a.config)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::store::GetConditions;
    use crate::testing::{Outcome, RecordingResponse, gateway_with, request_context};
    use crate::webhook::HookAction;

    fn input(path: &str) -> GetInput {
        GetInput {
            request_path: path.into(),
            ..GetInput::default()
        }
    }

    const INDEX: &str = r#"
targets:
  - name: site
    mount: { paths: ["/site/"] }
    bucket: { name: b }
    actions:
      GET:
        enabled: true
        config:
          indexDocument: index.html
"#;

    #[tokio::test]
    async fn test_should_stream_index_document_instead_of_listing() {
        let (gateway, store, hooks) = gateway_with(INDEX);
        store.insert_file("folder/index.html", "<h1>home</h1>");
        store.insert_file("folder/other.txt", "x");
        let response = RecordingResponse::default();

        gateway
            .get(&request_context("/site/"), &input("/folder/"), &response)
            .await;

        assert_eq!(
            response.outcome(),
            Outcome::File {
                body: Some("<h1>home</h1>".into()),
                content_type: "text/plain".into()
            }
        );
        assert_eq!(store.calls(), ["head folder/index.html", "get folder/index.html"]);
        assert_eq!(hooks.actions(), [HookAction::Get]);
    }

    #[tokio::test]
    async fn test_should_list_when_index_document_is_missing() {
        let (gateway, store, hooks) = gateway_with(INDEX);
        store.insert_file("folder/a.txt", "x");
        store.insert_file("folder/sub/b.txt", "y");
        let response = RecordingResponse::default();

        gateway
            .get(&request_context("/site/"), &input("/folder/"), &response)
            .await;

        let Outcome::Listing(entries) = response.outcome() else {
            panic!("expected listing, got {:?}", response.outcome());
        };
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["/site/folder/sub/", "/site/folder/a.txt"]);
        assert_eq!(hooks.actions(), [HookAction::Get]);
    }

    #[tokio::test]
    async fn test_should_fail_folder_request_when_index_head_errors() {
        let (gateway, store, hooks) = gateway_with(INDEX);
        store.fail_with("folder/index.html", || {
            GatewayError::Internal(anyhow::anyhow!("boom"))
        });
        let response = RecordingResponse::default();

        gateway
            .get(&request_context("/site/"), &input("/folder/"), &response)
            .await;

        assert_eq!(response.outcome(), Outcome::InternalServerError("boom".into()));
        assert!(hooks.actions().is_empty());
    }

    #[tokio::test]
    async fn test_should_answer_empty_listing_when_disabled() {
        let (gateway, store, hooks) = gateway_with(
            r#"
targets:
  - name: t
    mount: { paths: ["/"] }
    bucket: { name: b }
    actions:
      GET: { enabled: true, config: { disableListing: true } }
"#,
        );
        store.insert_file("a.txt", "x");
        let response = RecordingResponse::default();

        gateway.get(&request_context("/"), &input(""), &response).await;

        assert_eq!(response.outcome(), Outcome::Listing(Vec::new()));
        assert!(store.calls().is_empty());
        assert!(hooks.actions().is_empty());
    }

    #[tokio::test]
    async fn test_should_map_file_errors() {
        let (gateway, store, _) = gateway_with(
            r#"
targets:
  - name: t
    mount: { paths: ["/"] }
    bucket: { name: b }
"#,
        );
        store.fail_with("stale", || GatewayError::NotModified);
        store.fail_with("guarded", || GatewayError::PreconditionFailed);
        store.fail_with("broken", || GatewayError::Internal(anyhow::anyhow!("denied")));

        for (path, expected) in [
            ("/missing", Outcome::NotFound),
            ("/stale", Outcome::NotModified),
            ("/guarded", Outcome::PreconditionFailed),
            ("/broken", Outcome::InternalServerError("denied".into())),
        ] {
            let response = RecordingResponse::default();
            gateway.get(&request_context("/"), &input(path), &response).await;
            assert_eq!(response.outcome(), expected, "path {path}");
        }
    }

    #[tokio::test]
    async fn test_should_redirect_with_trailing_slash_on_missing_file() {
        let (gateway, _, _) = gateway_with(
            r#"
targets:
  - name: t
    mount: { paths: ["/"] }
    bucket: { name: b }
    actions:
      GET: { enabled: true, config: { redirectWithTrailingSlashForNotFoundFile: true } }
"#,
        );
        let response = RecordingResponse::default();
        gateway.get(&request_context("/"), &input("/dir"), &response).await;
        assert_eq!(response.outcome(), Outcome::RedirectWithTrailingSlash);
    }

    #[tokio::test]
    async fn test_should_redirect_to_signed_url_after_head() {
        let (gateway, store, hooks) = gateway_with(
            r#"
targets:
  - name: t
    mount: { paths: ["/"] }
    bucket: { name: b, prefix: data }
    actions:
      GET: { enabled: true, config: { redirectToSignedUrl: true, signedUrlExpiration: 1m } }
"#,
        );
        store.insert_file("data/a.txt", "x");
        let response = RecordingResponse::default();

        gateway.get(&request_context("/"), &input("/a.txt"), &response).await;

        assert_eq!(
            response.outcome(),
            Outcome::Redirect("https://signed.example/data/a.txt?expires=60".into())
        );
        assert_eq!(store.calls(), ["head data/a.txt", "signed_url data/a.txt"]);
        assert!(hooks.actions().is_empty());
    }

    #[tokio::test]
    async fn test_should_sign_get_conditions_into_redirect() {
        let (gateway, store, _) = gateway_with(
            r#"
targets:
  - name: t
    mount: { paths: ["/"] }
    bucket: { name: b }
    actions:
      GET: { enabled: true, config: { redirectToSignedUrl: true } }
"#,
        );
        store.insert_file("a.txt", "0123456789");
        let conditions = GetConditions {
            if_match: Some("\"fake\"".into()),
            if_modified_since: Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
            range: Some("bytes=2-4".into()),
            ..GetConditions::default()
        };
        let input = GetInput {
            request_path: "/a.txt".into(),
            conditions: conditions.clone(),
        };
        let response = RecordingResponse::default();

        gateway.get(&request_context("/"), &input, &response).await;

        assert!(matches!(response.outcome(), Outcome::Redirect(_)));
        assert_eq!(store.last_signed_conditions(), Some(conditions));
    }

    #[tokio::test]
    async fn test_should_answer_head_without_body() {
        let (gateway, store, hooks) = gateway_with(
            r#"
targets:
  - name: t
    mount: { paths: ["/"] }
    bucket: { name: b }
"#,
        );
        store.insert_file("a.txt", "hello");
        let response = RecordingResponse::default();

        gateway.head(&request_context("/"), &input("/a.txt"), &response).await;

        assert_eq!(
            response.outcome(),
            Outcome::File {
                body: None,
                content_type: "text/plain".into()
            }
        );
        assert_eq!(store.calls(), ["head a.txt"]);
        assert_eq!(hooks.actions(), [HookAction::Head]);
    }

    #[tokio::test]
    async fn test_should_not_fire_webhook_on_failed_get() {
        let (gateway, _, hooks) = gateway_with(
            r#"
targets:
  - name: t
    mount: { paths: ["/"] }
    bucket: { name: b }
"#,
        );
        let response = RecordingResponse::default();
        gateway.get(&request_context("/"), &input("/nope"), &response).await;
        assert_eq!(response.outcome(), Outcome::NotFound);
        assert!(hooks.actions().is_empty());
    }
}
