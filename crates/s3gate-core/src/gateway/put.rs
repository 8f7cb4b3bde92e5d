//! PUT.

use std::collections::BTreeMap;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{BucketGateway, PutInput};
use crate::config::PutConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::request::RequestContext;
use crate::response::{PutEcho, ResponseHandler};
use crate::store::PutRequest;
use crate::template::strip_newlines;
use crate::webhook::{HookEvent, PutInputMetadata};

impl BucketGateway {
    /// Serve a PUT request.
    pub async fn put(&self, ctx: &RequestContext, input: PutInput, response: &dyn ResponseHandler) {
        let mut path = input.request_path.clone();
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(&input.filename);
        let key = match self.rewrite(ctx, &self.start_key(&path)) {
            Ok(key) => key,
            Err(e) => return self.render_error(response, &e).await,
        };

        let request = match self.prepare_put(ctx, &input, key).await {
            Ok(request) => request,
            Err(e) => return self.render_error(response, &e).await,
        };
        let echo = PutEcho {
            key: request.key.clone(),
            content_type: input.content_type.clone(),
            content_size: input.content_size,
            metadata: request.metadata.clone().unwrap_or_default(),
            storage_class: request.storage_class.clone().unwrap_or_default(),
            filename: input.filename.clone(),
        };

        let info = match self.store.put(request).await {
            Ok(info) => info,
            Err(e) => return self.render_error(response, &e).await,
        };
        info!(
            request_id = %ctx.request_id,
            target_name = %self.target.name(),
            key = %echo.key,
            size = input.content_size,
            "object stored"
        );

        self.webhooks.dispatch(HookEvent::put(
            self.target.name(),
            &input.request_path,
            PutInputMetadata {
                filename: input.filename,
                content_type: input.content_type,
                content_size: input.content_size,
            },
            info,
        ));
        response.put(self, echo).await;
    }

    /// Apply the PUT policy: render metadata and enforce override protection.
    async fn prepare_put(
        &self,
        ctx: &RequestContext,
        input: &PutInput,
        key: String,
    ) -> GatewayResult<PutRequest> {
        let mut request = PutRequest {
            key,
            body: input.body.clone(),
            content_type: input.content_type.clone(),
            content_size: input.content_size,
            ..PutRequest::default()
        };
        let Some(config) = self
            .target
            .config
            .actions
            .put
            .as_ref()
            .and_then(|a| a.config.as_ref())
        else {
            return Ok(request);
        };

        let context = put_context(ctx, input, &request.key);
        self.render_put_metadata(config, &context, &mut request)?;
        request.canned_acl.clone_from(&config.canned_acl);

        if !config.allow_override {
            match self.store.head(&request.key).await {
                Ok(_) => {
                    return Err(GatewayError::ObjectExists {
                        key: request.key.clone(),
                    });
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(request)
    }

    fn render_put_metadata(
        &self,
        config: &PutConfig,
        context: &Value,
        request: &mut PutRequest,
    ) -> GatewayResult<()> {
        let render = |source: &Option<String>| -> GatewayResult<Option<String>> {
            match source.as_deref().filter(|s| !s.is_empty()) {
                Some(source) => self.render_put_value(source, context),
                None => Ok(None),
            }
        };

        if let Some(system) = &config.system_metadata {
            request.cache_control = render(&system.cache_control)?;
            request.content_disposition = render(&system.content_disposition)?;
            request.content_encoding = render(&system.content_encoding)?;
            request.content_language = render(&system.content_language)?;
            if let Some(expires) = render(&system.expires)? {
                let parsed = DateTime::parse_from_rfc3339(&expires)
                    .with_context(|| format!("parse expires {expires}"))?;
                request.expires = Some(parsed.with_timezone(&Utc));
            }
        }

        if !config.metadata.is_empty() {
            let mut metadata = BTreeMap::new();
            for (name, source) in &config.metadata {
                if let Some(value) = self.render_put_value(source, context)? {
                    metadata.insert(name.clone(), value);
                }
            }
            request.metadata = Some(metadata);
        }

        request.storage_class = render(&config.storage_class)?;
        debug!(key = %request.key, "put metadata rendered");
        Ok(())
    }

    fn render_put_value(&self, source: &str, context: &Value) -> GatewayResult<Option<String>> {
        let rendered = strip_newlines(&self.engine.render(source, context)?);
        Ok((!rendered.is_empty()).then_some(rendered))
    }
}

fn put_context(ctx: &RequestContext, input: &PutInput, key: &str) -> Value {
    json!({
        "user": ctx.user,
        "input": {
            "requestPath": input.request_path,
            "filename": input.filename,
            "contentType": input.content_type,
            "contentSize": input.content_size,
        },
        "key": key,
    })
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::request::AuthenticatedUser;
    use crate::testing::{Outcome, RecordingResponse, gateway_with, request_context};
    use crate::webhook::{HookAction, InputMetadata};

    fn upload(path: &str, filename: &str) -> PutInput {
        PutInput {
            request_path: path.into(),
            filename: filename.into(),
            content_type: "text/plain".into(),
            content_size: 5,
            body: Bytes::from_static(b"hello"),
        }
    }

    const GUARDED: &str = r#"
targets:
  - name: up
    mount: { paths: ["/up/"] }
    bucket: { name: b, prefix: files }
    actions:
      PUT:
        enabled: true
        config:
          allowOverride: false
"#;

    #[tokio::test]
    async fn test_should_refuse_to_override_existing_object() {
        let (gateway, store, hooks) = gateway_with(GUARDED);
        store.insert_file("files/dir/a.txt", "old");
        let response = RecordingResponse::default();

        gateway
            .put(&request_context("/up/"), upload("/dir", "a.txt"), &response)
            .await;

        assert_eq!(store.calls(), ["head files/dir/a.txt"]);
        let Outcome::Forbidden(message) = response.outcome() else {
            panic!("expected forbidden, got {:?}", response.outcome());
        };
        assert!(message.contains("files/dir/a.txt"));
        assert_eq!(store.content("files/dir/a.txt").as_deref(), Some("old"));
        assert!(hooks.actions().is_empty());
    }

    #[tokio::test]
    async fn test_should_store_new_object_and_fire_webhook() {
        let (gateway, store, hooks) = gateway_with(GUARDED);
        let response = RecordingResponse::default();

        gateway
            .put(&request_context("/up/"), upload("/dir/", "a.txt"), &response)
            .await;

        assert_eq!(store.calls(), ["head files/dir/a.txt", "put files/dir/a.txt"]);
        assert_eq!(store.content("files/dir/a.txt").as_deref(), Some("hello"));
        let Outcome::Put(echo) = response.outcome() else {
            panic!("expected put echo, got {:?}", response.outcome());
        };
        assert_eq!(echo.key, "files/dir/a.txt");
        assert_eq!(echo.filename, "a.txt");

        let events = hooks.events();
        assert_eq!(hooks.actions(), [HookAction::Put]);
        assert_eq!(
            events[0].input,
            Some(InputMetadata::Put(PutInputMetadata {
                filename: "a.txt".into(),
                content_type: "text/plain".into(),
                content_size: 5,
            }))
        );
        assert_eq!(events[0].output.key, "files/dir/a.txt");
    }

    #[tokio::test]
    async fn test_should_skip_head_without_put_policy() {
        let (gateway, store, _) = gateway_with(
            r#"
targets:
  - name: up
    mount: { paths: ["/"] }
    bucket: { name: b }
    actions:
      PUT: { enabled: true }
"#,
        );
        store.insert_file("a.txt", "old");
        let response = RecordingResponse::default();

        gateway.put(&request_context("/"), upload("", "a.txt"), &response).await;

        assert_eq!(store.calls(), ["put a.txt"]);
        assert_eq!(store.content("a.txt").as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_should_render_metadata_templates() {
        let (gateway, store, _) = gateway_with(
            r#"
targets:
  - name: up
    mount: { paths: ["/"] }
    bucket: { name: b }
    actions:
      PUT:
        enabled: true
        config:
          allowOverride: true
          metadata:
            owner: "{{ user.username }}"
            empty: "{% if false %}x{% endif %}"
          systemMetadata:
            cacheControl: "max-age={{ input.contentSize }}\n"
            expires: "2030-01-02T03:04:05Z"
          storageClass: "{% if input.contentSize < 10 %}STANDARD_IA{% endif %}"
          cannedAcl: private
"#,
        );
        let mut ctx = request_context("/");
        ctx.user = Some(AuthenticatedUser {
            username: "alice".into(),
            ..AuthenticatedUser::default()
        });
        let response = RecordingResponse::default();

        gateway.put(&ctx, upload("/", "a.txt"), &response).await;

        let stored = store.last_put().unwrap();
        assert_eq!(stored.cache_control.as_deref(), Some("max-age=5"));
        assert_eq!(
            stored.expires.unwrap().to_rfc3339(),
            "2030-01-02T03:04:05+00:00"
        );
        assert_eq!(
            stored.metadata,
            Some(BTreeMap::from([("owner".to_owned(), "alice".to_owned())]))
        );
        assert_eq!(stored.storage_class.as_deref(), Some("STANDARD_IA"));
        assert_eq!(stored.canned_acl.as_deref(), Some("private"));
        assert!(stored.content_language.is_none());
    }

    #[tokio::test]
    async fn test_should_fail_on_unparseable_expires() {
        let (gateway, store, hooks) = gateway_with(
            r#"
targets:
  - name: up
    mount: { paths: ["/"] }
    bucket: { name: b }
    actions:
      PUT:
        enabled: true
        config:
          allowOverride: true
          systemMetadata: { expires: "tomorrow" }
"#,
        );
        let response = RecordingResponse::default();

        gateway.put(&request_context("/"), upload("/", "a.txt"), &response).await;

        assert!(matches!(response.outcome(), Outcome::InternalServerError(_)));
        assert!(store.calls().is_empty());
        assert!(hooks.actions().is_empty());
    }
}
