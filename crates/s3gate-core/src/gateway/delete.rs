//! DELETE.

use tracing::info;

use super::{BucketGateway, is_folder_path};
use crate::error::GatewayError;
use crate::request::RequestContext;
use crate::response::{DeleteEcho, ResponseHandler};
use crate::webhook::HookEvent;

impl BucketGateway {
    /// Serve a DELETE request. Folders are never removed.
    pub async fn delete(
        &self,
        ctx: &RequestContext,
        request_path: &str,
        response: &dyn ResponseHandler,
    ) {
        let key = match self.rewrite(ctx, &self.start_key(request_path)) {
            Ok(key) => key,
            Err(e) => return self.render_error(response, &e).await,
        };

        if is_folder_path(request_path) {
            return self.render_error(response, &GatewayError::RemovalFolder).await;
        }

        let info = match self.store.delete(&key).await {
            Ok(info) => info,
            Err(e) => return self.render_error(response, &e).await,
        };
        info!(
            request_id = %ctx.request_id,
            target_name = %self.target.name(),
            key,
            "object removed"
        );

        self.webhooks
            .dispatch(HookEvent::delete(self.target.name(), request_path, info));
        response.delete(self, DeleteEcho { key }).await;
    }
}
