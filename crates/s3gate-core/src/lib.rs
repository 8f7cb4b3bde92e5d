//! Request-to-object translation engine for s3gate.
//!
//! This crate turns file-style HTTP requests into S3 operations for a set of
//! configured targets: it rewrites keys, talks to the bucket, renders the
//! outcome through a pluggable response handler, and notifies webhooks.
//!
//! # Architecture
//!
//! ```text
//! HTTP layer (s3gate-http)
//!        |
//!        v
//!   BucketGateway ----> ResponseHandler (renders one outcome)
//!    |     |     \
//!    v     v      v
//! rewrite  ObjectStore  WebhookDispatcher (queued, sequential per batch)
//!           |
//!           v
//!      aws-sdk-s3
//! ```
//!
//! Targets, compiled rules and webhook clients are swapped as a whole by
//! [`target::TargetRegistry::reload`].

pub mod checksums;
pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod request;
pub mod response;
pub mod rewrite;
pub mod store;
pub mod target;
pub mod template;
pub mod webhook;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use gateway::{BucketGateway, GetInput, PutInput};
pub use target::{S3StoreFactory, TargetRegistry};
pub use webhook::{WebhookDispatcher, WebhookManager};
