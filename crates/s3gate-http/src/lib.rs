//! HTTP layer of s3gate: routing, request parsing, page rendering, and the
//! hyper service.
//!
//! - **Routing** ([`router`]): Maps the request host and path to a mounted
//!   target, longest mount path first.
//!
//! - **Request parsing** ([`request`], [`multipart`]): Decodes the path,
//!   conditional and range headers, and the uploaded `file` form part into
//!   gateway inputs.
//!
//! - **Rendering** ([`renderer`]): The [`HttpResponseHandler`] that turns the
//!   gateway outcome into an HTTP response, including templated error and
//!   folder listing pages.
//!
//! - **Service** ([`service`]): The [`GatewayHttpService`] implementing hyper's
//!   `Service` trait.
//!
//! - **Body** ([`body`]): The [`GatewayBody`] type supporting buffered,
//!   streamed, and empty responses.
//!
//! # Architecture
//!
//! ```text
//! HTTP Request
//!   -> GatewayHttpService (hyper Service)
//!     -> /healthz and /metrics interception
//!     -> router::resolve (host + mount path)
//!     -> method gating (405 + Allow)
//!     -> request parsing (path, headers, multipart)
//!     -> BucketGateway (s3gate-core)
//!       -> HttpResponseHandler (one outcome)
//!     -> Common response headers (x-request-id)
//!   <- HTTP Response
//! ```

pub mod body;
pub mod multipart;
pub mod renderer;
pub mod request;
pub mod router;
pub mod service;

pub use body::GatewayBody;
pub use renderer::HttpResponseHandler;
pub use service::GatewayHttpService;
