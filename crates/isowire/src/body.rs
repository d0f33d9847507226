//! HTTP bodies for requests and responses that cross a worker boundary.
//!
//! A body may stream on either side, but it is always buffered whole before it
//! is handed over.

use std::convert::Infallible;

use bytes::Bytes;
use http_body_util::BodyExt;
use http_body_util::Empty;
use http_body_util::Full;
use http_body_util::combinators::BoxBody;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type of the requests and responses known to the built-in marshallers.
pub type Body = BoxBody<Bytes, BoxError>;

pub type Request = http::Request<Body>;
pub type Response = http::Response<Body>;

pub fn full(bytes: impl Into<Bytes>) -> Body {
    Full::new(bytes.into())
        .map_err(|never: Infallible| -> BoxError { match never {} })
        .boxed()
}

pub fn empty() -> Body {
    Empty::<Bytes>::new()
        .map_err(|never: Infallible| -> BoxError { match never {} })
        .boxed()
}

/// Reads a body to the end.
pub async fn to_bytes(body: Body) -> Result<Bytes, BoxError> {
    Ok(body.collect().await?.to_bytes())
}
