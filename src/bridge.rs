//! Bridge from ICAP to a locally mounted HTTP handler.
//!
//! An adaptation server can answer a `REQMOD` by fabricating the origin
//! response itself: the embedded HTTP request is handed to a local handler,
//! whose captured reply is written back as a `RESPMOD`-style `200` carrying
//! the synthesized response.

use async_trait::async_trait;
use tracing::warn;

use crate::error::IcapResult;
use crate::request::{BodyReader, Request};
use crate::response::{Embedded, ResponseWriter};

/// A locally mounted HTTP handler invoked by [`serve_locally`].
///
/// The request head comes from the ICAP `req-hdr` section; `body` is the
/// de-chunked encapsulated request body. The returned response is buffered
/// in full before it is promoted onto the wire, so its length is known when
/// the `Encapsulated` header is computed.
#[async_trait]
pub trait HttpHandler: Send + Sync {
    async fn serve_http(
        &self,
        req: &http::Request<()>,
        body: &mut BodyReader<'_>,
    ) -> http::Response<Vec<u8>>;
}

/// Synthesize an HTTP response for the embedded request by invoking
/// `handler`, and write it back as the ICAP reply.
///
/// Requests without an embedded HTTP request head are answered `400`.
pub async fn serve_locally(
    w: &mut ResponseWriter<'_>,
    req: &mut Request<'_>,
    handler: &dyn HttpHandler,
) -> IcapResult<()> {
    let Some(http_req) = req.http_request.as_ref() else {
        warn!("local bridge invoked without an embedded HTTP request");
        return w.write_header(400, None, false).await;
    };

    let response = handler.serve_http(http_req, &mut req.body).await;
    let (parts, body) = response.into_parts();
    let head = http::Response::from_parts(parts, ());

    let has_body = !body.is_empty();
    w.write_header(200, Some(Embedded::Resp(&head)), has_body)
        .await?;
    if has_body {
        w.write(&body).await?;
    }
    Ok(())
}
