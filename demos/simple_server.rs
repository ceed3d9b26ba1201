//! A basic ICAP server handling REQMOD and RESPMOD requests.
//!
//! Run with `cargo run --example simple-server`, then point an ICAP client
//! (squid, c-icap-client) at `icap://localhost:1344/reqmod`.

use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderValue;
use icap_server::{Handler, IcapResult, Method, Request, ResponseWriter};

const ISTAG: &str = "\"RUST-ICAP-DEMO\"";

struct ReqmodService;

#[async_trait]
impl Handler for ReqmodService {
    async fn serve_icap(
        &self,
        w: &mut ResponseWriter<'_>,
        req: &mut Request<'_>,
    ) -> IcapResult<()> {
        w.header().insert("ISTag", HeaderValue::from_static(ISTAG));
        w.header()
            .insert("Service", HeaderValue::from_static("Rust ICAP Reqmod Service"));

        match req.method {
            Method::Options => {
                w.header().insert("Methods", HeaderValue::from_static("REQMOD"));
                w.header().insert("Allow", HeaderValue::from_static("204"));
                w.header().insert("Preview", HeaderValue::from_static("0"));
                w.header()
                    .insert("Transfer-Preview", HeaderValue::from_static("*"));
                w.write_header(200, None, false).await
            }
            Method::ReqMod => {
                // Tag the request and hand it back unchanged otherwise.
                if let Some(http_req) = req.http_request.as_mut() {
                    http_req
                        .headers_mut()
                        .insert("X-Icap-Processed", HeaderValue::from_static("true"));
                }
                match req.http_request.as_ref() {
                    Some(http_req) => {
                        let embedded = icap_server::Embedded::Req(http_req);
                        let has_body = !req.encapsulated.is_empty()
                            && req.encapsulated.iter().any(|(s, _)| s.is_body());
                        w.write_header(200, Some(embedded), has_body).await?;
                        if has_body {
                            let mut buf = [0u8; 8192];
                            loop {
                                let n = req.body.read(&mut buf).await?;
                                if n == 0 {
                                    break;
                                }
                                w.write(&buf[..n]).await?;
                            }
                        }
                        Ok(())
                    }
                    None => w.write_header(204, None, false).await,
                }
            }
            _ => w.write_header(405, None, false).await,
        }
    }
}

struct RespmodService;

#[async_trait]
impl Handler for RespmodService {
    async fn serve_icap(
        &self,
        w: &mut ResponseWriter<'_>,
        req: &mut Request<'_>,
    ) -> IcapResult<()> {
        w.header().insert("ISTag", HeaderValue::from_static(ISTAG));
        w.header()
            .insert("Service", HeaderValue::from_static("Rust ICAP Respmod Service"));

        match req.method {
            Method::Options => {
                w.header().insert("Methods", HeaderValue::from_static("RESPMOD"));
                w.header().insert("Allow", HeaderValue::from_static("204"));
                w.write_header(200, None, false).await
            }
            // Nothing to change: tell the proxy to use the original.
            Method::RespMod => w.write_header(204, None, false).await,
            _ => w.write_header(405, None, false).await,
        }
    }
}

#[tokio::main]
async fn main() -> IcapResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("icap_server=debug")),
        )
        .init();

    icap_server::handle("/reqmod", Arc::new(ReqmodService));
    icap_server::handle("/respmod", Arc::new(RespmodService));

    icap_server::listen_and_serve("0.0.0.0:1344", icap_server::default_mux()).await
}
