//! Server-side runtime for the Internet Content Adaptation Protocol (ICAP),
//! RFC 3507.
//!
//! ICAP lets edge devices such as proxies hand HTTP messages to a dedicated
//! adaptation server for inspection or rewriting. The proxy wraps a complete
//! HTTP/1.1 request and/or response inside an ICAP `REQMOD`, `RESPMOD`, or
//! `OPTIONS` envelope; the adaptation server answers with a `204 No
//! Modifications`, or with a `200 OK` carrying the (possibly rewritten) HTTP
//! message.
//!
//! This crate implements the server pipeline: the wire parser and message
//! model, the response writer with its recomputed `Encapsulated` offsets,
//! the chunked transfer codec, and the per-connection accept/dispatch loop.
//!
//! Basic usage:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use icap_server::{Handler, IcapResult, Method, Request, ResponseWriter};
//!
//! struct NoOp;
//!
//! #[async_trait]
//! impl Handler for NoOp {
//!     async fn serve_icap(
//!         &self,
//!         w: &mut ResponseWriter<'_>,
//!         req: &mut Request<'_>,
//!     ) -> IcapResult<()> {
//!         let h = w.header();
//!         h.insert("ISTag", "\"RUST-ICAP\"".parse().unwrap());
//!         match req.method {
//!             Method::Options => {
//!                 w.header().insert("Methods", "REQMOD, RESPMOD".parse().unwrap());
//!                 w.header().insert("Allow", "204".parse().unwrap());
//!                 w.write_header(200, None, false).await
//!             }
//!             Method::ReqMod | Method::RespMod => w.write_header(204, None, false).await,
//!             _ => w.write_header(405, None, false).await,
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> IcapResult<()> {
//!     icap_server::handle("/noop", Arc::new(NoOp));
//!     icap_server::listen_and_serve("127.0.0.1:1344", icap_server::default_mux()).await
//! }
//! ```

pub mod bridge;
mod chunked;
pub mod error;
pub mod mux;
mod net;
mod parser;
pub mod request;
pub mod response;
pub mod server;

pub use bridge::{HttpHandler, serve_locally};
pub use error::{Error, IcapResult};
pub use mux::{ServeMux, default_mux, handle};
pub use request::{BodyReader, Method, Request, Section};
pub use response::{Embedded, ResponseWriter};
pub use server::{Handler, Server, ServerBuilder, listen_and_serve, serve};
#[cfg(feature = "tls-rustls")]
pub use server::listen_and_serve_tls;

/// Supported ICAP protocol version.
pub const ICAP_VERSION: &str = "ICAP/1.0";
/// Default listen address (the IANA-assigned ICAP port).
pub const DEFAULT_ADDR: &str = "0.0.0.0:1344";
/// Longest accepted header or chunk-size line, in bytes.
pub const MAX_LINE_BYTES: usize = 4096;
