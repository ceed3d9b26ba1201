//! Exact-match registry mapping ICAP URI paths to handlers.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use async_trait::async_trait;
use tracing::warn;

use crate::error::IcapResult;
use crate::request::Request;
use crate::response::ResponseWriter;
use crate::server::Handler;

/// Path-keyed handler registry.
///
/// Lookup is by the exact path of the ICAP URI; a miss answers
/// `404 ICAP Service Not Found` with `null-body=0`. Registrations are
/// expected at process init, so lookups take the cheap read side of the
/// lock.
pub struct ServeMux {
    routes: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl ServeMux {
    pub fn new() -> Self {
        ServeMux {
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Register `handler` for the exact URI path `path`. A later
    /// registration for the same path replaces the earlier one.
    pub fn handle(&self, path: &str, handler: Arc<dyn Handler>) {
        self.routes
            .write()
            .unwrap()
            .insert(path.to_string(), handler);
    }

    fn lookup(&self, path: &str) -> Option<Arc<dyn Handler>> {
        self.routes.read().unwrap().get(path).cloned()
    }
}

impl Default for ServeMux {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for ServeMux {
    async fn serve_icap(
        &self,
        w: &mut ResponseWriter<'_>,
        req: &mut Request<'_>,
    ) -> IcapResult<()> {
        match self.lookup(req.uri.path()) {
            Some(handler) => handler.serve_icap(w, req).await,
            None => {
                warn!("no ICAP service registered for {}", req.uri.path());
                w.write_header(404, None, false).await
            }
        }
    }
}

static DEFAULT_MUX: LazyLock<Arc<ServeMux>> = LazyLock::new(|| Arc::new(ServeMux::new()));

/// The process-wide default mux used by the module-level registration
/// helpers. Prefer an explicit [`ServeMux`] handed to
/// [`Server::new`](crate::Server::new); this exists for the ergonomic
/// top-level API.
pub fn default_mux() -> Arc<ServeMux> {
    Arc::clone(&DEFAULT_MUX)
}

/// Register `handler` for `path` on the default mux.
pub fn handle(path: &str, handler: Arc<dyn Handler>) {
    DEFAULT_MUX.handle(path, handler);
}
