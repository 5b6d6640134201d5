//! [`Forward`] implementation on top of the pooled hyper client.

use std::sync::Arc;
use std::time::Duration;

use http::header::HOST;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use log::debug;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time;

use sway_config::config::Transport;
use sway_lb::Forward;

use crate::client::HttpClient;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("send failed: {0}")]
    Send(#[from] hyper_util::client::legacy::Error),

    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),

    #[error("in-flight limiter closed")]
    Closed,
}

/// Sends already rewritten requests upstream.
///
/// Optionally caps the number of requests in flight across all servers and
/// bounds each request with a timeout.
pub struct HttpForwarder {
    client: HttpClient,
    inflight: Option<Arc<Semaphore>>,
    timeout: Option<Duration>,
}

impl HttpForwarder {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            inflight: None,
            timeout: None,
        }
    }

    pub fn from_config(transport: &Transport) -> Self {
        let mut forwarder = Self::new(HttpClient::new(transport.http2_only));
        if transport.max_inflight > 0 {
            forwarder = forwarder.with_max_inflight(transport.max_inflight);
        }
        if transport.timeout_ms > 0 {
            forwarder = forwarder.with_timeout(Duration::from_millis(transport.timeout_ms));
        }
        forwarder
    }

    pub fn with_max_inflight(mut self, max_inflight: usize) -> Self {
        self.inflight = Some(Arc::new(Semaphore::new(max_inflight.max(1))));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }
}

impl Default for HttpForwarder {
    fn default() -> Self {
        Self::new(HttpClient::default())
    }
}

impl Forward for HttpForwarder {
    type Body = Full<Bytes>;
    type ResponseBody = Incoming;
    type Error = ForwardError;

    async fn forward(
        &self,
        mut request: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>, ForwardError> {
        let _permit = match &self.inflight {
            Some(inflight) => Some(inflight.acquire().await.map_err(|_| ForwardError::Closed)?),
            None => None,
        };

        // the client derives Host from the rewritten URI
        request.headers_mut().remove(HOST);
        debug!("Forwarding {} {}", request.method(), request.uri());

        let send = self.client.send(request);
        match self.timeout {
            Some(limit) => time::timeout(limit, send)
                .await
                .map_err(|_| ForwardError::Timeout(limit))?
                .map_err(ForwardError::from),
            None => send.await.map_err(ForwardError::from),
        }
    }
}
