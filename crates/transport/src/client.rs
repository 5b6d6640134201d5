use std::future::Future;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Request, rt::Executor};
use hyper_util::client::legacy::{Client, ResponseFuture, connect::HttpConnector};

#[derive(Clone, Copy)]
struct TokioExecutor;

impl<F> Executor<F> for TokioExecutor
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        tokio::spawn(fut);
    }
}

/// Pooled upstream client. Speaks HTTP/1.1, or HTTP/2 with prior knowledge
/// when built with `http2_only`.
pub struct HttpClient {
    client: Client<HttpConnector, Full<Bytes>>,
    http2_only: bool,
}

impl HttpClient {
    pub fn new(http2_only: bool) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_nodelay(true);

        let client = Client::builder(TokioExecutor)
            .http2_only(http2_only)
            .build(http);

        Self { client, http2_only }
    }

    pub fn is_http2_only(&self) -> bool {
        self.http2_only
    }

    pub fn send(&self, req: Request<Full<Bytes>>) -> ResponseFuture {
        self.client.request(req)
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(false)
    }
}
