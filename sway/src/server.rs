//! HTTP/1.1 front end: accepts client connections and hands every request to
//! the dispatcher.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, combinators::UnsyncBoxBody};
use hyper::body::Incoming;
use hyper::header::HeaderMap;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, info, warn};
use tokio::net::TcpListener;
use tokio::signal;

use sway_lb::{DispatchError, Dispatcher};
use sway_transport::HttpForwarder;

pub type ProxyBody = UnsyncBoxBody<Bytes, hyper::Error>;

type SharedDispatcher = Arc<Dispatcher<HttpForwarder>>;

// connection-scoped headers that must not cross the proxy
const HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Binds `addr` and serves until Ctrl-C.
pub async fn run(
    addr: &str,
    dispatcher: SharedDispatcher,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    serve(listener, dispatcher, async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    })
    .await;
    Ok(())
}

/// Accepts connections until `shutdown` completes, then stops the
/// dispatcher's background work.
pub async fn serve<S>(listener: TcpListener, dispatcher: SharedDispatcher, shutdown: S)
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(v) => v,
                    Err(err) => {
                        warn!("Accept failed: {}", err);
                        continue;
                    }
                };

                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let dispatcher = dispatcher.clone();
                        async move { Ok::<_, Infallible>(proxy(&dispatcher, req).await) }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!("Connection from {} ended with error: {}", peer, err);
                    }
                });
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    dispatcher.shutdown().await;
}

async fn proxy(
    dispatcher: &Dispatcher<HttpForwarder>,
    req: Request<Incoming>,
) -> Response<ProxyBody> {
    let (mut parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            warn!("Failed to read request body: {}", err);
            return status_response(StatusCode::BAD_REQUEST);
        }
    };
    strip_hop_headers(&mut parts.headers);

    match dispatcher.handle(Request::from_parts(parts, Full::new(body))).await {
        Ok(response) => {
            let (mut parts, body) = response.into_parts();
            strip_hop_headers(&mut parts.headers);
            Response::from_parts(parts, body.boxed_unsync())
        }
        Err(err) => {
            let status = status_for(&err);
            warn!("Request failed with {}: {}", status, err);
            status_response(status)
        }
    }
}

fn status_for<E: std::error::Error + 'static>(err: &DispatchError<E>) -> StatusCode {
    match err {
        DispatchError::Selection(_) => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::Rewrite(_) | DispatchError::Forward(_) => StatusCode::BAD_GATEWAY,
    }
}

fn strip_hop_headers(headers: &mut HeaderMap) {
    for name in HOP_HEADERS {
        headers.remove(*name);
    }
}

fn status_response(status: StatusCode) -> Response<ProxyBody> {
    let reason = status.canonical_reason().unwrap_or("error");
    let body = Full::new(Bytes::from(reason))
        .map_err(|never| match never {})
        .boxed_unsync();

    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}
