use std::{
    collections::HashMap,
    io,
    sync::{Arc, Mutex},
    time::Duration,
};

use http::{Request, Response};

use sway_config::config::{Balancer, Config, Metrics};
use sway_lb::{
    DispatchError, Dispatcher, Forward, HookRegistrar, LbError, RequestId, Server,
};

/// Echoes the rewritten URI back after an optional per-host delay.
#[derive(Default)]
struct EchoBackend {
    delays: HashMap<String, Duration>,
    fail: bool,
    seen: Mutex<Vec<String>>,
}

impl EchoBackend {
    fn with_delay(mut self, host: &str, delay: Duration) -> Self {
        self.delays.insert(host.to_string(), delay);
        self
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

impl Forward for EchoBackend {
    type Body = String;
    type ResponseBody = String;
    type Error = io::Error;

    async fn forward(&self, request: Request<String>) -> Result<Response<String>, io::Error> {
        let uri = request.uri().to_string();
        self.seen.lock().unwrap().push(uri.clone());

        let host = request.uri().authority().map(|a| a.to_string()).unwrap_or_default();
        if let Some(delay) = self.delays.get(&host) {
            tokio::time::sleep(*delay).await;
        }

        if self.fail {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }
        Ok(Response::new(uri))
    }
}

fn server(addr: &str) -> Server {
    Server::parse(addr).unwrap()
}

fn balancer(metrics: Metrics, update_interval_ms: u64) -> Balancer {
    Balancer {
        update_interval_ms,
        metrics,
    }
}

fn get(path: &str) -> Request<String> {
    Request::builder()
        .method("GET")
        .uri(path)
        .body(String::new())
        .unwrap()
}

fn host_of(uri: &str) -> String {
    uri.parse::<http::Uri>()
        .unwrap()
        .authority()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn routes_round_robin_without_metrics() {
    let dispatcher = Dispatcher::new(
        EchoBackend::default(),
        vec![server("http://a.test:8080/api"), server("http://b.test:8080")],
        &balancer(Metrics::None, 1000),
    )
    .unwrap();

    let mut targets = Vec::new();
    for _ in 0..4 {
        let response = dispatcher.handle(get("/users?page=2")).await.unwrap();
        targets.push(response.into_body());
    }

    assert_eq!(
        targets,
        vec![
            "http://a.test:8080/api/users?page=2",
            "http://b.test:8080/users?page=2",
            "http://a.test:8080/api/users?page=2",
            "http://b.test:8080/users?page=2",
        ]
    );
    assert_eq!(dispatcher.strategy(), "none");
}

#[tokio::test]
async fn hooks_run_in_order_around_forward() {
    let dispatcher = Dispatcher::new(
        EchoBackend::default(),
        vec![server("http://a.test")],
        &balancer(Metrics::None, 1000),
    )
    .unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    for tag in ["pre-1", "pre-2"] {
        let events = events.clone();
        dispatcher.register_pre_hook(Arc::new(move |s: &Server, id: RequestId| {
            events.lock().unwrap().push(format!("{tag} {s} {id}"));
        }));
    }
    let post_events = events.clone();
    dispatcher.register_post_hook(Arc::new(move |s: &Server, id: RequestId| {
        post_events.lock().unwrap().push(format!("post {s} {id}"));
    }));

    dispatcher.handle(get("/")).await.unwrap();

    assert_eq!(dispatcher.pre_hooks().len(), 2);
    assert_eq!(dispatcher.post_hooks().len(), 1);
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "pre-1 http://a.test #0",
            "pre-2 http://a.test #0",
            "post http://a.test #0",
        ]
    );
}

#[tokio::test]
async fn post_hooks_run_when_forward_fails() {
    let dispatcher = Dispatcher::new(
        EchoBackend::failing(),
        vec![server("http://a.test")],
        &balancer(Metrics::None, 1000),
    )
    .unwrap();

    let posts = Arc::new(Mutex::new(0));
    let counter = posts.clone();
    dispatcher.register_post_hook(Arc::new(move |_: &Server, _: RequestId| {
        *counter.lock().unwrap() += 1;
    }));

    let err = dispatcher.handle(get("/")).await.unwrap_err();
    assert!(matches!(err, DispatchError::Forward(_)));
    assert_eq!(*posts.lock().unwrap(), 1);
}

#[tokio::test]
async fn post_hooks_run_when_request_is_cancelled() {
    let dispatcher = Dispatcher::new(
        EchoBackend::default().with_delay("a.test", Duration::from_secs(10)),
        vec![server("http://a.test")],
        &balancer(Metrics::None, 1000),
    )
    .unwrap();

    let posts = Arc::new(Mutex::new(0));
    let counter = posts.clone();
    dispatcher.register_post_hook(Arc::new(move |_: &Server, _: RequestId| {
        *counter.lock().unwrap() += 1;
    }));

    let outcome = tokio::time::timeout(Duration::from_millis(20), dispatcher.handle(get("/"))).await;
    assert!(outcome.is_err());
    assert_eq!(*posts.lock().unwrap(), 1);
}

#[tokio::test]
async fn upsert_remove_and_list_pass_through() {
    let dispatcher = Dispatcher::new(
        EchoBackend::default(),
        vec![server("http://a.test"), server("http://b.test")],
        &balancer(Metrics::None, 1000),
    )
    .unwrap();

    assert!(!dispatcher.upsert(server("HTTP://A.TEST/")));
    assert!(dispatcher.upsert(server("http://c.test")));
    assert_eq!(dispatcher.list().len(), 3);
    assert_eq!(dispatcher.weights().len(), 3);

    dispatcher.remove(&server("http://b.test")).unwrap();
    assert_eq!(
        dispatcher.remove(&server("http://b.test")),
        Err(LbError::ServerNotFound(server("http://b.test")))
    );
    assert_eq!(
        dispatcher.list(),
        vec![server("http://a.test"), server("http://c.test")]
    );

    for _ in 0..10 {
        let target = dispatcher.handle(get("/")).await.unwrap().into_body();
        assert_ne!(host_of(&target), "b.test");
    }
}

#[tokio::test]
async fn selection_fails_once_every_server_is_gone() {
    let dispatcher = Dispatcher::new(
        EchoBackend::default(),
        vec![server("http://a.test")],
        &balancer(Metrics::None, 1000),
    )
    .unwrap();
    dispatcher.remove(&server("http://a.test")).unwrap();

    let err = dispatcher.handle(get("/")).await.unwrap_err();
    assert!(matches!(err, DispatchError::Selection(LbError::NoServers)));
}

#[tokio::test]
async fn rejects_bad_construction() {
    let empty = Dispatcher::new(
        EchoBackend::default(),
        Vec::new(),
        &balancer(Metrics::None, 1000),
    );
    assert!(matches!(empty, Err(LbError::Configuration(_))));

    let bad_epsilon = Dispatcher::new(
        EchoBackend::default(),
        vec![server("http://a.test")],
        &balancer(
            Metrics::Periodic {
                window_ms: 100,
                epsilon: 0.0,
            },
            1000,
        ),
    );
    assert!(matches!(bad_epsilon, Err(LbError::Configuration(_))));
}

#[tokio::test]
async fn from_config_parses_servers() {
    let config = Config {
        servers: vec!["http://a.test".to_string(), "b.test:81".to_string()],
        ..Config::default()
    };
    let dispatcher = Dispatcher::from_config(EchoBackend::default(), &config).unwrap();
    assert_eq!(
        dispatcher.list(),
        vec![server("http://a.test"), server("http://b.test:81")]
    );

    let config = Config {
        servers: vec!["http://a.test/?q=1".to_string()],
        ..Config::default()
    };
    assert!(matches!(
        Dispatcher::from_config(EchoBackend::default(), &config),
        Err(LbError::InvalidEndpoint(_))
    ));
}

#[tokio::test]
async fn ewma_prefers_the_faster_server() {
    let dispatcher = Dispatcher::new(
        EchoBackend::default().with_delay("slow.test", Duration::from_millis(30)),
        vec![server("http://fast.test"), server("http://slow.test")],
        &balancer(
            Metrics::Ewma {
                window_ms: 1000,
                scaling: 1.0,
            },
            3_600_000,
        ),
    )
    .unwrap();
    assert_eq!(dispatcher.strategy(), "ewma");

    // equal weights: both servers get sampled
    for _ in 0..6 {
        dispatcher.handle(get("/")).await.unwrap();
    }
    dispatcher.refresh_weights().unwrap();

    let weights = dispatcher.weights();
    let fast = weights.get(&server("http://fast.test")).unwrap();
    let slow = weights.get(&server("http://slow.test")).unwrap();
    assert!(fast > slow, "fast {fast} should outweigh slow {slow}");

    let mut fast_hits = 0;
    for _ in 0..20 {
        let target = dispatcher.handle(get("/")).await.unwrap().into_body();
        if host_of(&target) == "fast.test" {
            fast_hits += 1;
        }
    }
    assert!(fast_hits >= 15, "fast server only got {fast_hits} of 20");
}

#[tokio::test]
async fn ewma_pulls_new_weights_after_interval() {
    let dispatcher = Dispatcher::new(
        EchoBackend::default(),
        vec![server("http://fast.test"), server("http://slow.test")],
        &balancer(
            Metrics::Ewma {
                window_ms: 1000,
                scaling: 1.0,
            },
            0,
        ),
    )
    .unwrap();
    assert_eq!(dispatcher.weights().get(&server("http://slow.test")), Some(10));

    // fast.test answers instantly, far below the 15 ms seed of slow.test
    dispatcher.handle(get("/")).await.unwrap();
    assert_eq!(dispatcher.weights().get(&server("http://fast.test")), Some(10));
    assert_eq!(dispatcher.weights().get(&server("http://slow.test")), Some(1));
}

#[tokio::test]
async fn refresh_on_every_request_keeps_serving_the_slow_server() {
    let dispatcher = Dispatcher::new(
        EchoBackend::default().with_delay("b.test", Duration::from_millis(5)),
        vec![server("http://a.test"), server("http://b.test")],
        &balancer(
            Metrics::Ewma {
                window_ms: 1000,
                scaling: 1.0,
            },
            0,
        ),
    )
    .unwrap();

    let mut slow_hits = 0;
    for _ in 0..44 {
        let target = dispatcher.handle(get("/")).await.unwrap().into_body();
        if host_of(&target) == "b.test" {
            slow_hits += 1;
        }
    }

    assert!(
        dispatcher.weights().get(&server("http://a.test"))
            > dispatcher.weights().get(&server("http://b.test"))
    );
    assert!(slow_hits >= 2, "slow server only got {slow_hits} of 44");
}

#[tokio::test]
async fn periodic_task_pushes_weights_until_shutdown() {
    let dispatcher = Dispatcher::new(
        EchoBackend::default(),
        vec![server("http://a.test"), server("http://b.test")],
        &balancer(
            Metrics::Periodic {
                window_ms: 40,
                epsilon: 0.5,
            },
            1000,
        ),
    )
    .unwrap();
    assert_eq!(dispatcher.strategy(), "periodic");
    assert_eq!(dispatcher.weights().get(&server("http://a.test")), Some(1));

    for _ in 0..4 {
        dispatcher.handle(get("/")).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(150)).await;

    let pushed = dispatcher.weights();
    assert!(pushed.get(&server("http://a.test")).unwrap() > 1);
    assert!(pushed.get(&server("http://b.test")).unwrap() > 1);

    assert!(dispatcher.shutdown().await);
    assert!(!dispatcher.shutdown().await);

    let frozen = dispatcher.weights();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(dispatcher.weights(), frozen);

    // manual refresh still works after the task is gone
    dispatcher.refresh_weights().unwrap();
    assert_ne!(dispatcher.weights(), frozen);
}

#[tokio::test]
async fn removed_server_leaves_no_metric_state() {
    let dispatcher = Dispatcher::new(
        EchoBackend::default(),
        vec![server("http://a.test"), server("http://b.test")],
        &balancer(
            Metrics::Periodic {
                window_ms: 60_000,
                epsilon: 0.5,
            },
            1000,
        ),
    )
    .unwrap();

    dispatcher.remove(&server("http://a.test")).unwrap();
    assert!(!dispatcher.weights().contains(&server("http://a.test")));
    for _ in 0..20 {
        let target = dispatcher.handle(get("/")).await.unwrap().into_body();
        assert_eq!(host_of(&target), "b.test");
    }
    dispatcher.refresh_weights().unwrap();
    dispatcher.shutdown().await;
}

#[test]
fn dispatch_errors_keep_their_cause() {
    let err: DispatchError<io::Error> = LbError::NoServers.into();
    assert!(matches!(err, DispatchError::Selection(LbError::NoServers)));
    assert_eq!(err.to_string(), "selection failed: no servers available");

    let err: DispatchError<io::Error> =
        DispatchError::Rewrite(LbError::InvalidEndpoint("http://a.test".to_string()));
    assert_eq!(
        err.to_string(),
        "cannot rewrite request for server: invalid endpoint 'http://a.test'"
    );
    assert!(std::error::Error::source(&err).is_some());
}
