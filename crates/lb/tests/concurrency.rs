use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use sway_lb::{
    EwmaTracker, LbError, PeriodicTracker, Selector, Server, ServerRegistry, WeightProvider,
    WeightedRoundRobin,
};

fn server(name: &str) -> Server {
    Server::parse(&format!("http://{name}.test")).unwrap()
}

fn churn(registry: &ServerRegistry, selector: &Selector, stop: &AtomicBool) {
    let stable = [server("a"), server("b")];

    thread::scope(|s| {
        for worker in 0..2 {
            s.spawn(move || {
                let name = format!("churn-{worker}");
                while !stop.load(Ordering::Relaxed) {
                    registry.upsert(server(&name));
                    registry.remove(&server(&name)).unwrap();
                }
            });
        }

        for _ in 0..4 {
            s.spawn(|| {
                while !stop.load(Ordering::Relaxed) {
                    match selector.next() {
                        Ok(picked) => assert!(picked.host().ends_with(".test")),
                        Err(err) => panic!("selection failed with stable servers: {err}"),
                    }
                }
            });
        }

        s.spawn(|| {
            while !stop.load(Ordering::Relaxed) {
                registry.recompute();
            }
        });

        thread::sleep(Duration::from_millis(200));
        stop.store(true, Ordering::Relaxed);
    });

    assert_eq!(registry.list(), stable.to_vec());
    for _ in 0..50 {
        let picked = selector.next().unwrap();
        assert!(stable.contains(&picked), "picked removed server {picked}");
    }
}

#[test]
fn round_robin_survives_churn() {
    let selector = Arc::new(Selector::RoundRobin(WeightedRoundRobin::default()));
    let registry = ServerRegistry::new(selector.clone(), None);
    registry.upsert(server("a"));
    registry.upsert(server("b"));

    churn(&registry, &selector, &AtomicBool::new(false));
}

#[test]
fn ewma_weights_survive_churn() {
    let tracker = Arc::new(EwmaTracker::new(Duration::from_secs(1), 1.0).unwrap());
    let selector = Arc::new(Selector::RoundRobin(WeightedRoundRobin::default()));
    let registry = ServerRegistry::new(selector.clone(), Some(tracker.clone()));
    registry.upsert(server("a"));
    registry.upsert(server("b"));

    let stop = AtomicBool::new(false);
    thread::scope(|s| {
        s.spawn(|| {
            let mut sample = 1.0;
            while !stop.load(Ordering::Relaxed) {
                tracker.observe(&server("a"), sample, Instant::now());
                tracker.observe(&server("churn-0"), sample, Instant::now());
                sample = if sample > 100.0 { 1.0 } else { sample * 2.0 };
            }
        });
        churn(&registry, &selector, &stop);
    });

    assert!(tracker.average(&server("churn-0")).is_none());
    assert!(tracker.average(&server("churn-1")).is_none());
    assert_eq!(tracker.weights().len(), 2);
}

#[test]
fn periodic_chooser_survives_churn() {
    let tracker = Arc::new(PeriodicTracker::new(Duration::from_secs(60), 0.5).unwrap());
    let selector = Arc::new(Selector::Random(tracker.chooser()));
    let registry = ServerRegistry::new(selector.clone(), Some(tracker.clone()));
    registry.upsert(server("a"));
    registry.upsert(server("b"));

    let stop = AtomicBool::new(false);
    thread::scope(|s| {
        s.spawn(|| {
            while !stop.load(Ordering::Relaxed) {
                tracker.record(&server("a"), Duration::from_millis(3));
                tracker.record(&server("churn-1"), Duration::from_millis(9));
                // the accumulators and the chooser always agree
                assert_eq!(tracker.recalculate(), Ok(()));
            }
        });
        churn(&registry, &selector, &stop);
    });

    assert!(tracker.recalculation_count() > 0);
    assert!(tracker.accumulator(&server("churn-0")).is_none());
    assert_eq!(tracker.chooser().len(), 2);
    assert!(!tracker.chooser().contains(&server("churn-1")));
}

#[test]
fn emptied_registry_reports_no_servers() {
    let tracker = Arc::new(PeriodicTracker::new(Duration::from_secs(60), 0.5).unwrap());
    let selector = Arc::new(Selector::Random(tracker.chooser()));
    let registry = ServerRegistry::new(selector.clone(), Some(tracker.clone()));

    let names: Vec<String> = (0..8).map(|i| format!("s{i}")).collect();
    thread::scope(|s| {
        for name in &names {
            let registry = &registry;
            s.spawn(move || {
                registry.upsert(server(name));
            });
        }
    });
    assert_eq!(registry.len(), 8);
    assert_eq!(tracker.chooser().len(), 8);

    thread::scope(|s| {
        for name in &names {
            let registry = &registry;
            s.spawn(move || registry.remove(&server(name)).unwrap());
        }
    });

    assert!(registry.is_empty());
    assert_eq!(selector.next(), Err(LbError::NoServers));
    assert_eq!(tracker.recalculate(), Ok(()));
}
