// Concurrency tests: many producers, churning listeners.

use events::{
    Actor, ActorConfig, DispatchMethod, Dispatcher, DispatcherConfig, Event,
    Listenable, Priority, Routine,
};

use async_trait::async_trait;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

const PRODUCERS: usize = 8;
const EVENTS_PER_PRODUCER: usize = 1250;
const TOTAL: usize = PRODUCERS * EVENTS_PER_PRODUCER;

#[derive(Debug)]
pub struct Tracked {
    id: usize,
    drops: Arc<AtomicUsize>,
}

impl Event for Tracked {}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct Noise;

impl Event for Noise {}

/// Delivery log of one actor: `None` closes a drain pass.
type Passes = Arc<Mutex<Vec<Option<(DispatchMethod, Priority)>>>>;

// Runs after every drain and marks the end of the pass.
struct PassMarker(Passes);

#[async_trait]
impl Routine for PassMarker {
    async fn on_loop(&mut self) {
        self.0.lock().push(None);
    }
}

/// Stacks before queues; within each, primary then alternate buffer, each of them
/// from high to low priority.
fn assert_drain_order(pass: &[(DispatchMethod, Priority)]) {
    let first_queue = pass
        .iter()
        .position(|(method, _)| *method == DispatchMethod::Queue)
        .unwrap_or(pass.len());
    assert!(
        pass[first_queue..]
            .iter()
            .all(|(method, _)| *method == DispatchMethod::Queue),
        "stacked event delivered after a queued one"
    );
    for run in [&pass[..first_queue], &pass[first_queue..]] {
        // At most one rise in priority: the switch to the alternate buffer.
        let rises = run.windows(2).filter(|pair| pair[1].1 > pair[0].1).count();
        assert!(rises <= 1, "priority order broken within a pass: {run:?}");
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn eventually<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(20), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_event_delivered_once() {
    init_logging();
    let token = CancellationToken::new();
    let dispatcher =
        Dispatcher::spawn(DispatcherConfig::default(), token.clone()).unwrap();
    let passes: Passes = Arc::new(Mutex::new(Vec::new()));
    let actor = Actor::builder(ActorConfig::new("sink"))
        .routine(PassMarker(passes.clone()))
        .spawn(&dispatcher, token.child_token())
        .unwrap();

    let seen = Arc::new(Mutex::new(HashSet::new()));
    let duplicates = Arc::new(AtomicUsize::new(0));
    let ids = seen.clone();
    let twice = duplicates.clone();
    let log = passes.clone();
    let _handle = actor.listen::<Tracked, _>(move |tracked, method, priority| {
        log.lock().push(Some((method, priority)));
        if !ids.lock().insert(tracked.id) {
            twice.fetch_add(1, Ordering::SeqCst);
        }
    });

    let drops = Arc::new(AtomicUsize::new(0));
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let dispatcher = dispatcher.clone();
            let drops = drops.clone();
            std::thread::spawn(move || {
                for n in 0..EVENTS_PER_PRODUCER {
                    let id = producer * EVENTS_PER_PRODUCER + n;
                    let priority = Priority::DESCENDING[id % Priority::COUNT];
                    let event = Tracked {
                        id,
                        drops: drops.clone(),
                    };
                    if id % 2 == 0 {
                        dispatcher.queue(event, priority);
                    } else {
                        dispatcher.stack(event, priority);
                    }
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    eventually(|| seen.lock().len() == TOTAL).await;
    eventually(|| drops.load(Ordering::SeqCst) == TOTAL).await;
    assert_eq!(duplicates.load(Ordering::SeqCst), 0);

    let passes = passes.lock().clone();
    let mut delivered = 0;
    for pass in passes.split(Option::is_none) {
        let pass: Vec<_> = pass.iter().flatten().copied().collect();
        delivered += pass.len();
        assert_drain_order(&pass);
    }
    assert_eq!(delivered, TOTAL);

    actor.shutdown().await.unwrap();
    dispatcher.shutdown().await.unwrap();
    assert_eq!(drops.load(Ordering::SeqCst), TOTAL);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_listener_churn_during_delivery() {
    init_logging();
    let token = CancellationToken::new();
    let dispatcher =
        Dispatcher::spawn(DispatcherConfig::default(), token.clone()).unwrap();
    let actors: Vec<Actor> = (0..3)
        .map(|n| {
            Actor::spawn(
                &dispatcher,
                ActorConfig::new(&format!("churn-{n}")),
                token.child_token(),
            )
            .unwrap()
        })
        .collect();

    let invoked = Arc::new(AtomicUsize::new(0));
    let counter = invoked.clone();
    let _steady = actors[0].listen::<Noise, _>(move |_, _, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let stop = Arc::new(AtomicBool::new(false));
    let churners: Vec<_> = actors
        .iter()
        .cloned()
        .map(|actor| {
            let stop = stop.clone();
            tokio::spawn(async move {
                while !stop.load(Ordering::SeqCst) {
                    let handle = actor.listen::<Noise, _>(|_, _, _| {});
                    tokio::task::yield_now().await;
                    drop(handle);
                }
            })
        })
        .collect();

    for _ in 0..2000 {
        dispatcher.queue(Noise, Priority::Normal);
    }
    eventually(|| invoked.load(Ordering::SeqCst) == 2000).await;

    stop.store(true, Ordering::SeqCst);
    for churner in churners {
        churner.await.unwrap();
    }
    for actor in &actors {
        actor.shutdown().await.unwrap();
    }
    dispatcher.shutdown().await.unwrap();
}
