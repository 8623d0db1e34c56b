use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Instant;

use denrei::config::EventManagerConfig;
use denrei::event_manager::EventManager;
use denrei::message::Value;
use denrei::subscriber::SubscriberRef;
use tokio::time::{sleep, Duration};

const SEND_COUNT: usize = 100_000;
const DELIVERY_FLOOR: usize = 90_000;
const BUDGET: Duration = Duration::from_secs(10);

/// Batching/backpressure budget under load: 100k sends on one channel must
/// put at least 90k through to the consumer inside ten seconds.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bulk_send_throughput() {
    let events = EventManager::start(&EventManagerConfig::default())
        .await
        .unwrap();

    let consumed = Arc::new(AtomicUsize::new(0));
    let count = consumed.clone();
    events
        .register(
            "rick",
            SubscriberRef::from_fn(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();
    events.flush().await.unwrap();
    sleep(Duration::from_millis(100)).await;

    let start = Instant::now();
    for _ in 0..SEND_COUNT {
        events.send("rick", Value::from("PERF")).await.unwrap();
    }
    events.flush().await.unwrap();

    while consumed.load(Ordering::SeqCst) < DELIVERY_FLOOR && start.elapsed() < BUDGET {
        sleep(Duration::from_millis(50)).await;
    }
    let elapsed = start.elapsed();
    let delivered = consumed.load(Ordering::SeqCst);

    assert!(
        delivered >= DELIVERY_FLOOR,
        "delivered only {} of {} within {:?}",
        delivered,
        SEND_COUNT,
        BUDGET
    );
    assert!(
        elapsed <= BUDGET,
        "took {:?} to deliver {} messages",
        elapsed,
        delivered
    );

    events.stop().await.unwrap();
}
