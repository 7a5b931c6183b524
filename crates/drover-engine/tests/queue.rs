// MPSC queue semantics: FIFO per producer, capacity, shutdown drain.

use std::sync::Arc;
use std::time::Duration;

use drover_engine::RequestQueue;

#[test]
fn fifo_for_a_single_producer() {
    let queue = RequestQueue::new(0);
    for i in 0..5 {
        assert!(queue.push(i));
    }
    for i in 0..5 {
        assert_eq!(queue.pop(), Some(i));
    }
}

#[test]
fn bounded_queue_rejects_when_full() {
    let queue = RequestQueue::new(2);
    assert!(queue.push(1));
    assert!(queue.push(2));
    assert!(!queue.push(3));

    assert_eq!(queue.pop(), Some(1));
    assert!(queue.push(3));
}

#[test]
fn push_after_shutdown_fails_but_queued_items_drain() {
    let queue = RequestQueue::new(0);
    assert!(queue.push("a"));
    assert!(queue.push("b"));
    queue.shutdown();

    assert!(!queue.push("c"));
    assert!(queue.is_shutdown());

    // No lost requests on clean shutdown.
    assert_eq!(queue.pop(), Some("a"));
    assert_eq!(queue.pop(), Some("b"));
    assert_eq!(queue.pop(), None);
}

#[test]
fn pop_timeout_expires_empty() {
    let queue: RequestQueue<u32> = RequestQueue::new(0);
    let started = std::time::Instant::now();
    assert_eq!(queue.pop_timeout(Duration::from_millis(30)), None);
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[test]
fn pop_timeout_returns_item_pushed_while_waiting() {
    let queue = Arc::new(RequestQueue::new(0));
    let producer = {
        let queue = Arc::clone(&queue);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            queue.push(7u32);
        })
    };

    assert_eq!(queue.pop_timeout(Duration::from_secs(5)), Some(7));
    producer.join().unwrap();
}

#[test]
fn blocking_pop_wakes_on_shutdown() {
    let queue: Arc<RequestQueue<u32>> = Arc::new(RequestQueue::new(0));
    let consumer = {
        let queue = Arc::clone(&queue);
        std::thread::spawn(move || queue.pop())
    };

    std::thread::sleep(Duration::from_millis(20));
    queue.shutdown();
    assert_eq!(consumer.join().unwrap(), None);
}

#[test]
fn concurrent_producers_lose_nothing() {
    let queue = Arc::new(RequestQueue::new(0));
    let mut producers = Vec::new();
    for p in 0..4 {
        let queue = Arc::clone(&queue);
        producers.push(std::thread::spawn(move || {
            for i in 0..50 {
                assert!(queue.push(p * 100 + i));
            }
        }));
    }
    for producer in producers {
        producer.join().unwrap();
    }

    let mut seen = Vec::new();
    while let Some(item) = queue.pop_timeout(Duration::from_millis(10)) {
        seen.push(item);
    }
    assert_eq!(seen.len(), 200);

    // FIFO holds per producer.
    for p in 0..4 {
        let of_producer: Vec<i32> = seen.iter().copied().filter(|v| v / 100 == p).collect();
        let mut sorted = of_producer.clone();
        sorted.sort();
        assert_eq!(of_producer, sorted);
    }
}

#[test]
fn clear_discards_pending_items() {
    let queue = RequestQueue::new(0);
    queue.push(1);
    queue.push(2);
    assert_eq!(queue.len(), 2);

    queue.clear();
    assert!(queue.is_empty());
}
