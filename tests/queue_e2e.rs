#![allow(missing_docs)]
//! End-to-end scenario for the bounded blocking queue: two producers and
//! three consumers over a capacity-2 queue, with conservation and
//! per-producer FIFO checks.

use interlock::queue::BoundedQueue;
use interlock::test_utils::init_test_logging;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;

const PRODUCERS: usize = 2;
const ITEMS_PER_PRODUCER: usize = 9;
const CONSUMERS: usize = 3;
const ITEMS_PER_CONSUMER: usize = PRODUCERS * ITEMS_PER_PRODUCER / CONSUMERS;

/// S3 — capacity 2, 2 producers × 9 items, 3 consumers × 6 items. After
/// all threads join: 18 items consumed, each exactly once, queue empty.
#[test]
fn producers_and_consumers_conserve_items() {
    init_test_logging();

    let queue = Arc::new(BoundedQueue::new(2));
    let consumed = Arc::new(Mutex::new(Vec::new()));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..ITEMS_PER_PRODUCER {
                    // Encode producer identity and sequence in the item.
                    queue.produce((p + 1) * 1000 + i);
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let consumed = Arc::clone(&consumed);
            thread::spawn(move || {
                for _ in 0..ITEMS_PER_CONSUMER {
                    let item = queue.consume();
                    consumed.lock().unwrap().push(item);
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    for consumer in consumers {
        consumer.join().unwrap();
    }

    let consumed = consumed.lock().unwrap();
    assert_eq!(consumed.len(), PRODUCERS * ITEMS_PER_PRODUCER);
    assert!(queue.is_empty());

    // Every produced item was consumed exactly once.
    let unique: HashSet<usize> = consumed.iter().copied().collect();
    assert_eq!(unique.len(), consumed.len());
    for p in 0..PRODUCERS {
        for i in 0..ITEMS_PER_PRODUCER {
            assert!(unique.contains(&((p + 1) * 1000 + i)));
        }
    }
}

/// With a single consumer, each producer's items come out in the order
/// that producer pushed them.
#[test]
fn per_producer_order_is_preserved() {
    init_test_logging();

    let queue = Arc::new(BoundedQueue::new(2));
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..ITEMS_PER_PRODUCER {
                    queue.produce((p + 1) * 1000 + i);
                }
            })
        })
        .collect();

    let mut seen: Vec<usize> = Vec::new();
    for _ in 0..PRODUCERS * ITEMS_PER_PRODUCER {
        seen.push(queue.consume());
    }
    for producer in producers {
        producer.join().unwrap();
    }

    for p in 0..PRODUCERS {
        let tag = (p + 1) * 1000;
        let from_p: Vec<usize> = seen
            .iter()
            .copied()
            .filter(|item| (tag..tag + 1000).contains(item))
            .collect();
        let mut sorted = from_p.clone();
        sorted.sort_unstable();
        assert_eq!(from_p, sorted, "producer {p} items reordered");
    }
    assert!(queue.is_empty());
}
