//! Ring buffer, queue and bus acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - A 128-slot buffer holds 127 values and rejects the 128th
//! - A queue consumer blocks until a value arrives and never returns early
//! - Single-message receive and transaction drain yield the same sequence
//! - Run-loop callbacks can feed a queue and a bus across threads

use super::common::wait_until;
use rl_common::message::{Message, Payload};
use rl_runtime::bus::Bus;
use rl_runtime::queue::SyncQueue;
use rl_runtime::ring::RingBuffer;
use rl_runtime::run_loop::RunLoop;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_ring_holds_one_less_than_slots() {
    let mut ring: RingBuffer<Message> = RingBuffer::new();
    for i in 0..127 {
        assert!(ring.push(Message::u64(1, i)), "push {i} rejected");
    }
    assert!(!ring.push(Message::u64(1, 127)));
    assert!(ring.is_full());

    assert_eq!(ring.pull(), Some(Message::u64(1, 0)));
    assert!(ring.push(Message::u64(1, 127)));
    assert!(!ring.push(Message::u64(1, 128)));

    for i in 1..128 {
        assert_eq!(ring.pull(), Some(Message::u64(1, i)));
    }
    assert_eq!(ring.pull(), None);
}

#[test]
fn test_queue_wait_blocks_until_push() {
    let queue = Arc::new(SyncQueue::<Message>::new());
    let returned = Arc::new(AtomicBool::new(false));

    let consumer = {
        let queue = Arc::clone(&queue);
        let returned = Arc::clone(&returned);
        thread::spawn(move || {
            let msg = queue.wait();
            returned.store(true, Ordering::SeqCst);
            msg
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!returned.load(Ordering::SeqCst), "wait returned on an empty queue");

    assert!(queue.push(Message::i64(7, -3)));
    let msg = consumer.join().unwrap();
    assert_eq!(msg.label, 7);
    assert_eq!(msg.payload, Payload::I64(-3));
    assert!(queue.is_empty());
}

#[test]
fn test_queue_full_rejects_without_blocking() {
    let queue = SyncQueue::<Message>::with_capacity(4);
    assert!(queue.push(Message::u64(1, 1)));
    assert!(queue.push(Message::u64(1, 2)));
    assert!(queue.push(Message::u64(1, 3)));
    assert!(!queue.push(Message::u64(1, 4)));
    assert_eq!(queue.len(), 3);
    assert_eq!(queue.wait().as_u64(), Some(1));
}

#[test]
fn test_bus_receive_matches_transaction_drain() {
    let sent: Vec<Message> = (0..10)
        .map(|i| match i % 4 {
            0 => Message::i64(i, -i64::from(i)),
            1 => Message::u64(i, u64::from(i)),
            2 => Message::f64(i, f64::from(i) * 0.5),
            _ => Message::f32(i, 1.5),
        })
        .collect();

    let one_by_one = Bus::new();
    let batched = Bus::new();
    for msg in &sent {
        assert!(one_by_one.send(*msg));
        assert!(batched.send(*msg));
    }

    let received: Vec<Message> = std::iter::from_fn(|| one_by_one.receive()).collect();
    let drained: Vec<Message> = {
        let mut tx = batched.lock();
        let mut out = Vec::new();
        while let Some(msg) = tx.receive_fast() {
            out.push(msg);
        }
        out
    };

    assert_eq!(received, sent);
    assert_eq!(drained, sent);
}

#[test]
fn test_bus_overflow_counts_drops() {
    let bus = Bus::with_capacity(8);
    let accepted = (0..10).filter(|i| bus.send_u64(1, *i)).count();
    assert_eq!(accepted, 7);
    assert_eq!(bus.dropped(), 3);
    assert_eq!(bus.receive().and_then(|m| m.as_u64()), Some(0));
}

#[test]
fn test_run_loop_feeds_queue_and_bus() {
    let run_loop = RunLoop::new("pipeline").unwrap();
    let queue = Arc::new(SyncQueue::<Message>::new());
    let bus = Arc::new(Bus::new());

    let handle = {
        let queue = Arc::clone(&queue);
        let bus = Arc::clone(&bus);
        let mut n = 0u64;
        run_loop.register(200.0, move |dt: f64| {
            queue.push(Message::u64(1, n));
            let mut tx = bus.lock();
            tx.send(Message::u64(1, n));
            tx.send(Message::f64(2, dt));
            n += 1;
        })
    };

    for expected in 0..5 {
        let msg = queue.wait();
        assert_eq!(msg.as_u64(), Some(expected));
    }
    run_loop.unregister(handle);

    // Each transaction published its pair together, in order.
    let messages: Vec<Message> = bus.lock().drain().collect();
    assert!(messages.len() >= 10);
    assert_eq!(messages.len() % 2, 0);
    for (i, pair) in messages.chunks(2).enumerate() {
        assert_eq!(pair[0].as_u64(), Some(i as u64));
        assert_eq!(pair[1].label, 2);
        assert!(pair[1].as_f64().is_some());
    }
    assert!(wait_until(Duration::from_millis(10), || bus.lock().is_empty()));
}
