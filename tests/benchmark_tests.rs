//! Performance benchmarks for the hot paths of the session layer

use client::queue::MessageQueue;
use client::{LatencyHistory, ServerRoster};
use shared::{decode_packet, encode_packet, Packet, ServerAddress};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Benchmarks packet encoding and decoding
#[test]
fn benchmark_packet_codec() {
    let packets = vec![
        Packet::Ping { id: 12345 },
        Packet::KeepAliveResponse { player_count: 16 },
        Packet::Custom {
            id: 30000,
            payload: vec![7u8; 512],
        },
    ];

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        for packet in &packets {
            let frame = encode_packet(packet).unwrap();
            let decoded = decode_packet(&frame).unwrap();
            assert_eq!(decoded.id(), packet.id());
        }
    }

    let duration = start.elapsed();
    println!(
        "Packet codec: {} packets in {:?} ({:.2} μs/packet)",
        iterations * packets.len(),
        duration,
        duration.as_micros() as f64 / (iterations * packets.len()) as f64
    );

    assert!(duration.as_secs() < 2);
}

/// Benchmarks the outbound queue under concurrent producers
#[test]
fn benchmark_message_queue_throughput() {
    let queue = Arc::new(MessageQueue::new());
    let producers = 4;
    let per_producer = 25_000;

    let start = Instant::now();

    let handles: Vec<_> = (0..producers)
        .map(|p| {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                for i in 0..per_producer {
                    queue.push((p, i));
                }
            })
        })
        .collect();

    let mut drained = Vec::with_capacity(producers * per_producer);
    while drained.len() < producers * per_producer {
        drained.extend(queue.pop_all());
        std::thread::yield_now();
    }

    for handle in handles {
        handle.join().unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Message queue: {} items in {:?}",
        drained.len(),
        duration
    );

    // Each producer's items come out in the order they went in
    for p in 0..producers {
        let own: Vec<usize> = drained
            .iter()
            .filter(|(producer, _)| *producer == p)
            .map(|(_, i)| *i)
            .collect();
        assert!(own.windows(2).all(|w| w[0] < w[1]));
    }
    assert!(duration.as_secs() < 5);
}

/// Benchmarks waking a waiting consumer
#[test]
fn benchmark_queue_wakeup() {
    let queue = Arc::new(MessageQueue::new());
    let iterations = 1_000;

    let start = Instant::now();
    tokio_test::block_on(async {
        for i in 0..iterations {
            queue.push(i);
            assert!(queue.wait_for_messages(Duration::from_secs(1)).await);
            assert_eq!(queue.pop(), Some(i));
        }
    });

    let duration = start.elapsed();
    println!("Queue wakeup: {} round trips in {:?}", iterations, duration);
    assert!(duration.as_secs() < 2);
}

/// Benchmarks issuing and resolving probes across a large roster
#[test]
fn benchmark_probe_bookkeeping() {
    let roster = ServerRoster::default();
    let servers = 500;

    roster.load((0..servers).map(|i| {
        (
            format!("server-{}", i),
            ServerAddress::new("127.0.0.1", 20000 + i as u16),
        )
    }));

    let rounds = 10;
    let start = Instant::now();

    for _ in 0..rounds {
        let mut issued = Vec::with_capacity(servers);
        for id in roster.get_all_addresses().keys() {
            issued.push(roster.add_pending_probe(id).unwrap());
        }
        for probe_id in issued {
            assert!(roster.record_probe_response(probe_id, 3));
        }
    }

    let duration = start.elapsed();
    println!(
        "Probe bookkeeping: {} probes in {:?} ({:.2} μs/probe)",
        servers * rounds,
        duration,
        duration.as_micros() as f64 / (servers * rounds) as f64
    );

    assert_eq!(roster.get_latency_history("server-0").unwrap().len(), rounds);
    assert!(duration.as_secs() < 5);
}

/// Benchmarks latency statistics over a full history
#[test]
fn benchmark_latency_stats() {
    let mut history = LatencyHistory::new(100);
    for i in 0..100 {
        history.push(Duration::from_millis(20 + i % 15));
    }

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let stats = history.stats();
        assert_eq!(stats.samples, 100);
    }

    let duration = start.elapsed();
    println!(
        "Latency stats: {} iterations in {:?}",
        iterations, duration
    );
    assert!(duration.as_secs() < 2);
}
