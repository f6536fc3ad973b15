//! Concurrent insert/remove churn on a small fixed-capacity set.

use auxlist::{ListError, ListSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

fn main() {
    println!("Auxlist Example");
    println!("===============\n");

    println!("Single-threaded:");
    {
        let set = ListSet::with_capacity(2);
        assert_eq!(set.insert("apple"), Ok(true));
        assert_eq!(set.insert("apple"), Ok(false));
        assert_eq!(set.insert("pear"), Ok(true));

        match set.insert("plum") {
            Err(err @ ListError::CapacityExhausted { .. }) => println!("  {err}"),
            other => panic!("unexpected {other:?}"),
        }

        assert!(set.remove("apple"));
        assert_eq!(set.insert("plum"), Ok(true));
        println!("  capacity freed by remove is reusable.");
    }

    println!("\nMulti-threaded (8 threads, 50000 ops each, 64 keys):");
    {
        const THREADS: usize = 8;
        const OPS: usize = 50_000;
        const KEYS: usize = 64;

        let set = Arc::new(ListSet::with_capacity(4 * KEYS));
        let exhausted = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();

        let handles: Vec<_> = (0..THREADS)
            .map(|tid| {
                let set = set.clone();
                let exhausted = exhausted.clone();
                thread::spawn(move || {
                    for i in 0..OPS {
                        let key = (tid * 31 + i * 7) % KEYS;
                        match i % 3 {
                            0 => {
                                if set.insert(key).is_err() {
                                    exhausted.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                            1 => {
                                set.remove(&key);
                            }
                            _ => {
                                set.contains(&key);
                            }
                        }
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let elapsed = start.elapsed();
        let total = THREADS * OPS;
        println!("  {} operations in {:?}", total, elapsed);
        println!(
            "  Throughput: {:.0} ops/sec",
            total as f64 / elapsed.as_secs_f64()
        );
        // 64 keys never fill a pool of 256.
        let rejections = exhausted.load(Ordering::Relaxed);
        println!("  Capacity rejections: {rejections}");
        assert_eq!(rejections, 0);

        let mut set = match Arc::try_unwrap(set) {
            Ok(set) => set,
            Err(_) => unreachable!("all workers joined"),
        };
        println!("  {:?}", set.stats());
    }
}
