use lazy_static::lazy_static;
use rustpar::{CounterMap, PoolConfig, PoolManager, TaskFailure, TaskRunner};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

lazy_static! {
    // The application's shared pool. Library code never creates one itself.
    static ref POOLS: Arc<PoolManager> = Arc::new(PoolManager::new(
        PoolConfig::default().with_thread_name_prefix("rustpar-demo"),
    ));
}

enum ImportError {
    BadRecord(usize),
    Crashed(String),
}

impl std::fmt::Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportError::BadRecord(i) => write!(f, "record {} rejected", i),
            ImportError::Crashed(msg) => write!(f, "task crashed: {}", msg),
        }
    }
}

fn main() {
    println!("RustPar - Concurrency Utilities\n");

    let runner = TaskRunner::new(Arc::clone(&POOLS));

    // Example 1: Parallel computation
    println!("Example 1: Parallel computation");
    let sum = AtomicUsize::new(0);
    let num_tasks = 100;

    let start = Instant::now();
    let tasks = (0..num_tasks).map(|i| {
        let sum = &sum;
        move || {
            // Simulate some work
            let mut _local_sum = 0;
            for j in 0..1000 {
                _local_sum += j;
            }
            sum.fetch_add(i, Ordering::SeqCst);
        }
    });
    runner.run(tasks, 8);

    let expected_sum: usize = (0..num_tasks).sum();
    println!("  Executed {} tasks in {:?}", num_tasks, start.elapsed());
    println!("  Sum result: {} (expected: {})\n", sum.load(Ordering::SeqCst), expected_sum);

    // Example 2: In-flight tracking with a counter map
    println!("Example 2: Per-key in-flight tracking");
    let in_flight = CounterMap::new();
    let tasks = (0..1000).map(|i| {
        let in_flight = &in_flight;
        move || {
            let key = format!("shard-{}", i % 8);
            in_flight.add_and_get(&key, 1);
            in_flight.add_and_get(&key, -1);
        }
    });
    runner.run(tasks, 16);
    println!("  Keys left after balanced updates: {}\n", in_flight.len());

    // Example 3: Single failure reporting
    println!("Example 3: Fallible batch");
    let tasks = (0..100).map(|i| {
        move || -> Result<(), usize> {
            if i == 37 { Err(i) } else { Ok(()) }
        }
    });
    let result = runner.run_fallible(tasks, 8, |failure: TaskFailure<usize>| {
        if let Some(message) = failure.panic_message() {
            return ImportError::Crashed(message.to_string());
        }
        ImportError::BadRecord(failure.into_error().unwrap_or_default())
    });
    match result {
        Ok(()) => println!("  Batch succeeded\n"),
        Err(e) => println!("  Batch failed: {}\n", e),
    }

    // Example 4: Batches still run after shutdown
    println!("Shutting down shared pool...");
    POOLS.shutdown_and_wait();
    let done = AtomicUsize::new(0);
    let tasks = (0..10).map(|_| {
        let done = &done;
        move || {
            done.fetch_add(1, Ordering::SeqCst);
        }
    });
    runner.run(tasks, 4);
    println!("  {} tasks completed on a private pool", done.load(Ordering::SeqCst));
    println!("Done!");
}
