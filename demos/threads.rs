//! Several threads hammering one heap.

use std::thread;

use firstfit::{MemAlloc, SimulatedSource};

fn main() {
    env_logger::init();

    let heap = MemAlloc::with_source(SimulatedSource::with_page_size(4096));

    thread::scope(|scope| {
        for t in 0..4usize {
            let heap = &heap;
            scope.spawn(move || {
                let mut live = Vec::new();

                for round in 0..100 {
                    let size = 8 + (t * 31 + round * 17) % 5000;
                    live.push(heap.allocate(size).expect("out of memory"));

                    if round % 3 == 0 {
                        let ptr = live.swap_remove(0);
                        heap.release(ptr).expect("released twice");
                    }
                }

                for ptr in live {
                    heap.release(ptr).expect("released twice");
                }
            });
        }
    });

    let stats = heap.stats();
    println!("{stats:?}");
    println!(
        "break: {} bytes, mapped: {} bytes",
        heap.source().break_used(),
        heap.source().mapped_bytes()
    );
}
