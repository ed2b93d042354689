use firstfit::MemAlloc;

fn log_alloc(addr: *mut u8, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    env_logger::init();

    let allocator = MemAlloc::new();

    let addr1 = allocator.allocate(8).expect("out of memory");
    log_alloc(addr1.as_ptr(), 8);

    let addr2 = allocator.allocate(8).expect("out of memory");
    log_alloc(addr2.as_ptr(), 8);

    let addr3 = allocator.zero_allocate(4, 4).expect("out of memory");
    log_alloc(addr3.as_ptr(), 16);

    allocator.release(addr1).expect("released twice");

    // First fit: the block of addr1 is the first free one that fits.
    let addr4 = allocator.allocate(4).expect("out of memory");
    println!("Reused first block: {}", addr4 == addr1);

    allocator.release(addr2).expect("released twice");
    allocator.release(addr3).expect("released twice");
    allocator.release(addr4).expect("released twice");

    for block in allocator.blocks() {
        println!("{block:?}");
    }
}
