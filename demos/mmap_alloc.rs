use firstfit::{HEADER_SIZE, MemAlloc, Origin};

fn main() {
    env_logger::init();

    let allocator = MemAlloc::new();
    let page_size = allocator.page_size();

    // Header plus payload just over a page: two pages get mapped and the
    // unused tail of the second one becomes a free block.
    let size = page_size + 100;
    let block1 = allocator.allocate(size).expect("out of memory");
    println!("{size} bytes at {block1:?} (header is {HEADER_SIZE} bytes)");

    for block in allocator.blocks() {
        println!("{block:?}");
    }

    // Small requests are served from the mapped leftover first.
    let block2 = allocator.allocate(32).expect("out of memory");
    let reused = allocator
        .blocks()
        .iter()
        .any(|b| b.payload == block2.as_ptr() as usize && b.origin == Origin::Mapped);
    println!("32 bytes at {block2:?}, inside the mapping: {reused}");

    println!("{:?}", allocator.stats());
}
