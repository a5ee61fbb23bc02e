use std::ptr::NonNull;

use brkalloc::Heap;

fn log_alloc(addr: Option<NonNull<u8>>, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {:?}", addr.map(NonNull::as_ptr));
}

fn main() {
    let mut heap = Heap::new();

    unsafe {
        let a = heap.allocate(8);
        log_alloc(a, 8);

        let b = heap.allocate(1024);
        log_alloc(b, 1024);

        // Large enough to bypass the break region entirely.
        let c = heap.allocate(200_000);
        log_alloc(c, 200_000);

        println!("{:#?}", heap.stats());

        println!("Deallocating everything...");
        heap.free(a);
        heap.free(b);
        heap.free(c);

        println!("{:#?}", heap.stats());
    }
}
