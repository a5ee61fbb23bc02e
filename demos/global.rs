//! Runs ordinary collection code through the [`GlobalAlloc`] adapter: every
//! Box, Vec and String below, format machinery included, allocates through
//! [`BrkAlloc`]. Single-threaded on purpose; see the adapter's safety notes.

use brkalloc::BrkAlloc;

#[global_allocator]
static ALLOCATOR: BrkAlloc = BrkAlloc::new();

fn main() {
    let boxed = Box::new(0xC0FFEEu32);
    println!("boxed u32 {:#x} lives at {:p}", *boxed, boxed);

    let mut numbers = Vec::new();
    for i in 0..6 {
        numbers.push(i * i);
    }
    println!(
        "vec of {} squares (cap {}) starts at {:p}",
        numbers.len(),
        numbers.capacity(),
        numbers.as_ptr()
    );

    let greeting = String::from("allocated through the break region");
    println!("string {:?} at {:p}", greeting, greeting.as_ptr());

    // Two dropped neighbors should merge and serve one bigger request.
    let first = Box::new([0u8; 48]);
    let second = Box::new([0u8; 48]);
    let first_addr = first.as_ptr();

    drop(first);
    drop(second);

    let merged = Box::new([0u8; 112]);
    if merged.as_ptr() == first_addr {
        println!("neighbors merged: 112-byte box reused {:p}", merged.as_ptr());
    } else {
        println!(
            "no merge: expected {:p}, box landed at {:p}",
            first_addr,
            merged.as_ptr()
        );
    }

    let stats = unsafe { ALLOCATOR.stats() };
    println!(
        "break region: {} bytes over {} blocks, {} free",
        stats.break_bytes, stats.blocks, stats.free_blocks
    );
}
