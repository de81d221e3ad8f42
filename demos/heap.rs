use anyhow::{Context, Result};
use brkheap::{Heap, Region, ReservedRegion};
use log::info;

/// Prints the registry, one block per line, followed by the totals.
fn print_blocks<R: Region>(
  heap: &Heap<R>,
  label: &str,
) {
  println!("\n[{label}] break = {:#x}", heap.region().len());

  for block in heap.blocks() {
    println!(
      "  header {:#06x}  payload {:#06x}  size {:>5}  extent {:>5}  {}",
      block.offset,
      block.payload,
      block.size,
      block.extent,
      if block.is_free { "free" } else { "used" },
    );
  }

  let stats = heap.stats();
  println!(
    "  {} blocks ({} free), {} live bytes, {} free bytes, {} grown",
    stats.blocks, stats.free_blocks, stats.live_bytes, stats.free_bytes, stats.grown
  );
}

fn main() -> Result<()> {
  if std::env::var_os("RUST_LOG").is_none() {
    unsafe { std::env::set_var("RUST_LOG", "brkheap=trace") };
  }
  pretty_env_logger::init();

  let region = ReservedRegion::reserve(64 * 1024).context("reserving the heap region")?;
  info!("reserved {} bytes at {:?}", region.capacity(), region.base());

  let mut heap = Heap::new(region);

  // --------------------------------------------------------------------
  // 1) Two allocations grow the region one block at a time.
  // --------------------------------------------------------------------
  let a = heap.allocate(100).context("allocating a")?;
  let b = heap.allocate(50).context("allocating b")?;
  print_blocks(&heap, "allocate 100, allocate 50");

  // --------------------------------------------------------------------
  // 2) Releasing `a` leaves a free hole in front of `b`.
  // --------------------------------------------------------------------
  heap.release(Some(a));
  print_blocks(&heap, "release a");

  // --------------------------------------------------------------------
  // 3) First fit lands in the hole and splits off the unused tail.
  // --------------------------------------------------------------------
  let c = heap.allocate(60).context("allocating c")?;
  print_blocks(&heap, "allocate 60");
  println!("  c == a? {}", c == a);

  // --------------------------------------------------------------------
  // 4) Growing `b` moves it; its old block merges with the free tail.
  // --------------------------------------------------------------------
  heap.payload_mut(b).fill(0xAB);
  let b = heap.resize(Some(b), 200).context("resizing b")?;
  print_blocks(&heap, "resize b to 200");
  println!(
    "  first 50 bytes preserved? {}",
    heap.payload(b)[..50].iter().all(|&byte| byte == 0xAB)
  );

  // --------------------------------------------------------------------
  // 5) Shrinking in place hands the tail back to the registry.
  // --------------------------------------------------------------------
  heap.resize(Some(b), 20).context("shrinking b")?;
  print_blocks(&heap, "resize b to 20");

  // --------------------------------------------------------------------
  // 6) Release everything: the registry collapses to one free block.
  // --------------------------------------------------------------------
  heap.release(Some(c));
  heap.release(Some(b));
  print_blocks(&heap, "release all");

  heap.check().context("heap invariants")?;
  info!("registry is consistent");

  Ok(())
}
