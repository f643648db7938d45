//! An in-memory [`Handler`] for unit tests, so parser/evaluator tests don't need a real kernel's
//! I/O ports or physical memory behind them (§4.6 of the design notes; mirrors the teacher
//! crate's own `test_utils`).

use crate::{object::RegionSpace, AmlError, Handler};
use core::sync::atomic::{AtomicU64, Ordering};
use hashbrown::HashMap;
use spin::Mutex;

/// Backs every operation region with a single flat `(space, offset) -> value` map, regardless of
/// width - reads of a never-written offset return 0, matching freshly-zeroed memory.
pub struct TestHandler {
    regions: Mutex<HashMap<(u8, u64), u64>>,
    stall_calls: AtomicU64,
    sleep_calls: AtomicU64,
}

impl TestHandler {
    pub fn new() -> TestHandler {
        TestHandler { regions: Mutex::new(HashMap::new()), stall_calls: AtomicU64::new(0), sleep_calls: AtomicU64::new(0) }
    }

    pub fn stall_calls(&self) -> u64 {
        self.stall_calls.load(Ordering::Relaxed)
    }

    pub fn sleep_calls(&self) -> u64 {
        self.sleep_calls.load(Ordering::Relaxed)
    }
}

impl Default for TestHandler {
    fn default() -> TestHandler {
        TestHandler::new()
    }
}

impl Handler for TestHandler {
    fn region_read(&self, space: RegionSpace, offset: u64, _bit_size: u8) -> Result<u64, AmlError> {
        Ok(*self.regions.lock().get(&(space.as_byte(), offset)).unwrap_or(&0))
    }

    fn region_write(&self, space: RegionSpace, offset: u64, _bit_size: u8, value: u64) -> Result<(), AmlError> {
        self.regions.lock().insert((space.as_byte(), offset), value);
        Ok(())
    }

    fn stall(&self, _microseconds: u64) {
        self.stall_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn sleep(&self, _milliseconds: u64) {
        self.sleep_calls.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_region_reads_as_zero() {
        let h = TestHandler::new();
        assert_eq!(h.region_read(RegionSpace::SystemMemory, 0x1000, 32).unwrap(), 0);
    }

    #[test]
    fn write_then_read_round_trips() {
        let h = TestHandler::new();
        h.region_write(RegionSpace::SystemIo, 0x20, 8, 0xAB).unwrap();
        assert_eq!(h.region_read(RegionSpace::SystemIo, 0x20, 8).unwrap(), 0xAB);
    }
}
