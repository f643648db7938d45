//! AML `Mutex` objects, per-method-invocation mutex stacks, and sync-level discipline (§4.4).
//!
//! `SimpleLock` is the crate's own lightweight spinlock, used for AML mutexes, the "global
//! lock", and serialized methods' per-method mutex. It's built on a bare `AtomicBool` rather
//! than `spin::Mutex`, because AML's `Acquire`/`Release` opcodes acquire and release from
//! *different* call sites (potentially different stack frames entirely), so we can't rely on a
//! guard's lifetime to release it - the same shape the reference C implementation's
//! `mutex_acquire_timeout`/`mutex_release` pair has.

use crate::{object::ObjectHandle, AmlError, Handler};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

pub struct SimpleLock {
    locked: AtomicBool,
}

impl SimpleLock {
    pub const fn new() -> SimpleLock {
        SimpleLock { locked: AtomicBool::new(false) }
    }

    /// Attempts to acquire the lock without blocking. Returns whether it was acquired.
    pub fn try_lock(&self) -> bool {
        self.locked.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed).is_ok()
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Default for SimpleLock {
    fn default() -> SimpleLock {
        SimpleLock::new()
    }
}

/// Sentinel AML `Acquire` timeout value meaning "never time out" (§4.4).
pub const NEVER_TIMEOUT: u16 = 0xFFFF;

const POLL_INTERVAL_US: u64 = 100;

/// Busy-waits (via [`Handler::stall`]) for `lock`, for up to `timeout_ms` milliseconds. Returns
/// `true` if the lock was acquired, `false` on timeout. `timeout_ms == 0` tries exactly once;
/// `timeout_ms == NEVER_TIMEOUT` waits indefinitely.
pub fn acquire_with_timeout(lock: &SimpleLock, handler: &dyn Handler, timeout_ms: u16) -> bool {
    if lock.try_lock() {
        return true;
    }
    if timeout_ms == 0 {
        return false;
    }

    let never = timeout_ms == NEVER_TIMEOUT;
    let budget_us = timeout_ms as u64 * 1000;
    let mut elapsed_us = 0u64;

    loop {
        handler.stall(POLL_INTERVAL_US);
        elapsed_us += POLL_INTERVAL_US;
        if lock.try_lock() {
            return true;
        }
        if !never && elapsed_us >= budget_us {
            return false;
        }
    }
}

struct MutexStackEntry {
    mutex: ObjectHandle,
    sync_level: u8,
}

/// A method-execution state's private stack of currently-held AML mutexes (§4.4, §5 "per-state
/// mutex stack: owned by the state; not shared").
#[derive(Default)]
pub struct MutexStack {
    entries: Vec<MutexStackEntry>,
}

impl MutexStack {
    pub fn new() -> MutexStack {
        MutexStack { entries: Vec::new() }
    }

    pub fn current_sync_level(&self) -> u8 {
        self.entries.last().map_or(0, |e| e.sync_level)
    }

    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    fn position_of(&self, mutex: &ObjectHandle) -> Option<usize> {
        self.entries.iter().position(|e| alloc::sync::Arc::ptr_eq(&e.mutex, mutex))
    }

    /// Acquires `mutex`, honouring the sync-level discipline: a holder may only acquire mutexes
    /// whose sync level is `>=` the current top of stack. Returns `Ok(0)` on success, `Ok(1)` on
    /// timeout, or an error (`MutexOrder` for a too-low sync level, or whatever the object
    /// actually being a mutex check raises).
    pub fn acquire(&mut self, handler: &dyn Handler, mutex: ObjectHandle, timeout_ms: u16) -> Result<u8, AmlError> {
        let sync_level = match &*mutex.data.lock() {
            crate::object::ObjectData::Mutex(m) => m.sync_level,
            _ => return Err(AmlError::OperandType),
        };

        if self.position_of(&mutex).is_some() {
            // Re-acquisition of an already-held mutex is a no-op (§4.4).
            return Ok(0);
        }

        if sync_level < self.current_sync_level() {
            return Err(AmlError::MutexOrder);
        }

        let lock = match &*mutex.data.lock() {
            crate::object::ObjectData::Mutex(m) => m.lock.clone(),
            _ => return Err(AmlError::OperandType),
        };

        if !acquire_with_timeout(&lock, handler, timeout_ms) {
            return Ok(1);
        }

        self.entries.push(MutexStackEntry { mutex, sync_level });
        Ok(0)
    }

    /// Releases `mutex`. It must be the most-recently-acquired mutex still held (LIFO); releasing
    /// a mutex that's held but not on top fails with `MutexOrder`, and releasing one that isn't
    /// held at all fails with `NotOwner`.
    pub fn release(&mut self, mutex: &ObjectHandle) -> Result<(), AmlError> {
        match self.entries.last() {
            Some(top) if alloc::sync::Arc::ptr_eq(&top.mutex, mutex) => {
                let entry = self.entries.pop().unwrap();
                if let crate::object::ObjectData::Mutex(m) = &*entry.mutex.data.lock() {
                    m.lock.unlock();
                }
                Ok(())
            }
            _ if self.position_of(mutex).is_some() => Err(AmlError::MutexOrder),
            _ => Err(AmlError::NotOwner),
        }
    }

    /// Releases every mutex still held, in LIFO order, logging a diagnostic for each - used when
    /// a method returns without having released everything it acquired (§4.3 step 7).
    pub fn release_all_on_exit(&mut self) {
        while let Some(entry) = self.entries.pop() {
            log::warn!("method exited with AML mutex {} still held; force-releasing", entry.mutex.id);
            if let crate::object::ObjectData::Mutex(m) = &*entry.mutex.data.lock() {
                m.lock.unlock();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{MutexData, ObjectData, ObjectNode};
    use crate::test_utils::TestHandler;
    use alloc::sync::Arc;

    fn make_mutex(sync_level: u8) -> ObjectHandle {
        ObjectNode::new(ObjectData::Mutex(MutexData { sync_level, lock: Arc::new(SimpleLock::new()) }))
    }

    #[test]
    fn acquire_then_release_restores_depth() {
        let handler = TestHandler::new();
        let mut stack = MutexStack::new();
        let m = make_mutex(5);
        assert_eq!(stack.acquire(&handler, m.clone(), NEVER_TIMEOUT).unwrap(), 0);
        assert_eq!(stack.depth(), 1);
        stack.release(&m).unwrap();
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn lower_sync_level_is_rejected() {
        let handler = TestHandler::new();
        let mut stack = MutexStack::new();
        let high = make_mutex(5);
        let low = make_mutex(3);
        assert_eq!(stack.acquire(&handler, high, NEVER_TIMEOUT).unwrap(), 0);
        assert_eq!(stack.acquire(&handler, low, NEVER_TIMEOUT).unwrap_err(), AmlError::MutexOrder);
    }

    #[test]
    fn timeout_zero_on_held_mutex_returns_one() {
        let handler = TestHandler::new();
        let lock = SimpleLock::new();
        assert!(lock.try_lock());
        assert!(!acquire_with_timeout(&lock, &handler, 0));
    }

    #[test]
    fn out_of_order_release_fails() {
        let handler = TestHandler::new();
        let mut stack = MutexStack::new();
        let a = make_mutex(1);
        let b = make_mutex(2);
        stack.acquire(&handler, a.clone(), NEVER_TIMEOUT).unwrap();
        stack.acquire(&handler, b, NEVER_TIMEOUT).unwrap();
        assert_eq!(stack.release(&a).unwrap_err(), AmlError::MutexOrder);
    }
}
