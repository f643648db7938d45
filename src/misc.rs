//! Small shared types used throughout the crate.

/// The index of a method argument (`Arg0`..`Arg6`, so `0..=6`).
pub type ArgNum = u8;
/// The index of a method local variable (`Local0`..`Local7`, so `0..=7`).
pub type LocalNum = u8;

/// A monotonically increasing id, assigned to every object when it's created. Used as part of
/// the namespace's `(parent_id, name) -> object` lookup key, and for identifying mutexes on a
/// state's mutex stack without needing `PartialEq` on the object's payload.
pub type ObjectId = u64;

pub(crate) fn next_object_id() -> ObjectId {
    use core::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}
