//! The patch-up list (§4.3, §9): when a `NameString` can't be resolved at parse time (most
//! commonly a forward reference to an object defined later in the same table, or in an SSDT that
//! hasn't loaded yet), the parser leaves behind an `Unresolved` object instead of failing outright.
//! After each table finishes parsing, every outstanding entry is retried against the namespace as
//! it now stands. An entry that never resolves simply stays `Unresolved` forever - silently, by
//! design (§7) - and only surfaces an error if something later tries to read through it.

use crate::{
    object::{ObjectData, ObjectHandle},
    AmlContext,
};
use alloc::vec::Vec;
use spin::Mutex;

pub struct PatchupList {
    pending: Mutex<Vec<ObjectHandle>>,
}

impl PatchupList {
    pub fn new() -> PatchupList {
        PatchupList { pending: Mutex::new(Vec::new()) }
    }

    /// Registers `handle` (which must currently hold `ObjectData::Unresolved`) to be retried the
    /// next time [`PatchupList::resolve_all`] runs.
    pub fn register(&self, handle: ObjectHandle) {
        self.pending.lock().push(handle);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Retries every pending entry. Entries that resolve are mutated in place per their recorded
    /// [`crate::object::PatchAction`] and dropped from the list; entries that still don't resolve
    /// are kept for the next table.
    pub fn resolve_all(&self, ctx: &AmlContext) {
        let mut pending = self.pending.lock();
        pending.retain(|handle| {
            let (name, start_scope, action) = match &*handle.data.lock() {
                ObjectData::Unresolved(u) => (u.name.clone(), u.start_scope.clone(), u.action.clone()),
                // Something else already replaced this object's contents directly; drop it.
                _ => return false,
            };

            match ctx.namespace.search(&name, &start_scope) {
                Ok((_, target)) => {
                    let replacement = match action {
                        crate::object::PatchAction::ReplaceWithReference => ObjectData::ObjectReference(target),
                        crate::object::PatchAction::ReplaceWithCopy => target.data.lock().clone(),
                    };
                    *handle.data.lock() = replacement;
                    false
                }
                Err(_) => true,
            }
        });
    }
}

impl Default for PatchupList {
    fn default() -> PatchupList {
        PatchupList::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        name::AmlName,
        object::{ObjectNode, PatchAction, UnresolvedData},
        test_utils::TestHandler,
        DebugVerbosity,
    };
    use alloc::boxed::Box;
    use core::str::FromStr;

    #[test]
    fn forward_reference_resolves_after_target_is_added() {
        let mut ctx = AmlContext::new(Box::new(TestHandler::new()), DebugVerbosity::None);

        let unresolved = ObjectNode::new(ObjectData::Unresolved(UnresolvedData {
            name: AmlName::from_str("FOO").unwrap(),
            start_scope: AmlName::root(),
            action: PatchAction::ReplaceWithReference,
        }));
        ctx.patchups.register(unresolved.clone());
        assert_eq!(ctx.patchups.pending_count(), 1);

        let root = ctx.namespace.root();
        let token = ctx.namespace.push_overlay();
        ctx.namespace
            .add_child(
                token,
                &root,
                crate::name::NameSeg::new(*b"FOO_").unwrap(),
                ObjectNode::new(ObjectData::Integer(99)),
            )
            .unwrap();
        ctx.namespace.commit(token, ctx.sysfs());

        ctx.patchups.resolve_all(&ctx);
        assert_eq!(ctx.patchups.pending_count(), 0);
        match &*unresolved.data.lock() {
            ObjectData::ObjectReference(target) => match &*target.data.lock() {
                ObjectData::Integer(v) => assert_eq!(*v, 99),
                _ => panic!("expected integer"),
            },
            _ => panic!("expected resolved reference"),
        }
    }

    #[test]
    fn never_resolved_entry_stays_pending() {
        let ctx = AmlContext::new(Box::new(TestHandler::new()), DebugVerbosity::None);
        let unresolved = ObjectNode::new(ObjectData::Unresolved(UnresolvedData {
            name: AmlName::from_str("NOPE").unwrap(),
            start_scope: AmlName::root(),
            action: PatchAction::ReplaceWithReference,
        }));
        ctx.patchups.register(unresolved);
        ctx.patchups.resolve_all(&ctx);
        assert_eq!(ctx.patchups.pending_count(), 1);
    }
}
