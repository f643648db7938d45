//! The namespace tree and its overlay stack (§3.3).
//!
//! The "global overlay" (index 0 of the stack) holds every object that has been durably
//! committed to the namespace. Parsing a `Scope`, `Device`, `Method` body etc. pushes a fresh
//! overlay on top; if the nested `TermList` parses successfully the overlay is committed into
//! its parent (merging bindings upward), and if it fails the overlay is discarded, unlinking
//! every object it added and leaving the namespace exactly as it was before parsing began. This
//! is what lets the parser treat "parse a scope" as an atomic, all-or-nothing operation (§3.3).

use crate::{
    name::{AmlName, NameSeg, NameStart},
    misc::ObjectId,
    object::{ObjectData, ObjectHandle, ObjectNode},
    sysfs::SysfsHandler,
    AmlError,
};
use alloc::vec::Vec;
use hashbrown::HashMap;
use spin::Mutex;

struct Overlay {
    bindings: HashMap<(ObjectId, NameSeg), ObjectHandle>,
    objects: Vec<ObjectHandle>,
}

impl Overlay {
    fn new() -> Overlay {
        Overlay { bindings: HashMap::new(), objects: Vec::new() }
    }
}

struct NamespaceInner {
    root: ObjectHandle,
    overlays: Vec<Overlay>,
}

/// The handle to the overlay pushed by [`Namespace::push_overlay`]; must be committed or
/// discarded exactly once, and only while it remains the top of the stack (nesting is
/// strictly stack-like, matching how the recursive-descent parser uses it: a scope is always
/// fully parsed, and committed or discarded, before its parent scope's parsing resumes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlayToken(usize);

/// The process-wide namespace: the tree of named objects rooted at `\`, guarded by a single
/// lock (§5). All structural mutation (creation, linking, overlay commit/discard) and any read
/// that needs a consistent view of the tree go through this lock.
pub struct Namespace {
    inner: Mutex<NamespaceInner>,
}

impl Namespace {
    pub fn new() -> Namespace {
        let root = ObjectNode::new_root();
        Namespace { inner: Mutex::new(NamespaceInner { root, overlays: alloc::vec![Overlay::new()] }) }
    }

    pub fn root(&self) -> ObjectHandle {
        self.inner.lock().root.clone()
    }

    pub fn push_overlay(&self) -> OverlayToken {
        let mut inner = self.inner.lock();
        inner.overlays.push(Overlay::new());
        OverlayToken(inner.overlays.len() - 1)
    }

    /// Looks up a direct child of `parent` named `name`, searching the overlay stack top-down as
    /// described in §3.3 ("searches `O.map`, then `O.parent.map`, etc.").
    pub fn lookup_child(&self, parent: &ObjectHandle, name: NameSeg) -> Option<ObjectHandle> {
        let inner = self.inner.lock();
        let key = (parent.id, name);
        for overlay in inner.overlays.iter().rev() {
            if let Some(obj) = overlay.bindings.get(&key) {
                return Some(obj.clone());
            }
        }
        None
    }

    /// Adds `obj` as a new named child of `parent` through the overlay at `token`, which must
    /// currently be the top of the stack. Fails with `NameCollision` if any overlay from `token`
    /// down to the global overlay already binds `(parent, name)`.
    pub fn add_child(
        &self,
        token: OverlayToken,
        parent: &ObjectHandle,
        name: NameSeg,
        obj: ObjectHandle,
    ) -> Result<ObjectHandle, AmlError> {
        let mut inner = self.inner.lock();
        assert_eq!(token.0, inner.overlays.len() - 1, "add_child on a non-top overlay");

        let key = (parent.id, name);
        if inner.overlays.iter().any(|o| o.bindings.contains_key(&key)) {
            return Err(AmlError::NameCollision(AmlName::single(name)));
        }

        obj.link(parent, name);
        let overlay = inner.overlays.last_mut().unwrap();
        overlay.bindings.insert(key, obj.clone());
        overlay.objects.push(obj.clone());
        Ok(obj)
    }

    /// Looks up an existing child of `parent` and returns it if it's one of the scope-capable
    /// types eligible for reuse (§4.2 "Named-object duplicate policy"); otherwise runs `build` and
    /// adds a new child as usual.
    pub fn add_or_reuse_scope(
        &self,
        token: OverlayToken,
        parent: &ObjectHandle,
        name: NameSeg,
        build: impl FnOnce() -> ObjectData,
    ) -> Result<ObjectHandle, AmlError> {
        if let Some(existing) = self.lookup_child(parent, name) {
            if existing.data.lock().is_scope() {
                return Ok(existing);
            }
            return Err(AmlError::NameCollision(AmlName::single(name)));
        }
        self.add_child(token, parent, name, ObjectNode::new(build()))
    }

    /// Commits the overlay at `token` (which must be the top of the stack) into its parent
    /// overlay, merging its bindings and objects upward, then pops it. Every object the overlay
    /// added is now durably named, so this is also where each one gets its `sysfs` directory -
    /// the mirror image of `discard` tearing one down for an overlay that never committed.
    pub fn commit(&self, token: OverlayToken, sysfs: &dyn SysfsHandler) {
        let mut inner = self.inner.lock();
        assert_eq!(token.0, inner.overlays.len() - 1, "commit on a non-top overlay");
        assert!(inner.overlays.len() > 1, "cannot commit the global overlay");

        let top = inner.overlays.pop().unwrap();
        for obj in &top.objects {
            obj.set_flag(crate::object::ObjectFlags::EXPOSED_IN_SYSFS, true);
            sysfs.dir_init(obj);
        }
        let parent = inner.overlays.last_mut().unwrap();
        parent.bindings.extend(top.bindings);
        parent.objects.extend(top.objects);
    }

    /// Discards the overlay at `token` (which must be the top of the stack), unlinking every
    /// object it added and leaving the namespace as if the overlay's contents had never been
    /// parsed.
    pub fn discard(&self, token: OverlayToken, sysfs: &dyn SysfsHandler) {
        let mut inner = self.inner.lock();
        assert_eq!(token.0, inner.overlays.len() - 1, "discard on a non-top overlay");
        assert!(inner.overlays.len() > 1, "cannot discard the global overlay");

        let top = inner.overlays.pop().unwrap();
        for obj in top.objects {
            if obj.flags().contains(crate::object::ObjectFlags::EXPOSED_IN_SYSFS) {
                sysfs.dir_remove(&obj);
            }
            obj.unlink();
        }
    }

    /// Resolves `name` against `scope` following AML's namespace search algorithm (ACPI §5.3):
    /// an absolute name (or one with explicit `^` parent-prefixes) is looked up directly by
    /// walking its segments from the resolved starting scope; a purely relative, single-segment
    /// name additionally searches enclosing scopes outward to the root if it isn't found
    /// directly under `scope` (§4.3's "patch-up" known limitation applies here: the first match
    /// found walking outward wins).
    pub fn search(&self, name: &AmlName, scope: &AmlName) -> Result<(AmlName, ObjectHandle), AmlError> {
        if matches!(name.start, NameStart::Root) || name.segments.len() > 1 || matches!(name.start, NameStart::Parents(n) if n > 0)
        {
            let resolved = name.resolve(scope)?;
            let obj = self.walk_down(&resolved)?;
            return Ok((resolved, obj));
        }

        // A bare, zero-caret name: search outward from `scope` to the root (ACPI §5.3).
        let mut search_scope = scope.clone();
        loop {
            let candidate = AmlName { start: NameStart::Root, segments: {
                let mut segs = search_scope.segments.clone();
                segs.extend(name.segments.iter().cloned());
                segs
            }};
            if let Ok(obj) = self.walk_down(&candidate) {
                return Ok((candidate, obj));
            }
            match search_scope.segments.pop() {
                Some(_) => continue,
                None => return Err(AmlError::NameNotFound(name.clone())),
            }
        }
    }

    /// Walks `name` (already absolute) down from the root, one segment at a time.
    pub fn walk_down(&self, name: &AmlName) -> Result<ObjectHandle, AmlError> {
        assert!(matches!(name.start, NameStart::Root));
        let mut current = self.root();
        for seg in &name.segments {
            current = self
                .lookup_child(&current, *seg)
                .ok_or_else(|| AmlError::NameNotFound(name.clone()))?;
        }
        Ok(resolve_alias(current))
    }

    pub fn get_by_path_str(&self, path: &str) -> Result<ObjectHandle, AmlError> {
        let name: AmlName = path.parse()?;
        self.walk_down(&name)
    }
}

impl Default for Namespace {
    fn default() -> Namespace {
        Namespace::new()
    }
}

/// Reconstructs an object's absolute namespace path by walking its `parent()`/`name()` links up
/// to the root. Used to recover the scope a resolved object lives at - e.g. so a method body's
/// unqualified name references resolve relative to where the method is *defined*, not where it
/// happens to be invoked from.
pub fn absolute_name(obj: &ObjectHandle) -> AmlName {
    let mut segments = Vec::new();
    let mut current = obj.clone();
    while let Some(seg) = current.name() {
        segments.push(seg);
        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }
    segments.reverse();
    AmlName { start: NameStart::Root, segments }
}

/// Flattens an `Alias` to its (already-flattened, per the construction invariant) target.
pub fn resolve_alias(handle: ObjectHandle) -> ObjectHandle {
    let target = match &*handle.data.lock() {
        ObjectData::Alias(inner) => Some(inner.clone()),
        _ => None,
    };
    target.unwrap_or(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectData;
    use core::str::FromStr;

    fn seg(s: &str) -> NameSeg {
        let mut bytes = [b'_'; 4];
        bytes[..s.len()].copy_from_slice(s.as_bytes());
        NameSeg::new(bytes).unwrap()
    }

    #[test]
    fn add_lookup_commit_round_trip() {
        let ns = Namespace::new();
        let root = ns.root();
        let token = ns.push_overlay();
        let x = ns.add_child(token, &root, seg("X"), ObjectNode::new(ObjectData::Integer(42))).unwrap();
        assert!(ns.lookup_child(&root, seg("X")).is_some());
        ns.commit(token, &crate::sysfs::NoopSysfs);
        assert_eq!(root.children().len(), 1);
        assert!(x.is_named());
        assert!(x.flags().contains(crate::object::ObjectFlags::EXPOSED_IN_SYSFS));
    }

    #[test]
    fn discard_unlinks_everything() {
        let ns = Namespace::new();
        let root = ns.root();
        let token = ns.push_overlay();
        let x = ns.add_child(token, &root, seg("X"), ObjectNode::new(ObjectData::Integer(1))).unwrap();
        ns.discard(token, &crate::sysfs::NoopSysfs);
        assert!(!x.is_named());
        assert_eq!(root.children().len(), 0);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let ns = Namespace::new();
        let root = ns.root();
        let token = ns.push_overlay();
        ns.add_child(token, &root, seg("X"), ObjectNode::new(ObjectData::Integer(1))).unwrap();
        let err = ns.add_child(token, &root, seg("X"), ObjectNode::new(ObjectData::Integer(2))).unwrap_err();
        assert!(matches!(err, AmlError::NameCollision(_)));
    }

    #[test]
    fn search_walks_outward_from_scope() {
        let ns = Namespace::new();
        let root = ns.root();
        let token = ns.push_overlay();
        ns.add_child(token, &root, seg("FOO"), ObjectNode::new(ObjectData::Integer(7))).unwrap();
        let dev = ns.add_child(token, &root, seg("DEV"), ObjectNode::new(ObjectData::Device)).unwrap();
        ns.commit(token, &crate::sysfs::NoopSysfs);

        let scope = AmlName::from_str("\\DEV").unwrap();
        let name = AmlName::from_str("FOO").unwrap();
        let (resolved, obj) = ns.search(&name, &scope).unwrap();
        assert_eq!(resolved.to_string(), "\\FOO");
        if let ObjectData::Integer(v) = &*obj.data.lock() {
            assert_eq!(*v, 7);
        } else {
            panic!("expected integer");
        }
        let _ = dev;
    }
}
