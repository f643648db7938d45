//! `NamespaceModifierObj` parsing (ACPI §20.2.5.1): `Name`, `Scope`, `Alias` - the three forms
//! that bind a name in the namespace without introducing a new scope-capable container.

use crate::{
    method::MethodState,
    name::{AmlName, NameStart},
    object::{ObjectData, ObjectHandle, ObjectNode},
    parser::{data, term},
    pkg_length::PkgLength,
    stream::Stream,
    token::opcode::*,
    AmlContext, AmlError,
};
use alloc::sync::Arc;

pub fn parse(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream, table: &Arc<[u8]>) -> Result<(), AmlError> {
    let byte = stream.read_byte()?;
    match byte {
        NAME_OP => parse_name(ctx, state, stream),
        SCOPE_OP => parse_scope(ctx, state, stream, table),
        ALIAS_OP => parse_alias(ctx, state, stream),
        _ => Err(AmlError::UnexpectedByte(byte)),
    }
}

fn parse_name(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<(), AmlError> {
    let name = data::parse_name_string(stream)?;
    let value = data::parse_data_ref_object(ctx, state, stream)?;
    declare(ctx, state, &name, value).map(|_| ())
}

fn parse_alias(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<(), AmlError> {
    let source_name = data::parse_name_string(stream)?;
    let alias_name = data::parse_name_string(stream)?;
    let (_, source) = ctx.namespace.search(&source_name, &state.scope)?;
    declare(ctx, state, &alias_name, ObjectNode::new(ObjectData::Alias(source))).map(|_| ())
}

/// `Scope` reopens an already-declared scope-capable object (most commonly one of the
/// predefined roots, `\_SB`, `\_GPE`, etc.) and parses its body as if it were written directly
/// inside that object - unqualified names inside resolve relative to it, and every name it
/// declares becomes a child of it.
fn parse_scope(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream, table: &Arc<[u8]>) -> Result<(), AmlError> {
    let pkg = PkgLength::parse(stream)?;
    let name = data::parse_name_string(stream)?;
    let (resolved, scope_obj) = ctx.namespace.search(&name, &state.scope)?;
    if !scope_obj.data.lock().is_scope() {
        return Err(AmlError::BadName);
    }

    let token = ctx.namespace.push_overlay();
    let previous_scope = core::mem::replace(&mut state.scope, resolved);
    let result = term::term_list(ctx, state, stream, &pkg, table);
    state.scope = previous_scope;

    match result {
        Ok(_) => {
            ctx.namespace.commit(token, ctx.sysfs());
            Ok(())
        }
        Err(e) => {
            ctx.namespace.discard(token, ctx.sysfs());
            Err(e)
        }
    }
}

/// Resolves `name` against `scope`, then adds `value` as a new child of its parent, through a
/// fresh overlay committed (or discarded, on a name collision) immediately. This is the shared
/// "declare one fresh named object" path used by `Name`/`Alias` here and by every named-object
/// declaration in `named.rs`.
pub(crate) fn declare(
    ctx: &AmlContext,
    state: &MethodState,
    name: &AmlName,
    value: ObjectHandle,
) -> Result<ObjectHandle, AmlError> {
    let resolved = name.resolve(&state.scope)?;
    let split_at = resolved.segments.len().saturating_sub(1);
    let (parent_segments, last_seg) = resolved.segments.split_at(split_at);
    let last = *last_seg.first().ok_or(AmlError::InvalidNameSeg)?;
    let parent_name = AmlName { start: NameStart::Root, segments: parent_segments.to_vec() };
    let parent = ctx.namespace.walk_down(&parent_name)?;

    let token = ctx.namespace.push_overlay();
    match ctx.namespace.add_child(token, &parent, last, value) {
        Ok(obj) => {
            ctx.namespace.commit(token, ctx.sysfs());
            Ok(obj)
        }
        Err(e) => {
            ctx.namespace.discard(token, ctx.sysfs());
            Err(e)
        }
    }
}

/// Like [`declare`], but reuses an existing scope-capable child instead of failing on collision
/// (§4.2's named-object duplicate policy) - used by `Device`/`Processor`/`PowerResource`/
/// `ThermalZone`, which are routinely redeclared across SSDTs to add more content to the same
/// device.
pub(crate) fn declare_or_reuse_scope(
    ctx: &AmlContext,
    state: &MethodState,
    name: &AmlName,
    build: impl FnOnce() -> ObjectData,
) -> Result<(AmlName, ObjectHandle, bool), AmlError> {
    let resolved = name.resolve(&state.scope)?;
    let split_at = resolved.segments.len().saturating_sub(1);
    let (parent_segments, last_seg) = resolved.segments.split_at(split_at);
    let last = *last_seg.first().ok_or(AmlError::InvalidNameSeg)?;
    let parent_name = AmlName { start: NameStart::Root, segments: parent_segments.to_vec() };
    let parent = ctx.namespace.walk_down(&parent_name)?;

    let already_existed = ctx.namespace.lookup_child(&parent, last).is_some();
    let token = ctx.namespace.push_overlay();
    match ctx.namespace.add_or_reuse_scope(token, &parent, last, build) {
        Ok(obj) => {
            ctx.namespace.commit(token, ctx.sysfs());
            Ok((resolved, obj, already_existed))
        }
        Err(e) => {
            ctx.namespace.discard(token, ctx.sysfs());
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_utils::TestHandler, DebugVerbosity};
    use alloc::boxed::Box;
    use core::str::FromStr;

    fn ctx() -> AmlContext {
        AmlContext::new(Box::new(TestHandler::new()), DebugVerbosity::None)
    }

    fn no_table() -> Arc<[u8]> {
        Arc::from(&[][..])
    }

    #[test]
    fn name_declares_a_child_of_root() {
        let c = ctx();
        let mut state = MethodState::outside_method(AmlName::root());
        let bytes = [NAME_OP, b'F', b'O', b'O', b'_', BYTE_PREFIX, 9];
        let mut stream = Stream::new(&bytes);
        parse(&c, &mut state, &mut stream, &no_table()).unwrap();

        let (_, obj) = c.namespace.search(&AmlName::from_str("FOO").unwrap(), &AmlName::root()).unwrap();
        assert!(matches!(&*obj.data.lock(), ObjectData::Integer(9)));
    }

    #[test]
    fn alias_resolves_through_to_the_source_value() {
        let c = ctx();
        let mut state = MethodState::outside_method(AmlName::root());
        let name_bytes = [NAME_OP, b'S', b'R', b'C', b'_', BYTE_PREFIX, 5];
        let mut stream = Stream::new(&name_bytes);
        parse(&c, &mut state, &mut stream, &no_table()).unwrap();

        let alias_bytes = [ALIAS_OP, b'S', b'R', b'C', b'_', b'A', b'L', b'S', b'_'];
        let mut stream = Stream::new(&alias_bytes);
        parse(&c, &mut state, &mut stream, &no_table()).unwrap();

        let (_, obj) = c.namespace.search(&AmlName::from_str("ALS").unwrap(), &AmlName::root()).unwrap();
        let resolved = crate::namespace::resolve_alias(obj);
        assert!(matches!(&*resolved.data.lock(), ObjectData::Integer(5)));
    }
}
