//! The main statement/expression dispatch loop (§4.1-§4.3): `term_list` drives a `TermList`,
//! `term_obj` parses and (for most object kinds) immediately executes one `TermObj`, and
//! `read_term_arg` is the entry point every operand-reading site in the rest of the parser calls
//! through.

use crate::{
    conv,
    method::{invoke_resolved, Flow, MethodState},
    name::AmlName,
    object::{AmlType, ObjectHandle},
    parser::{data, expression, named, namespace_modifier, statement},
    stream::Stream,
    token::{classify, opcode::*, TokenKind},
    AmlContext, AmlError,
};
use alloc::{sync::Arc, vec::Vec};

/// Executes every `TermObj` in `pkg` in turn, stopping early if one of them yields
/// `Return`/`Break`/`Continue`. `table` is the owning buffer of the table currently being parsed
/// (or a method body currently being invoked) - threaded through so a nested `DefMethod`
/// declaration can record its own `start..end` byte range against the same owning `Arc`, per the
/// "re-read the raw bytes on every invocation" design (§3.2).
pub fn term_list(
    ctx: &AmlContext,
    state: &mut MethodState,
    stream: &mut Stream,
    pkg: &crate::pkg_length::PkgLength,
    table: &Arc<[u8]>,
) -> Result<Flow, AmlError> {
    while !pkg.is_at_end(stream) {
        match term_obj(ctx, state, stream, table)? {
            Flow::Normal => continue,
            other => return Ok(other),
        }
    }
    Ok(Flow::Normal)
}

/// Parses and executes one `TermObj`: a namespace modifier, a named-object declaration, a
/// statement, or an expression used as a standalone statement (its value discarded).
pub fn term_obj(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream, table: &Arc<[u8]>) -> Result<Flow, AmlError> {
    let byte = stream.peek_byte()?;

    if byte == EXT_OP_PREFIX {
        let ext = stream.peek_byte_at(1)?;
        if is_named_obj_ext(ext) {
            named::parse(ctx, state, stream, table)?;
            return Ok(Flow::Normal);
        }
        let value = read_term_arg(ctx, state, stream, AmlType::all())?;
        state.set_last_result(value);
        return Ok(Flow::Normal);
    }

    match classify(byte) {
        TokenKind::NamespaceModifier => {
            namespace_modifier::parse(ctx, state, stream, table)?;
            Ok(Flow::Normal)
        }
        TokenKind::NamedObj => {
            named::parse(ctx, state, stream, table)?;
            Ok(Flow::Normal)
        }
        TokenKind::Statement => statement::parse(ctx, state, stream, table),
        _ => {
            // An expression used as a standalone statement: its value isn't consumed by anything
            // here, but it becomes the method's implicit return if control falls off the end of
            // the TermList without an explicit Return (spec.md's "last evaluated expression").
            let value = read_term_arg(ctx, state, stream, AmlType::all())?;
            state.set_last_result(value);
            Ok(Flow::Normal)
        }
    }
}

fn is_named_obj_ext(ext: u8) -> bool {
    matches!(
        ext,
        MUTEX_OP
            | EVENT_OP
            | OP_REGION_OP
            | FIELD_OP
            | DEVICE_OP
            | PROCESSOR_OP
            | POWER_RES_OP
            | THERMAL_ZONE_OP
            | INDEX_FIELD_OP
            | BANK_FIELD_OP
            | CREATE_FIELD_OP
            | DATA_REGION_OP
    )
}

/// Reads one `TermArg` - a value-producing operand - applying implicit source conversion against
/// `allowed` once the underlying object is in hand (§19.3.5.4).
pub fn read_term_arg(
    ctx: &AmlContext,
    state: &mut MethodState,
    stream: &mut Stream,
    allowed: AmlType,
) -> Result<ObjectHandle, AmlError> {
    let byte = stream.peek_byte()?;

    let obj = if byte == EXT_OP_PREFIX {
        expression::parse_extended(ctx, state, stream)?
    } else {
        match classify(byte) {
            TokenKind::Computational => data::parse_data_ref_object(ctx, state, stream)?,
            TokenKind::Local => {
                let op = stream.read_byte()?;
                state.local(op - LOCAL0_OP)?
            }
            TokenKind::Arg => {
                let op = stream.read_byte()?;
                state.arg(op - ARG0_OP)?
            }
            TokenKind::Name => {
                let name = data::parse_name_string(stream)?;
                read_name_as_term_arg(ctx, state, stream, &name)?
            }
            _ => expression::parse(ctx, state, stream, byte)?,
        }
    };

    conv::convert_source(obj, allowed, ctx)
}

/// A bare `NameString` encountered in `TermArg` position is either a value read or, if the name
/// resolves to a `Method`, a method invocation - consuming exactly `ArgCount` further `TermArg`s,
/// which is only knowable once the name has been resolved against the namespace as built so far.
fn read_name_as_term_arg(
    ctx: &AmlContext,
    state: &mut MethodState,
    stream: &mut Stream,
    name: &AmlName,
) -> Result<ObjectHandle, AmlError> {
    let (_, resolved) = ctx.namespace.search(name, &state.scope)?;

    let arg_count = match &*resolved.data.lock() {
        crate::object::ObjectData::Method(m) => Some(m.flags.arg_count),
        _ => None,
    };

    match arg_count {
        None => conv::load_value(ctx, resolved),
        Some(arg_count) => {
            let mut args = Vec::with_capacity(arg_count as usize);
            for _ in 0..arg_count {
                args.push(read_term_arg(ctx, state, stream, AmlType::all())?);
            }
            invoke_resolved(ctx, resolved, &args)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{object::ObjectData, test_utils::TestHandler, DebugVerbosity};
    use alloc::boxed::Box;

    fn ctx() -> AmlContext {
        AmlContext::new(Box::new(TestHandler::new()), DebugVerbosity::None)
    }

    #[test]
    fn reads_integer_constant() {
        let c = ctx();
        let mut state = MethodState::outside_method(AmlName::root());
        let bytes = [BYTE_PREFIX, 7];
        let mut stream = Stream::new(&bytes);
        let v = read_term_arg(&c, &mut state, &mut stream, AmlType::all()).unwrap();
        assert!(matches!(&*v.data.lock(), ObjectData::Integer(7)));
    }

    #[test]
    fn reads_local_and_arg() {
        let c = ctx();
        let mut state = MethodState::for_method(AmlName::root(), 1, &[crate::object::new_integer(9)]);
        *state.local_cell(0).unwrap().data.lock() = ObjectData::Local(Some(crate::object::new_integer(3)));

        let local_bytes = [LOCAL0_OP];
        let mut stream = Stream::new(&local_bytes);
        let v = read_term_arg(&c, &mut state, &mut stream, AmlType::all()).unwrap();
        assert!(matches!(&*v.data.lock(), ObjectData::Integer(3)));

        let arg_bytes = [ARG0_OP];
        let mut stream = Stream::new(&arg_bytes);
        let v = read_term_arg(&c, &mut state, &mut stream, AmlType::all()).unwrap();
        assert!(matches!(&*v.data.lock(), ObjectData::Integer(9)));
    }
}
