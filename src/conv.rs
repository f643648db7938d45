//! Implicit conversions, `Store`/`CopyObject` semantics, and the handful of evaluator helpers
//! that operate on already-fetched [`ObjectHandle`]s (§4.3). Parsing lives in `parser/`; this
//! module only concerns itself with what happens to a value once it's in hand.

use bit_field::BitField;
use crate::{
    method::MethodState,
    name::Target,
    object::{AmlType, BufferFieldData, BufferFieldTargetKind, ObjectData, ObjectHandle},
    AmlContext, AmlError,
};
use alloc::{format, string::String, vec::Vec};

/// If an `Arg`/`Local` cell was fetched directly (e.g. by following an `ObjectReference` produced
/// by `RefOf(Local0)`, rather than through `ArgObj`/`LocalObj` syntax which already unwraps it),
/// dereferences it to the value it holds (§4.3 "Any Arg/Local: first dereferenced to its value
/// object").
pub fn deref_arg_or_local(obj: ObjectHandle) -> Result<ObjectHandle, AmlError> {
    let inner = match &*obj.data.lock() {
        ObjectData::Arg(inner) => Some((inner.clone(), AmlError::UninitializedArg)),
        ObjectData::Local(inner) => Some((inner.clone(), AmlError::UninitializedLocal)),
        _ => None,
    };
    match inner {
        Some((Some(value), _)) => Ok(value),
        Some((None, err)) => Err(err),
        None => Ok(obj),
    }
}

/// Dereferences a `FieldUnit`/`BufferField` handle to the value a plain read of it produces -
/// the operation-region access or in-memory bit extraction happens here, once, at every site that
/// surfaces a resolved named object as a value (§4.3, §6.2). Anything else passes through
/// unchanged.
pub fn load_value(ctx: &AmlContext, obj: ObjectHandle) -> Result<ObjectHandle, AmlError> {
    let field = match &*obj.data.lock() {
        ObjectData::FieldUnit(f) => Some(f.clone()),
        _ => None,
    };
    if let Some(field) = field {
        return crate::opregion::read_field_unit(ctx, &field);
    }

    let buffer_field = match &*obj.data.lock() {
        ObjectData::BufferField(f) => Some(f.clone()),
        _ => None,
    };
    if let Some(buffer_field) = buffer_field {
        return read_buffer_field(&buffer_field, ctx);
    }

    Ok(obj)
}

/// Extracts a `BufferField`'s bits out of its target `Buffer`/`String` (§4.3 `Index`/
/// `CreateXxxField`): little-endian, unit-less - the target's raw bytes are addressed directly
/// rather than through a `Handler`, since there's no hardware involved.
fn read_buffer_field(field: &BufferFieldData, ctx: &AmlContext) -> Result<ObjectHandle, AmlError> {
    let bytes = target_bytes(field)?;
    let value = get_target_bits(&bytes, field.bit_offset, field.bit_size);
    if field.bit_size <= ctx.integer_width().bits() as u64 {
        Ok(crate::object::new_integer(value & ctx.ones()))
    } else {
        let byte_len = ((field.bit_size + 7) / 8) as usize;
        Ok(crate::object::new_buffer(value.to_le_bytes()[..byte_len.min(8)].to_vec()))
    }
}

/// Writes `value`'s bits into a `BufferField`'s target in place.
fn write_buffer_field(field: &BufferFieldData, value: &ObjectHandle, ctx: &AmlContext) -> Result<(), AmlError> {
    let written = to_integer(value, ctx)?;
    match field.target_kind {
        BufferFieldTargetKind::Buffer => {
            let mut data = field.target.data.lock();
            if let ObjectData::Buffer(b) = &mut *data {
                set_target_bits(&mut b.bytes, field.bit_offset, field.bit_size, written);
            }
        }
        BufferFieldTargetKind::String => {
            // A `CreateField`-style target can only ever be a Buffer (§20.2.5.2); String targets
            // are unreachable in practice but kept as a variant for `BufferFieldTargetKind`'s
            // symmetry with `read_buffer_field`'s target lookup.
        }
    }
    Ok(())
}

fn target_bytes(field: &BufferFieldData) -> Result<Vec<u8>, AmlError> {
    match &*field.target.data.lock() {
        ObjectData::Buffer(b) => Ok(b.bytes.clone()),
        ObjectData::String(s) => Ok(s.as_bytes().to_vec()),
        _ => Err(AmlError::OperandType),
    }
}

fn set_target_bits(bytes: &mut [u8], bit_offset: u64, bit_size: u64, value: u64) {
    let byte_start = (bit_offset / 8) as usize;
    let bit_in_byte = (bit_offset % 8) as usize;
    let bit_len = bit_size.min(64) as usize;

    let mut window = [0u8; 16];
    let to_copy = bytes.len().saturating_sub(byte_start).min(window.len());
    window[..to_copy].copy_from_slice(&bytes[byte_start..byte_start + to_copy]);

    let mut word = u128::from_le_bytes(window);
    word.set_bits(bit_in_byte..bit_in_byte + bit_len, value as u128);

    bytes[byte_start..byte_start + to_copy].copy_from_slice(&word.to_le_bytes()[..to_copy]);
}

/// Extracts up to 64 bits starting at `bit_offset` out of `bytes`, via `bit_field::BitField` on a
/// 16-byte scratch window (wide enough for 64 data bits plus up to 7 bits of misalignment). Bits
/// past the end of `bytes` read as zero, matching a real buffer field reading off the end of a
/// short target.
fn get_target_bits(bytes: &[u8], bit_offset: u64, bit_size: u64) -> u64 {
    let byte_start = (bit_offset / 8) as usize;
    let bit_in_byte = (bit_offset % 8) as usize;
    let bit_len = bit_size.min(64) as usize;

    let mut window = [0u8; 16];
    let to_copy = bytes.len().saturating_sub(byte_start).min(window.len());
    window[..to_copy].copy_from_slice(&bytes[byte_start..byte_start + to_copy]);

    u128::from_le_bytes(window).get_bits(bit_in_byte..bit_in_byte + bit_len) as u64
}

/// Implicit source-operand conversion (ACPI §19.3.5.4): if `obj`'s type is already allowed,
/// returns it unchanged; otherwise picks the highest-priority allowed destination type
/// (Integer > String > Buffer) and converts.
pub fn convert_source(obj: ObjectHandle, allowed: AmlType, ctx: &AmlContext) -> Result<ObjectHandle, AmlError> {
    let obj = deref_arg_or_local(obj)?;
    let ty = obj.type_of();
    if allowed.contains(ty) {
        return Ok(obj);
    }

    if allowed.contains(AmlType::INTEGER) {
        return Ok(crate::object::new_integer(to_integer(&obj, ctx)?));
    }
    if allowed.contains(AmlType::STRING) {
        return Ok(crate::object::new_string(to_string(&obj, ctx)?));
    }
    if allowed.contains(AmlType::BUFFER) {
        return Ok(crate::object::new_buffer(to_buffer(&obj, ctx)?));
    }
    Err(AmlError::OperandType)
}

/// Converts `obj` to an integer: passthrough for `Integer`, little-endian read (up to the
/// process's integer width) for `Buffer`, and "parse hex digits until the first non-hex
/// character" for `String` (undefined characters simply stop parsing; an empty/no-digit prefix
/// yields 0).
pub fn to_integer(obj: &ObjectHandle, ctx: &AmlContext) -> Result<u64, AmlError> {
    match &*obj.data.lock() {
        ObjectData::Integer(v) => Ok(*v & ctx.ones()),
        ObjectData::Buffer(b) => {
            let mut value: u64 = 0;
            for (i, byte) in b.bytes.iter().take((ctx.integer_width().bits() / 8) as usize).enumerate() {
                value |= (*byte as u64) << (8 * i as u64);
            }
            Ok(value)
        }
        ObjectData::String(s) => {
            let digits: String = s.chars().take_while(|c| c.is_ascii_hexdigit()).collect();
            Ok(u64::from_str_radix(&digits, 16).unwrap_or(0))
        }
        _ => Err(AmlError::OperandType),
    }
}

/// Converts `obj` to a string: `Integer` becomes its hex representation, `Buffer` becomes a
/// space-separated hex-byte dump (matching ACPICA's default `ToString`-style conversion),
/// `String` passes through.
pub fn to_string(obj: &ObjectHandle, ctx: &AmlContext) -> Result<String, AmlError> {
    match &*obj.data.lock() {
        ObjectData::String(s) => Ok(s.clone()),
        ObjectData::Integer(v) => {
            let masked = *v & ctx.ones();
            Ok(format!("{:#0width$x}", masked, width = (ctx.integer_width().bits() / 4) as usize + 2))
        }
        ObjectData::Buffer(b) => {
            let mut s = String::new();
            for (i, byte) in b.bytes.iter().enumerate() {
                if i > 0 {
                    s.push(' ');
                }
                s.push_str(&format!("{:02x}", byte));
            }
            Ok(s)
        }
        _ => Err(AmlError::OperandType),
    }
}

/// Converts `obj` to a byte buffer: `Integer` becomes its little-endian byte pattern (sized to
/// the process's integer width), `String` becomes its UTF-8 bytes plus a trailing nul, `Buffer`
/// passes through.
pub fn to_buffer(obj: &ObjectHandle, ctx: &AmlContext) -> Result<Vec<u8>, AmlError> {
    match &*obj.data.lock() {
        ObjectData::Buffer(b) => Ok(b.bytes.clone()),
        ObjectData::Integer(v) => {
            let width_bytes = (ctx.integer_width().bits() / 8) as usize;
            Ok(v.to_le_bytes()[..width_bytes].to_vec())
        }
        ObjectData::String(s) => {
            let mut bytes = s.as_bytes().to_vec();
            bytes.push(0);
            Ok(bytes)
        }
        _ => Err(AmlError::OperandType),
    }
}

/// Applies implicit result conversion (ACPI §19.3.5.5) and writes `result` into `target`.
/// Conversion happens first against the destination's *existing* type, so storing an Integer
/// into a named String variable converts the integer, not the other way around.
pub fn store(ctx: &AmlContext, state: &MethodState, result: ObjectHandle, target: &Target) -> Result<(), AmlError> {
    match target {
        Target::Null => Ok(()),
        Target::Debug => {
            log::info!("AML Debug: {}", describe(&result));
            Ok(())
        }
        Target::Local(n) => store_into_local_cell(result, &state.local_cell(*n)?),
        Target::Arg(n) => store_into_arg_cell(ctx, result, &state.arg_cell(*n)?),
        Target::Name(name) => {
            let (_, obj) = ctx.namespace.search(name, &state.scope)?;
            store_into_named(ctx, result, &obj)
        }
    }
}

/// `CopyObject(src, dst)`: writes without conversion, replacing the destination's type outright -
/// including a cell currently holding an `ObjectReference`, which `store` would instead write
/// through (§4.3).
pub fn copy_object(ctx: &AmlContext, state: &MethodState, result: ObjectHandle, target: &Target) -> Result<(), AmlError> {
    match target {
        Target::Null => Ok(()),
        Target::Debug => {
            log::info!("AML Debug (copy): {}", describe(&result));
            Ok(())
        }
        Target::Local(n) => {
            set_cell(&state.local_cell(*n)?, Some(result));
            Ok(())
        }
        Target::Arg(n) => {
            set_cell(&state.arg_cell(*n)?, Some(result));
            Ok(())
        }
        Target::Name(name) => {
            let (_, obj) = ctx.namespace.search(name, &state.scope)?;
            *obj.data.lock() = result.data.lock().clone();
            Ok(())
        }
    }
}

/// Overwrites an `Arg`/`Local` cell's payload in place, preserving which variant it is.
fn set_cell(cell: &ObjectHandle, value: Option<ObjectHandle>) {
    match &mut *cell.data.lock() {
        ObjectData::Arg(inner) => *inner = value,
        ObjectData::Local(inner) => *inner = value,
        _ => unreachable!("local/arg cells always hold ObjectData::Arg or ObjectData::Local"),
    }
}

fn cell_value(cell: &ObjectHandle) -> Option<ObjectHandle> {
    match &*cell.data.lock() {
        ObjectData::Arg(inner) | ObjectData::Local(inner) => inner.clone(),
        _ => unreachable!("local/arg cells always hold ObjectData::Arg or ObjectData::Local"),
    }
}

/// `Store` into a `Local`: always a plain overwrite, no conversion against the cell's previous
/// value and no `ObjectReference` write-through even if the cell currently holds one (§19.3.5.5 /
/// spec.md: "into a Local that is already set, it overwrites" - this is Local-specific, unlike
/// Arg's reference write-through below).
fn store_into_local_cell(result: ObjectHandle, cell: &ObjectHandle) -> Result<(), AmlError> {
    set_cell(cell, Some(result));
    Ok(())
}

/// `Store` into an `Arg`: writes through an `ObjectReference` the cell currently holds instead of
/// rebinding the cell itself (§4.3 "into an Arg holding an ObjectReference, it writes through the
/// reference"); otherwise a plain overwrite, same as `Local` - no conversion against the cell's
/// previous value either way.
fn store_into_arg_cell(ctx: &AmlContext, result: ObjectHandle, cell: &ObjectHandle) -> Result<(), AmlError> {
    match cell_value(cell) {
        Some(existing) if matches!(&*existing.data.lock(), ObjectData::ObjectReference(_)) => {
            let target = match &*existing.data.lock() {
                ObjectData::ObjectReference(t) => t.clone(),
                _ => unreachable!(),
            };
            store_into_named(ctx, result, &target)
        }
        _ => {
            set_cell(cell, Some(result));
            Ok(())
        }
    }
}

fn store_into_named(ctx: &AmlContext, result: ObjectHandle, obj: &ObjectHandle) -> Result<(), AmlError> {
    let field = match &*obj.data.lock() {
        ObjectData::FieldUnit(f) => Some(f.clone()),
        _ => None,
    };
    if let Some(field) = field {
        return crate::opregion::write_field_unit(ctx, &field, &result);
    }

    let buffer_field = match &*obj.data.lock() {
        ObjectData::BufferField(f) => Some(f.clone()),
        _ => None,
    };
    if let Some(buffer_field) = buffer_field {
        return write_buffer_field(&buffer_field, &result, ctx);
    }

    let existing_type = obj.type_of();
    let converted = convert_source(result, existing_type, ctx)?;
    *obj.data.lock() = converted.data.lock().clone();
    Ok(())
}

fn describe(obj: &ObjectHandle) -> String {
    match &*obj.data.lock() {
        ObjectData::Integer(v) => format!("Integer({:#x})", v),
        ObjectData::String(s) => format!("String({:?})", s),
        ObjectData::Buffer(b) => format!("Buffer(len={})", b.bytes.len()),
        other => format!("{}", other.type_of()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{name::AmlName, object, test_utils::TestHandler, DebugVerbosity};
    use alloc::boxed::Box;
    use core::str::FromStr;

    fn ctx() -> AmlContext {
        AmlContext::new(Box::new(TestHandler::new()), DebugVerbosity::None)
    }

    #[test]
    fn integer_to_string_is_hex() {
        let c = ctx();
        let s = to_string(&object::new_integer(255), &c).unwrap();
        assert!(s.starts_with("0x"));
        assert!(s.ends_with("ff"));
    }

    #[test]
    fn string_to_integer_parses_leading_hex() {
        let c = ctx();
        assert_eq!(to_integer(&object::new_string("1A2Zgarbage".into()), &c).unwrap(), 0x1A2);
    }

    #[test]
    fn string_to_integer_with_no_digits_is_zero() {
        let c = ctx();
        assert_eq!(to_integer(&object::new_string("zzz".into()), &c).unwrap(), 0);
    }

    #[test]
    fn buffer_to_integer_is_little_endian() {
        let c = ctx();
        assert_eq!(to_integer(&object::new_buffer(alloc::vec![0x01, 0x02]), &c).unwrap(), 0x0201);
    }

    #[test]
    fn store_into_named_integer_converts_string_source() {
        let c = ctx();
        let root = c.namespace.root();
        let token = c.namespace.push_overlay();
        let target = c
            .namespace
            .add_child(
                token,
                &root,
                crate::name::NameSeg::new(*b"FOO_").unwrap(),
                object::ObjectNode::new(ObjectData::Integer(0)),
            )
            .unwrap();
        c.namespace.commit(token, c.sysfs());

        let state = MethodState::outside_method(AmlName::root());
        let src = object::new_string("2A".into());
        store(&c, &state, src, &Target::Name(AmlName::from_str("FOO").unwrap())).unwrap();

        match &*target.data.lock() {
            ObjectData::Integer(v) => assert_eq!(*v, 0x2A),
            _ => panic!("expected integer"),
        }
    }

    #[test]
    fn store_into_an_already_set_local_plain_overwrites() {
        // A Local holding an ObjectReference must still be rebound outright, not written through -
        // unlike Arg below.
        let c = ctx();
        let state = MethodState::for_method(AmlName::root(), 0, &[]);
        let local_cell = state.local_cell(0).unwrap();
        let referenced = object::new_integer(1);
        *local_cell.data.lock() = ObjectData::Local(Some(object::ObjectNode::new(ObjectData::ObjectReference(referenced.clone()))));

        store(&c, &state, object::new_integer(99), &Target::Local(0)).unwrap();

        assert!(matches!(&*state.local(0).unwrap().data.lock(), ObjectData::Integer(99)));
        assert!(matches!(&*referenced.data.lock(), ObjectData::Integer(1)), "referenced object must be untouched");
    }

    #[test]
    fn store_into_an_already_set_arg_holding_a_reference_writes_through() {
        let c = ctx();
        let root = c.namespace.root();
        let token = c.namespace.push_overlay();
        let target = c
            .namespace
            .add_child(token, &root, crate::name::NameSeg::new(*b"BAR_").unwrap(), object::ObjectNode::new(ObjectData::Integer(0)))
            .unwrap();
        c.namespace.commit(token, c.sysfs());

        let state = MethodState::for_method(AmlName::root(), 1, &[]);
        let arg_cell = state.arg_cell(0).unwrap();
        *arg_cell.data.lock() = ObjectData::Arg(Some(object::ObjectNode::new(ObjectData::ObjectReference(target.clone()))));

        store(&c, &state, object::new_integer(7), &Target::Arg(0)).unwrap();

        assert!(matches!(&*target.data.lock(), ObjectData::Integer(7)), "store through Arg's reference must reach BAR");
        // The Arg cell itself still holds the reference, not the stored value directly.
        assert!(matches!(&*arg_cell.data.lock(), ObjectData::Arg(Some(_))));
    }

    #[test]
    fn store_into_an_already_set_arg_without_a_reference_plain_overwrites() {
        let c = ctx();
        let state = MethodState::for_method(AmlName::root(), 1, &[]);
        let arg_cell = state.arg_cell(0).unwrap();
        *arg_cell.data.lock() = ObjectData::Arg(Some(object::new_string("old".into())));

        store(&c, &state, object::new_integer(5), &Target::Arg(0)).unwrap();

        assert!(matches!(&*state.arg(0).unwrap().data.lock(), ObjectData::Integer(5)));
    }
}
