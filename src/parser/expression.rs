//! `ExpressionOpcode` parsing and evaluation (ACPI §20.2.5.4): arithmetic, bitwise, logical,
//! comparison and reference/conversion operators. Every function here has already had its opcode
//! byte(s) consumed by the time it starts reading operands.

use crate::{
    conv,
    method::MethodState,
    name::Target,
    object::{
        new_buffer, new_integer, new_string, AmlType, BufferFieldData, BufferFieldTargetKind, ObjectData, ObjectHandle,
        ObjectNode,
    },
    parser::{supername, term},
    stream::Stream,
    token::opcode::*,
    AmlContext, AmlError,
};
use alloc::{format, string::String, string::ToString};
use core::cmp::Ordering;

/// Parses and evaluates a non-extended `ExpressionOpcode`. `byte` has already been peeked by the
/// caller and is consumed here.
pub fn parse(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream, byte: u8) -> Result<ObjectHandle, AmlError> {
    stream.read_byte()?;
    match byte {
        REF_OF_OP => eval_ref_of(ctx, state, stream),
        ADD_OP => two_operand_arith(ctx, state, stream, |a, b| a.wrapping_add(b)),
        SUBTRACT_OP => two_operand_arith(ctx, state, stream, |a, b| a.wrapping_sub(b)),
        MULTIPLY_OP => two_operand_arith(ctx, state, stream, |a, b| a.wrapping_mul(b)),
        AND_OP => two_operand_arith(ctx, state, stream, |a, b| a & b),
        NAND_OP => two_operand_arith(ctx, state, stream, |a, b| !(a & b)),
        OR_OP => two_operand_arith(ctx, state, stream, |a, b| a | b),
        NOR_OP => two_operand_arith(ctx, state, stream, |a, b| !(a | b)),
        XOR_OP => two_operand_arith(ctx, state, stream, |a, b| a ^ b),
        SHIFT_LEFT_OP => two_operand_arith(ctx, state, stream, |a, b| a.checked_shl(b as u32).unwrap_or(0)),
        SHIFT_RIGHT_OP => two_operand_arith(ctx, state, stream, |a, b| a.checked_shr(b as u32).unwrap_or(0)),
        MOD_OP => {
            let a = read_integer(ctx, state, stream)?;
            let b = read_integer(ctx, state, stream)?;
            let target = supername::parse_target(stream)?;
            if b == 0 {
                return Err(AmlError::DivideByZero);
            }
            finish(ctx, state, new_integer(a % b) , &target)
        }
        DIVIDE_OP => eval_divide(ctx, state, stream),
        INCREMENT_OP => eval_increment_decrement(ctx, state, stream, 1),
        DECREMENT_OP => eval_increment_decrement(ctx, state, stream, -1),
        NOT_OP => {
            let a = read_integer(ctx, state, stream)?;
            let target = supername::parse_target(stream)?;
            finish(ctx, state, new_integer(!a & ctx.ones()), &target)
        }
        FIND_SET_LEFT_BIT_OP => {
            let a = read_integer(ctx, state, stream)?;
            let target = supername::parse_target(stream)?;
            let bit = if a == 0 { 0 } else { (64 - a.leading_zeros()) as u64 };
            finish(ctx, state, new_integer(bit), &target)
        }
        FIND_SET_RIGHT_BIT_OP => {
            let a = read_integer(ctx, state, stream)?;
            let target = supername::parse_target(stream)?;
            let bit = if a == 0 { 0 } else { a.trailing_zeros() as u64 + 1 };
            finish(ctx, state, new_integer(bit), &target)
        }
        DEREF_OF_OP => eval_deref_of(ctx, state, stream),
        CONCAT_OP => eval_concat(ctx, state, stream),
        CONCAT_RES_OP => eval_concat_res(ctx, state, stream),
        SIZE_OF_OP => eval_size_of(ctx, state, stream),
        INDEX_OP => eval_index(ctx, state, stream),
        MATCH_OP => eval_match(ctx, state, stream),
        OBJECT_TYPE_OP => eval_object_type(ctx, state, stream),
        LAND_OP => {
            let a = read_integer(ctx, state, stream)?;
            let b = read_integer(ctx, state, stream)?;
            Ok(bool_result(ctx, a != 0 && b != 0))
        }
        LOR_OP => {
            let a = read_integer(ctx, state, stream)?;
            let b = read_integer(ctx, state, stream)?;
            Ok(bool_result(ctx, a != 0 || b != 0))
        }
        LNOT_OP => eval_lnot_or_compound(ctx, state, stream),
        LEQUAL_OP => compare(ctx, state, stream, |o| o == Ordering::Equal),
        LGREATER_OP => compare(ctx, state, stream, |o| o == Ordering::Greater),
        LLESS_OP => compare(ctx, state, stream, |o| o == Ordering::Less),
        TO_BUFFER_OP => convert_and_store(ctx, state, stream, |obj, ctx| Ok(new_buffer(conv::to_buffer(&obj, ctx)?))),
        TO_INTEGER_OP => convert_and_store(ctx, state, stream, |obj, ctx| Ok(new_integer(conv::to_integer(&obj, ctx)?))),
        TO_HEX_STRING_OP => {
            convert_and_store(ctx, state, stream, |obj, ctx| Ok(new_string(format!("{:#x}", conv::to_integer(&obj, ctx)?))))
        }
        TO_DECIMAL_STRING_OP => {
            convert_and_store(ctx, state, stream, |obj, ctx| Ok(new_string(conv::to_integer(&obj, ctx)?.to_string())))
        }
        TO_STRING_OP => eval_to_string_op(ctx, state, stream),
        MID_OP => eval_mid(ctx, state, stream),
        STORE_OP => {
            let value = term::read_term_arg(ctx, state, stream, AmlType::all())?;
            let target = supername::parse_target(stream)?;
            conv::store(ctx, state, value.clone(), &target)?;
            Ok(value)
        }
        COPY_OBJECT_OP => {
            let value = term::read_term_arg(ctx, state, stream, AmlType::all())?;
            let target = supername::parse_target(stream)?;
            conv::copy_object(ctx, state, value.clone(), &target)?;
            Ok(value)
        }
        _ => Err(AmlError::UnexpectedByte(byte)),
    }
}

/// Parses and evaluates an `ExtOpPrefix`-introduced expression. The `0x5B` prefix byte and the
/// extended opcode byte that follows it have not yet been consumed.
pub fn parse_extended(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<ObjectHandle, AmlError> {
    stream.read_byte()?; // ExtOpPrefix
    let ext = stream.read_byte()?;
    match ext {
        COND_REF_OF_OP => eval_cond_ref_of(ctx, state, stream),
        ACQUIRE_OP => eval_acquire(ctx, state, stream),
        RELEASE_OP => eval_release(ctx, state, stream),
        STALL_OP => {
            let us = read_integer(ctx, state, stream)?;
            ctx.handler().stall(us);
            Ok(crate::object::synthetic_zero())
        }
        SLEEP_OP => {
            let ms = read_integer(ctx, state, stream)?;
            ctx.handler().sleep(ms);
            Ok(crate::object::synthetic_zero())
        }
        SIGNAL_OP | WAIT_OP | RESET_OP => {
            // Event objects (§3.2) aren't backed by a real wait primitive in this core; the
            // opcodes still parse correctly so tables that declare and poke at events don't fail.
            let _ = supername::parse_target(stream).or_else(|_| Err(AmlError::OperandType));
            Ok(new_integer(0))
        }
        FATAL_OP => {
            let fatal_type = stream.read_byte()?;
            let fatal_code = stream.read_dword()?;
            let fatal_arg = read_integer(ctx, state, stream)?;
            ctx.handler().handle_fatal_error(fatal_type, fatal_code, fatal_arg);
            Ok(crate::object::synthetic_zero())
        }
        FROM_BCD_OP => {
            let a = read_integer(ctx, state, stream)?;
            let target = supername::parse_target(stream)?;
            finish(ctx, state, new_integer(from_bcd(a)), &target)
        }
        TO_BCD_OP => {
            let a = read_integer(ctx, state, stream)?;
            let target = supername::parse_target(stream)?;
            finish(ctx, state, new_integer(to_bcd(a)), &target)
        }
        REVISION_OP => Ok(new_integer(2)),
        TIMER_OP => Ok(new_integer(next_timer_tick())),
        LOAD_OP | LOAD_TABLE_OP => {
            // Dynamic table loading from an operation region/host source is out of scope for
            // this core; report "no handle" rather than failing the table that declares it.
            Ok(new_integer(0))
        }
        _ => Err(AmlError::UnexpectedByte(ext)),
    }
}

fn read_integer(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<u64, AmlError> {
    conv::to_integer(&term::read_term_arg(ctx, state, stream, AmlType::INTEGER)?, ctx)
}

fn bool_result(ctx: &AmlContext, value: bool) -> ObjectHandle {
    new_integer(if value { ctx.ones() } else { 0 })
}

fn finish(ctx: &AmlContext, state: &mut MethodState, result: ObjectHandle, target: &Target) -> Result<ObjectHandle, AmlError> {
    conv::store(ctx, state, result.clone(), target)?;
    Ok(result)
}

fn two_operand_arith(
    ctx: &AmlContext,
    state: &mut MethodState,
    stream: &mut Stream,
    f: impl Fn(u64, u64) -> u64,
) -> Result<ObjectHandle, AmlError> {
    let a = read_integer(ctx, state, stream)?;
    let b = read_integer(ctx, state, stream)?;
    let target = supername::parse_target(stream)?;
    finish(ctx, state, new_integer(f(a, b) & ctx.ones()), &target)
}

fn eval_divide(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<ObjectHandle, AmlError> {
    let dividend = read_integer(ctx, state, stream)?;
    let divisor = read_integer(ctx, state, stream)?;
    let remainder_target = supername::parse_target(stream)?;
    let quotient_target = supername::parse_target(stream)?;
    if divisor == 0 {
        return Err(AmlError::DivideByZero);
    }
    conv::store(ctx, state, new_integer(dividend % divisor), &remainder_target)?;
    finish(ctx, state, new_integer(dividend / divisor), &quotient_target)
}

/// Reads the value currently held at `target` - the common "read-modify-write" starting point for
/// `Increment`/`Decrement`, `SizeOf`, `Acquire`, and `Release`.
fn read_target_object(ctx: &AmlContext, state: &MethodState, target: &Target) -> Result<ObjectHandle, AmlError> {
    match target {
        Target::Null | Target::Debug => Err(AmlError::OperandType),
        Target::Local(n) => state.local(*n),
        Target::Arg(n) => state.arg(*n),
        Target::Name(name) => Ok(ctx.namespace.search(name, &state.scope)?.1),
    }
}

fn eval_increment_decrement(
    ctx: &AmlContext,
    state: &mut MethodState,
    stream: &mut Stream,
    delta: i64,
) -> Result<ObjectHandle, AmlError> {
    let target = supername::parse_target(stream)?;
    let current = conv::to_integer(&read_target_object(ctx, state, &target)?, ctx)?;
    let updated = if delta > 0 { current.wrapping_add(1) } else { current.wrapping_sub(1) };
    finish(ctx, state, new_integer(updated & ctx.ones()), &target)
}

fn eval_ref_of(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<ObjectHandle, AmlError> {
    let target = supername::parse_target(stream)?;
    let obj = match target {
        Target::Null | Target::Debug => return Err(AmlError::OperandType),
        Target::Local(n) => state.local_cell(n)?,
        Target::Arg(n) => state.arg_cell(n)?,
        Target::Name(name) => ctx.namespace.search(&name, &state.scope)?.1,
    };
    Ok(ObjectNode::new(ObjectData::ObjectReference(obj)))
}

fn eval_cond_ref_of(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<ObjectHandle, AmlError> {
    let source = supername::parse_target(stream)?;
    let dest = supername::parse_target(stream)?;

    let found = match &source {
        Target::Null | Target::Debug => None,
        Target::Local(n) => Some(state.local_cell(*n)?),
        Target::Arg(n) => Some(state.arg_cell(*n)?),
        Target::Name(name) => ctx.namespace.search(name, &state.scope).ok().map(|(_, o)| o),
    };

    match found {
        Some(obj) => {
            let reference = ObjectNode::new(ObjectData::ObjectReference(obj));
            conv::store(ctx, state, reference, &dest)?;
            Ok(new_integer(ctx.ones()))
        }
        None => Ok(new_integer(0)),
    }
}

fn eval_deref_of(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<ObjectHandle, AmlError> {
    let obj = term::read_term_arg(ctx, state, stream, AmlType::all())?;
    let target = match &*obj.data.lock() {
        ObjectData::ObjectReference(target) => Some(target.clone()),
        _ => None,
    };
    match target {
        Some(target) => Ok(target),
        // A DerefOf applied to something that isn't a reference (e.g. an already-resolved
        // package element) is tolerated and passed through unchanged.
        None => Ok(obj),
    }
}

fn eval_concat(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<ObjectHandle, AmlError> {
    let a = term::read_term_arg(ctx, state, stream, AmlType::all())?;
    let b = term::read_term_arg(ctx, state, stream, AmlType::all())?;
    let target = supername::parse_target(stream)?;

    let a = conv::deref_arg_or_local(a)?;
    let b = conv::deref_arg_or_local(b)?;
    let either_string =
        matches!(&*a.data.lock(), ObjectData::String(_)) || matches!(&*b.data.lock(), ObjectData::String(_));

    let result = if either_string {
        let mut s = conv::to_string(&a, ctx)?;
        s.push_str(&conv::to_string(&b, ctx)?);
        new_string(s)
    } else {
        let mut buf = conv::to_buffer(&a, ctx)?;
        buf.extend(conv::to_buffer(&b, ctx)?);
        new_buffer(buf)
    };
    finish(ctx, state, result, &target)
}

fn eval_concat_res(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<ObjectHandle, AmlError> {
    // Resource-descriptor-aware concatenation (dropping/re-adding the End Tag) is not modeled;
    // plain buffer concatenation is close enough for tables that merge `_CRS` fragments.
    let a = term::read_term_arg(ctx, state, stream, AmlType::BUFFER)?;
    let b = term::read_term_arg(ctx, state, stream, AmlType::BUFFER)?;
    let target = supername::parse_target(stream)?;
    let mut buf = conv::to_buffer(&a, ctx)?;
    buf.extend(conv::to_buffer(&b, ctx)?);
    finish(ctx, state, new_buffer(buf), &target)
}

fn eval_size_of(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<ObjectHandle, AmlError> {
    let target = supername::parse_target(stream)?;
    let obj = conv::deref_arg_or_local(read_target_object(ctx, state, &target)?)?;
    let size = match &*obj.data.lock() {
        ObjectData::Buffer(b) => b.bytes.len() as u64,
        ObjectData::String(s) => s.len() as u64,
        ObjectData::Package(p) => p.len() as u64,
        _ => return Err(AmlError::OperandType),
    };
    Ok(new_integer(size))
}

fn eval_object_type(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<ObjectHandle, AmlError> {
    let target = supername::parse_target(stream)?;
    let obj = conv::deref_arg_or_local(read_target_object(ctx, state, &target)?)?;
    Ok(new_integer(object_type_code(obj.type_of())))
}

fn object_type_code(ty: AmlType) -> u64 {
    if ty == AmlType::INTEGER {
        1
    } else if ty == AmlType::STRING {
        2
    } else if ty == AmlType::BUFFER {
        3
    } else if ty == AmlType::PACKAGE {
        4
    } else if ty == AmlType::FIELD_UNIT {
        5
    } else if ty == AmlType::DEVICE {
        6
    } else if ty == AmlType::EVENT {
        7
    } else if ty == AmlType::METHOD {
        8
    } else if ty == AmlType::MUTEX {
        9
    } else if ty == AmlType::OPERATION_REGION {
        10
    } else if ty == AmlType::POWER_RESOURCE {
        11
    } else if ty == AmlType::PROCESSOR {
        12
    } else if ty == AmlType::THERMAL_ZONE {
        13
    } else if ty == AmlType::BUFFER_FIELD {
        14
    } else if ty == AmlType::DEBUG_OBJECT {
        16
    } else {
        0
    }
}

fn eval_index(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<ObjectHandle, AmlError> {
    let source = term::read_term_arg(ctx, state, stream, AmlType::BUFFER | AmlType::PACKAGE | AmlType::STRING)?;
    let index = read_integer(ctx, state, stream)? as usize;
    let target = supername::parse_target(stream)?;

    let result = match &mut *source.data.lock() {
        ObjectData::Package(elements) => {
            let elem = elements.get(index).cloned().ok_or(AmlError::InvalidIndex)?;
            ObjectNode::new(ObjectData::ObjectReference(elem))
        }
        ObjectData::Buffer(buf) => {
            if index >= buf.bytes.len() {
                return Err(AmlError::InvalidIndex);
            }
            if buf.byte_fields[index].is_none() {
                buf.byte_fields[index] = Some(ObjectNode::new(ObjectData::BufferField(BufferFieldData {
                    target: source.clone(),
                    target_kind: BufferFieldTargetKind::Buffer,
                    bit_offset: (index * 8) as u64,
                    bit_size: 8,
                })));
            }
            buf.byte_fields[index].clone().unwrap()
        }
        ObjectData::String(s) => {
            if index >= s.len() {
                return Err(AmlError::InvalidIndex);
            }
            ObjectNode::new(ObjectData::BufferField(BufferFieldData {
                target: source.clone(),
                target_kind: BufferFieldTargetKind::String,
                bit_offset: (index * 8) as u64,
                bit_size: 8,
            }))
        }
        _ => return Err(AmlError::OperandType),
    };
    finish(ctx, state, result, &target)
}

fn eval_match(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<ObjectHandle, AmlError> {
    let pkg_obj = term::read_term_arg(ctx, state, stream, AmlType::PACKAGE)?;
    let op1 = stream.read_byte()?;
    let operand1 = read_integer(ctx, state, stream)?;
    let op2 = stream.read_byte()?;
    let operand2 = read_integer(ctx, state, stream)?;
    let start = read_integer(ctx, state, stream)? as usize;

    let elements = match &*pkg_obj.data.lock() {
        ObjectData::Package(p) => p.clone(),
        _ => return Err(AmlError::OperandType),
    };

    for (i, elem) in elements.iter().enumerate().skip(start) {
        let value = conv::to_integer(elem, ctx).unwrap_or(0);
        if match_condition(op1, value, operand1) && match_condition(op2, value, operand2) {
            return Ok(new_integer(i as u64));
        }
    }
    Ok(new_integer(ctx.ones()))
}

fn match_condition(op: u8, value: u64, operand: u64) -> bool {
    match op {
        0 => true,
        1 => value == operand,
        2 => value <= operand,
        3 => value < operand,
        4 => value >= operand,
        5 => value > operand,
        _ => false,
    }
}

fn eval_lnot_or_compound(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<ObjectHandle, AmlError> {
    match stream.peek_byte() {
        Ok(LNOT_EQUAL_OP) => {
            stream.read_byte()?;
            compare(ctx, state, stream, |o| o != Ordering::Equal)
        }
        Ok(LLESS_EQUAL_OP) => {
            stream.read_byte()?;
            compare(ctx, state, stream, |o| o != Ordering::Greater)
        }
        Ok(LGREATER_EQUAL_OP) => {
            stream.read_byte()?;
            compare(ctx, state, stream, |o| o != Ordering::Less)
        }
        _ => {
            let a = read_integer(ctx, state, stream)?;
            Ok(bool_result(ctx, a == 0))
        }
    }
}

fn compare(
    ctx: &AmlContext,
    state: &mut MethodState,
    stream: &mut Stream,
    matches_ordering: impl Fn(Ordering) -> bool,
) -> Result<ObjectHandle, AmlError> {
    let a = term::read_term_arg(ctx, state, stream, AmlType::all())?;
    let ty = a.type_of();
    let allowed =
        if ty.contains(AmlType::STRING) { AmlType::STRING } else if ty.contains(AmlType::BUFFER) { AmlType::BUFFER } else { AmlType::INTEGER };
    let b = term::read_term_arg(ctx, state, stream, allowed)?;
    let a = conv::convert_source(a, allowed, ctx)?;

    let ordering = if allowed.contains(AmlType::INTEGER) {
        conv::to_integer(&a, ctx)?.cmp(&conv::to_integer(&b, ctx)?)
    } else if allowed.contains(AmlType::STRING) {
        conv::to_string(&a, ctx)?.cmp(&conv::to_string(&b, ctx)?)
    } else {
        conv::to_buffer(&a, ctx)?.cmp(&conv::to_buffer(&b, ctx)?)
    };
    Ok(bool_result(ctx, matches_ordering(ordering)))
}

fn convert_and_store(
    ctx: &AmlContext,
    state: &mut MethodState,
    stream: &mut Stream,
    f: impl FnOnce(ObjectHandle, &AmlContext) -> Result<ObjectHandle, AmlError>,
) -> Result<ObjectHandle, AmlError> {
    let obj = term::read_term_arg(ctx, state, stream, AmlType::all())?;
    let target = supername::parse_target(stream)?;
    let result = f(obj, ctx)?;
    finish(ctx, state, result, &target)
}

fn eval_to_string_op(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<ObjectHandle, AmlError> {
    let buf_obj = term::read_term_arg(ctx, state, stream, AmlType::BUFFER)?;
    let length = read_integer(ctx, state, stream)?;
    let target = supername::parse_target(stream)?;

    let bytes = match &*buf_obj.data.lock() {
        ObjectData::Buffer(b) => b.bytes.clone(),
        _ => return Err(AmlError::OperandType),
    };
    let limit = if length == ctx.ones() { bytes.len() } else { (length as usize).min(bytes.len()) };
    let slice = &bytes[..limit];
    let end = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
    let result = new_string(String::from_utf8_lossy(&slice[..end]).into_owned());
    finish(ctx, state, result, &target)
}

fn eval_mid(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<ObjectHandle, AmlError> {
    let source = term::read_term_arg(ctx, state, stream, AmlType::STRING | AmlType::BUFFER)?;
    let index = read_integer(ctx, state, stream)? as usize;
    let length = read_integer(ctx, state, stream)? as usize;
    let target = supername::parse_target(stream)?;

    let result = match &*source.data.lock() {
        ObjectData::String(s) => {
            let bytes = s.as_bytes();
            let start = index.min(bytes.len());
            let end = (index + length).min(bytes.len());
            new_string(String::from_utf8_lossy(&bytes[start..end]).into_owned())
        }
        ObjectData::Buffer(b) => {
            let start = index.min(b.bytes.len());
            let end = (index + length).min(b.bytes.len());
            new_buffer(b.bytes[start..end].to_vec())
        }
        _ => return Err(AmlError::OperandType),
    };
    finish(ctx, state, result, &target)
}

fn eval_acquire(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<ObjectHandle, AmlError> {
    let target = supername::parse_target(stream)?;
    let mutex_obj = read_target_object(ctx, state, &target)?;
    let timeout = stream.read_word()?;
    let status = state.mutex_stack.acquire(ctx.handler(), mutex_obj, timeout)?;
    Ok(new_integer(status as u64))
}

fn eval_release(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<ObjectHandle, AmlError> {
    let target = supername::parse_target(stream)?;
    let mutex_obj = read_target_object(ctx, state, &target)?;
    state.mutex_stack.release(&mutex_obj)?;
    Ok(new_integer(0))
}

fn from_bcd(v: u64) -> u64 {
    let mut result = 0u64;
    let mut shift = 0u32;
    let mut x = v;
    while x != 0 {
        result += (x & 0xF) * 10u64.pow(shift);
        x >>= 4;
        shift += 1;
    }
    result
}

fn to_bcd(mut v: u64) -> u64 {
    let mut result = 0u64;
    let mut shift = 0u32;
    while v != 0 {
        result |= (v % 10) << (4 * shift);
        v /= 10;
        shift += 1;
    }
    result
}

fn next_timer_tick() -> u64 {
    use core::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
    static TICKS: AtomicU64 = AtomicU64::new(0);
    TICKS.fetch_add(1, AtomicOrdering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{name::AmlName, test_utils::TestHandler, DebugVerbosity};
    use alloc::boxed::Box;

    fn ctx() -> AmlContext {
        AmlContext::new(Box::new(TestHandler::new()), DebugVerbosity::None)
    }

    #[test]
    fn add_stores_into_target_and_returns_sum() {
        let c = ctx();
        let root = c.namespace.root();
        let token = c.namespace.push_overlay();
        c.namespace
            .add_child(token, &root, crate::name::NameSeg::new(*b"FOO_").unwrap(), ObjectNode::new(ObjectData::Integer(0)))
            .unwrap();
        c.namespace.commit(token, c.sysfs());

        let mut state = MethodState::outside_method(AmlName::root());
        let bytes = [ADD_OP, BYTE_PREFIX, 2, BYTE_PREFIX, 3, b'F', b'O', b'O', b'_'];
        let mut stream = Stream::new(&bytes);
        let result = parse(&c, &mut state, &mut stream, ADD_OP).unwrap();
        assert!(matches!(&*result.data.lock(), ObjectData::Integer(5)));
    }

    #[test]
    fn divide_by_zero_is_an_error() {
        let c = ctx();
        let mut state = MethodState::outside_method(AmlName::root());
        let bytes = [DIVIDE_OP, BYTE_PREFIX, 4, ZERO_OP, NULL_NAME, NULL_NAME];
        let mut stream = Stream::new(&bytes);
        assert_eq!(parse(&c, &mut state, &mut stream, DIVIDE_OP).unwrap_err(), AmlError::DivideByZero);
    }

    #[test]
    fn lequal_on_equal_integers_is_ones() {
        let c = ctx();
        let mut state = MethodState::outside_method(AmlName::root());
        let bytes = [LEQUAL_OP, BYTE_PREFIX, 9, BYTE_PREFIX, 9];
        let mut stream = Stream::new(&bytes);
        let result = parse(&c, &mut state, &mut stream, LEQUAL_OP).unwrap();
        assert!(matches!(&*result.data.lock(), ObjectData::Integer(v) if *v == c.ones()));
    }

    #[test]
    fn lnot_equal_compound_form() {
        let c = ctx();
        let mut state = MethodState::outside_method(AmlName::root());
        // LNot(0x92) immediately followed by Lequal's second byte (0x93) forms LNotEqual.
        let bytes = [LNOT_OP, LNOT_EQUAL_OP, BYTE_PREFIX, 1, BYTE_PREFIX, 2];
        let mut stream = Stream::new(&bytes);
        let result = parse(&c, &mut state, &mut stream, LNOT_OP).unwrap();
        assert!(matches!(&*result.data.lock(), ObjectData::Integer(v) if *v == c.ones()));
    }

    #[test]
    fn find_set_bits() {
        let c = ctx();
        let mut state = MethodState::outside_method(AmlName::root());
        let bytes = [FIND_SET_LEFT_BIT_OP, BYTE_PREFIX, 0b0001_0100, NULL_NAME];
        let mut stream = Stream::new(&bytes);
        let result = parse(&c, &mut state, &mut stream, FIND_SET_LEFT_BIT_OP).unwrap();
        assert!(matches!(&*result.data.lock(), ObjectData::Integer(5)));
    }

    #[test]
    fn from_bcd_and_to_bcd_round_trip() {
        assert_eq!(from_bcd(0x42), 42);
        assert_eq!(to_bcd(42), 0x42);
    }
}
