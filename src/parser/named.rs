//! `NamedObj` parsing (ACPI §20.2.5.2 "Named Objects Encoding"): every named-object declaration
//! that isn't a bare `Name`/`Alias`/`Scope` (those live in `namespace_modifier`). Covers control
//! method declarations, operation regions and their fields, processors, power resources, thermal
//! zones, mutexes, events, and the `CreateXxxField` buffer-field shorthands.

use crate::{
    method::MethodState,
    name::{AmlName, NameSeg},
    object::{
        BufferFieldData, BufferFieldTargetKind, FieldFlags, FieldKind, FieldUnitData, MethodBody,
        MethodData, MethodFlags, MutexData, ObjectData, ObjectNode, OpRegionData,
        PowerResourceData, ProcessorData, RegionSpace,
    },
    parser::{data, namespace_modifier, term},
    pkg_length::PkgLength,
    stream::Stream,
    token::opcode::*,
    AmlContext, AmlError,
};
use alloc::sync::Arc;

pub fn parse(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream, table: &Arc<[u8]>) -> Result<(), AmlError> {
    let byte = stream.read_byte()?;
    if byte == EXT_OP_PREFIX {
        let ext = stream.read_byte()?;
        return match ext {
            MUTEX_OP => parse_mutex(ctx, state, stream),
            EVENT_OP => parse_event(ctx, state, stream),
            OP_REGION_OP => parse_op_region(ctx, state, stream),
            FIELD_OP => parse_field(ctx, state, stream),
            INDEX_FIELD_OP => parse_index_field(ctx, state, stream),
            BANK_FIELD_OP => parse_bank_field(ctx, state, stream),
            DEVICE_OP => parse_device(ctx, state, stream, table),
            PROCESSOR_OP => parse_processor(ctx, state, stream, table),
            POWER_RES_OP => parse_power_resource(ctx, state, stream, table),
            THERMAL_ZONE_OP => parse_thermal_zone(ctx, state, stream, table),
            CREATE_FIELD_OP => parse_create_field(ctx, state, stream),
            DATA_REGION_OP => parse_data_table_region(ctx, state, stream),
            _ => Err(AmlError::UnexpectedByte(ext)),
        };
    }

    match byte {
        METHOD_OP => parse_method(ctx, state, stream, table),
        EXTERNAL_OP => parse_external(stream),
        CREATE_BIT_FIELD_OP => parse_create_fixed_field(ctx, state, stream, 1, true),
        CREATE_BYTE_FIELD_OP => parse_create_fixed_field(ctx, state, stream, 8, false),
        CREATE_WORD_FIELD_OP => parse_create_fixed_field(ctx, state, stream, 16, false),
        CREATE_DWORD_FIELD_OP => parse_create_fixed_field(ctx, state, stream, 32, false),
        CREATE_QWORD_FIELD_OP => parse_create_fixed_field(ctx, state, stream, 64, false),
        _ => Err(AmlError::UnexpectedByte(byte)),
    }
}

fn parse_method(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream, table: &Arc<[u8]>) -> Result<(), AmlError> {
    let pkg = PkgLength::parse(stream)?;
    let name = data::parse_name_string(stream)?;
    let flags_byte = stream.read_byte()?;
    let flags = MethodFlags {
        arg_count: flags_byte & 0x07,
        serialized: flags_byte & 0x08 != 0,
        sync_level: (flags_byte >> 4) & 0x0F,
    };

    // The body is never parsed here - only its byte range is recorded - since every invocation
    // re-reads these bytes from scratch rather than evaluating a cached form (§3.2).
    let start = stream.offset();
    let end = pkg.end_offset;
    stream.take(end.saturating_sub(start))?;

    let mutex = if flags.serialized { Some(Arc::new(crate::mutex::SimpleLock::new())) } else { None };
    let method = ObjectNode::new(ObjectData::Method(MethodData {
        flags,
        body: MethodBody::Aml { table: table.clone(), start, end },
        mutex,
    }));
    namespace_modifier::declare(ctx, state, &name, method).map(|_| ())
}

/// `External` only declares the type and arity of a name this table expects some other table to
/// define; with every table present (the common case for a fully assembled namespace) there's
/// nothing further to record, so this just skips past it.
fn parse_external(stream: &mut Stream) -> Result<(), AmlError> {
    let _name = data::parse_name_string(stream)?;
    let _object_type = stream.read_byte()?;
    let _arg_count = stream.read_byte()?;
    Ok(())
}

fn parse_mutex(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<(), AmlError> {
    let name = data::parse_name_string(stream)?;
    let sync_level = stream.read_byte()? & 0x0F;
    let mutex = ObjectNode::new(ObjectData::Mutex(MutexData { sync_level, lock: Arc::new(crate::mutex::SimpleLock::new()) }));
    namespace_modifier::declare(ctx, state, &name, mutex).map(|_| ())
}

fn parse_event(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<(), AmlError> {
    let name = data::parse_name_string(stream)?;
    namespace_modifier::declare(ctx, state, &name, ObjectNode::new(ObjectData::Event)).map(|_| ())
}

fn parse_op_region(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<(), AmlError> {
    let name = data::parse_name_string(stream)?;
    let space = RegionSpace::from_byte(stream.read_byte()?);
    let offset = crate::conv::to_integer(&term::read_term_arg(ctx, state, stream, crate::object::AmlType::INTEGER)?, ctx)?;
    let length = crate::conv::to_integer(&term::read_term_arg(ctx, state, stream, crate::object::AmlType::INTEGER)?, ctx)?;
    let region = ObjectNode::new(ObjectData::OperationRegion(OpRegionData { space, offset, length }));
    namespace_modifier::declare(ctx, state, &name, region).map(|_| ())
}

/// `DataTableRegion` sources an operation region from an already-loaded auxiliary ACPI table
/// (by signature/OEM ID/OEM table ID) rather than a fixed address range. Loading auxiliary
/// tables at runtime is out of scope for this core (see `LoadTable`), so the region is declared
/// empty; field accesses against it fail cleanly with `OperandValue` instead of reading real data.
fn parse_data_table_region(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<(), AmlError> {
    let name = data::parse_name_string(stream)?;
    let _signature = term::read_term_arg(ctx, state, stream, crate::object::AmlType::STRING)?;
    let _oem_id = term::read_term_arg(ctx, state, stream, crate::object::AmlType::STRING)?;
    let _oem_table_id = term::read_term_arg(ctx, state, stream, crate::object::AmlType::STRING)?;
    let region = ObjectNode::new(ObjectData::OperationRegion(OpRegionData {
        space: RegionSpace::SystemMemory,
        offset: 0,
        length: 0,
    }));
    namespace_modifier::declare(ctx, state, &name, region).map(|_| ())
}

fn parse_field_flags(stream: &mut Stream) -> Result<FieldFlags, AmlError> {
    Ok(FieldFlags::from_bits_truncate(stream.read_byte()?))
}

/// A field-list entry's bit count is encoded exactly like a `PkgLength`, but means "this many
/// bits" here rather than "the enclosing structure ends this many bytes from here".
fn parse_field_bit_count(stream: &mut Stream) -> Result<u64, AmlError> {
    let start = stream.offset();
    let pkg = PkgLength::parse(stream)?;
    Ok((pkg.end_offset - start) as u64)
}

/// Parses the `FieldList` shared by `DefField`/`DefIndexField`/`DefBankField`: a sequence of
/// `NamedField`/`ReservedField`/`AccessField`/`ConnectField` entries, declaring a `FieldUnit` at
/// its accumulated bit offset for each named one.
fn parse_field_list(
    ctx: &AmlContext,
    state: &MethodState,
    stream: &mut Stream,
    end_offset: usize,
    flags: FieldFlags,
    kind: impl Fn() -> FieldKind,
) -> Result<(), AmlError> {
    let mut bit_offset = 0u64;
    let mut current_flags = flags;

    while stream.offset() < end_offset {
        match stream.peek_byte()? {
            0x00 => {
                stream.read_byte()?;
                bit_offset += parse_field_bit_count(stream)?;
            }
            0x01 => {
                stream.read_byte()?;
                let access_type = stream.read_byte()?;
                let _access_attrib = stream.read_byte()?;
                current_flags = FieldFlags::from_bits_truncate(
                    (current_flags.bits() & !FieldFlags::ACCESS_TYPE_MASK.bits()) | (access_type & 0x0F),
                );
            }
            0x02 => {
                stream.read_byte()?;
                // ConnectField: a NameString or inline resource buffer naming a GPIO/SerialBus
                // connection. Neither is modelled by this core; just stay in sync with the stream.
                if crate::token::classify(stream.peek_byte()?) == crate::token::TokenKind::Name {
                    data::parse_name_string(stream)?;
                } else {
                    let mut scratch = MethodState::outside_method(state.scope.clone());
                    data::parse_data_ref_object(ctx, &mut scratch, stream)?;
                }
            }
            0x03 => {
                stream.read_byte()?;
                let access_type = stream.read_byte()?;
                let _extended_attrib = stream.read_byte()?;
                let _access_length = stream.read_byte()?;
                current_flags = FieldFlags::from_bits_truncate(
                    (current_flags.bits() & !FieldFlags::ACCESS_TYPE_MASK.bits()) | (access_type & 0x0F),
                );
            }
            _ => {
                let seg_bytes = stream.take(4)?;
                let seg = NameSeg::new([seg_bytes[0], seg_bytes[1], seg_bytes[2], seg_bytes[3]])?;
                let bits = parse_field_bit_count(stream)?;
                let field = ObjectNode::new(ObjectData::FieldUnit(FieldUnitData {
                    kind: kind(),
                    flags: current_flags,
                    bit_offset,
                    bit_size: bits,
                }));
                namespace_modifier::declare(ctx, state, &AmlName::single(seg), field)?;
                bit_offset += bits;
            }
        }
    }
    Ok(())
}

fn parse_field(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<(), AmlError> {
    let pkg = PkgLength::parse(stream)?;
    let name = data::parse_name_string(stream)?;
    let flags = parse_field_flags(stream)?;
    let (_, region) = ctx.namespace.search(&name, &state.scope)?;
    parse_field_list(ctx, state, stream, pkg.end_offset, flags, move || FieldKind::Field { region: region.clone() })
}

fn parse_index_field(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<(), AmlError> {
    let pkg = PkgLength::parse(stream)?;
    let index_name = data::parse_name_string(stream)?;
    let data_name = data::parse_name_string(stream)?;
    let flags = parse_field_flags(stream)?;
    let (_, index) = ctx.namespace.search(&index_name, &state.scope)?;
    let (_, data_reg) = ctx.namespace.search(&data_name, &state.scope)?;
    parse_field_list(ctx, state, stream, pkg.end_offset, flags, move || {
        FieldKind::IndexField { index: index.clone(), data: data_reg.clone() }
    })
}

fn parse_bank_field(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<(), AmlError> {
    let pkg = PkgLength::parse(stream)?;
    let region_name = data::parse_name_string(stream)?;
    let bank_name = data::parse_name_string(stream)?;
    let (_, region) = ctx.namespace.search(&region_name, &state.scope)?;
    let (_, bank) = ctx.namespace.search(&bank_name, &state.scope)?;
    let bank_value = crate::conv::to_integer(&term::read_term_arg(ctx, state, stream, crate::object::AmlType::INTEGER)?, ctx)?;
    let flags = parse_field_flags(stream)?;
    parse_field_list(ctx, state, stream, pkg.end_offset, flags, move || FieldKind::BankField {
        region: region.clone(),
        bank: bank.clone(),
        bank_value,
    })
}

fn parse_device(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream, table: &Arc<[u8]>) -> Result<(), AmlError> {
    let pkg = PkgLength::parse(stream)?;
    let name = data::parse_name_string(stream)?;
    parse_scope_body(ctx, state, stream, table, &pkg, &name, || ObjectData::Device)
}

fn parse_processor(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream, table: &Arc<[u8]>) -> Result<(), AmlError> {
    let pkg = PkgLength::parse(stream)?;
    let name = data::parse_name_string(stream)?;
    let proc_id = stream.read_byte()?;
    let pblk_addr = stream.read_dword()?;
    let pblk_len = stream.read_byte()?;
    parse_scope_body(ctx, state, stream, table, &pkg, &name, move || {
        ObjectData::Processor(ProcessorData { proc_id, pblk_addr, pblk_len })
    })
}

fn parse_power_resource(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream, table: &Arc<[u8]>) -> Result<(), AmlError> {
    let pkg = PkgLength::parse(stream)?;
    let name = data::parse_name_string(stream)?;
    let system_level = stream.read_byte()?;
    let resource_order = stream.read_word()?;
    parse_scope_body(ctx, state, stream, table, &pkg, &name, move || {
        ObjectData::PowerResource(PowerResourceData { system_level, resource_order })
    })
}

fn parse_thermal_zone(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream, table: &Arc<[u8]>) -> Result<(), AmlError> {
    let pkg = PkgLength::parse(stream)?;
    let name = data::parse_name_string(stream)?;
    parse_scope_body(ctx, state, stream, table, &pkg, &name, || ObjectData::ThermalZone)
}

/// Shared body for every scope-opening named declaration (`Device`/`Processor`/`PowerResource`/
/// `ThermalZone`): declares (or reuses, per §4.2's duplicate policy) the scope object, then parses
/// its nested `TermList` with the current scope set to it, in a fresh overlay committed or
/// discarded independently of the scope object's own declaration.
fn parse_scope_body(
    ctx: &AmlContext,
    state: &mut MethodState,
    stream: &mut Stream,
    table: &Arc<[u8]>,
    pkg: &PkgLength,
    name: &AmlName,
    build: impl FnOnce() -> ObjectData,
) -> Result<(), AmlError> {
    let (resolved, _obj, _already_existed) = namespace_modifier::declare_or_reuse_scope(ctx, state, name, build)?;

    let token = ctx.namespace.push_overlay();
    let previous_scope = core::mem::replace(&mut state.scope, resolved);
    let result = term::term_list(ctx, state, stream, pkg, table);
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

fn parse_create_fixed_field(
    ctx: &AmlContext,
    state: &mut MethodState,
    stream: &mut Stream,
    bit_size: u64,
    index_is_bits: bool,
) -> Result<(), AmlError> {
    let source = term::read_term_arg(ctx, state, stream, crate::object::AmlType::BUFFER)?;
    let index = crate::conv::to_integer(&term::read_term_arg(ctx, state, stream, crate::object::AmlType::INTEGER)?, ctx)?;
    let name = data::parse_name_string(stream)?;

    let bit_offset = if index_is_bits { index } else { index * 8 };
    let field = ObjectNode::new(ObjectData::BufferField(BufferFieldData {
        target: source,
        target_kind: BufferFieldTargetKind::Buffer,
        bit_offset,
        bit_size,
    }));
    namespace_modifier::declare(ctx, state, &name, field).map(|_| ())
}

fn parse_create_field(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<(), AmlError> {
    let source = term::read_term_arg(ctx, state, stream, crate::object::AmlType::BUFFER)?;
    let bit_index = crate::conv::to_integer(&term::read_term_arg(ctx, state, stream, crate::object::AmlType::INTEGER)?, ctx)?;
    let num_bits = crate::conv::to_integer(&term::read_term_arg(ctx, state, stream, crate::object::AmlType::INTEGER)?, ctx)?;
    let name = data::parse_name_string(stream)?;

    let field = ObjectNode::new(ObjectData::BufferField(BufferFieldData {
        target: source,
        target_kind: BufferFieldTargetKind::Buffer,
        bit_offset: bit_index,
        bit_size: num_bits,
    }));
    namespace_modifier::declare(ctx, state, &name, field).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{object::ObjectData, test_utils::TestHandler, DebugVerbosity};
    use alloc::boxed::Box;
    use core::str::FromStr;

    fn ctx() -> AmlContext {
        AmlContext::new(Box::new(TestHandler::new()), DebugVerbosity::None)
    }

    fn no_table() -> Arc<[u8]> {
        Arc::from(&[][..])
    }

    #[test]
    fn method_records_its_own_byte_range() {
        let c = ctx();
        let mut state = MethodState::outside_method(AmlName::root());
        // Method(TEST, 1) { One } - body is one byte (ONE_OP).
        let bytes = [METHOD_OP, 7, b'T', b'E', b'S', b'T', 0x01, ONE_OP];
        let mut stream = Stream::new(&bytes);
        parse(&c, &mut state, &mut stream, &no_table()).unwrap();

        let (_, obj) = c.namespace.search(&AmlName::from_str("TEST").unwrap(), &AmlName::root()).unwrap();
        match &*obj.data.lock() {
            ObjectData::Method(m) => {
                assert_eq!(m.flags.arg_count, 1);
                match &m.body {
                    MethodBody::Aml { start, end, .. } => assert_eq!(end - start, 1),
                    _ => panic!("expected Aml body"),
                }
            }
            _ => panic!("expected Method"),
        }
    }

    #[test]
    fn mutex_declares_with_sync_level() {
        let c = ctx();
        let mut state = MethodState::outside_method(AmlName::root());
        let bytes = [EXT_OP_PREFIX, MUTEX_OP, b'M', b'T', b'X', b'_', 0x03];
        let mut stream = Stream::new(&bytes);
        parse(&c, &mut state, &mut stream, &no_table()).unwrap();

        let (_, obj) = c.namespace.search(&AmlName::from_str("MTX").unwrap(), &AmlName::root()).unwrap();
        match &*obj.data.lock() {
            ObjectData::Mutex(m) => assert_eq!(m.sync_level, 3),
            _ => panic!("expected Mutex"),
        }
    }

    #[test]
    fn op_region_declares_space_and_extent() {
        let c = ctx();
        let mut state = MethodState::outside_method(AmlName::root());
        // OperationRegion(REG0, SystemIO, 0x10, 0x4)
        let bytes = [
            EXT_OP_PREFIX, OP_REGION_OP, b'R', b'E', b'G', b'0', 0x01, BYTE_PREFIX, 0x10, BYTE_PREFIX, 0x04,
        ];
        let mut stream = Stream::new(&bytes);
        parse(&c, &mut state, &mut stream, &no_table()).unwrap();

        let (_, obj) = c.namespace.search(&AmlName::from_str("REG0").unwrap(), &AmlName::root()).unwrap();
        match &*obj.data.lock() {
            ObjectData::OperationRegion(r) => {
                assert_eq!(r.space, RegionSpace::SystemIo);
                assert_eq!(r.offset, 0x10);
                assert_eq!(r.length, 0x04);
            }
            _ => panic!("expected OperationRegion"),
        }
    }

    #[test]
    fn device_scope_nested_name_is_reachable() {
        let c = ctx();
        let mut state = MethodState::outside_method(AmlName::root());
        let inner = [NAME_OP, b'V', b'A', b'L', b'0', BYTE_PREFIX, 7];
        let mut bytes = alloc::vec![EXT_OP_PREFIX, DEVICE_OP, (1 + 4 + inner.len()) as u8];
        bytes.extend_from_slice(b"DEV0");
        bytes.extend_from_slice(&inner);

        let mut stream = Stream::new(&bytes);
        parse(&c, &mut state, &mut stream, &no_table()).unwrap();

        let (_, dev) = c.namespace.search(&AmlName::from_str("DEV0").unwrap(), &AmlName::root()).unwrap();
        assert!(matches!(&*dev.data.lock(), ObjectData::Device));
        let (_, val) = c.namespace.search(&AmlName::from_str("DEV0.VAL0").unwrap(), &AmlName::root()).unwrap();
        assert!(matches!(&*val.data.lock(), ObjectData::Integer(7)));
    }

    #[test]
    fn create_byte_field_reads_from_declared_buffer() {
        let c = ctx();
        let mut state = MethodState::outside_method(AmlName::root());

        // Name(BUF0, Buffer(2) {0xAA, 0xBB})
        let name_bytes = [
            NAME_OP, b'B', b'U', b'F', b'0', BUFFER_OP, 5, BYTE_PREFIX, 2, 0xAA, 0xBB,
        ];
        let mut stream = Stream::new(&name_bytes);
        crate::parser::namespace_modifier::parse(&c, &mut state, &mut stream, &no_table()).unwrap();

        // CreateByteField(BUF0, 1, FLD0)
        let field_bytes = [CREATE_BYTE_FIELD_OP, b'B', b'U', b'F', b'0', BYTE_PREFIX, 1, b'F', b'L', b'D', b'0'];
        let mut stream = Stream::new(&field_bytes);
        parse(&c, &mut state, &mut stream, &no_table()).unwrap();

        let (_, fld) = c.namespace.search(&AmlName::from_str("FLD0").unwrap(), &AmlName::root()).unwrap();
        match &*fld.data.lock() {
            ObjectData::BufferField(f) => {
                assert_eq!(f.bit_offset, 8);
                assert_eq!(f.bit_size, 8);
            }
            _ => panic!("expected BufferField"),
        }
    }
}
