//! `NameString` parsing (ACPI §20.2.2) and `ComputationalData`/`DataRefObject` parsing
//! (ACPI §20.2.3, §20.2.5): everything that bottoms out in a literal rather than an operator.

use crate::{
    method::MethodState,
    name::{AmlName, NameSeg, NameStart},
    object::{new_buffer, new_integer, new_string, ObjectHandle, ObjectNode},
    stream::Stream,
    token::opcode::*,
    AmlContext, AmlError,
};
use alloc::{string::String, vec::Vec};

pub fn parse_name_string(stream: &mut Stream) -> Result<AmlName, AmlError> {
    let start = if stream.peek_byte()? == ROOT_CHAR {
        stream.read_byte()?;
        NameStart::Root
    } else {
        let mut carets = 0usize;
        while stream.peek_byte()? == PARENT_PREFIX_CHAR {
            stream.read_byte()?;
            carets += 1;
        }
        NameStart::Parents(carets)
    };

    let segments = parse_name_path(stream)?;
    Ok(AmlName { start, segments })
}

fn parse_name_path(stream: &mut Stream) -> Result<Vec<NameSeg>, AmlError> {
    match stream.peek_byte()? {
        NULL_NAME => {
            stream.read_byte()?;
            Ok(Vec::new())
        }
        DUAL_NAME_PREFIX => {
            stream.read_byte()?;
            Ok(alloc::vec![parse_name_seg(stream)?, parse_name_seg(stream)?])
        }
        MULTI_NAME_PREFIX => {
            stream.read_byte()?;
            let count = stream.read_byte()? as usize;
            (0..count).map(|_| parse_name_seg(stream)).collect()
        }
        _ => Ok(alloc::vec![parse_name_seg(stream)?]),
    }
}

fn parse_name_seg(stream: &mut Stream) -> Result<NameSeg, AmlError> {
    let bytes = stream.take(4)?;
    NameSeg::new([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Parses a `ComputationalData` (ACPI §20.2.3): a literal constant, or a `DefBuffer`/`DefPackage`/
/// `DefVarPackage`. Anything else is not computational data and is the caller's problem.
pub fn parse_data_ref_object(
    ctx: &AmlContext,
    state: &mut MethodState,
    stream: &mut Stream,
) -> Result<ObjectHandle, AmlError> {
    let byte = stream.read_byte()?;
    match byte {
        ZERO_OP => Ok(new_integer(0)),
        ONE_OP => Ok(new_integer(1)),
        ONES_OP => Ok(new_integer(ctx.ones())),
        BYTE_PREFIX => Ok(new_integer(stream.read_byte()? as u64)),
        WORD_PREFIX => Ok(new_integer(stream.read_word()? as u64)),
        DWORD_PREFIX => Ok(new_integer(stream.read_dword()? as u64)),
        QWORD_PREFIX => Ok(new_integer(stream.read_qword()?)),
        STRING_PREFIX => parse_string_const(stream),
        BUFFER_OP => parse_buffer(ctx, state, stream),
        PACKAGE_OP => parse_package(ctx, state, stream, false),
        VAR_PACKAGE_OP => parse_package(ctx, state, stream, true),
        _ => Err(AmlError::UnexpectedByte(byte)),
    }
}

fn parse_string_const(stream: &mut Stream) -> Result<ObjectHandle, AmlError> {
    let mut bytes = Vec::new();
    loop {
        let b = stream.read_byte()?;
        if b == 0 {
            break;
        }
        bytes.push(b);
    }
    let s = String::from_utf8(bytes).map_err(|_| AmlError::UnterminatedStringConstant)?;
    Ok(new_string(s))
}

fn parse_buffer(ctx: &AmlContext, state: &mut MethodState, stream: &mut Stream) -> Result<ObjectHandle, AmlError> {
    let pkg = crate::pkg_length::PkgLength::parse(stream)?;
    let size = crate::conv::to_integer(
        &crate::parser::term::read_term_arg(ctx, state, stream, crate::object::AmlType::INTEGER)?,
        ctx,
    )? as usize;

    let remaining = pkg.bytes_remaining(stream);
    let initial = stream.take(remaining)?;
    let mut bytes = initial.to_vec();
    bytes.resize(size.max(bytes.len()), 0);
    Ok(new_buffer(bytes))
}

fn parse_package(
    ctx: &AmlContext,
    state: &mut MethodState,
    stream: &mut Stream,
    variable_length: bool,
) -> Result<ObjectHandle, AmlError> {
    let pkg = crate::pkg_length::PkgLength::parse(stream)?;

    let declared_len = if variable_length {
        crate::conv::to_integer(
            &crate::parser::term::read_term_arg(ctx, state, stream, crate::object::AmlType::INTEGER)?,
            ctx,
        )? as usize
    } else {
        stream.read_byte()? as usize
    };

    let mut elements = Vec::new();
    while !pkg.is_at_end(stream) {
        elements.push(parse_package_element(ctx, state, stream)?);
    }
    elements.resize(declared_len.max(elements.len()), crate::object::synthetic_zero());
    Ok(ObjectNode::new(crate::object::ObjectData::Package(elements)))
}

fn parse_package_element(
    ctx: &AmlContext,
    state: &mut MethodState,
    stream: &mut Stream,
) -> Result<ObjectHandle, AmlError> {
    // A PackageElement is either a DataRefObject or a NameString referring to one (commonly a
    // forward reference, e.g. a `_PRT` package naming a device not yet parsed).
    if crate::token::classify(stream.peek_byte()?) == crate::token::TokenKind::Name {
        let name = parse_name_string(stream)?;
        let placeholder = ObjectNode::new(crate::object::ObjectData::Unresolved(crate::object::UnresolvedData {
            name,
            start_scope: state.scope.clone(),
            action: crate::object::PatchAction::ReplaceWithReference,
        }));
        ctx.patchups.register(placeholder.clone());
        return Ok(placeholder);
    }
    crate::parser::term::read_term_arg(ctx, state, stream, crate::object::AmlType::all())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dual_name_path() {
        let mut bytes = Vec::new();
        bytes.push(DUAL_NAME_PREFIX);
        bytes.extend_from_slice(b"FOO_");
        bytes.extend_from_slice(b"BAR_");
        let mut stream = Stream::new(&bytes);
        let name = parse_name_string(&mut stream).unwrap();
        assert_eq!(name.segments.len(), 2);
        assert_eq!(name.segments[0].trimmed(), "FOO");
        assert_eq!(name.segments[1].trimmed(), "BAR");
    }

    #[test]
    fn parses_rooted_single_seg() {
        let mut bytes = Vec::new();
        bytes.push(ROOT_CHAR);
        bytes.extend_from_slice(b"_SB_");
        let mut stream = Stream::new(&bytes);
        let name = parse_name_string(&mut stream).unwrap();
        assert!(matches!(name.start, NameStart::Root));
        assert_eq!(name.segments[0].trimmed(), "_SB");
    }

    #[test]
    fn parses_caret_prefixed_name() {
        let mut bytes = Vec::new();
        bytes.push(PARENT_PREFIX_CHAR);
        bytes.push(PARENT_PREFIX_CHAR);
        bytes.extend_from_slice(b"FOO_");
        let mut stream = Stream::new(&bytes);
        let name = parse_name_string(&mut stream).unwrap();
        assert!(matches!(name.start, NameStart::Parents(2)));
    }

    #[test]
    fn byte_word_dword_qword_constants() {
        let bytes = [BYTE_PREFIX, 0xAB];
        let mut stream = Stream::new(&bytes);
        let ctx = crate::AmlContext::new(
            alloc::boxed::Box::new(crate::test_utils::TestHandler::new()),
            crate::DebugVerbosity::None,
        );
        let mut state = MethodState::outside_method(AmlName::root());
        let v = parse_data_ref_object(&ctx, &mut state, &mut stream).unwrap();
        assert!(matches!(&*v.data.lock(), crate::object::ObjectData::Integer(0xAB)));
    }
}
