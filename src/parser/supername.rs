//! `SuperName`/`Target` parsing (ACPI §20.2.5.3): the handful of forms that can appear as a write
//! destination - a named object, `ArgN`, `LocalN`, the `Debug` object, or nothing at all.

use crate::{name::Target, parser::data, stream::Stream, token::opcode::*, AmlError};

pub fn parse_target(stream: &mut Stream) -> Result<Target, AmlError> {
    let byte = stream.peek_byte()?;

    if byte == NULL_NAME {
        stream.read_byte()?;
        return Ok(Target::Null);
    }

    if byte == EXT_OP_PREFIX && stream.peek_byte_at(1)? == DEBUG_OP {
        stream.read_byte()?;
        stream.read_byte()?;
        return Ok(Target::Debug);
    }

    match byte {
        LOCAL0_OP..=LOCAL7_OP => {
            stream.read_byte()?;
            Ok(Target::Local(byte - LOCAL0_OP))
        }
        ARG0_OP..=ARG6_OP => {
            stream.read_byte()?;
            Ok(Target::Arg(byte - ARG0_OP))
        }
        _ => Ok(Target::Name(data::parse_name_string(stream)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_target_is_null_byte() {
        let bytes = [NULL_NAME];
        let mut stream = Stream::new(&bytes);
        assert!(matches!(parse_target(&mut stream).unwrap(), Target::Null));
    }

    #[test]
    fn local_and_arg_targets() {
        let bytes = [LOCAL0_OP + 3];
        let mut stream = Stream::new(&bytes);
        assert!(matches!(parse_target(&mut stream).unwrap(), Target::Local(3)));

        let bytes = [ARG0_OP + 2];
        let mut stream = Stream::new(&bytes);
        assert!(matches!(parse_target(&mut stream).unwrap(), Target::Arg(2)));
    }
}
