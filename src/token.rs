//! Opcode constants and the dense token table (§4.1). A token is either a single byte or a
//! two-byte extended opcode (`ExtOpPrefix` 0x5B, or the `LNot`-family prefix 0x92). We classify
//! every opcode we care about into [`TokenKind`] so the parser's dispatch functions can match on
//! meaning rather than re-deriving it from the raw byte every time.

pub mod opcode {
    pub const ZERO_OP: u8 = 0x00;
    pub const ONE_OP: u8 = 0x01;
    pub const ALIAS_OP: u8 = 0x06;
    pub const NAME_OP: u8 = 0x08;
    pub const BYTE_PREFIX: u8 = 0x0A;
    pub const WORD_PREFIX: u8 = 0x0B;
    pub const DWORD_PREFIX: u8 = 0x0C;
    pub const STRING_PREFIX: u8 = 0x0D;
    pub const QWORD_PREFIX: u8 = 0x0E;
    pub const SCOPE_OP: u8 = 0x10;
    pub const BUFFER_OP: u8 = 0x11;
    pub const PACKAGE_OP: u8 = 0x12;
    pub const VAR_PACKAGE_OP: u8 = 0x13;
    pub const METHOD_OP: u8 = 0x14;
    pub const EXTERNAL_OP: u8 = 0x15;
    pub const DUAL_NAME_PREFIX: u8 = 0x2E;
    pub const MULTI_NAME_PREFIX: u8 = 0x2F;
    pub const EXT_OP_PREFIX: u8 = 0x5B;
    pub const ROOT_CHAR: u8 = 0x5C;
    pub const PARENT_PREFIX_CHAR: u8 = 0x5E;
    pub const NULL_NAME: u8 = 0x00;
    pub const LOCAL0_OP: u8 = 0x60;
    pub const LOCAL7_OP: u8 = 0x67;
    pub const ARG0_OP: u8 = 0x68;
    pub const ARG6_OP: u8 = 0x6E;
    pub const STORE_OP: u8 = 0x70;
    pub const REF_OF_OP: u8 = 0x71;
    pub const ADD_OP: u8 = 0x72;
    pub const CONCAT_OP: u8 = 0x73;
    pub const SUBTRACT_OP: u8 = 0x74;
    pub const INCREMENT_OP: u8 = 0x75;
    pub const DECREMENT_OP: u8 = 0x76;
    pub const MULTIPLY_OP: u8 = 0x77;
    pub const DIVIDE_OP: u8 = 0x78;
    pub const SHIFT_LEFT_OP: u8 = 0x79;
    pub const SHIFT_RIGHT_OP: u8 = 0x7A;
    pub const AND_OP: u8 = 0x7B;
    pub const NAND_OP: u8 = 0x7C;
    pub const OR_OP: u8 = 0x7D;
    pub const NOR_OP: u8 = 0x7E;
    pub const XOR_OP: u8 = 0x7F;
    pub const NOT_OP: u8 = 0x80;
    pub const FIND_SET_LEFT_BIT_OP: u8 = 0x81;
    pub const FIND_SET_RIGHT_BIT_OP: u8 = 0x82;
    pub const DEREF_OF_OP: u8 = 0x83;
    pub const CONCAT_RES_OP: u8 = 0x84;
    pub const MOD_OP: u8 = 0x85;
    pub const NOTIFY_OP: u8 = 0x86;
    pub const SIZE_OF_OP: u8 = 0x87;
    pub const INDEX_OP: u8 = 0x88;
    pub const MATCH_OP: u8 = 0x89;
    pub const CREATE_DWORD_FIELD_OP: u8 = 0x8A;
    pub const CREATE_WORD_FIELD_OP: u8 = 0x8B;
    pub const CREATE_BYTE_FIELD_OP: u8 = 0x8C;
    pub const CREATE_BIT_FIELD_OP: u8 = 0x8D;
    pub const OBJECT_TYPE_OP: u8 = 0x8E;
    pub const CREATE_QWORD_FIELD_OP: u8 = 0x8F;
    pub const LAND_OP: u8 = 0x90;
    pub const LOR_OP: u8 = 0x91;
    pub const LNOT_OP: u8 = 0x92;
    pub const LNOT_EQUAL_OP: u8 = 0x93; // second byte after 0x92
    pub const LLESS_EQUAL_OP: u8 = 0x94; // second byte after 0x92
    pub const LGREATER_EQUAL_OP: u8 = 0x95; // second byte after 0x92
    pub const LEQUAL_OP: u8 = 0x93;
    pub const LGREATER_OP: u8 = 0x94;
    pub const LLESS_OP: u8 = 0x95;
    pub const TO_BUFFER_OP: u8 = 0x96;
    pub const TO_DECIMAL_STRING_OP: u8 = 0x97;
    pub const TO_HEX_STRING_OP: u8 = 0x98;
    pub const TO_INTEGER_OP: u8 = 0x99;
    pub const TO_STRING_OP: u8 = 0x9C;
    pub const COPY_OBJECT_OP: u8 = 0x9D;
    pub const MID_OP: u8 = 0x9E;
    pub const CONTINUE_OP: u8 = 0x9F;
    pub const IF_OP: u8 = 0xA0;
    pub const ELSE_OP: u8 = 0xA1;
    pub const WHILE_OP: u8 = 0xA2;
    pub const NOOP_OP: u8 = 0xA3;
    pub const RETURN_OP: u8 = 0xA4;
    pub const BREAK_OP: u8 = 0xA5;
    pub const BREAKPOINT_OP: u8 = 0xCC;
    pub const ONES_OP: u8 = 0xFF;

    // Extended (0x5B-prefixed) opcodes.
    pub const MUTEX_OP: u8 = 0x01;
    pub const EVENT_OP: u8 = 0x02;
    pub const COND_REF_OF_OP: u8 = 0x12;
    pub const CREATE_FIELD_OP: u8 = 0x13;
    pub const LOAD_TABLE_OP: u8 = 0x1F;
    pub const LOAD_OP: u8 = 0x20;
    pub const STALL_OP: u8 = 0x21;
    pub const SLEEP_OP: u8 = 0x22;
    pub const ACQUIRE_OP: u8 = 0x23;
    pub const SIGNAL_OP: u8 = 0x24;
    pub const WAIT_OP: u8 = 0x25;
    pub const RESET_OP: u8 = 0x26;
    pub const RELEASE_OP: u8 = 0x27;
    pub const FROM_BCD_OP: u8 = 0x28;
    pub const TO_BCD_OP: u8 = 0x29;
    pub const REVISION_OP: u8 = 0x30;
    pub const DEBUG_OP: u8 = 0x31;
    pub const FATAL_OP: u8 = 0x32;
    pub const TIMER_OP: u8 = 0x33;
    pub const OP_REGION_OP: u8 = 0x80;
    pub const FIELD_OP: u8 = 0x81;
    pub const DEVICE_OP: u8 = 0x82;
    pub const PROCESSOR_OP: u8 = 0x83;
    pub const POWER_RES_OP: u8 = 0x84;
    pub const THERMAL_ZONE_OP: u8 = 0x85;
    pub const INDEX_FIELD_OP: u8 = 0x86;
    pub const BANK_FIELD_OP: u8 = 0x87;
    pub const DATA_REGION_OP: u8 = 0x88;
}

/// A coarse classification of an opcode's grammatical role, used mostly for diagnostics and for
/// a handful of "is this the start of a TermArg at all" checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Name,
    NamespaceModifier,
    NamedObj,
    Statement,
    Expression,
    Arg,
    Local,
    Computational,
    Debug,
    Unknown,
}

/// Looks up the coarse kind of a single, unprefixed opcode byte. Extended opcodes are classified
/// by their callers (in `parser::term`), since the meaning of the second byte depends on which
/// prefix introduced it.
pub fn classify(byte: u8) -> TokenKind {
    use opcode::*;
    match byte {
        ZERO_OP | ONE_OP | ONES_OP | BYTE_PREFIX | WORD_PREFIX | DWORD_PREFIX | QWORD_PREFIX | STRING_PREFIX
        | BUFFER_OP | PACKAGE_OP | VAR_PACKAGE_OP => TokenKind::Computational,
        LOCAL0_OP..=LOCAL7_OP => TokenKind::Local,
        ARG0_OP..=ARG6_OP => TokenKind::Arg,
        ALIAS_OP | NAME_OP | SCOPE_OP => TokenKind::NamespaceModifier,
        METHOD_OP | EXTERNAL_OP => TokenKind::NamedObj,
        // `CreateXxxField` opcodes declare a new named `BufferField` object, even though they sit
        // in the same opcode range as the arithmetic/logical expressions (§4.2).
        CREATE_DWORD_FIELD_OP | CREATE_WORD_FIELD_OP | CREATE_BYTE_FIELD_OP | CREATE_BIT_FIELD_OP
        | CREATE_QWORD_FIELD_OP => TokenKind::NamedObj,
        IF_OP | ELSE_OP | WHILE_OP | RETURN_OP | BREAK_OP | CONTINUE_OP | NOOP_OP | NOTIFY_OP | BREAKPOINT_OP => {
            TokenKind::Statement
        }
        ROOT_CHAR | PARENT_PREFIX_CHAR | DUAL_NAME_PREFIX | MULTI_NAME_PREFIX => TokenKind::Name,
        b if b.is_ascii_uppercase() || b == b'_' => TokenKind::Name,
        _ => TokenKind::Expression,
    }
}
