//! `aml` is a pure-Rust AML (ACPI Machine Language) interpreter core, used for parsing the DSDT
//! and SSDT tables from ACPI and for invoking the control methods they define. It's meant to be
//! embedded in a kernel: the kernel maps a table into memory, hands the bytes to
//! [`AmlContext::parse_table`], and the namespace it populates can then be queried and invoked
//! through the rest of this crate's API. The core never touches hardware or a filesystem
//! directly - both are reached through the [`Handler`] and [`sysfs::SysfsHandler`]
//! collaborator traits supplied by the embedder.
//!
//! ### Using the library
//! ```ignore
//! let mut context = AmlContext::new(Box::new(MyHandler), DebugVerbosity::Scopes);
//! context.parse_table(&dsdt_bytes, 2)?;
//! let value = context.invoke_method(&"\\_SB.PCI0.S08._ADR".parse().unwrap(), &[])?;
//! ```
//!
//! ### About the interpreter
//! Unlike a combinator-based parser, this crate's grammar is walked by hand in `parser/`: each
//! function consumes exactly the bytes of one grammar production and returns the `ObjectHandle`
//! (or nothing, for namespace modifiers) it produced. `namespace.rs` holds the namespace tree and
//! its overlay stack, `object.rs` the typed object model, `method.rs` the per-invocation
//! execution state, and `conv.rs` the implicit-conversion and operator semantics the evaluator
//! runs on.

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

#[cfg(test)]
pub(crate) mod test_utils;

pub(crate) mod conv;
pub(crate) mod method;
pub(crate) mod misc;
pub mod name;
pub mod object;
pub(crate) mod mutex;
pub(crate) mod namespace;
pub(crate) mod opregion;
pub(crate) mod parser;
pub(crate) mod patchup;
pub mod pci_routing;
pub(crate) mod pkg_length;
pub mod resource;
pub mod sysfs;
pub(crate) mod stream;
pub(crate) mod token;

pub use crate::{
    mutex::NEVER_TIMEOUT,
    name::AmlName,
    namespace::Namespace,
    object::{AmlType, ObjectData, ObjectHandle},
};

use crate::{
    method::invoke_method,
    name::NameSeg,
    object::{boxed_native, MethodBody, MethodData, MethodFlags, ObjectNode, RegionSpace},
    patchup::PatchupList,
};
use alloc::{boxed::Box, string::ToString};
use core::sync::atomic::{AtomicU8, Ordering};
use log::error;

/// Describes how much debug information the interpreter should emit. Everything at or below the
/// context's configured verbosity is logged through the `log` crate at `trace` level.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum DebugVerbosity {
    /// Print no debug information.
    None,
    /// Print heads and tails when entering and leaving scopes of major objects.
    Scopes,
    /// Print heads and tails when entering and leaving scopes of all objects.
    AllScopes,
    /// Print heads and tails of all objects, and extra debug information as it's parsed.
    All,
}

/// The collaborator an embedder implements to give the interpreter access to hardware (§6.2) and
/// to the handful of operations (stall, sleep, fatal-error reporting) that have to reach outside
/// the core. `region_read`/`region_write` are the operation-region back-end: the core passes the
/// natural, aligned value for the field's access width, and the back-end is responsible for
/// mapping that onto whatever the space id actually requires (port I/O, PCI config cycles, ...).
pub trait Handler: Send + Sync {
    fn region_read(&self, space: RegionSpace, offset: u64, bit_size: u8) -> Result<u64, AmlError>;
    fn region_write(&self, space: RegionSpace, offset: u64, bit_size: u8, value: u64) -> Result<(), AmlError>;

    /// Stall for at least the given number of **microseconds**. Implementations should not
    /// relinquish the processor, and so firmwares should not stall for more than ~100us.
    fn stall(&self, microseconds: u64);

    /// Sleep for at least the given number of **milliseconds**. Implementations may relinquish
    /// the processor and round up to the nearest sleep granularity they support.
    fn sleep(&self, milliseconds: u64);

    fn handle_fatal_error(&self, fatal_type: u8, fatal_code: u32, fatal_arg: u64) {
        panic!(
            "fatal error while executing AML (DefFatal): type = {:#x}, code = {:#x}, arg = {:#x}",
            fatal_type, fatal_code, fatal_arg
        );
    }
}

/// Integer width, determined once from the DSDT's revision field (§3.4) and fixed for the
/// lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntegerWidth {
    Bits32,
    Bits64,
}

impl IntegerWidth {
    pub fn ones(self) -> u64 {
        match self {
            IntegerWidth::Bits32 => u32::MAX as u64,
            IntegerWidth::Bits64 => u64::MAX,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            IntegerWidth::Bits32 => 32,
            IntegerWidth::Bits64 => 64,
        }
    }
}

/// The central type of the crate: owns the namespace, the collaborator handlers, and the small
/// amount of process-wide state (integer width, the patch-up list) described in §3 and §5. Only
/// one should exist per kernel; it should be handed the DSDT and then every SSDT in turn.
pub struct AmlContext {
    handler: Box<dyn Handler>,
    sysfs: Box<dyn sysfs::SysfsHandler>,
    pub namespace: Namespace,
    pub(crate) patchups: PatchupList,
    global_lock: crate::mutex::SimpleLock,
    integer_width: AtomicU8,
    debug_verbosity: DebugVerbosity,
}

impl AmlContext {
    pub fn new(handler: Box<dyn Handler>, debug_verbosity: DebugVerbosity) -> AmlContext {
        Self::with_sysfs(handler, Box::new(sysfs::NoopSysfs), debug_verbosity)
    }

    pub fn with_sysfs(
        handler: Box<dyn Handler>,
        sysfs: Box<dyn sysfs::SysfsHandler>,
        debug_verbosity: DebugVerbosity,
    ) -> AmlContext {
        let context = AmlContext {
            handler,
            sysfs,
            namespace: Namespace::new(),
            patchups: PatchupList::new(),
            global_lock: crate::mutex::SimpleLock::new(),
            integer_width: AtomicU8::new(IntegerWidth::Bits64 as u8),
            debug_verbosity,
        };
        context.add_predefined_objects();
        context
    }

    pub fn handler(&self) -> &dyn Handler {
        &*self.handler
    }

    pub fn sysfs(&self) -> &dyn sysfs::SysfsHandler {
        &*self.sysfs
    }

    pub(crate) fn global_lock(&self) -> &crate::mutex::SimpleLock {
        &self.global_lock
    }

    pub fn debug_verbosity(&self) -> DebugVerbosity {
        self.debug_verbosity
    }

    pub fn integer_width(&self) -> IntegerWidth {
        match self.integer_width.load(Ordering::Relaxed) {
            0 => IntegerWidth::Bits32,
            _ => IntegerWidth::Bits64,
        }
    }

    pub fn ones(&self) -> u64 {
        self.integer_width().ones()
    }

    /// Sets the integer width from a table's revision field (1 => 32-bit, >=2 => 64-bit). Only
    /// the first call (parsing the DSDT) has an effect; later tables must not change the width
    /// once method invocation may already depend on it.
    fn set_integer_width_from_revision(&self, revision: u8) {
        let width = if revision == 1 { IntegerWidth::Bits32 } else { IntegerWidth::Bits64 };
        self.integer_width.compare_exchange(
            IntegerWidth::Bits64 as u8,
            width as u8,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ).ok();
    }

    /// Parses a `TermList` spanning the whole of `stream` (the ACPI table header is assumed
    /// already stripped, per §6.1) and merges the namespace it builds into the global namespace.
    /// `revision` is the Definition Block header's revision byte, which fixes the integer width
    /// the first time it's called.
    pub fn parse_table(&self, stream: &[u8], revision: u8) -> Result<(), AmlError> {
        self.set_integer_width_from_revision(revision);

        if stream.is_empty() {
            return Ok(());
        }

        let table: alloc::sync::Arc<[u8]> = alloc::sync::Arc::from(stream);
        let result = crate::parser::parse_definition_block(self, table);
        if let Err(ref err) = result {
            error!("failed to parse AML table: {:?}", err);
        }
        self.patchups.resolve_all(self);
        result
    }

    /// Looks up a named object by its absolute or scope-relative path.
    pub fn lookup(&self, name: &AmlName) -> Result<ObjectHandle, AmlError> {
        let (_, obj) = self.namespace.search(name, &AmlName::root())?;
        Ok(obj)
    }

    /// Invokes a control method (or, per §4.3's shorthand, simply reads the value of a named
    /// object that wasn't actually encoded as a method at all).
    pub fn invoke_method(&self, path: &AmlName, args: &[ObjectHandle]) -> Result<ObjectHandle, AmlError> {
        invoke_method(self, path, args)
    }

    fn add_predefined_objects(&self) {
        let root = self.namespace.root();
        let token = self.namespace.push_overlay();

        for seg in ["_GPE", "_PR_", "_SB_", "_SI_", "_TZ_"] {
            let name = NameSeg::new(pad4(seg)).unwrap();
            self.namespace.add_child(token, &root, name, ObjectNode::new(ObjectData::PredefinedScope)).ok();
        }

        self.namespace
            .add_child(
                token,
                &root,
                NameSeg::new(pad4("_OS_")).unwrap(),
                ObjectNode::new(ObjectData::String("Microsoft Windows NT".to_string())),
            )
            .ok();

        self.namespace
            .add_child(token, &root, NameSeg::new(pad4("_REV")).unwrap(), ObjectNode::new(ObjectData::Integer(2)))
            .ok();

        let osi_method = ObjectData::Method(MethodData {
            flags: MethodFlags { arg_count: 1, serialized: false, sync_level: 0 },
            body: MethodBody::Native(boxed_native(native_osi)),
            mutex: None,
        });
        self.namespace.add_child(token, &root, NameSeg::new(pad4("_OSI")).unwrap(), ObjectNode::new(osi_method)).ok();

        self.namespace.commit(token, self.sysfs());
    }
}

fn pad4(s: &str) -> [u8; 4] {
    let mut bytes = [b'_'; 4];
    bytes[..s.len()].copy_from_slice(s.as_bytes());
    bytes
}

/// `\_OSI("string")`: reports OS capability support, following the same answers Linux gives so
/// that firmware written against either OS behaves sanely (§6.3).
fn native_osi(_ctx: &AmlContext, args: &[ObjectHandle]) -> Result<ObjectHandle, AmlError> {
    let arg = args.first().ok_or(AmlError::InvalidArgAccess(0))?;
    let supported = match &*arg.data.lock() {
        ObjectData::String(s) => is_known_osi_string(s.as_str()),
        _ => return Err(AmlError::OperandType),
    };
    Ok(object::new_integer(if supported { u64::MAX } else { 0 }))
}

fn is_known_osi_string(s: &str) -> bool {
    matches!(
        s,
        "Windows 2000"
            | "Windows 2001"
            | "Windows 2001 SP1"
            | "Windows 2001 SP2"
            | "Windows 2001.1"
            | "Windows 2001.1 SP1"
            | "Windows 2006"
            | "Windows 2006 SP1"
            | "Windows 2006 SP2"
            | "Windows 2006.1"
            | "Windows 2009"
            | "Windows 2012"
            | "Windows 2013"
            | "Windows 2015"
            | "Windows 2016"
            | "Windows 2017"
            | "Windows 2017.2"
            | "Windows 2018"
            | "Windows 2018.2"
            | "Windows 2019"
            | "Darwin"
            | "Extended Address Space Descriptor"
            | "3.0 Thermal Model"
            | "3.0 _SCP Extensions"
    )
}

/// Every way the interpreter can fail (§7): fatal parse errors abort the current table load and
/// discard its overlay; non-fatal AML exceptions unwind to the current method and are returned
/// from [`AmlContext::invoke_method`]; host errors are mapped onto `Internal`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum AmlError {
    // Parse errors.
    UnexpectedEndOfStream,
    UnexpectedByte(u8),
    InvalidNameSeg,
    InvalidPkgLength,
    InvalidNormalizedName(AmlName),
    InvalidFieldFlags,
    InvalidRegionSpace(u8),
    UnterminatedStringConstant,
    MalformedPackage,
    MalformedBuffer,
    FatalError,

    // Namespace errors.
    NameCollision(AmlName),
    NameNotFound(AmlName),
    RootHasNoParent,

    // Method execution errors.
    NotExecutingControlMethod,
    InvalidArgAccess(misc::ArgNum),
    InvalidLocalAccess(misc::LocalNum),
    TooManyArgs,
    BreakInInvalidPosition,
    ContinueInInvalidPosition,

    // Non-fatal AML exceptions (§7), modeled after ACPICA's AE_AML_* set.
    OperandType,
    OperandValue,
    UninitializedLocal,
    UninitializedArg,
    NumericOverflow,
    BufferLimit,
    PackageLimit,
    StringLimit,
    DivideByZero,
    BadName,
    InvalidSpaceId(u8),
    NoReturnValue,
    NotOwner,
    MutexOrder,
    InvalidIndex,
    CircularReference,

    // PCI routing table (_PRT) errors.
    PrtInvalidAddress,
    PrtInvalidPin,
    PrtInvalidSource,
    PrtInvalidGsi,
    PrtNoEntry,

    // Resource descriptor errors.
    ResourceDescriptorTooShort,
    ResourceDescriptorTooLong,
    UnexpectedResourceType,

    /// A host-side failure (allocation, back-end I/O) mapped onto an AML exception (§7.3).
    Internal,
}

impl core::fmt::Display for AmlError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(self, f)
    }
}

impl core::error::Error for AmlError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestHandler;
    use alloc::boxed::Box;
    use core::str::FromStr;

    #[test]
    fn predefined_objects_exist() {
        let ctx = AmlContext::new(Box::new(TestHandler::new()), DebugVerbosity::None);
        assert!(ctx.lookup(&AmlName::from_str("\\_SB").unwrap()).is_ok());
        assert!(ctx.lookup(&AmlName::from_str("\\_OSI").unwrap()).is_ok());
        assert!(ctx.lookup(&AmlName::from_str("\\_REV").unwrap()).is_ok());
    }

    #[test]
    fn osi_reports_known_strings_supported() {
        let ctx = AmlContext::new(Box::new(TestHandler::new()), DebugVerbosity::None);
        let arg = object::new_string("Windows 2015".into());
        let result = ctx.invoke_method(&AmlName::from_str("\\_OSI").unwrap(), &[arg]).unwrap();
        match &*result.data.lock() {
            ObjectData::Integer(v) => assert_eq!(*v, ctx.ones()),
            _ => panic!("expected integer"),
        }
    }

    #[test]
    fn osi_reports_unknown_strings_unsupported() {
        let ctx = AmlContext::new(Box::new(TestHandler::new()), DebugVerbosity::None);
        let arg = object::new_string("Completely Made Up OS".into());
        let result = ctx.invoke_method(&AmlName::from_str("\\_OSI").unwrap(), &[arg]).unwrap();
        match &*result.data.lock() {
            ObjectData::Integer(v) => assert_eq!(*v, 0),
            _ => panic!("expected integer"),
        }
    }
}
