//! The typed object model (§3.2). Every AML object is represented by an [`ObjectNode`], shared
//! through [`ObjectHandle`] (an `Arc`, so the strong count **is** the reference count described
//! in the spec - no separate manual counter is needed, and `Drop` glue on the contained
//! `ObjectData` automatically releases references held by e.g. a `Package`'s elements).
//!
//! Mutable per-object state (flags, the namespace-link, children, and the payload) each live
//! behind their own small `spin::Mutex`, so an `ObjectHandle` can be shared and mutated from
//! multiple method invocations without the whole namespace being locked for the duration of an
//! unrelated object's access.

use crate::{mutex::SimpleLock, name::NameSeg, AmlError};
use alloc::{string::String, sync::Arc, sync::Weak, vec::Vec};
use bitflags::bitflags;
use core::fmt;
use spin::Mutex;

use crate::misc::{next_object_id, ObjectId};

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct ObjectFlags: u32 {
        const ROOT              = 1 << 0;
        const NAMED             = 1 << 1;
        const EXCEPTION_ON_USE  = 1 << 2;
        const EXPOSED_IN_SYSFS  = 1 << 3;
    }
}

bitflags! {
    /// The AML type tag, as a bitmask so "allowed type" sets (e.g. `{Integer, String, Buffer}`)
    /// can be expressed directly, per §3.2 and ACPI §19.3.5's `ObjectType`/`DataRefObject` groups.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct AmlType: u32 {
        const UNINITIALIZED   = 1 << 0;
        const BUFFER          = 1 << 1;
        const BUFFER_FIELD    = 1 << 2;
        const DEBUG_OBJECT    = 1 << 3;
        const DEVICE          = 1 << 4;
        const EVENT           = 1 << 5;
        const FIELD_UNIT      = 1 << 6;
        const INTEGER         = 1 << 7;
        const METHOD          = 1 << 8;
        const MUTEX           = 1 << 9;
        const OBJECT_REFERENCE = 1 << 10;
        const OPERATION_REGION = 1 << 11;
        const PACKAGE         = 1 << 12;
        const POWER_RESOURCE  = 1 << 13;
        const PROCESSOR       = 1 << 14;
        const STRING          = 1 << 15;
        const THERMAL_ZONE    = 1 << 16;
        const ALIAS           = 1 << 17;
        const UNRESOLVED      = 1 << 18;
        const PREDEFINED_SCOPE = 1 << 19;
        const ARG             = 1 << 20;
        const LOCAL           = 1 << 21;

        const COMPUTATIONAL_DATA = Self::INTEGER.bits() | Self::STRING.bits() | Self::BUFFER.bits();
        const DATA_OBJECTS       = Self::COMPUTATIONAL_DATA.bits() | Self::PACKAGE.bits();
        const DATA_REF_OBJECTS   = Self::DATA_OBJECTS.bits() | Self::OBJECT_REFERENCE.bits();
        const SCOPES = Self::DEVICE.bits() | Self::PROCESSOR.bits() | Self::POWER_RESOURCE.bits()
            | Self::THERMAL_ZONE.bits() | Self::PREDEFINED_SCOPE.bits();
    }
}

impl fmt::Display for AmlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub type ObjectHandle = Arc<ObjectNode>;

/// The link an object has into the namespace tree, present only while the object carries the
/// `Named` flag.
pub struct NamedInfo {
    pub name: NameSeg,
    pub parent: Weak<ObjectNode>,
}

pub struct ObjectNode {
    pub id: ObjectId,
    flags: Mutex<ObjectFlags>,
    named: Mutex<Option<NamedInfo>>,
    children: Mutex<Vec<ObjectHandle>>,
    pub data: Mutex<ObjectData>,
}

impl ObjectNode {
    pub fn new(data: ObjectData) -> ObjectHandle {
        Arc::new(ObjectNode {
            id: next_object_id(),
            flags: Mutex::new(ObjectFlags::empty()),
            named: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            data: Mutex::new(data),
        })
    }

    pub fn new_root() -> ObjectHandle {
        let handle = ObjectNode::new(ObjectData::PredefinedScope);
        *handle.flags.lock() = ObjectFlags::ROOT | ObjectFlags::NAMED;
        handle
    }

    pub fn flags(&self) -> ObjectFlags {
        *self.flags.lock()
    }

    pub fn set_flag(&self, flag: ObjectFlags, on: bool) {
        let mut flags = self.flags.lock();
        flags.set(flag, on);
    }

    pub fn is_named(&self) -> bool {
        self.flags().contains(ObjectFlags::NAMED)
    }

    pub fn name(&self) -> Option<NameSeg> {
        self.named.lock().as_ref().map(|n| n.name)
    }

    pub fn parent(&self) -> Option<ObjectHandle> {
        self.named.lock().as_ref().and_then(|n| n.parent.upgrade())
    }

    /// Called only by the namespace, which already holds the process-wide lock; links this
    /// object under `parent` with `name`, appending it to `parent`'s children list.
    pub(crate) fn link(self: &ObjectHandle, parent: &ObjectHandle, name: NameSeg) {
        *self.named.lock() = Some(NamedInfo { name, parent: Arc::downgrade(parent) });
        self.set_flag(ObjectFlags::NAMED, true);
        parent.children.lock().push(self.clone());
    }

    /// Called only by the namespace; removes this object from its parent's children list and
    /// clears its namespace link. Leaves any other handles to this object (e.g. an
    /// `ObjectReference`) intact - they simply no longer resolve through the namespace.
    pub(crate) fn unlink(self: &ObjectHandle) {
        if let Some(parent) = self.parent() {
            parent.children.lock().retain(|child| !Arc::ptr_eq(child, self));
        }
        *self.named.lock() = None;
        self.set_flag(ObjectFlags::NAMED, false);
    }

    pub fn children(&self) -> Vec<ObjectHandle> {
        self.children.lock().clone()
    }

    pub fn child_named(&self, name: NameSeg) -> Option<ObjectHandle> {
        self.children.lock().iter().find(|c| c.name() == Some(name)).cloned()
    }

    pub fn type_of(&self) -> AmlType {
        self.data.lock().type_of()
    }

    /// Flags the first use of a "synthetic" value (the implicit-return-of-nothing case, §4.3)
    /// so that a later read raises a diagnostic exactly once.
    pub fn mark_exception_on_use(self: &ObjectHandle) {
        self.set_flag(ObjectFlags::EXCEPTION_ON_USE, true);
    }

    /// Consumes the exception-on-use flag, returning whether it was set; used at every read site
    /// that surfaces an object's value to AML code.
    pub fn take_exception_on_use(&self) -> bool {
        let mut flags = self.flags.lock();
        let was_set = flags.contains(ObjectFlags::EXCEPTION_ON_USE);
        flags.remove(ObjectFlags::EXCEPTION_ON_USE);
        was_set
    }
}

impl fmt::Debug for ObjectNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectNode")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("type", &self.type_of())
            .finish()
    }
}

/// `SpaceId` as used by `OperationRegion` (§6.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionSpace {
    SystemMemory,
    SystemIo,
    PciConfig,
    EmbeddedControl,
    SmBus,
    SystemCmos,
    PciBarTarget,
    Ipmi,
    GeneralPurposeIo,
    GenericSerialBus,
    Pcc,
    Oem(u8),
}

impl RegionSpace {
    pub fn from_byte(b: u8) -> RegionSpace {
        match b {
            0 => RegionSpace::SystemMemory,
            1 => RegionSpace::SystemIo,
            2 => RegionSpace::PciConfig,
            3 => RegionSpace::EmbeddedControl,
            4 => RegionSpace::SmBus,
            5 => RegionSpace::SystemCmos,
            6 => RegionSpace::PciBarTarget,
            7 => RegionSpace::Ipmi,
            8 => RegionSpace::GeneralPurposeIo,
            9 => RegionSpace::GenericSerialBus,
            10 => RegionSpace::Pcc,
            other => RegionSpace::Oem(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            RegionSpace::SystemMemory => 0,
            RegionSpace::SystemIo => 1,
            RegionSpace::PciConfig => 2,
            RegionSpace::EmbeddedControl => 3,
            RegionSpace::SmBus => 4,
            RegionSpace::SystemCmos => 5,
            RegionSpace::PciBarTarget => 6,
            RegionSpace::Ipmi => 7,
            RegionSpace::GeneralPurposeIo => 8,
            RegionSpace::GenericSerialBus => 9,
            RegionSpace::Pcc => 10,
            RegionSpace::Oem(b) => b,
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct FieldFlags: u8 {
        const ACCESS_TYPE_MASK   = 0b0000_1111;
        const LOCK_RULE          = 0b0001_0000;
        const UPDATE_RULE_MASK   = 0b0110_0000;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldAccessType {
    Any,
    Byte,
    Word,
    DWord,
    QWord,
    Buffer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldUpdateRule {
    Preserve,
    WriteAsOnes,
    WriteAsZeros,
}

impl FieldFlags {
    pub fn access_type(self) -> FieldAccessType {
        match self.bits() & 0x0F {
            0 => FieldAccessType::Any,
            1 => FieldAccessType::Byte,
            2 => FieldAccessType::Word,
            3 => FieldAccessType::DWord,
            4 => FieldAccessType::QWord,
            5 => FieldAccessType::Buffer,
            _ => FieldAccessType::Any,
        }
    }

    pub fn lock_rule_is_lock(self) -> bool {
        self.contains(FieldFlags::LOCK_RULE)
    }

    pub fn update_rule(self) -> FieldUpdateRule {
        match (self.bits() & 0x60) >> 5 {
            0 => FieldUpdateRule::Preserve,
            1 => FieldUpdateRule::WriteAsOnes,
            _ => FieldUpdateRule::WriteAsZeros,
        }
    }
}

#[derive(Clone)]
pub struct BufferData {
    pub bytes: Vec<u8>,
    /// Lazily populated single-byte `BufferField` children, one slot per byte, created the first
    /// time `Index` is applied to this buffer (§4.3 Index).
    pub byte_fields: Vec<Option<ObjectHandle>>,
}

impl BufferData {
    pub fn new(bytes: Vec<u8>) -> BufferData {
        let len = bytes.len();
        BufferData { bytes, byte_fields: alloc::vec![None; len] }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferFieldTargetKind {
    Buffer,
    String,
}

#[derive(Clone)]
pub struct BufferFieldData {
    pub target: ObjectHandle,
    pub target_kind: BufferFieldTargetKind,
    pub bit_offset: u64,
    pub bit_size: u64,
}

#[derive(Clone)]
pub enum FieldKind {
    Field { region: ObjectHandle },
    IndexField { index: ObjectHandle, data: ObjectHandle },
    BankField { region: ObjectHandle, bank: ObjectHandle, bank_value: u64 },
}

#[derive(Clone)]
pub struct FieldUnitData {
    pub kind: FieldKind,
    pub flags: FieldFlags,
    pub bit_offset: u64,
    pub bit_size: u64,
}

#[derive(Clone)]
pub struct OpRegionData {
    pub space: RegionSpace,
    pub offset: u64,
    pub length: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MethodFlags {
    pub arg_count: u8,
    pub serialized: bool,
    pub sync_level: u8,
}

pub type NativeMethod =
    Arc<dyn Fn(&crate::AmlContext, &[ObjectHandle]) -> Result<ObjectHandle, AmlError> + Send + Sync>;

#[derive(Clone)]
pub enum MethodBody {
    /// `table` is the full byte stream of the table this method was parsed from; `start..end` is
    /// the method's recorded byte range within it (§3.2 invariant: re-evaluation re-reads these
    /// bytes rather than caching a parsed form).
    Aml { table: Arc<[u8]>, start: usize, end: usize },
    Native(NativeMethod),
}

#[derive(Clone)]
pub struct MethodData {
    pub flags: MethodFlags,
    pub body: MethodBody,
    pub mutex: Option<Arc<SimpleLock>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessorData {
    pub proc_id: u8,
    pub pblk_addr: u32,
    pub pblk_len: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PowerResourceData {
    pub system_level: u8,
    pub resource_order: u16,
}

#[derive(Clone)]
pub struct MutexData {
    pub sync_level: u8,
    pub lock: Arc<SimpleLock>,
}

/// What to do once an [`crate::patchup::Unresolved`] name resolves, replacing the §9 "raw
/// function pointer + type-punned payload" callback with an inspectable, testable enum.
#[derive(Clone)]
pub enum PatchAction {
    /// Replace the unresolved object's contents with a fresh reference to the match.
    ReplaceWithReference,
    /// Replace the unresolved object's contents with a deep copy of the match (`CopyObject`
    /// semantics).
    ReplaceWithCopy,
}

#[derive(Clone)]
pub struct UnresolvedData {
    pub name: crate::name::AmlName,
    pub start_scope: crate::name::AmlName,
    pub action: PatchAction,
}

/// The tagged union over AML object variants (§3.2).
#[derive(Clone)]
pub enum ObjectData {
    Uninitialized,
    Buffer(BufferData),
    BufferField(BufferFieldData),
    DebugObject,
    Device,
    Event,
    FieldUnit(FieldUnitData),
    Integer(u64),
    Method(MethodData),
    Mutex(MutexData),
    ObjectReference(ObjectHandle),
    OperationRegion(OpRegionData),
    Package(Vec<ObjectHandle>),
    PowerResource(PowerResourceData),
    Processor(ProcessorData),
    String(String),
    ThermalZone,
    Alias(ObjectHandle),
    Unresolved(UnresolvedData),
    PredefinedScope,
    Arg(Option<ObjectHandle>),
    Local(Option<ObjectHandle>),
}

impl ObjectData {
    pub fn type_of(&self) -> AmlType {
        match self {
            ObjectData::Uninitialized => AmlType::UNINITIALIZED,
            ObjectData::Buffer(_) => AmlType::BUFFER,
            ObjectData::BufferField(_) => AmlType::BUFFER_FIELD,
            ObjectData::DebugObject => AmlType::DEBUG_OBJECT,
            ObjectData::Device => AmlType::DEVICE,
            ObjectData::Event => AmlType::EVENT,
            ObjectData::FieldUnit(_) => AmlType::FIELD_UNIT,
            ObjectData::Integer(_) => AmlType::INTEGER,
            ObjectData::Method(_) => AmlType::METHOD,
            ObjectData::Mutex(_) => AmlType::MUTEX,
            ObjectData::ObjectReference(_) => AmlType::OBJECT_REFERENCE,
            ObjectData::OperationRegion(_) => AmlType::OPERATION_REGION,
            ObjectData::Package(_) => AmlType::PACKAGE,
            ObjectData::PowerResource(_) => AmlType::POWER_RESOURCE,
            ObjectData::Processor(_) => AmlType::PROCESSOR,
            ObjectData::String(_) => AmlType::STRING,
            ObjectData::ThermalZone => AmlType::THERMAL_ZONE,
            ObjectData::Alias(_) => AmlType::ALIAS,
            ObjectData::Unresolved(_) => AmlType::UNRESOLVED,
            ObjectData::PredefinedScope => AmlType::PREDEFINED_SCOPE,
            ObjectData::Arg(_) => AmlType::ARG,
            ObjectData::Local(_) => AmlType::LOCAL,
        }
    }

    pub fn is_scope(&self) -> bool {
        matches!(
            self,
            ObjectData::PredefinedScope
                | ObjectData::Device
                | ObjectData::Processor(_)
                | ObjectData::PowerResource(_)
                | ObjectData::ThermalZone
        )
    }
}

/// Creates a fresh `Integer(0)` handle carrying the `ExceptionOnUse` flag, the "synthetic" value
/// used when a method is invoked without ever having evaluated an expression (§4.3 Implicit
/// return).
pub fn synthetic_zero() -> ObjectHandle {
    let handle = ObjectNode::new(ObjectData::Integer(0));
    handle.mark_exception_on_use();
    handle
}

pub fn new_integer(value: u64) -> ObjectHandle {
    ObjectNode::new(ObjectData::Integer(value))
}

pub fn new_string(value: String) -> ObjectHandle {
    ObjectNode::new(ObjectData::String(value))
}

pub fn new_buffer(bytes: Vec<u8>) -> ObjectHandle {
    ObjectNode::new(ObjectData::Buffer(BufferData::new(bytes)))
}

/// Flattens alias chains on creation, so the invariant "an Alias never points to another Alias"
/// holds by construction rather than needing to be re-checked at every lookup.
pub fn new_alias(target: ObjectHandle) -> ObjectHandle {
    let flattened = match &*target.data.lock() {
        ObjectData::Alias(inner) => inner.clone(),
        _ => target.clone(),
    };
    ObjectNode::new(ObjectData::Alias(flattened))
}

pub(crate) fn boxed_native(
    f: impl Fn(&crate::AmlContext, &[ObjectHandle]) -> Result<ObjectHandle, AmlError> + Send + Sync + 'static,
) -> NativeMethod {
    Arc::new(f) as NativeMethod
}
