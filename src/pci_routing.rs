//! Decodes `_PRT` packages (ACPI §6.2.13) into PCI interrupt routing entries: which
//! `(device, pin)` maps to either a GSI directly or a named interrupt-link device plus an index
//! into the resources it publishes.

use crate::{
    conv, name::AmlName, namespace, object::ObjectData, object::ObjectHandle, resource::ResourceTemplate,
    AmlContext, AmlError,
};
use alloc::vec::Vec;

/// Where a `_PRT` entry's interrupt is actually wired.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrtSource {
    /// The entry names a GSI directly (`Source` was the constant `Zero`).
    Gsi(u32),
    /// The entry routes through a PCI interrupt link device (e.g. `\_SB.LNKA`), consulting the
    /// `index`'th IRQ its `_CRS` publishes - almost always 0, since a link device's `_CRS`
    /// conventionally describes a single current setting.
    LinkDevice { path: AmlName, index: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrtEntry {
    /// PCI device number (the high word of `_PRT`'s packed `Address` field); function is always
    /// wildcarded to `0xffff` in `_PRT` entries, so it isn't kept.
    pub device: u16,
    /// INTA..INTD, encoded 0..=3.
    pub pin: u8,
    pub source: PrtSource,
}

impl PrtEntry {
    fn matches(&self, device: u16, pin: u8) -> bool {
        self.device == device && self.pin == pin
    }
}

/// A parsed `_PRT` package: one [`PrtEntry`] per sub-package.
#[derive(Clone, Debug, Default)]
pub struct PciRoutingTable {
    entries: Vec<PrtEntry>,
}

impl PciRoutingTable {
    pub fn from_package(ctx: &AmlContext, pkg: &ObjectHandle) -> Result<PciRoutingTable, AmlError> {
        let elements = match &*pkg.data.lock() {
            ObjectData::Package(elements) => elements.clone(),
            _ => return Err(AmlError::PrtInvalidAddress),
        };
        let entries = elements.iter().map(|entry| parse_entry(ctx, entry)).collect::<Result<Vec<_>, _>>()?;
        Ok(PciRoutingTable { entries })
    }

    /// Finds the entry for `device` (PCI device number, function wildcarded) and `pin` (0 =
    /// `INTA` .. 3 = `INTD`).
    pub fn route(&self, device: u16, pin: u8) -> Result<&PrtEntry, AmlError> {
        self.entries.iter().find(|e| e.matches(device, pin)).ok_or(AmlError::PrtNoEntry)
    }

    pub fn entries(&self) -> &[PrtEntry] {
        &self.entries
    }

    /// Resolves `route(device, pin)`'s source to a concrete GSI, invoking the link device's
    /// `_CRS` and decoding it if the entry doesn't already name a GSI directly.
    pub fn resolve_gsi(&self, ctx: &AmlContext, device: u16, pin: u8) -> Result<u32, AmlError> {
        match &self.route(device, pin)?.source {
            PrtSource::Gsi(gsi) => Ok(*gsi),
            PrtSource::LinkDevice { path, index } => {
                let mut crs_path = path.clone();
                crs_path.segments.push(crate::name::NameSeg::new(*b"_CRS").unwrap());
                let crs = ctx.invoke_method(&crs_path, &[])?;
                let bytes = conv::to_buffer(&crs, ctx)?;
                let template = ResourceTemplate::parse(&bytes)?;
                template.irqs().get(*index as usize).copied().ok_or(AmlError::PrtInvalidGsi)
            }
        }
    }
}

fn parse_entry(ctx: &AmlContext, entry: &ObjectHandle) -> Result<PrtEntry, AmlError> {
    let fields = match &*entry.data.lock() {
        ObjectData::Package(fields) => fields.clone(),
        _ => return Err(AmlError::PrtInvalidAddress),
    };
    if fields.len() != 4 {
        return Err(AmlError::PrtInvalidAddress);
    }

    let address = conv::to_integer(&fields[0], ctx)?;
    let device = (address >> 16) as u16;

    let pin = conv::to_integer(&fields[1], ctx)?;
    if pin > 3 {
        return Err(AmlError::PrtInvalidPin);
    }

    let source = parse_source(ctx, &fields[2], &fields[3])?;

    Ok(PrtEntry { device, pin: pin as u8, source })
}

fn parse_source(ctx: &AmlContext, source: &ObjectHandle, index: &ObjectHandle) -> Result<PrtSource, AmlError> {
    let index = conv::to_integer(index, ctx)? as u32;

    // `Source == 0` (an Integer, not a device reference) means the GSI is named directly and
    // `SourceIndex` is that GSI number (§6.2.13).
    if matches!(&*source.data.lock(), ObjectData::Integer(0)) {
        return Ok(PrtSource::Gsi(index));
    }

    let device = match &*source.data.lock() {
        ObjectData::ObjectReference(target) => target.clone(),
        _ => return Err(AmlError::PrtInvalidSource),
    };
    let path = namespace::absolute_name(&device);
    Ok(PrtSource::LinkDevice { path, index })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        object::{new_integer, ObjectNode},
        test_utils::TestHandler,
        DebugVerbosity,
    };
    use alloc::boxed::Box;

    fn ctx() -> AmlContext {
        AmlContext::new(Box::new(TestHandler::new()), DebugVerbosity::None)
    }

    fn package(elements: Vec<ObjectHandle>) -> ObjectHandle {
        ObjectNode::new(ObjectData::Package(elements))
    }

    #[test]
    fn direct_gsi_entry_decodes() {
        let c = ctx();
        let entry =
            package(alloc::vec![new_integer(0x0002_FFFF), new_integer(1), new_integer(0), new_integer(16)]);
        let prt = PciRoutingTable::from_package(&c, &package(alloc::vec![entry])).unwrap();
        let routed = prt.route(2, 1).unwrap();
        assert_eq!(routed.device, 2);
        assert_eq!(routed.pin, 1);
        assert_eq!(routed.source, PrtSource::Gsi(16));
        assert_eq!(prt.resolve_gsi(&c, 2, 1).unwrap(), 16);
    }

    #[test]
    fn link_device_entry_decodes_to_its_absolute_path() {
        let c = ctx();
        let token = c.namespace.push_overlay();
        let root = c.namespace.root();
        let link = c
            .namespace
            .add_child(token, &root, crate::name::NameSeg::new(*b"LNKA").unwrap(), ObjectNode::new(ObjectData::Device))
            .unwrap();
        c.namespace.commit(token, c.sysfs());

        let source = ObjectNode::new(ObjectData::ObjectReference(link));
        let entry =
            package(alloc::vec![new_integer(0x0003_FFFF), new_integer(0), source, new_integer(0)]);
        let prt = PciRoutingTable::from_package(&c, &package(alloc::vec![entry])).unwrap();

        let routed = prt.route(3, 0).unwrap();
        match &routed.source {
            PrtSource::LinkDevice { path, index } => {
                assert_eq!(path.segments[0].trimmed(), "LNKA");
                assert_eq!(*index, 0);
            }
            _ => panic!("expected a link device source"),
        }
    }

    #[test]
    fn missing_route_is_reported() {
        let c = ctx();
        let prt = PciRoutingTable::from_package(&c, &package(Vec::new())).unwrap();
        assert_eq!(prt.route(0, 0).unwrap_err(), AmlError::PrtNoEntry);
    }
}
