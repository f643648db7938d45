//! Decodes `_CRS`/`_PRS`/`_SRS` resource-template buffers (ACPI §6.4) into typed descriptors.
//!
//! A template is a flat run of small and large resource items with no outer length prefix -
//! parsing just walks the buffer item by item until it hits an `EndTag`, which is where we stop
//! regardless of how much buffer is left (`_CRS` buffers are routinely padded to a round size).

use crate::AmlError;
use alloc::{vec, vec::Vec};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterruptTriggering {
    Level,
    Edge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterruptPolarity {
    ActiveHigh,
    ActiveLow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sharing {
    Shared,
    Exclusive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressSpaceKind {
    Memory,
    Io,
    Bus,
}

/// One decoded resource item. `Unknown` covers every large item this module doesn't give its own
/// variant (GPIO/serial-bus connections, generic register descriptors, vendor-defined data) -
/// callers that only care about interrupts and address windows can ignore it, and nothing is
/// lost since the raw bytes are kept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resource {
    Irq { mask: u16, triggering: InterruptTriggering, polarity: InterruptPolarity, sharing: Sharing },
    Dma { channel_mask: u8, is_bus_master: bool },
    Io { min: u16, max: u16, alignment: u8, length: u8 },
    FixedIo { base: u16, length: u8 },
    Memory32 { min: u32, max: u32, alignment: u32, length: u32 },
    FixedMemory32 { base: u32, length: u32, writable: bool },
    AddressSpace { kind: AddressSpaceKind, min: u64, max: u64, translation_offset: u64, length: u64 },
    ExtendedInterrupt { triggering: InterruptTriggering, polarity: InterruptPolarity, sharing: Sharing, irqs: Vec<u32> },
    Unknown { tag: u8, bytes: Vec<u8> },
    EndTag,
}

/// A fully-parsed `_CRS`/`_PRS` buffer: an ordered list of `Resource`s, ending in `EndTag`.
#[derive(Clone, Debug, Default)]
pub struct ResourceTemplate {
    resources: Vec<Resource>,
}

impl ResourceTemplate {
    pub fn parse(bytes: &[u8]) -> Result<ResourceTemplate, AmlError> {
        let mut resources = Vec::new();
        let mut cursor = 0usize;

        loop {
            if cursor >= bytes.len() {
                return Err(AmlError::ResourceDescriptorTooShort);
            }

            let tag = bytes[cursor];
            let (resource, consumed) = if tag & 0x80 != 0 {
                parse_large(&bytes[cursor..])?
            } else {
                parse_small(&bytes[cursor..])?
            };

            cursor += consumed;
            let is_end = matches!(resource, Resource::EndTag);
            resources.push(resource);
            if is_end {
                break;
            }
        }

        if resources.len() > 4096 {
            return Err(AmlError::ResourceDescriptorTooLong);
        }

        Ok(ResourceTemplate { resources })
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Every IRQ number this template publishes, whether via the small `Irq` item's 16-bit mask
    /// or the large `ExtendedInterrupt` item's explicit list.
    pub fn irqs(&self) -> Vec<u32> {
        let mut out = Vec::new();
        for resource in &self.resources {
            match resource {
                Resource::Irq { mask, .. } => out.extend((0..16u32).filter(|bit| mask & (1 << bit) != 0)),
                Resource::ExtendedInterrupt { irqs, .. } => out.extend(irqs.iter().copied()),
                _ => {}
            }
        }
        out
    }
}

fn need(bytes: &[u8], len: usize) -> Result<&[u8], AmlError> {
    bytes.get(..len).ok_or(AmlError::ResourceDescriptorTooShort)
}

fn u16_le(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}
fn u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
fn u64_le(bytes: &[u8]) -> u64 {
    u64::from_le_bytes(bytes[..8].try_into().unwrap())
}

fn parse_small(bytes: &[u8]) -> Result<(Resource, usize), AmlError> {
    let header = bytes[0];
    let item_name = (header >> 3) & 0xF;
    let len = (header & 0x7) as usize;
    let body = need(bytes, 1 + len)?;
    let body = &body[1..];

    let resource = match item_name {
        // IRQ Format: a 16-bit mask of ISA IRQs, plus an optional third byte of flags. Absent
        // the flags byte, the descriptor means edge-triggered, active-high, exclusive (§6.4.2.1).
        0x4 => {
            let mask = u16_le(need(body, 2)?);
            let (triggering, polarity, sharing) = match body.get(2) {
                Some(&flags) => (
                    if flags & 0x1 != 0 { InterruptTriggering::Edge } else { InterruptTriggering::Level },
                    if flags & 0x8 != 0 { InterruptPolarity::ActiveLow } else { InterruptPolarity::ActiveHigh },
                    if flags & 0x10 != 0 { Sharing::Shared } else { Sharing::Exclusive },
                ),
                None => (InterruptTriggering::Edge, InterruptPolarity::ActiveHigh, Sharing::Exclusive),
            };
            Resource::Irq { mask, triggering, polarity, sharing }
        }
        // DMA Format.
        0x5 => {
            let channel_mask = *need(body, 1)?.first().unwrap();
            let flags = *body.get(1).unwrap_or(&0);
            Resource::Dma { channel_mask, is_bus_master: flags & 0x4 != 0 }
        }
        // I/O Port Descriptor.
        0x8 => {
            let b = need(body, 7)?;
            Resource::Io { min: u16_le(&b[1..3]), max: u16_le(&b[3..5]), alignment: b[5], length: b[6] }
        }
        // Fixed Location I/O Port Descriptor.
        0x9 => {
            let b = need(body, 3)?;
            Resource::FixedIo { base: u16_le(&b[0..2]), length: b[2] }
        }
        0xF => Resource::EndTag,
        // Start/End Dependent Functions and vendor-defined small items carry no information we
        // act on; keep the raw bytes so callers can still see the descriptor went by.
        _ => Resource::Unknown { tag: header, bytes: body.to_vec() },
    };

    Ok((resource, 1 + len))
}

fn parse_large(bytes: &[u8]) -> Result<(Resource, usize), AmlError> {
    let tag = bytes[0];
    let len_bytes = need(bytes, 3)?;
    let len = u16_le(&len_bytes[1..3]) as usize;
    let body = need(bytes, 3 + len)?;
    let body = &body[3..];
    let total = 3 + len;

    let resource = match tag {
        // 32-bit Memory Range Descriptor.
        0x85 => {
            let b = need(body, 17)?;
            Resource::Memory32 {
                min: u32_le(&b[1..5]),
                max: u32_le(&b[5..9]),
                alignment: u32_le(&b[9..13]),
                length: u32_le(&b[13..17]),
            }
        }
        // 32-bit Fixed Memory Range Descriptor.
        0x86 => {
            let b = need(body, 9)?;
            Resource::FixedMemory32 { base: u32_le(&b[1..5]), length: u32_le(&b[5..9]), writable: b[0] & 0x1 != 0 }
        }
        // Word/DWord/QWord Address Space Descriptors (§6.4.3.5): same field layout, scaled to
        // 2/4/8-byte fields. General flags live at body[0], resource type at body[-1]... laid out
        // per-width below since the field widths differ.
        0x88 => parse_address_space(body, 2)?,
        0x87 => parse_address_space(body, 4)?,
        0x8A => parse_address_space(body, 8)?,
        // Extended Interrupt Descriptor: one interrupt-vector-flags byte, a count, then that many
        // 32-bit GSIs.
        0x89 => {
            let flags = *need(body, 1)?.first().unwrap();
            let count = *body.get(1).ok_or(AmlError::ResourceDescriptorTooShort)? as usize;
            let table = need(body, 2 + count * 4)?;
            let irqs = table[2..2 + count * 4].chunks_exact(4).map(u32_le).collect();
            Resource::ExtendedInterrupt {
                triggering: if flags & 0x1 != 0 { InterruptTriggering::Edge } else { InterruptTriggering::Level },
                polarity: if flags & 0x2 != 0 { InterruptPolarity::ActiveLow } else { InterruptPolarity::ActiveHigh },
                sharing: if flags & 0x4 != 0 { Sharing::Shared } else { Sharing::Exclusive },
                irqs,
            }
        }
        _ => Resource::Unknown { tag, bytes: body.to_vec() },
    };

    Ok((resource, total))
}

/// Shared decode for the Word/DWord/QWord Address Space Descriptors, parameterized by field
/// width in bytes (2, 4, or 8). Resource source strings are not decoded - nothing in this crate
/// needs to follow one, so they're left in the unconsumed tail of the descriptor.
fn parse_address_space(body: &[u8], width: usize) -> Result<Resource, AmlError> {
    let header = need(body, 3)?;
    let kind = match header[0] {
        0 => AddressSpaceKind::Memory,
        1 => AddressSpaceKind::Io,
        2 => AddressSpaceKind::Bus,
        _ => return Err(AmlError::UnexpectedResourceType),
    };

    let fields = need(&body[3..], width * 5)?;
    let read = |i: usize| -> u64 {
        let f = &fields[i * width..(i + 1) * width];
        match width {
            2 => u16_le(f) as u64,
            4 => u32_le(f) as u64,
            _ => u64_le(f),
        }
    };

    // fields: Granularity, Minimum, Maximum, Translation Offset, Length.
    Ok(Resource::AddressSpace { kind, min: read(1), max: read(2), translation_offset: read(3), length: read(4) })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn end_tag() -> Vec<u8> {
        vec![0x79, 0x00]
    }

    #[test]
    fn decodes_irq_descriptor_with_explicit_flags() {
        let mut bytes = vec![0x23, 0b0000_0100, 0x00, 0b0001_1001];
        bytes.extend(end_tag());
        let template = ResourceTemplate::parse(&bytes).unwrap();
        assert_eq!(
            template.resources()[0],
            Resource::Irq {
                mask: 0b0000_0100,
                triggering: InterruptTriggering::Edge,
                polarity: InterruptPolarity::ActiveLow,
                sharing: Sharing::Shared,
            }
        );
        assert_eq!(template.irqs(), alloc::vec![2]);
    }

    #[test]
    fn decodes_fixed_memory32_descriptor() {
        let mut bytes = vec![0x86, 0x09, 0x00, 0x01];
        bytes.extend_from_slice(&0xFEC0_0000u32.to_le_bytes());
        bytes.extend_from_slice(&0x0000_1000u32.to_le_bytes());
        bytes.extend(end_tag());
        let template = ResourceTemplate::parse(&bytes).unwrap();
        assert_eq!(
            template.resources()[0],
            Resource::FixedMemory32 { base: 0xFEC0_0000, length: 0x1000, writable: true }
        );
    }

    #[test]
    fn decodes_extended_interrupt_with_two_gsis() {
        let mut bytes = vec![0x89, 0x0A, 0x00, 0b0000_0101, 0x02];
        bytes.extend_from_slice(&9u32.to_le_bytes());
        bytes.extend_from_slice(&20u32.to_le_bytes());
        bytes.extend(end_tag());
        let template = ResourceTemplate::parse(&bytes).unwrap();
        assert_eq!(template.irqs(), alloc::vec![9, 20]);
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let bytes = vec![0x86, 0x09, 0x00];
        assert_eq!(ResourceTemplate::parse(&bytes).unwrap_err(), AmlError::ResourceDescriptorTooShort);
    }

    #[test]
    fn parsing_stops_at_end_tag_even_with_trailing_padding() {
        let mut bytes = vec![0x22, 0b0000_0010, 0x00];
        bytes.extend(end_tag());
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        let template = ResourceTemplate::parse(&bytes).unwrap();
        assert_eq!(template.resources().len(), 2);
        assert_eq!(template.resources()[1], Resource::EndTag);
    }
}
