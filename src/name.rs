//! Names and NameStrings (§4.1 of the AML grammar, ACPI §20.2.2).
//!
//! A [`NameSeg`] is exactly four bytes; trailing underscores are insignificant for comparison,
//! so `PCI_` and `PCI_` (and `PCI\0\0` conceptually) compare and hash equal. An [`AmlName`] is the
//! parsed form of a `NameString`: an optional root marker, zero or more `^` parent-prefixes, and
//! zero or more name segments.

use crate::{misc::ArgNum, misc::LocalNum, AmlError};
use alloc::{string::String, string::ToString, vec::Vec};
use core::{fmt, hash::Hash, hash::Hasher, str::FromStr};

/// A single four-character name segment, e.g. `_SB_` or `DEV0`.
#[derive(Clone, Copy)]
pub struct NameSeg(pub [u8; 4]);

impl NameSeg {
    pub fn new(bytes: [u8; 4]) -> Result<NameSeg, AmlError> {
        if !is_lead_name_char(bytes[0]) {
            return Err(AmlError::InvalidNameSeg);
        }
        for &b in &bytes[1..] {
            if !is_name_char(b) {
                return Err(AmlError::InvalidNameSeg);
            }
        }
        Ok(NameSeg(bytes))
    }

    /// The segment with trailing underscores stripped - used for sysfs exposure and debug
    /// printing, where `PCI_` should read as `PCI`.
    pub fn trimmed(&self) -> &str {
        let len = self.0.iter().rposition(|&b| b != b'_').map_or(0, |i| i + 1);
        // SAFETY: every byte of a valid NameSeg is an ASCII name char.
        core::str::from_utf8(&self.0[..len]).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl PartialEq for NameSeg {
    fn eq(&self, other: &Self) -> bool {
        self.trimmed() == other.trimmed()
    }
}
impl Eq for NameSeg {}

impl Hash for NameSeg {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.trimmed().hash(state);
    }
}

impl fmt::Debug for NameSeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for NameSeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn is_lead_name_char(b: u8) -> bool {
    b.is_ascii_uppercase() || b == b'_'
}
fn is_name_char(b: u8) -> bool {
    is_lead_name_char(b) || b.is_ascii_digit()
}

/// Where a [`AmlName`] anchors relative to the scope it's resolved against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameStart {
    /// Absolute: anchored at `\`.
    Root,
    /// Relative, skipping this many parent scopes (`^^^FOO` => `Parents(3)`) before descending
    /// into `segments`. `Parents(0)` means "relative to the current scope".
    Parents(usize),
}

/// A parsed `NameString`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AmlName {
    pub start: NameStart,
    pub segments: Vec<NameSeg>,
}

impl AmlName {
    pub fn root() -> AmlName {
        AmlName { start: NameStart::Root, segments: Vec::new() }
    }

    /// The "null name": zero segments, zero carets, not rooted. Resolves to the scope it's
    /// looked up relative to.
    pub fn null() -> AmlName {
        AmlName { start: NameStart::Parents(0), segments: Vec::new() }
    }

    pub fn is_null(&self) -> bool {
        self.segments.is_empty() && matches!(self.start, NameStart::Parents(0))
    }

    pub fn single(seg: NameSeg) -> AmlName {
        AmlName { start: NameStart::Parents(0), segments: alloc::vec![seg] }
    }

    /// Resolves `self` against `scope` (the current scope it's encountered in), producing an
    /// absolute, normalized name. Mirrors the teacher crate's `AmlName::resolve`.
    pub fn resolve(&self, scope: &AmlName) -> Result<AmlName, AmlError> {
        assert!(matches!(scope.start, NameStart::Root), "scope must already be absolute");

        let mut segments = match self.start {
            NameStart::Root => Vec::new(),
            NameStart::Parents(num_carets) => {
                if num_carets > scope.segments.len() {
                    return Err(AmlError::InvalidNormalizedName(self.clone()));
                }
                scope.segments[..(scope.segments.len() - num_carets)].to_vec()
            }
        };
        segments.extend(self.segments.iter().cloned());

        Ok(AmlName { start: NameStart::Root, segments })
    }

    /// Parses a dot-separated ASL-style string such as `\_SB.PCI0.S08._ADR`. Mainly used by
    /// tests and by callers that want to look up a well-known path without constructing a
    /// `NameSeg` list by hand.
    pub fn parts(&self) -> &[NameSeg] {
        &self.segments
    }

    pub fn parent(&self) -> Option<AmlName> {
        if self.segments.is_empty() {
            return None;
        }
        let mut parent = self.clone();
        parent.segments.pop();
        Some(parent)
    }
}

impl FromStr for AmlName {
    type Err = AmlError;

    fn from_str(mut s: &str) -> Result<Self, Self::Err> {
        let mut start = NameStart::Parents(0);

        if let Some(rest) = s.strip_prefix('\\') {
            start = NameStart::Root;
            s = rest;
        } else {
            let mut carets = 0;
            while let Some(rest) = s.strip_prefix('^') {
                carets += 1;
                s = rest;
            }
            start = NameStart::Parents(carets);
        }

        let mut segments = Vec::new();
        if !s.is_empty() {
            for part in s.split('.') {
                if part.len() > 4 || part.is_empty() {
                    return Err(AmlError::InvalidNameSeg);
                }
                let mut bytes = [b'_'; 4];
                bytes[..part.len()].copy_from_slice(part.as_bytes());
                segments.push(NameSeg::new(bytes)?);
            }
        }

        Ok(AmlName { start, segments })
    }
}

impl fmt::Display for AmlName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.start {
            NameStart::Root => write!(f, "\\")?,
            NameStart::Parents(n) => {
                for _ in 0..n {
                    write!(f, "^")?;
                }
            }
        }
        let mut first = true;
        for seg in &self.segments {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{}", seg)?;
            first = false;
        }
        Ok(())
    }
}

/// A "SuperName" destination: either a named object, a method local/arg, the debug object, or
/// nothing (`NullName`, used when a `Target` operand is omitted).
#[derive(Clone, Debug)]
pub enum Target {
    Null,
    Name(AmlName),
    Debug,
    Arg(ArgNum),
    Local(LocalNum),
}

impl Target {
    pub fn to_string_lossy(&self) -> String {
        match self {
            Target::Null => "<null>".to_string(),
            Target::Name(name) => name.to_string(),
            Target::Debug => "Debug".to_string(),
            Target::Arg(n) => alloc::format!("Arg{}", n),
            Target::Local(n) => alloc::format!("Local{}", n),
        }
    }
}
