//! Foreign handle layer
//!
//! Non-owning views over runtime containers. Nothing here touches reference
//! counts beyond what the underlying operation documents: callers reconcile
//! ownership of handles returned by `store` and `delete`. Every operation may
//! run magic hooks and so re-enter host code.

mod av;
mod hv;

use std::fmt;

pub use av::{AvCollection, AvIter};
pub use hv::{HvCollection, HvCursor};

use crate::runtime::sv;

/// Kind of a runtime value, from its type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SvKind {
    /// Any scalar, including references and blessed scalars
    Scalar,
    /// Array
    Array,
    /// Hash
    Hash,
    /// Code
    Code,
    /// Format
    Format,
    /// I/O handle
    Io,
    /// Tag this crate does not know about
    Unknown,
}

impl SvKind {
    /// Map a type tag. Unknown tags map to [`SvKind::Unknown`].
    pub fn from_tag(tag: u32) -> Self {
        match tag {
            sv::SVT_NULL..=sv::SVT_PVLV => SvKind::Scalar,
            sv::SVT_PVAV => SvKind::Array,
            sv::SVT_PVHV => SvKind::Hash,
            sv::SVT_PVCV => SvKind::Code,
            sv::SVT_PVFM => SvKind::Format,
            sv::SVT_PVIO => SvKind::Io,
            _ => SvKind::Unknown,
        }
    }

    /// Name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            SvKind::Scalar => "SCALAR",
            SvKind::Array => "ARRAY",
            SvKind::Hash => "HASH",
            SvKind::Code => "CODE",
            SvKind::Format => "FORMAT",
            SvKind::Io => "IO",
            SvKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for SvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_tag_has_a_kind() {
        for tag in sv::SVT_NULL..=sv::SVT_PVLV {
            assert_eq!(SvKind::from_tag(tag), SvKind::Scalar);
        }
        assert_eq!(SvKind::from_tag(sv::SVT_PVAV), SvKind::Array);
        assert_eq!(SvKind::from_tag(sv::SVT_PVHV), SvKind::Hash);
        assert_eq!(SvKind::from_tag(sv::SVT_PVCV), SvKind::Code);
        assert_eq!(SvKind::from_tag(sv::SVT_PVFM), SvKind::Format);
        assert_eq!(SvKind::from_tag(sv::SVT_PVIO), SvKind::Io);
        assert_eq!(SvKind::from_tag(16), SvKind::Unknown);
        assert_eq!(SvKind::from_tag(u32::MAX), SvKind::Unknown);
    }
}
