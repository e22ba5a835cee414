//! GPU texture codecs produced by the compressor.

use std::fmt;

/// Texture compression variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// Uncompressed-quality RGBA ATF (all platforms).
    Rgba,
    /// PVRTC, the low-quality iOS variant.
    Pvr,
    /// ETC1, the Android variant.
    Etc,
}

impl Codec {
    /// Lowercase name used in log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rgba => "rgba",
            Self::Pvr => "pvr",
            Self::Etc => "etc",
        }
    }

    /// Whether output files carry the low-quality suffix.
    ///
    /// Only PVR does, and only for standalone atlases: members of a bundle are
    /// always written unsuffixed because the bundle itself is suffixed.
    pub fn is_suffixed(self) -> bool {
        self == Self::Pvr
    }

    /// Whether atlases in the excluded family are skipped for this codec.
    pub fn skips_excluded_family(self) -> bool {
        self != Self::Rgba
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
