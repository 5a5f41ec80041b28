//! Pixel format and usage definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Supported pixel formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum PixelFormat {
    #[default]
    Rgba8888 = 1,
    Rgbx8888 = 2,
    Rgb888 = 3,
    Rgb565 = 4,
    Bgra8888 = 5,
}

impl PixelFormat {
    /// Size of one pixel in bytes
    pub const fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgba8888 | PixelFormat::Rgbx8888 | PixelFormat::Bgra8888 => 4,
            PixelFormat::Rgb888 => 3,
            PixelFormat::Rgb565 => 2,
        }
    }

    /// Convert from the raw wire value
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(PixelFormat::Rgba8888),
            2 => Some(PixelFormat::Rgbx8888),
            3 => Some(PixelFormat::Rgb888),
            4 => Some(PixelFormat::Rgb565),
            5 => Some(PixelFormat::Bgra8888),
            _ => None,
        }
    }
}

/// Buffer usage bits, merged from producer requests and consumer defaults
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Usage(pub u32);

impl Usage {
    pub const NONE: Usage = Usage(0);
    pub const SW_READ_OFTEN: Usage = Usage(0x0000_0003);
    pub const SW_WRITE_OFTEN: Usage = Usage(0x0000_0030);
    pub const HW_TEXTURE: Usage = Usage(0x0000_0100);
    pub const HW_RENDER: Usage = Usage(0x0000_0200);
    pub const HW_COMPOSER: Usage = Usage(0x0000_0800);
    pub const PROTECTED: Usage = Usage(0x0000_4000);

    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// True if every bit of `other` is set in `self`
    pub const fn contains(&self, other: Usage) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Usage {
    type Output = Usage;

    fn bitor(self, rhs: Usage) -> Usage {
        Usage(self.0 | rhs.0)
    }
}

impl BitOrAssign for Usage {
    fn bitor_assign(&mut self, rhs: Usage) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Usage {
    type Output = Usage;

    fn bitand(self, rhs: Usage) -> Usage {
        Usage(self.0 & rhs.0)
    }
}

impl fmt::Debug for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Usage({:#x})", self.0)
    }
}
