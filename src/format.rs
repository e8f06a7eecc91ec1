//! Frame geometry and raw pixel layouts

use crate::error::MediaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Raw pixel layouts the pipe protocol understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb24,
    #[default]
    Bgr24,
    Yuv420p,
    Yuvj420p,
    Nv12,
    Gray,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 6] = [
        PixelFormat::Rgb24,
        PixelFormat::Bgr24,
        PixelFormat::Yuv420p,
        PixelFormat::Yuvj420p,
        PixelFormat::Nv12,
        PixelFormat::Gray,
    ];

    /// `bgr24` for colour, `gray` otherwise.
    pub fn color(is_color: bool) -> Self {
        if is_color {
            PixelFormat::Bgr24
        } else {
            PixelFormat::Gray
        }
    }

    /// Name passed to ffmpeg's `-pix_fmt`.
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Bgr24 => "bgr24",
            PixelFormat::Yuv420p => "yuv420p",
            PixelFormat::Yuvj420p => "yuvj420p",
            PixelFormat::Nv12 => "nv12",
            PixelFormat::Gray => "gray",
        }
    }

    /// Planar 4:2:0 layouts halve both chroma dimensions.
    pub fn is_chroma_subsampled(&self) -> bool {
        matches!(
            self,
            PixelFormat::Yuv420p | PixelFormat::Yuvj420p | PixelFormat::Nv12
        )
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelFormat {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PixelFormat::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| MediaError::InvalidPixelFormat(s.to_string()))
    }
}

/// Width/height pair. As a resize target, `(0, 0)` means "keep the size".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn is_even(&self) -> bool {
        self.width % 2 == 0 && self.height % 2 == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Size {
    type Err = MediaError;

    /// Parses `WIDTHxHEIGHT`, e.g. `640x480`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MediaError::InvalidResizeGeometry(format!("expected WxH, got {:?}", s));
        let (w, h) = s.split_once(['x', 'X']).ok_or_else(invalid)?;
        Ok(Size::new(
            w.trim().parse().map_err(|_| invalid())?,
            h.trim().parse().map_err(|_| invalid())?,
        ))
    }
}

/// Crop rectangle anchored at the top-left corner. All zeros means "no crop".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl CropRect {
    pub const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// A crop only applies when both width and height are set.
    pub fn is_active(&self) -> bool {
        self.w != 0 && self.h != 0
    }

    pub fn size(&self) -> Size {
        Size::new(self.w, self.h)
    }
}

impl FromStr for CropRect {
    type Err = MediaError;

    /// Parses `x,y,w,h`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MediaError::InvalidCropGeometry(format!("expected x,y,w,h, got {:?}", s));
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        match parts.as_slice() {
            [x, y, w, h] => Ok(CropRect::new(*x, *y, *w, *h)),
            _ => Err(invalid()),
        }
    }
}

/// Dimensions of one raw frame as laid out on the pipe.
///
/// Packed RGB is `[height, width, 3]`, gray is `[height, width]` and the
/// 4:2:0 layouts stack the chroma rows under luma: `[height * 3 / 2, width]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameShape {
    dims: [usize; 3],
    rank: usize,
}

impl FrameShape {
    pub fn new(size: Size, pix_fmt: PixelFormat) -> Self {
        let (w, h) = (size.width as usize, size.height as usize);
        match pix_fmt {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Self { dims: [h, w, 3], rank: 3 },
            PixelFormat::Gray => Self { dims: [h, w, 1], rank: 2 },
            PixelFormat::Yuv420p | PixelFormat::Yuvj420p | PixelFormat::Nv12 => Self {
                dims: [h * 3 / 2, w, 1],
                rank: 2,
            },
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims[..self.rank]
    }

    pub fn bytes(&self) -> usize {
        self.dims().iter().product()
    }
}
