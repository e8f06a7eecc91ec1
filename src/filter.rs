//! Filter planning: crop / resize / pixel-format geometry for the decoder
//!
//! The software planner expresses everything as an ffmpeg filter graph. The
//! device planner moves crop and resize into decoder input options (cuvid
//! `-crop`/`-resize`) and only keeps the luma extraction as a filter.

use crate::error::{MediaError, Result};
use crate::format::{CropRect, PixelFormat, Size};

/// Result of planning for the software path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPlan {
    pub cropped: Size,
    pub output: Size,
    /// Comma-separated filter graph for `-vf`; empty when nothing applies.
    pub filter_graph: String,
}

/// Result of planning for the device path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePlan {
    pub cropped: Size,
    pub output: Size,
    /// Options placed before `-i` so the hardware decoder crops and scales.
    pub decoder_args: Vec<String>,
    pub filter_graph: String,
}

/// Validated crop and resize, shared by both planners.
struct Geometry {
    crop: Option<CropRect>,
    cropped: Size,
    resize: Option<Size>,
    output: Size,
}

fn resolve(origin: Size, crop: CropRect, resize: Size) -> Result<Geometry> {
    let (crop, cropped) = if crop.is_active() {
        if [crop.x, crop.y, crop.w, crop.h].iter().any(|v| v % 2 != 0) {
            return Err(MediaError::InvalidCropGeometry(format!(
                "crop ({}, {}, {}, {}) must be even",
                crop.x, crop.y, crop.w, crop.h
            )));
        }
        let fits_x = crop.x.checked_add(crop.w).is_some_and(|r| r <= origin.width);
        let fits_y = crop.y.checked_add(crop.h).is_some_and(|b| b <= origin.height);
        if !fits_x || !fits_y {
            return Err(MediaError::InvalidCropGeometry(format!(
                "crop ({}, {}, {}, {}) exceeds {}",
                crop.x, crop.y, crop.w, crop.h, origin
            )));
        }
        (Some(crop), crop.size())
    } else {
        (None, origin)
    };

    let (resize, output) = if !resize.is_empty() {
        if !resize.is_even() {
            return Err(MediaError::InvalidResizeGeometry(format!(
                "resize {} must be even",
                resize
            )));
        }
        (Some(resize), resize)
    } else {
        (None, cropped)
    };

    Ok(Geometry {
        crop,
        cropped,
        resize,
        output,
    })
}

fn luma_clause(pix_fmt: PixelFormat) -> Option<&'static str> {
    // raw gray output would otherwise still carry the chroma planes
    (pix_fmt == PixelFormat::Gray).then_some("extractplanes=y")
}

/// Plan crop → scale → luma extraction as one software filter graph.
pub fn plan_software(
    origin: Size,
    pix_fmt: PixelFormat,
    crop: CropRect,
    resize: Size,
) -> Result<FilterPlan> {
    let geometry = resolve(origin, crop, resize)?;

    let mut clauses = Vec::with_capacity(3);
    if let Some(c) = geometry.crop {
        clauses.push(format!("crop={}:{}:{}:{}", c.w, c.h, c.x, c.y));
    }
    if let Some(r) = geometry.resize {
        clauses.push(format!("scale={}x{}", r.width, r.height));
    }
    if let Some(luma) = luma_clause(pix_fmt) {
        clauses.push(luma.to_string());
    }

    Ok(FilterPlan {
        cropped: geometry.cropped,
        output: geometry.output,
        filter_graph: clauses.join(","),
    })
}

/// Plan crop and resize as hardware decoder options.
///
/// cuvid takes the crop as `top x bottom x left x right` margins measured
/// from the origin frame.
pub fn plan_device(
    origin: Size,
    pix_fmt: PixelFormat,
    crop: CropRect,
    resize: Size,
) -> Result<DevicePlan> {
    let geometry = resolve(origin, crop, resize)?;

    let mut decoder_args = Vec::new();
    if let Some(c) = geometry.crop {
        let top = c.y;
        let bottom = origin.height - (c.y + c.h);
        let left = c.x;
        let right = origin.width - (c.x + c.w);
        decoder_args.push("-crop".to_string());
        decoder_args.push(format!("{}x{}x{}x{}", top, bottom, left, right));
    }
    if let Some(r) = geometry.resize {
        decoder_args.push("-resize".to_string());
        decoder_args.push(r.to_string());
    }

    Ok(DevicePlan {
        cropped: geometry.cropped,
        output: geometry.output,
        decoder_args,
        filter_graph: luma_clause(pix_fmt).unwrap_or_default().to_string(),
    })
}
