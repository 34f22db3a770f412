//! Rotation-aware ROI coordinate mapping.
//!
//! The operator draws a rectangle on a preview that may be rotated by
//! 0/90/180/270 degrees. Recording crops the raw (unrotated) sensor frame, so
//! the drawn rectangle has to be mapped back through the exact inverse of the
//! display rotation. The four cases form a dihedral-group mapping; each is the
//! algebraic inverse of the corresponding forward rotation in [`rotate_gray`].

use crate::types::{DisplayRect, Roi, Rotation, MACROBLOCK};

fn align_down(v: u32) -> u32 {
    v - v % MACROBLOCK
}

/// Map a rectangle drawn on the rotated display frame back to raw sensor
/// coordinates.
///
/// The result is clamped to the raw frame bounds and its width/height are
/// floored to multiples of [`MACROBLOCK`]. A degenerate (zero-area) ROI is a
/// valid return value; callers must reject it before committing.
pub fn map_to_raw(
    rect: DisplayRect,
    raw_width: u32,
    raw_height: u32,
    rotation: Rotation,
) -> Roi {
    let (disp_w, disp_h) = if rotation.swaps_axes() {
        (raw_height, raw_width)
    } else {
        (raw_width, raw_height)
    };

    // Clamp the drawn rectangle to the displayed frame so the inverse
    // transform below cannot leave raw bounds.
    let x = rect.x.min(disp_w);
    let y = rect.y.min(disp_h);
    let w = rect.width.min(disp_w - x);
    let h = rect.height.min(disp_h - y);

    let (rx, ry, rw, rh) = match rotation {
        Rotation::None => (x, y, w, h),
        Rotation::Ccw90 => (raw_width - (y + h), x, h, w),
        Rotation::Half => (raw_width - (x + w), raw_height - (y + h), w, h),
        Rotation::Cw90 => (y, raw_height - (x + w), h, w),
    };

    Roi {
        x: rx,
        y: ry,
        width: align_down(rw),
        height: align_down(rh),
    }
}

/// Rotate an 8-bit grayscale frame for display.
///
/// Returns the rotated buffer and its (width, height). `Ccw90` is a
/// counter-clockwise quarter turn, `Cw90` clockwise.
pub fn rotate_gray(data: &[u8], width: u32, height: u32, rotation: Rotation) -> (Vec<u8>, u32, u32) {
    let w = width as usize;
    let h = height as usize;
    debug_assert_eq!(data.len(), w * h);

    match rotation {
        Rotation::None => (data.to_vec(), width, height),
        Rotation::Ccw90 => {
            let mut out = vec![0u8; w * h];
            for yd in 0..w {
                for xd in 0..h {
                    out[yd * h + xd] = data[xd * w + (w - 1 - yd)];
                }
            }
            (out, height, width)
        }
        Rotation::Half => {
            let mut out = vec![0u8; w * h];
            for yd in 0..h {
                for xd in 0..w {
                    out[yd * w + xd] = data[(h - 1 - yd) * w + (w - 1 - xd)];
                }
            }
            (out, width, height)
        }
        Rotation::Cw90 => {
            let mut out = vec![0u8; w * h];
            for yd in 0..w {
                for xd in 0..h {
                    out[yd * h + xd] = data[(h - 1 - xd) * w + yd];
                }
            }
            (out, height, width)
        }
    }
}

/// Crop an 8-bit grayscale frame by an in-bounds ROI.
pub fn crop_gray(data: &[u8], width: u32, _height: u32, roi: &Roi) -> Vec<u8> {
    let w = width as usize;
    let (rx, ry) = (roi.x as usize, roi.y as usize);
    let (rw, rh) = (roi.width as usize, roi.height as usize);

    let mut out = Vec::with_capacity(rw * rh);
    for row in ry..ry + rh {
        let start = row * w + rx;
        out.extend_from_slice(&data[start..start + rw]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_mapping_preserves_aligned_rect() {
        let roi = map_to_raw(DisplayRect::new(32, 48, 64, 32), 640, 480, Rotation::None);
        assert_eq!(
            roi,
            Roi {
                x: 32,
                y: 48,
                width: 64,
                height: 32
            }
        );
    }

    #[test]
    fn quarter_turns_swap_dimensions() {
        let rect = DisplayRect::new(0, 0, 32, 16);
        let ccw = map_to_raw(rect, 640, 480, Rotation::Ccw90);
        assert_eq!((ccw.width, ccw.height), (16, 32));
        // Top-left of the CCW display maps to the raw top-right corner region.
        assert_eq!((ccw.x, ccw.y), (640 - 16, 0));

        let cw = map_to_raw(rect, 640, 480, Rotation::Cw90);
        assert_eq!((cw.width, cw.height), (16, 32));
        assert_eq!((cw.x, cw.y), (0, 480 - 32));
    }

    #[test]
    fn half_turn_reflects_both_axes() {
        let roi = map_to_raw(DisplayRect::new(16, 32, 48, 16), 640, 480, Rotation::Half);
        assert_eq!(
            roi,
            Roi {
                x: 640 - 16 - 48,
                y: 480 - 32 - 16,
                width: 48,
                height: 16
            }
        );
    }

    #[test]
    fn dimensions_floor_to_macroblocks() {
        let roi = map_to_raw(DisplayRect::new(0, 0, 47, 31), 640, 480, Rotation::None);
        assert_eq!((roi.width, roi.height), (32, 16));
    }

    #[test]
    fn out_of_bounds_rect_is_clamped() {
        let roi = map_to_raw(DisplayRect::new(600, 400, 200, 200), 640, 480, Rotation::None);
        assert!(roi.x + roi.width <= 640);
        assert!(roi.y + roi.height <= 480);
        assert_eq!(roi.width % MACROBLOCK, 0);
        assert_eq!(roi.height % MACROBLOCK, 0);
    }

    #[test]
    fn tiny_rect_degenerates_to_zero_area() {
        let roi = map_to_raw(DisplayRect::new(5, 5, 10, 10), 640, 480, Rotation::None);
        assert!(roi.is_degenerate());
    }

    #[test]
    fn rotate_gray_quarter_turn_known_values() {
        // 3 wide, 2 tall:
        //   1 2 3
        //   4 5 6
        let src = [1u8, 2, 3, 4, 5, 6];

        let (ccw, w, h) = rotate_gray(&src, 3, 2, Rotation::Ccw90);
        assert_eq!((w, h), (2, 3));
        assert_eq!(ccw, vec![3, 6, 2, 5, 1, 4]);

        let (cw, w, h) = rotate_gray(&src, 3, 2, Rotation::Cw90);
        assert_eq!((w, h), (2, 3));
        assert_eq!(cw, vec![4, 1, 5, 2, 6, 3]);

        let (half, w, h) = rotate_gray(&src, 3, 2, Rotation::Half);
        assert_eq!((w, h), (3, 2));
        assert_eq!(half, vec![6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn crop_gray_extracts_rows() {
        // 4x3 frame, crop the central 2x2.
        let src: Vec<u8> = (0..12).collect();
        let roi = Roi {
            x: 1,
            y: 1,
            width: 2,
            height: 2,
        };
        assert_eq!(crop_gray(&src, 4, 3, &roi), vec![5, 6, 9, 10]);
    }
}
