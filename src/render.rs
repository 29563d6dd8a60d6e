//! Software compositor: nearest-neighbor scaling of decoded RGBA images
//! into the presentation surface.
//!
//! Everything here is pure pixel math over caller-provided buffers. The
//! blit never clears; callers clear the affected region first so stale
//! pixels from a previous (possibly larger) image cannot bleed through.

/// A mutable view over the presentation surface's mapped pixels.
///
/// `stride` is in bytes and may exceed `width * 4` (the kernel picks the
/// pitch when the buffer is allocated).
pub struct FrameBuf<'a> {
    pub pixels: &'a mut [u8],
    pub width: u32,
    pub height: u32,
    pub stride: u32,
}

/// A decoded source image, tightly packed RGBA8.
pub struct SourceImage<'a> {
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
}

/// Where and how a source image lands on the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Scale so the width fills the destination, preserving aspect ratio;
    /// if that makes the image taller than `cap_h`, clamp the height to
    /// `cap_h` and recompute the width. Horizontally centered, bottom
    /// aligned.
    AspectFitBottom { cap_h: u32 },
    /// Fill the destination width and exactly the bottom half of the
    /// destination height, ignoring the source aspect ratio.
    BottomHalf,
}

/// The rectangle a blit drew (or will draw) into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Placement {
    /// Compute the destination rectangle for a `src_w x src_h` image on a
    /// `dst_w x dst_h` surface. All dimensions must be non-zero.
    pub fn rect(self, dst_w: u32, dst_h: u32, src_w: u32, src_h: u32) -> Rect {
        match self {
            Placement::AspectFitBottom { cap_h } => {
                let cap_h = cap_h.min(dst_h).max(1);
                let mut w = dst_w;
                let mut h = ((w as u64 * src_h as u64) / src_w as u64) as u32;
                if h > cap_h {
                    h = cap_h;
                    w = (((h as u64 * src_w as u64) / src_h as u64) as u32).min(dst_w);
                }
                let h = h.max(1);
                let w = w.max(1);
                Rect {
                    x: (dst_w - w) / 2,
                    y: dst_h - h,
                    w,
                    h,
                }
            }
            Placement::BottomHalf => Rect {
                x: 0,
                y: dst_h / 2,
                w: dst_w,
                h: dst_h / 2,
            },
        }
    }

    /// The region a caller must clear before blitting with this placement,
    /// as `(first_row, row_count)`. Covers the largest rectangle the
    /// placement can ever draw so a smaller image fully overwrites a
    /// previous larger one.
    pub fn clear_rows(self, dst_h: u32) -> (u32, u32) {
        match self {
            // Aspect-fit height varies per image; clear the whole frame.
            Placement::AspectFitBottom { .. } => (0, dst_h),
            Placement::BottomHalf => (dst_h / 2, dst_h - dst_h / 2),
        }
    }
}

/// Clear the whole frame to black.
pub fn clear(frame: &mut FrameBuf<'_>) {
    frame.pixels.fill(0);
}

/// Clear `rows` rows starting at `first_row` to black.
pub fn clear_rows(frame: &mut FrameBuf<'_>, first_row: u32, rows: u32) {
    let first_row = first_row.min(frame.height);
    let last_row = (first_row + rows).min(frame.height);
    let start = first_row as usize * frame.stride as usize;
    let end = (last_row as usize * frame.stride as usize).min(frame.pixels.len());
    if start < end {
        frame.pixels[start..end].fill(0);
    }
}

/// Nearest-neighbor blit of `src` into `frame` under `placement`,
/// converting RGBA to little-endian XRGB8888. Returns the drawn rectangle.
///
/// Source indices are clamped so rounding at the last row/column can never
/// read past the source buffer.
pub fn blit(frame: &mut FrameBuf<'_>, src: &SourceImage<'_>, placement: Placement) -> Rect {
    let rect = placement.rect(frame.width, frame.height, src.width, src.height);
    blit_rect(frame, src, rect);
    rect
}

/// Blit `src` scaled into an explicit destination rectangle.
pub fn blit_rect(frame: &mut FrameBuf<'_>, src: &SourceImage<'_>, rect: Rect) {
    if rect.w == 0 || rect.h == 0 || src.width == 0 || src.height == 0 {
        return;
    }
    let stride = frame.stride as usize;
    for y in 0..rect.h {
        if rect.y + y >= frame.height {
            break;
        }
        let sy = ((y as u64 * src.height as u64) / rect.h as u64) as u32;
        let sy = sy.min(src.height - 1);
        let row = (rect.y + y) as usize * stride;
        for x in 0..rect.w {
            if rect.x + x >= frame.width {
                break;
            }
            let sx = ((x as u64 * src.width as u64) / rect.w as u64) as u32;
            let sx = sx.min(src.width - 1);
            let s = ((sy * src.width + sx) * 4) as usize;
            let d = row + (rect.x + x) as usize * 4;
            // RGBA -> XRGB8888 (0x00RRGGBB), little-endian bytes B,G,R,X.
            frame.pixels[d] = src.pixels[s + 2];
            frame.pixels[d + 1] = src.pixels[s + 1];
            frame.pixels[d + 2] = src.pixels[s];
            frame.pixels[d + 3] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_storage(w: u32, h: u32) -> Vec<u8> {
        vec![0xAA; (w * h * 4) as usize]
    }

    fn frame<'a>(buf: &'a mut [u8], w: u32, h: u32) -> FrameBuf<'a> {
        FrameBuf {
            pixels: buf,
            width: w,
            height: h,
            stride: w * 4,
        }
    }

    #[test]
    fn aspect_fit_wide_image_fills_width() {
        // 4:1 banner on a 1920x1080 surface: width-fit height is 480 <= cap.
        let r = Placement::AspectFitBottom { cap_h: 1080 }.rect(1920, 1080, 400, 100);
        assert_eq!(r, Rect { x: 0, y: 600, w: 1920, h: 480 });
    }

    #[test]
    fn aspect_fit_tall_image_clamps_height() {
        // Square source: width-fit height would be 1920 > 1080 cap.
        let r = Placement::AspectFitBottom { cap_h: 1080 }.rect(1920, 1080, 500, 500);
        assert_eq!(r.h, 1080);
        assert_eq!(r.w, 1080);
        // Centered horizontally, bottom aligned.
        assert_eq!(r.x, (1920 - 1080) / 2);
        assert_eq!(r.y, 0);
    }

    #[test]
    fn aspect_fit_cap_never_exceeds_surface() {
        let r = Placement::AspectFitBottom { cap_h: 4000 }.rect(640, 480, 100, 100);
        assert!(r.h <= 480);
        assert!(r.y + r.h <= 480);
    }

    #[test]
    fn bottom_half_is_exactly_half() {
        let r = Placement::BottomHalf.rect(1920, 1080, 307, 53);
        assert_eq!(r, Rect { x: 0, y: 540, w: 1920, h: 540 });
        // Odd height: half rounds down, anchored at the top of the bottom half.
        let r = Placement::BottomHalf.rect(100, 101, 10, 10);
        assert_eq!(r.y, 50);
        assert_eq!(r.h, 50);
    }

    #[test]
    fn blit_converts_rgba_to_xrgb() {
        let mut buf = frame_storage(2, 2);
        let mut f = frame(&mut buf, 2, 2);
        // Pure red source pixel.
        let src = SourceImage {
            pixels: &[255, 0, 0, 255],
            width: 1,
            height: 1,
        };
        blit_rect(&mut f, &src, Rect { x: 0, y: 0, w: 2, h: 2 });
        // B, G, R, X
        assert_eq!(&buf[0..4], &[0, 0, 255, 0]);
    }

    #[test]
    fn blit_leaves_pixels_outside_rect_untouched() {
        let mut buf = frame_storage(4, 4);
        let mut f = frame(&mut buf, 4, 4);
        let src = SourceImage {
            pixels: &[1, 2, 3, 4],
            width: 1,
            height: 1,
        };
        blit_rect(&mut f, &src, Rect { x: 1, y: 1, w: 2, h: 2 });
        // Corner pixel outside the rect keeps its previous contents.
        assert_eq!(&buf[0..4], &[0xAA; 4]);
    }

    #[test]
    fn clear_rows_clamps_to_frame() {
        let mut buf = frame_storage(2, 4);
        let mut f = frame(&mut buf, 2, 4);
        clear_rows(&mut f, 2, 100);
        assert_eq!(&buf[0..4], &[0xAA; 4]);
        assert!(buf[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn clear_region_for_bottom_half_covers_remainder() {
        // 101 rows: clearing must reach the last row even though the drawn
        // height is 50.
        let (first, rows) = Placement::BottomHalf.clear_rows(101);
        assert_eq!(first, 50);
        assert_eq!(first + rows, 101);
    }
}
