//! Binary mask thinning (Zhang-Suen)
//!
//! Reduces every foreground blob to a one-pixel-wide centre line while
//! keeping it connected. Road length is measured on the thinned mask.

use image::{GrayImage, Luma};

const FOREGROUND: u8 = 255;

/// Thin a mask (any non-zero pixel is foreground) to its skeleton.
///
/// The result holds 255 on skeleton pixels and 0 elsewhere.
pub fn thin(mask: &GrayImage) -> GrayImage {
    let (width, height) = mask.dimensions();
    let (w, h) = (width as usize, height as usize);
    let mut pixels: Vec<bool> = mask.pixels().map(|p| p[0] > 0).collect();

    let mut to_clear = Vec::new();
    loop {
        let mut changed = false;
        for step in 0..2 {
            to_clear.clear();
            for y in 0..h {
                for x in 0..w {
                    if pixels[y * w + x] && removable(&pixels, w, h, x, y, step) {
                        to_clear.push(y * w + x);
                    }
                }
            }
            changed |= !to_clear.is_empty();
            for &i in &to_clear {
                pixels[i] = false;
            }
        }
        if !changed {
            break;
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        if pixels[y as usize * w + x as usize] {
            Luma([FOREGROUND])
        } else {
            Luma([0])
        }
    })
}

/// Neighbours P2..P9, clockwise from north; outside the image counts as background
fn neighbours(pixels: &[bool], w: usize, h: usize, x: usize, y: usize) -> [bool; 8] {
    let at = |dx: isize, dy: isize| -> bool {
        let nx = x as isize + dx;
        let ny = y as isize + dy;
        if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
            return false;
        }
        pixels[ny as usize * w + nx as usize]
    };
    [
        at(0, -1),
        at(1, -1),
        at(1, 0),
        at(1, 1),
        at(0, 1),
        at(-1, 1),
        at(-1, 0),
        at(-1, -1),
    ]
}

fn removable(pixels: &[bool], w: usize, h: usize, x: usize, y: usize, step: usize) -> bool {
    let n = neighbours(pixels, w, h, x, y);
    let [p2, p3, p4, p5, p6, p7, p8, p9] = n;

    let count = n.iter().filter(|v| **v).count();
    if !(2..=6).contains(&count) {
        return false;
    }

    let ring = [p2, p3, p4, p5, p6, p7, p8, p9, p2];
    let transitions = ring.windows(2).filter(|pair| !pair[0] && pair[1]).count();
    if transitions != 1 {
        return false;
    }

    if step == 0 {
        !(p2 && p4 && p6) && !(p4 && p6 && p8)
    } else {
        !(p2 && p4 && p8) && !(p2 && p6 && p8)
    }
}

/// Number of non-zero pixels
pub fn foreground_count(mask: &GrayImage) -> u64 {
    mask.pixels().filter(|p| p[0] > 0).count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(width: u32, height: u32, x0: u32, y0: u32, bw: u32, bh: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            if x >= x0 && x < x0 + bw && y >= y0 && y < y0 + bh {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn test_thin_line_unchanged() {
        let line = bar(20, 5, 2, 2, 15, 1);
        let skeleton = thin(&line);
        assert_eq!(skeleton, line);
    }

    #[test]
    fn test_thick_bar_thinned() {
        let thick = bar(40, 15, 5, 4, 30, 7);
        let skeleton = thin(&thick);

        let before = foreground_count(&thick);
        let after = foreground_count(&skeleton);
        assert!(after > 0);
        assert!(after < before / 3);

        // Skeleton never leaves the original mask
        for (x, y, p) in skeleton.enumerate_pixels() {
            if p[0] > 0 {
                assert!(thick.get_pixel(x, y)[0] > 0);
            }
        }
    }

    #[test]
    fn test_empty_mask() {
        let empty = GrayImage::new(8, 8);
        assert_eq!(foreground_count(&thin(&empty)), 0);
    }

    #[test]
    fn test_any_nonzero_is_foreground() {
        let mut mask = GrayImage::new(5, 3);
        for x in 0..5 {
            mask.put_pixel(x, 1, Luma([1]));
        }
        let skeleton = thin(&mask);
        assert_eq!(foreground_count(&skeleton), 5);
        assert_eq!(skeleton.get_pixel(2, 1)[0], 255);
    }
}
