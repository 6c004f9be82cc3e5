//! YUYV to RGB24 pixel format conversion
//!
//! Integer-only conversion with 8-bit fixed-point coefficients. The matrix
//! is picked per frame: BT.709 for HD frames (width >= 1280 or height >=
//! 720), BT.601 otherwise.

/// Fixed-point color matrix, coefficients scaled by 256
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColorMatrix {
    r_v: i32,
    g_u: i32,
    g_v: i32,
    b_u: i32,
}

const BT601: ColorMatrix = ColorMatrix {
    r_v: 409,
    g_u: 100,
    g_v: 208,
    b_u: 516,
};

const BT709: ColorMatrix = ColorMatrix {
    r_v: 459,
    g_u: 55,
    g_v: 136,
    b_u: 541,
};

/// Select the color matrix for a frame size
fn matrix_for(width: u32, height: u32) -> ColorMatrix {
    if width >= 1280 || height >= 720 {
        BT709
    } else {
        BT601
    }
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

#[inline]
fn store_pixel(dst: &mut [u8], luma: i32, d: i32, e: i32, m: ColorMatrix) {
    dst[0] = clamp_u8((luma + m.r_v * e + 128) >> 8);
    dst[1] = clamp_u8((luma - m.g_u * d - m.g_v * e + 128) >> 8);
    dst[2] = clamp_u8((luma + m.b_u * d + 128) >> 8);
}

/// Convert a packed YUYV frame into tightly packed RGB24
///
/// `src` must hold at least `width * height * 2` bytes; `dst` is resized to
/// `width * height * 3`. Width must be even, as YUYV carries chroma per
/// pixel pair.
pub fn yuyv_to_rgb(src: &[u8], width: u32, height: u32, dst: &mut Vec<u8>) {
    let m = matrix_for(width, height);
    let pixels = (width as usize) * (height as usize);
    dst.clear();
    dst.resize(pixels * 3, 0);

    let src_len = pixels * 2;
    debug_assert!(src.len() >= src_len);

    for (chunk, out) in src[..src_len]
        .chunks_exact(4)
        .zip(dst.chunks_exact_mut(6))
    {
        let y0 = chunk[0] as i32;
        let u = chunk[1] as i32;
        let y1 = chunk[2] as i32;
        let v = chunk[3] as i32;

        let d = u - 128;
        let e = v - 128;
        let c0 = 298 * (y0 - 16).max(0);
        let c1 = 298 * (y1 - 16).max(0);

        store_pixel(&mut out[0..3], c0, d, e, m);
        store_pixel(&mut out[3..6], c1, d, e, m);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert_one(y: u8, u: u8, v: u8, width: u32, height: u32) -> [u8; 3] {
        // Build a uniform frame and read back the first pixel.
        let pixels = (width as usize) * (height as usize);
        let mut src = Vec::with_capacity(pixels * 2);
        for _ in 0..pixels / 2 {
            src.extend_from_slice(&[y, u, y, v]);
        }
        let mut dst = Vec::new();
        yuyv_to_rgb(&src, width, height, &mut dst);
        assert_eq!(dst.len(), pixels * 3);
        [dst[0], dst[1], dst[2]]
    }

    #[test]
    fn full_range_white_saturates() {
        assert_eq!(convert_one(235, 128, 128, 640, 480), [255, 255, 255]);
        assert_eq!(convert_one(235, 128, 128, 1280, 720), [255, 255, 255]);
    }

    #[test]
    fn black_level_maps_to_zero() {
        assert_eq!(convert_one(16, 128, 128, 640, 480), [0, 0, 0]);
        // Sub-black luma is treated as black, not wrapped.
        assert_eq!(convert_one(8, 128, 128, 640, 480), [0, 0, 0]);
    }

    #[test]
    fn near_limits_stay_in_range() {
        assert_eq!(convert_one(17, 128, 128, 640, 480), [1, 1, 1]);
        assert_eq!(convert_one(234, 128, 128, 640, 480), [254, 254, 254]);
    }

    #[test]
    fn sd_frames_use_bt601() {
        // Classic BT.601 red: Y=81, U=90, V=240.
        assert_eq!(convert_one(81, 90, 240, 640, 480), [255, 0, 0]);
    }

    #[test]
    fn matrix_selection_by_size() {
        assert_eq!(matrix_for(640, 480), BT601);
        assert_eq!(matrix_for(1280, 720), BT709);
        assert_eq!(matrix_for(1920, 1080), BT709);
        // Either dimension crossing the HD threshold is enough.
        assert_eq!(matrix_for(720, 720), BT709);
        assert_eq!(matrix_for(1280, 600), BT709);
    }

    #[test]
    fn adjacent_pixels_share_chroma() {
        let src = [100u8, 50, 200, 220];
        let mut dst = Vec::new();
        yuyv_to_rgb(&src, 2, 1, &mut dst);
        assert_eq!(dst.len(), 6);
        // Same chroma, different luma: second pixel must be brighter on all
        // channels that did not clamp.
        assert!(dst[3] >= dst[0]);
        assert!(dst[4] >= dst[1]);
        assert!(dst[5] >= dst[2]);
    }
}
