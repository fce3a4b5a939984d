//! Face alignment via 4-DOF similarity transform.
//!
//! Aligns detected faces to the 512×512 FFHQ template used by GFPGAN, and
//! pastes restored crops back into the source image through the same
//! transform with a feathered edge.

use crate::raster::Raster;

/// FFHQ reference landmarks for a 512×512 output.
pub const REFERENCE_LANDMARKS_512: [(f32, f32); 5] = [
    (192.98138, 239.94708), // left eye
    (318.90277, 240.1936),  // right eye
    (256.63416, 314.01935), // nose
    (201.26117, 371.41043), // left mouth
    (313.08905, 371.15118), // right mouth
];

pub const ALIGNED_SIZE: usize = 512;

/// Fill colour (r, g, b) for crop pixels that fall outside the source image.
pub const BORDER_RGB: [u8; 3] = [132, 133, 135];

/// A 2×3 similarity transform `[a, -b, tx, b, a, ty]`:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
pub type Similarity = [f32; 6];

/// Least-squares similarity (scale, rotation, translation) mapping `src`
/// landmarks onto `dst`.
///
/// Solved in closed form on centred coordinates. Coincident source points
/// give a pure translation between the centroids.
pub fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Similarity {
    let centroid = |pts: &[(f32, f32); 5]| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
        (sx / pts.len() as f32, sy / pts.len() as f32)
    };
    let (mx, my) = centroid(src);
    let (nx, ny) = centroid(dst);

    let (mut dot, mut cross, mut norm) = (0.0f32, 0.0f32, 0.0f32);
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
        let (sx, sy, dx, dy) = (sx - mx, sy - my, dx - nx, dy - ny);
        dot += sx * dx + sy * dy;
        cross += sx * dy - sy * dx;
        norm += sx * sx + sy * sy;
    }

    let (a, b) = if norm > f32::EPSILON {
        (dot / norm, cross / norm)
    } else {
        (1.0, 0.0)
    };
    let tx = nx - (a * mx - b * my);
    let ty = ny - (b * mx + a * my);

    [a, -b, tx, b, a, ty]
}

/// Invert a similarity transform. Returns `None` for a degenerate matrix.
pub fn invert_similarity(m: &Similarity) -> Option<Similarity> {
    let (a, b, tx, ty) = (m[0], m[3], m[2], m[5]);
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return None;
    }
    // Inverse of [[a, -b], [b, a]] is [[a, b], [-b, a]] / det.
    let ia = a / det;
    let ib = b / det;
    let itx = -(ia * tx + ib * ty);
    let ity = -(-ib * tx + ia * ty);
    Some([ia, ib, itx, -ib, ia, ity])
}

#[inline]
fn apply(m: &Similarity, x: f32, y: f32) -> (f32, f32) {
    (m[0] * x + m[1] * y + m[2], m[3] * x + m[4] * y + m[5])
}

/// Bilinear sample of (r, g, b) at a sub-pixel position; `None` off-image.
fn sample_bilinear(image: &Raster, sx: f32, sy: f32, border: Option<[u8; 3]>) -> Option<[f32; 3]> {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let x0 = sx.floor() as i32;
    let y0 = sy.floor() as i32;
    let fx = sx - x0 as f32;
    let fy = sy - y0 as f32;

    let fetch = |x: i32, y: i32| -> Option<[u8; 3]> {
        if x >= 0 && x < w && y >= 0 && y < h {
            Some(image.rgb_at(x as u32, y as u32))
        } else {
            border
        }
    };

    let tl = fetch(x0, y0)?;
    let tr = fetch(x0 + 1, y0)?;
    let bl = fetch(x0, y0 + 1)?;
    let br = fetch(x0 + 1, y0 + 1)?;

    let mut out = [0.0f32; 3];
    for c in 0..3 {
        out[c] = tl[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + tr[c] as f32 * fx * (1.0 - fy)
            + bl[c] as f32 * (1.0 - fx) * fy
            + br[c] as f32 * fx * fy;
    }
    Some(out)
}

/// Apply a 2×3 similarity warp from `image` into an `out_size` square crop.
///
/// Uses bilinear interpolation. Out-of-bounds pixels are filled with
/// [`BORDER_RGB`]. The crop keeps the channel order of the source.
pub fn warp_affine(image: &Raster, matrix: &Similarity, out_size: usize) -> Raster {
    let mut output = Raster::filled(out_size as u32, out_size as u32, image.order(), BORDER_RGB);
    let Some(inverse) = invert_similarity(matrix) else {
        return output;
    };

    for oy in 0..out_size {
        for ox in 0..out_size {
            let (sx, sy) = apply(&inverse, ox as f32, oy as f32);
            if let Some(rgb) = sample_bilinear(image, sx, sy, Some(BORDER_RGB)) {
                output.put_rgb(ox as u32, oy as u32, rgb.map(|v| v.round().clamp(0.0, 255.0) as u8));
            }
        }
    }

    output
}

/// Align a detected face to the canonical 512×512 crop.
///
/// Returns the crop together with the image→crop transform, which
/// [`paste_face`] needs to put the restored crop back.
pub fn align_face(image: &Raster, landmarks: &[(f32, f32); 5]) -> (Raster, Similarity) {
    let matrix = estimate_similarity_transform(landmarks, &REFERENCE_LANDMARKS_512);
    (warp_affine(image, &matrix, ALIGNED_SIZE), matrix)
}

/// Blend a restored square crop back into `target`.
///
/// `matrix` is the image→crop transform returned by [`align_face`]. Each
/// target pixel covered by the crop is mixed with weight ramping from 0 at
/// the crop border to 1 at `feather` pixels inside it.
pub fn paste_face(target: &mut Raster, face: &Raster, matrix: &Similarity, feather: f32) {
    let Some(inverse) = invert_similarity(matrix) else {
        return;
    };
    let size = face.width() as f32;
    let last = size - 1.0;

    // Bounding box of the crop in target space.
    let corners = [(0.0, 0.0), (last, 0.0), (0.0, last), (last, last)].map(|(x, y)| apply(&inverse, x, y));
    let min_x = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let min_y = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let max_x = (corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max).ceil() as i64)
        .min(target.width() as i64 - 1);
    let max_y = (corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max).ceil() as i64)
        .min(target.height() as i64 - 1);
    if max_x < 0 || max_y < 0 {
        return;
    }

    let feather = feather.max(1.0);
    for y in min_y..=max_y as u32 {
        for x in min_x..=max_x as u32 {
            let (cx, cy) = apply(matrix, x as f32, y as f32);
            if cx < 0.0 || cy < 0.0 || cx > last || cy > last {
                continue;
            }
            let edge = cx.min(cy).min(last - cx).min(last - cy);
            let weight = (edge / feather).clamp(0.0, 1.0);
            if weight <= 0.0 {
                continue;
            }
            let Some(restored) = sample_bilinear(face, cx, cy, None) else {
                continue;
            };
            let original = target.rgb_at(x, y);
            let mut blended = [0u8; 3];
            for c in 0..3 {
                let v = restored[c] * weight + original[c] as f32 * (1.0 - weight);
                blended[c] = v.round().clamp(0.0, 255.0) as u8;
            }
            target.put_rgb(x, y, blended);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::ChannelOrder;

    fn shifted(dx: f32, dy: f32) -> [(f32, f32); 5] {
        REFERENCE_LANDMARKS_512.map(|(x, y)| (x + dx, y + dy))
    }

    #[test]
    fn test_identity_transform() {
        let pts = REFERENCE_LANDMARKS_512;
        let m = estimate_similarity_transform(&pts, &pts);

        assert!((m[0] - 1.0).abs() < 1e-3, "a = {}", m[0]);
        assert!(m[1].abs() < 1e-3, "-b = {}", m[1]);
        assert!(m[2].abs() < 0.5, "tx = {}", m[2]);
        assert!(m[3].abs() < 1e-3, "b = {}", m[3]);
        assert!((m[4] - 1.0).abs() < 1e-3, "a2 = {}", m[4]);
        assert!(m[5].abs() < 0.5, "ty = {}", m[5]);
    }

    #[test]
    fn test_scaled_transform() {
        // Source landmarks at half scale → transform should have a ≈ 2.0
        let src = REFERENCE_LANDMARKS_512.map(|(x, y)| (x * 0.5, y * 0.5));
        let m = estimate_similarity_transform(&src, &REFERENCE_LANDMARKS_512);
        assert!((m[0] - 2.0).abs() < 0.05, "a = {}, expected ~2.0", m[0]);
    }

    #[test]
    fn test_rotation_recovered() {
        let src = REFERENCE_LANDMARKS_512;
        let dst = src.map(|(x, y)| (-y, x));
        let m = estimate_similarity_transform(&src, &dst);
        let expected = [0.0, -1.0, 0.0, 1.0, 0.0, 0.0];
        for (got, want) in m.iter().zip(expected) {
            assert!((got - want).abs() < 1e-2, "{m:?}");
        }
    }

    #[test]
    fn test_coincident_landmarks_translate() {
        let src = [(10.0, 20.0); 5];
        let dst = [(15.0, 25.0); 5];
        let m = estimate_similarity_transform(&src, &dst);
        assert_eq!(apply(&m, 10.0, 20.0), (15.0, 25.0));
    }

    #[test]
    fn test_invert_similarity_roundtrip() {
        let m: Similarity = [0.8, -0.6, 12.0, 0.6, 0.8, -7.0];
        let inv = invert_similarity(&m).unwrap();
        let (x, y) = apply(&m, 31.0, 47.0);
        let (bx, by) = apply(&inv, x, y);
        assert!((bx - 31.0).abs() < 1e-3 && (by - 47.0).abs() < 1e-3, "({bx}, {by})");
    }

    #[test]
    fn test_invert_degenerate() {
        assert!(invert_similarity(&[0.0, 0.0, 1.0, 0.0, 0.0, 1.0]).is_none());
    }

    #[test]
    fn test_align_face_output_size_and_order() {
        let image = Raster::filled(640, 480, ChannelOrder::Bgr, [128, 128, 128]);
        let (aligned, _) = align_face(&image, &REFERENCE_LANDMARKS_512);
        assert_eq!(aligned.width() as usize, ALIGNED_SIZE);
        assert_eq!(aligned.height() as usize, ALIGNED_SIZE);
        assert_eq!(aligned.order(), ChannelOrder::Bgr);
    }

    #[test]
    fn test_warp_fills_border_outside_source() {
        // Tiny source: most of the crop maps outside it.
        let image = Raster::filled(8, 8, ChannelOrder::Rgb, [255, 0, 0]);
        let m: Similarity = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let crop = warp_affine(&image, &m, 32);
        assert_eq!(crop.rgb_at(2, 2), [255, 0, 0]);
        assert_eq!(crop.rgb_at(30, 30), BORDER_RGB);
    }

    #[test]
    fn test_landmark_lands_on_reference() {
        let mut image = Raster::filled(700, 700, ChannelOrder::Rgb, [0, 0, 0]);
        let landmarks = shifted(60.0, 80.0);

        // Paint a bright patch at the left eye.
        let (lx, ly) = (landmarks[0].0 as u32, landmarks[0].1 as u32);
        for y in ly - 2..=ly + 2 {
            for x in lx - 2..=lx + 2 {
                image.put_rgb(x, y, [255, 255, 255]);
            }
        }

        let (aligned, _) = align_face(&image, &landmarks);
        let rx = REFERENCE_LANDMARKS_512[0].0.round() as u32;
        let ry = REFERENCE_LANDMARKS_512[0].1.round() as u32;
        assert!(aligned.rgb_at(rx, ry)[0] > 100, "eye patch should land at the reference");
    }

    #[test]
    fn test_paste_identity_restore_leaves_image_unchanged() {
        let original = Raster::filled(600, 600, ChannelOrder::Bgr, [90, 120, 150]);
        let (crop, matrix) = align_face(&original, &shifted(40.0, 40.0));

        let mut target = original.clone();
        paste_face(&mut target, &crop, &matrix, ALIGNED_SIZE as f32 / 20.0);
        assert_eq!(target, original);
    }

    #[test]
    fn test_paste_writes_inside_and_not_outside() {
        let mut target = Raster::filled(800, 800, ChannelOrder::Rgb, [0, 0, 0]);
        let matrix = estimate_similarity_transform(&shifted(100.0, 100.0), &REFERENCE_LANDMARKS_512);
        let face = Raster::filled(ALIGNED_SIZE as u32, ALIGNED_SIZE as u32, ChannelOrder::Rgb, [200, 0, 0]);

        paste_face(&mut target, &face, &matrix, 25.6);

        // Centre of the crop maps to roughly (356, 356) in the target.
        assert_eq!(target.rgb_at(356, 356), [200, 0, 0]);
        // Crop edge is feathered toward the original.
        assert!(target.rgb_at(101, 356)[0] < 200);
        // Far corner untouched.
        assert_eq!(target.rgb_at(790, 790), [0, 0, 0]);
    }
}
