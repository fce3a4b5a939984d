use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Centre of the box in image coordinates.
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Distance between the two eye landmarks, if landmarks are present.
    pub fn eye_distance(&self) -> Option<f32> {
        self.landmarks.map(|lms| {
            let (lx, ly) = lms[0];
            let (rx, ry) = lms[1];
            ((rx - lx).powi(2) + (ry - ly).powi(2)).sqrt()
        })
    }

    /// Intersection-over-union with another box; 0 when both are empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix = (self.x + self.width).min(other.x + other.width) - self.x.max(other.x);
        let iy = (self.y + self.height).min(other.y + other.height) - self.y.max(other.y);
        let inter = ix.max(0.0) * iy.max(0.0);
        let union = self.width * self.height + other.width * other.height - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Pick the face whose centre lies closest to the image centre.
pub fn most_central(faces: &[BoundingBox], width: u32, height: u32) -> Option<&BoundingBox> {
    let (icx, icy) = (width as f32 / 2.0, height as f32 / 2.0);
    faces.iter().min_by(|a, b| {
        let da = dist2(a.center(), (icx, icy));
        let db = dist2(b.center(), (icx, icy));
        da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
    })
}

fn dist2((ax, ay): (f32, f32), (bx, by): (f32, f32)) -> f32 {
    (ax - bx).powi(2) + (ay - by).powi(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face_at(x: f32, y: f32) -> BoundingBox {
        BoundingBox { x, y, width: 10.0, height: 10.0, confidence: 0.9, landmarks: None }
    }

    #[test]
    fn test_eye_distance() {
        let mut face = face_at(0.0, 0.0);
        assert!(face.eye_distance().is_none());

        face.landmarks = Some([(10.0, 10.0), (13.0, 14.0), (0.0, 0.0), (0.0, 0.0), (0.0, 0.0)]);
        assert!((face.eye_distance().unwrap() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_most_central_picks_nearest_to_center() {
        let faces = vec![face_at(0.0, 0.0), face_at(45.0, 45.0), face_at(90.0, 0.0)];
        let best = most_central(&faces, 100, 100).unwrap();
        assert_eq!(best.x, 45.0);
    }

    #[test]
    fn test_iou() {
        let a = face_at(0.0, 0.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&face_at(20.0, 20.0)), 0.0);
        // Half overlap: 50 / (100 + 100 - 50).
        assert!((a.iou(&face_at(5.0, 0.0)) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_most_central_empty() {
        assert!(most_central(&[], 100, 100).is_none());
    }
}
