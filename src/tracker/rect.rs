use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Pixel-space box, top-left corner plus size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    #[inline]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build from corner coordinates as emitted by most detectors.
    #[inline]
    pub fn from_tlbr(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    #[inline]
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    #[inline]
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// `[x1, y1, x2, y2]`
    #[inline]
    pub fn to_tlbr(&self) -> [f32; 4] {
        [self.x, self.y, self.right(), self.bottom()]
    }

    #[inline]
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width * 0.5, self.y + self.height * 0.5)
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Width over height, 0 for a degenerate box.
    #[inline]
    pub fn aspect_ratio(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            0.0
        }
    }

    /// Finite coordinates with strictly positive width and height.
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }

    /// Overlapping area with `other`, 0 when disjoint or only touching.
    pub fn intersection_area(&self, other: &Rect) -> f32 {
        let overlap_w = (self.right().min(other.right()) - self.x.max(other.x)).max(0.0);
        let overlap_h = (self.bottom().min(other.bottom()) - self.y.max(other.y)).max(0.0);
        overlap_w * overlap_h
    }

    /// Intersection over union in `[0, 1]`. Boxes without area never overlap.
    pub fn iou(&self, other: &Rect) -> f32 {
        let (a, b) = (self.area(), other.area());
        if a <= 0.0 || b <= 0.0 {
            return 0.0;
        }

        let inter = self.intersection_area(other);
        let union = a + b - inter;
        if union > 0.0 && union.is_finite() {
            (inter / union).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Pairwise IoU, shape `(boxes_a.len(), boxes_b.len())`.
pub fn iou_batch(boxes_a: &[Rect], boxes_b: &[Rect]) -> Array2<f32> {
    Array2::from_shape_fn((boxes_a.len(), boxes_b.len()), |(i, j)| {
        boxes_a[i].iou(&boxes_b[j])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corner_form() {
        let rect = Rect::from_tlbr(10.0, 20.0, 40.0, 60.0);
        assert_eq!(rect, Rect::new(10.0, 20.0, 30.0, 40.0));
        assert_eq!(rect.to_tlbr(), [10.0, 20.0, 40.0, 60.0]);
        assert_eq!(rect.center(), (25.0, 40.0));
        assert!((rect.aspect_ratio() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_partial_overlap() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 10.0, 10.0);

        // 25 shared over a union of 175
        assert_eq!(a.intersection_area(&b), 25.0);
        assert!((a.iou(&b) - 25.0 / 175.0).abs() < 1e-6);
        assert!((b.iou(&a) - a.iou(&b)).abs() < 1e-6);
    }

    #[test]
    fn test_disjoint_and_touching() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(a.iou(&Rect::new(20.0, 20.0, 10.0, 10.0)), 0.0);
        assert_eq!(a.iou(&Rect::new(10.0, 0.0, 10.0, 10.0)), 0.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_boxes() {
        let line = Rect::new(0.0, 0.0, 10.0, 0.0);
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(line.iou(&line), 0.0);
        assert_eq!(line.iou(&a), 0.0);
        assert!(!line.is_valid());
        assert!(!Rect::new(f32::NAN, 0.0, 1.0, 1.0).is_valid());
    }

    #[test]
    fn test_iou_batch_shape() {
        let a = [Rect::new(0.0, 0.0, 10.0, 10.0), Rect::new(50.0, 50.0, 5.0, 5.0)];
        let b = [Rect::new(0.0, 0.0, 10.0, 10.0)];
        let ious = iou_batch(&a, &b);
        assert_eq!(ious.dim(), (2, 1));
        assert!((ious[[0, 0]] - 1.0).abs() < 1e-6);
        assert_eq!(ious[[1, 0]], 0.0);
    }
}
