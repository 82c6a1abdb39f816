//! Geometry helpers over the CoreFoundation rect types.

use objc2_core_foundation::{CGPoint, CGRect, CGSize};
use serde::{Deserialize, Serialize};

/// Serde mirror of CGRect for wire formats and recorded events.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
#[serde(remote = "CGRect")]
pub struct CGRectDef {
    #[serde(with = "CGPointDef")]
    pub origin: CGPoint,
    #[serde(with = "CGSizeDef")]
    pub size: CGSize,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
#[serde(remote = "CGPoint")]
pub struct CGPointDef {
    pub x: f64,
    pub y: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
#[serde(remote = "CGSize")]
pub struct CGSizeDef {
    pub width: f64,
    pub height: f64,
}

pub trait CGRectExt {
    fn max(&self) -> CGPoint;
    fn mid(&self) -> CGPoint;
    fn round(&self) -> CGRect;
    /// Whether two rects are the same within a point. AX reads come back
    /// with sub-point noise on scaled displays.
    fn same_as(&self, other: CGRect) -> bool;
}

impl CGRectExt for CGRect {
    fn max(&self) -> CGPoint {
        CGPoint::new(self.origin.x + self.size.width, self.origin.y + self.size.height)
    }

    fn mid(&self) -> CGPoint {
        CGPoint::new(
            self.origin.x + self.size.width / 2.0,
            self.origin.y + self.size.height / 2.0,
        )
    }

    fn round(&self) -> CGRect {
        CGRect::new(
            CGPoint::new(self.origin.x.round(), self.origin.y.round()),
            CGSize::new(self.size.width.round(), self.size.height.round()),
        )
    }

    fn same_as(&self, other: CGRect) -> bool {
        fn close(a: f64, b: f64) -> bool { (a - b).abs() < 1.0 }
        close(self.origin.x, other.origin.x)
            && close(self.origin.y, other.origin.y)
            && close(self.size.width, other.size.width)
            && close(self.size.height, other.size.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x: f64, y: f64, w: f64, h: f64) -> CGRect {
        CGRect::new(CGPoint::new(x, y), CGSize::new(w, h))
    }

    #[test]
    fn same_as_tolerates_subpoint_noise() {
        assert!(rect(0.0, 0.0, 100.0, 100.0).same_as(rect(0.4, -0.4, 100.6, 99.5)));
        assert!(!rect(0.0, 0.0, 100.0, 100.0).same_as(rect(2.0, 0.0, 100.0, 100.0)));
    }

    #[test]
    fn max_and_round() {
        let r = rect(8.2, 4.7, 100.4, 50.5);
        assert!((r.max().x - 108.6).abs() < 1e-9);
        let rounded = r.round();
        assert_eq!(rounded.origin.x, 8.0);
        assert_eq!(rounded.size.height, 51.0);
    }
}
