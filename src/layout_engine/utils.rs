use objc2_core_foundation::CGRect;

use crate::common::config::LayoutSettings;
use crate::sys::geometry::CGRectExt;

/// The area tiling may use: the screen minus outer gaps and any external
/// status bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Canvas {
    pub x: f64,
    pub y: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Canvas {
    pub fn width(&self) -> f64 { (self.x2 - self.x).max(0.0) }

    pub fn height(&self) -> f64 { (self.y2 - self.y).max(0.0) }
}

pub fn compute_canvas(screen: CGRect, settings: &LayoutSettings) -> Canvas {
    let outer = &settings.gaps.outer;
    let bar = &settings.external_bar;
    let max = screen.max();
    Canvas {
        x: screen.origin.x + outer.left,
        y: screen.origin.y + outer.top + bar.top,
        x2: max.x - outer.right,
        y2: max.y - outer.bottom - bar.bottom,
    }
}

#[cfg(test)]
mod tests {
    use objc2_core_foundation::{CGPoint, CGSize};

    use super::*;
    use crate::common::config::GapSettings;

    #[test]
    fn canvas_subtracts_gaps_and_bar() {
        let mut settings = LayoutSettings::default();
        settings.gaps = GapSettings::uniform(8.0);
        settings.external_bar.top = 40.0;
        let screen = CGRect::new(CGPoint::new(0.0, 0.0), CGSize::new(1000.0, 700.0));
        let canvas = compute_canvas(screen, &settings);
        assert_eq!(canvas.x, 8.0);
        assert_eq!(canvas.y, 48.0);
        assert_eq!(canvas.x2, 992.0);
        assert_eq!(canvas.y2, 692.0);
        assert_eq!(canvas.height(), 644.0);
    }
}
