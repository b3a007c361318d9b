//! Logging overlay and kiosk sinks
//!
//! Used by the headless binary and the simulator where there is no screen.
//! The overlay sink only logs when the drawn set changes.

use crate::domain::{DrawInstruction, KioskDisplay, OverlayRenderer};
use parking_lot::Mutex;
use tracing::{debug, info};

#[derive(Default)]
pub struct LogOverlayRenderer {
    last_labels: Mutex<Vec<String>>,
}

impl LogOverlayRenderer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OverlayRenderer for LogOverlayRenderer {
    fn render(&self, instructions: &[DrawInstruction]) {
        let labels: Vec<String> = instructions.iter().map(|i| i.label.clone()).collect();
        let mut last = self.last_labels.lock();
        if *last == labels {
            return;
        }
        for instruction in instructions {
            debug!(
                x = %instruction.bbox.x,
                y = %instruction.bbox.y,
                width = %instruction.bbox.width,
                color = %instruction.color,
                opacity = format!("{:.1}", instruction.opacity),
                label = %instruction.label,
                "overlay_draw"
            );
        }
        info!(boxes = %labels.len(), labels = ?labels, "overlay_changed");
        *last = labels;
    }
}

#[derive(Default)]
pub struct LogKioskDisplay;

impl LogKioskDisplay {
    pub fn new() -> Self {
        Self
    }
}

impl KioskDisplay for LogKioskDisplay {
    fn show(&self) {
        info!("kiosk_idle_shown");
    }

    fn hide(&self) {
        info!("kiosk_idle_hidden");
    }
}
