//! Single-pipeline scan-out through the legacy CRTC path
//!
//! No planes involved: one full-screen buffer is set as the CRTC's primary
//! framebuffer, then flipped once with an event to confirm it reached the
//! screen.

use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::backend::Backend;
use crate::drm_device::DrmDevice;
use crate::dumb_buffer::{Framebuffer, BPP};
use crate::inventory::Inventory;
use crate::{Error, Result};

/// Fill the first active output with `color` for `hold`
pub fn show_single<B: Backend>(device: &DrmDevice<B>, color: u32, hold: Duration) -> Result<()> {
    let inventory = Inventory::query(device)?;
    let connector = inventory.select_connector(device)?;
    let crtc = inventory.first_pipeline(device)?;
    let mode = connector.preferred_mode().ok_or(Error::NoActiveDisplay)?;

    let mut fb = Framebuffer::allocate(device, mode.width, mode.height, BPP)?;
    fb.fill(color);

    device
        .backend()
        .modeset_crtc(crtc.id, fb.id(), connector.id, 0)
        .map_err(|e| Error::ModeSetting(format!("SET_CRTC on CRTC {}: {}", crtc.id, e)))?;
    info!(
        "CRTC {} driving connector {} at {}x{}",
        crtc.id, connector.id, mode.width, mode.height
    );

    device
        .backend()
        .flip_crtc(crtc.id, fb.id())
        .map_err(|e| Error::ModeSetting(format!("page flip on CRTC {}: {}", crtc.id, e)))?;
    let frame = device
        .backend()
        .wait_flip(crtc.id)
        .map_err(|e| Error::ModeSetting(format!("waiting for flip on CRTC {}: {}", crtc.id, e)))?;
    debug!("Flip completed on CRTC {} (frame {})", crtc.id, frame);

    thread::sleep(hold);
    fb.free()
}
