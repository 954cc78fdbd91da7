//! Plane binding (`DRM_IOCTL_MODE_SETPLANE`)

use tracing::{debug, trace};

use crate::backend::{Backend, PlaneRequest};
use crate::drm_device::DrmDevice;
use crate::inventory::{CrtcId, FramebufferId, PlaneId, PlaneInfo};
use crate::{Error, Result};

/// Flag value passed for interactive moves
const RELATIVE_FLAG: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    /// Initial placement (flags = 0)
    Set,
    /// Reposition of an already placed plane
    Relative,
}

impl BindMode {
    pub fn flags(self) -> u32 {
        match self {
            BindMode::Set => 0,
            BindMode::Relative => RELATIVE_FLAG,
        }
    }
}

/// Destination rectangle on the CRTC; x/y may be negative
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Integer pixels to 16.16 fixed point; `None` past 65535
fn fixed_16_16(pixels: u32) -> Option<u32> {
    u16::try_from(pixels).ok().map(|p| u32::from(p) << 16)
}

impl PlaneRequest {
    /// Whole-buffer source crop scanned out at `dest`
    ///
    /// Returns `None` when the size does not fit the 16.16 source format.
    pub fn whole_buffer(
        plane: PlaneId,
        crtc: CrtcId,
        framebuffer: FramebufferId,
        mode: BindMode,
        dest: Rect,
    ) -> Option<Self> {
        Some(Self {
            plane,
            crtc,
            framebuffer,
            flags: mode.flags(),
            crtc_rect: (dest.x, dest.y, dest.width, dest.height),
            src_rect: (0, 0, fixed_16_16(dest.width)?, fixed_16_16(dest.height)?),
        })
    }
}

/// Attach `framebuffer` to `plane` on `crtc` and position it
///
/// Called once per interactive move; builds the request on the stack.
pub fn bind<B: Backend>(
    device: &DrmDevice<B>,
    plane: PlaneId,
    crtc: CrtcId,
    framebuffer: FramebufferId,
    mode: BindMode,
    dest: Rect,
) -> Result<()> {
    let request = PlaneRequest::whole_buffer(plane, crtc, framebuffer, mode, dest).ok_or(
        Error::Bind { plane: plane.0, status: -libc::EINVAL },
    )?;
    trace!(?request, "SET_PLANE");
    device
        .backend()
        .update_plane(&request)
        .map_err(|e| Error::bind(plane.0, &e))
}

/// A plane holding one of our framebuffers
///
/// Keeps the plane snapshot taken at selection time. Dropping it releases
/// the snapshot only; the hardware binding goes away with the framebuffer.
#[derive(Debug)]
pub struct BoundPlane {
    pub info: PlaneInfo,
    pub crtc: CrtcId,
    pub framebuffer: FramebufferId,
    pub rect: Rect,
}

impl BoundPlane {
    /// Place `framebuffer` on a freshly selected plane
    pub fn attach<B: Backend>(
        device: &DrmDevice<B>,
        info: PlaneInfo,
        crtc: CrtcId,
        framebuffer: FramebufferId,
        rect: Rect,
    ) -> Result<Self> {
        bind(device, info.id, crtc, framebuffer, BindMode::Set, rect)?;
        debug!(
            "Plane {} bound: fb {} on CRTC {} at ({}, {}) {}x{}",
            info.id, framebuffer, crtc, rect.x, rect.y, rect.width, rect.height
        );
        Ok(Self { info, crtc, framebuffer, rect })
    }

    pub fn id(&self) -> PlaneId {
        self.info.id
    }

    /// Move to (x, y); the stored rect only changes if the device accepted it
    pub fn move_to<B: Backend>(&mut self, device: &DrmDevice<B>, x: i32, y: i32) -> Result<()> {
        let rect = Rect { x, y, ..self.rect };
        bind(device, self.info.id, self.crtc, self.framebuffer, BindMode::Relative, rect)?;
        self.rect = rect;
        Ok(())
    }
}
