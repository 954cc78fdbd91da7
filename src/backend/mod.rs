//! Raw device access
//!
//! The [`Backend`] trait is the thin layer of DRM ioctls everything else is
//! built on. Methods return plain `io::Result`s; callers decide which error
//! kind a failure maps to.

use std::io;
use std::ops::DerefMut;

use crate::inventory::{
    ConnectorId, ConnectorInfo, CrtcId, CrtcInfo, FramebufferId, PlaneId, PlaneInfo, ResourceSet,
};

pub mod card;
#[cfg(test)]
pub(crate) mod fake;

pub use card::DrmCard;

/// Reply of `DRM_IOCTL_MODE_CREATE_DUMB`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumbAllocation {
    pub handle: u32,
    pub width: u32,
    pub height: u32,
    pub bpp: u32,
    pub pitch: u32,
    /// Total byte size as reported by the kernel
    pub size: u64,
}

/// Arguments of one `DRM_IOCTL_MODE_SETPLANE` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneRequest {
    pub plane: PlaneId,
    pub crtc: CrtcId,
    pub framebuffer: FramebufferId,
    pub flags: u32,
    /// Destination on the CRTC, integer pixels
    pub crtc_rect: (i32, i32, u32, u32),
    /// Source in the framebuffer, 16.16 fixed point
    pub src_rect: (u32, u32, u32, u32),
}

pub trait Backend {
    /// Process mapping of a dumb buffer; dropping it unmaps
    type Mapping: DerefMut<Target = [u8]>;

    fn enable_universal_planes(&self) -> io::Result<()>;

    fn resources(&self) -> io::Result<ResourceSet>;
    fn connector(&self, id: ConnectorId) -> io::Result<ConnectorInfo>;
    fn crtc(&self, id: CrtcId) -> io::Result<CrtcInfo>;
    fn plane_ids(&self) -> io::Result<Vec<PlaneId>>;
    fn plane(&self, id: PlaneId) -> io::Result<PlaneInfo>;

    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> io::Result<DumbAllocation>;
    fn map_offset(&self, handle: u32) -> io::Result<u64>;
    fn map(&self, offset: u64, len: usize) -> io::Result<Self::Mapping>;
    fn destroy_dumb(&self, handle: u32) -> io::Result<()>;

    fn register_framebuffer(&self, buffer: &DumbAllocation, depth: u32) -> io::Result<FramebufferId>;
    fn unregister_framebuffer(&self, id: FramebufferId) -> io::Result<()>;

    fn update_plane(&self, request: &PlaneRequest) -> io::Result<()>;

    /// Legacy modeset of one connector on `crtc` using the connector's mode at `mode_index`
    fn modeset_crtc(
        &self,
        crtc: CrtcId,
        framebuffer: FramebufferId,
        connector: ConnectorId,
        mode_index: usize,
    ) -> io::Result<()>;

    /// Queue a page flip that reports completion through an event
    fn flip_crtc(&self, crtc: CrtcId, framebuffer: FramebufferId) -> io::Result<()>;

    /// Block until the flip queued on `crtc` completes; returns the frame sequence
    fn wait_flip(&self, crtc: CrtcId) -> io::Result<u32>;
}
