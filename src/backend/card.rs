//! Backend over a real `/dev/dri/cardN` node
//!
//! Queries, plane updates and modesetting go through the `drm` crate's
//! control API. Dumb buffer allocation uses `drm-ffi` directly because the
//! high-level `DumbBuffer` does not expose the size the kernel reports.

use std::fs::{File, OpenOptions};
use std::io;
use std::ops::{Deref, DerefMut};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd};
use std::path::Path;
use std::ptr::{self, NonNull};

use drm::control::{self, connector, Device as ControlDevice, Event, PageFlipFlags};
use drm::{ClientCapability, Device};
use tracing::{debug, trace, warn};

use super::{Backend, DumbAllocation, PlaneRequest};
use crate::inventory::{
    ConnectionStatus, ConnectorId, ConnectorInfo, CrtcId, CrtcInfo, EncoderId, FramebufferId,
    ModeInfo, PipelineSet, PlaneId, PlaneInfo, ResourceSet,
};

/// An open DRM card node
#[derive(Debug)]
pub struct DrmCard(File);

impl DrmCard {
    /// Open read-write and close-on-exec
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(path)?;
        debug!("Opened DRM card {} (fd {})", path.display(), file.as_raw_fd());
        Ok(Self(file))
    }
}

impl AsFd for DrmCard {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl Device for DrmCard {}
impl ControlDevice for DrmCard {}

/// `mmap`ed view of a dumb buffer
#[derive(Debug)]
pub struct MmapRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl Deref for MmapRegion {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: ptr/len come from a successful mmap that lives until drop
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for MmapRegion {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and the mapping is PROT_WRITE
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: unmapping exactly the region mmap returned, once
        let ret = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
        if ret != 0 {
            warn!("munmap of {} bytes failed: {}", self.len, io::Error::last_os_error());
        } else {
            trace!("Unmapped {} bytes at {:p}", self.len, self.ptr);
        }
    }
}

fn handle<T: From<control::RawResourceHandle>>(kind: &str, raw: u32) -> io::Result<T> {
    control::from_u32(raw).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("null {kind} handle"))
    })
}

fn mode_info(mode: &control::Mode) -> ModeInfo {
    let (width, height) = mode.size();
    ModeInfo {
        width: width.into(),
        height: height.into(),
        refresh: mode.vrefresh(),
        name: mode.name().to_string_lossy().into_owned(),
    }
}

impl Backend for DrmCard {
    type Mapping = MmapRegion;

    fn enable_universal_planes(&self) -> io::Result<()> {
        self.set_client_capability(ClientCapability::UniversalPlanes, true)
    }

    fn resources(&self) -> io::Result<ResourceSet> {
        let res = self.resource_handles()?;
        Ok(ResourceSet {
            connectors: res.connectors().iter().map(|&h| ConnectorId(h.into())).collect(),
            crtcs: res.crtcs().iter().map(|&h| CrtcId(h.into())).collect(),
            encoders: res.encoders().iter().map(|&h| EncoderId(h.into())).collect(),
        })
    }

    fn connector(&self, id: ConnectorId) -> io::Result<ConnectorInfo> {
        let info = self.get_connector(handle("connector", id.0)?, false)?;
        let status = match info.state() {
            connector::State::Connected => ConnectionStatus::Connected,
            connector::State::Disconnected => ConnectionStatus::Disconnected,
            connector::State::Unknown => ConnectionStatus::Unknown,
        };
        Ok(ConnectorInfo {
            id,
            status,
            modes: info.modes().iter().map(mode_info).collect(),
            encoder: info.current_encoder().map(|e| EncoderId(e.into())),
        })
    }

    fn crtc(&self, id: CrtcId) -> io::Result<CrtcInfo> {
        let info = self.get_crtc(handle("CRTC", id.0)?)?;
        Ok(CrtcInfo {
            id,
            framebuffer: info.framebuffer().map(|fb| FramebufferId(fb.into())),
            position: info.position(),
            mode: info.mode().as_ref().map(mode_info),
        })
    }

    fn plane_ids(&self) -> io::Result<Vec<PlaneId>> {
        Ok(self
            .plane_handles()?
            .into_iter()
            .map(|h| PlaneId(h.into()))
            .collect())
    }

    fn plane(&self, id: PlaneId) -> io::Result<PlaneInfo> {
        let info = self.get_plane(handle("plane", id.0)?)?;

        // possible_crtcs is opaque in drm-rs. Take the raw mask so it is
        // decoded against the caller's CRTC list, not a fresh snapshot
        let raw = drm_ffi::mode::get_plane(self.as_fd(), id.0, None)?;

        Ok(PlaneInfo {
            id,
            possible_crtcs: PipelineSet::from_bits(raw.possible_crtcs),
            crtc: info.crtc().map(|c| CrtcId(c.into())),
            framebuffer: info.framebuffer().map(|fb| FramebufferId(fb.into())),
            formats: info.formats().to_vec(),
        })
    }

    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> io::Result<DumbAllocation> {
        let reply = drm_ffi::mode::dumbbuffer::create(self.as_fd(), width, height, bpp, 0)?;
        Ok(DumbAllocation {
            handle: reply.handle,
            width,
            height,
            bpp,
            pitch: reply.pitch,
            size: reply.size,
        })
    }

    fn map_offset(&self, handle: u32) -> io::Result<u64> {
        Ok(drm_ffi::mode::dumbbuffer::map(self.as_fd(), handle, 0, 0)?.offset)
    }

    fn map(&self, offset: u64, len: usize) -> io::Result<MmapRegion> {
        let offset = libc::off_t::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "map offset out of range"))?;

        // SAFETY: fresh shared mapping of the device fd; no existing memory is touched
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.as_fd().as_raw_fd(),
                offset,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned a null mapping"))?;
        Ok(MmapRegion { ptr, len })
    }

    fn destroy_dumb(&self, handle: u32) -> io::Result<()> {
        drm_ffi::mode::dumbbuffer::destroy(self.as_fd(), handle).map(|_| ())
    }

    fn register_framebuffer(&self, buffer: &DumbAllocation, depth: u32) -> io::Result<FramebufferId> {
        let reply = drm_ffi::mode::add_fb(
            self.as_fd(),
            buffer.width,
            buffer.height,
            buffer.pitch,
            buffer.bpp,
            depth,
            buffer.handle,
        )?;
        Ok(FramebufferId(reply.fb_id))
    }

    fn unregister_framebuffer(&self, id: FramebufferId) -> io::Result<()> {
        drm_ffi::mode::rm_fb(self.as_fd(), id.0)
    }

    fn update_plane(&self, request: &PlaneRequest) -> io::Result<()> {
        self.set_plane(
            handle("plane", request.plane.0)?,
            handle("CRTC", request.crtc.0)?,
            Some(handle("framebuffer", request.framebuffer.0)?),
            request.flags,
            request.crtc_rect,
            request.src_rect,
        )
    }

    fn modeset_crtc(
        &self,
        crtc: CrtcId,
        framebuffer: FramebufferId,
        connector: ConnectorId,
        mode_index: usize,
    ) -> io::Result<()> {
        let conn = handle("connector", connector.0)?;
        let info = self.get_connector(conn, false)?;
        let mode = *info.modes().get(mode_index).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("connector has no mode {mode_index}"))
        })?;

        self.set_crtc(
            handle("CRTC", crtc.0)?,
            Some(handle("framebuffer", framebuffer.0)?),
            (0, 0),
            &[conn],
            Some(mode),
        )
    }

    fn flip_crtc(&self, crtc: CrtcId, framebuffer: FramebufferId) -> io::Result<()> {
        self.page_flip(
            handle("CRTC", crtc.0)?,
            handle("framebuffer", framebuffer.0)?,
            PageFlipFlags::EVENT,
            None,
        )
    }

    fn wait_flip(&self, crtc: CrtcId) -> io::Result<u32> {
        let target: control::crtc::Handle = handle("CRTC", crtc.0)?;
        loop {
            for event in self.receive_events()? {
                match event {
                    Event::PageFlip(flip) if flip.crtc == target => return Ok(flip.frame),
                    Event::PageFlip(flip) => trace!("Ignoring flip on CRTC {:?}", flip.crtc),
                    _ => trace!("Ignoring non-flip DRM event"),
                }
            }
        }
    }
}
