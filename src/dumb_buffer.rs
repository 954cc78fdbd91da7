//! Dumb buffer allocation
//!
//! A [`Framebuffer`] is a CPU-mapped dumb buffer registered with KMS. It is
//! built in four steps (create, map offset, mmap, ADDFB); whatever was
//! acquired before a failing step is released again before the error is
//! returned.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::{Backend, DumbAllocation};
use crate::drm_device::DrmDevice;
use crate::inventory::FramebufferId;
use crate::{Error, Result};

/// Storage bits per pixel (XRGB8888)
pub const BPP: u32 = 32;
/// Depth declared to ADDFB; the X byte is ignored
pub const DEPTH: u32 = 24;

pub const COLOR_RED: u32 = 0xFFFF0000;
pub const COLOR_BLUE: u32 = 0xFF0000FF;

/// Write `color` into every whole 4-byte pixel of `bytes`
///
/// Iterates over the reported buffer size rather than width × height, so
/// any pitch padding is covered and nothing past the end is touched.
pub fn fill(bytes: &mut [u8], color: u32) -> usize {
    let pixel = color.to_ne_bytes();
    let mut written = 0;
    for chunk in bytes.chunks_exact_mut(4) {
        chunk.copy_from_slice(&pixel);
        written += 1;
    }
    written
}

/// Created and mapped but not registered; dropping it unmaps and destroys
struct MappedDumb<B: Backend> {
    backend: Arc<B>,
    buffer: DumbAllocation,
    mapping: Option<B::Mapping>,
    live: bool,
}

impl<B: Backend> MappedDumb<B> {
    fn unmap(&mut self) {
        if self.mapping.take().is_some() {
            debug!("Unmapped dumb buffer {}", self.buffer.handle);
        }
    }

    fn release(&mut self) -> Result<()> {
        self.unmap();
        if std::mem::take(&mut self.live) {
            if let Err(e) = self.backend.destroy_dumb(self.buffer.handle) {
                warn!("Failed to destroy dumb buffer {}: {}", self.buffer.handle, e);
                return Err(Error::Io(e));
            }
        }
        Ok(())
    }
}

impl<B: Backend> Drop for MappedDumb<B> {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

pub struct Framebuffer<B: Backend> {
    dumb: MappedDumb<B>,
    id: FramebufferId,
    registered: bool,
}

impl<B: Backend> Framebuffer<B> {
    pub fn allocate(device: &DrmDevice<B>, width: u32, height: u32, bpp: u32) -> Result<Self> {
        let backend = device.shared_backend();

        let buffer = backend
            .create_dumb(width, height, bpp)
            .map_err(|source| Error::Alloc { width, height, bpp, source })?;
        debug!(
            "Created dumb buffer {}: {}x{} pitch={} size={}",
            buffer.handle, buffer.width, buffer.height, buffer.pitch, buffer.size
        );

        // From here on, dropping `dumb` rolls back whatever has been acquired
        let mut dumb = MappedDumb { backend, buffer, mapping: None, live: true };

        let len = usize::try_from(buffer.size).map_err(|_| {
            Error::Map(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("buffer size {} exceeds address space", buffer.size),
            ))
        })?;
        let offset = dumb.backend.map_offset(buffer.handle).map_err(Error::Map)?;
        dumb.mapping = Some(dumb.backend.map(offset, len).map_err(Error::Map)?);

        let id = dumb
            .backend
            .register_framebuffer(&buffer, DEPTH)
            .map_err(Error::Register)?;
        debug!("Registered framebuffer {} for dumb buffer {}", id, buffer.handle);

        Ok(Self { dumb, id, registered: true })
    }

    pub fn id(&self) -> FramebufferId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.dumb.buffer.width
    }

    pub fn height(&self) -> u32 {
        self.dumb.buffer.height
    }

    pub fn pitch(&self) -> u32 {
        self.dumb.buffer.pitch
    }

    pub fn size(&self) -> u64 {
        self.dumb.buffer.size
    }

    pub fn pixels(&self) -> &[u8] {
        self.dumb.mapping.as_deref().unwrap_or(&[])
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        self.dumb.mapping.as_deref_mut().unwrap_or(&mut [])
    }

    #[cfg(test)]
    pub(crate) fn mapping(&self) -> Option<&B::Mapping> {
        self.dumb.mapping.as_ref()
    }

    /// Fill the whole buffer with one XRGB value; returns pixels written
    pub fn fill(&mut self, color: u32) -> usize {
        fill(self.pixels_mut(), color)
    }

    /// Unmap, remove the framebuffer and destroy the dumb buffer
    pub fn free(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        let mut first_err = None;

        self.dumb.unmap();
        if std::mem::take(&mut self.registered) {
            if let Err(e) = self.dumb.backend.unregister_framebuffer(self.id) {
                warn!("Failed to remove framebuffer {}: {}", self.id, e);
                first_err.get_or_insert(Error::Io(e));
            }
        }
        if let Err(e) = self.dumb.release() {
            first_err.get_or_insert(e);
        }

        first_err.map_or(Ok(()), Err)
    }
}

impl<B: Backend> Drop for Framebuffer<B> {
    fn drop(&mut self) {
        let _ = self.release();
    }
}
