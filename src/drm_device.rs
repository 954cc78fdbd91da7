//! DRM device handle
//!
//! Owns the connection to one display device. Buffers keep a shared
//! reference to the backend, so the device node is closed only after the
//! last buffer allocated on it has been released.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::{Backend, DrmCard};
use crate::{Error, Result};

pub struct DrmDevice<B: Backend> {
    backend: Arc<B>,
    universal_planes: bool,
}

impl DrmDevice<DrmCard> {
    /// Open a DRM card node read-write
    pub fn open(path: &Path) -> Result<Self> {
        info!("Opening DRM device {}", path.display());
        let card = DrmCard::open(path).map_err(|source| Error::DeviceOpen {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::with_backend(card))
    }
}

impl<B: Backend> DrmDevice<B> {
    /// Wrap an already open backend and negotiate universal planes
    pub fn with_backend(backend: B) -> Self {
        let universal_planes = match backend.enable_universal_planes() {
            Ok(()) => {
                debug!("Universal planes enabled");
                true
            }
            Err(e) => {
                warn!("Universal planes unavailable, only overlay planes are visible: {}", e);
                false
            }
        };

        Self {
            backend: Arc::new(backend),
            universal_planes,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub(crate) fn shared_backend(&self) -> Arc<B> {
        Arc::clone(&self.backend)
    }

    /// Whether primary and cursor planes show up in the plane list
    pub fn universal_planes(&self) -> bool {
        self.universal_planes
    }
}

impl<B: Backend> Drop for DrmDevice<B> {
    fn drop(&mut self) {
        let buffers = Arc::strong_count(&self.backend) - 1;
        if buffers > 0 {
            warn!("Closing DRM device while {} buffer(s) still hold it", buffers);
        } else {
            debug!("Closing DRM device");
        }
    }
}
