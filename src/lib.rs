//! Multi-plane KMS composition over DRM dumb buffers
//!
//! Opens a DRM card, finds the first active display, allocates CPU-mapped
//! dumb buffers and scans them out on hardware planes without a compositor
//! or GPU.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Session (session.rs)                    │
//! │        setup -> interactive overlay moves -> teardown       │
//! └─────────────────────────────────────────────────────────────┘
//!          │                    │                     │
//! ┌────────────────┐  ┌───────────────────┐  ┌────────────────┐
//! │   Inventory    │  │   Framebuffer     │  │  Plane binder  │
//! │ connectors,    │  │ CREATE_DUMB, mmap │  │   SET_PLANE    │
//! │ CRTCs, planes  │  │ ADDFB             │  │                │
//! └────────────────┘  └───────────────────┘  └────────────────┘
//!          │                    │                     │
//! ┌─────────────────────────────────────────────────────────────┐
//! │             DrmDevice -> Backend (DrmCard / fake)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use drm_planes::{DrmDevice, Session, SessionConfig};
//! use drm_planes::input::ReaderKeys;
//!
//! let device = DrmDevice::open("/dev/dri/card1".as_ref())?;
//! Session::new(SessionConfig::default()).run(device, &mut ReaderKeys::stdin())?;
//! ```

pub mod backend;
pub mod config;
pub mod drm_device;
pub mod dumb_buffer;
pub mod error;
pub mod input;
pub mod inventory;
pub mod modeset;
pub mod plane;
pub mod session;

pub use config::Config;
pub use drm_device::DrmDevice;
pub use dumb_buffer::Framebuffer;
pub use error::Error;
pub use session::{Session, SessionConfig, SessionState};

/// Result type for this crate
pub type Result<T> = std::result::Result<T, Error>;
