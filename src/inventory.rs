//! Resource inventory: connectors, CRTCs, encoders and planes
//!
//! Every lookup goes to the device and returns an owned snapshot. Dropping a
//! snapshot releases it; nothing here caches hardware state between queries.
//!
//! # Plane matching
//! A plane is usable for a CRTC when its `possible_crtcs` mask has the bit
//! for that CRTC's *index* in the resource list (not its object id) and the
//! plane has not been claimed earlier in the session.

use std::fmt;

use tracing::{debug, trace};

use crate::backend::Backend;
use crate::drm_device::DrmDevice;
use crate::{Error, Result};

macro_rules! object_id {
    ($name:ident, $kind:literal) => {
        #[doc = concat!("DRM ", $kind, " object id")]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub const KIND: &'static str = $kind;

            pub fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

object_id!(ConnectorId, "connector");
object_id!(CrtcId, "CRTC");
object_id!(EncoderId, "encoder");
object_id!(PlaneId, "plane");
object_id!(FramebufferId, "framebuffer");

/// Card-level resource lists, in kernel order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSet {
    pub connectors: Vec<ConnectorId>,
    pub crtcs: Vec<CrtcId>,
    pub encoders: Vec<EncoderId>,
}

impl ResourceSet {
    /// Position of a CRTC in the inventory, the index `possible_crtcs` bits refer to
    pub fn crtc_index(&self, crtc: CrtcId) -> Option<usize> {
        self.crtcs.iter().position(|&c| c == crtc)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Unknown,
}

/// Display mode (subset of drm_mode_modeinfo)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeInfo {
    pub width: u32,
    pub height: u32,
    pub refresh: u32,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ConnectorInfo {
    pub id: ConnectorId,
    pub status: ConnectionStatus,
    pub modes: Vec<ModeInfo>,
    pub encoder: Option<EncoderId>,
}

impl ConnectorInfo {
    /// Connected and advertising at least one mode
    pub fn is_active(&self) -> bool {
        self.status == ConnectionStatus::Connected && !self.modes.is_empty()
    }

    /// Preferred mode (the first one the kernel lists)
    pub fn preferred_mode(&self) -> Option<&ModeInfo> {
        self.modes.first()
    }
}

#[derive(Debug, Clone)]
pub struct CrtcInfo {
    pub id: CrtcId,
    pub framebuffer: Option<FramebufferId>,
    pub position: (u32, u32),
    pub mode: Option<ModeInfo>,
}

/// Maximum number of CRTCs a `possible_crtcs` mask can address
pub const MAX_PIPELINES: usize = 32;

/// Set of CRTC inventory indices a plane (or encoder) can attach to
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PipelineSet([bool; MAX_PIPELINES]);

impl PipelineSet {
    pub const fn empty() -> Self {
        Self([false; MAX_PIPELINES])
    }

    /// Decode a kernel `possible_crtcs` bitmask
    pub fn from_bits(bits: u32) -> Self {
        let mut flags = [false; MAX_PIPELINES];
        for (i, flag) in flags.iter_mut().enumerate() {
            *flag = bits & (1 << i) != 0;
        }
        Self(flags)
    }

    pub fn insert(&mut self, index: usize) {
        if let Some(flag) = self.0.get_mut(index) {
            *flag = true;
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        self.0.get(index).copied().unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().enumerate().filter(|&(_, &f)| f).map(|(i, _)| i)
    }

    pub fn is_empty(&self) -> bool {
        !self.0.contains(&true)
    }
}

impl fmt::Debug for PipelineSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[derive(Debug, Clone)]
pub struct PlaneInfo {
    pub id: PlaneId,
    pub possible_crtcs: PipelineSet,
    pub crtc: Option<CrtcId>,
    pub framebuffer: Option<FramebufferId>,
    pub formats: Vec<u32>,
}

impl PlaneInfo {
    pub fn attachable_to(&self, resources: &ResourceSet, crtc: CrtcId) -> bool {
        resources
            .crtc_index(crtc)
            .is_some_and(|index| self.possible_crtcs.contains(index))
    }
}

/// Planes claimed so far in this session
#[derive(Debug, Clone, Default)]
pub struct UsedPlanes {
    ids: Vec<PlaneId>,
}

impl UsedPlanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the plane was already claimed
    pub fn claim(&mut self, plane: PlaneId) -> bool {
        if self.contains(plane) {
            return false;
        }
        self.ids.push(plane);
        true
    }

    pub fn contains(&self, plane: PlaneId) -> bool {
        self.ids.contains(&plane)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = PlaneId> + '_ {
        self.ids.iter().copied()
    }
}

/// Plane usable for `crtc`: unclaimed and attachable
pub fn plane_is_eligible(
    plane: &PlaneInfo,
    resources: &ResourceSet,
    used: &UsedPlanes,
    crtc: CrtcId,
) -> bool {
    !used.contains(plane.id) && plane.attachable_to(resources, crtc)
}

/// Snapshot of the card's resource and plane lists
#[derive(Debug, Clone)]
pub struct Inventory {
    pub resources: ResourceSet,
    pub planes: Vec<PlaneId>,
}

impl Inventory {
    pub fn query<B: Backend>(device: &DrmDevice<B>) -> Result<Self> {
        let resources = device
            .backend()
            .resources()
            .map_err(|source| Error::Query { what: "resources", source })?;
        let planes = device
            .backend()
            .plane_ids()
            .map_err(|source| Error::Query { what: "plane resources", source })?;

        debug!(
            connectors = resources.connectors.len(),
            crtcs = resources.crtcs.len(),
            encoders = resources.encoders.len(),
            planes = planes.len(),
            universal_planes = device.universal_planes(),
            "Queried DRM resources"
        );

        Ok(Self { resources, planes })
    }

    /// First connected connector with at least one mode
    pub fn select_connector<B: Backend>(&self, device: &DrmDevice<B>) -> Result<ConnectorInfo> {
        for &id in &self.resources.connectors {
            let connector = match device.backend().connector(id) {
                Ok(connector) => connector,
                Err(e) => {
                    debug!("Skipping connector {}: {}", id, Error::lookup(ConnectorId::KIND, id.0, e));
                    continue;
                }
            };

            if connector.is_active() {
                debug!("Selected connector {} ({} modes)", id, connector.modes.len());
                return Ok(connector);
            }
            trace!("Connector {} not usable: {:?}", id, connector.status);
        }
        Err(Error::NoActiveDisplay)
    }

    /// First CRTC in inventory order
    pub fn first_pipeline<B: Backend>(&self, device: &DrmDevice<B>) -> Result<CrtcInfo> {
        let id = *self.resources.crtcs.first().ok_or(Error::NoActiveDisplay)?;
        device
            .backend()
            .crtc(id)
            .map_err(|e| Error::lookup(CrtcId::KIND, id.0, e))
    }

    /// First unclaimed plane attachable to `crtc`, in inventory order
    pub fn select_plane<B: Backend>(
        &self,
        device: &DrmDevice<B>,
        used: &UsedPlanes,
        crtc: CrtcId,
    ) -> Result<PlaneInfo> {
        for &id in &self.planes {
            let plane = match device.backend().plane(id) {
                Ok(plane) => plane,
                Err(e) => {
                    debug!("Skipping plane {}: {}", id, Error::lookup(PlaneId::KIND, id.0, e));
                    continue;
                }
            };

            if plane_is_eligible(&plane, &self.resources, used, crtc) {
                debug!(
                    "Selected plane {} for CRTC {} (crtcs={:?}, {} formats)",
                    id,
                    crtc,
                    plane.possible_crtcs,
                    plane.formats.len()
                );
                return Ok(plane);
            }
            trace!("Plane {} rejected for CRTC {}", id, crtc);
        }
        Err(Error::NoSuitablePlane { crtc: crtc.0 })
    }
}
