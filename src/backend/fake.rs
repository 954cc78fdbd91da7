//! In-memory backend for tests
//!
//! Records every acquire/release in a shared [`Ledger`] and panics when a
//! buffer, framebuffer or mapping is released twice.

use std::collections::HashSet;
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use super::{Backend, DumbAllocation, PlaneRequest};
use crate::inventory::{
    ConnectionStatus, ConnectorId, ConnectorInfo, CrtcId, CrtcInfo, EncoderId, FramebufferId,
    ModeInfo, PipelineSet, PlaneId, PlaneInfo, ResourceSet,
};

const GUARD: usize = 64;
const GUARD_BYTE: u8 = 0xA5;
const PITCH_ALIGN: u32 = 64;

pub const CRTC: CrtcId = CrtcId(40);
pub const ENCODER: EncoderId = EncoderId(45);
pub const FIRST_CONNECTOR: u32 = 50;
pub const FIRST_FB: u32 = 100;

#[derive(Debug, Default, Clone)]
pub struct Ledger {
    pub opened: usize,
    pub closed: usize,
    pub dumb_created: usize,
    pub dumb_destroyed: usize,
    pub mapped: usize,
    pub unmapped: usize,
    pub fb_added: usize,
    pub fb_removed: usize,
    pub plane_updates: Vec<PlaneRequest>,
    pub modesets: Vec<(CrtcId, FramebufferId, ConnectorId, usize)>,
    pub flips: usize,
    pub flips_completed: usize,
}

impl Ledger {
    pub fn assert_balanced(&self) {
        assert_eq!(self.opened, self.closed, "device open/close mismatch");
        assert_eq!(self.dumb_created, self.dumb_destroyed, "dumb create/destroy mismatch");
        assert_eq!(self.mapped, self.unmapped, "map/unmap mismatch");
        assert_eq!(self.fb_added, self.fb_removed, "framebuffer add/remove mismatch");
    }
}

/// Which calls should fail
#[derive(Debug, Default, Clone)]
pub struct Faults {
    pub universal_planes: bool,
    pub create: bool,
    pub map_offset: bool,
    pub map: bool,
    pub register: bool,
    /// 1-based indices of `update_plane` calls that fail
    pub updates: Vec<usize>,
    pub modeset: bool,
}

#[derive(Debug, Default)]
struct Live {
    next_handle: u32,
    next_fb: u32,
    dumbs: Vec<DumbAllocation>,
    framebuffers: HashSet<u32>,
    pending_flip: Option<CrtcId>,
    frame: u32,
}

pub struct FakeBackend {
    resources: ResourceSet,
    connectors: Vec<ConnectorInfo>,
    planes: Vec<PlaneInfo>,
    faults: Faults,
    live: Mutex<Live>,
    ledger: Arc<Mutex<Ledger>>,
}

fn einval() -> io::Error {
    io::Error::from_raw_os_error(libc::EINVAL)
}

fn enoent() -> io::Error {
    io::Error::from_raw_os_error(libc::ENOENT)
}

pub fn plane(id: u32, possible_crtcs: u32) -> PlaneInfo {
    PlaneInfo {
        id: PlaneId(id),
        possible_crtcs: PipelineSet::from_bits(possible_crtcs),
        crtc: None,
        framebuffer: None,
        formats: vec![0x34325258],
    }
}

impl FakeBackend {
    /// One connected 60Hz connector, one CRTC, two planes on that CRTC
    pub fn single_display(width: u32, height: u32) -> Self {
        Self::with_connectors(width, height, &[(ConnectionStatus::Connected, true)])
    }

    /// Connectors in order, each `(status, has_modes)`
    pub fn with_connectors(width: u32, height: u32, outputs: &[(ConnectionStatus, bool)]) -> Self {
        let connectors: Vec<ConnectorInfo> = outputs
            .iter()
            .enumerate()
            .map(|(i, &(status, has_modes))| ConnectorInfo {
                id: ConnectorId(FIRST_CONNECTOR + i as u32),
                status,
                modes: if has_modes {
                    vec![ModeInfo {
                        width,
                        height,
                        refresh: 60,
                        name: format!("{width}x{height}"),
                    }]
                } else {
                    vec![]
                },
                encoder: Some(ENCODER),
            })
            .collect();

        let ledger = Arc::new(Mutex::new(Ledger { opened: 1, ..Ledger::default() }));

        Self {
            resources: ResourceSet {
                connectors: connectors.iter().map(|c| c.id).collect(),
                crtcs: vec![CRTC],
                encoders: vec![ENCODER],
            },
            connectors,
            planes: vec![plane(31, 0b1), plane(32, 0b1)],
            faults: Faults::default(),
            live: Mutex::new(Live { next_handle: 1, next_fb: FIRST_FB, ..Live::default() }),
            ledger,
        }
    }

    pub fn planes(mut self, planes: Vec<PlaneInfo>) -> Self {
        self.planes = planes;
        self
    }

    pub fn crtcs(mut self, crtcs: Vec<CrtcId>) -> Self {
        self.resources.crtcs = crtcs;
        self
    }

    pub fn faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    pub fn ledger(&self) -> Arc<Mutex<Ledger>> {
        Arc::clone(&self.ledger)
    }

    fn dumb(&self, handle: u32) -> Option<DumbAllocation> {
        self.live.lock().unwrap().dumbs.iter().find(|d| d.handle == handle).copied()
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.ledger.lock().unwrap().closed += 1;
    }
}

/// Heap-backed mapping with guard bytes on both sides
pub struct FakeMapping {
    storage: Vec<u8>,
    len: usize,
    ledger: Arc<Mutex<Ledger>>,
}

impl FakeMapping {
    pub fn guards_intact(&self) -> bool {
        self.storage[..GUARD].iter().all(|&b| b == GUARD_BYTE)
            && self.storage[GUARD + self.len..].iter().all(|&b| b == GUARD_BYTE)
    }
}

impl Deref for FakeMapping {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.storage[GUARD..GUARD + self.len]
    }
}

impl DerefMut for FakeMapping {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.storage[GUARD..GUARD + self.len]
    }
}

impl Drop for FakeMapping {
    fn drop(&mut self) {
        self.ledger.lock().unwrap().unmapped += 1;
    }
}

impl Backend for FakeBackend {
    type Mapping = FakeMapping;

    fn enable_universal_planes(&self) -> io::Result<()> {
        if self.faults.universal_planes {
            return Err(einval());
        }
        Ok(())
    }

    fn resources(&self) -> io::Result<ResourceSet> {
        Ok(self.resources.clone())
    }

    fn connector(&self, id: ConnectorId) -> io::Result<ConnectorInfo> {
        self.connectors.iter().find(|c| c.id == id).cloned().ok_or_else(enoent)
    }

    fn crtc(&self, id: CrtcId) -> io::Result<CrtcInfo> {
        if !self.resources.crtcs.contains(&id) {
            return Err(enoent());
        }
        Ok(CrtcInfo { id, framebuffer: None, position: (0, 0), mode: None })
    }

    fn plane_ids(&self) -> io::Result<Vec<PlaneId>> {
        Ok(self.planes.iter().map(|p| p.id).collect())
    }

    fn plane(&self, id: PlaneId) -> io::Result<PlaneInfo> {
        self.planes.iter().find(|p| p.id == id).cloned().ok_or_else(enoent)
    }

    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> io::Result<DumbAllocation> {
        if self.faults.create || width == 0 || height == 0 || bpp == 0 {
            return Err(einval());
        }
        let row = width * bpp.div_ceil(8);
        let pitch = row.div_ceil(PITCH_ALIGN) * PITCH_ALIGN;

        let mut live = self.live.lock().unwrap();
        let alloc = DumbAllocation {
            handle: live.next_handle,
            width,
            height,
            bpp,
            pitch,
            size: u64::from(pitch) * u64::from(height),
        };
        live.next_handle += 1;
        live.dumbs.push(alloc);
        self.ledger.lock().unwrap().dumb_created += 1;
        Ok(alloc)
    }

    fn map_offset(&self, handle: u32) -> io::Result<u64> {
        if self.faults.map_offset || self.dumb(handle).is_none() {
            return Err(einval());
        }
        Ok(u64::from(handle) << 12)
    }

    fn map(&self, offset: u64, len: usize) -> io::Result<FakeMapping> {
        let handle = u32::try_from(offset >> 12).map_err(|_| einval())?;
        let dumb = self.dumb(handle).ok_or_else(einval)?;
        if self.faults.map || len as u64 > dumb.size {
            return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        }
        self.ledger.lock().unwrap().mapped += 1;
        Ok(FakeMapping {
            storage: vec![GUARD_BYTE; len + 2 * GUARD],
            len,
            ledger: Arc::clone(&self.ledger),
        })
    }

    fn destroy_dumb(&self, handle: u32) -> io::Result<()> {
        let mut live = self.live.lock().unwrap();
        let index = live.dumbs.iter().position(|d| d.handle == handle);
        let index = index.unwrap_or_else(|| panic!("dumb buffer {handle} destroyed twice"));
        live.dumbs.remove(index);
        self.ledger.lock().unwrap().dumb_destroyed += 1;
        Ok(())
    }

    fn register_framebuffer(&self, buffer: &DumbAllocation, depth: u32) -> io::Result<FramebufferId> {
        if self.faults.register || depth > buffer.bpp || self.dumb(buffer.handle).is_none() {
            return Err(einval());
        }
        let mut live = self.live.lock().unwrap();
        let id = live.next_fb;
        live.next_fb += 1;
        live.framebuffers.insert(id);
        self.ledger.lock().unwrap().fb_added += 1;
        Ok(FramebufferId(id))
    }

    fn unregister_framebuffer(&self, id: FramebufferId) -> io::Result<()> {
        let removed = self.live.lock().unwrap().framebuffers.remove(&id.0);
        assert!(removed, "framebuffer {id} removed twice");
        self.ledger.lock().unwrap().fb_removed += 1;
        Ok(())
    }

    fn update_plane(&self, request: &PlaneRequest) -> io::Result<()> {
        let call = {
            let mut ledger = self.ledger.lock().unwrap();
            ledger.plane_updates.push(*request);
            ledger.plane_updates.len()
        };
        if self.faults.updates.contains(&call) {
            return Err(einval());
        }

        let plane = self.planes.iter().find(|p| p.id == request.plane).ok_or_else(enoent)?;
        if !plane.attachable_to(&self.resources, request.crtc) {
            return Err(einval());
        }
        if !self.live.lock().unwrap().framebuffers.contains(&request.framebuffer.0) {
            return Err(enoent());
        }
        Ok(())
    }

    fn modeset_crtc(
        &self,
        crtc: CrtcId,
        framebuffer: FramebufferId,
        connector: ConnectorId,
        mode_index: usize,
    ) -> io::Result<()> {
        if self.faults.modeset || !self.resources.crtcs.contains(&crtc) {
            return Err(einval());
        }
        let info = self.connector(connector)?;
        if mode_index >= info.modes.len() {
            return Err(einval());
        }
        if !self.live.lock().unwrap().framebuffers.contains(&framebuffer.0) {
            return Err(enoent());
        }
        self.ledger.lock().unwrap().modesets.push((crtc, framebuffer, connector, mode_index));
        Ok(())
    }

    fn flip_crtc(&self, crtc: CrtcId, framebuffer: FramebufferId) -> io::Result<()> {
        let mut live = self.live.lock().unwrap();
        if live.pending_flip.is_some() {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        if !live.framebuffers.contains(&framebuffer.0) {
            return Err(enoent());
        }
        live.pending_flip = Some(crtc);
        self.ledger.lock().unwrap().flips += 1;
        Ok(())
    }

    fn wait_flip(&self, crtc: CrtcId) -> io::Result<u32> {
        let mut live = self.live.lock().unwrap();
        if live.pending_flip != Some(crtc) {
            return Err(io::Error::from_raw_os_error(libc::EAGAIN));
        }
        live.pending_flip = None;
        live.frame += 1;
        self.ledger.lock().unwrap().flips_completed += 1;
        Ok(live.frame)
    }
}
