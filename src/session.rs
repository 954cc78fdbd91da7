//! Two-plane composition session
//!
//! Stands up a full-screen base plane and a quarter-size overlay on the
//! first CRTC of the first active connector, then moves the overlay in
//! response to key presses.
//!
//! ```text
//! Uninitialized -> DeviceOpen -> ResourcesDiscovered -> BuffersAllocated
//!      -> PlanesBound -> Interactive -> TearingDown -> Closed
//! ```
//!
//! Teardown runs exactly once from whatever state the session reached,
//! including when setup fails halfway or the session is dropped.

use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::config::Config;
use crate::drm_device::DrmDevice;
use crate::dumb_buffer::{Framebuffer, BPP};
use crate::input::{Command, InputSource};
use crate::inventory::{ConnectorInfo, CrtcInfo, Inventory, ModeInfo, UsedPlanes};
use crate::plane::{BoundPlane, Rect};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    DeviceOpen,
    ResourcesDiscovered,
    BuffersAllocated,
    PlanesBound,
    Interactive,
    TearingDown,
    Closed,
}

/// Session parameters taken from [`Config`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub step: i32,
    pub base_color: u32,
    pub overlay_color: u32,
    pub overlay_origin: (i32, i32),
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            step: config.step,
            base_color: config.base_color,
            overlay_color: config.overlay_color,
            overlay_origin: config.overlay_origin,
        }
    }
}

/// Connector and CRTC the session drives
struct Output {
    connector: ConnectorInfo,
    crtc: CrtcInfo,
}

impl Output {
    fn mode(&self) -> Option<&ModeInfo> {
        self.connector.preferred_mode()
    }
}

pub struct Session<B: Backend> {
    config: SessionConfig,
    state: SessionState,
    device: Option<DrmDevice<B>>,
    inventory: Option<Inventory>,
    output: Option<Output>,
    base: Option<Framebuffer<B>>,
    overlay: Option<Framebuffer<B>>,
    used_planes: UsedPlanes,
    base_plane: Option<BoundPlane>,
    overlay_plane: Option<BoundPlane>,
    position: (i32, i32),
}

impl<B: Backend> Session<B> {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Uninitialized,
            device: None,
            inventory: None,
            output: None,
            base: None,
            overlay: None,
            used_planes: UsedPlanes::new(),
            base_plane: None,
            overlay_plane: None,
            position: config.overlay_origin,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current overlay position
    pub fn position(&self) -> (i32, i32) {
        self.position
    }

    pub fn base_plane(&self) -> Option<&BoundPlane> {
        self.base_plane.as_ref()
    }

    pub fn overlay_plane(&self) -> Option<&BoundPlane> {
        self.overlay_plane.as_ref()
    }

    pub fn base_buffer(&self) -> Option<&Framebuffer<B>> {
        self.base.as_ref()
    }

    pub fn overlay_buffer(&self) -> Option<&Framebuffer<B>> {
        self.overlay.as_ref()
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn expect_state(&self, expected: SessionState) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidState { state: self.state, expected });
        }
        Ok(())
    }

    fn device(&self) -> Result<&DrmDevice<B>> {
        self.device.as_ref().ok_or(Error::InvalidState {
            state: self.state,
            expected: SessionState::DeviceOpen,
        })
    }

    /// Uninitialized -> DeviceOpen
    pub fn attach(&mut self, device: DrmDevice<B>) -> Result<()> {
        self.expect_state(SessionState::Uninitialized)?;
        self.device = Some(device);
        self.transition(SessionState::DeviceOpen);
        Ok(())
    }

    /// DeviceOpen -> ResourcesDiscovered
    pub fn discover(&mut self) -> Result<()> {
        self.expect_state(SessionState::DeviceOpen)?;
        let device = self.device()?;

        let inventory = Inventory::query(device)?;
        let connector = inventory.select_connector(device)?;
        let crtc = inventory.first_pipeline(device)?;

        if let Some(mode) = connector.preferred_mode() {
            info!(
                "Using connector {} on CRTC {}: {} ({}x{}@{})",
                connector.id, crtc.id, mode.name, mode.width, mode.height, mode.refresh
            );
        }

        self.inventory = Some(inventory);
        self.output = Some(Output { connector, crtc });
        self.transition(SessionState::ResourcesDiscovered);
        Ok(())
    }

    /// ResourcesDiscovered -> BuffersAllocated
    pub fn allocate(&mut self) -> Result<()> {
        self.expect_state(SessionState::ResourcesDiscovered)?;
        let (width, height) = self
            .output
            .as_ref()
            .and_then(Output::mode)
            .map(|m| (m.width, m.height))
            .ok_or(Error::NoActiveDisplay)?;

        let device = self.device()?;
        let mut base = Framebuffer::allocate(device, width, height, BPP)?;
        base.fill(self.config.base_color);
        self.base = Some(base);

        let device = self.device()?;
        let mut overlay = Framebuffer::allocate(device, width / 2, height / 2, BPP)?;
        overlay.fill(self.config.overlay_color);
        self.overlay = Some(overlay);

        self.transition(SessionState::BuffersAllocated);
        Ok(())
    }

    /// BuffersAllocated -> PlanesBound
    pub fn bind_planes(&mut self) -> Result<()> {
        self.expect_state(SessionState::BuffersAllocated)?;
        let (device, inventory, output, base, overlay) = match (
            self.device.as_ref(),
            self.inventory.as_ref(),
            self.output.as_ref(),
            self.base.as_ref(),
            self.overlay.as_ref(),
        ) {
            (Some(d), Some(i), Some(o), Some(b), Some(ov)) => (d, i, o, b, ov),
            _ => {
                return Err(Error::InvalidState {
                    state: self.state,
                    expected: SessionState::BuffersAllocated,
                })
            }
        };
        let crtc = output.crtc.id;

        let info = inventory.select_plane(device, &self.used_planes, crtc)?;
        self.used_planes.claim(info.id);
        let rect = Rect { x: 0, y: 0, width: base.width(), height: base.height() };
        self.base_plane = Some(BoundPlane::attach(device, info, crtc, base.id(), rect)?);

        let info = inventory.select_plane(device, &self.used_planes, crtc)?;
        self.used_planes.claim(info.id);
        let (x, y) = self.config.overlay_origin;
        let rect = Rect { x, y, width: overlay.width(), height: overlay.height() };
        self.overlay_plane = Some(BoundPlane::attach(device, info, crtc, overlay.id(), rect)?);
        self.position = (x, y);

        self.transition(SessionState::PlanesBound);
        Ok(())
    }

    /// Run every setup step up to PlanesBound
    pub fn setup(&mut self, device: DrmDevice<B>) -> Result<()> {
        self.attach(device)?;
        self.discover()?;
        self.allocate()?;
        self.bind_planes()
    }

    /// Apply one command; returns false when the session should stop
    pub fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Quit => false,
            Command::Ignore => true,
            Command::Move(dx, dy) => {
                let step = self.config.step;
                let x = self.position.0.saturating_add(dx.saturating_mul(step));
                let y = self.position.1.saturating_add(dy.saturating_mul(step));
                self.position = (x, y);

                if let (Some(device), Some(plane)) = (self.device.as_ref(), self.overlay_plane.as_mut()) {
                    match plane.move_to(device, x, y) {
                        Ok(()) => debug!("Overlay moved to ({}, {})", x, y),
                        Err(e) => warn!("Overlay move to ({}, {}) failed: {}", x, y, e),
                    }
                }
                true
            }
        }
    }

    /// PlanesBound -> Interactive, until `q` or the input closes
    pub fn interact<I: InputSource>(&mut self, input: &mut I) -> Result<()> {
        self.expect_state(SessionState::PlanesBound)?;
        self.transition(SessionState::Interactive);
        info!("Interactive: w/a/s/d move the overlay, q quits");

        loop {
            let Some(key) = input.next_key()? else {
                info!("Input closed");
                break;
            };
            let command = Command::from_key(key);
            match command {
                Command::Ignore => info!("Ignoring key {:?}", key),
                _ => debug!(key = ?key, ?command, "Key"),
            }
            if !self.handle(command) {
                break;
            }
        }
        Ok(())
    }

    /// Release everything acquired so far; a no-op once Closed
    pub fn teardown(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.transition(SessionState::TearingDown);

        // Snapshot references only; the framebuffers below own the bindings
        self.overlay_plane = None;
        self.base_plane = None;

        for fb in [self.overlay.take(), self.base.take()].into_iter().flatten() {
            let id = fb.id();
            if let Err(e) = fb.free() {
                warn!("Releasing framebuffer {} failed: {}", id, e);
            }
        }

        self.output = None;
        self.inventory = None;
        self.device = None;

        self.transition(SessionState::Closed);
        info!("Session closed");
    }

    /// Set up, interact, tear down; teardown also runs when setup fails
    pub fn run<I: InputSource>(mut self, device: DrmDevice<B>, input: &mut I) -> Result<()> {
        let result = self.setup(device).and_then(|()| self.interact(input));
        if let Err(e) = &result {
            warn!("Session aborted in state {:?}: {}", self.state, e);
        }
        self.teardown();
        result
    }
}

impl<B: Backend> Drop for Session<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}
