//! Display backend abstraction.
//!
//! Two implementations:
//!
//! - **DRM backend** (`drm`): the real thing, a KMS dumb buffer on a
//!   `/dev/dri/card*` node, master-lock arbitration against a peer
//!   process, CRTC commits.
//!
//! - **Headless backend** (`headless`): in-memory surface with scripted
//!   contention, for exercising the arbitration state machine and the
//!   presentation controller without hardware or DRM master access.
//!
//! The trait is deliberately narrow: the arbiter and controller only ever
//! see {select_output, create_surface, with_frame, acquire_control,
//! commit, release_control, destroy_surface}, so every contention scenario
//! is reproducible with the fake.

pub mod drm;
pub mod headless;

pub use drm::DrmBackend;
pub use headless::HeadlessBackend;

use thiserror::Error;

use crate::render::FrameBuf;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no connected display output")]
    NoConnectedOutput,
    #[error("no output selected")]
    NoOutput,
    #[error("no presentation surface")]
    NoSurface,
    #[error("buffer allocation failed: {0}")]
    AllocFailed(#[source] std::io::Error),
    #[error("buffer mapping failed: {0}")]
    MapFailed(#[source] std::io::Error),
    #[error("framebuffer registration failed: {0}")]
    RegisterFailed(#[source] std::io::Error),
    #[error("display control unavailable: {0}")]
    ControlUnavailable(#[source] std::io::Error),
    #[error("commit failed: {0}")]
    CommitFailed(#[source] std::io::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// True when the failure means another process holds display control.
    pub fn is_contention(&self) -> bool {
        matches!(self, BackendError::ControlUnavailable(_))
    }
}

/// A connected display output with its chosen timing mode.
#[derive(Debug, Clone, Copy)]
pub struct OutputInfo {
    pub connector_id: u32,
    pub crtc_id: u32,
    pub width: u32,
    pub height: u32,
    pub refresh_hz: u32,
}

/// Geometry of the registered presentation surface.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceInfo {
    pub width: u32,
    pub height: u32,
    /// Row pitch in bytes, chosen by the allocator.
    pub stride: u32,
    /// Total buffer size in bytes.
    pub size: u64,
}

/// The narrow seam between presentation logic and the kernel.
///
/// Call order is enforced by state, not types: `select_output` before
/// `create_surface`, `create_surface` before `with_frame`/`commit`.
/// `destroy_surface` and `release_control` are idempotent.
pub trait DisplayBackend {
    /// Pick a connected output, preferring an exact mode match.
    fn select_output(&mut self, preferred: Option<(u32, u32)>)
        -> Result<OutputInfo, BackendError>;

    /// Allocate and register the persistent presentation surface, sized to
    /// the selected output's mode.
    fn create_surface(&mut self) -> Result<SurfaceInfo, BackendError>;

    /// Run `f` over the surface's mapped pixels.
    fn with_frame(&mut self, f: &mut dyn FnMut(FrameBuf<'_>)) -> Result<(), BackendError>;

    /// Attempt to take exclusive display control. Fails with
    /// [`BackendError::ControlUnavailable`] while a peer holds it.
    fn acquire_control(&mut self) -> Result<(), BackendError>;

    /// Bind the surface to the output's pipeline. Requires control.
    fn commit(&mut self) -> Result<(), BackendError>;

    /// Give up exclusive control so the peer is never blocked. Errors are
    /// logged, not propagated.
    fn release_control(&mut self);

    /// Tear the surface down: unregister, then free. Safe to call twice.
    fn destroy_surface(&mut self);
}
