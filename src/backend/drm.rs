//! Real KMS backend: dumb-buffer surface on a DRM card node.
//!
//! The daemon keeps one persistent dumb framebuffer sized to the chosen
//! mode. Blits go through a short-lived CPU mapping of that buffer; the
//! kernel scans the buffer itself out, so updated pixels become visible
//! without a recommit once the framebuffer is bound to the CRTC.
//!
//! Master arbitration: `acquire_control`/`release_control` wrap the DRM
//! master lock. The lock is kernel-enforced and singly-owned, so
//! acquisition fails with EPERM/EACCES while the peer front-end holds it.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, BorrowedFd};
use std::path::Path;

use drm::buffer::{Buffer, DrmFourcc};
use drm::control::dumbbuffer::DumbBuffer;
use drm::control::{connector, crtc, encoder, framebuffer, Device as ControlDevice, Mode};
use drm::Device;
use tracing::{debug, info, warn};

use super::{BackendError, DisplayBackend, OutputInfo, SurfaceInfo};
use crate::render::FrameBuf;

/// Minimal DRM device wrapper; the drm crate works through these traits.
struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl Device for Card {}
impl ControlDevice for Card {}

struct SelectedOutput {
    connector: connector::Handle,
    crtc: crtc::Handle,
    mode: Mode,
}

struct DrmSurface {
    buffer: DumbBuffer,
    fb: framebuffer::Handle,
    info: SurfaceInfo,
}

pub struct DrmBackend {
    card: Card,
    output: Option<SelectedOutput>,
    surface: Option<DrmSurface>,
}

impl DrmBackend {
    /// Open the DRM device node. Fatal at startup if this fails.
    pub fn open(path: &Path) -> Result<Self, BackendError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        info!(path = %path.display(), "opened DRM device");
        Ok(DrmBackend {
            card: Card(file),
            output: None,
            surface: None,
        })
    }

    /// Resolve the controlling CRTC: the connector's existing encoder if
    /// present, else the first CRTC the device advertises.
    fn crtc_for(
        &self,
        current_encoder: Option<encoder::Handle>,
        crtcs: &[crtc::Handle],
    ) -> Option<crtc::Handle> {
        if let Some(enc) = current_encoder {
            if let Ok(info) = self.card.get_encoder(enc) {
                if let Some(crtc) = info.crtc() {
                    return Some(crtc);
                }
            }
        }
        crtcs.first().copied()
    }
}

impl DisplayBackend for DrmBackend {
    fn select_output(
        &mut self,
        preferred: Option<(u32, u32)>,
    ) -> Result<OutputInfo, BackendError> {
        let res = self.card.resource_handles()?;

        // First connected connector advertising the preferred mode wins;
        // otherwise the first connected connector's first mode.
        let mut fallback: Option<(connector::Handle, Option<encoder::Handle>, Mode)> = None;
        let mut chosen: Option<(connector::Handle, Option<encoder::Handle>, Mode)> = None;

        for &handle in res.connectors() {
            let Ok(conn) = self.card.get_connector(handle, false) else {
                continue;
            };
            if conn.state() != connector::State::Connected {
                continue;
            }
            let modes = conn.modes();
            if modes.is_empty() {
                continue;
            }
            if let Some((pw, ph)) = preferred {
                if let Some(mode) = modes
                    .iter()
                    .find(|m| u32::from(m.size().0) == pw && u32::from(m.size().1) == ph)
                {
                    chosen = Some((handle, conn.current_encoder(), *mode));
                    break;
                }
            }
            if fallback.is_none() {
                fallback = Some((handle, conn.current_encoder(), modes[0]));
            }
        }

        let (connector, current_encoder, mode) = chosen
            .or(fallback)
            .ok_or(BackendError::NoConnectedOutput)?;
        let crtc = self
            .crtc_for(current_encoder, res.crtcs())
            .ok_or(BackendError::NoConnectedOutput)?;

        let (w, h) = mode.size();
        info!(
            connector = u32::from(connector),
            crtc = u32::from(crtc),
            width = w,
            height = h,
            refresh = mode.vrefresh(),
            "selected output"
        );

        self.output = Some(SelectedOutput {
            connector,
            crtc,
            mode,
        });
        Ok(OutputInfo {
            connector_id: connector.into(),
            crtc_id: crtc.into(),
            width: w.into(),
            height: h.into(),
            refresh_hz: mode.vrefresh(),
        })
    }

    fn create_surface(&mut self) -> Result<SurfaceInfo, BackendError> {
        let output = self.output.as_ref().ok_or(BackendError::NoOutput)?;
        let (w, h) = output.mode.size();

        let buffer = self
            .card
            .create_dumb_buffer((w.into(), h.into()), DrmFourcc::Xrgb8888, 32)
            .map_err(BackendError::AllocFailed)?;

        // Register with the allocation's pitch; on failure the buffer must
        // not leak.
        let fb = match self.card.add_framebuffer(&buffer, 24, 32) {
            Ok(fb) => fb,
            Err(e) => {
                if let Err(e2) = self.card.destroy_dumb_buffer(buffer) {
                    warn!("failed to free dumb buffer after registration error: {e2}");
                }
                return Err(BackendError::RegisterFailed(e));
            }
        };

        let pitch = buffer.pitch();
        let info = SurfaceInfo {
            width: w.into(),
            height: h.into(),
            stride: pitch,
            size: pitch as u64 * u64::from(h),
        };
        debug!(
            fb = u32::from(fb),
            stride = info.stride,
            size = info.size,
            "created presentation surface"
        );

        self.surface = Some(DrmSurface { buffer, fb, info });
        Ok(info)
    }

    fn with_frame(&mut self, f: &mut dyn FnMut(FrameBuf<'_>)) -> Result<(), BackendError> {
        let surface = self.surface.as_mut().ok_or(BackendError::NoSurface)?;
        let mut mapping = self
            .card
            .map_dumb_buffer(&mut surface.buffer)
            .map_err(BackendError::MapFailed)?;
        f(FrameBuf {
            pixels: mapping.as_mut(),
            width: surface.info.width,
            height: surface.info.height,
            stride: surface.info.stride,
        });
        Ok(())
    }

    fn acquire_control(&mut self) -> Result<(), BackendError> {
        self.card
            .acquire_master_lock()
            .map_err(BackendError::ControlUnavailable)
    }

    fn commit(&mut self) -> Result<(), BackendError> {
        let output = self.output.as_ref().ok_or(BackendError::NoOutput)?;
        let surface = self.surface.as_ref().ok_or(BackendError::NoSurface)?;
        self.card
            .set_crtc(
                output.crtc,
                Some(surface.fb),
                (0, 0),
                &[output.connector],
                Some(output.mode),
            )
            .map_err(BackendError::CommitFailed)
    }

    fn release_control(&mut self) {
        if let Err(e) = self.card.release_master_lock() {
            debug!("dropping DRM master failed: {e}");
        }
    }

    fn destroy_surface(&mut self) {
        let Some(surface) = self.surface.take() else {
            return;
        };
        if let Err(e) = self.card.destroy_framebuffer(surface.fb) {
            warn!("failed to remove framebuffer: {e}");
        }
        if let Err(e) = self.card.destroy_dumb_buffer(surface.buffer) {
            warn!("failed to destroy dumb buffer: {e}");
        }
        debug!("presentation surface destroyed");
    }
}

impl Drop for DrmBackend {
    fn drop(&mut self) {
        self.destroy_surface();
        self.release_control();
    }
}
