//! Headless backend for testing without hardware.
//!
//! Provides an in-memory surface plus scripted contention so the
//! arbitration state machine and the presentation controller can be
//! exercised deterministically: tests flip `control_available` to stand in
//! for the peer process taking and releasing DRM master, and read the
//! operation counters for assertions.

use std::io;

use super::{BackendError, DisplayBackend, OutputInfo, SurfaceInfo};
use crate::render::FrameBuf;

pub struct HeadlessBackend {
    width: u32,
    height: u32,
    frame: Vec<u8>,
    surface: Option<SurfaceInfo>,
    /// Scripted peer state: when false, acquisition fails like EPERM from
    /// the kernel while the peer is master.
    pub control_available: bool,
    /// When true, commits fail even with control held.
    pub fail_commit: bool,
    holding: bool,
    /// Counters for test assertions.
    pub acquire_attempts: usize,
    pub acquire_failures: usize,
    pub commits: usize,
    pub releases: usize,
    pub destroys: usize,
}

impl HeadlessBackend {
    pub fn new(width: u32, height: u32) -> Self {
        HeadlessBackend {
            width,
            height,
            frame: Vec::new(),
            surface: None,
            control_available: true,
            fail_commit: false,
            holding: false,
            acquire_attempts: 0,
            acquire_failures: 0,
            commits: 0,
            releases: 0,
            destroys: 0,
        }
    }

    /// Whether this backend currently holds exclusive control. Must be
    /// false after every arbitration attempt.
    pub fn holding_control(&self) -> bool {
        self.holding
    }

    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    /// XRGB bytes of pixel (x, y): `[b, g, r, x]`.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let o = ((y * self.width + x) * 4) as usize;
        [
            self.frame[o],
            self.frame[o + 1],
            self.frame[o + 2],
            self.frame[o + 3],
        ]
    }
}

fn denied() -> BackendError {
    BackendError::ControlUnavailable(io::Error::from(io::ErrorKind::PermissionDenied))
}

impl DisplayBackend for HeadlessBackend {
    fn select_output(
        &mut self,
        _preferred: Option<(u32, u32)>,
    ) -> Result<OutputInfo, BackendError> {
        Ok(OutputInfo {
            connector_id: 1,
            crtc_id: 1,
            width: self.width,
            height: self.height,
            refresh_hz: 60,
        })
    }

    fn create_surface(&mut self) -> Result<SurfaceInfo, BackendError> {
        let stride = self.width * 4;
        let size = stride as u64 * self.height as u64;
        self.frame = vec![0; size as usize];
        let info = SurfaceInfo {
            width: self.width,
            height: self.height,
            stride,
            size,
        };
        self.surface = Some(info);
        Ok(info)
    }

    fn with_frame(&mut self, f: &mut dyn FnMut(FrameBuf<'_>)) -> Result<(), BackendError> {
        let info = self.surface.ok_or(BackendError::NoSurface)?;
        f(FrameBuf {
            pixels: &mut self.frame,
            width: info.width,
            height: info.height,
            stride: info.stride,
        });
        Ok(())
    }

    fn acquire_control(&mut self) -> Result<(), BackendError> {
        self.acquire_attempts += 1;
        if self.control_available {
            self.holding = true;
            Ok(())
        } else {
            self.acquire_failures += 1;
            Err(denied())
        }
    }

    fn commit(&mut self) -> Result<(), BackendError> {
        if self.surface.is_none() {
            return Err(BackendError::NoSurface);
        }
        if !self.holding || self.fail_commit {
            return Err(BackendError::CommitFailed(io::Error::from(
                io::ErrorKind::PermissionDenied,
            )));
        }
        self.commits += 1;
        Ok(())
    }

    fn release_control(&mut self) {
        if self.holding {
            self.holding = false;
            self.releases += 1;
        }
    }

    fn destroy_surface(&mut self) {
        if self.surface.take().is_some() {
            self.frame.clear();
            self.destroys += 1;
        }
    }
}
