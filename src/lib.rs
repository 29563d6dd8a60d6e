//! marqueed: a marquee display daemon for arcade cabinets.
//!
//! Owns a secondary DRM output (the marquee screen) and presents per-title
//! artwork on it, driven by single-line commands on a FIFO. The main
//! screen belongs to an emulator front-end; when that front-end is one
//! that takes DRM master itself, the daemon arbitrates for transient
//! control of the display instead of assuming it owns the card.

pub mod arbiter;
pub mod backend;
pub mod command;
pub mod config;
pub mod control;
pub mod images;
pub mod policy;
pub mod render;
pub mod utils;

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::arbiter::{MasterArbiter, PresentOutcome};
use crate::backend::{DisplayBackend, OutputInfo, SurfaceInfo};
use crate::command::{Command, FrontendAffinity};
use crate::config::Config;
use crate::control::ControlChannel;
use crate::images::DecodedImage;
use crate::policy::ExclusionPolicy;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

pub fn request_shutdown() {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

extern "C" fn on_signal(_: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Install SIGINT/SIGTERM handlers that flag a shutdown.
///
/// Deliberately without SA_RESTART: a blocking FIFO open must come back
/// with EINTR so the main loop notices the flag.
pub fn install_signal_handlers() -> anyhow::Result<()> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        sigaction(Signal::SIGINT, &action).context("installing SIGINT handler")?;
        sigaction(Signal::SIGTERM, &action).context("installing SIGTERM handler")?;
    }
    Ok(())
}

/// The presentation controller: ties the control channel, the compositor
/// and the master arbiter together over one backend.
pub struct Marqueed<B: DisplayBackend> {
    config: Config,
    backend: B,
    arbiter: MasterArbiter,
    policy: ExclusionPolicy,
    affinity: FrontendAffinity,
    active_key: Option<String>,
    output: OutputInfo,
    surface: SurfaceInfo,
}

impl<B: DisplayBackend> Marqueed<B> {
    /// Select an output, size a surface to it, and start from a black
    /// frame. Fails when no usable output exists; everything after this
    /// point degrades instead of dying.
    pub fn new(config: Config, mut backend: B, affinity: FrontendAffinity) -> anyhow::Result<Self> {
        let output = backend
            .select_output(config.preferred_mode())
            .context("selecting display output")?;
        let surface = backend
            .create_surface()
            .context("creating presentation surface")?;
        backend.with_frame(&mut |mut frame| render::clear(&mut frame))?;

        info!(
            affinity = affinity.label(),
            width = output.width,
            height = output.height,
            "presentation controller ready"
        );
        Ok(Marqueed {
            arbiter: MasterArbiter::new(config.holdoff()),
            policy: ExclusionPolicy::new(config.ini_dir.clone()),
            config,
            backend,
            affinity,
            active_key: None,
            output,
            surface,
        })
    }

    pub fn affinity(&self) -> FrontendAffinity {
        self.affinity
    }

    pub fn active_key(&self) -> Option<&str> {
        self.active_key.as_deref()
    }

    /// Whether a holdoff window is pending (useful for status reporting).
    pub fn in_holdoff(&self) -> bool {
        self.arbiter.in_holdoff()
    }

    pub fn output(&self) -> OutputInfo {
        self.output
    }

    pub fn surface(&self) -> SurfaceInfo {
        self.surface
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Main loop: service the holdoff window, then wait for the next
    /// command. Runs until EXIT or a termination signal.
    pub fn run(&mut self, channel: &mut ControlChannel) -> anyhow::Result<()> {
        self.show_default()?;
        loop {
            if shutdown_requested() {
                info!("shutting down on signal");
                break;
            }
            if let Some(outcome) = self.arbiter.tick(&mut self.backend) {
                debug!(?outcome, "deferred commit retried");
            }
            // Only poll while a holdoff needs servicing; otherwise park in
            // a blocking open until a writer shows up.
            let blocking = !self.arbiter.in_holdoff();
            if let Some(cmd) = channel.next_command(blocking)? {
                if !self.handle_command(cmd)? {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Apply one command. Returns `false` when the daemon should exit.
    pub fn handle_command(&mut self, cmd: Command) -> anyhow::Result<bool> {
        match cmd {
            Command::Exit => {
                info!("exit requested");
                return Ok(false);
            }
            Command::Clear => self.show_default()?,
            Command::Reset => {
                let outcome = self.arbiter.force_present(&mut self.backend);
                info!(?outcome, "forced commit");
            }
            Command::SetAffinity(affinity) => {
                if affinity != self.affinity {
                    info!(
                        from = self.affinity.label(),
                        to = affinity.label(),
                        "front-end affinity changed"
                    );
                    self.affinity = affinity;
                }
                self.show_default()?;
            }
            Command::Show(key) => self.show_key(&key)?,
        }
        Ok(true)
    }

    /// Show the marquee for a content key, falling back to the affinity
    /// default when the image is missing or undecodable.
    pub fn show_key(&mut self, key: &str) -> anyhow::Result<()> {
        if self.policy.should_skip(key) {
            info!(key, "skipped by exclusion policy");
            return Ok(());
        }
        let path = self.config.marquee_path(key);
        match images::load(&path) {
            Ok(img) => {
                info!(key, "showing marquee");
                self.draw(&img)?;
                self.active_key = Some(key.to_string());
            }
            Err(e) => {
                warn!(key, "no marquee, falling back to default: {e:#}");
                self.show_default()?;
            }
        }
        Ok(())
    }

    /// Show the current affinity's default marquee; a black frame if even
    /// that is unavailable.
    pub fn show_default(&mut self) -> anyhow::Result<()> {
        self.active_key = None;
        let path = self.config.default_marquee_path(self.affinity);
        match images::load(&path) {
            Ok(img) => {
                info!(affinity = self.affinity.label(), "showing default marquee");
                self.draw(&img)?;
            }
            Err(e) => {
                warn!("default marquee unavailable: {e:#}");
                self.backend
                    .with_frame(&mut |mut frame| render::clear(&mut frame))?;
                self.present();
            }
        }
        Ok(())
    }

    fn draw(&mut self, img: &DecodedImage) -> anyhow::Result<()> {
        let placement = self.config.placement();
        let src = img.as_source();
        self.backend.with_frame(&mut |mut frame| {
            let (first, rows) = placement.clear_rows(frame.height);
            render::clear_rows(&mut frame, first, rows);
            render::blit(&mut frame, &src, placement);
        })?;
        self.present();
        Ok(())
    }

    fn present(&mut self) -> PresentOutcome {
        let outcome = self
            .arbiter
            .present(&mut self.backend, self.affinity.peer_expected());
        if outcome != PresentOutcome::Presented {
            debug!(?outcome, "surface not presented yet");
        }
        outcome
    }

    /// Tear the surface down. [`Drop`] on the backend covers the unclean
    /// paths; this one logs.
    pub fn shutdown(&mut self) {
        self.backend.destroy_surface();
        info!("marqueed stopped");
    }
}
