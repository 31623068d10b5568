//! [`KmsDevice`] on a real DRM card node.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};

use drm::control::{
    connector, crtc, framebuffer, Device as ControlDevice, Event, Mode, ModeTypeFlags, PageFlipFlags,
};

use crate::device::{CrtcState, FramebufferDescriptor, KmsDevice, PageFlipCompletion, ScanoutMode};
use crate::error::BackendError;

impl ScanoutMode for Mode {
    fn size(&self) -> (u16, u16) {
        Mode::size(self)
    }

    fn vrefresh(&self) -> u32 {
        Mode::vrefresh(self)
    }

    fn is_preferred(&self) -> bool {
        self.mode_type().contains(ModeTypeFlags::PREFERRED)
    }
}

/// An open DRM card node such as `/dev/dri/card0`.
///
/// The fd is blocking: [`KmsDevice::page_flip_events`] must only be called
/// once the fd is readable, which is what the event-loop source does.
#[derive(Debug)]
pub struct DrmCard {
    file: File,
    path: PathBuf,
}

impl DrmCard {
    /// Opens `path` read/write and tries to become DRM master.
    ///
    /// Not being master is only logged; mode-setting calls will fail later
    /// with `EACCES` if another client holds it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| BackendError::Open { path: path.clone(), source })?;
        let card = Self { file, path };

        match drm::Device::acquire_master_lock(&card) {
            Ok(()) => tracing::info!(path = %card.path.display(), "Opened DRM device as master"),
            Err(err) => tracing::warn!(
                path = %card.path.display(),
                "Could not become DRM master, mode setting may fail: {}",
                err
            ),
        }
        Ok(card)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsFd for DrmCard {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl drm::Device for DrmCard {}
impl ControlDevice for DrmCard {}

impl KmsDevice for DrmCard {
    type Mode = Mode;

    fn crtc_state(&self, crtc: crtc::Handle) -> io::Result<CrtcState<Mode>> {
        let info = self.get_crtc(crtc)?;
        Ok(CrtcState {
            crtc: info.handle(),
            framebuffer: info.framebuffer(),
            position: info.position(),
            mode: info.mode(),
        })
    }

    fn set_crtc(
        &self,
        crtc: crtc::Handle,
        framebuffer: Option<framebuffer::Handle>,
        origin: (u32, u32),
        connectors: &[connector::Handle],
        mode: Option<Mode>,
    ) -> io::Result<()> {
        ControlDevice::set_crtc(self, crtc, framebuffer, origin, connectors, mode)
    }

    fn page_flip(&self, crtc: crtc::Handle, framebuffer: framebuffer::Handle) -> io::Result<()> {
        ControlDevice::page_flip(self, crtc, framebuffer, PageFlipFlags::EVENT, None)
    }

    fn add_framebuffer(&self, descriptor: &FramebufferDescriptor) -> io::Result<framebuffer::Handle> {
        ControlDevice::add_framebuffer(self, descriptor, descriptor.depth, descriptor.bpp)
    }

    fn remove_framebuffer(&self, framebuffer: framebuffer::Handle) -> io::Result<()> {
        self.destroy_framebuffer(framebuffer)
    }

    fn page_flip_events(&self) -> io::Result<Vec<PageFlipCompletion>> {
        let completions = self
            .receive_events()?
            .filter_map(|event| match event {
                Event::PageFlip(flip) => Some(PageFlipCompletion {
                    crtc: flip.crtc,
                    frame: flip.frame,
                    time: flip.duration,
                }),
                _ => None,
            })
            .collect();
        Ok(completions)
    }
}
