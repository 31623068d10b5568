//! Choosing the connector, CRTC and mode a plane will drive.

use std::fmt;
use std::str::FromStr;

use drm::control::{connector, crtc, Device as ControlDevice, Mode, ResourceHandles};

use crate::config::OutputConfig;
use crate::device::ScanoutMode;
use crate::drm_device::DrmCard;
use crate::error::{BackendError, ConfigError};

/// A mode asked for by configuration, written `WIDTHxHEIGHT[@HZ]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeRequest {
    pub width: u16,
    pub height: u16,
    pub refresh: Option<u32>,
}

impl ModeRequest {
    /// Whether `mode` satisfies this request.
    pub fn matches<M: ScanoutMode>(&self, mode: &M) -> bool {
        mode.size() == (self.width, self.height)
            && self.refresh.map_or(true, |hz| mode.vrefresh() == hz)
    }
}

impl FromStr for ModeRequest {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::ValidationError(format!("Invalid mode '{s}': expected WIDTHxHEIGHT[@HZ]"));

        let (size, refresh) = match s.trim().split_once('@') {
            Some((size, hz)) => (size, Some(hz.trim().parse::<u32>().map_err(|_| invalid())?)),
            None => (s.trim(), None),
        };
        let (width, height) = size.split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u16 = width.trim().parse().map_err(|_| invalid())?;
        let height: u16 = height.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 || refresh == Some(0) {
            return Err(invalid());
        }
        Ok(Self { width, height, refresh })
    }
}

impl fmt::Display for ModeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)?;
        if let Some(hz) = self.refresh {
            write!(f, "@{hz}")?;
        }
        Ok(())
    }
}

/// Picks a mode from the list a connector advertises.
///
/// With a request, only a matching mode is accepted and `None` is returned
/// when nothing matches; the caller reports that as an error. Without a
/// request, the preferred mode wins, then the first listed.
pub fn choose_mode<M: ScanoutMode>(modes: &[M], request: Option<&ModeRequest>) -> Option<M> {
    match request {
        Some(request) => modes.iter().find(|mode| request.matches(*mode)).copied(),
        None => modes
            .iter()
            .find(|mode| mode.is_preferred())
            .or_else(|| modes.first())
            .copied(),
    }
}

/// Kernel name of a connector, such as `HDMI-A-1`.
pub fn connector_name(info: &connector::Info) -> String {
    format!("{}-{}", info.interface().as_str(), info.interface_id())
}

/// The output a plane should be built for.
#[derive(Debug, Clone)]
pub struct OutputSelection {
    pub connector: connector::Handle,
    pub connector_name: String,
    pub crtc: crtc::Handle,
    pub mode: Mode,
}

/// Finds a connected output on `card` matching `config`.
pub fn discover_output(card: &DrmCard, config: &OutputConfig) -> Result<OutputSelection, BackendError> {
    let resources = card.resource_handles()?;
    let connectors: Vec<connector::Info> = resources
        .connectors()
        .iter()
        .filter_map(|handle| match card.get_connector(*handle, false) {
            Ok(info) => Some(info),
            Err(err) => {
                tracing::warn!(connector = ?handle, "Failed to query connector: {}", err);
                None
            }
        })
        .collect();

    let connected = |info: &&connector::Info| info.state() == connector::State::Connected;
    let connector = match config.connector.as_deref() {
        Some(wanted) => connectors
            .iter()
            .filter(connected)
            .find(|info| connector_name(info) == wanted)
            .ok_or_else(|| BackendError::ConnectorNotFound(wanted.to_string()))?,
        None => connectors
            .iter()
            .find(connected)
            .ok_or(BackendError::NoConnectedOutput)?,
    };
    let name = connector_name(connector);

    let request = config
        .mode_request()
        .map_err(|err| BackendError::NoMatchingMode {
            connector: name.clone(),
            requested: err.to_string(),
        })?;
    let mode = choose_mode(connector.modes(), request.as_ref()).ok_or_else(|| BackendError::NoMatchingMode {
        connector: name.clone(),
        requested: request.map_or_else(|| "any mode".to_string(), |request| request.to_string()),
    })?;

    let crtc = pick_crtc(card, &resources, connector).ok_or_else(|| BackendError::NoCrtc(name.clone()))?;

    let (width, height) = mode.size();
    tracing::info!(
        connector = %name,
        ?crtc,
        width,
        height,
        refresh = mode.vrefresh(),
        "Selected output"
    );
    Ok(OutputSelection {
        connector: connector.handle(),
        connector_name: name,
        crtc,
        mode,
    })
}

/// The CRTC currently driving the connector, else the first one any of its
/// encoders can reach.
fn pick_crtc(card: &DrmCard, resources: &ResourceHandles, info: &connector::Info) -> Option<crtc::Handle> {
    let current = info
        .current_encoder()
        .and_then(|encoder| card.get_encoder(encoder).ok())
        .and_then(|encoder| encoder.crtc());
    if current.is_some() {
        return current;
    }

    info.encoders()
        .iter()
        .filter_map(|encoder| card.get_encoder(*encoder).ok())
        .flat_map(|encoder| resources.filter_crtcs(encoder.possible_crtcs()))
        .next()
}
