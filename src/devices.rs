//! Capture endpoint enumeration.
//!
//! [`list_capture_devices`] takes a snapshot of the endpoints the OS reports
//! at call time. It is not a live view: re-enumerate to observe hot-plug
//! changes. Endpoint ids are stable within one snapshot and feed straight
//! into `CaptureSession::open`.

use std::collections::HashMap;

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

use crate::capture::CaptureError;

// ---------------------------------------------------------------------------
// CaptureDevice
// ---------------------------------------------------------------------------

/// One audio capture endpoint known to the OS at enumeration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureDevice {
    /// Opaque endpoint identifier, unique within a snapshot.
    pub id: String,
    /// Human-readable label as reported by the OS.
    pub name: String,
    /// True for the endpoint the OS reports as its default input.
    pub is_default: bool,
}

// ---------------------------------------------------------------------------
// Enumeration
// ---------------------------------------------------------------------------

/// Enumerate the capture endpoints currently available.
///
/// Returns an empty list (not an error) when no devices are present. Devices
/// whose name the backend cannot read are skipped with a warning.
///
/// # Errors
///
/// [`CaptureError::Enumeration`] when the host backend refuses the query
/// outright.
///
/// # Example
///
/// ```rust,no_run
/// # fn main() -> Result<(), audio_intake::CaptureError> {
/// for device in audio_intake::list_capture_devices()? {
///     let marker = if device.is_default { " (default)" } else { "" };
///     println!("{}{marker}", device.id);
/// }
/// # Ok(())
/// # }
/// ```
pub fn list_capture_devices() -> Result<Vec<CaptureDevice>, CaptureError> {
    let (_, listing) = snapshot()?;
    log::debug!("enumerated {} capture device(s)", listing.len());
    Ok(listing)
}

/// Resolve an endpoint id from a previous snapshot to a live device.
///
/// Ids are positional within a snapshot, so this re-enumerates with the same
/// id-assignment scheme and picks the matching entry.
pub(crate) fn find_device(endpoint_id: &str) -> Result<cpal::Device, CaptureError> {
    let (mut devices, listing) = snapshot()?;
    match listing.iter().position(|d| d.id == endpoint_id) {
        Some(index) => Ok(devices.swap_remove(index)),
        None => Err(CaptureError::DeviceUnavailable(endpoint_id.to_string())),
    }
}

/// Collect live devices and their listing in index lockstep.
fn snapshot() -> Result<(Vec<cpal::Device>, Vec<CaptureDevice>), CaptureError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    let mut names = Vec::new();
    let iter = host
        .input_devices()
        .map_err(|e| CaptureError::Enumeration(e.to_string()))?;
    for device in iter {
        match device.name() {
            Ok(name) => {
                devices.push(device);
                names.push(name);
            }
            Err(e) => log::warn!("skipping capture device with unreadable name: {e}"),
        }
    }

    let listing = assign_ids(names, default_name.as_deref());
    Ok((devices, listing))
}

/// Build the listing, disambiguating duplicate names with a positional
/// suffix so every id in a snapshot is unique. The default flag lands on the
/// first occurrence of the default device's name.
fn assign_ids(names: Vec<String>, default_name: Option<&str>) -> Vec<CaptureDevice> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    names
        .into_iter()
        .map(|name| {
            let occurrence = seen
                .entry(name.clone())
                .and_modify(|n| *n += 1)
                .or_insert(1);
            let id = if *occurrence == 1 {
                name.clone()
            } else {
                format!("{name}:{occurrence}")
            };
            let is_default = *occurrence == 1 && default_name == Some(name.as_str());
            CaptureDevice {
                id,
                name,
                is_default,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
