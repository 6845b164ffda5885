//! Known devices and the acceleration structure format each one uses.
//!
//! The internal builder cannot ask hardware which format it traverses, so it
//! derives the format from the PCI device id. Devices not on the list are
//! refused instead of guessed.

use crate::api::{RtasDeviceProperties, RtasFormat, RTAS_BUFFER_ALIGNMENT};
use crate::util::{Error, Result};

/// PCI vendor id of the only vendor with RTAS hardware.
pub const INTEL_VENDOR_ID: u32 = 0x8086;

/// Environment variable that disables the device id check when set to `1`.
pub const DISABLE_DEVICE_ID_CHECK_ENV: &str = "EMBREE_DISABLE_DEVICEID_CHECK";

/// Device generations with ray tracing hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFamily {
    /// Alchemist discrete GPUs.
    Dg2,
    /// Battlemage discrete GPUs.
    Bmg,
    /// Ponte Vecchio data center GPUs.
    Pvc,
    /// Meteor Lake integrated GPUs.
    Mtl,
    /// Lunar Lake integrated GPUs.
    Lnl,
    /// Panther Lake integrated GPUs.
    Ptl,
}

impl DeviceFamily {
    pub fn from_device_id(id: u32) -> Option<Self> {
        let family = match id {
            0x4F80..=0x4F88 | 0x5690..=0x5698 | 0x56A0..=0x56A6 | 0x56B0..=0x56B3 | 0x56C0..=0x56C1 => {
                Self::Dg2
            }
            0xE202 | 0xE20B | 0xE20C | 0xE20D | 0xE210 | 0xE212 | 0xE216 => Self::Bmg,
            0x0BD5..=0x0BDB | 0x0B69 | 0x0B6E | 0x0BD4 => Self::Pvc,
            0x7D40 | 0x7D55 | 0x7DD5 | 0x7D45 | 0x7D60 => Self::Mtl,
            0x64A0 | 0x6420 => Self::Lnl,
            0xB080 | 0xB081 | 0xB082 | 0xB083 | 0xB08F | 0xB090 | 0xB0A0 | 0xB0B0 => Self::Ptl,
            _ => return None,
        };
        Some(family)
    }

    pub fn rtas_format(self) -> RtasFormat {
        match self {
            Self::Ptl => RtasFormat::V2,
            _ => RtasFormat::V1,
        }
    }
}

/// RTAS properties of a device, from its ids.
///
/// Non-Intel vendors are always refused. With `disable_check` set, any Intel
/// device reports format V1.
pub fn rtas_device_properties_for(
    vendor_id: u32,
    device_id: u32,
    disable_check: bool,
) -> Result<RtasDeviceProperties> {
    let unsupported = Error::UnsupportedDevice { vendor_id, device_id };
    if vendor_id != INTEL_VENDOR_ID {
        return Err(unsupported);
    }

    let format = if disable_check {
        RtasFormat::V1
    } else {
        DeviceFamily::from_device_id(device_id)
            .ok_or(unsupported)?
            .rtas_format()
    };

    Ok(RtasDeviceProperties {
        format,
        buffer_alignment: RTAS_BUFFER_ALIGNMENT,
    })
}
