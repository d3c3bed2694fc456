//! Adapter identification by USB vendor/product ID.
//!
//! The same adapter enumerates under a different product ID depending on
//! whether its application firmware or its bootloader is running. A
//! [`DeviceFilters`] value lists every identity that counts as "the adapter";
//! it is built once and handed to the locator, never stored globally.

use crate::error::{Error, Result};

/// Which firmware an enumerated identity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceKind {
    /// ST-Link/V2-1 running its normal firmware.
    Normal,
    /// ST-Link/V2-1 bootloader.
    Bootloader,
}

impl DeviceKind {
    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Normal => "ST-Link/V2-1",
            Self::Bootloader => "ST-Link/V2-1 bootloader",
        }
    }
}

/// STMicroelectronics vendor ID.
pub const ST_VID: u16 = 0x0483;

/// Product ID of the adapter in normal mode.
pub const STLINK_V2_1_PID: u16 = 0x374B;

/// Product ID of the adapter in bootloader mode.
pub const STLINK_V2_1_BOOTLOADER_PID: u16 = 0x3748;

/// One USB identity that the locator accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceFilter {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
    /// Firmware this identity belongs to.
    pub kind: DeviceKind,
}

impl DeviceFilter {
    /// Check if this filter matches the given USB IDs.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// The set of identities that make up one physical adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceFilters {
    filters: Vec<DeviceFilter>,
}

impl Default for DeviceFilters {
    fn default() -> Self {
        Self::stlink_v2_1()
    }
}

impl DeviceFilters {
    /// Normal and bootloader identities of an ST-Link/V2-1.
    pub fn stlink_v2_1() -> Self {
        Self::new(vec![
            DeviceFilter {
                vid: ST_VID,
                pid: STLINK_V2_1_PID,
                kind: DeviceKind::Normal,
            },
            DeviceFilter {
                vid: ST_VID,
                pid: STLINK_V2_1_BOOTLOADER_PID,
                kind: DeviceKind::Bootloader,
            },
        ])
    }

    /// Build a filter set from explicit entries.
    pub fn new(filters: Vec<DeviceFilter>) -> Self {
        Self { filters }
    }

    /// Classify a VID/PID pair, or `None` if no filter matches.
    #[must_use]
    pub fn classify(&self, vid: u16, pid: u16) -> Option<DeviceKind> {
        self.filters
            .iter()
            .find(|f| f.matches(vid, pid))
            .map(|f| f.kind)
    }
}

/// Reduce a candidate list to its only element.
///
/// Zero or several candidates is [`Error::AmbiguousOrMissingDevice`]; the
/// candidates are dropped without being used.
pub fn select_single<T>(candidates: Vec<T>) -> Result<T> {
    let count = candidates.len();
    let mut iter = candidates.into_iter();
    match (iter.next(), iter.next()) {
        (Some(only), None) => Ok(only),
        _ => Err(Error::AmbiguousOrMissingDevice { count }),
    }
}
