//! Device and viewport snapshot merged into every event.

use crate::models::{DeviceProfile, EventParams};
use crate::tracker::error::TrackerError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// Coarse device class derived from the viewport width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceClass {
    /// Mobile below 768px, tablet below 1024px, desktop otherwise.
    pub fn from_viewport_width(width: u32) -> Self {
        match width {
            0..=767 => DeviceClass::Mobile,
            768..=1023 => DeviceClass::Tablet,
            _ => DeviceClass::Desktop,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::Mobile => write!(f, "mobile"),
            DeviceClass::Tablet => write!(f, "tablet"),
            DeviceClass::Desktop => write!(f, "desktop"),
        }
    }
}

/// Device attributes captured once when the tracker is installed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub class: DeviceClass,
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub screen_width: u32,
    pub screen_height: u32,
    pub pixel_ratio: f64,
    pub language: String,
    pub platform: String,
    pub connection: Option<String>,
    pub touch: bool,
}

impl DeviceInfo {
    /// Snapshot the host's device profile.
    pub fn capture(profile: &DeviceProfile) -> Result<Self, TrackerError> {
        if profile.viewport_width == 0 || profile.viewport_height == 0 {
            return Err(TrackerError::InvalidViewport {
                width: profile.viewport_width,
                height: profile.viewport_height,
            });
        }

        let pixel_ratio = if profile.device_pixel_ratio.is_finite() && profile.device_pixel_ratio > 0.0
        {
            profile.device_pixel_ratio
        } else {
            1.0
        };

        Ok(Self {
            class: DeviceClass::from_viewport_width(profile.viewport_width),
            user_agent: profile.user_agent.clone(),
            viewport_width: profile.viewport_width,
            viewport_height: profile.viewport_height,
            screen_width: profile.screen_width,
            screen_height: profile.screen_height,
            pixel_ratio,
            language: profile.language.clone(),
            platform: profile.platform.clone(),
            connection: profile.connection.clone(),
            touch: profile.touch,
        })
    }

    /// Flatten into event parameters.
    pub fn to_params(&self) -> EventParams {
        let mut params = EventParams::new();
        params.insert("device_type".to_string(), json!(self.class.to_string()));
        params.insert(
            "viewport".to_string(),
            json!(format!("{}x{}", self.viewport_width, self.viewport_height)),
        );
        params.insert(
            "screen".to_string(),
            json!(format!("{}x{}", self.screen_width, self.screen_height)),
        );
        params.insert("pixel_ratio".to_string(), json!(self.pixel_ratio));
        params.insert("language".to_string(), json!(self.language));
        if !self.platform.is_empty() {
            params.insert("platform".to_string(), json!(self.platform));
        }
        if let Some(ref connection) = self.connection {
            params.insert("connection".to_string(), json!(connection));
        }
        params.insert("touch".to_string(), json!(self.touch));
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_class_boundaries() {
        assert_eq!(DeviceClass::from_viewport_width(375), DeviceClass::Mobile);
        assert_eq!(DeviceClass::from_viewport_width(767), DeviceClass::Mobile);
        assert_eq!(DeviceClass::from_viewport_width(768), DeviceClass::Tablet);
        assert_eq!(DeviceClass::from_viewport_width(1023), DeviceClass::Tablet);
        assert_eq!(DeviceClass::from_viewport_width(1024), DeviceClass::Desktop);
    }

    #[test]
    fn test_capture_rejects_empty_viewport() {
        let profile = DeviceProfile {
            viewport_width: 0,
            ..DeviceProfile::default()
        };
        assert!(matches!(
            DeviceInfo::capture(&profile),
            Err(TrackerError::InvalidViewport { width: 0, .. })
        ));
    }

    #[test]
    fn test_params_include_connection_only_when_known() {
        let mut profile = DeviceProfile::default();
        let params = DeviceInfo::capture(&profile).unwrap().to_params();
        assert_eq!(params["device_type"], "desktop");
        assert_eq!(params["viewport"], "1280x720");
        assert!(!params.contains_key("connection"));

        profile.connection = Some("4g".to_string());
        profile.device_pixel_ratio = f64::NAN;
        let device = DeviceInfo::capture(&profile).unwrap();
        assert_eq!(device.pixel_ratio, 1.0);
        assert_eq!(device.to_params()["connection"], "4g");
    }
}
