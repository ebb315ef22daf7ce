//! Domain types shared by the loader stages

use serde::{Deserialize, Serialize};

use crate::error::AppInstallError;

/// Device type of an install record. Each device type is one store partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Apple advertising identifier
    Idfa,
    /// Google advertising identifier
    Gaid,
    /// Android device id
    Adid,
    /// Generic device id
    Dvid,
}

impl DeviceType {
    /// Every device type the loader knows how to route
    pub const ALL: [DeviceType; 4] = [
        DeviceType::Idfa,
        DeviceType::Gaid,
        DeviceType::Adid,
        DeviceType::Dvid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Idfa => "idfa",
            DeviceType::Gaid => "gaid",
            DeviceType::Adid => "adid",
            DeviceType::Dvid => "dvid",
        }
    }
}

impl std::str::FromStr for DeviceType {
    type Err = AppInstallError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "idfa" => Ok(DeviceType::Idfa),
            "gaid" => Ok(DeviceType::Gaid),
            "adid" => Ok(DeviceType::Adid),
            "dvid" => Ok(DeviceType::Dvid),
            other => Err(AppInstallError::UnknownDeviceType(other.to_string())),
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed and validated line of the installs log.
///
/// `device_type` stays a plain string: a record with a device type outside
/// [`DeviceType::ALL`] is still a well-formed record, it just cannot be routed.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallRecord {
    pub device_type: String,
    pub device_id: String,
    pub lat: f64,
    pub lon: f64,
    pub apps: Vec<u32>,
}

impl InstallRecord {
    /// Store key, `"<device_type>:<device_id>"`
    pub fn key(&self) -> String {
        format!("{}:{}", self.device_type, self.device_id)
    }

    /// Payload written as the store value
    pub fn user_apps(&self) -> UserApps {
        UserApps {
            lat: self.lat,
            lon: self.lon,
            apps: self.apps.clone(),
        }
    }
}

/// Binary payload stored under a record's key.
///
/// Field order is part of the wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserApps {
    pub lat: f64,
    pub lon: f64,
    pub apps: Vec<u32>,
}

/// Key/value pair ready to be written to a partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreItem {
    pub key: String,
    pub value: Vec<u8>,
}
