use rusqlite::types::Value;
use std::fmt;

/// Snapshot of one `test_environments` row as read inside a page transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyEnvironment {
    pub id: i64,
    pub organization_id: i64,
    pub name: String,
    /// Timestamps are carried as stored, whatever their type or format.
    pub created_at: Value,
    pub updated_at: Value,
    pub deleted_at: Value,
    pub platform: Option<String>,
    pub platform_type: Option<String>,
    pub udid: Option<String>,
    pub brand: Option<String>,
    pub os_name: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub resolution: Option<String>,
    pub device: Option<String>,
    pub url: Option<String>,
    pub metadata: Option<String>,
    pub is_kane_supported: bool,
    pub is_default: bool,
    pub is_custom: bool,
    pub is_complete: bool,
    pub private_cloud: bool,
    pub configuration_id: Option<i64>,
}

impl LegacyEnvironment {
    /// A bare record with every optional column empty and every flag off.
    pub fn new(id: i64, organization_id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            organization_id,
            name: name.into(),
            created_at: Value::Null,
            updated_at: Value::Null,
            deleted_at: Value::Null,
            platform: None,
            platform_type: None,
            udid: None,
            brand: None,
            os_name: None,
            os: None,
            os_version: None,
            browser: None,
            browser_version: None,
            resolution: None,
            device: None,
            url: None,
            metadata: None,
            is_kane_supported: false,
            is_default: false,
            is_custom: false,
            is_complete: false,
            private_cloud: false,
            configuration_id: None,
        }
    }

    pub fn is_migrated(&self) -> bool {
        self.configuration_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Platform {
    RealDeviceMobile,
    Desktop,
    Mobile,
    #[default]
    Custom,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::RealDeviceMobile,
        Platform::Desktop,
        Platform::Mobile,
        Platform::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::RealDeviceMobile => "real-device-mobile",
            Platform::Desktop => "Desktop",
            Platform::Mobile => "Mobile",
            Platform::Custom => "custom",
        }
    }

    /// Exact, case-sensitive match against the stored labels.
    pub fn from_label(label: &str) -> Option<Platform> {
        Platform::ALL.into_iter().find(|p| p.as_str() == label)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `configurations` row. Shares its `id` with the legacy row it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub id: i64,
    pub organization_id: i64,
    pub name: String,
    pub platform: Platform,
    pub is_kane_supported: bool,
    pub is_manual_supported: bool,
    pub is_default: bool,
    pub is_custom: bool,
    pub is_complete: bool,
    pub created_by: i64,
    pub updated_by: i64,
    pub created_at: Value,
    pub updated_at: Value,
    pub deleted_at: Value,
}
