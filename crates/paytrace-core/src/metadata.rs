//! Device metadata capability
//!
//! The engine never talks to the platform directly. Whatever collects
//! manufacturer, OS version, network type, battery or memory figures sits
//! behind [`DeviceMetadataFacade`] and hands back a flat attribute map.

use paytrace_span::Attributes;

/// Source of device metadata snapshots
///
/// `collect` is called at every `begin` and every `end`, so it should be
/// cheap. An empty map is a valid answer.
pub trait DeviceMetadataFacade: Send + Sync {
    fn collect(&self) -> Attributes;
}

/// Facade that never reports anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDeviceMetadata;

impl DeviceMetadataFacade for NoDeviceMetadata {
    fn collect(&self) -> Attributes {
        Attributes::new()
    }
}

/// Facade that always reports the same snapshot
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceMetadata {
    attributes: Attributes,
}

impl StaticDeviceMetadata {
    pub fn new(attributes: Attributes) -> Self {
        Self { attributes }
    }

    /// Add a fixed attribute
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Snapshot describing the host process (OS family, architecture)
    pub fn host() -> Self {
        Self::default()
            .with("device.os", std::env::consts::OS)
            .with("device.arch", std::env::consts::ARCH)
    }
}

impl DeviceMetadataFacade for StaticDeviceMetadata {
    fn collect(&self) -> Attributes {
        self.attributes.clone()
    }
}

impl<F> DeviceMetadataFacade for F
where
    F: Fn() -> Attributes + Send + Sync,
{
    fn collect(&self) -> Attributes {
        self()
    }
}
