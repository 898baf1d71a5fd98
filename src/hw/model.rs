use serde::Serialize;

use crate::protocol::PrefixRule;

/// A peripheral seen during discovery.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct FoundDevice {
    device_id: String,
    local_name: Option<String>,
    rssi: Option<i16>,
}

impl FoundDevice {
    /// Creates a new discovered-device record.
    #[must_use]
    pub fn new(device_id: String, local_name: Option<String>, rssi: Option<i16>) -> Self {
        Self {
            device_id,
            local_name,
            rssi,
        }
    }

    /// Returns the backend-specific device identifier.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns the advertised local name, if present.
    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Returns the latest observed RSSI value, if present.
    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    /// Returns whether the advertised name satisfies `rule`.
    pub(crate) fn name_matches(&self, rule: &PrefixRule) -> bool {
        self.local_name
            .as_deref()
            .is_some_and(|name| rule.matches(name))
    }

    /// Folds a later sighting of the same device into this record.
    pub(crate) fn refresh(&mut self, later: FoundDevice) {
        if later.local_name.is_some() {
            self.local_name = later.local_name;
        }
        if later.rssi.is_some() {
            self.rssi = later.rssi;
        }
    }
}

/// A characteristic description discovered on a connected peripheral.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CharacteristicInfo {
    uuid: String,
    properties: Vec<String>,
}

impl CharacteristicInfo {
    /// Creates a characteristic description.
    #[must_use]
    pub fn new(uuid: impl Into<String>, properties: Vec<String>) -> Self {
        Self {
            uuid: uuid.into(),
            properties,
        }
    }

    /// Returns the characteristic UUID.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Returns property labels for this characteristic.
    #[must_use]
    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    pub(crate) fn has_property(&self, label: &str) -> bool {
        self.properties.iter().any(|property| property == label)
    }
}

/// A GATT service and its characteristics.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ServiceInfo {
    uuid: String,
    primary: bool,
    characteristics: Vec<CharacteristicInfo>,
}

impl ServiceInfo {
    /// Creates a service description.
    #[must_use]
    pub fn new(
        uuid: impl Into<String>,
        primary: bool,
        characteristics: Vec<CharacteristicInfo>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            primary,
            characteristics,
        }
    }

    /// Returns the service UUID.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Returns whether this is a primary service.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    /// Returns all characteristics in this service.
    #[must_use]
    pub fn characteristics(&self) -> &[CharacteristicInfo] {
        &self.characteristics
    }

    pub(crate) fn into_characteristics(self) -> Vec<CharacteristicInfo> {
        self.characteristics
    }
}

/// The service/characteristic pair selected for one connection.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct LinkEndpoint {
    device_id: String,
    service_uuid: String,
    characteristic_uuid: String,
}

impl LinkEndpoint {
    #[must_use]
    pub fn new(
        device_id: impl Into<String>,
        service_uuid: impl Into<String>,
        characteristic_uuid: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            service_uuid: service_uuid.into(),
            characteristic_uuid: characteristic_uuid.into(),
        }
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    #[must_use]
    pub fn service_uuid(&self) -> &str {
        &self.service_uuid
    }

    #[must_use]
    pub fn characteristic_uuid(&self) -> &str {
        &self.characteristic_uuid
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Some("CM-2600d"), true)]
    #[case(Some("Speaker"), false)]
    #[case(None, false)]
    fn name_matches_requires_advertised_name(#[case] name: Option<&str>, #[case] expected: bool) {
        let device = FoundDevice::new("AA".into(), name.map(String::from), None);
        assert_eq!(expected, device.name_matches(&PrefixRule::exact("CM")));
    }

    #[test]
    fn refresh_keeps_known_fields_when_later_sighting_omits_them() {
        let mut device = FoundDevice::new("AA".into(), Some("CM-1".into()), Some(-60));
        device.refresh(FoundDevice::new("AA".into(), None, Some(-40)));
        assert_eq!(Some("CM-1"), device.local_name());
        assert_eq!(Some(-40), device.rssi());
    }
}
