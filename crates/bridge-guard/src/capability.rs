use crate::error::AccessError;

/// A configuration-time switch in front of a dangerous operation class.
#[derive(Debug, Clone)]
pub struct CapabilityGate {
    switch: String,
    enabled: bool,
}

impl CapabilityGate {
    /// `switch` names the setting that enables the capability and shows up
    /// in the refusal message.
    pub fn new(switch: impl Into<String>, enabled: bool) -> Self {
        Self {
            switch: switch.into(),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn check(&self) -> Result<(), AccessError> {
        if self.enabled {
            Ok(())
        } else {
            Err(AccessError::CapabilityDisabled(self.switch.clone()))
        }
    }
}

/// `1`, `true`, `yes` and `on` enable; anything else, absence included,
/// leaves the capability off.
pub fn parse_flag(raw: Option<&str>) -> bool {
    raw.map(|value| value.trim().to_ascii_lowercase())
        .is_some_and(|value| matches!(value.as_str(), "1" | "true" | "yes" | "on"))
}
