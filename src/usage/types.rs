//! Usage window types and normalization.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One usage window: how full it is and when it resets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageWindow {
    /// Utilization percentage, 0–100.
    pub utilization: f64,
    /// RFC 3339 reset timestamp, when the API reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<String>,
}

/// The fixed set of windows this server reports. Anything else the API
/// returns is dropped during normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubscriptionUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub five_hour: Option<UsageWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seven_day: Option<UsageWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seven_day_by_model: Option<UsageWindow>,
}

/// Normalize the raw window map from the usage API.
///
/// Unknown window keys and entries that do not carry a numeric utilization
/// are dropped; a completely foreign payload normalizes to an empty set.
pub fn normalize_windows(raw: &Value) -> SubscriptionUsage {
    let mut usage = SubscriptionUsage::default();
    let Some(map) = raw.as_object() else {
        return usage;
    };

    for (key, entry) in map {
        let Ok(window) = serde_json::from_value::<UsageWindow>(entry.clone()) else {
            continue;
        };
        match key.as_str() {
            "five_hour" => usage.five_hour = Some(window),
            "seven_day" => usage.seven_day = Some(window),
            "seven_day_by_model" => usage.seven_day_by_model = Some(window),
            _ => {}
        }
    }

    usage
}
