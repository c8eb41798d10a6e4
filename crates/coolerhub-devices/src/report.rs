//! Status report.

use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::DeviceStatus;

/// Snapshot of every known cooler, published on the status response topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub coolers: Vec<DeviceStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl StatusReport {
    pub fn new(coolers: Vec<DeviceStatus>) -> Self {
        Self {
            generated_at: Utc::now(),
            total: coolers.len(),
            coolers,
            correlation_id: None,
        }
    }

    pub fn with_correlation(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Keep only the given device, for per-device status queries.
    pub fn only(mut self, device_id: &str) -> Self {
        self.coolers.retain(|c| c.device_id == device_id);
        self.total = self.coolers.len();
        self
    }

    /// Human-readable rendering.
    pub fn to_text(&self) -> String {
        let mut out = String::from("=== WATER COOLER STATUS ===\n");
        if self.coolers.is_empty() {
            out.push_str("No coolers registered\n");
            return out;
        }

        for status in &self.coolers {
            let _ = writeln!(out, "\nCooler {}:", status.device_id);
            let _ = writeln!(
                out,
                "  • State: {}",
                if status.is_powered_on { "ON" } else { "OFF" }
            );
            let _ = writeln!(
                out,
                "  • Total litres dispensed: {:.2}L",
                status.total_liters_dispensed
            );
            for (measurement, value) in &status.last_readings {
                let _ = writeln!(out, "  • Last reading {}: {:.2}", measurement, value);
                if let Some(stats) = status.stats.get(measurement) {
                    let _ = writeln!(out, "    - Average: {:.2}", stats.average);
                    let _ = writeln!(out, "    - Min: {:.2}", stats.min);
                    let _ = writeln!(out, "    - Max: {:.2}", stats.max);
                    let _ = writeln!(
                        out,
                        "    - Stats updated: {}",
                        stats.observed_at.format("%H:%M:%S")
                    );
                }
            }
            let _ = writeln!(
                out,
                "  • Last update: {}",
                status.last_update_time.format("%Y-%m-%d %H:%M:%S")
            );
            out.push_str("---------------------------\n");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StatsSnapshot;
    use chrono::TimeZone;

    #[test]
    fn test_empty_report() {
        let report = StatusReport::new(Vec::new());
        assert_eq!(report.total, 0);
        assert!(report.to_text().contains("No coolers registered"));
    }

    #[test]
    fn test_text_rendering() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let mut status = DeviceStatus::new("c1");
        status.is_powered_on = false;
        status.total_liters_dispensed = 12.345;
        status.last_readings.insert("water_flow".into(), 5.0);
        status.stats.insert(
            "water_flow".into(),
            StatsSnapshot { average: 4.5, min: 1.0, max: 9.0, last_value: 5.0, observed_at: t },
        );
        status.last_update_time = t;

        let text = StatusReport::new(vec![status]).to_text();
        assert!(text.contains("Cooler c1:"));
        assert!(text.contains("State: OFF"));
        assert!(text.contains("Total litres dispensed: 12.35L"));
        assert!(text.contains("Last reading water_flow: 5.00"));
        assert!(text.contains("Average: 4.50"));
        assert!(text.contains("Last update: 2024-03-01 10:00:00"));
    }

    #[test]
    fn test_only_filters_and_serializes() {
        let report = StatusReport::new(vec![DeviceStatus::new("a"), DeviceStatus::new("b")]).only("b");
        assert_eq!(report.total, 1);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["coolers"][0]["deviceId"], "b");
        assert_eq!(json["total"], 1);
        assert!(json.get("correlationId").is_none());

        let json = serde_json::to_value(report.with_correlation(Some("cli-9".into()))).unwrap();
        assert_eq!(json["correlationId"], "cli-9");
    }
}
