use chrono::NaiveDateTime;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Converts a byte count reported by the driver into megabytes (MiB).
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

// Memory reading for one device, as returned by the oracle
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceMemory {
    pub name: String,
    pub used_mb: f64,
    pub total_mb: f64,
}

/// One device's memory snapshot at one tick. Written as a single log row.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub timestamp: NaiveDateTime,
    pub device_id: u32,
    pub device_name: String,
    pub memory_used: f64,
    pub memory_total: f64,
}

impl Sample {
    pub fn new(timestamp: NaiveDateTime, device_id: u32, memory: DeviceMemory) -> Self {
        Self {
            timestamp,
            device_id,
            device_name: memory.name,
            memory_used: memory.used_mb,
            memory_total: memory.total_mb,
        }
    }

    /// True when the driver reported values outside `0 <= used <= total`.
    pub fn is_anomalous(&self) -> bool {
        self.memory_used < 0.0 || self.memory_used > self.memory_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn converts_bytes_to_mebibytes() {
        assert_eq!(bytes_to_mb(0), 0.0);
        assert_eq!(bytes_to_mb(1024 * 1024), 1.0);
        assert_eq!(bytes_to_mb(24 * 1024 * 1024 * 1024), 24576.0);
    }

    #[test]
    fn sample_takes_fields_from_device_memory() {
        let sample = Sample::new(
            noon(),
            3,
            DeviceMemory {
                name: "MockGPU".into(),
                used_mb: 100.0,
                total_mb: 1000.0,
            },
        );
        assert_eq!(sample.device_id, 3);
        assert_eq!(sample.device_name, "MockGPU");
        assert_eq!(sample.memory_used, 100.0);
        assert_eq!(sample.memory_total, 1000.0);
        assert!(!sample.is_anomalous());
    }

    #[test]
    fn used_above_total_is_flagged_but_kept() {
        let sample = Sample::new(
            noon(),
            0,
            DeviceMemory {
                name: "MockGPU".into(),
                used_mb: 1500.0,
                total_mb: 1000.0,
            },
        );
        assert!(sample.is_anomalous());
        assert_eq!(sample.memory_used, 1500.0);
    }
}
