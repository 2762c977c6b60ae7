use crate::data::{DeviceMemory, bytes_to_mb};
use nvml_wrapper::Nvml;
use nvml_wrapper::error::NvmlError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("NVML initialization failed: {0}")]
    Init(#[source] NvmlError),
    #[error("failed to enumerate devices: {0}")]
    Enumerate(#[source] NvmlError),
    #[error("failed to read device {index}: {source}")]
    Device {
        index: u32,
        #[source]
        source: NvmlError,
    },
}

/// Device oracle queried fresh on every tick.
pub trait GpuMonitor {
    /// Indices of the devices visible right now, in enumeration order.
    fn list_devices(&self) -> Result<Vec<u32>, MonitorError>;
    fn device_memory(&self, index: u32) -> Result<DeviceMemory, MonitorError>;
}

/// NVML-backed oracle. The library is initialized in `new` and shut down
/// when the monitor is dropped.
pub struct NvmlMonitor {
    nvml: Nvml,
}

impl NvmlMonitor {
    pub fn new() -> Result<Self, MonitorError> {
        let nvml = Nvml::init().map_err(MonitorError::Init)?;
        Ok(Self { nvml })
    }

    pub fn driver_version(&self) -> Option<String> {
        self.nvml.sys_driver_version().ok()
    }
}

impl GpuMonitor for NvmlMonitor {
    fn list_devices(&self) -> Result<Vec<u32>, MonitorError> {
        let count = self
            .nvml
            .device_count()
            .map_err(MonitorError::Enumerate)?;
        Ok((0..count).collect())
    }

    fn device_memory(&self, index: u32) -> Result<DeviceMemory, MonitorError> {
        let device_error = |source| MonitorError::Device { index, source };

        // 每次采样都重新获取 device，设备可见性可能在两次采样之间变化
        let device = self.nvml.device_by_index(index).map_err(device_error)?;
        let name = device.name().map_err(device_error)?;
        let mem = device.memory_info().map_err(device_error)?;

        Ok(DeviceMemory {
            name,
            used_mb: bytes_to_mb(mem.used),
            total_mb: bytes_to_mb(mem.total),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_failing_query() {
        let err = MonitorError::Device {
            index: 1,
            source: NvmlError::NoPermission,
        };
        assert!(err.to_string().starts_with("failed to read device 1: "));

        let err = MonitorError::Enumerate(NvmlError::Uninitialized);
        assert!(err.to_string().starts_with("failed to enumerate devices: "));
    }

    // Needs an NVIDIA driver on the host.
    #[test]
    #[ignore]
    fn reads_every_visible_device() {
        let monitor = NvmlMonitor::new().expect("NVML available");
        for index in monitor.list_devices().expect("device count") {
            let memory = monitor.device_memory(index).expect("memory info");
            assert!(!memory.name.is_empty());
            assert!(memory.total_mb > 0.0);
        }
    }
}
