//! Binding the processing thread to an accelerator.

use std::cell::Cell;

use tracing::{debug, instrument};

use crate::error::DeviceError;

thread_local! {
    static BOUND_DEVICE: Cell<Option<i32>> = const { Cell::new(None) };
}

/// Device the calling thread is bound to, if any.
pub fn bound_device() -> Option<i32> {
    BOUND_DEVICE.with(Cell::get)
}

/// Binds the calling thread to an accelerator before frames are processed.
pub trait DeviceBinder: Send + Sync {
    /// Configure the calling thread for `device_id`.
    fn bind(&self, device_id: i32) -> Result<(), DeviceError>;
}

/// Host with a fixed number of accelerators, indexed from zero.
#[derive(Debug, Clone, Copy)]
pub struct HostDevices {
    count: u32,
}

impl HostDevices {
    /// Host exposing `count` devices.
    pub fn new(count: u32) -> Self {
        Self { count }
    }

    /// Number of devices.
    pub fn count(&self) -> u32 {
        self.count
    }
}

impl Default for HostDevices {
    fn default() -> Self {
        Self::new(1)
    }
}

impl DeviceBinder for HostDevices {
    #[instrument(name = "bind_device", skip(self))]
    fn bind(&self, device_id: i32) -> Result<(), DeviceError> {
        if device_id < 0 || device_id as u32 >= self.count {
            return Err(DeviceError::InvalidDevice {
                device_id,
                available: self.count,
            });
        }
        BOUND_DEVICE.with(|bound| bound.set(Some(device_id)));
        debug!("Thread bound to device");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_valid_device() {
        let host = HostDevices::new(2);
        host.bind(1).unwrap();
        assert_eq!(bound_device(), Some(1));
    }

    #[test]
    fn test_bind_out_of_range() {
        let host = HostDevices::default();
        let err = host.bind(1).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidDevice { device_id: 1, available: 1 }));
        assert!(host.bind(-1).is_err());
    }

    #[test]
    fn test_binding_is_per_thread() {
        HostDevices::new(4).bind(3).unwrap();
        let other = std::thread::spawn(bound_device).join().unwrap();
        assert_eq!(other, None);
        assert_eq!(bound_device(), Some(3));
    }
}
