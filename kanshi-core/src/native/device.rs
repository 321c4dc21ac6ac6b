//! ローカルデバイスとデバイスマネージャ

use super::session::NativeSession;
use crate::backend::{Device, DeviceList, DeviceManager, DeviceType};
use crate::errors::ERR_MANAGER_CLOSED;
use crate::{Error, Result};
use tracing::debug;

/// ローカルデバイスのID
const LOCAL_DEVICE_ID: &str = "local";

/// ローカルデバイスの表示名
const LOCAL_DEVICE_NAME: &str = "Local System";

/// ネイティブのデバイスマネージャ
///
/// 列挙されるのはこのマシン自身を表すローカルデバイスのみです。
pub struct NativeDeviceManager {
    closed: bool,
}

impl NativeDeviceManager {
    pub fn new() -> Self {
        Self { closed: false }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Default for NativeDeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceManager for NativeDeviceManager {
    type Device = NativeDevice;

    fn enumerate_devices(&mut self) -> Result<DeviceList<NativeDevice>> {
        if self.closed {
            return Err(Error::InvalidOperation(ERR_MANAGER_CLOSED));
        }
        Ok(DeviceList::new(vec![NativeDevice::local()]))
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            debug!("closing device manager");
            self.closed = true;
        }
        Ok(())
    }
}

impl Drop for NativeDeviceManager {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// ネイティブのデバイス
#[derive(Debug, Clone)]
pub struct NativeDevice {
    id: String,
    name: String,
    dtype: DeviceType,
}

impl NativeDevice {
    fn local() -> Self {
        Self {
            id: LOCAL_DEVICE_ID.to_string(),
            name: LOCAL_DEVICE_NAME.to_string(),
            dtype: DeviceType::Local,
        }
    }
}

impl Device for NativeDevice {
    type Session = NativeSession;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn dtype(&self) -> DeviceType {
        self.dtype
    }

    fn attach(&self, pid: u32) -> Result<NativeSession> {
        NativeSession::attach(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Session;

    #[test]
    fn test_enumerate_local_device() {
        let mut manager = NativeDeviceManager::new();
        let devices = manager.enumerate_devices().unwrap();
        assert_eq!(devices.len(), 1);

        let device = devices.get(0).unwrap();
        assert_eq!(device.id(), "local");
        assert_eq!(device.name(), "Local System");
        assert_eq!(device.dtype(), DeviceType::Local);
    }

    #[test]
    fn test_enumerate_after_close() {
        let mut manager = NativeDeviceManager::new();
        manager.close().unwrap();
        manager.close().unwrap();
        assert!(manager.is_closed());
        assert!(matches!(
            manager.enumerate_devices(),
            Err(Error::InvalidOperation(ERR_MANAGER_CLOSED))
        ));
    }

    #[test]
    fn test_attach_missing_process() {
        let device = NativeDevice::local();
        match device.attach(u32::MAX - 1) {
            Err(Error::ProcessNotFound(pid)) => assert_eq!(pid, u32::MAX - 1),
            Err(Error::Unsupported(_)) => {}
            other => panic!("unexpected attach result: {:?}", other.map(|s| s.pid())),
        }
    }
}
