//! Serial driver seam
//!
//! Chip-specific framing (CH340, CP210x, FTDI, CDC-ACM) lives in
//! driver implementations behind these traits; the bridge only selects
//! a driver and calls through. `Prober` is the selection table: an
//! explicit driver type picks its factory directly, `Auto` walks the
//! table and takes the first factory whose predicate recognizes the
//! device.

use crate::host::UsbConnection;
use common::{Error, Result};
use protocol::{DeviceInfo, DriverType, LineConfig};
use std::sync::Arc;
use std::time::Duration;

/// A driver-opened logical serial endpoint
///
/// Methods take `&self` so the read pump and the caller's control
/// thread can use the port concurrently (duplex I/O); implementations
/// provide their own interior synchronization where needed.
pub trait SerialPort: Send + Sync {
    /// Open the port against an OS connection
    fn open(&self, connection: &dyn UsbConnection) -> Result<()>;

    /// Whether the port is currently open
    fn is_open(&self) -> bool;

    /// Read up to `buf.len()` bytes, waiting at most `timeout`
    ///
    /// A timeout with no data reads `Ok(0)`; errors are device I/O
    /// failures.
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Blocking write with a timeout
    fn write(&self, data: &[u8], timeout: Duration) -> Result<()>;

    /// Apply UART framing parameters
    fn set_parameters(&self, config: &LineConfig) -> Result<()>;

    /// Set the DTR control line
    fn set_dtr(&self, value: bool) -> Result<()>;

    /// Set the RTS control line
    fn set_rts(&self, value: bool) -> Result<()>;

    /// Close the port. Idempotent.
    fn close(&self) -> Result<()>;
}

/// A chip-specific protocol adapter
pub trait SerialDriver: Send + Sync {
    /// Which chip family this driver speaks
    fn driver_type(&self) -> DriverType;

    /// Number of serial ports the device exposes
    fn num_ports(&self) -> usize;

    /// Port at `index`
    fn port(&self, index: usize) -> Result<Arc<dyn SerialPort>>;
}

type SupportsFn = Box<dyn Fn(&DeviceInfo) -> bool + Send + Sync>;
type BuildFn = Box<dyn Fn(&DeviceInfo) -> Result<Arc<dyn SerialDriver>> + Send + Sync>;

/// A registered driver constructor
pub struct DriverFactory {
    driver_type: DriverType,
    supports: SupportsFn,
    build: BuildFn,
}

impl DriverFactory {
    /// Register a driver under `driver_type`
    ///
    /// `supports` answers the auto-probe question for a device;
    /// `build` constructs the driver.
    pub fn new(
        driver_type: DriverType,
        supports: impl Fn(&DeviceInfo) -> bool + Send + Sync + 'static,
        build: impl Fn(&DeviceInfo) -> Result<Arc<dyn SerialDriver>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            driver_type,
            supports: Box::new(supports),
            build: Box::new(build),
        }
    }

    /// The driver type this factory builds
    pub fn driver_type(&self) -> DriverType {
        self.driver_type
    }
}

/// Ordered driver selection table
#[derive(Default)]
pub struct Prober {
    factories: Vec<DriverFactory>,
}

impl Prober {
    /// Create an empty prober
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory to the end of the probe order
    pub fn register(&mut self, factory: DriverFactory) {
        self.factories.push(factory);
    }

    /// Probe a device: first factory that recognizes it wins
    pub fn probe(&self, device: &DeviceInfo) -> Result<Arc<dyn SerialDriver>> {
        self.factories
            .iter()
            .find(|f| (f.supports)(device))
            .ok_or(Error::NoDriver)
            .and_then(|f| (f.build)(device))
    }

    /// Resolve a driver for a device
    ///
    /// `Auto` probes; an explicit type picks that chip's factory
    /// without consulting its predicate (the caller knows better than
    /// the descriptor) and fails with `NoDriver` when that chip driver
    /// is not registered.
    pub fn resolve(&self, driver_type: DriverType, device: &DeviceInfo) -> Result<Arc<dyn SerialDriver>> {
        match driver_type {
            DriverType::Auto => self.probe(device),
            explicit => self
                .factories
                .iter()
                .find(|f| f.driver_type == explicit)
                .ok_or(Error::NoDriver)
                .and_then(|f| (f.build)(device)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDriver;
    use common::test_utils::mock_device_info;

    fn factory_for(driver_type: DriverType, vid: u16) -> DriverFactory {
        DriverFactory::new(
            driver_type,
            move |device| device.vendor_id == vid,
            move |_| Ok(Arc::new(MockDriver::new(driver_type, 1)) as Arc<dyn SerialDriver>),
        )
    }

    #[test]
    fn test_probe_first_match_wins() {
        let mut prober = Prober::new();
        prober.register(factory_for(DriverType::Ch340, 0x1a86));
        prober.register(factory_for(DriverType::Ftdi, 0x0403));

        let device = mock_device_info(1, 0x0403, 0x6001);
        let driver = prober.probe(&device).unwrap();
        assert_eq!(driver.driver_type(), DriverType::Ftdi);
    }

    #[test]
    fn test_probe_no_match() {
        let mut prober = Prober::new();
        prober.register(factory_for(DriverType::Ch340, 0x1a86));

        let device = mock_device_info(1, 0xffff, 0x0001);
        assert!(matches!(prober.probe(&device), Err(Error::NoDriver)));
    }

    #[test]
    fn test_resolve_explicit_ignores_predicate() {
        let mut prober = Prober::new();
        prober.register(factory_for(DriverType::Ch340, 0x1a86));

        // Device the predicate would reject; the explicit type still resolves
        let device = mock_device_info(1, 0xffff, 0x0001);
        let driver = prober.resolve(DriverType::Ch340, &device).unwrap();
        assert_eq!(driver.driver_type(), DriverType::Ch340);
    }

    #[test]
    fn test_resolve_unregistered_explicit_type() {
        let prober = Prober::new();
        let device = mock_device_info(1, 0x1a86, 0x7523);
        assert!(matches!(
            prober.resolve(DriverType::Cp210x, &device),
            Err(Error::NoDriver)
        ));
    }
}
