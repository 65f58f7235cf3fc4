//! WinRT GATT transport
//!
//! Advertisement watching, connection and characteristic discovery on the
//! Windows Bluetooth LE stack. Async WinRT operations run on spawned tokio
//! tasks and report back through the transport event channel.

use crate::domain::control::WriteMode;
use crate::domain::models::DeviceId;
use crate::infrastructure::bluetooth::error::TransportError;
use crate::infrastructure::bluetooth::registry::{Endpoint, EndpointHandle};
use crate::infrastructure::bluetooth::transport::{
    Advertisement, DiscoveredCharacteristic, LinkSlot, Transport, TransportEvent,
    TransportEventSender,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattCommunicationStatus, GattWriteOption,
};
use windows::Devices::Bluetooth::{
    BluetoothAdapter, BluetoothCacheMode, BluetoothConnectionStatus, BluetoothLEDevice,
};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::DataWriter;

fn to_guid(uuid: Uuid) -> GUID {
    GUID::from_u128(uuid.as_u128())
}

fn to_uuid(guid: GUID) -> Uuid {
    Uuid::from_u128(u128::from(guid))
}

/// Handles that belong to the current connection
struct Link {
    device_id: DeviceId,
    device: BluetoothLEDevice,
    status_token: i64,
    characteristics: Vec<GattCharacteristic>,
}

impl Link {
    fn close(self) {
        let _ = self.device.RemoveConnectionStatusChanged(self.status_token);
        let _ = self.device.Close();
        info!("Closed device {}", self.device_id);
    }
}

type SharedLink = Arc<Mutex<LinkSlot<Link>>>;

fn lock(link: &SharedLink) -> MutexGuard<'_, LinkSlot<Link>> {
    link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct WinRtTransport {
    events: TransportEventSender,
    available: bool,
    watcher: Option<BluetoothLEAdvertisementWatcher>,
    link: SharedLink,
}

impl WinRtTransport {
    /// Probe the default adapter for low-energy support
    pub async fn open(events: TransportEventSender) -> Self {
        let available = match probe_adapter().await {
            Ok(supported) => supported,
            Err(e) => {
                warn!("No usable Bluetooth adapter: {}", e);
                false
            }
        };
        info!("Bluetooth LE available: {}", available);

        Self {
            events,
            available,
            watcher: None,
            link: Arc::new(Mutex::new(LinkSlot::default())),
        }
    }
}

async fn probe_adapter() -> Result<bool, TransportError> {
    let adapter = BluetoothAdapter::GetDefaultAsync()?.await?;
    Ok(adapter.IsLowEnergySupported()?)
}

impl Transport for WinRtTransport {
    fn is_available(&self) -> bool {
        self.available
    }

    fn start_scan(&mut self, service: Uuid, show_all_devices: bool) -> Result<(), TransportError> {
        // Stop any existing scan
        self.stop_scan()?;

        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let sender = self.events.clone();
        let target = to_guid(service);
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let adv = args.Advertisement()?;

                    let mut matched = show_all_devices;
                    if !matched {
                        let service_uuids = adv.ServiceUuids()?;
                        for i in 0..service_uuids.Size()? {
                            if service_uuids.GetAt(i)? == target {
                                matched = true;
                                break;
                            }
                        }
                    }

                    if matched {
                        let name = adv.LocalName()?.to_string();
                        let _ = sender.send(TransportEvent::Advertisement(Advertisement {
                            id: DeviceId(args.BluetoothAddress()?),
                            name: (!name.is_empty()).then_some(name),
                            signal_strength: args.RawSignalStrengthInDBm()?,
                        }));
                    }
                }
                Ok(())
            },
        );

        watcher.Received(&handler)?;
        watcher.Start()?;
        self.watcher = Some(watcher);
        info!("Advertisement watcher started for {}", service);
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), TransportError> {
        if let Some(watcher) = self.watcher.take() {
            info!("Stopping advertisement watcher");
            watcher.Stop()?;
        }
        Ok(())
    }

    fn connect(&mut self, device: DeviceId) -> Result<(), TransportError> {
        let events = self.events.clone();
        let link = self.link.clone();
        lock(&link).begin(device);

        tokio::spawn(async move {
            match open_device(device, events.clone()).await {
                Ok((handle, status_token)) => {
                    let opened = Link {
                        device_id: device,
                        device: handle,
                        status_token,
                        characteristics: Vec::new(),
                    };
                    let outcome = lock(&link).complete(device, opened);
                    match outcome {
                        Ok(replaced) => {
                            if let Some(previous) = replaced {
                                previous.close();
                            }
                            let _ = events.send(TransportEvent::Connected(device));
                        }
                        Err(stale) => {
                            info!("Connect to {} was abandoned while pending", device);
                            stale.close();
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to open {}: {}", device, e);
                    lock(&link).fail(device);
                    let _ = events.send(TransportEvent::ConnectFailed {
                        device,
                        reason: e.to_string(),
                    });
                }
            }
        });
        Ok(())
    }

    fn discover(&mut self, device: DeviceId, service: Uuid) -> Result<(), TransportError> {
        let handle = match lock(&self.link).get(device) {
            Some(link) => link.device.clone(),
            None => return Err(TransportError::NotConnected),
        };
        let events = self.events.clone();
        let link = self.link.clone();

        tokio::spawn(async move {
            match enumerate_characteristics(&handle, service).await {
                Ok(found) => {
                    let mut characteristics = Vec::with_capacity(found.len());
                    for (index, characteristic) in found.iter().enumerate() {
                        match characteristic.Uuid() {
                            Ok(guid) => characteristics.push(DiscoveredCharacteristic {
                                uuid: to_uuid(guid),
                                handle: EndpointHandle(index as u64),
                            }),
                            Err(e) => warn!("Unreadable characteristic UUID: {}", e),
                        }
                    }
                    if let Some(current) = lock(&link).get_mut(device) {
                        current.characteristics = found;
                    }
                    info!("Found {} characteristics", characteristics.len());
                    let _ = events.send(TransportEvent::CharacteristicsDiscovered {
                        device,
                        characteristics,
                    });
                }
                Err(e) => {
                    let _ = events.send(TransportEvent::DiscoveryFailed {
                        device,
                        reason: e.to_string(),
                    });
                }
            }
        });
        Ok(())
    }

    fn write(
        &mut self,
        endpoint: &Endpoint,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError> {
        let guard = lock(&self.link);
        let link = guard.current().ok_or(TransportError::NotConnected)?;
        let characteristic = link
            .characteristics
            .get(endpoint.handle.0 as usize)
            .ok_or(TransportError::UnknownHandle(endpoint.handle.0))?;

        let writer = DataWriter::new()?;
        writer.WriteBytes(payload)?;
        let buffer = writer.DetachBuffer()?;
        let option = match mode {
            WriteMode::WithResponse => GattWriteOption::WriteWithResponse,
            WriteMode::WithoutResponse => GattWriteOption::WriteWithoutResponse,
        };

        // Fire-and-forget write
        let _ = characteristic.WriteValueWithOptionAsync(&buffer, option)?;
        Ok(())
    }

    fn disconnect(&mut self, device: DeviceId) {
        let released = lock(&self.link).release(device);
        if let Some(link) = released {
            link.close();
        }
    }
}

impl Drop for WinRtTransport {
    fn drop(&mut self) {
        let _ = self.stop_scan();
    }
}

/// Open the device and watch its connection status for link loss
async fn open_device(
    device: DeviceId,
    events: TransportEventSender,
) -> Result<(BluetoothLEDevice, i64), TransportError> {
    info!("Connecting to Bluetooth device: {:#X}", device.0);
    let handle = BluetoothLEDevice::FromBluetoothAddressAsync(device.0)?.await?;
    info!("Device opened: {:?}", handle.Name()?);

    let status_handler =
        TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
            if let Some(dev) = dev.as_ref() {
                if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                    let _ = events.send(TransportEvent::LinkLost {
                        device,
                        reason: "peripheral disconnected".to_string(),
                    });
                }
            }
            Ok(())
        });
    let token = handle.ConnectionStatusChanged(&status_handler)?;
    Ok((handle, token))
}

async fn enumerate_characteristics(
    device: &BluetoothLEDevice,
    service: Uuid,
) -> Result<Vec<GattCharacteristic>, TransportError> {
    let services = device
        .GetGattServicesForUuidWithCacheModeAsync(to_guid(service), BluetoothCacheMode::Uncached)?
        .await?;
    if services.Status()? != GattCommunicationStatus::Success {
        error!("Failed to get GATT services: {:?}", services.Status()?);
        return Err(TransportError::Gatt(format!(
            "GATT service query returned {:?}",
            services.Status()?
        )));
    }

    let services = services.Services()?;
    if services.Size()? == 0 {
        return Err(TransportError::Gatt(format!("service {} not found", service)));
    }
    let gatt_service = services.GetAt(0)?;

    let result = gatt_service
        .GetCharacteristicsWithCacheModeAsync(BluetoothCacheMode::Uncached)?
        .await?;
    if result.Status()? != GattCommunicationStatus::Success {
        return Err(TransportError::Gatt(format!(
            "characteristic query returned {:?}",
            result.Status()?
        )));
    }

    let characteristics = result.Characteristics()?;
    let mut found = Vec::with_capacity(characteristics.Size()? as usize);
    for i in 0..characteristics.Size()? {
        found.push(characteristics.GetAt(i)?);
    }
    Ok(found)
}
