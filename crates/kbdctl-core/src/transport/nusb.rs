//! nusb-based USB transport implementation.
//!
//! The configuration protocol runs over a pair of interrupt endpoints on a
//! vendor HID interface. The kernel HID driver owns that interface, so it is
//! detached while claimed.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use nusb::transfer::{Direction, In, Interrupt, Out, TransferError};
use nusb::{Device, Endpoint, Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, warn};

use super::traits::{TransportError, UsbTransport};
use crate::cancel::CancelToken;
use crate::protocol::constants::{
    CANCEL_POLL_INTERVAL, CONFIG_INTERFACE, GMK_VENDOR_ID, GMK87_PRODUCT_ID, WRITE_TIMEOUT,
};

/// Everything that has to be released, in teardown order.
struct OpenDevice {
    in_ep: Endpoint<Interrupt, In>,
    out_ep: Endpoint<Interrupt, Out>,
    interface: Interface,
    device: Device,
}

/// Scoped owner of the device handle chain.
///
/// `close` runs every teardown stage even when an earlier one fails and
/// reports all failures together. Dropping the guard closes it.
struct DeviceGuard {
    inner: Mutex<Option<OpenDevice>>,
}

/// Collects failures of independent teardown stages.
#[derive(Default)]
struct Teardown {
    errors: Vec<String>,
}

impl Teardown {
    fn stage(&mut self, name: &str, result: Result<(), String>) {
        if let Err(e) = result {
            warn!(stage = name, error = %e, "Teardown stage failed");
            self.errors.push(format!("{}: {}", name, e));
        }
    }

    fn finish(self) -> Result<(), TransportError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(TransportError::CloseFailed(self.errors))
        }
    }
}

/// Wait for `pending` cancelled transfers to complete.
fn drain(mut pending: usize, mut wait_one: impl FnMut(Duration) -> bool) -> Result<(), String> {
    while pending > 0 {
        if !wait_one(WRITE_TIMEOUT) {
            return Err(format!("{} transfer(s) did not complete after cancel", pending));
        }
        pending -= 1;
    }
    Ok(())
}

impl DeviceGuard {
    fn new(device: OpenDevice) -> Self {
        Self {
            inner: Mutex::new(Some(device)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<OpenDevice>>, TransportError> {
        self.inner
            .lock()
            .map_err(|_| TransportError::OpenFailed("device lock poisoned".into()))
    }

    fn close(&self) -> Result<(), TransportError> {
        let Some(open) = self.lock()?.take() else {
            return Ok(());
        };
        let OpenDevice {
            mut in_ep,
            mut out_ep,
            interface,
            device,
        } = open;
        let mut teardown = Teardown::default();

        in_ep.cancel_all();
        let pending = in_ep.pending();
        teardown.stage(
            "drain IN endpoint",
            drain(pending, |t| in_ep.wait_next_complete(t).is_some()),
        );
        out_ep.cancel_all();
        let pending = out_ep.pending();
        teardown.stage(
            "drain OUT endpoint",
            drain(pending, |t| out_ep.wait_next_complete(t).is_some()),
        );
        drop(in_ep);
        drop(out_ep);

        drop(interface);

        teardown.stage(
            "reset device",
            device.reset().wait().map_err(|e| e.to_string()),
        );
        drop(device);

        debug!("Device released");
        teardown.finish()
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Failed to close device on drop");
        }
    }
}

fn transfer_error(e: TransferError, fallback: fn(String) -> TransportError) -> TransportError {
    match e {
        TransferError::Cancelled => TransportError::Cancelled,
        TransferError::Disconnected => TransportError::Disconnected,
        other => fallback(other.to_string()),
    }
}

/// nusb-based USB transport.
pub struct NusbTransport {
    guard: DeviceGuard,
    in_max_packet: usize,
    vid: u16,
    pid: u16,
}

impl NusbTransport {
    /// Open the GMK87 configuration interface.
    #[instrument(level = "info")]
    pub fn open() -> Result<Self, TransportError> {
        Self::open_with_ids(GMK_VENDOR_ID, GMK87_PRODUCT_ID, CONFIG_INTERFACE)
    }

    /// Open a device with specific VID/PID and claim `interface`.
    #[instrument(level = "info", fields(vid = format!("{:04X}", vid), pid = format!("{:04X}", pid)))]
    pub fn open_with_ids(vid: u16, pid: u16, interface: u8) -> Result<Self, TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| d.vendor_id() == vid && d.product_id() == pid)
            .ok_or(TransportError::DeviceNotFound { vid, pid })?;

        info!(
            vendor_id = %format!("{:04X}", vid),
            product_id = %format!("{:04X}", pid),
            "Found device"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        // Find INTERRUPT endpoints
        let mut in_endpoint: u8 = 0;
        let mut out_endpoint: u8 = 0;

        for config in device.configurations() {
            for iface in config.interfaces() {
                if iface.interface_number() == interface {
                    for alt in iface.alt_settings() {
                        for ep in alt.endpoints() {
                            if ep.transfer_type() == nusb::descriptors::TransferType::Interrupt {
                                if ep.direction() == Direction::In {
                                    in_endpoint = ep.address();
                                } else {
                                    out_endpoint = ep.address();
                                }
                            }
                        }
                    }
                }
            }
        }

        if in_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Interrupt".into(),
                direction: "In".into(),
            });
        }
        if out_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Interrupt".into(),
                direction: "Out".into(),
            });
        }

        let claimed = device
            .detach_and_claim_interface(interface)
            .wait()
            .map_err(|e| TransportError::ClaimInterfaceFailed {
                interface,
                message: e.to_string(),
            })?;

        let in_ep = claimed
            .endpoint::<Interrupt, In>(in_endpoint)
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;
        let out_ep = claimed
            .endpoint::<Interrupt, Out>(out_endpoint)
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;
        let in_max_packet = in_ep.max_packet_size();

        info!(
            interface,
            in_ep = %format!("0x{:02X}", in_endpoint),
            out_ep = %format!("0x{:02X}", out_endpoint),
            max_packet = in_max_packet,
            "Device opened successfully"
        );

        Ok(Self {
            guard: DeviceGuard::new(OpenDevice {
                in_ep,
                out_ep,
                interface: claimed,
                device,
            }),
            in_max_packet,
            vid,
            pid,
        })
    }
}

impl UsbTransport for NusbTransport {
    #[instrument(level = "trace", skip(self, report, cancel), fields(len = report.len()))]
    fn write(&self, report: &[u8], cancel: &CancelToken) -> Result<usize, TransportError> {
        cancel.check()?;
        let mut guard = self.guard.lock()?;
        let open = guard.as_mut().ok_or(TransportError::Disconnected)?;
        let ep = &mut open.out_ep;

        let mut buf = ep.allocate(report.len());
        buf.extend_from_slice(report);
        ep.submit(buf);

        let start = Instant::now();
        loop {
            if let Some(completion) = ep.wait_next_complete(CANCEL_POLL_INTERVAL) {
                completion
                    .status
                    .map_err(|e| transfer_error(e, TransportError::WriteFailed))?;
                debug!(bytes_written = completion.actual_len, "Write complete");
                return Ok(completion.actual_len);
            }

            let result = if cancel.is_cancelled() {
                TransportError::Cancelled
            } else if start.elapsed() >= WRITE_TIMEOUT {
                TransportError::Timeout {
                    timeout_ms: WRITE_TIMEOUT.as_millis() as u64,
                }
            } else {
                continue;
            };
            ep.cancel_all();
            let _ = ep.wait_next_complete(WRITE_TIMEOUT);
            return Err(result);
        }
    }

    /// An unanswered IN transfer stays queued across calls, so a report that
    /// arrives after a timeout is picked up by the next read.
    #[instrument(level = "trace", skip(self, cancel))]
    fn read(&self, timeout: Duration, cancel: &CancelToken) -> Result<Vec<u8>, TransportError> {
        cancel.check()?;
        let mut guard = self.guard.lock()?;
        let open = guard.as_mut().ok_or(TransportError::Disconnected)?;
        let ep = &mut open.in_ep;

        if ep.pending() == 0 {
            let buf = ep.allocate(self.in_max_packet);
            ep.submit(buf);
        }

        let start = Instant::now();
        loop {
            let remaining = timeout.saturating_sub(start.elapsed());
            if let Some(completion) = ep.wait_next_complete(remaining.min(CANCEL_POLL_INTERVAL)) {
                completion
                    .status
                    .map_err(|e| transfer_error(e, TransportError::ReadFailed))?;
                let n = completion.actual_len.min(completion.buffer.len());
                debug!(bytes_read = n, "Read complete");
                return Ok(completion.buffer[..n].to_vec());
            }
            cancel.check()?;
            if start.elapsed() >= timeout {
                return Err(TransportError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        }
    }

    fn close(&self) -> Result<(), TransportError> {
        self.guard.close()
    }

    fn is_connected(&self) -> bool {
        self.guard
            .inner
            .lock()
            .map(|g| g.is_some())
            .unwrap_or(false)
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teardown_aggregates_all_failures() {
        let mut teardown = Teardown::default();
        teardown.stage("drain IN endpoint", Err("stuck".into()));
        teardown.stage("drain OUT endpoint", Ok(()));
        teardown.stage("reset device", Err("pipe error".into()));

        match teardown.finish() {
            Err(TransportError::CloseFailed(errors)) => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0].starts_with("drain IN endpoint"));
                assert!(errors[1].starts_with("reset device"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_teardown_without_failures() {
        let mut teardown = Teardown::default();
        teardown.stage("reset device", Ok(()));
        assert!(teardown.finish().is_ok());
    }

    #[test]
    fn test_closed_guard_close_is_noop() {
        let guard = DeviceGuard {
            inner: Mutex::new(None),
        };
        assert!(guard.close().is_ok());
        assert!(guard.close().is_ok());
    }

    #[test]
    fn test_poisoned_lock_is_not_a_read_error() {
        let guard = std::sync::Arc::new(DeviceGuard {
            inner: Mutex::new(None),
        });
        let holder = guard.clone();
        let _ = std::thread::spawn(move || {
            let _held = holder.inner.lock().unwrap();
            panic!("poison the device lock");
        })
        .join();

        assert!(matches!(
            guard.lock(),
            Err(TransportError::OpenFailed(msg)) if msg.contains("poisoned")
        ));
        assert!(matches!(guard.close(), Err(TransportError::OpenFailed(_))));
    }

    #[test]
    fn test_drain_counts_completions() {
        let mut calls = 0;
        assert!(drain(3, |_| {
            calls += 1;
            true
        })
        .is_ok());
        assert_eq!(calls, 3);

        let err = drain(2, |_| false).unwrap_err();
        assert!(err.contains("2 transfer(s)"));
    }
}
