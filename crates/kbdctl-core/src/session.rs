//! Keyboard session - high-level orchestrator for configuration transactions.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone};
use tracing::{info, instrument, warn};

use crate::cancel::CancelToken;
use crate::channel::{ChannelTiming, CommandChannel};
use crate::config::KbdConfig;
use crate::error::{ProtocolError, TransactionError};
use crate::events::{KbdEvent, KbdObserver, PacketDirection, TracingObserver};
use crate::image::{ConfigImage, ImageAssembler};
use crate::protocol::constants::{CONFIG_CHUNK_SIZE, RESPONSE_DATA_OFFSET};
use crate::state::{Step, TransactionKind, TransactionMachine, read_plan, write_plan};
use crate::timecodec::TimeCodec;
use crate::transport::{NusbTransport, TransportError, UsbTransport};

/// Outcome of a clock update.
#[derive(Debug, Clone)]
pub struct TimeSync<Tz: TimeZone> {
    /// Instant the caller asked for.
    pub requested: DateTime<Tz>,
    /// Instant actually written, after latency compensation.
    pub programmed: DateTime<Tz>,
    /// Wall-clock duration of the read transaction.
    pub read_duration: Duration,
}

/// Keyboard session - owns the device and runs transactions against it.
pub struct KeyboardSession<T: UsbTransport, O: KbdObserver> {
    transport: T,
    observer: Arc<O>,
    timing: ChannelTiming,
    codec: TimeCodec,
    cancel: CancelToken,
}

impl KeyboardSession<NusbTransport, TracingObserver> {
    /// Open the device named by `config` with the default tracing observer.
    pub fn open(config: &KbdConfig, cancel: CancelToken) -> Result<Self, TransportError> {
        let transport =
            NusbTransport::open_with_ids(config.vendor_id, config.product_id, config.interface)?;
        Ok(Self::with_observer(
            transport,
            config,
            cancel,
            Arc::new(TracingObserver),
        ))
    }
}

impl<T: UsbTransport> KeyboardSession<T, TracingObserver> {
    /// Create a session over an already opened transport.
    pub fn new(transport: T, config: &KbdConfig, cancel: CancelToken) -> Self {
        Self::with_observer(transport, config, cancel, Arc::new(TracingObserver))
    }
}

impl<T: UsbTransport, O: KbdObserver> KeyboardSession<T, O> {
    /// Create a session with a custom observer.
    pub fn with_observer(transport: T, config: &KbdConfig, cancel: CancelToken, observer: Arc<O>) -> Self {
        observer.on_event(&KbdEvent::DeviceConnected {
            vid: transport.vendor_id(),
            pid: transport.product_id(),
        });
        Self {
            transport,
            observer,
            timing: config.timing(),
            codec: config.time_codec(),
            cancel,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Read the 48-byte configuration image.
    #[instrument(skip(self))]
    pub fn load_config(&self) -> Result<ConfigImage, TransactionError> {
        let kind = TransactionKind::Read;
        let mut assembler = ImageAssembler::new();

        self.run_plan(kind, &read_plan(), None, |step, data| {
            let Step::ConfigRead { position } = *step else {
                return Ok(());
            };
            // Devices may pad the answer; only the leading chunk is image data.
            let chunk = data.get(..CONFIG_CHUNK_SIZE).ok_or(TransactionError::Aborted {
                kind,
                step: *step,
                source: ProtocolError::ShortRead {
                    command: step.command(),
                    len: data.len() + RESPONSE_DATA_OFFSET,
                },
            })?;
            assembler.push(position as usize, chunk)?;
            Ok(())
        })?;

        let image = assembler.finish()?;
        info!(image = %image, "Configuration read");
        Ok(image)
    }

    /// Write `image` back to the device.
    #[instrument(skip(self, image))]
    pub fn update_config(&self, image: &ConfigImage) -> Result<(), TransactionError> {
        self.run_plan(TransactionKind::Write, &write_plan(), Some(image), |_, _| Ok(()))?;
        info!("Configuration written");
        Ok(())
    }

    /// Program the keyboard clock to `requested`, compensated for the time
    /// the round trips take.
    #[instrument(skip(self), fields(requested = %requested))]
    pub fn set_time<Tz>(&self, requested: DateTime<Tz>) -> Result<TimeSync<Tz>, TransactionError>
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        let start = Instant::now();
        let mut image = self.load_config()?;
        let read_duration = start.elapsed();

        let programmed = self.codec.apply(&mut image, requested.clone(), read_duration)?;
        info!(
            programmed = %programmed,
            read_ms = read_duration.as_millis() as u64,
            "Programming clock"
        );

        self.update_config(&image)?;
        Ok(TimeSync {
            requested,
            programmed,
            read_duration,
        })
    }

    /// Release the device.
    pub fn close(&self) -> Result<(), TransportError> {
        let result = self.transport.close();
        self.observer.on_event(&KbdEvent::DeviceClosed);
        result
    }

    /// Drive one transaction through the state machine, handing every
    /// response to `on_response`.
    fn run_plan<F>(
        &self,
        kind: TransactionKind,
        plan: &[Step],
        image: Option<&ConfigImage>,
        mut on_response: F,
    ) -> Result<(), TransactionError>
    where
        F: FnMut(&Step, Vec<u8>) -> Result<(), TransactionError>,
    {
        let transport = ObservableTransport {
            inner: &self.transport,
            observer: self.observer.as_ref(),
        };
        let channel = CommandChannel::new(&transport, self.observer.as_ref(), &self.cancel, self.timing);
        let mut machine = TransactionMachine::new(kind);
        let start = Instant::now();
        let total = plan.len();

        for (i, step) in plan.iter().enumerate() {
            let command = step.command();
            machine.check(command)?;

            let payload = step_payload(step, image);
            let data = channel
                .execute(command, &payload, step.position())
                .map_err(|source| {
                    warn!(transaction = %kind, step = %step, error = %source, "Transaction aborted");
                    TransactionError::Aborted {
                        kind,
                        step: *step,
                        source,
                    }
                })?;

            let (from, to) = machine.advance(command)?;
            if from != to {
                self.observer.on_event(&KbdEvent::StateChanged { kind, from, to });
            }
            self.observer.on_event(&KbdEvent::Progress {
                kind,
                current: i + 1,
                total,
            });

            on_response(step, data)?;
        }

        let from = machine.state();
        machine.finish()?;
        self.observer.on_event(&KbdEvent::StateChanged {
            kind,
            from,
            to: machine.state(),
        });
        self.observer.on_event(&KbdEvent::TransactionComplete {
            kind,
            elapsed: start.elapsed(),
        });
        Ok(())
    }
}

/// Payload carried by `step`: zeros for probes and reads, the image for a write.
fn step_payload(step: &Step, image: Option<&ConfigImage>) -> Vec<u8> {
    match step {
        Step::Start | Step::End => Vec::new(),
        Step::Probe { len, .. } => vec![0u8; *len],
        Step::ConfigRead { .. } => vec![0u8; CONFIG_CHUNK_SIZE],
        Step::ConfigWrite { .. } => image.map(|i| i.as_bytes().to_vec()).unwrap_or_default(),
    }
}

/// Transport wrapper that emits packet events.
struct ObservableTransport<'a, T: UsbTransport, O: KbdObserver> {
    inner: &'a T,
    observer: &'a O,
}

impl<'a, T: UsbTransport, O: KbdObserver> UsbTransport for ObservableTransport<'a, T, O> {
    fn write(&self, report: &[u8], cancel: &CancelToken) -> Result<usize, TransportError> {
        let res = self.inner.write(report, cancel);
        if res.is_ok() {
            self.observer.on_event(&KbdEvent::Packet {
                direction: PacketDirection::Tx,
                length: report.len(),
                data: report.to_vec(),
            });
        }
        res
    }

    fn read(&self, timeout: Duration, cancel: &CancelToken) -> Result<Vec<u8>, TransportError> {
        let res = self.inner.read(timeout, cancel);
        if let Ok(data) = &res
            && !data.is_empty()
        {
            self.observer.on_event(&KbdEvent::Packet {
                direction: PacketDirection::Rx,
                length: data.len(),
                data: data.clone(),
            });
        }
        res
    }

    fn close(&self) -> Result<(), TransportError> {
        self.inner.close()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn vendor_id(&self) -> u16 {
        self.inner.vendor_id()
    }

    fn product_id(&self) -> u16 {
        self.inner.product_id()
    }
}
