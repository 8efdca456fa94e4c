//! Session manager
//!
//! A [`Session`] owns one logical connection to the device: the transport,
//! the reconnect backoff, the telemetry poll timer, the property cache and
//! at most one playback backend. All of it lives on a single tokio task;
//! callers talk to it through a cloneable [`SessionHandle`].
//!
//! ```text
//! Disconnected ──connect──► Connecting ──open──► Connected
//!      ▲                        │                    │
//!      └────── failure ─────────┴── close / error ───┘
//!              (reconnect after backoff)
//! ```
//!
//! On Connected the backoff resets, the initial properties are requested
//! and the signal poll starts. On leaving Connected the poll stops and a
//! reconnect is scheduled. An explicit disconnect cancels every timer and
//! does not reconnect.
//!
//! Property responses carry no request id. They are matched by name only
//! and the last one received wins.

use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::future::pending;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, Interval, MissedTickBehavior, Sleep};

use crate::audio::playback::{start_backend, BackendKind, Gain, PlaybackBackend};
use crate::config::{AppConfig, PlaybackConfig, SessionConfig};
use crate::demux::{Demuxer, Frame, SpectrumFrame};
use crate::error::{ProtocolError, SessionError};
use crate::protocol::{parse_number, ControlMessage, DemodMode, Property};
use crate::session::backoff::Backoff;
use crate::session::events::{EventHub, PropertyUpdate, SignalReading, Subscription};
use crate::session::transport::{Connector, TransportHandle, WebSocketConnector, WireMessage};
use crate::spectrum::PeakAlignment;

/// Control frames logged in full after each connect
const TEXT_LOG_LIMIT: usize = 50;

/// Spectrum frames whose sizes are logged after each connect
const SPECTRUM_LOG_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Last reported device properties
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceProperties {
    pub vfo_frequency: Option<f64>,
    pub center_frequency: Option<f64>,
    pub sample_rate: Option<f64>,
    pub iq_sample_rate: Option<f64>,
    pub demodulator: Option<String>,
    pub filter_bandwidth: Option<f64>,
    pub signal_power: Option<f64>,
    pub signal_snr: Option<f64>,
    pub antenna: Option<String>,
}

impl DeviceProperties {
    /// Record a property report. Returns the signal reading it carries, if
    /// it is a telemetry property.
    pub fn apply(&mut self, name: &str, value: &str) -> Result<Option<SignalReading>, ProtocolError> {
        let Some(property) = Property::from_name(name) else {
            return Ok(None);
        };

        match property {
            Property::Demodulator => self.demodulator = Some(value.to_string()),
            Property::AntennaSelect => self.antenna = Some(value.to_string()),
            _ => {
                let number = parse_number(name, value)?;
                match property {
                    Property::VfoFrequency => self.vfo_frequency = Some(number),
                    Property::CenterFrequency => self.center_frequency = Some(number),
                    Property::SampleRate => self.sample_rate = Some(number),
                    Property::IqSampleRate => self.iq_sample_rate = Some(number),
                    Property::FilterBandwidth => self.filter_bandwidth = Some(number),
                    Property::SignalPower => {
                        self.signal_power = Some(number);
                        return Ok(Some(SignalReading {
                            power: Some(number),
                            snr: None,
                        }));
                    }
                    Property::SignalSnr => {
                        self.signal_snr = Some(number);
                        return Ok(Some(SignalReading {
                            power: None,
                            snr: Some(number),
                        }));
                    }
                    Property::Demodulator | Property::AntennaSelect => {}
                }
            }
        }
        Ok(None)
    }

    pub fn demod_mode(&self) -> Option<DemodMode> {
        self.demodulator.as_deref().and_then(|mode| mode.parse().ok())
    }
}

/// Snapshot of a session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub properties: DeviceProperties,
    pub backend: Option<BackendKind>,
    /// Samples waiting in the playback buffer, as last reported by the backend
    pub buffered: usize,
}

enum Command {
    Connect,
    Disconnect,
    Send(ControlMessage),
    StartPlayback(Box<dyn PlaybackBackend>),
    StopPlayback,
    ResetPlayback,
    SetGain(f32),
    Shutdown,
}

/// Cloneable handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    hub: Arc<EventHub>,
    status: Arc<RwLock<SessionStatus>>,
    playback_config: Arc<PlaybackConfig>,
    gain: Arc<Mutex<Gain>>,
}

impl SessionHandle {
    fn command(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::ShutDown)
    }

    /// Start connecting, and keep reconnecting until [`disconnect`](Self::disconnect)
    pub fn connect(&self) -> Result<(), SessionError> {
        self.command(Command::Connect)
    }

    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.command(Command::Disconnect)
    }

    /// Fire-and-forget property write. Dropped if not connected.
    pub fn set_property(&self, property: Property, value: impl Into<String>) -> Result<(), SessionError> {
        self.command(Command::Send(ControlMessage::set(property, value)))
    }

    /// Request a property; the answer arrives through the property and
    /// signal subscriptions and the status cache.
    pub fn get_property(&self, property: Property) -> Result<(), SessionError> {
        self.command(Command::Send(ControlMessage::get(property)))
    }

    pub fn enable_audio_stream(&self, enabled: bool) -> Result<(), SessionError> {
        self.command(Command::Send(ControlMessage::AudioStreamEnable { value: enabled }))
    }

    /// Enabling also restarts spectrum peak alignment
    pub fn enable_spectrum(&self, enabled: bool) -> Result<(), SessionError> {
        self.command(Command::Send(ControlMessage::SpectrumEnable { value: enabled }))
    }

    /// Pick a backend and start a playback session on it.
    ///
    /// Blocks the calling thread while the output device is opened, for up
    /// to two seconds. From async code, call it through
    /// `tokio::task::spawn_blocking`.
    pub fn start_playback(&self) -> Result<BackendKind, SessionError> {
        let gain = *self.gain.lock();
        let backend = start_backend(&self.playback_config, gain);
        let kind = backend.kind();
        self.command(Command::StartPlayback(backend))?;
        Ok(kind)
    }

    /// Start a playback session on a caller-built backend
    pub fn start_playback_with(&self, backend: Box<dyn PlaybackBackend>) -> Result<(), SessionError> {
        self.command(Command::StartPlayback(backend))
    }

    pub fn stop_playback(&self) -> Result<(), SessionError> {
        self.command(Command::StopPlayback)
    }

    /// Clear the playback buffer and close the pre-buffer gate
    pub fn reset_playback(&self) -> Result<(), SessionError> {
        self.command(Command::ResetPlayback)
    }

    pub fn set_volume(&self, volume: f32) -> Result<(), SessionError> {
        let factor = {
            let mut gain = self.gain.lock();
            gain.set_volume(volume);
            gain.factor()
        };
        self.command(Command::SetGain(factor))
    }

    pub fn set_muted(&self, muted: bool) -> Result<(), SessionError> {
        let factor = {
            let mut gain = self.gain.lock();
            gain.set_muted(muted);
            gain.factor()
        };
        self.command(Command::SetGain(factor))
    }

    pub fn gain(&self) -> Gain {
        *self.gain.lock()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.read().state == ConnectionState::Connected
    }

    /// Mono `f32` blocks as they arrive
    pub fn on_audio(&self, callback: impl Fn(&[f32]) + Send + Sync + 'static) -> Subscription {
        self.hub.on_audio(callback)
    }

    pub fn on_spectrum(
        &self,
        callback: impl Fn(&SpectrumFrame) + Send + Sync + 'static,
    ) -> Subscription {
        self.hub.on_spectrum(callback)
    }

    pub fn on_signal(
        &self,
        callback: impl Fn(&SignalReading) + Send + Sync + 'static,
    ) -> Subscription {
        self.hub.on_signal(callback)
    }

    pub fn on_connection(&self, callback: impl Fn(&bool) + Send + Sync + 'static) -> Subscription {
        self.hub.on_connection(callback)
    }

    pub fn on_property(
        &self,
        callback: impl Fn(&PropertyUpdate) + Send + Sync + 'static,
    ) -> Subscription {
        self.hub.on_property(callback)
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.hub.unsubscribe(subscription)
    }
}

/// Owner of a session task. Dropping it shuts the session down.
pub struct Session {
    handle: SessionHandle,
    task: Option<JoinHandle<()>>,
}

impl Session {
    /// Session over a WebSocket to the configured device.
    /// Must be called from within a tokio runtime.
    pub fn new(config: &AppConfig) -> crate::Result<Self> {
        Self::with_connector(
            config.session.clone(),
            config.playback.clone(),
            WebSocketConnector::new(config.device.url()),
        )
    }

    /// Session over any transport. Fails on an invalid session or
    /// playback configuration.
    /// Must be called from within a tokio runtime.
    pub fn with_connector(
        session: SessionConfig,
        playback: PlaybackConfig,
        connector: impl Connector,
    ) -> crate::Result<Self> {
        session.validate()?;
        playback.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Arc::new(EventHub::default());
        let status = Arc::new(RwLock::new(SessionStatus::default()));
        let gain = Gain::new(playback.volume);
        let playback = Arc::new(playback);

        let driver = Driver {
            backoff: Backoff::new(session.reconnect_base(), session.reconnect_max()),
            config: session,
            playback_config: playback.clone(),
            connector: Box::new(connector),
            commands: rx,
            hub: hub.clone(),
            status: status.clone(),
            state: ConnectionState::Disconnected,
            wanted: false,
            transport: None,
            pending_connect: None,
            reconnect: None,
            poll: None,
            center_refresh: None,
            render: None,
            playback: None,
            demuxer: Demuxer::new(),
            alignment: PeakAlignment::new(),
            ingress: IngressDiagnostics::default(),
            text_logged: 0,
            spectrum_logged: 0,
        };

        let task = tokio::spawn(driver.run());

        Ok(Self {
            handle: SessionHandle {
                commands: tx,
                hub,
                status,
                playback_config: playback,
                gain: Arc::new(Mutex::new(gain)),
            },
            task: Some(task),
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Stop the session and wait for its task to finish
    pub async fn shutdown(mut self) {
        let _ = self.handle.command(Command::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Deref for Session {
    type Target = SessionHandle;

    fn deref(&self) -> &SessionHandle {
        &self.handle
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.handle.command(Command::Shutdown);
    }
}

/// Inbound audio rate, logged once per playback session
#[derive(Default)]
struct IngressDiagnostics {
    first_frame: Option<Instant>,
    frames: u64,
    samples: u64,
    reported: bool,
}

impl IngressDiagnostics {
    fn record(&mut self, samples: usize) {
        let first = *self.first_frame.get_or_insert_with(|| {
            tracing::info!("First audio frame: {} samples", samples);
            Instant::now()
        });
        self.frames += 1;
        self.samples += samples as u64;

        if !self.reported && self.frames > 10 {
            let elapsed = first.elapsed().as_secs_f64();
            if elapsed >= 2.0 {
                tracing::info!(
                    "Inbound audio rate: {:.0} samples/s (interleaved)",
                    self.samples as f64 / elapsed
                );
                self.reported = true;
            }
        }
    }
}

struct Driver {
    config: SessionConfig,
    playback_config: Arc<PlaybackConfig>,
    connector: Box<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    hub: Arc<EventHub>,
    status: Arc<RwLock<SessionStatus>>,

    state: ConnectionState,
    /// Connect requested and not since cancelled by disconnect
    wanted: bool,
    backoff: Backoff,
    transport: Option<TransportHandle>,
    pending_connect: Option<BoxFuture<'static, Result<TransportHandle, SessionError>>>,
    reconnect: Option<Pin<Box<Sleep>>>,
    poll: Option<Interval>,
    center_refresh: Option<Pin<Box<Sleep>>>,

    /// Block clock of an inline backend
    render: Option<Interval>,
    playback: Option<Box<dyn PlaybackBackend>>,

    demuxer: Demuxer,
    alignment: PeakAlignment,
    ingress: IngressDiagnostics,
    text_logged: usize,
    spectrum_logged: usize,
}

impl Driver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                result = wait_connect(&mut self.pending_connect) => {
                    self.pending_connect = None;
                    self.on_connect_result(result);
                }
                message = recv_inbound(&mut self.transport) => match message {
                    Some(message) => self.on_message(message),
                    None => self.on_transport_closed(),
                },
                _ = wait_sleep(&mut self.reconnect) => {
                    self.reconnect = None;
                    self.start_connect();
                }
                _ = wait_tick(&mut self.poll) => self.poll_signal(),
                _ = wait_sleep(&mut self.center_refresh) => {
                    self.center_refresh = None;
                    self.send(ControlMessage::get(Property::CenterFrequency));
                }
                _ = wait_tick(&mut self.render) => {
                    if let Some(playback) = self.playback.as_mut() {
                        playback.pull();
                        self.status.write().buffered = playback.buffered();
                    }
                }
            }
        }

        self.teardown();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                self.wanted = true;
                if self.state == ConnectionState::Disconnected {
                    self.backoff.reset();
                    self.start_connect();
                }
            }
            Command::Disconnect => self.disconnect(),
            Command::Send(message) => self.send(message),
            Command::StartPlayback(backend) => self.start_playback(backend),
            Command::StopPlayback => self.stop_playback(),
            Command::ResetPlayback => {
                if let Some(playback) = self.playback.as_mut() {
                    playback.reset();
                    self.status.write().buffered = playback.buffered();
                }
            }
            Command::SetGain(gain) => {
                if let Some(playback) = self.playback.as_mut() {
                    playback.set_gain(gain);
                }
            }
            Command::Shutdown => {}
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.status.write().state = state;
    }

    fn start_connect(&mut self) {
        // At most one live transport and one reconnect timer
        self.transport = None;
        self.reconnect = None;
        self.set_state(ConnectionState::Connecting);
        tracing::debug!("Connecting to device");
        self.pending_connect = Some(self.connector.connect());
    }

    fn on_connect_result(&mut self, result: Result<TransportHandle, SessionError>) {
        match result {
            Ok(transport) => {
                self.transport = Some(transport);
                self.on_connected();
            }
            Err(e) => {
                tracing::debug!("Connection attempt failed: {}", e);
                self.set_state(ConnectionState::Disconnected);
                self.schedule_reconnect();
            }
        }
    }

    fn on_connected(&mut self) {
        self.set_state(ConnectionState::Connected);
        self.backoff.reset();
        self.text_logged = 0;
        self.spectrum_logged = 0;
        tracing::info!("Connected to device");
        self.hub.connection.emit(&true);

        for property in Property::INITIAL_READS {
            self.send(ControlMessage::get(property));
        }

        // First tick fires immediately
        let mut poll = interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.poll = Some(poll);
    }

    fn on_transport_closed(&mut self) {
        let was_connected = self.state == ConnectionState::Connected;
        self.transport = None;
        self.poll = None;
        self.center_refresh = None;
        self.set_state(ConnectionState::Disconnected);

        if was_connected {
            tracing::info!("Device connection closed");
            self.hub.connection.emit(&false);
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if !self.wanted || self.reconnect.is_some() {
            return;
        }
        let delay = self.backoff.next_delay();
        tracing::debug!("Reconnecting in {:?}", delay);
        self.reconnect = Some(Box::pin(sleep(delay)));
    }

    fn disconnect(&mut self) {
        self.wanted = false;
        self.pending_connect = None;
        self.reconnect = None;
        self.poll = None;
        self.center_refresh = None;
        self.transport = None;
        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Disconnected from device");
        self.hub.connection.emit(&false);
    }

    fn poll_signal(&mut self) {
        for property in Property::POLLED {
            self.send(ControlMessage::get(property));
        }
    }

    fn send(&mut self, message: ControlMessage) {
        let Some(transport) = self.transport.as_ref() else {
            tracing::trace!("Not connected, dropping {:?}", message);
            return;
        };

        if transport.send(WireMessage::Text(message.to_json())).is_err() {
            tracing::trace!("Transport closing, dropping {:?}", message);
            return;
        }

        match &message {
            ControlMessage::SetProperty { property, .. }
                if property == Property::VfoFrequency.name() =>
            {
                // The device may recentre its span after a VFO change
                self.center_refresh = Some(Box::pin(sleep(self.config.center_refresh_delay())));
            }
            ControlMessage::SpectrumEnable { value: true } => self.alignment.reset(),
            _ => {}
        }
    }

    fn on_message(&mut self, message: WireMessage) {
        match message {
            WireMessage::Text(text) => self.on_text(&text),
            WireMessage::Binary(data) => self.on_binary(data),
        }
    }

    fn on_text(&mut self, text: &str) {
        let message = match ControlMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("Discarding control frame: {}", e);
                return;
            }
        };

        let is_response = matches!(message, ControlMessage::GetPropertyResponse { .. });
        if self.text_logged < TEXT_LOG_LIMIT || is_response {
            tracing::debug!("Control frame: {}", text);
            self.text_logged += 1;
        }

        let Some((property, value)) = message.property_report() else {
            return;
        };

        let reading = self.status.write().properties.apply(property, value);
        self.hub.property.emit(&PropertyUpdate {
            property: property.to_string(),
            value: value.to_string(),
        });

        match reading {
            Ok(Some(reading)) => self.hub.signal.emit(&reading),
            Ok(None) => {}
            Err(e) => tracing::debug!("Ignoring property value: {}", e),
        }
    }

    fn on_binary(&mut self, data: bytes::Bytes) {
        match self.demuxer.demux(data) {
            Frame::Spectrum(mut frame) => {
                if self.spectrum_logged < SPECTRUM_LOG_LIMIT {
                    tracing::debug!("Spectrum frame: {} bins", frame.bins.len());
                    self.spectrum_logged += 1;
                }
                frame.peak_shift = self.alignment.observe(&frame.bins);
                self.hub.spectrum.emit(&frame);
            }
            Frame::Audio(frame) => {
                tracing::trace!("Audio frame {}: {} samples", frame.sequence, frame.samples.len());
                if self.playback.is_none() && self.hub.audio.is_empty() {
                    return;
                }

                self.ingress.record(frame.samples.len());
                let mono = frame.to_mono(self.playback_config.input_channels);
                self.hub.audio.emit(&mono);
                if let Some(playback) = self.playback.as_mut() {
                    playback.push(mono);
                    self.status.write().buffered = playback.buffered();
                }
            }
        }
    }

    fn start_playback(&mut self, backend: Box<dyn PlaybackBackend>) {
        self.stop_playback();

        let kind = backend.kind();
        self.render = backend.block_interval().map(|period| {
            let mut render = interval(period);
            render.set_missed_tick_behavior(MissedTickBehavior::Skip);
            render
        });
        self.playback = Some(backend);
        self.ingress = IngressDiagnostics::default();
        self.status.write().backend = Some(kind);
        tracing::info!("Playback started ({} backend)", kind);
    }

    fn stop_playback(&mut self) {
        if let Some(mut playback) = self.playback.take() {
            playback.stop();
            tracing::info!("Playback stopped ({} backend)", playback.kind());
        }
        self.render = None;
        let mut status = self.status.write();
        status.backend = None;
        status.buffered = 0;
    }

    fn teardown(&mut self) {
        self.stop_playback();
        self.wanted = false;
        self.pending_connect = None;
        self.reconnect = None;
        self.poll = None;
        self.center_refresh = None;
        self.transport = None;
        self.set_state(ConnectionState::Disconnected);
        tracing::debug!("Session task finished");
    }
}

async fn wait_connect(
    pending_connect: &mut Option<BoxFuture<'static, Result<TransportHandle, SessionError>>>,
) -> Result<TransportHandle, SessionError> {
    match pending_connect {
        Some(future) => future.await,
        None => pending().await,
    }
}

async fn recv_inbound(transport: &mut Option<TransportHandle>) -> Option<WireMessage> {
    match transport {
        Some(transport) => transport.inbound.recv().await,
        None => pending().await,
    }
}

async fn wait_sleep(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

async fn wait_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_cache_last_write_wins() {
        let mut props = DeviceProperties::default();
        props.apply("device_center_frequency", "9500000").unwrap();
        props.apply("device_center_frequency", "9600000").unwrap();
        assert_eq!(props.center_frequency, Some(9_600_000.0));
    }

    #[test]
    fn test_signal_properties_yield_readings() {
        let mut props = DeviceProperties::default();
        let reading = props.apply("signal_power", "-83.2").unwrap().unwrap();
        assert_eq!(reading.power, Some(-83.2));
        assert_eq!(reading.snr, None);

        let reading = props.apply("signal_snr", "12").unwrap().unwrap();
        assert_eq!(reading.snr, Some(12.0));
        assert_eq!(props.signal_power, Some(-83.2));
    }

    #[test]
    fn test_unknown_and_invalid_properties() {
        let mut props = DeviceProperties::default();
        assert_eq!(props.apply("volume", "3").unwrap(), None);
        assert!(props.apply("filter_bandwidth", "wide").is_err());
        assert_eq!(props.filter_bandwidth, None);

        props.apply("demodulator", "USB").unwrap();
        assert_eq!(props.demod_mode(), Some(DemodMode::Usb));
    }
}
