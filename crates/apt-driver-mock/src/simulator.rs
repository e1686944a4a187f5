//! Simulated APT controller on an in-memory byte stream.
//!
//! [`SimulatedController`] implements [`SerialLink`], so sessions and discovery
//! probes run against it unchanged. Frames written by the host are parsed with
//! the real codec and answered the way a controller does:
//!
//! - info requests return an 84-byte hardware identity
//! - position, encoder and status requests return fixed-layout replies
//! - homing and absolute moves produce a homed / move-completed confirmation,
//!   but only when the channel is enabled
//! - after 50 commands without a keep-alive, confirmations stop
//!
//! Clones share state, so a test keeps one handle for inspection and hands
//! another to the session.

use crate::mode::SimMode;
use apt_core::limits::KEEP_ALIVE_INTERVAL;
use apt_core::serial::SerialLink;
use apt_protocol::message::{encode_long, encode_short, Message, HOST_ADDRESS};
use apt_protocol::{ids, DeviceInfo};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant;

/// Status bits reported in DC status updates and move-completed payloads.
pub mod status_bits {
    /// Motor moving forward
    pub const MOVING_FORWARD: u32 = 0x0000_0010;
    /// Motor moving in reverse
    pub const MOVING_REVERSE: u32 = 0x0000_0020;
    /// Homing in progress
    pub const HOMING: u32 = 0x0000_0200;
    /// Homing completed
    pub const HOMED: u32 = 0x0000_0400;
    /// Channel enabled
    pub const ENABLED: u32 = 0x8000_0000;
}

// =============================================================================
// Configuration
// =============================================================================

/// Behavior of a simulated controller.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Identity returned for info requests
    pub info: DeviceInfo,
    /// When false the controller records frames but never answers
    pub responsive: bool,
    /// Channels start enabled
    pub enabled_at_start: bool,
    /// Suppress confirmations until a no-flash-programming message arrives
    pub require_initialization: bool,
    /// Motion timing
    pub mode: SimMode,
    /// Starting position of every channel, in device units
    pub initial_position: i32,
    /// Raw velocity field reported while moving
    pub moving_velocity_raw: u16,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::kdc101(27_000_001)
    }
}

impl SimConfig {
    /// Single-channel compact DC servo controller.
    pub fn kdc101(serial_number: u32) -> Self {
        Self::with_info(DeviceInfo {
            serial_number,
            model: "KDC101".to_string(),
            hardware_type: 16,
            firmware_version: 0x0003_0A02,
            notes: "Brushed DC Controller".to_string(),
            hardware_version: 1,
            mod_state: 0,
            channel_count: 1,
        })
    }

    /// Two-bay benchtop stepper controller.
    pub fn bsc202(serial_number: u32) -> Self {
        Self::with_info(DeviceInfo {
            serial_number,
            model: "BSC202".to_string(),
            hardware_type: 45,
            firmware_version: 0x0001_0700,
            notes: "Benchtop Stepper Controller".to_string(),
            hardware_version: 3,
            mod_state: 0,
            channel_count: 2,
        })
    }

    /// A port with nothing attached: frames are swallowed, nothing comes back.
    pub fn silent() -> Self {
        Self {
            responsive: false,
            ..Self::default()
        }
    }

    fn with_info(info: DeviceInfo) -> Self {
        Self {
            info,
            responsive: true,
            enabled_at_start: false,
            require_initialization: false,
            mode: SimMode::Instant,
            initial_position: 0,
            moving_velocity_raw: 2048,
        }
    }

    /// Start with every channel enabled.
    pub fn enabled(mut self) -> Self {
        self.enabled_at_start = true;
        self
    }

    /// Withhold confirmations until the host initializes the controller.
    pub fn requiring_initialization(mut self) -> Self {
        self.require_initialization = true;
        self
    }

    /// Use the given timing mode.
    pub fn with_mode(mut self, mode: SimMode) -> Self {
        self.mode = mode;
        self
    }

    /// Start every channel at `position` device units.
    pub fn at_position(mut self, position: i32) -> Self {
        self.initial_position = position;
        self
    }
}

// =============================================================================
// Internal State
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Motion {
    from: i32,
    to: i32,
    started: Instant,
    duration: Duration,
    homing: bool,
}

impl Motion {
    fn position_at(&self, now: Instant) -> i32 {
        let elapsed = now.saturating_duration_since(self.started);
        if self.duration.is_zero() || elapsed >= self.duration {
            return self.to;
        }
        let fraction = elapsed.as_secs_f64() / self.duration.as_secs_f64();
        let delta = f64::from(self.to) - f64::from(self.from);
        (f64::from(self.from) + delta * fraction).round() as i32
    }

    fn finished(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= self.duration
    }
}

#[derive(Debug, Clone, Default)]
struct ChannelState {
    enabled: bool,
    homed: bool,
    position: i32,
    motion: Option<Motion>,
}

impl ChannelState {
    fn settle(&mut self, now: Instant) {
        if let Some(motion) = self.motion {
            if motion.finished(now) {
                self.position = motion.to;
                if motion.homing {
                    self.homed = true;
                }
                self.motion = None;
            }
        }
    }

    fn position_at(&self, now: Instant) -> i32 {
        self.motion
            .map_or(self.position, |motion| motion.position_at(now))
    }

    fn start_motion(&mut self, to: i32, duration: Duration, homing: bool, now: Instant) {
        let from = self.position_at(now);
        self.motion = Some(Motion {
            from,
            to,
            started: now,
            duration,
            homing,
        });
        if homing {
            self.homed = false;
        }
        self.settle(now);
    }

    fn status_bits(&self, now: Instant) -> u32 {
        let mut bits = 0;
        if self.enabled {
            bits |= status_bits::ENABLED;
        }
        if self.homed {
            bits |= status_bits::HOMED;
        }
        if let Some(motion) = self.motion.filter(|m| !m.finished(now)) {
            bits |= if motion.homing {
                status_bits::HOMING
            } else if motion.to >= motion.from {
                status_bits::MOVING_FORWARD
            } else {
                status_bits::MOVING_REVERSE
            };
        }
        bits
    }
}

/// Bytes to emit after a delay.
struct Scheduled {
    delay: Duration,
    bytes: Vec<u8>,
}

struct SimState {
    config: SimConfig,
    channels: HashMap<u8, ChannelState>,
    inbound: Vec<u8>,
    outbound: VecDeque<u8>,
    received: Vec<Message>,
    commands_since_keep_alive: u32,
    initialized: bool,
    identify_count: usize,
    bytes_delivered: usize,
    disconnected: bool,
    read_waker: Option<Waker>,
}

impl SimState {
    fn new(config: SimConfig) -> Self {
        Self {
            config,
            channels: HashMap::new(),
            inbound: Vec::new(),
            outbound: VecDeque::new(),
            received: Vec::new(),
            commands_since_keep_alive: 0,
            initialized: false,
            identify_count: 0,
            bytes_delivered: 0,
            disconnected: false,
            read_waker: None,
        }
    }

    fn channel(&mut self, destination: u8) -> &mut ChannelState {
        let enabled = self.config.enabled_at_start;
        let position = self.config.initial_position;
        self.channels
            .entry(destination)
            .or_insert_with(|| ChannelState {
                enabled,
                position,
                ..Default::default()
            })
    }

    fn deliver(&mut self, bytes: &[u8]) {
        self.outbound.extend(bytes.iter().copied());
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
    }

    fn starved(&self) -> bool {
        self.commands_since_keep_alive >= KEEP_ALIVE_INTERVAL
    }

    fn confirmations_allowed(&self) -> bool {
        !self.starved() && (self.initialized || !self.config.require_initialization)
    }

    /// Parse every complete frame in the inbound buffer and react to it.
    fn process_inbound(&mut self) -> Vec<Scheduled> {
        let mut scheduled = Vec::new();
        while let Some((message, used)) = Message::try_parse(&self.inbound) {
            self.inbound.drain(..used);
            if let Some(item) = self.handle(&message) {
                scheduled.push(item);
            }
            self.received.push(message);
        }
        scheduled
    }

    fn handle(&mut self, message: &Message) -> Option<Scheduled> {
        if message.message_id == ids::MOT_ACK_DCSTATUSUPDATE {
            self.commands_since_keep_alive = 0;
            return None;
        }
        self.commands_since_keep_alive += 1;
        if self.starved() {
            tracing::trace!(
                count = self.commands_since_keep_alive,
                "Simulated controller starved of keep-alives"
            );
        }

        if !self.config.responsive {
            return None;
        }

        let now = Instant::now();
        let destination = message.destination;

        match message.message_id {
            ids::HW_REQ_INFO => {
                let payload = self.config.info.encode_payload();
                let reply = encode_long(ids::HW_GET_INFO, HOST_ADDRESS, destination, &payload);
                self.deliver(&reply);
            }
            ids::HW_NO_FLASH_PROGRAMMING => self.initialized = true,
            ids::MOD_SET_CHANENABLESTATE => {
                let enable = message.param2 == 0x01;
                let channel = self.channel(destination);
                channel.settle(now);
                channel.enabled = enable;
            }
            ids::MOD_IDENTIFY => self.identify_count += 1,
            ids::MOT_MOVE_HOME => {
                let duration = self.config.mode.homing_time();
                let confirm = self.confirmations_allowed();
                let channel = self.channel(destination);
                channel.settle(now);
                if !channel.enabled {
                    return None;
                }
                channel.start_motion(0, duration, true, now);
                if confirm {
                    return Some(Scheduled {
                        delay: duration,
                        bytes: encode_short(
                            ids::MOT_MOVE_HOMED,
                            message.param1,
                            0,
                            HOST_ADDRESS,
                            destination,
                        )
                        .to_vec(),
                    });
                }
            }
            ids::MOT_MOVE_ABSOLUTE => {
                let payload = message.payload.as_deref().unwrap_or_default();
                if payload.len() < 6 {
                    tracing::debug!(len = payload.len(), "Ignoring short move payload");
                    return None;
                }
                let ident = u16::from_le_bytes([payload[0], payload[1]]);
                let target = i32::from_le_bytes([payload[2], payload[3], payload[4], payload[5]]);
                let mode = self.config.mode;
                let confirm = self.confirmations_allowed();
                let channel = self.channel(destination);
                channel.settle(now);
                if !channel.enabled {
                    return None;
                }
                let duration = mode.travel_time(
                    i64::from(target) - i64::from(channel.position_at(now)),
                );
                channel.start_motion(target, duration, false, now);
                let bits = channel.status_bits(now + duration) & !status_bits::HOMING;
                if confirm {
                    let body = status_payload(ident, target, 0, bits);
                    return Some(Scheduled {
                        delay: duration,
                        bytes: encode_long(ids::MOT_MOVE_COMPLETED, HOST_ADDRESS, destination, &body),
                    });
                }
            }
            ids::MOT_REQ_POSCOUNTER | ids::MOT_REQ_ENCCOUNTER => {
                let reply_id = if message.message_id == ids::MOT_REQ_POSCOUNTER {
                    ids::MOT_GET_POSCOUNTER
                } else {
                    ids::MOT_GET_ENCCOUNTER
                };
                let channel = self.channel(destination);
                channel.settle(now);
                let mut body = Vec::with_capacity(6);
                body.extend_from_slice(&u16::from(message.param1).to_le_bytes());
                body.extend_from_slice(&channel.position_at(now).to_le_bytes());
                let reply = encode_long(reply_id, HOST_ADDRESS, destination, &body);
                self.deliver(&reply);
            }
            ids::MOT_REQ_DCSTATUSUPDATE => {
                let moving_raw = self.config.moving_velocity_raw;
                let channel = self.channel(destination);
                channel.settle(now);
                let moving = channel.motion.is_some();
                let body = status_payload(
                    u16::from(message.param1),
                    channel.position_at(now),
                    if moving { moving_raw } else { 0 },
                    channel.status_bits(now),
                );
                let reply = encode_long(ids::MOT_GET_DCSTATUSUPDATE, HOST_ADDRESS, destination, &body);
                self.deliver(&reply);
            }
            other => {
                tracing::debug!(
                    message_id = %format!("0x{:04X}", other),
                    "Simulated controller ignoring message"
                );
            }
        }
        None
    }
}

fn status_payload(channel: u16, position: i32, velocity: u16, bits: u32) -> Vec<u8> {
    let mut body = Vec::with_capacity(14);
    body.extend_from_slice(&channel.to_le_bytes());
    body.extend_from_slice(&position.to_le_bytes());
    body.extend_from_slice(&velocity.to_le_bytes());
    body.extend_from_slice(&0u16.to_le_bytes());
    body.extend_from_slice(&bits.to_le_bytes());
    body
}

// =============================================================================
// SimulatedController
// =============================================================================

/// In-memory APT controller.
///
/// # Example
///
/// ```rust,ignore
/// let sim = SimulatedController::new(SimConfig::kdc101(27_000_001).enabled());
/// let mut session = ControllerSession::new(sim.clone(), topology, scale, options);
/// session.move_absolute(25.0, 1, true).await?;
/// assert_eq!(sim.position(0x50), 50_000);
/// ```
#[derive(Clone)]
pub struct SimulatedController {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SimulatedController {
    /// Create a controller with the given behavior.
    pub fn new(config: SimConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(config))),
        }
    }

    /// Identity returned for info requests.
    pub fn info(&self) -> DeviceInfo {
        self.state.lock().config.info.clone()
    }

    /// Every frame received from the host, in order.
    pub fn received(&self) -> Vec<Message> {
        self.state.lock().received.clone()
    }

    /// Received frames carrying `message_id`.
    pub fn frames_with_id(&self, message_id: u16) -> Vec<Message> {
        self.state
            .lock()
            .received
            .iter()
            .filter(|m| m.message_id == message_id)
            .cloned()
            .collect()
    }

    /// Number of received frames carrying `message_id`.
    pub fn count_of(&self, message_id: u16) -> usize {
        self.state
            .lock()
            .received
            .iter()
            .filter(|m| m.message_id == message_id)
            .count()
    }

    /// Forget the received frame log.
    pub fn clear_received(&self) {
        self.state.lock().received.clear();
    }

    /// Current position of the channel behind `destination`, in device units.
    pub fn position(&self, destination: u8) -> i32 {
        let now = Instant::now();
        let mut state = self.state.lock();
        let channel = state.channel(destination);
        channel.settle(now);
        channel.position_at(now)
    }

    /// Whether the channel behind `destination` is enabled.
    pub fn is_enabled(&self, destination: u8) -> bool {
        self.state.lock().channel(destination).enabled
    }

    /// Whether the channel behind `destination` has completed homing.
    pub fn is_homed(&self, destination: u8) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        let channel = state.channel(destination);
        channel.settle(now);
        channel.homed
    }

    /// Whether the channel behind `destination` is still travelling.
    pub fn is_moving(&self, destination: u8) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        let channel = state.channel(destination);
        channel.settle(now);
        channel.motion.is_some()
    }

    /// Whether a no-flash-programming message has been received.
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Number of identify requests received.
    pub fn identify_count(&self) -> usize {
        self.state.lock().identify_count
    }

    /// Non-keep-alive commands received since the last keep-alive.
    pub fn commands_since_keep_alive(&self) -> u32 {
        self.state.lock().commands_since_keep_alive
    }

    /// Whether the keep-alive limit has been exceeded.
    pub fn is_starved(&self) -> bool {
        self.state.lock().starved()
    }

    /// Total bytes the host has read.
    pub fn bytes_delivered(&self) -> usize {
        self.state.lock().bytes_delivered
    }

    /// Bytes queued for the host but not yet read.
    pub fn pending_output(&self) -> usize {
        self.state.lock().outbound.len()
    }

    /// Queue raw bytes for the host, as if the controller had sent them.
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.state.lock().deliver(bytes);
    }

    /// Start or stop answering requests.
    pub fn set_responsive(&self, responsive: bool) {
        self.state.lock().config.responsive = responsive;
    }

    /// Simulate the cable being pulled: reads hit EOF, writes fail.
    pub fn disconnect(&self) {
        let mut state = self.state.lock();
        state.disconnected = true;
        if let Some(waker) = state.read_waker.take() {
            waker.wake();
        }
    }

    fn schedule(&self, items: Vec<Scheduled>) {
        for item in items {
            if item.delay.is_zero() {
                self.state.lock().deliver(&item.bytes);
                continue;
            }
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let state = Arc::clone(&self.state);
                    handle.spawn(async move {
                        tokio::time::sleep(item.delay).await;
                        let mut state = state.lock();
                        if !state.disconnected {
                            state.deliver(&item.bytes);
                        }
                    });
                }
                Err(_) => self.state.lock().deliver(&item.bytes),
            }
        }
    }
}

impl AsyncRead for SimulatedController {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut state = self.state.lock();
        if state.disconnected {
            return Poll::Ready(Ok(()));
        }
        if state.outbound.is_empty() {
            state.read_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }

        let n = state.outbound.len().min(buf.remaining());
        let chunk: Vec<u8> = state.outbound.drain(..n).collect();
        buf.put_slice(&chunk);
        state.bytes_delivered += n;
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for SimulatedController {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let scheduled = {
            let mut state = self.state.lock();
            if state.disconnected {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "simulated controller disconnected",
                )));
            }
            state.inbound.extend_from_slice(buf);
            state.process_inbound()
        };
        self.schedule(scheduled);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl SerialLink for SimulatedController {
    fn clear_buffers(&mut self) -> io::Result<()> {
        let mut state = self.state.lock();
        state.outbound.clear();
        state.inbound.clear();
        Ok(())
    }
}
