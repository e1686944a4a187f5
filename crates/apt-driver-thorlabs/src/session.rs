//! Controller session over one serial connection.
//!
//! A [`ControllerSession`] owns its link exclusively; every operation takes
//! `&mut self`, so two commands can never interleave on the wire. Operations
//! resolve the destination byte from the session topology, send one or more
//! frames, and for motion requests optionally wait for the confirmation id.
//!
//! # Keep-alive
//!
//! Controllers stop emitting confirmations after 50 commands without a
//! MOT_ACK_DCSTATUSUPDATE. The session counts every non-keep-alive frame and
//! sends a keep-alive on its own before the count can reach that limit, on top
//! of the keep-alive each operation already ends with.
//!
//! # Confirmation waits
//!
//! `home` and `move_absolute` with `wait = true` read 2-byte chunks until the
//! homed / move-completed id arrives. The wait is bounded by
//! [`SessionOptions::confirmation_timeout`] and can be aborted from another task
//! through a [`CancelHandle`]. Buffers are flushed and a keep-alive sent before
//! any outcome is returned.

use crate::port_claims::{claim_port, PortClaim};
use apt_core::error::{AptError, AptResult};
use apt_core::limits::{
    DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_ENABLE_SETTLE, DEFAULT_READ_TIMEOUT, KEEP_ALIVE_INTERVAL,
    MIN_READ_TIMEOUT,
};
use apt_core::serial::{
    open_serial_async, read_exact_timeout, DynLink, SerialLink, SerialSettings,
};
use apt_core::units::{status_velocity, ScaleFactors};
use apt_protocol::address::{
    destination_for, identify_target, ControllerTopology, CHANNEL_1,
};
use apt_protocol::message::{move_absolute_payload, Message, HOST_ADDRESS};
use apt_protocol::{ids, CounterReply, StatusReply};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::instrument;

/// MOD_SET_CHANENABLESTATE param2 values.
const CHANNEL_ENABLED: u8 = 0x01;
const CHANNEL_DISABLED: u8 = 0x02;

// =============================================================================
// Options
// =============================================================================

/// Tunables fixed at session creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Source byte stamped on every frame (the host address)
    pub source: u8,
    /// Deadline for a fixed-size reply, and the poll window of confirmation waits
    pub read_timeout: Duration,
    /// Upper bound on a confirmation wait; `None` waits until cancelled
    pub confirmation_timeout: Option<Duration>,
    /// Pause after an enable/disable request before flushing
    pub enable_settle: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            source: HOST_ADDRESS,
            read_timeout: DEFAULT_READ_TIMEOUT,
            confirmation_timeout: Some(DEFAULT_CONFIRMATION_TIMEOUT),
            enable_settle: DEFAULT_ENABLE_SETTLE,
        }
    }
}

impl SessionOptions {
    /// Override the confirmation wait bound.
    pub fn with_confirmation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    /// Override the per-reply read timeout, clamped to [`MIN_READ_TIMEOUT`].
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout.max(MIN_READ_TIMEOUT);
        self
    }

    /// Override the enable/disable settle pause.
    pub fn with_enable_settle(mut self, settle: Duration) -> Self {
        self.enable_settle = settle;
        self
    }
}

// =============================================================================
// Cancellation
// =============================================================================

/// Aborts a confirmation wait from another task.
///
/// A cancel issued while no wait is running aborts the next one.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Request that the current (or next) confirmation wait stop.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

// =============================================================================
// Status
// =============================================================================

/// Decoded DC status update in physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusReport {
    /// Channel ident echoed by the controller
    pub channel: u16,
    /// Position, scaled by the position factor
    pub position: f64,
    /// Velocity, scaled by the fixed status divisor
    pub velocity: f64,
    /// Raw status bits; not interpreted
    pub status_bits: u32,
}

impl StatusReport {
    fn from_reply(reply: &StatusReply, scale: &ScaleFactors) -> Self {
        Self {
            channel: reply.channel,
            position: scale.position_from_device(reply.position),
            velocity: status_velocity(reply.velocity),
            status_bits: reply.status_bits,
        }
    }
}

// =============================================================================
// ControllerSession
// =============================================================================

/// One open connection to one physical controller.
pub struct ControllerSession<L: SerialLink> {
    link: L,
    topology: ControllerTopology,
    scale: ScaleFactors,
    options: SessionOptions,
    commands_since_keep_alive: u32,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
    label: String,
    _claim: Option<PortClaim>,
}

impl<L: SerialLink> std::fmt::Debug for ControllerSession<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerSession")
            .field("label", &self.label)
            .field("topology", &self.topology)
            .field("scale", &self.scale)
            .field("commands_since_keep_alive", &self.commands_since_keep_alive)
            .finish_non_exhaustive()
    }
}

impl ControllerSession<tokio_serial::SerialStream> {
    /// Open `port` at the APT line settings and start a session on it.
    ///
    /// # Errors
    ///
    /// [`AptError::PortInUse`] if a probe or another session holds the port,
    /// [`AptError::PortOpen`] if the port cannot be opened.
    pub async fn open(
        port: &str,
        topology: ControllerTopology,
        scale: ScaleFactors,
        options: SessionOptions,
    ) -> AptResult<Self> {
        let claim = claim_port(port)?;
        let settings = SerialSettings::default().with_read_timeout(options.read_timeout);
        let link = open_serial_async(port, &settings).await?;

        let mut session = Self::new(link, topology, scale, options).with_label(port);
        session._claim = Some(claim);
        tracing::info!(port, %topology, "Opened APT controller session");
        Ok(session)
    }
}

impl<L: SerialLink + 'static> ControllerSession<L> {
    /// Erase the link type, keeping the port claim and keep-alive count.
    pub fn boxed(self) -> ControllerSession<DynLink> {
        ControllerSession {
            link: Box::new(self.link),
            topology: self.topology,
            scale: self.scale,
            options: self.options,
            commands_since_keep_alive: self.commands_since_keep_alive,
            cancel_tx: self.cancel_tx,
            cancel_rx: self.cancel_rx,
            label: self.label,
            _claim: self._claim,
        }
    }
}

impl<L: SerialLink> ControllerSession<L> {
    /// Start a session on an already open link.
    pub fn new(
        link: L,
        topology: ControllerTopology,
        scale: ScaleFactors,
        options: SessionOptions,
    ) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            link,
            topology,
            scale,
            options,
            commands_since_keep_alive: 0,
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
            label: "link".to_string(),
            _claim: None,
        }
    }

    /// Name used in log fields (usually the port path).
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Log label of this session.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Topology fixed at creation.
    pub fn topology(&self) -> ControllerTopology {
        self.topology
    }

    /// Scale factors fixed at creation.
    pub fn scale(&self) -> &ScaleFactors {
        &self.scale
    }

    /// Options fixed at creation.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Non-keep-alive frames sent since the last keep-alive.
    pub fn commands_since_keep_alive(&self) -> u32 {
        self.commands_since_keep_alive
    }

    /// Handle that aborts confirmation waits on this session.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel_tx),
        }
    }

    // -------------------------------------------------------------------------
    // Low-level transmission
    // -------------------------------------------------------------------------

    /// Send one frame, injecting a keep-alive first if the limit is near.
    pub async fn send_message(&mut self, message: &Message) -> AptResult<()> {
        let is_keep_alive = message.message_id == ids::MOT_ACK_DCSTATUSUPDATE;

        if !is_keep_alive && self.commands_since_keep_alive + 1 >= KEEP_ALIVE_INTERVAL {
            tracing::debug!(
                port = %self.label,
                count = self.commands_since_keep_alive,
                "Injecting keep-alive before command limit"
            );
            let keep_alive = Message::short(
                ids::MOT_ACK_DCSTATUSUPDATE,
                0,
                0,
                message.destination,
                self.options.source,
            );
            self.write_frame(&keep_alive).await?;
            self.commands_since_keep_alive = 0;
        }

        self.write_frame(message).await?;
        if is_keep_alive {
            self.commands_since_keep_alive = 0;
        } else {
            self.commands_since_keep_alive += 1;
        }
        Ok(())
    }

    async fn write_frame(&mut self, message: &Message) -> AptResult<()> {
        let bytes = message.encode();
        tracing::trace!(
            port = %self.label,
            message = ids::name(message.message_id),
            destination = message.destination,
            len = bytes.len(),
            "APT tx"
        );
        self.link.write_all(&bytes).await?;
        self.link.flush().await?;
        Ok(())
    }

    async fn send_short(&mut self, message_id: u16, param1: u8, param2: u8, destination: u8) -> AptResult<()> {
        let message = Message::short(message_id, param1, param2, destination, self.options.source);
        self.send_message(&message).await
    }

    /// Discard everything buffered on the link in both directions.
    pub fn flush_buffers(&mut self) -> AptResult<()> {
        self.link.clear_buffers()?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    /// Send the info request and no-flash-programming message.
    ///
    /// Controllers only emit homed / move-completed confirmations once this
    /// has been done. No reply is awaited.
    #[instrument(skip(self), fields(port = %self.label))]
    pub async fn initialize(&mut self, channel: u8) -> AptResult<()> {
        let destination = destination_for(self.topology, channel);
        self.send_short(ids::HW_REQ_INFO, 0, 0, destination).await?;
        self.flush_buffers()?;
        self.send_short(ids::HW_NO_FLASH_PROGRAMMING, 0, 0, destination)
            .await?;
        self.flush_buffers()?;
        tracing::debug!(destination, "Controller initialized");
        Ok(())
    }

    /// Power the motor of `channel`.
    ///
    /// Rack controllers get the request twice; a single one is not always
    /// honored by those units.
    #[instrument(skip(self), fields(port = %self.label, topology = %self.topology))]
    pub async fn enable(&mut self, channel: u8) -> AptResult<()> {
        let rounds = self.enable_rounds();
        for _ in 0..rounds {
            self.set_enable_state(channel, CHANNEL_1, CHANNEL_ENABLED)
                .await?;
        }
        tracing::info!(channel, "Channel enabled");
        Ok(())
    }

    /// Remove motor power from `channel`.
    ///
    /// The first request carries the channel number in param1, the rack
    /// repeat carries channel ident 1.
    #[instrument(skip(self), fields(port = %self.label, topology = %self.topology))]
    pub async fn disable(&mut self, channel: u8) -> AptResult<()> {
        self.set_enable_state(channel, channel, CHANNEL_DISABLED)
            .await?;
        if self.topology == ControllerTopology::Rack {
            self.set_enable_state(channel, CHANNEL_1, CHANNEL_DISABLED)
                .await?;
        }
        tracing::info!(channel, "Channel disabled");
        Ok(())
    }

    fn enable_rounds(&self) -> usize {
        match self.topology {
            ControllerTopology::Compact => 1,
            ControllerTopology::Rack => 2,
        }
    }

    async fn set_enable_state(&mut self, channel: u8, param1: u8, state: u8) -> AptResult<()> {
        let destination = destination_for(self.topology, channel);
        self.send_short(ids::MOD_SET_CHANENABLESTATE, param1, state, destination)
            .await?;
        tokio::time::sleep(self.options.enable_settle).await;
        self.flush_buffers()?;
        self.keep_alive(channel).await
    }

    /// Blink the front-panel LED of the controller (or rack bay).
    #[instrument(skip(self), fields(port = %self.label, topology = %self.topology))]
    pub async fn identify(&mut self, channel: u8) -> AptResult<()> {
        let (param1, destination) = identify_target(self.topology, channel);
        self.send_short(ids::MOD_IDENTIFY, param1, 0, destination)
            .await?;
        self.keep_alive(channel).await?;
        self.flush_buffers()
    }

    /// Send the keep-alive acknowledgment to `channel`'s destination.
    pub async fn keep_alive(&mut self, channel: u8) -> AptResult<()> {
        let destination = destination_for(self.topology, channel);
        self.send_short(ids::MOT_ACK_DCSTATUSUPDATE, 0, 0, destination)
            .await
    }

    /// Start homing `channel`; with `wait`, return once the homed id is read.
    ///
    /// # Errors
    ///
    /// With `wait`, [`AptError::NoConfirmation`] when the bound elapses and
    /// [`AptError::Cancelled`] when a [`CancelHandle`] fires.
    #[instrument(skip(self), fields(port = %self.label, topology = %self.topology))]
    pub async fn home(&mut self, channel: u8, wait: bool) -> AptResult<()> {
        let destination = destination_for(self.topology, channel);
        self.send_short(ids::MOT_MOVE_HOME, CHANNEL_1, 0, destination)
            .await?;

        let outcome = if wait {
            self.wait_for_confirmation(ids::MOT_MOVE_HOMED).await
        } else {
            Ok(())
        };
        self.finish_motion(channel, outcome).await
    }

    /// Move `channel` to `position` physical units.
    ///
    /// The target is `round(position * scale.position)` device units and is
    /// range-checked before anything is written.
    #[instrument(skip(self), fields(port = %self.label, topology = %self.topology))]
    pub async fn move_absolute(&mut self, position: f64, channel: u8, wait: bool) -> AptResult<()> {
        let target = self.scale.position_to_device(position)?;
        let destination = destination_for(self.topology, channel);

        let message = Message::long(
            ids::MOT_MOVE_ABSOLUTE,
            destination,
            self.options.source,
            move_absolute_payload(u16::from(CHANNEL_1), target).to_vec(),
        );
        self.send_message(&message).await?;
        tracing::debug!(target_device_units = target, "Move started");

        let outcome = if wait {
            self.wait_for_confirmation(ids::MOT_MOVE_COMPLETED).await
        } else {
            Ok(())
        };
        self.finish_motion(channel, outcome).await
    }

    async fn finish_motion(&mut self, channel: u8, outcome: AptResult<()>) -> AptResult<()> {
        let flushed = self.flush_buffers();
        let kept_alive = self.keep_alive(channel).await;
        outcome?;
        flushed?;
        kept_alive
    }

    /// Current position of `channel` in physical units.
    #[instrument(skip(self), fields(port = %self.label))]
    pub async fn get_position(&mut self, channel: u8) -> AptResult<f64> {
        let reply = self
            .request(channel, ids::MOT_REQ_POSCOUNTER, CounterReply::LEN)
            .await?;
        let counter = CounterReply::parse_position(&reply)?;
        Ok(self.scale.position_from_device(counter.count))
    }

    /// Encoder count of `channel`, divided by the position factor.
    #[instrument(skip(self), fields(port = %self.label))]
    pub async fn get_encoder_count(&mut self, channel: u8) -> AptResult<f64> {
        let reply = self
            .request(channel, ids::MOT_REQ_ENCCOUNTER, CounterReply::LEN)
            .await?;
        let counter = CounterReply::parse_encoder(&reply)?;
        Ok(self.scale.position_from_device(counter.count))
    }

    /// `(position, velocity)` of `channel` from a DC status update.
    pub async fn get_status(&mut self, channel: u8) -> AptResult<(f64, f64)> {
        let report = self.get_status_report(channel).await?;
        Ok((report.position, report.velocity))
    }

    /// Full DC status update of `channel`, status bits included.
    #[instrument(skip(self), fields(port = %self.label))]
    pub async fn get_status_report(&mut self, channel: u8) -> AptResult<StatusReport> {
        let reply = self
            .request(channel, ids::MOT_REQ_DCSTATUSUPDATE, StatusReply::LEN)
            .await?;
        let status = StatusReply::parse(&reply)?;
        Ok(StatusReport::from_reply(&status, &self.scale))
    }

    /// Flush, send a request, read a fixed-size reply, keep-alive, flush.
    ///
    /// The keep-alive and final flush run even when the read fails.
    async fn request(&mut self, channel: u8, message_id: u16, reply_len: usize) -> AptResult<Vec<u8>> {
        let destination = destination_for(self.topology, channel);

        self.flush_buffers()?;
        self.send_short(message_id, CHANNEL_1, 0, destination).await?;
        let reply = read_exact_timeout(&mut self.link, reply_len, self.options.read_timeout).await;

        let kept_alive = self.keep_alive(channel).await;
        let flushed = self.flush_buffers();
        let reply = reply?;
        kept_alive?;
        flushed?;
        Ok(reply)
    }

    /// Read 2-byte chunks until `message_id` appears, the bound elapses or the
    /// wait is cancelled.
    async fn wait_for_confirmation(&mut self, message_id: u16) -> AptResult<()> {
        let sentinel = message_id.to_le_bytes();
        let started = Instant::now();
        let deadline = self.options.confirmation_timeout.map(|t| started + t);
        let poll = self.options.read_timeout.max(MIN_READ_TIMEOUT);
        let mut chunk = [0u8; 2];
        let mut filled = 0usize;

        tracing::debug!(
            port = %self.label,
            confirmation = ids::name(message_id),
            timeout = ?self.options.confirmation_timeout,
            "Waiting for confirmation"
        );

        if *self.cancel_rx.borrow_and_update() {
            return Err(self.take_cancellation(message_id));
        }

        loop {
            let now = Instant::now();
            let window = match deadline {
                Some(deadline) if now >= deadline => {
                    tracing::warn!(
                        port = %self.label,
                        confirmation = ids::name(message_id),
                        waited = ?started.elapsed(),
                        "Confirmation never arrived"
                    );
                    return Err(AptError::NoConfirmation {
                        message_id,
                        waited: started.elapsed(),
                    });
                }
                Some(deadline) => poll.min(deadline - now),
                None => poll,
            };

            let event = tokio::select! {
                biased;
                _ = self.cancel_rx.changed() => None,
                read = tokio::time::timeout(window, self.link.read(&mut chunk[filled..])) => Some(read),
            };

            match event {
                None => {
                    if *self.cancel_rx.borrow_and_update() {
                        return Err(self.take_cancellation(message_id));
                    }
                }
                Some(Ok(Ok(0))) => {
                    return Err(AptError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "serial link closed while waiting for confirmation",
                    )));
                }
                Some(Ok(Ok(n))) => {
                    filled += n;
                    if filled == chunk.len() {
                        if chunk == sentinel {
                            tracing::debug!(
                                port = %self.label,
                                confirmation = ids::name(message_id),
                                elapsed = ?started.elapsed(),
                                "Confirmation received"
                            );
                            return Ok(());
                        }
                        filled = 0;
                    }
                }
                Some(Ok(Err(e))) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Some(Ok(Err(e))) => return Err(e.into()),
                Some(Err(_elapsed)) => {}
            }
        }
    }

    fn take_cancellation(&mut self, message_id: u16) -> AptError {
        self.cancel_tx.send_replace(false);
        self.cancel_rx.borrow_and_update();
        tracing::info!(
            port = %self.label,
            confirmation = ids::name(message_id),
            "Confirmation wait cancelled"
        );
        AptError::Cancelled { message_id }
    }

    /// Release the connection (and the port claim, if any).
    pub async fn close(mut self) -> AptResult<()> {
        self.link.flush().await?;
        tracing::info!(port = %self.label, "Closed APT controller session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apt_driver_mock::{SimConfig, SimulatedController};

    fn fast_options() -> SessionOptions {
        SessionOptions::default()
            .with_enable_settle(Duration::ZERO)
            .with_read_timeout(Duration::from_millis(20))
            .with_confirmation_timeout(Some(Duration::from_millis(200)))
    }

    fn compact(sim: &SimulatedController) -> ControllerSession<SimulatedController> {
        ControllerSession::new(
            sim.clone(),
            ControllerTopology::Compact,
            ScaleFactors::DDSM100,
            fast_options(),
        )
    }

    #[tokio::test]
    async fn test_keep_alive_resets_counter() {
        let sim = SimulatedController::default();
        let mut session = compact(&sim);

        session.initialize(1).await.unwrap();
        assert_eq!(session.commands_since_keep_alive(), 2);

        session.keep_alive(1).await.unwrap();
        assert_eq!(session.commands_since_keep_alive(), 0);
        assert_eq!(sim.commands_since_keep_alive(), 0);
    }

    #[tokio::test]
    async fn test_injection_never_lets_count_reach_limit() {
        let sim = SimulatedController::default();
        let mut session = compact(&sim);

        for _ in 0..120 {
            session
                .send_message(&Message::short(ids::MOD_IDENTIFY, 1, 0, 0x50, HOST_ADDRESS))
                .await
                .unwrap();
            assert!(session.commands_since_keep_alive() < KEEP_ALIVE_INTERVAL);
            assert!(!sim.is_starved());
        }
        assert_eq!(sim.count_of(ids::MOT_ACK_DCSTATUSUPDATE), 2);
    }

    #[tokio::test]
    async fn test_stale_cancel_aborts_next_wait_once() {
        let sim = SimulatedController::new(SimConfig::default());
        let mut session = compact(&sim);
        session.cancel_handle().cancel();

        // Disabled channel: no confirmation would ever come
        let err = session.home(1, true).await.unwrap_err();
        assert!(matches!(err, AptError::Cancelled { message_id: 0x0444 }));

        let err = session.home(1, true).await.unwrap_err();
        assert!(matches!(err, AptError::NoConfirmation { .. }));
    }

    #[tokio::test]
    async fn test_out_of_range_move_writes_nothing() {
        let sim = SimulatedController::new(SimConfig::default().enabled());
        let mut session = compact(&sim);

        let err = session.move_absolute(2.0e6, 1, true).await.unwrap_err();
        assert!(matches!(err, AptError::OutOfRange { .. }));
        assert!(sim.received().is_empty());
    }

    #[tokio::test]
    async fn test_boxed_session_keeps_counter() {
        let sim = SimulatedController::new(SimConfig::default().enabled());
        let mut session = compact(&sim).with_label("sim");
        session.initialize(1).await.unwrap();

        let mut boxed = session.boxed();
        assert_eq!(boxed.label(), "sim");
        assert_eq!(boxed.commands_since_keep_alive(), 2);

        boxed.move_absolute(1.0, 1, true).await.unwrap();
        assert_eq!(sim.position(0x50), 2000);
    }

    #[test]
    fn test_read_timeout_is_clamped() {
        let options = SessionOptions::default().with_read_timeout(Duration::ZERO);
        assert_eq!(options.read_timeout, MIN_READ_TIMEOUT);
    }

    #[tokio::test]
    async fn test_zero_read_timeout_wait_still_yields() {
        let sim = SimulatedController::new(SimConfig::default());
        let options = SessionOptions {
            read_timeout: Duration::ZERO,
            confirmation_timeout: None,
            ..fast_options()
        };
        let mut session =
            ControllerSession::new(sim.clone(), ControllerTopology::Compact, ScaleFactors::DDSM100, options);
        let cancel = session.cancel_handle();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        // Disabled channel: only the cancel can end this wait
        let err = session.home(1, true).await.unwrap_err();
        assert!(matches!(err, AptError::Cancelled { .. }));
    }
}
