//! Connection manager.
//!
//! Owns the single logical session to the scanner:
//! - `Connecting -> Open` when a connect attempt succeeds
//! - `Open -> Closed` on end of stream or transport error
//! - `Closed -> Connecting` after the backoff delay, forever
//!
//! While open, a 3 s watchdog is rearmed by every parsed message. When it
//! elapses the manager reports a stall but keeps the session; only an operator
//! reinitialize (or fresh data) clears it.

mod backoff;
mod timer;
mod transport;

pub use backoff::{backoff_delay, Backoff, BACKOFF_BASE, BACKOFF_CAP};
pub use timer::Timer;
pub use transport::{
    memory_link, Connector, MemoryConnector, MemoryDevice, TcpConnector, CONNECT_TIMEOUT,
};

use std::collections::VecDeque;
use std::fmt;
use std::future::{pending, Future};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use rfscan_common::wire::{
    decode_bytes, is_blank, write_json, DeviceCommand, InboundMessage, OutboundMessage,
};
use rfscan_common::{Settings, SpectrumFrame, Statistics, StatusKind};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, ReadHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Silence on an open session longer than this is reported as a stall.
pub const WATCHDOG_TIMEOUT: Duration = Duration::from_millis(3000);

/// Transport lifecycle as seen by the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
        })
    }
}

/// Contents of the latest-frame cell.
pub type LatestFrame = Option<Arc<SpectrumFrame>>;

/// What the manager reports back to the console loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged {
        state: ConnectionState,
        /// Set when entering `Closed`: time until the next attempt
        retry_delay: Option<Duration>,
    },
    Frame {
        frame: Arc<SpectrumFrame>,
        statistics: Option<Statistics>,
    },
    Settings(Settings),
    OperationalStatus {
        message: String,
        kind: StatusKind,
    },
    /// No message for `WATCHDOG_TIMEOUT` on an open session
    WatchdogExpired,
    /// A spectrum frame arrived after a stall
    LivenessRestored,
}

struct Session<Io> {
    reader: BufReader<ReadHalf<Io>>,
    /// Bytes of the line being read, kept across cancelled reads.
    partial: Vec<u8>,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    writer: JoinHandle<()>,
}

impl<Io> Drop for Session<Io> {
    fn drop(&mut self) {
        self.writer.abort();
    }
}

/// Owner of the transport session, the latest frame and both timers.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    state: ConnectionState,
    backoff: Backoff,
    attempt: Option<futures::future::BoxFuture<'static, io::Result<C::Io>>>,
    session: Option<Session<C::Io>>,
    reconnect: Timer,
    watchdog: Timer,
    stalled: bool,
    frame_intake: bool,
    latest: watch::Sender<LatestFrame>,
    pending: VecDeque<ConnectionEvent>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create the manager with its first connect attempt already in flight.
    pub fn new(connector: C) -> Self {
        info!("[Connection] Connecting to {}", connector.endpoint());
        let attempt = Some(connector.connect());
        let (latest, _) = watch::channel(None);
        Self {
            connector,
            state: ConnectionState::Connecting,
            backoff: Backoff::new(),
            attempt,
            session: None,
            reconnect: Timer::new(),
            watchdog: Timer::new(),
            stalled: false,
            frame_intake: true,
            latest,
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    /// Consecutive failed attempts since the last open.
    pub fn retry_count(&self) -> u32 {
        self.backoff.attempts()
    }

    /// Whether the watchdog has fired and no frame has arrived since.
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    pub fn is_watchdog_armed(&self) -> bool {
        self.watchdog.is_armed()
    }

    /// Read side of the latest-frame cell.
    pub fn subscribe_frames(&self) -> watch::Receiver<LatestFrame> {
        self.latest.subscribe()
    }

    pub fn latest_frame(&self) -> LatestFrame {
        self.latest.borrow().clone()
    }

    /// While intake is off, spectrum frames are dropped on arrival.
    pub fn set_frame_intake(&mut self, enabled: bool) {
        self.frame_intake = enabled;
    }

    /// Send the complete settings object. Dropped unless the session is open.
    pub fn send_settings(&self, settings: &Settings) -> bool {
        self.send(OutboundMessage::Settings {
            settings: settings.clone(),
        })
    }

    /// Send a device command. Dropped unless the session is open.
    pub fn send_command(&self, command: DeviceCommand) -> bool {
        self.send(OutboundMessage::Command { command })
    }

    fn send(&self, message: OutboundMessage) -> bool {
        match (&self.session, self.state) {
            (Some(session), ConnectionState::Open) => session.outbound.send(message).is_ok(),
            _ => {
                debug!("[Connection] Not open ({}), dropping outbound message", self.state);
                false
            }
        }
    }

    /// Clear the stall indicator after an operator reinitialize and give the
    /// device a fresh watchdog period. Returns whether a stall was pending.
    pub fn acknowledge_stall(&mut self) -> bool {
        let was_stalled = std::mem::replace(&mut self.stalled, false);
        if self.state == ConnectionState::Open {
            self.watchdog.arm(WATCHDOG_TIMEOUT);
        }
        was_stalled
    }

    /// Tear the session down without scheduling a reconnect.
    pub fn close(&mut self) {
        self.session = None;
        self.attempt = None;
        self.watchdog.cancel();
        self.reconnect.cancel();
        self.state = ConnectionState::Closed;
    }

    /// Wait for the next thing worth reporting. Cancel safe.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }
            tokio::select! {
                result = finish_attempt(&mut self.attempt) => self.on_attempt_finished(result),
                _ = self.reconnect.expired() => self.begin_attempt(),
                _ = self.watchdog.expired() => self.on_watchdog_expired(),
                line = next_line(&mut self.session) => self.on_line(line),
            }
        }
    }

    fn begin_attempt(&mut self) {
        info!(
            "[Connection] Reconnecting to {} (attempt {})",
            self.connector.endpoint(),
            self.backoff.attempts() + 1
        );
        self.attempt = Some(self.connector.connect());
        self.enter(ConnectionState::Connecting, None);
    }

    fn on_attempt_finished(&mut self, result: io::Result<C::Io>) {
        match result {
            Ok(io) => {
                let (read, write) = tokio::io::split(io);
                let (outbound, queue) = mpsc::unbounded_channel();
                let writer = tokio::spawn(write_loop(write, queue));
                self.session = Some(Session {
                    reader: BufReader::new(read),
                    partial: Vec::new(),
                    outbound,
                    writer,
                });
                self.backoff.reset();
                self.watchdog.arm(WATCHDOG_TIMEOUT);
                info!("[Connection] Connected to {}", self.connector.endpoint());
                self.enter(ConnectionState::Open, None);
            }
            Err(e) => {
                warn!("[Connection] Connect to {} failed: {}", self.connector.endpoint(), e);
                self.on_closed();
            }
        }
    }

    fn on_closed(&mut self) {
        self.session = None;
        self.watchdog.cancel();
        let delay = self.backoff.next_delay();
        self.reconnect.arm(delay);
        info!(
            "[Connection] Retrying in {:.1}s (attempt {})",
            delay.as_secs_f32(),
            self.backoff.attempts()
        );
        self.enter(ConnectionState::Closed, Some(delay));
    }

    fn on_watchdog_expired(&mut self) {
        warn!(
            "[Connection] No data for {} ms, device may need reinitializing",
            WATCHDOG_TIMEOUT.as_millis()
        );
        self.stalled = true;
        self.pending.push_back(ConnectionEvent::WatchdogExpired);
    }

    fn on_line(&mut self, line: io::Result<Option<Vec<u8>>>) {
        match line {
            Ok(Some(line)) => {
                if is_blank(&line) {
                    return;
                }
                match decode_bytes::<InboundMessage>(&line) {
                    Ok(message) => self.on_message(message),
                    Err(e) => warn!("[Connection] Discarding malformed message: {}", e),
                }
            }
            Ok(None) => {
                info!("[Connection] Device closed the connection");
                self.on_closed();
            }
            Err(e) => {
                warn!("[Connection] Transport error: {}", e);
                self.on_closed();
            }
        }
    }

    fn on_message(&mut self, message: InboundMessage) {
        self.watchdog.arm(WATCHDOG_TIMEOUT);
        trace!("[Connection] Received {}", message.kind_name());

        match message {
            InboundMessage::Spectrum { data, statistics } => {
                if std::mem::replace(&mut self.stalled, false) {
                    info!("[Connection] Data flowing again");
                    self.pending.push_back(ConnectionEvent::LivenessRestored);
                }
                if !self.frame_intake {
                    trace!("[Connection] Intake paused, dropping frame");
                    return;
                }
                let frame = Arc::new(data);
                self.latest.send_replace(Some(frame.clone()));
                self.pending
                    .push_back(ConnectionEvent::Frame { frame, statistics });
            }
            InboundMessage::Settings { settings } => {
                self.pending.push_back(ConnectionEvent::Settings(settings));
            }
            InboundMessage::ReinitStatus { status } => {
                let kind = StatusKind::from_status(&status);
                self.pending.push_back(ConnectionEvent::OperationalStatus {
                    message: format!("Re-init {}", status),
                    kind,
                });
            }
        }
    }

    fn enter(&mut self, state: ConnectionState, retry_delay: Option<Duration>) {
        self.state = state;
        self.pending
            .push_back(ConnectionEvent::StateChanged { state, retry_delay });
    }
}

async fn finish_attempt<F>(attempt: &mut Option<F>) -> F::Output
where
    F: Future + Unpin,
{
    match attempt.as_mut() {
        Some(future) => {
            let output = future.await;
            *attempt = None;
            output
        }
        None => pending().await,
    }
}

/// Next raw line from the session, `None` at end of stream.
async fn next_line<Io>(session: &mut Option<Session<Io>>) -> io::Result<Option<Vec<u8>>>
where
    Io: AsyncRead,
{
    let Some(session) = session.as_mut() else {
        return pending().await;
    };
    let read = session
        .reader
        .read_until(b'\n', &mut session.partial)
        .await?;
    if read == 0 && session.partial.is_empty() {
        return Ok(None);
    }
    Ok(Some(std::mem::take(&mut session.partial)))
}

async fn write_loop<W>(mut writer: W, mut queue: mpsc::UnboundedReceiver<OutboundMessage>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = queue.recv().await {
        if let Err(e) = write_json(&mut writer, &message).await {
            warn!("[Connection] Send failed: {}", e);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfscan_common::wire::read_json;
    use rfscan_common::BIN_COUNT;
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio::time::{sleep, timeout, Instant};

    fn spectrum_line(prefix: &[u32]) -> String {
        let mut data = vec![0u32; BIN_COUNT];
        data[..prefix.len()].copy_from_slice(prefix);
        format!(
            "{{\"type\":\"spectrum\",\"data\":{}}}\n",
            serde_json::to_string(&data).unwrap()
        )
    }

    async fn open(
        manager: &mut ConnectionManager<MemoryConnector>,
        device: &mut MemoryDevice,
    ) -> DuplexStream {
        assert_eq!(
            manager.next_event().await,
            ConnectionEvent::StateChanged {
                state: ConnectionState::Open,
                retry_delay: None
            }
        );
        device.accept().await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_fires_once_then_frame_clears_it() {
        let (connector, mut device) = memory_link();
        let mut manager = ConnectionManager::new(connector);
        let mut stream = open(&mut manager, &mut device).await;
        let opened_at = Instant::now();

        assert_eq!(manager.next_event().await, ConnectionEvent::WatchdogExpired);
        let waited = opened_at.elapsed();
        assert!(waited >= WATCHDOG_TIMEOUT && waited < Duration::from_millis(3100));
        assert!(manager.is_stalled());
        assert_eq!(manager.state(), ConnectionState::Open);

        // single-shot: nothing more while the device stays silent
        let quiet = timeout(Duration::from_secs(10), manager.next_event()).await;
        assert!(quiet.is_err());

        stream.write_all(spectrum_line(&[1]).as_bytes()).await.unwrap();
        assert_eq!(manager.next_event().await, ConnectionEvent::LivenessRestored);
        assert!(matches!(manager.next_event().await, ConnectionEvent::Frame { .. }));
        assert!(!manager.is_stalled());
        assert!(manager.is_watchdog_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_counter_resets_after_open() {
        let (connector, mut device) = memory_link();
        let mut manager = ConnectionManager::new(connector);
        let stream = open(&mut manager, &mut device).await;

        drop(stream);
        assert_eq!(
            manager.next_event().await,
            ConnectionEvent::StateChanged {
                state: ConnectionState::Closed,
                retry_delay: Some(Duration::from_millis(2000))
            }
        );
        assert_eq!(manager.retry_count(), 1);

        let closed_at = Instant::now();
        assert_eq!(
            manager.next_event().await,
            ConnectionEvent::StateChanged {
                state: ConnectionState::Connecting,
                retry_delay: None
            }
        );
        assert!(closed_at.elapsed() >= Duration::from_millis(2000));

        let mut stream = open(&mut manager, &mut device).await;
        assert_eq!(manager.retry_count(), 0);

        sleep(Duration::from_millis(500)).await;
        stream.write_all(spectrum_line(&[3, 4]).as_bytes()).await.unwrap();
        assert!(matches!(manager.next_event().await, ConnectionEvent::Frame { .. }));

        drop(stream);
        assert_eq!(
            manager.next_event().await,
            ConnectionEvent::StateChanged {
                state: ConnectionState::Closed,
                retry_delay: Some(Duration::from_millis(2000))
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_attempts_compound() {
        let (connector, device) = memory_link();
        device.set_accepting(false);
        let mut manager = ConnectionManager::new(connector);

        let mut delays = Vec::new();
        while delays.len() < 4 {
            if let ConnectionEvent::StateChanged {
                state: ConnectionState::Closed,
                retry_delay: Some(delay),
            } = manager.next_event().await
            {
                delays.push(delay.as_millis());
            }
        }
        assert_eq!(delays, vec![2000, 4000, 8000, 16000]);
        assert!(!manager.is_watchdog_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_message_does_not_feed_watchdog() {
        let (connector, mut device) = memory_link();
        let mut manager = ConnectionManager::new(connector);
        let mut stream = open(&mut manager, &mut device).await;
        let opened_at = Instant::now();

        sleep(Duration::from_millis(2000)).await;
        stream.write_all(b"{\"type\":\"spectrum\",\"data\":[1,2]}\n").await.unwrap();
        stream.write_all(b"garbage\n").await.unwrap();

        assert_eq!(manager.next_event().await, ConnectionEvent::WatchdogExpired);
        assert!(opened_at.elapsed() < Duration::from_millis(3100));
        assert_eq!(manager.state(), ConnectionState::Open);
        assert!(manager.latest_frame().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_utf8_line_is_discarded() {
        let (connector, mut device) = memory_link();
        let mut manager = ConnectionManager::new(connector);
        let mut stream = open(&mut manager, &mut device).await;

        stream.write_all(b"\xff\xfe garbage\n").await.unwrap();
        stream.write_all(spectrum_line(&[6]).as_bytes()).await.unwrap();

        assert!(matches!(manager.next_event().await, ConnectionEvent::Frame { .. }));
        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(manager.retry_count(), 0);
        assert_eq!(manager.latest_frame().unwrap().get(0), Some(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_line_split_across_cancelled_waits() {
        let (connector, mut device) = memory_link();
        let mut manager = ConnectionManager::new(connector);
        let mut stream = open(&mut manager, &mut device).await;

        let line = spectrum_line(&[2, 8]);
        let (head, tail) = line.as_bytes().split_at(40);
        stream.write_all(head).await.unwrap();
        let waiting = timeout(Duration::from_millis(100), manager.next_event()).await;
        assert!(waiting.is_err());

        stream.write_all(tail).await.unwrap();
        assert!(matches!(manager.next_event().await, ConnectionEvent::Frame { .. }));
        assert_eq!(manager.latest_frame().unwrap().get(1), Some(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_update_latest_cell() {
        let (connector, mut device) = memory_link();
        let mut manager = ConnectionManager::new(connector);
        let frames = manager.subscribe_frames();
        let mut stream = open(&mut manager, &mut device).await;

        stream.write_all(spectrum_line(&[9]).as_bytes()).await.unwrap();
        stream.write_all(spectrum_line(&[7]).as_bytes()).await.unwrap();
        manager.next_event().await;
        manager.next_event().await;

        let latest = frames.borrow().clone().unwrap();
        assert_eq!(latest.get(0), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_intake_paused_drops_frames_but_feeds_watchdog() {
        let (connector, mut device) = memory_link();
        let mut manager = ConnectionManager::new(connector);
        let mut stream = open(&mut manager, &mut device).await;
        manager.set_frame_intake(false);

        sleep(Duration::from_millis(2500)).await;
        stream.write_all(spectrum_line(&[5]).as_bytes()).await.unwrap();
        stream
            .write_all(b"{\"type\":\"reinitStatus\",\"status\":\"success\"}\n")
            .await
            .unwrap();

        assert_eq!(
            manager.next_event().await,
            ConnectionEvent::OperationalStatus {
                message: "Re-init success".to_string(),
                kind: StatusKind::Success
            }
        );
        assert!(manager.latest_frame().is_none());

        // watchdog was rearmed at ~2500 ms, so it fires near 5500 ms
        let before = Instant::now();
        assert_eq!(manager.next_event().await, ConnectionEvent::WatchdogExpired);
        assert!(before.elapsed() >= Duration::from_millis(2900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_only_while_open() {
        let (connector, mut device) = memory_link();
        let mut manager = ConnectionManager::new(connector);
        assert!(!manager.send_command(DeviceCommand::Pause));

        let stream = open(&mut manager, &mut device).await;
        assert!(manager.send_command(DeviceCommand::Clear));
        assert!(manager.send_settings(&Settings::default()));

        let mut reader = BufReader::new(stream);
        let first: OutboundMessage = read_json(&mut reader).await.unwrap();
        assert_eq!(
            first,
            OutboundMessage::Command {
                command: DeviceCommand::Clear
            }
        );
        let second: OutboundMessage = read_json(&mut reader).await.unwrap();
        assert!(matches!(second, OutboundMessage::Settings { .. }));

        drop(reader);
        manager.next_event().await;
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(!manager.send_command(DeviceCommand::Resume));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledge_stall_rearms_watchdog() {
        let (connector, mut device) = memory_link();
        let mut manager = ConnectionManager::new(connector);
        let _stream = open(&mut manager, &mut device).await;

        assert_eq!(manager.next_event().await, ConnectionEvent::WatchdogExpired);
        assert!(!manager.is_watchdog_armed());
        assert!(manager.acknowledge_stall());
        assert!(manager.is_watchdog_armed());
        assert!(!manager.acknowledge_stall());
    }
}
