//! Sentence sources: serial ports and TCP multiplexers.
//!
//! Both transports present the same seam to the channel worker: block for a
//! bounded time, hand back at most one line. `Ok(None)` means "nothing this
//! round" — a read timeout, a transient glitch, or a reconnect in progress —
//! and lets the worker re-check the cancellation flag between calls.
//!
//! Error policy differs by transport. A serial read error is transient: it is
//! counted, logged every 100th occurrence, and the port stays open (degraded
//! but alive). A TCP read or write error drops the link; the source then
//! redials on a fixed interval until it succeeds, discarding any line
//! fragment that spanned the outage.

use crate::config::{SerialPortConfig, TcpConfig};
use crate::error::{AppResult, RelayError};
use crate::shutdown::ShutdownController;
use log::{info, warn};
use serialport::{DataBits, Parity, SerialPort, StopBits};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

/// Written back after every receive. Some NMEA multiplexers silently close
/// sockets that never send; this is a protocol quirk, not optional.
const KEEPALIVE_PAYLOAD: &[u8] = b"nmea_relay";
/// Fixed delay between reconnect attempts.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(2);
/// Transient serial errors are logged once per this many occurrences.
const SERIAL_ERROR_LOG_EVERY: u64 = 100;
/// Read timeout on TCP links; bounds how long a worker blocks between
/// shutdown checks.
const TCP_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// A stream of raw sentence lines from one transport.
pub trait SentenceSource: Send {
    fn name(&self) -> &str;

    /// Block for a bounded time waiting for the next line. `Ok(None)` means
    /// no line arrived this round; call again.
    fn next_line(&mut self) -> AppResult<Option<String>>;

    /// Transient errors absorbed so far (serial glitches); reported at exit.
    fn error_count(&self) -> u64 {
        0
    }
}

// ---------------------------------------------------------------------------
// Serial

pub struct SerialSource {
    name: String,
    port_path: String,
    reader: BufReader<Box<dyn SerialPort>>,
    errors: u64,
}

impl SerialSource {
    /// Open the configured port. Failure here is fatal for the channel.
    pub fn open(cfg: &SerialPortConfig) -> AppResult<Self> {
        let data_bits = match cfg.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            other => {
                return Err(RelayError::Configuration(format!(
                    "Channel '{}': unsupported data_bits {other}",
                    cfg.name
                )))
            }
        };
        let parity = match cfg.parity.as_str() {
            "none" => Parity::None,
            "odd" => Parity::Odd,
            "even" => Parity::Even,
            other => {
                return Err(RelayError::Configuration(format!(
                    "Channel '{}': unsupported parity '{other}'",
                    cfg.name
                )))
            }
        };
        let stop_bits = match cfg.stop_bits {
            1 => StopBits::One,
            2 => StopBits::Two,
            other => {
                return Err(RelayError::Configuration(format!(
                    "Channel '{}': unsupported stop_bits {other}",
                    cfg.name
                )))
            }
        };

        let port = serialport::new(cfg.port.as_str(), cfg.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(cfg.timeout)
            .open()?;
        info!("{}: opened {} at {} baud", cfg.name, cfg.port, cfg.baud_rate);

        Ok(Self {
            name: cfg.name.clone(),
            port_path: cfg.port.clone(),
            reader: BufReader::new(port),
            errors: 0,
        })
    }
}

impl SentenceSource for SerialSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_line(&mut self) -> AppResult<Option<String>> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(line.trim_end_matches(['\r', '\n']).to_string())),
            Err(err) if err.kind() == ErrorKind::TimedOut => Ok(None),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(None),
            Err(_) => {
                // Transient: garbled bytes or a hiccup on the line. The port
                // stays open and iteration continues.
                self.errors += 1;
                if self.errors % SERIAL_ERROR_LOG_EVERY == 0 {
                    warn!(
                        "{}: {} read errors so far on {}",
                        self.name, self.errors, self.port_path
                    );
                }
                Ok(None)
            }
        }
    }

    fn error_count(&self) -> u64 {
        self.errors
    }
}

// ---------------------------------------------------------------------------
// TCP

/// Anything a TCP-style link can do. Blanket-implemented so `TcpStream` and
/// test doubles both qualify.
pub trait Link: Read + Write + Send {}
impl<T: Read + Write + Send> Link for T {}

/// Connection factory seam; lets tests drive the reconnect machine without a
/// network.
pub trait Dial: Send {
    fn dial(&mut self) -> std::io::Result<Box<dyn Link>>;
}

/// Dials the configured upstream multiplexer.
pub struct TcpDialer {
    host: String,
    port: u16,
}

impl TcpDialer {
    pub fn new(cfg: &TcpConfig) -> Self {
        Self {
            host: cfg.host.clone(),
            port: cfg.port,
        }
    }
}

impl Dial for TcpDialer {
    fn dial(&mut self) -> std::io::Result<Box<dyn Link>> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))?;
        stream.set_read_timeout(Some(TCP_READ_TIMEOUT))?;
        Ok(Box::new(stream))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

pub struct TcpSource<D: Dial> {
    name: String,
    remote: String,
    dialer: D,
    link: Option<Box<dyn Link>>,
    /// Partial line carried between reads on the same link; cleared on loss.
    buf: Vec<u8>,
    pending: VecDeque<String>,
    reconnect_interval: Duration,
    shutdown: Arc<ShutdownController>,
}

impl TcpSource<TcpDialer> {
    pub fn open(cfg: &TcpConfig, shutdown: Arc<ShutdownController>) -> Self {
        let remote = format!("{}:{}", cfg.host, cfg.port);
        Self::with_dialer(&cfg.name, &remote, TcpDialer::new(cfg), shutdown)
    }
}

impl<D: Dial> TcpSource<D> {
    pub fn with_dialer(
        name: &str,
        remote: &str,
        dialer: D,
        shutdown: Arc<ShutdownController>,
    ) -> Self {
        Self {
            name: name.to_string(),
            remote: remote.to_string(),
            dialer,
            link: None,
            buf: Vec::new(),
            pending: VecDeque::new(),
            reconnect_interval: RECONNECT_INTERVAL,
            shutdown,
        }
    }

    #[cfg(test)]
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn state(&self) -> LinkState {
        if self.link.is_some() {
            LinkState::Connected
        } else {
            LinkState::Disconnected
        }
    }

    fn drop_link(&mut self, reason: &str) {
        self.link = None;
        // Any fragment spanning the outage is dropped: capture-then-gap, the
        // new link starts clean.
        self.buf.clear();
        warn!("{}: connection to {} lost: {reason}", self.name, self.remote);
    }

    /// Redial until connected or shutdown. Each failed attempt waits the
    /// fixed interval, checking cancellation so a dead upstream cannot starve
    /// shutdown.
    fn reconnect(&mut self) {
        while !self.shutdown.is_shutdown() {
            match self.dialer.dial() {
                Ok(link) => {
                    self.link = Some(link);
                    info!("{}: connected to {}", self.name, self.remote);
                    return;
                }
                Err(_) => {
                    if !self.shutdown.sleep_cancellable(self.reconnect_interval) {
                        return;
                    }
                }
            }
        }
    }

    fn split_lines(&mut self) {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let text = String::from_utf8_lossy(&line).into_owned();
            if !text.is_empty() {
                self.pending.push_back(text);
            }
        }
    }
}

impl<D: Dial> SentenceSource for TcpSource<D> {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_line(&mut self) -> AppResult<Option<String>> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Ok(Some(line));
            }
            if self.shutdown.is_shutdown() {
                return Ok(None);
            }

            if self.link.is_none() {
                self.reconnect();
                if self.link.is_none() {
                    // Shutdown interrupted the redial loop.
                    return Ok(None);
                }
            }
            let Some(link) = self.link.as_mut() else {
                return Ok(None);
            };

            let mut chunk = [0u8; 2048];
            match link.read(&mut chunk) {
                Ok(0) => self.drop_link("closed by peer"),
                Ok(n) => {
                    if let Err(err) = link.write_all(KEEPALIVE_PAYLOAD) {
                        self.drop_link(&format!("keep-alive write failed: {err}"));
                        continue;
                    }
                    self.buf.extend_from_slice(&chunk[..n]);
                    self.split_lines();
                }
                Err(err)
                    if err.kind() == ErrorKind::TimedOut
                        || err.kind() == ErrorKind::WouldBlock
                        || err.kind() == ErrorKind::Interrupted =>
                {
                    return Ok(None);
                }
                Err(err) => self.drop_link(&err.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};
    use std::sync::Mutex;

    /// Test link: serves scripted bytes, records keep-alive writes.
    struct ScriptedLink {
        data: Cursor<Vec<u8>>,
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        fail_after_data: bool,
    }

    impl Read for ScriptedLink {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.data.read(buf)?;
            if n == 0 && self.fail_after_data {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
            }
            Ok(n)
        }
    }

    impl Write for ScriptedLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes.lock().unwrap().push(buf.to_vec());
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Fails the first `failures` dials, then serves the queued payloads.
    struct FlakyDialer {
        failures: usize,
        attempts: Arc<Mutex<usize>>,
        payloads: Vec<Vec<u8>>,
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl Dial for FlakyDialer {
        fn dial(&mut self) -> io::Result<Box<dyn Link>> {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            if *attempts <= self.failures {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            let payload = if self.payloads.is_empty() {
                Vec::new()
            } else {
                self.payloads.remove(0)
            };
            Ok(Box::new(ScriptedLink {
                data: Cursor::new(payload),
                writes: Arc::clone(&self.writes),
                fail_after_data: true,
            }))
        }
    }

    fn source(failures: usize, payloads: Vec<Vec<u8>>) -> (TcpSource<FlakyDialer>, Arc<Mutex<usize>>, Arc<Mutex<Vec<Vec<u8>>>>) {
        let attempts = Arc::new(Mutex::new(0));
        let writes = Arc::new(Mutex::new(Vec::new()));
        let dialer = FlakyDialer {
            failures,
            attempts: Arc::clone(&attempts),
            payloads,
            writes: Arc::clone(&writes),
        };
        let shutdown = ShutdownController::new();
        let src = TcpSource::with_dialer("tcp", "test:10110", dialer, shutdown)
            .with_reconnect_interval(Duration::from_millis(1));
        (src, attempts, writes)
    }

    #[test]
    fn reconnects_after_failed_dials_with_no_line_loss() {
        let (mut src, attempts, _) = source(2, vec![b"$GPGGA,1\r\n$GPGGA,2\r\n".to_vec()]);
        assert_eq!(src.state(), LinkState::Disconnected);

        let line = src.next_line().unwrap();
        assert_eq!(line.as_deref(), Some("$GPGGA,1"));
        assert_eq!(src.state(), LinkState::Connected);
        assert_eq!(*attempts.lock().unwrap(), 3);

        assert_eq!(src.next_line().unwrap().as_deref(), Some("$GPGGA,2"));
    }

    #[test]
    fn keepalive_written_after_each_receive() {
        let (mut src, _, writes) = source(0, vec![b"$GPGGA,1\r\n".to_vec()]);
        src.next_line().unwrap();
        let written = writes.lock().unwrap();
        assert_eq!(written.as_slice(), &[KEEPALIVE_PAYLOAD.to_vec()]);
    }

    #[test]
    fn partial_line_dropped_across_reconnect() {
        // First link dies mid-sentence; the fragment must not prefix the
        // first line of the new link.
        let (mut src, _, _) = source(
            0,
            vec![b"$GPGGA,partial".to_vec(), b"$GPGGA,fresh\r\n".to_vec()],
        );
        let line = src.next_line().unwrap();
        assert_eq!(line.as_deref(), Some("$GPGGA,fresh"));
    }

    #[test]
    fn shutdown_interrupts_endless_redial() {
        let (mut src, _, _) = source(usize::MAX, Vec::new());
        src.shutdown.request_shutdown();
        assert!(src.next_line().unwrap().is_none());
    }
}
