// MEA transport connectors

use crate::bio::BioError;
use crate::config::{BioConfig, TransportKind};
use memmap2::MmapMut;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs, UdpSocket};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Transport-level failures, folded into `BioError` at the backend edge.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    Timeout,
    Disconnected,
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransportError::Timeout => write!(f, "transport timed out"),
            TransportError::Disconnected => write!(f, "transport disconnected"),
            TransportError::Io(msg) => write!(f, "transport I/O error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<TransportError> for BioError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => BioError::Timeout,
            TransportError::Disconnected => BioError::DeviceDisconnected,
            TransportError::Io(msg) => BioError::Internal(msg),
        }
    }
}

/// A byte pipe to the device. Blocking with explicit timeouts; the bio
/// worker thread is the only caller.
pub trait Transport: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read a chunk of available bytes, blocking up to `timeout`.
    fn recv(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    fn kind(&self) -> TransportKind;
}

/// Open the transport named by the configuration.
pub fn open(config: &BioConfig) -> Result<Box<dyn Transport>, TransportError> {
    let connect_timeout = Duration::from_millis(config.connect_timeout_ms as u64);
    match config.transport {
        TransportKind::Serial => Ok(Box::new(SerialTransport::open(config)?)),
        TransportKind::Tcp => Ok(Box::new(TcpTransport::open(config, connect_timeout)?)),
        TransportKind::Udp => Ok(Box::new(UdpTransport::open(config)?)),
        TransportKind::SharedMemory => Ok(Box::new(SharedMemoryTransport::open(config)?)),
        TransportKind::NamedPipe => Ok(Box::new(NamedPipeTransport::open(config)?)),
        TransportKind::File => Ok(Box::new(FileTransport::open(config)?)),
    }
}

fn map_io(err: std::io::Error) -> TransportError {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => TransportError::Timeout,
        std::io::ErrorKind::UnexpectedEof
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::NotFound => TransportError::Disconnected,
        _ => TransportError::Io(err.to_string()),
    }
}

// ── Serial ──────────────────────────────────────────────────────────────────

struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    fn open(config: &BioConfig) -> Result<Self, TransportError> {
        let port = serialport::new(&config.device_path, config.baud_rate)
            .timeout(Duration::from_millis(config.read_timeout_ms as u64))
            .open()
            .map_err(|e| match e.kind {
                serialport::ErrorKind::NoDevice => TransportError::Disconnected,
                _ => TransportError::Io(e.to_string()),
            })?;
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(bytes).map_err(map_io)
    }

    fn recv(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.port.set_timeout(timeout).map_err(|e| TransportError::Io(e.to_string()))?;
        let mut buf = [0u8; 1024];
        match self.port.read(&mut buf) {
            Ok(0) => Err(TransportError::Disconnected),
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) => Err(map_io(e)),
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }
}

// ── TCP ─────────────────────────────────────────────────────────────────────

struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    fn open(config: &BioConfig, connect_timeout: Duration) -> Result<Self, TransportError> {
        let addr = (config.network_host.as_str(), config.network_port)
            .to_socket_addrs()
            .map_err(map_io)?
            .next()
            .ok_or_else(|| TransportError::Io(format!("cannot resolve {}", config.network_host)))?;
        let stream = TcpStream::connect_timeout(&addr, connect_timeout).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                TransportError::Timeout
            } else {
                TransportError::Disconnected
            }
        })?;
        stream.set_nodelay(true).ok();
        Ok(Self { stream })
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(bytes).map_err(map_io)
    }

    fn recv(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.stream.set_read_timeout(Some(timeout)).map_err(map_io)?;
        let mut buf = [0u8; 1024];
        match self.stream.read(&mut buf) {
            Ok(0) => Err(TransportError::Disconnected),
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) => Err(map_io(e)),
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }
}

// ── UDP ─────────────────────────────────────────────────────────────────────

struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    fn open(config: &BioConfig) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(map_io)?;
        socket
            .connect((config.network_host.as_str(), config.network_port))
            .map_err(map_io)?;
        Ok(Self { socket })
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.socket.send(bytes).map(|_| ()).map_err(map_io)
    }

    fn recv(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.socket.set_read_timeout(Some(timeout)).map_err(map_io)?;
        let mut buf = [0u8; 2048];
        match self.socket.recv(&mut buf) {
            Ok(0) => Err(TransportError::Timeout),
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) => Err(map_io(e)),
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }
}

// ── Shared memory ───────────────────────────────────────────────────────────

/// Layout of the shared segment: a host-to-device mailbox and a
/// device-to-host mailbox, each a sequence counter, a length and a data
/// area. The device increments its sequence after writing a response.
const SHM_DATA_CAP: usize = 4096;
const SHM_TX_SEQ: usize = 0;
const SHM_TX_LEN: usize = 4;
const SHM_TX_DATA: usize = 8;
const SHM_RX_SEQ: usize = SHM_TX_DATA + SHM_DATA_CAP;
const SHM_RX_LEN: usize = SHM_RX_SEQ + 4;
const SHM_RX_DATA: usize = SHM_RX_LEN + 4;
const SHM_TOTAL: usize = SHM_RX_DATA + SHM_DATA_CAP;

const SHM_POLL_INTERVAL: Duration = Duration::from_millis(1);

struct SharedMemoryTransport {
    map: MmapMut,
    tx_seq: u32,
    last_rx_seq: u32,
}

impl SharedMemoryTransport {
    fn open(config: &BioConfig) -> Result<Self, TransportError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&config.device_path)
            .map_err(map_io)?;
        let len = file.metadata().map_err(map_io)?.len();
        if len < SHM_TOTAL as u64 {
            return Err(TransportError::Io(format!(
                "shared segment too small: {} bytes, need {}",
                len, SHM_TOTAL
            )));
        }
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(map_io)?;
        let tx_seq = read_u32(&map, SHM_TX_SEQ);
        let last_rx_seq = read_u32(&map, SHM_RX_SEQ);
        Ok(Self {
            map,
            tx_seq,
            last_rx_seq,
        })
    }
}

fn read_u32(map: &MmapMut, offset: usize) -> u32 {
    u32::from_le_bytes([map[offset], map[offset + 1], map[offset + 2], map[offset + 3]])
}

fn write_u32(map: &mut MmapMut, offset: usize, value: u32) {
    map[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

impl Transport for SharedMemoryTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if bytes.len() > SHM_DATA_CAP {
            return Err(TransportError::Io(format!("frame too large: {} bytes", bytes.len())));
        }
        self.map[SHM_TX_DATA..SHM_TX_DATA + bytes.len()].copy_from_slice(bytes);
        write_u32(&mut self.map, SHM_TX_LEN, bytes.len() as u32);
        self.tx_seq = self.tx_seq.wrapping_add(1);
        write_u32(&mut self.map, SHM_TX_SEQ, self.tx_seq);
        self.map.flush().map_err(map_io)
    }

    fn recv(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            let seq = read_u32(&self.map, SHM_RX_SEQ);
            if seq != self.last_rx_seq {
                self.last_rx_seq = seq;
                let len = (read_u32(&self.map, SHM_RX_LEN) as usize).min(SHM_DATA_CAP);
                return Ok(self.map[SHM_RX_DATA..SHM_RX_DATA + len].to_vec());
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout);
            }
            std::thread::sleep(SHM_POLL_INTERVAL);
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::SharedMemory
    }
}

// ── Named pipe ──────────────────────────────────────────────────────────────

struct NamedPipeTransport {
    pipe: File,
}

impl NamedPipeTransport {
    #[cfg(unix)]
    fn open(config: &BioConfig) -> Result<Self, TransportError> {
        use std::os::unix::fs::OpenOptionsExt;

        // O_RDWR on a FIFO so opening does not block on the peer;
        // O_NONBLOCK so reads can poll against the timeout
        const O_NONBLOCK: i32 = 0x800;
        let pipe = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(O_NONBLOCK)
            .open(&config.device_path)
            .map_err(map_io)?;
        Ok(Self { pipe })
    }

    #[cfg(not(unix))]
    fn open(_config: &BioConfig) -> Result<Self, TransportError> {
        Err(TransportError::Io("named pipes are only supported on unix".into()))
    }
}

impl Transport for NamedPipeTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.pipe.write_all(bytes).map_err(map_io)
    }

    fn recv(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 1024];
        loop {
            match self.pipe.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => return Ok(buf[..n].to_vec()),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(map_io(e)),
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout);
            }
            std::thread::sleep(SHM_POLL_INTERVAL);
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::NamedPipe
    }
}

// ── Record/replay file ──────────────────────────────────────────────────────

/// Replays device frames from a recorded session file and appends every
/// outgoing frame to a sibling `.sent` log. Used for offline runs and
/// deterministic tests.
struct FileTransport {
    reader: File,
    sent_log: File,
    sent_path: PathBuf,
}

impl FileTransport {
    fn open(config: &BioConfig) -> Result<Self, TransportError> {
        let reader = File::open(&config.device_path).map_err(map_io)?;
        let sent_path = PathBuf::from(format!("{}.sent", config.device_path));
        let sent_log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&sent_path)
            .map_err(map_io)?;
        Ok(Self {
            reader,
            sent_log,
            sent_path,
        })
    }
}

impl Transport for FileTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.sent_log.write_all(bytes).map_err(|e| {
            TransportError::Io(format!("append {}: {}", self.sent_path.display(), e))
        })
    }

    fn recv(&mut self, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut buf = [0u8; 1024];
        match self.reader.read(&mut buf) {
            Ok(0) => Err(TransportError::Disconnected), // recording exhausted
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) => Err(map_io(e)),
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::File
    }
}
