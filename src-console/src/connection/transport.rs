//! Ways of reaching the scanner.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Give up on a TCP connect after this long and let backoff take over.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const MEMORY_LINK_BUFFER: usize = 64 * 1024;

/// Opens byte streams to the device.
pub trait Connector {
    type Io: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Start one connection attempt. The future owns everything it needs so the
    /// manager can keep it in flight across other callbacks.
    fn connect(&self) -> BoxFuture<'static, io::Result<Self::Io>>;

    /// Where this connector points, for logs.
    fn endpoint(&self) -> String;
}

/// Plain TCP to `host:port`.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl Connector for TcpConnector {
    type Io = TcpStream;

    fn connect(&self) -> BoxFuture<'static, io::Result<TcpStream>> {
        let addr = self.addr.clone();
        Box::pin(async move {
            let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr.as_str()))
                .await
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect to {} timed out", addr),
                    )
                })??;
            stream.set_nodelay(true)?;
            Ok(stream)
        })
    }

    fn endpoint(&self) -> String {
        self.addr.clone()
    }
}

/// Create an in-process link: the connector half goes to the console, the
/// device half to whatever plays the scanner.
pub fn memory_link() -> (MemoryConnector, MemoryDevice) {
    let (tx, rx) = mpsc::unbounded_channel();
    let accepting = Arc::new(AtomicBool::new(true));
    (
        MemoryConnector {
            sessions: tx,
            accepting: accepting.clone(),
        },
        MemoryDevice {
            sessions: rx,
            accepting,
        },
    )
}

/// Connector over in-memory duplex pipes.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    sessions: mpsc::UnboundedSender<DuplexStream>,
    accepting: Arc<AtomicBool>,
}

impl Connector for MemoryConnector {
    type Io = DuplexStream;

    fn connect(&self) -> BoxFuture<'static, io::Result<DuplexStream>> {
        let sessions = self.sessions.clone();
        let accepting = self.accepting.clone();
        Box::pin(async move {
            if !accepting.load(Ordering::SeqCst) {
                return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
            }
            let (client, device) = tokio::io::duplex(MEMORY_LINK_BUFFER);
            sessions
                .send(device)
                .map_err(|_| io::Error::from(io::ErrorKind::ConnectionRefused))?;
            Ok(client)
        })
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }
}

/// Device side of a memory link.
#[derive(Debug)]
pub struct MemoryDevice {
    sessions: mpsc::UnboundedReceiver<DuplexStream>,
    accepting: Arc<AtomicBool>,
}

impl MemoryDevice {
    /// Wait for the console's next session. `None` once every connector is gone.
    pub async fn accept(&mut self) -> Option<DuplexStream> {
        self.sessions.recv().await
    }

    /// Refuse (or accept again) future connection attempts.
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }
}
