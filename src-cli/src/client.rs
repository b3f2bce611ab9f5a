//! Direct connection to the scanner for one-shot commands.

use std::time::Duration;

use rfscan_common::wire::{read_json, write_json, InboundMessage, OutboundMessage};
use rfscan_common::{Settings, SpectrumFrame, Statistics, WireError};
use rfscan_console::connection::CONNECT_TIMEOUT;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Line-protocol client talking straight to the device.
pub struct Client {
    addr: String,
    timeout: Duration,
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: Option<OwnedWriteHalf>,
}

impl Client {
    /// Create a new client (not connected).
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            reader: None,
            writer: None,
        }
    }

    pub async fn connect(&mut self) -> Result<(), WireError> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(self.addr.as_str()))
            .await
            .map_err(|_| timed_out("connect"))??;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        self.reader = Some(BufReader::new(read));
        self.writer = Some(write);
        Ok(())
    }

    pub async fn send(&mut self, message: &OutboundMessage) -> Result<(), WireError> {
        let writer = self.writer.as_mut().ok_or(WireError::Closed)?;
        write_json(writer, message).await
    }

    /// Next well-formed message from the device, within the client timeout.
    pub async fn next_message(&mut self) -> Result<InboundMessage, WireError> {
        let reader = self.reader.as_mut().ok_or(WireError::Closed)?;
        loop {
            match tokio::time::timeout(self.timeout, read_json(reader)).await {
                Ok(Err(WireError::Json(e))) => eprintln!("Skipping malformed message: {}", e),
                Ok(result) => return result,
                Err(_) => return Err(timed_out("waiting for the device")),
            }
        }
    }

    /// Skip ahead to the next settings snapshot.
    pub async fn next_settings(&mut self) -> Result<Settings, WireError> {
        loop {
            if let InboundMessage::Settings { settings } = self.next_message().await? {
                return Ok(settings);
            }
        }
    }

    /// Skip ahead to the next spectrum frame.
    pub async fn next_frame(&mut self) -> Result<(SpectrumFrame, Option<Statistics>), WireError> {
        loop {
            if let InboundMessage::Spectrum { data, statistics } = self.next_message().await? {
                return Ok((data, statistics));
            }
        }
    }

    /// Skip ahead to the reply to a `reinit` command.
    pub async fn next_reinit_status(&mut self) -> Result<String, WireError> {
        loop {
            if let InboundMessage::ReinitStatus { status } = self.next_message().await? {
                return Ok(status);
            }
        }
    }
}

fn timed_out(what: &str) -> WireError {
    WireError::Io(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("timed out {}", what),
    ))
}
