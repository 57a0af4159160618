//! Byte transports
//!
//! A [`Transport`] is whatever carries frames to and from the device: the
//! FTDI serial port in production, an in-memory link in tests, or the demo
//! device simulator.

use serialport::SerialPort;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::ProtocolError;

/// Abstraction for the byte link to the device
pub trait Transport: Send {
    /// Write all bytes, returning how many were written
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, ProtocolError>;

    /// Read everything currently available. Each read waits at most
    /// `timeout`, so an idle link returns an empty vector quickly.
    fn read_available(&mut self, timeout: Duration) -> Result<Vec<u8>, ProtocolError>;

    /// Wait up to `timeout` for incoming data.
    ///
    /// Returns `true` when bytes are likely available.
    fn wait_for_data(&mut self, timeout: Duration) -> Result<bool, ProtocolError>;

    /// Clone a handle onto the same link, used for writes from other threads
    fn try_clone(&self) -> Result<Box<dyn Transport>, ProtocolError>;

    /// Release the link
    fn close(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// Serial port wrapper implementing Transport
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }

    /// Name of the underlying port, if the platform reports one
    pub fn name(&self) -> Option<String> {
        self.port.name()
    }
}

impl Transport for SerialTransport {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, ProtocolError> {
        self.port
            .write_all(data)
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
        Ok(data.len())
    }

    fn read_available(&mut self, timeout: Duration) -> Result<Vec<u8>, ProtocolError> {
        self.port.set_timeout(timeout)?;

        let mut received = Vec::new();
        let mut buffer = [0u8; 512];
        loop {
            match self.port.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&buffer[..n]),
                Err(ref e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock =>
                {
                    break
                }
                Err(e) => {
                    // Keep what was already drained; the caller sees the error next cycle
                    if received.is_empty() {
                        return Err(ProtocolError::SerialError(e.to_string()));
                    }
                    tracing::debug!("read error after {} bytes: {}", received.len(), e);
                    break;
                }
            }
        }
        Ok(received)
    }

    fn wait_for_data(&mut self, timeout: Duration) -> Result<bool, ProtocolError> {
        let start = Instant::now();
        loop {
            if self.port.bytes_to_read()? > 0 {
                return Ok(true);
            }
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn try_clone(&self) -> Result<Box<dyn Transport>, ProtocolError> {
        let port_clone = self.port.try_clone()?;
        Ok(Box::new(SerialTransport::new(port_clone)))
    }

    fn close(&mut self) -> Result<(), ProtocolError> {
        self.port.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryLinkState {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    fail_writes: bool,
    /// Number of upcoming reads that fail
    failing_reads: usize,
    closed: bool,
}

/// Test/inspection handle for a [`MemoryTransport`]
///
/// Bytes injected here are read by the transport; bytes the transport writes
/// are collected for inspection.
#[derive(Debug, Clone, Default)]
pub struct MemoryLink {
    state: Arc<Mutex<MemoryLinkState>>,
}

impl MemoryLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryLinkState> {
        // A panicking test thread must not wedge the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make bytes available to the reading side
    pub fn inject(&self, data: &[u8]) {
        self.lock().inbound.extend(data.iter().copied());
    }

    /// Everything written so far
    pub fn written(&self) -> Vec<u8> {
        self.lock().outbound.clone()
    }

    /// Take and clear everything written so far
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().outbound)
    }

    /// Make every subsequent write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Make the next `count` reads fail, leaving the inbound bytes in place
    pub fn fail_next_reads(&self, count: usize) {
        self.lock().failing_reads = count;
    }

    /// Reads still set to fail
    pub fn pending_read_failures(&self) -> usize {
        self.lock().failing_reads
    }

    /// Whether a transport on this link has been closed
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Build a transport on this link
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport { link: self.clone() }
    }
}

/// In-memory transport backed by a [`MemoryLink`]
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    link: MemoryLink,
}

impl Transport for MemoryTransport {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, ProtocolError> {
        let mut state = self.link.lock();
        if state.fail_writes {
            return Err(ProtocolError::SerialError("write failed".to_string()));
        }
        state.outbound.extend_from_slice(data);
        Ok(data.len())
    }

    fn read_available(&mut self, _timeout: Duration) -> Result<Vec<u8>, ProtocolError> {
        let mut state = self.link.lock();
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(ProtocolError::SerialError("read failed".to_string()));
        }
        Ok(state.inbound.drain(..).collect())
    }

    fn wait_for_data(&mut self, timeout: Duration) -> Result<bool, ProtocolError> {
        let start = Instant::now();
        loop {
            if !self.link.lock().inbound.is_empty() {
                return Ok(true);
            }
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn try_clone(&self) -> Result<Box<dyn Transport>, ProtocolError> {
        Ok(Box::new(self.clone()))
    }

    fn close(&mut self) -> Result<(), ProtocolError> {
        self.link.lock().closed = true;
        Ok(())
    }
}

/// TCP stream wrapper implementing Transport, for serial-over-network bridges
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl Transport for TcpTransport {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, ProtocolError> {
        self.stream.write_all(data)?;
        Ok(data.len())
    }

    fn read_available(&mut self, timeout: Duration) -> Result<Vec<u8>, ProtocolError> {
        self.stream
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        let mut received = Vec::new();
        let mut buffer = [0u8; 512];
        loop {
            match self.stream.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&buffer[..n]),
                Err(ref e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock =>
                {
                    break
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(received)
    }

    fn wait_for_data(&mut self, timeout: Duration) -> Result<bool, ProtocolError> {
        self.stream.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        let mut peeked = [0u8; 1];
        match self.stream.peek(&mut peeked) {
            // The peer closed the connection
            Ok(0) => Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
            Ok(_) => Ok(true),
            Err(ref e)
                if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn try_clone(&self) -> Result<Box<dyn Transport>, ProtocolError> {
        Ok(Box::new(TcpTransport::new(self.stream.try_clone()?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_transport_reads_injected_bytes() {
        let link = MemoryLink::new();
        let mut transport = link.transport();

        assert!(!transport.wait_for_data(Duration::from_millis(2)).unwrap());
        link.inject(&[1, 2, 3]);
        assert!(transport.wait_for_data(Duration::from_millis(2)).unwrap());
        assert_eq!(transport.read_available(Duration::from_millis(1)).unwrap(), vec![1, 2, 3]);
        assert!(transport.read_available(Duration::from_millis(1)).unwrap().is_empty());
    }

    #[test]
    fn test_memory_transport_clone_shares_link() {
        let link = MemoryLink::new();
        let transport = link.transport();
        let mut writer = transport.try_clone().unwrap();

        writer.write_bytes(b"abc").unwrap();
        assert_eq!(link.take_written(), b"abc".to_vec());
        assert!(link.written().is_empty());
    }

    #[test]
    fn test_memory_transport_write_failure() {
        let link = MemoryLink::new();
        let mut transport = link.transport();
        link.set_fail_writes(true);
        assert!(matches!(
            transport.write_bytes(b"x"),
            Err(ProtocolError::SerialError(_))
        ));
    }

    #[test]
    fn test_memory_transport_read_failure_keeps_bytes() {
        let link = MemoryLink::new();
        let mut transport = link.transport();
        link.inject(&[7, 8]);
        link.fail_next_reads(1);

        assert!(transport.read_available(Duration::from_millis(1)).is_err());
        assert_eq!(link.pending_read_failures(), 0);
        assert_eq!(transport.read_available(Duration::from_millis(1)).unwrap(), vec![7, 8]);
    }

    #[test]
    fn test_tcp_transport_reports_closed_peer() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpTransport::new(TcpStream::connect(addr).unwrap());
        let (server, _) = listener.accept().unwrap();
        drop(server);

        let err = client.wait_for_data(Duration::from_millis(500)).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::IoError(ref e) if e.kind() == io::ErrorKind::UnexpectedEof
        ));
    }

    #[test]
    fn test_tcp_transport_exchanges_bytes() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpTransport::new(TcpStream::connect(addr).unwrap());
        let (mut server, _) = listener.accept().unwrap();

        server.write_all(&[0xC0, b'H', 0xC0]).unwrap();
        assert!(client.wait_for_data(Duration::from_millis(500)).unwrap());
        assert_eq!(
            client.read_available(Duration::from_millis(20)).unwrap(),
            vec![0xC0, b'H', 0xC0]
        );

        client.write_bytes(b"ping").unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }
}
