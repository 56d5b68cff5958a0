//! Transport boundary.
//!
//! The client runs over any bidirectional byte stream. Establishing the
//! link (name resolution, link bring-up) belongs to the caller; the
//! client only needs the split halves below. [`TcpConnection`] covers
//! the common case.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// Poll interval for the transport reader's bounded reads.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// A bidirectional byte stream a client session runs over.
pub trait Connection: Send {
    /// Split into independently owned halves. The read half goes to the
    /// transport reader thread; write access stays with the client and
    /// its workers.
    fn split(self: Box<Self>) -> io::Result<(Box<dyn ConnectionRead>, Box<dyn ConnectionWrite>)>;
}

/// Read half of a connection.
pub trait ConnectionRead: Send {
    /// Read available bytes. Must return within a bounded interval,
    /// failing with `WouldBlock`/`TimedOut` when nothing arrived, so
    /// the reader thread can observe shutdown. `Ok(0)` means the peer
    /// closed the stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Write half of a connection.
pub trait ConnectionWrite: Send {
    /// Write the whole buffer; a short write is a write failure.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Close the stream. Wakes a blocked reader on the other half.
    fn close(&mut self);
}

/// Plain TCP transport.
pub struct TcpConnection(TcpStream);

impl TcpConnection {
    /// Open a TCP stream to the broker.
    pub fn connect(host: &str, port: u16) -> io::Result<Self> {
        let stream = TcpStream::connect((host, port))?;
        stream.set_nodelay(true)?;
        Ok(TcpConnection(stream))
    }
}

impl From<TcpStream> for TcpConnection {
    fn from(stream: TcpStream) -> Self {
        TcpConnection(stream)
    }
}

impl Connection for TcpConnection {
    fn split(self: Box<Self>) -> io::Result<(Box<dyn ConnectionRead>, Box<dyn ConnectionWrite>)> {
        let read = self.0.try_clone()?;
        read.set_read_timeout(Some(READ_TIMEOUT))?;
        Ok((Box::new(TcpReadHalf(read)), Box::new(TcpWriteHalf(self.0))))
    }
}

struct TcpReadHalf(TcpStream);

impl ConnectionRead for TcpReadHalf {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut self.0, buf)
    }
}

struct TcpWriteHalf(TcpStream);

impl ConnectionWrite for TcpWriteHalf {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        Write::write_all(&mut self.0, buf)
    }

    fn close(&mut self) {
        let _ = self.0.shutdown(Shutdown::Both);
    }
}
