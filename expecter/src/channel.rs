// Copyright © 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::Instant;

use log::{debug, warn};

use crate::{Error, Result};

const READ_CHUNK_SIZE: usize = 4096;

/// A blocking duplex byte stream bound to one VM console.
pub trait ConsoleTransport: Read + Write + Send {
    /// Returns an independent handle on the same stream.
    fn clone_transport(&self) -> io::Result<Box<dyn ConsoleTransport>>;

    /// Shuts both directions down, waking up any blocked reader.
    fn close(&self) -> io::Result<()>;
}

impl ConsoleTransport for UnixStream {
    fn clone_transport(&self) -> io::Result<Box<dyn ConsoleTransport>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn close(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

impl ConsoleTransport for TcpStream {
    fn clone_transport(&self) -> io::Result<Box<dyn ConsoleTransport>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn close(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

/// Moves console bytes between a transport and two in-memory pipes.
///
/// A reader thread forwards every chunk read from the transport to the output
/// pipe, and a writer thread drains the input pipe into the transport. When
/// the remote end closes the stream the output pipe disconnects.
pub struct ConsoleChannel {
    transport: Box<dyn ConsoleTransport>,
    input: Option<flume::Sender<Vec<u8>>>,
    output: flume::Receiver<Vec<u8>>,
    reader: Option<thread::JoinHandle<()>>,
    writer: Option<thread::JoinHandle<()>>,
}

impl ConsoleChannel {
    pub fn new(transport: Box<dyn ConsoleTransport>) -> Result<Self> {
        let mut read_half = transport.clone_transport().map_err(Error::CloneTransport)?;
        let mut write_half = transport.clone_transport().map_err(Error::CloneTransport)?;
        let (input_tx, input_rx) = flume::unbounded::<Vec<u8>>();
        let (output_tx, output_rx) = flume::unbounded::<Vec<u8>>();

        let reader = thread::Builder::new()
            .name("console-reader".to_string())
            .spawn(move || {
                let mut chunk = [0u8; READ_CHUNK_SIZE];
                loop {
                    match read_half.read(&mut chunk) {
                        Ok(0) => {
                            debug!("Console stream reached end of file");
                            break;
                        }
                        Ok(count) => {
                            if output_tx.send(chunk[..count].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            debug!("Console read stopped: {e}");
                            break;
                        }
                    }
                }
            })
            .map_err(|e| Error::SpawnThread("reader", e))?;

        let writer = thread::Builder::new()
            .name("console-writer".to_string())
            .spawn(move || {
                for data in input_rx.iter() {
                    if let Err(e) = write_half.write_all(&data).and_then(|_| write_half.flush()) {
                        warn!("Console write failed: {e}");
                        break;
                    }
                }
            });

        let writer = match writer {
            Ok(writer) => writer,
            Err(e) => {
                transport.close().ok();
                reader.join().ok();
                return Err(Error::SpawnThread("writer", e));
            }
        };

        Ok(ConsoleChannel {
            transport,
            input: Some(input_tx),
            output: output_rx,
            reader: Some(reader),
            writer: Some(writer),
        })
    }

    /// Queues `data` for the writer thread.
    pub fn send(&self, data: &[u8]) -> Result<()> {
        self.input
            .as_ref()
            .ok_or(Error::StreamClosed)?
            .send(data.to_vec())
            .map_err(|_| Error::StreamClosed)
    }

    /// Waits for the next chunk of console output. Returns `Ok(None)` once
    /// `deadline` has passed.
    pub fn recv_deadline(&self, deadline: Instant) -> Result<Option<Vec<u8>>> {
        match self.output.recv_deadline(deadline) {
            Ok(chunk) => Ok(Some(chunk)),
            Err(flume::RecvTimeoutError::Timeout) => Ok(None),
            Err(flume::RecvTimeoutError::Disconnected) => Err(Error::StreamClosed),
        }
    }

    /// Returns the next chunk of console output if one is already queued.
    /// A closed stream is reported by the next [`ConsoleChannel::recv_deadline`].
    pub fn try_recv(&self) -> Option<Vec<u8>> {
        self.output.try_recv().ok()
    }
}

impl Drop for ConsoleChannel {
    fn drop(&mut self) {
        self.input.take();
        if let Err(e) = self.transport.close() {
            debug!("Console transport already shut down: {e}");
        }
        if let Some(handle) = self.writer.take() {
            handle.join().ok();
        }
        if let Some(handle) = self.reader.take() {
            handle.join().ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader};
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_channel_round_trip() {
        let (host, guest) = UnixStream::pair().unwrap();
        let echo = thread::spawn(move || {
            let mut reader = BufReader::new(guest.try_clone().unwrap());
            let mut writer = guest;
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            writer.write_all(format!("echo:{line}").as_bytes()).unwrap();
        });

        let channel = ConsoleChannel::new(Box::new(host)).unwrap();
        channel.send(b"ping\n").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut received = Vec::new();
        while !received.ends_with(b"\n") {
            match channel.recv_deadline(deadline) {
                Ok(Some(chunk)) => received.extend(chunk),
                other => panic!("unexpected channel state: {other:?}"),
            }
        }
        assert_eq!(received, b"echo:ping\n");
        echo.join().unwrap();
    }

    #[test]
    fn test_channel_reports_closed_stream() {
        let (host, guest) = UnixStream::pair().unwrap();
        drop(guest);

        let channel = ConsoleChannel::new(Box::new(host)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        assert!(matches!(
            channel.recv_deadline(deadline),
            Err(Error::StreamClosed)
        ));
    }

    #[test]
    fn test_channel_deadline_without_output() {
        let (host, _guest) = UnixStream::pair().unwrap();
        let channel = ConsoleChannel::new(Box::new(host)).unwrap();

        let deadline = Instant::now() + Duration::from_millis(50);
        assert!(matches!(channel.recv_deadline(deadline), Ok(None)));
    }

    #[test]
    fn test_channel_drop_joins_threads() {
        let (host, guest) = UnixStream::pair().unwrap();
        let channel = ConsoleChannel::new(Box::new(host)).unwrap();
        // The guest end stays open, so only the shutdown in drop can wake
        // the reader thread up.
        drop(channel);
        drop(guest);
    }
}
