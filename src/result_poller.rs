use crate::payload::{decode_payload, PayloadError};
use crate::types::{MeasurementSample, PollerEvent, SegmentationResult};
use chrono::Local;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use std::io::{self, Read};
use std::net::TcpStream;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Segmentation server address, `host:port`.
    pub server: String,
    pub period: Duration,
    /// `None` blocks until the server closes the connection.
    pub read_timeout: Option<Duration>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:80".to_string(),
            period: Duration::from_millis(1000),
            read_timeout: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("connect to {addr}: {source}")]
    Connect { addr: String, source: io::Error },
    #[error("read from server: {0}")]
    Read(io::Error),
    #[error("bad payload: {0}")]
    Payload(#[from] PayloadError),
}

impl PollError {
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, PollError::Connect { source, .. } if source.kind() == io::ErrorKind::ConnectionRefused)
    }
}

/// Fetches one segmentation result per connection.
#[derive(Debug, Clone)]
pub struct ResultClient {
    addr: String,
    read_timeout: Option<Duration>,
}

impl ResultClient {
    pub fn new(addr: impl Into<String>, read_timeout: Option<Duration>) -> Self {
        Self {
            addr: addr.into(),
            read_timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Connect, read until the server closes, decode the whole reply.
    pub fn receive(&self) -> Result<SegmentationResult, PollError> {
        let mut stream = TcpStream::connect(&self.addr).map_err(|source| PollError::Connect {
            addr: self.addr.clone(),
            source,
        })?;
        stream
            .set_read_timeout(self.read_timeout)
            .map_err(PollError::Read)?;

        let mut payload = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => payload.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(PollError::Read(e)),
            }
        }
        debug!("Received {} bytes from {}", payload.len(), self.addr);

        Ok(decode_payload(&payload)?)
    }
}

/// Background worker that polls the server on a fixed period and reports
/// to the UI thread over a channel.
///
/// Polling stops for good on the first failure. A refused connection is
/// reported as `PollerEvent::Disconnected`, anything else as `Failed`.
pub struct ResultPoller {
    client: ResultClient,
    period: Duration,
    events: Sender<PollerEvent>,
}

impl ResultPoller {
    pub fn new(config: &PollerConfig, events: Sender<PollerEvent>) -> Self {
        Self {
            client: ResultClient::new(config.server.clone(), config.read_timeout),
            period: config.period,
            events,
        }
    }

    pub fn spawn(self) -> io::Result<PollerHandle> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("result-poller".into())
            .spawn(move || self.run(shutdown_rx))?;
        Ok(PollerHandle {
            shutdown_tx,
            handle,
        })
    }

    /// Blocks the calling thread. The first poll happens one period in.
    pub fn run(self, shutdown: Receiver<()>) {
        info!(
            "Polling {} every {:?}",
            self.client.addr(),
            self.period
        );
        let mut polls: u64 = 0;

        loop {
            match shutdown.recv_timeout(self.period) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            let event = match self.client.receive() {
                Ok(result) => PollerEvent::Measurement {
                    sample: MeasurementSample {
                        timestamp: Local::now(),
                        fractions: result.fractions,
                    },
                    mask: result.mask,
                },
                Err(e) if e.is_connection_refused() => {
                    warn!("Server refused connection: {}", e);
                    let _ = self.events.send(PollerEvent::Disconnected);
                    break;
                }
                Err(e) => {
                    error!("Poll failed: {}", e);
                    let _ = self.events.send(PollerEvent::Failed(e.to_string()));
                    break;
                }
            };

            polls += 1;
            if self.events.send(event).is_err() {
                debug!("UI receiver gone");
                break;
            }
        }

        info!("Result poller stopped after {} polls", polls);
    }
}

pub struct PollerHandle {
    shutdown_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl PollerHandle {
    /// True once the worker has exited (stopped, refused, or failed).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Ask the worker to stop and wait for it. An in-flight poll finishes first.
    pub fn stop(self) {
        let _ = self.shutdown_tx.try_send(());
        if self.handle.join().is_err() {
            error!("Result poller thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::encode_payload;
    use crate::types::Fractions;
    use image::RgbImage;
    use std::io::Write;
    use std::net::TcpListener;

    fn refused_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        addr
    }

    /// Serve `replies` one per connection, then stop accepting.
    fn serve(replies: Vec<Vec<u8>>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        thread::spawn(move || {
            for reply in replies {
                let (mut stream, _) = listener.accept().unwrap();
                // Split writes to exercise the chunked read
                for part in reply.chunks(1000) {
                    stream.write_all(part).unwrap();
                }
            }
        });
        addr
    }

    fn result(oil: f64) -> SegmentationResult {
        SegmentationResult {
            mask: RgbImage::new(64, 64),
            fractions: Fractions::new(oil, 10.0, 90.0 - oil),
        }
    }

    #[test]
    fn test_receive_reads_until_close() {
        let addr = serve(vec![encode_payload(&result(30.0))]);
        let client = ResultClient::new(addr, None);
        let got = client.receive().unwrap();
        assert_eq!(got.fractions, Fractions::new(30.0, 10.0, 60.0));
        assert_eq!(got.mask.dimensions(), (64, 64));
    }

    #[test]
    fn test_refused_is_classified() {
        let client = ResultClient::new(refused_addr(), None);
        let err = client.receive().unwrap_err();
        assert!(err.is_connection_refused(), "got {}", err);
    }

    #[test]
    fn test_garbage_is_payload_error() {
        let addr = serve(vec![b"not a payload".to_vec()]);
        let err = ResultClient::new(addr, None).receive().unwrap_err();
        assert!(matches!(err, PollError::Payload(_)));
        assert!(!err.is_connection_refused());
    }

    #[test]
    fn test_poller_stops_on_refusal() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let config = PollerConfig {
            server: refused_addr(),
            period: Duration::from_millis(10),
            read_timeout: None,
        };
        let handle = ResultPoller::new(&config, tx).spawn().unwrap();
        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(event, PollerEvent::Disconnected));
        // Worker exits and drops its sender: no further events
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_err());
        handle.stop();
    }

    #[test]
    fn test_poller_delivers_in_order_then_disconnects() {
        let addr = serve(vec![
            encode_payload(&result(10.0)),
            encode_payload(&result(20.0)),
        ]);
        let (tx, rx) = crossbeam_channel::unbounded();
        let config = PollerConfig {
            server: addr,
            period: Duration::from_millis(10),
            read_timeout: Some(Duration::from_secs(5)),
        };
        let handle = ResultPoller::new(&config, tx).spawn().unwrap();

        let mut oils = Vec::new();
        for _ in 0..2 {
            match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                PollerEvent::Measurement { sample, .. } => oils.push(sample.fractions.oil),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(oils, vec![10.0, 20.0]);
        // Listener is gone after two replies
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            PollerEvent::Disconnected
        ));
        handle.stop();
    }

    #[test]
    fn test_stop_before_first_poll() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let config = PollerConfig {
            server: refused_addr(),
            period: Duration::from_secs(60),
            read_timeout: None,
        };
        let handle = ResultPoller::new(&config, tx).spawn().unwrap();
        handle.stop();
        assert!(rx.try_recv().is_err());
    }
}
