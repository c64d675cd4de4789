//! Stream-oriented underlay over a connected tokio `TcpStream`.
//!
//! TCP has no message boundaries, so every segment is framed by its own
//! fixed-size metadata header: read [`METADATA_LEN`] bytes, decode the header
//! to learn `payload_len`, then read exactly that many payload bytes.
//!
//! Dialing, accepting and any byte-level obfuscation are the caller's
//! business; this type starts from an already connected stream.
//!
//! Cancelling [`TcpUnderlay::run_read_loop`] may drop a frame half read, so
//! the read side is retired when that happens and later reads fail with
//! [`Error::Closed`].

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::{ip_version_of, Underlay};
use crate::error::{Error, Result};
use crate::protocol::{IpVersion, TransportProtocol};
use crate::segment::{Metadata, Segment, METADATA_LEN};

#[derive(Debug)]
pub struct TcpUnderlay {
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    /// Set once a read was cancelled; the stream may be mid-frame.
    read_retired: AtomicBool,
}

impl TcpUnderlay {
    pub fn new(stream: TcpStream) -> Result<Self> {
        let local_addr = stream.local_addr()?;
        let remote_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            local_addr,
            remote_addr,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            read_retired: AtomicBool::new(false),
        })
    }

    /// Read and decode the next framed segment from the stream.
    pub async fn read_segment(&self) -> Result<Segment> {
        let mut reader = self.reader.lock().await;
        if self.read_retired.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let mut header = [0u8; METADATA_LEN];
        reader.read_exact(&mut header).await?;
        let metadata = Metadata::decode(&header)?;

        let mut payload = vec![0u8; usize::from(metadata.payload_len())];
        reader.read_exact(&mut payload).await?;
        Ok(Segment { metadata, payload })
    }

    /// Forward every inbound segment to `inbound` until the peer hangs up,
    /// the receiving session goes away, or `cancel` fires.
    pub async fn run_read_loop(
        &self,
        inbound: mpsc::Sender<Segment>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.read_retired.store(true, Ordering::Release);
                    return Ok(());
                }
                result = self.read_segment() => {
                    let seg = match result {
                        Ok(seg) => seg,
                        Err(Error::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                            log::debug!("[tcp-underlay] {} closed the stream", self.remote_addr);
                            return Ok(());
                        }
                        Err(e) => {
                            return Err(e).with_context(|| {
                                format!("read_segment() from {} failed", self.remote_addr)
                            });
                        }
                    };
                    log::trace!(
                        "[tcp-underlay] ← {} session={} seq={} len={}",
                        seg.protocol(),
                        seg.session_id(),
                        seg.seq(),
                        seg.payload.len()
                    );
                    if inbound.send(seg).await.is_err() {
                        log::debug!("[tcp-underlay] inbound channel closed; stopping reader");
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Underlay for TcpUnderlay {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    fn ip_version(&self) -> IpVersion {
        ip_version_of(&self.remote_addr)
    }

    fn transport_protocol(&self) -> TransportProtocol {
        TransportProtocol::Tcp
    }

    async fn write_segment(&self, seg: &Segment) -> Result<()> {
        let bytes = seg.encode()?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::net::TcpListener;

    use super::*;
    use crate::protocol::Protocol;
    use crate::segment::DataAck;

    async fn pair() -> (TcpUnderlay, TcpUnderlay) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let client = TcpUnderlay::new(client.expect("connect")).unwrap();
        let server = TcpUnderlay::new(accepted.expect("accept").0).unwrap();
        (client, server)
    }

    fn data(seq: u32, payload: &[u8]) -> Segment {
        Segment {
            metadata: Metadata::DataAck(DataAck {
                protocol: Protocol::DataClientToServer,
                session_id: 11,
                seq,
                un_ack_seq: 0,
                window_size: 16,
                fragment: 0,
                payload_len: payload.len() as u16,
            }),
            payload: payload.to_vec(),
        }
    }

    #[tokio::test]
    async fn addresses_mirror_each_other() {
        let (client, server) = pair().await;
        assert_eq!(client.local_addr(), server.remote_addr());
        assert_eq!(client.remote_addr(), server.local_addr());
        assert_eq!(client.ip_version(), IpVersion::V4);
        assert_eq!(client.transport_protocol(), TransportProtocol::Tcp);
    }

    #[tokio::test]
    async fn segments_keep_their_boundaries_on_the_stream() {
        let (client, server) = pair().await;
        let sent = vec![data(0, b"first"), data(1, b""), data(2, &[0xab; 3000])];
        for seg in &sent {
            client.write_segment(seg).await.unwrap();
        }
        for expected in &sent {
            let got = server.read_segment().await.unwrap();
            assert_eq!(&got, expected);
        }
    }

    #[tokio::test]
    async fn read_loop_forwards_until_cancelled() {
        let (client, server) = pair().await;
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let reader = {
            let cancel = cancel.clone();
            tokio::spawn(async move { server.run_read_loop(tx, cancel).await })
        };

        client.write_segment(&data(5, b"ping")).await.unwrap();
        let got = rx.recv().await.expect("segment forwarded");
        assert_eq!(got.seq(), 5);
        assert_eq!(got.payload, b"ping");

        cancel.cancel();
        reader.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancelled_read_loop_retires_the_read_side() {
        let (client, server) = pair().await;
        let server = Arc::new(server);
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let reader = {
            let server = Arc::clone(&server);
            let cancel = cancel.clone();
            tokio::spawn(async move { server.run_read_loop(tx, cancel).await })
        };
        // Half a header is on the wire when the loop is cancelled.
        {
            let mut writer = client.writer.lock().await;
            writer.write_all(&[0u8; METADATA_LEN / 2]).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        reader.await.unwrap().unwrap();

        client.write_segment(&data(1, b"late")).await.unwrap();
        assert!(matches!(server.read_segment().await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn read_loop_ends_cleanly_on_peer_close() {
        let (client, server) = pair().await;
        let (tx, _rx) = mpsc::channel(8);
        drop(client);
        server
            .run_read_loop(tx, CancellationToken::new())
            .await
            .expect("EOF is a clean shutdown");
    }
}
