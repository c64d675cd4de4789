//! Reliable session: ordered, fragmented, flow-controlled byte messages over
//! an underlay.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │ write(buf)                                   read(buf) ▲
//!      ▼                                                        │
//!  fragmentation                                   reassembly (fragment == 0)
//!      │                                                        │
//!  ┌───▼────────┐                                       ┌───────┴────┐
//!  │ send_queue │                                       │ recv_queue │
//!  └───┬────────┘                                       └───────▲────┘
//!      │ output loop (poll + sleep)        input loop (classify)│
//!      ▼                                                        │
//!  Underlay::write_segment                    inbound channel ──┘
//! ```
//!
//! The application side (`read`/`write`) and the network side (the two loops)
//! never share a lock.  They meet only in the [`crate::segment_tree::SegmentTree`]s, so network
//! progress continues whether or not the application is blocked.
//!
//! # Concurrency
//!
//! - `read` calls exclude each other, as do `write` calls.
//! - `write` suspends while `send_queue` is full; `read` suspends while
//!   `recv_queue` has no complete message.
//! - The output loop never blocks on its queue.  It polls and sleeps for
//!   [`SessionConfig::poll_interval`], staying responsive to cancellation.
//!
//! # Shutdown
//!
//! [`Session::close`] marks the session closing, releases any `read`/`write`
//! suspended on a tree, waits for both exclusion locks, and then fires the
//! `done` token that stops both loops.  Tokens fire at most once no matter
//! how many times, or how concurrently, `close` is called.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Instant;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::protocol::{fragment_count, max_fragment_size, Protocol, Role, MAX_PDU};
use crate::segment::{DataAck, Metadata, Segment};
use crate::state::SessionState;
use crate::transport::{self, classify, Inbound, Queues, Transport};
use crate::underlay::Underlay;

/// Underlay plus the transport strategy chosen for it.
struct Attachment {
    underlay: Arc<dyn Underlay>,
    /// `None` when the underlay's transport kind has no strategy yet.
    transport: Option<Arc<dyn Transport>>,
}

impl Attachment {
    fn transport(&self) -> Result<&Arc<dyn Transport>> {
        self.transport.as_ref().ok_or_else(|| {
            Error::Unsupported(format!(
                "transport protocol {}",
                self.underlay.transport_protocol()
            ))
        })
    }
}

/// State guarded by the read exclusion lock.
#[derive(Default)]
struct ReadHalf {
    /// A reassembled message the caller's buffer was too small for.
    unread: Vec<u8>,
    /// Fragments of a message whose last piece has not been dequeued yet.
    partial: Vec<u8>,
}

/// State guarded by the write exclusion lock.
#[derive(Default)]
struct WriteHalf {
    next_seq: u32,
}

pub struct Session {
    id: u32,
    role: Role,
    config: SessionConfig,
    state: Mutex<SessionState>,
    attachment: OnceLock<Attachment>,

    queues: Queues,
    recv_tx: mpsc::Sender<Segment>,
    recv_rx: tokio::sync::Mutex<mpsc::Receiver<Segment>>,

    /// Stamped on outbound segments. Never advanced: a stream underlay
    /// carries no ack bookkeeping.
    un_ack_seq: u32,

    read_half: tokio::sync::Mutex<ReadHalf>,
    write_half: tokio::sync::Mutex<WriteHalf>,

    /// Fired when close begins; releases suspended application calls.
    closing: CancellationToken,
    /// Fired once close has passed the read/write barrier; stops the loops.
    done: CancellationToken,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session with default capacities and the given path MTU.
    pub fn new(id: u32, role: Role, mtu: usize) -> Result<Self> {
        Self::with_config(id, role, SessionConfig::default().with_mtu(mtu))
    }

    pub fn with_config(id: u32, role: Role, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let (recv_tx, recv_rx) = mpsc::channel(config.chan_capacity);
        Ok(Self {
            id,
            role,
            queues: Queues::new(config.tree_capacity),
            config,
            state: Mutex::new(SessionState::Init),
            attachment: OnceLock::new(),
            recv_tx,
            recv_rx: tokio::sync::Mutex::new(recv_rx),
            un_ack_seq: 0,
            read_half: tokio::sync::Mutex::new(ReadHalf::default()),
            write_half: tokio::sync::Mutex::new(WriteHalf::default()),
            closing: CancellationToken::new(),
            done: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn mtu(&self) -> usize {
        self.config.mtu
    }

    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    /// Advance the lifecycle on behalf of the session multiplexer.
    ///
    /// Closing and closed are owned by [`Session::close`] and cannot be set
    /// or left from here.
    pub fn set_state(&self, next: SessionState) -> Result<()> {
        let mut state = self.lock_state();
        if state.is_closing() || next.is_closing() {
            return Err(Error::InvalidArgument(format!(
                "session {} cannot move from {} to {next} outside close()",
                self.id, *state
            )));
        }
        log::debug!("[session:{}] {} → {next}", self.id, *state);
        *state = next;
        Ok(())
    }

    /// Sender the underlay pushes decoded inbound segments into.
    pub fn inbound(&self) -> mpsc::Sender<Segment> {
        self.recv_tx.clone()
    }

    /// Receive capacity advertised to the peer.
    pub fn window(&self) -> u16 {
        u16::try_from(self.queues.recv_buf.remaining()).unwrap_or(u16::MAX)
    }

    /// Bind this session to the network transport it will use.
    pub fn attach(&self, underlay: Arc<dyn Underlay>) -> Result<()> {
        let mut state = self.lock_state();
        if state.is_attached() {
            return Err(Error::InvalidArgument(format!(
                "cannot attach session {} in state {}",
                self.id, *state
            )));
        }
        let protocol = underlay.transport_protocol();
        let transport = match transport::select(protocol) {
            Ok(t) => {
                log::debug!("[session:{}] using the {} strategy", self.id, t.protocol());
                Some(t)
            }
            Err(e) => {
                log::warn!("[session:{}] {e}; network loops will refuse to run", self.id);
                None
            }
        };
        self.attachment
            .set(Attachment {
                underlay,
                transport,
            })
            .map_err(|_| Error::InvalidArgument(format!("session {} is already attached", self.id)))?;
        *state = SessionState::Attached;
        log::debug!("[session:{}] attached to {protocol} underlay", self.id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Application I/O
    // -----------------------------------------------------------------------

    /// Read one message.
    ///
    /// Message boundaries of the peer's writes are preserved.  When `buf` is
    /// too small for the next message, [`Error::ShortBuffer`] is returned,
    /// nothing is copied into `buf` and the whole message is kept for the
    /// next call.  Its fragments have already left the receive queue if this
    /// call was the one that reassembled it.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        let mut half = self.read_half.lock().await;
        self.check_open()?;

        if !half.unread.is_empty() {
            if buf.len() < half.unread.len() {
                return Err(Error::ShortBuffer);
            }
            let n = half.unread.len();
            buf[..n].copy_from_slice(&half.unread);
            half.unread.clear();
            return Ok(n);
        }

        loop {
            let seg = tokio::select! {
                biased;
                seg = self.queues.recv_queue.delete_min_blocking() => seg,
                _ = self.closing.cancelled() => return Err(Error::Closed),
            };
            let fragment = seg.fragment()?;
            half.partial.extend_from_slice(&seg.payload);
            if fragment == 0 {
                break;
            }
        }
        let message = std::mem::take(&mut half.partial);

        if buf.len() < message.len() {
            half.unread = message;
            return Err(Error::ShortBuffer);
        }
        buf[..message.len()].copy_from_slice(&message);
        Ok(message.len())
    }

    /// Queue one message for sending.
    ///
    /// Returns once every fragment is in the send queue; delivery is not
    /// awaited.  Messages longer than [`MAX_PDU`] are refused with
    /// [`Error::ShortWrite`] and nothing is queued.
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        if buf.len() > MAX_PDU {
            return Err(Error::ShortWrite);
        }
        self.check_open()?;
        let underlay = &self.attachment()?.underlay;

        let mut half = self.write_half.lock().await;
        self.check_open()?;

        let fragment_size = max_fragment_size(
            self.config.mtu,
            underlay.ip_version(),
            underlay.transport_protocol(),
        );
        let n_fragment = fragment_count(buf.len(), fragment_size)?;
        let protocol = Protocol::outbound_data(self.role);

        let mut rest = buf;
        for i in (0..n_fragment).rev() {
            let (part, tail) = rest.split_at(fragment_size.min(rest.len()));
            rest = tail;
            let seg = Segment {
                metadata: Metadata::DataAck(DataAck {
                    protocol,
                    session_id: self.id,
                    seq: half.next_seq,
                    un_ack_seq: self.un_ack_seq,
                    window_size: self.window(),
                    // fragment_count caps the count at 256.
                    fragment: i as u8,
                    payload_len: part.len() as u16,
                }),
                payload: part.to_vec(),
            };
            half.next_seq = half.next_seq.wrapping_add(1);

            tokio::select! {
                biased;
                _ = self.queues.send_queue.insert_blocking(seg) => {}
                _ = self.closing.cancelled() => return Err(Error::Closed),
            }
        }
        Ok(buf.len())
    }

    /// Stop the session.
    ///
    /// Refuses new reads and writes, waits for in-flight ones to return, then
    /// stops both loops.  Calling it again, from any task, is a no-op.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.lock_state();
            if state.is_closing() {
                return Ok(());
            }
            *state = SessionState::Closing;
        }
        self.closing.cancel();

        let _read = self.read_half.lock().await;
        let _write = self.write_half.lock().await;
        self.done.cancel();
        *self.lock_state() = SessionState::Closed;
        log::debug!("[session:{}] closed", self.id);
        Ok(())
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.attachment()?.underlay.local_addr())
    }

    pub fn remote_addr(&self) -> Result<SocketAddr> {
        Ok(self.attachment()?.underlay.remote_addr())
    }

    pub fn set_deadline(&self, _deadline: Instant) -> Result<()> {
        Err(Error::Unsupported("deadlines".into()))
    }

    pub fn set_read_deadline(&self, _deadline: Instant) -> Result<()> {
        Err(Error::Unsupported("read deadlines".into()))
    }

    pub fn set_write_deadline(&self, _deadline: Instant) -> Result<()> {
        Err(Error::Unsupported("write deadlines".into()))
    }

    // -----------------------------------------------------------------------
    // Network loops
    // -----------------------------------------------------------------------

    /// Spawn both loops under `cancel` and return their handles.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> SessionTasks {
        let input = {
            let session = Arc::clone(self);
            let cancel = cancel.clone();
            tokio::spawn(async move { session.run_input_loop(cancel).await })
        };
        let output = {
            let session = Arc::clone(self);
            tokio::spawn(async move { session.run_output_loop(cancel).await })
        };
        SessionTasks { input, output }
    }

    /// Drain the inbound channel into the receive side until cancelled.
    ///
    /// Any classification or dispatch failure ends the loop; it is not
    /// restarted.
    pub async fn run_input_loop(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let attachment = self.attachment().context("input loop")?;
        let transport = Arc::clone(attachment.transport().context("input loop")?);
        let mut recv_rx = self
            .recv_rx
            .try_lock()
            .map_err(|_| anyhow::anyhow!("input loop of session {} is already running", self.id))?;
        log::debug!("[session:{}] input loop started", self.id);

        loop {
            let seg = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.done.cancelled() => break,
                seg = recv_rx.recv() => match seg {
                    Some(seg) => seg,
                    None => break,
                },
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.done.cancelled() => break,
                result = self.input(transport.as_ref(), seg) => {
                    if let Err(e) = result {
                        log::error!("[session:{}] input loop failed: {e}", self.id);
                        return Err(e).context("input() failed");
                    }
                }
            }
        }
        log::debug!("[session:{}] input loop stopped", self.id);
        Ok(())
    }

    /// Move segments from the send queue to the underlay until cancelled.
    pub async fn run_output_loop(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let attachment = self.attachment().context("output loop")?;
        let transport = Arc::clone(attachment.transport().context("output loop")?);
        let underlay = Arc::clone(&attachment.underlay);
        log::debug!("[session:{}] output loop started", self.id);

        loop {
            if cancel.is_cancelled() || self.done.is_cancelled() {
                break;
            }
            let next = transport
                .next_outbound(&self.queues)
                .context("sendQueue.delete_min() failed")?;
            let Some(seg) = next else {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.done.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
                continue;
            };

            log::trace!(
                "[session:{}] → {} seq={} len={}",
                self.id,
                seg.protocol(),
                seg.seq(),
                seg.payload.len()
            );
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.done.cancelled() => break,
                result = transport.write_segment(underlay.as_ref(), seg, &self.queues) => {
                    if let Err(e) = result {
                        log::error!("[session:{}] output loop failed: {e}", self.id);
                        return Err(e).context("output() failed");
                    }
                }
            }
        }
        log::debug!("[session:{}] output loop stopped", self.id);
        Ok(())
    }

    /// Classify one inbound segment and hand it to the transport strategy.
    async fn input(&self, transport: &dyn Transport, seg: Segment) -> Result<()> {
        match classify(self.role, &seg)? {
            Inbound::Data => transport.input_data(seg, &self.queues).await,
            Inbound::Ack => transport.input_ack(seg, &self.queues).await,
            Inbound::Control => {
                log::debug!(
                    "[session:{}] {} left to the session multiplexer",
                    self.id,
                    seg.protocol()
                );
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn attachment(&self) -> Result<&Attachment> {
        self.attachment.get().ok_or(Error::NotAttached)
    }

    fn check_open(&self) -> Result<()> {
        if self.state().is_closing() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn send_queue(&self) -> &crate::segment_tree::SegmentTree {
        &self.queues.send_queue
    }

    #[cfg(test)]
    fn recv_queue(&self) -> &crate::segment_tree::SegmentTree {
        &self.queues.recv_queue
    }
}

/// Handles of the two loops spawned by [`Session::start`].
#[derive(Debug)]
pub struct SessionTasks {
    pub input: JoinHandle<anyhow::Result<()>>,
    pub output: JoinHandle<anyhow::Result<()>>,
}

impl SessionTasks {
    /// Wait for both loops and report the first failure.
    ///
    /// Returns as soon as either loop fails, without waiting for the other
    /// one; the owner decides whether to cancel it.
    pub async fn join(self) -> anyhow::Result<()> {
        let Self {
            mut input,
            mut output,
        } = self;
        tokio::select! {
            result = &mut input => {
                result.context("input loop panicked")??;
                output.await.context("output loop panicked")??;
            }
            result = &mut output => {
                result.context("output loop panicked")??;
                input.await.context("input loop panicked")??;
            }
        }
        Ok(())
    }
}
