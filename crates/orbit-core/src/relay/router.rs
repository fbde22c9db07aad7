//! Relay router
//!
//! Accepts client and anchor socket connections, performs the hello
//! handshake, and routes frames bidirectionally by logical thread id. The
//! routing table is the only structure mutated by concurrent connection
//! handlers; every add/remove/lookup happens inside one mutex'd state so
//! delivery decisions are atomic with respect to connects and disconnects.
//! Per-peer delivery goes through an unbounded outbox drained by that
//! peer's writer task, so a slow peer never blocks routing.

use super::wire::{
    hello_frame, undeliverable_frame, PeerRole, RelayFrame, HELLO_TYPE, SUBSCRIBE_TYPE,
};
use crate::error::Result;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default parking window for targeted frames with no matching peer yet
pub const DEFAULT_PARK_TTL: Duration = Duration::from_secs(2);

struct PeerEntry {
    role: PeerRole,
    outbox: mpsc::UnboundedSender<String>,
}

struct ParkedFrame {
    line: String,
    id: Value,
    thread_id: String,
    origin: Uuid,
    target_role: PeerRole,
    deadline: tokio::time::Instant,
}

#[derive(Default)]
struct RouterState {
    peers: HashMap<Uuid, PeerEntry>,
    /// Thread id -> peers bound to it, in join order
    threads: HashMap<String, Vec<Uuid>>,
    /// Targeted frames waiting for a matching peer
    parked: Vec<ParkedFrame>,
}

impl RouterState {
    fn send_to(&self, peer_id: Uuid, line: &str) {
        if let Some(peer) = self.peers.get(&peer_id) {
            let _ = peer.outbox.send(line.to_string());
        }
    }

    fn bind(&mut self, thread_id: &str, peer_id: Uuid) {
        let members = self.threads.entry(thread_id.to_string()).or_default();
        if !members.contains(&peer_id) {
            members.push(peer_id);
        }
    }

    /// First opposite-role peer bound to the thread, in join order
    fn target_for(&self, thread_id: &str, target_role: PeerRole) -> Option<Uuid> {
        self.threads.get(thread_id)?.iter().copied().find(|peer_id| {
            self.peers
                .get(peer_id)
                .map(|p| p.role == target_role)
                .unwrap_or(false)
        })
    }
}

/// Message-routing relay between client and anchor sockets
pub struct RelayRouter {
    state: Mutex<RouterState>,
    park_ttl: Duration,
}

impl RelayRouter {
    pub fn new(park_ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RouterState::default()),
            park_ttl,
        })
    }

    /// Register a peer. The mandatory hello is queued before anything
    /// else, so it is always the first frame the peer receives.
    pub fn attach(self: &Arc<Self>, role: PeerRole) -> PeerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer_id = Uuid::new_v4();

        let hello = hello_frame(peer_id, role).to_string();
        let _ = tx.send(hello);

        let mut state = self.state.lock();
        state.peers.insert(peer_id, PeerEntry { role, outbox: tx });
        drop(state);

        debug!("Peer {} attached as {:?}", peer_id, role);
        PeerHandle {
            peer_id,
            role,
            outbox: rx,
            router: Arc::clone(self),
        }
    }

    fn detach(&self, peer_id: Uuid) {
        let mut state = self.state.lock();
        state.peers.remove(&peer_id);
        for members in state.threads.values_mut() {
            members.retain(|id| *id != peer_id);
        }
        state.threads.retain(|_, members| !members.is_empty());
        debug!("Peer {} detached", peer_id);
    }

    /// Process one inbound frame from a connected peer.
    ///
    /// Malformed frames error out to the caller; they are logged and
    /// dropped there, never fatal to the connection.
    pub fn handle_line(self: &Arc<Self>, peer_id: Uuid, line: &str) -> Result<()> {
        let frame = RelayFrame::parse(line)?;

        let mut state = self.state.lock();
        let Some(peer) = state.peers.get(&peer_id) else {
            warn!("Frame from unknown peer {}", peer_id);
            return Ok(());
        };
        let sender_role = peer.role;

        match frame.msg_type() {
            // Peers may greet back; nothing to route.
            HELLO_TYPE => return Ok(()),
            SUBSCRIBE_TYPE => {
                if let Some(thread_id) = frame.thread_id() {
                    let thread_id = thread_id.to_string();
                    state.bind(&thread_id, peer_id);
                    self.deliver_parked(&mut state, &thread_id, peer_id, sender_role);
                }
                return Ok(());
            }
            _ => {}
        }

        match frame.thread_id().map(str::to_string) {
            Some(thread_id) => {
                // Carrying a thread id binds the sender to that thread.
                state.bind(&thread_id, peer_id);
                self.deliver_parked(&mut state, &thread_id, peer_id, sender_role);

                if frame.is_targeted() {
                    self.route_targeted(&mut state, &frame, line, &thread_id, peer_id, sender_role);
                } else {
                    let targets: Vec<Uuid> = state
                        .threads
                        .get(&thread_id)
                        .map(|members| {
                            members
                                .iter()
                                .copied()
                                .filter(|id| {
                                    state
                                        .peers
                                        .get(id)
                                        .map(|p| p.role == sender_role.opposite())
                                        .unwrap_or(false)
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                    for target in targets {
                        state.send_to(target, line);
                    }
                }
            }
            None => {
                // No routing key: broadcast to every opposite-role peer.
                let targets: Vec<Uuid> = state
                    .peers
                    .iter()
                    .filter(|(_, p)| p.role == sender_role.opposite())
                    .map(|(id, _)| *id)
                    .collect();
                for target in targets {
                    state.send_to(target, line);
                }
            }
        }

        Ok(())
    }

    /// Deliver a targeted frame to exactly one matching peer, or park it
    /// briefly for a late subscriber. Expired frames are reported back to
    /// the origin, never silently lost.
    fn route_targeted(
        self: &Arc<Self>,
        state: &mut RouterState,
        frame: &RelayFrame,
        line: &str,
        thread_id: &str,
        origin: Uuid,
        sender_role: PeerRole,
    ) {
        let target_role = sender_role.opposite();
        match state.target_for(thread_id, target_role) {
            Some(target) => state.send_to(target, line),
            None => {
                let deadline = tokio::time::Instant::now() + self.park_ttl;
                debug!(
                    "Parking targeted frame for thread {} until a {:?} binds",
                    thread_id, target_role
                );
                state.parked.push(ParkedFrame {
                    line: line.to_string(),
                    id: frame.id().cloned().unwrap_or(Value::Null),
                    thread_id: thread_id.to_string(),
                    origin,
                    target_role,
                    deadline,
                });

                let router = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::time::sleep_until(deadline).await;
                    router.expire_parked();
                });
            }
        }
    }

    /// Hand any parked frames for this thread to a newly bound peer of the
    /// right role; each frame is delivered at most once.
    fn deliver_parked(
        &self,
        state: &mut RouterState,
        thread_id: &str,
        peer_id: Uuid,
        peer_role: PeerRole,
    ) {
        let mut delivered = Vec::new();
        state.parked.retain(|parked| {
            if parked.thread_id == thread_id && parked.target_role == peer_role {
                delivered.push(parked.line.clone());
                false
            } else {
                true
            }
        });
        for line in delivered {
            debug!("Delivering parked frame on thread {} to late subscriber", thread_id);
            state.send_to(peer_id, &line);
        }
    }

    /// Report expired parked frames back to their origins
    fn expire_parked(&self) {
        let now = tokio::time::Instant::now();
        let mut state = self.state.lock();

        let mut expired = Vec::new();
        state.parked.retain(|parked| {
            if parked.deadline <= now {
                expired.push((
                    parked.origin,
                    undeliverable_frame(&parked.id, &parked.thread_id).to_string(),
                ));
                false
            } else {
                true
            }
        });

        for (origin, report) in expired {
            warn!("Targeted frame expired undelivered, reporting to origin");
            state.send_to(origin, &report);
        }
    }

    /// Bind a TCP listener for one peer role
    pub async fn listen(
        self: &Arc<Self>,
        addr: &str,
        role: PeerRole,
    ) -> Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>)> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Relay listening for {:?} peers on {}", role, local_addr);

        let router = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        debug!("Accepted {:?} connection from {}", role, remote);
                        let handle = router.attach(role);
                        tokio::spawn(connection_task(stream, handle));
                    }
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                    }
                }
            }
        });

        Ok((local_addr, task))
    }
}

/// One attached peer: inbound via [`PeerHandle::submit`], outbound frames
/// (hello first) via [`PeerHandle::next`]. Dropping the handle detaches.
pub struct PeerHandle {
    pub peer_id: Uuid,
    pub role: PeerRole,
    outbox: mpsc::UnboundedReceiver<String>,
    router: Arc<RelayRouter>,
}

impl PeerHandle {
    pub fn submit(&self, line: &str) -> Result<()> {
        self.router.handle_line(self.peer_id, line)
    }

    pub async fn next(&mut self) -> Option<String> {
        self.outbox.recv().await
    }

    pub fn try_next(&mut self) -> Option<String> {
        self.outbox.try_recv().ok()
    }
}

impl Drop for PeerHandle {
    fn drop(&mut self) {
        self.router.detach(self.peer_id);
    }
}

/// Per-connection pump: hello out first, then frames both ways
async fn connection_task(stream: TcpStream, mut handle: PeerHandle) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // The hello is queued at attach time and must reach the peer before
    // any routed traffic flows.
    if let Some(hello) = handle.next().await {
        if write_stanza(&mut write_half, &hello).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            outbound = handle.next() => {
                match outbound {
                    Some(line) => {
                        if write_stanza(&mut write_half, &line).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = lines.next_line() => {
                match inbound {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        if let Err(e) = handle.submit(trimmed) {
                            warn!("Dropping malformed frame: {}", e);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!("Connection read error: {}", e);
                        break;
                    }
                }
            }
        }
    }
    // handle drops here, detaching the peer
}

async fn write_stanza(
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    line: &str,
) -> std::io::Result<()> {
    write_half.write_all(line.as_bytes()).await?;
    write_half.write_all(b"\n").await?;
    write_half.flush().await
}
