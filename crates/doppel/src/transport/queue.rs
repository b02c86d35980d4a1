//! Push/pull queue endpoints.
//!
//! The coordinator binds listeners; workers and collectors connect. Job
//! egress fans out round-robin over connected workers and waits when no
//! worker is connected. Ingress fans in from all connected producers
//! through one bounded channel, which is what carries backpressure to
//! the TCP connections.

use std::net::SocketAddr;

use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use super::{frame, TransportError};

/// Connect-side sender for a unidirectional channel.
pub struct PushQueue {
    stream: TcpStream,
}

impl PushQueue {
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::Connect {
                addr: addr.to_string(),
                source: e,
            })?;
        debug!("Push channel connected to {}", addr);
        Ok(Self { stream })
    }

    pub async fn send(&mut self, frames: &[Vec<u8>]) -> Result<(), TransportError> {
        frame::write_frames(&mut self.stream, frames).await
    }
}

/// Connect-side receiver for a unidirectional channel.
pub struct PullQueue {
    stream: TcpStream,
}

impl PullQueue {
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::Connect {
                addr: addr.to_string(),
                source: e,
            })?;
        debug!("Pull channel connected to {}", addr);
        Ok(Self { stream })
    }

    /// Receives the next message. `Ok(None)` means the peer closed the
    /// channel cleanly.
    pub async fn recv(&mut self) -> Result<Option<Vec<Vec<u8>>>, TransportError> {
        frame::read_frames(&mut self.stream).await
    }
}

/// Bind-side listener, used where a component accepts raw connections.
pub struct QueueListener {
    listener: TcpListener,
}

impl QueueListener {
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Bind {
                addr: addr.to_string(),
                source: e,
            })?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), TransportError> {
        Ok(self.listener.accept().await?)
    }
}

/// Bind-side job egress: accepts worker connections and distributes
/// messages round-robin. With no connected worker, `send` waits until
/// one arrives.
pub struct FanOutSender {
    incoming: mpsc::UnboundedReceiver<TcpStream>,
    conns: Vec<TcpStream>,
    next: usize,
    local_addr: SocketAddr,
}

impl FanOutSender {
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Bind {
                addr: addr.to_string(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        info!("Worker connected from {}", peer);
                        if tx.send(stream).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Job egress accept failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            incoming: rx,
            conns: Vec::new(),
            next: 0,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sends one message to the next connected worker, skipping dead
    /// connections. Waits when no worker is connected.
    pub async fn send(&mut self, frames: &[Vec<u8>]) -> Result<(), TransportError> {
        loop {
            while let Ok(stream) = self.incoming.try_recv() {
                self.conns.push(stream);
            }
            if self.conns.is_empty() {
                match self.incoming.recv().await {
                    Some(stream) => {
                        self.conns.push(stream);
                        continue;
                    }
                    None => return Err(TransportError::Closed),
                }
            }

            let idx = self.next % self.conns.len();
            match frame::write_frames(&mut self.conns[idx], frames).await {
                Ok(()) => {
                    self.next = self.next.wrapping_add(1);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Dropping dead worker connection: {}", e);
                    self.conns.swap_remove(idx);
                }
            }
        }
    }
}

/// Bind-side ingress: accepts producer connections and merges their
/// messages into one bounded stream.
pub struct FanInReceiver {
    rx: mpsc::Receiver<Vec<Vec<u8>>>,
    local_addr: SocketAddr,
}

impl FanInReceiver {
    pub async fn bind(addr: &str, capacity: usize) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Bind {
                addr: addr.to_string(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;

        let (tx, rx) = mpsc::channel(capacity);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!("Ingress connection from {}", peer);
                        tokio::spawn(pump_connection(stream, tx.clone()));
                    }
                    Err(e) => {
                        warn!("Ingress accept failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self { rx, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receives the next merged message. `None` means the listener and
    /// every connection are gone.
    pub async fn recv(&mut self) -> Option<Vec<Vec<u8>>> {
        self.rx.recv().await
    }
}

/// Reads messages from one ingress connection into the merged channel
/// until the peer closes or errors.
async fn pump_connection(mut stream: TcpStream, tx: mpsc::Sender<Vec<Vec<u8>>>) {
    loop {
        match frame::read_frames(&mut stream).await {
            Ok(Some(frames)) => {
                if tx.send(frames).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!("Ingress connection closed");
                break;
            }
            Err(e) => {
                warn!("Ingress connection failed: {}", e);
                break;
            }
        }
    }
}
