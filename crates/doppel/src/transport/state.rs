//! Request/reply client for the coordinator's resume-point channel.
//!
//! One request per reply over a single connection. Collectors use this
//! at startup to recover their cursor and after each unit of progress to
//! advance it.

use log::debug;
use tokio::net::TcpStream;

use crate::messages::{StateReply, StateRequest};

use super::{frame, TransportError};

pub struct StateClient {
    stream: TcpStream,
}

impl StateClient {
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::Connect {
                addr: addr.to_string(),
                source: e,
            })?;
        debug!("State channel connected to {}", addr);
        Ok(Self { stream })
    }

    /// Fetches the stored resume point for `name`, if any.
    pub async fn get(&mut self, name: &str) -> Result<Option<String>, TransportError> {
        let reply = self
            .request(&StateRequest::Get {
                name: name.to_string(),
            })
            .await?;
        Ok(reply.resume_point)
    }

    /// Stores the resume point for `name`.
    pub async fn set(&mut self, name: &str, resume_point: &str) -> Result<(), TransportError> {
        self.request(&StateRequest::Set {
            name: name.to_string(),
            resume_point: resume_point.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn request(&mut self, request: &StateRequest) -> Result<StateReply, TransportError> {
        frame::write_frames(&mut self.stream, &request.to_frames()).await?;
        let frames = frame::read_frames(&mut self.stream)
            .await?
            .ok_or(TransportError::Closed)?;
        StateReply::from_frames(&frames).map_err(|e| TransportError::Protocol {
            reason: format!("bad state reply: {}", e),
        })
    }
}
