//! Resume-point service: answers get/set requests over the state
//! channel.
//!
//! Each connection is served by its own task, one reply per request. A
//! request that does not parse closes the connection instead of leaving
//! the client waiting for a reply that will never come.

use log::{debug, warn};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::db::{state_repo, Database};
use crate::error::DoppelError;
use crate::messages::{StateReply, StateRequest};
use crate::transport::{frame, QueueListener};

pub async fn run(
    listener: QueueListener,
    db: Database,
    cancel: CancellationToken,
) -> Result<(), DoppelError> {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("State service stopping");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                debug!("State connection from {}", peer);
                let db = db.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, db, cancel).await {
                        warn!("State connection failed: {}", e);
                    }
                });
            }
        }
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    db: Database,
    cancel: CancellationToken,
) -> Result<(), DoppelError> {
    loop {
        let frames = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            frames = frame::read_frames(&mut stream) => match frames? {
                Some(frames) => frames,
                None => return Ok(()),
            },
        };

        let request = match StateRequest::from_frames(&frames) {
            Ok(request) => request,
            Err(e) => {
                warn!("Closing state connection on bad request: {}", e);
                return Ok(());
            }
        };

        let reply = match request {
            StateRequest::Get { name } => {
                let resume_point = db
                    .run(move |db| state_repo::resume_point(db, &name))
                    .await?;
                StateReply { resume_point }
            }
            StateRequest::Set { name, resume_point } => {
                let echo = resume_point.clone();
                db.run(move |db| state_repo::set_resume_point(db, &name, &resume_point))
                    .await?;
                StateReply {
                    resume_point: Some(echo),
                }
            }
        };
        frame::write_frames(&mut stream, &reply.to_frames()).await?;
    }
}
