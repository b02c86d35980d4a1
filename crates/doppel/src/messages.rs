//! Message contracts exchanged between collectors, workers, and the
//! coordinator.
//!
//! Every message is a fixed number of frames, the first frame being the
//! kind tag. The frame count per kind is declared up front so a malformed
//! message is rejected before any payload field is parsed.

use chrono::{DateTime, Utc};
use thiserror::Error;
use url::Url;

/// Errors from decoding an inbound message.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Empty message (missing kind frame)")]
    Empty,

    #[error("Unknown message kind '{0}'")]
    UnknownKind(String),

    #[error("Frame count mismatch for '{kind}': expected {expected}, got {actual}")]
    FrameCount {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Frame {index} is not valid UTF-8")]
    InvalidUtf8 { index: usize },

    #[error("Frame {index} is not a valid URL: {reason}")]
    InvalidUrl { index: usize, reason: String },

    #[error("Invalid timestamp '{value}'")]
    InvalidTimestamp { value: String },

    #[error("Unknown status '{0}'")]
    UnknownStatus(String),

    #[error("Unknown state verb '{0}'")]
    UnknownVerb(String),
}

fn utf8_frame(frames: &[Vec<u8>], index: usize) -> Result<&str, ParseError> {
    std::str::from_utf8(&frames[index]).map_err(|_| ParseError::InvalidUtf8 { index })
}

fn url_frame(frames: &[Vec<u8>], index: usize) -> Result<Url, ParseError> {
    let text = utf8_frame(frames, index)?;
    Url::parse(text).map_err(|e| ParseError::InvalidUrl {
        index,
        reason: e.to_string(),
    })
}

fn check_frame_count(
    kind: &'static str,
    expected: usize,
    frames: &[Vec<u8>],
) -> Result<(), ParseError> {
    if frames.len() != expected {
        return Err(ParseError::FrameCount {
            kind,
            expected,
            actual: frames.len(),
        });
    }
    Ok(())
}

/// Terminal and intermediate outcomes for one (source, link) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    Processed,
    Faulted,
    Indexed,
}

impl ImageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageStatus::Processed => "processed",
            ImageStatus::Faulted => "faulted",
            ImageStatus::Indexed => "indexed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseError> {
        match s {
            "processed" => Ok(ImageStatus::Processed),
            "faulted" => Ok(ImageStatus::Faulted),
            "indexed" => Ok(ImageStatus::Indexed),
            other => Err(ParseError::UnknownStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A harvested image job: original response bytes plus the page it was
/// found on and the direct resource link. Identity for in-flight tracking
/// is the `(source, image)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedImage {
    pub service_name: String,
    pub source: Url,
    pub image: Url,
    pub data: Vec<u8>,
}

impl CollectedImage {
    pub const KIND: &'static str = "collected-image";
    pub const FRAME_COUNT: usize = 5;

    pub fn to_frames(&self) -> Vec<Vec<u8>> {
        vec![
            Self::KIND.as_bytes().to_vec(),
            self.service_name.as_bytes().to_vec(),
            self.source.as_str().as_bytes().to_vec(),
            self.image.as_str().as_bytes().to_vec(),
            self.data.clone(),
        ]
    }

    pub fn from_frames(frames: &[Vec<u8>]) -> Result<Self, ParseError> {
        check_frame_count(Self::KIND, Self::FRAME_COUNT, frames)?;
        Ok(Self {
            service_name: utf8_frame(frames, 1)?.to_string(),
            source: url_frame(frames, 2)?,
            image: url_frame(frames, 3)?,
            data: frames[4].clone(),
        })
    }
}

/// A fingerprinted result: the packed perceptual signature plus the
/// SHA-256 content hash of the original bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintedImage {
    pub service_name: String,
    pub source: Url,
    pub image: Url,
    pub signature: Vec<u8>,
    pub content_hash: String,
}

impl FingerprintedImage {
    pub const KIND: &'static str = "fingerprinted-image";
    pub const FRAME_COUNT: usize = 6;

    pub fn to_frames(&self) -> Vec<Vec<u8>> {
        vec![
            Self::KIND.as_bytes().to_vec(),
            self.service_name.as_bytes().to_vec(),
            self.source.as_str().as_bytes().to_vec(),
            self.image.as_str().as_bytes().to_vec(),
            self.signature.clone(),
            self.content_hash.as_bytes().to_vec(),
        ]
    }

    pub fn from_frames(frames: &[Vec<u8>]) -> Result<Self, ParseError> {
        check_frame_count(Self::KIND, Self::FRAME_COUNT, frames)?;
        Ok(Self {
            service_name: utf8_frame(frames, 1)?.to_string(),
            source: url_frame(frames, 2)?,
            image: url_frame(frames, 3)?,
            signature: frames[4].clone(),
            content_hash: utf8_frame(frames, 5)?.to_string(),
        })
    }
}

/// A state transition record for one (source, link) pair. Later reports
/// overwrite earlier ones for the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub timestamp: DateTime<Utc>,
    pub service_name: String,
    pub source: Url,
    pub link: Url,
    pub status: ImageStatus,
    pub message: String,
}

impl StatusReport {
    pub const KIND: &'static str = "status-report";
    pub const FRAME_COUNT: usize = 7;

    pub fn to_frames(&self) -> Vec<Vec<u8>> {
        vec![
            Self::KIND.as_bytes().to_vec(),
            self.timestamp.to_rfc3339().into_bytes(),
            self.service_name.as_bytes().to_vec(),
            self.source.as_str().as_bytes().to_vec(),
            self.link.as_str().as_bytes().to_vec(),
            self.status.as_str().as_bytes().to_vec(),
            self.message.as_bytes().to_vec(),
        ]
    }

    pub fn from_frames(frames: &[Vec<u8>]) -> Result<Self, ParseError> {
        check_frame_count(Self::KIND, Self::FRAME_COUNT, frames)?;
        let raw_ts = utf8_frame(frames, 1)?;
        let timestamp = DateTime::parse_from_rfc3339(raw_ts)
            .map_err(|_| ParseError::InvalidTimestamp {
                value: raw_ts.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self {
            timestamp,
            service_name: utf8_frame(frames, 2)?.to_string(),
            source: url_frame(frames, 3)?,
            link: url_frame(frames, 4)?,
            status: ImageStatus::parse(utf8_frame(frames, 5)?)?,
            message: utf8_frame(frames, 6)?.to_string(),
        })
    }
}

/// Any message accepted on the coordinator's ingress socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Collected(CollectedImage),
    Fingerprinted(FingerprintedImage),
    Status(StatusReport),
}

impl Message {
    pub fn from_frames(frames: &[Vec<u8>]) -> Result<Self, ParseError> {
        let kind = frames.first().ok_or(ParseError::Empty)?;
        match utf8_frame(frames, 0) {
            Ok(CollectedImage::KIND) => {
                CollectedImage::from_frames(frames).map(Message::Collected)
            }
            Ok(FingerprintedImage::KIND) => {
                FingerprintedImage::from_frames(frames).map(Message::Fingerprinted)
            }
            Ok(StatusReport::KIND) => StatusReport::from_frames(frames).map(Message::Status),
            Ok(other) => Err(ParseError::UnknownKind(other.to_string())),
            Err(_) => Err(ParseError::UnknownKind(format!(
                "{} bytes of non-UTF-8",
                kind.len()
            ))),
        }
    }

    pub fn to_frames(&self) -> Vec<Vec<u8>> {
        match self {
            Message::Collected(m) => m.to_frames(),
            Message::Fingerprinted(m) => m.to_frames(),
            Message::Status(m) => m.to_frames(),
        }
    }
}

/// Resume-point request on the coordinator's state channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateRequest {
    Get { name: String },
    Set { name: String, resume_point: String },
}

impl StateRequest {
    pub const KIND: &'static str = "state-request";
    pub const FRAME_COUNT: usize = 4;

    pub fn to_frames(&self) -> Vec<Vec<u8>> {
        let (verb, name, resume_point) = match self {
            StateRequest::Get { name } => ("get", name.as_str(), ""),
            StateRequest::Set { name, resume_point } => {
                ("set", name.as_str(), resume_point.as_str())
            }
        };
        vec![
            Self::KIND.as_bytes().to_vec(),
            verb.as_bytes().to_vec(),
            name.as_bytes().to_vec(),
            resume_point.as_bytes().to_vec(),
        ]
    }

    pub fn from_frames(frames: &[Vec<u8>]) -> Result<Self, ParseError> {
        check_frame_count(Self::KIND, Self::FRAME_COUNT, frames)?;
        let verb = utf8_frame(frames, 1)?;
        let name = utf8_frame(frames, 2)?.to_string();
        match verb {
            "get" => Ok(StateRequest::Get { name }),
            "set" => Ok(StateRequest::Set {
                name,
                resume_point: utf8_frame(frames, 3)?.to_string(),
            }),
            other => Err(ParseError::UnknownVerb(other.to_string())),
        }
    }
}

/// Resume-point reply on the coordinator's state channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateReply {
    pub resume_point: Option<String>,
}

impl StateReply {
    pub const KIND: &'static str = "state-reply";
    pub const FRAME_COUNT: usize = 3;

    pub fn to_frames(&self) -> Vec<Vec<u8>> {
        let (found, value) = match &self.resume_point {
            Some(v) => ("1", v.as_str()),
            None => ("0", ""),
        };
        vec![
            Self::KIND.as_bytes().to_vec(),
            found.as_bytes().to_vec(),
            value.as_bytes().to_vec(),
        ]
    }

    pub fn from_frames(frames: &[Vec<u8>]) -> Result<Self, ParseError> {
        check_frame_count(Self::KIND, Self::FRAME_COUNT, frames)?;
        let resume_point = match utf8_frame(frames, 1)? {
            "1" => Some(utf8_frame(frames, 2)?.to_string()),
            _ => None,
        };
        Ok(Self { resume_point })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_collected_image_frames() {
        let job = CollectedImage {
            service_name: "booru".to_string(),
            source: test_url("https://example.com/posts/42"),
            image: test_url("https://example.com/files/42.png"),
            data: vec![1, 2, 3, 4],
        };

        let frames = job.to_frames();
        assert_eq!(frames.len(), CollectedImage::FRAME_COUNT);
        assert_eq!(frames[0], b"collected-image");

        let decoded = CollectedImage::from_frames(&frames).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn test_status_report_frames_preserve_timestamp() {
        let report = StatusReport {
            timestamp: "2026-02-11T08:30:00Z".parse().unwrap(),
            service_name: "booru".to_string(),
            source: test_url("https://example.com/posts/42"),
            link: test_url("https://example.com/files/42.png"),
            status: ImageStatus::Processed,
            message: String::new(),
        };

        let decoded = StatusReport::from_frames(&report.to_frames()).unwrap();
        assert_eq!(decoded.timestamp, report.timestamp);
        assert_eq!(decoded.status, ImageStatus::Processed);
    }

    #[test]
    fn test_frame_count_mismatch_is_rejected() {
        let job = CollectedImage {
            service_name: "booru".to_string(),
            source: test_url("https://example.com/a"),
            image: test_url("https://example.com/b"),
            data: vec![],
        };
        let mut frames = job.to_frames();
        frames.pop();

        let err = CollectedImage::from_frames(&frames).unwrap_err();
        assert!(matches!(
            err,
            ParseError::FrameCount {
                expected: 5,
                actual: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let frames = vec![b"mystery".to_vec(), b"x".to_vec()];
        let err = Message::from_frames(&frames).unwrap_err();
        assert!(matches!(err, ParseError::UnknownKind(k) if k == "mystery"));
    }

    #[test]
    fn test_empty_message_is_rejected() {
        assert!(matches!(
            Message::from_frames(&[]).unwrap_err(),
            ParseError::Empty
        ));
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let frames = vec![
            b"collected-image".to_vec(),
            b"booru".to_vec(),
            b"not a url".to_vec(),
            b"https://example.com/b".to_vec(),
            vec![],
        ];
        let err = CollectedImage::from_frames(&frames).unwrap_err();
        assert!(matches!(err, ParseError::InvalidUrl { index: 2, .. }));
    }

    #[test]
    fn test_message_dispatch_by_kind() {
        let report = StatusReport {
            timestamp: Utc::now(),
            service_name: "booru".to_string(),
            source: test_url("https://example.com/a"),
            link: test_url("https://example.com/b"),
            status: ImageStatus::Faulted,
            message: "decode failed".to_string(),
        };

        match Message::from_frames(&report.to_frames()).unwrap() {
            Message::Status(s) => assert_eq!(s.message, "decode failed"),
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_state_request_get_and_set() {
        let get = StateRequest::Get {
            name: "booru".to_string(),
        };
        assert_eq!(
            StateRequest::from_frames(&get.to_frames()).unwrap(),
            get
        );

        let set = StateRequest::Set {
            name: "booru".to_string(),
            resume_point: "8241".to_string(),
        };
        assert_eq!(
            StateRequest::from_frames(&set.to_frames()).unwrap(),
            set
        );
    }

    #[test]
    fn test_state_reply_absent_round_trips() {
        let reply = StateReply { resume_point: None };
        let decoded = StateReply::from_frames(&reply.to_frames()).unwrap();
        assert_eq!(decoded.resume_point, None);
    }

    #[test]
    fn test_status_parse_rejects_unknown() {
        assert!(ImageStatus::parse("processed").is_ok());
        assert!(matches!(
            ImageStatus::parse("PROCESSED").unwrap_err(),
            ParseError::UnknownStatus(_)
        ));
    }
}
