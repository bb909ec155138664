//! In-band document attachments.
//!
//! Front-ends embed binary documents directly in the message text:
//!
//! ```text
//! [ATTACHMENT:application/pdf;base64]JVBERi0xLjQK...[/ATTACHMENT]
//! ```
//!
//! [`extract`] finds every such block, decodes it, and returns the remaining
//! user-visible text. Malformed blocks are stripped and reported, never fatal.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

const OPEN: &str = "[ATTACHMENT:";
const CLOSE: &str = "[/ATTACHMENT]";
const ENCODING_SUFFIX: &str = ";base64";

/// Metadata key under which decoded attachments are carried on a message.
pub const METADATA_KEY: &str = "attachments";

/// A decoded attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub mime: String,
    pub data: Vec<u8>,
}

/// Serialized form carried in message metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub mime: String,
    pub size: usize,
    pub data: String,
}

impl Attachment {
    pub fn to_record(&self) -> AttachmentRecord {
        AttachmentRecord {
            mime: self.mime.clone(),
            size: self.data.len(),
            data: STANDARD.encode(&self.data),
        }
    }

    /// Render as an in-band block.
    pub fn to_block(&self) -> String {
        encode(&self.mime, &self.data)
    }
}

/// Result of scanning a message for attachment blocks.
#[derive(Debug, Clone, Default)]
pub struct ExtractedMessage {
    /// The user-visible text with all blocks removed
    pub text: String,
    pub attachments: Vec<Attachment>,
    /// One diagnostic per block that could not be decoded
    pub malformed: Vec<String>,
}

impl ExtractedMessage {
    pub fn records(&self) -> Vec<AttachmentRecord> {
        self.attachments.iter().map(Attachment::to_record).collect()
    }
}

/// Build an attachment block for `data`.
pub fn encode(mime: &str, data: &[u8]) -> String {
    format!("{OPEN}{mime}{ENCODING_SUFFIX}]{}{CLOSE}", STANDARD.encode(data))
}

/// Detect, decode, and strip every attachment block in `input`.
pub fn extract(input: &str) -> ExtractedMessage {
    let mut out = ExtractedMessage::default();
    let mut rest = input;

    while let Some(start) = rest.find(OPEN) {
        out.text.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];

        let Some(close) = after_open.find(CLOSE) else {
            out.malformed.push("attachment block has no closing marker".into());
            rest = "";
            break;
        };
        let block = &after_open[..close];
        rest = &after_open[close + CLOSE.len()..];

        match decode_block(block) {
            Ok(attachment) => out.attachments.push(attachment),
            Err(reason) => out.malformed.push(reason),
        }
    }
    out.text.push_str(rest);
    out.text = out.text.trim().to_string();
    out
}

fn decode_block(block: &str) -> Result<Attachment, String> {
    let Some((header, body)) = block.split_once(']') else {
        return Err("attachment header is not terminated".into());
    };
    let Some(mime) = header.strip_suffix(ENCODING_SUFFIX) else {
        return Err(format!("unsupported attachment encoding in '{header}'"));
    };
    let mime = mime.trim();
    if mime.is_empty() {
        return Err("attachment has no media type".into());
    }
    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    let data = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| format!("attachment '{mime}' is not valid base64: {e}"))?;
    Ok(Attachment {
        mime: mime.to_string(),
        data,
    })
}
