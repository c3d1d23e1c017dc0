//! Framed stdio protocol spoken with the transcription worker.
//!
//! Requests are single JSON lines terminated by the record separator.
//! Worker output is split on the message separator; each message is either
//! the ready sentinel, a data message (data prefix + JSON object carrying an
//! `id`), or free-text log output.

mod codec;
mod envelope;
mod error;
mod writer;

pub use codec::{FrameDecoder, FrameEncoder};
pub use envelope::{InboundMessage, RequestEnvelope, ResponseEnvelope, TranscriptionJob};
pub(crate) use envelope::json_kind;
pub use error::ProtocolError;
pub use writer::FrameWriter;
