//! Byte-stream decoding.
//!
//! - `decoder`: streaming UTF-8 / ESC / CSI / OSC decoder
//! - `osc`: shell-integration markers (OSC 133 prompt marks, OSC 7 cwd)

pub mod decoder;
pub mod osc;

pub use decoder::{ByteDecoder, CsiSequence, DecodeEvent, OscSequence, ParserState};
pub use osc::ShellMarker;
