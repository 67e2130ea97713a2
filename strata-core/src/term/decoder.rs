//! Streaming byte decoder.
//!
//! Turns raw PTY output into [`DecodeEvent`]s. Every partially received
//! sequence (UTF-8 or escape) is held inside the decoder between calls, so
//! the event stream never depends on where the reads happened to split.
//!
//! The decoder performs no I/O and never fails: malformed input is replaced,
//! counted as an anomaly, and decoding resumes from `Ground`.

/// Parameters beyond this count are dropped (the sequence is still emitted).
const MAX_PARAMS: usize = 32;

/// Intermediate bytes beyond this count are dropped.
const MAX_INTERMEDIATES: usize = 2;

/// OSC payloads longer than this are discarded as a whole.
pub const MAX_OSC_LEN: usize = 64 * 1024;

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;
const CAN: u8 = 0x18;
const SUB: u8 = 0x1a;
const DEL: u8 = 0x7f;

/// A complete `ESC [ ... final` sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsiSequence {
    /// Private marker (`?`, `>`, `<`, `=`) when the sequence starts with one.
    pub private: Option<u8>,
    /// Numeric parameters; empty positions are recorded as 0.
    pub params: Vec<u16>,
    pub intermediates: Vec<u8>,
    pub final_byte: u8,
}

impl CsiSequence {
    pub fn new(final_byte: u8, params: &[u16]) -> Self {
        Self {
            private: None,
            params: params.to_vec(),
            intermediates: Vec::new(),
            final_byte,
        }
    }

    pub fn with_private(mut self, marker: u8) -> Self {
        self.private = Some(marker);
        self
    }

    /// Parameter `idx`, or `default` when absent or zero.
    pub fn param_or(&self, idx: usize, default: u16) -> u16 {
        match self.params.get(idx) {
            Some(&0) | None => default,
            Some(&v) => v,
        }
    }

    /// Parameter `idx` exactly as received.
    pub fn raw_param(&self, idx: usize) -> Option<u16> {
        self.params.get(idx).copied()
    }
}

/// A complete `ESC ] code ; payload` sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OscSequence {
    pub code: u16,
    pub payload: String,
}

/// One semantic unit of the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    Codepoint(char),
    /// An invalid UTF-8 sequence (renders as U+FFFD).
    Replacement,
    Control(u8),
    Csi(CsiSequence),
    Osc(OscSequence),
    /// Any other escape: `ESC intermediates* final`.
    Esc { intermediates: Vec<u8>, final_byte: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserState {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    OscString,
    /// ESC seen inside an OSC string; `\` terminates it.
    OscEscape,
    /// DCS / SOS / PM / APC body, swallowed until its terminator.
    IgnoreString,
    IgnoreStringEscape,
    Utf8Continuation { remaining: u8 },
}

/// Whether the current byte was consumed or must be fed again from the
/// (already updated) state.
enum Step {
    Consumed,
    Reprocess,
}

#[derive(Debug, Default)]
pub struct ByteDecoder {
    state: ParserState,

    // CSI / ESC accumulation
    private: Option<u8>,
    params: Vec<u16>,
    current: Option<u16>,
    intermediates: Vec<u8>,
    params_overflowed: bool,

    // OSC accumulation
    osc: Vec<u8>,
    osc_overflowed: bool,

    // UTF-8 accumulation
    utf8: [u8; 4],
    utf8_len: u8,

    anomalies: u64,
}

impl ByteDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Number of malformed sequences recovered from so far.
    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }

    /// Drop any partial sequence and return to `Ground`.
    pub fn reset(&mut self) {
        self.state = ParserState::Ground;
        self.clear_sequence();
        self.osc.clear();
        self.osc_overflowed = false;
        self.utf8_len = 0;
    }

    /// Feed bytes; decoded events are appended to `out`.
    pub fn feed(&mut self, bytes: &[u8], out: &mut Vec<DecodeEvent>) {
        for &byte in bytes {
            while let Step::Reprocess = self.step(byte, out) {}
        }
    }

    /// Convenience wrapper around [`ByteDecoder::feed`].
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<DecodeEvent> {
        let mut out = Vec::new();
        self.feed(bytes, &mut out);
        out
    }

    fn step(&mut self, byte: u8, out: &mut Vec<DecodeEvent>) -> Step {
        match self.state {
            ParserState::Ground => self.ground(byte, out),
            ParserState::Utf8Continuation { remaining } => self.utf8_continue(byte, remaining, out),
            ParserState::Escape => self.escape(byte, out),
            ParserState::EscapeIntermediate => self.escape_intermediate(byte, out),
            ParserState::CsiEntry | ParserState::CsiParam => self.csi_param(byte, out),
            ParserState::CsiIntermediate => self.csi_intermediate(byte, out),
            ParserState::OscString => self.osc_string(byte, out),
            ParserState::OscEscape => self.osc_escape(byte, out),
            ParserState::IgnoreString => self.ignore_string(byte),
            ParserState::IgnoreStringEscape => self.ignore_string_escape(byte),
        }
    }

    // ── Ground / UTF-8 ──────────────────────────────────────────────

    fn ground(&mut self, byte: u8, out: &mut Vec<DecodeEvent>) -> Step {
        match byte {
            ESC => self.enter_escape(),
            0x00..=0x1f | DEL => out.push(DecodeEvent::Control(byte)),
            0x20..=0x7e => out.push(DecodeEvent::Codepoint(byte as char)),
            0xc2..=0xdf => self.start_utf8(byte, 1),
            0xe0..=0xef => self.start_utf8(byte, 2),
            0xf0..=0xf4 => self.start_utf8(byte, 3),
            _ => {
                // Stray continuation byte or a lead byte that can never be valid.
                self.anomalies += 1;
                out.push(DecodeEvent::Replacement);
            }
        }
        Step::Consumed
    }

    fn start_utf8(&mut self, lead: u8, remaining: u8) {
        self.utf8[0] = lead;
        self.utf8_len = 1;
        self.state = ParserState::Utf8Continuation { remaining };
    }

    fn utf8_continue(&mut self, byte: u8, remaining: u8, out: &mut Vec<DecodeEvent>) -> Step {
        if byte & 0xc0 != 0x80 {
            // Truncated sequence: report it, then let the byte start over.
            self.anomalies += 1;
            out.push(DecodeEvent::Replacement);
            self.utf8_len = 0;
            self.state = ParserState::Ground;
            return Step::Reprocess;
        }

        self.utf8[self.utf8_len as usize] = byte;
        self.utf8_len += 1;

        if remaining > 1 {
            self.state = ParserState::Utf8Continuation {
                remaining: remaining - 1,
            };
            return Step::Consumed;
        }

        let event = match decode_utf8(&self.utf8[..self.utf8_len as usize]) {
            Some(ch) => DecodeEvent::Codepoint(ch),
            None => {
                self.anomalies += 1;
                DecodeEvent::Replacement
            }
        };
        out.push(event);
        self.utf8_len = 0;
        self.state = ParserState::Ground;
        Step::Consumed
    }

    // ── Escape ──────────────────────────────────────────────────────

    fn enter_escape(&mut self) {
        self.clear_sequence();
        self.state = ParserState::Escape;
    }

    fn clear_sequence(&mut self) {
        self.private = None;
        self.params.clear();
        self.current = None;
        self.intermediates.clear();
        self.params_overflowed = false;
    }

    /// Bytes that behave the same way in every escape/CSI state.
    /// Returns `None` when the byte is not one of them.
    fn common_escape_byte(&mut self, byte: u8, out: &mut Vec<DecodeEvent>) -> Option<Step> {
        match byte {
            ESC => {
                // A new escape interrupts the one in progress.
                self.anomalies += 1;
                self.enter_escape();
                Some(Step::Consumed)
            }
            CAN | SUB => {
                self.anomalies += 1;
                self.state = ParserState::Ground;
                Some(Step::Consumed)
            }
            0x00..=0x1f => {
                // C0 controls execute without interrupting the sequence.
                out.push(DecodeEvent::Control(byte));
                Some(Step::Consumed)
            }
            DEL => Some(Step::Consumed),
            _ => None,
        }
    }

    fn abort(&mut self) -> Step {
        self.anomalies += 1;
        self.state = ParserState::Ground;
        Step::Reprocess
    }

    fn escape(&mut self, byte: u8, out: &mut Vec<DecodeEvent>) -> Step {
        if let Some(step) = self.common_escape_byte(byte, out) {
            return step;
        }
        match byte {
            b'[' => self.state = ParserState::CsiEntry,
            b']' => {
                self.osc.clear();
                self.osc_overflowed = false;
                self.state = ParserState::OscString;
            }
            b'P' | b'X' | b'^' | b'_' => self.state = ParserState::IgnoreString,
            0x20..=0x2f => {
                self.intermediates.push(byte);
                self.state = ParserState::EscapeIntermediate;
            }
            0x30..=0x7e => {
                out.push(DecodeEvent::Esc {
                    intermediates: Vec::new(),
                    final_byte: byte,
                });
                self.state = ParserState::Ground;
            }
            _ => return self.abort(),
        }
        Step::Consumed
    }

    fn escape_intermediate(&mut self, byte: u8, out: &mut Vec<DecodeEvent>) -> Step {
        if let Some(step) = self.common_escape_byte(byte, out) {
            return step;
        }
        match byte {
            0x20..=0x2f => self.push_intermediate(byte),
            0x30..=0x7e => {
                out.push(DecodeEvent::Esc {
                    intermediates: std::mem::take(&mut self.intermediates),
                    final_byte: byte,
                });
                self.state = ParserState::Ground;
            }
            _ => return self.abort(),
        }
        Step::Consumed
    }

    fn push_intermediate(&mut self, byte: u8) {
        if self.intermediates.len() < MAX_INTERMEDIATES {
            self.intermediates.push(byte);
        } else {
            self.params_overflowed = true;
        }
    }

    // ── CSI ─────────────────────────────────────────────────────────

    fn csi_param(&mut self, byte: u8, out: &mut Vec<DecodeEvent>) -> Step {
        if let Some(step) = self.common_escape_byte(byte, out) {
            return step;
        }
        match byte {
            b'0'..=b'9' => {
                let digit = u16::from(byte - b'0');
                let value = self.current.unwrap_or(0);
                self.current = Some(value.saturating_mul(10).saturating_add(digit));
                self.state = ParserState::CsiParam;
            }
            b';' | b':' => {
                self.commit_param();
                self.state = ParserState::CsiParam;
            }
            b'<'..=b'?' if self.state == ParserState::CsiEntry => {
                self.private = Some(byte);
                self.state = ParserState::CsiParam;
            }
            0x20..=0x2f => {
                if self.current.is_some() || !self.params.is_empty() {
                    self.commit_param();
                }
                self.push_intermediate(byte);
                self.state = ParserState::CsiIntermediate;
            }
            0x40..=0x7e => {
                if self.current.is_some() || !self.params.is_empty() {
                    self.commit_param();
                }
                self.dispatch_csi(byte, out);
            }
            _ => return self.abort(),
        }
        Step::Consumed
    }

    fn csi_intermediate(&mut self, byte: u8, out: &mut Vec<DecodeEvent>) -> Step {
        if let Some(step) = self.common_escape_byte(byte, out) {
            return step;
        }
        match byte {
            0x20..=0x2f => self.push_intermediate(byte),
            0x40..=0x7e => self.dispatch_csi(byte, out),
            _ => return self.abort(),
        }
        Step::Consumed
    }

    fn commit_param(&mut self) {
        let value = self.current.take().unwrap_or(0);
        if self.params.len() < MAX_PARAMS {
            self.params.push(value);
        } else {
            self.params_overflowed = true;
        }
    }

    fn dispatch_csi(&mut self, final_byte: u8, out: &mut Vec<DecodeEvent>) {
        if self.params_overflowed {
            self.anomalies += 1;
        }
        out.push(DecodeEvent::Csi(CsiSequence {
            private: self.private.take(),
            params: std::mem::take(&mut self.params),
            intermediates: std::mem::take(&mut self.intermediates),
            final_byte,
        }));
        self.clear_sequence();
        self.state = ParserState::Ground;
    }

    // ── OSC ─────────────────────────────────────────────────────────

    fn osc_string(&mut self, byte: u8, out: &mut Vec<DecodeEvent>) -> Step {
        match byte {
            BEL => {
                self.dispatch_osc(out);
                self.state = ParserState::Ground;
            }
            ESC => self.state = ParserState::OscEscape,
            CAN | SUB => {
                self.anomalies += 1;
                self.osc.clear();
                self.state = ParserState::Ground;
            }
            0x00..=0x1f => {}
            _ => {
                if self.osc.len() < MAX_OSC_LEN {
                    self.osc.push(byte);
                } else {
                    self.osc_overflowed = true;
                }
            }
        }
        Step::Consumed
    }

    fn osc_escape(&mut self, byte: u8, out: &mut Vec<DecodeEvent>) -> Step {
        self.dispatch_osc(out);
        if byte == b'\\' {
            self.state = ParserState::Ground;
            return Step::Consumed;
        }
        // Unterminated OSC followed by a new escape sequence.
        self.enter_escape();
        Step::Reprocess
    }

    fn dispatch_osc(&mut self, out: &mut Vec<DecodeEvent>) {
        let raw = std::mem::take(&mut self.osc);
        if std::mem::take(&mut self.osc_overflowed) {
            self.anomalies += 1;
            return;
        }
        match parse_osc(&raw) {
            Some(seq) => out.push(DecodeEvent::Osc(seq)),
            None => self.anomalies += 1,
        }
    }

    fn ignore_string(&mut self, byte: u8) -> Step {
        match byte {
            ESC => self.state = ParserState::IgnoreStringEscape,
            BEL | CAN | SUB => self.state = ParserState::Ground,
            _ => {}
        }
        Step::Consumed
    }

    fn ignore_string_escape(&mut self, byte: u8) -> Step {
        if byte == b'\\' {
            self.state = ParserState::Ground;
            return Step::Consumed;
        }
        self.enter_escape();
        Step::Reprocess
    }
}

/// Split `code;payload`. The identifier must be a decimal number.
fn parse_osc(raw: &[u8]) -> Option<OscSequence> {
    let (ident, payload) = match raw.iter().position(|&b| b == b';') {
        Some(split) => (&raw[..split], &raw[split + 1..]),
        None => (raw, &raw[raw.len()..]),
    };
    if ident.is_empty() || !ident.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let code = std::str::from_utf8(ident).ok()?.parse::<u16>().ok()?;
    Some(OscSequence {
        code,
        payload: String::from_utf8_lossy(payload).into_owned(),
    })
}

/// Decode a complete multi-byte sequence, rejecting overlong encodings,
/// surrogates and values above U+10FFFF.
fn decode_utf8(bytes: &[u8]) -> Option<char> {
    let (value, min) = match *bytes {
        [b0, b1] => ((u32::from(b0 & 0x1f) << 6) | u32::from(b1 & 0x3f), 0x80),
        [b0, b1, b2] => (
            (u32::from(b0 & 0x0f) << 12) | (u32::from(b1 & 0x3f) << 6) | u32::from(b2 & 0x3f),
            0x800,
        ),
        [b0, b1, b2, b3] => (
            (u32::from(b0 & 0x07) << 18)
                | (u32::from(b1 & 0x3f) << 12)
                | (u32::from(b2 & 0x3f) << 6)
                | u32::from(b3 & 0x3f),
            0x1_0000,
        ),
        _ => return None,
    };
    if value < min {
        return None;
    }
    char::from_u32(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_utf8_rejects_overlong() {
        assert_eq!(decode_utf8(&[0xe0, 0x80, 0x80]), None);
        assert_eq!(decode_utf8(&[0xc3, 0xa9]), Some('é'));
    }

    #[test]
    fn test_decode_utf8_rejects_surrogate() {
        assert_eq!(decode_utf8(&[0xed, 0xa0, 0x80]), None);
    }

    #[test]
    fn test_parse_osc_without_payload() {
        let seq = parse_osc(b"133").unwrap();
        assert_eq!(seq.code, 133);
        assert_eq!(seq.payload, "");
    }

    #[test]
    fn test_parse_osc_rejects_non_numeric() {
        assert!(parse_osc(b"L;title").is_none());
        assert!(parse_osc(b";x").is_none());
    }
}
