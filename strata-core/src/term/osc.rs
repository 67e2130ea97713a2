use super::decoder::OscSequence;

/// Shell-integration markers carried over OSC 133 and OSC 7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellMarker {
    /// OSC 133;A  prompt start
    PromptStart,

    /// OSC 133;B  end of prompt, command input begins
    CommandStart,

    /// OSC 133;C  command accepted, output follows
    OutputStart,

    /// OSC 133;D[;<exit>]
    CommandEnd { exit_code: Option<i32> },

    /// OSC 7;file://host/path  (decoded path)
    WorkingDirectory(String),
}

impl ShellMarker {
    /// Interpret an OSC sequence as a shell marker, if it is one.
    pub fn from_osc(osc: &OscSequence) -> Option<Self> {
        match osc.code {
            133 => parse_prompt_marker(&osc.payload),
            7 => decode_file_uri(&osc.payload).map(ShellMarker::WorkingDirectory),
            _ => None,
        }
    }
}

fn parse_prompt_marker(payload: &str) -> Option<ShellMarker> {
    let mut fields = payload.split(';');
    match fields.next()?.trim() {
        "A" => Some(ShellMarker::PromptStart),
        "B" => Some(ShellMarker::CommandStart),
        "C" => Some(ShellMarker::OutputStart),
        "D" => {
            let exit_code = fields.next().and_then(|x| x.trim().parse::<i32>().ok());
            Some(ShellMarker::CommandEnd { exit_code })
        }
        _ => None,
    }
}

/// Decode `file://host/path` into a path. A bare absolute path is accepted
/// as-is; anything else is rejected.
pub fn decode_file_uri(uri: &str) -> Option<String> {
    let u = uri.trim();

    let path = match u.strip_prefix("file://") {
        // Skip the host component; the path starts at the next '/'.
        Some(rest) => &rest[rest.find('/')?..],
        None if u.starts_with('/') => u,
        None => return None,
    };

    Some(percent_decode(path))
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn osc(code: u16, payload: &str) -> OscSequence {
        OscSequence {
            code,
            payload: payload.to_string(),
        }
    }

    #[test]
    fn test_prompt_markers() {
        assert_eq!(ShellMarker::from_osc(&osc(133, "A")), Some(ShellMarker::PromptStart));
        assert_eq!(ShellMarker::from_osc(&osc(133, "B")), Some(ShellMarker::CommandStart));
        assert_eq!(ShellMarker::from_osc(&osc(133, "C")), Some(ShellMarker::OutputStart));
        assert_eq!(
            ShellMarker::from_osc(&osc(133, "D;127")),
            Some(ShellMarker::CommandEnd { exit_code: Some(127) })
        );
        assert_eq!(
            ShellMarker::from_osc(&osc(133, "D")),
            Some(ShellMarker::CommandEnd { exit_code: None })
        );
        assert_eq!(
            ShellMarker::from_osc(&osc(133, "D;oops")),
            Some(ShellMarker::CommandEnd { exit_code: None })
        );
    }

    #[test]
    fn test_prompt_marker_with_options() {
        assert_eq!(
            ShellMarker::from_osc(&osc(133, "A;cl=m;aid=42")),
            Some(ShellMarker::PromptStart)
        );
        assert_eq!(ShellMarker::from_osc(&osc(133, "Z")), None);
    }

    #[test]
    fn test_cwd_decoding() {
        assert_eq!(
            ShellMarker::from_osc(&osc(7, "file://myhost/home/me/My%20Docs")),
            Some(ShellMarker::WorkingDirectory("/home/me/My Docs".into()))
        );
        assert_eq!(decode_file_uri("file:///tmp"), Some("/tmp".into()));
        assert_eq!(decode_file_uri("/var/log"), Some("/var/log".into()));
        assert_eq!(decode_file_uri("file://hostonly"), None);
        assert_eq!(decode_file_uri("https://example.com/x"), None);
    }

    #[test]
    fn test_percent_decode_keeps_malformed_escapes() {
        assert_eq!(percent_decode("/a%2"), "/a%2");
        assert_eq!(percent_decode("/a%zz"), "/a%zz");
        assert_eq!(percent_decode("/caf%C3%A9"), "/café");
    }

    #[test]
    fn test_other_osc_codes_ignored() {
        assert_eq!(ShellMarker::from_osc(&osc(0, "title")), None);
    }
}
