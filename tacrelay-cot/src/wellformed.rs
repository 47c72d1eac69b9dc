//! Cheap well-formedness check for extracted CoT candidates
//!
//! This is not an XML parser. It answers one question: does this candidate
//! look like a single complete XML document, so that forwarding it to other
//! peers is not obviously garbage? Typed CoT semantics live entirely outside
//! the relay.

/// Returns true if `candidate` looks like one complete XML document:
/// non-empty, starts with an XML declaration or element tag, and every
/// element that opens also closes (depth never goes negative and ends at
/// zero, with at least one element seen).
pub fn is_well_formed(candidate: &str) -> bool {
    let text = candidate.trim_matches(|c: char| c.is_ascii_whitespace());
    if text.is_empty() || !text.starts_with('<') {
        return false;
    }

    let bytes = text.as_bytes();
    let mut depth: i64 = 0;
    let mut elements = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }

        if text[i..].starts_with("<!--") {
            match text[i + 4..].find("-->") {
                Some(end) => i += 4 + end + 3,
                None => return false,
            }
            continue;
        }
        if text[i..].starts_with("<![CDATA[") {
            match text[i + 9..].find("]]>") {
                Some(end) => i += 9 + end + 3,
                None => return false,
            }
            continue;
        }

        // Generic markup: declaration <?..?>, doctype <!..>, or element tag.
        // Quoted attribute values may contain '>' so quotes are skipped whole.
        let start = i;
        i += 1;
        let mut quote: Option<u8> = None;
        let mut close = None;
        while i < bytes.len() {
            let b = bytes[i];
            match quote {
                Some(q) => {
                    if b == q {
                        quote = None;
                    }
                }
                None => match b {
                    b'"' | b'\'' => quote = Some(b),
                    b'>' => {
                        close = Some(i);
                        break;
                    }
                    b'<' => return false,
                    _ => {}
                },
            }
            i += 1;
        }
        let Some(close) = close else {
            return false;
        };
        let inner = &text[start + 1..close];
        i = close + 1;

        if inner.is_empty() {
            return false;
        }
        if inner.starts_with('?') || inner.starts_with('!') {
            // <?xml ...?> and <!DOCTYPE ...> do not affect element depth.
            continue;
        }
        if let Some(name) = inner.strip_prefix('/') {
            if name.trim().is_empty() {
                return false;
            }
            depth -= 1;
            if depth < 0 {
                return false;
            }
        } else if inner.ends_with('/') {
            elements += 1;
        } else {
            elements += 1;
            depth += 1;
        }
    }

    depth == 0 && elements > 0
}
