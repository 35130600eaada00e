use anyhow::Context;
use bytes::Bytes;

/// Terminal payload: once seen, the stream is over.
pub const DONE: &str = "[DONE]";

/// Encode one text fragment as a wire frame.
///
/// The relay's wire format is one `data: ` marker per frame, terminated by
/// a blank line. Payloads may contain single newlines; a payload must never
/// contain `\n\n` (that is the frame delimiter).
pub fn frame(text: &str) -> Bytes {
    Bytes::from(format!("data: {text}\n\n"))
}

/// The closing frame appended after the last content frame.
pub fn done_frame() -> Bytes {
    Bytes::from(format!("data: {DONE}\n\n"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Non-empty text payload.
    Data(String),
    /// Terminal marker; no further frames follow.
    Done,
}

/// Incremental frame reassembler for the relay wire format.
///
/// - Buffers raw bytes and splits on the `\n\n` delimiter
/// - Only complete segments are decoded as UTF-8, so a multi-byte
///   character split across reads never corrupts output
/// - Latches after the terminal marker: anything buffered or pushed
///   afterwards is discarded
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    done: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly read bytes; returns every frame completed by this read,
    /// in order. The trailing incomplete segment stays buffered.
    pub fn push(&mut self, chunk: &[u8]) -> anyhow::Result<Vec<Frame>> {
        if self.done {
            return Ok(Vec::new());
        }
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(pos) = find_delimiter(&self.buf) {
            let segment: Vec<u8> = self.buf.drain(..pos + 2).collect();
            let segment = std::str::from_utf8(&segment[..pos])
                .context("stream frame is not valid UTF-8")?;

            match parse_segment(segment) {
                Some(Frame::Done) => {
                    self.done = true;
                    self.buf.clear();
                    out.push(Frame::Done);
                    return Ok(out);
                }
                Some(f) => out.push(f),
                None => {}
            }
        }
        Ok(out)
    }

    /// Flush the residual buffer at natural end of stream (no terminal
    /// marker observed). Applies the same marker-strip and empty-payload
    /// rules as `push`.
    pub fn finish(&mut self) -> anyhow::Result<Option<Frame>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        if self.buf.is_empty() {
            return Ok(None);
        }
        let bytes = std::mem::take(&mut self.buf);
        let segment =
            std::str::from_utf8(&bytes).context("trailing stream bytes are not valid UTF-8")?;
        Ok(parse_segment(segment))
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

/// Strip one optional leading newline and the `data:` marker (with one
/// optional following space). Segments without the marker and segments
/// whose payload is blank are dropped.
fn parse_segment(segment: &str) -> Option<Frame> {
    let s = segment.strip_prefix('\n').unwrap_or(segment);
    let payload = s.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload == DONE {
        return Some(Frame::Done);
    }
    if payload.trim().is_empty() {
        return None;
    }
    Some(Frame::Data(payload.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(dec: &mut FrameDecoder, input: &[u8]) -> Vec<Frame> {
        dec.push(input).unwrap()
    }

    #[test]
    fn hello_world_done_in_order() {
        let mut dec = FrameDecoder::new();
        let frames = collect(&mut dec, b"data: Hello\n\ndata: World\n\ndata: [DONE]\n\n");
        assert_eq!(
            frames,
            vec![
                Frame::Data("Hello".into()),
                Frame::Data("World".into()),
                Frame::Done,
            ]
        );
    }

    #[test]
    fn boundary_independent_for_every_split() {
        let input: &[u8] = "data: H\u{e9}llo\n\ndata: W\u{f6}rld\n\ndata: [DONE]\n\n".as_bytes();

        let mut reference = FrameDecoder::new();
        let expected = reference.push(input).unwrap();

        for split in 0..=input.len() {
            let (a, b) = input.split_at(split);
            let mut dec = FrameDecoder::new();
            let mut frames = dec.push(a).unwrap();
            frames.extend(dec.push(b).unwrap());
            assert_eq!(frames, expected, "split at byte {split}");
        }
    }

    #[test]
    fn byte_at_a_time_matches_single_read() {
        let input = b"data: one\n\ndata: two\n\ndata: [DONE]\n\n";

        let mut reference = FrameDecoder::new();
        let expected = reference.push(input).unwrap();

        let mut dec = FrameDecoder::new();
        let mut frames = Vec::new();
        for b in input {
            frames.extend(dec.push(&[*b]).unwrap());
        }
        assert_eq!(frames, expected);
    }

    #[test]
    fn done_suppresses_buffered_frames() {
        let mut dec = FrameDecoder::new();
        let frames = collect(&mut dec, b"data: A\n\ndata: [DONE]\n\ndata: B\n\n");
        assert_eq!(frames, vec![Frame::Data("A".into()), Frame::Done]);

        // Later reads are discarded too.
        assert!(dec.push(b"data: C\n\n").unwrap().is_empty());
        assert_eq!(dec.finish().unwrap(), None);
    }

    #[test]
    fn empty_payloads_are_dropped() {
        let mut dec = FrameDecoder::new();
        assert!(collect(&mut dec, b"data: \n\n").is_empty());
        assert!(collect(&mut dec, b"data:\n\n").is_empty());
        assert!(collect(&mut dec, b"data:   \n\n").is_empty());
    }

    #[test]
    fn segments_without_marker_are_dropped() {
        let mut dec = FrameDecoder::new();
        assert!(collect(&mut dec, b": comment\n\nevent: ping\n\n").is_empty());
        let frames = collect(&mut dec, b"data: real\n\n");
        assert_eq!(frames, vec![Frame::Data("real".into())]);
    }

    #[test]
    fn embedded_newline_round_trip() {
        let text = "line one\nline two\nline three";
        let wire = frame(text);

        let mut dec = FrameDecoder::new();
        let frames = dec.push(&wire).unwrap();
        assert_eq!(frames, vec![Frame::Data(text.into())]);
    }

    #[test]
    fn leading_newline_from_prior_frame_is_stripped() {
        // A payload ending in "\n" merges with the delimiter on the wire,
        // leaving the next segment with one bare leading newline; the
        // decoder strips exactly one.
        let mut dec = FrameDecoder::new();
        let mut frames = dec.push(&frame("a\n")).unwrap();
        frames.extend(dec.push(&frame("b")).unwrap());
        assert_eq!(frames, vec![Frame::Data("a".into()), Frame::Data("b".into())]);
    }

    #[test]
    fn finish_flushes_residual() {
        let mut dec = FrameDecoder::new();
        assert!(dec.push(b"data: tail without delimiter").unwrap().is_empty());
        assert_eq!(
            dec.finish().unwrap(),
            Some(Frame::Data("tail without delimiter".into()))
        );
        // finish is idempotent
        assert_eq!(dec.finish().unwrap(), None);
    }

    #[test]
    fn finish_drops_blank_residual() {
        let mut dec = FrameDecoder::new();
        dec.push(b"data:  ").unwrap();
        assert_eq!(dec.finish().unwrap(), None);
    }

    #[test]
    fn invalid_utf8_is_an_error() {
        let mut dec = FrameDecoder::new();
        assert!(dec.push(b"data: \xff\xfe\n\n").is_err());
    }
}
