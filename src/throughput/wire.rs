//! Length-prefixed frame codec for the throughput test stream.
//!
//! Every frame is a 4-byte big-endian length prefix, a 1-byte tag and a body:
//!
//! | tag | frame        | body                           |
//! |-----|--------------|--------------------------------|
//! | 0   | payload      | filler bytes, counted by length |
//! | 1   | terminator   | `BYE`                          |
//! | 2   | acknowledge  | `ACK`                          |
//!
//! Control frames live outside the payload bytes, so end-of-stream is
//! unambiguous whatever the payload contains and however the stream is split
//! into reads.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use super::CHUNK_SIZE;

/// Maximum frame size (tag + body): 64 KiB.
const MAX_FRAME_SIZE: usize = 64 * 1024;

const TAG_PAYLOAD: u8 = 0;
const TAG_TERMINATOR: u8 = 1;
const TAG_ACK: u8 = 2;

/// Body of the terminator frame.
pub const TERMINATOR: &[u8] = b"BYE";

/// Body of the acknowledgement frame.
pub const ACK: &[u8] = b"ACK";

static FILLER: [u8; CHUNK_SIZE] = [0u8; CHUNK_SIZE];

/// One fixed-size payload chunk of filler bytes.
pub fn filler_chunk() -> Bytes {
    Bytes::from_static(&FILLER)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Payload(Bytes),
    Terminator,
    Ack,
}

/// Frame codec for the test stream.
///
/// Wraps a [`LengthDelimitedCodec`] configured for a u32 big-endian length
/// prefix covering the tag and body only.
#[derive(Debug)]
pub struct PerfCodec {
    inner: LengthDelimitedCodec,
}

impl PerfCodec {
    pub fn new() -> Self {
        let inner = LengthDelimitedCodec::builder()
            .big_endian()
            .length_field_length(4)
            .max_frame_length(MAX_FRAME_SIZE)
            .length_adjustment(0)
            .new_codec();

        Self { inner }
    }
}

impl Default for PerfCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(msg: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}

impl Encoder<Frame> for PerfCodec {
    type Error = std::io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (tag, body): (u8, &[u8]) = match &frame {
            Frame::Payload(data) => (TAG_PAYLOAD, &data[..]),
            Frame::Terminator => (TAG_TERMINATOR, TERMINATOR),
            Frame::Ack => (TAG_ACK, ACK),
        };

        let mut buf = BytesMut::with_capacity(1 + body.len());
        buf.put_u8(tag);
        buf.extend_from_slice(body);
        self.inner.encode(buf.freeze(), dst)
    }
}

impl Decoder for PerfCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        let Some(mut buf) = self.inner.decode(src)? else {
            return Ok(None);
        };

        if buf.is_empty() {
            return Err(invalid("empty frame".to_string()));
        }

        let tag = buf.get_u8();
        let frame = match tag {
            TAG_PAYLOAD => Frame::Payload(buf.freeze()),
            TAG_TERMINATOR if &buf[..] == TERMINATOR => Frame::Terminator,
            TAG_ACK if &buf[..] == ACK => Frame::Ack,
            TAG_TERMINATOR | TAG_ACK => {
                return Err(invalid(format!("malformed control frame (tag {tag})")));
            }
            other => return Err(invalid(format!("unknown frame tag {other}"))),
        };

        Ok(Some(frame))
    }
}

/// Encode a sequence of frames into one contiguous buffer.
pub fn encode_frames<I>(frames: I) -> std::io::Result<BytesMut>
where
    I: IntoIterator<Item = Frame>,
{
    let mut codec = PerfCodec::new();
    let mut buf = BytesMut::new();
    for frame in frames {
        codec.encode(frame, &mut buf)?;
    }
    Ok(buf)
}
