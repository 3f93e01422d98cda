use bytes::{Buf, BufMut, BytesMut};
use std::fmt;
use tokio_util::codec::{Decoder, Encoder};

use super::RequestId;
use crate::session_id::SessionId;

/// Tag (4 bytes) followed by the total frame length (u32, big endian).
const HEADER_LEN: usize = 8;
/// Frames are tiny; anything larger is a desynchronized stream.
const MAX_FRAME_LEN: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum BrokerPacket {
    /// First frame on every worker connection.
    Hello { worker_id: u16 },
    Subscribe {
        session_id: SessionId,
        poll_seq: u64,
        request_id: RequestId,
    },
    Unsubscribe { request_id: RequestId },
    Publish { sender: SessionId },
    Wake { request_id: RequestId },
    Cancel { request_id: RequestId },
}

impl BrokerPacket {
    pub fn tag(&self) -> &'static [u8; 4] {
        match self {
            BrokerPacket::Hello { .. } => b"HELO",
            BrokerPacket::Subscribe { .. } => b"SUBS",
            BrokerPacket::Unsubscribe { .. } => b"UNSB",
            BrokerPacket::Publish { .. } => b"PUBL",
            BrokerPacket::Wake { .. } => b"WAKE",
            BrokerPacket::Cancel { .. } => b"CNCL",
        }
    }

    fn payload_len(tag: &[u8]) -> Result<usize, &'static str> {
        match tag {
            b"HELO" => Ok(2),
            b"SUBS" => Ok(24),
            b"UNSB" | b"PUBL" | b"WAKE" | b"CNCL" => Ok(8),
            _ => Err("Unknown broker packet tag"),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload: Vec<u8> = Vec::with_capacity(24);
        match *self {
            BrokerPacket::Hello { worker_id } => payload.extend(worker_id.to_be_bytes()),
            BrokerPacket::Subscribe {
                session_id,
                poll_seq,
                request_id,
            } => {
                payload.extend(session_id.raw().to_be_bytes());
                payload.extend(poll_seq.to_be_bytes());
                payload.extend(request_id.to_be_bytes());
            }
            BrokerPacket::Publish { sender } => payload.extend(sender.raw().to_be_bytes()),
            BrokerPacket::Unsubscribe { request_id }
            | BrokerPacket::Wake { request_id }
            | BrokerPacket::Cancel { request_id } => payload.extend(request_id.to_be_bytes()),
        }

        let mut bytes: Vec<u8> = Vec::with_capacity(HEADER_LEN + payload.len());
        bytes.extend(self.tag());
        bytes.extend(((HEADER_LEN + payload.len()) as u32).to_be_bytes());
        bytes.extend(payload);
        bytes
    }

    /// Parses one frame from the front of `bytes`. `Ok(None)` means more data
    /// is needed; on success the consumed length is returned with the packet.
    pub fn from_bytes(bytes: &[u8]) -> Result<Option<(usize, Self)>, &'static str> {
        if bytes.len() < HEADER_LEN {
            return Ok(None);
        }

        let tag = &bytes[0..4];
        let payload_len = Self::payload_len(tag)?;
        let reported_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        if reported_len != HEADER_LEN + payload_len || reported_len > MAX_FRAME_LEN {
            return Err("Broker packet length does not match its tag");
        }
        if bytes.len() < reported_len {
            return Ok(None);
        }

        let mut payload = &bytes[HEADER_LEN..reported_len];
        let packet = match tag {
            b"HELO" => BrokerPacket::Hello {
                worker_id: payload.get_u16(),
            },
            b"SUBS" => BrokerPacket::Subscribe {
                session_id: SessionId::from_raw(payload.get_u64()),
                poll_seq: payload.get_u64(),
                request_id: payload.get_u64(),
            },
            b"UNSB" => BrokerPacket::Unsubscribe {
                request_id: payload.get_u64(),
            },
            b"PUBL" => BrokerPacket::Publish {
                sender: SessionId::from_raw(payload.get_u64()),
            },
            b"WAKE" => BrokerPacket::Wake {
                request_id: payload.get_u64(),
            },
            _ => BrokerPacket::Cancel {
                request_id: payload.get_u64(),
            },
        };

        Ok(Some((reported_len, packet)))
    }
}

impl fmt::Debug for BrokerPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = String::from_utf8_lossy(self.tag());
        match self {
            BrokerPacket::Hello { worker_id } => write!(f, "{} worker={}", tag, worker_id),
            BrokerPacket::Subscribe {
                session_id,
                poll_seq,
                request_id,
            } => write!(
                f,
                "{} sid={} seq={} rq={}",
                tag, session_id, poll_seq, request_id
            ),
            BrokerPacket::Publish { sender } => write!(f, "{} sender={}", tag, sender),
            BrokerPacket::Unsubscribe { request_id }
            | BrokerPacket::Wake { request_id }
            | BrokerPacket::Cancel { request_id } => write!(f, "{} rq={}", tag, request_id),
        }
    }
}

#[derive(Default)]
pub struct BrokerPacketCodec;

impl Decoder for BrokerPacketCodec {
    type Item = BrokerPacket;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match BrokerPacket::from_bytes(&src[..]) {
            Ok(Some((n_read, packet))) => {
                src.advance(n_read);
                Ok(Some(packet))
            }
            Ok(None) => Ok(None),
            Err(error_data) => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                error_data,
            )),
        }
    }
}

impl Encoder<BrokerPacket> for BrokerPacketCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: BrokerPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let packet_bytes = item.to_bytes();
        dst.reserve(packet_bytes.len());
        dst.put_slice(&packet_bytes);
        Ok(())
    }
}
