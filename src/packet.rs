//! 패킷 코덱
//!
//! 헤더 레이아웃 (32바이트, 빅엔디안):
//!
//! | offset | bytes | field |
//! |---|---|---|
//! | 0 | 1 | 패킷 타입 |
//! | 1 | 16 | 세션 ID |
//! | 17 | 4 | 청크 인덱스 (-1 = 해당 없음) |
//! | 21 | 4 | 총 청크 수 (-1 = 해당 없음) |
//! | 25 | 1 | ACK 타입 (0xFF = 해당 없음) |
//! | 26 | 4 | 페이로드 길이 |
//! | 30 | 2 | 예약 |
//!
//! 헤더 뒤에 페이로드 (메타데이터 JSON, 청크 데이터, 또는 사유 문자열)

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result, MAX_PAYLOAD_SIZE};

/// 세션 ID (128비트)
pub type SessionId = uuid::Uuid;

/// 고정 헤더 크기
pub const HEADER_SIZE: usize = 32;

/// 해당 없는 인덱스/개수 값
pub const NOT_APPLICABLE: i32 = -1;

/// ACK 타입 없음 표시
const NO_ACK_CODE: u8 = 0xFF;

/// 패킷 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    /// 전송 메타데이터
    Metadata = 0,

    /// 청크 데이터
    Data = 1,

    /// 응답
    Ack = 2,

    /// Heartbeat 브로드캐스트
    Discovery = 3,

    /// Heartbeat 응답
    DiscoveryResponse = 4,
}

impl PacketKind {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::Metadata),
            1 => Ok(Self::Data),
            2 => Ok(Self::Ack),
            3 => Ok(Self::Discovery),
            4 => Ok(Self::DiscoveryResponse),
            other => Err(Error::UnknownPacketKind(other)),
        }
    }
}

/// ACK 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AckKind {
    /// 메타데이터 수락
    Metadata = 0,

    /// 청크 수신
    Chunk = 1,

    /// 전송 완료 (저장됨)
    Complete = 2,

    /// 재시도 요청
    Retry = 3,

    /// 거부
    Rejected = 4,
}

impl AckKind {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::Metadata),
            1 => Ok(Self::Chunk),
            2 => Ok(Self::Complete),
            3 => Ok(Self::Retry),
            4 => Ok(Self::Rejected),
            other => Err(Error::UnknownAckKind(other)),
        }
    }
}

/// 단일 데이터그램 페이로드
///
/// 한 번의 송신/수신마다 새로 만들어지며 생성 후 변경되지 않는다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    kind: PacketKind,
    session_id: SessionId,
    chunk_index: i32,
    total_chunks: i32,
    ack: Option<AckKind>,
    payload: Bytes,
}

impl Packet {
    /// 메타데이터 패킷
    pub fn metadata(session_id: SessionId, total_chunks: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: PacketKind::Metadata,
            session_id,
            chunk_index: NOT_APPLICABLE,
            total_chunks,
            ack: None,
            payload: payload.into(),
        }
    }

    /// 청크 데이터 패킷
    pub fn data(
        session_id: SessionId,
        chunk_index: i32,
        total_chunks: i32,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            kind: PacketKind::Data,
            session_id,
            chunk_index,
            total_chunks,
            ack: None,
            payload: payload.into(),
        }
    }

    /// ACK 패킷 (페이로드는 사유 문자열)
    pub fn ack(session_id: SessionId, ack: AckKind, chunk_index: i32, reason: &str) -> Self {
        Self {
            kind: PacketKind::Ack,
            session_id,
            chunk_index,
            total_chunks: NOT_APPLICABLE,
            ack: Some(ack),
            payload: Bytes::copy_from_slice(reason.as_bytes()),
        }
    }

    /// Heartbeat 패킷
    pub fn discovery(session_id: SessionId, payload: impl Into<Bytes>) -> Self {
        Self::announcement(PacketKind::Discovery, session_id, payload.into())
    }

    /// Heartbeat 응답 패킷
    pub fn discovery_response(session_id: SessionId, payload: impl Into<Bytes>) -> Self {
        Self::announcement(PacketKind::DiscoveryResponse, session_id, payload.into())
    }

    fn announcement(kind: PacketKind, session_id: SessionId, payload: Bytes) -> Self {
        Self {
            kind,
            session_id,
            chunk_index: NOT_APPLICABLE,
            total_chunks: NOT_APPLICABLE,
            ack: None,
            payload,
        }
    }

    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn chunk_index(&self) -> i32 {
        self.chunk_index
    }

    pub fn total_chunks(&self) -> i32 {
        self.total_chunks
    }

    pub fn ack_kind(&self) -> Option<AckKind> {
        self.ack
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// ACK 사유 문자열 (UTF-8 손실 변환)
    pub fn reason(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// 직렬화된 전체 크기
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// 바이트로 직렬화
    pub fn encode(&self) -> Result<Bytes> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge {
                len: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.kind.code());
        buf.put_slice(self.session_id.as_bytes());
        buf.put_i32(self.chunk_index);
        buf.put_i32(self.total_chunks);
        buf.put_u8(self.ack.map(AckKind::code).unwrap_or(NO_ACK_CODE));
        buf.put_u32(self.payload.len() as u32);
        buf.put_u16(0); // 예약
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// 바이트에서 역직렬화
    ///
    /// 선언된 페이로드 뒤의 남는 바이트는 무시한다.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::PacketTooShort {
                len: bytes.len(),
                header: HEADER_SIZE,
            });
        }

        let mut buf = bytes;
        let kind = PacketKind::from_code(buf.get_u8())?;

        let mut id = [0u8; 16];
        buf.copy_to_slice(&mut id);
        let session_id = SessionId::from_bytes(id);

        let chunk_index = buf.get_i32();
        let total_chunks = buf.get_i32();
        let ack = match buf.get_u8() {
            NO_ACK_CODE => None,
            code => Some(AckKind::from_code(code)?),
        };
        let declared = buf.get_u32() as usize;
        buf.advance(2); // 예약

        if declared > buf.remaining() {
            return Err(Error::PayloadLengthMismatch {
                declared,
                available: buf.remaining(),
            });
        }

        Ok(Self {
            kind,
            session_id,
            chunk_index,
            total_chunks,
            ack,
            payload: Bytes::copy_from_slice(&buf[..declared]),
        })
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Packet{{kind={:?}, session={}, chunk={}, total={}, ack={:?}, payload={}B}}",
            self.kind,
            self.session_id,
            self.chunk_index,
            self.total_chunks,
            self.ack,
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(packet: &Packet) -> Packet {
        let bytes = packet.encode().unwrap();
        assert_eq!(bytes.len(), packet.encoded_len());
        Packet::decode(&bytes).unwrap()
    }

    #[test]
    fn test_roundtrip_every_kind() {
        let id = SessionId::new_v4();
        let packets = vec![
            Packet::metadata(id, 3, &b"{\"fileName\":\"a.txt\"}"[..]),
            Packet::data(id, 2, 3, vec![1u8, 2, 3, 4]),
            Packet::ack(id, AckKind::Chunk, 2, "Chunk received"),
            Packet::ack(id, AckKind::Rejected, NOT_APPLICABLE, ""),
            Packet::discovery(id, &b"{\"peerId\":\"p\",\"port\":9876}"[..]),
            Packet::discovery_response(id, Bytes::new()),
        ];

        for packet in &packets {
            assert_eq!(&roundtrip(packet), packet);
        }
    }

    #[test]
    fn test_header_layout() {
        let id = SessionId::from_bytes([7u8; 16]);
        let bytes = Packet::ack(id, AckKind::Retry, 5, "x").encode().unwrap();

        assert_eq!(bytes[0], 2);
        assert_eq!(&bytes[1..17], &[7u8; 16]);
        assert_eq!(&bytes[17..21], &5i32.to_be_bytes());
        assert_eq!(&bytes[21..25], &(-1i32).to_be_bytes());
        assert_eq!(bytes[25], 3);
        assert_eq!(&bytes[26..30], &1u32.to_be_bytes());
        assert_eq!(&bytes[30..32], &[0, 0]);
        assert_eq!(&bytes[32..], b"x");

        let data = Packet::data(id, 0, 1, Bytes::new()).encode().unwrap();
        assert_eq!(data[25], 0xFF);
    }

    #[test]
    fn test_decode_too_short() {
        let err = Packet::decode(&[0u8; HEADER_SIZE - 1]).unwrap_err();
        assert!(matches!(err, Error::PacketTooShort { .. }));
        assert!(err.is_protocol());
    }

    #[test]
    fn test_decode_truncated_payload() {
        let id = SessionId::new_v4();
        let bytes = Packet::data(id, 0, 1, vec![9u8; 10]).encode().unwrap();
        let err = Packet::decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(
            err,
            Error::PayloadLengthMismatch {
                declared: 10,
                available: 9
            }
        ));
    }

    #[test]
    fn test_decode_unknown_codes() {
        let id = SessionId::new_v4();
        let mut bytes = Packet::data(id, 0, 1, Bytes::new()).encode().unwrap().to_vec();
        bytes[0] = 9;
        assert!(matches!(
            Packet::decode(&bytes),
            Err(Error::UnknownPacketKind(9))
        ));

        bytes[0] = PacketKind::Ack.code();
        bytes[25] = 7;
        assert!(matches!(Packet::decode(&bytes), Err(Error::UnknownAckKind(7))));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let id = SessionId::new_v4();
        let packet = Packet::data(id, 0, 1, vec![0u8; MAX_PAYLOAD_SIZE + 1]);
        assert!(matches!(
            packet.encode(),
            Err(Error::PayloadTooLarge { .. })
        ));

        let packet = Packet::data(id, 0, 1, vec![0u8; MAX_PAYLOAD_SIZE]);
        assert!(packet.encode().is_ok());
    }
}
