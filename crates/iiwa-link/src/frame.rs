//! TCP 分帧
//!
//! 每条消息前加 4 字节小端长度前缀：
//!
//! ```text
//! | len: u32 LE | payload (len bytes) |
//! ```
//!
//! UDP 一个数据报就是一条消息，不加前缀。

use crate::LinkError;
use bytes::{Buf, BytesMut};

/// 帧头长度
pub const FRAME_HEADER_LEN: usize = 4;

/// 单帧最大负载（防止损坏的长度字段导致巨量分配）
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// 写出帧头，返回帧总长度
pub fn encode_frame_header(payload_len: usize) -> Result<[u8; FRAME_HEADER_LEN], LinkError> {
    if payload_len > MAX_FRAME_LEN {
        return Err(LinkError::FrameTooLarge(payload_len));
    }
    Ok((payload_len as u32).to_le_bytes())
}

/// 把一条消息编码为完整帧（追加到 `out`）
pub fn encode_frame(payload: &[u8], out: &mut Vec<u8>) -> Result<(), LinkError> {
    let header = encode_frame_header(payload.len())?;
    out.reserve(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(payload);
    Ok(())
}

/// 流式帧解码器
///
/// 接收端逐段喂入字节，按完整帧取出负载。
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 喂入收到的字节
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// 取出下一帧负载；数据不足时返回 `Ok(None)`
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let len = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(LinkError::FrameTooLarge(len));
        }
        if self.buf.len() < FRAME_HEADER_LEN + len {
            return Ok(None);
        }
        self.buf.advance(FRAME_HEADER_LEN);
        Ok(Some(self.buf.split_to(len).to_vec()))
    }

    /// 缓冲中尚未组成完整帧的字节数
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame() {
        let mut out = Vec::new();
        encode_frame(b"abc", &mut out).unwrap();
        assert_eq!(out, vec![3, 0, 0, 0, b'a', b'b', b'c']);
    }

    #[test]
    fn test_decoder_partial_input() {
        let mut wire = Vec::new();
        encode_frame(b"hello", &mut wire).unwrap();
        encode_frame(b"", &mut wire).unwrap();
        encode_frame(b"iiwa", &mut wire).unwrap();

        let mut decoder = FrameDecoder::new();
        // 逐字节喂入
        let mut frames = Vec::new();
        for byte in &wire {
            decoder.extend(std::slice::from_ref(byte));
            while let Some(frame) = decoder.next_frame().unwrap() {
                frames.push(frame);
            }
        }
        assert_eq!(frames, vec![b"hello".to_vec(), Vec::new(), b"iiwa".to_vec()]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_rejects_oversized_length() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&u32::MAX.to_le_bytes());
        assert!(matches!(decoder.next_frame(), Err(LinkError::FrameTooLarge(_))));
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        assert!(matches!(
            encode_frame_header(MAX_FRAME_LEN + 1),
            Err(LinkError::FrameTooLarge(_))
        ));
    }
}
