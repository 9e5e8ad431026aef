//! 可复用消息构建器
//!
//! 构建器持有一块可复用的缓冲区：每次使用前 `reset()`，依次追加字段，
//! 最后 `finish()` 写入消息头。缓冲区容量在多次使用之间保留，
//! 稳态控制循环中不会重复分配。

use crate::{FIELD_HEADER_LEN, FieldId, HEADER_LEN, MAGIC, MessageType, ProtocolError, WIRE_VERSION};
use bytes::{BufMut, BytesMut};

/// 默认缓冲区容量：3 个字段 × 7 个关节，外加头部，留有余量
const DEFAULT_CAPACITY: usize = 256;

/// 消息构建器
///
/// # Example
///
/// ```
/// use iiwa_protocol::{FieldId, MessageBuilder, MessageType, JointState};
///
/// let mut builder = MessageBuilder::new();
/// builder.push_f64_vector(FieldId::Position, &[0.1, 0.2]).unwrap();
/// builder.push_f64_vector(FieldId::Velocity, &[]).unwrap();
/// builder.push_f64_vector(FieldId::Acceleration, &[1.5]).unwrap();
/// builder.finish(MessageType::JointState).unwrap();
///
/// let state = JointState::decode(builder.as_bytes().unwrap()).unwrap();
/// assert_eq!(state.position, vec![0.1, 0.2]);
/// ```
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    buf: BytesMut,
    field_count: u16,
    finished: bool,
}

impl MessageBuilder {
    /// 创建新的构建器（默认容量）
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// 创建指定初始容量的构建器
    pub fn with_capacity(capacity: usize) -> Self {
        let mut builder = Self {
            buf: BytesMut::with_capacity(capacity.max(HEADER_LEN)),
            field_count: 0,
            finished: false,
        };
        builder.reset();
        builder
    }

    /// 清空内容，保留已分配的容量
    pub fn reset(&mut self) {
        self.buf.clear();
        // 预留消息头，finish() 时回填
        self.buf.put_bytes(0, HEADER_LEN);
        self.field_count = 0;
        self.finished = false;
    }

    /// 追加一个 f64 向量字段
    ///
    /// 不检查向量长度与关节数是否一致：长度由调用方决定。
    pub fn push_f64_vector(&mut self, field: FieldId, values: &[f64]) -> Result<(), ProtocolError> {
        if self.finished {
            return Err(ProtocolError::AlreadyFinished);
        }
        if self.field_count == u16::MAX {
            return Err(ProtocolError::TooManyFields);
        }
        let count = u32::try_from(values.len())
            .map_err(|_| ProtocolError::VectorTooLong { len: values.len() })?;

        self.buf.reserve(FIELD_HEADER_LEN + values.len() * 8);
        self.buf.put_u8(field as u8);
        self.buf.put_bytes(0, 3);
        self.buf.put_u32_le(count);
        for value in values {
            self.buf.put_f64_le(*value);
        }
        self.field_count += 1;
        Ok(())
    }

    /// 封包：回填消息头
    pub fn finish(&mut self, message_type: MessageType) -> Result<(), ProtocolError> {
        if self.finished {
            return Err(ProtocolError::AlreadyFinished);
        }

        let header = &mut self.buf[..HEADER_LEN];
        header[0..2].copy_from_slice(&MAGIC);
        header[2] = WIRE_VERSION;
        header[3] = message_type as u8;
        header[4..6].copy_from_slice(&self.field_count.to_le_bytes());
        header[6..8].copy_from_slice(&0u16.to_le_bytes());

        self.finished = true;
        Ok(())
    }

    /// 是否已封包
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// 已追加的字段数
    pub fn field_count(&self) -> u16 {
        self.field_count
    }

    /// 当前编码长度（含消息头）
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// 是否尚未追加任何字段
    pub fn is_empty(&self) -> bool {
        self.field_count == 0
    }

    /// 当前缓冲区容量
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// 获取已封包的消息字节
    ///
    /// # 错误
    /// - `ProtocolError::NotFinished`: 尚未调用 `finish()`
    pub fn as_bytes(&self) -> Result<&[u8], ProtocolError> {
        if !self.finished {
            return Err(ProtocolError::NotFinished);
        }
        Ok(&self.buf)
    }
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_builder_is_empty() {
        let builder = MessageBuilder::new();
        assert!(builder.is_empty());
        assert!(!builder.is_finished());
        assert_eq!(builder.len(), HEADER_LEN);
    }

    #[test]
    fn test_as_bytes_requires_finish() {
        let mut builder = MessageBuilder::new();
        builder.push_f64_vector(FieldId::Position, &[1.0]).unwrap();
        assert!(matches!(builder.as_bytes(), Err(ProtocolError::NotFinished)));
    }

    #[test]
    fn test_push_after_finish_rejected() {
        let mut builder = MessageBuilder::new();
        builder.finish(MessageType::JointState).unwrap();
        assert!(matches!(
            builder.push_f64_vector(FieldId::Position, &[1.0]),
            Err(ProtocolError::AlreadyFinished)
        ));
        assert!(matches!(
            builder.finish(MessageType::JointState),
            Err(ProtocolError::AlreadyFinished)
        ));
    }

    #[test]
    fn test_header_layout() {
        let mut builder = MessageBuilder::new();
        builder.push_f64_vector(FieldId::Position, &[0.5, -0.5]).unwrap();
        builder.push_f64_vector(FieldId::Velocity, &[]).unwrap();
        builder.finish(MessageType::JointState).unwrap();

        let bytes = builder.as_bytes().unwrap();
        assert_eq!(&bytes[0..2], b"JS");
        assert_eq!(bytes[2], WIRE_VERSION);
        assert_eq!(bytes[3], MessageType::JointState as u8);
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), 2);
        // 头 + (字段头 + 2 个 f64) + 空字段头
        assert_eq!(bytes.len(), HEADER_LEN + FIELD_HEADER_LEN + 16 + FIELD_HEADER_LEN);
    }

    #[test]
    fn test_field_encoding_little_endian() {
        let mut builder = MessageBuilder::new();
        builder.push_f64_vector(FieldId::Acceleration, &[1.25]).unwrap();
        builder.finish(MessageType::JointState).unwrap();

        let bytes = builder.as_bytes().unwrap();
        let field = &bytes[HEADER_LEN..];
        assert_eq!(field[0], FieldId::Acceleration as u8);
        assert_eq!(&field[1..4], &[0, 0, 0]);
        assert_eq!(u32::from_le_bytes([field[4], field[5], field[6], field[7]]), 1);
        assert_eq!(&field[8..16], &1.25f64.to_le_bytes());
    }

    #[test]
    fn test_reset_keeps_capacity() {
        let mut builder = MessageBuilder::with_capacity(64);
        builder.push_f64_vector(FieldId::Position, &[0.0; 32]).unwrap();
        builder.finish(MessageType::JointState).unwrap();
        let capacity = builder.capacity();

        builder.reset();
        assert!(!builder.is_finished());
        assert_eq!(builder.field_count(), 0);
        assert_eq!(builder.len(), HEADER_LEN);
        assert!(builder.capacity() >= capacity);
    }
}
