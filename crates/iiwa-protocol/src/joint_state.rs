//! 消息解码
//!
//! 发送链路只需要构建器；解码主要给接收端、抓包工具和测试使用。

use crate::{
    FIELD_HEADER_LEN, FieldId, HEADER_LEN, MAGIC, MessageBuilder, MessageType, ProtocolError,
    WIRE_VERSION,
};
use bytes::Buf;

/// 解码后的消息头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// 消息类型
    pub message_type: MessageType,
    /// 字段数
    pub field_count: u16,
}

/// 未经语义检查的字段
#[derive(Debug, Clone, PartialEq)]
pub struct RawField {
    pub id: FieldId,
    pub values: Vec<f64>,
}

/// 解码消息头
pub fn decode_header(data: &[u8]) -> Result<MessageHeader, ProtocolError> {
    if data.len() < HEADER_LEN {
        return Err(ProtocolError::InvalidLength {
            expected: HEADER_LEN,
            actual: data.len(),
        });
    }

    let mut buf = data;
    let magic = [buf.get_u8(), buf.get_u8()];
    if magic != MAGIC {
        return Err(ProtocolError::InvalidMagic { found: magic });
    }
    let version = buf.get_u8();
    if version != WIRE_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    let message_type = MessageType::try_from(buf.get_u8())?;
    let field_count = buf.get_u16_le();

    Ok(MessageHeader {
        message_type,
        field_count,
    })
}

/// 解码消息头和全部字段
pub fn decode_fields(data: &[u8]) -> Result<(MessageHeader, Vec<RawField>), ProtocolError> {
    let header = decode_header(data)?;
    let mut buf = &data[HEADER_LEN..];
    let mut fields = Vec::with_capacity(header.field_count as usize);

    for _ in 0..header.field_count {
        if buf.remaining() < FIELD_HEADER_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: FIELD_HEADER_LEN,
                actual: buf.remaining(),
            });
        }
        let id = FieldId::try_from(buf.get_u8())?;
        buf.advance(3);
        let count = buf.get_u32_le() as usize;

        let needed = count.saturating_mul(8);
        if buf.remaining() < needed {
            return Err(ProtocolError::InvalidLength {
                expected: needed,
                actual: buf.remaining(),
            });
        }
        let values = (0..count).map(|_| buf.get_f64_le()).collect();
        fields.push(RawField { id, values });
    }

    Ok((header, fields))
}

/// 关节状态消息（三字段固定布局）
///
/// - `position`: 指令关节角（弧度）
/// - `velocity`: 恒为空（链路中没有速度通道）
/// - `acceleration`: 加速度槽位，实际承载关节力矩
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JointState {
    pub position: Vec<f64>,
    pub velocity: Vec<f64>,
    pub acceleration: Vec<f64>,
}

impl JointState {
    /// 从线格式解码
    ///
    /// 要求消息类型为 `JointState`，且三个字段按 position → velocity →
    /// acceleration 顺序出现。
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let (header, fields) = decode_fields(data)?;

        if header.message_type != MessageType::JointState {
            return Err(ProtocolError::UnexpectedMessageType {
                expected: MessageType::JointState,
                actual: header.message_type,
            });
        }
        if header.field_count != 3 {
            return Err(ProtocolError::FieldCount {
                expected: 3,
                actual: header.field_count,
            });
        }

        let mut fields = fields.into_iter();
        let mut next = |expected: FieldId| -> Result<Vec<f64>, ProtocolError> {
            // field_count 已检查，这里不会取空
            let field = fields.next().ok_or(ProtocolError::FieldCount {
                expected: 3,
                actual: header.field_count,
            })?;
            if field.id != expected {
                return Err(ProtocolError::UnexpectedField {
                    expected,
                    actual: field.id,
                });
            }
            Ok(field.values)
        };

        Ok(Self {
            position: next(FieldId::Position)?,
            velocity: next(FieldId::Velocity)?,
            acceleration: next(FieldId::Acceleration)?,
        })
    }

    /// 写入构建器并封包
    pub fn encode_into(&self, builder: &mut MessageBuilder) -> Result<(), ProtocolError> {
        builder.push_f64_vector(FieldId::Position, &self.position)?;
        builder.push_f64_vector(FieldId::Velocity, &self.velocity)?;
        builder.push_f64_vector(FieldId::Acceleration, &self.acceleration)?;
        builder.finish(MessageType::JointState)
    }
}
