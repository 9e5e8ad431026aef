//! # iiwa Protocol
//!
//! 机械臂命令桥的消息定义（无 IO 依赖）
//!
//! ## 模块
//!
//! - `builder`: 可复用的消息构建器（追加字段、封包）
//! - `joint_state`: `JointState` 三字段消息的解码视图
//!
//! ## 线格式
//!
//! 所有多字节整数和浮点数均为小端字节序（Little Endian）。
//!
//! ```text
//! +------+---------+----------+-------------+----------+
//! | "JS" | version | msg_type | field_count | reserved |
//! |  2B  |   1B    |    1B    |   u16 LE    |  u16 LE  |
//! +------+---------+----------+-------------+----------+
//! 每个字段：
//! +----------+----------+------------+-----------------+
//! | field_id | reserved |   count    | count × f64 LE  |
//! |    1B    |    3B    |   u32 LE   |                 |
//! +----------+----------+------------+-----------------+
//! ```

pub mod builder;
pub mod joint_state;

pub use builder::MessageBuilder;
pub use joint_state::{JointState, MessageHeader, RawField, decode_fields, decode_header};

use thiserror::Error;

/// 消息魔数（所有消息的前两个字节）
pub const MAGIC: [u8; 2] = *b"JS";

/// 当前线格式版本
pub const WIRE_VERSION: u8 = 1;

/// 消息头长度（字节）
pub const HEADER_LEN: usize = 8;

/// 字段头长度（字节）：field_id + 3 字节保留 + u32 元素个数
pub const FIELD_HEADER_LEN: usize = 8;

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// 关节状态（位置 / 速度 / 加速度 三字段记录）
    JointState = 0x01,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MessageType::JointState),
            _ => Err(ProtocolError::InvalidValue {
                field: "MessageType".to_string(),
                value,
            }),
        }
    }
}

/// 字段标识
///
/// `JointState` 的字段顺序固定为 position → velocity → acceleration。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldId {
    /// 关节位置（弧度）
    Position = 0x00,
    /// 关节速度（当前链路不提供，恒为空）
    Velocity = 0x01,
    /// 关节加速度槽位（用于承载关节力矩）
    Acceleration = 0x02,
}

impl FieldId {
    /// `JointState` 的字段顺序
    pub const JOINT_STATE_ORDER: [FieldId; 3] =
        [FieldId::Position, FieldId::Velocity, FieldId::Acceleration];
}

impl TryFrom<u8> for FieldId {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(FieldId::Position),
            0x01 => Ok(FieldId::Velocity),
            0x02 => Ok(FieldId::Acceleration),
            _ => Err(ProtocolError::InvalidValue {
                field: "FieldId".to_string(),
                value,
            }),
        }
    }
}

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid message length: expected at least {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid magic: {found:02X?}")]
    InvalidMagic { found: [u8; 2] },

    #[error("Unsupported wire version: {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: String, value: u8 },

    #[error("Unexpected field: expected {expected:?}, got {actual:?}")]
    UnexpectedField { expected: FieldId, actual: FieldId },

    #[error("Unexpected message type: expected {expected:?}, got {actual:?}")]
    UnexpectedMessageType {
        expected: MessageType,
        actual: MessageType,
    },

    #[error("Field count mismatch: expected {expected}, got {actual}")]
    FieldCount { expected: u16, actual: u16 },

    #[error("Vector too long for wire format: {len} elements")]
    VectorTooLong { len: usize },

    #[error("Too many fields in one message")]
    TooManyFields,

    #[error("Message already finished")]
    AlreadyFinished,

    #[error("Message not finished")]
    NotFinished,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_from_u8() {
        assert_eq!(MessageType::try_from(0x01).unwrap(), MessageType::JointState);
        assert!(matches!(
            MessageType::try_from(0x7F),
            Err(ProtocolError::InvalidValue { value: 0x7F, .. })
        ));
    }

    #[test]
    fn test_field_id_from_u8() {
        for field in FieldId::JOINT_STATE_ORDER {
            assert_eq!(FieldId::try_from(field as u8).unwrap(), field);
        }
        assert!(FieldId::try_from(0x03).is_err());
    }

    #[test]
    fn test_joint_state_field_order() {
        assert_eq!(FieldId::JOINT_STATE_ORDER[0], FieldId::Position);
        assert_eq!(FieldId::JOINT_STATE_ORDER[1], FieldId::Velocity);
        assert_eq!(FieldId::JOINT_STATE_ORDER[2], FieldId::Acceleration);
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::InvalidLength {
            expected: 8,
            actual: 4,
        };
        assert!(format!("{}", err).contains("Invalid message length"));

        let err = ProtocolError::InvalidMagic { found: [0xAB, 0xCD] };
        assert!(format!("{}", err).contains("AB"));
    }
}
