//! 机械臂状态存储
//!
//! 调用线程通过 `set()` 写入最新指令，控制循环在 `run_one()` 中读取。
//! 所有字段由同一把互斥锁保护，锁只在拷贝期间持有，从不跨越 IO。
//!
//! - 单个字段的更新是原子的（不会读到两次写入的混合）
//! - 不同字段之间没有原子性保证（先写角度后写力矩，中间可能被读取）

use parking_lot::Mutex;

/// 指令类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// 关节角（弧度）
    JointAngleCommand,
    /// 关节力矩（Nm）
    JointTorqueCommand,
    /// 笛卡尔力/力矩（Fx, Fy, Fz, τA, τB, τC）
    CartesianWrenchCommand,
}

/// 机械臂状态快照
///
/// 长度由调用方决定，不做任何校验。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArmState {
    /// 指令关节角（有效时长度等于自由度）
    pub commanded_position: Vec<f64>,
    /// 指令关节力矩
    pub commanded_torque: Vec<f64>,
    /// 指令笛卡尔力/力矩（6 个分量）
    pub commanded_cartesian_wrench: Vec<f64>,
    /// 测量力矩（反馈）
    pub torque: Vec<f64>,
    /// 关节下限
    pub lower_position_limit: Vec<f64>,
    /// 关节上限
    pub upper_position_limit: Vec<f64>,
    /// 每个关节的位姿（3×4 按行展平）
    pub joint_matrices: Vec<[f64; 12]>,
}

/// 线程安全的状态存储
#[derive(Debug, Default)]
pub struct StateStore {
    inner: Mutex<ArmState>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用 `values` 整体替换 `kind` 对应的字段
    pub fn set(&self, values: &[f64], kind: CommandKind) {
        let mut state = self.inner.lock();
        let field = match kind {
            CommandKind::JointAngleCommand => &mut state.commanded_position,
            CommandKind::JointTorqueCommand => &mut state.commanded_torque,
            CommandKind::CartesianWrenchCommand => &mut state.commanded_cartesian_wrench,
        };
        field.clear();
        field.extend_from_slice(values);
    }

    pub fn set_joint_angles(&self, values: &[f64]) {
        self.set(values, CommandKind::JointAngleCommand);
    }

    pub fn set_joint_torques(&self, values: &[f64]) {
        self.set(values, CommandKind::JointTorqueCommand);
    }

    pub fn set_cartesian_wrench(&self, values: &[f64]) {
        self.set(values, CommandKind::CartesianWrenchCommand);
    }

    /// 写入测量力矩（反馈通道）
    pub fn set_measured_torque(&self, values: &[f64]) {
        let mut state = self.inner.lock();
        state.torque.clear();
        state.torque.extend_from_slice(values);
    }

    /// 写入关节限位
    pub fn set_position_limits(&self, lower: &[f64], upper: &[f64]) {
        let mut state = self.inner.lock();
        state.lower_position_limit.clear();
        state.lower_position_limit.extend_from_slice(lower);
        state.upper_position_limit.clear();
        state.upper_position_limit.extend_from_slice(upper);
    }

    /// 读取完整快照
    pub fn get(&self) -> ArmState {
        self.inner.lock().clone()
    }

    /// 把指令关节角拷贝到调用方缓冲区（复用其容量）
    pub fn copy_commanded_position_into(&self, out: &mut Vec<f64>) {
        let state = self.inner.lock();
        out.clear();
        out.extend_from_slice(&state.commanded_position);
    }

    /// 把测量力矩拷贝到调用方缓冲区
    pub fn copy_torque_into(&self, out: &mut Vec<f64>) {
        let state = self.inner.lock();
        out.clear();
        out.extend_from_slice(&state.torque);
    }

    /// 用闭包读取状态，不做拷贝
    ///
    /// 闭包在持锁期间执行，不要在其中做 IO。
    pub fn with_state<R>(&self, f: impl FnOnce(&ArmState) -> R) -> R {
        f(&self.inner.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_set_replaces_only_target_field() {
        let store = StateStore::new();
        store.set_joint_angles(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7]);
        store.set_joint_torques(&[1.0; 7]);

        // 更短的序列完全替换，不保留旧元素
        store.set(&[9.0, 9.0], CommandKind::JointAngleCommand);

        let state = store.get();
        assert_eq!(state.commanded_position, vec![9.0, 9.0]);
        assert_eq!(state.commanded_torque, vec![1.0; 7]);
        assert!(state.commanded_cartesian_wrench.is_empty());
    }

    #[test]
    fn test_cartesian_wrench() {
        let store = StateStore::new();
        store.set_cartesian_wrench(&[1.0, 2.0, 3.0, 0.1, 0.2, 0.3]);
        assert_eq!(store.get().commanded_cartesian_wrench, vec![1.0, 2.0, 3.0, 0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_empty_and_oversized_accepted() {
        let store = StateStore::new();
        store.set_joint_angles(&[]);
        assert!(store.get().commanded_position.is_empty());

        store.set_joint_angles(&[0.0; 12]);
        assert_eq!(store.get().commanded_position.len(), 12);
    }

    #[test]
    fn test_copy_into_reuses_buffer() {
        let store = StateStore::new();
        store.set_joint_torques(&[1.0; 7]);
        store.set_measured_torque(&[2.0; 7]);

        let mut scratch = vec![5.0; 32];
        let capacity = scratch.capacity();
        store.copy_torque_into(&mut scratch);
        assert_eq!(scratch, vec![2.0; 7]);
        assert_eq!(scratch.capacity(), capacity);

        store.copy_commanded_position_into(&mut scratch);
        assert!(scratch.is_empty());
    }

    #[test]
    fn test_auxiliary_fields() {
        let store = StateStore::new();
        store.set_measured_torque(&[0.5; 7]);
        store.set_position_limits(&[-2.9; 7], &[2.9; 7]);

        let state = store.get();
        assert_eq!(state.torque, vec![0.5; 7]);
        assert_eq!(state.lower_position_limit, vec![-2.9; 7]);
        assert_eq!(state.upper_position_limit, vec![2.9; 7]);
        // 指令字段不受影响
        assert!(state.commanded_torque.is_empty());
        assert_eq!(store.with_state(|s| s.joint_matrices.len()), 0);
    }

    fn kind_strategy() -> impl Strategy<Value = CommandKind> {
        prop_oneof![
            Just(CommandKind::JointAngleCommand),
            Just(CommandKind::JointTorqueCommand),
            Just(CommandKind::CartesianWrenchCommand),
        ]
    }

    proptest! {
        /// 任意写入序列后，每个字段等于最后一次写入的值
        #[test]
        fn prop_last_write_wins_per_field(
            writes in prop::collection::vec(
                (prop::collection::vec(-10.0f64..10.0, 0..10), kind_strategy()),
                0..32,
            )
        ) {
            let store = StateStore::new();
            let mut expected = ArmState::default();
            for (values, kind) in &writes {
                store.set(values, *kind);
                match kind {
                    CommandKind::JointAngleCommand => expected.commanded_position = values.clone(),
                    CommandKind::JointTorqueCommand => expected.commanded_torque = values.clone(),
                    CommandKind::CartesianWrenchCommand => {
                        expected.commanded_cartesian_wrench = values.clone()
                    },
                }
            }
            prop_assert_eq!(store.get(), expected);
        }
    }
}
