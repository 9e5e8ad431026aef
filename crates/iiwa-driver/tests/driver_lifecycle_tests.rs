//! 驱动生命周期与指令周期测试

use iiwa_driver::{CommandKind, Driver, DriverError, LifecycleState, LinkConfig, ParamTable};
use iiwa_link::LinkError;
use iiwa_link::frame::FrameDecoder;
use iiwa_protocol::JointState;
use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

const JOINTS: [f64; 7] = [0.1, -0.25, 0.4, -1.3, 0.05, 0.9, -0.6];
const TORQUES: [f64; 7] = [10.0, -20.0, 5.5, 0.0, 1.25, -3.0, 0.75];

fn udp_loopback_params() -> ParamTable {
    ParamTable::default()
        .with_local_transport_address("udp://127.0.0.1:0")
        .with_remote_transport_address("udp://127.0.0.1:9")
}

fn read_one_joint_state(stream: &mut TcpStream) -> JointState {
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).expect("read frame");
        assert!(n > 0, "driver closed the connection");
        decoder.extend(&buf[..n]);
        if let Some(frame) = decoder.next_frame().unwrap() {
            return JointState::decode(&frame).unwrap();
        }
    }
}

/// 测试完整链路：设置指令 → run_one → 远端收到三字段消息，加速度槽位为测量力矩
#[test]
fn test_run_one_delivers_commanded_state_over_tcp() {
    let remote = TcpListener::bind("127.0.0.1:0").unwrap();
    let params = ParamTable::default()
        .with_local_transport_address("tcp://127.0.0.1:0")
        .with_remote_transport_address(format!("tcp://{}", remote.local_addr().unwrap()));

    let mut driver = Driver::new(params);
    driver.construct().unwrap();
    assert_eq!(driver.lifecycle(), LifecycleState::Running);

    driver.set(&JOINTS, CommandKind::JointAngleCommand);
    driver.set(&[99.0; 7], CommandKind::JointTorqueCommand);
    driver.state().set_measured_torque(&TORQUES);
    driver.set_cartesian_wrench(&[1.0; 6]);

    // 返回值恒为 false，与是否成功提交无关
    assert!(!driver.run_one());

    let (mut stream, _) = remote.accept().unwrap();
    let state = read_one_joint_state(&mut stream);
    assert_eq!(state.position, JOINTS.to_vec());
    assert!(state.velocity.is_empty());
    assert_eq!(state.acceleration, TORQUES.to_vec());

    let metrics = driver.metrics();
    assert_eq!(metrics.attempted, 1);
    assert_eq!(metrics.succeeded, 1);
    assert_eq!(metrics.failed, 0);

    let started = Instant::now();
    drop(driver);
    assert!(started.elapsed() < Duration::from_secs(2));
}

/// 测试指令被改写后，下一周期发送最新值
#[test]
fn test_each_cycle_sends_latest_command() {
    let remote = TcpListener::bind("127.0.0.1:0").unwrap();
    let params = ParamTable::default()
        .with_local_transport_address("tcp://127.0.0.1:0")
        .with_remote_transport_address(format!("tcp://{}", remote.local_addr().unwrap()));

    let mut driver = Driver::new(params);
    driver.construct().unwrap();
    let (mut stream, _) = remote.accept().unwrap();

    driver.set_joint_angles(&[1.0; 7]);
    driver.run_one();
    assert_eq!(read_one_joint_state(&mut stream).position, vec![1.0; 7]);

    // 长度不一致的指令原样发送
    driver.set_joint_angles(&[2.0; 3]);
    driver.run_one();
    let state = read_one_joint_state(&mut stream);
    assert_eq!(state.position, vec![2.0; 3]);
    assert!(state.acceleration.is_empty());
}

#[test]
fn test_drop_without_construct_returns_immediately() {
    let started = Instant::now();
    let driver = Driver::default();
    driver.set_joint_angles(&JOINTS);
    drop(driver);
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[test]
fn test_construct_then_drop_is_bounded() {
    for _ in 0..5 {
        let mut driver = Driver::new(udp_loopback_params());
        driver.construct().unwrap();
        let started = Instant::now();
        drop(driver);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}

#[test]
fn test_failed_construct_leaves_driver_uninitialized() {
    // TEST-NET-3 地址无法在本机绑定
    let params = ParamTable::default().with_local_transport_address("tcp://203.0.113.7:30010");
    let mut driver = Driver::new(params);

    match driver.construct() {
        Err(DriverError::Connection {
            local,
            remote,
            source,
        }) => {
            assert_eq!(local, "tcp://203.0.113.7:30010");
            assert_eq!(remote, "tcp://172.31.1.147:30010");
            assert!(matches!(source, LinkError::Bind { .. }));
        },
        other => panic!("expected Connection error, got {:?}", other),
    }

    assert_eq!(driver.lifecycle(), LifecycleState::Uninitialized);
    assert!(!driver.run_one());
    assert_eq!(driver.metrics().attempted, 0);

    // 修正参数后可以重新启动
    driver.construct_with(udp_loopback_params()).unwrap();
    assert!(driver.is_running());
}

#[test]
fn test_scheme_mismatch_is_connection_error() {
    let params = ParamTable::default()
        .with_local_transport_address("tcp://127.0.0.1:0")
        .with_remote_transport_address("udp://127.0.0.1:9");
    let mut driver = Driver::new(params);
    assert!(matches!(
        driver.construct(),
        Err(DriverError::Connection {
            source: LinkError::SchemeMismatch { .. },
            ..
        })
    ));
}

/// 提交失败只计数，不向调用方传播
#[test]
fn test_submission_failures_are_counted() {
    // 容量为 0 的队列上 try_send 总是失败
    let config = LinkConfig {
        queue_capacity: 0,
        ..Default::default()
    };
    let mut driver = Driver::new(udp_loopback_params()).with_link_config(config);
    driver.construct().unwrap();
    driver.set_joint_angles(&JOINTS);

    for _ in 0..3 {
        assert!(!driver.run_one());
    }

    let metrics = driver.metrics();
    assert_eq!(metrics.attempted, 3);
    assert_eq!(metrics.succeeded, 0);
    assert_eq!(metrics.failed, 3);
    assert_eq!(metrics.consecutive_failures, 3);
    assert_eq!(driver.link_metrics().unwrap().messages_dropped, 3);
}

#[test]
fn test_run_one_counts_successful_submissions() {
    let mut driver = Driver::new(udp_loopback_params());
    driver.construct().unwrap();
    assert!(driver.local_addr().is_some());

    driver.set_joint_angles(&JOINTS);
    for _ in 0..10 {
        assert!(!driver.run_one());
        thread::sleep(Duration::from_millis(1));
    }

    let metrics = driver.metrics();
    assert_eq!(metrics.attempted, 10);
    assert_eq!(metrics.succeeded, 10);
    assert_eq!(metrics.consecutive_failures, 0);
}
