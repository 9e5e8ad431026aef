//! 单线程事件循环
//!
//! 由一个专用 IO 线程运行 `EventLoop::run()`，负责：
//! - 取出调用方提交的消息，按提交顺序排队
//! - TCP：接受入站对端、维护出站连接（断线后按间隔重连），
//!   以长度前缀帧轮询分发到已连接对端
//! - UDP：每条消息一个数据报，发往已连接的远端
//! - 读取并丢弃入站数据（没有回读通道）
//!
//! # 退出条件
//!
//! - `LoopHandle::stop()` 被调用，或
//! - 没有任何 `WorkGuard` 存活，且没有待发送的数据
//!
//! 新建的循环没有 `WorkGuard`：调用方需要在 `spawn()` 之前先拿到一个，
//! 否则循环会立即因空闲退出。

use crate::channel::{ChannelKind, DuplexChannel};
use crate::frame::{FRAME_HEADER_LEN, encode_frame};
use crate::metrics::LinkMetrics;
use crate::pool::BuilderPool;
use crate::transport::LinkConfig;
use crossbeam_channel::Receiver;
use iiwa_protocol::MessageBuilder;
use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

pub(crate) const WAKER_TOKEN: Token = Token(0);
const LISTENER_TOKEN: Token = Token(1);
/// 出站连接（UDP 时为 socket 本身）
const OUTBOUND_TOKEN: Token = Token(2);
const PEER_TOKEN_START: usize = 3;

const MAX_EVENTS: usize = 128;
const READ_CHUNK: usize = 4096;

/// IO 线程名
pub const IO_THREAD_NAME: &str = "iiwa-link-io";

/// 调用线程与 IO 线程共享的控制状态
#[derive(Debug)]
pub(crate) struct LoopShared {
    waker: Waker,
    stop: AtomicBool,
    work: AtomicUsize,
}

impl LoopShared {
    pub(crate) fn new(waker: Waker) -> Self {
        Self {
            waker,
            stop: AtomicBool::new(false),
            work: AtomicUsize::new(0),
        }
    }

    pub(crate) fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            trace!("Failed to wake event loop: {}", e);
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// 保活令牌
///
/// 只要还有令牌存活，事件循环就不会因空闲退出。最后一个令牌释放时
/// 会唤醒循环，让它重新检查退出条件。
#[derive(Debug)]
pub struct WorkGuard {
    shared: Arc<LoopShared>,
}

impl WorkGuard {
    fn new(shared: Arc<LoopShared>) -> Self {
        shared.work.fetch_add(1, Ordering::AcqRel);
        Self { shared }
    }
}

impl Clone for WorkGuard {
    fn clone(&self) -> Self {
        Self::new(self.shared.clone())
    }
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        if self.shared.work.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.wake();
        }
    }
}

/// 事件循环控制句柄（可克隆，跨线程使用）
#[derive(Debug, Clone)]
pub struct LoopHandle {
    shared: Arc<LoopShared>,
}

impl LoopHandle {
    pub(crate) fn new(shared: Arc<LoopShared>) -> Self {
        Self { shared }
    }

    /// 请求停止：循环在下一次迭代时退出，不再发送剩余数据
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.wake();
    }

    /// 是否已请求停止（或循环已退出）
    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// 获取一个保活令牌
    pub fn work_guard(&self) -> WorkGuard {
        WorkGuard::new(self.shared.clone())
    }

    /// 当前存活的保活令牌数
    pub fn outstanding_work(&self) -> usize {
        self.shared.work.load(Ordering::Acquire)
    }
}

/// 一个已连接的 TCP 对端（入站或出站）
struct Peer {
    stream: TcpStream,
    addr: SocketAddr,
    send_buf: Vec<u8>,
    send_offset: usize,
    /// `send_buf` 中每个帧的结束位置，用于统计完整发送的消息数
    frame_ends: VecDeque<usize>,
}

impl Peer {
    fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        Self {
            stream,
            addr,
            send_buf: Vec::new(),
            send_offset: 0,
            frame_ends: VecDeque::new(),
        }
    }

    fn unsent(&self) -> usize {
        self.send_buf.len() - self.send_offset
    }

    fn push_frame(&mut self, payload: &[u8]) -> Result<(), crate::LinkError> {
        encode_frame(payload, &mut self.send_buf)?;
        self.frame_ends.push_back(self.send_buf.len());
        Ok(())
    }

    /// 尽量写出缓冲数据，直到写完或 `WouldBlock`
    fn write_pending(&mut self, metrics: &LinkMetrics) -> io::Result<()> {
        while self.send_offset < self.send_buf.len() {
            match self.stream.write(&self.send_buf[self.send_offset..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.send_offset += n;
                    LinkMetrics::add(&metrics.bytes_sent, n as u64);
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        while self.frame_ends.front().is_some_and(|&end| end <= self.send_offset) {
            self.frame_ends.pop_front();
            LinkMetrics::add(&metrics.messages_sent, 1);
        }
        if self.send_offset == self.send_buf.len() {
            self.send_buf.clear();
            self.send_offset = 0;
        }
        Ok(())
    }
}

/// 读取并丢弃所有可读数据；对端关闭时返回 `Ok(false)`
fn drain_reader(reader: &mut impl Read, metrics: &LinkMetrics) -> io::Result<bool> {
    let mut scratch = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut scratch) {
            Ok(0) => return Ok(false),
            Ok(n) => LinkMetrics::add(&metrics.bytes_received, n as u64),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

struct TcpLink {
    listener: TcpListener,
    remote: SocketAddr,
    /// 正在进行中的出站连接
    connecting: Option<TcpStream>,
    reconnect_at: Option<Instant>,
    /// 已连接对端；出站连接建立后以 `OUTBOUND_TOKEN` 加入
    peers: BTreeMap<Token, Peer>,
    next_token: usize,
    /// 上一次分发使用的对端
    last_peer: Option<Token>,
}

struct UdpLink {
    socket: UdpSocket,
}

enum Link {
    Tcp(TcpLink),
    Udp(UdpLink),
}

/// 事件循环
///
/// 由 `Transport::new()` 创建，调用 `run()`（阻塞）或 `spawn()`（专用线程）驱动。
pub struct EventLoop {
    poll: Poll,
    shared: Arc<LoopShared>,
    submissions: Receiver<MessageBuilder>,
    link: Link,
    /// 按提交顺序等待分发的消息
    outbox: VecDeque<MessageBuilder>,
    pool: Arc<BuilderPool>,
    metrics: Arc<LinkMetrics>,
    config: LinkConfig,
    /// 当前是否处于丢弃状态（只在进入时告警一次）
    overflowing: bool,
}

impl EventLoop {
    pub(crate) fn new(
        poll: Poll,
        shared: Arc<LoopShared>,
        submissions: Receiver<MessageBuilder>,
        channel: DuplexChannel,
        pool: Arc<BuilderPool>,
        metrics: Arc<LinkMetrics>,
        config: LinkConfig,
    ) -> io::Result<Self> {
        let remote = channel.remote_addr();
        let link = match channel.kind {
            ChannelKind::Tcp {
                mut listener,
                outbound,
            } => {
                let registry = poll.registry();
                registry.register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
                let connecting = match outbound {
                    Some(mut stream) => {
                        register_stream(registry, &mut stream, OUTBOUND_TOKEN)?;
                        Some(stream)
                    },
                    None => None,
                };
                let reconnect_at = connecting.is_none().then(Instant::now);
                Link::Tcp(TcpLink {
                    listener,
                    remote,
                    connecting,
                    reconnect_at,
                    peers: BTreeMap::new(),
                    next_token: PEER_TOKEN_START,
                    last_peer: None,
                })
            },
            ChannelKind::Udp { mut socket } => {
                poll.registry().register(
                    &mut socket,
                    OUTBOUND_TOKEN,
                    Interest::READABLE | Interest::WRITABLE,
                )?;
                Link::Udp(UdpLink { socket })
            },
        };

        Ok(Self {
            poll,
            shared,
            submissions,
            link,
            outbox: VecDeque::new(),
            pool,
            metrics,
            config,
            overflowing: false,
        })
    }

    /// 控制句柄
    pub fn handle(&self) -> LoopHandle {
        LoopHandle::new(self.shared.clone())
    }

    /// 在专用线程上运行
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(IO_THREAD_NAME.to_string())
            .spawn(move || self.run())
    }

    /// 运行事件循环，直到停止或空闲
    pub fn run(mut self) {
        let mut events = Events::with_capacity(MAX_EVENTS);
        info!("Link event loop started");

        loop {
            if self.shared.is_stopped() {
                debug!("Link event loop stop requested");
                break;
            }

            self.drain_submissions();
            self.dispatch();

            if self.is_idle() {
                debug!("Link event loop idle, no outstanding work");
                break;
            }

            let timeout = self.poll_timeout();
            if let Err(e) = self.poll.poll(&mut events, Some(timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!("Link event loop poll failed: {}", e);
                break;
            }

            for event in events.iter() {
                match event.token() {
                    WAKER_TOKEN => {},
                    LISTENER_TOKEN => self.accept_peers(),
                    token => {
                        let closed = event.is_error() || event.is_read_closed();
                        self.handle_io(token, event.is_readable(), event.is_writable(), closed);
                    },
                }
            }

            self.reconnect_if_due();
        }

        self.shared.stop.store(true, Ordering::Release);
        self.discard_pending();
        info!("Link event loop exited");
    }

    fn drain_submissions(&mut self) {
        while let Ok(builder) = self.submissions.try_recv() {
            if self.outbox.len() >= self.config.pending_high_water_mark {
                LinkMetrics::add(&self.metrics.messages_dropped, 1);
                if !self.overflowing {
                    warn!(
                        "Outbound queue reached high-water mark ({}), dropping messages",
                        self.config.pending_high_water_mark
                    );
                    self.overflowing = true;
                }
                self.pool.release(builder);
                continue;
            }
            self.outbox.push_back(builder);
        }
        if self.overflowing && self.outbox.len() < self.config.pending_high_water_mark {
            debug!("Outbound queue below high-water mark again");
            self.overflowing = false;
        }
    }

    /// 把排队消息交给链路，并尽量写出
    fn dispatch(&mut self) {
        match &mut self.link {
            Link::Tcp(tcp) => {
                while let Some(builder) = self.outbox.front() {
                    let Some(token) = tcp.next_peer(builder.len(), self.config.max_peer_buffer_bytes)
                    else {
                        break;
                    };
                    let Some(builder) = self.outbox.pop_front() else {
                        break;
                    };
                    let pushed = match builder.as_bytes() {
                        Ok(bytes) => tcp.peers.get_mut(&token).map(|peer| peer.push_frame(bytes)),
                        Err(e) => Some(Err(e.into())),
                    };
                    if let Some(Err(e)) = pushed {
                        warn!("Dropping unsendable message: {}", e);
                        LinkMetrics::add(&self.metrics.messages_dropped, 1);
                    }
                    tcp.last_peer = Some(token);
                    self.pool.release(builder);
                }

                let failed: Vec<Token> = tcp
                    .peers
                    .iter_mut()
                    .filter_map(|(token, peer)| match peer.write_pending(&self.metrics) {
                        Ok(()) => None,
                        Err(e) => {
                            warn!("Write to peer {} failed: {}", peer.addr, e);
                            LinkMetrics::add(&self.metrics.send_errors, 1);
                            Some(*token)
                        },
                    })
                    .collect();
                for token in failed {
                    tcp.close_peer(self.poll.registry(), token, &self.metrics, self.config.reconnect_interval());
                }
            },
            Link::Udp(udp) => {
                while let Some(builder) = self.outbox.front() {
                    let result = match builder.as_bytes() {
                        Ok(bytes) => udp.socket.send(bytes).map(Some),
                        Err(e) => {
                            warn!("Dropping unsendable message: {}", e);
                            Ok(None)
                        },
                    };
                    match result {
                        Ok(Some(n)) => {
                            LinkMetrics::add(&self.metrics.messages_sent, 1);
                            LinkMetrics::add(&self.metrics.bytes_sent, n as u64);
                        },
                        Ok(None) => LinkMetrics::add(&self.metrics.messages_dropped, 1),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            // 例如远端端口不可达（ICMP），丢弃这条继续
                            debug!("UDP send failed: {}", e);
                            LinkMetrics::add(&self.metrics.send_errors, 1);
                            LinkMetrics::add(&self.metrics.messages_dropped, 1);
                        },
                    }
                    if let Some(builder) = self.outbox.pop_front() {
                        self.pool.release(builder);
                    }
                }
            },
        }
    }

    fn is_idle(&self) -> bool {
        if self.shared.work.load(Ordering::Acquire) > 0 || !self.submissions.is_empty() {
            return false;
        }
        if !self.outbox.is_empty() {
            return false;
        }
        match &self.link {
            Link::Tcp(tcp) => tcp.peers.values().all(|peer| peer.unsent() == 0),
            Link::Udp(_) => true,
        }
    }

    fn poll_timeout(&self) -> Duration {
        let timeout = self.config.poll_timeout();
        match &self.link {
            Link::Tcp(TcpLink {
                reconnect_at: Some(at),
                ..
            }) => at.saturating_duration_since(Instant::now()).min(timeout),
            _ => timeout,
        }
    }

    fn accept_peers(&mut self) {
        let Link::Tcp(tcp) = &mut self.link else {
            return;
        };
        loop {
            match tcp.listener.accept() {
                Ok((mut stream, addr)) => {
                    let token = Token(tcp.next_token);
                    tcp.next_token += 1;
                    if let Err(e) = register_stream(self.poll.registry(), &mut stream, token) {
                        warn!("Failed to register peer {}: {}", addr, e);
                        continue;
                    }
                    set_nodelay(&stream, addr);
                    info!("Accepted peer {}", addr);
                    LinkMetrics::add(&self.metrics.peers_accepted, 1);
                    tcp.peers.insert(token, Peer::new(stream, addr));
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    break;
                },
            }
        }
    }

    fn handle_io(&mut self, token: Token, readable: bool, writable: bool, closed: bool) {
        let reconnect_interval = self.config.reconnect_interval();
        match &mut self.link {
            Link::Tcp(tcp) => {
                if token == OUTBOUND_TOKEN && tcp.connecting.is_some() {
                    tcp.finish_connect(self.poll.registry(), reconnect_interval);
                    if !tcp.peers.contains_key(&OUTBOUND_TOKEN) {
                        return;
                    }
                }

                let Some(peer) = tcp.peers.get_mut(&token) else {
                    return;
                };
                let mut alive = !closed || readable;
                if readable {
                    match drain_reader(&mut peer.stream, &self.metrics) {
                        Ok(open) => alive = open,
                        Err(e) => {
                            debug!("Read from peer {} failed: {}", peer.addr, e);
                            alive = false;
                        },
                    }
                }
                if alive
                    && writable
                    && let Err(e) = peer.write_pending(&self.metrics)
                {
                    warn!("Write to peer {} failed: {}", peer.addr, e);
                    LinkMetrics::add(&self.metrics.send_errors, 1);
                    alive = false;
                }
                if !alive {
                    tcp.close_peer(self.poll.registry(), token, &self.metrics, reconnect_interval);
                }
            },
            Link::Udp(udp) => {
                if readable {
                    drain_datagrams(&udp.socket, &self.metrics);
                }
            },
        }
    }

    fn reconnect_if_due(&mut self) {
        let Link::Tcp(tcp) = &mut self.link else {
            return;
        };
        let Some(at) = tcp.reconnect_at else {
            return;
        };
        if Instant::now() < at {
            return;
        }

        tcp.reconnect_at = None;
        LinkMetrics::add(&self.metrics.reconnects, 1);
        match TcpStream::connect(tcp.remote) {
            Ok(mut stream) => match register_stream(self.poll.registry(), &mut stream, OUTBOUND_TOKEN) {
                Ok(()) => {
                    trace!("Reconnecting to {}", tcp.remote);
                    tcp.connecting = Some(stream);
                },
                Err(e) => {
                    warn!("Failed to register outbound stream: {}", e);
                    tcp.reconnect_at = Some(Instant::now() + self.config.reconnect_interval());
                },
            },
            Err(e) => {
                trace!("Connect to {} failed: {}", tcp.remote, e);
                tcp.reconnect_at = Some(Instant::now() + self.config.reconnect_interval());
            },
        }
    }

    /// 退出时仍未发送的数据计为丢弃
    fn discard_pending(&mut self) {
        let mut dropped = self.outbox.len() as u64;
        while let Ok(builder) = self.submissions.try_recv() {
            dropped += 1;
            self.pool.release(builder);
        }
        for builder in self.outbox.drain(..) {
            self.pool.release(builder);
        }
        if let Link::Tcp(tcp) = &self.link {
            dropped += tcp.peers.values().map(|peer| peer.frame_ends.len() as u64).sum::<u64>();
        }
        if dropped > 0 {
            debug!("Discarding {} unsent messages", dropped);
            LinkMetrics::add(&self.metrics.messages_dropped, dropped);
        }
    }
}

impl TcpLink {
    /// 轮询选择下一个还能容纳 `len` 字节的对端
    fn next_peer(&self, len: usize, max_buffer: usize) -> Option<Token> {
        let fits = |peer: &Peer| peer.unsent() == 0 || peer.unsent() + FRAME_HEADER_LEN + len <= max_buffer;
        let after = self
            .last_peer
            .map(|last| self.peers.range(Token(last.0 + 1)..))
            .into_iter()
            .flatten();
        after
            .chain(self.peers.iter())
            .find(|(_, peer)| fits(peer))
            .map(|(token, _)| *token)
    }

    fn finish_connect(&mut self, registry: &Registry, reconnect_interval: Duration) {
        let Some(stream) = self.connecting.as_ref() else {
            return;
        };
        let failure = match stream.take_error() {
            Ok(Some(e)) | Err(e) => Some(e),
            Ok(None) => match stream.peer_addr() {
                Ok(_) => None,
                // 仍在连接中
                Err(e) if e.kind() == io::ErrorKind::NotConnected => return,
                Err(e) => Some(e),
            },
        };

        let Some(mut stream) = self.connecting.take() else {
            return;
        };
        match failure {
            None => {
                set_nodelay(&stream, self.remote);
                info!("Connected to {}", self.remote);
                self.peers.insert(OUTBOUND_TOKEN, Peer::new(stream, self.remote));
            },
            Some(e) => {
                trace!("Connect to {} failed: {}", self.remote, e);
                let _ = registry.deregister(&mut stream);
                self.reconnect_at = Some(Instant::now() + reconnect_interval);
            },
        }
    }

    fn close_peer(
        &mut self,
        registry: &Registry,
        token: Token,
        metrics: &LinkMetrics,
        reconnect_interval: Duration,
    ) {
        let Some(mut peer) = self.peers.remove(&token) else {
            return;
        };
        let _ = registry.deregister(&mut peer.stream);
        if !peer.frame_ends.is_empty() {
            LinkMetrics::add(&metrics.messages_dropped, peer.frame_ends.len() as u64);
        }
        info!("Peer {} disconnected", peer.addr);

        if token == OUTBOUND_TOKEN {
            self.reconnect_at = Some(Instant::now() + reconnect_interval);
        }
        if self.last_peer == Some(token) {
            self.last_peer = None;
        }
    }
}

fn register_stream(registry: &Registry, stream: &mut TcpStream, token: Token) -> io::Result<()> {
    registry.register(stream, token, Interest::READABLE | Interest::WRITABLE)
}

/// 关闭 Nagle，失败时仅记录
fn set_nodelay(stream: &TcpStream, addr: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
    }
}

/// 读取并丢弃所有入站数据报
fn drain_datagrams(socket: &UdpSocket, metrics: &LinkMetrics) {
    let mut scratch = [0u8; READ_CHUNK];
    loop {
        match socket.recv(&mut scratch) {
            Ok(n) => LinkMetrics::add(&metrics.bytes_received, n as u64),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            // 远端端口不可达（ICMP）以读错误的形式出现，不影响后续发送
            Err(e) if matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::ConnectionRefused) => continue,
            Err(e) => {
                trace!("UDP receive error: {}", e);
                break;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameDecoder, MAX_FRAME_LEN};
    use std::net::TcpListener as StdTcpListener;

    fn connected_pair() -> (TcpStream, std::net::TcpStream, SocketAddr) {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        client.set_nonblocking(true).unwrap();
        (TcpStream::from_std(client), server, addr)
    }

    #[test]
    fn test_push_frame_tracks_frame_ends() {
        let (stream, _server, addr) = connected_pair();
        let mut peer = Peer::new(stream, addr);

        peer.push_frame(b"abc").unwrap();
        peer.push_frame(b"hello").unwrap();
        assert_eq!(peer.frame_ends, VecDeque::from([FRAME_HEADER_LEN + 3, 2 * FRAME_HEADER_LEN + 8]));
        assert_eq!(peer.unsent(), 2 * FRAME_HEADER_LEN + 8);

        let mut decoder = FrameDecoder::new();
        decoder.extend(&peer.send_buf);
        assert_eq!(decoder.next_frame().unwrap().unwrap(), b"abc");
        assert_eq!(decoder.next_frame().unwrap().unwrap(), b"hello");
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_push_frame_rejects_oversized_payload() {
        let (stream, _server, addr) = connected_pair();
        let mut peer = Peer::new(stream, addr);

        let payload = vec![0u8; MAX_FRAME_LEN + 1];
        assert!(matches!(peer.push_frame(&payload), Err(crate::LinkError::FrameTooLarge(_))));
        assert!(peer.send_buf.is_empty());
        assert!(peer.frame_ends.is_empty());
    }

    #[test]
    fn test_set_nodelay_on_connected_stream() {
        let (stream, _server, addr) = connected_pair();
        set_nodelay(&stream, addr);
        assert!(stream.nodelay().unwrap());
    }
}
