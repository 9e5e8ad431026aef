//! 双工通道
//!
//! 同一个通道既绑定本地地址（接受入站对端），又连接远端地址。
//! 建立过程是同步的：绑定失败立即返回错误，TCP 出站连接则异步完成，
//! 连不上时由事件循环周期性重连。

use crate::{Endpoint, LinkError, Scheme};
use mio::net::{TcpListener, TcpStream, UdpSocket};
use std::net::SocketAddr;
use tracing::{debug, warn};

/// 已建立（绑定 + 发起连接）的双工通道
#[derive(Debug)]
pub struct DuplexChannel {
    local: Endpoint,
    remote: Endpoint,
    remote_addr: SocketAddr,
    pub(crate) kind: ChannelKind,
}

#[derive(Debug)]
pub(crate) enum ChannelKind {
    Tcp {
        listener: TcpListener,
        /// 正在连接中的出站流；同步连接失败时为 `None`，交给事件循环重连
        outbound: Option<TcpStream>,
    },
    Udp {
        socket: UdpSocket,
    },
}

impl DuplexChannel {
    /// 绑定 `local` 并连接 `remote`
    ///
    /// # 错误
    /// - `LinkError::SchemeMismatch`: 两端协议不同
    /// - `LinkError::InvalidEndpoint`: 地址无法解析
    /// - `LinkError::Bind`: 本地地址无法绑定
    /// - `LinkError::Connect`: UDP 无法设置默认对端
    pub fn open(local: &Endpoint, remote: &Endpoint) -> Result<Self, LinkError> {
        if local.scheme() != remote.scheme() {
            return Err(LinkError::SchemeMismatch {
                local: local.scheme(),
                remote: remote.scheme(),
            });
        }

        let local_addr = local.resolve()?;
        let remote_addr = remote.resolve()?;

        let kind = match local.scheme() {
            Scheme::Tcp => {
                let listener = TcpListener::bind(local_addr).map_err(|source| LinkError::Bind {
                    addr: local_addr,
                    source,
                })?;
                let outbound = match TcpStream::connect(remote_addr) {
                    Ok(stream) => Some(stream),
                    Err(e) => {
                        warn!("Initial connect to {} failed: {}, will retry", remote_addr, e);
                        None
                    },
                };
                ChannelKind::Tcp { listener, outbound }
            },
            Scheme::Udp => {
                let socket = UdpSocket::bind(local_addr).map_err(|source| LinkError::Bind {
                    addr: local_addr,
                    source,
                })?;
                socket.connect(remote_addr).map_err(|source| LinkError::Connect {
                    addr: remote_addr,
                    source,
                })?;
                ChannelKind::Udp { socket }
            },
        };

        debug!("Duplex channel open: {} <-> {}", local, remote);
        Ok(Self {
            local: local.clone(),
            remote: remote.clone(),
            remote_addr,
            kind,
        })
    }

    /// 解析字符串端点后打开
    pub fn open_str(local: &str, remote: &str) -> Result<Self, LinkError> {
        Self::open(&Endpoint::parse(local)?, &Endpoint::parse(remote)?)
    }

    pub fn local(&self) -> &Endpoint {
        &self.local
    }

    pub fn remote(&self) -> &Endpoint {
        &self.remote
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn scheme(&self) -> Scheme {
        self.local.scheme()
    }

    /// 实际绑定的本地地址（端口为 0 时由系统分配）
    pub fn local_addr(&self) -> Result<SocketAddr, LinkError> {
        let addr = match &self.kind {
            ChannelKind::Tcp { listener, .. } => listener.local_addr()?,
            ChannelKind::Udp { socket } => socket.local_addr()?,
        };
        Ok(addr)
    }
}
