//! SOCKS5 handshake, authentication, and CONNECT parsing (RFC 1928/1929).
//!
//! Only CONNECT is supported; BIND and UDP ASSOCIATE are rejected with
//! `command not supported`, IPv6 targets with `address type not supported`.
//! Malformed handshakes close the connection after the protocol error reply;
//! they never take the listener down.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::SocksAuthConfig;

pub const VERSION: u8 = 0x05;

const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USERNAME_PASSWORD: u8 = 0x02;
const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Reply codes per RFC 1928 §6.
pub mod reply {
    pub const SUCCEEDED: u8 = 0x00;
    pub const GENERAL_FAILURE: u8 = 0x01;
    pub const COMMAND_NOT_SUPPORTED: u8 = 0x07;
    pub const ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;
}

/// A parsed CONNECT target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl ConnectTarget {
    pub fn port(&self) -> u16 {
        match self {
            ConnectTarget::Ip(addr) => addr.port(),
            ConnectTarget::Domain(_, port) => *port,
        }
    }

    /// Domain name for interception matching, when the client gave one.
    pub fn domain(&self) -> Option<&str> {
        match self {
            ConnectTarget::Domain(domain, _) => Some(domain),
            ConnectTarget::Ip(_) => None,
        }
    }

    /// Address string suitable for `TcpStream::connect`.
    pub fn connect_addr(&self) -> String {
        match self {
            ConnectTarget::Ip(addr) => addr.to_string(),
            ConnectTarget::Domain(domain, port) => format!("{domain}:{port}"),
        }
    }
}

/// Drive the greeting, optional auth subnegotiation, and CONNECT request.
/// On success the SUCCEEDED reply has been written and tunneling may begin.
pub async fn negotiate<S>(
    stream: &mut S,
    auth: Option<&SocksAuthConfig>,
) -> io::Result<ConnectTarget>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // --- greeting ---
    let version = read_u8(stream).await?;
    if version != VERSION {
        return Err(proto_err("bad protocol version"));
    }
    let n_methods = read_u8(stream).await? as usize;
    let mut methods = vec![0u8; n_methods];
    stream.read_exact(&mut methods).await?;

    let wanted = if auth.is_some() {
        METHOD_USERNAME_PASSWORD
    } else {
        METHOD_NO_AUTH
    };
    if !methods.contains(&wanted) {
        stream.write_all(&[VERSION, METHOD_NO_ACCEPTABLE]).await?;
        return Err(proto_err("no acceptable auth method"));
    }
    stream.write_all(&[VERSION, wanted]).await?;

    // --- auth subnegotiation (RFC 1929) ---
    if let Some(credentials) = auth {
        let sub_version = read_u8(stream).await?;
        if sub_version != 0x01 {
            return Err(proto_err("bad auth subnegotiation version"));
        }
        let username = read_lv(stream).await?;
        let password = read_lv(stream).await?;

        let ok = username == credentials.username.as_bytes()
            && password == credentials.password.as_bytes();
        stream.write_all(&[0x01, if ok { 0x00 } else { 0x01 }]).await?;
        if !ok {
            return Err(proto_err("authentication failed"));
        }
    }

    // --- request: VER CMD RSV ATYP ---
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[0] != VERSION {
        return Err(proto_err("bad request version"));
    }
    let cmd = head[1];
    let atyp = head[3];

    if cmd != CMD_CONNECT {
        write_reply(stream, reply::COMMAND_NOT_SUPPORTED).await?;
        return Err(proto_err("command not supported"));
    }

    let target = match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            let port = read_u16(stream).await?;
            ConnectTarget::Ip(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
        }
        ATYP_DOMAIN => {
            let len = read_u8(stream).await? as usize;
            let mut name = vec![0u8; len];
            stream.read_exact(&mut name).await?;
            let port = read_u16(stream).await?;
            let domain = String::from_utf8(name).map_err(|_| proto_err("bad domain name"))?;
            ConnectTarget::Domain(domain, port)
        }
        ATYP_IPV6 => {
            write_reply(stream, reply::ADDRESS_TYPE_NOT_SUPPORTED).await?;
            return Err(proto_err("IPv6 targets not supported"));
        }
        _ => {
            write_reply(stream, reply::ADDRESS_TYPE_NOT_SUPPORTED).await?;
            return Err(proto_err("bad address type"));
        }
    };

    write_reply(stream, reply::SUCCEEDED).await?;
    Ok(target)
}

/// Reply format: VER, REP, RSV, ATYP=IPv4, BND.ADDR=0.0.0.0, BND.PORT=0.
pub async fn write_reply<S>(stream: &mut S, code: u8) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&[VERSION, code, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
        .await
}

async fn read_u8<S: AsyncRead + Unpin>(stream: &mut S) -> io::Result<u8> {
    let mut b = [0u8; 1];
    stream.read_exact(&mut b).await?;
    Ok(b[0])
}

async fn read_u16<S: AsyncRead + Unpin>(stream: &mut S) -> io::Result<u16> {
    let mut b = [0u8; 2];
    stream.read_exact(&mut b).await?;
    Ok(u16::from_be_bytes(b))
}

/// Length-prefixed value as used by RFC 1929 fields.
async fn read_lv<S: AsyncRead + Unpin>(stream: &mut S) -> io::Result<Vec<u8>> {
    let len = read_u8(stream).await? as usize;
    let mut value = vec![0u8; len];
    stream.read_exact(&mut value).await?;
    Ok(value)
}

fn proto_err(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}
