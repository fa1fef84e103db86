//! Address families, types, and the textual address formats C2 accepts
//! (spec §6 "Address formats"), grounded on
//! `examples/original_source/include/xtils/system/unix_socket.h`'s
//! `SockFamily`/`SockType`/`GetSockFamily`.

use std::io;
use std::net::SocketAddr;

use socket2::{Domain, SockAddr, Type};

/// Arbitrarily offset from the libc `AF_*`/`SOCK_*` values so nothing
/// accidentally assumes these match the sysroot's defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockFamily {
    Unix,
    Inet,
    Inet6,
    /// Let the kernel pick based on the address passed to `bind`/`connect`.
    /// Only meaningful before a family is known; `RawSocket::create` with
    /// this variant defers socket(2) to the first `connect`/`bind` call site
    /// rather than allocating a family-less descriptor (there is no
    /// `AF_UNSPEC` socket type on Linux).
    Unspec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockType {
    Stream,
    Dgram,
    SeqPacket,
}

impl From<SockFamily> for Domain {
    fn from(family: SockFamily) -> Domain {
        match family {
            SockFamily::Unix => Domain::UNIX,
            SockFamily::Inet => Domain::IPV4,
            SockFamily::Inet6 => Domain::IPV6,
            SockFamily::Unspec => Domain::UNSPEC,
        }
    }
}

impl From<SockType> for Type {
    fn from(ty: SockType) -> Type {
        match ty {
            SockType::Stream => Type::STREAM,
            SockType::Dgram => Type::DGRAM,
            SockType::SeqPacket => Type::SEQPACKET,
        }
    }
}

/// Family auto-detection: leading `@` => Unix (abstract); `[` prefix =>
/// Inet6; a final colon followed by an all-decimal port => Inet; otherwise
/// Unix (a filesystem path).
pub fn sock_family_for(addr: &str) -> SockFamily {
    if addr.starts_with('@') {
        return SockFamily::Unix;
    }
    if addr.starts_with('[') {
        return SockFamily::Inet6;
    }
    if let Some(colon) = addr.rfind(':') {
        let port = &addr[colon + 1..];
        if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
            return SockFamily::Inet;
        }
    }
    SockFamily::Unix
}

/// A parsed address ready to be handed to `bind`/`connect`.
pub enum ParsedAddr {
    /// Filesystem-linked Unix domain socket path.
    UnixPath(String),
    /// Abstract (Linux-only) Unix domain socket name, without the leading
    /// `@` or the kernel's implicit leading NUL byte.
    UnixAbstract(String),
    Inet(SocketAddr),
}

pub fn parse_address(addr: &str) -> io::Result<ParsedAddr> {
    match sock_family_for(addr) {
        SockFamily::Unix => {
            if let Some(name) = addr.strip_prefix('@') {
                Ok(ParsedAddr::UnixAbstract(name.to_string()))
            } else {
                Ok(ParsedAddr::UnixPath(addr.to_string()))
            }
        }
        SockFamily::Inet | SockFamily::Inet6 => {
            let parsed: SocketAddr = addr
                .parse()
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bad inet address"))?;
            Ok(ParsedAddr::Inet(parsed))
        }
    }
}

impl ParsedAddr {
    pub fn family(&self) -> SockFamily {
        match self {
            ParsedAddr::UnixPath(_) | ParsedAddr::UnixAbstract(_) => SockFamily::Unix,
            ParsedAddr::Inet(SocketAddr::V4(_)) => SockFamily::Inet,
            ParsedAddr::Inet(SocketAddr::V6(_)) => SockFamily::Inet6,
        }
    }

    /// Builds the `socket2::SockAddr` to pass to `bind`/`connect`. Abstract
    /// Unix sockets need a hand-built `sockaddr_un` because the kernel's
    /// abstract-namespace convention (leading NUL byte, no terminator) isn't
    /// representable as a filesystem path.
    pub fn to_sock_addr(&self) -> io::Result<SockAddr> {
        match self {
            ParsedAddr::UnixPath(path) => SockAddr::unix(path),
            ParsedAddr::UnixAbstract(name) => abstract_unix_sock_addr(name),
            ParsedAddr::Inet(addr) => Ok(SockAddr::from(*addr)),
        }
    }
}

fn abstract_unix_sock_addr(name: &str) -> io::Result<SockAddr> {
    let name_bytes = name.as_bytes();
    // sun_path is 108 bytes on Linux; byte 0 stays NUL (the abstract-socket
    // marker) so only 107 remain for the name.
    const MAX_NAME_LEN: usize = 107;
    if name_bytes.len() > MAX_NAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "abstract socket name too long"));
    }

    // SAFETY: `sockaddr_un` is a plain-old-data C struct; zero-init is a
    // valid bit pattern for it, and we only ever write into its fields.
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    // addr.sun_path[0] intentionally stays 0: that NUL byte is what marks
    // this as an abstract-namespace address rather than a filesystem path.
    for (i, &b) in name_bytes.iter().enumerate() {
        addr.sun_path[i + 1] = b as libc::c_char;
    }
    let len = (std::mem::size_of::<libc::sa_family_t>() + 1 + name_bytes.len()) as libc::socklen_t;

    // SAFETY: `addr` is a valid, fully-initialized sockaddr_un of length
    // `len`; `SockAddr::init` requires the closure to report exactly the
    // bytes it wrote, which we do.
    let (sock_addr, ()) = unsafe {
        SockAddr::try_init(|storage, storage_len| {
            std::ptr::copy_nonoverlapping(
                &addr as *const libc::sockaddr_un as *const u8,
                storage as *mut u8,
                len as usize,
            );
            *storage_len = len;
            Ok(())
        })?
    };
    Ok(sock_addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_unix_abstract() {
        assert_eq!(sock_family_for("@my-socket"), SockFamily::Unix);
    }

    #[test]
    fn detects_unix_path() {
        assert_eq!(sock_family_for("/tmp/reactor.sock"), SockFamily::Unix);
    }

    #[test]
    fn detects_inet() {
        assert_eq!(sock_family_for("127.0.0.1:8080"), SockFamily::Inet);
    }

    #[test]
    fn detects_inet6() {
        assert_eq!(sock_family_for("[::1]:8080"), SockFamily::Inet6);
    }

    #[test]
    fn path_without_port_stays_unix() {
        assert_eq!(sock_family_for("/var/run/no-colon"), SockFamily::Unix);
        assert_eq!(sock_family_for("/var/run/service:main"), SockFamily::Unix);
    }

    #[test]
    fn parses_inet_address() {
        match parse_address("127.0.0.1:9000").unwrap() {
            ParsedAddr::Inet(addr) => assert_eq!(addr.port(), 9000),
            _ => panic!("expected inet"),
        }
    }
}
