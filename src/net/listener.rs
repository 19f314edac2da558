//! Socket binding.

use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener, ToSocketAddrs};

use thiserror::Error;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("cannot resolve bind host `{host}`: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("bind host `{0}` resolved to no addresses")]
    NoAddress(String),

    #[error("address {0} is already in use")]
    AddrInUse(SocketAddr),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Resolve `host` into candidate socket addresses.
pub fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, ListenerError> {
    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_string(),
            source,
        })?
        .collect();

    if addrs.is_empty() {
        return Err(ListenerError::NoAddress(host.to_string()));
    }
    Ok(addrs)
}

/// Bind a non-blocking listener on the first resolved address that accepts.
pub fn bind(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let mut last_error = None;

    for addr in resolve(host, port)? {
        match TcpListener::bind(addr) {
            Ok(listener) => {
                listener
                    .set_nonblocking(true)
                    .map_err(|source| ListenerError::Bind { addr, source })?;
                tracing::debug!(address = %addr, "Listener bound");
                return Ok(listener);
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                last_error = Some(ListenerError::AddrInUse(addr));
            }
            Err(source) => {
                last_error = Some(ListenerError::Bind { addr, source });
            }
        }
    }

    Err(last_error.unwrap_or_else(|| ListenerError::NoAddress(host.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_port_binds() {
        let listener = bind("127.0.0.1", 0).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn occupied_port_reports_addr_in_use() {
        let first = bind("127.0.0.1", 0).unwrap();
        let port = first.local_addr().unwrap().port();

        let err = bind("127.0.0.1", port).unwrap_err();
        assert!(matches!(err, ListenerError::AddrInUse(addr) if addr.port() == port));
    }

    #[test]
    fn bracketed_ipv6_literal_is_accepted() {
        let addrs = resolve("[::1]", 8080).unwrap();
        assert_eq!(addrs, vec!["[::1]:8080".parse::<SocketAddr>().unwrap()]);
    }
}
