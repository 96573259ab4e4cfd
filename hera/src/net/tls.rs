use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned, pki_types::ServerName};
use std::{fs::File, io, net::TcpStream, path::Path, sync::Arc};

use crate::connection::Config;

pub(super) type TlsStream = StreamOwned<ClientConnection, TcpStream>;

fn invalid(err: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err.to_string())
}

fn root_store(ca_file: Option<&Path>) -> io::Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    match ca_file {
        Some(path) => {
            let mut reader = io::BufReader::new(File::open(path)?);
            for cert in rustls_pemfile::certs(&mut reader) {
                roots.add(cert?).map_err(invalid)?;
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }
    Ok(roots)
}

/// Wrap a connected socket in a client TLS session.
///
/// The handshake completes lazily on the first read or write.
pub(super) fn connect(config: &Config, tcp: TcpStream) -> io::Result<TlsStream> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let tls = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(invalid)?
        .with_root_certificates(root_store(config.tls_ca_file.as_deref())?)
        .with_no_client_auth();

    let name = ServerName::try_from(config.host.clone()).map_err(invalid)?;
    let conn = ClientConnection::new(Arc::new(tls), name).map_err(invalid)?;
    Ok(StreamOwned::new(conn, tcp))
}
