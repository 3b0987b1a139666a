use std::fs::File;
use std::io::{self, BufReader};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use x509_parser::extensions::ParsedExtension;
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

static PROTOCOL_VERSIONS: &[&rustls::SupportedProtocolVersion] =
    &[&rustls::version::TLS13, &rustls::version::TLS12];

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),
    #[error("no valid CA certificates found in {0}")]
    NoRootCertificates(PathBuf),
    #[error("failed to build client verifier from {path}: {reason}")]
    Verifier { path: PathBuf, reason: String },
    #[error("invalid TLS certificate/key configuration: {0}")]
    Config(#[from] rustls::Error),
    #[error("invalid server name {0:?}")]
    ServerName(String),
}

/// Paths to the PEM material a server needs. A CA bundle turns on mutual TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub ca_cert_file: Option<PathBuf>,
}

impl TlsMaterial {
    pub fn new(cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        Self { cert_file: cert_file.into(), key_file: key_file.into(), ca_cert_file: None }
    }

    pub fn with_client_ca(mut self, ca_cert_file: impl Into<PathBuf>) -> Self {
        self.ca_cert_file = Some(ca_cert_file.into());
        self
    }

    pub fn is_mutual(&self) -> bool {
        self.ca_cert_file.is_some()
    }
}

/// Builds the server side: TLS 1.2 or newer, and when a CA bundle is set every
/// client must present a certificate that chains to it.
pub fn load_server_config(material: &TlsMaterial) -> Result<Arc<ServerConfig>, TlsError> {
    let chain = load_cert_chain(&material.cert_file)?;
    let key = load_private_key(&material.key_file)?;
    let builder = ServerConfig::builder_with_protocol_versions(PROTOCOL_VERSIONS);

    let config = match &material.ca_cert_file {
        Some(ca_path) => {
            let roots = load_root_store(ca_path)?;
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots)).build().map_err(
                |err| TlsError::Verifier { path: ca_path.clone(), reason: err.to_string() },
            )?;
            builder.with_client_cert_verifier(verifier).with_single_cert(chain, key)?
        }
        None => builder.with_no_client_auth().with_single_cert(chain, key)?,
    };
    Ok(Arc::new(config))
}

/// Client-side settings used by [`crate::RpcClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientTlsMaterial {
    pub ca_cert_file: PathBuf,
    pub identity: Option<(PathBuf, PathBuf)>,
}

impl ClientTlsMaterial {
    pub fn new(ca_cert_file: impl Into<PathBuf>) -> Self {
        Self { ca_cert_file: ca_cert_file.into(), identity: None }
    }

    pub fn with_identity(
        mut self,
        cert_file: impl Into<PathBuf>,
        key_file: impl Into<PathBuf>,
    ) -> Self {
        self.identity = Some((cert_file.into(), key_file.into()));
        self
    }
}

pub fn load_client_config(material: &ClientTlsMaterial) -> Result<Arc<ClientConfig>, TlsError> {
    let roots = load_root_store(&material.ca_cert_file)?;
    let builder = ClientConfig::builder_with_protocol_versions(PROTOCOL_VERSIONS)
        .with_root_certificates(roots);
    let config = match &material.identity {
        Some((cert_file, key_file)) => {
            builder.with_client_auth_cert(load_cert_chain(cert_file)?, load_private_key(key_file)?)?
        }
        None => builder.with_no_client_auth(),
    };
    Ok(Arc::new(config))
}

pub fn server_name(host: &str) -> Result<ServerName<'static>, TlsError> {
    ServerName::try_from(host.to_string()).map_err(|_| TlsError::ServerName(host.to_string()))
}

pub fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certificates = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read { path: path.to_path_buf(), source })?;
    if certificates.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certificates)
}

pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Read { path: path.to_path_buf(), source })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

pub fn load_root_store(path: &Path) -> Result<RootCertStore, TlsError> {
    let certificates = load_cert_chain(path)?;
    let mut roots = RootCertStore::empty();
    let (added, _ignored) = roots.add_parsable_certificates(certificates);
    if added == 0 {
        return Err(TlsError::NoRootCertificates(path.to_path_buf()));
    }
    Ok(roots)
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read { path: path.to_path_buf(), source })
}

/// Who is on the other end of a mutually authenticated connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerIdentity {
    pub subject: Option<String>,
    pub sans: Vec<String>,
}

pub fn peer_identity(peer_certs: Option<&[CertificateDer<'_>]>) -> Option<PeerIdentity> {
    let leaf = peer_certs?.first()?;
    let (_remaining, cert) = X509Certificate::from_der(leaf.as_ref()).ok()?;
    let subject = cert
        .subject()
        .iter_common_name()
        .find_map(|name| name.as_str().ok().map(str::to_string))
        .or_else(|| Some(cert.subject().to_string()));
    Some(PeerIdentity { subject, sans: subject_alt_names(&cert) })
}

fn subject_alt_names(cert: &X509Certificate<'_>) -> Vec<String> {
    let mut sans = Vec::new();
    for extension in cert.extensions() {
        let ParsedExtension::SubjectAlternativeName(alt_names) = extension.parsed_extension() else {
            continue;
        };
        for name in &alt_names.general_names {
            let value = match name {
                GeneralName::DNSName(value) | GeneralName::RFC822Name(value) => {
                    Some((*value).to_string())
                }
                GeneralName::IPAddress(raw) if raw.len() == 4 => {
                    Some(IpAddr::from([raw[0], raw[1], raw[2], raw[3]]).to_string())
                }
                GeneralName::IPAddress(raw) if raw.len() == 16 => {
                    let mut octets = [0_u8; 16];
                    octets.copy_from_slice(raw);
                    Some(IpAddr::from(octets).to_string())
                }
                _ => None,
            };
            if let Some(value) = value.filter(|value| !value.trim().is_empty()) {
                sans.push(value.trim().to_string());
            }
        }
    }
    sans
}
