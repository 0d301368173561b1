use rustls::pki_types::CertificateDer;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::TlsOptions;
use crate::error::{Result, TunnelError};

/// 隧道内只发送 HTTP/1.1
const ALPN_HTTP11: &[u8] = b"http/1.1";

/// 加载客户端 TLS 配置
///
/// 配置了 `ca_cert_path` 时只信任该文件中的 CA，否则使用系统 CA 证书
pub fn load_client_config(options: &TlsOptions) -> Result<Arc<rustls::ClientConfig>> {
    let mut root_store = rustls::RootCertStore::empty();

    if let Some(ref ca_path) = options.ca_cert_path {
        for cert in load_ca_certs(ca_path)? {
            root_store.add(cert).map_err(|e| {
                TunnelError::config_error(format!("Failed to add CA certificate: {}", e))
            })?;
        }
    } else if !options.skip_verify {
        let native_certs = rustls_native_certs::load_native_certs();
        for err in &native_certs.errors {
            debug!("Failed to load a native certificate: {}", err);
        }
        for cert in native_certs.certs {
            root_store.add(cert).ok();
        }
        if root_store.is_empty() {
            warn!("No native root certificates found, HTTPS targets will fail verification");
        }
    }

    let mut config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    if options.skip_verify {
        warn!("TLS certificate verification is disabled for tunneled requests");
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoCertificateVerification));
    }

    config.alpn_protocols = vec![ALPN_HTTP11.to_vec()];

    Ok(Arc::new(config))
}

fn load_ca_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        TunnelError::config_error(format!("Failed to open CA cert file {:?}: {}", path, e))
    })?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            TunnelError::config_error(format!("Failed to parse CA certificates: {}", e))
        })?;

    if certs.is_empty() {
        return Err(TunnelError::config_error(format!(
            "No certificates found in {:?}",
            path
        )));
    }
    Ok(certs)
}

/// 不验证证书的验证器（仅用于测试）
#[derive(Debug)]
struct NoCertificateVerification;

impl rustls::client::danger::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer,
        _intermediates: &[CertificateDer],
        _server_name: &rustls::pki_types::ServerName,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}
