use base64::Engine as _;
use boring::pkey::PKey;
use boring::ssl::{SslAcceptor, SslAcceptorBuilder, SslMethod};
use boring::x509::X509;
use sha2::{Digest, Sha256};

/// A self-signed certificate for 127.0.0.1 loaded into an acceptor builder.
pub struct CertBundle {
    pub builder: SslAcceptorBuilder,
    /// Base64 SHA-256 of the certificate's SubjectPublicKeyInfo.
    pub spki_pin: String,
}

pub fn generate_cert_bundle() -> CertBundle {
    let subject_alt_names = vec!["127.0.0.1".to_string(), "localhost".to_string()];

    let cert =
        rcgen::generate_simple_self_signed(subject_alt_names).expect("Failed to generate cert");
    let cert_pem = cert.cert.pem();
    let key_pem = cert.signing_key.serialize_pem();
    let spki_pin = base64::engine::general_purpose::STANDARD
        .encode(Sha256::digest(cert.signing_key.public_key_der()));

    let pkey = PKey::private_key_from_pem(key_pem.as_bytes()).expect("Failed to parse private key");
    let x509 = X509::from_pem(cert_pem.as_bytes()).expect("Failed to parse certificate");

    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())
        .expect("Failed to create SslAcceptor builder");
    builder
        .set_private_key(&pkey)
        .expect("Failed to set private key");
    builder
        .set_certificate(&x509)
        .expect("Failed to set certificate");

    CertBundle { builder, spki_pin }
}

/// Acceptor that selects `proto` (ALPN wire form, e.g. `b"\x02h2"`).
pub fn acceptor_with_alpn(proto: &'static [u8]) -> (SslAcceptor, String) {
    let CertBundle { mut builder, spki_pin } = generate_cert_bundle();
    builder.set_alpn_select_callback(move |_, client_protos| {
        boring::ssl::select_next_proto(proto, client_protos).ok_or(boring::ssl::AlpnError::NOACK)
    });
    (builder.build(), spki_pin)
}
