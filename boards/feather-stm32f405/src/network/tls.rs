#![deny(unsafe_code)]
//! TLS 1.3 engine on embedded-tls
//!
//! embedded-tls runs the handshake; trust is decided by relay-core. The
//! certificate chain the server sends is handed to the caller's
//! [`ChainObserver`] through [`ObserverVerifier`], and the handshake only
//! continues when the observer's decision accepts the chain.
//!
//! Once a chain is accepted, the server's CertificateVerify signature is
//! checked against the leaf's public key, so a peer replaying the pinned
//! certificate without its private key still fails. Only ECDSA P-256 with
//! SHA-256 leaf keys are supported.
//!
//! # Memory Usage
//!
//! - TLS read buffer: 18 KB in main SRAM (see `src/tls_buffers.rs`)
//! - TLS write buffer: 16 KB in main SRAM (see `src/tls_buffers.rs`)

use defmt::{debug, error, warn, Debug2Format};
use der::asn1::{AnyRef, BitStringRef, IntRef};
use der::{Decode, Sequence};
use embedded_io_async::{Read, Write};
use embedded_tls::{
    Aes128GcmSha256, CertificateEntryRef, CertificateRef, CertificateVerifyRef, CryptoProvider,
    SignatureScheme, TlsConfig, TlsConnection, TlsContext, TlsError, TlsVerifier,
};
use heapless::{String, Vec};
use p256::ecdsa::signature::Verifier as _;
use p256::ecdsa::{Signature, VerifyingKey};
use rand_core::CryptoRngCore;
use relay_core::tls::{CipherSuite, HandshakeParams, TlsEngine, TlsVersion};
use relay_core::{ChainObserver, HandshakeError, TransportError};
use sha2::Digest as _;

/// Context string prefixed to the transcript hash (RFC 8446 section 4.4.3)
const SERVER_VERIFY_CONTEXT: &[u8] = b"TLS 1.3, server CertificateVerify\x00";

// Just enough X.509 structure to reach the subject public key. Everything
// else is kept as raw TLVs.

#[derive(Sequence)]
struct SubjectPublicKeyInfoRef<'a> {
    algorithm: AnyRef<'a>,
    subject_public_key: BitStringRef<'a>,
}

#[derive(Sequence)]
struct TbsCertificateRef<'a> {
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    version: Option<u8>,
    serial_number: IntRef<'a>,
    signature: AnyRef<'a>,
    issuer: AnyRef<'a>,
    validity: AnyRef<'a>,
    subject: AnyRef<'a>,
    subject_public_key_info: SubjectPublicKeyInfoRef<'a>,
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
    issuer_unique_id: Option<BitStringRef<'a>>,
    #[asn1(context_specific = "2", tag_mode = "IMPLICIT", optional = "true")]
    subject_unique_id: Option<BitStringRef<'a>>,
    #[asn1(context_specific = "3", tag_mode = "EXPLICIT", optional = "true")]
    extensions: Option<AnyRef<'a>>,
}

#[derive(Sequence)]
struct LeafCertificateRef<'a> {
    tbs_certificate: TbsCertificateRef<'a>,
    signature_algorithm: AnyRef<'a>,
    signature: BitStringRef<'a>,
}

/// Why the leaf's public key could not be used
enum LeafKeyError {
    Malformed,
    /// Not an uncompressed or compressed P-256 point (RSA, Ed25519, other curves)
    UnsupportedType,
}

/// P-256 public key of a DER certificate
fn leaf_key(cert_der: &[u8]) -> Result<VerifyingKey, LeafKeyError> {
    let cert = LeafCertificateRef::from_der(cert_der).map_err(|_| LeafKeyError::Malformed)?;
    let sec1 = cert
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .as_bytes()
        .ok_or(LeafKeyError::Malformed)?;
    VerifyingKey::from_sec1_bytes(sec1).map_err(|_| LeafKeyError::UnsupportedType)
}

/// Bridges the embedded-tls verifier hooks to a [`ChainObserver`]
pub struct ObserverVerifier<'o, O> {
    observer: &'o mut O,
    host: Option<String<64>>,
    server_key: Option<VerifyingKey>,
    certificate_transcript: Option<[u8; 32]>,
    /// Set when an accepted leaf carried a key we cannot verify with
    unsupported_leaf_key: bool,
}

impl<'o, O: ChainObserver> ObserverVerifier<'o, O> {
    pub fn new(observer: &'o mut O) -> Self {
        Self {
            observer,
            host: None,
            server_key: None,
            certificate_transcript: None,
            unsupported_leaf_key: false,
        }
    }
}

impl<O: ChainObserver> TlsVerifier<Aes128GcmSha256> for ObserverVerifier<'_, O> {
    fn set_hostname_verification(&mut self, hostname: &str) -> Result<(), TlsError> {
        self.host
            .replace(String::try_from(hostname).map_err(|_| TlsError::InsufficientSpace)?);
        Ok(())
    }

    fn verify_certificate(
        &mut self,
        transcript: &sha2::Sha256,
        cert: CertificateRef,
    ) -> Result<(), TlsError> {
        self.server_key = None;
        self.observer.on_chain_start(self.host.as_deref());

        let mut leaf = None;
        for entry in cert.entries.iter() {
            match entry {
                CertificateEntryRef::X509(bytes) => {
                    self.observer.on_certificate_bytes(bytes);
                    self.observer.on_certificate_boundary();
                    leaf.get_or_insert(*bytes);
                }
                _ => {
                    // A chain without X.509 entries never completes a leaf
                    let _ = self.observer.on_chain_end();
                    return Err(TlsError::InvalidCertificate);
                }
            }
        }

        let decision = self.observer.on_chain_end();
        if !decision.accepts() {
            debug!("Certificate chain not accepted: {}", decision);
            return Err(TlsError::InvalidCertificate);
        }

        let leaf = leaf.ok_or(TlsError::InvalidCertificate)?;
        self.server_key = Some(leaf_key(leaf).map_err(|e| match e {
            LeafKeyError::Malformed => TlsError::DecodeError,
            LeafKeyError::UnsupportedType => {
                self.unsupported_leaf_key = true;
                TlsError::InvalidSignatureScheme
            }
        })?);
        self.certificate_transcript = Some(transcript.clone().finalize().into());
        Ok(())
    }

    fn verify_signature(&mut self, verify: CertificateVerifyRef) -> Result<(), TlsError> {
        if verify.signature_scheme != SignatureScheme::EcdsaSecp256r1Sha256 {
            return Err(TlsError::InvalidSignatureScheme);
        }

        let server_key = self.server_key.as_ref().ok_or(TlsError::InvalidCertificate)?;
        let handshake_hash = self
            .certificate_transcript
            .take()
            .ok_or(TlsError::InvalidHandshake)?;

        let mut msg: Vec<u8, 130> = Vec::new();
        msg.resize(64, 0x20)
            .map_err(|_| TlsError::InsufficientSpace)?;
        msg.extend_from_slice(SERVER_VERIFY_CONTEXT)
            .map_err(|_| TlsError::InsufficientSpace)?;
        msg.extend_from_slice(&handshake_hash)
            .map_err(|_| TlsError::InsufficientSpace)?;

        let signature =
            Signature::from_der(verify.signature).map_err(|_| TlsError::InvalidSignature)?;
        server_key
            .verify(&msg, &signature)
            .map_err(|_| TlsError::InvalidSignature)
    }
}

/// Crypto provider handing embedded-tls the hardware RNG and the verifier
struct PinningCryptoProvider<'r, 'v, 'o, R, O> {
    rng: &'r mut R,
    verifier: &'v mut ObserverVerifier<'o, O>,
}

impl<R, O> CryptoProvider for PinningCryptoProvider<'_, '_, '_, R, O>
where
    R: CryptoRngCore,
    O: ChainObserver,
{
    type CipherSuite = Aes128GcmSha256;
    type Signature = &'static [u8];

    fn rng(&mut self) -> impl CryptoRngCore {
        &mut *self.rng
    }

    fn verifier(&mut self) -> Result<&mut impl TlsVerifier<Self::CipherSuite>, TlsError> {
        Ok(&mut *self.verifier)
    }
}

fn handshake_error(e: TlsError) -> HandshakeError {
    match e {
        TlsError::InvalidCertificate => HandshakeError::CertificateRejected,
        TlsError::InvalidSignature => HandshakeError::BadSignature,
        TlsError::InvalidSignatureScheme
        | TlsError::InvalidCipherSuite
        | TlsError::InvalidSupportedVersions
        | TlsError::Unimplemented => HandshakeError::Unsupported,
        TlsError::ConnectionClosed => HandshakeError::Transport(TransportError::Closed),
        other => {
            warn!("TLS handshake failed: {:?}", Debug2Format(&other));
            HandshakeError::Protocol
        }
    }
}

/// TLS 1.3 `TLS_AES_128_GCM_SHA256` client over any embedded-io stream
pub struct EmbeddedTlsEngine<R> {
    rng: R,
    read_buf: &'static mut [u8],
    write_buf: &'static mut [u8],
}

impl<R: CryptoRngCore> EmbeddedTlsEngine<R> {
    pub fn new(rng: R, read_buf: &'static mut [u8], write_buf: &'static mut [u8]) -> Self {
        Self {
            rng,
            read_buf,
            write_buf,
        }
    }
}

impl<R: CryptoRngCore> TlsEngine for EmbeddedTlsEngine<R> {
    type Session<'a, S>
        = TlsConnection<'a, S, Aes128GcmSha256>
    where
        Self: 'a,
        S: Read + Write + 'a;

    async fn open<'a, S, O>(
        &'a mut self,
        stream: S,
        params: HandshakeParams<'_>,
        observer: &mut O,
    ) -> Result<Self::Session<'a, S>, HandshakeError>
    where
        S: Read + Write + 'a,
        O: ChainObserver,
    {
        if !params.profile.allows_version(TlsVersion::Tls13)
            || !params.profile.allows_suite(CipherSuite::Aes128GcmSha256)
        {
            return Err(HandshakeError::Unsupported);
        }

        let config = TlsConfig::new().with_server_name(params.server_name);
        let mut connection = TlsConnection::new(stream, &mut *self.read_buf, &mut *self.write_buf);
        let mut verifier = ObserverVerifier::new(observer);
        let provider = PinningCryptoProvider {
            rng: &mut self.rng,
            verifier: &mut verifier,
        };

        debug!("TLS 1.3 handshake with {}", params.server_name);
        match connection.open(TlsContext::new(&config, provider)).await {
            Ok(()) => Ok(connection),
            Err(_) if verifier.unsupported_leaf_key => {
                error!(
                    "Pinned leaf key type unsupported for {}, only ECDSA P-256 can be verified",
                    params.server_name
                );
                Err(HandshakeError::UnsupportedLeafKey)
            }
            Err(e) => Err(handshake_error(e)),
        }
    }
}
