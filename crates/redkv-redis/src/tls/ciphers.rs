//! Cipher-suite and key-exchange ordering.
//!
//! The ordering itself is a pure function of one flag so it can be tested on
//! any machine; [`aes_gcm_accelerated`] is the only place that looks at the
//! CPU.

use rustls::SupportedCipherSuite;
use rustls::crypto::SupportedKxGroup;
use rustls::crypto::ring::{cipher_suite, kx_group};

/// Whether the CPU has AES and carry-less multiply instructions.
pub fn aes_gcm_accelerated() -> bool {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        std::arch::is_x86_feature_detected!("aes")
            && std::arch::is_x86_feature_detected!("pclmulqdq")
    }
    #[cfg(target_arch = "aarch64")]
    {
        std::arch::is_aarch64_feature_detected!("aes")
            && std::arch::is_aarch64_feature_detected!("pmull")
    }
    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
    {
        false
    }
}

/// AEAD suites in preference order: TLS 1.2 ECDHE suites, then TLS 1.3.
///
/// Within each group AES-GCM leads when accelerated, ChaCha20-Poly1305
/// otherwise.
pub fn cipher_suites(aes_gcm_accelerated: bool) -> Vec<SupportedCipherSuite> {
    let tls12_aes = [
        cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    ];
    let tls12_chacha = [
        cipher_suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
        cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
    ];
    let tls13_aes = [
        cipher_suite::TLS13_AES_256_GCM_SHA384,
        cipher_suite::TLS13_AES_128_GCM_SHA256,
    ];
    let tls13_chacha = [cipher_suite::TLS13_CHACHA20_POLY1305_SHA256];

    let mut suites = Vec::with_capacity(9);
    if aes_gcm_accelerated {
        suites.extend(tls12_aes);
        suites.extend(tls12_chacha);
        suites.extend(tls13_aes);
        suites.extend(tls13_chacha);
    } else {
        suites.extend(tls12_chacha);
        suites.extend(tls12_aes);
        suites.extend(tls13_chacha);
        suites.extend(tls13_aes);
    }
    suites
}

/// Key-exchange groups in preference order.
pub fn kx_groups() -> Vec<&'static dyn SupportedKxGroup> {
    vec![kx_group::X25519, kx_group::SECP256R1, kx_group::SECP384R1]
}
