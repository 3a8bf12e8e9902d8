use once_cell::sync::Lazy;
use openssl::rsa::Rsa;

static PRIVATE_KEY_PEM: Lazy<String> = Lazy::new(|| {
    let rsa = Rsa::generate(2048).expect("generate RSA key");
    let pem = rsa.private_key_to_pem().expect("export RSA key");
    String::from_utf8(pem).expect("PEM is UTF-8")
});

/// An RSA private key generated once per test binary
pub fn private_key_pem() -> &'static str {
    &PRIVATE_KEY_PEM
}
