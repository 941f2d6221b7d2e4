//! Utilities for reading PEM files as [`CertificateDer`]s and [`PrivateKeyDer`]s, as necessary
//! to initialize TLS.

use std::{fs::File, io, io::Read, path::Path};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

/// Read the file at `path` into memory as a vector of PEM-encoded `CERTIFICATE`s, silently
/// skipping any entries in the file which are not labeled `CERTIFICATE`.
pub fn read_certificates(path: impl AsRef<Path>) -> Result<Vec<CertificateDer<'static>>, io::Error> {
    let mut file = File::open(&path)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;

    let certificates = pem::parse_many(contents)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("invalid PEM: {}", e)))?
        .into_iter()
        .filter(|p| p.tag == "CERTIFICATE")
        .map(|p| CertificateDer::from(p.contents))
        .collect();
    Ok(certificates)
}

/// Read the file at `path` as a single PEM-encoded private key, accepting any of the common
/// key labels (`PRIVATE KEY`, `RSA PRIVATE KEY`, `EC PRIVATE KEY`).
pub fn read_private_key(path: impl AsRef<Path>) -> Result<PrivateKeyDer<'static>, io::Error> {
    let mut file = File::open(&path)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;

    let parsed = pem::parse(contents)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("invalid PEM: {}", e)))?;

    match parsed.tag.as_str() {
        "PRIVATE KEY" => Ok(PrivateKeyDer::Pkcs8(parsed.contents.into())),
        "RSA PRIVATE KEY" => Ok(PrivateKeyDer::Pkcs1(parsed.contents.into())),
        "EC PRIVATE KEY" => Ok(PrivateKeyDer::Sec1(parsed.contents.into())),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("not labeled as a private key: '{}'", other),
        )),
    }
}
