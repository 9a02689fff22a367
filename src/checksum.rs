//! Image digests for integrity verification.

use clap::ValueEnum;
use log::debug;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::fmt::{self, Display};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use thiserror;

use crate::error::{FmountError, FmountResult};

const BUFFER_SIZE: usize = 64 * 1024;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Algorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("Unknown digest algorithm `{0}`")]
pub struct UnknownAlgorithm(pub String);

impl FromStr for Algorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "md5" => Ok(Algorithm::Md5),
            "sha1" => Ok(Algorithm::Sha1),
            "sha224" => Ok(Algorithm::Sha224),
            "sha256" => Ok(Algorithm::Sha256),
            "sha384" => Ok(Algorithm::Sha384),
            "sha512" => Ok(Algorithm::Sha512),
            _ => Err(UnknownAlgorithm(s.to_string())),
        }
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Algorithm::Md5 => "md5",
            Algorithm::Sha1 => "sha1",
            Algorithm::Sha224 => "sha224",
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha384 => "sha384",
            Algorithm::Sha512 => "sha512",
        };
        write!(f, "{name}")
    }
}

fn hash_reader<D: Digest, R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Computes the lowercase hex digest of the file at `path`.
pub fn digest(path: &Path, algorithm: Algorithm) -> io::Result<String> {
    let file = File::open(path)?;
    match algorithm {
        Algorithm::Md5 => hash_reader::<Md5, _>(file),
        Algorithm::Sha1 => hash_reader::<Sha1, _>(file),
        Algorithm::Sha224 => hash_reader::<Sha224, _>(file),
        Algorithm::Sha256 => hash_reader::<Sha256, _>(file),
        Algorithm::Sha384 => hash_reader::<Sha384, _>(file),
        Algorithm::Sha512 => hash_reader::<Sha512, _>(file),
    }
}

/// Returns whether the digest of `image` equals `expected`, ignoring case.
///
/// # Errors
/// `FmountError::VerifyIo` if the image cannot be read. A mismatch is not an error.
pub fn verify(image: &Path, algorithm: Algorithm, expected: &str) -> FmountResult<bool> {
    let actual = digest(image, algorithm).map_err(|source| FmountError::VerifyIo {
        path: image.to_path_buf(),
        source,
    })?;
    debug!("{algorithm} of {}: {actual}", image.display());
    Ok(actual.eq_ignore_ascii_case(expected.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn digests_match_known_values() {
        let tmp = tempdir().unwrap();
        let image = tmp.path().join("abc.dd");
        fs::write(&image, b"abc").unwrap();

        assert_eq!(
            digest(&image, Algorithm::Md5).unwrap(),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        assert_eq!(
            digest(&image, Algorithm::Sha1).unwrap(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            digest(&image, Algorithm::Sha256).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn verify_ignores_case_and_reports_mismatch() {
        let tmp = tempdir().unwrap();
        let image = tmp.path().join("abc.dd");
        fs::write(&image, b"abc").unwrap();

        assert!(verify(&image, Algorithm::Md5, "900150983CD24FB0D6963F7D28E17F72").unwrap());
        assert!(!verify(&image, Algorithm::Md5, "00000000000000000000000000000000").unwrap());
    }

    #[test]
    fn verify_of_missing_image_is_an_io_error() {
        let tmp = tempdir().unwrap();
        assert!(matches!(
            verify(&tmp.path().join("missing.dd"), Algorithm::Sha1, ""),
            Err(FmountError::VerifyIo { .. })
        ));
    }

    #[test]
    fn algorithm_names_parse() {
        assert_eq!("SHA-256".parse::<Algorithm>().unwrap(), Algorithm::Sha256);
        assert_eq!("md5".parse::<Algorithm>().unwrap(), Algorithm::Md5);
        assert!("crc32".parse::<Algorithm>().is_err());
    }
}
