use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    Md5,
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Length of the lowercase hex digest.
    pub fn hex_len(self) -> usize {
        match self {
            HashAlgorithm::Md5 => 32,
            HashAlgorithm::Sha256 => 64,
            HashAlgorithm::Sha512 => 128,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|ch| *ch != '-' && *ch != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            _ => Err(HashError::UnsupportedAlgorithm(raw.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("unsupported hash algorithm `{0}`")]
    UnsupportedAlgorithm(String),
    #[error("failed to compute {algorithm} digest of {subject}")]
    Io {
        algorithm: HashAlgorithm,
        subject: String,
        #[source]
        source: io::Error,
    },
}

/// Digest everything `reader` yields. The reader is consumed and dropped
/// before returning, whether hashing succeeded or not.
pub fn digest_reader<R: Read>(reader: R, algorithm: HashAlgorithm) -> Result<String, HashError> {
    digest_named(reader, algorithm, "stream")
}

/// Digest the file at `path`.
pub fn digest_file(path: &Path, algorithm: HashAlgorithm) -> Result<String, HashError> {
    let subject = path.display().to_string();
    let file = File::open(path).map_err(|source| HashError::Io {
        algorithm,
        subject: subject.clone(),
        source,
    })?;
    digest_named(file, algorithm, &subject)
}

pub fn digest_bytes(bytes: &[u8], algorithm: HashAlgorithm) -> String {
    match algorithm {
        HashAlgorithm::Md5 => hex::encode(Md5::digest(bytes)),
        HashAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
        HashAlgorithm::Sha512 => hex::encode(Sha512::digest(bytes)),
    }
}

fn digest_named<R: Read>(
    mut reader: R,
    algorithm: HashAlgorithm,
    subject: &str,
) -> Result<String, HashError> {
    let result = match algorithm {
        HashAlgorithm::Md5 => stream_digest::<Md5, _>(&mut reader),
        HashAlgorithm::Sha256 => stream_digest::<Sha256, _>(&mut reader),
        HashAlgorithm::Sha512 => stream_digest::<Sha512, _>(&mut reader),
    };
    drop(reader);
    result.map_err(|source| HashError::Io {
        algorithm,
        subject: subject.to_string(),
        source,
    })
}

fn stream_digest<D: Digest, R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let count = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(count) => count,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        hasher.update(&buf[..count]);
    }
    Ok(hex::encode(hasher.finalize()))
}
