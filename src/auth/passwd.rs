// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Hashed password entries.
//!
//! One line per user in the password file:
//! `username:$6$<base64 salt>$<base64 sha512(password + salt)>`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use openssl::hash::{Hasher, MessageDigest};
use rand::Rng;

use crate::error::{Error, ErrorKind};

pub const SALT_LEN: usize = 12;
pub const HASH_LEN: usize = 64;

/// Hash-type tag in the entry format. Only sha512 entries exist.
const HASH_TAG: &str = "6";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passwd {
    salt: [u8; SALT_LEN],
    hash: Vec<u8>,
}

impl Passwd {
    /// Hash a new password with a random salt.
    ///
    /// # Errors
    ///
    /// Returns an error if the digest backend fails.
    pub fn generate(password: &[u8]) -> Result<Self, Error> {
        let salt: [u8; SALT_LEN] = rand::rng().random();
        let hash = Self::digest(password, &salt)?;
        Ok(Self { salt, hash })
    }

    fn digest(password: &[u8], salt: &[u8]) -> Result<Vec<u8>, Error> {
        let mut hasher = Hasher::new(MessageDigest::sha512())?;
        hasher.update(password)?;
        hasher.update(salt)?;
        Ok(hasher.finish()?.to_vec())
    }

    #[must_use]
    pub fn matches(&self, password: &[u8]) -> bool {
        Self::digest(password, &self.salt).is_ok_and(|hash| hash == self.hash)
    }

    /// Serialize as a password-file line.
    #[must_use]
    pub fn dump(&self, username: &str) -> String {
        format!(
            "{}:${}${}${}",
            username,
            HASH_TAG,
            STANDARD.encode(self.salt),
            STANDARD.encode(&self.hash)
        )
    }

    /// Parse one password-file line.
    ///
    /// Returns `Ok(None)` for empty and comment lines.
    ///
    /// # Errors
    ///
    /// Returns a `FormatError` for anything else that is not a
    /// `username:$6$salt$hash` entry.
    pub fn parse(line: &str) -> Result<Option<(&str, Self)>, Error> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let Some((username, rest)) = line.split_once(':') else {
            return Err(Error::from_string(
                ErrorKind::FormatError,
                format!("Invalid password entry: {line:?}"),
            ));
        };
        if username.is_empty() {
            return Err(Error::from_string(
                ErrorKind::FormatError,
                format!("Username is empty in entry: {line:?}"),
            ));
        }

        let parts: Vec<&str> = rest.split('$').collect();
        if parts.len() != 4 || !parts[0].is_empty() || parts[1] != HASH_TAG {
            return Err(Error::from_string(
                ErrorKind::FormatError,
                format!("Unsupported password hash in entry: {line:?}"),
            ));
        }
        let salt_bytes = STANDARD.decode(parts[2]).map_err(|err| {
            Error::from_string(
                ErrorKind::FormatError,
                format!("Invalid salt in entry {line:?}, err: {err}"),
            )
        })?;
        if salt_bytes.len() != SALT_LEN {
            return Err(Error::from_string(
                ErrorKind::FormatError,
                format!("Invalid salt length in entry: {line:?}"),
            ));
        }
        let hash = STANDARD.decode(parts[3]).map_err(|err| {
            Error::from_string(
                ErrorKind::FormatError,
                format!("Invalid hash in entry {line:?}, err: {err}"),
            )
        })?;
        if hash.len() != HASH_LEN {
            return Err(Error::from_string(
                ErrorKind::FormatError,
                format!("Invalid hash length in entry: {line:?}"),
            ));
        }

        let mut salt = [0_u8; SALT_LEN];
        salt.copy_from_slice(&salt_bytes);
        Ok(Some((username, Self { salt, hash })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_match() {
        let passwd = Passwd::generate(b"hunter2").unwrap();
        assert!(passwd.matches(b"hunter2"));
        assert!(!passwd.matches(b"hunter3"));
    }

    #[test]
    fn test_dump_parse_round_trip() {
        let passwd = Passwd::generate(b"secret").unwrap();
        let line = passwd.dump("alice");
        let (username, parsed) = Passwd::parse(&line).unwrap().unwrap();
        assert_eq!(username, "alice");
        assert_eq!(parsed, passwd);
        assert!(parsed.matches(b"secret"));
    }

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        assert!(Passwd::parse("").unwrap().is_none());
        assert!(Passwd::parse("# password file").unwrap().is_none());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Passwd::parse("no-colon-here").is_err());
        assert!(Passwd::parse(":$6$a$b").is_err());
        assert!(Passwd::parse("alice:plaintext").is_err());
        assert!(Passwd::parse("alice:$1$a$b").is_err());
    }
}
