// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Built-in default authorizer backed by plain files.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use super::acl_file::AclRules;
use super::passwd::Passwd;
use super::{
    AccessType, AclMessage, AuthOption, Authorizer, Capabilities, PskVerdict, Verdict,
};
use crate::config;
use crate::error::{Error, ErrorKind};
use crate::session::Session;

/// File-backed default security.
///
/// Always the first stage of every chain. Each capability defers when its
/// file is not configured, so a broker without any of the three files
/// delegates everything to the plugin chain.
#[derive(Debug, Default)]
pub struct DefaultSecurity {
    allow_anonymous: bool,
    password_file: Option<PathBuf>,
    acl_file: Option<PathBuf>,
    psk_file: Option<PathBuf>,

    users: BTreeMap<String, Passwd>,
    acls: AclRules,
    psk_keys: HashMap<String, String>,
}

impl DefaultSecurity {
    #[must_use]
    pub fn new(security: &config::Security) -> Self {
        Self {
            allow_anonymous: security.allow_anonymous(),
            password_file: security.password_file().map(Path::to_path_buf),
            acl_file: security.acl_file().map(Path::to_path_buf),
            psk_file: security.psk_file().map(Path::to_path_buf),
            users: BTreeMap::new(),
            acls: AclRules::default(),
            psk_keys: HashMap::new(),
        }
    }

    fn load_password_file(&mut self, path: &Path) -> Result<(), Error> {
        let fd = File::open(path).map_err(|err| {
            Error::from_string(
                ErrorKind::ConfigError,
                format!("Invalid password file: {path:?}, err: {err}"),
            )
        })?;
        let reader = BufReader::new(fd);
        let mut users = BTreeMap::new();
        for line in reader.lines() {
            let line = line?;
            if let Some((username, passwd)) = Passwd::parse(&line)? {
                users.insert(username.to_string(), passwd);
            }
        }
        self.users = users;
        Ok(())
    }

    fn load_psk_file(&mut self, path: &Path) -> Result<(), Error> {
        let fd = File::open(path).map_err(|err| {
            Error::from_string(
                ErrorKind::ConfigError,
                format!("Invalid psk file: {path:?}, err: {err}"),
            )
        })?;
        let reader = BufReader::new(fd);
        let mut psk_keys = HashMap::new();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((identity, key)) = line.split_once(':') else {
                return Err(Error::from_string(
                    ErrorKind::FormatError,
                    format!("Invalid psk entry: {line:?}"),
                ));
            };
            if identity.is_empty() || key.is_empty() {
                return Err(Error::from_string(
                    ErrorKind::FormatError,
                    format!("Invalid psk entry: {line:?}"),
                ));
            }
            psk_keys.insert(identity.to_string(), key.to_string());
        }
        self.psk_keys = psk_keys;
        Ok(())
    }
}

impl Authorizer for DefaultSecurity {
    fn name(&self) -> &str {
        "default"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            acl: self.acl_file.is_some(),
            unpwd: self.password_file.is_some(),
            psk: self.psk_file.is_some(),
            extended_auth: false,
        }
    }

    fn security_init(&mut self, _options: &[AuthOption], reload: bool) -> Result<(), Error> {
        if let Some(path) = self.password_file.clone() {
            log::info!("default security: Loading password file {path:?}, reload: {reload}");
            self.load_password_file(&path)?;
        }
        if let Some(path) = self.acl_file.clone() {
            log::info!("default security: Loading acl file {path:?}, reload: {reload}");
            self.acls = AclRules::load(&path)?;
        }
        if let Some(path) = self.psk_file.clone() {
            log::info!("default security: Loading psk file {path:?}, reload: {reload}");
            self.load_psk_file(&path)?;
        }
        Ok(())
    }

    fn security_cleanup(&mut self, _options: &[AuthOption], _reload: bool) -> Result<(), Error> {
        self.users.clear();
        self.acls = AclRules::default();
        self.psk_keys.clear();
        Ok(())
    }

    fn acl_check(
        &self,
        session: &Session,
        msg: &AclMessage,
        access: AccessType,
    ) -> Result<Verdict, Error> {
        Ok(self.acls.check(session.username(), msg.topic, access))
    }

    fn unpwd_check(
        &self,
        _session: &Session,
        username: Option<&str>,
        password: Option<&[u8]>,
    ) -> Result<Verdict, Error> {
        if self.password_file.is_none() {
            return Ok(Verdict::Defer);
        }
        let Some(username) = username else {
            return if self.allow_anonymous {
                Ok(Verdict::Defer)
            } else {
                Ok(Verdict::Deny)
            };
        };
        match self.users.get(username) {
            Some(passwd) => {
                if password.is_some_and(|password| passwd.matches(password)) {
                    Ok(Verdict::Allow)
                } else {
                    Ok(Verdict::Deny)
                }
            }
            None => Ok(Verdict::Deny),
        }
    }

    fn psk_key_get(
        &self,
        _session: &Session,
        _hint: &str,
        identity: &str,
    ) -> Result<PskVerdict, Error> {
        match self.psk_keys.get(identity) {
            Some(key) => Ok(PskVerdict::Key(key.clone())),
            None => Ok(PskVerdict::Defer),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::codec::QoS;
    use crate::types::Protocol;

    fn security_with_password_file(allow_anonymous: bool) -> DefaultSecurity {
        let passwd = Passwd::generate(b"hunter2").unwrap();
        let path = std::env::temp_dir().join(format!("luoshen-passwd-{allow_anonymous}"));
        let mut fd = File::create(&path).unwrap();
        writeln!(fd, "{}", passwd.dump("alice")).unwrap();

        let config: config::Security = toml::from_str(&format!(
            "allow_anonymous = {}\npassword_file = \"{}\"\n",
            allow_anonymous,
            path.display()
        ))
        .unwrap();
        let mut security = DefaultSecurity::new(&config);
        security.security_init(&[], false).unwrap();
        security
    }

    #[test]
    fn test_unpwd_check_against_file() {
        let security = security_with_password_file(true);
        let session = Session::new("client-1", Protocol::V311);

        assert_eq!(
            security
                .unpwd_check(&session, Some("alice"), Some(b"hunter2"))
                .unwrap(),
            Verdict::Allow
        );
        assert_eq!(
            security
                .unpwd_check(&session, Some("alice"), Some(b"wrong"))
                .unwrap(),
            Verdict::Deny
        );
        assert_eq!(
            security
                .unpwd_check(&session, Some("mallory"), Some(b"hunter2"))
                .unwrap(),
            Verdict::Deny
        );
        assert_eq!(
            security.unpwd_check(&session, None, None).unwrap(),
            Verdict::Defer
        );
    }

    #[test]
    fn test_unpwd_check_anonymous_denied() {
        let security = security_with_password_file(false);
        let session = Session::new("client-1", Protocol::V311);
        assert_eq!(
            security.unpwd_check(&session, None, None).unwrap(),
            Verdict::Deny
        );
    }

    #[test]
    fn test_no_files_defer_everything() {
        let security = DefaultSecurity::default();
        let session = Session::new("client-1", Protocol::V311);
        let msg = AclMessage {
            topic: "sensors/temp",
            payload: b"20",
            qos: QoS::AtMostOnce,
            retain: false,
        };
        assert_eq!(
            security.acl_check(&session, &msg, AccessType::Read).unwrap(),
            Verdict::Defer
        );
        assert_eq!(
            security.unpwd_check(&session, Some("alice"), None).unwrap(),
            Verdict::Defer
        );
        assert_eq!(
            security.psk_key_get(&session, "hint", "dev-1").unwrap(),
            PskVerdict::Defer
        );
    }
}
