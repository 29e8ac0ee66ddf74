// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Acl rule file.
//!
//! Line format:
//! ```txt
//! # general rules apply to every client
//! topic read $SYS/#
//! topic readwrite sensors/public/#
//!
//! # rules after a `user` line apply to that username only
//! user alice
//! topic write sensors/alice/#
//! ```
//! `topic <filter>` without an access word means readwrite. Subscribe and
//! unsubscribe requests are checked against the read permission.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::{AccessType, Verdict};
use crate::error::{Error, ErrorKind};
use crate::topic;

#[derive(Debug, Clone)]
struct AclRule {
    /// `None` applies to every client.
    username: Option<String>,
    filter: String,
    read: bool,
    write: bool,
}

impl AclRule {
    fn grants(&self, access: AccessType) -> bool {
        match access {
            AccessType::Write => self.write,
            AccessType::Read | AccessType::Subscribe | AccessType::Unsubscribe => self.read,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct AclRules {
    rules: Vec<AclRule>,
}

impl AclRules {
    /// Parse an acl file.
    ///
    /// # Errors
    ///
    /// Returns an `IoError` if the file cannot be read and a `FormatError`
    /// for lines that are not comments, `user` lines or `topic` lines.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let fd = File::open(path.as_ref())?;
        let reader = BufReader::new(fd);
        let mut rules = Vec::new();
        let mut current_user: Option<String> = None;

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(username) = line.strip_prefix("user ") {
                let username = username.trim();
                if username.is_empty() {
                    return Err(Error::from_string(
                        ErrorKind::FormatError,
                        format!("Empty username in acl line: {line:?}"),
                    ));
                }
                current_user = Some(username.to_string());
            } else if let Some(rest) = line.strip_prefix("topic ") {
                let rule = Self::parse_topic_rule(rest.trim(), current_user.as_deref())?;
                rules.push(rule);
            } else {
                return Err(Error::from_string(
                    ErrorKind::FormatError,
                    format!("Invalid acl line: {line:?}"),
                ));
            }
        }

        Ok(Self { rules })
    }

    fn parse_topic_rule(rest: &str, username: Option<&str>) -> Result<AclRule, Error> {
        let (read, write, filter) = match rest.split_once(' ') {
            Some(("read", filter)) => (true, false, filter),
            Some(("write", filter)) => (false, true, filter),
            Some(("readwrite", filter)) => (true, true, filter),
            _ => (true, true, rest),
        };
        let filter = filter.trim();
        topic::tokenize_filter(filter)?;
        Ok(AclRule {
            username: username.map(ToString::to_string),
            filter: filter.to_string(),
            read,
            write,
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate the rule set for one access.
    ///
    /// With rules present, access is denied unless some applicable rule
    /// grants it.
    #[must_use]
    pub fn check(&self, username: Option<&str>, topic_name: &str, access: AccessType) -> Verdict {
        if self.rules.is_empty() {
            return Verdict::Defer;
        }
        for rule in &self.rules {
            if let Some(rule_user) = &rule.username {
                if username != Some(rule_user.as_str()) {
                    continue;
                }
            }
            if rule.grants(access) && topic::filter_matches(&rule.filter, topic_name) {
                return Verdict::Allow;
            }
        }
        Verdict::Deny
    }
}
