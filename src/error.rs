// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fmt::{self, Display};
use std::io;
use tokio::sync::mpsc;

use crate::codec::DecodeError;
use crate::commands::ListenerToDispatcherCmd;

/// Represent the types of errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed topic or filter, or a session field required by the
    /// operation is missing.
    InvalidInput,

    /// Authorization explicitly denied.
    AclDenied,

    /// Credential or PSK check denied, or every stage deferred.
    AuthFailed,

    /// Extended auth requested on a chain without start/continue capability.
    NotSupported,

    /// Remote peer answered with a reason code that has no recovery path.
    ProtocolError,

    /// Plugin failed to load, resolve, initialize, or returned an
    /// unexpected code.
    PluginError,

    /// Packet decode error.
    DecodeError,

    /// Invalid config options.
    ConfigError,

    /// Failed to init logger.
    LoggerError,

    /// Malformed entry in password/acl/psk files.
    FormatError,

    /// Crypto backend failed while hashing or generating salts.
    CryptoError,

    /// Error occurred while performing I/O.
    IoError,

    /// mpsc channel error.
    ChannelError,
}

#[derive(Clone, Debug)]
pub struct Error {
    /// Type of current error.
    kind: ErrorKind,

    /// Detail message about this error.
    message: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_owned(),
        }
    }

    #[must_use]
    pub fn from_string(kind: ErrorKind, message: String) -> Self {
        Self { kind, message }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::from_string(ErrorKind::IoError, format!("IoError {err}"))
    }
}

impl From<openssl::error::ErrorStack> for Error {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Self::from_string(ErrorKind::CryptoError, format!("Openssl error: {err}"))
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Self::from_string(ErrorKind::DecodeError, format!("{err:?}"))
    }
}

macro_rules! convert_send_error {
    ($cmd_type: ident) => {
        impl From<mpsc::error::SendError<$cmd_type>> for Error {
            fn from(err: mpsc::error::SendError<$cmd_type>) -> Self {
                Error::from_string(
                    ErrorKind::ChannelError,
                    format!("$cmd_type channel error: {}", err),
                )
            }
        }
    };
}

convert_send_error!(ListenerToDispatcherCmd);
