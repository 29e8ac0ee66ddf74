// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! C ABI of authorizer plugins, versions 2 to 4.
//!
//! A plugin is a shared object exporting `luoshen_auth_plugin_version()`
//! plus the entry points of the version it declares. The version decides
//! the shape of the option struct and which entry points are required:
//!
//! - v2: all six entry points required, options use [`RawAuthOption`],
//!   acl checks never see SUBSCRIBE access.
//! - v3: same entry points as v2 with [`RawOption`] options and
//!   struct-based client/message arguments.
//! - v4: unpwd/psk entry points optional, extended auth available through
//!   `luoshen_auth_start`/`luoshen_auth_continue` (both or neither).
//!
//! Whatever the version, the rest of the broker sees a plain
//! [`Authorizer`].

use libloading::Library;
use std::ffi::{c_char, c_int, c_long, c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::ptr;

use crate::auth::{
    AccessType, AclMessage, AuthOption, Authorizer, Capabilities, ExtendedAuthOutcome,
    PskVerdict, Verdict,
};
use crate::error::{Error, ErrorKind};
use crate::session::Session;

/// Return codes shared with plugins.
pub const RC_SUCCESS: c_int = 0;
pub const RC_NOMEM: c_int = 1;
pub const RC_NOT_SUPPORTED: c_int = 10;
pub const RC_AUTH: c_int = 11;
pub const RC_ACL_DENIED: c_int = 12;
pub const RC_PLUGIN_DEFER: c_int = 17;
pub const RC_AUTH_CONTINUE: c_int = 18;

/// Access values shared with plugins.
pub const ACCESS_READ: c_int = 1;
pub const ACCESS_WRITE: c_int = 2;
pub const ACCESS_SUBSCRIBE: c_int = 4;
pub const ACCESS_UNSUBSCRIBE: c_int = 8;

/// Largest PSK key a plugin may return, in hex characters.
const PSK_MAX_KEY_LEN: usize = 256;

/// Option struct of the v2 ABI.
#[repr(C)]
pub struct RawAuthOption {
    pub key: *const c_char,
    pub value: *const c_char,
}

/// Option struct of the v3/v4 ABI.
#[repr(C)]
pub struct RawOption {
    pub key: *const c_char,
    pub value: *const c_char,
}

/// Client identity passed to v3/v4 entry points.
#[repr(C)]
pub struct RawClient {
    pub id: *const c_char,
    pub username: *const c_char,
}

/// Message passed to v3/v4 acl checks.
#[repr(C)]
pub struct RawAclMessage {
    pub topic: *const c_char,
    pub payload: *const c_void,
    pub payload_len: c_long,
    pub qos: c_int,
    pub retain: bool,
}

type VersionFn = unsafe extern "C" fn() -> c_int;

type InitV2Fn = unsafe extern "C" fn(*mut *mut c_void, *const RawAuthOption, c_int) -> c_int;
type CleanupV2Fn = unsafe extern "C" fn(*mut c_void, *const RawAuthOption, c_int) -> c_int;
type SecurityInitV2Fn =
    unsafe extern "C" fn(*mut c_void, *const RawAuthOption, c_int, bool) -> c_int;
type SecurityCleanupV2Fn =
    unsafe extern "C" fn(*mut c_void, *const RawAuthOption, c_int, bool) -> c_int;
type AclCheckV2Fn = unsafe extern "C" fn(
    *mut c_void,
    *const c_char,
    *const c_char,
    *const c_char,
    c_int,
) -> c_int;
type UnpwdCheckV2Fn = unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char) -> c_int;
type PskKeyGetV2Fn = unsafe extern "C" fn(
    *mut c_void,
    *const c_char,
    *const c_char,
    *mut c_char,
    c_int,
) -> c_int;

type InitV3Fn = unsafe extern "C" fn(*mut *mut c_void, *const RawOption, c_int) -> c_int;
type CleanupV3Fn = unsafe extern "C" fn(*mut c_void, *const RawOption, c_int) -> c_int;
type SecurityInitV3Fn = unsafe extern "C" fn(*mut c_void, *const RawOption, c_int, bool) -> c_int;
type SecurityCleanupV3Fn =
    unsafe extern "C" fn(*mut c_void, *const RawOption, c_int, bool) -> c_int;
type AclCheckV3Fn =
    unsafe extern "C" fn(*mut c_void, c_int, *const RawClient, *const RawAclMessage) -> c_int;
type UnpwdCheckV3Fn =
    unsafe extern "C" fn(*mut c_void, *const RawClient, *const c_char, *const c_char) -> c_int;
type PskKeyGetV3Fn = unsafe extern "C" fn(
    *mut c_void,
    *const RawClient,
    *const c_char,
    *const c_char,
    *mut c_char,
    c_int,
) -> c_int;
type AuthStartFn = unsafe extern "C" fn(
    *mut c_void,
    *const RawClient,
    *const c_char,
    bool,
    *const c_void,
    u16,
    *mut *const c_void,
    *mut u16,
) -> c_int;
type AuthContinueFn = unsafe extern "C" fn(
    *mut c_void,
    *const RawClient,
    *const c_char,
    *const c_void,
    u16,
    *mut *const c_void,
    *mut u16,
) -> c_int;

const SYM_VERSION: &[u8] = b"luoshen_auth_plugin_version\0";
const SYM_INIT: &[u8] = b"luoshen_auth_plugin_init\0";
const SYM_CLEANUP: &[u8] = b"luoshen_auth_plugin_cleanup\0";
const SYM_SECURITY_INIT: &[u8] = b"luoshen_auth_security_init\0";
const SYM_SECURITY_CLEANUP: &[u8] = b"luoshen_auth_security_cleanup\0";
const SYM_ACL_CHECK: &[u8] = b"luoshen_auth_acl_check\0";
const SYM_UNPWD_CHECK: &[u8] = b"luoshen_auth_unpwd_check\0";
const SYM_PSK_KEY_GET: &[u8] = b"luoshen_auth_psk_key_get\0";
const SYM_AUTH_START: &[u8] = b"luoshen_auth_start\0";
const SYM_AUTH_CONTINUE: &[u8] = b"luoshen_auth_continue\0";

struct EntryV2 {
    init: InitV2Fn,
    cleanup: CleanupV2Fn,
    security_init: SecurityInitV2Fn,
    security_cleanup: SecurityCleanupV2Fn,
    acl_check: AclCheckV2Fn,
    unpwd_check: UnpwdCheckV2Fn,
    psk_key_get: PskKeyGetV2Fn,
}

struct EntryV3 {
    init: InitV3Fn,
    cleanup: CleanupV3Fn,
    security_init: SecurityInitV3Fn,
    security_cleanup: SecurityCleanupV3Fn,
    acl_check: AclCheckV3Fn,
    unpwd_check: UnpwdCheckV3Fn,
    psk_key_get: PskKeyGetV3Fn,
}

struct EntryV4 {
    init: InitV3Fn,
    cleanup: CleanupV3Fn,
    security_init: SecurityInitV3Fn,
    security_cleanup: SecurityCleanupV3Fn,
    acl_check: AclCheckV3Fn,
    unpwd_check: Option<UnpwdCheckV3Fn>,
    psk_key_get: Option<PskKeyGetV3Fn>,
    auth_start: Option<AuthStartFn>,
    auth_continue: Option<AuthContinueFn>,
}

enum VersionedEntry {
    V2(EntryV2),
    V3(EntryV3),
    V4(EntryV4),
}

/// A loaded shared-object plugin.
pub struct DylibPlugin {
    path: PathBuf,
    name: String,
    entry: VersionedEntry,
    user_data: *mut c_void,
    _lib: Library,
}

// user_data is only dereferenced by the plugin itself and every call runs
// on the event-loop thread that owns the pipeline.
unsafe impl Send for DylibPlugin {}

fn plugin_error(path: &Path, message: &str) -> Error {
    Error::from_string(
        ErrorKind::PluginError,
        format!("Auth plugin {path:?}: {message}"),
    )
}

fn required_fn<T: Copy>(lib: &Library, name: &'static [u8], path: &Path) -> Result<T, Error> {
    match unsafe { lib.get::<T>(name) } {
        Ok(symbol) => Ok(*symbol),
        Err(err) => Err(plugin_error(
            path,
            &format!(
                "unable to load function {}, err: {err}",
                String::from_utf8_lossy(&name[..name.len() - 1])
            ),
        )),
    }
}

fn optional_fn<T: Copy>(lib: &Library, name: &'static [u8]) -> Option<T> {
    unsafe { lib.get::<T>(name) }.ok().map(|symbol| *symbol)
}

fn to_cstring(value: &str, what: &str) -> Result<CString, Error> {
    CString::new(value).map_err(|_| {
        Error::from_string(
            ErrorKind::InvalidInput,
            format!("{what} contains a nul byte"),
        )
    })
}

fn option_cstrings(options: &[AuthOption]) -> Result<Vec<(CString, CString)>, Error> {
    options
        .iter()
        .map(|option| {
            Ok((
                to_cstring(&option.key, "plugin option key")?,
                to_cstring(&option.value, "plugin option value")?,
            ))
        })
        .collect()
}

const fn access_value(access: AccessType) -> c_int {
    match access {
        AccessType::Read => ACCESS_READ,
        AccessType::Write => ACCESS_WRITE,
        AccessType::Subscribe => ACCESS_SUBSCRIBE,
        AccessType::Unsubscribe => ACCESS_UNSUBSCRIBE,
    }
}

fn acl_verdict(rc: c_int, path: &Path) -> Result<Verdict, Error> {
    match rc {
        RC_SUCCESS => Ok(Verdict::Allow),
        RC_ACL_DENIED => Ok(Verdict::Deny),
        RC_PLUGIN_DEFER => Ok(Verdict::Defer),
        rc => Err(plugin_error(path, &format!("acl check returned {rc}"))),
    }
}

fn unpwd_verdict(rc: c_int, path: &Path) -> Result<Verdict, Error> {
    match rc {
        RC_SUCCESS => Ok(Verdict::Allow),
        RC_AUTH => Ok(Verdict::Deny),
        RC_PLUGIN_DEFER => Ok(Verdict::Defer),
        rc => Err(plugin_error(path, &format!("unpwd check returned {rc}"))),
    }
}

impl DylibPlugin {
    /// Load a plugin shared object and resolve the entry points of the
    /// version it declares.
    ///
    /// # Errors
    ///
    /// Returns a `PluginError` if the library cannot be opened, the version
    /// symbol is missing, the version is unknown, a required entry point is
    /// absent, or a v4 plugin exports only one of the extended-auth pair.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let lib = unsafe { Library::new(path) }
            .map_err(|err| plugin_error(path, &format!("unable to load, err: {err}")))?;

        let version_fn: VersionFn = required_fn(&lib, SYM_VERSION, path)?;
        let version = unsafe { version_fn() };

        let entry = match version {
            2 => VersionedEntry::V2(Self::resolve_v2(&lib, path)?),
            3 => VersionedEntry::V3(Self::resolve_v3(&lib, path)?),
            4 => VersionedEntry::V4(Self::resolve_v4(&lib, path)?),
            version => {
                return Err(plugin_error(
                    path,
                    &format!("incorrect plugin version (got {version}, expected 2, 3 or 4)"),
                ));
            }
        };

        let name = path
            .file_stem()
            .map_or_else(|| "plugin".to_string(), |stem| stem.to_string_lossy().to_string());

        Ok(Self {
            path: path.to_path_buf(),
            name,
            entry,
            user_data: ptr::null_mut(),
            _lib: lib,
        })
    }

    fn resolve_v2(lib: &Library, path: &Path) -> Result<EntryV2, Error> {
        Ok(EntryV2 {
            init: required_fn(lib, SYM_INIT, path)?,
            cleanup: required_fn(lib, SYM_CLEANUP, path)?,
            security_init: required_fn(lib, SYM_SECURITY_INIT, path)?,
            security_cleanup: required_fn(lib, SYM_SECURITY_CLEANUP, path)?,
            acl_check: required_fn(lib, SYM_ACL_CHECK, path)?,
            unpwd_check: required_fn(lib, SYM_UNPWD_CHECK, path)?,
            psk_key_get: required_fn(lib, SYM_PSK_KEY_GET, path)?,
        })
    }

    fn resolve_v3(lib: &Library, path: &Path) -> Result<EntryV3, Error> {
        Ok(EntryV3 {
            init: required_fn(lib, SYM_INIT, path)?,
            cleanup: required_fn(lib, SYM_CLEANUP, path)?,
            security_init: required_fn(lib, SYM_SECURITY_INIT, path)?,
            security_cleanup: required_fn(lib, SYM_SECURITY_CLEANUP, path)?,
            acl_check: required_fn(lib, SYM_ACL_CHECK, path)?,
            unpwd_check: required_fn(lib, SYM_UNPWD_CHECK, path)?,
            psk_key_get: required_fn(lib, SYM_PSK_KEY_GET, path)?,
        })
    }

    fn resolve_v4(lib: &Library, path: &Path) -> Result<EntryV4, Error> {
        let unpwd_check: Option<UnpwdCheckV3Fn> = optional_fn(lib, SYM_UNPWD_CHECK);
        if unpwd_check.is_some() {
            log::info!(" ├── Username/password checking enabled.");
        } else {
            log::info!(" ├── Username/password checking not enabled.");
        }

        let psk_key_get: Option<PskKeyGetV3Fn> = optional_fn(lib, SYM_PSK_KEY_GET);
        if psk_key_get.is_some() {
            log::info!(" ├── TLS-PSK checking enabled.");
        } else {
            log::info!(" ├── TLS-PSK checking not enabled.");
        }

        let auth_start: Option<AuthStartFn> = optional_fn(lib, SYM_AUTH_START);
        let auth_continue: Option<AuthContinueFn> = optional_fn(lib, SYM_AUTH_CONTINUE);
        match (auth_start.is_some(), auth_continue.is_some()) {
            (true, true) => log::info!(" └── Extended authentication enabled."),
            (false, false) => log::info!(" └── Extended authentication not enabled."),
            (true, false) => {
                return Err(plugin_error(path, "missing luoshen_auth_continue() function"));
            }
            (false, true) => {
                return Err(plugin_error(path, "missing luoshen_auth_start() function"));
            }
        }

        Ok(EntryV4 {
            init: required_fn(lib, SYM_INIT, path)?,
            cleanup: required_fn(lib, SYM_CLEANUP, path)?,
            security_init: required_fn(lib, SYM_SECURITY_INIT, path)?,
            security_cleanup: required_fn(lib, SYM_SECURITY_CLEANUP, path)?,
            acl_check: required_fn(lib, SYM_ACL_CHECK, path)?,
            unpwd_check,
            psk_key_get,
            auth_start,
            auth_continue,
        })
    }

    fn check_rc(&self, rc: c_int, operation: &str) -> Result<(), Error> {
        if rc == RC_SUCCESS {
            Ok(())
        } else {
            Err(plugin_error(
                &self.path,
                &format!("returned {rc} on {operation}"),
            ))
        }
    }
}

impl Authorizer for DylibPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        match &self.entry {
            VersionedEntry::V2(_) | VersionedEntry::V3(_) => Capabilities {
                acl: true,
                unpwd: true,
                psk: true,
                extended_auth: false,
            },
            VersionedEntry::V4(entry) => Capabilities {
                acl: true,
                unpwd: entry.unpwd_check.is_some(),
                psk: entry.psk_key_get.is_some(),
                extended_auth: entry.auth_start.is_some(),
            },
        }
    }

    fn plugin_init(&mut self, options: &[AuthOption]) -> Result<(), Error> {
        let pairs = option_cstrings(options)?;
        let rc = match &self.entry {
            VersionedEntry::V2(entry) => {
                let raw: Vec<RawAuthOption> = pairs
                    .iter()
                    .map(|(key, value)| RawAuthOption {
                        key: key.as_ptr(),
                        value: value.as_ptr(),
                    })
                    .collect();
                unsafe { (entry.init)(&mut self.user_data, raw.as_ptr(), raw.len() as c_int) }
            }
            VersionedEntry::V3(EntryV3 { init, .. }) | VersionedEntry::V4(EntryV4 { init, .. }) => {
                let raw: Vec<RawOption> = pairs
                    .iter()
                    .map(|(key, value)| RawOption {
                        key: key.as_ptr(),
                        value: value.as_ptr(),
                    })
                    .collect();
                unsafe { (*init)(&mut self.user_data, raw.as_ptr(), raw.len() as c_int) }
            }
        };
        self.check_rc(rc, "init")
    }

    fn plugin_cleanup(&mut self, options: &[AuthOption]) -> Result<(), Error> {
        let pairs = option_cstrings(options)?;
        let rc = match &self.entry {
            VersionedEntry::V2(entry) => {
                let raw: Vec<RawAuthOption> = pairs
                    .iter()
                    .map(|(key, value)| RawAuthOption {
                        key: key.as_ptr(),
                        value: value.as_ptr(),
                    })
                    .collect();
                unsafe { (entry.cleanup)(self.user_data, raw.as_ptr(), raw.len() as c_int) }
            }
            VersionedEntry::V3(EntryV3 { cleanup, .. })
            | VersionedEntry::V4(EntryV4 { cleanup, .. }) => {
                let raw: Vec<RawOption> = pairs
                    .iter()
                    .map(|(key, value)| RawOption {
                        key: key.as_ptr(),
                        value: value.as_ptr(),
                    })
                    .collect();
                unsafe { (*cleanup)(self.user_data, raw.as_ptr(), raw.len() as c_int) }
            }
        };
        self.check_rc(rc, "cleanup")
    }

    fn security_init(&mut self, options: &[AuthOption], reload: bool) -> Result<(), Error> {
        let pairs = option_cstrings(options)?;
        let rc = match &self.entry {
            VersionedEntry::V2(entry) => {
                let raw: Vec<RawAuthOption> = pairs
                    .iter()
                    .map(|(key, value)| RawAuthOption {
                        key: key.as_ptr(),
                        value: value.as_ptr(),
                    })
                    .collect();
                unsafe {
                    (entry.security_init)(self.user_data, raw.as_ptr(), raw.len() as c_int, reload)
                }
            }
            VersionedEntry::V3(EntryV3 { security_init, .. })
            | VersionedEntry::V4(EntryV4 { security_init, .. }) => {
                let raw: Vec<RawOption> = pairs
                    .iter()
                    .map(|(key, value)| RawOption {
                        key: key.as_ptr(),
                        value: value.as_ptr(),
                    })
                    .collect();
                unsafe { (*security_init)(self.user_data, raw.as_ptr(), raw.len() as c_int, reload) }
            }
        };
        self.check_rc(rc, "security init")
    }

    fn security_cleanup(&mut self, options: &[AuthOption], reload: bool) -> Result<(), Error> {
        let pairs = option_cstrings(options)?;
        let rc = match &self.entry {
            VersionedEntry::V2(entry) => {
                let raw: Vec<RawAuthOption> = pairs
                    .iter()
                    .map(|(key, value)| RawAuthOption {
                        key: key.as_ptr(),
                        value: value.as_ptr(),
                    })
                    .collect();
                unsafe {
                    (entry.security_cleanup)(
                        self.user_data,
                        raw.as_ptr(),
                        raw.len() as c_int,
                        reload,
                    )
                }
            }
            VersionedEntry::V3(EntryV3 {
                security_cleanup, ..
            })
            | VersionedEntry::V4(EntryV4 {
                security_cleanup, ..
            }) => {
                let raw: Vec<RawOption> = pairs
                    .iter()
                    .map(|(key, value)| RawOption {
                        key: key.as_ptr(),
                        value: value.as_ptr(),
                    })
                    .collect();
                unsafe {
                    (*security_cleanup)(self.user_data, raw.as_ptr(), raw.len() as c_int, reload)
                }
            }
        };
        self.check_rc(rc, "security cleanup")
    }

    fn acl_check(
        &self,
        session: &Session,
        msg: &AclMessage,
        access: AccessType,
    ) -> Result<Verdict, Error> {
        let id = to_cstring(session.id().unwrap_or(""), "client id")?;
        let username = match session.username() {
            Some(username) => Some(to_cstring(username, "username")?),
            None => None,
        };
        let topic = to_cstring(msg.topic, "topic")?;

        let rc = match &self.entry {
            VersionedEntry::V2(entry) => {
                // The v2 ABI predates subscribe-time checks.
                if access == AccessType::Subscribe {
                    return Ok(Verdict::Allow);
                }
                unsafe {
                    (entry.acl_check)(
                        self.user_data,
                        id.as_ptr(),
                        username.as_ref().map_or(ptr::null(), |u| u.as_ptr()),
                        topic.as_ptr(),
                        access_value(access),
                    )
                }
            }
            VersionedEntry::V3(EntryV3 { acl_check, .. })
            | VersionedEntry::V4(EntryV4 { acl_check, .. }) => {
                let client = RawClient {
                    id: id.as_ptr(),
                    username: username.as_ref().map_or(ptr::null(), |u| u.as_ptr()),
                };
                let raw_msg = RawAclMessage {
                    topic: topic.as_ptr(),
                    payload: msg.payload.as_ptr().cast(),
                    payload_len: msg.payload.len() as c_long,
                    qos: msg.qos as c_int,
                    retain: msg.retain,
                };
                unsafe { (*acl_check)(self.user_data, access_value(access), &client, &raw_msg) }
            }
        };
        acl_verdict(rc, &self.path)
    }

    fn unpwd_check(
        &self,
        session: &Session,
        username: Option<&str>,
        password: Option<&[u8]>,
    ) -> Result<Verdict, Error> {
        let username_c = match username {
            Some(username) => Some(to_cstring(username, "username")?),
            None => None,
        };
        let password_c = match password {
            Some(password) => Some(
                CString::new(password).map_err(|_| {
                    Error::new(ErrorKind::InvalidInput, "password contains a nul byte")
                })?,
            ),
            None => None,
        };
        let username_ptr = username_c.as_ref().map_or(ptr::null(), |u| u.as_ptr());
        let password_ptr = password_c.as_ref().map_or(ptr::null(), |p| p.as_ptr());

        let rc = match &self.entry {
            VersionedEntry::V2(entry) => unsafe {
                (entry.unpwd_check)(self.user_data, username_ptr, password_ptr)
            },
            VersionedEntry::V3(entry) => {
                let id = to_cstring(session.id().unwrap_or(""), "client id")?;
                let client = RawClient {
                    id: id.as_ptr(),
                    username: username_ptr,
                };
                unsafe { (entry.unpwd_check)(self.user_data, &client, username_ptr, password_ptr) }
            }
            VersionedEntry::V4(entry) => {
                let Some(unpwd_check) = entry.unpwd_check else {
                    return Ok(Verdict::Defer);
                };
                let id = to_cstring(session.id().unwrap_or(""), "client id")?;
                let client = RawClient {
                    id: id.as_ptr(),
                    username: username_ptr,
                };
                unsafe { unpwd_check(self.user_data, &client, username_ptr, password_ptr) }
            }
        };
        unpwd_verdict(rc, &self.path)
    }

    fn psk_key_get(
        &self,
        session: &Session,
        hint: &str,
        identity: &str,
    ) -> Result<PskVerdict, Error> {
        let hint_c = to_cstring(hint, "psk hint")?;
        let identity_c = to_cstring(identity, "psk identity")?;
        let mut key = [0_u8; PSK_MAX_KEY_LEN];

        let rc = match &self.entry {
            VersionedEntry::V2(entry) => unsafe {
                (entry.psk_key_get)(
                    self.user_data,
                    hint_c.as_ptr(),
                    identity_c.as_ptr(),
                    key.as_mut_ptr().cast(),
                    key.len() as c_int,
                )
            },
            VersionedEntry::V3(entry) => {
                let id = to_cstring(session.id().unwrap_or(""), "client id")?;
                let client = RawClient {
                    id: id.as_ptr(),
                    username: ptr::null(),
                };
                unsafe {
                    (entry.psk_key_get)(
                        self.user_data,
                        &client,
                        hint_c.as_ptr(),
                        identity_c.as_ptr(),
                        key.as_mut_ptr().cast(),
                        key.len() as c_int,
                    )
                }
            }
            VersionedEntry::V4(entry) => {
                let Some(psk_key_get) = entry.psk_key_get else {
                    return Ok(PskVerdict::Defer);
                };
                let id = to_cstring(session.id().unwrap_or(""), "client id")?;
                let client = RawClient {
                    id: id.as_ptr(),
                    username: ptr::null(),
                };
                unsafe {
                    psk_key_get(
                        self.user_data,
                        &client,
                        hint_c.as_ptr(),
                        identity_c.as_ptr(),
                        key.as_mut_ptr().cast(),
                        key.len() as c_int,
                    )
                }
            }
        };

        match rc {
            RC_SUCCESS => {
                key[PSK_MAX_KEY_LEN - 1] = 0;
                let key = unsafe { CStr::from_ptr(key.as_ptr().cast()) };
                let key = key.to_str().map_err(|_| {
                    plugin_error(&self.path, "psk key is not valid UTF-8")
                })?;
                Ok(PskVerdict::Key(key.to_string()))
            }
            RC_AUTH => Ok(PskVerdict::Deny),
            RC_PLUGIN_DEFER => Ok(PskVerdict::Defer),
            rc => Err(plugin_error(&self.path, &format!("psk lookup returned {rc}"))),
        }
    }

    fn auth_start(
        &self,
        session: &Session,
        method: &str,
        reauth: bool,
        data_in: &[u8],
    ) -> Result<ExtendedAuthOutcome, Error> {
        let VersionedEntry::V4(entry) = &self.entry else {
            return Ok(ExtendedAuthOutcome::NotSupported);
        };
        let Some(auth_start) = entry.auth_start else {
            return Ok(ExtendedAuthOutcome::NotSupported);
        };

        let id = to_cstring(session.id().unwrap_or(""), "client id")?;
        let username = match session.username() {
            Some(username) => Some(to_cstring(username, "username")?),
            None => None,
        };
        let client = RawClient {
            id: id.as_ptr(),
            username: username.as_ref().map_or(ptr::null(), |u| u.as_ptr()),
        };
        let method_c = to_cstring(method, "auth method")?;
        let mut data_out: *const c_void = ptr::null();
        let mut data_out_len: u16 = 0;

        let rc = unsafe {
            auth_start(
                self.user_data,
                &client,
                method_c.as_ptr(),
                reauth,
                data_in.as_ptr().cast(),
                data_in.len() as u16,
                &mut data_out,
                &mut data_out_len,
            )
        };
        map_auth_outcome(rc, data_out, data_out_len, &self.path)
    }

    fn auth_continue(
        &self,
        session: &Session,
        method: &str,
        data_in: &[u8],
    ) -> Result<ExtendedAuthOutcome, Error> {
        let VersionedEntry::V4(entry) = &self.entry else {
            return Ok(ExtendedAuthOutcome::NotSupported);
        };
        let Some(auth_continue) = entry.auth_continue else {
            return Ok(ExtendedAuthOutcome::NotSupported);
        };

        let id = to_cstring(session.id().unwrap_or(""), "client id")?;
        let username = match session.username() {
            Some(username) => Some(to_cstring(username, "username")?),
            None => None,
        };
        let client = RawClient {
            id: id.as_ptr(),
            username: username.as_ref().map_or(ptr::null(), |u| u.as_ptr()),
        };
        let method_c = to_cstring(method, "auth method")?;
        let mut data_out: *const c_void = ptr::null();
        let mut data_out_len: u16 = 0;

        let rc = unsafe {
            auth_continue(
                self.user_data,
                &client,
                method_c.as_ptr(),
                data_in.as_ptr().cast(),
                data_in.len() as u16,
                &mut data_out,
                &mut data_out_len,
            )
        };
        map_auth_outcome(rc, data_out, data_out_len, &self.path)
    }
}

/// Copy plugin-owned exchange data out before the next call can clobber it.
fn map_auth_outcome(
    rc: c_int,
    data_out: *const c_void,
    data_out_len: u16,
    path: &Path,
) -> Result<ExtendedAuthOutcome, Error> {
    let data = if data_out.is_null() || data_out_len == 0 {
        Vec::new()
    } else {
        unsafe {
            std::slice::from_raw_parts(data_out.cast::<u8>(), usize::from(data_out_len)).to_vec()
        }
    };
    match rc {
        RC_SUCCESS => Ok(ExtendedAuthOutcome::Success(data)),
        RC_AUTH_CONTINUE => Ok(ExtendedAuthOutcome::Continue(data)),
        RC_NOT_SUPPORTED => Ok(ExtendedAuthOutcome::NotSupported),
        RC_AUTH => Err(Error::new(
            ErrorKind::AuthFailed,
            "Extended authentication rejected",
        )),
        rc => Err(plugin_error(path, &format!("extended auth returned {rc}"))),
    }
}
