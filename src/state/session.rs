// SPDX-License-Identifier: MPL-2.0

use crate::atproto::Session;
use crate::config::{APP_ID, DEFAULT_PDS};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session storage unavailable: {0}")]
    Storage(String),
    #[error("session not found")]
    NotFound,
    #[error("invalid session data: {0}")]
    InvalidData(String),
}

/// Session record in the camelCase layout used by the XRPC
/// `createSession` response and older session files.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CamelSession {
    pub did: String,
    pub handle: String,
    pub access_jwt: String,
    pub refresh_jwt: String,
    #[serde(default)]
    pub service: Option<String>,
}

/// Every session blob layout we know how to read.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StoredSession {
    /// What [`SessionManager::store`] writes.
    Current(Session),
    Camel(CamelSession),
    /// `{ "session": {...}, "service": "..." }`
    Wrapped {
        session: CamelSession,
        #[serde(default)]
        service: Option<String>,
    },
}

impl StoredSession {
    pub fn resolve(self) -> Session {
        let from_camel = |s: CamelSession, service: Option<String>| Session {
            did: s.did,
            handle: s.handle,
            access_jwt: s.access_jwt,
            refresh_jwt: s.refresh_jwt,
            service: service
                .or(s.service)
                .unwrap_or_else(|| DEFAULT_PDS.to_string()),
        };

        match self {
            StoredSession::Current(session) => session,
            StoredSession::Camel(session) => from_camel(session, None),
            StoredSession::Wrapped { session, service } => from_camel(session, service),
        }
    }
}

/// Persists session credentials as a JSON file readable only by the user.
pub struct SessionManager {
    path: PathBuf,
}

impl SessionManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.config/io.github.sethcottle.Rapport/session.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push(APP_ID);
            p.push("session.json");
            p
        })
    }

    pub fn open_default() -> Result<Self, SessionError> {
        Self::default_path()
            .map(Self::new)
            .ok_or_else(|| SessionError::Storage("could not determine config directory".into()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store(&self, session: &Session) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SessionError::Storage(e.to_string()))?;
        }

        let session_json = serde_json::to_string_pretty(session)
            .map_err(|e| SessionError::InvalidData(e.to_string()))?;
        std::fs::write(&self.path, session_json)
            .map_err(|e| SessionError::Storage(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| SessionError::Storage(e.to_string()))?;
        }

        Ok(())
    }

    pub fn load(&self) -> Result<Session, SessionError> {
        let contents = match std::fs::read(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionError::NotFound);
            }
            Err(e) => return Err(SessionError::Storage(e.to_string())),
        };

        let stored: StoredSession = serde_json::from_slice(&contents)
            .map_err(|e| SessionError::InvalidData(e.to_string()))?;

        Ok(stored.resolve())
    }

    pub fn clear(&self) -> Result<(), SessionError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::Storage(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Session {
        serde_json::from_str::<StoredSession>(raw).unwrap().resolve()
    }

    #[test]
    fn test_resolves_every_known_shape() {
        let current = parse(
            r#"{"did":"did:plc:a","handle":"a.test","access_jwt":"acc","refresh_jwt":"ref",
                "service":"https://pds.example"}"#,
        );
        assert_eq!(current.access_jwt, "acc");
        assert_eq!(current.service, "https://pds.example");

        let camel =
            parse(r#"{"did":"did:plc:a","handle":"a.test","accessJwt":"acc","refreshJwt":"ref"}"#);
        assert_eq!(camel.refresh_jwt, "ref");
        assert_eq!(camel.service, DEFAULT_PDS);

        let wrapped = parse(
            r#"{"session":{"did":"did:plc:a","handle":"a.test","accessJwt":"acc",
                "refreshJwt":"ref","service":"https://inner.example"},
                "service":"https://outer.example"}"#,
        );
        assert_eq!(wrapped.did, "did:plc:a");
        assert_eq!(wrapped.service, "https://outer.example");
    }

    #[test]
    fn test_unknown_shape_is_rejected() {
        assert!(serde_json::from_str::<StoredSession>(r#"{"token":"x"}"#).is_err());
    }

    #[test]
    fn test_store_load_clear() {
        let dir = std::env::temp_dir().join(format!("rapport-session-{}", std::process::id()));
        let manager = SessionManager::new(dir.join("session.json"));
        assert!(matches!(manager.load(), Err(SessionError::NotFound)));

        let session = Session {
            did: "did:plc:a".into(),
            handle: "a.test".into(),
            access_jwt: "acc".into(),
            refresh_jwt: "ref".into(),
            service: "https://pds.example".into(),
        };
        manager.store(&session).unwrap();
        assert_eq!(manager.load().unwrap(), session);

        manager.clear().unwrap();
        manager.clear().unwrap();
        assert!(matches!(manager.load(), Err(SessionError::NotFound)));
        let _ = std::fs::remove_dir_all(dir);
    }
}
