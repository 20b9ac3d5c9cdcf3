//! Registration and login against a [`CredentialStore`]

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use edudesk_core::{EdudeskConfig, EdudeskError, EdudeskResult, PasswordScheme, Principal, Role};
use edudesk_crypto::password::{derive, validate_rules, verify, PasswordVerifier};
use edudesk_crypto::new_file_id;

use crate::store::{CredentialStore, NewCredential};

pub struct Authenticator<S> {
    store: S,
    scheme: PasswordScheme,
    pbkdf2_iterations: u32,
    /// One verifier per scheme, checked against when the login is unknown so
    /// the answer costs as much as a real mismatch.
    dummy_argon2id: PasswordVerifier,
    dummy_pbkdf2: PasswordVerifier,
}

impl<S: CredentialStore> Authenticator<S> {
    pub fn new(store: S, scheme: PasswordScheme, pbkdf2_iterations: u32) -> EdudeskResult<Self> {
        let filler = SecretString::from(new_file_id()?);
        let dummy_argon2id = derive(&filler, PasswordScheme::Argon2id, pbkdf2_iterations)?;
        let dummy_pbkdf2 = derive(&filler, PasswordScheme::Pbkdf2, pbkdf2_iterations)?;
        Ok(Self {
            store,
            scheme,
            pbkdf2_iterations,
            dummy_argon2id,
            dummy_pbkdf2,
        })
    }

    pub fn from_config(store: S, config: &EdudeskConfig) -> EdudeskResult<Self> {
        Self::new(store, config.auth.scheme, config.crypto.pbkdf2_iterations)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create a login after checking the password rules.
    pub fn register(
        &mut self,
        login: &str,
        role: Role,
        password: &SecretString,
    ) -> EdudeskResult<Principal> {
        let login = validate_login(login)?;
        validate_rules(password.expose_secret()).map_err(EdudeskError::WeakPassword)?;

        if self.store.find_by_login(login)?.is_some() {
            return Err(EdudeskError::Validation(format!(
                "login {login:?} already exists"
            )));
        }

        let verifier = derive(password, self.scheme, self.pbkdf2_iterations)?;
        let record = self.store.insert_credential(NewCredential {
            login: login.to_string(),
            role,
            verifier,
        })?;

        info!(login = %record.login, role = %record.role, "credential registered");
        Ok(Principal {
            id: record.id,
            login: record.login,
            role: record.role,
        })
    }

    /// Check a login/password pair.
    ///
    /// Unknown login, inactive account, and wrong password all yield
    /// `Ok(None)` and are not distinguishable by the caller.
    pub fn authenticate(
        &self,
        login: &str,
        password: &SecretString,
    ) -> EdudeskResult<Option<Principal>> {
        let Some(record) = self.store.find_by_login(login.trim())? else {
            verify(password, self.dummy_for_unknown()?)?;
            debug!("login rejected");
            return Ok(None);
        };

        let matched = verify(password, &record.verifier())?;
        if !matched || !record.active {
            debug!("login rejected");
            return Ok(None);
        }

        info!(login = %record.login, role = %record.role, "login accepted");
        Ok(Some(Principal {
            id: record.id,
            login: record.login,
            role: record.role,
        }))
    }

    /// Dummy matching the scheme most stored credentials use, falling back to
    /// the configured scheme for an empty store.
    fn dummy_for_unknown(&self) -> EdudeskResult<&PasswordVerifier> {
        let scheme = self.store.predominant_scheme()?.unwrap_or(self.scheme);
        Ok(match scheme {
            PasswordScheme::Argon2id => &self.dummy_argon2id,
            PasswordScheme::Pbkdf2 => &self.dummy_pbkdf2,
        })
    }

    /// Like [`authenticate`](Self::authenticate), but a rejection is
    /// [`EdudeskError::Authentication`].
    pub fn require(&self, login: &str, password: &SecretString) -> EdudeskResult<Principal> {
        self.authenticate(login, password)?
            .ok_or(EdudeskError::Authentication)
    }

    /// Deactivate a login. Records are never deleted.
    pub fn deactivate(&mut self, login: &str) -> EdudeskResult<bool> {
        let changed = self.store.set_active(login, false)?;
        if changed {
            info!(login = %login, "credential deactivated");
        }
        Ok(changed)
    }
}

fn validate_login(login: &str) -> EdudeskResult<&str> {
    let login = login.trim();
    if login.is_empty() {
        return Err(EdudeskError::Validation("login must not be empty".into()));
    }
    if login.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(EdudeskError::Validation(
            "login must not contain whitespace or control characters".into(),
        ));
    }
    Ok(login)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonRecordStore;

    fn pw(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[test]
    fn unknown_login_dummy_follows_stored_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");

        // Rows written under Argon2id, then the site switches to PBKDF2.
        let store = JsonRecordStore::open(&path).unwrap();
        let mut auth = Authenticator::new(store, PasswordScheme::Argon2id, 1000).unwrap();
        assert_eq!(
            auth.dummy_for_unknown().unwrap().scheme(),
            Some(PasswordScheme::Argon2id)
        );
        auth.register("alice", Role::Student, &pw("Str0ngP@ssw0rd!"))
            .unwrap();
        auth.register("bob", Role::Student, &pw("Str0ngP@ssw0rd!"))
            .unwrap();
        drop(auth);

        let store = JsonRecordStore::open(&path).unwrap();
        let auth = Authenticator::new(store, PasswordScheme::Pbkdf2, 1000).unwrap();
        assert_eq!(
            auth.dummy_for_unknown().unwrap().scheme(),
            Some(PasswordScheme::Argon2id)
        );
        assert!(auth
            .authenticate("nobody", &pw("Str0ngP@ssw0rd!"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn empty_store_uses_configured_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRecordStore::open(&dir.path().join("records.json")).unwrap();
        let auth = Authenticator::new(store, PasswordScheme::Pbkdf2, 1000).unwrap();
        assert_eq!(
            auth.dummy_for_unknown().unwrap().scheme(),
            Some(PasswordScheme::Pbkdf2)
        );
    }
}
