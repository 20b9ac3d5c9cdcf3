//! Record stores: credentials, submissions, and instructor material
//!
//! The traits are the seam to whatever relational store a deployment uses.
//! [`JsonRecordStore`] is the bundled implementation: the whole document is
//! held in memory and flushed atomically (write temp, then rename) after
//! every mutation.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use edudesk_core::{
    EdudeskError, EdudeskResult, MaterialRecord, PasswordScheme, Role, SubmissionRecord,
};
use edudesk_crypto::PasswordVerifier;

/// A stored login. The verifier is kept as its storage columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: i64,
    pub login: String,
    pub role: Role,
    pub password_hash: String,
    #[serde(default)]
    pub salt: Option<String>,
    #[serde(default)]
    pub iterations: Option<i64>,
    pub active: bool,
    pub created_at: u64,
}

impl CredentialRecord {
    pub fn verifier(&self) -> PasswordVerifier {
        PasswordVerifier::from_columns(&self.password_hash, self.salt.as_deref(), self.iterations)
    }
}

/// Fields supplied when registering a login; the store assigns the rest.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub login: String,
    pub role: Role,
    pub verifier: PasswordVerifier,
}

pub trait CredentialStore {
    fn find_by_login(&self, login: &str) -> EdudeskResult<Option<CredentialRecord>>;

    /// Insert a new login. A login that already exists is a validation error.
    fn insert_credential(&mut self, new: NewCredential) -> EdudeskResult<CredentialRecord>;

    /// Returns `false` if no such login exists.
    fn set_active(&mut self, login: &str, active: bool) -> EdudeskResult<bool>;

    /// Verifier scheme held by most stored credentials, `None` when empty.
    fn predominant_scheme(&self) -> EdudeskResult<Option<PasswordScheme>> {
        Ok(None)
    }
}

pub trait SubmissionStore {
    fn insert_submission(
        &mut self,
        assignment_id: i64,
        student_id: i64,
        stored_name: &str,
        original_name: &str,
    ) -> EdudeskResult<SubmissionRecord>;

    fn insert_material(
        &mut self,
        assignment_id: i64,
        teacher_id: i64,
        stored_name: &str,
        original_name: &str,
    ) -> EdudeskResult<MaterialRecord>;

    fn submissions_for(&self, assignment_id: i64) -> EdudeskResult<Vec<SubmissionRecord>>;

    fn materials_for(&self, assignment_id: i64) -> EdudeskResult<Vec<MaterialRecord>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Records {
    #[serde(default)]
    users: Vec<CredentialRecord>,
    #[serde(default)]
    submissions: Vec<SubmissionRecord>,
    #[serde(default)]
    materials: Vec<MaterialRecord>,
}

/// JSON-file implementation of both stores
#[derive(Debug)]
pub struct JsonRecordStore {
    path: PathBuf,
    records: Records,
}

impl JsonRecordStore {
    /// Load the store at `path`, or start empty if the file doesn't exist.
    pub fn open(path: &Path) -> EdudeskResult<Self> {
        let records = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| EdudeskError::io(path, e))?;
            serde_json::from_str(&content).map_err(|e| {
                EdudeskError::Integrity(format!("record store {} is malformed: {e}", path.display()))
            })?
        } else {
            Records::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn users(&self) -> &[CredentialRecord] {
        &self.records.users
    }

    pub fn submissions(&self) -> &[SubmissionRecord] {
        &self.records.submissions
    }

    pub fn materials(&self) -> &[MaterialRecord] {
        &self.records.materials
    }

    /// Write the document to disk atomically.
    pub fn flush(&self) -> EdudeskResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| EdudeskError::io(parent, e))?;
            }
        }

        let json = serde_json::to_string_pretty(&self.records)
            .map_err(|e| EdudeskError::Validation(format!("serializing record store: {e}")))?;

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &json).map_err(|e| EdudeskError::io(&tmp_path, e))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| EdudeskError::io(&self.path, e))?;

        debug!(path = %self.path.display(), "record store flushed");
        Ok(())
    }
}

impl CredentialStore for JsonRecordStore {
    fn find_by_login(&self, login: &str) -> EdudeskResult<Option<CredentialRecord>> {
        Ok(self.records.users.iter().find(|u| u.login == login).cloned())
    }

    fn insert_credential(&mut self, new: NewCredential) -> EdudeskResult<CredentialRecord> {
        if self.records.users.iter().any(|u| u.login == new.login) {
            return Err(EdudeskError::Validation(format!(
                "login {:?} already exists",
                new.login
            )));
        }

        let (password_hash, salt, iterations) = new.verifier.to_columns();
        let record = CredentialRecord {
            id: next_id(self.records.users.iter().map(|u| u.id)),
            login: new.login,
            role: new.role,
            password_hash,
            salt,
            iterations: iterations.map(i64::from),
            active: true,
            created_at: now_secs(),
        };

        self.records.users.push(record.clone());
        if let Err(e) = self.flush() {
            self.records.users.pop();
            return Err(e);
        }
        Ok(record)
    }

    fn set_active(&mut self, login: &str, active: bool) -> EdudeskResult<bool> {
        let Some(idx) = self.records.users.iter().position(|u| u.login == login) else {
            return Ok(false);
        };

        let previous = self.records.users[idx].active;
        self.records.users[idx].active = active;
        if let Err(e) = self.flush() {
            self.records.users[idx].active = previous;
            return Err(e);
        }
        Ok(true)
    }

    fn predominant_scheme(&self) -> EdudeskResult<Option<PasswordScheme>> {
        let (mut argon2id, mut pbkdf2) = (0usize, 0usize);
        for user in &self.records.users {
            match user.verifier().scheme() {
                Some(PasswordScheme::Argon2id) => argon2id += 1,
                Some(PasswordScheme::Pbkdf2) => pbkdf2 += 1,
                None => {}
            }
        }
        Ok(match (argon2id, pbkdf2) {
            (0, 0) => None,
            (a, p) if p > a => Some(PasswordScheme::Pbkdf2),
            _ => Some(PasswordScheme::Argon2id),
        })
    }
}

impl SubmissionStore for JsonRecordStore {
    fn insert_submission(
        &mut self,
        assignment_id: i64,
        student_id: i64,
        stored_name: &str,
        original_name: &str,
    ) -> EdudeskResult<SubmissionRecord> {
        let record = SubmissionRecord {
            id: next_id(self.records.submissions.iter().map(|s| s.id)),
            assignment_id,
            student_id,
            stored_name: stored_name.to_string(),
            original_name: original_name.to_string(),
            created_at: now_secs(),
        };

        self.records.submissions.push(record.clone());
        if let Err(e) = self.flush() {
            self.records.submissions.pop();
            return Err(e);
        }
        Ok(record)
    }

    fn insert_material(
        &mut self,
        assignment_id: i64,
        teacher_id: i64,
        stored_name: &str,
        original_name: &str,
    ) -> EdudeskResult<MaterialRecord> {
        let record = MaterialRecord {
            id: next_id(self.records.materials.iter().map(|m| m.id)),
            assignment_id,
            teacher_id,
            stored_name: stored_name.to_string(),
            original_name: original_name.to_string(),
            created_at: now_secs(),
        };

        self.records.materials.push(record.clone());
        if let Err(e) = self.flush() {
            self.records.materials.pop();
            return Err(e);
        }
        Ok(record)
    }

    fn submissions_for(&self, assignment_id: i64) -> EdudeskResult<Vec<SubmissionRecord>> {
        Ok(self
            .records
            .submissions
            .iter()
            .filter(|s| s.assignment_id == assignment_id)
            .cloned()
            .collect())
    }

    fn materials_for(&self, assignment_id: i64) -> EdudeskResult<Vec<MaterialRecord>> {
        Ok(self
            .records
            .materials
            .iter()
            .filter(|m| m.assignment_id == assignment_id)
            .cloned()
            .collect())
    }
}

fn next_id(ids: impl Iterator<Item = i64>) -> i64 {
    ids.max().unwrap_or(0) + 1
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
