use serde::{Deserialize, Serialize};

/// Role attached to a credential record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// An authenticated identity handed back to the caller after login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: i64,
    pub login: String,
    pub role: Role,
}

/// Password complexity rules, in the order they are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordRule {
    TooShort { min: usize },
    NotPrintableAscii,
    MissingLowercase,
    MissingUppercase,
    MissingDigit,
    MissingSymbol,
}

impl std::fmt::Display for PasswordRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PasswordRule::TooShort { min } => {
                write!(f, "password must be at least {min} characters long")
            }
            PasswordRule::NotPrintableAscii => {
                f.write_str("password must contain only printable ASCII characters, no spaces")
            }
            PasswordRule::MissingLowercase => {
                f.write_str("password must contain a lowercase letter")
            }
            PasswordRule::MissingUppercase => {
                f.write_str("password must contain an uppercase letter")
            }
            PasswordRule::MissingDigit => f.write_str("password must contain a digit"),
            PasswordRule::MissingSymbol => {
                f.write_str("password must contain a special character")
            }
        }
    }
}

/// Storage subdirectory that holds a protected file's ciphertext
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobArea {
    /// Student submissions, under `files/`
    Submission,
    /// Instructor-attached assignment material, under `assignments/`
    Material,
}

impl BlobArea {
    pub fn dir_name(&self) -> &'static str {
        match self {
            BlobArea::Submission => "files",
            BlobArea::Material => "assignments",
        }
    }
}

/// A student's submission, as recorded after its file was protected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: i64,
    pub assignment_id: i64,
    pub student_id: i64,
    /// `<file_id>.dat` under `files/`
    pub stored_name: String,
    pub original_name: String,
    /// Unix timestamp (seconds)
    pub created_at: u64,
}

/// Instructor material attached to an assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRecord {
    pub id: i64,
    pub assignment_id: i64,
    pub teacher_id: i64,
    /// `<file_id>.dat` under `assignments/`
    pub stored_name: String,
    pub original_name: String,
    pub created_at: u64,
}
