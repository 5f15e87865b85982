//! MD5 password authentication.
use std::fmt;

use crate::postgres::DatabaseError;

/// Compute the response to an MD5 password challenge.
///
/// The credential is `"md5" + hex(md5(hex(md5(password + username)) + salt))`,
/// every hex string lowercase.
pub(crate) fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let mut pass_user = Vec::with_capacity(password.len() + user.len());
    pass_user.extend_from_slice(password.as_bytes());
    pass_user.extend_from_slice(user.as_bytes());
    let prehash = format!("{:x}", md5::compute(pass_user));

    let mut salted = Vec::with_capacity(prehash.len() + salt.len());
    salted.extend_from_slice(prehash.as_bytes());
    salted.extend_from_slice(&salt);
    format!("md5{:x}", md5::compute(salted))
}

/// Authentication with the backend could not be completed.
pub enum AuthError {
    /// The backend requested an authentication scheme this client does not
    /// implement, cleartext passwords included.
    Unsupported(u32),
    /// The backend requested a password but none was configured.
    PasswordRequired,
    /// The backend did not accept the credential.
    Rejected(Option<DatabaseError>),
}

impl std::error::Error for AuthError { }

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Unsupported(method) => {
                write!(f, "authentication method {method} is not supported")
            },
            AuthError::PasswordRequired => {
                write!(f, "backend requested a password but none was configured")
            },
            AuthError::Rejected(Some(err)) => write!(f, "authentication rejected: {err}"),
            AuthError::Rejected(None) => write!(f, "backend did not acknowledge the credential"),
        }
    }
}

impl fmt::Debug for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::md5_password;

    #[test]
    fn known_challenge_response() {
        // pinned against a real `md5` challenge from postgres
        assert_eq!(
            md5_password("postgres", "postgres123", [0x01, 0x02, 0x03, 0x04]),
            "md53f5602346f4eccc0b449210d78755ada",
        );
        assert_eq!(
            md5_password("postgres", "postgres123", [0xAA, 0xBB, 0xCC, 0xDD]),
            "md597b9bd4d1e2649c5edda5c2806408876",
        );
    }
}
