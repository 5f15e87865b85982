//! Postgres backend message payloads the engine inspects.
//!
//! Result payloads are deliberately left undecoded; only the messages the
//! connection lifecycle branches on get a typed view here.
use super::error::ProtocolError;
use crate::{ext::SliceExt, frame::BackendCode};

/// Specifies that the authentication was successful.
pub const AUTH_OK: u32 = 0;
/// Specifies that a clear-text password is required.
pub const AUTH_CLEARTEXT: u32 = 3;
/// Specifies that an MD5-encrypted password is required.
pub const AUTH_MD5: u32 = 5;

/// Identifies the message as an authentication request.
///
/// The payload begins with a 4-byte request subtype.
#[derive(Debug)]
pub enum Authentication {
    /// Specifies that the authentication was successful.
    Ok,
    /// Specifies that a clear-text password is required.
    CleartextPassword,
    /// Specifies that an MD5-encrypted password is required.
    MD5Password {
        /// The salt to use when encrypting the password.
        salt: [u8; 4],
    },
    /// Any other scheme, kerberos through SASL; none of them are supported.
    Other(u32),
}

impl Authentication {
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        let Some((subtype, rest)) = body.split_first_chunk::<4>() else {
            return Err(ProtocolError::truncated(BackendCode::Authentication));
        };
        let auth = match u32::from_be_bytes(*subtype) {
            AUTH_OK => Authentication::Ok,
            AUTH_CLEARTEXT => Authentication::CleartextPassword,
            AUTH_MD5 => {
                let Some((salt, _)) = rest.split_first_chunk::<4>() else {
                    return Err(ProtocolError::truncated(BackendCode::Authentication));
                };
                Authentication::MD5Password { salt: *salt }
            },
            other => Authentication::Other(other),
        };
        Ok(auth)
    }
}

/// Identifies the message as cancellation key data.
///
/// The frontend must save these values if it wishes to be able to issue
/// CancelRequest messages later.
#[derive(Debug, Clone, Copy)]
pub struct BackendKeyData {
    /// The process ID of this backend.
    pub process_id: u32,
    /// The secret key of this backend.
    pub secret_key: u32,
}

impl BackendKeyData {
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        let Some((process_id, rest)) = body.split_first_chunk::<4>() else {
            return Err(ProtocolError::truncated(BackendCode::BackendKeyData));
        };
        let Some((secret_key, _)) = rest.split_first_chunk::<4>() else {
            return Err(ProtocolError::truncated(BackendCode::BackendKeyData));
        };
        Ok(Self {
            process_id: u32::from_be_bytes(*process_id),
            secret_key: u32::from_be_bytes(*secret_key),
        })
    }
}

/// Identifies the message as a run-time parameter status report.
#[derive(Debug)]
pub struct ParameterStatus {
    /// The name of the run-time parameter being reported
    pub name: String,
    /// The current value of the parameter
    pub value: String,
}

impl ParameterStatus {
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        let Some((name, rest)) = body.split_nul() else {
            return Err(ProtocolError::truncated(BackendCode::ParameterStatus));
        };
        let Some((value, _)) = rest.split_nul() else {
            return Err(ProtocolError::truncated(BackendCode::ParameterStatus));
        };
        Ok(Self {
            name: String::from_utf8_lossy(name).into_owned(),
            value: String::from_utf8_lossy(value).into_owned(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn authentication_subtypes() {
        assert!(matches!(Authentication::parse(&0u32.to_be_bytes()), Ok(Authentication::Ok)));
        assert!(matches!(Authentication::parse(&3u32.to_be_bytes()), Ok(Authentication::CleartextPassword)));

        let mut md5 = 5u32.to_be_bytes().to_vec();
        md5.extend_from_slice(&[9, 8, 7, 6]);
        assert!(matches!(
            Authentication::parse(&md5),
            Ok(Authentication::MD5Password { salt: [9, 8, 7, 6] }),
        ));

        assert!(matches!(Authentication::parse(&10u32.to_be_bytes()), Ok(Authentication::Other(10))));

        // md5 subtype without its salt
        assert!(Authentication::parse(&5u32.to_be_bytes()).is_err());
        assert!(Authentication::parse(b"\0\0").is_err());
    }

    #[test]
    fn parameter_status_pair() {
        let param = ParameterStatus::parse(b"client_encoding\0UTF8\0").unwrap();
        assert_eq!(param.name, "client_encoding");
        assert_eq!(param.value, "UTF8");

        assert!(ParameterStatus::parse(b"client_encoding\0UTF8").is_err());
    }
}
