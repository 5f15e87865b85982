//! Decoding of `ErrorResponse` and `NoticeResponse` payloads.
use std::fmt;

use super::error::DecodeError;
use crate::ext::SliceExt;

/// A structured error or notice report from the backend.
///
/// The message body consists of one or more identified fields, followed by a
/// zero byte as a terminator. Fields can appear in any order. For each field
/// there is the following:
///
/// `Byte1` A code identifying the field type; if zero, this is the message
/// terminator and no string follows. Since more field types might be added in
/// future, frontends should silently ignore fields of unrecognized type.
///
/// `String` The field value.
///
/// Severity, SQLSTATE code, and message are always present; every other
/// field is optional.
///
/// <https://www.postgresql.org/docs/current/protocol-error-fields.html>
#[derive(Debug, Clone)]
pub struct DatabaseError {
    /// Localized severity: ERROR, FATAL, PANIC, or a notice severity.
    pub severity: String,
    /// Non-localized severity. Absent from servers older than 9.6, in which
    /// case it mirrors `severity`.
    pub invariant_severity: String,
    /// The SQLSTATE code for the error.
    pub code: String,
    /// The primary human-readable error message.
    pub message: String,
    /// An optional secondary error message carrying more detail.
    pub detail: Option<String>,
    /// An optional suggestion what to do about the problem.
    pub hint: Option<String>,
    /// Error cursor position as an index into the original query string.
    ///
    /// The first character has index 1, positions are measured in characters not bytes.
    pub position: Option<u32>,
    /// As `position`, but into an internally generated command.
    pub internal_position: Option<u32>,
    /// The text of a failed internally-generated command.
    pub internal_query: Option<String>,
    /// Context in which the error occurred, such as a call stack traceback.
    pub where_context: Option<String>,
    /// If the error was associated with a specific database object, the schema name.
    pub schema_name: Option<String>,
    /// If the error was associated with a specific table, the table name.
    pub table_name: Option<String>,
    /// If the error was associated with a specific table column, the column name.
    pub column_name: Option<String>,
    /// If the error was associated with a specific data type, the data type name.
    pub data_type_name: Option<String>,
    /// If the error was associated with a specific constraint, the constraint name.
    pub constraint_name: Option<String>,
    /// The file name of the source-code location where the error was reported.
    pub file: Option<String>,
    /// The line number of the source-code location where the error was reported.
    pub line: Option<String>,
    /// The name of the source-code routine reporting the error.
    pub routine: Option<String>,
}

impl DatabaseError {
    /// Decode the tagged-field payload of an `ErrorResponse` or `NoticeResponse`.
    ///
    /// The strings are copied out: the record stays valid after the window
    /// the payload was borrowed from is gone.
    pub fn decode(body: &[u8]) -> Result<DatabaseError, DecodeError> {
        let mut severity = None;
        let mut invariant_severity = None;
        let mut code = None;
        let mut message = None;
        let mut detail = None;
        let mut hint = None;
        let mut position = None;
        let mut internal_position = None;
        let mut internal_query = None;
        let mut where_context = None;
        let mut schema_name = None;
        let mut table_name = None;
        let mut column_name = None;
        let mut data_type_name = None;
        let mut constraint_name = None;
        let mut file = None;
        let mut line = None;
        let mut routine = None;

        let mut read = body;
        loop {
            let Some((&field, rest)) = read.split_first() else {
                return Err(DecodeError::UnexpectedEnd);
            };
            if field == 0 {
                // terminator; error message fully consumed
                break;
            }
            let Some((value, rest)) = rest.split_nul() else {
                return Err(DecodeError::UnexpectedEnd);
            };
            read = rest;

            let value = String::from_utf8_lossy(value);
            match field {
                b'S' => severity = Some(value.into_owned()),
                b'V' => invariant_severity = Some(value.into_owned()),
                b'C' => code = Some(value.into_owned()),
                b'M' => message = Some(value.into_owned()),
                b'D' => detail = Some(value.into_owned()),
                b'H' => hint = Some(value.into_owned()),
                // an unparseable position is ignored, not fatal
                b'P' => position = value.parse().ok().or(position),
                b'p' => internal_position = value.parse().ok().or(internal_position),
                b'q' => internal_query = Some(value.into_owned()),
                b'W' => where_context = Some(value.into_owned()),
                b's' => schema_name = Some(value.into_owned()),
                b't' => table_name = Some(value.into_owned()),
                b'c' => column_name = Some(value.into_owned()),
                b'd' => data_type_name = Some(value.into_owned()),
                b'n' => constraint_name = Some(value.into_owned()),
                b'F' => file = Some(value.into_owned()),
                b'L' => line = Some(value.into_owned()),
                b'R' => routine = Some(value.into_owned()),
                // unknown error field; consume and discard
                _ => {},
            }
        }

        let Some(severity) = severity else {
            return Err(DecodeError::MissingField("severity"));
        };
        let Some(code) = code else {
            return Err(DecodeError::MissingField("code"));
        };
        let Some(message) = message else {
            return Err(DecodeError::MissingField("message"));
        };

        Ok(DatabaseError {
            invariant_severity: invariant_severity.unwrap_or_else(|| severity.clone()),
            severity,
            code,
            message,
            detail,
            hint,
            position,
            internal_position,
            internal_query,
            where_context,
            schema_name,
            table_name,
            column_name,
            data_type_name,
            constraint_name,
            file,
            line,
            routine,
        })
    }
}

impl std::error::Error for DatabaseError { }

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.severity, self.message, self.code)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn fields(pairs: &[(u8, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (code, value) in pairs {
            body.push(*code);
            body.extend_from_slice(value.as_bytes());
            body.push(0);
        }
        body.push(0);
        body
    }

    #[test]
    fn mandatory_fields_only() {
        let body = fields(&[(b'S', "ERROR"), (b'C', "42601"), (b'M', "syntax error")]);
        let err = DatabaseError::decode(&body).unwrap();
        assert_eq!(err.severity, "ERROR");
        assert_eq!(err.invariant_severity, "ERROR");
        assert_eq!(err.code, "42601");
        assert_eq!(err.message, "syntax error");
        assert_eq!(err.detail, None);
        assert_eq!(err.hint, None);
        assert_eq!(err.position, None);
        assert_eq!(err.table_name, None);
        assert_eq!(err.routine, None);
    }

    #[test]
    fn missing_message_is_fatal() {
        let body = fields(&[(b'S', "ERROR"), (b'C', "42601")]);
        let err = DatabaseError::decode(&body).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("message")));
    }

    #[test]
    fn missing_terminator_is_fatal() {
        let mut body = fields(&[(b'S', "ERROR"), (b'C', "42601"), (b'M', "syntax error")]);
        body.pop();
        let err = DatabaseError::decode(&body).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedEnd));
    }

    #[test]
    fn optional_and_unknown_fields() {
        let body = fields(&[
            (b'S', "ERROR"),
            (b'V', "FATAL"),
            (b'C', "42P01"),
            (b'M', "relation does not exist"),
            (b'P', "15"),
            (b'Z', "some future field"),
            (b't', "users"),
        ]);
        let err = DatabaseError::decode(&body).unwrap();
        assert_eq!(err.invariant_severity, "FATAL");
        assert_eq!(err.position, Some(15));
        assert_eq!(err.table_name.as_deref(), Some("users"));
    }

    #[test]
    fn unparseable_position_is_ignored() {
        let body = fields(&[
            (b'S', "ERROR"),
            (b'C', "42601"),
            (b'M', "syntax error"),
            (b'P', "over nine thousand"),
        ]);
        let err = DatabaseError::decode(&body).unwrap();
        assert_eq!(err.position, None);
    }
}
