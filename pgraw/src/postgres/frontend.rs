//! Postgres Frontend Messages
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
use bytes::BufMut;

use super::{Oid, PgFormat};
use crate::ext::{BufMutExt, StrExt, UsizeExt};

/// A type which can be encoded into postgres frontend message
pub trait FrontendProtocol {
    /// Message type.
    const MSGTYPE: u8;

    /// Size of the main body.
    ///
    /// Note that this is **only** the size of main body as oppose of actual postgres message which
    /// include the length itself.
    fn size_hint(&self) -> u32;

    /// Write the main body of the message.
    ///
    /// The length of body written must be equal to the
    /// length returned by [`size_hint`][FrontendProtocol::size_hint].
    fn encode(self, buf: impl BufMut);
}

/// Postgres Startup frontend message
///
/// For historical reasons, the very first message sent by the client (the [`Startup`] message)
/// has no initial message-type byte, thus [`Startup`] does not implement [`FrontendProtocol`].
#[derive(Debug)]
pub struct Startup<'a> {
    /// The database user name to connect as. Required; there is no default.
    pub user: &'a str,
    /// The database to connect to. Defaults to the user name.
    pub database: &'a str,
}

/// Int32(196608)
///
/// The most significant 16 bits are the major version number (3 for the protocol described here).
/// The least significant 16 bits are the minor version number (0 for the protocol described here).
const PROTOCOL_VERSION: u32 = 3 << 16;

impl Startup<'_> {
    /// Total on-wire size, including the leading length field.
    pub fn wire_len(&self) -> u32 {
        4/* length, counts itself */
            + 4/* protocol version */
            + "user".nul_string_len()
            + self.user.nul_string_len()
            + "client_encoding".nul_string_len()
            + "UTF8".nul_string_len()
            + "database".nul_string_len()
            + self.database.nul_string_len()
            + 1/* terminator */
    }

    pub(crate) fn encode(self, mut buf: impl BufMut) {
        // Length of message contents in bytes, including self.
        buf.put_u32(self.wire_len());
        buf.put_u32(PROTOCOL_VERSION);

        // The protocol version number is followed by pairs of parameter name and value strings.
        // A zero byte is required as a terminator after the last name/value pair.

        buf.put_nul_string("user");
        buf.put_nul_string(self.user);

        buf.put_nul_string("client_encoding");
        buf.put_nul_string("UTF8");

        buf.put_nul_string("database");
        buf.put_nul_string(self.database);

        buf.put_u8(b'\0');
    }
}

/// Identifies the message as a password response.
#[derive(Debug)]
pub struct PasswordMessage<'a> {
    /// The password (encrypted, if requested)
    pub password: &'a str,
}

impl FrontendProtocol for PasswordMessage<'_> {
    const MSGTYPE: u8 = b'p';

    fn size_hint(&self) -> u32 {
        self.password.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.password);
    }
}

/// Identifies the message as a simple query
pub struct Query<'a> {
    /// the query string itself
    pub sql: &'a str,
}

impl FrontendProtocol for Query<'_> {
    const MSGTYPE: u8 = b'Q';

    fn size_hint(&self) -> u32 {
        self.sql.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.sql);
    }
}

/// Identifies the message as a Parse command
pub struct Parse<'a> {
    /// prepared statement name (an empty string selects the unnamed prepared statement).
    pub prepare_name: &'a str,
    /// The query string to be parsed.
    pub sql: &'a str,
    /// The parameter data types to prespecify.
    ///
    /// Note that this is not an indication of the number of parameters that might appear in the
    /// query string, only the number that the frontend wants to prespecify types for.
    pub param_oids: &'a [Oid],
}

impl FrontendProtocol for Parse<'_> {
    const MSGTYPE: u8 = b'P';

    fn size_hint(&self) -> u32 {
        self.prepare_name.nul_string_len()
            + self.sql.nul_string_len()
            + 2
            + 4 * self.param_oids.len().to_u32()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.prepare_name);
        buf.put_nul_string(self.sql);
        buf.put_u16(self.param_oids.len().to_u16());
        for &oid in self.param_oids {
            buf.put_u32(oid);
        }
    }
}

/// Identifies the message as a Bind command.
///
/// This client binds no parameter values: the parameter format code list and
/// the parameter value list are always empty, and a single result-column
/// format code selects one format for every column of the result.
pub struct Bind<'a> {
    /// The name of the destination portal (an empty string selects the unnamed portal).
    pub portal_name: &'a str,
    /// The name of the source prepared statement (an empty string selects the unnamed prepared statement).
    pub stmt_name: &'a str,
    /// The format applied to all result columns (if any).
    pub result_format: PgFormat,
}

impl FrontendProtocol for Bind<'_> {
    const MSGTYPE: u8 = b'B';

    fn size_hint(&self) -> u32 {
        self.portal_name.nul_string_len()
            + self.stmt_name.nul_string_len()
            + 2/* parameter format code count */
            + 2/* parameter value count */
            + 2/* result format code count */
            + 2/* the one result format code */
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal_name);
        buf.put_nul_string(self.stmt_name);

        // The number of parameter format codes that follow. This can be zero to
        // indicate that there are no parameters.
        buf.put_u16(0);

        // The number of parameter values that follow (possibly zero).
        // This must match the number of parameters needed by the query.
        buf.put_u16(0);

        // The number of result-column format codes that follow. One means the
        // specified format code is applied to all result columns (if any).
        buf.put_u16(1);
        buf.put_u16(self.result_format.format_code());
    }
}

/// Identifies the message as a Describe command.
pub struct Describe<'a> {
    /// 'S' to describe a prepared statement; or 'P' to describe a portal.
    pub kind: u8,
    /// The name of the prepared statement or portal to describe
    /// (an empty string selects the unnamed prepared statement or portal).
    pub name: &'a str,
}

impl FrontendProtocol for Describe<'_> {
    const MSGTYPE: u8 = b'D';

    fn size_hint(&self) -> u32 {
        1 + self.name.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_u8(self.kind);
        buf.put_nul_string(self.name);
    }
}

/// Identifies the message as a Execute command
pub struct Execute<'a> {
    /// The name of the portal to execute (an empty string selects the unnamed portal).
    pub portal_name: &'a str,
    /// Maximum number of rows to return, if portal contains a query that returns rows
    /// (ignored otherwise). Zero denotes “no limit”.
    pub max_rows: u32,
}

impl FrontendProtocol for Execute<'_> {
    const MSGTYPE: u8 = b'E';

    fn size_hint(&self) -> u32 {
        self.portal_name.nul_string_len() + 4
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal_name);
        buf.put_u32(self.max_rows);
    }
}

/// Identifies the message as a Sync command
pub struct Sync;

impl FrontendProtocol for Sync {
    const MSGTYPE: u8 = b'S';

    fn size_hint(&self) -> u32 { 0 }

    fn encode(self, _: impl BufMut) { }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::io::WriteBuffer;
    use bytes::Buf;

    #[test]
    fn startup_payload() {
        let mut buf = WriteBuffer::with_capacity(128);
        buf.write_startup(Startup { user: "u", database: "d" }).unwrap();

        let mut expect = Vec::new();
        expect.extend_from_slice(&48u32.to_be_bytes());
        expect.extend_from_slice(&196_608u32.to_be_bytes());
        expect.extend_from_slice(b"user\0u\0client_encoding\0UTF8\0database\0d\0\0");
        assert_eq!(buf.chunk(), expect);
    }

    #[test]
    fn extended_query_batch() {
        let mut buf = WriteBuffer::with_capacity(256);
        buf.write_msg(Parse { prepare_name: "", sql: "SELECT 1", param_oids: &[] }).unwrap();
        buf.write_msg(Bind { portal_name: "", stmt_name: "", result_format: PgFormat::Binary }).unwrap();
        buf.write_msg(Describe { kind: b'P', name: "" }).unwrap();
        buf.write_msg(Execute { portal_name: "", max_rows: 0 }).unwrap();
        buf.write_msg(Sync).unwrap();

        // one region, five frames
        let mut wire = buf.chunk();
        let mut frames = Vec::new();
        while !wire.is_empty() {
            let code = wire.get_u8();
            let len = wire.get_u32() as usize;
            let (body, rest) = wire.split_at(len - 4);
            frames.push((code, body.to_vec()));
            wire = rest;
        }

        let codes = frames.iter().map(|f| f.0).collect::<Vec<_>>();
        assert_eq!(codes, [b'P', b'B', b'D', b'E', b'S']);

        assert_eq!(frames[0].1, b"\0SELECT 1\0\0\0");
        // empty portal and statement, no formats, no params, one binary result format
        assert_eq!(frames[1].1, [0, 0, 0, 0, 0, 0, 0, 1, 0, 1]);
        assert_eq!(frames[2].1, b"P\0");
        assert_eq!(frames[3].1, [0, 0, 0, 0, 0]);
        assert_eq!(frames[4].1, b"");
    }
}
