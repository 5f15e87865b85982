//! Postgres connection engine.
use crate::{
    Result,
    common::{span, verbose},
    error::ConnectionClosed,
    frame::{BackendCode, Frame, FrameReader, HEADER_LEN},
    io::{ReadBuffer, WriteBuffer},
    message::MessageReader,
    net::Socket,
    postgres::{DatabaseError, PgFormat, ProtocolError, backend, frontend},
};

mod auth;
mod config;

pub use auth::AuthError;
pub use config::{Config, ParseError};

/// A single postgres session over one transport.
///
/// The connection owns its transport and both buffers exclusively: it is not
/// shareable, accepts one query submission at a time, and observes backend
/// messages in exactly the order they were sent. Dropping it releases the
/// transport.
///
/// Any fatal failure, a protocol violation, an io error, or end-of-stream,
/// makes the connection unusable; every operation after that fails fast.
#[derive(Debug)]
pub struct Connection {
    socket: Socket,
    read_buf: ReadBuffer,
    write_buf: WriteBuffer,
    /// initial run-time parameters reported at startup
    parameters: Vec<(String, String)>,
    key_data: Option<backend::BackendKeyData>,
    closed: bool,
}

enum StartupStep {
    Ready,
    Param((String, String)),
    KeyData(backend::BackendKeyData),
}

impl Connection {
    /// Connect and perform the startup phase, config parsed from `url`.
    pub async fn connect(url: &str) -> Result<Connection> {
        Self::connect_with(&Config::parse(url)?).await
    }

    /// Connect and perform the startup phase, config from the environment.
    ///
    /// See [`Config::from_env`].
    pub async fn connect_env() -> Result<Connection> {
        Self::connect_with(&Config::from_env()).await
    }

    /// Connect and perform the startup phase.
    pub async fn connect_with(config: &Config) -> Result<Connection> {
        span!("connect");

        let socket = match config.host.as_str() {
            "localhost" => {
                Socket::connect_socket(&format!("/run/postgresql/.s.PGSQL.{}", config.port)).await?
            },
            host => Socket::connect_tcp(host, config.port).await?,
        };

        let mut conn = Connection {
            socket,
            read_buf: ReadBuffer::with_capacity(config.read_buf_capacity),
            write_buf: WriteBuffer::with_capacity(config.write_buf_capacity),
            parameters: Vec::new(),
            key_data: None,
            closed: false,
        };

        // a fatal condition during startup disposes the transport,
        // carried out here by dropping `conn`
        conn.startup(config).await?;
        Ok(conn)
    }

    /// <https://www.postgresql.org/docs/17/protocol-flow.html#PROTOCOL-FLOW-START-UP>
    async fn startup(&mut self, config: &Config) -> Result<()> {
        use backend::Authentication;

        // To begin a session, a frontend opens a connection to the server
        // and sends a startup message.
        let database = match config.dbname.is_empty() {
            // The database to connect to. Defaults to the user name.
            true => config.user.as_str(),
            false => config.dbname.as_str(),
        };
        self.write_buf.write_startup(frontend::Startup { user: &config.user, database })?;
        self.flush().await?;

        // The server then sends an appropriate authentication request message,
        // to which the frontend must reply with an appropriate authentication
        // response message (such as a password).
        let auth = {
            let frame = self.read_message().await?;
            match frame.code {
                BackendCode::Authentication => Authentication::parse(frame.body)?,
                BackendCode::ErrorResponse => {
                    return Err(DatabaseError::decode(frame.body)?.into());
                },
                found => {
                    return Err(ProtocolError::unexpected(BackendCode::Authentication, found).into());
                },
            }
        };

        match auth {
            Authentication::Ok => {},
            Authentication::MD5Password { salt } => self.password_md5(config, salt).await?,
            // a cleartext credential on the wire is not worth supporting
            Authentication::CleartextPassword => {
                return Err(AuthError::Unsupported(backend::AUTH_CLEARTEXT).into());
            },
            Authentication::Other(method) => {
                return Err(AuthError::Unsupported(method).into());
            },
        }

        verbose!("authenticated as {:?}", config.user);

        // After having received AuthenticationOk, the frontend must wait for
        // further messages from the server. In this phase a backend process
        // is being started: some ParameterStatus messages, BackendKeyData,
        // and finally ReadyForQuery.
        loop {
            let step = {
                let frame = self.read_message().await?;
                match frame.code {
                    BackendCode::ReadyForQuery => StartupStep::Ready,
                    BackendCode::ParameterStatus => {
                        let param = backend::ParameterStatus::parse(frame.body)?;
                        StartupStep::Param((param.name, param.value))
                    },
                    BackendCode::BackendKeyData => {
                        StartupStep::KeyData(backend::BackendKeyData::parse(frame.body)?)
                    },
                    BackendCode::ErrorResponse => {
                        return Err(DatabaseError::decode(frame.body)?.into());
                    },
                    found => {
                        return Err(ProtocolError::unexpected_phase(found, "startup phase").into());
                    },
                }
            };
            match step {
                StartupStep::Ready => break,
                StartupStep::Param(param) => self.parameters.push(param),
                StartupStep::KeyData(key_data) => {
                    if self.key_data.replace(key_data).is_some() {
                        return Err(ProtocolError::unexpected_phase(
                            BackendCode::BackendKeyData,
                            "startup phase",
                        )
                        .into());
                    }
                },
            }
        }

        verbose!("connection ready, {} parameters reported", self.parameters.len());
        Ok(())
    }

    async fn password_md5(&mut self, config: &Config, salt: [u8; 4]) -> Result<()> {
        use backend::Authentication;

        if config.pass.is_empty() {
            return Err(AuthError::PasswordRequired.into());
        }

        let password = auth::md5_password(&config.user, &config.pass, salt);
        self.write_buf.write_msg(frontend::PasswordMessage { password: &password })?;
        self.flush().await?;

        let frame = self.read_message().await?;
        match frame.code {
            BackendCode::Authentication => match Authentication::parse(frame.body)? {
                Authentication::Ok => Ok(()),
                _ => Err(AuthError::Rejected(None).into()),
            },
            BackendCode::ErrorResponse => {
                Err(AuthError::Rejected(Some(DatabaseError::decode(frame.body)?)).into())
            },
            _ => Err(AuthError::Rejected(None).into()),
        }
    }

    /// Submit one query through the simple protocol.
    ///
    /// Writes a single `Query` message and flushes. The caller then drains
    /// messages until `ReadyForQuery`, by hand or with
    /// [`drain_until_ready`][Connection::drain_until_ready].
    ///
    /// <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-SIMPLE-QUERY>
    pub async fn execute_simple(&mut self, sql: &str) -> Result<()> {
        self.ensure_open()?;
        span!("execute_simple");
        self.write_buf.write_msg(frontend::Query { sql })?;
        self.flush().await
    }

    /// Submit one query through the extended protocol.
    ///
    /// Parse, Bind, Describe, Execute and Sync are written back to back into
    /// the write region and flushed once: five messages, one network write.
    /// The unnamed statement and portal are used throughout, all result
    /// columns are requested in binary format, and no row limit is set. The
    /// caller then drains messages until `ReadyForQuery`.
    ///
    /// <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-EXT-QUERY>
    pub async fn execute_extended(&mut self, sql: &str) -> Result<()> {
        self.ensure_open()?;
        span!("execute_extended");
        self.write_buf.write_msg(frontend::Parse { prepare_name: "", sql, param_oids: &[] })?;
        self.write_buf.write_msg(frontend::Bind {
            portal_name: "",
            stmt_name: "",
            result_format: PgFormat::Binary,
        })?;
        self.write_buf.write_msg(frontend::Describe { kind: b'P', name: "" })?;
        self.write_buf.write_msg(frontend::Execute { portal_name: "", max_rows: 0 })?;
        self.write_buf.write_msg(frontend::Sync)?;
        self.flush().await
    }

    /// Expose a reader over the messages that are already buffered.
    ///
    /// No io happens: the reader walks zero or more complete frames out of
    /// the bytes received so far, and `None` is returned unless at least one
    /// complete frame is buffered. Walk it with
    /// [`move_next`][MessageReader::move_next], then
    /// [`commit`][MessageReader::commit] exactly once.
    pub fn try_message_reader(&mut self) -> Result<Option<MessageReader<'_>>> {
        self.ensure_open()?;
        match self.peek_header()? {
            Some(total) if self.read_buf.available() >= total => {
                Ok(Some(MessageReader::new(&mut self.read_buf)))
            },
            _ => Ok(None),
        }
    }

    /// Suspend until the next complete message is closer.
    ///
    /// The only suspension point while draining: one bounded wait sized to
    /// exactly the unmet requirement, either the five header bytes or a
    /// known frame length. Afterwards the caller re-attempts the
    /// peek-and-commit cycle rather than assume a parsed frame.
    pub async fn wait_message(&mut self) -> Result<()> {
        self.ensure_open()?;
        match self.peek_header()? {
            Some(total) if self.read_buf.available() >= total => Ok(()),
            Some(total) => self.wait(total).await,
            None => self.wait(HEADER_LEN).await,
        }
    }

    /// Read exactly one message, suspending as needed.
    ///
    /// The frame is committed before it is returned; the next read continues
    /// after it. The borrow ends at the next buffer operation.
    pub async fn read_message(&mut self) -> Result<Frame<'_>> {
        self.ensure_open()?;
        let total = loop {
            match self.peek_header()? {
                Some(total) if self.read_buf.available() >= total => break total,
                Some(total) => self.wait(total).await?,
                None => self.wait(HEADER_LEN).await?,
            }
        };

        let wire = self.read_buf.take(total);
        let code = BackendCode::from_u8(wire[0]).expect("header was validated by the peek");
        Ok(Frame { code, body: &wire[HEADER_LEN..] })
    }

    /// Consume messages until `ReadyForQuery`.
    ///
    /// An `ErrorResponse` along the way is decoded and surfaced as the
    /// database error, after the drain reaches `ReadyForQuery` so the
    /// session stays aligned with the backend. Notices are logged, not
    /// surfaced.
    pub async fn drain_until_ready(&mut self) -> Result<()> {
        self.ensure_open()?;
        let mut server_error = None;

        loop {
            let mut ready = false;
            let mut failure: Option<crate::Error> = None;

            if let Some(mut messages) = self.try_message_reader()? {
                loop {
                    match messages.move_next() {
                        Ok(true) => {},
                        Ok(false) => break,
                        Err(err) => {
                            failure = Some(err.into());
                            break;
                        },
                    }
                    let frame = messages.current().expect("move_next returned true");
                    match frame.code {
                        BackendCode::ReadyForQuery => {
                            ready = true;
                            break;
                        },
                        BackendCode::ErrorResponse => match DatabaseError::decode(frame.body) {
                            Ok(err) => server_error = Some(err),
                            Err(err) => {
                                failure = Some(err.into());
                                break;
                            },
                        },
                        BackendCode::NoticeResponse => match DatabaseError::decode(frame.body) {
                            Ok(_notice) => {
                                #[cfg(feature = "log")]
                                log::warn!("{_notice}");
                            },
                            Err(err) => {
                                failure = Some(err.into());
                                break;
                            },
                        },
                        _ => {},
                    }
                }
                messages.commit();
            }

            if let Some(err) = failure {
                self.closed = true;
                return Err(err);
            }
            if ready {
                break;
            }
            self.wait_message().await?;
        }

        match server_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Write every buffered frontend message to the transport.
    pub async fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        verbose!("flushing {} bytes", self.write_buf.len());
        match self.write_buf.flush(&mut self.socket).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.closed = true;
                Err(err.into())
            },
        }
    }

    /// Initial run-time parameters the backend reported at startup.
    pub fn parameters(&self) -> &[(String, String)] {
        &self.parameters
    }

    /// Cancellation key data, when the backend sent one.
    pub fn backend_key_data(&self) -> Option<&backend::BackendKeyData> {
        self.key_data.as_ref()
    }

    /// Whether a fatal failure has made the connection unusable.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Parse the next buffered header, failing fast on a violation.
    fn peek_header(&mut self) -> Result<Option<usize>> {
        match FrameReader::new(self.read_buf.window()).try_parse_header() {
            Ok(Some((_, total))) => Ok(Some(total)),
            Ok(None) => Ok(None),
            Err(err) => {
                self.closed = true;
                Err(err.into())
            },
        }
    }

    /// One bounded wait for `min` buffered bytes.
    async fn wait(&mut self, min: usize) -> Result<()> {
        match self.read_buf.wait_for_data(&mut self.socket, min).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.closed = true;
                Err(err)
            },
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.closed {
            true => Err(ConnectionClosed.into()),
            false => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{ErrorKind, row};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };

    fn msg(code: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![code];
        out.extend_from_slice(&((body.len() + 4) as u32).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    fn error_fields(pairs: &[(u8, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (code, value) in pairs {
            body.push(*code);
            body.extend_from_slice(value.as_bytes());
            body.push(0);
        }
        body.push(0);
        body
    }

    async fn read_startup(io: &mut TcpStream) -> Vec<u8> {
        let mut len = [0u8; 4];
        io.read_exact(&mut len).await.unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(len) as usize - 4];
        io.read_exact(&mut body).await.unwrap();
        body
    }

    async fn read_frontend(io: &mut TcpStream) -> (u8, Vec<u8>) {
        let mut header = [0u8; 5];
        io.read_exact(&mut header).await.unwrap();
        let len = u32::from_be_bytes(header[1..5].try_into().unwrap()) as usize;
        let mut body = vec![0u8; len - 4];
        io.read_exact(&mut body).await.unwrap();
        (header[0], body)
    }

    async fn serve_trust_startup(io: &mut TcpStream) {
        let startup = read_startup(io).await;
        assert_eq!(&startup[..4], &196_608u32.to_be_bytes());
        assert!(startup.ends_with(b"\0\0"));

        let mut reply = msg(b'R', &0u32.to_be_bytes());
        reply.extend(msg(b'S', b"server_version\016.3\0"));
        reply.extend(msg(b'S', b"client_encoding\0UTF8\0"));
        reply.extend(msg(b'K', &[0, 0, 0, 7, 0, 0, 0, 42]));
        reply.extend(msg(b'Z', b"I"));
        io.write_all(&reply).await.unwrap();
    }

    async fn bind(userinfo: &str) -> (TcpListener, Config) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config =
            Config::parse(&format!("postgres://{userinfo}@127.0.0.1:{port}/postgres")).unwrap();
        (listener, config)
    }

    #[tokio::test]
    async fn startup_then_extended_query_drain() {
        let (listener, config) = bind("postgres:").await;

        let server = async {
            let (mut io, _) = listener.accept().await.unwrap();
            serve_trust_startup(&mut io).await;

            // the whole extended batch arrives as one pipelined write
            let mut codes = vec![];
            loop {
                let (code, _) = read_frontend(&mut io).await;
                codes.push(code);
                if code == b'S' {
                    break;
                }
            }
            assert_eq!(codes, [b'P', b'B', b'D', b'E', b'S']);

            let mut rowdesc = vec![0, 1];
            rowdesc.extend_from_slice(b"n\0");
            rowdesc.extend_from_slice(&[0, 0, 0, 0]); // table oid
            rowdesc.extend_from_slice(&[0, 0]); // attribute number
            rowdesc.extend_from_slice(&[0, 0, 0, 23]); // int4 oid
            rowdesc.extend_from_slice(&[0, 4]); // type size
            rowdesc.extend_from_slice(&[255, 255, 255, 255]); // type modifier
            rowdesc.extend_from_slice(&[0, 1]); // binary format

            let mut row1 = vec![0, 1];
            row1.extend_from_slice(&4i32.to_be_bytes());
            row1.extend_from_slice(&7i32.to_be_bytes());
            let mut row2 = vec![0, 1];
            row2.extend_from_slice(&(-1i32).to_be_bytes());
            let row2 = msg(b'D', &row2);

            let mut reply = msg(b'1', b"");
            reply.extend(msg(b'2', b""));
            reply.extend(msg(b'T', &rowdesc));
            reply.extend(msg(b'D', &row1));

            // second data row split mid-frame across two writes
            let (head, tail) = row2.split_at(3);
            reply.extend_from_slice(head);
            io.write_all(&reply).await.unwrap();
            io.flush().await.unwrap();
            tokio::task::yield_now().await;

            let mut rest = tail.to_vec();
            rest.extend(msg(b'C', b"SELECT 2\0"));
            rest.extend(msg(b'Z', b"I"));
            io.write_all(&rest).await.unwrap();
        };

        let client = async {
            let mut conn = Connection::connect_with(&config).await.unwrap();
            assert_eq!(conn.backend_key_data().unwrap().secret_key, 42);
            assert!(
                conn.parameters()
                    .iter()
                    .any(|(name, value)| name == "server_version" && value == "16.3")
            );

            conn.execute_extended("SELECT 7").await.unwrap();

            let mut codes = vec![];
            let mut rows = vec![];
            loop {
                let mut ready = false;
                if let Some(mut messages) = conn.try_message_reader().unwrap() {
                    while messages.move_next().unwrap() {
                        let frame = messages.current().unwrap();
                        codes.push(frame.code);
                        match frame.code {
                            BackendCode::DataRow => rows.push(
                                row::columns(frame.body)
                                    .map(|col| col.map(<[u8]>::to_vec))
                                    .collect::<Vec<_>>(),
                            ),
                            BackendCode::ReadyForQuery => ready = true,
                            _ => {},
                        }
                    }
                    messages.commit();
                }
                if ready {
                    break;
                }
                conn.wait_message().await.unwrap();
            }

            use BackendCode::*;
            assert_eq!(
                codes,
                [
                    ParseComplete,
                    BindComplete,
                    RowDescription,
                    DataRow,
                    DataRow,
                    CommandComplete,
                    ReadyForQuery,
                ],
            );
            assert_eq!(rows, [vec![Some(7i32.to_be_bytes().to_vec())], vec![None]]);
        };

        tokio::join!(server, client);
    }

    #[tokio::test]
    async fn md5_challenge_exchange() {
        let (listener, config) = bind("postgres:postgres123").await;

        let server = async {
            let (mut io, _) = listener.accept().await.unwrap();
            let _ = read_startup(&mut io).await;

            let mut challenge = 5u32.to_be_bytes().to_vec();
            challenge.extend_from_slice(&[0x01, 0x02, 0x03, 0x04]);
            io.write_all(&msg(b'R', &challenge)).await.unwrap();

            let (code, body) = read_frontend(&mut io).await;
            assert_eq!(code, b'p');
            assert_eq!(body, b"md53f5602346f4eccc0b449210d78755ada\0");

            let mut reply = msg(b'R', &0u32.to_be_bytes());
            reply.extend(msg(b'Z', b"I"));
            io.write_all(&reply).await.unwrap();
        };

        let client = async {
            let conn = Connection::connect_with(&config).await.unwrap();
            assert!(conn.backend_key_data().is_none());
        };

        tokio::join!(server, client);
    }

    #[tokio::test]
    async fn unsupported_auth_is_rejected() {
        let (listener, config) = bind("postgres:secret").await;

        let server = async {
            let (mut io, _) = listener.accept().await.unwrap();
            let _ = read_startup(&mut io).await;
            // cleartext password request
            io.write_all(&msg(b'R', &3u32.to_be_bytes())).await.unwrap();
            let mut rest = Vec::new();
            let _ = io.read_to_end(&mut rest).await;
        };

        let client = async {
            let err = Connection::connect_with(&config).await.unwrap_err();
            assert!(matches!(err.kind(), ErrorKind::Auth(AuthError::Unsupported(3))));
        };

        tokio::join!(server, client);
    }

    #[tokio::test]
    async fn server_error_surfaces_after_ready() {
        let (listener, config) = bind("postgres:").await;

        let server = async {
            let (mut io, _) = listener.accept().await.unwrap();
            serve_trust_startup(&mut io).await;

            let (code, body) = read_frontend(&mut io).await;
            assert_eq!(code, b'Q');
            assert_eq!(body, b"SELEC 1\0");

            let fields =
                error_fields(&[(b'S', "ERROR"), (b'C', "42601"), (b'M', "syntax error")]);
            let mut reply = msg(b'E', &fields);
            reply.extend(msg(b'Z', b"I"));
            io.write_all(&reply).await.unwrap();
        };

        let client = async {
            let mut conn = Connection::connect_with(&config).await.unwrap();
            conn.execute_simple("SELEC 1").await.unwrap();

            let err = conn.drain_until_ready().await.unwrap_err();
            match err.kind() {
                ErrorKind::Database(db) => {
                    assert_eq!(db.code, "42601");
                    assert_eq!(db.message, "syntax error");
                },
                other => panic!("expected database error, got {other:?}"),
            }

            // ReadyForQuery was reached, the connection is still usable
            assert!(!conn.is_closed());
        };

        tokio::join!(server, client);
    }

    #[tokio::test]
    async fn eof_closes_the_connection() {
        let (listener, config) = bind("postgres:").await;

        let server = async {
            let (mut io, _) = listener.accept().await.unwrap();
            serve_trust_startup(&mut io).await;
            let _ = read_frontend(&mut io).await;
        };

        let client = async {
            let mut conn = Connection::connect_with(&config).await.unwrap();
            conn.execute_simple("SELECT 1").await.unwrap();

            let err = conn.drain_until_ready().await.unwrap_err();
            assert!(matches!(err.kind(), ErrorKind::Closed(_)));
            assert!(conn.is_closed());

            // every further operation fails fast
            let err = conn.execute_simple("SELECT 1").await.unwrap_err();
            assert!(matches!(err.kind(), ErrorKind::Closed(_)));
        };

        tokio::join!(server, client);
    }

    #[tokio::test]
    async fn protocol_violation_closes_the_connection() {
        let (listener, config) = bind("postgres:").await;

        let server = async {
            let (mut io, _) = listener.accept().await.unwrap();
            serve_trust_startup(&mut io).await;

            let _ = read_frontend(&mut io).await;
            io.write_all(&msg(b'z', b"what")).await.unwrap();
            let mut rest = Vec::new();
            let _ = io.read_to_end(&mut rest).await;
        };

        let client = async {
            let mut conn = Connection::connect_with(&config).await.unwrap();
            conn.execute_simple("SELECT 1").await.unwrap();

            let err = conn.drain_until_ready().await.unwrap_err();
            assert!(matches!(err.kind(), ErrorKind::Protocol(_)));
            assert!(conn.is_closed());
        };

        tokio::join!(server, client);
    }
}

