
/// Postgres data transmission format.
///
/// Data of a particular data type might be transmitted in any of several different formats.
/// As of PostgreSQL 7.4 the only supported formats are “text” and “binary”.
///
/// In this library, all result columns use [`Binary`][b].
///
/// <https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-FORMAT-CODES>
///
/// [b]: PgFormat::Binary
#[derive(Debug, Clone, Copy)]
pub enum PgFormat {
    /// Text has format code zero.
    ///
    /// In the text transmitted representation, there is no trailing null character;
    /// the frontend must add one to received values if it wants to process them as C strings.
    Text,
    /// Binary has format code one.
    ///
    /// Binary representations for integers use network byte order (most significant byte first).
    /// Keep in mind that binary representations for complex data types might change across server versions.
    Binary,
}

impl PgFormat {
    /// Return format code for current format.
    pub fn format_code(&self) -> u16 {
        match self {
            PgFormat::Text => 0,
            PgFormat::Binary => 1,
        }
    }
}
