use pgraw::{BackendCode, Connection, Result, row};

/// Extended query protocol: Parse, Bind, Describe, Execute and Sync leave as
/// one network write, result columns arrive in binary format.
pub async fn main() -> Result<()> {
    let mut conn = Connection::connect_env().await?;

    conn.execute_extended("SELECT oid, typname FROM pg_type").await?;

    let mut rows = 0;
    let mut bytes = 0usize;
    loop {
        let mut ready = false;
        if let Some(mut messages) = conn.try_message_reader()? {
            while messages.move_next()? {
                let frame = messages.current().unwrap();
                match frame.code {
                    BackendCode::DataRow => {
                        rows += 1;
                        for column in row::columns(frame.body).flatten() {
                            bytes += column.len();
                        }
                    },
                    BackendCode::ReadyForQuery => ready = true,
                    _ => {},
                }
            }
            messages.commit();
        }
        if ready {
            break;
        }
        conn.wait_message().await?;
    }

    tracing::info!("extended query returned {rows} rows, {bytes} raw column bytes");
    Ok(())
}
