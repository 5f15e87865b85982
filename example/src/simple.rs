use pgraw::{BackendCode, Connection, Result};

/// Simple query protocol: one `Query` message, drain to `ReadyForQuery`.
pub async fn main() -> Result<()> {
    let mut conn = Connection::connect_env().await?;

    for (name, value) in conn.parameters() {
        tracing::debug!("{name} = {value}");
    }

    conn.execute_simple("SELECT 'hello', NULL").await?;

    let mut rows = 0;
    loop {
        let mut ready = false;
        if let Some(mut messages) = conn.try_message_reader()? {
            while messages.move_next()? {
                let frame = messages.current().unwrap();
                match frame.code {
                    BackendCode::DataRow => rows += 1,
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

    tracing::info!("simple query returned {rows} rows");
    Ok(())
}
