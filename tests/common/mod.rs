//! Shared test helpers.

use pgconduit::Connection;

/// Connect using `DATABASE_URL`; tests are skipped when it is unset.
pub fn connect() -> Option<Connection> {
    let url = std::env::var("DATABASE_URL").ok()?;
    Some(Connection::connect(url.as_str()).expect("failed to connect"))
}
