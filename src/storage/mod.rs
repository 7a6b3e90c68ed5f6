mod schema;
mod session;
mod types;

pub use schema::Database;
pub use session::{ACCESS_TOKEN_KEY, USER_KEY};
pub use types::{DatabaseError, StoredSession};
