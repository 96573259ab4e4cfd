//! Hera Driver
//!
//! Synchronous client of the Hera database proxy. Statements travel as
//! netstring frames over a single TCP (optionally TLS) connection, the proxy
//! forwards them to the database and routes them to a shard when sharding is
//! enabled.
//!
//! # Examples
//!
//! Single connection:
//!
//! ```no_run
//! use hera::Connection;
//!
//! # fn app() -> hera::Result<()> {
//! let mut conn = Connection::connect_env()?;
//!
//! let res = hera::query::<_, _, (i32, String)>("select 420, :name from dual", &mut conn)
//!     .bind("Foo")
//!     .fetch_one()?;
//!
//! assert_eq!(res.0, 420);
//! assert_eq!(res.1.as_str(), "Foo");
//! # Ok(())
//! # }
//! ```
//!
//! Transaction:
//!
//! ```no_run
//! # fn app(mut conn: hera::Connection) -> hera::Result<()> {
//! let mut tx = hera::begin(&mut conn)?;
//!
//! for id in 0..14 {
//!     hera::execute("insert into foo(id) values(?)", &mut tx)
//!         .bind(id)
//!         .execute()?;
//! }
//!
//! tx.commit()?;
//!
//! let foos = hera::query::<_, _, (i32,)>("select id from foo", &mut conn)
//!     .fetch_all()?;
//!
//! assert_eq!(foos.len(), 14);
//! # Ok(())
//! # }
//! ```

pub mod common;
mod io;
pub mod net;
mod ext;

// Protocol
pub mod protocol;
pub mod transport;
pub mod session;

// Encoding
pub mod encode;
pub mod row;
pub mod types;

// Component
pub mod statement;
pub mod sql;
pub mod shard;
pub mod errcode;
pub mod telemetry;

// Operation
pub mod executor;
pub mod fetch;
pub mod query;
pub mod transaction;

// Connection
pub mod connection;
pub mod registry;

mod error;


pub use encode::Encode;
pub use row::{Row, FromRow, Decode, DecodeError, Column};
pub use sql::SqlExt;

pub use executor::Executor;
pub use connection::{Connection, Config};
pub use registry::Registry;
#[doc(inline)]
pub use query::{query, execute, begin};
pub use error::{Error, ErrorKind, Result};

#[cfg(feature = "macros")]
pub use hera_macros::FromRow;
