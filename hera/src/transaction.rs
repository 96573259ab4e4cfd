//! The [`Transaction`] type.
use std::{
    fmt,
    io::{Read, Write},
};

use crate::{
    Result,
    common::logging,
    connection::Connection,
    executor::Executor,
    net::ReadTimeout,
};

/// Begin a transaction on the given executor.
///
/// Auto commit is disabled for the lifetime of the returned [`Transaction`].
pub fn begin<E: Executor + ?Sized>(exe: &mut E) -> Result<Transaction<'_, E::Io>> {
    let conn = exe.connection();
    conn.ensure_open()?;
    Ok(Transaction::new(conn))
}

/// An RAII implementation of transaction scope.
///
/// To begin a transaction, use [`begin`] function.
///
/// To commit transaction, use [`Transaction::commit`].
///
/// If not commited, when this structure is dropped, transaction will be rolled back.
///
/// # Example
///
/// ```no_run
/// # fn test(mut conn: hera::Connection) -> hera::Result<()> {
/// let mut tx = hera::begin(&mut conn)?;
///
/// hera::execute("insert into post(name) values('foo')", &mut tx)
///     .execute()?;
///
/// tx.commit()?;
/// # Ok(())
/// # }
/// ```
pub struct Transaction<'c, IO>
where
    IO: Read + Write + ReadTimeout,
{
    conn: &'c mut Connection<IO>,
    auto_commit: bool,
    done: bool,
}

impl<'c, IO> Transaction<'c, IO>
where
    IO: Read + Write + ReadTimeout,
{
    fn new(conn: &'c mut Connection<IO>) -> Self {
        let auto_commit = conn.auto_commit();
        conn.set_auto_commit(false);
        Self { conn, auto_commit, done: false }
    }

    /// Commit transaction.
    pub fn commit(mut self) -> Result<()> {
        self.done = true;
        self.conn.commit()
    }

    /// Roll back transaction.
    pub fn rollback(mut self) -> Result<()> {
        self.done = true;
        self.conn.rollback()
    }
}

impl<IO> Drop for Transaction<'_, IO>
where
    IO: Read + Write + ReadTimeout,
{
    fn drop(&mut self) {
        if !self.done && !self.conn.is_broken() {
            if let Err(err) = self.conn.rollback() {
                logging!(warn, "rollback on drop failed: {err}");
            }
        }
        self.conn.set_auto_commit(self.auto_commit);
    }
}

impl<IO> Executor for Transaction<'_, IO>
where
    IO: Read + Write + ReadTimeout,
{
    type Io = IO;

    fn connection(&mut self) -> &mut Connection<IO> {
        self.conn
    }
}

impl<IO> fmt::Debug for Transaction<'_, IO>
where
    IO: Read + Write + ReadTimeout,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
