//! Statement execution and row fetching behind the query API.
use std::{collections::VecDeque, fmt, marker::PhantomData};

use crate::{
    FromRow, Result, Row,
    connection::Connection,
    encode::Encoded,
    executor::Executor,
    net::ReadTimeout,
    row::{RowNotFound, RowResult},
    sql::Sql,
};

/// Prepare, bind and run a statement.
///
/// Returns `true` if the statement produces rows, whose first round is
/// already requested.
pub(crate) fn start<IO>(
    conn: &mut Connection<IO>,
    sql: &impl Sql,
    params: Vec<Encoded>,
    fetch_size: u32,
) -> Result<bool>
where
    IO: std::io::Read + std::io::Write + ReadTimeout,
{
    let entry = conn.prepare(&sql.statement())?;
    conn.bind(&entry, params)?;
    conn.run(&entry, fetch_size)
}

/// Fetch every row of the running statement.
pub(crate) fn fetch_all<IO, R>(conn: &mut Connection<IO>, fetch_size: u32) -> Result<Vec<R>>
where
    IO: std::io::Read + std::io::Write + ReadTimeout,
    R: FromRow,
{
    let mut output = Vec::new();
    while conn.has_pending_rows() {
        for row in conn.fetch(fetch_size)? {
            output.push(R::from_row(row)?);
        }
    }
    Ok(output)
}

/// Fetch the first row of the running statement.
///
/// Remaining rows are discarded by the next statement.
pub(crate) fn fetch_optional<IO, R>(conn: &mut Connection<IO>, fetch_size: u32) -> Result<Option<R>>
where
    IO: std::io::Read + std::io::Write + ReadTimeout,
    R: FromRow,
{
    while conn.has_pending_rows() {
        if let Some(row) = conn.fetch(fetch_size)?.into_iter().next() {
            return Ok(Some(R::from_row(row)?));
        }
    }
    Ok(None)
}

pub(crate) fn fetch_one<IO, R>(conn: &mut Connection<IO>, fetch_size: u32) -> Result<R>
where
    IO: std::io::Read + std::io::Write + ReadTimeout,
    R: FromRow,
{
    fetch_optional(conn, fetch_size)?.ok_or_else(|| RowNotFound.into())
}

/// Run the statement to completion, discarding any row.
pub(crate) fn execute<IO>(conn: &mut Connection<IO>, has_rows: bool) -> Result<RowResult>
where
    IO: std::io::Read + std::io::Write + ReadTimeout,
{
    if has_rows {
        while conn.has_pending_rows() {
            conn.fetch(0)?;
        }
    }
    Ok(RowResult { rows_affected: conn.rows_affected() })
}

/// Iterator of rows, fetched one round at a time.
///
/// Rows left unread when this is dropped are discarded by the next statement.
/// After an error the iterator is exhausted.
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Fetch<Exe, R> {
    exe: Exe,
    buffer: VecDeque<Row>,
    fetch_size: u32,
    failed: bool,
    _p: PhantomData<R>,
}

impl<Exe, R> Fetch<Exe, R> {
    pub(crate) fn new(exe: Exe, fetch_size: u32) -> Self {
        Self { exe, buffer: VecDeque::new(), fetch_size, failed: false, _p: PhantomData }
    }
}

impl<Exe, R> Iterator for Fetch<Exe, R>
where
    Exe: Executor,
    R: FromRow,
{
    type Item = Result<R>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        while self.buffer.is_empty() {
            let conn = self.exe.connection();
            if !conn.has_pending_rows() {
                return None;
            }
            match conn.fetch(self.fetch_size) {
                Ok(rows) => self.buffer.extend(rows),
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }

        let row = self.buffer.pop_front()?;
        Some(R::from_row(row).map_err(Into::into))
    }
}

impl<Exe, R> fmt::Debug for Fetch<Exe, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetch")
            .field("buffered", &self.buffer.len())
            .field("fetch_size", &self.fetch_size)
            .finish_non_exhaustive()
    }
}
