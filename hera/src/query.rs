//! Query API types.
use std::{fmt, marker::PhantomData};

use crate::{
    FromRow, Result, Row,
    encode::{Encode, Encoded},
    executor::Executor,
    fetch::{self, Fetch},
    row::RowResult,
    sql::Sql,
};

#[doc(inline)]
pub use crate::transaction::begin;

/// Entrypoint of the query API.
pub fn query<SQL, Exe, R>(sql: SQL, exe: Exe) -> Query<SQL, Exe, R> {
    Query { sql, exe, params: Vec::new(), fetch_size: 0, _p: PhantomData }
}

/// Same as [`query`] with [`Row`] as the output.
pub fn query_row<SQL, Exe>(sql: SQL, exe: Exe) -> Query<SQL, Exe, Row> {
    query(sql, exe)
}

/// Same as [`query`] with [`Row`] as the output.
pub fn execute<SQL, Exe>(sql: SQL, exe: Exe) -> Query<SQL, Exe, Row> {
    query(sql, exe)
}

/// The query API.
///
/// Parameters are bound positionally, to the `?` or `:name` placeholders in
/// order of appearance.
#[must_use = "query does nothing until executed or fetched"]
pub struct Query<SQL, Exe, R> {
    sql: SQL,
    exe: Exe,
    params: Vec<Encoded>,
    fetch_size: u32,
    _p: PhantomData<R>,
}

impl<SQL, Exe, R> Query<SQL, Exe, R> {
    /// Bind query parameter.
    pub fn bind<V: Encode>(mut self, value: V) -> Self {
        self.params.push(value.encode());
        self
    }

    /// Set the number of rows requested per round, `0` requests every row.
    pub fn fetch_size(mut self, rows: u32) -> Self {
        self.fetch_size = rows;
        self
    }
}

impl<SQL, Exe, R> Query<SQL, Exe, R>
where
    SQL: Sql,
    Exe: Executor,
    R: FromRow,
{
    /// Fetch rows lazily, one round at a time.
    ///
    /// Rows left in the returned iterator are discarded by the next statement.
    pub fn fetch(mut self) -> Result<Fetch<Exe, R>> {
        let conn = self.exe.connection();
        fetch::start(conn, &self.sql, self.params, self.fetch_size)?;
        Ok(Fetch::new(self.exe, self.fetch_size))
    }

    /// Fetch all rows into [`Vec`].
    pub fn fetch_all(mut self) -> Result<Vec<R>> {
        let conn = self.exe.connection();
        match fetch::start(conn, &self.sql, self.params, self.fetch_size)? {
            true => fetch::fetch_all(conn, self.fetch_size),
            false => Ok(Vec::new()),
        }
    }

    /// Fetch one row.
    ///
    /// Returns [`RowNotFound`][crate::row::RowNotFound] if the statement
    /// produces no row.
    pub fn fetch_one(mut self) -> Result<R> {
        let conn = self.exe.connection();
        fetch::start(conn, &self.sql, self.params, self.fetch_size)?;
        fetch::fetch_one(conn, self.fetch_size)
    }

    /// Optionally fetch one row.
    pub fn fetch_optional(mut self) -> Result<Option<R>> {
        let conn = self.exe.connection();
        match fetch::start(conn, &self.sql, self.params, self.fetch_size)? {
            true => fetch::fetch_optional(conn, self.fetch_size),
            false => Ok(None),
        }
    }
}

impl<SQL, Exe, R> Query<SQL, Exe, R>
where
    SQL: Sql,
    Exe: Executor,
{
    /// Execute statement and return number of rows affected.
    pub fn execute(mut self) -> Result<RowResult> {
        let conn = self.exe.connection();
        let has_rows = fetch::start(conn, &self.sql, self.params, self.fetch_size)?;
        fetch::execute(conn, has_rows)
    }
}

impl<SQL: fmt::Debug, Exe, R> fmt::Debug for Query<SQL, Exe, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("sql", &self.sql)
            .field("params", &self.params)
            .field("fetch_size", &self.fetch_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        Connection, ErrorKind, SqlExt,
        connection::Config,
        io::mock::Scripted,
        protocol::{Opcode, opcode::response},
    };

    const V: Opcode = response::VALUE;
    const OK: Opcode = response::OK;
    const DONE: Opcode = response::NO_MORE_DATA;

    fn connect(frames: &[(Opcode, &str)]) -> Connection<Scripted> {
        let mut config = Config::new("localhost", 10101);
        config.set("hera.support.column_info", "false").unwrap();
        Connection::from_io(Scripted::new(frames), config)
    }

    const ACCOUNTS: [(Opcode, &str); 10] = [
        (V, "2"), (V, "0"), (V, "2"), (V, "ID"), (V, "NAME"),
        (V, "1"), (V, "alice"),
        (V, "2"), (V, "bob"),
        (DONE, ""),
    ];

    #[test]
    fn fetch_all_rows() {
        let mut conn = connect(&ACCOUNTS);
        let rows = query::<_, _, (i64, String)>("select id, name from account", &mut conn)
            .fetch_all()
            .unwrap();
        assert_eq!(rows, [(1, "alice".to_owned()), (2, "bob".to_owned())]);
        assert!(!conn.has_pending_rows());
    }

    #[test]
    fn fetch_one_and_optional() {
        let mut conn = connect(&ACCOUNTS);
        let (id, name) = query::<_, _, (i64, String)>("select id, name from account where region = ?", &mut conn)
            .bind("eu")
            .fetch_one()
            .unwrap();
        assert_eq!((id, name.as_str()), (1, "alice"));
        assert!(conn.get_ref().sent().contains("8:2 region,4:3 eu,"));

        let mut conn = connect(&[(V, "1"), (V, "0"), (V, "1"), (V, "ID"), (DONE, "")]);
        let row = query::<_, _, (i64,)>("select id from account where 1 = 0", &mut conn)
            .fetch_optional()
            .unwrap();
        assert!(row.is_none());

        let mut conn = connect(&[(V, "1"), (V, "0"), (V, "1"), (V, "ID"), (DONE, "")]);
        let err = query::<_, _, (i64,)>("select id from account where 1 = 0", &mut conn)
            .fetch_one()
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::RowNotFound(_)));
    }

    #[test]
    fn fetch_in_rounds() {
        let mut conn = connect(&[
            (V, "1"), (V, "0"), (V, "1"), (V, "ID"),
            (V, "1"), (V, "2"), (OK, ""),
            (V, "3"), (DONE, ""),
        ]);
        let ids = query::<_, _, (i64,)>("select id from account", &mut conn)
            .fetch_size(2)
            .fetch()
            .unwrap()
            .map(|row| row.map(|(id,)| id))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(ids, [1, 2, 3]);
        let sent = conn.get_ref().sent();
        assert_eq!(sent.matches("3:7 2,").count(), 2);
    }

    #[test]
    fn execute_returns_rows_affected() {
        let mut conn = connect(&[(V, "0"), (V, "3"), (OK, "")]);
        let result = execute("delete from account where id < ?", &mut conn)
            .bind("10")
            .execute()
            .unwrap();
        assert_eq!(result.rows_affected, 3);
        assert!(conn.get_ref().sent().ends_with("1:4,,1:8,"));
    }

    #[test]
    fn once_is_not_cached() {
        let mut conn = connect(&[(V, "0"), (V, "1"), (OK, "")]);
        execute("update account set a = 1".once(), &mut conn).execute().unwrap();
        assert!(conn.get_ref().sent().contains("/* DisableStmtCache */ update account set a = 1"));
        assert!(conn.statement_cache().is_empty());
    }
}
