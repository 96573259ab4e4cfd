use hera::{Connection, Result, begin, execute, query, query::query_row};

pub fn main() -> Result<()> {
    let mut conn = Connection::connect_env()?;

    // Execute

    let row = execute("insert into hera_post(id, name) values(?, ?)", &mut conn)
        .bind(1)
        .bind("Deez")
        .execute()?;

    execute("insert into hera_post(id, name) values(2, 'Foo')", &mut conn).execute()?;

    assert_eq!(row.rows_affected, 1);

    // Queries

    let datas = query::<_, _, (i32, String)>("select id, name from hera_post order by id", &mut conn)
        .fetch_all()?;

    assert_eq!(datas.len(), 2);

    let (_id, name) = query::<_, _, (i32, String)>("select id, name from hera_post where id = :id", &mut conn)
        .bind(1)
        .fetch_one()?;

    assert_eq!(name.as_str(), "Deez");
    assert_eq!(name, datas[0].1);

    let data = query::<_, _, (i32, String)>("select id, name from hera_post where id = 3", &mut conn)
        .fetch_optional()?;

    assert!(data.is_none());

    let rows = query::<_, _, (i32, String)>("select id, name from hera_post", &mut conn)
        .fetch_size(1)
        .fetch()?;

    for row in rows {
        let (_id, _name) = row?;
    }

    let datas = query_row("select id, name from hera_post order by id", &mut conn).fetch_all()?;

    assert_eq!(
        datas[0].try_get::<_, String>("name").unwrap().as_str(),
        "Deez"
    );

    // Batch

    let outcomes = conn.execute_batch(
        "insert into hera_post(id, name) values(?, ?)",
        (10..14).map(|id| vec![hera::Encode::encode(id), hera::Encode::encode(format!("batch{id}"))]).collect(),
    )?;

    assert_eq!(outcomes.len(), 4);

    let mut tx = begin(&mut conn)?;
    execute("delete from hera_post", &mut tx).execute()?;
    tx.commit()?;

    // Error case

    execute("select foo from", &mut conn).execute().unwrap_err();

    let _err = query::<_, _, (i32, String)>("select id, name from hera_post", &mut conn)
        .fetch_one()
        .unwrap_err();

    Ok(())
}
