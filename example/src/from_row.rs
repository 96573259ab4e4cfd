#![allow(unused)]
use hera::{Connection, FromRow, Result, execute, query, types::Json};
use serde::Deserialize;

#[derive(FromRow)]
struct Post {
    id: i32,
    name: String,
}

#[derive(FromRow)]
struct PostTuple(i32, String);

#[derive(Deserialize)]
struct Attributes {
    tags: Vec<String>,
}

#[derive(FromRow)]
struct PostAttributes {
    id: i32,
    attributes: Json<Attributes>,
}

pub fn main() -> Result<()> {
    let mut conn = Connection::connect_env()?;

    execute("insert into hera_post(id, name, attributes) values(?, ?, ?)", &mut conn)
        .bind(1)
        .bind("Deez")
        .bind(r#"{"tags":["a","b"]}"#)
        .execute()?;

    let datas = query::<_, _, Post>("select id, name from hera_post", &mut conn)
        .fetch_all()?;

    let datas = query::<_, _, PostTuple>("select id, name from hera_post", &mut conn)
        .fetch_all()?;

    let post = query::<_, _, PostAttributes>("select id, attributes from hera_post", &mut conn)
        .fetch_one()?;

    assert_eq!(post.attributes.0.tags.len(), 2);

    execute("delete from hera_post", &mut conn).execute()?;

    Ok(())
}
