//! Row operation.
//!
//! - [`Row`]
//! - [`Column`]
//! - [`ColumnMeta`]
//! - [`FromRow`]
//! - [`Decode`]
//!
//! - [`Index`]
//! - [`DecodeError`]
//!
//! Every value travels as text in a `VALUE` frame, an empty value is NULL.
use bytes::Bytes;
use std::{borrow::Cow, fmt, str::Utf8Error, string::FromUtf8Error, sync::Arc};

use crate::{
    common::unit_error,
    ext::{FmtExt, PayloadExt},
};

/// Column metadata from `COLS` or `COLS_INFO`.
///
/// Type, width, precision and scale are only reported by `COLS_INFO`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMeta {
    name: String,
    sql_type: Option<i32>,
    width: Option<i32>,
    precision: Option<i32>,
    scale: Option<i32>,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn with_info(
        name: impl Into<String>,
        sql_type: i32,
        width: i32,
        precision: i32,
        scale: i32,
    ) -> Self {
        Self {
            name: name.into(),
            sql_type: Some(sql_type),
            width: Some(width),
            precision: Some(precision),
            scale: Some(scale),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Vendor type code of the column.
    pub fn sql_type(&self) -> Option<i32> {
        self.sql_type
    }

    pub fn width(&self) -> Option<i32> {
        self.width
    }

    pub fn precision(&self) -> Option<i32> {
        self.precision
    }

    pub fn scale(&self) -> Option<i32> {
        self.scale
    }
}

/// A fetched row.
#[derive(Clone)]
pub struct Row {
    columns: Arc<[ColumnMeta]>,
    values: Vec<Bytes>,
}

impl Row {
    /// `columns` may be empty when column metadata was not requested.
    pub(crate) fn new(columns: Arc<[ColumnMeta]>, values: Vec<Bytes>) -> Self {
        Self { columns, values }
    }

    /// Returns `true` if row contains no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the number of column.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns the column metadata, empty if not requested.
    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// Raw value of the nth column, empty if NULL.
    pub fn get_raw(&self, nth: usize) -> Option<&Bytes> {
        self.values.get(nth)
    }

    /// Try get and decode column.
    pub fn try_get<I: Index, R: Decode>(&self, idx: I) -> Result<R, DecodeError> {
        let nth = idx.position(&self.columns, self.values.len())?;
        R::decode(Column::new(self.columns.clone(), nth, self.values[nth].clone()))
    }

    /// Try decode type using [`FromRow`] implementation.
    pub fn decode<D: FromRow>(self) -> Result<D, DecodeError> {
        D::from_row(self)
    }
}

impl IntoIterator for Row {
    type Item = Column;

    type IntoIter = IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter { columns: self.columns, values: self.values.into_iter().enumerate() }
    }
}

/// [`IntoIterator`] implementation from [`Row`].
#[derive(Debug)]
pub struct IntoIter {
    columns: Arc<[ColumnMeta]>,
    values: std::iter::Enumerate<std::vec::IntoIter<Bytes>>,
}

impl IntoIter {
    /// Same as [`Iterator::next`] but returns [`Result`] instead.
    pub fn try_next(&mut self) -> Result<Column, DecodeError> {
        match self.values.next() {
            Some((nth, value)) => Ok(Column::new(self.columns.clone(), nth, value)),
            None => Err(DecodeError::IndexOutOfBounds(self.columns.len())),
        }
    }
}

impl Iterator for IntoIter {
    type Item = Column;

    fn next(&mut self) -> Option<Self::Item> {
        let (nth, value) = self.values.next()?;
        Some(Column::new(self.columns.clone(), nth, value))
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_map();
        for (nth, value) in self.values.iter().enumerate() {
            match self.columns.get(nth) {
                Some(meta) => dbg.key(&meta.name()),
                None => dbg.key(&nth),
            };
            match value.is_empty() {
                true => dbg.value(&format_args!("NULL")),
                false => dbg.value(&value.lossy()),
            };
        }
        dbg.finish()
    }
}

/// A single value of a [`Row`].
#[derive(Debug, Clone)]
pub struct Column {
    columns: Arc<[ColumnMeta]>,
    nth: usize,
    value: Bytes,
}

impl Column {
    fn new(columns: Arc<[ColumnMeta]>, nth: usize, value: Bytes) -> Self {
        Self { columns, nth, value }
    }

    /// Returns column metadata, if requested.
    pub fn meta(&self) -> Option<&ColumnMeta> {
        self.columns.get(self.nth)
    }

    /// Returns column name, empty if metadata was not requested.
    pub fn name(&self) -> &str {
        self.meta().map_or("", ColumnMeta::name)
    }

    /// Returns the 0 based column position.
    pub fn position(&self) -> usize {
        self.nth
    }

    /// Return `true` if value is NULL.
    pub fn is_null(&self) -> bool {
        self.value.is_empty()
    }

    /// Extract the inner bytes as slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.value
    }

    /// Consume self into the inner [`Bytes`].
    pub fn into_value(self) -> Bytes {
        self.value
    }

    /// Try consume self into the inner [`Bytes`].
    ///
    /// Return [`DecodeError::Null`] if value is `NULL`.
    pub fn try_into_value(self) -> Result<Bytes, DecodeError> {
        match self.value.is_empty() {
            true => Err(DecodeError::Null),
            false => Ok(self.value),
        }
    }

    /// Value as utf8 text.
    pub fn try_as_str(&self) -> Result<&str, DecodeError> {
        match self.is_null() {
            true => Err(DecodeError::Null),
            false => Ok(std::str::from_utf8(&self.value)?),
        }
    }

    /// Try decode type using [`Decode`] implementation.
    pub fn decode<D: Decode>(self) -> Result<D, DecodeError> {
        D::decode(self)
    }
}

/// Query result with its rows affected.
#[derive(Debug)]
pub struct RowResult {
    pub rows_affected: u64,
}

// ===== Traits =====

/// Type that can be constructed from a row.
pub trait FromRow: Sized {
    /// Construct self from row.
    fn from_row(row: Row) -> Result<Self, DecodeError>;
}

impl FromRow for Row {
    fn from_row(row: Row) -> Result<Self, DecodeError> {
        Ok(row)
    }
}

impl FromRow for () {
    fn from_row(_: Row) -> Result<Self, DecodeError> {
        Ok(())
    }
}

macro_rules! from_row_tuple {
    ($($t:ident $i:literal),*) => {
        impl<$($t),*> FromRow for ($($t),*,)
        where
            $($t: Decode),*
        {
            fn from_row(row: Row) -> Result<Self, DecodeError> {
                Ok((
                    $(row.try_get($i)?),*,
                ))
            }
        }
    };
}

from_row_tuple!(T0 0);
from_row_tuple!(T0 0, T1 1);
from_row_tuple!(T0 0, T1 1, T2 2);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3, T4 4);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3, T4 4, T5 5);

/// A type that can be constructed from [`Column`].
pub trait Decode: Sized {
    /// Try decode self from column.
    fn decode(column: Column) -> Result<Self, DecodeError>;
}

impl Decode for Column {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        Ok(column)
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        match column.is_null() {
            true => Ok(None),
            false => column.decode().map(Some),
        }
    }
}

impl Decode for () {
    fn decode(_: Column) -> Result<Self, DecodeError> {
        Ok(())
    }
}

impl Decode for String {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        Ok(String::from_utf8(col.try_into_value()?.into())?)
    }
}

impl Decode for Bytes {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        col.try_into_value()
    }
}

impl Decode for Vec<u8> {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        col.try_into_value().map(Into::into)
    }
}

impl Decode for bool {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        match col.try_as_str()?.trim() {
            "1" | "true" | "TRUE" | "Y" | "y" => Ok(true),
            "0" | "false" | "FALSE" | "N" | "n" => Ok(false),
            other => Err(DecodeError::Invalid(format!("not a boolean: {other:?}").into())),
        }
    }
}

macro_rules! decode_number {
    ($($ty:ty),*) => {
        $(
            impl Decode for $ty {
                fn decode(col: Column) -> Result<Self, DecodeError> {
                    let value = col.try_into_value()?;
                    value.parse_decimal().ok_or_else(|| {
                        DecodeError::Invalid(
                            format!("not {}: {:?}", stringify!($ty), value.lossy()).into()
                        )
                    })
                }
            }
        )*
    };
}

decode_number!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);

/// Type that can be used for indexing column.
pub trait Index: Sized + sealed::Sealed {
    /// Returns the 0 based column position.
    fn position(self, columns: &[ColumnMeta], len: usize) -> Result<usize, DecodeError>;
}

impl Index for usize {
    fn position(self, _: &[ColumnMeta], len: usize) -> Result<usize, DecodeError> {
        match self < len {
            true => Ok(self),
            false => Err(DecodeError::IndexOutOfBounds(self)),
        }
    }
}

impl Index for &str {
    fn position(self, columns: &[ColumnMeta], len: usize) -> Result<usize, DecodeError> {
        columns
            .iter()
            .take(len)
            .position(|c| c.name().eq_ignore_ascii_case(self))
            .ok_or_else(|| DecodeError::ColumnNotFound(String::from(self).into()))
    }
}

mod sealed {
    pub trait Sealed { }
    impl Sealed for usize { }
    impl Sealed for &str { }
}

unit_error! {
    /// An error when try to [`fetch_one`][crate::query::Query::fetch_one] and not returns any row.
    pub struct RowNotFound("row not found");
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for DecodeError {
            fn from($pat: $ty) -> Self {
                $body
            }
        }
    };
}

/// An error when decoding row value.
pub enum DecodeError {
    /// Value is not utf8.
    Utf8(Utf8Error),
    /// Column requested not found.
    ColumnNotFound(Cow<'static,str>),
    /// Index requested is out of bounds.
    IndexOutOfBounds(usize),
    /// Value text does not parse as the requested type.
    Invalid(Cow<'static,str>),
    /// Row is null.
    Null,
    /// Failed to deserialize using `serde_json`.
    #[cfg(feature = "json")]
    Json(serde_json::error::Error),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to decode value, ")?;
        match self {
            Self::Utf8(e) => write!(f, "{e}"),
            Self::ColumnNotFound(name) => write!(f, "column not found: {name:?}"),
            Self::IndexOutOfBounds(u) => write!(f, "index out of bounds: {u:?}"),
            Self::Invalid(reason) => f.write_str(reason),
            Self::Null => write!(f, "unexpected NULL value"),
            #[cfg(feature = "json")]
            Self::Json(e) => write!(f, "{e}"),
        }
    }
}

from!(<Utf8Error>e => Self::Utf8(e));
from!(<FromUtf8Error>e => Self::Utf8(e.utf8_error()));
#[cfg(feature = "json")]
from!(<serde_json::error::Error>e => Self::Json(e));

impl std::error::Error for DecodeError { }

impl fmt::Debug for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn row() -> Row {
        let columns: Arc<[ColumnMeta]> =
            vec![ColumnMeta::new("ID"), ColumnMeta::new("NAME"), ColumnMeta::new("NOTE")].into();
        Row::new(columns, vec![Bytes::from("42"), Bytes::from("hera"), Bytes::new()])
    }

    #[test]
    fn get_by_index_and_name() {
        let row = row();
        assert_eq!(row.try_get::<_, i64>(0).unwrap(), 42);
        assert_eq!(row.try_get::<_, String>("name").unwrap(), "hera");
        assert_eq!(row.try_get::<_, Option<String>>("note").unwrap(), None);
        assert!(matches!(row.try_get::<_, String>(2), Err(DecodeError::Null)));
        assert!(matches!(row.try_get::<_, i32>(3), Err(DecodeError::IndexOutOfBounds(3))));
        assert!(matches!(row.try_get::<_, i32>("x"), Err(DecodeError::ColumnNotFound(_))));
        assert!(matches!(row.try_get::<_, i32>(1), Err(DecodeError::Invalid(_))));
    }

    #[test]
    fn tuple_from_row() {
        let (id, name, note) = row().decode::<(u32, String, Option<i32>)>().unwrap();
        assert_eq!((id, name.as_str(), note), (42, "hera", None));
    }

    #[test]
    fn iterate_columns() {
        let names: Vec<_> = row().into_iter().map(|c| c.name().to_owned()).collect();
        assert_eq!(names, ["ID", "NAME", "NOTE"]);

        let anonymous = Row::new(Arc::from(Vec::new()), vec![Bytes::from("1")]);
        let col = anonymous.into_iter().next().unwrap();
        assert_eq!(col.name(), "");
        assert_eq!(col.decode::<bool>().unwrap(), true);
    }

    #[test]
    fn debug_as_map() {
        assert_eq!(format!("{:?}", row()), r#"{"ID": b"42", "NAME": b"hera", "NOTE": NULL}"#);
    }
}
