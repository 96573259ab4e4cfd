use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    Decode, DecodeError, Encode,
    common::logging,
    encode::Encoded,
    row::Column,
};

/// Decode and Encode a json text value.
///
/// If the [`Serialize`] implementation fails during [`Encode`], the error is
/// logged and the value is bound as `NULL`.
#[derive(Debug)]
pub struct Json<T>(pub T);

impl<T> Decode for Json<T>
where
    T: DeserializeOwned,
{
    fn decode(column: Column) -> Result<Self, DecodeError> {
        let value = column.try_into_value()?;
        serde_json::from_slice(&value).map(Json).map_err(Into::into)
    }
}

impl<T: Serialize> Encode for Json<T> {
    fn encode(self) -> Encoded {
        match serde_json::to_vec(&self.0) {
            Ok(json) => Encoded::string(json),
            Err(_err) => {
                logging!(error, "json serialization failed, binding null: {_err}");
                Encoded::null()
            }
        }
    }
}

impl<T: Serialize> Serialize for Json<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Json<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(Self(T::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn encode_object() {
        let encoded = Json(BTreeMap::from([("id", 7)])).encode();
        assert_eq!(&encoded.value()[..], br#"{"id":7}"#);
    }

    #[test]
    fn unserializable_binds_null() {
        // json object keys must be strings
        let encoded = Json(BTreeMap::from([((1, 2), 3)])).encode();
        assert!(encoded.is_null());
    }
}
