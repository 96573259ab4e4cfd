use time::{
    OffsetDateTime, PrimitiveDateTime, UtcDateTime, UtcOffset,
    format_description::BorrowedFormatItem,
    macros::format_description,
};

use crate::{
    Decode, DecodeError, Encode,
    encode::Encoded,
    protocol::BindType,
    row::Column,
};

/// `dd-MM-yyyy HH:mm:ss.SSS`
const WRITE: &[BorrowedFormatItem<'_>] =
    format_description!("[day]-[month]-[year] [hour]:[minute]:[second].[subsecond digits:3]");

const READ: &[BorrowedFormatItem<'_>] =
    format_description!("[day]-[month]-[year] [hour]:[minute]:[second].[subsecond]");

const OFFSET: &[BorrowedFormatItem<'_>] =
    format_description!("[offset_hour sign:mandatory]:[offset_minute]");

fn invalid(e: impl std::fmt::Display) -> DecodeError {
    DecodeError::Invalid(e.to_string().into())
}

fn format_offset(offset: UtcOffset) -> String {
    match offset.is_utc() {
        true => String::from("Z"),
        false => offset.format(OFFSET).expect("format is statically known"),
    }
}

impl Encode for PrimitiveDateTime {
    fn encode(self) -> Encoded {
        Encoded::new(
            self.format(WRITE).expect("format is statically known"),
            BindType::Timestamp,
        )
    }
}

impl Encode for OffsetDateTime {
    fn encode(self) -> Encoded {
        let datetime = self.format(WRITE).expect("format is statically known");
        Encoded::new(
            format!("{datetime} {}", format_offset(self.offset())),
            BindType::TimestampTz,
        )
    }
}

impl Encode for UtcDateTime {
    fn encode(self) -> Encoded {
        self.to_offset(UtcOffset::UTC).encode()
    }
}

impl Decode for PrimitiveDateTime {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        PrimitiveDateTime::parse(column.try_as_str()?.trim(), READ).map_err(invalid)
    }
}

impl Decode for OffsetDateTime {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        let value = column.try_as_str()?.trim();
        let (datetime, offset) = match value.rsplit_once(' ') {
            Some((datetime, "Z")) => (datetime, UtcOffset::UTC),
            Some((datetime, offset)) if offset.starts_with(['+', '-']) => {
                (datetime, UtcOffset::parse(offset, OFFSET).map_err(invalid)?)
            }
            _ => (value, UtcOffset::UTC),
        };
        Ok(PrimitiveDateTime::parse(datetime, READ).map_err(invalid)?.assume_offset(offset))
    }
}

impl Decode for UtcDateTime {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        OffsetDateTime::decode(column).map(|dt| dt.to_utc())
    }
}
