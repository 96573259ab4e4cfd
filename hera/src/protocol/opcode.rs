//! Wire opcodes.
//!
//! Request and response codes share the same numeric space, the meaning of an
//! opcode depends on which side sent the frame.

/// Frame opcode.
pub type Opcode = u32;

/// Reserved opcode of a frame whose payload is a concatenation of frames.
pub const BATCH: Opcode = 0;

/// Number of scuttle buckets used by sharded tables.
pub const MAX_SCUTTLE_BUCKETS: u32 = 1024;

/// Commands sent by the client for statement execution.
pub mod request {
    use super::Opcode;

    pub const PREPARE: Opcode = 1;
    pub const BIND_NAME: Opcode = 2;
    pub const BIND_VALUE: Opcode = 3;
    pub const EXECUTE: Opcode = 4;
    pub const ROWS: Opcode = 5;
    pub const COLS: Opcode = 6;
    pub const FETCH: Opcode = 7;
    pub const COMMIT: Opcode = 8;
    pub const ROLLBACK: Opcode = 9;
    pub const BIND_TYPE: Opcode = 10;
    pub const CLIENT_INFO: Opcode = 11;
    pub const BACKTRACE: Opcode = 12;
    pub const BIND_OUT_NAME: Opcode = 13;
    pub const PREPARE_SPECIAL: Opcode = 14;
    pub const TRANS_START: Opcode = 15;
    pub const TRANS_TIMEOUT: Opcode = 16;
    pub const TRANS_ROLE: Opcode = 17;
    pub const TRANS_PREPARE: Opcode = 18;
    pub const SQL_STMT_CACHING: Opcode = 19;
    pub const COLS_INFO: Opcode = 22;
    pub const ARRAY_LENGTH: Opcode = 23;
    pub const ARRAY_MAX_VALUESZ: Opcode = 24;
    pub const PREPARE_V2: Opcode = 25;
    pub const SHARD_KEY: Opcode = 27;
    pub const GET_NUM_SHARDS: Opcode = 28;
    pub const SET_SHARD_ID: Opcode = 29;
}

/// Responses to statement commands.
pub mod response {
    use super::Opcode;

    pub const SQL_ERROR: Opcode = 1;
    pub const ERROR: Opcode = 2;
    pub const VALUE: Opcode = 3;
    pub const HELLO: Opcode = 4;
    pub const OK: Opcode = 5;
    pub const NO_MORE_DATA: Opcode = 6;
    pub const STILL_EXECUTING: Opcode = 7;
    pub const MARKDOWN: Opcode = 8;
}

/// Connection level codes sent by the proxy.
pub mod server {
    use super::Opcode;

    pub const CHALLENGE: Opcode = 1001;
    pub const CONNECTION_ACCEPTED: Opcode = 1002;
    pub const REJECTED_PROTOCOL: Opcode = 1003;
    pub const REJECTED_UNKNOWN_USER: Opcode = 1004;
    pub const REJECTED_FAILED_AUTH: Opcode = 1005;
    pub const UNEXPECTED_COMMAND: Opcode = 1006;
    pub const INTERNAL_ERROR: Opcode = 1007;
    pub const PING_COMMAND: Opcode = 1008;
    pub const ALIVE: Opcode = 1009;
    pub const REJECTED_CLIENT_TIME: Opcode = 1010;
    pub const SERVER_INFO: Opcode = 1011;
}

/// Connection level codes sent by the client.
pub mod client {
    use super::Opcode;

    pub const PROTOCOL_NAME_NOAUTH: Opcode = 2001;
    pub const PROTOCOL_NAME: Opcode = 2002;
    pub const USERNAME: Opcode = 2003;
    pub const CHALLENGE_RESPONSE: Opcode = 2004;
    pub const CURRENT_CLIENT_TIME: Opcode = 2005;
    pub const CAL_CORRELATION_ID: Opcode = 2006;
}

/// Type of a bound value, sent with `BIND_TYPE` when not [`BindType::String`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BindType {
    #[default]
    String = 0,
    Blob = 1,
    Clob = 2,
    Raw = 3,
    BlobSingleRound = 4,
    ClobSingleRound = 5,
    Timestamp = 6,
    TimestampTz = 7,
}

impl BindType {
    /// Returns the wire value.
    pub const fn value(self) -> u8 {
        self as u8
    }

    /// Lookup bind type by its wire value.
    pub const fn from_value(value: u8) -> Option<BindType> {
        Some(match value {
            0 => Self::String,
            1 => Self::Blob,
            2 => Self::Clob,
            3 => Self::Raw,
            4 => Self::BlobSingleRound,
            5 => Self::ClobSingleRound,
            6 => Self::Timestamp,
            7 => Self::TimestampTz,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod test {
    use super::BindType;

    #[test]
    fn bind_type_wire_value() {
        for v in 0..8u8 {
            assert_eq!(BindType::from_value(v).map(BindType::value), Some(v));
        }
        assert_eq!(BindType::from_value(8), None);
        assert_eq!(BindType::default(), BindType::String);
    }
}
