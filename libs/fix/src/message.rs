//! Message container and protocol constants.

use std::fmt;

/// Field delimiter.
pub const SOH: u8 = 0x01;

/// BeginString value for every message this exchange speaks.
pub const BEGIN_STRING: &str = "FIX.4.2";

/// Tag numbers used by the supported message set.
pub mod tags {
    pub const AVG_PX: u32 = 6;
    pub const BEGIN_STRING: u32 = 8;
    pub const BODY_LENGTH: u32 = 9;
    pub const CHECKSUM: u32 = 10;
    pub const CL_ORD_ID: u32 = 11;
    pub const CUM_QTY: u32 = 14;
    pub const EXEC_ID: u32 = 17;
    pub const LAST_PX: u32 = 31;
    pub const LAST_QTY: u32 = 32;
    pub const MSG_SEQ_NUM: u32 = 34;
    pub const MSG_TYPE: u32 = 35;
    pub const ORDER_ID: u32 = 37;
    pub const ORDER_QTY: u32 = 38;
    pub const ORD_STATUS: u32 = 39;
    pub const ORD_TYPE: u32 = 40;
    pub const ORIG_CL_ORD_ID: u32 = 41;
    pub const PRICE: u32 = 44;
    pub const REF_SEQ_NUM: u32 = 45;
    pub const SENDER_COMP_ID: u32 = 49;
    pub const SENDING_TIME: u32 = 52;
    pub const SIDE: u32 = 54;
    pub const SYMBOL: u32 = 55;
    pub const TARGET_COMP_ID: u32 = 56;
    pub const TEXT: u32 = 58;
    pub const TRANSACT_TIME: u32 = 60;
    pub const HEART_BT_INT: u32 = 108;
    pub const TEST_REQ_ID: u32 = 112;
    pub const EXEC_TYPE: u32 = 150;
    pub const CXL_REJ_REASON: u32 = 434;
}

/// The message types (tag 35) this exchange accepts or emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    Heartbeat,
    SessionReject,
    Logout,
    ExecutionReport,
    OrderCancelReject,
    Logon,
    NewOrderSingle,
    OrderCancelRequest,
}

impl MsgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MsgType::Heartbeat => "0",
            MsgType::SessionReject => "3",
            MsgType::Logout => "5",
            MsgType::ExecutionReport => "8",
            MsgType::OrderCancelReject => "9",
            MsgType::Logon => "A",
            MsgType::NewOrderSingle => "D",
            MsgType::OrderCancelRequest => "F",
        }
    }

    pub fn from_str(code: &str) -> Option<Self> {
        match code {
            "0" => Some(MsgType::Heartbeat),
            "3" => Some(MsgType::SessionReject),
            "5" => Some(MsgType::Logout),
            "8" => Some(MsgType::ExecutionReport),
            "9" => Some(MsgType::OrderCancelReject),
            "A" => Some(MsgType::Logon),
            "D" => Some(MsgType::NewOrderSingle),
            "F" => Some(MsgType::OrderCancelRequest),
            _ => None,
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed FIX message: tag-value pairs in wire order.
///
/// Duplicate tags are kept (first one wins on lookup), and field order is
/// preserved so a decoded message can be re-encoded byte-identically.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FixMessage {
    fields: Vec<(u32, String)>,
}

impl FixMessage {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn push(&mut self, tag: u32, value: impl Into<String>) {
        self.fields.push((tag, value.into()));
    }

    /// First value for `tag`, if present.
    pub fn get(&self, tag: u32) -> Option<&str> {
        self.fields
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, tag: u32) -> bool {
        self.get(tag).is_some()
    }

    /// Message type, when tag 35 holds a supported code.
    pub fn msg_type(&self) -> Option<MsgType> {
        self.get(tags::MSG_TYPE).and_then(MsgType::from_str)
    }

    /// Raw tag 35 value (may be an unsupported type).
    pub fn raw_msg_type(&self) -> Option<&str> {
        self.get(tags::MSG_TYPE)
    }

    pub fn seq_num(&self) -> Option<u64> {
        self.get(tags::MSG_SEQ_NUM).and_then(|v| v.parse().ok())
    }

    pub fn sender(&self) -> Option<&str> {
        self.get(tags::SENDER_COMP_ID)
    }

    pub fn target(&self) -> Option<&str> {
        self.get(tags::TARGET_COMP_ID)
    }

    pub fn fields(&self) -> &[(u32, String)] {
        &self.fields
    }
}
