//! Protobuf wire shapes for transaction operations.
//!
//! These are hand-written `prost::Message` impls (no `.proto`/build-step
//! pipeline) grounded on `transaction.pb.go`'s field numbering, matching
//! the pattern the original protobuf schema used: a single message with
//! one optional scalar field per value kind rather than a `oneof`, so
//! the numeric tags line up 1:1 with [`crate::core::value`]'s
//! `VAL_*` constants.

use prost::Message;

use crate::core::value::{
    TransactionValue, VAL_BOOL, VAL_BYTES, VAL_FLOAT32, VAL_FLOAT64, VAL_INT, VAL_JSON, VAL_NULL,
    VAL_STRING,
};
use crate::error::{Error, Result};

/// Wire form of [`TransactionValue`].
#[derive(Clone, PartialEq, Message)]
pub struct ProtoValue {
    #[prost(int64, optional, tag = "5")]
    pub val_int: Option<i64>,
    #[prost(bool, optional, tag = "6")]
    pub val_bool: Option<bool>,
    #[prost(float, optional, tag = "7")]
    pub val_float32: Option<f32>,
    #[prost(double, optional, tag = "8")]
    pub val_float64: Option<f64>,
    #[prost(string, optional, tag = "9")]
    pub val_string: Option<String>,
    #[prost(bytes = "vec", optional, tag = "10")]
    pub val_bytes: Option<Vec<u8>>,
    #[prost(string, optional, tag = "11")]
    pub val_json: Option<String>,
    #[prost(bool, optional, tag = "12")]
    pub val_null: Option<bool>,
}

impl From<&TransactionValue> for ProtoValue {
    fn from(v: &TransactionValue) -> Self {
        let mut p = ProtoValue::default();
        match v {
            TransactionValue::Int(i) => p.val_int = Some(*i),
            TransactionValue::Bool(b) => p.val_bool = Some(*b),
            TransactionValue::Float32(f) => p.val_float32 = Some(*f),
            TransactionValue::Float64(f) => p.val_float64 = Some(*f),
            TransactionValue::String(s) => p.val_string = Some(s.clone()),
            TransactionValue::Bytes(b) => p.val_bytes = Some(b.clone()),
            TransactionValue::Json(j) => p.val_json = Some(j.to_string()),
            TransactionValue::Null => p.val_null = Some(true),
        }
        p
    }
}

impl TryFrom<&ProtoValue> for TransactionValue {
    type Error = Error;

    fn try_from(p: &ProtoValue) -> Result<Self> {
        if let Some(i) = p.val_int {
            return Ok(TransactionValue::Int(i));
        }
        if let Some(b) = p.val_bool {
            return Ok(TransactionValue::Bool(b));
        }
        if let Some(f) = p.val_float32 {
            return Ok(TransactionValue::Float32(f));
        }
        if let Some(f) = p.val_float64 {
            return Ok(TransactionValue::Float64(f));
        }
        if let Some(s) = &p.val_string {
            return Ok(TransactionValue::String(s.clone()));
        }
        if let Some(b) = &p.val_bytes {
            return Ok(TransactionValue::Bytes(b.clone()));
        }
        if let Some(j) = &p.val_json {
            let parsed: serde_json::Value = serde_json::from_str(j)?;
            return Ok(TransactionValue::Json(parsed));
        }
        if p.val_null.unwrap_or(false) {
            return Ok(TransactionValue::Null);
        }
        Ok(TransactionValue::Null)
    }
}

/// Wire form of a [`crate::txn::operation::TransactionObject`]: either a
/// literal value, a block-local variable reference, or a database
/// object reference, each optionally followed by an accessor path.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoObject {
    #[prost(message, optional, tag = "1")]
    pub literal: Option<ProtoValue>,
    #[prost(uint32, optional, tag = "2")]
    pub var_block_id: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub var_id: Option<u32>,
    #[prost(string, optional, tag = "4")]
    pub container: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub key: Option<String>,
    #[prost(string, repeated, tag = "6")]
    pub accessors: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SetRecord {
    #[prost(message, optional, tag = "1")]
    pub dest: Option<ProtoObject>,
    #[prost(message, optional, tag = "2")]
    pub value: Option<ProtoObject>,
    #[prost(bool, tag = "3")]
    pub partial: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct GetRecord {
    #[prost(message, optional, tag = "1")]
    pub src: Option<ProtoObject>,
    #[prost(message, optional, tag = "2")]
    pub dest: Option<ProtoObject>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ReturnRecord {
    #[prost(message, repeated, tag = "1")]
    pub args: Vec<ProtoObject>,
}

pub fn encode_message<M: Message>(msg: &M) -> Vec<u8> {
    let mut buf = Vec::with_capacity(msg.encoded_len());
    // `Vec<u8>` implements `BufMut`; encoding into it can't fail for an
    // unbounded buffer.
    msg.encode(&mut buf).expect("encoding into a Vec can't fail");
    buf
}

pub fn decode_message<M: Message + Default>(bytes: &[u8]) -> Result<M> {
    M::decode(bytes).map_err(Error::from)
}
