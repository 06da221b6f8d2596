//! In-memory operation IR: the instructions a [`crate::txn::types::TransactionBlock`]
//! runs against a view-state, and their protobuf encoding as carried
//! inside an `obj_op` mutation's `op_bytes`.

use crate::core::value::TransactionValue;
use crate::error::{Error, Result};
use crate::txn::wire::{
    self, GetRecord, ProtoObject, ProtoValue, ReturnRecord, SetRecord,
};

/// `op_id` values as carried on the wire. Kept as free constants plus a
/// dispatching `decode` rather than a mutable global registry, to avoid
/// registration-order hazards across crate boundaries.
pub const OP_RETURN: u16 = 2;
pub const OP_SET: u16 = 3;
pub const OP_GET: u16 = 4;

/// Something an operation can read from or write to: a literal value, a
/// block-local variable, or a `(container, key)` database object,
/// optionally walked through a nested accessor path.
#[derive(Clone, Debug, PartialEq)]
pub enum TransactionObject {
    Literal(TransactionValue),
    Variable { block_id: u32, var_id: u32, accessors: Vec<String> },
    DbObject { container: String, key: String, accessors: Vec<String> },
}

impl TransactionObject {
    pub fn literal(v: impl Into<TransactionValue>) -> Self {
        TransactionObject::Literal(v.into())
    }

    pub fn variable(block_id: u32, var_id: u32) -> Self {
        TransactionObject::Variable { block_id, var_id, accessors: Vec::new() }
    }

    pub fn db_object(container: impl Into<String>, key: impl Into<String>) -> Self {
        TransactionObject::DbObject { container: container.into(), key: key.into(), accessors: Vec::new() }
    }

    pub fn with_accessors(mut self, path: Vec<String>) -> Self {
        match &mut self {
            TransactionObject::Variable { accessors, .. }
            | TransactionObject::DbObject { accessors, .. } => *accessors = path,
            TransactionObject::Literal(_) => {}
        }
        self
    }

    pub fn accessors(&self) -> &[String] {
        match self {
            TransactionObject::Variable { accessors, .. } => accessors,
            TransactionObject::DbObject { accessors, .. } => accessors,
            TransactionObject::Literal(_) => &[],
        }
    }

    fn to_proto(&self) -> ProtoObject {
        let mut p = ProtoObject::default();
        match self {
            TransactionObject::Literal(v) => p.literal = Some(ProtoValue::from(v)),
            TransactionObject::Variable { block_id, var_id, accessors } => {
                p.var_block_id = Some(*block_id);
                p.var_id = Some(*var_id);
                p.accessors = accessors.clone();
            }
            TransactionObject::DbObject { container, key, accessors } => {
                p.container = Some(container.clone());
                p.key = Some(key.clone());
                p.accessors = accessors.clone();
            }
        }
        p
    }

    fn from_proto(p: &ProtoObject) -> Result<Self> {
        if let (Some(container), Some(key)) = (&p.container, &p.key) {
            return Ok(TransactionObject::DbObject {
                container: container.clone(),
                key: key.clone(),
                accessors: p.accessors.clone(),
            });
        }
        if let (Some(block_id), Some(var_id)) = (p.var_block_id, p.var_id) {
            return Ok(TransactionObject::Variable { block_id, var_id, accessors: p.accessors.clone() });
        }
        if let Some(literal) = &p.literal {
            return Ok(TransactionObject::Literal(TransactionValue::try_from(literal)?));
        }
        Err(Error::Codec("empty transaction object".into()))
    }
}

/// One instruction inside a transaction block.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    /// Write `value` into `dest`. `dest` addresses either a block
    /// variable or a database object.
    Set { dest: TransactionObject, value: TransactionObject, partial: bool },
    /// Read `src` into `dest`, which must be a [`TransactionObject::Variable`].
    Get { src: TransactionObject, dest: TransactionObject },
    /// Evaluate each argument and append it to the transaction's returns.
    Return { args: Vec<TransactionObject> },
}

impl Operation {
    pub fn op_id(&self) -> u16 {
        match self {
            Operation::Set { .. } => OP_SET,
            Operation::Get { .. } => OP_GET,
            Operation::Return { .. } => OP_RETURN,
        }
    }

    /// Whether this operation's destination is a database object (as
    /// opposed to a block-local variable). Used by the executor's
    /// per-operation `init` pass to decide whether a transaction's view
    /// must be writable.
    pub fn targets_database(&self) -> bool {
        matches!(self, Operation::Set { dest: TransactionObject::DbObject { .. }, .. })
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Operation::Set { dest, value, partial } => {
                let rec = SetRecord {
                    dest: Some(dest.to_proto()),
                    value: Some(value.to_proto()),
                    partial: *partial,
                };
                wire::encode_message(&rec)
            }
            Operation::Get { src, dest } => {
                let rec = GetRecord { src: Some(src.to_proto()), dest: Some(dest.to_proto()) };
                wire::encode_message(&rec)
            }
            Operation::Return { args } => {
                let rec = ReturnRecord { args: args.iter().map(TransactionObject::to_proto).collect() };
                wire::encode_message(&rec)
            }
        }
    }

    pub fn decode(op_id: u16, bytes: &[u8]) -> Result<Self> {
        match op_id {
            OP_SET => {
                let rec: SetRecord = wire::decode_message(bytes)?;
                let dest = rec.dest.as_ref().ok_or_else(|| Error::Codec("Set missing dest".into()))?;
                let value = rec.value.as_ref().ok_or_else(|| Error::Codec("Set missing value".into()))?;
                Ok(Operation::Set {
                    dest: TransactionObject::from_proto(dest)?,
                    value: TransactionObject::from_proto(value)?,
                    partial: rec.partial,
                })
            }
            OP_GET => {
                let rec: GetRecord = wire::decode_message(bytes)?;
                let src = rec.src.as_ref().ok_or_else(|| Error::Codec("Get missing src".into()))?;
                let dest = rec.dest.as_ref().ok_or_else(|| Error::Codec("Get missing dest".into()))?;
                Ok(Operation::Get { src: TransactionObject::from_proto(src)?, dest: TransactionObject::from_proto(dest)? })
            }
            OP_RETURN => {
                let rec: ReturnRecord = wire::decode_message(bytes)?;
                let args = rec.args.iter().map(TransactionObject::from_proto).collect::<Result<Vec<_>>>()?;
                Ok(Operation::Return { args })
            }
            other => Err(Error::Codec(format!("unknown op_id {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_round_trips_through_wire() {
        let op = Operation::Set {
            dest: TransactionObject::db_object("c", "k"),
            value: TransactionObject::literal("x"),
            partial: false,
        };
        let bytes = op.encode();
        let back = Operation::decode(op.op_id(), &bytes).unwrap();
        assert_eq!(op, back);
    }

    #[test]
    fn get_round_trips_through_wire() {
        let op = Operation::Get {
            src: TransactionObject::db_object("c", "k"),
            dest: TransactionObject::variable(0, 1),
        };
        let bytes = op.encode();
        let back = Operation::decode(op.op_id(), &bytes).unwrap();
        assert_eq!(op, back);
    }

    #[test]
    fn return_round_trips_with_multiple_args() {
        let op = Operation::Return {
            args: vec![TransactionObject::variable(0, 0), TransactionObject::literal(42i64)],
        };
        let bytes = op.encode();
        let back = Operation::decode(op.op_id(), &bytes).unwrap();
        assert_eq!(op, back);
    }

    #[test]
    fn unknown_op_id_is_rejected() {
        assert!(Operation::decode(99, &[]).is_err());
    }
}
