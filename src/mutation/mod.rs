//! The on-disk mutation: the single unit every segment entry carries.
//!
//! Wire layout (little-endian): every mutation starts with
//! `u16 mutation_type, u32 vs_id`; for `create_vs`/`commit_vs`/
//! `rollback_vs` that's the entire payload. `obj_op` mutations have
//! this prefix *plus* `op_id, op_size, op_bytes, flags, last_pos`: the
//! `vs_id` is necessary for replay to route the operation to the
//! correct view-state (see DESIGN.md for why it's carried on every
//! variant rather than only the `*_vs` ones).

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};
use crate::txn::operation::Operation;

pub const MUT_CREATE_VS: u16 = 1;
pub const MUT_COMMIT_VS: u16 = 2;
pub const MUT_ROLLBACK_VS: u16 = 3;
pub const MUT_OBJ_OP: u16 = 4;

/// The on-disk unit of change. See the module docs for the wire layout.
#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    CreateVs { vs_id: u32 },
    CommitVs { vs_id: u32 },
    RollbackVs { vs_id: u32 },
    ObjOp { vs_id: u32, op: Operation, flags: u8, last_pos: u64 },
}

impl Mutation {
    pub fn mutation_type(&self) -> u16 {
        match self {
            Mutation::CreateVs { .. } => MUT_CREATE_VS,
            Mutation::CommitVs { .. } => MUT_COMMIT_VS,
            Mutation::RollbackVs { .. } => MUT_ROLLBACK_VS,
            Mutation::ObjOp { .. } => MUT_OBJ_OP,
        }
    }

    pub fn vs_id(&self) -> u32 {
        match self {
            Mutation::CreateVs { vs_id }
            | Mutation::CommitVs { vs_id }
            | Mutation::RollbackVs { vs_id }
            | Mutation::ObjOp { vs_id, .. } => *vs_id,
        }
    }

    /// Encode the mutation body (everything that follows the entry's
    /// `absolute_position`/`token`/`mutation_size` prefix).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        buf.put_u16_le(self.mutation_type());
        buf.put_u32_le(self.vs_id());
        if let Mutation::ObjOp { op, flags, last_pos, .. } = self {
            let op_bytes = op.encode();
            buf.put_u16_le(op.op_id());
            buf.put_u32_le(op_bytes.len() as u32);
            buf.extend_from_slice(&op_bytes);
            buf.put_u8(*flags);
            buf.put_u64_le(*last_pos);
        }
        buf
    }

    /// Decode a mutation body previously produced by [`Mutation::encode`].
    pub fn decode(mut bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 6 {
            return Err(Error::Codec("mutation body too short".into()));
        }
        let mutation_type = bytes.get_u16_le();
        let vs_id = bytes.get_u32_le();
        match mutation_type {
            MUT_CREATE_VS => Ok(Mutation::CreateVs { vs_id }),
            MUT_COMMIT_VS => Ok(Mutation::CommitVs { vs_id }),
            MUT_ROLLBACK_VS => Ok(Mutation::RollbackVs { vs_id }),
            MUT_OBJ_OP => {
                if bytes.len() < 6 {
                    return Err(Error::Codec("obj_op mutation truncated".into()));
                }
                let op_id = bytes.get_u16_le();
                let op_size = bytes.get_u32_le() as usize;
                if bytes.len() < op_size + 1 + 8 {
                    return Err(Error::Codec("obj_op payload truncated".into()));
                }
                let op_bytes = &bytes[..op_size];
                let op = Operation::decode(op_id, op_bytes)?;
                bytes.advance(op_size);
                let flags = bytes.get_u8();
                let last_pos = bytes.get_u64_le();
                Ok(Mutation::ObjOp { vs_id, op, flags, last_pos })
            }
            other => Err(Error::Codec(format!("unknown mutation type {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::operation::TransactionObject;

    #[test]
    fn create_vs_round_trips() {
        let m = Mutation::CreateVs { vs_id: 7 };
        let bytes = m.encode();
        assert_eq!(Mutation::decode(&bytes).unwrap(), m);
    }

    #[test]
    fn obj_op_round_trips() {
        let op = Operation::Set {
            dest: TransactionObject::db_object("c", "k"),
            value: TransactionObject::literal("v1"),
            partial: false,
        };
        let m = Mutation::ObjOp { vs_id: 3, op, flags: 0b0000_0011, last_pos: 1234 };
        let bytes = m.encode();
        assert_eq!(Mutation::decode(&bytes).unwrap(), m);
    }

    #[test]
    fn truncated_body_is_rejected() {
        assert!(Mutation::decode(&[1, 2]).is_err());
    }
}
