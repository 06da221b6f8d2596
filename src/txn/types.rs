//! The transaction tree: blocks, variables, and the result shape
//! returned to the caller.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use crate::core::value::TransactionValue;
use crate::core::walk;
use crate::error::{Error, Result};
use crate::txn::operation::{Operation, TransactionObject};

/// A block-local variable. Identified by `(block_id, var_id)`; `value`
/// is `None` until a `Set`/`Get` operation populates it.
#[derive(Clone, Debug, Default)]
pub struct Variable {
    pub var_id: u32,
    pub value: Option<TransactionValue>,
}

/// An ordered list of operations plus the variables they operate over.
/// One block per transaction is the *master*; others exist only to be
/// referenced (not yet used by any operation in this engine, but kept
/// as a tree rather than flattened to a list, matching the nested
/// block structure transactions are built from).
#[derive(Clone, Debug, Default)]
pub struct TransactionBlock {
    pub id: u32,
    pub operations: Vec<Operation>,
    pub variables: Vec<Variable>,
}

impl TransactionBlock {
    pub fn new(id: u32) -> Self {
        Self { id, operations: Vec::new(), variables: Vec::new() }
    }

    pub fn with_operation(mut self, op: Operation) -> Self {
        self.operations.push(op);
        self
    }

    /// Declare a variable, returning its `var_id`.
    pub fn declare_variable(&mut self) -> u32 {
        let var_id = self.variables.len() as u32;
        self.variables.push(Variable { var_id, value: None });
        var_id
    }

    fn variable_mut(&mut self, var_id: u32) -> Option<&mut Variable> {
        self.variables.iter_mut().find(|v| v.var_id == var_id)
    }

    fn variable(&self, var_id: u32) -> Option<&Variable> {
        self.variables.iter().find(|v| v.var_id == var_id)
    }
}

/// A typed error surfaced to the caller inside a [`TransactionReturn`]
/// instead of an ad-hoc in-band error field (see DESIGN.md for the
/// rationale).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionError {
    pub id: u64,
    pub message: String,
}

impl std::fmt::Display for TransactionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "transaction {}: {}", self.id, self.message)
    }
}

/// What `Execute` hands back: the transaction's returned values, or an
/// error if it rolled back.
#[derive(Clone, Debug, Default)]
pub struct TransactionReturn {
    pub id: u64,
    pub returns: Vec<TransactionValue>,
    pub error: Option<TransactionError>,
}

impl TransactionReturn {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// A transaction: an id (assigned at `Execute` time) plus a tree of
/// blocks, one of which is the master. `token` selects which segment
/// family this transaction's writes land in.
#[derive(Clone, Debug, Default)]
pub struct Transaction {
    pub id: u64,
    pub token: crate::core::token::Token,
    pub master: TransactionBlock,
    /// Additional blocks, keyed by id, referenceable from operations
    /// that walk the transaction tree. One block is the master; others
    /// may be referenced but are never executed directly.
    pub blocks: HashMap<u32, TransactionBlock>,
}

impl Transaction {
    pub fn new(token: crate::core::token::Token) -> Self {
        Self { id: 0, token, master: TransactionBlock::new(0), blocks: HashMap::new() }
    }

    pub fn with_operation(mut self, op: Operation) -> Self {
        self.master.operations.push(op);
        self
    }

    pub fn declare_variable(&mut self) -> u32 {
        self.master.declare_variable()
    }

    /// True if any `Set` operation in the master block targets a
    /// database object rather than a variable -- decides whether the
    /// executor's per-operation `init` pass needs a writable view.
    pub fn needs_write_view(&self) -> bool {
        self.master.operations.iter().any(Operation::targets_database)
    }

    fn block(&self, block_id: u32) -> Result<&TransactionBlock> {
        if block_id == self.master.id {
            return Ok(&self.master);
        }
        self.blocks
            .get(&block_id)
            .ok_or(Error::UnknownVariable { block_id, var_id: 0 })
    }

    fn block_mut(&mut self, block_id: u32) -> Result<&mut TransactionBlock> {
        if block_id == self.master.id {
            return Ok(&mut self.master);
        }
        self.blocks
            .get_mut(&block_id)
            .ok_or(Error::UnknownVariable { block_id, var_id: 0 })
    }

    pub fn set_variable(&mut self, block_id: u32, var_id: u32, value: TransactionValue) -> Result<()> {
        let block = self.block_mut(block_id)?;
        let var = block
            .variable_mut(var_id)
            .ok_or(Error::UnknownVariable { block_id, var_id })?;
        var.value = Some(value);
        Ok(())
    }

    /// Resolve a [`TransactionObject`] that is either a literal or a
    /// variable reference into a concrete value, applying its accessor
    /// path. Mirrors gostore's `MakeAbsoluteValue`: by the time an
    /// operation writes to a database object, every variable on its
    /// right-hand side has already collapsed to a literal.
    pub fn resolve_value(&self, obj: &TransactionObject) -> Result<TransactionValue> {
        let (base, accessors) = match obj {
            TransactionObject::Literal(v) => (v.clone(), &[][..]),
            TransactionObject::Variable { block_id, var_id, accessors } => {
                let block = self.block(*block_id)?;
                let var = block
                    .variable(*var_id)
                    .ok_or(Error::UnknownVariable { block_id: *block_id, var_id: *var_id })?;
                (var.value.clone().unwrap_or(TransactionValue::Null), accessors.as_slice())
            }
            TransactionObject::DbObject { .. } => return Err(Error::UnknownReturnObject),
        };
        if accessors.is_empty() {
            return Ok(base);
        }
        let json = base.to_json();
        let got = walk::get(&json, accessors).unwrap_or(JsonValue::Null);
        Ok(TransactionValue::from_json(got))
    }
}
