//! Executes a [`Transaction`] against a view-state.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::core::clock::Clock;
use crate::core::value::TransactionValue;
use crate::core::walk;
use crate::txn::operation::{Operation, TransactionObject};
use crate::txn::types::{Transaction, TransactionError, TransactionReturn};
use crate::viewstate::manager::ViewStateManager;

/// Run `txn` to completion: assign its id, open a view-state, execute
/// each operation in the master block, then prepare/commit or
/// roll back. The only branching is which error (if any) ends up in
/// the returned [`TransactionReturn`].
pub async fn execute(view_manager: &Arc<ViewStateManager>, clock: &dyn Clock, mut txn: Transaction) -> TransactionReturn {
    txn.id = clock.now_nanos();
    let read_only = !txn.needs_write_view();

    let vs = match view_manager.create_view_state(txn.token, read_only).await {
        Ok(vs) => vs,
        Err(e) => return fail(txn.id, e.to_string()),
    };

    let mut returns = Vec::new();
    let mut failure = None;

    for op in txn.master.operations.clone() {
        let result = run_operation(view_manager, &vs, &mut txn, &op, &mut returns).await;
        if let Err(e) = result {
            failure = Some(e.to_string());
            break;
        }
    }

    if let Some(message) = failure {
        let _ = view_manager.rollback(&vs).await;
        return TransactionReturn { id: txn.id, returns: Vec::new(), error: Some(TransactionError { id: txn.id, message }) };
    }

    if let Err(e) = view_manager.prepare_commit(&vs).await {
        let _ = view_manager.rollback(&vs).await;
        return fail(txn.id, e.to_string());
    }

    if let Err(e) = view_manager.commit(&vs).await {
        return fail(txn.id, e.to_string());
    }

    TransactionReturn { id: txn.id, returns, error: None }
}

fn fail(id: u64, message: String) -> TransactionReturn {
    TransactionReturn { id, returns: Vec::new(), error: Some(TransactionError { id, message }) }
}

async fn run_operation(
    view_manager: &Arc<ViewStateManager>,
    vs: &Arc<tokio::sync::Mutex<crate::viewstate::state::ViewState>>,
    txn: &mut Transaction,
    op: &Operation,
    returns: &mut Vec<TransactionValue>,
) -> crate::error::Result<()> {
    match op {
        Operation::Set { dest: TransactionObject::Variable { block_id, var_id, accessors }, value, .. } => {
            let resolved = txn.resolve_value(value)?;
            if accessors.is_empty() {
                txn.set_variable(*block_id, *var_id, resolved)?;
            } else {
                let current = txn.resolve_value(&TransactionObject::Variable {
                    block_id: *block_id,
                    var_id: *var_id,
                    accessors: Vec::new(),
                })?;
                let mut container = Some(current.to_json());
                walk::set(&mut container, accessors, resolved.to_json());
                let updated = TransactionValue::from_json(container.unwrap_or(JsonValue::Null));
                txn.set_variable(*block_id, *var_id, updated)?;
            }
            Ok(())
        }
        Operation::Set { dest: TransactionObject::DbObject { container, key, accessors }, value, .. } => {
            let resolved = txn.resolve_value(value)?;
            view_manager.mutate_object(vs, container, key, accessors, resolved.to_json()).await
        }
        Operation::Set { dest: TransactionObject::Literal(_), .. } => {
            Err(crate::error::Error::Codec("Set destination cannot be a literal".into()))
        }
        Operation::Get { src, dest: TransactionObject::Variable { block_id, var_id, .. } } => {
            let value = read_source(view_manager, vs, txn, src).await?;
            txn.set_variable(*block_id, *var_id, value)
        }
        Operation::Get { dest, .. } => {
            let _ = dest;
            Err(crate::error::Error::Codec("Get destination must be a variable".into()))
        }
        Operation::Return { args } => {
            for arg in args {
                returns.push(read_source(view_manager, vs, txn, arg).await?);
            }
            Ok(())
        }
    }
}

async fn read_source(
    view_manager: &Arc<ViewStateManager>,
    vs: &Arc<tokio::sync::Mutex<crate::viewstate::state::ViewState>>,
    txn: &Transaction,
    obj: &TransactionObject,
) -> crate::error::Result<TransactionValue> {
    match obj {
        TransactionObject::Literal(_) | TransactionObject::Variable { .. } => txn.resolve_value(obj),
        TransactionObject::DbObject { container, key, accessors } => {
            let object = view_manager.load_object(vs, container, key).await?;
            let data = object.data.unwrap_or(JsonValue::Null);
            let value = if accessors.is_empty() { data } else { walk::get(&data, accessors).unwrap_or(JsonValue::Null) };
            Ok(TransactionValue::from_json(value))
        }
    }
}
