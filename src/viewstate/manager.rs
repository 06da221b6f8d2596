//! Mints view-states, serializes all lock acquisition/release through a
//! single actor task, and drives prepare/commit/rollback.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::warn;

use crate::core::container::ContainerStore;
use crate::core::object::{object_key, set_flag, Object, OBJ_FLAG_EXISTS, OBJ_FLAG_NEW};
use crate::core::token::Token;
use crate::error::{Error, Result};
use crate::mutation::Mutation;
use crate::storage::manager::SegmentManager;
use crate::storage::segment::SegmentEntry;
use crate::txn::operation::{Operation, TransactionObject};
use crate::viewstate::lock::{LockMsg, LockOutcome, LockTable, ViewKey};
use crate::viewstate::state::ViewState;

pub struct ViewStateManager {
    segment_manager: Arc<SegmentManager>,
    container_store: Arc<ContainerStore>,
    states: RwLock<HashMap<ViewKey, Arc<Mutex<ViewState>>>>,
    next_ids: std::sync::Mutex<HashMap<Token, u32>>,
    lock_tx: mpsc::UnboundedSender<LockMsg>,
}

impl ViewStateManager {
    pub fn new(segment_manager: Arc<SegmentManager>, container_store: Arc<ContainerStore>) -> Arc<Self> {
        let (lock_tx, mut lock_rx) = mpsc::unbounded_channel::<LockMsg>();

        tokio::spawn(async move {
            let mut table = LockTable::new();
            while let Some(msg) = lock_rx.recv().await {
                match msg {
                    LockMsg::Lock { owner, keys, respond } => {
                        let outcome = table.lock_all(owner, &keys);
                        let _ = respond.send(outcome);
                    }
                    LockMsg::Unlock { owner, keys } => {
                        table.unlock_all(owner, &keys);
                    }
                }
            }
        });

        Arc::new(Self {
            segment_manager,
            container_store,
            states: RwLock::new(HashMap::new()),
            next_ids: std::sync::Mutex::new(HashMap::new()),
            lock_tx,
        })
    }

    fn allocate_id(&self, token: Token) -> u32 {
        let mut ids = self.next_ids.lock().expect("lock poisoned");
        let next = ids.entry(token).or_insert(0);
        let id = *next;
        *next += 1;
        id
    }

    /// Observe a replayed view-state id so a fresh write after replay
    /// never collides with one that predates the restart.
    fn observe_id(&self, token: Token, id: u32) {
        let mut ids = self.next_ids.lock().expect("lock poisoned");
        let next = ids.entry(token).or_insert(0);
        if id >= *next {
            *next = id + 1;
        }
    }

    /// Mint a new view-state. Writable views emit a `create_vs`
    /// mutation and record its position as `vs_position`; read-only
    /// views just take the segment's next write position, writing
    /// nothing -- a read-only view never needs a `commit_vs`/
    /// `rollback_vs` entry either, since it never publishes anything.
    pub async fn create_view_state(&self, token: Token, read_only: bool) -> Result<Arc<Mutex<ViewState>>> {
        let id = self.allocate_id(token);
        let vs_position = if read_only {
            self.segment_manager.next_write_position(token)?
        } else {
            let result = self.segment_manager.write_mutation(token, Mutation::CreateVs { vs_id: id }, false)?;
            result.entry.absolute_position
        };
        let vs = Arc::new(Mutex::new(ViewState::new(token, id, read_only, vs_position)));
        self.states.write().await.insert((token, id), vs.clone());
        Ok(vs)
    }

    pub async fn get_view_state(&self, token: Token, id: u32) -> Option<Arc<Mutex<ViewState>>> {
        self.states.read().await.get(&(token, id)).cloned()
    }

    pub async fn delete_view_state(&self, token: Token, id: u32) {
        self.states.write().await.remove(&(token, id));
    }

    /// Load `(container, key)` into the view, lazily materializing its
    /// `data` from the segment chain if it isn't cached yet.
    pub async fn load_object(&self, vs: &Arc<Mutex<ViewState>>, container: &str, key: &str) -> Result<Object> {
        {
            let guard = vs.lock().await;
            if let Some(cached) = guard.get_cached(container, key) {
                return Ok(cached.object.clone());
            }
        }

        let c = self
            .container_store
            .get_container(container)
            .await
            .ok_or_else(|| Error::UnknownContainer(container.to_string()))?;
        let mut object = c.get_object(key).await.unwrap_or_default();
        if object.exists() && object.data.is_none() {
            object.data = Some(self.materialize(object.segment_id, object.relative_position)?);
        }

        let mut guard = vs.lock().await;
        guard.put(container, key, object.clone());
        Ok(object)
    }

    /// Reconstruct an object's value from its backing `obj_op`
    /// mutation. Every `Set` this engine writes is a whole-object
    /// replace (see [`Self::mutate_object`]), so the latest entry alone
    /// determines the current value -- `last_pos` is kept for the chain
    /// invariant but isn't walked further.
    fn materialize(&self, segment_id: crate::storage::segment::SegmentId, relative_position: u32) -> Result<JsonValue> {
        let seg = self
            .segment_manager
            .get_segment(segment_id)
            .ok_or_else(|| Error::CorruptEntry(format!("missing segment {segment_id}")))?;
        let entry = seg.read_at(relative_position as u64)?;
        match entry.mutation {
            Mutation::ObjOp { op: Operation::Set { value: TransactionObject::Literal(v), .. }, .. } => Ok(v.to_json()),
            _ => Err(Error::CorruptEntry(format!(
                "segment {segment_id} position {relative_position}: expected a literal obj_op Set"
            ))),
        }
    }

    /// Apply a `Set` into a database object: write the mutation, then
    /// update the view's in-memory copy. The mutation always lands on
    /// disk before the in-memory view changes, so replay and online
    /// execution share the exact same code path.
    pub async fn mutate_object(
        &self,
        vs: &Arc<Mutex<ViewState>>,
        container: &str,
        key: &str,
        dest_accessors: &[String],
        resolved_value: JsonValue,
    ) -> Result<()> {
        if !dest_accessors.is_empty() {
            return Err(Error::PartialNotSupported);
        }

        let current = self.load_object(vs, container, key).await?;
        let (token, vs_id) = {
            let guard = vs.lock().await;
            (guard.token, guard.id)
        };

        let last_pos = if current.exists() {
            self.segment_manager
                .get_segment(current.segment_id)
                .map(|s| s.position_start() + current.relative_position as u64)
                .unwrap_or(0)
        } else {
            0
        };

        let op = Operation::Set {
            dest: TransactionObject::db_object(container, key),
            value: TransactionObject::Literal(crate::core::value::TransactionValue::from_json(resolved_value.clone())),
            partial: false,
        };
        let flags = set_flag(current.flags, OBJ_FLAG_NEW, true);
        let mutation = Mutation::ObjOp { vs_id, op, flags, last_pos };
        let write = self.segment_manager.write_mutation(token, mutation, false)?;

        let object = Object {
            flags,
            segment_id: write.segment_id,
            relative_position: write.relative_position,
            data: Some(resolved_value),
        };
        vs.lock().await.put(container, key, object);
        Ok(())
    }

    /// Acquire locks for every object this view touched and check for
    /// optimistic-concurrency conflicts against the current committed
    /// state.
    pub async fn prepare_commit(&self, vs: &Arc<Mutex<ViewState>>) -> Result<()> {
        let (owner, requests, conflict) = {
            let guard = vs.lock().await;
            let mut requests = Vec::with_capacity(guard.objects.len());
            let mut conflict = None;
            for vo in guard.objects.values() {
                let readonly = !vo.object.is_new();
                requests.push((object_key(&vo.container, &vo.key), readonly));

                if !readonly {
                    if let Some(abs) = self.current_committed_position(&vo.container, &vo.key).await? {
                        if abs > guard.vs_position {
                            conflict = Some((vo.container.clone(), vo.key.clone()));
                            break;
                        }
                    }
                }
            }
            // Sorted so unrelated transactions always acquire locks in
            // the same canonical order, avoiding lock-order deadlocks
            // between views that touch overlapping key sets (see
            // DESIGN.md).
            requests.sort();
            ((guard.token, guard.id), requests, conflict)
        };

        if let Some((container, key)) = conflict {
            return Err(Error::ConcurrencyConflict { container, key });
        }

        let (respond_tx, respond_rx) = oneshot::channel();
        self.lock_tx
            .send(LockMsg::Lock { owner, keys: requests, respond: respond_tx })
            .map_err(|_| Error::Other("lock manager actor is gone".into()))?;
        match respond_rx.await.map_err(|_| Error::Other("lock manager actor dropped response".into()))? {
            LockOutcome::Acquired => Ok(()),
            LockOutcome::Conflict { key } => {
                let (container, k) = key.split_once('^').unwrap_or(("?", key.as_str()));
                Err(Error::ConcurrencyConflict { container: container.to_string(), key: k.to_string() })
            }
        }
    }

    async fn current_committed_position(&self, container: &str, key: &str) -> Result<Option<u64>> {
        let Some(c) = self.container_store.get_container(container).await else { return Ok(None) };
        let Some(obj) = c.get_object(key).await else { return Ok(None) };
        if !obj.exists() {
            return Ok(None);
        }
        Ok(self
            .segment_manager
            .get_segment(obj.segment_id)
            .map(|s| s.position_start() + obj.relative_position as u64))
    }

    /// Publish every `new` object into its container, emit `commit_vs`,
    /// release locks, and discard the view-state.
    pub async fn commit(&self, vs: &Arc<Mutex<ViewState>>) -> Result<()> {
        let (token, id, read_only, objects, keys) = {
            let guard = vs.lock().await;
            let objects: Vec<_> = guard.objects.values().cloned().collect();
            let keys = guard.touched_keys();
            (guard.token, guard.id, guard.read_only, objects, keys)
        };

        // Read-only views never wrote a create_vs entry either, so they
        // have nothing to close out on disk -- see DESIGN.md's note on
        // spec.md's read-only-views-skip-commit_vs open question.
        if !read_only {
            self.segment_manager.write_mutation(token, Mutation::CommitVs { vs_id: id }, false)?;
        }

        for vo in objects.into_iter().filter(|vo| vo.object.is_new()) {
            let container = self
                .container_store
                .get_container(&vo.container)
                .await
                .ok_or_else(|| Error::UnknownContainer(vo.container.clone()))?;
            let mut committed = vo.object;
            committed.flags = set_flag(committed.flags, OBJ_FLAG_EXISTS, true);
            committed.flags = set_flag(committed.flags, OBJ_FLAG_NEW, false);
            container.set_object(vo.key, committed).await;
        }

        self.unlock_and_forget(token, id, keys).await;
        Ok(())
    }

    /// Emit `rollback_vs`, release any locks taken, and discard the
    /// view-state without publishing anything.
    pub async fn rollback(&self, vs: &Arc<Mutex<ViewState>>) -> Result<()> {
        let (token, id, read_only, keys) = {
            let guard = vs.lock().await;
            (guard.token, guard.id, guard.read_only, guard.touched_keys())
        };
        if !read_only {
            self.segment_manager.write_mutation(token, Mutation::RollbackVs { vs_id: id }, false)?;
        }
        self.unlock_and_forget(token, id, keys).await;
        Ok(())
    }

    async fn unlock_and_forget(&self, token: Token, id: u32, keys: Vec<String>) {
        let _ = self.lock_tx.send(LockMsg::Unlock { owner: (token, id), keys });
        self.delete_view_state(token, id).await;
    }

    // --- Replay ---------------------------------------------------

    /// Re-apply one segment entry during startup replay. Unlike the
    /// online path, `obj_op` replay only rebuilds the object's index
    /// pointer (`segment_id`/`relative_position`/`flags`) -- `data` is
    /// left to be lazily materialized the first time something reads
    /// it, so replay never pays the cost of re-deriving values it may
    /// never be asked for.
    pub async fn replay_entry(&self, segment_id: crate::storage::segment::SegmentId, entry: &SegmentEntry) -> Result<()> {
        match &entry.mutation {
            Mutation::CreateVs { vs_id } => {
                self.observe_id(entry.token, *vs_id);
                let vs = Arc::new(Mutex::new(ViewState::new(entry.token, *vs_id, false, entry.absolute_position)));
                self.states.write().await.insert((entry.token, *vs_id), vs);
                Ok(())
            }
            Mutation::ObjOp { vs_id, op, flags, .. } => {
                let vs = self
                    .get_view_state(entry.token, *vs_id)
                    .await
                    .ok_or(Error::UnknownViewState(*vs_id))?;
                let Operation::Set { dest: TransactionObject::DbObject { container, key, .. }, .. } = op else {
                    return Err(Error::Codec("obj_op replay expects a Set against a database object".into()));
                };
                let relative_position = {
                    let seg = self
                        .segment_manager
                        .get_segment(segment_id)
                        .ok_or_else(|| Error::CorruptEntry(format!("missing segment {segment_id}")))?;
                    (entry.absolute_position - seg.position_start()) as u32
                };
                let object = Object { flags: *flags, segment_id, relative_position, data: None };
                vs.lock().await.put(container, key, object);
                Ok(())
            }
            Mutation::CommitVs { vs_id } => {
                let vs = self
                    .get_view_state(entry.token, *vs_id)
                    .await
                    .ok_or(Error::UnknownViewState(*vs_id))?;
                let (objects, token, id) = {
                    let guard = vs.lock().await;
                    (guard.objects.values().cloned().collect::<Vec<_>>(), guard.token, guard.id)
                };
                for vo in objects {
                    let container = self.container_store.create_container(&vo.container).await;
                    let mut committed = vo.object;
                    committed.flags = set_flag(committed.flags, OBJ_FLAG_EXISTS, true);
                    committed.flags = set_flag(committed.flags, OBJ_FLAG_NEW, false);
                    container.set_object(vo.key, committed).await;
                }
                self.delete_view_state(token, id).await;
                Ok(())
            }
            Mutation::RollbackVs { vs_id } => {
                match self.get_view_state(entry.token, *vs_id).await {
                    Some(vs) => {
                        let (token, id) = {
                            let guard = vs.lock().await;
                            (guard.token, guard.id)
                        };
                        self.delete_view_state(token, id).await;
                        Ok(())
                    }
                    None => {
                        warn!(vs_id, "rollback_vs for unknown view-state during replay");
                        Err(Error::UnknownViewState(*vs_id))
                    }
                }
            }
        }
    }
}
