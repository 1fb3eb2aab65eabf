//! The persistence cache (spec §4.2): the live-object cache fronting the
//! storage driver, `create`/`load`/`postRequestProc`/`postRequestRollback`,
//! and the unload dependency walk.

mod handle;
mod record;
pub mod testing;

pub use handle::{current_context, scope, AmbientContext, Handle, RemoteCallError, RemoteDispatch, RemoteRef};
pub use record::{object_to_record, record_to_object, BACKREF_FIELDS, UNLOAD_CHILD_KINDS};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};

use futures::StreamExt;
use gs_cluster::ClusterMap;
use gs_model::timers::{plan_resume, MAX_CATCH_UP_CALLS};
use gs_model::{registry, EntityBehavior, GameObject};
use gs_storage::{DriverError, StorageDriver};
use gs_tsid::Tsid;
use tokio::sync::{Mutex as AsyncMutex, OnceCell};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("entity {0} not found")]
    NotFound(Tsid),
    #[error("entity {0} already exists")]
    AlreadyExists(Tsid),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("failed to decode record {tsid}")]
    Decode { tsid: Tsid, #[source] source: serde_json::Error },
    #[error(transparent)]
    UnknownClass(#[from] registry::UnknownClass),
    #[error("persistence is shutting down")]
    ShuttingDown,
}

type ObjArc = Arc<AsyncMutex<GameObject>>;
type LoadSlot = Arc<OnceCell<ObjArc>>;

/// The live cache of locally-owned entities, in front of a pluggable
/// [`StorageDriver`]. One instance per GS process.
///
/// The source keeps two maps (`live`, `proxies`); this port collapses them
/// into one map of [`tokio::sync::OnceCell`] slots. A slot inserted before
/// its `load` completes *is* the proxy: concurrent `get`s on the same TSID
/// observe the same pending slot and await the same single driver read
/// (`OnceCell::get_or_try_init` runs its initializer exactly once), which is
/// what invariants #2/#3/#5 in spec §8 require without needing a second,
/// separately-managed map. See `DESIGN.md`.
pub struct PersistenceCache {
    live: SyncMutex<HashMap<Tsid, LoadSlot>>,
    driver: Arc<dyn StorageDriver>,
    cluster: Arc<ClusterMap>,
    remote: Arc<dyn RemoteDispatch>,
    shutting_down: AtomicBool,
}

impl PersistenceCache {
    pub fn new(
        driver: Arc<dyn StorageDriver>,
        cluster: Arc<ClusterMap>,
        remote: Arc<dyn RemoteDispatch>,
    ) -> Self {
        PersistenceCache {
            live: SyncMutex::new(HashMap::new()),
            driver,
            cluster,
            remote,
            shutting_down: AtomicBool::new(false),
        }
    }

    fn live_slot_if_present(&self, tsid: &Tsid) -> Option<LoadSlot> {
        self.live.lock().unwrap().get(tsid).cloned()
    }

    /// Best-effort, already-loaded local object, or `None` if it isn't live
    /// (not loaded, not local, or still loading). Used by the unload walk,
    /// which must not force-load a child just to unload it (spec §4.2:
    /// "skipping ... non-loaded proxies").
    fn live_if_loaded(&self, tsid: &Tsid) -> Option<ObjArc> {
        self.live_slot_if_present(tsid).and_then(|slot| slot.get().cloned())
    }

    /// `get(tsid, noProxy)` (spec §4.2). `no_proxy` is accepted for API
    /// parity with the source; this port always fully resolves the handle
    /// (there's no untyped lazy proxy object to hand back instead — see
    /// `DESIGN.md`), so the parameter currently has no observable effect.
    pub async fn get(&self, tsid: Tsid, _no_proxy: bool) -> Result<Handle, PersistenceError> {
        if let Some(obj) = self.live_if_loaded(&tsid) {
            return Ok(Handle::Local(obj));
        }
        if let Some(ctx) = current_context() {
            if let Some(handle) = ctx.cache_get(&tsid) {
                return Ok(handle);
            }
        }

        let handle = self.load(tsid).await?;

        if let Some(ctx) = current_context() {
            ctx.cache_put(tsid, handle.clone());
        }
        Ok(handle)
    }

    async fn load(&self, tsid: Tsid) -> Result<Handle, PersistenceError> {
        if !self.cluster.is_local(&tsid) {
            let owner = self.cluster.owner(&tsid).to_string();
            return Ok(Handle::Remote(RemoteRef::new(tsid, owner, self.remote.clone())));
        }

        let slot = {
            let mut live = self.live.lock().unwrap();
            live.entry(tsid).or_insert_with(|| Arc::new(OnceCell::new())).clone()
        };

        let obj = slot
            .get_or_try_init(|| async {
                tracing::debug!(%tsid, "loading entity from storage");
                let record = self.driver.read(&tsid).await?;
                let record = record.ok_or(PersistenceError::NotFound(tsid))?;
                let mut obj = record_to_object(record)?;
                let behavior = registry::instantiate(obj.kind(), &obj.class_tag)?;
                behavior.on_load(&mut obj);
                resume_timers(&mut obj, behavior.as_ref());
                Ok::<ObjArc, PersistenceError>(Arc::new(AsyncMutex::new(obj)))
            })
            .await?
            .clone();

        Ok(Handle::Local(obj))
    }

    /// `create(modelType, data, upsert)` (spec §4.2). The TSID is supplied
    /// by the caller rather than minted here: the source leaves generation
    /// unspecified, and an explicit TSID is what makes the collision
    /// behavior (spec §8 "Creating two entities whose TSIDs collide") and
    /// deterministic tests possible.
    pub async fn create(
        &self,
        tsid: Tsid,
        class_tag: &str,
        fields: serde_json::Map<String, serde_json::Value>,
        created: u64,
        upsert: bool,
    ) -> Result<ObjArc, PersistenceError> {
        if !upsert {
            if self.live_slot_if_present(&tsid).is_some() || self.exists(&tsid).await? {
                return Err(PersistenceError::AlreadyExists(tsid));
            }
        }

        let mut obj = GameObject::new(tsid, class_tag, created);
        obj.fields = fields;
        let behavior = registry::instantiate(obj.kind(), class_tag)?;
        behavior.on_create(&mut obj);

        let arc: ObjArc = Arc::new(AsyncMutex::new(obj));
        let cell = OnceCell::new();
        cell.set(arc.clone()).expect("freshly constructed cell");
        self.live.lock().unwrap().insert(tsid, Arc::new(cell));

        if let Some(ctx) = current_context() {
            ctx.mark_added(tsid, arc.clone());
        }

        Ok(arc)
    }

    pub async fn exists(&self, tsid: &Tsid) -> Result<bool, PersistenceError> {
        if self.live_if_loaded(tsid).is_some() {
            return Ok(true);
        }
        Ok(self.driver.read(tsid).await?.is_some())
    }

    /// `postRequestProc` (spec §4.2, invariant #4): write added, then
    /// dirty, then delete whichever of those were marked deleted, then
    /// resolve and flush the unload set.
    pub async fn post_request_proc(
        &self,
        added: HashMap<Tsid, ObjArc>,
        dirty: HashMap<Tsid, ObjArc>,
        unload: HashMap<Tsid, ObjArc>,
        tag: &str,
    ) -> Result<(), PersistenceError> {
        let added_snapshot = snapshot(&added).await;
        let dirty_snapshot = snapshot(&dirty).await;

        let mut first_err: Option<PersistenceError> = None;
        let mut note = |e: PersistenceError| {
            if first_err.is_none() {
                first_err = Some(e);
            }
        };

        if let Some(e) = self
            .write_each(added_snapshot.iter().filter(|(_, o)| !o.deleted).map(|(_, o)| object_to_record(o)), tag)
            .await
        {
            note(e);
        }
        if let Some(e) = self
            .write_each(dirty_snapshot.iter().filter(|(_, o)| !o.deleted).map(|(_, o)| object_to_record(o)), tag)
            .await
        {
            note(e);
        }
        if let Some(e) = self
            .delete_each(dirty_snapshot.iter().filter(|(_, o)| o.deleted).map(|(tsid, _)| *tsid), tag)
            .await
        {
            note(e);
        }
        if let Some(e) = self
            .delete_each(added_snapshot.iter().filter(|(_, o)| o.deleted).map(|(tsid, _)| *tsid), tag)
            .await
        {
            note(e);
        }

        if !unload.is_empty() {
            if let Some(e) = self.resolve_and_flush_unload(unload, tag).await {
                note(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn resolve_and_flush_unload(
        &self,
        roots: HashMap<Tsid, ObjArc>,
        tag: &str,
    ) -> Option<PersistenceError> {
        let resolved = self.collect_unload_graph(roots).await;
        let resolved_snapshot = snapshot(&resolved).await;

        let mut first_err = None;
        if let Some(e) = self
            .write_each(
                resolved_snapshot.iter().filter(|(_, o)| !o.deleted).map(|(_, o)| object_to_record(o)),
                tag,
            )
            .await
        {
            first_err = Some(e);
        }
        if let Some(e) = self
            .delete_each(resolved_snapshot.iter().filter(|(_, o)| o.deleted).map(|(tsid, _)| *tsid), tag)
            .await
        {
            first_err.get_or_insert(e);
        }

        for (tsid, obj) in &resolved {
            obj.lock().await.stale = true;
        }
        {
            let mut live = self.live.lock().unwrap();
            for tsid in resolved.keys() {
                live.remove(tsid);
            }
        }

        first_err
    }

    /// Walk `record::UNLOAD_CHILD_KINDS` dependents of each root, skipping
    /// `record::BACKREF_FIELDS` back-references and any child that isn't
    /// already loaded (spec §4.2, §9).
    async fn collect_unload_graph(&self, roots: HashMap<Tsid, ObjArc>) -> HashMap<Tsid, ObjArc> {
        let mut out = roots.clone();
        let mut visited: std::collections::HashSet<Tsid> = roots.keys().cloned().collect();
        let mut stack: Vec<Tsid> = roots.keys().cloned().collect();

        while let Some(tsid) = stack.pop() {
            let Some(obj) = out.get(&tsid).cloned() else { continue };
            let refs = {
                let guard = obj.lock().await;
                record::collect_refs(&guard.fields, record::BACKREF_FIELDS)
            };

            for child in refs {
                if !UNLOAD_CHILD_KINDS.contains(&child.kind()) {
                    continue;
                }
                if visited.contains(&child) {
                    tracing::debug!(tsid = %child, "unload walk: skipping already-visited tsid");
                    continue;
                }
                let Some(child_obj) = self.live_if_loaded(&child) else {
                    tracing::debug!(tsid = %child, "unload walk: skipping non-loaded proxy");
                    continue;
                };
                visited.insert(child);
                out.insert(child, child_obj);
                stack.push(child);
            }
        }
        out
    }

    /// `postRequestRollback` (spec §4.2): drop every listed entity from the
    /// live cache without writing anything. Callers must treat local state
    /// for these TSIDs as untrusted afterwards.
    pub fn post_request_rollback(&self, added: &HashMap<Tsid, ObjArc>, dirty: &HashMap<Tsid, ObjArc>) {
        let mut live = self.live.lock().unwrap();
        for tsid in added.keys().chain(dirty.keys()) {
            live.remove(tsid);
        }
    }

    /// Flush every live entity with bounded concurrency, then close the
    /// driver. Failures are logged and skipped: shutdown must make forward
    /// progress (spec §4.2).
    pub async fn shutdown(&self) -> Result<(), DriverError> {
        self.shutting_down.store(true, Ordering::SeqCst);

        let snapshot: Vec<(Tsid, ObjArc)> = {
            let live = self.live.lock().unwrap();
            live.iter().filter_map(|(tsid, slot)| slot.get().cloned().map(|o| (*tsid, o))).collect()
        };
        tracing::info!(count = snapshot.len(), "flushing live entities before shutdown");

        let driver = self.driver.clone();
        let mut flushed = 0usize;
        let mut stream = tokio_stream::iter(snapshot).map(|(tsid, obj)| {
            let driver = driver.clone();
            async move {
                let record = object_to_record(&*obj.lock().await);
                if let Err(err) = driver.write(vec![record]).await {
                    tracing::warn!(%tsid, error = %err, "failed to flush entity during shutdown; skipping");
                }
            }
        }).buffer_unordered(5);

        while stream.next().await.is_some() {
            flushed += 1;
            if flushed % 100 == 0 {
                tracing::info!(flushed, "shutdown flush progress");
            }
        }

        self.driver.close().await
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    async fn write_each(
        &self,
        records: impl Iterator<Item = gs_storage::RawRecord>,
        tag: &str,
    ) -> Option<PersistenceError> {
        let mut first_err = None;
        for record in records {
            let tsid = record.tsid;
            if let Err(e) = self.driver.write(vec![record]).await {
                tracing::warn!(%tsid, tag, error = %e, "failed to persist entity");
                first_err.get_or_insert(PersistenceError::Driver(e));
            }
        }
        first_err
    }

    async fn delete_each(&self, tsids: impl Iterator<Item = Tsid>, tag: &str) -> Option<PersistenceError> {
        let mut first_err = None;
        for tsid in tsids {
            if let Err(e) = self.driver.delete(&tsid).await {
                tracing::warn!(%tsid, tag, error = %e, "failed to delete entity");
                first_err.get_or_insert(PersistenceError::Driver(e));
            }
        }
        first_err
    }
}

/// Resume `obj`'s scheduled timers on load (spec §9 "Serialization of
/// timers/intervals"): replay each one's elapsed catch-up calls
/// synchronously through `behavior.on_timer`, then keep only what's still
/// pending — a one-shot that just fired is dropped, an interval keeps
/// ticking from its original `start` so the next load's `plan_resume` stays
/// aligned to the original cadence. Stops the moment `obj` goes `deleted`
/// mid-catch-up, dropping whatever timers hadn't been reached yet.
fn resume_timers(obj: &mut GameObject, behavior: &dyn EntityBehavior) {
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    let timers = std::mem::take(&mut obj.timers);
    let mut pending = Vec::with_capacity(timers.len());

    for entry in timers {
        if obj.deleted {
            break;
        }

        let plan = plan_resume(&entry, now_ms, MAX_CATCH_UP_CALLS);
        if plan.truncated {
            tracing::warn!(tsid = %obj.tsid, fname = %entry.options.fname, "capping timer catch-up at {MAX_CATCH_UP_CALLS} calls");
        }

        let mut fired = 0;
        for _ in 0..plan.immediate_calls {
            if obj.deleted {
                break;
            }
            behavior.on_timer(obj, &entry.options.fname, entry.options.args.as_ref());
            fired += 1;
        }

        let one_shot_consumed = entry.options.interval.is_none() && fired > 0;
        if !obj.deleted && !one_shot_consumed {
            pending.push(entry);
        }
    }

    obj.timers = pending;
}

async fn snapshot(objs: &HashMap<Tsid, ObjArc>) -> Vec<(Tsid, GameObject)> {
    let mut out = Vec::with_capacity(objs.len());
    for (tsid, arc) in objs {
        out.push((*tsid, arc.lock().await.clone()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use gs_cluster::GsConf;
    use gs_storage::memory::MemoryDriver;
    use serde_json::json;
    use std::collections::HashMap as Map;

    fn single_gs_cluster() -> Arc<ClusterMap> {
        let mut confs = Map::new();
        confs.insert("gs-00".to_string(), GsConf { host: "h".into(), port: 9000, rpc_port: 9001 });
        Arc::new(ClusterMap::new(confs, "gs-00".into()).unwrap())
    }

    fn cache() -> PersistenceCache {
        PersistenceCache::new(Arc::new(MemoryDriver::new()), single_gs_cluster(), testing::noop_remote())
    }

    #[tokio::test]
    async fn create_then_get_returns_same_reference() {
        let cache = cache();
        let tsid = Tsid::parse("Labc").unwrap();
        let created = cache.create(tsid, "location", serde_json::Map::new(), 0, false).await.unwrap();

        let handle = cache.get(tsid, false).await.unwrap();
        let got = handle.as_local().unwrap();
        assert!(Arc::ptr_eq(&created, got));
    }

    #[tokio::test]
    async fn create_without_upsert_rejects_duplicate_tsid() {
        let cache = cache();
        let tsid = Tsid::parse("Labc").unwrap();
        cache.create(tsid, "location", serde_json::Map::new(), 0, false).await.unwrap();

        let err = cache.create(tsid, "location", serde_json::Map::new(), 0, false).await.unwrap_err();
        assert!(matches!(err, PersistenceError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn create_with_upsert_overwrites() {
        let cache = cache();
        let tsid = Tsid::parse("Labc").unwrap();
        cache.create(tsid, "location", serde_json::Map::new(), 0, false).await.unwrap();
        cache.create(tsid, "location", serde_json::Map::new(), 1, true).await.unwrap();
    }

    #[tokio::test]
    async fn load_reads_once_for_many_concurrent_gets() {
        let driver = Arc::new(gs_storage::memory::MemoryDriver::new());
        let tsid = Tsid::parse("Gabc").unwrap();
        let obj = GameObject::new(tsid, "geometry", 0);
        driver.write(vec![object_to_record(&obj)]).await.unwrap();

        let cache = Arc::new(PersistenceCache::new(driver, single_gs_cluster(), testing::noop_remote()));

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move { cache.get(tsid, true).await.unwrap() }));
        }
        let mut refs = Vec::new();
        for t in tasks {
            refs.push(t.await.unwrap());
        }
        let first = refs[0].as_local().unwrap().clone();
        for r in &refs {
            assert!(Arc::ptr_eq(r.as_local().unwrap(), &first));
        }
    }

    #[tokio::test]
    async fn rollback_drops_added_and_dirty_without_writing() {
        let driver = Arc::new(MemoryDriver::new());
        let cache = PersistenceCache::new(driver.clone(), single_gs_cluster(), testing::noop_remote());
        let tsid = Tsid::parse("Labc").unwrap();
        let obj = cache.create(tsid, "location", serde_json::Map::new(), 0, false).await.unwrap();

        let mut added = HashMap::new();
        added.insert(tsid, obj);
        cache.post_request_rollback(&added, &HashMap::new());

        assert!(cache.live_if_loaded(&tsid).is_none());
        assert!(driver.read(&tsid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn post_request_proc_writes_added_before_dirty() {
        let driver = Arc::new(MemoryDriver::new());
        let cache = PersistenceCache::new(driver.clone(), single_gs_cluster(), testing::noop_remote());

        let tsid_a = Tsid::parse("Labc").unwrap();
        let tsid_b = Tsid::parse("Lxyz").unwrap();
        let obj_a = cache.create(tsid_a, "location", serde_json::Map::new(), 0, false).await.unwrap();
        let obj_b = cache.create(tsid_b, "location", serde_json::Map::new(), 0, false).await.unwrap();

        let mut added = HashMap::new();
        added.insert(tsid_a, obj_a);
        let mut dirty = HashMap::new();
        dirty.insert(tsid_b, obj_b);

        cache.post_request_proc(added, dirty, HashMap::new(), "test").await.unwrap();

        assert!(driver.read(&tsid_a).await.unwrap().is_some());
        assert!(driver.read(&tsid_b).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn deleted_entities_are_removed_not_written() {
        let driver = Arc::new(MemoryDriver::new());
        let cache = PersistenceCache::new(driver.clone(), single_gs_cluster(), testing::noop_remote());
        let tsid = Tsid::parse("Labc").unwrap();
        let obj = cache.create(tsid, "location", serde_json::Map::new(), 0, false).await.unwrap();
        obj.lock().await.deleted = true;

        let mut added = HashMap::new();
        added.insert(tsid, obj);
        cache.post_request_proc(added, HashMap::new(), HashMap::new(), "test").await.unwrap();

        assert!(driver.read(&tsid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unload_walks_children_and_skips_backrefs() {
        let driver = Arc::new(MemoryDriver::new());
        let cache = PersistenceCache::new(driver.clone(), single_gs_cluster(), testing::noop_remote());

        let loc = Tsid::parse("Labc").unwrap();
        let bag = Tsid::parse("Bxyz").unwrap();
        let item = Tsid::parse("Iqqq").unwrap();

        let loc_obj = cache.create(loc, "location", serde_json::Map::new(), 0, false).await.unwrap();
        let mut bag_fields = serde_json::Map::new();
        bag_fields.insert("owner".into(), json!({"tsid": loc.to_string(), "objref": true}));
        bag_fields.insert("items".into(), json!([{"tsid": item.to_string(), "objref": true}]));
        let bag_obj = cache.create(bag, "bag", bag_fields, 0, false).await.unwrap();
        let item_obj = cache.create(item, "item", serde_json::Map::new(), 0, false).await.unwrap();

        let mut fields = serde_json::Map::new();
        fields.insert("bag".into(), json!({"tsid": bag.to_string(), "objref": true}));
        loc_obj.lock().await.fields = fields;

        let mut unload = HashMap::new();
        unload.insert(loc, loc_obj.clone());

        cache.post_request_proc(HashMap::new(), HashMap::new(), unload, "test").await.unwrap();

        assert!(driver.read(&loc).await.unwrap().is_some());
        assert!(driver.read(&bag).await.unwrap().is_some());
        assert!(driver.read(&item).await.unwrap().is_some());
        assert!(cache.live_if_loaded(&loc).is_none());
        assert!(cache.live_if_loaded(&bag).is_none());
        assert!(cache.live_if_loaded(&item).is_none());
        let _ = bag_obj;
        let _ = item_obj;
    }

    struct RecordingBehavior(std::sync::Mutex<Vec<String>>);

    impl EntityBehavior for RecordingBehavior {
        fn class_tag(&self) -> &'static str {
            "recording"
        }

        fn on_timer(&self, _obj: &mut GameObject, fname: &str, _args: Option<&serde_json::Value>) {
            self.0.lock().unwrap().push(fname.to_string());
        }
    }

    fn one_shot_timer(fname: &str) -> gs_model::TimerEntry {
        gs_model::TimerEntry {
            start: 0,
            options: gs_model::TimerOptions { fname: fname.into(), delay: 100, args: None, interval: None, no_catch_up: false },
        }
    }

    fn interval_timer(fname: &str) -> gs_model::TimerEntry {
        gs_model::TimerEntry {
            start: 0,
            options: gs_model::TimerOptions { fname: fname.into(), delay: 0, args: None, interval: Some(100), no_catch_up: false },
        }
    }

    #[test]
    fn resume_timers_fires_elapsed_one_shot_then_drops_it() {
        let mut obj = GameObject::new(Tsid::parse("Labc").unwrap(), "recording", 0);
        obj.timers.push(one_shot_timer("wake"));
        let behavior = RecordingBehavior(std::sync::Mutex::new(Vec::new()));

        resume_timers(&mut obj, &behavior);

        assert_eq!(behavior.0.lock().unwrap().as_slice(), ["wake"]);
        assert!(obj.timers.is_empty());
    }

    #[test]
    fn resume_timers_keeps_replaying_interval() {
        let mut obj = GameObject::new(Tsid::parse("Labc").unwrap(), "recording", 0);
        obj.timers.push(interval_timer("tick"));
        let behavior = RecordingBehavior(std::sync::Mutex::new(Vec::new()));

        resume_timers(&mut obj, &behavior);

        assert!(!behavior.0.lock().unwrap().is_empty());
        assert_eq!(obj.timers.len(), 1, "an interval stays scheduled after catch-up");
    }

    #[test]
    fn resume_timers_stops_once_object_is_deleted() {
        struct DeletesOnFirstTimer;
        impl EntityBehavior for DeletesOnFirstTimer {
            fn class_tag(&self) -> &'static str {
                "deletes_on_first_timer"
            }
            fn on_timer(&self, obj: &mut GameObject, _fname: &str, _args: Option<&serde_json::Value>) {
                obj.deleted = true;
            }
        }

        let mut obj = GameObject::new(Tsid::parse("Labc").unwrap(), "deletes_on_first_timer", 0);
        obj.timers.push(interval_timer("a"));
        obj.timers.push(one_shot_timer("b"));

        resume_timers(&mut obj, &DeletesOnFirstTimer);

        assert!(obj.timers.is_empty());
    }
}
