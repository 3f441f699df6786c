use parking_lot::Mutex;
use roaring::RoaringBitmap;
use rusts_core::{FieldType, ParallelConfig, ShardId, TagKeyId, TagMeta, TagValueId};
use rusts_index::container::low_key;
use rusts_index::{MetadataIndex, SeriesContainer};
use rusts_query::{
    AggregatorSpec, DataLoader, FilterResult, GroupedSeries, GroupingContext, QueryError,
    QueryFlow, Result, Shard, Stage, StageQueryFlow, StageTask, StorageExecuteContext,
    StorageExecutePlan, StorageExecutor, StorageQuery, StorageTasks, TagSearchResult, TaskKind,
    ValidationError,
};
use rusts_query::{Database, Metadata};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Recording flow: queues closures and runs them on demand on the test thread
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ManualFlow {
    queue: Mutex<VecDeque<StageTask>>,
    scheduled: Mutex<Vec<Stage>>,
    prepared: Mutex<Option<Vec<AggregatorSpec>>>,
    completes: Mutex<Vec<QueryError>>,
    reduces: Mutex<Vec<(usize, HashMap<TagValueId, String>)>>,
}

impl ManualFlow {
    fn push(&self, stage: Stage, task: StageTask) {
        self.scheduled.lock().push(stage);
        self.queue.lock().push_back(task);
    }

    fn run_all(&self) {
        loop {
            let next = self.queue.lock().pop_front();
            match next {
                Some(task) => task(),
                None => break,
            }
        }
    }

    fn scheduled(&self) -> Vec<Stage> {
        self.scheduled.lock().clone()
    }

    fn completes(&self) -> Vec<QueryError> {
        self.completes.lock().clone()
    }

    fn reduces(&self) -> Vec<(usize, HashMap<TagValueId, String>)> {
        self.reduces.lock().clone()
    }

    fn is_prepared(&self) -> bool {
        self.prepared.lock().is_some()
    }
}

impl QueryFlow for ManualFlow {
    fn prepare(&self, specs: Vec<AggregatorSpec>) {
        *self.prepared.lock() = Some(specs);
    }

    fn filtering(&self, task: StageTask) {
        self.push(Stage::Filtering, task);
    }

    fn grouping(&self, task: StageTask) {
        self.push(Stage::Grouping, task);
    }

    fn load(&self, task: StageTask) {
        self.push(Stage::Load, task);
    }

    fn complete(&self, err: QueryError) {
        self.completes.lock().push(err);
    }

    fn reduce_tag_values(&self, tag_index: usize, tag_values: HashMap<TagValueId, String>) {
        self.reduces.lock().push((tag_index, tag_values));
    }
}

// ---------------------------------------------------------------------------
// Storage collaborators
// ---------------------------------------------------------------------------

struct MockShard {
    id: ShardId,
}

impl Shard for MockShard {
    fn id(&self) -> ShardId {
        self.id
    }
}

struct MockDatabase {
    shards: HashMap<ShardId, Arc<dyn Shard>>,
    num_of_shards: usize,
    metadata: Arc<MetadataIndex>,
}

impl MockDatabase {
    fn new(metadata: Arc<MetadataIndex>, shard_ids: &[ShardId]) -> Self {
        let shards = shard_ids
            .iter()
            .map(|id| (*id, Arc::new(MockShard { id: *id }) as Arc<dyn Shard>))
            .collect();
        Self {
            shards,
            num_of_shards: shard_ids.len(),
            metadata,
        }
    }

    fn reporting(mut self, num_of_shards: usize) -> Self {
        self.num_of_shards = num_of_shards;
        self
    }
}

impl Database for MockDatabase {
    fn get_shard(&self, shard_id: ShardId) -> Option<Arc<dyn Shard>> {
        self.shards.get(&shard_id).cloned()
    }

    fn num_of_shards(&self) -> usize {
        self.num_of_shards
    }

    fn metadata(&self) -> Arc<dyn Metadata> {
        self.metadata.clone()
    }
}

/// Tag value id of the "host" tag for a series
fn host_of(series_id: u32) -> TagValueId {
    series_id % 4
}

struct MockLoader;

impl DataLoader for MockLoader {
    fn load(&self, low_series_id: u16) -> Vec<Vec<u8>> {
        vec![low_series_id.to_le_bytes().to_vec()]
    }
}

struct MockFamily {
    series_ids: RoaringBitmap,
}

impl FilterResult for MockFamily {
    fn series_ids(&self) -> &RoaringBitmap {
        &self.series_ids
    }

    fn load(&self, _container: &SeriesContainer) -> Option<Box<dyn DataLoader>> {
        Some(Box::new(MockLoader))
    }
}

#[derive(Default)]
struct MockGrouping {
    seen: Mutex<RoaringBitmap>,
}

impl GroupingContext for MockGrouping {
    fn build_group(&self, container: &SeriesContainer) -> GroupedSeries {
        let mut groups = GroupedSeries::new();
        let mut seen = self.seen.lock();
        for series_id in container.series_ids() {
            let host = host_of(series_id);
            seen.insert(host);
            groups.entry(vec![host]).or_default().push(low_key(series_id));
        }
        groups
    }

    fn tag_value_ids(&self) -> Vec<RoaringBitmap> {
        vec![self.seen.lock().clone()]
    }
}

#[derive(Default)]
struct MockTasks {
    /// Shard -> series ids; missing shards report not found
    series: HashMap<ShardId, RoaringBitmap>,
    series_errors: HashMap<ShardId, QueryError>,
    /// Shards whose memory filter reports not found
    memory_not_found: HashSet<ShardId>,
    memory_errors: HashMap<ShardId, QueryError>,
    file_errors: HashMap<ShardId, QueryError>,
    /// Shards without a grouping context
    no_grouping: HashSet<ShardId>,
    grouping_errors: HashMap<ShardId, QueryError>,
    /// Containers whose data load fails
    fail_load: HashSet<(ShardId, u16)>,
    /// Containers whose grouping fails
    fail_group: HashSet<(ShardId, u16)>,
    collect_error: Option<QueryError>,

    searched: Mutex<Vec<(ShardId, Option<TagSearchResult>)>>,
    loaded: Mutex<Vec<(ShardId, u16)>>,
}

impl MockTasks {
    fn with_series(mut self, shard_id: ShardId, ids: &[u32]) -> Self {
        self.series.insert(shard_id, ids.iter().copied().collect());
        self
    }

    fn loaded(&self) -> Vec<(ShardId, u16)> {
        let mut loaded = self.loaded.lock().clone();
        loaded.sort();
        loaded
    }
}

impl StorageTasks for MockTasks {
    fn series_search(
        &self,
        _ctx: &StorageExecuteContext,
        shard: &dyn Shard,
        _plan: &StorageExecutePlan,
        tag_search: Option<&TagSearchResult>,
    ) -> Result<RoaringBitmap> {
        self.searched.lock().push((shard.id(), tag_search.cloned()));
        if let Some(err) = self.series_errors.get(&shard.id()) {
            return Err(err.clone());
        }
        self.series
            .get(&shard.id())
            .cloned()
            .ok_or_else(|| QueryError::NotFound("series".to_string()))
    }

    fn memory_filter(
        &self,
        _ctx: &StorageExecuteContext,
        shard: &dyn Shard,
        _plan: &StorageExecutePlan,
        series_ids: &RoaringBitmap,
    ) -> Result<Vec<Arc<dyn FilterResult>>> {
        if self.memory_not_found.contains(&shard.id()) {
            return Err(QueryError::NotFound("memory data".to_string()));
        }
        if let Some(err) = self.memory_errors.get(&shard.id()) {
            return Err(err.clone());
        }
        Ok(vec![Arc::new(MockFamily {
            series_ids: series_ids.clone(),
        })])
    }

    fn file_filter(
        &self,
        _ctx: &StorageExecuteContext,
        shard: &dyn Shard,
        _plan: &StorageExecutePlan,
        _series_ids: &RoaringBitmap,
    ) -> Result<Vec<Arc<dyn FilterResult>>> {
        match self.file_errors.get(&shard.id()) {
            Some(err) => Err(err.clone()),
            None => Err(QueryError::NotFound("file data".to_string())),
        }
    }

    fn grouping_context(
        &self,
        _ctx: &StorageExecuteContext,
        shard: &dyn Shard,
        tag_key_ids: &[TagKeyId],
        _series_ids: &RoaringBitmap,
    ) -> Result<Arc<dyn GroupingContext>> {
        assert_eq!(tag_key_ids.len(), 1);
        if self.no_grouping.contains(&shard.id()) {
            return Err(QueryError::NotFound("grouping context".to_string()));
        }
        if let Some(err) = self.grouping_errors.get(&shard.id()) {
            return Err(err.clone());
        }
        Ok(Arc::new(MockGrouping::default()))
    }

    fn build_group(
        &self,
        _ctx: &StorageExecuteContext,
        shard: &dyn Shard,
        grouping: Option<&dyn GroupingContext>,
        container: &SeriesContainer,
    ) -> Result<GroupedSeries> {
        if self.fail_group.contains(&(shard.id(), container.high_key())) {
            return Err(QueryError::Task("group failed".to_string()));
        }
        Ok(grouping
            .map(|grouping| grouping.build_group(container))
            .unwrap_or_default())
    }

    fn collect_tag_values(
        &self,
        _ctx: &StorageExecuteContext,
        metadata: &dyn Metadata,
        tag_key: &TagMeta,
        tag_value_ids: &RoaringBitmap,
    ) -> Result<HashMap<TagValueId, String>> {
        match &self.collect_error {
            Some(err) => Err(err.clone()),
            None => metadata.tag_values(tag_key.id, tag_value_ids),
        }
    }

    fn data_load(
        &self,
        _ctx: &StorageExecuteContext,
        shard: &dyn Shard,
        _flow: &dyn QueryFlow,
        result: &dyn FilterResult,
        container: &SeriesContainer,
    ) -> Result<Option<Box<dyn DataLoader>>> {
        if self.fail_load.contains(&(shard.id(), container.high_key())) {
            return Err(QueryError::Task("load failed".to_string()));
        }
        self.loaded.lock().push((shard.id(), container.high_key()));
        Ok(result.load(container))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn metadata() -> Arc<MetadataIndex> {
    let index = MetadataIndex::new();
    let metric_id = index.register_metric("ns", "cpu");
    index.register_field(metric_id, "usage", FieldType::Sum).unwrap();
    let host = index.register_tag_key(metric_id, "host");
    for value in ["a", "b", "c", "d"] {
        index.register_tag_value(host, value);
    }
    Arc::new(index)
}

fn query() -> StorageQuery {
    StorageQuery::builder("cpu")
        .namespace("ns")
        .select("usage")
        .build()
        .unwrap()
}

fn group_by_query() -> StorageQuery {
    StorageQuery::builder("cpu")
        .namespace("ns")
        .select("usage")
        .group_by_tags(vec!["host".to_string()])
        .build()
        .unwrap()
}

fn execute(
    database: MockDatabase,
    tasks: Arc<MockTasks>,
    ctx: StorageExecuteContext,
) -> Arc<ManualFlow> {
    let flow = Arc::new(ManualFlow::default());
    StorageExecutor::new(flow.clone(), Arc::new(database), Arc::new(ctx), tasks).execute();
    flow.run_all();
    flow
}

fn tag_values(pairs: &[(TagValueId, &str)]) -> HashMap<TagValueId, String> {
    pairs.iter().map(|(id, v)| (*id, v.to_string())).collect()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn assert_rejected(database: MockDatabase, shard_ids: Vec<ShardId>, expected: ValidationError) {
    let tasks = Arc::new(MockTasks::default().with_series(0, &[1]));
    let flow = execute(
        database,
        tasks.clone(),
        StorageExecuteContext::new(query(), shard_ids),
    );

    assert_eq!(flow.completes(), vec![QueryError::Validation(expected)]);
    assert!(flow.scheduled().is_empty());
    assert!(!flow.is_prepared());
    assert!(tasks.searched.lock().is_empty());
}

#[test]
fn rejects_empty_shard_ids() {
    assert_rejected(MockDatabase::new(metadata(), &[0]), vec![], ValidationError::NoShardId);
}

#[test]
fn rejects_database_without_shards() {
    assert_rejected(
        MockDatabase::new(metadata(), &[]),
        vec![0],
        ValidationError::NoShardInDatabase,
    );
}

#[test]
fn rejects_shard_count_mismatch() {
    assert_rejected(
        MockDatabase::new(metadata(), &[0, 1]),
        vec![0, 1, 2],
        ValidationError::ShardNotMatch {
            database: 2,
            requested: 3,
        },
    );
}

#[test]
fn rejects_unresolved_shards() {
    assert_rejected(
        MockDatabase::new(metadata(), &[0, 1]),
        vec![5, 6],
        ValidationError::ShardNotFound,
    );
}

#[test]
fn rejects_partially_resolved_shards() {
    assert_rejected(
        MockDatabase::new(metadata(), &[0]).reporting(2),
        vec![0, 1],
        ValidationError::ShardNumNotMatch {
            found: 1,
            requested: 2,
        },
    );
}

#[test]
fn unknown_metric_fails_before_any_stage() {
    let query = StorageQuery::builder("mem")
        .namespace("ns")
        .select("usage")
        .build()
        .unwrap();
    let flow = execute(
        MockDatabase::new(metadata(), &[0]),
        Arc::new(MockTasks::default()),
        StorageExecuteContext::new(query, vec![0]),
    );

    let completes = flow.completes();
    assert_eq!(completes.len(), 1);
    assert!(completes[0].is_not_found());
    assert!(flow.scheduled().is_empty());
}

// ---------------------------------------------------------------------------
// Tag search
// ---------------------------------------------------------------------------

#[test]
fn tag_search_narrows_series_search() {
    let query = StorageQuery::builder("cpu")
        .namespace("ns")
        .select("usage")
        .where_tag_in("host", vec!["b".to_string(), "d".to_string()])
        .build()
        .unwrap();
    let tasks = Arc::new(MockTasks::default().with_series(0, &[1]));
    let flow = execute(
        MockDatabase::new(metadata(), &[0]),
        tasks.clone(),
        StorageExecuteContext::new(query, vec![0]),
    );

    assert!(flow.completes().is_empty());
    let searched = tasks.searched.lock().clone();
    assert_eq!(searched.len(), 1);
    let result = searched[0].1.clone().unwrap();
    let ids: Vec<u32> = result.tag_value_ids.values().next().unwrap().iter().collect();
    assert_eq!(ids, vec![1, 3]);
}

#[test]
fn tag_search_without_match_is_terminal() {
    let query = StorageQuery::builder("cpu")
        .namespace("ns")
        .select("usage")
        .where_tag("host", "zzz")
        .build()
        .unwrap();
    let flow = execute(
        MockDatabase::new(metadata(), &[0]),
        Arc::new(MockTasks::default().with_series(0, &[1])),
        StorageExecuteContext::new(query, vec![0]),
    );

    let completes = flow.completes();
    assert_eq!(completes.len(), 1);
    assert!(completes[0].is_not_found());
    assert!(flow.scheduled().is_empty());
    assert!(!flow.is_prepared());
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[test]
fn single_shard_without_group_by_ends_silently() {
    let tasks = Arc::new(MockTasks::default().with_series(0, &[1, 2, 3]));
    let flow = execute(
        MockDatabase::new(metadata(), &[0]),
        tasks.clone(),
        StorageExecuteContext::new(query(), vec![0]),
    );

    assert!(flow.is_prepared());
    assert!(flow.completes().is_empty());
    assert!(flow.reduces().is_empty());
    assert_eq!(tasks.loaded(), vec![(0, 0)]);
    assert_eq!(
        flow.scheduled(),
        vec![Stage::Filtering, Stage::Grouping, Stage::Load, Stage::Grouping]
    );
}

#[test]
fn not_found_branches_end_quietly() {
    let mut tasks = MockTasks::default()
        .with_series(1, &[1, 2])
        .with_series(2, &[3]);
    tasks.memory_not_found.insert(1);
    let tasks = Arc::new(tasks);

    // shard 0 has no series, shard 1 no data, shard 2 contributes
    let flow = execute(
        MockDatabase::new(metadata(), &[0, 1, 2]),
        tasks.clone(),
        StorageExecuteContext::new(group_by_query(), vec![0, 1, 2]),
    );

    assert!(flow.completes().is_empty());
    assert_eq!(tasks.loaded(), vec![(2, 0)]);
    assert_eq!(flow.reduces(), vec![(0, tag_values(&[(3, "d")]))]);
}

#[test]
fn group_by_across_two_containers_reduces_union_once() {
    let tasks = Arc::new(MockTasks::default().with_series(0, &[1, 2, 65_536 + 3]));
    let flow = execute(
        MockDatabase::new(metadata(), &[0]),
        tasks.clone(),
        StorageExecuteContext::new(group_by_query(), vec![0]),
    );

    assert!(flow.completes().is_empty());
    assert_eq!(tasks.loaded(), vec![(0, 0), (0, 1)]);
    assert_eq!(
        flow.reduces(),
        vec![(0, tag_values(&[(1, "b"), (2, "c"), (3, "d")]))]
    );
}

#[test]
fn group_by_merges_all_shards() {
    let tasks = Arc::new(
        MockTasks::default()
            .with_series(0, &[4, 65_536 + 1])
            .with_series(1, &[4, 131_072 + 2]),
    );
    let flow = execute(
        MockDatabase::new(metadata(), &[0, 1]),
        tasks.clone(),
        StorageExecuteContext::new(group_by_query(), vec![0, 1]),
    );

    assert!(flow.completes().is_empty());
    assert_eq!(tasks.loaded(), vec![(0, 0), (0, 1), (1, 0), (1, 2)]);
    assert_eq!(
        flow.reduces(),
        vec![(0, tag_values(&[(0, "a"), (1, "b"), (2, "c")]))]
    );
}

#[test]
fn shard_without_grouping_context_contributes_nothing() {
    let mut tasks = MockTasks::default()
        .with_series(0, &[1])
        .with_series(1, &[2]);
    tasks.no_grouping.insert(0);
    let tasks = Arc::new(tasks);

    let flow = execute(
        MockDatabase::new(metadata(), &[0, 1]),
        tasks.clone(),
        StorageExecuteContext::new(group_by_query(), vec![0, 1]),
    );

    assert!(flow.completes().is_empty());
    assert_eq!(tasks.loaded(), vec![(1, 0)]);
    assert_eq!(flow.reduces(), vec![(0, tag_values(&[(2, "c")]))]);
}

#[test]
fn group_by_without_data_reduces_empty() {
    let flow = execute(
        MockDatabase::new(metadata(), &[0]),
        Arc::new(MockTasks::default()),
        StorageExecuteContext::new(group_by_query(), vec![0]),
    );

    assert!(flow.completes().is_empty());
    assert_eq!(flow.reduces(), vec![(0, HashMap::new())]);
    // no tag value resolution was scheduled
    assert_eq!(flow.scheduled(), vec![Stage::Filtering]);
}

#[test]
fn load_failure_reports_and_siblings_finish() {
    let mut tasks = MockTasks::default().with_series(0, &[1, 65_536 + 2, 131_072 + 3]);
    tasks.fail_load.insert((0, 0));
    let tasks = Arc::new(tasks);

    let flow = execute(
        MockDatabase::new(metadata(), &[0]),
        tasks.clone(),
        StorageExecuteContext::new(group_by_query(), vec![0]),
    );

    assert_eq!(flow.completes(), vec![QueryError::Task("load failed".to_string())]);
    assert_eq!(tasks.loaded(), vec![(0, 1), (0, 2)]);
    // bookkeeping stayed balanced, so collection still fired once
    assert_eq!(
        flow.reduces(),
        vec![(0, tag_values(&[(1, "b"), (2, "c"), (3, "d")]))]
    );
}

#[test]
fn series_search_failure_does_not_stop_other_shards() {
    let mut tasks = MockTasks::default()
        .with_series(0, &[1])
        .with_series(1, &[2]);
    tasks
        .series_errors
        .insert(0, QueryError::Task("index corrupted".to_string()));
    let tasks = Arc::new(tasks);

    let flow = execute(
        MockDatabase::new(metadata(), &[0, 1]),
        tasks.clone(),
        StorageExecuteContext::new(group_by_query(), vec![0, 1]),
    );

    assert_eq!(
        flow.completes(),
        vec![QueryError::Task("index corrupted".to_string())]
    );
    assert_eq!(tasks.loaded(), vec![(1, 0)]);
    assert_eq!(flow.reduces(), vec![(0, tag_values(&[(2, "c")]))]);
}

#[test]
fn filter_failure_does_not_stop_other_shards() {
    let mut tasks = MockTasks::default()
        .with_series(0, &[1])
        .with_series(1, &[2])
        .with_series(2, &[3]);
    tasks
        .memory_errors
        .insert(0, QueryError::Task("memory db closed".to_string()));
    tasks
        .file_errors
        .insert(2, QueryError::Task("corrupted family".to_string()));
    let tasks = Arc::new(tasks);

    let flow = execute(
        MockDatabase::new(metadata(), &[0, 1, 2]),
        tasks.clone(),
        StorageExecuteContext::new(group_by_query(), vec![0, 1, 2]),
    );

    assert_eq!(
        flow.completes(),
        vec![
            QueryError::Task("memory db closed".to_string()),
            QueryError::Task("corrupted family".to_string()),
        ]
    );
    assert_eq!(tasks.loaded(), vec![(1, 0)]);
    assert_eq!(flow.reduces(), vec![(0, tag_values(&[(2, "c")]))]);
}

#[test]
fn grouping_context_failure_does_not_stop_other_shards() {
    let mut tasks = MockTasks::default()
        .with_series(0, &[1])
        .with_series(1, &[2]);
    tasks
        .grouping_errors
        .insert(0, QueryError::Task("tag index unavailable".to_string()));
    let tasks = Arc::new(tasks);

    let flow = execute(
        MockDatabase::new(metadata(), &[0, 1]),
        tasks.clone(),
        StorageExecuteContext::new(group_by_query(), vec![0, 1]),
    );

    assert_eq!(
        flow.completes(),
        vec![QueryError::Task("tag index unavailable".to_string())]
    );
    assert_eq!(tasks.loaded(), vec![(1, 0)]);
    assert_eq!(flow.reduces(), vec![(0, tag_values(&[(2, "c")]))]);
}

#[test]
fn build_group_failure_still_merges_shard_tag_values() {
    let mut tasks = MockTasks::default().with_series(0, &[1, 2, 65_536 + 3]);
    tasks.fail_group.insert((0, 1));
    let tasks = Arc::new(tasks);

    let flow = execute(
        MockDatabase::new(metadata(), &[0]),
        tasks.clone(),
        StorageExecuteContext::new(group_by_query(), vec![0]),
    );

    assert_eq!(flow.completes(), vec![QueryError::Task("group failed".to_string())]);
    // both containers still load; only the grouped container's values merge
    assert_eq!(tasks.loaded(), vec![(0, 0), (0, 1)]);
    assert_eq!(flow.reduces(), vec![(0, tag_values(&[(1, "b"), (2, "c")]))]);
}

#[test]
fn tag_value_resolution_failure_reports_without_reduce() {
    let mut tasks = MockTasks::default().with_series(0, &[1, 2]);
    tasks.collect_error = Some(QueryError::Task("dictionary unavailable".to_string()));
    let tasks = Arc::new(tasks);

    let flow = execute(
        MockDatabase::new(metadata(), &[0]),
        tasks.clone(),
        StorageExecuteContext::new(group_by_query(), vec![0]),
    );

    assert_eq!(
        flow.completes(),
        vec![QueryError::Task("dictionary unavailable".to_string())]
    );
    assert_eq!(tasks.loaded(), vec![(0, 0)]);
    assert!(flow.reduces().is_empty());
    assert_eq!(flow.scheduled().last(), Some(&Stage::Load));
}

#[test]
fn cancelled_query_skips_work_but_still_collects() {
    let token = CancellationToken::new();
    let tasks = Arc::new(MockTasks::default().with_series(0, &[1, 2]));
    let ctx = StorageExecuteContext::new(group_by_query(), vec![0]).with_cancellation(token.clone());

    let flow = Arc::new(ManualFlow::default());
    StorageExecutor::new(
        flow.clone(),
        Arc::new(MockDatabase::new(metadata(), &[0])),
        Arc::new(ctx),
        tasks.clone(),
    )
    .execute();
    token.cancel();
    flow.run_all();

    assert!(tasks.searched.lock().is_empty());
    assert!(tasks.loaded().is_empty());
    assert!(flow.completes().is_empty());
    assert_eq!(flow.reduces(), vec![(0, HashMap::new())]);
}

#[test]
fn explain_records_task_stats() {
    let query = StorageQuery::builder("cpu")
        .namespace("ns")
        .select("usage")
        .group_by_tags(vec!["host".to_string()])
        .explain(true)
        .build()
        .unwrap();
    let ctx = Arc::new(StorageExecuteContext::new(query, vec![0]));
    let tasks = Arc::new(MockTasks::default().with_series(0, &[1, 65_536 + 2]));

    let flow = Arc::new(ManualFlow::default());
    StorageExecutor::new(
        flow.clone(),
        Arc::new(MockDatabase::new(metadata(), &[0])),
        ctx.clone(),
        tasks,
    )
    .execute();
    flow.run_all();

    let stats = ctx.stats().unwrap();
    assert_eq!(stats.count(TaskKind::Plan), 1);
    assert_eq!(stats.count(TaskKind::TagSearch), 0);
    assert_eq!(stats.count(TaskKind::SeriesSearch), 1);
    assert_eq!(stats.count(TaskKind::MemoryFilter), 1);
    assert_eq!(stats.count(TaskKind::FileFilter), 1);
    assert_eq!(stats.count(TaskKind::GroupingContext), 1);
    assert_eq!(stats.count(TaskKind::DataLoad), 2);
    assert_eq!(stats.count(TaskKind::BuildGroup), 2);
    assert_eq!(stats.count(TaskKind::CollectTagValues), 1);
    assert_eq!(stats.failures(), 0);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn collection_fires_exactly_once_under_concurrency() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("rusts_query=warn")
        .try_init();

    let shard_ids: Vec<ShardId> = (0..8).collect();
    let config = ParallelConfig::default()
        .with_filtering_threads(4)
        .with_grouping_threads(4)
        .with_load_threads(4);

    for _ in 0..50 {
        let mut tasks = MockTasks::default();
        for shard_id in &shard_ids {
            // each shard spans several containers
            let ids: Vec<u32> = (0..6)
                .map(|container| container * 65_536 + shard_id * 7 + container)
                .collect();
            tasks = tasks.with_series(*shard_id, &ids);
        }
        let tasks = Arc::new(tasks);
        let expected: RoaringBitmap = tasks
            .series
            .values()
            .flat_map(|ids| ids.iter().map(host_of))
            .collect();

        let flow = Arc::new(StageQueryFlow::new(&config).unwrap());
        StorageExecutor::new(
            flow.clone(),
            Arc::new(MockDatabase::new(metadata(), &shard_ids)),
            Arc::new(StorageExecuteContext::new(group_by_query(), shard_ids.clone())),
            tasks.clone(),
        )
        .execute();

        let outcome = flow.wait().unwrap();
        assert_eq!(outcome.specs.len(), 1);
        assert_eq!(outcome.tag_values.len(), 1);
        let values = outcome.tag_values_of(0).unwrap();
        let ids: RoaringBitmap = values.keys().copied().collect();
        assert_eq!(ids, expected);
        assert_eq!(tasks.loaded().len(), shard_ids.len() * 6);
    }
}
