//! Scriptable in-memory stand-ins for the backend contracts.
//!
//! Every fake is `Clone` and shares its state between clones, so a test can
//! hand one copy to the code under test and keep another to script replies
//! and inspect what happened.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use tinyurl_core::{
    CacheClient, CacheError, CacheResult, Context, DbError, DbResult, MetricSink, Record,
    SqlClient, SqlReader, SqlTransaction, SqlValue, TxOptions,
};

/// A statement observed by [`FakeSqlClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct SqlCall {
    pub query: String,
    pub args: Vec<SqlValue>,
    pub in_transaction: bool,
}

/// Transaction lifecycle events, in the order they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEvent {
    Begin(TxOptions),
    Commit,
    Rollback,
}

#[derive(Debug)]
enum Reply {
    Rows(Vec<Value>),
    Affected(u64),
    Fail(DbError),
}

#[derive(Debug, Default)]
struct SqlState {
    replies: VecDeque<Reply>,
    calls: Vec<SqlCall>,
    events: Vec<TxEvent>,
    begin_error: Option<DbError>,
    commit_error: Option<DbError>,
    rollback_error: Option<DbError>,
    ping_error: Option<DbError>,
    close_error: Option<DbError>,
    closed: bool,
}

/// A relational client answering statements from a FIFO script.
///
/// Each statement, inside or outside a transaction, consumes the next
/// scripted reply. Rows are JSON objects decoded into the destination type.
/// With the script exhausted, reads return no rows (so `fetch_one` is
/// `NotFound`) and writes affect zero rows.
#[derive(Debug, Clone, Default)]
pub struct FakeSqlClient {
    state: Arc<Mutex<SqlState>>,
}

impl FakeSqlClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply carrying `rows`.
    pub fn push_rows(&self, rows: impl IntoIterator<Item = Value>) -> &Self {
        self.push(Reply::Rows(rows.into_iter().collect()))
    }

    /// Queues a reply carrying a single row.
    pub fn push_row(&self, row: Value) -> &Self {
        self.push_rows([row])
    }

    /// Queues a write reply affecting `rows` rows.
    pub fn push_affected(&self, rows: u64) -> &Self {
        self.push(Reply::Affected(rows))
    }

    /// Queues a failing reply.
    pub fn push_error(&self, err: DbError) -> &Self {
        self.push(Reply::Fail(err))
    }

    fn push(&self, reply: Reply) -> &Self {
        self.state.lock().replies.push_back(reply);
        self
    }

    /// The next `begin_transaction` fails with `err`.
    pub fn fail_begin(&self, err: DbError) {
        self.state.lock().begin_error = Some(err);
    }

    /// The next `commit` fails with `err`.
    pub fn fail_commit(&self, err: DbError) {
        self.state.lock().commit_error = Some(err);
    }

    /// The next `rollback` fails with `err`.
    pub fn fail_rollback(&self, err: DbError) {
        self.state.lock().rollback_error = Some(err);
    }

    /// The next `ping` fails with `err`.
    pub fn fail_ping(&self, err: DbError) {
        self.state.lock().ping_error = Some(err);
    }

    /// The next `close` fails with `err`.
    pub fn fail_close(&self, err: DbError) {
        self.state.lock().close_error = Some(err);
    }

    /// Every statement issued so far.
    pub fn calls(&self) -> Vec<SqlCall> {
        self.state.lock().calls.clone()
    }

    /// Every transaction lifecycle event so far.
    pub fn events(&self) -> Vec<TxEvent> {
        self.state.lock().events.clone()
    }

    /// Number of scripted replies not consumed yet.
    pub fn pending_replies(&self) -> usize {
        self.state.lock().replies.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn statement(
        &self,
        ctx: &Context,
        query: &str,
        args: &[SqlValue],
        in_transaction: bool,
    ) -> DbResult<Option<Reply>> {
        if let Some(interrupted) = ctx.err() {
            return Err(interrupted.into());
        }

        let mut state = self.state.lock();
        state.calls.push(SqlCall {
            query: query.to_string(),
            args: args.to_vec(),
            in_transaction,
        });
        Ok(state.replies.pop_front())
    }
}

fn decode_rows<T: Record>(reply: Option<Reply>) -> DbResult<Vec<T>> {
    match reply {
        Some(Reply::Rows(rows)) => rows
            .into_iter()
            .map(|row| {
                serde_json::from_value(row).map_err(|e| DbError::InvalidData(e.to_string()))
            })
            .collect(),
        Some(Reply::Affected(_)) | None => Ok(Vec::new()),
        Some(Reply::Fail(err)) => Err(err),
    }
}

fn first_row<T: Record>(reply: Option<Reply>) -> DbResult<T> {
    decode_rows(reply)?.into_iter().next().ok_or(DbError::NotFound)
}

fn affected(reply: Option<Reply>) -> DbResult<u64> {
    match reply {
        Some(Reply::Affected(rows)) => Ok(rows),
        Some(Reply::Rows(rows)) => Ok(rows.len() as u64),
        None => Ok(0),
        Some(Reply::Fail(err)) => Err(err),
    }
}

fn finished() -> DbError {
    DbError::backend(std::io::Error::other("transaction already finished"))
}

#[async_trait]
impl SqlReader for FakeSqlClient {
    async fn fetch_many<T: Record>(
        &self,
        ctx: &Context,
        query: &str,
        args: &[SqlValue],
    ) -> DbResult<Vec<T>> {
        decode_rows(self.statement(ctx, query, args, false)?)
    }

    async fn fetch_one<T: Record>(
        &self,
        ctx: &Context,
        query: &str,
        args: &[SqlValue],
    ) -> DbResult<T> {
        first_row(self.statement(ctx, query, args, false)?)
    }

    async fn ping(&self, ctx: &Context) -> DbResult<()> {
        if let Some(interrupted) = ctx.err() {
            return Err(interrupted.into());
        }
        self.state.lock().ping_error.take().map_or(Ok(()), Err)
    }

    async fn close(&self) -> DbResult<()> {
        let mut state = self.state.lock();
        state.closed = true;
        state.close_error.take().map_or(Ok(()), Err)
    }
}

#[async_trait]
impl SqlClient for FakeSqlClient {
    type Transaction = FakeTransaction;

    async fn execute(&self, ctx: &Context, query: &str, args: &[SqlValue]) -> DbResult<u64> {
        affected(self.statement(ctx, query, args, false)?)
    }

    async fn begin_transaction(
        &self,
        ctx: &Context,
        options: TxOptions,
    ) -> DbResult<FakeTransaction> {
        if let Some(interrupted) = ctx.err() {
            return Err(interrupted.into());
        }

        let mut state = self.state.lock();
        if let Some(err) = state.begin_error.take() {
            return Err(err);
        }
        state.events.push(TxEvent::Begin(options));

        Ok(FakeTransaction {
            client: self.clone(),
            done: false,
        })
    }
}

/// Transaction handle returned by [`FakeSqlClient::begin_transaction`].
///
/// A failed commit leaves the transaction open, so the caller's rollback is
/// still observable in [`FakeSqlClient::events`].
#[derive(Debug)]
pub struct FakeTransaction {
    client: FakeSqlClient,
    done: bool,
}

impl FakeTransaction {
    fn statement(
        &self,
        ctx: &Context,
        query: &str,
        args: &[SqlValue],
    ) -> DbResult<Option<Reply>> {
        if self.done {
            return Err(finished());
        }
        self.client.statement(ctx, query, args, true)
    }
}

#[async_trait]
impl SqlTransaction for FakeTransaction {
    async fn fetch_many<T: Record>(
        &mut self,
        ctx: &Context,
        query: &str,
        args: &[SqlValue],
    ) -> DbResult<Vec<T>> {
        decode_rows(self.statement(ctx, query, args)?)
    }

    async fn fetch_one<T: Record>(
        &mut self,
        ctx: &Context,
        query: &str,
        args: &[SqlValue],
    ) -> DbResult<T> {
        first_row(self.statement(ctx, query, args)?)
    }

    async fn execute(&mut self, ctx: &Context, query: &str, args: &[SqlValue]) -> DbResult<u64> {
        affected(self.statement(ctx, query, args)?)
    }

    async fn commit(&mut self) -> DbResult<()> {
        if self.done {
            return Err(finished());
        }

        let mut state = self.client.state.lock();
        state.events.push(TxEvent::Commit);
        match state.commit_error.take() {
            Some(err) => Err(err),
            None => {
                self.done = true;
                Ok(())
            }
        }
    }

    async fn rollback(&mut self) -> DbResult<()> {
        if self.done {
            return Ok(());
        }
        self.done = true;

        let mut state = self.client.state.lock();
        state.events.push(TxEvent::Rollback);
        state.rollback_error.take().map_or(Ok(()), Err)
    }
}

/// Operations of [`FakeCacheClient`], for failure injection and call counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOp {
    Get,
    SetIfAbsent,
    Delete,
    Increment,
    Ping,
    Close,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, (Vec<u8>, Duration)>,
    failures: HashMap<CacheOp, CacheError>,
    calls: HashMap<CacheOp, usize>,
}

/// An in-memory key-value client with injectable failures.
///
/// Entries never expire; the TTL each was written with is kept for
/// inspection. An injected failure stays active until cleared.
#[derive(Debug, Clone, Default)]
pub struct FakeCacheClient {
    state: Arc<Mutex<CacheState>>,
}

impl FakeCacheClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key` without counting a call.
    pub fn seed(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.state
            .lock()
            .entries
            .insert(key.into(), (value.into(), Duration::ZERO));
    }

    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().entries.get(key).map(|(v, _)| v.clone())
    }

    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.state.lock().entries.get(key).map(|(_, ttl)| *ttl)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes every later `op` fail with `err`.
    pub fn fail(&self, op: CacheOp, err: CacheError) {
        self.state.lock().failures.insert(op, err);
    }

    /// Makes every operation fail with `err`.
    pub fn fail_all(&self, err: CacheError) {
        let mut state = self.state.lock();
        for op in [
            CacheOp::Get,
            CacheOp::SetIfAbsent,
            CacheOp::Delete,
            CacheOp::Increment,
            CacheOp::Ping,
            CacheOp::Close,
        ] {
            state.failures.insert(op, err.clone());
        }
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// How many times `op` was called, failed calls included.
    pub fn calls(&self, op: CacheOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Counts the call and returns the injected failure for `op`, if any.
    fn enter(
        &self,
        ctx: Option<&Context>,
        op: CacheOp,
    ) -> CacheResult<MutexGuard<'_, CacheState>> {
        let mut state = self.state.lock();
        *state.calls.entry(op).or_default() += 1;

        if let Some(interrupted) = ctx.and_then(Context::err) {
            return Err(interrupted.into());
        }
        if let Some(err) = state.failures.get(&op) {
            return Err(err.clone());
        }
        Ok(state)
    }
}

#[async_trait]
impl CacheClient for FakeCacheClient {
    async fn get(&self, ctx: &Context, key: &str) -> CacheResult<Vec<u8>> {
        let state = self.enter(Some(ctx), CacheOp::Get)?;
        state
            .entries
            .get(key)
            .map(|(value, _)| value.clone())
            .ok_or(CacheError::NotFound)
    }

    async fn set_if_absent(
        &self,
        ctx: &Context,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> CacheResult<bool> {
        let mut state = self.enter(Some(ctx), CacheOp::SetIfAbsent)?;
        if state.entries.contains_key(key) {
            return Ok(false);
        }
        state.entries.insert(key.to_string(), (value.to_vec(), ttl));
        Ok(true)
    }

    async fn delete(&self, ctx: &Context, key: &str) -> CacheResult<()> {
        let mut state = self.enter(Some(ctx), CacheOp::Delete)?;
        state.entries.remove(key);
        Ok(())
    }

    async fn increment(&self, ctx: &Context, key: &str) -> CacheResult<i64> {
        let mut state = self.enter(Some(ctx), CacheOp::Increment)?;
        let (bytes, ttl) = state
            .entries
            .remove(key)
            .unwrap_or_else(|| (b"0".to_vec(), Duration::ZERO));
        let current = std::str::from_utf8(&bytes)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| {
                CacheError::Unavailable(format!("value at '{key}' is not an integer"))
            })?;
        let next = current + 1;
        state
            .entries
            .insert(key.to_string(), (next.to_string().into_bytes(), ttl));
        Ok(next)
    }

    async fn ping(&self, ctx: &Context) -> CacheResult<()> {
        self.enter(Some(ctx), CacheOp::Ping).map(|_| ())
    }

    async fn close(&self) -> CacheResult<()> {
        self.enter(None, CacheOp::Close).map(|_| ())
    }
}

/// A signal recorded by [`FakeMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricEvent {
    MemoryHit(String),
    MemoryMiss(String),
    MemoryInvalid(String),
    MemoryBypassed,
    CacheHit(String),
    CacheMiss(String),
    CacheError(String),
    DbQuery(String),
    DbError(String),
}

/// A metric sink that records every signal, latencies dropped.
#[derive(Debug, Clone, Default)]
pub struct FakeMetrics {
    events: Arc<Mutex<Vec<MetricEvent>>>,
}

impl FakeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A shareable sink writing into this recorder.
    pub fn sink(&self) -> Arc<dyn MetricSink> {
        Arc::new(self.clone())
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().clone()
    }

    /// How many recorded events equal `event`.
    pub fn count(&self, event: &MetricEvent) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    fn record(&self, event: MetricEvent) {
        self.events.lock().push(event);
    }
}

impl MetricSink for FakeMetrics {
    fn memory_hit(&self, key: &str, _elapsed: Duration) {
        self.record(MetricEvent::MemoryHit(key.to_string()));
    }

    fn memory_miss(&self, key: &str, _elapsed: Duration) {
        self.record(MetricEvent::MemoryMiss(key.to_string()));
    }

    fn memory_invalid(&self, key: &str) {
        self.record(MetricEvent::MemoryInvalid(key.to_string()));
    }

    fn memory_bypassed(&self) {
        self.record(MetricEvent::MemoryBypassed);
    }

    fn cache_hit(&self, key: &str) {
        self.record(MetricEvent::CacheHit(key.to_string()));
    }

    fn cache_miss(&self, key: &str) {
        self.record(MetricEvent::CacheMiss(key.to_string()));
    }

    fn cache_error(&self, key: &str, _message: &str) {
        self.record(MetricEvent::CacheError(key.to_string()));
    }

    fn db_query(&self, query: &str, _elapsed: Duration) {
        self.record(MetricEvent::DbQuery(query.to_string()));
    }

    fn db_error(&self, query: &str, _message: &str) {
        self.record(MetricEvent::DbError(query.to_string()));
    }
}
