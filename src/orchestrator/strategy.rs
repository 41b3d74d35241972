//! The three ways queries and their versions are scheduled.
//!
//! Every strategy takes the detached queries, drives each one through its
//! lifecycle with [`EvaluationContext`] and hands them back in input order.
//! Metric work is synchronous and always runs on a blocking thread; only
//! waiting for permits and for a query's versions happens on the runtime.

use super::{EvaluationContext, VersionOutcome};
use crate::domain::Query;
use crate::error::{RankevalError, Result};
use futures_util::future::{join_all, BoxFuture};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinHandle};

pub trait ExecutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn execute(
        &self,
        queries: Vec<Query>,
        context: Arc<EvaluationContext>,
    ) -> BoxFuture<'static, Result<Vec<Query>>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    #[default]
    Synchronous,
    EvaluationParallel,
    QueryParallel,
}

impl StrategyKind {
    pub fn build(self, evaluation_workers: usize, query_workers: usize) -> Box<dyn ExecutionStrategy> {
        match self {
            StrategyKind::Synchronous => Box::new(Synchronous),
            StrategyKind::EvaluationParallel => Box::new(EvaluationParallel::new(evaluation_workers)),
            StrategyKind::QueryParallel => {
                Box::new(QueryParallel::new(evaluation_workers, query_workers))
            }
        }
    }
}

fn worker_failed(e: JoinError) -> RankevalError {
    RankevalError::Execution(format!("evaluation worker failed: {}", e))
}

fn pool_closed() -> RankevalError {
    RankevalError::Execution("worker pool closed".into())
}

/// Await every handle in order. The first error wins, fatal ones first.
async fn gather(handles: Vec<JoinHandle<Result<Query>>>) -> Result<Vec<Query>> {
    let mut done = Vec::with_capacity(handles.len());
    let mut error: Option<RankevalError> = None;
    for handle in handles {
        match handle.await.map_err(worker_failed).and_then(|r| r) {
            Ok(query) => done.push(query),
            Err(e) => {
                let replace = match &error {
                    None => true,
                    Some(current) => e.is_fatal() && !current.is_fatal(),
                };
                if replace {
                    error = Some(e);
                }
            }
        }
    }
    match error {
        Some(e) => Err(e),
        None => Ok(done),
    }
}

/// Every query, and every version of it, one after the other on one thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Synchronous;

impl ExecutionStrategy for Synchronous {
    fn name(&self) -> &'static str {
        "synchronous"
    }

    fn execute(
        &self,
        queries: Vec<Query>,
        context: Arc<EvaluationContext>,
    ) -> BoxFuture<'static, Result<Vec<Query>>> {
        Box::pin(async move {
            task::spawn_blocking(move || {
                let mut done = Vec::with_capacity(queries.len());
                for mut query in queries {
                    context.evaluate_query(&mut query)?;
                    done.push(query);
                }
                Ok::<_, RankevalError>(done)
            })
            .await
            .map_err(worker_failed)?
        })
    }
}

/// Whole queries run concurrently, at most `workers` at a time; the versions
/// of one query run sequentially on its worker.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationParallel {
    workers: usize,
}

impl EvaluationParallel {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }
}

impl ExecutionStrategy for EvaluationParallel {
    fn name(&self) -> &'static str {
        "evaluation-parallel"
    }

    fn execute(
        &self,
        queries: Vec<Query>,
        context: Arc<EvaluationContext>,
    ) -> BoxFuture<'static, Result<Vec<Query>>> {
        let workers = self.workers;
        Box::pin(async move {
            let pool = Arc::new(Semaphore::new(workers));
            let mut handles = Vec::with_capacity(queries.len());
            for mut query in queries {
                let permit = Arc::clone(&pool).acquire_owned().await.map_err(|_| pool_closed())?;
                let context = Arc::clone(&context);
                handles.push(task::spawn_blocking(move || {
                    let _permit = permit;
                    context.evaluate_query(&mut query)?;
                    Ok::<_, RankevalError>(query)
                }));
            }
            gather(handles).await
        })
    }
}

/// Queries run on an evaluation pool of `evaluation_workers`; each query
/// fans its versions out to a shared query pool of `query_workers` and is
/// finalized once all of them came back.
#[derive(Debug, Clone, Copy)]
pub struct QueryParallel {
    evaluation_workers: usize,
    query_workers: usize,
}

impl QueryParallel {
    pub fn new(evaluation_workers: usize, query_workers: usize) -> Self {
        Self {
            evaluation_workers: evaluation_workers.max(1),
            query_workers: query_workers.max(1),
        }
    }
}

impl ExecutionStrategy for QueryParallel {
    fn name(&self) -> &'static str {
        "query-parallel"
    }

    fn execute(
        &self,
        queries: Vec<Query>,
        context: Arc<EvaluationContext>,
    ) -> BoxFuture<'static, Result<Vec<Query>>> {
        let evaluation_workers = self.evaluation_workers;
        let query_workers = self.query_workers;
        Box::pin(async move {
            let evaluation_pool = Arc::new(Semaphore::new(evaluation_workers));
            let query_pool = Arc::new(Semaphore::new(query_workers));
            let mut handles = Vec::with_capacity(queries.len());
            for query in queries {
                let permit = Arc::clone(&evaluation_pool)
                    .acquire_owned()
                    .await
                    .map_err(|_| pool_closed())?;
                let context = Arc::clone(&context);
                let query_pool = Arc::clone(&query_pool);
                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    evaluate_versions_concurrently(query, context, query_pool).await
                }));
            }
            gather(handles).await
        })
    }
}

async fn evaluate_versions_concurrently(
    mut query: Query,
    context: Arc<EvaluationContext>,
    query_pool: Arc<Semaphore>,
) -> Result<Query> {
    context.ensure_running()?;

    // template lookups may hit the disk
    let setup = Arc::clone(&context);
    let (mut query, tasks) = task::spawn_blocking(move || {
        setup.prepare(&mut query)?;
        let mut tasks = Vec::with_capacity(setup.versions().len());
        for version in setup.versions() {
            tasks.push(setup.version_task(&mut query, version)?);
        }
        Ok::<_, RankevalError>((query, tasks))
    })
    .await
    .map_err(worker_failed)??;

    let dispatched = tasks.into_iter().map(|version_task| {
        let context = Arc::clone(&context);
        let query_pool = Arc::clone(&query_pool);
        async move {
            let permit = query_pool.acquire_owned().await.map_err(|_| pool_closed())?;
            task::spawn_blocking(move || {
                let _permit = permit;
                context.execute(version_task)
            })
            .await
            .map_err(worker_failed)
        }
    });
    // the query moves on only after every version delivered or failed
    let outcomes: Vec<Result<VersionOutcome>> = join_all(dispatched).await;

    task::spawn_blocking(move || {
        for outcome in outcomes {
            context.settle(&mut query, outcome?)?;
        }
        context.finish(&mut query)?;
        Ok::<_, RankevalError>(query)
    })
    .await
    .map_err(worker_failed)?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        for (kind, name) in [
            (StrategyKind::Synchronous, "synchronous"),
            (StrategyKind::EvaluationParallel, "evaluation-parallel"),
            (StrategyKind::QueryParallel, "query-parallel"),
        ] {
            assert_eq!(kind.build(2, 2).name(), name);
            let encoded = serde_json::to_string(&kind).unwrap();
            assert_eq!(encoded, format!("\"{}\"", name));
        }
        assert_eq!(StrategyKind::default(), StrategyKind::Synchronous);
    }

    #[test]
    fn test_worker_counts_at_least_one() {
        assert_eq!(EvaluationParallel::new(0).workers, 1);
        let qp = QueryParallel::new(0, 0);
        assert_eq!((qp.evaluation_workers, qp.query_workers), (1, 1));
    }
}
