//! Job Execution Provider
//!
//! Operational metadata about feed job runs. Executions are filed under
//! `/metadata/jobs/<category.feed>/<execution id>` and carry the qualified
//! feed name as a plain property so that per-feed lookups do not need a join.
//! Status counts are grouped counts over the query service.

use crate::db::Session;
use crate::mapper::Entity;
use crate::models::{
    job_property, Feed, JobExecution, JobExecutionArgs, JobStatus, NodePath, PropertyUpdates,
    JOBS_PATH,
};
use crate::services::query_service::{
    parse_filter, FieldRef, FilterAliases, FilterOperator, GroupKey, GroupValue, QueryDefinition,
    QueryFilter, QueryService, SortDirection,
};
use crate::services::{EntityProvider, Page, PageRequest, RepositoryError};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Number of executions with a given status, optionally on a given day
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusCount {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JobExecutionProvider {
    now: Option<DateTime<Utc>>,
}

impl EntityProvider for JobExecutionProvider {
    type Entity<'s> = JobExecution<'s>;

    fn entity_args<'s>(&self) -> <JobExecution<'s> as Entity<'s>>::Args {
        JobExecutionArgs { now: self.now }
    }

    fn filter_aliases(&self) -> FilterAliases {
        FilterAliases::new()
            .alias("status", job_property::STATUS)
            .alias("feed", job_property::FEED_NAME)
            .alias("feedName", job_property::FEED_NAME)
            .alias("startTime", job_property::START_TIME)
            .alias("endTime", job_property::END_TIME)
            .alias("exitCode", job_property::EXIT_CODE)
            .alias("executionId", job_property::EXECUTION_ID)
    }

    fn query(&self) -> QueryDefinition {
        QueryDefinition::of_type(self.node_type())
            .order_by(job_property::START_TIME, SortDirection::Descending)
    }
}

impl JobExecutionProvider {
    /// Provider whose entities and relative periods use a fixed clock
    pub fn with_clock(now: DateTime<Utc>) -> Self {
        Self { now: Some(now) }
    }

    fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    /// `<category>.<feed>`, or the bare feed name for a feed without category
    pub fn qualified_feed_name(feed: &Feed<'_>) -> Result<String, RepositoryError> {
        let name = feed.name()?;
        Ok(match feed.category()? {
            Some(category) => format!("{}.{}", category.name()?, name),
            None => name,
        })
    }

    /// Record a new execution of `feed` in status `STARTED`
    ///
    /// Calling it again for an existing execution id returns that execution
    /// untouched.
    pub fn create_job_execution<'s>(
        &self,
        session: &'s Session,
        feed: &Feed<'s>,
        execution_id: i64,
        start_time: DateTime<Utc>,
    ) -> Result<JobExecution<'s>, RepositoryError> {
        if let Some(existing) = self.find_by_job_execution_id(session, execution_id)? {
            return Ok(existing);
        }

        let feed_name = Self::qualified_feed_name(feed)?;
        let path = NodePath::parse(JOBS_PATH)?
            .child(&feed_name)?
            .child(&execution_id.to_string())?;
        let updates = PropertyUpdates::new()
            .set(job_property::EXECUTION_ID, execution_id)
            .set(job_property::FEED, feed.id())
            .set(job_property::FEED_NAME, feed_name.as_str())
            .set(job_property::STATUS, JobStatus::Started.to_string())
            .set(job_property::START_TIME, start_time);

        tracing::debug!(execution_id, feed = %feed_name, "Creating job execution");
        self.find_or_create_entity(session, "/", &path.to_string(), &updates)
    }

    pub fn save<'s>(&self, session: &'s Session, job: &JobExecution<'s>) -> Result<(), RepositoryError> {
        self.update(session, job)
    }

    pub fn find_by_job_execution_id<'s>(
        &self,
        session: &'s Session,
        execution_id: i64,
    ) -> Result<Option<JobExecution<'s>>, RepositoryError> {
        let query = self
            .query()
            .filter(QueryFilter::equals(job_property::EXECUTION_ID, execution_id));
        self.find_first(session, &query)
    }

    fn feed_query(&self, feed_name: &str) -> QueryDefinition {
        self.query()
            .filter(QueryFilter::equals(job_property::FEED_NAME, feed_name))
    }

    /// Most recently started execution of the feed
    pub fn find_latest_job_for_feed<'s>(
        &self,
        session: &'s Session,
        feed_name: &str,
    ) -> Result<Option<JobExecution<'s>>, RepositoryError> {
        self.find_first(session, &self.feed_query(feed_name))
    }

    /// Completed execution of the feed that ended last
    pub fn find_latest_completed_job_for_feed<'s>(
        &self,
        session: &'s Session,
        feed_name: &str,
    ) -> Result<Option<JobExecution<'s>>, RepositoryError> {
        let mut query = self
            .feed_query(feed_name)
            .filter(QueryFilter::equals(job_property::STATUS, JobStatus::Completed.to_string()));
        query.sorting.clear();
        let query = query.order_by(job_property::END_TIME, SortDirection::Descending);
        self.find_first(session, &query)
    }

    /// Whether the latest execution of the feed is still running
    pub fn is_feed_running(&self, session: &Session, feed_name: &str) -> Result<bool, RepositoryError> {
        match self.find_latest_job_for_feed(session, feed_name)? {
            Some(job) => Ok(job.status()?.is_running()),
            None => Ok(false),
        }
    }

    /// Executions of the feed that completed at or after `since`
    pub fn find_jobs_for_feed_completed_since<'s>(
        &self,
        session: &'s Session,
        feed_name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<JobExecution<'s>>, RepositoryError> {
        let query = self
            .feed_query(feed_name)
            .filter(QueryFilter::equals(job_property::STATUS, JobStatus::Completed.to_string()))
            .filter(QueryFilter::compare(
                job_property::END_TIME,
                FilterOperator::GreaterThanOrEqual,
                since,
            ));
        self.find(session, &query)
    }

    fn filtered_query(&self, base: QueryDefinition, filter: &str) -> Result<QueryDefinition, RepositoryError> {
        Ok(base.filters(parse_filter(filter, &self.filter_aliases())?))
    }

    /// Page of executions matching a filter string, newest first
    pub fn find_all<'s>(
        &self,
        session: &'s Session,
        filter: &str,
        page: &PageRequest,
    ) -> Result<Page<JobExecution<'s>>, RepositoryError> {
        let query = self.filtered_query(self.query(), filter)?;
        self.find_page(session, &query, page)
    }

    /// Page of the feed's executions matching a filter string, newest first
    pub fn find_all_for_feed<'s>(
        &self,
        session: &'s Session,
        feed_name: &str,
        filter: &str,
        page: &PageRequest,
    ) -> Result<Page<JobExecution<'s>>, RepositoryError> {
        let query = self.filtered_query(self.feed_query(feed_name), filter)?;
        self.find_page(session, &query, page)
    }

    /// Executions per status among those matching `filter`
    pub fn job_status_count(&self, session: &Session, filter: &str) -> Result<Vec<JobStatusCount>, RepositoryError> {
        let query = self.filtered_query(self.query(), filter)?;
        self.status_counts(session, &query, false)
    }

    /// Executions per start day and status
    pub fn job_status_count_by_date(&self, session: &Session) -> Result<Vec<JobStatusCount>, RepositoryError> {
        self.status_counts(session, &self.query(), true)
    }

    /// Executions per start day and status, limited to jobs started within
    /// `period` before now and matching `filter`
    pub fn job_status_count_by_date_from_now(
        &self,
        session: &Session,
        period: Duration,
        filter: &str,
    ) -> Result<Vec<JobStatusCount>, RepositoryError> {
        let since = self.now() - period;
        let query = self.filtered_query(self.query(), filter)?.filter(QueryFilter::compare(
            job_property::START_TIME,
            FilterOperator::GreaterThanOrEqual,
            since,
        ));
        self.status_counts(session, &query, true)
    }

    fn status_counts(
        &self,
        session: &Session,
        query: &QueryDefinition,
        by_day: bool,
    ) -> Result<Vec<JobStatusCount>, RepositoryError> {
        let mut keys = Vec::with_capacity(2);
        if by_day {
            keys.push(GroupKey::Day(FieldRef::Property(job_property::START_TIME.to_string())));
        }
        keys.push(GroupKey::Field(FieldRef::Property(job_property::STATUS.to_string())));

        let groups = QueryService::new(session).count_by(query, &keys)?;

        // Unparsable statuses fold into UNKNOWN, so merge before reporting
        let mut counts: BTreeMap<(Option<NaiveDate>, JobStatus), usize> = BTreeMap::new();
        for (group, count) in groups {
            let mut date = None;
            let mut status = JobStatus::Unknown;
            for value in group {
                match value {
                    GroupValue::Day(day) => date = Some(day),
                    GroupValue::Text(text) => status = text.parse().unwrap_or(JobStatus::Unknown),
                    GroupValue::Absent => {}
                }
            }
            *counts.entry((date, status)).or_insert(0) += count;
        }

        Ok(counts
            .into_iter()
            .map(|((date, status), count)| JobStatusCount { status, date, count })
            .collect())
    }
}
