//! Job execution entity
//!
//! One node per run of a feed's job, stored at
//! `/metadata/jobs/<feed>/<execution id>`. Executions are an audit trail:
//! providers refuse to delete them.

use crate::mapper::{Entity, MappingError, NodeObject};
use crate::models::Feed;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const JOB_EXECUTION_NODE_TYPE: &str = "tba:jobExecution";

/// Parent path of every job execution
pub const JOBS_PATH: &str = "/metadata/jobs";

/// Property names used by [`JobExecution`]
pub mod job_property {
    pub const EXECUTION_ID: &str = "tba:executionId";
    pub const FEED: &str = "tba:feed";
    pub const FEED_NAME: &str = "tba:feedName";
    pub const STATUS: &str = "tba:status";
    pub const EXIT_CODE: &str = "tba:exitCode";
    pub const START_TIME: &str = "tba:startTime";
    pub const END_TIME: &str = "tba:endTime";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Starting,
    Started,
    Stopping,
    Stopped,
    Completed,
    Failed,
    Abandoned,
    Unknown,
}

impl JobStatus {
    /// Whether a job in this status still holds its feed
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Starting | Self::Started | Self::Stopping)
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Stopped | Self::Abandoned
        )
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STARTING" => Ok(Self::Starting),
            "STARTED" => Ok(Self::Started),
            "STOPPING" => Ok(Self::Stopping),
            "STOPPED" => Ok(Self::Stopped),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "ABANDONED" => Ok(Self::Abandoned),
            "UNKNOWN" => Ok(Self::Unknown),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Abandoned => "ABANDONED",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Construction arguments for [`JobExecution`]
#[derive(Debug, Clone, Copy, Default)]
pub struct JobExecutionArgs {
    /// Clock used for the run time of unfinished jobs, `Utc::now()` when unset
    pub now: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct JobExecution<'s> {
    object: NodeObject<'s>,
    now: Option<DateTime<Utc>>,
}

impl<'s> Entity<'s> for JobExecution<'s> {
    const NODE_TYPE: &'static str = JOB_EXECUTION_NODE_TYPE;
    const REMOVABLE: bool = false;
    type Args = JobExecutionArgs;

    fn from_object(object: NodeObject<'s>, args: JobExecutionArgs) -> Self {
        Self {
            object,
            now: args.now,
        }
    }

    fn object(&self) -> &NodeObject<'s> {
        &self.object
    }
}

impl<'s> JobExecution<'s> {
    pub fn execution_id(&self) -> Result<i64, MappingError> {
        self.object.required_property(job_property::EXECUTION_ID)
    }

    pub fn feed_name(&self) -> Result<Option<String>, MappingError> {
        self.object.property(job_property::FEED_NAME)
    }

    pub fn feed(&self) -> Result<Option<Feed<'s>>, MappingError> {
        self.object.reference(job_property::FEED)
    }

    /// Status, `Unknown` when absent or unrecognised
    pub fn status(&self) -> Result<JobStatus, MappingError> {
        Ok(self
            .object
            .property::<String>(job_property::STATUS)?
            .and_then(|s| s.parse().ok())
            .unwrap_or(JobStatus::Unknown))
    }

    pub fn set_status(&self, status: JobStatus) -> Result<(), MappingError> {
        self.object
            .set_property(job_property::STATUS, status.to_string())
    }

    pub fn exit_code(&self) -> Result<Option<String>, MappingError> {
        self.object.property(job_property::EXIT_CODE)
    }

    pub fn set_exit_code(&self, exit_code: &str) -> Result<(), MappingError> {
        self.object.set_property(job_property::EXIT_CODE, exit_code)
    }

    pub fn start_time(&self) -> Result<Option<DateTime<Utc>>, MappingError> {
        self.object.property(job_property::START_TIME)
    }

    pub fn set_start_time(&self, time: DateTime<Utc>) -> Result<(), MappingError> {
        self.object.set_property(job_property::START_TIME, time)
    }

    pub fn end_time(&self) -> Result<Option<DateTime<Utc>>, MappingError> {
        self.object.property(job_property::END_TIME)
    }

    pub fn set_end_time(&self, time: DateTime<Utc>) -> Result<(), MappingError> {
        self.object.set_property(job_property::END_TIME, time)
    }

    /// Record the outcome of the run
    pub fn finish(&self, status: JobStatus, end_time: DateTime<Utc>) -> Result<(), MappingError> {
        self.set_status(status)?;
        self.set_end_time(end_time)
    }

    /// Elapsed time, measured to now for jobs without an end time
    pub fn run_time(&self) -> Result<Option<Duration>, MappingError> {
        let Some(start) = self.start_time()? else {
            return Ok(None);
        };
        let end = match self.end_time()? {
            Some(end) => end,
            None => self.now.unwrap_or_else(Utc::now),
        };
        Ok(Some(end - start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_is_case_insensitive() {
        assert_eq!("completed".parse::<JobStatus>().unwrap(), JobStatus::Completed);
        assert_eq!(JobStatus::Started.to_string(), "STARTED");
        assert_eq!(serde_json::to_value(JobStatus::Started).unwrap(), "STARTED");
        assert_eq!(
            serde_json::from_value::<JobStatus>("ABANDONED".into()).unwrap(),
            JobStatus::Abandoned
        );
        assert!("sleeping".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_running_statuses() {
        assert!(JobStatus::Started.is_running());
        assert!(JobStatus::Starting.is_running());
        assert!(!JobStatus::Completed.is_running());
        assert!(JobStatus::Abandoned.is_finished());
        assert!(!JobStatus::Unknown.is_finished());
    }
}
