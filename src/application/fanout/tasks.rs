//! Task names, payloads and the serialized envelope handed to brokers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::entities::Post;
use crate::domain::types::UserId;

use super::error::FanoutError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskName {
    DistributePost,
    BackfillFeed,
}

impl TaskName {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskName::DistributePost => "distributePost",
            TaskName::BackfillFeed => "backfillFeed",
        }
    }
}

/// Append `post` to the feed of every follower of its author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributePostPayload {
    pub post: Post,
}

/// Copy the whole post history of `followee_id` into the feed of `follower_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillFeedPayload {
    pub follower_id: UserId,
    pub followee_id: UserId,
}

/// Broker-facing unit of work: a task name plus JSON arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub name: TaskName,
    pub arguments: Value,
}

impl TaskEnvelope {
    pub fn new<P: Serialize>(name: TaskName, payload: &P) -> Result<Self, FanoutError> {
        let arguments = serde_json::to_value(payload)
            .map_err(|err| FanoutError::invalid_arguments(name.as_str(), err))?;
        Ok(Self { name, arguments })
    }

    pub fn decode<P: DeserializeOwned>(&self) -> Result<P, FanoutError> {
        serde_json::from_value(self.arguments.clone())
            .map_err(|err| FanoutError::invalid_arguments(self.name.as_str(), err))
    }
}

/// Broker acknowledgement for an accepted task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: String,
    pub name: TaskName,
}
