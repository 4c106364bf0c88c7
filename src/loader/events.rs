//! Loader-level events

use serde::Serialize;
use serde_json::Value;

use crate::scheduler::GroupId;

/// A batch finished: every member resource settled
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchComplete {
    /// Scheduler group the batch ran as
    #[serde(serialize_with = "serialize_group")]
    pub batch: GroupId,
    /// Key the batch was added under, if any
    pub key: Option<String>,
    /// Middleware that produced `data`, if the batch was added through one
    pub middleware: Option<String>,
    /// Transformed results, in the order resources were added
    pub data: Vec<Value>,
}

fn serialize_group<S: serde::Serializer>(group: &GroupId, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(group)
}
