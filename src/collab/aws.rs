//! Cloud inventory and object storage through the `aws` CLI.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{run_checked, CloudInventory, CollabError, Instance, ObjectStore, StoredObject};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstances {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<Ec2Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Ec2Instance {
    instance_id: String,
    state: Ec2State,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Ec2State {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListObjects {
    #[serde(default)]
    contents: Vec<S3Object>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct S3Object {
    key: String,
    last_modified: DateTime<Utc>,
}

fn parse_error(command: &str, e: serde_json::Error) -> CollabError {
    CollabError::Parse {
        command: command.to_string(),
        detail: e.to_string(),
    }
}

/// Parse `aws ec2 describe-instances --output json`.
pub fn parse_instances(json: &str) -> Result<Vec<Instance>, serde_json::Error> {
    let parsed: DescribeInstances = serde_json::from_str(json)?;
    Ok(parsed
        .reservations
        .into_iter()
        .flat_map(|r| r.instances)
        .map(|i| Instance::new(i.instance_id, i.state.name))
        .collect())
}

/// Parse `aws s3api list-objects-v2 --output json`. An empty bucket prints
/// nothing at all.
pub fn parse_objects(json: &str) -> Result<Vec<StoredObject>, serde_json::Error> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let parsed: ListObjects = serde_json::from_str(json)?;
    Ok(parsed
        .contents
        .into_iter()
        .map(|o| StoredObject {
            key: o.key,
            last_modified: o.last_modified,
        })
        .collect())
}

/// Uses the ambient AWS credentials chain.
pub struct AwsCli;

#[async_trait]
impl CloudInventory for AwsCli {
    async fn list_instances(&self, region: &str) -> Result<Vec<Instance>, CollabError> {
        let output = run_checked(
            "aws",
            &["ec2", "describe-instances", "--region", region, "--output", "json"],
        )
        .await?;
        parse_instances(&output.stdout).map_err(|e| parse_error("aws ec2 describe-instances", e))
    }
}

#[async_trait]
impl ObjectStore for AwsCli {
    async fn list_objects(&self, bucket: &str) -> Result<Vec<StoredObject>, CollabError> {
        let output = run_checked(
            "aws",
            &["s3api", "list-objects-v2", "--bucket", bucket, "--output", "json"],
        )
        .await?;
        parse_objects(&output.stdout).map_err(|e| parse_error("aws s3api list-objects-v2", e))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), CollabError> {
        run_checked("aws", &["s3api", "delete-object", "--bucket", bucket, "--key", key]).await?;
        Ok(())
    }
}
