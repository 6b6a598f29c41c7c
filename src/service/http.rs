//! HTTP client for DynamoDB-Streams-compatible endpoints
//!
//! Speaks the AWS JSON 1.0 protocol (`X-Amz-Target` + JSON body). Requests
//! are not signed: point the endpoints at a signing proxy or a local
//! emulator, or pass a pre-computed `Authorization` header.

use super::{
    ChangeLogService, CursorToken, PositionType, ReadOutput, ServiceError, ShardDescriptor,
    ShardPage,
};
use crate::record::Record;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const AMZ_JSON: &str = "application/x-amz-json-1.0";
const STREAMS_TARGET_PREFIX: &str = "DynamoDBStreams_20120810";
const DYNAMODB_TARGET_PREFIX: &str = "DynamoDB_20120810";

/// Endpoints and transport settings for [`HttpChangeLog`]
#[derive(Debug, Clone)]
pub struct HttpChangeLogConfig {
    pub streams_endpoint: String,
    pub dynamodb_endpoint: String,
    pub authorization: Option<String>,
    pub request_timeout: Duration,
}

impl HttpChangeLogConfig {
    /// Public regional endpoints
    pub fn for_region(region: &str) -> Self {
        Self {
            streams_endpoint: format!("https://streams.dynamodb.{region}.amazonaws.com"),
            dynamodb_endpoint: format!("https://dynamodb.{region}.amazonaws.com"),
            authorization: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// [`ChangeLogService`] backed by HTTP JSON calls
#[derive(Debug, Clone)]
pub struct HttpChangeLog {
    client: reqwest::Client,
    config: HttpChangeLogConfig,
}

impl HttpChangeLog {
    pub fn new(config: HttpChangeLogConfig) -> Result<Self, ServiceError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(AMZ_JSON));
        if let Some(ref auth) = config.authorization {
            let value = HeaderValue::from_str(auth).map_err(|_| {
                ServiceError::Unavailable("authorization header is not valid ASCII".to_string())
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, config })
    }

    async fn call<Req, Resp>(
        &self,
        endpoint: &str,
        amz_target: String,
        body: &Req,
    ) -> Result<Resp, ServiceError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        debug!(endpoint, amz_target = %amz_target, "Calling change-log service");

        let response = self
            .client
            .post(endpoint)
            .header("X-Amz-Target", amz_target.as_str())
            .body(serde_json::to_vec(body)?)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            let err = decode_error(&bytes, status.as_u16());
            warn!(
                amz_target = %amz_target,
                status = status.as_u16(),
                error = %err,
                "Change-log call failed"
            );
            return Err(err);
        }

        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn streams_call<Req, Resp>(
        &self,
        operation: &str,
        body: &Req,
    ) -> Result<Resp, ServiceError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        self.call(
            &self.config.streams_endpoint,
            format!("{STREAMS_TARGET_PREFIX}.{operation}"),
            body,
        )
        .await
    }
}

#[async_trait]
impl ChangeLogService for HttpChangeLog {
    async fn list_shards(
        &self,
        stream_id: &str,
        exclusive_start_shard_id: Option<&str>,
    ) -> Result<ShardPage, ServiceError> {
        let request = DescribeStreamRequest {
            stream_arn: stream_id,
            exclusive_start_shard_id,
        };
        let response: DescribeStreamResponse =
            self.streams_call("DescribeStream", &request).await?;
        Ok(response.stream_description.into())
    }

    async fn get_cursor(
        &self,
        stream_id: &str,
        shard_id: &str,
        position: PositionType,
    ) -> Result<CursorToken, ServiceError> {
        let request = GetShardIteratorRequest {
            stream_arn: stream_id,
            shard_id,
            shard_iterator_type: position.as_str(),
        };
        let response: GetShardIteratorResponse =
            self.streams_call("GetShardIterator", &request).await?;
        response.shard_iterator.ok_or_else(|| ServiceError::Api {
            code: "MissingShardIterator".to_string(),
            message: format!("no iterator returned for shard {shard_id}"),
        })
    }

    async fn read_records(&self, cursor: &CursorToken) -> Result<ReadOutput, ServiceError> {
        let request = GetRecordsRequest {
            shard_iterator: cursor.as_str(),
        };
        let response: GetRecordsResponse = self.streams_call("GetRecords", &request).await?;
        Ok(ReadOutput {
            records: response.records,
            next_cursor: response.next_shard_iterator,
        })
    }

    async fn latest_stream_id(&self, table: &str) -> Result<Option<String>, ServiceError> {
        let request = DescribeTableRequest { table_name: table };
        let response: DescribeTableResponse = self
            .call(
                &self.config.dynamodb_endpoint,
                format!("{DYNAMODB_TARGET_PREFIX}.DescribeTable"),
                &request,
            )
            .await?;
        Ok(response.table.latest_stream_arn)
    }
}

/// Turn an error body (`{"__type": "...#Code", "message": "..."}`) into a [`ServiceError`]
fn decode_error(body: &[u8], status: u16) -> ServiceError {
    match serde_json::from_slice::<ErrorDocument>(body) {
        Ok(doc) => ServiceError::Api {
            code: doc
                .kind
                .rsplit('#')
                .next()
                .unwrap_or_default()
                .to_string(),
            message: doc.message.unwrap_or_default(),
        },
        Err(_) => ServiceError::Api {
            code: format!("Http{status}"),
            message: String::from_utf8_lossy(body).into_owned(),
        },
    }
}

#[derive(Debug, Deserialize)]
struct ErrorDocument {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(alias = "Message")]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStreamRequest<'a> {
    stream_arn: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    exclusive_start_shard_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStreamResponse {
    stream_description: StreamDescription,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StreamDescription {
    #[serde(default)]
    shards: Vec<WireShard>,
    last_evaluated_shard_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireShard {
    shard_id: String,
    parent_shard_id: Option<String>,
    #[serde(default)]
    sequence_number_range: SequenceNumberRange,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SequenceNumberRange {
    starting_sequence_number: Option<String>,
    ending_sequence_number: Option<String>,
}

impl From<StreamDescription> for ShardPage {
    fn from(description: StreamDescription) -> Self {
        Self {
            shards: description
                .shards
                .into_iter()
                .map(|s| ShardDescriptor {
                    shard_id: s.shard_id,
                    parent_shard_id: s.parent_shard_id,
                    starting_sequence: s.sequence_number_range.starting_sequence_number,
                    ending_sequence: s.sequence_number_range.ending_sequence_number,
                })
                .collect(),
            last_evaluated_shard_id: description.last_evaluated_shard_id,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetShardIteratorRequest<'a> {
    stream_arn: &'a str,
    shard_id: &'a str,
    shard_iterator_type: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetShardIteratorResponse {
    shard_iterator: Option<CursorToken>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetRecordsRequest<'a> {
    shard_iterator: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetRecordsResponse {
    #[serde(default)]
    records: Vec<Record>,
    next_shard_iterator: Option<CursorToken>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeTableRequest<'a> {
    table_name: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeTableResponse {
    table: TableDescription,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TableDescription {
    latest_stream_arn: Option<String>,
}
