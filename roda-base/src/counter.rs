use std::collections::HashMap;
use std::time::Duration;

use rusoto_core::{Region, RusotoError};
use rusoto_dynamodb::{AttributeValue, DynamoDb, DynamoDbClient, UpdateItemError, UpdateItemInput};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

const COUNTER_NAME: &str = "RouteID";
const KEY_ATTRIBUTE: &str = "IDType";
const VALUE_ATTRIBUTE: &str = "CounterValue";

const MAX_ATTEMPTS: u32 = 5;
const BASE_BACKOFF_MS: u64 = 400;

/// Errors from the route-id counter.
#[derive(Debug, Error)]
pub enum CounterError {
    /// Throughput throttling persisted through every retry.
    #[error("counter still throttled after {0} attempts")]
    Throttled(u32),
    /// Any non-throttling service failure. Fatal for the stage.
    #[error("counter request failed: {0}")]
    Request(String),
    /// The service accepted the update but returned no usable value.
    #[error("counter returned no value")]
    MissingValue,
}

/// The one global mutable register of the pipeline: a durable, linearizable
/// u64 under the name `RouteID`, backed by a DynamoDB atomic add.
///
/// The floor value (100000) is written once by an operator when the table is
/// created; `next` only ever increments. Throttling is retried with
/// exponential backoff; anything else is fatal.
#[derive(Debug, Clone)]
pub struct RouteIdCounter {
    client: DynamoDbClient,
    table: String,
}

impl RouteIdCounter {
    /// Counter over the given DynamoDB table.
    pub fn new(table: String, region: Region) -> Self {
        Self {
            client: DynamoDbClient::new(region),
            table,
        }
    }

    /// Atomically increment the counter and return the post-increment
    /// value. Strictly monotonic across all callers.
    pub async fn next(&self) -> Result<u64, CounterError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.update_item(self.increment_input()).await {
                Ok(output) => {
                    let value = output
                        .attributes
                        .as_ref()
                        .and_then(|attrs| attrs.get(VALUE_ATTRIBUTE))
                        .and_then(|attr| attr.n.as_deref())
                        .and_then(|n| n.parse::<u64>().ok())
                        .ok_or(CounterError::MissingValue)?;
                    debug!(value, "Issued route id");
                    return Ok(value);
                }
                Err(e) if is_throttle(&e) => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(CounterError::Throttled(attempt));
                    }
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt - 1));
                    warn!(attempt, backoff_ms = backoff.as_millis() as u64, "Counter throttled, backing off");
                    sleep(backoff).await;
                }
                Err(e) => return Err(CounterError::Request(e.to_string())),
            }
        }
    }

    fn increment_input(&self) -> UpdateItemInput {
        let key = HashMap::from([(
            KEY_ATTRIBUTE.to_owned(),
            AttributeValue {
                s: Some(COUNTER_NAME.to_owned()),
                ..Default::default()
            },
        )]);
        let values = HashMap::from([(
            ":incr".to_owned(),
            AttributeValue {
                n: Some("1".to_owned()),
                ..Default::default()
            },
        )]);
        UpdateItemInput {
            table_name: self.table.clone(),
            key,
            update_expression: Some(format!("ADD {VALUE_ATTRIBUTE} :incr")),
            expression_attribute_values: Some(values),
            return_values: Some("UPDATED_NEW".to_owned()),
            ..Default::default()
        }
    }
}

fn is_throttle(e: &RusotoError<UpdateItemError>) -> bool {
    match e {
        RusotoError::Service(UpdateItemError::ProvisionedThroughputExceeded(_))
        | RusotoError::Service(UpdateItemError::RequestLimitExceeded(_)) => true,
        RusotoError::Unknown(resp) => resp.body_as_str().contains("ThrottlingException"),
        _ => false,
    }
}
