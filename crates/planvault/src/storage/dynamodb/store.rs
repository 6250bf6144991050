//! DynamoDB implementation of `KeyValueStore`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, GlobalSecondaryIndex, IndexStatus,
    KeySchemaElement, KeyType, KeysAndAttributes, Projection, ProjectionType,
    ReturnConsumedCapacity, ScalarAttributeType, Select as SdkSelect, TableStatus,
};
use aws_sdk_dynamodb::Client;
use planvault_core::storage::{
    AttrValue, BatchGetOutput, BatchWriteOutput, Expression, GetItemOutput, Item, Key, KeyAttributes,
    KeyValueStore, PageOutput, QueryRequest, ReadConsistency, ScanRequest, Select, StoreError,
    StoreResult, TableSchema, WriteItemOutput, WriteRequest, MAX_BATCH_GET, MAX_BATCH_WRITE,
};

use super::client::{create_client, AwsConfig};
use super::conversions::{
    attributes_to_item, attributes_to_key, capacity_units, from_sdk_write_request,
    item_to_attributes, key_to_attributes, to_attribute_value, to_sdk_write_request,
};
use super::error::{map_build_error, map_sdk_error};

const TABLE_ACTIVE_POLL_ATTEMPTS: u32 = 60;
const TABLE_ACTIVE_POLL_DELAY: Duration = Duration::from_secs(2);

/// DynamoDB-backed store adapter.
///
/// Stateless apart from the SDK client; clone freely.
#[derive(Debug, Clone)]
pub struct DynamoDbStore {
    client: Client,
}

impl DynamoDbStore {
    /// Creates a new store with the given DynamoDB client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Creates a new store from AWS configuration.
    pub async fn connect(config: &AwsConfig) -> Self {
        Self::new(create_client(config).await)
    }

    /// Creates the table described by `schema` unless it already exists.
    ///
    /// Returns `true` when the table was created. Waits until the table and
    /// its indexes are active.
    pub async fn ensure_table(&self, schema: &TableSchema) -> StoreResult<bool> {
        if self.table_exists(&schema.table_name).await? {
            tracing::debug!(table = %schema.table_name, "Table already exists");
            return Ok(false);
        }
        self.create_table(schema).await?;
        Ok(true)
    }

    /// Creates a pay-per-request table with its secondary indexes and waits
    /// until it is active.
    pub async fn create_table(&self, schema: &TableSchema) -> StoreResult<()> {
        let mut attribute_definitions = Vec::new();
        let key_schema = build_key_schema(&schema.keys, &mut attribute_definitions)?;

        let mut request = self
            .client
            .create_table()
            .table_name(&schema.table_name)
            .set_key_schema(Some(key_schema))
            .billing_mode(BillingMode::PayPerRequest);

        for index in &schema.indexes {
            let index_key_schema = build_key_schema(&index.keys, &mut attribute_definitions)?;
            request = request.global_secondary_indexes(
                GlobalSecondaryIndex::builder()
                    .index_name(&index.name)
                    .set_key_schema(Some(index_key_schema))
                    .projection(
                        Projection::builder()
                            .projection_type(ProjectionType::All)
                            .build(),
                    )
                    .build()
                    .map_err(map_build_error)?,
            );
        }

        request
            .set_attribute_definitions(Some(attribute_definitions))
            .send()
            .await
            .map_err(map_sdk_error)?;

        tracing::info!(
            table = %schema.table_name,
            indexes = schema.indexes.len(),
            "Created table"
        );

        self.wait_for_table_active(&schema.table_name).await
    }

    async fn table_exists(&self, table: &str) -> StoreResult<bool> {
        match self.client.describe_table().table_name(table).send().await {
            Ok(_) => Ok(true),
            Err(err) => match map_sdk_error(err) {
                StoreError::ResourceNotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn wait_for_table_active(&self, table: &str) -> StoreResult<()> {
        for _ in 0..TABLE_ACTIVE_POLL_ATTEMPTS {
            let output = self
                .client
                .describe_table()
                .table_name(table)
                .send()
                .await
                .map_err(map_sdk_error)?;

            if let Some(description) = output.table() {
                let table_active = description.table_status() == Some(&TableStatus::Active);
                // Also check all indexes are active
                let indexes_active = description
                    .global_secondary_indexes()
                    .iter()
                    .all(|index| index.index_status() == Some(&IndexStatus::Active));
                if table_active && indexes_active {
                    return Ok(());
                }
            }
            tokio::time::sleep(TABLE_ACTIVE_POLL_DELAY).await;
        }

        Err(StoreError::Other(format!(
            "Table {} did not become active in time",
            table
        )))
    }
}

/// Builds a key schema, registering attribute definitions not yet present.
fn build_key_schema(
    keys: &KeyAttributes,
    attribute_definitions: &mut Vec<AttributeDefinition>,
) -> StoreResult<Vec<KeySchemaElement>> {
    let mut elements = Vec::with_capacity(2);
    let parts = std::iter::once((&keys.partition_key, KeyType::Hash))
        .chain(keys.sort_key.iter().map(|sort_key| (sort_key, KeyType::Range)));

    for (name, key_type) in parts {
        elements.push(
            KeySchemaElement::builder()
                .attribute_name(name)
                .key_type(key_type)
                .build()
                .map_err(map_build_error)?,
        );
        if !attribute_definitions
            .iter()
            .any(|definition| definition.attribute_name() == name.as_str())
        {
            attribute_definitions.push(
                AttributeDefinition::builder()
                    .attribute_name(name)
                    .attribute_type(ScalarAttributeType::S)
                    .build()
                    .map_err(map_build_error)?,
            );
        }
    }

    Ok(elements)
}

/// Placeholder maps of a key condition and an optional filter, merged.
///
/// The store rejects empty placeholder maps, so empty maps become `None`.
fn placeholder_maps(
    names: impl IntoIterator<Item = (String, String)>,
    values: impl IntoIterator<Item = (String, AttrValue)>,
) -> (
    Option<HashMap<String, String>>,
    Option<HashMap<String, AttributeValue>>,
) {
    let names: HashMap<String, String> = names.into_iter().collect();
    let values: HashMap<String, AttributeValue> = values
        .into_iter()
        .map(|(placeholder, value)| (placeholder, to_attribute_value(value)))
        .collect();
    (
        (!names.is_empty()).then_some(names),
        (!values.is_empty()).then_some(values),
    )
}

fn filter_placeholders(
    filter: Option<&Expression>,
) -> (
    Vec<(String, String)>,
    Vec<(String, AttrValue)>,
) {
    match filter {
        Some(filter) => (
            filter
                .names()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            filter
                .values()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        None => (Vec::new(), Vec::new()),
    }
}

fn sdk_select(select: Select) -> Option<SdkSelect> {
    match select {
        Select::AllAttributes => None,
        Select::Count => Some(SdkSelect::Count),
    }
}

fn add_capacity(total: &mut Option<f64>, units: Option<f64>) {
    if let Some(units) = units {
        *total = Some(total.unwrap_or(0.0) + units);
    }
}

fn page_output(
    items: Option<Vec<HashMap<String, AttributeValue>>>,
    count: i32,
    last_evaluated_key: Option<HashMap<String, AttributeValue>>,
    consumed_capacity: Option<f64>,
) -> StoreResult<PageOutput> {
    Ok(PageOutput {
        items: items
            .unwrap_or_default()
            .into_iter()
            .map(attributes_to_item)
            .collect::<StoreResult<Vec<Item>>>()?,
        count: u64::try_from(count).unwrap_or(0),
        last_evaluated_key: last_evaluated_key
            .filter(|key| !key.is_empty())
            .map(attributes_to_key)
            .transpose()?,
        consumed_capacity,
    })
}

#[async_trait]
impl KeyValueStore for DynamoDbStore {
    async fn get_item(
        &self,
        table: &str,
        key: &Key,
        consistency: ReadConsistency,
    ) -> StoreResult<GetItemOutput> {
        let output = self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(key_to_attributes(key)))
            .consistent_read(consistency.is_strong())
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .send()
            .await
            .map_err(map_sdk_error)?;

        Ok(GetItemOutput {
            consumed_capacity: capacity_units(output.consumed_capacity.as_ref()),
            item: output.item.map(attributes_to_item).transpose()?,
        })
    }

    async fn put_item(&self, table: &str, item: Item) -> StoreResult<WriteItemOutput> {
        let output = self
            .client
            .put_item()
            .table_name(table)
            .set_item(Some(item_to_attributes(item)))
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .send()
            .await
            .map_err(map_sdk_error)?;

        Ok(WriteItemOutput {
            consumed_capacity: capacity_units(output.consumed_capacity.as_ref()),
        })
    }

    async fn delete_item(&self, table: &str, key: &Key) -> StoreResult<WriteItemOutput> {
        let output = self
            .client
            .delete_item()
            .table_name(table)
            .set_key(Some(key_to_attributes(key)))
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .send()
            .await
            .map_err(map_sdk_error)?;

        Ok(WriteItemOutput {
            consumed_capacity: capacity_units(output.consumed_capacity.as_ref()),
        })
    }

    async fn batch_get_items(
        &self,
        table: &str,
        keys: &[Key],
        consistency: ReadConsistency,
    ) -> StoreResult<BatchGetOutput> {
        let mut result = BatchGetOutput::default();

        for chunk in keys.chunks(MAX_BATCH_GET) {
            let request = KeysAndAttributes::builder()
                .set_keys(Some(chunk.iter().map(key_to_attributes).collect()))
                .consistent_read(consistency.is_strong())
                .build()
                .map_err(map_build_error)?;

            let output = self
                .client
                .batch_get_item()
                .request_items(table, request)
                .return_consumed_capacity(ReturnConsumedCapacity::Total)
                .send()
                .await
                .map_err(map_sdk_error)?;

            add_capacity(
                &mut result.consumed_capacity,
                capacity_units(output.consumed_capacity.iter().flatten()),
            );

            if let Some(items) = output.responses.and_then(|mut r| r.remove(table)) {
                for item in items {
                    result.items.push(attributes_to_item(item)?);
                }
            }
            if let Some(unprocessed) = output.unprocessed_keys.and_then(|mut u| u.remove(table)) {
                for key in unprocessed.keys {
                    result.unprocessed.push(attributes_to_key(key)?);
                }
            }
        }

        tracing::debug!(
            table = %table,
            requested = keys.len(),
            found = result.items.len(),
            unprocessed = result.unprocessed.len(),
            "BatchGetItem"
        );

        Ok(result)
    }

    async fn batch_write_items(
        &self,
        table: &str,
        requests: Vec<WriteRequest>,
    ) -> StoreResult<BatchWriteOutput> {
        let mut result = BatchWriteOutput::default();
        let total = requests.len();

        let mut requests = requests.into_iter().peekable();
        while requests.peek().is_some() {
            let chunk = requests
                .by_ref()
                .take(MAX_BATCH_WRITE)
                .map(to_sdk_write_request)
                .collect::<StoreResult<Vec<_>>>()?;

            let output = self
                .client
                .batch_write_item()
                .request_items(table, chunk)
                .return_consumed_capacity(ReturnConsumedCapacity::Total)
                .send()
                .await
                .map_err(map_sdk_error)?;

            add_capacity(
                &mut result.consumed_capacity,
                capacity_units(output.consumed_capacity.iter().flatten()),
            );

            if let Some(unprocessed) = output.unprocessed_items.and_then(|mut u| u.remove(table)) {
                for request in unprocessed {
                    result.unprocessed.push(from_sdk_write_request(request)?);
                }
            }
        }

        tracing::debug!(
            table = %table,
            requested = total,
            unprocessed = result.unprocessed.len(),
            "BatchWriteItem"
        );

        Ok(result)
    }

    async fn query_page(
        &self,
        table: &str,
        request: &QueryRequest,
        start_key: Option<Key>,
    ) -> StoreResult<PageOutput> {
        let key_condition = request.key_condition.clone().namespaced("k");
        let filter = request.filter.clone().map(|filter| filter.namespaced("f"));
        let (filter_names, filter_values) = filter_placeholders(filter.as_ref());
        let (names, values) = placeholder_maps(
            key_condition.names().into_iter().chain(filter_names),
            key_condition.values().into_iter().chain(filter_values),
        );

        // Secondary indexes only support eventually consistent reads
        let consistent_read = request.index_name.is_none() && request.consistency.is_strong();

        let output = self
            .client
            .query()
            .table_name(table)
            .set_index_name(request.index_name.clone())
            .key_condition_expression(key_condition.expression())
            .set_filter_expression(filter.as_ref().map(Expression::expression))
            .set_expression_attribute_names(names)
            .set_expression_attribute_values(values)
            .set_select(sdk_select(request.select))
            .set_limit(request.limit.map(|limit| limit.min(i32::MAX as u32) as i32))
            .consistent_read(consistent_read)
            .set_exclusive_start_key(start_key.as_ref().map(key_to_attributes))
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let consumed = capacity_units(output.consumed_capacity.as_ref());
        page_output(
            output.items,
            output.count,
            output.last_evaluated_key,
            consumed,
        )
    }

    async fn scan_page(
        &self,
        table: &str,
        request: &ScanRequest,
        start_key: Option<Key>,
    ) -> StoreResult<PageOutput> {
        let (filter_names, filter_values) = filter_placeholders(request.filter.as_ref());
        let (names, values) = placeholder_maps(filter_names, filter_values);

        let output = self
            .client
            .scan()
            .table_name(table)
            .set_filter_expression(request.filter.as_ref().map(Expression::expression))
            .set_expression_attribute_names(names)
            .set_expression_attribute_values(values)
            .set_select(sdk_select(request.select))
            .set_limit(request.limit.map(|limit| limit.min(i32::MAX as u32) as i32))
            .consistent_read(request.consistency.is_strong())
            .set_exclusive_start_key(start_key.as_ref().map(key_to_attributes))
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let consumed = capacity_units(output.consumed_capacity.as_ref());
        page_output(
            output.items,
            output.count,
            output.last_evaluated_key,
            consumed,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planvault_core::storage::expression::equal;

    #[test]
    fn test_key_schema_deduplicates_attribute_definitions() {
        let mut definitions = Vec::new();
        let table = build_key_schema(&KeyAttributes::new("id"), &mut definitions).unwrap();
        let index = build_key_schema(
            &KeyAttributes::new("userId").with_sort_key("travelPlanId"),
            &mut definitions,
        )
        .unwrap();
        let again = build_key_schema(&KeyAttributes::new("userId"), &mut definitions).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(index.len(), 2);
        assert_eq!(index[1].key_type(), &KeyType::Range);
        assert_eq!(again.len(), 1);
        assert_eq!(definitions.len(), 3);
    }

    #[test]
    fn test_placeholder_maps_skip_empty() {
        let (names, values) = placeholder_maps(Vec::new(), Vec::new());
        assert!(names.is_none());
        assert!(values.is_none());
    }

    #[test]
    fn test_filter_placeholders_are_converted() {
        let filter = equal("userId", "u1").namespaced("f");
        let (names, values) = filter_placeholders(Some(&filter));
        let (names, values) = placeholder_maps(names, values);

        let names = names.unwrap();
        let values = values.unwrap();
        assert_eq!(names.get("#attr_f").map(String::as_str), Some("userId"));
        assert_eq!(
            values.get(":value_f"),
            Some(&AttributeValue::S("u1".to_string()))
        );
    }

    #[test]
    fn test_page_output_handles_count_only() {
        let page = page_output(None, 7, None, Some(2.0)).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.count, 7);
        assert!(page.last_evaluated_key.is_none());
        assert_eq!(page.consumed_capacity, Some(2.0));
    }
}
