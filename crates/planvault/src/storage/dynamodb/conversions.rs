//! DynamoDB attribute conversion functions.
//!
//! Pure functions for converting between SDK `AttributeValue` maps and the
//! store-agnostic item model. These are testable in isolation without DynamoDB access.

use std::collections::HashMap;

use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::{
    AttributeValue, ConsumedCapacity, DeleteRequest, PutRequest, WriteRequest as SdkWriteRequest,
};
use planvault_core::storage::{AttrValue, Item, Key, StoreError, StoreResult, WriteRequest};

use super::error::map_build_error;

pub type AttributeMap = HashMap<String, AttributeValue>;

/// Convert an attribute value to its SDK form.
pub fn to_attribute_value(value: AttrValue) -> AttributeValue {
    match value {
        AttrValue::S(s) => AttributeValue::S(s),
        AttrValue::N(n) => AttributeValue::N(n),
        AttrValue::B(bytes) => AttributeValue::B(Blob::new(bytes)),
        AttrValue::Bool(b) => AttributeValue::Bool(b),
        AttrValue::Null => AttributeValue::Null(true),
        AttrValue::L(list) => AttributeValue::L(list.into_iter().map(to_attribute_value).collect()),
        AttrValue::M(map) => AttributeValue::M(
            map.into_iter()
                .map(|(name, value)| (name, to_attribute_value(value)))
                .collect(),
        ),
        AttrValue::Ss(set) => AttributeValue::Ss(set),
        AttrValue::Ns(set) => AttributeValue::Ns(set),
    }
}

/// Convert an SDK attribute value into the item model.
pub fn from_attribute_value(value: AttributeValue) -> StoreResult<AttrValue> {
    Ok(match value {
        AttributeValue::S(s) => AttrValue::S(s),
        AttributeValue::N(n) => AttrValue::N(n),
        AttributeValue::B(blob) => AttrValue::B(blob.into_inner()),
        AttributeValue::Bool(b) => AttrValue::Bool(b),
        AttributeValue::Null(_) => AttrValue::Null,
        AttributeValue::L(list) => AttrValue::L(
            list.into_iter()
                .map(from_attribute_value)
                .collect::<StoreResult<_>>()?,
        ),
        AttributeValue::M(map) => AttrValue::M(attributes_to_item(map)?),
        AttributeValue::Ss(set) => AttrValue::Ss(set),
        AttributeValue::Ns(set) => AttrValue::Ns(set),
        other => {
            return Err(StoreError::InvalidData(format!(
                "Unsupported attribute value: {:?}",
                other
            )))
        }
    })
}

/// Convert an item to an SDK attribute map.
pub fn item_to_attributes(item: Item) -> AttributeMap {
    item.into_iter()
        .map(|(name, value)| (name, to_attribute_value(value)))
        .collect()
}

/// Convert an SDK attribute map to an item.
pub fn attributes_to_item(attributes: AttributeMap) -> StoreResult<Item> {
    attributes
        .into_iter()
        .map(|(name, value)| Ok((name, from_attribute_value(value)?)))
        .collect()
}

/// Convert a primary key to an SDK attribute map.
pub fn key_to_attributes(key: &Key) -> AttributeMap {
    key.attributes()
        .map(|(name, value)| (name.clone(), to_attribute_value(value.clone())))
        .collect()
}

/// Convert an SDK attribute map to a primary key.
pub fn attributes_to_key(attributes: AttributeMap) -> StoreResult<Key> {
    let item = attributes_to_item(attributes)?;
    Key::from_attributes(item)
        .ok_or_else(|| StoreError::InvalidData("Empty key returned by the store".to_string()))
}

/// Convert a batch write request to its SDK form.
pub fn to_sdk_write_request(request: WriteRequest) -> StoreResult<SdkWriteRequest> {
    let builder = SdkWriteRequest::builder();
    let builder = match request {
        WriteRequest::Put(item) => builder.put_request(
            PutRequest::builder()
                .set_item(Some(item_to_attributes(item)))
                .build()
                .map_err(map_build_error)?,
        ),
        WriteRequest::Delete(key) => builder.delete_request(
            DeleteRequest::builder()
                .set_key(Some(key_to_attributes(&key)))
                .build()
                .map_err(map_build_error)?,
        ),
    };
    Ok(builder.build())
}

/// Convert an unprocessed SDK write request back into the item model.
pub fn from_sdk_write_request(request: SdkWriteRequest) -> StoreResult<WriteRequest> {
    if let Some(put) = request.put_request {
        return Ok(WriteRequest::Put(attributes_to_item(put.item)?));
    }
    if let Some(delete) = request.delete_request {
        return Ok(WriteRequest::Delete(attributes_to_key(delete.key)?));
    }
    Err(StoreError::InvalidData(
        "Write request without put or delete".to_string(),
    ))
}

/// Sum the capacity units of consumed-capacity reports.
pub fn capacity_units<'a>(
    reports: impl IntoIterator<Item = &'a ConsumedCapacity>,
) -> Option<f64> {
    reports
        .into_iter()
        .filter_map(ConsumedCapacity::capacity_units)
        .fold(None, |total, units| Some(total.unwrap_or(0.0) + units))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_round_trip() {
        let values = vec![
            AttrValue::from("text"),
            AttrValue::N("42".to_string()),
            AttrValue::Bool(true),
            AttrValue::Null,
            AttrValue::B(vec![1, 2, 3]),
            AttrValue::Ss(vec!["a".to_string(), "b".to_string()]),
        ];
        for value in values {
            let converted = from_attribute_value(to_attribute_value(value.clone())).unwrap();
            assert_eq!(converted, value);
        }
    }

    #[test]
    fn test_nested_item_round_trip() {
        let mut nested = Item::new();
        nested.insert("city".to_string(), AttrValue::from("Lisbon"));
        let mut item = Item::new();
        item.insert("id".to_string(), AttrValue::from("p1"));
        item.insert("address".to_string(), AttrValue::M(nested));
        item.insert(
            "tags".to_string(),
            AttrValue::L(vec![AttrValue::from("beach"), AttrValue::Bool(false)]),
        );

        let converted = attributes_to_item(item_to_attributes(item.clone())).unwrap();
        assert_eq!(converted, item);
    }

    #[test]
    fn test_key_conversion() {
        let key = Key::partition("id", "p1");
        let attributes = key_to_attributes(&key);
        assert_eq!(attributes.get("id"), Some(&AttributeValue::S("p1".to_string())));
        assert_eq!(attributes_to_key(attributes).unwrap(), key);
        assert!(attributes_to_key(AttributeMap::new()).is_err());
    }

    #[test]
    fn test_write_request_round_trip() {
        let delete = WriteRequest::Delete(Key::partition("id", "p1"));
        let sdk = to_sdk_write_request(delete.clone()).unwrap();
        assert!(sdk.delete_request.is_some());
        assert_eq!(from_sdk_write_request(sdk).unwrap(), delete);

        let mut item = Item::new();
        item.insert("id".to_string(), AttrValue::from("p2"));
        let put = WriteRequest::Put(item);
        let sdk = to_sdk_write_request(put.clone()).unwrap();
        assert!(sdk.put_request.is_some());
        assert_eq!(from_sdk_write_request(sdk).unwrap(), put);
    }

    #[test]
    fn test_capacity_units_sum() {
        let reports = vec![
            ConsumedCapacity::builder().capacity_units(1.5).build(),
            ConsumedCapacity::builder().build(),
            ConsumedCapacity::builder().capacity_units(2.0).build(),
        ];
        assert_eq!(capacity_units(&reports), Some(3.5));
        assert_eq!(capacity_units(&Vec::new()), None);
    }
}
