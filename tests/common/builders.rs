//! Test data builders for creating test objects

use illuminati_pipeline::connection::keys;
use illuminati_pipeline::ConnectionDescriptor;
use std::collections::HashMap;

/// Builder for `hdfs.connection.*` property sets, seeded with a valid descriptor
pub struct DescriptorBuilder {
    props: HashMap<String, String>,
}

impl Default for DescriptorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorBuilder {
    pub fn new() -> Self {
        let props = [
            (keys::URI, "namenode1"),
            (keys::PORT, "8020"),
            (keys::AUTHENTICATION, "SIMPLE"),
            (keys::AUTHORIZATION, "FALSE"),
            (keys::USER, "svc-illuminati"),
            (keys::HOME, "/user/illuminati"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self { props }
    }

    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.props.insert(key.to_string(), value.to_string());
        self
    }

    pub fn without(mut self, key: &str) -> Self {
        self.props.remove(key);
        self
    }

    pub fn properties(&self) -> &HashMap<String, String> {
        &self.props
    }

    pub fn build(self) -> ConnectionDescriptor {
        ConnectionDescriptor::from_properties(&self.props)
    }
}
