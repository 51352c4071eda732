//! The synthesized template document.

use crate::errors::DeployflowError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Resource type of the pipeline.
pub const PIPELINE_TYPE: &str = "AWS::CodePipeline::Pipeline";

/// A single template resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// The resource type, e.g. `AWS::CodeBuild::Project`.
    #[serde(rename = "Type")]
    pub resource_type: String,
    /// The resource properties.
    #[serde(rename = "Properties", default, skip_serializing_if = "Value::is_null")]
    pub properties: Value,
    /// Logical ids this resource must be created after.
    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// What happens to the physical resource on replacement.
    #[serde(rename = "UpdateReplacePolicy", default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<String>,
    /// What happens to the physical resource on stack deletion.
    #[serde(rename = "DeletionPolicy", default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<String>,
}

impl Resource {
    /// Creates a resource.
    #[must_use]
    pub fn new(resource_type: impl Into<String>, properties: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties,
            depends_on: Vec::new(),
            update_replace_policy: None,
            deletion_policy: None,
        }
    }

    /// Adds a creation dependency.
    #[must_use]
    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.push(logical_id.into());
        self
    }

    /// Keeps the physical resource on replacement and deletion.
    #[must_use]
    pub fn retained(mut self) -> Self {
        self.update_replace_policy = Some("Retain".to_string());
        self.deletion_policy = Some("Retain".to_string());
        self
    }
}

/// A declarative infrastructure template.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Template {
    /// Resources keyed by logical id.
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, Resource>,
}

impl Template {
    /// Creates an empty template.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource under a logical id no other resource uses.
    ///
    /// # Errors
    ///
    /// Returns [`DeployflowError::DuplicateLogicalId`] if the id is taken.
    pub fn add(&mut self, logical_id: impl Into<String>, resource: Resource) -> Result<(), DeployflowError> {
        let logical_id = logical_id.into();
        if self.resources.contains_key(&logical_id) {
            return Err(DeployflowError::DuplicateLogicalId(logical_id));
        }
        self.resources.insert(logical_id, resource);
        Ok(())
    }

    /// Looks up a resource.
    #[must_use]
    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    /// All resources of a type, sorted by logical id.
    #[must_use]
    pub fn resources_of_type(&self, resource_type: &str) -> Vec<(&str, &Resource)> {
        self.resources
            .iter()
            .filter(|(_, r)| r.resource_type == resource_type)
            .map(|(id, r)| (id.as_str(), r))
            .collect()
    }

    /// Stage names of the first pipeline resource, in template order.
    #[must_use]
    pub fn pipeline_stage_names(&self) -> Vec<&str> {
        self.resources_of_type(PIPELINE_TYPE)
            .first()
            .and_then(|(_, r)| r.properties.get("Stages"))
            .and_then(Value::as_array)
            .map(|stages| {
                stages
                    .iter()
                    .filter_map(|s| s.get("Name").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Renders the template as pretty-printed JSON with a trailing newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_serialization_shape() {
        let resource = Resource::new("AWS::S3::Bucket", json!({"VersioningConfiguration": {"Status": "Enabled"}}))
            .retained()
            .depends_on("Role1234");

        let value = serde_json::to_value(&resource).unwrap();
        assert_eq!(value["Type"], "AWS::S3::Bucket");
        assert_eq!(value["DeletionPolicy"], "Retain");
        assert_eq!(value["DependsOn"], json!(["Role1234"]));
    }

    #[test]
    fn test_empty_fields_omitted() {
        let value = serde_json::to_value(Resource::new("AWS::Test", Value::Null)).unwrap();
        assert_eq!(value, json!({"Type": "AWS::Test"}));
    }

    #[test]
    fn test_pipeline_stage_names() {
        let mut template = Template::new();
        template
            .add(
                "Pipeline",
                Resource::new(PIPELINE_TYPE, json!({"Stages": [{"Name": "Source"}, {"Name": "Build"}]})),
            )
            .unwrap();
        assert_eq!(template.pipeline_stage_names(), vec!["Source", "Build"]);
    }

    #[test]
    fn test_resources_of_type_sorted() {
        let mut template = Template::new();
        template.add("B", Resource::new("AWS::IAM::Role", Value::Null)).unwrap();
        template.add("A", Resource::new("AWS::IAM::Role", Value::Null)).unwrap();
        template.add("C", Resource::new("AWS::S3::Bucket", Value::Null)).unwrap();

        let ids: Vec<&str> = template.resources_of_type("AWS::IAM::Role").iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[test]
    fn test_add_refuses_taken_id() {
        let mut template = Template::new();
        template.add("Repo", Resource::new("AWS::CodeCommit::Repository", Value::Null)).unwrap();

        let err = template.add("Repo", Resource::new(PIPELINE_TYPE, Value::Null)).unwrap_err();
        assert!(matches!(err, DeployflowError::DuplicateLogicalId(ref id) if id == "Repo"));
        assert_eq!(template.resources["Repo"].resource_type, "AWS::CodeCommit::Repository");
    }
}
