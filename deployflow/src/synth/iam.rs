//! Service roles and policy documents.

use super::template::Resource;
use serde_json::{json, Value};

/// Resource type of a role.
pub const ROLE_TYPE: &str = "AWS::IAM::Role";

const POLICY_VERSION: &str = "2012-10-17";

/// A role assumable by `service_principal`.
pub fn service_role(service_principal: &str) -> Resource {
    Resource::new(
        ROLE_TYPE,
        json!({
            "AssumeRolePolicyDocument": {
                "Statement": [{
                    "Action": "sts:AssumeRole",
                    "Effect": "Allow",
                    "Principal": { "Service": service_principal }
                }],
                "Version": POLICY_VERSION
            }
        }),
    )
}

/// Attaches managed policies to a role.
pub fn with_managed_policies(mut role: Resource, arns: &[&str]) -> Resource {
    if let Some(props) = role.properties.as_object_mut() {
        props.insert("ManagedPolicyArns".to_string(), json!(arns));
    }
    role
}

/// Attaches an inline policy made of `statements` to a role.
pub fn with_inline_policy(mut role: Resource, policy_name: &str, statements: Vec<Value>) -> Resource {
    if statements.is_empty() {
        return role;
    }
    if let Some(props) = role.properties.as_object_mut() {
        props.insert(
            "Policies".to_string(),
            json!([{
                "PolicyDocument": { "Statement": statements, "Version": POLICY_VERSION },
                "PolicyName": policy_name
            }]),
        );
    }
    role
}

/// An `Allow` statement.
pub fn allow(actions: &[&str], resource: Value) -> Value {
    json!({ "Action": actions, "Effect": "Allow", "Resource": resource })
}

/// `{"Fn::GetAtt": [id, attr]}`
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

/// `{"Ref": id}`
pub fn reference(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

/// The bucket ARN and every object under it.
pub fn bucket_and_objects(bucket_id: &str) -> Value {
    json!([
        get_att(bucket_id, "Arn"),
        { "Fn::Join": ["", [get_att(bucket_id, "Arn"), "/*"]] }
    ])
}

/// ARN of a pipeline referenced by logical id.
pub fn pipeline_arn(pipeline_id: &str) -> Value {
    json!({
        "Fn::Join": ["", [
            "arn:",
            reference("AWS::Partition"),
            ":codepipeline:",
            reference("AWS::Region"),
            ":",
            reference("AWS::AccountId"),
            ":",
            reference(pipeline_id)
        ]]
    })
}
