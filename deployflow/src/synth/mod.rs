//! Synthesis of a pipeline definition into a declarative template.
//!
//! Synthesis is a pure function of the definition: no timestamps, random
//! ids or map iteration order leak into the output, so synthesizing the same
//! definition twice yields byte-identical documents.

mod iam;
mod logical_id;
mod template;

pub use logical_id::logical_id;
pub use template::{Resource, Template, PIPELINE_TYPE};

use crate::buildspec::BuildProject;
use crate::core::{ActionKind, ActionSpec, SourceProvider, SourceTrigger};
use crate::errors::DeployflowError;
use crate::pipeline::{PipelineDefinition, StageSpec};
use iam::{allow, bucket_and_objects, get_att, pipeline_arn, reference, service_role};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Resource type of a source repository.
pub const REPOSITORY_TYPE: &str = "AWS::CodeCommit::Repository";
/// Resource type of a build project.
pub const PROJECT_TYPE: &str = "AWS::CodeBuild::Project";
/// Resource type of the artifact bucket.
pub const BUCKET_TYPE: &str = "AWS::S3::Bucket";
/// Resource type of the push-event rule.
pub const EVENT_RULE_TYPE: &str = "AWS::Events::Rule";
/// Resource type of a third-party webhook.
pub const WEBHOOK_TYPE: &str = "AWS::CodePipeline::Webhook";
pub use iam::ROLE_TYPE;

const ADMINISTRATOR_ACCESS: &str = "arn:aws:iam::aws:policy/AdministratorAccess";

/// Logical ids allocated during one synthesis.
struct Ids {
    pipeline: String,
    pipeline_role: String,
    bucket: String,
    repositories: BTreeMap<String, String>,
    projects: BTreeMap<String, (String, String)>,
    deploy_roles: BTreeMap<(String, String), String>,
}

/// Synthesizes `definition` into a template.
///
/// # Errors
///
/// Returns an error if an embedded build spec cannot be serialized or two
/// resources end up with the same logical id.
pub fn synthesize(definition: &PipelineDefinition) -> Result<Template, DeployflowError> {
    let stack = definition.stack_id();
    let pipeline_name = definition.name();
    let mut template = Template::new();

    let mut ids = Ids {
        pipeline: logical_id(&[stack, "Pipeline", pipeline_name]),
        pipeline_role: logical_id(&[stack, "Pipeline", pipeline_name, "Role"]),
        bucket: logical_id(&[stack, "Pipeline", pipeline_name, "ArtifactsBucket"]),
        repositories: BTreeMap::new(),
        projects: BTreeMap::new(),
        deploy_roles: BTreeMap::new(),
    };

    template.add(
        ids.bucket.clone(),
        Resource::new(BUCKET_TYPE, json!({ "VersioningConfiguration": { "Status": "Enabled" } })).retained(),
    )?;

    for (_, action) in definition.actions() {
        if let ActionKind::Source {
            provider: SourceProvider::CodeCommit { repository_name },
            ..
        } = &action.kind
        {
            if !ids.repositories.contains_key(repository_name) {
                let id = logical_id(&[stack, "Repository", repository_name]);
                template.add(
                    id.clone(),
                    Resource::new(REPOSITORY_TYPE, json!({ "RepositoryName": repository_name })),
                )?;
                ids.repositories.insert(repository_name.clone(), id);
            }
        }
    }

    for project in definition.build_projects() {
        let project_id = logical_id(&[stack, "Project", &project.name]);
        let role_id = logical_id(&[stack, "Project", &project.name, "Role"]);
        template.add(role_id.clone(), build_role(&ids.bucket))?;
        template.add(project_id.clone(), build_project(project, &role_id)?)?;
        ids.projects.insert(project.name.clone(), (project_id, role_id));
    }

    for stage in definition.stages() {
        for action in &stage.actions {
            if let ActionKind::CreateReplaceChangeSet { admin_permissions, .. } = &action.kind {
                let role_id = logical_id(&[
                    stack,
                    "Pipeline",
                    pipeline_name,
                    &stage.name,
                    &action.name,
                    "DeploymentRole",
                ]);
                let mut role = service_role("cloudformation.amazonaws.com");
                if *admin_permissions {
                    role = iam::with_managed_policies(role, &[ADMINISTRATOR_ACCESS]);
                }
                template.add(role_id.clone(), role)?;
                ids.deploy_roles
                    .insert((stage.name.clone(), action.name.clone()), role_id);
            }
        }
    }

    template.add(ids.pipeline_role.clone(), pipeline_role(definition, &ids))?;

    let stages: Vec<Value> = definition
        .stages()
        .iter()
        .map(|stage| stage_json(stage, &ids))
        .collect();

    template.add(
        ids.pipeline.clone(),
        Resource::new(
            PIPELINE_TYPE,
            json!({
                "Name": pipeline_name,
                "RoleArn": get_att(&ids.pipeline_role, "Arn"),
                "ArtifactStore": { "Location": reference(&ids.bucket), "Type": "S3" },
                "Stages": stages
            }),
        )
        .depends_on(ids.pipeline_role.clone()),
    )?;

    for (stage_name, action) in definition.actions() {
        if let ActionKind::Source {
            provider,
            branch,
            trigger: SourceTrigger::Events,
        } = &action.kind
        {
            let scope = [stack, "Pipeline", pipeline_name, stage_name, action.name.as_str()];
            add_push_trigger(&mut template, &scope, &ids, action, provider, branch)?;
        }
    }

    info!(
        stack = %stack,
        pipeline = %pipeline_name,
        resources = template.resources.len(),
        "Synthesized template"
    );
    Ok(template)
}

/// Writes `<stack>.template.json` and `manifest.json` into `out_dir`.
///
/// Returns the path of the template file.
///
/// # Errors
///
/// Returns an error if the directory or files cannot be written.
pub fn write_to_dir(
    template: &Template,
    stack_id: &str,
    out_dir: &Path,
) -> Result<PathBuf, DeployflowError> {
    std::fs::create_dir_all(out_dir)?;

    let template_file = format!("{stack_id}.template.json");
    let template_path = out_dir.join(&template_file);
    std::fs::write(&template_path, template.to_json_string()?)?;

    let manifest = json!({
        "version": "1",
        "artifacts": {
            stack_id: {
                "type": "aws:cloudformation:stack",
                "properties": { "templateFile": template_file }
            }
        }
    });
    let mut manifest_text = serde_json::to_string_pretty(&manifest)?;
    manifest_text.push('\n');
    std::fs::write(out_dir.join("manifest.json"), manifest_text)?;

    info!(path = %template_path.display(), "Wrote template");
    Ok(template_path)
}

fn build_role(bucket_id: &str) -> Resource {
    iam::with_inline_policy(
        service_role("codebuild.amazonaws.com"),
        "BuildPolicy",
        vec![
            allow(
                &["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"],
                json!("*"),
            ),
            allow(
                &["s3:GetObject*", "s3:GetBucket*", "s3:List*", "s3:PutObject"],
                bucket_and_objects(bucket_id),
            ),
        ],
    )
}

fn build_project(project: &BuildProject, role_id: &str) -> Result<Resource, DeployflowError> {
    let env = &project.environment;
    Ok(Resource::new(
        PROJECT_TYPE,
        json!({
            "Name": project.name,
            "Artifacts": { "Type": "CODEPIPELINE" },
            "Environment": {
                "ComputeType": env.compute_type.to_string(),
                "Image": env.image,
                "ImagePullCredentialsType": "CODEBUILD",
                "PrivilegedMode": env.privileged,
                "Type": "LINUX_CONTAINER"
            },
            "ServiceRole": get_att(role_id, "Arn"),
            "Source": {
                "BuildSpec": project.build_spec.to_json_string()?,
                "Type": "CODEPIPELINE"
            },
            "TimeoutInMinutes": project.timeout_minutes()
        }),
    ))
}

fn pipeline_role(definition: &PipelineDefinition, ids: &Ids) -> Resource {
    let mut statements = vec![allow(
        &["s3:GetObject*", "s3:GetBucket*", "s3:List*", "s3:PutObject"],
        bucket_and_objects(&ids.bucket),
    )];

    let repos: Vec<Value> = ids.repositories.values().map(|id| get_att(id, "Arn")).collect();
    if !repos.is_empty() {
        statements.push(allow(
            &[
                "codecommit:GetBranch",
                "codecommit:GetCommit",
                "codecommit:UploadArchive",
                "codecommit:GetUploadArchiveStatus",
                "codecommit:CancelUploadArchive",
            ],
            Value::Array(repos),
        ));
    }

    let projects: Vec<Value> = ids.projects.values().map(|(id, _)| get_att(id, "Arn")).collect();
    if !projects.is_empty() {
        statements.push(allow(
            &["codebuild:BatchGetBuilds", "codebuild:StartBuild", "codebuild:StopBuild"],
            Value::Array(projects),
        ));
    }

    let has_deploy = definition.actions().any(|(_, a)| {
        matches!(
            a.kind,
            ActionKind::CreateReplaceChangeSet { .. } | ActionKind::ExecuteChangeSet { .. }
        )
    });
    if has_deploy {
        statements.push(allow(
            &[
                "cloudformation:CreateChangeSet",
                "cloudformation:DeleteChangeSet",
                "cloudformation:DescribeChangeSet",
                "cloudformation:DescribeStacks",
                "cloudformation:ExecuteChangeSet",
            ],
            json!("*"),
        ));
        let roles: Vec<Value> = ids.deploy_roles.values().map(|id| get_att(id, "Arn")).collect();
        if !roles.is_empty() {
            statements.push(allow(&["iam:PassRole"], Value::Array(roles)));
        }
    }

    iam::with_inline_policy(service_role("codepipeline.amazonaws.com"), "PipelinePolicy", statements)
}

fn stage_json(stage: &StageSpec, ids: &Ids) -> Value {
    let actions: Vec<Value> = stage
        .actions
        .iter()
        .map(|action| action_json(&stage.name, action, ids))
        .collect();
    json!({ "Name": stage.name, "Actions": actions })
}

fn action_json(stage: &str, action: &ActionSpec, ids: &Ids) -> Value {
    let mut body = Map::new();
    body.insert("Name".to_string(), json!(action.name));
    body.insert(
        "ActionTypeId".to_string(),
        json!({
            "Category": action.category().to_string(),
            "Owner": action.kind.owner(),
            "Provider": action.kind.provider(),
            "Version": "1"
        }),
    );

    let configuration = action_configuration(stage, action, ids);
    if !configuration.is_empty() {
        body.insert("Configuration".to_string(), Value::Object(configuration));
    }
    if !action.inputs.is_empty() {
        body.insert(
            "InputArtifacts".to_string(),
            action.inputs.iter().map(|a| json!({ "Name": a.name() })).collect(),
        );
    }
    if !action.outputs.is_empty() {
        body.insert(
            "OutputArtifacts".to_string(),
            action.outputs.iter().map(|a| json!({ "Name": a.name() })).collect(),
        );
    }
    body.insert("RunOrder".to_string(), json!(action.run_order));

    debug!(stage = %stage, action = %action.name, "Rendered action");
    Value::Object(body)
}

fn action_configuration(stage: &str, action: &ActionSpec, ids: &Ids) -> Map<String, Value> {
    let mut config = Map::new();
    match &action.kind {
        ActionKind::Source {
            provider,
            branch,
            trigger,
        } => {
            let poll = *trigger == SourceTrigger::Poll;
            match provider {
                SourceProvider::CodeCommit { repository_name } => {
                    let repo = ids
                        .repositories
                        .get(repository_name)
                        .map_or_else(|| json!(repository_name), |id| get_att(id, "Name"));
                    config.insert("RepositoryName".to_string(), repo);
                    config.insert("BranchName".to_string(), json!(branch));
                }
                SourceProvider::GitHub {
                    owner,
                    repo,
                    oauth_token_secret,
                } => {
                    config.insert("Owner".to_string(), json!(owner));
                    config.insert("Repo".to_string(), json!(repo));
                    config.insert("Branch".to_string(), json!(branch));
                    config.insert("OAuthToken".to_string(), json!(secret_reference(oauth_token_secret)));
                }
            }
            config.insert("PollForSourceChanges".to_string(), json!(poll));
        }
        ActionKind::Build { project } => {
            let project_ref = ids
                .projects
                .get(&project.name)
                .map_or_else(|| json!(project.name), |(id, _)| reference(id));
            config.insert("ProjectName".to_string(), project_ref);
        }
        ActionKind::CreateReplaceChangeSet {
            stack_name,
            change_set_name,
            template_path,
            admin_permissions,
        } => {
            config.insert("ActionMode".to_string(), json!("CHANGE_SET_REPLACE"));
            config.insert("StackName".to_string(), json!(stack_name));
            config.insert("ChangeSetName".to_string(), json!(change_set_name));
            config.insert("TemplatePath".to_string(), json!(template_path.to_string()));
            let capability = if *admin_permissions {
                "CAPABILITY_NAMED_IAM"
            } else {
                "CAPABILITY_IAM"
            };
            config.insert("Capabilities".to_string(), json!(capability));
            if let Some(role) = ids.deploy_roles.get(&(stage.to_string(), action.name.clone())) {
                config.insert("RoleArn".to_string(), get_att(role, "Arn"));
            }
        }
        ActionKind::ManualApproval { notes, .. } => {
            if let Some(notes) = notes {
                config.insert("CustomData".to_string(), json!(notes));
            }
        }
        ActionKind::ExecuteChangeSet {
            stack_name,
            change_set_name,
        } => {
            config.insert("ActionMode".to_string(), json!("CHANGE_SET_EXECUTE"));
            config.insert("StackName".to_string(), json!(stack_name));
            config.insert("ChangeSetName".to_string(), json!(change_set_name));
        }
    }
    config
}

fn secret_reference(secret_name: &str) -> String {
    format!("{{{{resolve:secretsmanager:{secret_name}:SecretString:::}}}}")
}

fn child<'a>(scope: &[&'a str], leaf: &'a str) -> Vec<&'a str> {
    let mut path = scope.to_vec();
    path.push(leaf);
    path
}

/// Adds the push-event wiring for a source action at construct path `scope`.
fn add_push_trigger(
    template: &mut Template,
    scope: &[&str],
    ids: &Ids,
    action: &ActionSpec,
    provider: &SourceProvider,
    branch: &str,
) -> Result<(), DeployflowError> {
    match provider {
        SourceProvider::CodeCommit { repository_name } => {
            let Some(repo_id) = ids.repositories.get(repository_name) else {
                return Ok(());
            };
            let role_id = logical_id(&child(scope, "EventsRole"));
            let role = iam::with_inline_policy(
                service_role("events.amazonaws.com"),
                "StartPipelinePolicy",
                vec![allow(&["codepipeline:StartPipelineExecution"], pipeline_arn(&ids.pipeline))],
            );
            template.add(role_id.clone(), role)?;

            let rule_id = logical_id(&child(scope, "EventRule"));
            template.add(
                rule_id,
                Resource::new(
                    EVENT_RULE_TYPE,
                    json!({
                        "EventPattern": {
                            "detail": {
                                "event": ["referenceCreated", "referenceUpdated"],
                                "referenceName": [branch]
                            },
                            "detail-type": ["CodeCommit Repository State Change"],
                            "resources": [get_att(repo_id, "Arn")],
                            "source": ["aws.codecommit"]
                        },
                        "State": "ENABLED",
                        "Targets": [{
                            "Arn": pipeline_arn(&ids.pipeline),
                            "Id": "Target0",
                            "RoleArn": get_att(&role_id, "Arn")
                        }]
                    }),
                ),
            )?;
        }
        SourceProvider::GitHub {
            oauth_token_secret, ..
        } => {
            let webhook_id = logical_id(&child(scope, "WebhookResource"));
            template.add(
                webhook_id,
                Resource::new(
                    WEBHOOK_TYPE,
                    json!({
                        "Authentication": "GITHUB_HMAC",
                        "AuthenticationConfiguration": {
                            "SecretToken": secret_reference(oauth_token_secret)
                        },
                        "Filters": [{
                            "JsonPath": "$.ref",
                            "MatchEquals": "refs/heads/{Branch}"
                        }],
                        "RegisterWithThirdParty": true,
                        "TargetAction": action.name,
                        "TargetPipeline": reference(&ids.pipeline),
                        "TargetPipelineVersion": 1
                    }),
                ),
            )?;
        }
    }
    Ok(())
}
