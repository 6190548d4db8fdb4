//! Terraform interface extraction for `.tf` and `.tf.json` sources.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use glob::Pattern;
use hcl::{Block, Body, Expression};
use serde_json::Value;

use super::extractor::FileClass;
use crate::error::{Error, Result};
use crate::types::{ModuleCall, ModuleDetails, Output, ProviderRequirement, Resource, Variable};

const TERRAFORM_PATTERNS: &[&str] = &["*.tf", "*.tf.json"];
const README_NAMES: &[&str] = &["README.md", "readme.md", "README.MD", "Readme.md"];

fn is_terraform_name(name: &str) -> bool {
    TERRAFORM_PATTERNS
        .iter()
        .filter_map(|p| Pattern::new(p).ok())
        .any(|p| p.matches(name))
}

/// Parses the Terraform files directly inside `dir` (relative to the tree root).
///
/// Only the files listed in `files` are read, so binaries and anything outside
/// the extracted tree are never touched.
pub fn parse_module_dir(
    root: &Path,
    dir: &str,
    files: &BTreeMap<String, FileClass>,
) -> Result<ModuleDetails> {
    let mut details = ModuleDetails::default();
    let prefix = if dir.is_empty() {
        String::new()
    } else {
        format!("{}/", dir.trim_end_matches('/'))
    };

    for (path, class) in files {
        let Some(name) = path.strip_prefix(&prefix) else {
            continue;
        };
        if name.contains('/') || !is_terraform_name(name) {
            continue;
        }
        let content = match class {
            FileClass::Tf | FileClass::Json => fs::read_to_string(root.join(path))?,
            _ => continue,
        };
        if name.ends_with(".tf.json") {
            parse_json_config(path, &content, &mut details)?;
        } else {
            parse_hcl_config(path, &content, &mut details)?;
        }
    }

    details.readme_raw = README_NAMES.iter().find_map(|readme| {
        let path = format!("{prefix}{readme}");
        match files.get(&path) {
            Some(FileClass::Md) => fs::read_to_string(root.join(&path)).ok(),
            _ => None,
        }
    });

    details.variables.sort_by(|a, b| a.name.cmp(&b.name));
    details.outputs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(details)
}

fn parse_error(path: &str, e: impl std::fmt::Display) -> Error {
    Error::bad_request(format!("Failed to parse {path}: {e}"))
}

pub fn parse_hcl_config(path: &str, content: &str, details: &mut ModuleDetails) -> Result<()> {
    let body: Body = hcl::parse(content).map_err(|e| parse_error(path, e))?;

    for block in body.blocks() {
        let labels: Vec<&str> = block.labels().iter().map(|l| l.as_str()).collect();
        match (block.identifier(), labels.as_slice()) {
            ("variable", [name]) => details.variables.push(hcl_variable(name, block)),
            ("output", [name]) => details.outputs.push(Output {
                name: (*name).to_string(),
                description: attr_string(block.body(), "description"),
                sensitive: attr_bool(block.body(), "sensitive"),
            }),
            ("resource", [kind, name]) => details
                .resources
                .push(resource(kind, name, attr_string(block.body(), "provider"))),
            ("data", [kind, name]) => details
                .data_sources
                .push(resource(kind, name, attr_string(block.body(), "provider"))),
            ("module", [name]) => details.modules_called.push(ModuleCall {
                name: (*name).to_string(),
                source: attr_string(block.body(), "source"),
                version: attr_string(block.body(), "version"),
            }),
            ("terraform", []) => {
                for inner in block.body().blocks() {
                    if inner.identifier() == "required_providers" {
                        for attr in inner.body().attributes() {
                            add_required_provider(details, attr.key(), &expr_value(attr.expr()));
                        }
                    }
                }
            }
            ("provider", [name]) => add_provider_block(details, name),
            _ => {}
        }
    }
    Ok(())
}

fn hcl_variable(name: &str, block: &Block) -> Variable {
    let body = block.body();
    let default = find_attr(body, "default").map(expr_value);
    Variable {
        name: name.to_string(),
        var_type: find_attr(body, "type").and_then(|expr| hcl::format::to_string(expr).ok()),
        description: attr_string(body, "description"),
        required: default.is_none(),
        default,
        sensitive: attr_bool(body, "sensitive"),
    }
}

fn find_attr<'a>(body: &'a Body, key: &str) -> Option<&'a Expression> {
    body.attributes()
        .find(|attr| attr.key() == key)
        .map(|attr| attr.expr())
}

fn expr_value(expr: &Expression) -> Value {
    serde_json::to_value(expr).unwrap_or(Value::Null)
}

fn attr_string(body: &Body, key: &str) -> Option<String> {
    match expr_value(find_attr(body, key)?) {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn attr_bool(body: &Body, key: &str) -> bool {
    find_attr(body, key)
        .map(expr_value)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// `aws.west` and `${aws.west}` both name the `aws` provider.
fn provider_name(kind: &str, explicit: Option<String>) -> String {
    match explicit {
        Some(raw) => {
            let raw = raw.trim_start_matches("${").trim_end_matches('}');
            raw.split('.').next().unwrap_or(raw).to_string()
        }
        None => kind.split('_').next().unwrap_or(kind).to_string(),
    }
}

fn resource(kind: &str, name: &str, provider: Option<String>) -> Resource {
    Resource {
        resource_type: kind.to_string(),
        name: name.to_string(),
        provider: provider_name(kind, provider),
    }
}

fn add_required_provider(details: &mut ModuleDetails, name: &str, spec: &Value) {
    let (source, version) = match spec {
        Value::String(version) => (None, Some(version.clone())),
        Value::Object(map) => (
            map.get("source").and_then(Value::as_str).map(str::to_string),
            map.get("version").and_then(Value::as_str).map(str::to_string),
        ),
        _ => (None, None),
    };

    match details.providers.iter_mut().find(|p| p.name == name) {
        Some(existing) => {
            existing.source = existing.source.take().or(source);
            existing.version = existing.version.take().or(version);
        }
        None => details.providers.push(ProviderRequirement {
            name: name.to_string(),
            source,
            version,
        }),
    }
}

fn add_provider_block(details: &mut ModuleDetails, name: &str) {
    if !details.providers.iter().any(|p| p.name == name) {
        details.providers.push(ProviderRequirement {
            name: name.to_string(),
            source: None,
            version: None,
        });
    }
}

/// JSON blocks may be a single object or a list of objects.
fn json_objects(value: &Value) -> Vec<&serde_json::Map<String, Value>> {
    match value {
        Value::Object(map) => vec![map],
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    }
}

fn json_string(map: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

fn json_bool(map: &serde_json::Map<String, Value>, key: &str) -> bool {
    map.get(key).and_then(Value::as_bool).unwrap_or(false)
}

pub fn parse_json_config(path: &str, content: &str, details: &mut ModuleDetails) -> Result<()> {
    let root: Value = serde_json::from_str(content).map_err(|e| parse_error(path, e))?;
    let Some(root) = root.as_object() else {
        return Err(parse_error(path, "top level must be an object"));
    };

    for (name, spec) in root.get("variable").map(json_objects).unwrap_or_default().into_iter().flatten() {
        let spec = spec.as_object();
        let default = spec.and_then(|s| s.get("default")).cloned();
        details.variables.push(Variable {
            name: name.clone(),
            var_type: spec.and_then(|s| json_string(s, "type")),
            description: spec.and_then(|s| json_string(s, "description")),
            required: default.is_none(),
            default,
            sensitive: spec.is_some_and(|s| json_bool(s, "sensitive")),
        });
    }

    for (name, spec) in root.get("output").map(json_objects).unwrap_or_default().into_iter().flatten() {
        let spec = spec.as_object();
        details.outputs.push(Output {
            name: name.clone(),
            description: spec.and_then(|s| json_string(s, "description")),
            sensitive: spec.is_some_and(|s| json_bool(s, "sensitive")),
        });
    }

    for (section, target) in [("resource", false), ("data", true)] {
        for (kind, named) in root.get(section).map(json_objects).unwrap_or_default().into_iter().flatten() {
            for (name, spec) in json_objects(named).into_iter().flatten() {
                let provider = spec.as_object().and_then(|s| json_string(s, "provider"));
                let entry = resource(kind, name, provider);
                if target {
                    details.data_sources.push(entry);
                } else {
                    details.resources.push(entry);
                }
            }
        }
    }

    for (name, spec) in root.get("module").map(json_objects).unwrap_or_default().into_iter().flatten() {
        let spec = spec.as_object();
        details.modules_called.push(ModuleCall {
            name: name.clone(),
            source: spec.and_then(|s| json_string(s, "source")),
            version: spec.and_then(|s| json_string(s, "version")),
        });
    }

    for terraform in root.get("terraform").map(json_objects).unwrap_or_default() {
        for required in terraform.get("required_providers").map(json_objects).unwrap_or_default() {
            for (name, spec) in required {
                add_required_provider(details, name, spec);
            }
        }
    }

    for name in root.get("provider").map(json_objects).unwrap_or_default().into_iter().flat_map(|m| m.keys()) {
        add_provider_block(details, name);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MAIN_TF: &str = r#"
terraform {
  required_providers {
    aws = {
      source  = "hashicorp/aws"
      version = ">= 4.0"
    }
  }
}

variable "name" {
  type        = string
  description = "Bucket name"
}

variable "tags" {
  type    = map(string)
  default = {}
}

variable "secret" {
  default   = "hunter2"
  sensitive = true
}

resource "aws_s3_bucket" "this" {
  bucket = var.name
}

data "aws_caller_identity" "current" {}

module "labels" {
  source  = "cloudposse/label/null"
  version = "0.25.0"
}

output "arn" {
  description = "Bucket ARN"
  value       = aws_s3_bucket.this.arn
}
"#;

    #[test]
    fn test_parses_hcl_blocks() {
        let mut details = ModuleDetails::default();
        parse_hcl_config("main.tf", MAIN_TF, &mut details).unwrap();

        assert_eq!(details.variables.len(), 3);
        let name = &details.variables[0];
        assert_eq!(name.name, "name");
        assert_eq!(name.var_type.as_deref(), Some("string"));
        assert_eq!(name.description.as_deref(), Some("Bucket name"));
        assert!(name.required);

        let tags = &details.variables[1];
        assert!(!tags.required);
        assert_eq!(tags.default, Some(serde_json::json!({})));

        let secret = &details.variables[2];
        assert!(secret.sensitive);
        assert_eq!(secret.default, Some(serde_json::json!("hunter2")));

        assert_eq!(details.outputs[0].name, "arn");
        assert_eq!(details.outputs[0].description.as_deref(), Some("Bucket ARN"));

        assert_eq!(details.resources[0].resource_type, "aws_s3_bucket");
        assert_eq!(details.resources[0].provider, "aws");
        assert_eq!(details.data_sources[0].name, "current");

        assert_eq!(details.modules_called[0].source.as_deref(), Some("cloudposse/label/null"));
        assert_eq!(details.providers[0].source.as_deref(), Some("hashicorp/aws"));
        assert_eq!(details.providers[0].version.as_deref(), Some(">= 4.0"));
    }

    #[test]
    fn test_empty_variable_block_is_required() {
        let mut details = ModuleDetails::default();
        parse_hcl_config("main.tf", "variable \"x\" {}\n", &mut details).unwrap();
        assert_eq!(details.variables[0].name, "x");
        assert!(details.variables[0].required);
        assert!(details.variables[0].var_type.is_none());
    }

    #[test]
    fn test_invalid_hcl_is_bad_request() {
        let mut details = ModuleDetails::default();
        let err = parse_hcl_config("main.tf", "variable \"x\" {", &mut details).unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn test_parses_tf_json() {
        let content = r#"{
            "variable": {"region": {"type": "string", "default": "us-east-1"}},
            "output": {"id": {"description": "The id"}},
            "resource": {"aws_instance": {"web": {"provider": "aws.west"}}},
            "terraform": [{"required_providers": {"aws": {"source": "hashicorp/aws"}}}]
        }"#;
        let mut details = ModuleDetails::default();
        parse_json_config("main.tf.json", content, &mut details).unwrap();

        assert_eq!(details.variables[0].name, "region");
        assert!(!details.variables[0].required);
        assert_eq!(details.outputs[0].description.as_deref(), Some("The id"));
        assert_eq!(details.resources[0].provider, "aws");
        assert_eq!(details.providers[0].source.as_deref(), Some("hashicorp/aws"));
    }

    #[test]
    fn test_parse_module_dir_reads_readme_and_skips_binary() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::write(root.join("main.tf"), "variable \"x\" {}\n").unwrap();
        std::fs::write(root.join("README.md"), "# Widget").unwrap();
        std::fs::create_dir_all(root.join("modules/sub")).unwrap();
        std::fs::write(root.join("modules/sub/main.tf"), "output \"y\" {}\n").unwrap();

        let mut files = BTreeMap::new();
        files.insert("main.tf".to_string(), FileClass::Tf);
        files.insert("README.md".to_string(), FileClass::Md);
        files.insert("modules/sub/main.tf".to_string(), FileClass::Tf);

        let details = parse_module_dir(root, "", &files).unwrap();
        assert_eq!(details.readme_raw.as_deref(), Some("# Widget"));
        assert_eq!(details.variables.len(), 1);
        assert!(details.outputs.is_empty());

        let sub = parse_module_dir(root, "modules/sub", &files).unwrap();
        assert_eq!(sub.outputs[0].name, "y");
        assert!(sub.readme_raw.is_none());

        files.insert("README.md".to_string(), FileClass::Binary);
        let details = parse_module_dir(root, "", &files).unwrap();
        assert!(details.readme_raw.is_none());
    }
}
