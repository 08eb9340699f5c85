use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SkillError};

const MANIFEST_CANDIDATES: &[&str] = &[".claude-plugin/plugin.json", "plugin.json"];

#[derive(Debug, Clone, Default, Deserialize)]
struct RawManifest {
    #[serde(default)]
    skills: Value,
    #[serde(default)]
    commands: Value,
    #[serde(default)]
    agents: Value,
    #[serde(default)]
    hooks: Value,
    #[serde(default, rename = "mcpServers")]
    mcp_servers: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpServer {
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    #[serde(default)]
    pub http_headers: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct McpServerRaw {
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: Option<HashMap<String, String>>,
    #[serde(default)]
    http_headers: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default)]
pub struct ShellHook {
    pub command: String,
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct HookMatcher {
    /// The compiled selector. Empty means match-all (from a bare `"*"`).
    pub selector: String,
    pub hooks: Vec<ShellHook>,
}

#[derive(Debug, Clone, Default)]
pub struct HooksConfig {
    pub events: HashMap<String, Vec<HookMatcher>>,
}

/// A parsed plugin, its components already resolved against `plugin_root`.
#[derive(Debug, Clone, Default)]
pub struct LoadedPlugin {
    pub root: PathBuf,
    pub skill_dirs: Vec<PathBuf>,
    pub commands: Vec<String>,
    pub agents: Vec<String>,
    pub hooks: HooksConfig,
    pub mcp_servers: HashMap<String, McpServer>,
}

/// Discover plugin roots under `search_dirs` (each searched one level deep
/// for subdirectories carrying a manifest) and parse each one.
pub fn discover_and_load(search_dirs: &[PathBuf], project_dir: &Path) -> Result<Vec<LoadedPlugin>> {
    let mut plugins = Vec::new();
    for search_dir in search_dirs {
        if !search_dir.is_dir() {
            continue;
        }
        for entry in fs::read_dir(search_dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(manifest_path) = find_manifest(&path) {
                plugins.push(load_plugin(&path, &manifest_path, project_dir)?);
            }
        }
    }
    Ok(plugins)
}

fn find_manifest(plugin_root: &Path) -> Option<PathBuf> {
    MANIFEST_CANDIDATES
        .iter()
        .map(|rel| plugin_root.join(rel))
        .find(|p| p.is_file())
}

pub fn load_plugin(plugin_root: &Path, manifest_path: &Path, project_dir: &Path) -> Result<LoadedPlugin> {
    let text = fs::read_to_string(manifest_path)?;
    let raw: RawManifest = serde_json::from_str(&text)
        .map_err(|e| SkillError::Manifest(format!("{}: {e}", manifest_path.display())))?;

    let vars = env_vars(plugin_root, project_dir);

    Ok(LoadedPlugin {
        root: plugin_root.to_path_buf(),
        skill_dirs: resolve_component_list(&raw.skills)
            .into_iter()
            .map(|rel| plugin_root.join(expand_vars(&rel, &vars)))
            .collect(),
        commands: resolve_component_list(&raw.commands)
            .into_iter()
            .map(|c| expand_vars(&c, &vars))
            .collect(),
        agents: resolve_component_list(&raw.agents)
            .into_iter()
            .map(|a| expand_vars(&a, &vars))
            .collect(),
        hooks: parse_hooks(&raw.hooks, &vars),
        mcp_servers: parse_mcp_servers(&raw.mcp_servers, &vars),
    })
}

fn env_vars(plugin_root: &Path, project_dir: &Path) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("CLAUDE_PLUGIN_ROOT".to_string(), plugin_root.to_string_lossy().to_string());
    vars.insert("CLAUDE_PROJECT_DIR".to_string(), project_dir.to_string_lossy().to_string());
    vars
}

/// `skills`/`commands`/`agents` may be declared as a bare string, an array
/// of strings, or (for `commands`/`agents`) inline JSON objects — the latter
/// are kept as their serialized form for the prompts parser to consume.
fn resolve_component_list(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Value::Object(_) => vec![value.to_string()],
        _ => Vec::new(),
    }
}

fn parse_hooks(value: &Value, vars: &HashMap<String, String>) -> HooksConfig {
    let Value::Object(events) = value else {
        return HooksConfig::default();
    };

    let mut parsed = HashMap::new();
    for (event_name, matchers_value) in events {
        let Value::Array(matchers) = matchers_value else {
            continue;
        };
        let mut parsed_matchers = Vec::new();
        for matcher_value in matchers {
            let selector = matcher_value
                .get("matcher")
                .and_then(Value::as_str)
                .unwrap_or("*")
                .trim()
                .to_string();
            let selector = if selector == "*" { String::new() } else { selector };

            let hooks = matcher_value
                .get("hooks")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|h| {
                    let command = h.get("command").and_then(Value::as_str)?.to_string();
                    Some(ShellHook {
                        command: expand_vars(&command, vars),
                        env: vars.clone(),
                    })
                })
                .collect();

            parsed_matchers.push(HookMatcher { selector, hooks });
        }
        parsed.insert(event_name.clone(), parsed_matchers);
    }
    HooksConfig { events: parsed }
}

/// The canonical wrapper form is `{"mcpServers": {...}}`; if the manifest's
/// `mcpServers` value itself contains a nested `mcpServers` object, that
/// inner object is the actual server map — never treat the outer object as
/// a single server literally named `mcpServers`.
fn parse_mcp_servers(value: &Value, vars: &HashMap<String, String>) -> HashMap<String, McpServer> {
    let Value::Object(map) = value else {
        return HashMap::new();
    };
    let servers = match map.get("mcpServers") {
        Some(Value::Object(inner)) => inner,
        _ => map,
    };

    servers
        .iter()
        .filter_map(|(name, cfg)| {
            let raw: McpServerRaw = serde_json::from_value(cfg.clone()).ok()?;
            Some((
                name.clone(),
                McpServer {
                    command: raw.command.map(|c| expand_vars(&c, vars)),
                    args: raw.args.into_iter().map(|a| expand_vars(&a, vars)).collect(),
                    env: raw.env.map(|m| expand_env_map(m, vars)),
                    http_headers: raw.http_headers.map(|m| expand_env_map(m, vars)),
                },
            ))
        })
        .collect()
}

fn expand_env_map(map: HashMap<String, String>, vars: &HashMap<String, String>) -> HashMap<String, String> {
    map.into_iter().map(|(k, v)| (k, expand_vars(&v, vars))).collect()
}

/// Expand `${NAME}` references: first against `vars`, falling back to the
/// process environment, leaving the placeholder untouched if neither has it.
fn expand_vars(input: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let Some(end) = rest[start..].find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &rest[start + 2..start + end];
        if let Some(value) = vars.get(name).cloned().or_else(|| std::env::var(name).ok()) {
            out.push_str(&value);
        } else {
            out.push_str(&rest[start..start + end + 1]);
        }
        rest = &rest[start + end + 1..];
    }
    out.push_str(rest);
    out
}

/// Merge plugin layers deepest-first: later (higher-priority) entries win
/// on a key collision. An explicit empty map at a higher layer replaces —
/// and so clears — whatever the lower layer contributed, since `Option` here
/// distinguishes "field absent" (`None`, inherit) from "field present but
/// empty" (`Some(empty)`, override to nothing).
pub fn merge_optional_map<T>(
    base: Option<HashMap<String, T>>,
    overlay: Option<HashMap<String, T>>,
) -> Option<HashMap<String, T>> {
    match overlay {
        Some(map) => Some(map),
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_manifest(root: &Path, body: &str) {
        fs::create_dir_all(root.join(".claude-plugin")).unwrap();
        fs::write(root.join(".claude-plugin/plugin.json"), body).unwrap();
    }

    #[test]
    fn resolves_skills_declared_as_a_bare_string() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(tmp.path(), r#"{"skills": "skills"}"#);
        let manifest_path = tmp.path().join(".claude-plugin/plugin.json");
        let plugin = load_plugin(tmp.path(), &manifest_path, Path::new("/project")).unwrap();
        assert_eq!(plugin.skill_dirs, vec![tmp.path().join("skills")]);
    }

    #[test]
    fn resolves_skills_declared_as_an_array() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(tmp.path(), r#"{"skills": ["a", "b"]}"#);
        let manifest_path = tmp.path().join(".claude-plugin/plugin.json");
        let plugin = load_plugin(tmp.path(), &manifest_path, Path::new("/project")).unwrap();
        assert_eq!(plugin.skill_dirs.len(), 2);
    }

    #[test]
    fn expands_plugin_root_and_project_dir_vars() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            tmp.path(),
            r#"{"mcpServers": {"fs": {"command": "${CLAUDE_PLUGIN_ROOT}/bin/fs", "env": {"PROJECT": "${CLAUDE_PROJECT_DIR}"}}}}"#,
        );
        let manifest_path = tmp.path().join(".claude-plugin/plugin.json");
        let plugin = load_plugin(tmp.path(), &manifest_path, Path::new("/project")).unwrap();
        let server = plugin.mcp_servers.get("fs").unwrap();
        assert_eq!(server.command.as_deref(), Some(format!("{}/bin/fs", tmp.path().display())).as_deref());
        assert_eq!(server.env.as_ref().unwrap().get("PROJECT").map(String::as_str), Some("/project"));
    }

    #[test]
    fn unwraps_nested_canonical_mcp_servers_wrapper() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            tmp.path(),
            r#"{"mcpServers": {"mcpServers": {"fs": {"command": "fs"}}}}"#,
        );
        let manifest_path = tmp.path().join(".claude-plugin/plugin.json");
        let plugin = load_plugin(tmp.path(), &manifest_path, Path::new("/project")).unwrap();
        assert!(plugin.mcp_servers.contains_key("fs"));
        assert!(!plugin.mcp_servers.contains_key("mcpServers"));
    }

    #[test]
    fn empty_mcp_servers_wrapper_yields_zero_servers() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(tmp.path(), r#"{"mcpServers": {}}"#);
        let manifest_path = tmp.path().join(".claude-plugin/plugin.json");
        let plugin = load_plugin(tmp.path(), &manifest_path, Path::new("/project")).unwrap();
        assert!(plugin.mcp_servers.is_empty());
    }

    #[test]
    fn wildcard_matcher_becomes_an_empty_selector() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            tmp.path(),
            r#"{"hooks": {"PreToolUse": [{"matcher": "*", "hooks": [{"command": "echo hi"}]}]}}"#,
        );
        let manifest_path = tmp.path().join(".claude-plugin/plugin.json");
        let plugin = load_plugin(tmp.path(), &manifest_path, Path::new("/project")).unwrap();
        let matcher = &plugin.hooks.events.get("PreToolUse").unwrap()[0];
        assert_eq!(matcher.selector, "");
        assert_eq!(matcher.hooks[0].command, "echo hi");
    }

    #[test]
    fn merge_optional_map_lets_an_explicit_empty_map_clear_the_base() {
        let mut base = HashMap::new();
        base.insert("A".to_string(), "1".to_string());
        let merged = merge_optional_map(Some(base), Some(HashMap::new()));
        assert_eq!(merged, Some(HashMap::new()));
    }

    #[test]
    fn merge_optional_map_inherits_base_when_overlay_absent() {
        let mut base = HashMap::new();
        base.insert("A".to_string(), "1".to_string());
        let merged = merge_optional_map(Some(base.clone()), None);
        assert_eq!(merged, Some(base));
    }
}
